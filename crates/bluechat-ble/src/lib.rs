//! BlueChat broadcast subsystem
//!
//! Connectionless payload delivery over advertisements. A payload too large for
//! one advertisement is split into numbered chunks by the [`BroadcastFragmenter`],
//! which cycles them on air, and rebuilt on the receiving side by the
//! [`BroadcastReassembler`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bluechat_ble::{BroadcastEvent, BroadcastFragmenter, BroadcastReassembler};
//! use bluechat_core::{BroadcastConfig, BroadcastProvider, ScanProvider};
//!
//! # async fn example(
//! #     radio: Arc<dyn BroadcastProvider>,
//! #     scanner: Arc<dyn ScanProvider>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let config = BroadcastConfig::default();
//! let (fragmenter, _) = BroadcastFragmenter::new(radio, config.clone());
//! let (reassembler, mut events) = BroadcastReassembler::new(scanner);
//!
//! reassembler.start_scan(config.service_id).await?;
//! fragmenter.start_advertising(b"hello over the air", 8).await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let BroadcastEvent::Completed { payload, .. } = event {
//!         println!("received {} bytes", payload.len());
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod events;
mod fragmenter;
mod reassembler;

pub use error::{AdvertiseFailure, ScanFailure};
pub use events::{BroadcastEvent, BroadcastEventReceiver, BroadcastEventSender};
pub use fragmenter::BroadcastFragmenter;
pub use reassembler::BroadcastReassembler;
