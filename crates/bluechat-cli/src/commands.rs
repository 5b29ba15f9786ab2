//! Command handlers for the BlueChat CLI
//!
//! Every demo runs entirely in memory on the loopback harness, so the same code
//! paths as a radio-backed deployment can be watched without hardware.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{info, warn};

use bluechat_ble::{BroadcastEvent, BroadcastFragmenter, BroadcastReassembler};
use bluechat_core::{DeviceInfo, PeerAddress, SessionState};
use bluechat_harness::{LoopbackDiscovery, LoopbackNetwork, LoopbackRadio};
use bluechat_session::{
    DeviceDiscovery, DiscoveryEvent, EventReceiver, SessionEvent, SessionManager,
};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::{CliError, Result};

const HOST_ADDRESS: PeerAddress = PeerAddress::new([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x01]);
const REMOTE_ADDRESS: PeerAddress = PeerAddress::new([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x02]);
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Chat {
                messages,
                drop_link,
            } => Self::handle_chat_command(&config, messages, drop_link).await,
            Commands::Broadcast {
                payload,
                hex,
                chunk_size,
            } => Self::handle_broadcast_command(&config, payload, hex, chunk_size).await,
            Commands::Discover => Self::handle_discover_command().await,
            Commands::ExampleConfig => {
                println!("{}", AppConfig::example_config());
                Ok(())
            }
        }
    }

    /// Connect two loopback sessions and exchange messages
    async fn handle_chat_command(
        config: &AppConfig,
        messages: Vec<String>,
        drop_link: bool,
    ) -> Result<()> {
        let network = LoopbackNetwork::new();
        let service = config.service_id;
        let security = config.security();

        let (host, mut host_events) = SessionManager::new(
            Arc::new(network.device(HOST_ADDRESS)),
            config.session.clone(),
        )?;
        let (remote, mut remote_events) = SessionManager::new(
            Arc::new(network.device(REMOTE_ADDRESS)),
            config.session.clone(),
        )?;

        host.start_listening(service, security).await;
        if !network.wait_for_listener(HOST_ADDRESS, service, STEP_TIMEOUT).await {
            return Err(CliError::Timeout("host never started listening".to_string()));
        }

        remote.connect(HOST_ADDRESS, service, security).await;
        wait_for_state(&mut remote_events, "remote", SessionState::Connected).await?;
        wait_for_state(&mut host_events, "host", SessionState::Connected).await?;

        for message in &messages {
            host.write(message.as_bytes()).await?;
            loop {
                match next_event(&mut remote_events, "remote").await? {
                    SessionEvent::MessageRead(body) => {
                        println!("remote received: {}", String::from_utf8_lossy(&body));
                        break;
                    }
                    other => report("remote", &other),
                }
            }
        }

        if drop_link {
            let severed = network.sever(REMOTE_ADDRESS);
            info!("Severed {} link(s); host should fall back to listening", severed);
            wait_for_state(&mut host_events, "host", SessionState::Listening).await?;
            println!("host state: {}", host.state().await);
        }

        remote.stop().await;
        host.stop().await;
        Ok(())
    }

    /// Cycle a payload on the loopback air until a scanner rebuilds it
    async fn handle_broadcast_command(
        config: &AppConfig,
        payload: String,
        is_hex: bool,
        chunk_size: Option<usize>,
    ) -> Result<()> {
        let body = if is_hex {
            hex::decode(payload.trim())?
        } else {
            payload.into_bytes()
        };
        let chunk_size = chunk_size.unwrap_or(config.broadcast.chunk_size);

        let radio = LoopbackRadio::new();
        let (fragmenter, mut advertise_events) =
            BroadcastFragmenter::new(Arc::new(radio.clone()), config.broadcast.clone());
        let (reassembler, mut scan_events) = BroadcastReassembler::new(Arc::new(radio.clone()));

        reassembler.start_scan(config.broadcast.service_id).await?;
        fragmenter.start_advertising(&body, chunk_size).await?;

        let chunks = body.len().div_ceil(chunk_size) as u32;
        let deadline = config.broadcast.dwell() * (chunks + 1) + STEP_TIMEOUT;
        let outcome = timeout(deadline, async {
            loop {
                tokio::select! {
                    Some(event) = scan_events.recv() => match event {
                        BroadcastEvent::Progress { received, total } => {
                            println!("received {received}/{total} chunks");
                        }
                        BroadcastEvent::Completed { payload, generation } => {
                            return Ok((payload, generation));
                        }
                        other => return Err(format!("{other:?}")),
                    },
                    Some(event) = advertise_events.recv() => {
                        return Err(format!("{event:?}"));
                    }
                    else => return Err("broadcast event channels closed".to_string()),
                }
            }
        })
        .await;

        fragmenter.stop_advertising().await;
        reassembler.stop_scan().await;

        match outcome {
            Ok(Ok((payload, generation))) => {
                println!(
                    "reassembled {} bytes (generation {}): {}",
                    payload.len(),
                    generation,
                    String::from_utf8_lossy(&payload)
                );
                Ok(())
            }
            Ok(Err(failure)) => Err(CliError::Timeout(failure)),
            Err(_) => Err(CliError::Timeout("payload was not reassembled".to_string())),
        }
    }

    /// Replay a scripted inquiry and list each device once
    async fn handle_discover_command() -> Result<()> {
        let provider = LoopbackDiscovery::new();
        let kitchen = DeviceInfo::new(REMOTE_ADDRESS, Some("kitchen-speaker".to_string()));
        provider.add_sighting(kitchen.clone());
        provider.add_sighting(DeviceInfo::new(
            PeerAddress::new([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x03]),
            None,
        ));
        provider.add_sighting(kitchen);
        provider.add_bonded(DeviceInfo::new(HOST_ADDRESS, Some("laptop".to_string())));

        let (discovery, mut events) = DeviceDiscovery::new(Arc::new(provider));
        for device in discovery.bonded_devices().await {
            println!("paired: {} {}", device.address, device.name.as_deref().unwrap_or("(unnamed)"));
        }

        discovery.start_discovery().await?;
        loop {
            let event = timeout(STEP_TIMEOUT, events.recv())
                .await
                .map_err(|_| CliError::Timeout("discovery never finished".to_string()))?;
            match event {
                Some(DiscoveryEvent::Started) => println!("discovery started"),
                Some(DiscoveryEvent::DeviceFound(device)) => println!(
                    "found: {} {}",
                    device.address,
                    device.name.as_deref().unwrap_or("(unnamed)")
                ),
                Some(DiscoveryEvent::Finished) | None => break,
            }
        }
        discovery.stop_discovery().await;
        println!("discovery finished");
        Ok(())
    }
}

fn report(side: &str, event: &SessionEvent) {
    match event {
        SessionEvent::Error(message) => warn!("[{}] {}", side, message),
        other => info!("[{}] {:?}", side, other),
    }
}

async fn next_event(events: &mut EventReceiver, side: &str) -> Result<SessionEvent> {
    match timeout(STEP_TIMEOUT, events.recv()).await {
        Ok(Some(event)) => Ok(event),
        Ok(None) => Err(CliError::Timeout(format!("{side} session closed"))),
        Err(_) => Err(CliError::Timeout(format!("{side} session stalled"))),
    }
}

async fn wait_for_state(events: &mut EventReceiver, side: &str, wanted: SessionState) -> Result<()> {
    loop {
        let event = next_event(events, side).await?;
        report(side, &event);
        if event == SessionEvent::StateChanged(wanted) {
            println!("{side} state: {wanted}");
            return Ok(());
        }
    }
}
