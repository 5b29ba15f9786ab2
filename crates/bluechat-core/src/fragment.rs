//! Chunked fragmentation and reassembly for advertisement payloads
//!
//! A broadcast packet carries far less than a useful message, so a payload is
//! split into fixed-size chunks, each sent as
//! `[total_chunks][index][generation hash (4 bytes)][chunk body]`.
//! A passive scanner feeds every chunk it sees into a [`FragmentAssembler`],
//! which tracks exactly one in-progress generation at a time.

use std::cmp;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::errors::FragmentError;
use crate::types::GenerationHash;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Wire size of a fragment header
pub const FRAGMENT_HEADER_LEN: usize = 6;

/// Maximum number of chunks per payload (the count travels in one byte)
pub const MAX_CHUNKS: usize = u8::MAX as usize;

// ----------------------------------------------------------------------------
// Fragment Header
// ----------------------------------------------------------------------------

/// Header placed in front of every chunk on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentHeader {
    /// Number of chunks needed to rebuild the payload
    pub total_chunks: u8,
    /// Position of this chunk (0-based)
    pub index: u8,
    /// Fingerprint of the payload this chunk belongs to
    pub generation: GenerationHash,
}

impl FragmentHeader {
    pub fn new(total_chunks: u8, index: u8, generation: GenerationHash) -> Self {
        Self {
            total_chunks,
            index,
            generation,
        }
    }

    pub fn is_first(&self) -> bool {
        self.index == 0
    }

    pub fn is_last(&self) -> bool {
        self.index as usize + 1 == self.total_chunks as usize
    }

    /// Serialize to the 6-byte wire layout
    pub fn to_bytes(&self) -> [u8; FRAGMENT_HEADER_LEN] {
        let g = self.generation.as_bytes();
        [self.total_chunks, self.index, g[0], g[1], g[2], g[3]]
    }

    /// Parse and validate a header from the start of `raw`
    pub fn parse(raw: &[u8]) -> Result<Self, FragmentError> {
        if raw.len() < FRAGMENT_HEADER_LEN {
            return Err(FragmentError::Truncated {
                len: raw.len(),
                header: FRAGMENT_HEADER_LEN,
            });
        }
        let header = Self {
            total_chunks: raw[0],
            index: raw[1],
            generation: GenerationHash::new([raw[2], raw[3], raw[4], raw[5]]),
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<(), FragmentError> {
        if self.total_chunks == 0 {
            return Err(FragmentError::ZeroTotal);
        }
        if self.index >= self.total_chunks {
            return Err(FragmentError::IndexOutOfRange {
                index: self.index,
                total: self.total_chunks,
            });
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Fragment
// ----------------------------------------------------------------------------

/// A single chunk together with its header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub header: FragmentHeader,
    pub body: Bytes,
}

impl Fragment {
    pub fn new(header: FragmentHeader, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Wire bytes: header followed by the chunk body
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAGMENT_HEADER_LEN + self.body.len());
        buf.put_slice(&self.header.to_bytes());
        buf.put_slice(&self.body);
        buf.freeze()
    }

    /// Parse a fragment from a raw advertisement payload
    pub fn from_bytes(raw: &[u8]) -> Result<Self, FragmentError> {
        let header = FragmentHeader::parse(raw)?;
        Ok(Self {
            header,
            body: Bytes::copy_from_slice(&raw[FRAGMENT_HEADER_LEN..]),
        })
    }

    /// Split `payload` into ordered fragments tagged with its content hash
    pub fn fragment_payload(payload: &[u8], chunk_size: usize) -> Result<Vec<Self>, FragmentError> {
        Self::fragment_with_generation(payload, chunk_size, GenerationHash::of(payload))
    }

    /// Split `payload` into ordered fragments tagged with `generation`
    pub fn fragment_with_generation(
        payload: &[u8],
        chunk_size: usize,
        generation: GenerationHash,
    ) -> Result<Vec<Self>, FragmentError> {
        let chunks = split(payload, chunk_size)?;
        if chunks.is_empty() {
            return Err(FragmentError::EmptyPayload);
        }
        // split() guarantees the count fits in a byte
        let total = chunks.len() as u8;
        Ok(chunks
            .into_iter()
            .enumerate()
            .map(|(i, body)| Self::new(FragmentHeader::new(total, i as u8, generation), body))
            .collect())
    }
}

/// Split `payload` into `ceil(len / chunk_size)` ordered chunk bodies
///
/// An empty payload yields no chunks.
pub fn split(payload: &[u8], chunk_size: usize) -> Result<Vec<Bytes>, FragmentError> {
    if chunk_size == 0 {
        return Err(FragmentError::ZeroChunkSize);
    }
    let needed = payload.len().div_ceil(chunk_size);
    if needed > MAX_CHUNKS {
        return Err(FragmentError::TooManyChunks {
            needed,
            max: MAX_CHUNKS,
        });
    }

    let source = Bytes::copy_from_slice(payload);
    Ok((0..needed)
        .map(|i| {
            let start = i * chunk_size;
            let end = cmp::min(start + chunk_size, payload.len());
            source.slice(start..end)
        })
        .collect())
}

// ----------------------------------------------------------------------------
// Fragment Assembler
// ----------------------------------------------------------------------------

/// A payload rebuilt from a complete fragment set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassembledPayload {
    pub payload: Bytes,
    pub generation: GenerationHash,
}

/// Result of feeding one chunk to the assembler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Chunks of the current generation held so far
    pub received: usize,
    /// Chunks needed for the current generation
    pub total: usize,
    /// Present exactly once per generation, on the chunk that completes it
    pub completed: Option<ReassembledPayload>,
}

/// Chunks of one generation received so far
#[derive(Debug)]
struct FragmentSet {
    generation: GenerationHash,
    chunks: Vec<Option<Bytes>>,
    received: usize,
}

impl FragmentSet {
    fn new(total_chunks: u8, generation: GenerationHash) -> Self {
        Self {
            generation,
            chunks: vec![None; total_chunks as usize],
            received: 0,
        }
    }

    fn matches(&self, header: &FragmentHeader) -> bool {
        self.generation == header.generation && self.chunks.len() == header.total_chunks as usize
    }

    fn store(&mut self, index: u8, body: Bytes) {
        let slot = &mut self.chunks[index as usize];
        if slot.is_none() {
            self.received += 1;
        }
        // Last write wins for repeated indices
        *slot = Some(body);
    }

    fn is_complete(&self) -> bool {
        self.received == self.chunks.len()
    }

    fn assemble(self) -> ReassembledPayload {
        let size = self.chunks.iter().flatten().map(Bytes::len).sum();
        let mut payload = BytesMut::with_capacity(size);
        for chunk in self.chunks.into_iter().flatten() {
            payload.put_slice(&chunk);
        }
        ReassembledPayload {
            payload: payload.freeze(),
            generation: self.generation,
        }
    }
}

/// Rebuilds one broadcast payload at a time from scanned chunks
///
/// A chunk whose generation hash or chunk count differs from the set in progress
/// discards that set and starts a new one. Chunks of different generations are
/// never mixed.
#[derive(Debug, Default)]
pub struct FragmentAssembler {
    in_progress: Option<FragmentSet>,
}

impl FragmentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk
    pub fn observe(
        &mut self,
        total_chunks: u8,
        index: u8,
        generation: GenerationHash,
        body: Bytes,
    ) -> Result<Observation, FragmentError> {
        let header = FragmentHeader::new(total_chunks, index, generation);
        header.validate()?;

        let mut set = match self.in_progress.take() {
            Some(set) if set.matches(&header) => set,
            previous => {
                if let Some(old) = previous {
                    debug!(
                        "Generation {} replaced by {}, discarding {} chunks",
                        old.generation, generation, old.received
                    );
                }
                FragmentSet::new(total_chunks, generation)
            }
        };

        set.store(index, body);
        let received = set.received;
        let total = set.chunks.len();
        trace!("Chunk {} of {} for generation {}", index, total, generation);

        let completed = if set.is_complete() {
            Some(set.assemble())
        } else {
            self.in_progress = Some(set);
            None
        };

        Ok(Observation {
            received,
            total,
            completed,
        })
    }

    /// Feed a parsed fragment
    pub fn observe_fragment(&mut self, fragment: Fragment) -> Result<Observation, FragmentError> {
        let Fragment { header, body } = fragment;
        self.observe(header.total_chunks, header.index, header.generation, body)
    }

    /// Progress of the set in flight as `(received, total, generation)`
    pub fn in_progress(&self) -> Option<(usize, usize, GenerationHash)> {
        self.in_progress
            .as_ref()
            .map(|set| (set.received, set.chunks.len(), set.generation))
    }

    /// Drop any partially received set
    pub fn reset(&mut self) {
        self.in_progress = None;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
