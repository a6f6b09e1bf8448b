//! Memory-region descriptors and the external memory-owner boundary.
//!
//! Transport bytes arrive as descriptors pointing into memory owned by the
//! host event loop. A connection's inbound stream is the concatenation, in
//! arrival order, of the spans the descriptors resolve to; the spans need not
//! be adjacent and the owner reclaims each one once the decoder acknowledges
//! it as fully consumed.

use crate::error::Http2Error;

/// Descriptor of one contiguous span of externally owned memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Owner-defined address of the span.
    pub address: u64,
    /// Span length in bytes.
    pub length: u32,
    /// Tag of the transport stream the bytes belong to.
    pub stream_tag: u64,
}

impl Region {
    pub fn new(address: u64, length: u32, stream_tag: u64) -> Self {
        Self {
            address,
            length,
            stream_tag,
        }
    }
}

/// The external memory-allocation collaborator.
///
/// Implementations must be safe for use from multiple connection workers;
/// each worker only ever resolves and releases its own connection's regions.
pub trait MemoryOwner {
    /// Resolve a region descriptor to its backing byte span.
    ///
    /// The returned slice must be exactly `region.length` bytes. Never reads
    /// past the declared length.
    fn resolve(&self, region: &Region) -> Result<&[u8], Http2Error>;

    /// Acknowledge a fully consumed region so its backing blocks can be
    /// reclaimed.
    fn release(&mut self, region: &Region);
}

/// A memory owner backed by one flat byte buffer, addressed by offset.
///
/// Suitable for tests and single-buffer hosts; production hosts typically
/// bridge to a block allocator.
#[derive(Debug, Default)]
pub struct SliceMemory {
    bytes: Vec<u8>,
    released: Vec<Region>,
}

impl SliceMemory {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            released: Vec::new(),
        }
    }

    /// Regions acknowledged so far, in acknowledgment order.
    pub fn released(&self) -> &[Region] {
        &self.released
    }
}

impl MemoryOwner for SliceMemory {
    fn resolve(&self, region: &Region) -> Result<&[u8], Http2Error> {
        let start = region.address as usize;
        let end = start + region.length as usize;
        self.bytes
            .get(start..end)
            .ok_or_else(|| Http2Error::MemoryExhausted(format!("region {region:?} out of bounds")))
    }

    fn release(&mut self, region: &Region) {
        self.released.push(*region);
    }
}
