//! Incremental HTTP/2 frame decoder over memory-region descriptors.
//!
//! The inbound byte stream arrives as ordered region batches; a frame header
//! or payload may straddle any region boundary. Bytes that complete an item
//! within a single span are decoded in place; partial items are copied into
//! the staging buffer and completed when later regions arrive. The decoded
//! frame sequence therefore depends only on the concatenated byte stream,
//! never on how it was chunked into regions.

use tracing::{debug, trace, warn};

use crate::error::{ErrorCode, Http2Error};
use crate::frame::{Frame, FrameHeader, CONNECTION_PREFACE, FRAME_HEADER_LEN};
use crate::region::{MemoryOwner, Region};
use crate::settings::DEFAULT_MAX_FRAME_SIZE;
use crate::staging::StagingBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    AwaitingPreface,
    AwaitingFrameHeader,
    AwaitingPayload,
    /// A connection-fatal error was reported; all further input is refused.
    Failed,
}

/// Incremental frame decoder for one connection.
pub struct FrameDecoder {
    state: DecoderState,
    /// Header of the frame whose payload is being awaited.
    pending_header: Option<FrameHeader>,
    staging: StagingBuffer,
    /// Staging offset and byte count of the partially gathered item.
    staged_offset: usize,
    staged: usize,
    max_frame_size: u32,
}

impl FrameDecoder {
    /// Decoder that expects the 24-byte connection preface first (server side).
    pub fn new(max_frame_size: u32) -> Self {
        Self {
            state: DecoderState::AwaitingPreface,
            pending_header: None,
            // One in-flight item at a time plus slack for the ring's
            // full/empty disambiguation byte.
            staging: StagingBuffer::with_capacity(max_frame_size as usize + FRAME_HEADER_LEN + 32),
            staged_offset: 0,
            staged: 0,
            max_frame_size,
        }
    }

    /// Decoder for a stream with no preface (client side, or post-upgrade).
    pub fn without_preface(max_frame_size: u32) -> Self {
        let mut decoder = Self::new(max_frame_size);
        decoder.state = DecoderState::AwaitingFrameHeader;
        decoder
    }

    /// Raise the frame-size ceiling after SETTINGS negotiation.
    pub fn set_max_frame_size(&mut self, max_frame_size: u32) {
        if max_frame_size > self.max_frame_size {
            // Regrow staging so a maximum-size frame still reassembles.
            self.staging =
                StagingBuffer::with_capacity(max_frame_size as usize + FRAME_HEADER_LEN + 32);
            self.staged = 0;
            self.staged_offset = 0;
        }
        self.max_frame_size = max_frame_size;
    }

    /// Consume a batch of region descriptors in order, emitting every frame
    /// completed by their bytes. Fully consumed regions are acknowledged to
    /// the memory owner so their backing blocks can be reclaimed.
    ///
    /// On a connection-fatal error, decoding halts permanently; the caller
    /// must emit GOAWAY and tear the connection down.
    pub fn decode<M: MemoryOwner>(
        &mut self,
        regions: &[Region],
        mem: &mut M,
    ) -> Result<Vec<Frame>, Http2Error> {
        let mut frames = Vec::new();
        for region in regions {
            let result = {
                let span = mem.resolve(region)?;
                debug_assert_eq!(span.len(), region.length as usize);
                self.consume_span(span, &mut frames)
            };
            match result {
                Ok(()) => mem.release(region),
                Err(err) => {
                    warn!(?region, %err, "frame decoding halted");
                    self.state = DecoderState::Failed;
                    return Err(err);
                }
            }
        }
        Ok(frames)
    }

    fn consume_span(&mut self, span: &[u8], frames: &mut Vec<Frame>) -> Result<(), Http2Error> {
        let mut cursor = 0usize;
        while cursor < span.len() || self.ready_without_input() {
            match self.state {
                DecoderState::Failed => {
                    return Err(Http2Error::connection(
                        ErrorCode::ProtocolError,
                        "decoder halted after a fatal error",
                    ));
                }
                DecoderState::AwaitingPreface => {
                    match self.gather(span, &mut cursor, CONNECTION_PREFACE.len())? {
                        Some(bytes) => {
                            if bytes != CONNECTION_PREFACE {
                                return Err(Http2Error::connection(
                                    ErrorCode::ProtocolError,
                                    "invalid connection preface",
                                ));
                            }
                            trace!("connection preface accepted");
                            self.finish_item();
                            self.state = DecoderState::AwaitingFrameHeader;
                        }
                        None => break,
                    }
                }
                DecoderState::AwaitingFrameHeader => {
                    match self.gather(span, &mut cursor, FRAME_HEADER_LEN)? {
                        Some(bytes) => {
                            let header = FrameHeader::parse(bytes)
                                .expect("gather returned exactly nine bytes");
                            self.finish_item();
                            if header.length > self.max_frame_size {
                                return Err(Http2Error::connection(
                                    ErrorCode::FrameSizeError,
                                    format!(
                                        "frame length {} exceeds max frame size {}",
                                        header.length, self.max_frame_size
                                    ),
                                ));
                            }
                            trace!(
                                frame_type = header.frame_type,
                                length = header.length,
                                stream_id = header.stream_id,
                                "frame header"
                            );
                            self.pending_header = Some(header);
                            self.state = DecoderState::AwaitingPayload;
                        }
                        None => break,
                    }
                }
                DecoderState::AwaitingPayload => {
                    let header = self.pending_header.expect("payload state carries a header");
                    match self.gather(span, &mut cursor, header.length as usize)? {
                        Some(payload) => {
                            let frame = Frame::decode(&header, payload)?;
                            debug!(frame_type = header.frame_type, stream_id = header.stream_id,
                                   "frame decoded");
                            frames.push(frame);
                            self.finish_item();
                            self.pending_header = None;
                            self.state = DecoderState::AwaitingFrameHeader;
                        }
                        None => break,
                    }
                }
            }
        }
        Ok(())
    }

    /// A zero-length payload completes without any further input.
    fn ready_without_input(&self) -> bool {
        self.state == DecoderState::AwaitingPayload
            && self.pending_header.map(|h| h.length) == Some(0)
    }

    /// Gather `needed` bytes for the current item. Returns the complete
    /// bytes (borrowed from the span when contiguous, from staging after
    /// reassembly), or `None` if the span is exhausted first.
    fn gather<'a>(
        &'a mut self,
        span: &'a [u8],
        cursor: &mut usize,
        needed: usize,
    ) -> Result<Option<&'a [u8]>, Http2Error> {
        if needed == 0 {
            return Ok(Some(&[]));
        }
        let avail = span.len() - *cursor;
        if self.staged == 0 {
            if avail >= needed {
                // Fast path: the whole item is contiguous in this span.
                let bytes = &span[*cursor..*cursor + needed];
                *cursor += needed;
                return Ok(Some(bytes));
            }
            if avail == 0 {
                return Ok(None);
            }
            self.staged_offset = self.staging.reserve(needed).ok_or_else(|| {
                Http2Error::MemoryExhausted("staging buffer cannot hold frame".into())
            })?;
        }
        let take = avail.min(needed - self.staged);
        self.staging
            .commit(self.staged_offset + self.staged, &span[*cursor..*cursor + take]);
        self.staged += take;
        *cursor += take;
        if self.staged == needed {
            Ok(Some(self.staging.view(self.staged_offset, needed)))
        } else {
            Ok(None)
        }
    }

    /// Drop any staged bytes for the item that just completed.
    fn finish_item(&mut self) {
        if self.staged > 0 {
            self.staging.release(self.staged);
            self.staged = 0;
            self.staged_offset = 0;
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}
