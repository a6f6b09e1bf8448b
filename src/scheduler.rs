//! Outbound frame multiplexing with flow-control backpressure.
//!
//! Every emission operation returns a boolean: `true` means the frame went to
//! the sink, `false` means it was deferred into the owning stream's pending
//! queue. A `false` return is backpressure, not failure; callers resume via
//! [`WriteScheduler::on_window`] / [`WriteScheduler::on_stream_window`] once
//! credit arrives. Per-stream order is preserved exactly as issued; the
//! inter-stream order is delegated to a pluggable [`StreamSelector`].
//!
//! DATA payloads that cannot be sent immediately are staged in the circular
//! buffer in contiguous chunks, spilling to the heap when the ring is full.
//! Header blocks are HPACK-encoded at emission time, never at issue time, so
//! the dynamic table mutates in wire order even when blocks from different
//! streams overtake each other in the queues.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, trace};

use crate::connection::Connection;
use crate::error::{ErrorCode, Http2Error};
use crate::frame::{Frame, Priority};
use crate::hpack::{HeaderField, HpackEncoder};
use crate::settings::Settings;
use crate::staging::StagingBuffer;

/// The outbound transport sink. Serialized frame bytes are handed over in
/// emission order; the sink applies its own transport-level backpressure.
pub trait FrameSink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), Http2Error>;

    /// Release the underlying write resource. Called exactly once, from
    /// teardown.
    fn close(&mut self);
}

/// A sink that accumulates written frames, for tests and loopback use.
#[derive(Debug, Default)]
pub struct VecSink {
    pub written: Vec<u8>,
    pub closed: bool,
}

impl FrameSink for VecSink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), Http2Error> {
        self.written.extend_from_slice(bytes);
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// A stream with queued work, as presented to the selection strategy.
#[derive(Debug, Clone, Copy)]
pub struct StreamCandidate {
    pub stream_id: u32,
    pub priority: Option<Priority>,
}

/// Inter-stream selection policy. Pure scheduling: implementations never see
/// windows or queues, only the set of streams that currently have emittable
/// work.
pub trait StreamSelector {
    /// Pick the next stream to serve. `candidates` is nonempty.
    fn select(&mut self, candidates: &[StreamCandidate]) -> u32;
}

/// Serves streams in cyclic stream-id order.
#[derive(Debug, Default)]
pub struct RoundRobin {
    last_served: Option<u32>,
}

impl StreamSelector for RoundRobin {
    fn select(&mut self, candidates: &[StreamCandidate]) -> u32 {
        let mut ids: Vec<u32> = candidates.iter().map(|c| c.stream_id).collect();
        ids.sort_unstable();
        let picked = match self.last_served {
            Some(last) => ids.iter().copied().find(|&id| id > last).unwrap_or(ids[0]),
            None => ids[0],
        };
        self.last_served = Some(picked);
        picked
    }
}

/// Smooth weighted round-robin over RFC 7540 Section 5.3 weights.
///
/// A stream's declared weight w (0..=255) grants it w+1 shares. Each
/// selection round adds every candidate's share to its running credit, serves
/// the stream with the most credit, and charges that stream the round's total
/// shares. Over time each stream is served in proportion to its weight, with
/// no starvation of low-weight streams.
#[derive(Debug, Default)]
pub struct PriorityWeighted {
    credit: HashMap<u32, i64>,
}

impl PriorityWeighted {
    fn share(candidate: &StreamCandidate) -> i64 {
        i64::from(candidate.priority.map(|p| p.weight).unwrap_or(15)) + 1
    }
}

impl StreamSelector for PriorityWeighted {
    fn select(&mut self, candidates: &[StreamCandidate]) -> u32 {
        let mut total = 0i64;
        for candidate in candidates {
            let share = Self::share(candidate);
            total += share;
            *self.credit.entry(candidate.stream_id).or_insert(0) += share;
        }
        let picked = candidates
            .iter()
            .map(|c| c.stream_id)
            .max_by_key(|id| (self.credit[id], std::cmp::Reverse(*id)))
            .expect("candidates is nonempty");
        *self.credit.get_mut(&picked).expect("picked is a candidate") -= total;
        self.credit.retain(|id, _| candidates.iter().any(|c| c.stream_id == *id));
        picked
    }
}

/// One contiguous staged run of a deferred DATA payload.
#[derive(Debug)]
struct Segment {
    offset: usize,
    len: usize,
    sent: usize,
}

/// A deferred outbound frame. The set is closed: every schedulable unit is
/// one of these variants, holding its own payload.
#[derive(Debug)]
enum PendingFrame {
    Headers {
        headers: Vec<HeaderField>,
        end_stream: bool,
    },
    PushPromise {
        promised_stream_id: u32,
        headers: Vec<HeaderField>,
    },
    Data {
        segments: VecDeque<Segment>,
        /// Overflow that did not fit the staging ring.
        tail: Vec<u8>,
        tail_sent: usize,
        end_stream: bool,
    },
}

impl PendingFrame {
    fn data_remaining(&self) -> usize {
        match self {
            PendingFrame::Data {
                segments,
                tail,
                tail_sent,
                ..
            } => {
                segments.iter().map(|s| s.len - s.sent).sum::<usize>() + tail.len() - tail_sent
            }
            _ => 0,
        }
    }
}

/// What a deferred frame was, for the teardown report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonedKind {
    Headers,
    PushPromise,
    Data,
}

/// A queue entry that could not be flushed before teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Abandoned {
    pub stream_id: u32,
    pub kind: AbandonedKind,
    /// Unsent payload bytes (0 for header blocks).
    pub bytes: usize,
}

/// Outcome of [`WriteScheduler::do_end`]. Nothing pending is dropped
/// silently: every entry is either flushed or listed here.
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub flushed_frames: usize,
    pub abandoned: Vec<Abandoned>,
}

/// Multiplexes outbound frames from all streams onto one connection.
pub struct WriteScheduler<S: FrameSink> {
    sink: S,
    selector: Box<dyn StreamSelector>,
    encoder: HpackEncoder,
    staging: StagingBuffer,
    queues: HashMap<u32, VecDeque<PendingFrame>>,
    /// Staged runs in reservation order; the ring frees strictly FIFO, so a
    /// run consumed out of order waits here until everything before it is
    /// consumed too.
    staged_fifo: VecDeque<(usize, usize)>,
    consumed_runs: HashSet<usize>,
    closed: bool,
}

const DEFAULT_STAGING_CAPACITY: usize = 64 * 1024;

impl<S: FrameSink> WriteScheduler<S> {
    pub fn new(sink: S) -> Self {
        Self::with_selector(sink, Box::<RoundRobin>::default())
    }

    pub fn with_selector(sink: S, selector: Box<dyn StreamSelector>) -> Self {
        Self {
            sink,
            selector,
            encoder: HpackEncoder::new(4096),
            staging: StagingBuffer::with_capacity(DEFAULT_STAGING_CAPACITY),
            queues: HashMap::new(),
            staged_fifo: VecDeque::new(),
            consumed_runs: HashSet::new(),
            closed: false,
        }
    }

    /// The outbound sink, for inspection.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Bytes still queued for `stream_id`.
    pub fn pending_bytes(&self, stream_id: u32) -> usize {
        self.queues
            .get(&stream_id)
            .map(|q| q.iter().map(PendingFrame::data_remaining).sum())
            .unwrap_or(0)
    }

    pub fn has_pending(&self, stream_id: u32) -> bool {
        self.queues.get(&stream_id).is_some_and(|q| !q.is_empty())
    }

    // Connection-level control frames are never queued: they are small,
    // exempt from flow control, and ordering-critical.

    pub fn window_update(&mut self, stream_id: u32, increment: u32) -> Result<bool, Http2Error> {
        self.ensure_open()?;
        self.write_frame(&Frame::WindowUpdate {
            stream_id,
            increment,
        })?;
        Ok(true)
    }

    pub fn ping_ack(&mut self, opaque_data: [u8; 8]) -> Result<bool, Http2Error> {
        self.ensure_open()?;
        self.write_frame(&Frame::Ping {
            ack: true,
            opaque_data,
        })?;
        Ok(true)
    }

    pub fn settings(
        &mut self,
        conn: &mut Connection,
        settings: Settings,
    ) -> Result<bool, Http2Error> {
        self.ensure_open()?;
        self.write_frame(&Frame::Settings {
            ack: false,
            settings: Some(settings.clone()),
        })?;
        conn.apply_local_settings(settings)?;
        Ok(true)
    }

    pub fn settings_ack(&mut self) -> Result<bool, Http2Error> {
        self.ensure_open()?;
        self.write_frame(&Frame::Settings {
            ack: true,
            settings: None,
        })?;
        Ok(true)
    }

    pub fn goaway(
        &mut self,
        conn: &mut Connection,
        error_code: ErrorCode,
        debug_data: Vec<u8>,
    ) -> Result<bool, Http2Error> {
        self.ensure_open()?;
        let last_stream_id = conn.last_remote_stream_id();
        debug!(last_stream_id, ?error_code, "sending GOAWAY");
        self.write_frame(&Frame::GoAway {
            last_stream_id,
            error_code,
            debug_data,
        })?;
        conn.sent_goaway(last_stream_id);
        Ok(true)
    }

    /// Reset a stream: emits RST_STREAM immediately and discards every queued
    /// frame for that stream, returning its staging space. Other streams'
    /// queues and the connection window are untouched.
    pub fn rst(
        &mut self,
        conn: &mut Connection,
        stream_id: u32,
        error_code: ErrorCode,
    ) -> Result<bool, Http2Error> {
        self.ensure_open()?;
        self.cancel_queue(stream_id);
        self.write_frame(&Frame::RstStream {
            stream_id,
            error_code,
        })?;
        conn.sent_rst(stream_id);
        Ok(true)
    }

    /// Send a header block. Deferred (returns `false`) only when earlier
    /// frames for the same stream are still queued, to preserve issue order.
    pub fn headers(
        &mut self,
        conn: &mut Connection,
        stream_id: u32,
        headers: Vec<HeaderField>,
        end_stream: bool,
    ) -> Result<bool, Http2Error> {
        self.ensure_open()?;
        if self.has_pending(stream_id) {
            self.queues
                .entry(stream_id)
                .or_default()
                .push_back(PendingFrame::Headers {
                    headers,
                    end_stream,
                });
            return Ok(false);
        }
        self.emit_headers(conn, stream_id, &headers, end_stream)?;
        Ok(true)
    }

    pub fn push_promise(
        &mut self,
        conn: &mut Connection,
        stream_id: u32,
        promised_stream_id: u32,
        headers: Vec<HeaderField>,
    ) -> Result<bool, Http2Error> {
        self.ensure_open()?;
        if self.has_pending(stream_id) {
            self.queues
                .entry(stream_id)
                .or_default()
                .push_back(PendingFrame::PushPromise {
                    promised_stream_id,
                    headers,
                });
            return Ok(false);
        }
        self.emit_push_promise(conn, stream_id, promised_stream_id, &headers)?;
        Ok(true)
    }

    /// Send DATA payload bytes. Emits as much as current credit and the
    /// max-frame-size allow, stages the remainder, and returns `true` only
    /// when the whole payload went out.
    pub fn data(
        &mut self,
        conn: &mut Connection,
        stream_id: u32,
        payload: &[u8],
        end_stream: bool,
    ) -> Result<bool, Http2Error> {
        self.ensure_open()?;
        let mut sent = 0usize;
        if !self.has_pending(stream_id) {
            sent = self.emit_data_bytes(conn, stream_id, payload, end_stream)?;
            if sent == payload.len() {
                if end_stream {
                    conn.sent_data_end(stream_id);
                }
                return Ok(true);
            }
        }
        let entry = self.stage_data(&payload[sent..], end_stream);
        trace!(
            stream_id,
            deferred = payload.len() - sent,
            "DATA deferred awaiting window"
        );
        self.queues.entry(stream_id).or_default().push_back(entry);
        Ok(false)
    }

    /// Close the stream's send side with an empty END_STREAM DATA frame.
    pub fn data_end(&mut self, conn: &mut Connection, stream_id: u32) -> Result<bool, Http2Error> {
        self.data(conn, stream_id, &[], true)
    }

    /// Window-availability callback for the connection window: drain every
    /// stream's queue as far as credit allows. Returns the number of frames
    /// flushed.
    pub fn on_window(&mut self, conn: &mut Connection) -> Result<usize, Http2Error> {
        self.ensure_open()?;
        self.drain(conn, None)
    }

    /// Window-availability callback for one stream.
    pub fn on_stream_window(
        &mut self,
        conn: &mut Connection,
        stream_id: u32,
    ) -> Result<usize, Http2Error> {
        self.ensure_open()?;
        self.drain(conn, Some(stream_id))
    }

    /// One-shot teardown: flush everything credit allows, report everything
    /// it does not, and release the sink. A second call is an error.
    pub fn do_end(&mut self, conn: &mut Connection) -> Result<TeardownReport, Http2Error> {
        if self.closed {
            return Err(Http2Error::SchedulerClosed);
        }
        let mut report = TeardownReport {
            flushed_frames: self.drain(conn, None)?,
            abandoned: Vec::new(),
        };
        let mut stream_ids: Vec<u32> = self.queues.keys().copied().collect();
        stream_ids.sort_unstable();
        for stream_id in stream_ids {
            let queue = self.queues.remove(&stream_id).unwrap_or_default();
            for entry in queue {
                let kind = match &entry {
                    PendingFrame::Headers { .. } => AbandonedKind::Headers,
                    PendingFrame::PushPromise { .. } => AbandonedKind::PushPromise,
                    PendingFrame::Data { .. } => AbandonedKind::Data,
                };
                report.abandoned.push(Abandoned {
                    stream_id,
                    kind,
                    bytes: entry.data_remaining(),
                });
                self.discard_entry(entry);
            }
        }
        debug!(
            flushed = report.flushed_frames,
            abandoned = report.abandoned.len(),
            "scheduler teardown"
        );
        self.closed = true;
        self.sink.close();
        Ok(report)
    }

    fn ensure_open(&self) -> Result<(), Http2Error> {
        if self.closed {
            return Err(Http2Error::SchedulerClosed);
        }
        Ok(())
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<(), Http2Error> {
        self.sink.write(&frame.encode_to_vec())
    }

    fn emit_headers(
        &mut self,
        conn: &mut Connection,
        stream_id: u32,
        headers: &[HeaderField],
        end_stream: bool,
    ) -> Result<(), Http2Error> {
        let fragment = self.encoder.encode_to_vec(headers);
        self.write_frame(&Frame::Headers {
            stream_id,
            fragment,
            end_stream,
            end_headers: true,
            priority: None,
        })?;
        conn.sent_headers(stream_id, end_stream);
        Ok(())
    }

    fn emit_push_promise(
        &mut self,
        conn: &mut Connection,
        stream_id: u32,
        promised_stream_id: u32,
        headers: &[HeaderField],
    ) -> Result<(), Http2Error> {
        let fragment = self.encoder.encode_to_vec(headers);
        self.write_frame(&Frame::PushPromise {
            stream_id,
            promised_stream_id,
            fragment,
            end_headers: true,
        })?;
        conn.sent_push_promise(promised_stream_id);
        Ok(())
    }

    /// Emit as many bytes of `payload` as credit allows, in frames bounded
    /// by the peer's max frame size. Returns the bytes emitted. The
    /// END_STREAM flag goes on the final frame only if the payload finishes.
    fn emit_data_bytes(
        &mut self,
        conn: &mut Connection,
        stream_id: u32,
        payload: &[u8],
        end_stream: bool,
    ) -> Result<usize, Http2Error> {
        let max_frame = conn.remote_settings().max_frame_size as usize;
        let mut sent = 0usize;
        loop {
            let remaining = payload.len() - sent;
            let capacity = conn.send_capacity(stream_id).max(0) as usize;
            let budget = remaining.min(capacity).min(max_frame);
            if budget == 0 {
                if remaining == 0 && end_stream && sent == 0 {
                    // Bare end-of-stream marker; no credit needed.
                    self.write_frame(&Frame::Data {
                        stream_id,
                        payload: Vec::new(),
                        end_stream: true,
                    })?;
                }
                return Ok(sent);
            }
            let last = sent + budget == payload.len();
            self.write_frame(&Frame::Data {
                stream_id,
                payload: payload[sent..sent + budget].to_vec(),
                end_stream: end_stream && last,
            })?;
            conn.consume_send(stream_id, budget as u32)?;
            sent += budget;
            if last {
                return Ok(sent);
            }
        }
    }

    /// Stage deferred payload bytes: contiguous ring chunks first, heap
    /// spill for whatever the ring cannot take.
    fn stage_data(&mut self, payload: &[u8], end_stream: bool) -> PendingFrame {
        let mut segments = VecDeque::new();
        let mut pos = 0usize;
        while pos < payload.len() {
            let run = self.staging.max_reservation().min(payload.len() - pos);
            if run == 0 {
                break;
            }
            let Some(offset) = self.staging.reserve(run) else {
                break;
            };
            self.staging.commit(offset, &payload[pos..pos + run]);
            self.staged_fifo.push_back((offset, run));
            segments.push_back(Segment {
                offset,
                len: run,
                sent: 0,
            });
            pos += run;
        }
        PendingFrame::Data {
            segments,
            tail: payload[pos..].to_vec(),
            tail_sent: 0,
            end_stream,
        }
    }

    /// Serve queued streams until credit runs out or the queues empty.
    fn drain(&mut self, conn: &mut Connection, only: Option<u32>) -> Result<usize, Http2Error> {
        let mut flushed = 0usize;
        loop {
            let candidates = self.candidates(conn, only);
            if candidates.is_empty() {
                return Ok(flushed);
            }
            let stream_id = if candidates.len() == 1 {
                candidates[0].stream_id
            } else {
                self.selector.select(&candidates)
            };
            flushed += self.serve_stream(conn, stream_id)?;
        }
    }

    /// Streams whose front entry can make progress right now.
    fn candidates(&self, conn: &Connection, only: Option<u32>) -> Vec<StreamCandidate> {
        self.queues
            .iter()
            .filter(|(id, _)| only.map_or(true, |o| o == **id))
            .filter(|(id, queue)| match queue.front() {
                Some(front @ PendingFrame::Data { .. }) => {
                    front.data_remaining() == 0 || conn.send_capacity(**id) > 0
                }
                Some(_) => true,
                None => false,
            })
            .map(|(id, _)| StreamCandidate {
                stream_id: *id,
                priority: conn.stream(*id).and_then(|s| s.priority),
            })
            .collect()
    }

    /// Flush the stream's queue front-to-back until an entry blocks on
    /// credit. Returns frames emitted.
    fn serve_stream(&mut self, conn: &mut Connection, stream_id: u32) -> Result<usize, Http2Error> {
        let mut flushed = 0usize;
        loop {
            let Some(queue) = self.queues.get_mut(&stream_id) else {
                return Ok(flushed);
            };
            let Some(entry) = queue.pop_front() else {
                self.queues.remove(&stream_id);
                return Ok(flushed);
            };
            match entry {
                PendingFrame::Headers {
                    headers,
                    end_stream,
                } => {
                    self.emit_headers(conn, stream_id, &headers, end_stream)?;
                    flushed += 1;
                }
                PendingFrame::PushPromise {
                    promised_stream_id,
                    headers,
                } => {
                    self.emit_push_promise(conn, stream_id, promised_stream_id, &headers)?;
                    flushed += 1;
                }
                entry @ PendingFrame::Data { .. } => {
                    let (done, frames) = self.flush_data_entry(conn, stream_id, entry)?;
                    flushed += frames;
                    if !done {
                        return Ok(flushed);
                    }
                }
            }
        }
    }

    /// Emit staged DATA until the entry empties or credit runs out. An
    /// unfinished entry goes back to the queue front with its staging space
    /// intact.
    fn flush_data_entry(
        &mut self,
        conn: &mut Connection,
        stream_id: u32,
        entry: PendingFrame,
    ) -> Result<(bool, usize), Http2Error> {
        let PendingFrame::Data {
            mut segments,
            tail,
            mut tail_sent,
            end_stream,
        } = entry
        else {
            unreachable!("flush_data_entry only receives DATA entries");
        };
        let max_frame = conn.remote_settings().max_frame_size as usize;
        let mut frames = 0usize;

        loop {
            let remaining =
                segments.iter().map(|s| s.len - s.sent).sum::<usize>() + tail.len() - tail_sent;
            if remaining == 0 {
                if end_stream {
                    self.write_frame(&Frame::Data {
                        stream_id,
                        payload: Vec::new(),
                        end_stream: true,
                    })?;
                    frames += 1;
                    conn.sent_data_end(stream_id);
                }
                self.release_segments(&mut segments);
                return Ok((true, frames));
            }
            let capacity = conn.send_capacity(stream_id).max(0) as usize;
            let budget = remaining.min(capacity).min(max_frame);
            if budget == 0 {
                // Blocked; requeue at the front to keep issue order.
                self.queues
                    .entry(stream_id)
                    .or_default()
                    .push_front(PendingFrame::Data {
                        segments,
                        tail,
                        tail_sent,
                        end_stream,
                    });
                return Ok((false, frames));
            }
            let last = budget == remaining;
            let chunk = self.take_chunk(&mut segments, &tail, &mut tail_sent, budget);
            self.write_frame(&Frame::Data {
                stream_id,
                payload: chunk,
                end_stream: end_stream && last,
            })?;
            conn.consume_send(stream_id, budget as u32)?;
            frames += 1;
            if last {
                // The flag already went out on this frame; emitting the
                // bare marker too would duplicate END_STREAM.
                if end_stream {
                    conn.sent_data_end(stream_id);
                }
                self.release_segments(&mut segments);
                return Ok((true, frames));
            }
        }
    }

    /// Copy the next `budget` unsent bytes out of an entry, consuming
    /// segments in order before the heap tail.
    fn take_chunk(
        &mut self,
        segments: &mut VecDeque<Segment>,
        tail: &[u8],
        tail_sent: &mut usize,
        budget: usize,
    ) -> Vec<u8> {
        let mut chunk = Vec::with_capacity(budget);
        while chunk.len() < budget {
            if let Some(front) = segments.front_mut() {
                let take = (budget - chunk.len()).min(front.len - front.sent);
                chunk.extend_from_slice(self.staging.view(front.offset + front.sent, take));
                front.sent += take;
                if front.sent == front.len {
                    self.consumed_runs.insert(front.offset);
                    segments.pop_front();
                    self.drain_consumed_runs();
                }
            } else {
                let take = (budget - chunk.len()).min(tail.len() - *tail_sent);
                chunk.extend_from_slice(&tail[*tail_sent..*tail_sent + take]);
                *tail_sent += take;
            }
        }
        chunk
    }

    /// Mark an entry's remaining staged runs consumed, whether or not their
    /// bytes went out, and free whatever prefix of the ring is reclaimable.
    fn release_segments(&mut self, segments: &mut VecDeque<Segment>) {
        for segment in segments.drain(..) {
            self.consumed_runs.insert(segment.offset);
        }
        self.drain_consumed_runs();
    }

    /// The ring frees FIFO: release runs from the front of the reservation
    /// order for as long as they have been consumed.
    fn drain_consumed_runs(&mut self) {
        while let Some((offset, len)) = self.staged_fifo.front().copied() {
            if !self.consumed_runs.remove(&offset) {
                break;
            }
            self.staging.release(len);
            self.staged_fifo.pop_front();
        }
    }

    fn cancel_queue(&mut self, stream_id: u32) {
        if let Some(queue) = self.queues.remove(&stream_id) {
            let dropped: usize = queue.iter().map(PendingFrame::data_remaining).sum();
            debug!(stream_id, dropped, "cancelling queued writes");
            for entry in queue {
                self.discard_entry(entry);
            }
        }
    }

    fn discard_entry(&mut self, entry: PendingFrame) {
        if let PendingFrame::Data { mut segments, .. } = entry {
            self.release_segments(&mut segments);
        }
    }
}
