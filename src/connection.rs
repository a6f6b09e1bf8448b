//! Per-connection protocol state: the stream map, settings negotiation,
//! flow-control windows, and header-block assembly.
//!
//! [`Connection::receive`] drives the frame decoder over inbound region
//! batches and folds each decoded frame into connection state, emitting
//! [`ConnectionEvent`]s for the orchestrator. Stream-level violations are
//! contained: they surface as [`ConnectionEvent::StreamError`] so the caller
//! can emit RST_STREAM and move on. Connection-fatal violations return `Err`;
//! the caller must emit GOAWAY and tear the connection down.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::decoder::FrameDecoder;
use crate::error::{ErrorCode, Http2Error};
use crate::flow::FlowWindow;
use crate::frame::{Frame, Priority};
use crate::hpack::{HeaderField, HpackDecoder};
use crate::region::{MemoryOwner, Region};
use crate::settings::Settings;

/// Which side of the connection this engine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Expects the client preface; peer-initiated streams are odd.
    Server,
    /// Sends the preface itself; peer-initiated streams are even.
    Client,
}

/// Stream states per RFC 7540 Section 5.1. Transitions are monotonic: a
/// stream never moves to a state with a lower rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    fn rank(self) -> u8 {
        match self {
            StreamState::Idle => 0,
            StreamState::ReservedLocal | StreamState::ReservedRemote => 1,
            StreamState::Open => 2,
            StreamState::HalfClosedLocal | StreamState::HalfClosedRemote => 3,
            StreamState::Closed => 4,
        }
    }
}

/// One logical exchange within the connection.
#[derive(Debug)]
pub struct Stream {
    pub id: u32,
    pub state: StreamState,
    /// Credit the peer has for sending to us.
    pub recv_window: FlowWindow,
    /// Credit we have for sending to the peer.
    pub send_window: FlowWindow,
    pub priority: Option<Priority>,
}

impl Stream {
    fn new(id: u32, state: StreamState, recv_initial: i64, send_initial: i64) -> Self {
        Self {
            id,
            state,
            recv_window: FlowWindow::new(recv_initial),
            send_window: FlowWindow::new(send_initial),
            priority: None,
        }
    }

    fn transition(&mut self, next: StreamState) {
        debug_assert!(
            next.rank() >= self.state.rank(),
            "stream {} would move backward: {:?} -> {:?}",
            self.id,
            self.state,
            next
        );
        trace!(stream_id = self.id, from = ?self.state, to = ?next, "stream transition");
        self.state = next;
    }
}

/// A protocol event surfaced to the connection orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A complete, decompressed header block arrived.
    Headers {
        stream_id: u32,
        headers: Vec<HeaderField>,
        end_stream: bool,
    },
    /// The peer promised a pushed stream.
    PushPromise {
        stream_id: u32,
        promised_stream_id: u32,
        headers: Vec<HeaderField>,
    },
    Data {
        stream_id: u32,
        payload: Vec<u8>,
        end_stream: bool,
    },
    /// The peer reset a stream.
    StreamReset {
        stream_id: u32,
        error_code: ErrorCode,
    },
    /// A contained per-stream violation; the caller should emit RST_STREAM
    /// with this code.
    StreamError {
        stream_id: u32,
        error_code: ErrorCode,
    },
    /// Non-ack SETTINGS arrived and were applied; the caller should emit a
    /// SETTINGS ack.
    Settings(Settings),
    SettingsAck,
    /// The caller should emit a PING ack echoing the payload.
    Ping { opaque_data: [u8; 8] },
    PingAck { opaque_data: [u8; 8] },
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: Vec<u8>,
    },
    /// Send credit increased; the caller should pump the write scheduler.
    /// `None` targets the connection window.
    WindowAvailable { stream_id: Option<u32> },
}

/// A header block being assembled across HEADERS/PUSH_PROMISE and
/// CONTINUATION frames. While one is pending, no other frame may arrive.
#[derive(Debug)]
struct HeaderAssembly {
    stream_id: u32,
    promised_stream_id: Option<u32>,
    fragment: Vec<u8>,
    end_stream: bool,
}

/// Protocol state for one HTTP/2 connection.
pub struct Connection {
    role: Role,
    decoder: FrameDecoder,
    streams: HashMap<u32, Stream>,
    local_settings: Settings,
    remote_settings: Settings,
    /// Connection-level credit the peer has for sending to us.
    recv_window: FlowWindow,
    /// Connection-level credit we have for sending to the peer.
    send_window: FlowWindow,
    hpack_decoder: HpackDecoder,
    /// Highest peer-initiated stream id seen, for GOAWAY and closed-stream
    /// detection.
    highest_remote_stream: u32,
    assembly: Option<HeaderAssembly>,
    /// last_stream_id from the GOAWAY the peer sent, if any.
    remote_goaway: Option<u32>,
    /// last_stream_id from the GOAWAY we sent, if any. Peer-initiated
    /// streams above it are refused.
    local_goaway: Option<u32>,
}

impl Connection {
    pub fn new(role: Role, local_settings: Settings) -> Self {
        let decoder = match role {
            Role::Server => FrameDecoder::new(local_settings.max_frame_size),
            Role::Client => FrameDecoder::without_preface(local_settings.max_frame_size),
        };
        Self {
            role,
            decoder,
            streams: HashMap::new(),
            hpack_decoder: HpackDecoder::new(local_settings.header_table_size as usize),
            local_settings,
            remote_settings: Settings::default(),
            recv_window: FlowWindow::default(),
            send_window: FlowWindow::default(),
            highest_remote_stream: 0,
            assembly: None,
            remote_goaway: None,
            local_goaway: None,
        }
    }

    pub fn local_settings(&self) -> &Settings {
        &self.local_settings
    }

    pub fn remote_settings(&self) -> &Settings {
        &self.remote_settings
    }

    pub fn stream(&self, id: u32) -> Option<&Stream> {
        self.streams.get(&id)
    }

    /// Highest peer-initiated stream id processed, for GOAWAY.
    pub fn last_remote_stream_id(&self) -> u32 {
        self.highest_remote_stream
    }

    pub fn is_closing(&self) -> bool {
        self.remote_goaway.is_some() || self.local_goaway.is_some()
    }

    /// Decode a batch of inbound regions and fold every completed frame into
    /// connection state.
    pub fn receive<M: MemoryOwner>(
        &mut self,
        regions: &[Region],
        mem: &mut M,
    ) -> Result<Vec<ConnectionEvent>, Http2Error> {
        let frames = self.decoder.decode(regions, mem)?;
        let mut events = Vec::new();
        for frame in frames {
            self.handle_frame(frame, &mut events)?;
        }
        Ok(events)
    }

    /// Fold one decoded frame into connection state.
    pub fn handle_frame(
        &mut self,
        frame: Frame,
        events: &mut Vec<ConnectionEvent>,
    ) -> Result<(), Http2Error> {
        // While a header block is in flight, only CONTINUATION for the same
        // stream is legal (RFC 7540 Section 6.2).
        if let Some(assembly) = &self.assembly {
            match &frame {
                Frame::Continuation { stream_id, .. } if *stream_id == assembly.stream_id => {}
                _ => {
                    return Err(Http2Error::connection(
                        ErrorCode::ProtocolError,
                        "expected CONTINUATION for in-flight header block",
                    ));
                }
            }
        }

        match frame {
            Frame::Data {
                stream_id,
                payload,
                end_stream,
            } => self.on_data(stream_id, payload, end_stream, events),
            Frame::Headers {
                stream_id,
                fragment,
                end_stream,
                end_headers,
                priority,
            } => self.on_headers(stream_id, fragment, end_stream, end_headers, priority, events),
            Frame::Continuation {
                fragment,
                end_headers,
                ..
            } => self.on_continuation(fragment, end_headers, events),
            Frame::Priority {
                stream_id,
                priority,
            } => {
                if let Some(stream) = self.streams.get_mut(&stream_id) {
                    stream.priority = Some(priority);
                }
                Ok(())
            }
            Frame::RstStream {
                stream_id,
                error_code,
            } => self.on_rst_stream(stream_id, error_code, events),
            Frame::Settings { ack, settings } => {
                if ack {
                    events.push(ConnectionEvent::SettingsAck);
                    Ok(())
                } else {
                    let settings = settings.expect("non-ack SETTINGS carries values");
                    self.apply_remote_settings(&settings)?;
                    events.push(ConnectionEvent::Settings(settings));
                    Ok(())
                }
            }
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
                fragment,
                end_headers,
            } => self.on_push_promise(stream_id, promised_stream_id, fragment, end_headers, events),
            Frame::Ping { ack, opaque_data } => {
                events.push(if ack {
                    ConnectionEvent::PingAck { opaque_data }
                } else {
                    ConnectionEvent::Ping { opaque_data }
                });
                Ok(())
            }
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                debug!(last_stream_id, ?error_code, "peer sent GOAWAY");
                self.remote_goaway = Some(last_stream_id);
                events.push(ConnectionEvent::GoAway {
                    last_stream_id,
                    error_code,
                    debug_data,
                });
                Ok(())
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => self.on_window_update(stream_id, increment, events),
            Frame::Unknown { frame_type, .. } => {
                // Unknown types are ignored (RFC 7540 Section 4.1).
                trace!(frame_type, "ignoring unknown frame type");
                Ok(())
            }
        }
    }

    fn on_data(
        &mut self,
        stream_id: u32,
        payload: Vec<u8>,
        end_stream: bool,
        events: &mut Vec<ConnectionEvent>,
    ) -> Result<(), Http2Error> {
        // The bytes arrived either way, so connection-level credit is spent
        // even when the stream turns out to be closed.
        self.recv_window.consume(payload.len() as u32)?;

        let Some(stream) = self.streams.get_mut(&stream_id) else {
            if self.is_remote_initiated(stream_id) && stream_id <= self.highest_remote_stream {
                // Trailing frame for a reclaimed stream.
                events.push(ConnectionEvent::StreamError {
                    stream_id,
                    error_code: ErrorCode::StreamClosed,
                });
                return Ok(());
            }
            return Err(Http2Error::connection(
                ErrorCode::ProtocolError,
                "DATA on idle stream",
            ));
        };

        match stream.state {
            StreamState::Open | StreamState::HalfClosedLocal => {}
            _ => {
                events.push(ConnectionEvent::StreamError {
                    stream_id,
                    error_code: ErrorCode::StreamClosed,
                });
                return Ok(());
            }
        }

        if stream.recv_window.consume(payload.len() as u32).is_err() {
            // Per-stream credit violation stays contained to the stream.
            events.push(ConnectionEvent::StreamError {
                stream_id,
                error_code: ErrorCode::FlowControlError,
            });
            return Ok(());
        }

        if end_stream {
            let next = match stream.state {
                StreamState::Open => StreamState::HalfClosedRemote,
                _ => StreamState::Closed,
            };
            stream.transition(next);
        }
        let closed = stream.state == StreamState::Closed;
        events.push(ConnectionEvent::Data {
            stream_id,
            payload,
            end_stream,
        });
        if closed {
            self.streams.remove(&stream_id);
        }
        Ok(())
    }

    fn on_headers(
        &mut self,
        stream_id: u32,
        fragment: Vec<u8>,
        end_stream: bool,
        end_headers: bool,
        priority: Option<Priority>,
        events: &mut Vec<ConnectionEvent>,
    ) -> Result<(), Http2Error> {
        if !self.streams.contains_key(&stream_id) {
            if !self.is_remote_initiated(stream_id) {
                return Err(Http2Error::connection(
                    ErrorCode::ProtocolError,
                    "HEADERS on a stream the peer cannot initiate",
                ));
            }
            if stream_id <= self.highest_remote_stream {
                // Stream id reuse after closure.
                events.push(ConnectionEvent::StreamError {
                    stream_id,
                    error_code: ErrorCode::StreamClosed,
                });
                return Ok(());
            }
            if let Some(last) = self.local_goaway {
                if stream_id > last {
                    events.push(ConnectionEvent::StreamError {
                        stream_id,
                        error_code: ErrorCode::RefusedStream,
                    });
                    return Ok(());
                }
            }
            if let Some(max) = self.local_settings.max_concurrent_streams {
                let active = self
                    .streams
                    .values()
                    .filter(|s| s.state != StreamState::Closed)
                    .count();
                if active as u32 >= max {
                    events.push(ConnectionEvent::StreamError {
                        stream_id,
                        error_code: ErrorCode::RefusedStream,
                    });
                    return Ok(());
                }
            }
            self.highest_remote_stream = stream_id;
            let mut stream = Stream::new(
                stream_id,
                StreamState::Open,
                i64::from(self.local_settings.initial_window_size),
                i64::from(self.remote_settings.initial_window_size),
            );
            stream.priority = priority;
            self.streams.insert(stream_id, stream);
        } else {
            let stream = self
                .streams
                .get_mut(&stream_id)
                .expect("existing stream checked above");
            if let Some(pri) = priority {
                stream.priority = Some(pri);
            }
            // HEADERS on a promised stream half-closes our side
            // (RFC 7540 Section 5.1, recv HEADERS on reserved(remote)).
            if stream.state == StreamState::ReservedRemote {
                stream.transition(StreamState::HalfClosedLocal);
            }
        }

        if end_stream {
            let stream = self.streams.get_mut(&stream_id).expect("stream just ensured");
            let next = match stream.state {
                StreamState::Open | StreamState::Idle => StreamState::HalfClosedRemote,
                _ => StreamState::Closed,
            };
            stream.transition(next);
        }

        self.assembly = Some(HeaderAssembly {
            stream_id,
            promised_stream_id: None,
            fragment,
            end_stream,
        });
        if end_headers {
            self.complete_header_block(events)?;
        }
        Ok(())
    }

    fn on_push_promise(
        &mut self,
        stream_id: u32,
        promised_stream_id: u32,
        fragment: Vec<u8>,
        end_headers: bool,
        events: &mut Vec<ConnectionEvent>,
    ) -> Result<(), Http2Error> {
        if self.role == Role::Server {
            return Err(Http2Error::connection(
                ErrorCode::ProtocolError,
                "client sent PUSH_PROMISE",
            ));
        }
        if !self.local_settings.enable_push {
            return Err(Http2Error::connection(
                ErrorCode::ProtocolError,
                "PUSH_PROMISE with push disabled",
            ));
        }
        if !self.streams.contains_key(&stream_id) {
            return Err(Http2Error::connection(
                ErrorCode::ProtocolError,
                "PUSH_PROMISE on unknown parent stream",
            ));
        }
        self.streams.insert(
            promised_stream_id,
            Stream::new(
                promised_stream_id,
                StreamState::ReservedRemote,
                i64::from(self.local_settings.initial_window_size),
                i64::from(self.remote_settings.initial_window_size),
            ),
        );
        self.assembly = Some(HeaderAssembly {
            stream_id,
            promised_stream_id: Some(promised_stream_id),
            fragment,
            end_stream: false,
        });
        if end_headers {
            self.complete_header_block(events)?;
        }
        Ok(())
    }

    fn on_continuation(
        &mut self,
        fragment: Vec<u8>,
        end_headers: bool,
        events: &mut Vec<ConnectionEvent>,
    ) -> Result<(), Http2Error> {
        let Some(assembly) = &mut self.assembly else {
            return Err(Http2Error::connection(
                ErrorCode::ProtocolError,
                "CONTINUATION without an in-flight header block",
            ));
        };
        assembly.fragment.extend_from_slice(&fragment);
        if end_headers {
            self.complete_header_block(events)?;
        }
        Ok(())
    }

    /// Decompress the assembled block. HPACK failure is connection-fatal:
    /// the dynamic table is desynchronized for every later block.
    fn complete_header_block(
        &mut self,
        events: &mut Vec<ConnectionEvent>,
    ) -> Result<(), Http2Error> {
        let assembly = self.assembly.take().expect("a header block is in flight");
        let headers = self.hpack_decoder.decode(&assembly.fragment)?;
        match assembly.promised_stream_id {
            Some(promised_stream_id) => events.push(ConnectionEvent::PushPromise {
                stream_id: assembly.stream_id,
                promised_stream_id,
                headers,
            }),
            None => {
                events.push(ConnectionEvent::Headers {
                    stream_id: assembly.stream_id,
                    headers,
                    end_stream: assembly.end_stream,
                });
                if self
                    .streams
                    .get(&assembly.stream_id)
                    .is_some_and(|s| s.state == StreamState::Closed)
                {
                    self.streams.remove(&assembly.stream_id);
                }
            }
        }
        Ok(())
    }

    fn on_rst_stream(
        &mut self,
        stream_id: u32,
        error_code: ErrorCode,
        events: &mut Vec<ConnectionEvent>,
    ) -> Result<(), Http2Error> {
        if self.streams.remove(&stream_id).is_none() {
            if self.is_remote_initiated(stream_id) && stream_id > self.highest_remote_stream {
                return Err(Http2Error::connection(
                    ErrorCode::ProtocolError,
                    "RST_STREAM on idle stream",
                ));
            }
            // Reset of an already reclaimed stream is harmless.
            return Ok(());
        }
        debug!(stream_id, ?error_code, "peer reset stream");
        events.push(ConnectionEvent::StreamReset {
            stream_id,
            error_code,
        });
        Ok(())
    }

    fn on_window_update(
        &mut self,
        stream_id: u32,
        increment: u32,
        events: &mut Vec<ConnectionEvent>,
    ) -> Result<(), Http2Error> {
        if stream_id == 0 {
            if increment == 0 {
                return Err(Http2Error::connection(
                    ErrorCode::ProtocolError,
                    "WINDOW_UPDATE with zero increment",
                ));
            }
            self.send_window.increase(increment)?;
            events.push(ConnectionEvent::WindowAvailable { stream_id: None });
            return Ok(());
        }
        if increment == 0 {
            events.push(ConnectionEvent::StreamError {
                stream_id,
                error_code: ErrorCode::ProtocolError,
            });
            return Ok(());
        }
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            if stream.send_window.increase(increment).is_err() {
                events.push(ConnectionEvent::StreamError {
                    stream_id,
                    error_code: ErrorCode::FlowControlError,
                });
                return Ok(());
            }
            events.push(ConnectionEvent::WindowAvailable {
                stream_id: Some(stream_id),
            });
        }
        // Updates for reclaimed streams are ignored.
        Ok(())
    }

    /// Apply peer SETTINGS. An initial-window-size change shifts every live
    /// stream's send window by the delta, which may drive windows negative.
    fn apply_remote_settings(&mut self, settings: &Settings) -> Result<(), Http2Error> {
        let delta = i64::from(settings.initial_window_size)
            - i64::from(self.remote_settings.initial_window_size);
        if delta != 0 {
            for stream in self.streams.values_mut() {
                stream.send_window.adjust(delta)?;
            }
        }
        self.remote_settings = settings.clone();
        Ok(())
    }

    /// Apply the SETTINGS values we advertise to the peer. The caller is
    /// responsible for actually emitting the SETTINGS frame.
    pub fn apply_local_settings(&mut self, settings: Settings) -> Result<(), Http2Error> {
        let delta = i64::from(settings.initial_window_size)
            - i64::from(self.local_settings.initial_window_size);
        if delta != 0 {
            for stream in self.streams.values_mut() {
                stream.recv_window.adjust(delta)?;
            }
        }
        self.decoder.set_max_frame_size(settings.max_frame_size);
        self.hpack_decoder
            .set_max_table_size(settings.header_table_size as usize);
        self.local_settings = settings;
        Ok(())
    }

    /// Replenish receive credit after the application consumed `len` DATA
    /// bytes. The caller should emit matching WINDOW_UPDATE frames.
    pub fn release_received(&mut self, stream_id: u32, len: u32) -> Result<(), Http2Error> {
        self.recv_window.increase(len)?;
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.recv_window.increase(len)?;
        }
        Ok(())
    }

    fn is_remote_initiated(&self, stream_id: u32) -> bool {
        match self.role {
            Role::Server => stream_id % 2 == 1,
            Role::Client => stream_id % 2 == 0,
        }
    }

    // Send-side accounting, driven by the write scheduler.

    /// Credit available for DATA on `stream_id`: the smaller of the
    /// connection window and the stream window. Negative when a SETTINGS
    /// decrease has overdrawn the stream.
    pub fn send_capacity(&self, stream_id: u32) -> i64 {
        let stream_window = self
            .streams
            .get(&stream_id)
            .map(|s| s.send_window.available())
            .unwrap_or(0);
        self.send_window.available().min(stream_window)
    }

    /// Spend send credit for `len` DATA payload bytes.
    pub fn consume_send(&mut self, stream_id: u32, len: u32) -> Result<(), Http2Error> {
        self.send_window.consume(len)?;
        let stream = self
            .streams
            .get_mut(&stream_id)
            .ok_or_else(|| Http2Error::stream(stream_id, ErrorCode::StreamClosed))?;
        stream.send_window.consume(len)
    }

    /// Record locally sent HEADERS, creating the stream on first use.
    pub fn sent_headers(&mut self, stream_id: u32, end_stream: bool) {
        let recv_initial = i64::from(self.local_settings.initial_window_size);
        let send_initial = i64::from(self.remote_settings.initial_window_size);
        let stream = self
            .streams
            .entry(stream_id)
            .or_insert_with(|| Stream::new(stream_id, StreamState::Idle, recv_initial, send_initial));
        let next = match (stream.state, end_stream) {
            (StreamState::Idle, false) => StreamState::Open,
            (StreamState::Idle, true) => StreamState::HalfClosedLocal,
            (StreamState::ReservedLocal, false) => StreamState::HalfClosedRemote,
            (StreamState::ReservedLocal, true) => StreamState::Closed,
            (StreamState::Open, true) => StreamState::HalfClosedLocal,
            (StreamState::HalfClosedRemote, true) => StreamState::Closed,
            (state, _) => state,
        };
        stream.transition(next);
        if stream.state == StreamState::Closed {
            self.streams.remove(&stream_id);
        }
    }

    /// Record a locally sent DATA frame's end-of-stream, closing the local
    /// side.
    pub fn sent_data_end(&mut self, stream_id: u32) {
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            let next = match stream.state {
                StreamState::Open => StreamState::HalfClosedLocal,
                _ => StreamState::Closed,
            };
            stream.transition(next);
            if stream.state == StreamState::Closed {
                self.streams.remove(&stream_id);
            }
        }
    }

    /// Record a locally sent RST_STREAM: the stream closes immediately.
    pub fn sent_rst(&mut self, stream_id: u32) {
        self.streams.remove(&stream_id);
    }

    /// Record a locally sent PUSH_PROMISE, reserving the promised stream.
    pub fn sent_push_promise(&mut self, promised_stream_id: u32) {
        let recv_initial = i64::from(self.local_settings.initial_window_size);
        let send_initial = i64::from(self.remote_settings.initial_window_size);
        self.streams.insert(
            promised_stream_id,
            Stream::new(
                promised_stream_id,
                StreamState::ReservedLocal,
                recv_initial,
                send_initial,
            ),
        );
    }

    /// Record a locally sent GOAWAY; later peer-initiated streams above
    /// `last_stream_id` are refused.
    pub fn sent_goaway(&mut self, last_stream_id: u32) {
        self.local_goaway = Some(last_stream_id);
    }
}
