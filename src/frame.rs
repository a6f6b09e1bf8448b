//! HTTP/2 frame views (RFC 7540 Sections 4 and 6).
//!
//! Every frame starts with a fixed 9-byte header:
//!
//! ```text
//! +-----------------------------------------------+
//! |                 Length (24)                   |
//! +---------------+---------------+---------------+
//! |   Type (8)    |   Flags (8)   |
//! +-+-------------+---------------+---------------+
//! |R|                 Stream Identifier (31)      |
//! +-+---------------------------------------------+
//! |                   Frame Payload ...           |
//! +-----------------------------------------------+
//! ```
//!
//! Instead of one polymorphic view type per frame kind, a completed frame is
//! decoded into the tagged [`Frame`] variant. Payload accessors are bounds
//! checked against the declared length, so a malformed frame surfaces as a
//! connection error at decode time rather than a bad read later.

use crate::error::{ErrorCode, Http2Error};
use crate::settings::Settings;

/// HTTP/2 frame types (RFC 7540 Section 6).
#[allow(dead_code)]
pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

/// HTTP/2 frame flags. Bit positions are type-specific: 0x1 is END_STREAM on
/// DATA/HEADERS but ACK on SETTINGS/PING.
#[allow(dead_code)]
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// Frame header size in bytes.
pub const FRAME_HEADER_LEN: usize = 9;

/// The HTTP/2 connection preface (24 bytes), sent by clients before any frame.
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Check if data starts with the HTTP/2 connection preface (h2c detection).
pub fn is_h2c_preface(data: &[u8]) -> bool {
    data.len() >= CONNECTION_PREFACE.len() && &data[..CONNECTION_PREFACE.len()] == CONNECTION_PREFACE
}

/// A parsed 9-byte frame header.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub length: u32, // 24 bits
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32, // 31 bits, reserved bit cleared
}

impl FrameHeader {
    /// Parse a frame header from the start of `data`.
    /// Returns `None` if fewer than 9 bytes are available.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_HEADER_LEN {
            return None;
        }
        let length = (u32::from(data[0]) << 16) | (u32::from(data[1]) << 8) | u32::from(data[2]);
        let stream_id = (u32::from(data[5]) << 24)
            | (u32::from(data[6]) << 16)
            | (u32::from(data[7]) << 8)
            | u32::from(data[8]);
        Some(Self {
            length,
            frame_type: data[3],
            flags: data[4],
            stream_id: stream_id & 0x7fff_ffff,
        })
    }

    /// Encode this header into `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        encode_frame_header(buf, self.length, self.frame_type, self.flags, self.stream_id);
    }

    /// Total frame size including the header.
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_LEN + self.length as usize
    }

    pub fn is_end_stream(&self) -> bool {
        self.flags & flags::END_STREAM != 0
    }

    pub fn is_end_headers(&self) -> bool {
        self.flags & flags::END_HEADERS != 0
    }

    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }
}

/// Encode a 9-byte frame header.
pub fn encode_frame_header(
    buf: &mut Vec<u8>,
    payload_len: u32,
    frame_type: u8,
    flags: u8,
    stream_id: u32,
) {
    buf.push((payload_len >> 16) as u8);
    buf.push((payload_len >> 8) as u8);
    buf.push(payload_len as u8);
    buf.push(frame_type);
    buf.push(flags);
    let sid = stream_id & 0x7fff_ffff;
    buf.extend_from_slice(&sid.to_be_bytes());
}

/// Stream priority information (RFC 7540 Section 5.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub exclusive: bool,
    pub dependency: u32,
    pub weight: u8,
}

/// A decoded HTTP/2 frame.
#[derive(Debug, Clone)]
pub enum Frame {
    Data {
        stream_id: u32,
        payload: Vec<u8>,
        end_stream: bool,
    },
    Headers {
        stream_id: u32,
        fragment: Vec<u8>,
        end_stream: bool,
        end_headers: bool,
        priority: Option<Priority>,
    },
    Priority {
        stream_id: u32,
        priority: Priority,
    },
    RstStream {
        stream_id: u32,
        error_code: ErrorCode,
    },
    Settings {
        ack: bool,
        settings: Option<Settings>,
    },
    PushPromise {
        stream_id: u32,
        promised_stream_id: u32,
        fragment: Vec<u8>,
        end_headers: bool,
    },
    Ping {
        ack: bool,
        opaque_data: [u8; 8],
    },
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: Vec<u8>,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Continuation {
        stream_id: u32,
        fragment: Vec<u8>,
        end_headers: bool,
    },
    /// Unknown frame type, ignored per RFC 7540 Section 4.1.
    Unknown {
        frame_type: u8,
        stream_id: u32,
    },
}

impl Frame {
    /// Decode a complete frame from its header and payload bytes.
    ///
    /// Validates per-type length rules and the zero/nonzero stream-id rules.
    /// Violations are connection errors (RFC 7540 Sections 4.2 and 6).
    pub fn decode(header: &FrameHeader, payload: &[u8]) -> Result<Self, Http2Error> {
        debug_assert_eq!(payload.len(), header.length as usize);
        match header.frame_type {
            frame_type::DATA => {
                require_stream(header, "DATA")?;
                let data = strip_padding(header, payload, "DATA")?;
                Ok(Frame::Data {
                    stream_id: header.stream_id,
                    payload: data.to_vec(),
                    end_stream: header.is_end_stream(),
                })
            }
            frame_type::HEADERS => {
                require_stream(header, "HEADERS")?;
                let block = strip_padding(header, payload, "HEADERS")?;
                let (priority, fragment) = if header.flags & flags::PRIORITY != 0 {
                    if block.len() < 5 {
                        return Err(frame_size("HEADERS priority section truncated"));
                    }
                    (Some(parse_priority(block)), &block[5..])
                } else {
                    (None, block)
                };
                Ok(Frame::Headers {
                    stream_id: header.stream_id,
                    fragment: fragment.to_vec(),
                    end_stream: header.is_end_stream(),
                    end_headers: header.is_end_headers(),
                    priority,
                })
            }
            frame_type::PRIORITY => {
                require_stream(header, "PRIORITY")?;
                if payload.len() != 5 {
                    return Err(frame_size("PRIORITY payload must be 5 bytes"));
                }
                Ok(Frame::Priority {
                    stream_id: header.stream_id,
                    priority: parse_priority(payload),
                })
            }
            frame_type::RST_STREAM => {
                require_stream(header, "RST_STREAM")?;
                if payload.len() != 4 {
                    return Err(frame_size("RST_STREAM payload must be 4 bytes"));
                }
                Ok(Frame::RstStream {
                    stream_id: header.stream_id,
                    error_code: ErrorCode::from_u32(be32(payload)),
                })
            }
            frame_type::SETTINGS => {
                require_connection(header, "SETTINGS")?;
                if header.is_ack() {
                    if !payload.is_empty() {
                        return Err(frame_size("SETTINGS ack must be empty"));
                    }
                    return Ok(Frame::Settings {
                        ack: true,
                        settings: None,
                    });
                }
                if payload.len() % 6 != 0 {
                    return Err(frame_size("SETTINGS length must be a multiple of 6"));
                }
                Ok(Frame::Settings {
                    ack: false,
                    settings: Some(Settings::decode(payload)?),
                })
            }
            frame_type::PUSH_PROMISE => {
                require_stream(header, "PUSH_PROMISE")?;
                let body = strip_padding(header, payload, "PUSH_PROMISE")?;
                if body.len() < 4 {
                    return Err(frame_size("PUSH_PROMISE missing promised stream id"));
                }
                Ok(Frame::PushPromise {
                    stream_id: header.stream_id,
                    promised_stream_id: be32(body) & 0x7fff_ffff,
                    fragment: body[4..].to_vec(),
                    end_headers: header.is_end_headers(),
                })
            }
            frame_type::PING => {
                require_connection(header, "PING")?;
                if payload.len() != 8 {
                    return Err(frame_size("PING payload must be 8 bytes"));
                }
                let mut opaque_data = [0u8; 8];
                opaque_data.copy_from_slice(payload);
                Ok(Frame::Ping {
                    ack: header.is_ack(),
                    opaque_data,
                })
            }
            frame_type::GOAWAY => {
                require_connection(header, "GOAWAY")?;
                if payload.len() < 8 {
                    return Err(frame_size("GOAWAY payload must be at least 8 bytes"));
                }
                Ok(Frame::GoAway {
                    last_stream_id: be32(payload) & 0x7fff_ffff,
                    error_code: ErrorCode::from_u32(be32(&payload[4..])),
                    debug_data: payload[8..].to_vec(),
                })
            }
            frame_type::WINDOW_UPDATE => {
                // WINDOW_UPDATE is legal on stream 0 (connection window).
                if payload.len() != 4 {
                    return Err(frame_size("WINDOW_UPDATE payload must be 4 bytes"));
                }
                Ok(Frame::WindowUpdate {
                    stream_id: header.stream_id,
                    increment: be32(payload) & 0x7fff_ffff,
                })
            }
            frame_type::CONTINUATION => {
                require_stream(header, "CONTINUATION")?;
                Ok(Frame::Continuation {
                    stream_id: header.stream_id,
                    fragment: payload.to_vec(),
                    end_headers: header.is_end_headers(),
                })
            }
            other => Ok(Frame::Unknown {
                frame_type: other,
                stream_id: header.stream_id,
            }),
        }
    }

    /// Encode this frame (header + payload) into `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Frame::Data {
                stream_id,
                payload,
                end_stream,
            } => {
                let f = if *end_stream { flags::END_STREAM } else { 0 };
                encode_frame_header(buf, payload.len() as u32, frame_type::DATA, f, *stream_id);
                buf.extend_from_slice(payload);
            }
            Frame::Headers {
                stream_id,
                fragment,
                end_stream,
                end_headers,
                priority,
            } => {
                let mut f = 0u8;
                if *end_stream {
                    f |= flags::END_STREAM;
                }
                if *end_headers {
                    f |= flags::END_HEADERS;
                }
                let mut len = fragment.len() as u32;
                if priority.is_some() {
                    f |= flags::PRIORITY;
                    len += 5;
                }
                encode_frame_header(buf, len, frame_type::HEADERS, f, *stream_id);
                if let Some(pri) = priority {
                    encode_priority(buf, pri);
                }
                buf.extend_from_slice(fragment);
            }
            Frame::Priority {
                stream_id,
                priority,
            } => {
                encode_frame_header(buf, 5, frame_type::PRIORITY, 0, *stream_id);
                encode_priority(buf, priority);
            }
            Frame::RstStream {
                stream_id,
                error_code,
            } => {
                encode_frame_header(buf, 4, frame_type::RST_STREAM, 0, *stream_id);
                buf.extend_from_slice(&(*error_code as u32).to_be_bytes());
            }
            Frame::Settings { ack, settings } => {
                if *ack {
                    encode_frame_header(buf, 0, frame_type::SETTINGS, flags::ACK, 0);
                } else {
                    let payload = settings
                        .as_ref()
                        .map(Settings::encode_to_vec)
                        .unwrap_or_default();
                    encode_frame_header(buf, payload.len() as u32, frame_type::SETTINGS, 0, 0);
                    buf.extend_from_slice(&payload);
                }
            }
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
                fragment,
                end_headers,
            } => {
                let f = if *end_headers { flags::END_HEADERS } else { 0 };
                let len = 4 + fragment.len() as u32;
                encode_frame_header(buf, len, frame_type::PUSH_PROMISE, f, *stream_id);
                buf.extend_from_slice(&(*promised_stream_id & 0x7fff_ffff).to_be_bytes());
                buf.extend_from_slice(fragment);
            }
            Frame::Ping { ack, opaque_data } => {
                let f = if *ack { flags::ACK } else { 0 };
                encode_frame_header(buf, 8, frame_type::PING, f, 0);
                buf.extend_from_slice(opaque_data);
            }
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                let len = 8 + debug_data.len() as u32;
                encode_frame_header(buf, len, frame_type::GOAWAY, 0, 0);
                buf.extend_from_slice(&(*last_stream_id & 0x7fff_ffff).to_be_bytes());
                buf.extend_from_slice(&(*error_code as u32).to_be_bytes());
                buf.extend_from_slice(debug_data);
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                encode_frame_header(buf, 4, frame_type::WINDOW_UPDATE, 0, *stream_id);
                buf.extend_from_slice(&(*increment & 0x7fff_ffff).to_be_bytes());
            }
            Frame::Continuation {
                stream_id,
                fragment,
                end_headers,
            } => {
                let f = if *end_headers { flags::END_HEADERS } else { 0 };
                encode_frame_header(
                    buf,
                    fragment.len() as u32,
                    frame_type::CONTINUATION,
                    f,
                    *stream_id,
                );
                buf.extend_from_slice(fragment);
            }
            Frame::Unknown { .. } => {}
        }
    }

    /// Encode this frame into a fresh buffer.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }
}

fn be32(data: &[u8]) -> u32 {
    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

fn parse_priority(data: &[u8]) -> Priority {
    let dep = be32(data);
    Priority {
        exclusive: dep & 0x8000_0000 != 0,
        dependency: dep & 0x7fff_ffff,
        weight: data[4],
    }
}

fn encode_priority(buf: &mut Vec<u8>, pri: &Priority) {
    let dep = if pri.exclusive {
        pri.dependency | 0x8000_0000
    } else {
        pri.dependency & 0x7fff_ffff
    };
    buf.extend_from_slice(&dep.to_be_bytes());
    buf.push(pri.weight);
}

/// Strip the pad-length octet and trailing padding when PADDED is set.
fn strip_padding<'a>(
    header: &FrameHeader,
    payload: &'a [u8],
    kind: &str,
) -> Result<&'a [u8], Http2Error> {
    if header.flags & flags::PADDED == 0 {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(frame_size(format!("PADDED {kind} frame with no payload")));
    }
    let pad_length = payload[0] as usize;
    if pad_length >= payload.len() {
        return Err(Http2Error::connection(
            ErrorCode::ProtocolError,
            format!("padding length exceeds {kind} payload"),
        ));
    }
    Ok(&payload[1..payload.len() - pad_length])
}

fn require_stream(header: &FrameHeader, kind: &str) -> Result<(), Http2Error> {
    if header.stream_id == 0 {
        return Err(Http2Error::connection(
            ErrorCode::ProtocolError,
            format!("{kind} frame with zero stream id"),
        ));
    }
    Ok(())
}

fn require_connection(header: &FrameHeader, kind: &str) -> Result<(), Http2Error> {
    if header.stream_id != 0 {
        return Err(Http2Error::connection(
            ErrorCode::ProtocolError,
            format!("{kind} frame with nonzero stream id"),
        ));
    }
    Ok(())
}

fn frame_size(reason: impl Into<String>) -> Http2Error {
    Http2Error::connection(ErrorCode::FrameSizeError, reason)
}
