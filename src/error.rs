//! Error types for the HTTP/2 protocol engine.
//!
//! Two severities exist (RFC 7540 Section 5.4): connection errors tear down
//! the whole connection (the caller emits GOAWAY and closes), stream errors
//! reset a single stream (the caller emits RST_STREAM) and the connection
//! continues. Backpressure is never an error; deferred work is signalled
//! through boolean returns on the write scheduler.

use thiserror::Error;

/// HTTP/2 error codes (RFC 7540 Section 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    pub fn from_u32(v: u32) -> Self {
        match v {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            0xd => Self::Http11Required,
            _ => Self::InternalError,
        }
    }
}

/// Errors produced by the framing, compression, and scheduling layers.
#[derive(Debug, Error)]
pub enum Http2Error {
    /// Connection-fatal protocol violation. Terminate with GOAWAY.
    #[error("connection error ({code:?}): {reason}")]
    Connection { code: ErrorCode, reason: String },

    /// Stream-level violation. Reset the stream, keep the connection.
    #[error("stream {stream_id} error ({code:?})")]
    Stream { stream_id: u32, code: ErrorCode },

    /// HPACK decode failure. Always connection-fatal: the dynamic table is
    /// desynchronized for every subsequent header block.
    #[error("HPACK compression error")]
    Compression,

    /// The external memory owner could not supply backing memory.
    #[error("memory owner exhausted: {0}")]
    MemoryExhausted(String),

    /// The write scheduler was torn down twice.
    #[error("write scheduler already closed")]
    SchedulerClosed,
}

impl Http2Error {
    pub fn connection(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::Connection {
            code,
            reason: reason.into(),
        }
    }

    pub fn stream(stream_id: u32, code: ErrorCode) -> Self {
        Self::Stream { stream_id, code }
    }

    /// The error code to carry in GOAWAY/RST_STREAM for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Connection { code, .. } => *code,
            Self::Stream { code, .. } => *code,
            Self::Compression => ErrorCode::CompressionError,
            Self::MemoryExhausted(_) => ErrorCode::InternalError,
            Self::SchedulerClosed => ErrorCode::InternalError,
        }
    }

    /// Whether this error requires tearing down the whole connection.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(self, Self::Stream { .. })
    }
}
