//! h2-mux: A sans-I/O HTTP/2 protocol engine
//!
//! This crate translates between raw transport bytes and HTTP/2 semantics
//! (RFC 7540/7541) without owning any I/O: the host event loop supplies
//! inbound bytes as memory-region descriptors and receives serialized frames
//! through an outbound sink it controls.
//!
//! # Features
//!
//! - **Sans-I/O Design**: No async runtime dependencies (no tokio)
//! - **Region-based decoding**: Frames are reassembled across arbitrary
//!   region boundaries; results depend only on the concatenated byte stream
//! - **RFC 7540 Compliant**: DATA, HEADERS, CONTINUATION, PRIORITY,
//!   RST_STREAM, SETTINGS, PUSH_PROMISE, PING, GOAWAY, WINDOW_UPDATE
//! - **HPACK**: Full static/dynamic table codec with Huffman coding
//! - **Flow Control**: Signed 31-bit connection and stream windows,
//!   including negative windows after a SETTINGS decrease
//! - **Write Scheduling**: Backpressure-aware multiplexing with pluggable
//!   inter-stream selection (round-robin or priority-weighted)
//!
//! # Quick Start
//!
//! ```rust
//! use h2_mux::{
//!     Connection, ConnectionEvent, Region, Role, Settings, SliceMemory,
//! };
//!
//! // Client role here, so no connection preface is expected. Transport
//! // bytes arrive as region descriptors into externally owned memory.
//! let mut conn = Connection::new(Role::Client, Settings::default());
//!
//! // SETTINGS ack frame on the wire.
//! let bytes = vec![0, 0, 0, 4, 1, 0, 0, 0, 0];
//! let mut mem = SliceMemory::new(bytes);
//! let events = conn.receive(&[Region::new(0, 9, 1)], &mut mem).unwrap();
//! assert_eq!(events, vec![ConnectionEvent::SettingsAck]);
//! ```
//!
//! # Architecture
//!
//! Inbound: region batch → [`decoder::FrameDecoder`] → [`frame::Frame`] →
//! [`connection::Connection`] state update → (header frames) HPACK decode →
//! [`connection::ConnectionEvent`].
//!
//! Outbound: orchestrator intent → [`scheduler::WriteScheduler`] → window
//! check against [`connection::Connection`] → immediate emission, or staging
//! in the circular buffer until a window-availability callback.
//!
//! It does NOT provide:
//! - TCP/UDP transport (you provide the regions and the sink)
//! - TLS (use rustls or similar)
//! - Request routing or HTTP/1.1 translation

pub mod connection;
pub mod decoder;
pub mod error;
pub mod flow;
pub mod frame;
pub mod hpack;
pub mod huffman;
pub mod region;
pub mod scheduler;
pub mod settings;
pub mod staging;

pub use connection::{Connection, ConnectionEvent, Role, Stream, StreamState};
pub use decoder::FrameDecoder;
pub use error::{ErrorCode, Http2Error};
pub use flow::FlowWindow;
pub use frame::{Frame, FrameHeader, Priority};
pub use hpack::{HeaderField, HpackDecoder, HpackEncoder};
pub use region::{MemoryOwner, Region, SliceMemory};
pub use scheduler::{
    FrameSink, PriorityWeighted, RoundRobin, StreamSelector, TeardownReport, VecSink,
    WriteScheduler,
};
pub use settings::Settings;
pub use staging::StagingBuffer;
