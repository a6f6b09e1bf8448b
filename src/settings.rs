//! HTTP/2 SETTINGS parameters (RFC 7540 Section 6.5).

use crate::error::{ErrorCode, Http2Error};

/// HTTP/2 SETTINGS identifiers (RFC 7540 Section 6.5.2).
#[allow(dead_code)]
pub mod settings_id {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;
}

/// Default max frame size (RFC 7540 Section 6.5.2).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Negotiated SETTINGS values for one direction of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// SETTINGS_HEADER_TABLE_SIZE (0x1). Default 4096.
    pub header_table_size: u32,
    /// SETTINGS_ENABLE_PUSH (0x2). Default enabled.
    pub enable_push: bool,
    /// SETTINGS_MAX_CONCURRENT_STREAMS (0x3). Default unlimited.
    pub max_concurrent_streams: Option<u32>,
    /// SETTINGS_INITIAL_WINDOW_SIZE (0x4). Default 65535.
    pub initial_window_size: u32,
    /// SETTINGS_MAX_FRAME_SIZE (0x5). Default 16384.
    pub max_frame_size: u32,
    /// SETTINGS_MAX_HEADER_LIST_SIZE (0x6). Default unlimited.
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: 65_535,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    /// Encode as a sequence of 6-byte (id, value) pairs.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        encode_setting(buf, settings_id::HEADER_TABLE_SIZE, self.header_table_size);
        encode_setting(buf, settings_id::ENABLE_PUSH, u32::from(self.enable_push));
        if let Some(v) = self.max_concurrent_streams {
            encode_setting(buf, settings_id::MAX_CONCURRENT_STREAMS, v);
        }
        encode_setting(buf, settings_id::INITIAL_WINDOW_SIZE, self.initial_window_size);
        encode_setting(buf, settings_id::MAX_FRAME_SIZE, self.max_frame_size);
        if let Some(v) = self.max_header_list_size {
            encode_setting(buf, settings_id::MAX_HEADER_LIST_SIZE, v);
        }
    }

    /// Decode a SETTINGS payload. The caller has already checked that the
    /// length is a multiple of 6.
    pub fn decode(buf: &[u8]) -> Result<Self, Http2Error> {
        let mut settings = Settings::default();
        for chunk in buf.chunks_exact(6) {
            let id = u16::from_be_bytes([chunk[0], chunk[1]]);
            let value = u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]);
            match id {
                settings_id::HEADER_TABLE_SIZE => settings.header_table_size = value,
                settings_id::ENABLE_PUSH => {
                    if value > 1 {
                        return Err(Http2Error::connection(
                            ErrorCode::ProtocolError,
                            "ENABLE_PUSH must be 0 or 1",
                        ));
                    }
                    settings.enable_push = value == 1;
                }
                settings_id::MAX_CONCURRENT_STREAMS => {
                    settings.max_concurrent_streams = Some(value);
                }
                settings_id::INITIAL_WINDOW_SIZE => {
                    if value > 0x7fff_ffff {
                        return Err(Http2Error::connection(
                            ErrorCode::FlowControlError,
                            "INITIAL_WINDOW_SIZE exceeds 2^31-1",
                        ));
                    }
                    settings.initial_window_size = value;
                }
                settings_id::MAX_FRAME_SIZE => {
                    if !(DEFAULT_MAX_FRAME_SIZE..=16_777_215).contains(&value) {
                        return Err(Http2Error::connection(
                            ErrorCode::ProtocolError,
                            "MAX_FRAME_SIZE out of range",
                        ));
                    }
                    settings.max_frame_size = value;
                }
                settings_id::MAX_HEADER_LIST_SIZE => {
                    settings.max_header_list_size = Some(value);
                }
                // Unknown identifiers MUST be ignored (RFC 7540 Section 6.5.2).
                _ => {}
            }
        }
        Ok(settings)
    }
}

fn encode_setting(buf: &mut Vec<u8>, id: u16, value: u32) {
    buf.extend_from_slice(&id.to_be_bytes());
    buf.extend_from_slice(&value.to_be_bytes());
}
