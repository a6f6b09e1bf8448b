//! Flow-control window tracking (RFC 7540 Section 6.9).
//!
//! Windows carry signed 31-bit semantics: a SETTINGS_INITIAL_WINDOW_SIZE
//! decrease may legally drive an open stream's send window negative, after
//! which no data may be sent until WINDOW_UPDATEs bring it back up.

use crate::error::{ErrorCode, Http2Error};

/// Default initial window size (RFC 7540 Section 6.9.2).
pub const DEFAULT_WINDOW_SIZE: i64 = 65_535;

/// Maximum window size, 2^31 - 1.
pub const MAX_WINDOW_SIZE: i64 = 0x7fff_ffff;

/// A send or receive flow-control window.
#[derive(Debug, Clone, Copy)]
pub struct FlowWindow {
    window: i64,
}

impl FlowWindow {
    pub fn new(initial: i64) -> Self {
        Self { window: initial }
    }

    /// Currently available credit. Negative after a SETTINGS decrease.
    pub fn available(&self) -> i64 {
        self.window
    }

    /// Consume credit for received or sent DATA payload bytes.
    /// Going below zero this way is a flow-control violation.
    pub fn consume(&mut self, amount: u32) -> Result<(), Http2Error> {
        let new = self.window - i64::from(amount);
        if new < 0 {
            return Err(Http2Error::connection(
                ErrorCode::FlowControlError,
                "flow control window underflow",
            ));
        }
        self.window = new;
        Ok(())
    }

    /// Apply a WINDOW_UPDATE increment. An update pushing the window past
    /// 2^31-1 is a connection error (RFC 7540 Section 6.9.1).
    pub fn increase(&mut self, increment: u32) -> Result<(), Http2Error> {
        let new = self.window + i64::from(increment);
        if new > MAX_WINDOW_SIZE {
            return Err(Http2Error::connection(
                ErrorCode::FlowControlError,
                "flow control window overflow",
            ));
        }
        self.window = new;
        Ok(())
    }

    /// Apply a SETTINGS_INITIAL_WINDOW_SIZE change: `delta` is
    /// (new - old) and may be negative. The result may go negative.
    pub fn adjust(&mut self, delta: i64) -> Result<(), Http2Error> {
        let new = self.window + delta;
        if new > MAX_WINDOW_SIZE {
            return Err(Http2Error::connection(
                ErrorCode::FlowControlError,
                "initial window adjustment overflow",
            ));
        }
        self.window = new;
        Ok(())
    }
}

impl Default for FlowWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}
