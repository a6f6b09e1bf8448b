//! Circular staging buffer for payload bytes awaiting flow-control window
//! or frame reassembly.
//!
//! A reservation is always a single contiguous run: it never splits across
//! the wrap boundary. When the only free space straddles the wrap, `reserve`
//! fails even though total free bytes would suffice; callers chunk their
//! writes to the largest contiguous run instead. One byte of slack is kept so
//! the write cursor never catches the read cursor from behind, which keeps
//! the full/empty states distinguishable from the cursors alone.

/// Fixed-capacity ring buffer with reserve/commit/release semantics.
///
/// `reserve` hands out a contiguous offset, `commit` fills it and makes the
/// bytes readable, `release` frees readable bytes in FIFO order. Reservations
/// are committed in the order they were made.
#[derive(Debug)]
pub struct StagingBuffer {
    buf: Box<[u8]>,
    /// Read cursor: start of committed, unreleased bytes.
    start: usize,
    /// Committed write cursor.
    end: usize,
    /// Reservation cursor, at or ahead of `end` in ring order.
    resv: usize,
    /// When a reservation wrapped to offset 0, bytes at [mark..capacity)
    /// are dead until the read cursor passes them.
    wrap_mark: Option<usize>,
    occupied: usize,
}

impl StagingBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "staging buffer capacity must be nonzero");
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
            resv: 0,
            wrap_mark: None,
            occupied: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes currently reserved or committed but not yet released.
    pub fn occupied(&self) -> usize {
        self.occupied
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// Largest single reservation that would currently succeed.
    pub fn max_reservation(&self) -> usize {
        let cap = self.capacity();
        if self.start <= self.resv && self.wrap_mark.is_none() {
            let tail = (cap - self.resv).saturating_sub(1);
            let head = self.start.saturating_sub(1);
            tail.max(head)
        } else {
            (self.start - self.resv).saturating_sub(1)
        }
    }

    /// Reserve `len` contiguous bytes. Returns the write offset, or `None`
    /// if no single contiguous free run can hold the request.
    pub fn reserve(&mut self, len: usize) -> Option<usize> {
        if len == 0 || len > self.capacity() {
            return None;
        }
        let cap = self.capacity();
        if self.start <= self.resv && self.wrap_mark.is_none() {
            // Linear layout: free tail [resv..cap), free head [0..start).
            if self.resv + len < cap {
                let offset = self.resv;
                self.resv += len;
                self.occupied += len;
                Some(offset)
            } else if len < self.start {
                // Wrap: abandon the tail, reserve from the front.
                self.resv = len;
                self.occupied += len;
                Some(0)
            } else {
                None
            }
        } else {
            // Wrapped layout: free run is [resv..start).
            if self.resv + len < self.start {
                let offset = self.resv;
                self.resv += len;
                self.occupied += len;
                Some(offset)
            } else {
                None
            }
        }
    }

    /// Fill a previously reserved range and make it readable. Reservations
    /// commit in the order they were made.
    pub fn commit(&mut self, offset: usize, data: &[u8]) {
        debug_assert!(
            offset == self.end || (offset == 0 && self.end > 0),
            "commit out of reservation order"
        );
        if offset == 0 && self.end > 0 {
            // This reservation wrapped; remember where readable bytes stop.
            self.wrap_mark = Some(self.end);
        }
        self.buf[offset..offset + data.len()].copy_from_slice(data);
        self.end = offset + data.len();
    }

    /// View committed bytes at a reserved offset. The range is contiguous by
    /// construction.
    pub fn view(&self, offset: usize, len: usize) -> &[u8] {
        &self.buf[offset..offset + len]
    }

    /// Free `len` committed bytes in FIFO order.
    pub fn release(&mut self, len: usize) {
        debug_assert!(len <= self.occupied, "release beyond occupied bytes");
        self.occupied -= len;
        let cap = self.capacity();
        let mut remaining = len;
        while remaining > 0 {
            let boundary = match self.wrap_mark {
                Some(mark) if self.start <= mark => mark,
                _ => cap,
            };
            let take = remaining.min(boundary - self.start);
            self.start += take;
            remaining -= take;
            if self.start == boundary {
                self.start = 0;
                if self.wrap_mark == Some(boundary) {
                    self.wrap_mark = None;
                }
            }
        }
        if self.occupied == 0 && self.start == self.resv {
            // Fully drained: rewind so the whole capacity is one free run.
            self.start = 0;
            self.end = 0;
            self.resv = 0;
            self.wrap_mark = None;
        }
    }

    /// Discard everything, returning the buffer to its initial state.
    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
        self.resv = 0;
        self.wrap_mark = None;
        self.occupied = 0;
    }
}
