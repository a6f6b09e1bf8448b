//! Integration tests for the region-based frame decoder.

mod end_to_end;
