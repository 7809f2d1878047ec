//! Wrapping u32 counters for sequence numbers and request ids.
//!
//! Both counters start at 1, never produce zero, and wrap back to 1 once
//! they reach `u32::MAX - 1024`, comfortably before the unsigned maximum so
//! a receiver can distinguish a wrap from overflow garbage.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::UaError;
use crate::status;

/// Largest value a counter hands out before wrapping to 1.
pub const SEQUENCE_WRAP_LIMIT: u32 = u32::MAX - 1024;

/// An atomic, wrapping sequence counter.
#[derive(Debug)]
pub struct SequenceNumber {
    value: AtomicU32,
}

impl SequenceNumber {
    /// Create a counter whose first [`next`](Self::next) returns `start`.
    pub fn new(start: u32) -> Self {
        Self {
            value: AtomicU32::new(start),
        }
    }

    /// Take the next value, advancing the counter.
    pub fn next(&self) -> u32 {
        self.value
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(if v >= SEQUENCE_WRAP_LIMIT { 1 } else { v + 1 })
            })
            .expect("fetch_update closure always returns Some")
    }

    /// Peek at the value the next call to [`next`](Self::next) will return.
    #[must_use]
    pub fn peek(&self) -> u32 {
        self.value.load(Ordering::SeqCst)
    }
}

/// Window below the wrap limit within which a wrap to small values is
/// accepted as forward progress.
const WRAP_WINDOW: u32 = 1024;

/// Receiver-side check that sequence numbers are strictly increasing,
/// modulo the wrap limit.
#[derive(Debug, Default)]
pub struct SequenceValidator {
    last: Option<u32>,
}

impl SequenceValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `sequence_number` if it moves strictly forward. A small value
    /// following one near the wrap limit is the counter wrapping, not a
    /// regression.
    ///
    /// # Errors
    ///
    /// `Bad_SequenceNumberInvalid` on a repeat or regression; this is fatal
    /// to the channel.
    pub fn validate(&mut self, sequence_number: u32) -> Result<(), UaError> {
        if let Some(last) = self.last {
            let wrapped = last > SEQUENCE_WRAP_LIMIT - WRAP_WINDOW && sequence_number < WRAP_WINDOW;
            if sequence_number <= last && !wrapped {
                return Err(UaError::new(
                    status::BAD_SEQUENCE_NUMBER_INVALID,
                    format!("sequence number {sequence_number} does not advance past {last}"),
                ));
            }
        }
        self.last = Some(sequence_number);
        Ok(())
    }
}
