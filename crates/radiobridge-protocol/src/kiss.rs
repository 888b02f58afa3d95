//! KISS transport framing for the modem's TCP channel
//!
//! Each unit is `FEND, command, escaped frame, FEND`. Inside the unit, `FEND`
//! is sent as `FESC TFEND` and `FESC` as `FESC TFESC`.
//!
//! [`KissDecoder`] is fed raw socket reads in whatever chunks they arrive and
//! yields complete frames. Corrupt units are dropped and decoding picks up
//! again at the next `FEND`.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::{KISS_CMD_DATA, KISS_FEND, KISS_FESC, KISS_TFEND, KISS_TFESC, MAX_KISS_UNIT};

/// Wrap a frame into a KISS data unit
pub fn frame(payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(payload.len() + payload.len() / 8 + 3);
    out.put_u8(KISS_FEND);
    out.put_u8(KISS_CMD_DATA);
    for &byte in payload {
        match byte {
            KISS_FEND => out.put_slice(&[KISS_FESC, KISS_TFEND]),
            KISS_FESC => out.put_slice(&[KISS_FESC, KISS_TFESC]),
            _ => out.put_u8(byte),
        }
    }
    out.put_u8(KISS_FEND);
    out.freeze()
}

/// Why a unit was discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// `FESC` followed by something other than `TFEND`/`TFESC`
    BadEscape,
    /// Unit ended right after `FESC`
    DanglingEscape,
    /// Command byte was not a data frame
    NotData,
    /// Data unit with no frame bytes
    Empty,
    /// Unit grew past the size limit without a closing `FEND`
    Oversized,
}

/// Streaming KISS decoder
#[derive(Debug)]
pub struct KissDecoder {
    buffer: BytesMut,
    in_unit: bool,
    overflowed: bool,
    discarded: u64,
}

impl KissDecoder {
    /// Create an idle decoder waiting for the first `FEND`
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
            in_unit: false,
            overflowed: false,
            discarded: 0,
        }
    }

    /// Drop any partial unit and wait for the next `FEND`
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.in_unit = false;
        self.overflowed = false;
    }

    /// Number of units discarded since creation
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Feed a chunk of raw bytes, returning every frame it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        let mut frames = Vec::new();

        for &byte in chunk {
            if byte == KISS_FEND {
                if self.overflowed {
                    self.discard(DiscardReason::Oversized);
                } else if self.in_unit && !self.buffer.is_empty() {
                    match decode_unit(&self.buffer) {
                        Ok(frame) => frames.push(frame),
                        Err(reason) => self.discard(reason),
                    }
                }
                // A FEND both closes the current unit and opens the next
                self.buffer.clear();
                self.overflowed = false;
                self.in_unit = true;
                continue;
            }

            if !self.in_unit || self.overflowed {
                continue;
            }

            if self.buffer.len() >= MAX_KISS_UNIT {
                self.buffer.clear();
                self.overflowed = true;
                continue;
            }
            self.buffer.put_u8(byte);
        }

        frames
    }

    fn discard(&mut self, reason: DiscardReason) {
        self.discarded += 1;
        debug!(reason = ?reason, "Discarding KISS unit");
    }
}

impl Default for KissDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode the interior of one unit (command byte plus escaped frame)
fn decode_unit(unit: &[u8]) -> std::result::Result<Bytes, DiscardReason> {
    let (&command, escaped) = unit.split_first().ok_or(DiscardReason::Empty)?;

    if command & 0x0F != KISS_CMD_DATA {
        return Err(DiscardReason::NotData);
    }
    if command >> 4 != 0 {
        trace!(port = command >> 4, "KISS data frame on non-zero port");
    }

    let mut out = BytesMut::with_capacity(escaped.len());
    let mut bytes = escaped.iter();
    while let Some(&byte) = bytes.next() {
        if byte != KISS_FESC {
            out.put_u8(byte);
            continue;
        }
        match bytes.next() {
            Some(&KISS_TFEND) => out.put_u8(KISS_FEND),
            Some(&KISS_TFESC) => out.put_u8(KISS_FESC),
            Some(_) => return Err(DiscardReason::BadEscape),
            None => return Err(DiscardReason::DanglingEscape),
        }
    }

    if out.is_empty() {
        return Err(DiscardReason::Empty);
    }
    Ok(out.freeze())
}
