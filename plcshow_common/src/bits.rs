//! Bit layouts of the PLC-resident bytes.
//!
//! The control byte carries the two request bits the bridge polls. The
//! feedback byte is a separate byte in the same block; the bridge only ever
//! touches bit 2 of it.

use bitflags::bitflags;

bitflags! {
    /// Request bits in the control byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ControlBits: u8 {
        /// Start/resume the presentation selected by the index byte.
        const START = 0b0000_0001;
        /// Advance the active presentation.
        const ADVANCE = 0b0000_0010;
    }
}

bitflags! {
    /// Bits the bridge writes into the feedback byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FeedbackBits: u8 {
        /// Advance acknowledged (pulsed high, then cleared).
        const ADVANCE_ACK = 0b0000_0100;
    }
}

impl ControlBits {
    /// Extract the monitored bits from a raw control byte, ignoring bits 2-7.
    #[inline]
    pub fn from_control_byte(byte: u8) -> Self {
        Self::from_bits_truncate(byte)
    }
}
