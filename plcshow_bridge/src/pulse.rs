//! Advance acknowledge pulse on the feedback byte.
//!
//! `pulse()` sets bit 2 of the feedback byte right away and schedules a clear
//! for `width` later. Every pulse keeps its own clear: if a second advance
//! arrives while a clear is pending, both clears fire. Clearing an already
//! clear bit is a no-op, so no clear can ever be lost.
//!
//! The pulser holds no link of its own. The poll loop, which owns the link,
//! calls [`FeedbackPulser::service`] whenever it wakes up and sleeps no
//! longer than [`FeedbackPulser::next_deadline`].

use plcshow_common::bits::FeedbackBits;
use plcshow_common::link::{LinkIoError, PlcLink};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Feedback bit pulse generator.
#[derive(Debug)]
pub struct FeedbackPulser {
    /// Block holding the feedback byte
    block: u16,
    /// Offset of the feedback byte
    offset: u16,
    /// Delay between set and clear
    width: Duration,
    /// Pending clear deadlines, oldest first
    pending: VecDeque<Instant>,
}

/// Read the feedback byte, apply `f`, write it back.
fn modify_byte(
    link: &mut dyn PlcLink,
    block: u16,
    offset: u16,
    f: impl FnOnce(FeedbackBits) -> FeedbackBits,
) -> Result<u8, LinkIoError> {
    let current = link.read_bytes(block, offset, 1)?;
    let byte = *current.first().ok_or(LinkIoError::ShortRead {
        expected: 1,
        got: 0,
    })?;
    let updated = f(FeedbackBits::from_bits_retain(byte)).bits();
    link.write_bytes(block, offset, &[updated])?;
    Ok(updated)
}

impl FeedbackPulser {
    /// Create a pulser for the feedback byte at `block`/`offset`.
    pub fn new(block: u16, offset: u16, width: Duration) -> Self {
        Self {
            block,
            offset,
            width,
            pending: VecDeque::new(),
        }
    }

    /// Set the acknowledge bit and schedule its clear.
    ///
    /// The clear is scheduled even if the set fails, since a failed write may
    /// still have reached the controller.
    pub fn pulse(&mut self, link: &mut dyn PlcLink, now: Instant) {
        match modify_byte(link, self.block, self.offset, |b| {
            b | FeedbackBits::ADVANCE_ACK
        }) {
            Ok(byte) => debug!(
                "Feedback bit set (DB{}.{} = 0x{:02X})",
                self.block, self.offset, byte
            ),
            Err(e) => warn!("Failed to set feedback bit: {}", e),
        }
        self.pending.push_back(now + self.width);
    }

    /// Fire every clear whose deadline has passed. Returns how many fired.
    pub fn service(&mut self, link: &mut dyn PlcLink, now: Instant) -> usize {
        let mut fired = 0;
        while let Some(&deadline) = self.pending.front() {
            if deadline > now {
                break;
            }
            self.pending.pop_front();
            self.clear(link);
            fired += 1;
        }
        fired
    }

    /// Fire all pending clears regardless of their deadlines.
    pub fn flush(&mut self, link: &mut dyn PlcLink) -> usize {
        let count = self.pending.len();
        if count > 0 {
            self.pending.clear();
            self.clear(link);
        }
        count
    }

    fn clear(&self, link: &mut dyn PlcLink) {
        match modify_byte(link, self.block, self.offset, |b| {
            b - FeedbackBits::ADVANCE_ACK
        }) {
            Ok(byte) => debug!(
                "Feedback bit cleared (DB{}.{} = 0x{:02X})",
                self.block, self.offset, byte
            ),
            Err(e) => warn!("Failed to clear feedback bit: {}", e),
        }
    }

    /// Earliest pending clear.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.front().copied()
    }

    /// Latest pending clear.
    pub fn last_deadline(&self) -> Option<Instant> {
        self.pending.back().copied()
    }

    /// Number of clears not yet fired.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::SimulatedPlc;
    use plcshow_common::config::PlcConfig;
    use plcshow_common::link::PlcConnector;

    const WIDTH: Duration = Duration::from_millis(200);

    fn setup() -> (SimulatedPlc, Box<dyn PlcLink>, FeedbackPulser) {
        let plc = SimulatedPlc::new();
        let link = plc.connect(&PlcConfig::default().endpoint()).unwrap();
        (plc, link, FeedbackPulser::new(1, 2, WIDTH))
    }

    #[test]
    fn test_pulse_sets_then_clears() {
        let (plc, mut link, mut pulser) = setup();
        let t0 = Instant::now();

        pulser.pulse(link.as_mut(), t0);
        assert_eq!(plc.peek(1, 2, 1), vec![0b100]);
        assert_eq!(pulser.next_deadline(), Some(t0 + WIDTH));

        assert_eq!(pulser.service(link.as_mut(), t0 + WIDTH / 2), 0);
        assert_eq!(plc.peek(1, 2, 1), vec![0b100]);

        assert_eq!(pulser.service(link.as_mut(), t0 + WIDTH), 1);
        assert_eq!(plc.peek(1, 2, 1), vec![0]);
        assert_eq!(pulser.pending(), 0);
    }

    #[test]
    fn test_other_feedback_bits_preserved() {
        let (plc, mut link, mut pulser) = setup();
        plc.poke(1, 2, &[0b1000_0001]);
        let t0 = Instant::now();
        pulser.pulse(link.as_mut(), t0);
        assert_eq!(plc.peek(1, 2, 1), vec![0b1000_0101]);
        pulser.service(link.as_mut(), t0 + WIDTH);
        assert_eq!(plc.peek(1, 2, 1), vec![0b1000_0001]);
    }

    #[test]
    fn test_overlapping_pulses_both_clear() {
        let (plc, mut link, mut pulser) = setup();
        let t0 = Instant::now();
        pulser.pulse(link.as_mut(), t0);
        pulser.pulse(link.as_mut(), t0 + Duration::from_millis(50));
        assert_eq!(pulser.pending(), 2);

        assert_eq!(pulser.service(link.as_mut(), t0 + WIDTH), 1);
        assert_eq!(plc.peek(1, 2, 1), vec![0]);
        assert_eq!(pulser.service(link.as_mut(), t0 + WIDTH * 2), 1);
        assert_eq!(plc.peek(1, 2, 1), vec![0]);
    }

    #[test]
    fn test_failed_set_still_schedules_clear() {
        let (plc, mut link, mut pulser) = setup();
        plc.set_fail_writes(true);
        let t0 = Instant::now();
        pulser.pulse(link.as_mut(), t0);
        assert_eq!(pulser.pending(), 1);

        // Failing clear is swallowed and not retried.
        assert_eq!(pulser.service(link.as_mut(), t0 + WIDTH), 1);
        assert_eq!(pulser.pending(), 0);
    }

    #[test]
    fn test_flush_clears_early() {
        let (plc, mut link, mut pulser) = setup();
        let t0 = Instant::now();
        pulser.pulse(link.as_mut(), t0);
        pulser.pulse(link.as_mut(), t0);
        assert_eq!(pulser.flush(link.as_mut()), 2);
        assert_eq!(plc.peek(1, 2, 1), vec![0]);
        assert_eq!(pulser.next_deadline(), None);
    }
}
