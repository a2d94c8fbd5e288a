//! Rising-edge detection on the control byte.
//!
//! A PLC holds a request bit high for as long as its program says so; the
//! bridge must act once per 0→1 transition. [`detect`] is a pure function of
//! the previous [`EdgeState`] and the freshly polled bytes, so the poll loop
//! threads the state through each tick and the tests drive it directly.

use plcshow_common::bits::ControlBits;

/// Discrete request decoded from the control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEvent {
    /// Start/resume the presentation mapped to this index.
    StartRequested(u8),
    /// Advance the active presentation.
    AdvanceRequested,
}

/// Events of one tick, Start before Advance.
pub type EdgeEvents = heapless::Vec<BridgeEvent, 2>;

/// Last observed level of each monitored bit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeState {
    /// Start bit level on the previous successful poll.
    pub last_start: bool,
    /// Advance bit level on the previous successful poll.
    pub last_advance: bool,
}

impl EdgeState {
    /// Levels of both bits as seen in `control`.
    pub fn from_control_byte(control: u8) -> Self {
        let bits = ControlBits::from_control_byte(control);
        Self {
            last_start: bits.contains(ControlBits::START),
            last_advance: bits.contains(ControlBits::ADVANCE),
        }
    }
}

/// Compute the events for one tick and the state for the next.
pub fn detect(previous: EdgeState, control: u8, index: u8) -> (EdgeEvents, EdgeState) {
    let next = EdgeState::from_control_byte(control);
    let mut events = EdgeEvents::new();

    // Capacity covers both monitored bits, pushes cannot fail.
    if next.last_start && !previous.last_start {
        let _ = events.push(BridgeEvent::StartRequested(index));
    }
    if next.last_advance && !previous.last_advance {
        let _ = events.push(BridgeEvent::AdvanceRequested);
    }

    (events, next)
}
