//! Status events published to the operator surface.
//!
//! Delivery is fire-and-forget: a publisher never blocks and never fails
//! when nobody is listening.

use crossbeam::channel::{self, Receiver, Sender};
use std::fmt;
use std::path::PathBuf;

/// Presenter operation named in failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenterOp {
    /// `open(locator)`
    Open,
    /// `activate()`
    Activate,
    /// `advance()`
    Advance,
}

impl fmt::Display for PresenterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresenterOp::Open => f.write_str("open"),
            PresenterOp::Activate => f.write_str("activate"),
            PresenterOp::Advance => f.write_str("advance"),
        }
    }
}

/// A status change observed by the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// PLC link established.
    Connected {
        /// Driver that owns the link
        driver: &'static str,
    },
    /// PLC link closed.
    Disconnected,
    /// Polling started.
    MonitorStarted,
    /// Polling stopped.
    MonitorStopped,
    /// The index byte read from the PLC changed.
    IndexChanged(u8),
    /// A start request named an index without a usable mapping.
    MappingMissing(u8),
    /// A new resource was opened for `index`.
    PresentationOpened {
        /// Mapped index
        index: u8,
        /// Resource that was opened
        locator: PathBuf,
    },
    /// `open` or `activate` failed.
    PresentationFailed {
        /// Failing operation
        operation: PresenterOp,
        /// Presenter's description
        reason: String,
    },
    /// An advance request could not be carried out.
    AdvanceFailed(String),
}

/// Cloneable, non-blocking handle for publishing status events.
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    tx: Option<Sender<StatusEvent>>,
}

impl StatusPublisher {
    /// Create a publisher and the receiver that observes it.
    pub fn channel() -> (Self, Receiver<StatusEvent>) {
        let (tx, rx) = channel::unbounded();
        (Self { tx: Some(tx) }, rx)
    }

    /// A publisher that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Publish an event. Dropped silently if the observer is gone.
    pub fn publish(&self, event: StatusEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_observer() {
        let (publisher, rx) = StatusPublisher::channel();
        publisher.publish(StatusEvent::IndexChanged(7));
        assert_eq!(rx.try_recv().unwrap(), StatusEvent::IndexChanged(7));
    }

    #[test]
    fn publish_after_observer_dropped_is_silent() {
        let (publisher, rx) = StatusPublisher::channel();
        drop(rx);
        publisher.publish(StatusEvent::Disconnected);
        StatusPublisher::disabled().publish(StatusEvent::Disconnected);
    }
}
