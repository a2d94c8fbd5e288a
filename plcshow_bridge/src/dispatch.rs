//! Command dispatch on the control context.
//!
//! The poll thread never touches the presenter. It sends [`ControlMessage`]s
//! through a [`ControlHandle`]; the thread that owns the [`Dispatcher`]
//! applies them one at a time, in the order they were polled.
//!
//! # State machine
//!
//! ```text
//!            StartRequested(i)                StartRequested(j), j != i
//!   Idle ───────────────────────► Active(i) ─────────────────────────► Active(j)
//!             open + activate       │   ▲          open + activate
//!                                   └───┘
//!                         StartRequested(i): activate only
//!                         AdvanceRequested:  advance only
//! ```
//!
//! `StartRequested(i)` in `Active(i)` reopens instead when index `i` now maps
//! to a different resource than the one that was opened.
//!
//! Advance is always forwarded to the presenter, which reports `NotActive`
//! when nothing is playing.

use crate::edge::BridgeEvent;
use crate::mapping::{IndexMapping, Locator};
use crate::presentation::Presenter;
use crossbeam::channel::{self, Receiver, Sender};
use plcshow_common::status::{PresenterOp, StatusEvent, StatusPublisher};
use tracing::{debug, info, warn};

/// Message for the control context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Decoded PLC request.
    Event(BridgeEvent),
    /// Leave the dispatch loop.
    Shutdown,
}

/// Sending side of the control context, held by the poll thread.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: Sender<ControlMessage>,
}

impl ControlHandle {
    /// Create a handle and the receiver the control context reads.
    pub fn channel() -> (Self, Receiver<ControlMessage>) {
        let (tx, rx) = channel::unbounded();
        (Self { tx }, rx)
    }

    /// Queue an event. Returns `false` if the control context is gone.
    pub fn submit(&self, event: BridgeEvent) -> bool {
        self.tx.send(ControlMessage::Event(event)).is_ok()
    }

    /// Ask the dispatch loop to exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ControlMessage::Shutdown);
    }
}

/// Which mapped index the presenter shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Selection {
    /// Nothing opened yet.
    #[default]
    Idle,
    /// Resource of this index is open.
    Active(u8),
}

/// Applies bridge events to the presenter.
pub struct Dispatcher<P, M> {
    /// Presentation engine
    presenter: P,
    /// Index lookup
    mapping: M,
    /// Current selection
    selection: Selection,
    /// Resource opened for the current selection
    opened: Option<Locator>,
    /// Status sink
    status: StatusPublisher,
}

impl<P: Presenter, M: IndexMapping> Dispatcher<P, M> {
    /// Create a dispatcher in `Idle`.
    pub fn new(presenter: P, mapping: M, status: StatusPublisher) -> Self {
        Self {
            presenter,
            mapping,
            selection: Selection::Idle,
            opened: None,
            status,
        }
    }

    /// Apply one event.
    pub fn handle(&mut self, event: BridgeEvent) {
        debug!("Dispatching {:?} in {:?}", event, self.selection);
        match event {
            BridgeEvent::StartRequested(index) => self.start(index),
            BridgeEvent::AdvanceRequested => self.advance(),
        }
    }

    fn start(&mut self, index: u8) {
        let Some(locator) = self.mapping.lookup(index) else {
            warn!("No presentation mapped to index {}", index);
            self.status.publish(StatusEvent::MappingMissing(index));
            return;
        };

        let reopen = self.selection != Selection::Active(index)
            || self.opened.as_ref() != Some(&locator);
        if reopen {
            if let Err(e) = self.presenter.open(&locator) {
                warn!("Failed to open {} for index {}: {}", locator, index, e);
                // The presenter closes the previous resource before opening.
                self.selection = Selection::Idle;
                self.opened = None;
                self.status.publish(StatusEvent::PresentationFailed {
                    operation: PresenterOp::Open,
                    reason: e.to_string(),
                });
                return;
            }
            info!("Index {} -> {}", index, locator);
            self.selection = Selection::Active(index);
            self.opened = Some(locator.clone());
            self.status.publish(StatusEvent::PresentationOpened {
                index,
                locator: locator.into_path(),
            });
        }

        if let Err(e) = self.presenter.activate() {
            warn!("Failed to start presentation {}: {}", index, e);
            self.status.publish(StatusEvent::PresentationFailed {
                operation: PresenterOp::Activate,
                reason: e.to_string(),
            });
        }
    }

    fn advance(&mut self) {
        if let Err(e) = self.presenter.advance() {
            warn!("Advance failed: {}", e);
            self.status.publish(StatusEvent::AdvanceFailed(e.to_string()));
        }
    }

    /// Process messages until `Shutdown` or until every handle is dropped.
    pub fn run(&mut self, rx: &Receiver<ControlMessage>) {
        info!("Control context running");
        while let Ok(message) = rx.recv() {
            match message {
                ControlMessage::Event(event) => self.handle(event),
                ControlMessage::Shutdown => break,
            }
        }
        info!("Control context stopped");
    }

    /// Current selection.
    pub fn selection(&self) -> Selection {
        self.selection
    }

    /// Index currently open, if any.
    pub fn current_index(&self) -> Option<u8> {
        match self.selection {
            Selection::Idle => None,
            Selection::Active(index) => Some(index),
        }
    }

    /// Presentation engine.
    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    /// Index lookup.
    pub fn mapping(&self) -> &M {
        &self.mapping
    }

    /// Index lookup, for edits made on the control context.
    pub fn mapping_mut(&mut self) -> &mut M {
        &mut self.mapping
    }
}
