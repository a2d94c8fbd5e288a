//! # plcshow Bridge Library
//!
//! Polls two control bytes in a PLC data block, turns rising edges into
//! presentation commands and acknowledges advances with a feedback pulse.
//!
//! # Module Structure
//!
//! - [`edge`] - Rising-edge detection on the control byte
//! - [`session`] - Single owner of the PLC link
//! - [`monitor`] - Poll loop, stop handle and statistics
//! - [`pulse`] - Feedback acknowledge pulse
//! - [`dispatch`] - Control context: applies events to the presenter
//! - [`mapping`] - Index to resource table
//! - [`presentation`] - Presenter trait and backends
//! - [`driver_registry`] - Driver factory registration
//! - [`drivers`] - S7 and simulated PLC links
//! - [`console`] - Operator commands on stdin
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          plcshow_bridge                              │
//! │  ┌────────────┐   ┌───────────────────────┐   ┌──────────────────┐   │
//! │  │ PlcSession │◄──┤  monitor thread       │   │ Driver Registry  │   │
//! │  │ (PlcLink)  │   │  edge::detect         │   │  s7, simulation  │   │
//! │  └────────────┘   │  FeedbackPulser       │   └──────────────────┘   │
//! │                   └──────────┬────────────┘                          │
//! │                              │ ControlMessage (crossbeam)            │
//! │                              ▼                                       │
//! │                   ┌───────────────────────┐   ┌──────────────────┐   │
//! │                   │  Dispatcher           │──►│  Presenter       │   │
//! │                   │  (control context)    │   │  (trait object)  │   │
//! │                   └──────────┬────────────┘   └──────────────────┘   │
//! │                              ▼                                       │
//! │                        MappingTable                                  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod console;
pub mod dispatch;
pub mod driver_registry;
pub mod drivers;
pub mod edge;
pub mod mapping;
pub mod monitor;
pub mod presentation;
pub mod pulse;
pub mod session;

// Re-export key types for convenience
pub use crate::dispatch::{ControlHandle, ControlMessage, Dispatcher, Selection};
pub use crate::driver_registry::{DriverRegistry, RegistryError};
pub use crate::edge::{BridgeEvent, EdgeState};
pub use crate::mapping::{IndexMapping, Locator, MappingTable};
pub use crate::monitor::{MonitorLoop, MonitorSettings, MonitorState, MonitorStats, Poller};
pub use crate::presentation::Presenter;
pub use crate::session::PlcSession;
