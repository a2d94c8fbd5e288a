//! Prelude module for common re-exports.
//!
//! ```rust
//! use plcshow_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    BridgeConfig, ConfigError, ConfigLoader, LogLevel, PlcConfig, PresentationConfig,
    PresenterBackend, SharedConfig, TimingConfig,
};

// ─── Bit layouts ────────────────────────────────────────────────────
pub use crate::bits::{ControlBits, FeedbackBits};

// ─── PLC link ───────────────────────────────────────────────────────
pub use crate::link::{
    ConnectError, ConnectorFactory, LinkIoError, PlcConnector, PlcEndpoint, PlcLink,
};

// ─── Status ─────────────────────────────────────────────────────────
pub use crate::status::{PresenterOp, StatusEvent, StatusPublisher};
