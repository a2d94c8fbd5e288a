//! plcshow Common Library
//!
//! Shared constants, bit layouts, configuration loading and the PLC link
//! contract used by every crate in the plcshow workspace.
//!
//! # Module Structure
//!
//! - [`consts`] - Default timings, block layout and service name
//! - [`bits`] - Control and feedback byte bit layouts
//! - [`config`] - Configuration types and the TOML loader
//! - [`link`] - `PlcLink` / `PlcConnector` traits and their error taxonomy
//! - [`status`] - Status events published to the operator surface
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use plcshow_common::prelude::*;
//!
//! let config = BridgeConfig::default();
//! assert_eq!(config.plc.db_number, 1);
//! ```

pub mod bits;
pub mod config;
pub mod consts;
pub mod link;
pub mod prelude;
pub mod status;
