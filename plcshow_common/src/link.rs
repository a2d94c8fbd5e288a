//! PLC link traits and error types.
//!
//! This module defines:
//! - `PlcConnector` trait - Establishes links to one kind of controller
//! - `PlcLink` trait - Byte-oriented block I/O over an established link
//! - `ConnectError` / `LinkIoError` - The two transport failure classes
//! - `ConnectorFactory` type alias - Factory function type for the registry
//!
//! A `ConnectError` is fatal to the connect attempt and is surfaced to the
//! operator. A `LinkIoError` is transient: the poll loop logs it and retries
//! on the next tick.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while establishing a link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// TCP connect, DNS or socket setup failed.
    #[error("Network error: {0}")]
    Network(String),

    /// The controller rejected or garbled the handshake.
    #[error("Protocol error during connect: {0}")]
    Protocol(String),

    /// A link is already open for this controller instance.
    #[error("Already connected")]
    AlreadyConnected,

    /// The controller refused the connection.
    #[error("Connection refused: {0}")]
    Refused(String),
}

/// Errors raised by block reads and writes on an established link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkIoError {
    /// Socket read/write failed or timed out.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The controller answered with an error or a malformed frame.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Fewer bytes than requested came back.
    #[error("Short read: expected {expected} bytes, got {got}")]
    ShortRead {
        /// Requested byte count
        expected: usize,
        /// Received byte count
        got: usize,
    },

    /// Address outside the block.
    #[error("Address out of range: DB{block}.{offset} (+{len})")]
    OutOfRange {
        /// Block number
        block: u16,
        /// Start offset
        offset: u16,
        /// Requested length
        len: usize,
    },

    /// The link has been closed.
    #[error("Link is disconnected")]
    Disconnected,
}

/// Connection parameters for a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlcEndpoint {
    /// Controller IP address or host name.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// CPU rack.
    pub rack: u16,
    /// CPU slot.
    pub slot: u16,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Per-request I/O timeout.
    pub io_timeout: Duration,
}

/// An established link to a controller's memory blocks.
///
/// All calls block and touch live device state; nothing is cached.
pub trait PlcLink: Send {
    /// Returns the driver's identifier (e.g., "s7", "simulation").
    fn driver_name(&self) -> &'static str;

    /// Read exactly `count` bytes from `block` starting at `offset`.
    ///
    /// # Errors
    /// Returns `LinkIoError` on transport failure or a short answer.
    fn read_bytes(&mut self, block: u16, offset: u16, count: u16) -> Result<Vec<u8>, LinkIoError>;

    /// Write `data` into `block` starting at `offset`.
    fn write_bytes(&mut self, block: u16, offset: u16, data: &[u8]) -> Result<(), LinkIoError>;

    /// Whether the link can still carry requests.
    ///
    /// A link that closed itself after losing its transport answers `false`
    /// from then on; the owner is expected to drop it.
    fn is_open(&self) -> bool {
        true
    }

    /// Close the link. Idempotent; failures on the wire are ignored.
    fn disconnect(&mut self);
}

/// Establishes links to one kind of controller.
pub trait PlcConnector: Send + Sync {
    /// Returns the driver's identifier.
    fn driver_name(&self) -> &'static str;

    /// Open a link to the controller at `endpoint`.
    ///
    /// # Errors
    /// Returns `ConnectError` on network or handshake failure.
    fn connect(&self, endpoint: &PlcEndpoint) -> Result<Box<dyn PlcLink>, ConnectError>;
}

/// Factory function type for creating connector instances.
pub type ConnectorFactory = fn() -> Box<dyn PlcConnector>;
