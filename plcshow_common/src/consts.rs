//! Bridge-wide constants.
//!
//! Block layout and timing defaults shared by the polling core, the drivers
//! and the configuration loader.

/// Canonical service name (used for logging and the default config).
pub const SERVICE_NAME: &str = "plcshow";

/// Default configuration file name, resolved against the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "plcshow.toml";

/// Default PLC address.
pub const DEFAULT_PLC_HOST: &str = "192.168.1.100";

/// ISO-on-TCP port used by S7 controllers.
pub const DEFAULT_S7_PORT: u16 = 102;

/// Default rack of the CPU.
pub const DEFAULT_RACK: u16 = 0;

/// Default slot of the CPU.
pub const DEFAULT_SLOT: u16 = 1;

/// Default data block holding the control, index and feedback bytes.
pub const DEFAULT_DB_NUMBER: u16 = 1;

/// Byte offset of the control byte. The index byte follows it.
pub const DEFAULT_CONTROL_OFFSET: u16 = 0;

/// Byte offset of the feedback byte.
pub const DEFAULT_FEEDBACK_OFFSET: u16 = 2;

/// Number of bytes read per poll: control byte + index byte.
pub const POLL_READ_LEN: u16 = 2;

/// Poll period between ticks (ms).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Sleep while the link is down (ms).
pub const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 200;

/// Width of the advance acknowledge pulse (ms).
pub const DEFAULT_FEEDBACK_PULSE_MS: u64 = 200;

/// TCP connect timeout for network drivers (ms).
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;

/// Read/write timeout for network drivers (ms).
pub const DEFAULT_IO_TIMEOUT_MS: u64 = 1000;

/// Size of the simulated data block in bytes.
pub const SIM_BLOCK_LEN: usize = 64;
