//! Simulated PLC driver.
//!
//! An in-memory set of data blocks shared between the link handed to the
//! session and the operator (or test) holding a [`SimulatedPlc`] clone.
//! Requests raised here travel through the same poll, edge detection and
//! feedback path as requests from a real controller.

use parking_lot::Mutex;
use plcshow_common::bits::ControlBits;
use plcshow_common::consts::SIM_BLOCK_LEN;
use plcshow_common::link::{ConnectError, LinkIoError, PlcConnector, PlcEndpoint, PlcLink};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// One write observed by the simulated controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    /// Target block
    pub block: u16,
    /// Start offset
    pub offset: u16,
    /// Bytes written
    pub data: Vec<u8>,
    /// When the write landed
    pub at: Instant,
}

#[derive(Debug, Default)]
struct SimState {
    /// Data blocks, created zeroed on first access
    blocks: HashMap<u16, Vec<u8>>,
    /// Fault injection: reject connects
    refuse_connect: bool,
    /// Fault injection: fail reads
    fail_reads: bool,
    /// Fault injection: fail writes
    fail_writes: bool,
    /// Every successful write, in order
    writes: Vec<WriteRecord>,
    /// Successful reads
    read_count: u64,
    /// Links opened so far
    connect_count: u64,
    /// Bumped by `drop_links`; links opened before the bump are dead
    generation: u64,
}

impl SimState {
    fn block_mut(&mut self, block: u16) -> &mut Vec<u8> {
        self.blocks
            .entry(block)
            .or_insert_with(|| vec![0; SIM_BLOCK_LEN])
    }
}

fn check_range(block: u16, offset: u16, len: usize) -> Result<std::ops::Range<usize>, LinkIoError> {
    let start = usize::from(offset);
    let end = start + len;
    if end > SIM_BLOCK_LEN {
        return Err(LinkIoError::OutOfRange { block, offset, len });
    }
    Ok(start..end)
}

/// Handle to a simulated controller. Clones share the same memory.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPlc {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedPlc {
    /// Create a controller with all blocks zeroed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write bytes directly into a block, as the PLC program would.
    ///
    /// # Panics
    /// Panics if the range lies outside the simulated block.
    pub fn poke(&self, block: u16, offset: u16, data: &[u8]) {
        let start = usize::from(offset);
        let mut state = self.state.lock();
        state.block_mut(block)[start..start + data.len()].copy_from_slice(data);
    }

    /// Read bytes directly from a block.
    pub fn peek(&self, block: u16, offset: u16, len: usize) -> Vec<u8> {
        let start = usize::from(offset);
        let mut state = self.state.lock();
        state.block_mut(block)[start..start + len].to_vec()
    }

    /// Raise request bits in the control byte at `offset`.
    pub fn raise(&self, block: u16, offset: u16, bits: ControlBits) {
        let mut state = self.state.lock();
        state.block_mut(block)[usize::from(offset)] |= bits.bits();
    }

    /// Lower request bits in the control byte at `offset`.
    pub fn lower(&self, block: u16, offset: u16, bits: ControlBits) {
        let mut state = self.state.lock();
        state.block_mut(block)[usize::from(offset)] &= !bits.bits();
    }

    /// Reject every subsequent connect attempt.
    pub fn set_refuse_connect(&self, refuse: bool) {
        self.state.lock().refuse_connect = refuse;
    }

    /// Fail every subsequent read on open links.
    pub fn set_fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    /// Fail every subsequent write on open links.
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Drop every open link as a lost connection would. Each link fails its
    /// next request with a transport error and reports itself closed.
    pub fn drop_links(&self) {
        self.state.lock().generation += 1;
    }

    /// All writes so far.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().writes.clone()
    }

    /// Number of successful reads.
    pub fn read_count(&self) -> u64 {
        self.state.lock().read_count
    }

    /// Number of links opened.
    pub fn connect_count(&self) -> u64 {
        self.state.lock().connect_count
    }
}

impl PlcConnector for SimulatedPlc {
    fn driver_name(&self) -> &'static str {
        "simulation"
    }

    fn connect(&self, endpoint: &PlcEndpoint) -> Result<Box<dyn PlcLink>, ConnectError> {
        let mut state = self.state.lock();
        if state.refuse_connect {
            return Err(ConnectError::Refused(format!(
                "simulated controller at {} refused the connection",
                endpoint.host
            )));
        }
        state.connect_count += 1;
        debug!("Simulated link #{} opened", state.connect_count);
        Ok(Box::new(SimulatedLink {
            plc: self.clone(),
            open: true,
            generation: state.generation,
        }))
    }
}

/// Link returned by [`SimulatedPlc::connect`].
struct SimulatedLink {
    plc: SimulatedPlc,
    open: bool,
    generation: u64,
}

impl PlcLink for SimulatedLink {
    fn driver_name(&self) -> &'static str {
        "simulation"
    }

    fn read_bytes(&mut self, block: u16, offset: u16, count: u16) -> Result<Vec<u8>, LinkIoError> {
        if !self.open {
            return Err(LinkIoError::Disconnected);
        }
        let range = check_range(block, offset, usize::from(count))?;
        let mut state = self.plc.state.lock();
        if state.generation != self.generation {
            self.open = false;
            return Err(LinkIoError::Transport("simulated connection drop".to_string()));
        }
        if state.fail_reads {
            return Err(LinkIoError::Transport("simulated read failure".to_string()));
        }
        state.read_count += 1;
        let bytes = state.block_mut(block)[range].to_vec();
        trace!("SIM read DB{}.{} -> {:02X?}", block, offset, bytes);
        Ok(bytes)
    }

    fn write_bytes(&mut self, block: u16, offset: u16, data: &[u8]) -> Result<(), LinkIoError> {
        if !self.open {
            return Err(LinkIoError::Disconnected);
        }
        let range = check_range(block, offset, data.len())?;
        let mut state = self.plc.state.lock();
        if state.generation != self.generation {
            self.open = false;
            return Err(LinkIoError::Transport("simulated connection drop".to_string()));
        }
        if state.fail_writes {
            return Err(LinkIoError::Transport("simulated write failure".to_string()));
        }
        state.block_mut(block)[range].copy_from_slice(data);
        state.writes.push(WriteRecord {
            block,
            offset,
            data: data.to_vec(),
            at: Instant::now(),
        });
        trace!("SIM write DB{}.{} <- {:02X?}", block, offset, data);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn disconnect(&mut self) {
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plcshow_common::config::PlcConfig;

    fn link(plc: &SimulatedPlc) -> Box<dyn PlcLink> {
        plc.connect(&PlcConfig::default().endpoint()).expect("connect")
    }

    #[test]
    fn test_read_write_roundtrip_through_link() {
        let plc = SimulatedPlc::new();
        let mut link = link(&plc);
        link.write_bytes(3, 10, &[0xAA, 0xBB]).unwrap();
        assert_eq!(link.read_bytes(3, 10, 2).unwrap(), vec![0xAA, 0xBB]);
        assert_eq!(plc.peek(3, 10, 2), vec![0xAA, 0xBB]);
        assert_eq!(plc.writes().len(), 1);
        assert_eq!(plc.read_count(), 1);
    }

    #[test]
    fn test_raise_and_lower_bits() {
        let plc = SimulatedPlc::new();
        plc.raise(1, 0, ControlBits::START | ControlBits::ADVANCE);
        assert_eq!(plc.peek(1, 0, 1), vec![0b11]);
        plc.lower(1, 0, ControlBits::START);
        assert_eq!(plc.peek(1, 0, 1), vec![0b10]);
    }

    #[test]
    fn test_out_of_range() {
        let plc = SimulatedPlc::new();
        let mut link = link(&plc);
        let err = link.read_bytes(1, SIM_BLOCK_LEN as u16 - 1, 2).unwrap_err();
        assert!(matches!(err, LinkIoError::OutOfRange { .. }));
    }

    #[test]
    fn test_fault_injection() {
        let plc = SimulatedPlc::new();
        let mut link = link(&plc);
        plc.set_fail_reads(true);
        assert!(matches!(
            link.read_bytes(1, 0, 2),
            Err(LinkIoError::Transport(_))
        ));
        plc.set_fail_reads(false);
        plc.set_fail_writes(true);
        assert!(link.write_bytes(1, 2, &[1]).is_err());
        assert!(plc.writes().is_empty());
    }

    #[test]
    fn test_closed_link_fails() {
        let plc = SimulatedPlc::new();
        let mut link = link(&plc);
        link.disconnect();
        link.disconnect();
        assert_eq!(link.read_bytes(1, 0, 1), Err(LinkIoError::Disconnected));
    }

    #[test]
    fn test_dropped_link_closes_itself() {
        let plc = SimulatedPlc::new();
        let mut old = link(&plc);
        plc.drop_links();
        let mut fresh = link(&plc);

        assert!(old.is_open());
        assert!(matches!(old.read_bytes(1, 0, 1), Err(LinkIoError::Transport(_))));
        assert!(!old.is_open());
        assert_eq!(old.write_bytes(1, 0, &[1]), Err(LinkIoError::Disconnected));
        assert!(fresh.read_bytes(1, 0, 1).is_ok());
    }
}
