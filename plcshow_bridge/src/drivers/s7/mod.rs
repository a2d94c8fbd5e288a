//! Siemens S7 driver (ISO-on-TCP).
//!
//! Opens a PG connection to the CPU at rack/slot, negotiates the PDU size and
//! serves block reads and writes against data blocks. A transport failure
//! closes the socket: the link then reports `Disconnected` until the
//! operator reconnects, since a late answer on a half-read socket would
//! otherwise be matched against the next request.

pub mod protocol;

use plcshow_common::link::{ConnectError, LinkIoError, PlcConnector, PlcEndpoint, PlcLink};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use tracing::{debug, info, warn};

use self::protocol::{READ_OVERHEAD, REQUESTED_PDU_LEN, TPKT_HEADER_LEN, WRITE_OVERHEAD};

/// Factory function registered as "s7".
pub fn create_connector() -> Box<dyn PlcConnector> {
    Box::new(S7Connector)
}

/// Connector for S7-300/400/1200/1500 CPUs with PUT/GET access enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct S7Connector;

impl PlcConnector for S7Connector {
    fn driver_name(&self) -> &'static str {
        "s7"
    }

    fn connect(&self, endpoint: &PlcEndpoint) -> Result<Box<dyn PlcLink>, ConnectError> {
        let link = S7Link::open(endpoint)?;
        Ok(Box::new(link))
    }
}

/// Established S7 connection.
pub struct S7Link {
    /// Socket, `None` once closed
    stream: Option<TcpStream>,
    /// Negotiated PDU length
    pdu_len: u16,
    /// Next request reference
    pdu_ref: u16,
}

fn network(e: std::io::Error) -> ConnectError {
    ConnectError::Network(e.to_string())
}

fn recv_frame(stream: &mut TcpStream) -> std::io::Result<Result<Vec<u8>, String>> {
    let mut header = [0u8; TPKT_HEADER_LEN];
    stream.read_exact(&mut header)?;
    let len = match protocol::tpkt_length(&header) {
        Ok(len) => len,
        Err(e) => return Ok(Err(e)),
    };
    let mut frame = vec![0u8; len];
    frame[..TPKT_HEADER_LEN].copy_from_slice(&header);
    stream.read_exact(&mut frame[TPKT_HEADER_LEN..])?;
    Ok(Ok(frame))
}

impl S7Link {
    /// Connect, run the COTP handshake and negotiate the PDU size.
    pub fn open(endpoint: &PlcEndpoint) -> Result<Self, ConnectError> {
        let addr = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(network)?
            .next()
            .ok_or_else(|| {
                ConnectError::Network(format!("no address for {}", endpoint.host))
            })?;

        let mut stream =
            TcpStream::connect_timeout(&addr, endpoint.connect_timeout).map_err(network)?;
        stream
            .set_read_timeout(Some(endpoint.io_timeout))
            .map_err(network)?;
        stream
            .set_write_timeout(Some(endpoint.io_timeout))
            .map_err(network)?;
        stream.set_nodelay(true).map_err(network)?;

        stream
            .write_all(&protocol::connection_request(endpoint.rack, endpoint.slot))
            .map_err(network)?;
        let confirm = recv_frame(&mut stream)
            .map_err(network)?
            .map_err(ConnectError::Protocol)?;
        protocol::parse_connection_confirm(&confirm).map_err(ConnectError::Protocol)?;
        debug!("COTP connection confirmed by {}", addr);

        let mut link = Self {
            stream: Some(stream),
            pdu_len: REQUESTED_PDU_LEN,
            pdu_ref: 1,
        };
        let request = protocol::setup_communication(link.next_ref(), REQUESTED_PDU_LEN);
        let response = link.exchange(&request).map_err(|e| match e {
            LinkIoError::Transport(msg) => ConnectError::Network(msg),
            other => ConnectError::Protocol(other.to_string()),
        })?;
        let negotiated = protocol::parse_setup_response(&response)
            .map_err(|e| ConnectError::Protocol(e.to_string()))?;
        if negotiated <= WRITE_OVERHEAD {
            return Err(ConnectError::Protocol(format!(
                "negotiated PDU length {negotiated} is too small"
            )));
        }
        link.pdu_len = negotiated.min(REQUESTED_PDU_LEN);

        info!(
            "S7 session established with {} (PDU {} bytes)",
            addr, link.pdu_len
        );
        Ok(link)
    }

    /// Negotiated PDU length.
    pub fn pdu_len(&self) -> u16 {
        self.pdu_len
    }

    fn next_ref(&mut self) -> u16 {
        let r = self.pdu_ref;
        self.pdu_ref = self.pdu_ref.wrapping_add(1).max(1);
        r
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Send one request and wait for its answer.
    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, LinkIoError> {
        let stream = self.stream.as_mut().ok_or(LinkIoError::Disconnected)?;

        let result = stream
            .write_all(request)
            .and_then(|_| recv_frame(stream));
        match result {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(msg)) => {
                warn!("S7 framing error ({}), closing socket", msg);
                self.close();
                Err(LinkIoError::Protocol(msg))
            }
            Err(e) => {
                warn!("S7 transport error ({}), closing socket", e);
                self.close();
                Err(LinkIoError::Transport(e.to_string()))
            }
        }
    }

    fn read_chunk(&mut self, db: u16, offset: u16, count: u16) -> Result<Vec<u8>, LinkIoError> {
        let request = protocol::read_request(self.next_ref(), db, offset, count);
        let frame = self.exchange(&request)?;
        protocol::parse_read_response(&frame, usize::from(count))
    }

    fn write_chunk(&mut self, db: u16, offset: u16, data: &[u8]) -> Result<(), LinkIoError> {
        let request = protocol::write_request(self.next_ref(), db, offset, data);
        let frame = self.exchange(&request)?;
        protocol::parse_write_response(&frame)
    }
}

impl PlcLink for S7Link {
    fn driver_name(&self) -> &'static str {
        "s7"
    }

    fn read_bytes(&mut self, block: u16, offset: u16, count: u16) -> Result<Vec<u8>, LinkIoError> {
        let max_chunk = self.pdu_len - READ_OVERHEAD;
        let mut out = Vec::with_capacity(usize::from(count));
        let mut done: u16 = 0;
        while done < count {
            let chunk = (count - done).min(max_chunk);
            let start = offset.checked_add(done).ok_or(LinkIoError::OutOfRange {
                block,
                offset,
                len: usize::from(count),
            })?;
            out.extend(self.read_chunk(block, start, chunk)?);
            done += chunk;
        }
        Ok(out)
    }

    fn write_bytes(&mut self, block: u16, offset: u16, data: &[u8]) -> Result<(), LinkIoError> {
        let max_chunk = usize::from(self.pdu_len - WRITE_OVERHEAD);
        for (i, chunk) in data.chunks(max_chunk).enumerate() {
            let start = u16::try_from(usize::from(offset) + i * max_chunk).map_err(|_| {
                LinkIoError::OutOfRange {
                    block,
                    offset,
                    len: data.len(),
                }
            })?;
            self.write_chunk(block, start, chunk)?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn disconnect(&mut self) {
        self.close();
    }
}

impl Drop for S7Link {
    fn drop(&mut self) {
        self.close();
    }
}
