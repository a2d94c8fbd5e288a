//! S7 transport tests against a loopback fake controller.
//!
//! The fake answers the COTP handshake, setup communication (negotiating a
//! small PDU so requests get split) and DB read/write jobs. Unknown data
//! blocks answer with item return code 0x0A.

use parking_lot::Mutex;
use plcshow_bridge::drivers::s7::{S7Connector, S7Link};
use plcshow_bridge::monitor::{MonitorSettings, Poller, TickOutcome};
use plcshow_bridge::session::PlcSession;
use plcshow_bridge::{ControlHandle, ControlMessage, BridgeEvent};
use plcshow_common::config::PlcConfig;
use plcshow_common::link::{ConnectError, LinkIoError, PlcEndpoint, PlcLink};
use plcshow_common::status::{StatusEvent, StatusPublisher};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const PDU: u16 = 64;
const DB: u16 = 1;

/// One job seen by the fake: function, db, offset, byte count.
type Job = (u8, u16, u16, u16);

struct FakeS7 {
    port: u16,
    memory: Arc<Mutex<HashMap<u16, Vec<u8>>>>,
    jobs: Arc<Mutex<Vec<Job>>>,
}

fn read_frame(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).ok()?;
    let len = usize::from(u16::from_be_bytes([header[2], header[3]]));
    let mut frame = vec![0u8; len];
    frame[..4].copy_from_slice(&header);
    stream.read_exact(&mut frame[4..]).ok()?;
    Some(frame)
}

fn tpkt(tpdu: &[u8]) -> Vec<u8> {
    let len = (tpdu.len() + 4) as u16;
    let mut frame = vec![0x03, 0x00];
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(tpdu);
    frame
}

fn ack(pdu_ref: [u8; 2], params: &[u8], data: &[u8]) -> Vec<u8> {
    let mut tpdu = vec![0x02, 0xF0, 0x80, 0x32, 0x03, 0x00, 0x00, pdu_ref[0], pdu_ref[1]];
    tpdu.extend_from_slice(&(params.len() as u16).to_be_bytes());
    tpdu.extend_from_slice(&(data.len() as u16).to_be_bytes());
    tpdu.extend_from_slice(&[0x00, 0x00]);
    tpdu.extend_from_slice(params);
    tpdu.extend_from_slice(data);
    tpkt(&tpdu)
}

impl FakeS7 {
    /// Serve connections one after another. A connection is dropped after
    /// `close_after` jobs, if set.
    fn spawn(close_after: Option<usize>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let memory = Arc::new(Mutex::new(HashMap::from([(DB, vec![0u8; 256])])));
        let jobs = Arc::new(Mutex::new(Vec::new()));

        let (mem, log) = (Arc::clone(&memory), Arc::clone(&jobs));
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { return };
                serve(&mut stream, &mem, &log, close_after);
            }
        });

        Self { port, memory, jobs }
    }

    fn endpoint(&self) -> PlcEndpoint {
        PlcConfig {
            host: "127.0.0.1".to_string(),
            port: self.port,
            connect_timeout_ms: 1000,
            io_timeout_ms: 1000,
            ..PlcConfig::default()
        }
        .endpoint()
    }

    fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().clone()
    }
}

fn serve(
    stream: &mut TcpStream,
    memory: &Mutex<HashMap<u16, Vec<u8>>>,
    jobs: &Mutex<Vec<Job>>,
    close_after: Option<usize>,
) {
    let mut served = 0;
    while let Some(frame) = read_frame(stream) {
        if frame[5] == 0xE0 {
            let confirm = tpkt(&[0x06, 0xD0, 0x00, 0x01, 0x00, 0x01, 0x00]);
            if stream.write_all(&confirm).is_err() {
                return;
            }
            continue;
        }

        let pdu_ref = [frame[11], frame[12]];
        let params = &frame[17..];
        let reply = match params[0] {
            0xF0 => {
                let [hi, lo] = PDU.to_be_bytes();
                ack(pdu_ref, &[0xF0, 0x00, 0x00, 0x01, 0x00, 0x01, hi, lo], &[])
            }
            function @ (0x04 | 0x05) => {
                if close_after.is_some_and(|n| served >= n) {
                    return;
                }
                served += 1;

                let count = u16::from_be_bytes([params[6], params[7]]);
                let db = u16::from_be_bytes([params[8], params[9]]);
                let bit_address = u32::from_be_bytes([0, params[11], params[12], params[13]]);
                let offset = (bit_address / 8) as u16;
                jobs.lock().push((function, db, offset, count));

                let start = usize::from(offset);
                let end = start + usize::from(count);
                let mut memory = memory.lock();
                match (function, memory.get_mut(&db)) {
                    (0x04, Some(block)) => {
                        let mut data = vec![0xFF, 0x04];
                        data.extend_from_slice(&(count * 8).to_be_bytes());
                        data.extend_from_slice(&block[start..end]);
                        ack(pdu_ref, &[0x04, 0x01], &data)
                    }
                    (0x05, Some(block)) => {
                        // Parameter block is 14 bytes; data item header is 4.
                        let payload = &params[14 + 4..14 + 4 + usize::from(count)];
                        block[start..end].copy_from_slice(payload);
                        ack(pdu_ref, &[0x05, 0x01], &[0xFF])
                    }
                    (_, None) => ack(pdu_ref, &[function, 0x01], &[0x0A, 0x00, 0x00, 0x00]),
                    _ => unreachable!(),
                }
            }
            _ => return,
        };
        if stream.write_all(&reply).is_err() {
            return;
        }
    }
}

#[test]
fn test_open_negotiates_pdu() {
    let fake = FakeS7::spawn(None);
    let link = S7Link::open(&fake.endpoint()).expect("open");
    assert_eq!(link.pdu_len(), PDU);
}

#[test]
fn test_large_read_and_write_are_split() {
    let fake = FakeS7::spawn(None);
    let mut link = S7Link::open(&fake.endpoint()).expect("open");

    let pattern: Vec<u8> = (0..100u8).collect();
    link.write_bytes(DB, 10, &pattern).expect("write");
    assert_eq!(&fake.memory.lock()[&DB][10..110], pattern.as_slice());

    let read = link.read_bytes(DB, 10, 100).expect("read");
    assert_eq!(read, pattern);

    // Writes carry at most PDU - 28 bytes, reads PDU - 18.
    assert_eq!(
        fake.jobs(),
        vec![
            (0x05, DB, 10, 36),
            (0x05, DB, 46, 36),
            (0x05, DB, 82, 28),
            (0x04, DB, 10, 46),
            (0x04, DB, 56, 46),
            (0x04, DB, 102, 8),
        ]
    );
}

#[test]
fn test_unknown_block_is_protocol_error() {
    let fake = FakeS7::spawn(None);
    let mut link = S7Link::open(&fake.endpoint()).expect("open");

    assert!(matches!(
        link.read_bytes(99, 0, 2),
        Err(LinkIoError::Protocol(msg)) if msg.contains("0x0A")
    ));
    // The socket stays usable after an item error.
    assert_eq!(link.read_bytes(DB, 0, 2), Ok(vec![0, 0]));
}

#[test]
fn test_dropped_connection_disconnects_link() {
    let fake = FakeS7::spawn(Some(1));
    let mut link = S7Link::open(&fake.endpoint()).expect("open");

    assert!(link.read_bytes(DB, 0, 2).is_ok());
    assert!(matches!(
        link.read_bytes(DB, 0, 2),
        Err(LinkIoError::Transport(_))
    ));
    assert_eq!(link.read_bytes(DB, 0, 2), Err(LinkIoError::Disconnected));
}

#[test]
fn test_connect_refused() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let endpoint = PlcConfig {
        host: "127.0.0.1".to_string(),
        port,
        ..PlcConfig::default()
    }
    .endpoint();
    assert!(matches!(
        S7Link::open(&endpoint),
        Err(ConnectError::Network(_))
    ));
}

#[test]
fn test_poller_over_s7() {
    let fake = FakeS7::spawn(None);
    let session = Arc::new(PlcSession::new(Box::new(S7Connector), StatusPublisher::disabled()));
    session.connect(&fake.endpoint()).expect("connect");

    let (control, control_rx) = ControlHandle::channel();
    let settings = MonitorSettings {
        block: DB,
        control_offset: 0,
        feedback_offset: 2,
        poll_interval: Duration::from_millis(100),
        reconnect_backoff: Duration::from_millis(200),
        feedback_pulse: Duration::from_millis(200),
    };
    let mut poller = Poller::new(Arc::clone(&session), control, StatusPublisher::disabled(), settings);
    let t0 = Instant::now();

    fake.memory.lock().get_mut(&DB).unwrap()[..2].copy_from_slice(&[0b10, 3]);
    assert!(matches!(poller.poll_once(t0), TickOutcome::Polled(_)));
    assert_eq!(
        control_rx.try_recv(),
        Ok(ControlMessage::Event(BridgeEvent::AdvanceRequested))
    );
    assert_eq!(fake.memory.lock()[&DB][2], 0b100);

    poller.poll_once(t0 + Duration::from_millis(200));
    assert_eq!(fake.memory.lock()[&DB][2], 0);

    session.disconnect();
    assert_eq!(poller.poll_once(t0), TickOutcome::Disconnected);
}

#[test]
fn test_lost_socket_releases_session() {
    let fake = FakeS7::spawn(Some(1));
    let (status, status_rx) = StatusPublisher::channel();
    let session = Arc::new(PlcSession::new(Box::new(S7Connector), status));
    session.connect(&fake.endpoint()).expect("connect");

    let (control, _control_rx) = ControlHandle::channel();
    let settings = MonitorSettings {
        block: DB,
        control_offset: 0,
        feedback_offset: 2,
        poll_interval: Duration::from_millis(100),
        reconnect_backoff: Duration::from_millis(200),
        feedback_pulse: Duration::from_millis(200),
    };
    let mut poller = Poller::new(Arc::clone(&session), control, StatusPublisher::disabled(), settings);
    let t0 = Instant::now();

    assert!(matches!(poller.poll_once(t0), TickOutcome::Polled(_)));
    assert_eq!(poller.poll_once(t0), TickOutcome::ReadFailed);
    assert!(!session.is_connected());
    assert_eq!(poller.poll_once(t0), TickOutcome::Disconnected);

    let events: Vec<_> = status_rx.try_iter().collect();
    assert_eq!(
        events,
        vec![
            StatusEvent::Connected { driver: "s7" },
            StatusEvent::Disconnected,
        ]
    );

    // The fake serves the next connection afresh.
    session.connect(&fake.endpoint()).expect("reconnect");
    assert!(matches!(poller.poll_once(t0), TickOutcome::Polled(_)));
}
