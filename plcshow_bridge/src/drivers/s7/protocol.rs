//! S7comm frame encoding and decoding.
//!
//! Frames are TPKT (RFC 1006) packets carrying a COTP (ISO 8073) TPDU. After
//! the connection request/confirm exchange every request is a COTP data
//! TPDU wrapping an S7 PDU:
//!
//! ```text
//! ┌──────────┬───────────┬──────────────────┬────────────┬──────────┐
//! │ TPKT (4) │ COTP DT(3)│ S7 header (10/12)│ parameters │   data   │
//! └──────────┴───────────┴──────────────────┴────────────┴──────────┘
//! ```
//!
//! Only what the bridge needs is implemented: setup communication and
//! single-item read/write of bytes in a data block.

use plcshow_common::link::LinkIoError;

/// TPKT version byte.
pub const TPKT_VERSION: u8 = 0x03;
/// TPKT header length.
pub const TPKT_HEADER_LEN: usize = 4;
/// COTP data TPDU header: length, type, EOT/number.
pub const COTP_DT: [u8; 3] = [0x02, 0xF0, 0x80];
/// COTP connection request TPDU type.
pub const COTP_CR: u8 = 0xE0;
/// COTP connection confirm TPDU type.
pub const COTP_CC: u8 = 0xD0;
/// Largest frame accepted from the wire.
pub const MAX_FRAME_LEN: usize = 4096;

/// S7 protocol id.
pub const S7_PROTOCOL_ID: u8 = 0x32;
/// PDU type: job request.
pub const ROSCTR_JOB: u8 = 0x01;
/// PDU type: acknowledge with data.
pub const ROSCTR_ACK_DATA: u8 = 0x03;

/// Function: setup communication.
pub const FN_SETUP_COMM: u8 = 0xF0;
/// Function: read variable.
pub const FN_READ_VAR: u8 = 0x04;
/// Function: write variable.
pub const FN_WRITE_VAR: u8 = 0x05;

/// Memory area: data blocks.
pub const AREA_DB: u8 = 0x84;
/// Request transport size: byte.
pub const TS_BYTE: u8 = 0x02;
/// Data transport size: byte/word/dword, length given in bits.
pub const DATA_TS_BITS: u8 = 0x04;
/// Data transport size: octet string, length given in bytes.
pub const DATA_TS_OCTETS: u8 = 0x09;
/// Item return code: success.
pub const RETURN_SUCCESS: u8 = 0xFF;

/// PDU length requested during setup.
pub const REQUESTED_PDU_LEN: u16 = 480;
/// Read response bytes around the payload: header, params, item header.
pub const READ_OVERHEAD: u16 = 18;
/// Write request bytes around the payload: header, params, data header.
pub const WRITE_OVERHEAD: u16 = 28;

/// Offset of the S7 header inside a frame.
const S7_START: usize = TPKT_HEADER_LEN + COTP_DT.len();
/// Ack-data header length (job header plus error class/code).
const ACK_HEADER_LEN: usize = 12;

/// Wrap a TPDU in a TPKT header.
fn tpkt(tpdu: &[u8]) -> Vec<u8> {
    let total = (TPKT_HEADER_LEN + tpdu.len()) as u16;
    let mut frame = Vec::with_capacity(usize::from(total));
    frame.extend_from_slice(&[TPKT_VERSION, 0x00]);
    frame.extend_from_slice(&total.to_be_bytes());
    frame.extend_from_slice(tpdu);
    frame
}

/// Build a job frame around the given parameters and data.
fn job(pdu_ref: u16, params: &[u8], data: &[u8]) -> Vec<u8> {
    let mut tpdu = Vec::with_capacity(COTP_DT.len() + 10 + params.len() + data.len());
    tpdu.extend_from_slice(&COTP_DT);
    tpdu.extend_from_slice(&[S7_PROTOCOL_ID, ROSCTR_JOB, 0x00, 0x00]);
    tpdu.extend_from_slice(&pdu_ref.to_be_bytes());
    tpdu.extend_from_slice(&(params.len() as u16).to_be_bytes());
    tpdu.extend_from_slice(&(data.len() as u16).to_be_bytes());
    tpdu.extend_from_slice(params);
    tpdu.extend_from_slice(data);
    tpkt(&tpdu)
}

/// Item specification addressing `count` bytes at `offset` in `db`.
fn db_item(db: u16, offset: u16, count: u16) -> [u8; 12] {
    let bit_address = u32::from(offset) * 8;
    let [_, a2, a1, a0] = bit_address.to_be_bytes();
    let [c_hi, c_lo] = count.to_be_bytes();
    let [d_hi, d_lo] = db.to_be_bytes();
    [
        0x12, 0x0A, 0x10, TS_BYTE, c_hi, c_lo, d_hi, d_lo, AREA_DB, a2, a1, a0,
    ]
}

/// Total frame length announced by a TPKT header.
pub fn tpkt_length(header: &[u8; TPKT_HEADER_LEN]) -> Result<usize, String> {
    if header[0] != TPKT_VERSION {
        return Err(format!("bad TPKT version 0x{:02X}", header[0]));
    }
    let len = usize::from(u16::from_be_bytes([header[2], header[3]]));
    if !(TPKT_HEADER_LEN + 3..=MAX_FRAME_LEN).contains(&len) {
        return Err(format!("bad TPKT length {len}"));
    }
    Ok(len)
}

/// COTP connection request for a PG connection to `rack`/`slot`.
pub fn connection_request(rack: u16, slot: u16) -> Vec<u8> {
    let remote_tsap_lo = ((rack * 0x20 + slot) & 0xFF) as u8;
    let body = [
        COTP_CR, 0x00, 0x00, // destination reference
        0x00, 0x01, // source reference
        0x00, // class 0
        0xC0, 0x01, 0x0A, // TPDU size 1024
        0xC1, 0x02, 0x01, 0x00, // local TSAP
        0xC2, 0x02, 0x01, remote_tsap_lo, // remote TSAP
    ];
    let mut tpdu = Vec::with_capacity(body.len() + 1);
    tpdu.push(body.len() as u8);
    tpdu.extend_from_slice(&body);
    tpkt(&tpdu)
}

/// Check a connection confirm frame.
pub fn parse_connection_confirm(frame: &[u8]) -> Result<(), String> {
    match frame.get(TPKT_HEADER_LEN + 1) {
        Some(&COTP_CC) => Ok(()),
        Some(other) => Err(format!("expected COTP connection confirm, got 0x{other:02X}")),
        None => Err("truncated connection confirm".to_string()),
    }
}

/// Setup-communication job requesting `pdu_len`.
pub fn setup_communication(pdu_ref: u16, pdu_len: u16) -> Vec<u8> {
    let [p_hi, p_lo] = pdu_len.to_be_bytes();
    job(
        pdu_ref,
        &[FN_SETUP_COMM, 0x00, 0x00, 0x01, 0x00, 0x01, p_hi, p_lo],
        &[],
    )
}

/// Read-variable job for `count` bytes of `db` at `offset`.
pub fn read_request(pdu_ref: u16, db: u16, offset: u16, count: u16) -> Vec<u8> {
    let mut params = vec![FN_READ_VAR, 0x01];
    params.extend_from_slice(&db_item(db, offset, count));
    job(pdu_ref, &params, &[])
}

/// Write-variable job putting `data` into `db` at `offset`.
pub fn write_request(pdu_ref: u16, db: u16, offset: u16, data: &[u8]) -> Vec<u8> {
    let count = data.len() as u16;
    let mut params = vec![FN_WRITE_VAR, 0x01];
    params.extend_from_slice(&db_item(db, offset, count));

    let mut payload = vec![0x00, DATA_TS_BITS];
    payload.extend_from_slice(&(count * 8).to_be_bytes());
    payload.extend_from_slice(data);
    job(pdu_ref, &params, &payload)
}

/// Decoded ack-data PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckData<'a> {
    /// Echoed request reference
    pub pdu_ref: u16,
    /// Parameter block
    pub params: &'a [u8],
    /// Data block
    pub data: &'a [u8],
}

/// Split an ack-data frame into its parameter and data blocks.
pub fn parse_ack(frame: &[u8]) -> Result<AckData<'_>, LinkIoError> {
    let proto = |msg: String| LinkIoError::Protocol(msg);

    let header = frame
        .get(S7_START..S7_START + ACK_HEADER_LEN)
        .ok_or_else(|| proto(format!("frame too short ({} bytes)", frame.len())))?;
    if header[0] != S7_PROTOCOL_ID {
        return Err(proto(format!("bad protocol id 0x{:02X}", header[0])));
    }
    if header[1] != ROSCTR_ACK_DATA {
        return Err(proto(format!("unexpected PDU type 0x{:02X}", header[1])));
    }
    let (error_class, error_code) = (header[10], header[11]);
    if error_class != 0 || error_code != 0 {
        return Err(proto(format!(
            "controller error class 0x{error_class:02X} code 0x{error_code:02X}"
        )));
    }

    let pdu_ref = u16::from_be_bytes([header[4], header[5]]);
    let param_len = usize::from(u16::from_be_bytes([header[6], header[7]]));
    let data_len = usize::from(u16::from_be_bytes([header[8], header[9]]));
    let params_start = S7_START + ACK_HEADER_LEN;
    let data_start = params_start + param_len;

    let params = frame
        .get(params_start..data_start)
        .ok_or_else(|| proto("truncated parameter block".to_string()))?;
    let data = frame
        .get(data_start..data_start + data_len)
        .ok_or_else(|| proto("truncated data block".to_string()))?;

    Ok(AckData {
        pdu_ref,
        params,
        data,
    })
}

/// Negotiated PDU length from a setup-communication response.
pub fn parse_setup_response(frame: &[u8]) -> Result<u16, LinkIoError> {
    let ack = parse_ack(frame)?;
    match ack.params {
        [FN_SETUP_COMM, _, _, _, _, _, hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(LinkIoError::Protocol(
            "malformed setup communication response".to_string(),
        )),
    }
}

fn check_item_code(code: u8) -> Result<(), LinkIoError> {
    if code == RETURN_SUCCESS {
        Ok(())
    } else {
        Err(LinkIoError::Protocol(format!(
            "item return code 0x{code:02X}"
        )))
    }
}

/// Payload of a read-variable response; must be exactly `expected` bytes.
pub fn parse_read_response(frame: &[u8], expected: usize) -> Result<Vec<u8>, LinkIoError> {
    let ack = parse_ack(frame)?;
    if ack.params.first() != Some(&FN_READ_VAR) {
        return Err(LinkIoError::Protocol(
            "response is not a read-variable answer".to_string(),
        ));
    }
    let [code, transport, len_hi, len_lo, payload @ ..] = ack.data else {
        return Err(LinkIoError::Protocol("truncated read item".to_string()));
    };
    check_item_code(*code)?;

    let raw_len = usize::from(u16::from_be_bytes([*len_hi, *len_lo]));
    let len = if *transport == DATA_TS_BITS {
        raw_len / 8
    } else {
        raw_len
    };
    let bytes = payload.get(..len).unwrap_or(payload);
    if bytes.len() != expected {
        return Err(LinkIoError::ShortRead {
            expected,
            got: bytes.len(),
        });
    }
    Ok(bytes.to_vec())
}

/// Check a write-variable response.
pub fn parse_write_response(frame: &[u8]) -> Result<(), LinkIoError> {
    let ack = parse_ack(frame)?;
    if ack.params.first() != Some(&FN_WRITE_VAR) {
        return Err(LinkIoError::Protocol(
            "response is not a write-variable answer".to_string(),
        ));
    }
    match ack.data.first() {
        Some(code) => check_item_code(*code),
        None => Err(LinkIoError::Protocol("missing write item".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(pdu_ref: u16, params: &[u8], data: &[u8]) -> Vec<u8> {
        let mut tpdu = COTP_DT.to_vec();
        tpdu.extend_from_slice(&[S7_PROTOCOL_ID, ROSCTR_ACK_DATA, 0, 0]);
        tpdu.extend_from_slice(&pdu_ref.to_be_bytes());
        tpdu.extend_from_slice(&(params.len() as u16).to_be_bytes());
        tpdu.extend_from_slice(&(data.len() as u16).to_be_bytes());
        tpdu.extend_from_slice(&[0, 0]);
        tpdu.extend_from_slice(params);
        tpdu.extend_from_slice(data);
        tpkt(&tpdu)
    }

    #[test]
    fn test_connection_request_rack0_slot1() {
        let frame = connection_request(0, 1);
        assert_eq!(frame.len(), 22);
        assert_eq!(&frame[..4], &[0x03, 0x00, 0x00, 22]);
        assert_eq!(frame[4], 17);
        assert_eq!(frame[5], COTP_CR);
        assert_eq!(&frame[18..], &[0xC2, 0x02, 0x01, 0x01]);
    }

    #[test]
    fn test_connection_request_rack_offsets_tsap() {
        let frame = connection_request(1, 2);
        assert_eq!(frame[21], 0x22);
    }

    #[test]
    fn test_read_request_layout() {
        let frame = read_request(7, 1, 2, 2);
        assert_eq!(frame.len(), 31);
        assert_eq!(&frame[7..17], &[0x32, 0x01, 0, 0, 0, 7, 0, 14, 0, 0]);
        assert_eq!(
            &frame[17..],
            &[0x04, 0x01, 0x12, 0x0A, 0x10, 0x02, 0, 2, 0, 1, 0x84, 0, 0, 16]
        );
    }

    #[test]
    fn test_write_request_layout() {
        let frame = write_request(9, 1, 2, &[0x04]);
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]) as usize, frame.len());
        assert_eq!(&frame[13..17], &[0, 14, 0, 5]);
        assert_eq!(&frame[31..], &[0x00, 0x04, 0x00, 0x08, 0x04]);
    }

    #[test]
    fn test_tpkt_length_validation() {
        assert_eq!(tpkt_length(&[3, 0, 0, 22]), Ok(22));
        assert!(tpkt_length(&[2, 0, 0, 22]).is_err());
        assert!(tpkt_length(&[3, 0, 0, 2]).is_err());
    }

    #[test]
    fn test_parse_setup_response() {
        let frame = ack(1, &[0xF0, 0, 0, 1, 0, 1, 0x00, 0xF0], &[]);
        assert_eq!(parse_setup_response(&frame), Ok(240));
    }

    #[test]
    fn test_parse_read_response_bits_length() {
        let frame = ack(2, &[0x04, 0x01], &[0xFF, 0x04, 0x00, 0x10, 0x01, 0x05]);
        assert_eq!(parse_read_response(&frame, 2), Ok(vec![0x01, 0x05]));
    }

    #[test]
    fn test_parse_read_response_short() {
        let frame = ack(2, &[0x04, 0x01], &[0xFF, 0x04, 0x00, 0x08, 0x01]);
        assert_eq!(
            parse_read_response(&frame, 2),
            Err(LinkIoError::ShortRead {
                expected: 2,
                got: 1
            })
        );
    }

    #[test]
    fn test_parse_read_response_item_error() {
        let frame = ack(2, &[0x04, 0x01], &[0x0A, 0x00, 0x00, 0x00]);
        assert!(matches!(
            parse_read_response(&frame, 2),
            Err(LinkIoError::Protocol(msg)) if msg.contains("0x0A")
        ));
    }

    #[test]
    fn test_parse_ack_controller_error() {
        let mut frame = ack(2, &[0x04, 0x01], &[]);
        frame[17] = 0x81;
        frame[18] = 0x04;
        assert!(matches!(parse_ack(&frame), Err(LinkIoError::Protocol(_))));
    }

    #[test]
    fn test_parse_write_response() {
        assert_eq!(parse_write_response(&ack(3, &[0x05, 0x01], &[0xFF])), Ok(()));
        assert!(parse_write_response(&ack(3, &[0x05, 0x01], &[0x05])).is_err());
    }
}
