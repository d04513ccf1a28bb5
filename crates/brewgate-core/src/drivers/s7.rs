//! S7 data-block access over ISO-on-TCP (TPKT + COTP).
//!
//! Session setup is the usual two round trips: COTP connection request, then
//! S7 "setup communication". After that, read-var and write-var jobs address
//! `DB<n>` by byte offset. Values are big-endian.

use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::session::{dial, within};
use crate::domain::{DeviceKind, DriverError};

const TPKT_LEN: usize = 4;
const COTP_DATA: [u8; 3] = [0x02, 0xF0, 0x80];
const COTP_CONNECT_CONFIRM: u8 = 0xD0;
const S7_PROTOCOL_ID: u8 = 0x32;
const ROSCTR_JOB: u8 = 0x01;
const ROSCTR_ACK_DATA: u8 = 0x03;
const FN_READ_VAR: u8 = 0x04;
const FN_WRITE_VAR: u8 = 0x05;
const AREA_DB: u8 = 0x84;
const TRANSPORT_BYTE: u8 = 0x02;
const RETURN_OK: u8 = 0xFF;
/// TPKT + COTP + 12-byte ack-data header + 2 bytes of function params.
const DATA_START: usize = TPKT_LEN + 3 + 12 + 2;

/// An open data-block session.
#[async_trait]
pub trait BlockBus: Send {
    async fn read_bytes(&mut self, db: u16, offset: u32, len: u16) -> Result<Vec<u8>, DriverError>;

    async fn write_bytes(&mut self, db: u16, offset: u32, data: &[u8]) -> Result<(), DriverError>;

    async fn read_i16(&mut self, db: u16, offset: u32) -> Result<i16, DriverError> {
        let bytes = self.read_bytes(db, offset, 2).await?;
        match bytes.as_slice() {
            &[hi, lo] => Ok(i16::from_be_bytes([hi, lo])),
            _ => Err(bad(format!("expected 2 bytes at DB{db}.{offset}, got {}", bytes.len()))),
        }
    }

    async fn write_i16(&mut self, db: u16, offset: u32, value: i16) -> Result<(), DriverError> {
        self.write_bytes(db, offset, &value.to_be_bytes()).await
    }
}

/// Opens data-block sessions.
#[async_trait]
pub trait BlockLink: Send + Sync {
    async fn open(&self) -> Result<Box<dyn BlockBus>, DriverError>;
}

#[derive(Debug, Clone)]
pub struct S7TcpLink {
    addr: String,
    rack: u8,
    slot: u8,
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl S7TcpLink {
    pub fn new(addr: impl Into<String>, rack: u8, slot: u8) -> Self {
        Self {
            addr: addr.into(),
            rack,
            slot,
            connect_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, response: Duration) -> Self {
        self.connect_timeout = connect;
        self.response_timeout = response;
        self
    }
}

#[async_trait]
impl BlockLink for S7TcpLink {
    async fn open(&self) -> Result<Box<dyn BlockBus>, DriverError> {
        let tsap = remote_tsap(self.rack, self.slot)?;
        let stream = dial(DeviceKind::IceMaker, &self.addr, self.connect_timeout).await?;
        let mut client = S7Client {
            stream,
            next_ref: 1,
            response_timeout: self.response_timeout,
        };
        client.handshake(tsap).await?;
        tracing::debug!(addr = %self.addr, rack = self.rack, slot = self.slot, "s7 session opened");
        Ok(Box::new(client))
    }
}

struct S7Client {
    stream: TcpStream,
    next_ref: u16,
    response_timeout: Duration,
}

impl S7Client {
    async fn handshake(&mut self, tsap: u8) -> Result<(), DriverError> {
        let reply = self.round_trip(&connection_request(tsap)).await?;
        if reply.get(5) != Some(&COTP_CONNECT_CONFIRM) {
            return Err(bad(format!("COTP connect refused: {reply:02x?}")));
        }

        let pdu_ref = self.take_ref();
        let reply = self.round_trip(&setup_communication(pdu_ref)).await?;
        check_ack(&reply)?;
        Ok(())
    }

    fn take_ref(&mut self) -> u16 {
        let current = self.next_ref;
        self.next_ref = self.next_ref.wrapping_add(1).max(1);
        current
    }

    /// Send one TPKT frame and read the next one back.
    async fn round_trip(&mut self, frame: &[u8]) -> Result<Vec<u8>, DriverError> {
        let stream = &mut self.stream;
        within(self.response_timeout, async move {
            stream.write_all(frame).await?;
            let mut header = [0u8; TPKT_LEN];
            stream.read_exact(&mut header).await?;
            if header[0] != 0x03 {
                return Err(bad(format!("not a TPKT frame: {header:02x?}")));
            }
            let total = u16::from_be_bytes([header[2], header[3]]) as usize;
            if total < TPKT_LEN + 3 {
                return Err(bad(format!("TPKT length {total}")));
            }
            let mut reply = vec![0u8; total];
            reply[..TPKT_LEN].copy_from_slice(&header);
            stream.read_exact(&mut reply[TPKT_LEN..]).await?;
            Ok(reply)
        })
        .await
    }
}

#[async_trait]
impl BlockBus for S7Client {
    async fn read_bytes(&mut self, db: u16, offset: u32, len: u16) -> Result<Vec<u8>, DriverError> {
        let pdu_ref = self.take_ref();
        let reply = self.round_trip(&read_var_request(pdu_ref, db, offset, len)).await?;
        decode_read_reply(&reply, len)
    }

    async fn write_bytes(&mut self, db: u16, offset: u32, data: &[u8]) -> Result<(), DriverError> {
        let pdu_ref = self.take_ref();
        let reply = self
            .round_trip(&write_var_request(pdu_ref, db, offset, data))
            .await?;
        check_ack(&reply)?;
        match reply.get(DATA_START) {
            Some(&RETURN_OK) => Ok(()),
            Some(code) => Err(DriverError::Protocol(format!(
                "s7 write DB{db}.{offset} rejected with {code:#04x}"
            ))),
            None => Err(bad("write reply without item status".to_string())),
        }
    }
}

fn bad(detail: String) -> DriverError {
    DriverError::BadResponse {
        device: DeviceKind::IceMaker,
        detail,
    }
}

fn tpkt(body: &[u8]) -> BytesMut {
    let mut frame = BytesMut::with_capacity(TPKT_LEN + body.len());
    frame.put_u8(0x03);
    frame.put_u8(0x00);
    frame.put_u16((TPKT_LEN + body.len()) as u16);
    frame.put_slice(body);
    frame
}

/// Low byte of the destination TSAP: rack in the top 3 bits, slot in the low 5.
fn remote_tsap(rack: u8, slot: u8) -> Result<u8, DriverError> {
    if rack > 7 || slot > 31 {
        return Err(DriverError::Protocol(format!(
            "rack {rack} / slot {slot} out of range (rack 0-7, slot 0-31)"
        )));
    }
    Ok((rack << 5) | slot)
}

fn connection_request(tsap: u8) -> BytesMut {
    tpkt(&[
        0x11, 0xE0, 0x00, 0x00, 0x00, 0x01, 0x00, // COTP CR
        0xC0, 0x01, 0x0A, // TPDU size 1024
        0xC1, 0x02, 0x01, 0x00, // source TSAP
        0xC2, 0x02, 0x03, tsap, // destination TSAP
    ])
}

/// COTP data header + S7 job header.
fn job(pdu_ref: u16, params: &[u8], data: &[u8]) -> BytesMut {
    let mut body = BytesMut::new();
    body.put_slice(&COTP_DATA);
    body.put_u8(S7_PROTOCOL_ID);
    body.put_u8(ROSCTR_JOB);
    body.put_u16(0);
    body.put_u16(pdu_ref);
    body.put_u16(params.len() as u16);
    body.put_u16(data.len() as u16);
    body.put_slice(params);
    body.put_slice(data);
    tpkt(&body)
}

fn setup_communication(pdu_ref: u16) -> BytesMut {
    // function, reserved, max AMQ calling, max AMQ called, PDU length 480
    job(pdu_ref, &[0xF0, 0x00, 0x00, 0x01, 0x00, 0x01, 0x01, 0xE0], &[])
}

fn item_address(params: &mut BytesMut, db: u16, offset: u32, len: u16) {
    params.put_slice(&[0x12, 0x0A, 0x10, TRANSPORT_BYTE]);
    params.put_u16(len);
    params.put_u16(db);
    params.put_u8(AREA_DB);
    let bit_address = offset * 8;
    params.put_slice(&bit_address.to_be_bytes()[1..]);
}

fn read_var_request(pdu_ref: u16, db: u16, offset: u32, len: u16) -> BytesMut {
    let mut params = BytesMut::with_capacity(14);
    params.put_slice(&[FN_READ_VAR, 0x01]);
    item_address(&mut params, db, offset, len);
    job(pdu_ref, &params, &[])
}

fn write_var_request(pdu_ref: u16, db: u16, offset: u32, data: &[u8]) -> BytesMut {
    let mut params = BytesMut::with_capacity(14);
    params.put_slice(&[FN_WRITE_VAR, 0x01]);
    item_address(&mut params, db, offset, data.len() as u16);

    let mut payload = BytesMut::with_capacity(4 + data.len());
    payload.put_u8(0x00);
    payload.put_u8(0x04); // transport size: bytes, length in bits
    payload.put_u16((data.len() * 8) as u16);
    payload.put_slice(data);
    job(pdu_ref, &params, &payload)
}

/// Accept only ack-data replies without a header error.
fn check_ack(reply: &[u8]) -> Result<(), DriverError> {
    if reply.len() < DATA_START - 2 {
        return Err(bad(format!("short S7 reply ({} bytes)", reply.len())));
    }
    let mut header = &reply[TPKT_LEN + 3..];
    let protocol = header.get_u8();
    let rosctr = header.get_u8();
    if protocol != S7_PROTOCOL_ID || rosctr != ROSCTR_ACK_DATA {
        return Err(bad(format!("unexpected S7 header {protocol:#04x}/{rosctr:#04x}")));
    }
    header.advance(8); // reserved, pdu ref, param len, data len
    let (class, code) = (header.get_u8(), header.get_u8());
    if class != 0 || code != 0 {
        return Err(DriverError::Protocol(format!(
            "s7 error class {class:#04x} code {code:#04x}"
        )));
    }
    Ok(())
}

fn decode_read_reply(reply: &[u8], len: u16) -> Result<Vec<u8>, DriverError> {
    check_ack(reply)?;
    let mut data = reply.get(DATA_START..).unwrap_or_default();
    if data.remaining() < 4 {
        return Err(bad("read reply without item data".to_string()));
    }
    let return_code = data.get_u8();
    if return_code != RETURN_OK {
        return Err(DriverError::Protocol(format!(
            "s7 read rejected with {return_code:#04x}"
        )));
    }
    data.advance(1); // transport size
    let bytes = (data.get_u16() / 8) as usize;
    if bytes != len as usize || data.remaining() < bytes {
        return Err(bad(format!("read returned {bytes} bytes, wanted {len}")));
    }
    Ok(data[..bytes].to_vec())
}
