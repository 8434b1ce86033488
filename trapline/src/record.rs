//! Inbound messages and the records produced from them.
//!
//! Only the BER envelope of an SNMP message is inspected here: enough to
//! learn the protocol version, the community and the PDU type so that
//! non-trap traffic can be filtered before it reaches the buffer. Varbind
//! decoding and USM processing stay with the protocol library.

use std::net::SocketAddr;
use std::time::{ SystemTime, UNIX_EPOCH };

use crate::error::{ Result, TraplineError };

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_SEQUENCE: u8 = 0x30;

/// msgFlags privacy bit: the scoped PDU is encrypted
const V3_FLAG_PRIV: u8 = 0x02;

/// One message as delivered by a listener thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub peer: SocketAddr,
    pub received_at: SystemTime,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(peer: SocketAddr, payload: Vec<u8>) -> Self {
        Self {
            peer,
            received_at: SystemTime::now(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnmpVersion {
    V1,
    V2c,
    V3,
}

impl SnmpVersion {
    fn from_wire(value: i64) -> Result<Self> {
        match value {
            0 => Ok(SnmpVersion::V1),
            1 => Ok(SnmpVersion::V2c),
            3 => Ok(SnmpVersion::V3),
            other => Err(TraplineError::invalid_message(format!("unsupported SNMP version {}", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SnmpVersion::V1 => "v1",
            SnmpVersion::V2c => "v2c",
            SnmpVersion::V3 => "v3",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduKind {
    Get,
    GetNext,
    Response,
    Set,
    TrapV1,
    GetBulk,
    Inform,
    TrapV2,
    Report,
    /// v3 scoped PDU under privacy; the type is only known after decryption
    Encrypted,
    Other(u8),
}

impl PduKind {
    fn from_tag(tag: u8) -> Self {
        match tag {
            0xa0 => PduKind::Get,
            0xa1 => PduKind::GetNext,
            0xa2 => PduKind::Response,
            0xa3 => PduKind::Set,
            0xa4 => PduKind::TrapV1,
            0xa5 => PduKind::GetBulk,
            0xa6 => PduKind::Inform,
            0xa7 => PduKind::TrapV2,
            0xa8 => PduKind::Report,
            other => PduKind::Other(other),
        }
    }

    /// Notifications the task keeps; v3 under privacy is assumed to be one.
    /// Informs are left out: nothing acknowledges them, so senders retransmit.
    pub fn is_trap(&self) -> bool {
        matches!(self, PduKind::TrapV1 | PduKind::TrapV2 | PduKind::Encrypted)
    }
}

/// Envelope fields of an SNMP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrapHeader {
    pub version: SnmpVersion,
    /// v1/v2c only
    pub community: Option<Vec<u8>>,
    pub pdu: PduKind,
}

impl TrapHeader {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut outer = BerReader::new(payload);
        let mut message = outer.enter(TAG_SEQUENCE)?;
        let version = SnmpVersion::from_wire(message.integer()?)?;

        match version {
            SnmpVersion::V1 | SnmpVersion::V2c => {
                let community = message.expect(TAG_OCTET_STRING)?.to_vec();
                let pdu = PduKind::from_tag(message.peek_tag()?);
                Ok(Self { version, community: Some(community), pdu })
            }
            SnmpVersion::V3 => {
                let mut global = message.enter(TAG_SEQUENCE)?;
                let _msg_id = global.integer()?;
                let _max_size = global.integer()?;
                let flags = global.expect(TAG_OCTET_STRING)?;
                let encrypted = flags.first().is_some_and(|f| f & V3_FLAG_PRIV != 0);

                let _security_parameters = message.expect(TAG_OCTET_STRING)?;
                let pdu = if encrypted {
                    PduKind::Encrypted
                } else {
                    let mut scoped = message.enter(TAG_SEQUENCE)?;
                    let _context_engine_id = scoped.expect(TAG_OCTET_STRING)?;
                    let _context_name = scoped.expect(TAG_OCTET_STRING)?;
                    PduKind::from_tag(scoped.peek_tag()?)
                };
                Ok(Self { version, community: None, pdu })
            }
        }
    }
}

/// Minimal definite-length BER cursor
struct BerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BerReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn malformed(&self, what: &str) -> TraplineError {
        TraplineError::invalid_message(format!("{} at offset {}", what, self.pos))
    }

    fn peek_tag(&self) -> Result<u8> {
        self.data.get(self.pos).copied().ok_or_else(|| self.malformed("truncated tag"))
    }

    fn length(&mut self) -> Result<usize> {
        let first = *self.data.get(self.pos).ok_or_else(|| self.malformed("truncated length"))?;
        self.pos += 1;
        if first & 0x80 == 0 {
            return Ok(first as usize);
        }
        let octets = (first & 0x7f) as usize;
        if octets == 0 || octets > 4 {
            return Err(self.malformed("unsupported length form"));
        }
        let bytes = self.data
            .get(self.pos..self.pos + octets)
            .ok_or_else(|| self.malformed("truncated length"))?;
        self.pos += octets;
        Ok(bytes.iter().fold(0usize, |acc, b| (acc << 8) | (*b as usize)))
    }

    /// Read a TLV with the given tag and return its contents
    fn expect(&mut self, tag: u8) -> Result<&'a [u8]> {
        let found = self.peek_tag()?;
        if found != tag {
            return Err(self.malformed(&format!("expected tag {:#04x}, found {:#04x}", tag, found)));
        }
        self.pos += 1;
        let len = self.length()?;
        let value = self.data
            .get(self.pos..self.pos + len)
            .ok_or_else(|| self.malformed("value runs past end of message"))?;
        self.pos += len;
        Ok(value)
    }

    fn enter(&mut self, tag: u8) -> Result<BerReader<'a>> {
        self.expect(tag).map(BerReader::new)
    }

    fn integer(&mut self) -> Result<i64> {
        let bytes = self.expect(TAG_INTEGER)?;
        if bytes.is_empty() || bytes.len() > 8 {
            return Err(self.malformed("integer width"));
        }
        let sign = if bytes[0] & 0x80 != 0 { -1i64 } else { 0 };
        Ok(bytes.iter().fold(sign, |acc, b| (acc << 8) | (*b as i64)))
    }
}

/// Total length of the BER element at the start of `data`, if complete
/// enough to tell. Used by stream transports to split frames.
pub fn ber_frame_len(data: &[u8]) -> Result<Option<usize>> {
    if data.len() < 2 {
        return Ok(None);
    }
    let first = data[1];
    if first & 0x80 == 0 {
        return Ok(Some(2 + first as usize));
    }
    let octets = (first & 0x7f) as usize;
    if octets == 0 || octets > 4 {
        return Err(TraplineError::invalid_message("unsupported length form in stream frame"));
    }
    if data.len() < 2 + octets {
        return Ok(None);
    }
    let len = data[2..2 + octets].iter().fold(0usize, |acc, b| (acc << 8) | (*b as usize));
    Ok(Some(2 + octets + len))
}

/// Output unit handed to the host scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrapRecord {
    pub topic: String,
    pub peer: SocketAddr,
    pub version: SnmpVersion,
    pub community: Option<String>,
    pub pdu: PduKind,
    /// Milliseconds since the Unix epoch at receipt
    pub timestamp_ms: u64,
    pub payload: Vec<u8>,
}

/// Stateless mapping from inbound message to record
#[derive(Debug, Clone)]
pub struct TrapConverter {
    topic: String,
}

impl TrapConverter {
    pub fn new(topic: impl Into<String>) -> Self {
        Self { topic: topic.into() }
    }

    pub fn convert(&self, message: &InboundMessage, header: &TrapHeader) -> TrapRecord {
        let timestamp_ms = message.received_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        TrapRecord {
            topic: self.topic.clone(),
            peer: message.peer,
            version: header.version,
            community: header.community.as_ref().map(|c| String::from_utf8_lossy(c).into_owned()),
            pdu: header.pdu,
            timestamp_ms,
            payload: message.payload.clone(),
        }
    }
}
