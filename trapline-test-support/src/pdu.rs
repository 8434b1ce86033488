//! BER encoders for the SNMP messages the tests throw at a listener.
//!
//! Produces well-formed v1/v2c/v3 envelopes with realistic varbinds. Nothing
//! here decodes; parsing is what the code under test does.

use rand::distributions::Alphanumeric;
use rand::Rng;

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_IP_ADDRESS: u8 = 0x40;
const TAG_TIMETICKS: u8 = 0x43;

const PDU_GET: u8 = 0xa0;
const PDU_TRAP_V1: u8 = 0xa4;
const PDU_INFORM: u8 = 0xa6;
const PDU_TRAP_V2: u8 = 0xa7;

/// sysUpTime.0
const SYS_UPTIME: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 3, 0];
/// snmpTrapOID.0
const SNMP_TRAP_OID: &[u32] = &[1, 3, 6, 1, 6, 3, 1, 1, 4, 1, 0];
/// coldStart
const COLD_START: &[u32] = &[1, 3, 6, 1, 6, 3, 1, 1, 5, 1];

pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    out.push(tag);
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = (len as u32).to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | ((4 - skip) as u8));
        out.extend_from_slice(&bytes[skip..]);
    }
    out.extend_from_slice(content);
    out
}

fn integer(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    // Shortest two's complement form
    while start < 7 {
        let redundant =
            (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0) ||
            (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    tlv(TAG_INTEGER, &bytes[start..])
}

fn unsigned(tag: u8, value: u32) -> Vec<u8> {
    let mut encoded = integer(value as i64);
    encoded[0] = tag;
    encoded
}

fn octets(value: &[u8]) -> Vec<u8> {
    tlv(TAG_OCTET_STRING, value)
}

fn oid(arcs: &[u32]) -> Vec<u8> {
    let mut content = Vec::new();
    let (first, second) = (arcs.first().copied().unwrap_or(0), arcs.get(1).copied().unwrap_or(0));
    push_base128(&mut content, first * 40 + second);
    for arc in arcs.iter().skip(2) {
        push_base128(&mut content, *arc);
    }
    tlv(TAG_OID, &content)
}

fn push_base128(out: &mut Vec<u8>, mut value: u32) {
    let mut groups = vec![(value & 0x7f) as u8];
    value >>= 7;
    while value > 0 {
        groups.push(((value & 0x7f) as u8) | 0x80);
        value >>= 7;
    }
    out.extend(groups.into_iter().rev());
}

fn sequence(parts: &[Vec<u8>]) -> Vec<u8> {
    tlv(TAG_SEQUENCE, &parts.concat())
}

fn varbind(name: &[u32], value: Vec<u8>) -> Vec<u8> {
    sequence(&[oid(name), value])
}

/// Builder for individual messages
#[derive(Debug, Clone)]
pub struct TrapBuilder {
    community: String,
    request_id: i32,
    uptime: u32,
    trap_oid: Vec<u32>,
}

impl Default for TrapBuilder {
    fn default() -> Self {
        Self {
            community: "public".to_string(),
            request_id: 1,
            uptime: 0,
            trap_oid: COLD_START.to_vec(),
        }
    }
}

impl TrapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_community(mut self, community: impl Into<String>) -> Self {
        self.community = community.into();
        self
    }

    pub fn with_request_id(mut self, request_id: i32) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_uptime(mut self, ticks: u32) -> Self {
        self.uptime = ticks;
        self
    }

    fn v2_pdu(&self, tag: u8) -> Vec<u8> {
        let varbinds = sequence(
            &[
                varbind(SYS_UPTIME, unsigned(TAG_TIMETICKS, self.uptime)),
                varbind(SNMP_TRAP_OID, oid(&self.trap_oid)),
            ]
        );
        tlv(tag, &[integer(self.request_id as i64), integer(0), integer(0), varbinds].concat())
    }

    fn community_message(&self, version: i64, pdu: Vec<u8>) -> Vec<u8> {
        sequence(&[integer(version), octets(self.community.as_bytes()), pdu])
    }

    pub fn v1_trap(&self) -> Vec<u8> {
        let pdu = tlv(
            PDU_TRAP_V1,
            &[
                oid(&[1, 3, 6, 1, 4, 1, 8072]),
                tlv(TAG_IP_ADDRESS, &[192, 0, 2, 10]),
                integer(0),
                integer(0),
                unsigned(TAG_TIMETICKS, self.uptime),
                sequence(&[]),
            ].concat()
        );
        self.community_message(0, pdu)
    }

    pub fn v2c_trap(&self) -> Vec<u8> {
        self.community_message(1, self.v2_pdu(PDU_TRAP_V2))
    }

    pub fn v2c_inform(&self) -> Vec<u8> {
        self.community_message(1, self.v2_pdu(PDU_INFORM))
    }

    /// A GetRequest, which the task must ignore
    pub fn v2c_get(&self) -> Vec<u8> {
        let varbinds = sequence(&[varbind(SYS_UPTIME, tlv(TAG_NULL, &[]))]);
        let pdu = tlv(PDU_GET, &[integer(self.request_id as i64), integer(0), integer(0), varbinds].concat());
        self.community_message(1, pdu)
    }

    fn v3_message(&self, flags: u8, body: Vec<u8>) -> Vec<u8> {
        let global = sequence(&[integer(self.request_id as i64), integer(65507), octets(&[flags]), integer(3)]);
        let usm = sequence(
            &[octets(b"\x80\x00\x1f\x88\x04trapline"), integer(1), integer(self.uptime as i64), octets(b"operator"), octets(&[]), octets(&[])]
        );
        sequence(&[integer(3), global, octets(&usm), body])
    }

    /// v3 trap with noAuthNoPriv, scoped PDU in the clear
    pub fn v3_plain_trap(&self) -> Vec<u8> {
        let scoped = sequence(&[octets(b"\x80\x00\x1f\x88\x04trapline"), octets(&[]), self.v2_pdu(PDU_TRAP_V2)]);
        self.v3_message(0x00, scoped)
    }

    /// v3 authPriv message; the scoped PDU is opaque ciphertext
    pub fn v3_encrypted(&self, ciphertext: &[u8]) -> Vec<u8> {
        self.v3_message(0x03, octets(ciphertext))
    }
}

/// v2c trap with a random request id and community
pub fn random_trap<R: Rng>(rng: &mut R) -> Vec<u8> {
    let len = rng.gen_range(1..16);
    let community: String = (&mut *rng).sample_iter(&Alphanumeric).take(len).map(char::from).collect();
    TrapBuilder::new()
        .with_community(community)
        .with_request_id(rng.gen())
        .with_uptime(rng.gen())
        .v2c_trap()
}

/// Bytes that are not an SNMP message
pub fn garbage<R: Rng>(rng: &mut R, len: usize) -> Vec<u8> {
    let mut bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
    if let Some(first) = bytes.first_mut() {
        // Never a SEQUENCE, so never accidentally valid
        if *first == TAG_SEQUENCE {
            *first = 0x00;
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use trapline::record::ber_frame_len;
    use trapline::{ PduKind, SnmpVersion, TrapHeader };

    #[test]
    fn test_integer_minimal_encoding() {
        assert_eq!(integer(0), vec![0x02, 0x01, 0x00]);
        assert_eq!(integer(127), vec![0x02, 0x01, 0x7f]);
        assert_eq!(integer(128), vec![0x02, 0x02, 0x00, 0x80]);
        assert_eq!(integer(-1), vec![0x02, 0x01, 0xff]);
        assert_eq!(integer(-129), vec![0x02, 0x02, 0xff, 0x7f]);
    }

    #[test]
    fn test_long_form_length() {
        let encoded = tlv(TAG_OCTET_STRING, &[0u8; 300]);
        assert_eq!(&encoded[..4], &[0x04, 0x82, 0x01, 0x2c]);
        assert_eq!(ber_frame_len(&encoded).unwrap(), Some(encoded.len()));
    }

    #[test]
    fn test_oid_encoding() {
        assert_eq!(oid(&[1, 3, 6, 1, 4, 1, 8072]), vec![0x06, 0x07, 0x2b, 0x06, 0x01, 0x04, 0x01, 0xbf, 0x08]);
    }

    #[test]
    fn test_generated_headers() {
        let builder = TrapBuilder::new().with_community("secret").with_request_id(4242);

        let cases = [
            (builder.v1_trap(), SnmpVersion::V1, PduKind::TrapV1),
            (builder.v2c_trap(), SnmpVersion::V2c, PduKind::TrapV2),
            (builder.v2c_inform(), SnmpVersion::V2c, PduKind::Inform),
            (builder.v2c_get(), SnmpVersion::V2c, PduKind::Get),
            (builder.v3_plain_trap(), SnmpVersion::V3, PduKind::TrapV2),
            (builder.v3_encrypted(&[0xde, 0xad, 0xbe, 0xef]), SnmpVersion::V3, PduKind::Encrypted),
        ];
        for (bytes, version, pdu) in cases {
            let header = TrapHeader::parse(&bytes).unwrap();
            assert_eq!(header.version, version);
            assert_eq!(header.pdu, pdu);
            assert_eq!(ber_frame_len(&bytes).unwrap(), Some(bytes.len()));
        }

        let header = TrapHeader::parse(&builder.v2c_trap()).unwrap();
        assert_eq!(header.community.as_deref(), Some(&b"secret"[..]));
    }

    #[test]
    fn test_random_messages() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let trap = random_trap(&mut rng);
            assert_eq!(TrapHeader::parse(&trap).unwrap().pdu, PduKind::TrapV2);
            assert!(TrapHeader::parse(&garbage(&mut rng, 32)).is_err());
        }
    }
}
