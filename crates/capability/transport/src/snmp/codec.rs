//! SNMPv2c 报文的 BER 编解码。
//!
//! 只实现桥接器用到的子集：GetRequest / SetRequest / Response PDU，
//! 值类型 INTEGER、OCTET STRING、NULL、OID、IpAddress、Counter32、
//! Gauge32、TimeTicks、Counter64 以及 v2c 的三个异常标记
//! （noSuchObject / noSuchInstance / endOfMibView）。
//!
//! 报文结构：
//! ```text
//! SEQUENCE {
//!   version   INTEGER (1 = v2c)
//!   community OCTET STRING
//!   PDU [0xA0 get | 0xA2 response | 0xA3 set] {
//!     request-id, error-status, error-index,
//!     SEQUENCE OF SEQUENCE { OID, value }
//!   }
//! }
//! ```

use crate::error::TransportError;

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_IP_ADDRESS: u8 = 0x40;
const TAG_COUNTER32: u8 = 0x41;
const TAG_GAUGE32: u8 = 0x42;
const TAG_TIMETICKS: u8 = 0x43;
const TAG_OPAQUE: u8 = 0x44;
const TAG_COUNTER64: u8 = 0x46;
const TAG_NO_SUCH_OBJECT: u8 = 0x80;
const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
const TAG_END_OF_MIB_VIEW: u8 = 0x82;

pub const PDU_GET_REQUEST: u8 = 0xA0;
pub const PDU_RESPONSE: u8 = 0xA2;
pub const PDU_SET_REQUEST: u8 = 0xA3;

/// SNMPv2c 协议版本号。
pub const VERSION_2C: i64 = 1;

/// 变量绑定值。
#[derive(Debug, Clone, PartialEq)]
pub enum SnmpValue {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    Oid(Vec<u32>),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Counter64(u64),
    Opaque(Vec<u8>),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl SnmpValue {
    /// v2c 异常标记：值存在于响应里但对象不存在。
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            SnmpValue::NoSuchObject | SnmpValue::NoSuchInstance | SnmpValue::EndOfMibView
        )
    }
}

/// 变量绑定。
#[derive(Debug, Clone, PartialEq)]
pub struct VarBind {
    pub oid: Vec<u32>,
    pub value: SnmpValue,
}

/// SNMP PDU。
#[derive(Debug, Clone, PartialEq)]
pub struct Pdu {
    pub pdu_type: u8,
    pub request_id: i32,
    pub error_status: i32,
    pub error_index: i32,
    pub varbinds: Vec<VarBind>,
}

/// 完整 SNMP 报文。
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub version: i64,
    pub community: Vec<u8>,
    pub pdu: Pdu,
}

/// 点分字符串转 OID 数组。
pub fn parse_oid(text: &str) -> Result<Vec<u32>, TransportError> {
    let mut arcs = Vec::new();
    for part in text.split('.') {
        let arc = part
            .parse::<u32>()
            .map_err(|_| TransportError::parse(format!("invalid oid: {text}")))?;
        arcs.push(arc);
    }
    if arcs.len() < 2 {
        return Err(TransportError::parse(format!("oid too short: {text}")));
    }
    Ok(arcs)
}

/// OID 数组转点分字符串。
pub fn format_oid(oid: &[u32]) -> String {
    oid.iter()
        .map(|arc| arc.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

// ---------------------------------------------------------------------------
// 编码
// ---------------------------------------------------------------------------

fn write_length(buf: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        buf.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    let significant = &bytes[first..];
    buf.push(0x80 | significant.len() as u8);
    buf.extend_from_slice(significant);
}

fn write_tlv(buf: &mut Vec<u8>, tag: u8, content: &[u8]) {
    buf.push(tag);
    write_length(buf, content.len());
    buf.extend_from_slice(content);
}

fn encode_integer_content(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    // 去掉冗余的符号扩展字节，保留最短二补码表示
    while start < 7 {
        let current = bytes[start];
        let next = bytes[start + 1];
        let redundant = (current == 0x00 && next & 0x80 == 0)
            || (current == 0xFF && next & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

fn encode_unsigned_content(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(7);
    let mut content = Vec::new();
    // 最高位为 1 时需要前导零字节保持非负
    if bytes[first] & 0x80 != 0 {
        content.push(0);
    }
    content.extend_from_slice(&bytes[first..]);
    content
}

fn encode_oid_content(oid: &[u32]) -> Vec<u8> {
    let mut content = Vec::new();
    content.push((oid[0] * 40 + oid[1]) as u8);
    for arc in &oid[2..] {
        let mut arc = *arc;
        let mut chunk = vec![(arc & 0x7F) as u8];
        arc >>= 7;
        while arc > 0 {
            chunk.push(0x80 | (arc & 0x7F) as u8);
            arc >>= 7;
        }
        chunk.reverse();
        content.extend_from_slice(&chunk);
    }
    content
}

fn encode_value(buf: &mut Vec<u8>, value: &SnmpValue) {
    match value {
        SnmpValue::Integer(v) => write_tlv(buf, TAG_INTEGER, &encode_integer_content(*v)),
        SnmpValue::OctetString(bytes) => write_tlv(buf, TAG_OCTET_STRING, bytes),
        SnmpValue::Null => write_tlv(buf, TAG_NULL, &[]),
        SnmpValue::Oid(oid) => write_tlv(buf, TAG_OID, &encode_oid_content(oid)),
        SnmpValue::IpAddress(octets) => write_tlv(buf, TAG_IP_ADDRESS, octets),
        SnmpValue::Counter32(v) => {
            write_tlv(buf, TAG_COUNTER32, &encode_unsigned_content(*v as u64))
        }
        SnmpValue::Gauge32(v) => write_tlv(buf, TAG_GAUGE32, &encode_unsigned_content(*v as u64)),
        SnmpValue::TimeTicks(v) => {
            write_tlv(buf, TAG_TIMETICKS, &encode_unsigned_content(*v as u64))
        }
        SnmpValue::Counter64(v) => write_tlv(buf, TAG_COUNTER64, &encode_unsigned_content(*v)),
        SnmpValue::Opaque(bytes) => write_tlv(buf, TAG_OPAQUE, bytes),
        SnmpValue::NoSuchObject => write_tlv(buf, TAG_NO_SUCH_OBJECT, &[]),
        SnmpValue::NoSuchInstance => write_tlv(buf, TAG_NO_SUCH_INSTANCE, &[]),
        SnmpValue::EndOfMibView => write_tlv(buf, TAG_END_OF_MIB_VIEW, &[]),
    }
}

/// 编码完整报文为线上字节。
pub fn encode_message(message: &Message) -> Vec<u8> {
    let mut varbinds = Vec::new();
    for vb in &message.pdu.varbinds {
        let mut entry = Vec::new();
        write_tlv(&mut entry, TAG_OID, &encode_oid_content(&vb.oid));
        encode_value(&mut entry, &vb.value);
        write_tlv(&mut varbinds, TAG_SEQUENCE, &entry);
    }

    let mut pdu = Vec::new();
    write_tlv(
        &mut pdu,
        TAG_INTEGER,
        &encode_integer_content(message.pdu.request_id as i64),
    );
    write_tlv(
        &mut pdu,
        TAG_INTEGER,
        &encode_integer_content(message.pdu.error_status as i64),
    );
    write_tlv(
        &mut pdu,
        TAG_INTEGER,
        &encode_integer_content(message.pdu.error_index as i64),
    );
    write_tlv(&mut pdu, TAG_SEQUENCE, &varbinds);

    let mut body = Vec::new();
    write_tlv(&mut body, TAG_INTEGER, &encode_integer_content(message.version));
    write_tlv(&mut body, TAG_OCTET_STRING, &message.community);
    write_tlv(&mut body, message.pdu.pdu_type, &pdu);

    let mut out = Vec::new();
    write_tlv(&mut out, TAG_SEQUENCE, &body);
    out
}

// ---------------------------------------------------------------------------
// 解码
// ---------------------------------------------------------------------------

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_byte(&mut self) -> Result<u8, TransportError> {
        if self.pos >= self.data.len() {
            return Err(TransportError::parse("truncated message"));
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    fn read_length(&mut self) -> Result<usize, TransportError> {
        let first = self.read_byte()?;
        if first & 0x80 == 0 {
            return Ok(first as usize);
        }
        let count = (first & 0x7F) as usize;
        if count == 0 || count > 4 {
            return Err(TransportError::parse("unsupported BER length"));
        }
        let mut len = 0usize;
        for _ in 0..count {
            len = (len << 8) | self.read_byte()? as usize;
        }
        Ok(len)
    }

    fn read_tlv(&mut self) -> Result<(u8, &'a [u8]), TransportError> {
        let tag = self.read_byte()?;
        let len = self.read_length()?;
        if len > self.remaining() {
            return Err(TransportError::parse("BER length exceeds message"));
        }
        let content = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok((tag, content))
    }

    fn expect_tlv(&mut self, expected: u8) -> Result<&'a [u8], TransportError> {
        let (tag, content) = self.read_tlv()?;
        if tag != expected {
            return Err(TransportError::parse(format!(
                "unexpected tag {tag:#04x}, wanted {expected:#04x}"
            )));
        }
        Ok(content)
    }
}

fn decode_integer_content(content: &[u8]) -> Result<i64, TransportError> {
    if content.is_empty() || content.len() > 8 {
        return Err(TransportError::parse("bad integer length"));
    }
    let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for byte in content {
        value = (value << 8) | *byte as i64;
    }
    Ok(value)
}

fn decode_unsigned_content(content: &[u8]) -> Result<u64, TransportError> {
    let mut bytes = content;
    if bytes.first() == Some(&0) {
        bytes = &bytes[1..];
    }
    if bytes.len() > 8 {
        return Err(TransportError::parse("bad unsigned length"));
    }
    let mut value = 0u64;
    for byte in bytes {
        value = (value << 8) | *byte as u64;
    }
    Ok(value)
}

fn decode_oid_content(content: &[u8]) -> Result<Vec<u32>, TransportError> {
    if content.is_empty() {
        return Err(TransportError::parse("empty oid"));
    }
    let mut oid = vec![(content[0] / 40) as u32, (content[0] % 40) as u32];
    let mut arc: u32 = 0;
    for byte in &content[1..] {
        arc = arc
            .checked_shl(7)
            .ok_or_else(|| TransportError::parse("oid arc overflow"))?
            | (*byte & 0x7F) as u32;
        if byte & 0x80 == 0 {
            oid.push(arc);
            arc = 0;
        }
    }
    Ok(oid)
}

fn decode_value(tag: u8, content: &[u8]) -> Result<SnmpValue, TransportError> {
    let value = match tag {
        TAG_INTEGER => SnmpValue::Integer(decode_integer_content(content)?),
        TAG_OCTET_STRING => SnmpValue::OctetString(content.to_vec()),
        TAG_NULL => SnmpValue::Null,
        TAG_OID => SnmpValue::Oid(decode_oid_content(content)?),
        TAG_IP_ADDRESS => {
            if content.len() != 4 {
                return Err(TransportError::parse("bad IpAddress length"));
            }
            SnmpValue::IpAddress([content[0], content[1], content[2], content[3]])
        }
        TAG_COUNTER32 => SnmpValue::Counter32(decode_unsigned_content(content)? as u32),
        TAG_GAUGE32 => SnmpValue::Gauge32(decode_unsigned_content(content)? as u32),
        TAG_TIMETICKS => SnmpValue::TimeTicks(decode_unsigned_content(content)? as u32),
        TAG_COUNTER64 => SnmpValue::Counter64(decode_unsigned_content(content)?),
        TAG_OPAQUE => SnmpValue::Opaque(content.to_vec()),
        TAG_NO_SUCH_OBJECT => SnmpValue::NoSuchObject,
        TAG_NO_SUCH_INSTANCE => SnmpValue::NoSuchInstance,
        TAG_END_OF_MIB_VIEW => SnmpValue::EndOfMibView,
        other => {
            return Err(TransportError::parse(format!(
                "unsupported value tag {other:#04x}"
            )))
        }
    };
    Ok(value)
}

/// 解码线上字节为完整报文。
pub fn decode_message(data: &[u8]) -> Result<Message, TransportError> {
    let mut outer = Reader::new(data);
    let body = outer.expect_tlv(TAG_SEQUENCE)?;

    let mut reader = Reader::new(body);
    let version = decode_integer_content(reader.expect_tlv(TAG_INTEGER)?)?;
    let community = reader.expect_tlv(TAG_OCTET_STRING)?.to_vec();

    let (pdu_type, pdu_content) = reader.read_tlv()?;
    if !matches!(pdu_type, PDU_GET_REQUEST | PDU_RESPONSE | PDU_SET_REQUEST) {
        return Err(TransportError::parse(format!(
            "unsupported PDU type {pdu_type:#04x}"
        )));
    }

    let mut pdu_reader = Reader::new(pdu_content);
    let request_id = decode_integer_content(pdu_reader.expect_tlv(TAG_INTEGER)?)? as i32;
    let error_status = decode_integer_content(pdu_reader.expect_tlv(TAG_INTEGER)?)? as i32;
    let error_index = decode_integer_content(pdu_reader.expect_tlv(TAG_INTEGER)?)? as i32;

    let varbind_list = pdu_reader.expect_tlv(TAG_SEQUENCE)?;
    let mut vb_reader = Reader::new(varbind_list);
    let mut varbinds = Vec::new();
    while vb_reader.remaining() > 0 {
        let entry = vb_reader.expect_tlv(TAG_SEQUENCE)?;
        let mut entry_reader = Reader::new(entry);
        let oid = decode_oid_content(entry_reader.expect_tlv(TAG_OID)?)?;
        let (tag, content) = entry_reader.read_tlv()?;
        varbinds.push(VarBind {
            oid,
            value: decode_value(tag, content)?,
        });
    }

    Ok(Message {
        version,
        community,
        pdu: Pdu {
            pdu_type,
            request_id,
            error_status,
            error_index,
            varbinds,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: &Message) -> Message {
        decode_message(&encode_message(message)).expect("decode")
    }

    #[test]
    fn oid_text_roundtrip() {
        let text = "1.3.6.1.4.1.3808.1.1.3.5.7.0";
        let oid = parse_oid(text).expect("parse");
        assert_eq!(format_oid(&oid), text);
        let content = encode_oid_content(&oid);
        assert_eq!(decode_oid_content(&content).expect("decode"), oid);
    }

    #[test]
    fn integers_use_minimal_twos_complement() {
        assert_eq!(encode_integer_content(0), vec![0x00]);
        assert_eq!(encode_integer_content(127), vec![0x7F]);
        assert_eq!(encode_integer_content(128), vec![0x00, 0x80]);
        assert_eq!(encode_integer_content(-1), vec![0xFF]);
        assert_eq!(encode_integer_content(300), vec![0x01, 0x2C]);
        for value in [0i64, 1, -1, 127, 128, -129, 300, 65_536, -65_537] {
            let content = encode_integer_content(value);
            assert_eq!(decode_integer_content(&content).expect("decode"), value);
        }
    }

    #[test]
    fn get_request_roundtrip() {
        let message = Message {
            version: VERSION_2C,
            community: b"public".to_vec(),
            pdu: Pdu {
                pdu_type: PDU_GET_REQUEST,
                request_id: 42,
                error_status: 0,
                error_index: 0,
                varbinds: vec![
                    VarBind {
                        oid: parse_oid("1.3.6.1.2.1.1.3.0").expect("oid"),
                        value: SnmpValue::Null,
                    },
                    VarBind {
                        oid: parse_oid("1.3.6.1.4.1.3808.1.1.3.5.7.0").expect("oid"),
                        value: SnmpValue::Null,
                    },
                ],
            },
        };
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn response_value_types_roundtrip() {
        let message = Message {
            version: VERSION_2C,
            community: b"public".to_vec(),
            pdu: Pdu {
                pdu_type: PDU_RESPONSE,
                request_id: 7,
                error_status: 0,
                error_index: 0,
                varbinds: vec![
                    VarBind {
                        oid: vec![1, 3, 6, 1, 2, 1, 1, 3, 0],
                        value: SnmpValue::TimeTicks(4_123_456),
                    },
                    VarBind {
                        oid: vec![1, 3, 6, 1, 4, 1, 3808, 1, 1, 3, 1, 1, 0],
                        value: SnmpValue::OctetString(b"PDU44001".to_vec()),
                    },
                    VarBind {
                        oid: vec![1, 3, 6, 1, 4, 1, 3808, 1, 1, 3, 5, 7, 0],
                        value: SnmpValue::Integer(1204),
                    },
                    VarBind {
                        oid: vec![1, 3, 6, 1, 4, 1, 3808, 1, 1, 4, 2, 1, 0],
                        value: SnmpValue::NoSuchObject,
                    },
                    VarBind {
                        oid: vec![1, 3, 6, 1, 2, 1, 4, 20, 1, 1],
                        value: SnmpValue::IpAddress([192, 168, 20, 177]),
                    },
                    VarBind {
                        oid: vec![1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 6, 1],
                        value: SnmpValue::Counter64(u64::MAX),
                    },
                ],
            },
        };
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn long_form_length_roundtrip() {
        let message = Message {
            version: VERSION_2C,
            community: b"public".to_vec(),
            pdu: Pdu {
                pdu_type: PDU_RESPONSE,
                request_id: 1,
                error_status: 0,
                error_index: 0,
                varbinds: vec![VarBind {
                    oid: vec![1, 3, 6, 1, 4, 1, 3808, 1, 1, 3, 1, 1, 0],
                    value: SnmpValue::OctetString(vec![0x41; 300]),
                }],
            },
        };
        let encoded = encode_message(&message);
        assert!(encoded.len() > 300);
        assert_eq!(decode_message(&encoded).expect("decode"), message);
    }

    #[test]
    fn truncated_message_is_a_parse_error() {
        let message = Message {
            version: VERSION_2C,
            community: b"public".to_vec(),
            pdu: Pdu {
                pdu_type: PDU_GET_REQUEST,
                request_id: 9,
                error_status: 0,
                error_index: 0,
                varbinds: vec![],
            },
        };
        let mut encoded = encode_message(&message);
        encoded.truncate(encoded.len() - 3);
        assert!(decode_message(&encoded).is_err());
    }
}
