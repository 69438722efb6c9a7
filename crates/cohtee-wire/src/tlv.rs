// Author: Lukas Bower
// Purpose: Encode and decode cohtee TLV records without trusting input lengths.

//! Raw TLV record handling.

use core::fmt;

/// Bit reserved in the tag byte for marking embedded sub-records.
const EMBED_BIT: u8 = 0x80;

/// Bytes occupied by the tag byte and the big-endian length field.
pub const TLV_HEADER_LEN: usize = 3;

/// Possible errors produced while packing, encoding or decoding records.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    /// The raw tag already carries the reserved embed bit.
    #[error("tag {0:#04x} already carries the embed bit")]
    TagBitsConflict(u8),
    /// The value does not fit the 16-bit length field.
    #[error("value length {0} exceeds the 16-bit length field")]
    ValueTooLong(usize),
    /// Input buffer ended before the declared record did.
    #[error("truncated record: declared {declared} value bytes, {available} available")]
    Truncated {
        /// Value length declared in the record header.
        declared: usize,
        /// Value bytes actually present in the buffer.
        available: usize,
    },
    /// Encountered a tag identifier outside the reserved set.
    #[error("unknown message tag {0:#04x}")]
    UnknownTag(u8),
    /// A reserved tag arrived in a direction it is not valid for.
    #[error("tag {0:#04x} is not valid in this direction")]
    UnexpectedTag(u8),
    /// A fixed-width message field held an out-of-range or short payload.
    #[error("malformed {0} payload")]
    Malformed(&'static str),
}

/// Message tag identifiers reserved on the wire.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTag {
    /// Ask the applet whether a device packet may pass.
    DeviceCheck = 0x30,
    /// Ask the applet to endorse a device identity.
    EndorseRequest = 0x31,
    /// Challenge emitted towards the validation service.
    AuthChallenge = 0x32,
    /// Signed response from the validation service.
    AuthResponse = 0x33,
    /// Verdict on a validation service response.
    AuthResult = 0x34,
    /// Cooperative shutdown broadcast.
    Terminate = 0x7F,
}

impl MessageTag {
    /// Raw identifier value of this tag.
    #[must_use]
    pub fn id(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageTag {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use MessageTag::*;
        Ok(match value {
            0x30 => DeviceCheck,
            0x31 => EndorseRequest,
            0x32 => AuthChallenge,
            0x33 => AuthResponse,
            0x34 => AuthResult,
            0x7F => Terminate,
            other => return Err(CodecError::UnknownTag(other)),
        })
    }
}

/// One tag-length-value record.
///
/// The `length` field always equals `value.len()`; constructors and the
/// decoder uphold this, so consumers may trust either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    tag: u8,
    value: Vec<u8>,
}

impl Tlv {
    /// Pack a tag, embed flag and value into a record.
    ///
    /// Fails if the raw tag already carries the embed bit or the value
    /// exceeds the 16-bit length field.
    pub fn pack(tag: u8, embed: bool, value: Vec<u8>) -> Result<Self, CodecError> {
        if tag & EMBED_BIT != 0 {
            return Err(CodecError::TagBitsConflict(tag));
        }
        if value.len() > usize::from(u16::MAX) {
            return Err(CodecError::ValueTooLong(value.len()));
        }
        let tag = if embed { tag | EMBED_BIT } else { tag };
        Ok(Self { tag, value })
    }

    /// Full tag byte, embed bit included.
    #[must_use]
    pub fn tag(&self) -> u8 {
        self.tag
    }

    /// Tag identifier with the embed bit stripped.
    #[must_use]
    pub fn identifier(&self) -> u8 {
        self.tag & !EMBED_BIT
    }

    /// Whether the record is an embedded sub-record.
    #[must_use]
    pub fn embedded(&self) -> bool {
        self.tag & EMBED_BIT != 0
    }

    /// Declared value length.
    #[must_use]
    pub fn length(&self) -> u16 {
        self.value.len() as u16
    }

    /// Borrow the value bytes.
    #[must_use]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Consume the record, keeping the value bytes.
    #[must_use]
    pub fn into_value(self) -> Vec<u8> {
        self.value
    }

    /// Drop value bytes beyond `capacity`, keeping the length in step.
    ///
    /// Used when copying into a caller-provided buffer whose capacity is
    /// the length the caller previously polled.
    pub fn truncate_value(&mut self, capacity: usize) {
        if self.value.len() > capacity {
            self.value.truncate(capacity);
        }
    }

    /// Serialize the record: tag byte, big-endian length, value bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(TLV_HEADER_LEN + self.value.len());
        self.encode_into(&mut buf);
        buf
    }

    /// Append the serialized record to an existing buffer.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.tag);
        buf.extend_from_slice(&self.length().to_be_bytes());
        buf.extend_from_slice(&self.value);
    }

    /// Decode a single record from the start of `bytes`.
    ///
    /// Exactly `3 + length` bytes are consumed; trailing bytes are left
    /// untouched so untrusted input can never cause an over-read.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = TlvReader::new(bytes);
        reader.next_record()
    }
}

impl fmt::Display for Tlv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tag={:#04x} len={}", self.tag, self.length())
    }
}

/// Sequential reader over concatenated TLV records.
#[derive(Debug)]
pub struct TlvReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> TlvReader<'a> {
    /// Create a reader over the supplied buffer.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed by [`TlvReader::next_record`].
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Decode the next record, advancing past exactly its declared length.
    pub fn next_record(&mut self) -> Result<Tlv, CodecError> {
        let rest = &self.buf[self.pos..];
        if rest.len() < TLV_HEADER_LEN {
            return Err(CodecError::Truncated {
                declared: TLV_HEADER_LEN,
                available: rest.len(),
            });
        }
        let tag = rest[0];
        let declared = usize::from(u16::from_be_bytes([rest[1], rest[2]]));
        let body = &rest[TLV_HEADER_LEN..];
        if body.len() < declared {
            return Err(CodecError::Truncated {
                declared,
                available: body.len(),
            });
        }
        self.pos += TLV_HEADER_LEN + declared;
        Ok(Tlv {
            tag,
            value: body[..declared].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, RngCore};

    #[test]
    fn round_trip_preserves_records() {
        let mut rng = rand::thread_rng();
        for _ in 0..64 {
            let tag = rng.gen_range(0u8..0x80);
            let embed = rng.gen_bool(0.5);
            let mut value = vec![0u8; rng.gen_range(0..512)];
            rng.fill_bytes(&mut value);
            let record = Tlv::pack(tag, embed, value).expect("pack record");
            let decoded = Tlv::decode(&record.encode()).expect("decode record");
            assert_eq!(decoded, record);
        }
    }

    #[test]
    fn pack_rejects_preset_embed_bit() {
        assert_eq!(
            Tlv::pack(0xB0, false, Vec::new()),
            Err(CodecError::TagBitsConflict(0xB0))
        );
        assert!(Tlv::pack(0x30, true, Vec::new()).is_ok());
    }

    #[test]
    fn embed_flag_lands_in_the_high_bit() {
        let record = Tlv::pack(0x30, true, vec![1, 2]).expect("pack record");
        assert!(record.embedded());
        assert_eq!(record.identifier(), 0x30);
        assert_eq!(record.encode()[0], 0xB0);
    }

    #[test]
    fn decode_stops_at_declared_length() {
        let record = Tlv::pack(0x31, false, vec![0xAA; 4]).expect("pack record");
        let mut wire = record.encode();
        wire.extend_from_slice(&[0xFF; 16]);
        let decoded = Tlv::decode(&wire).expect("decode record");
        assert_eq!(decoded.value(), &[0xAA; 4]);
    }

    #[test]
    fn decode_rejects_short_value() {
        let record = Tlv::pack(0x31, false, vec![7; 10]).expect("pack record");
        let mut wire = record.encode();
        wire.truncate(8);
        assert_eq!(
            Tlv::decode(&wire),
            Err(CodecError::Truncated {
                declared: 10,
                available: 5,
            })
        );
    }

    #[test]
    fn reader_walks_concatenated_records() {
        let first = Tlv::pack(0x01, true, vec![1, 2, 3]).expect("pack record");
        let second = Tlv::pack(0x02, true, vec![4]).expect("pack record");
        let mut wire = first.encode();
        second.encode_into(&mut wire);

        let mut reader = TlvReader::new(&wire);
        assert_eq!(reader.next_record().expect("first record"), first);
        assert_eq!(reader.next_record().expect("second record"), second);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn truncate_value_keeps_length_consistent() {
        let mut record = Tlv::pack(0x30, false, vec![9; 12]).expect("pack record");
        record.truncate_value(5);
        assert_eq!(record.length(), 5);
        assert_eq!(record.value().len(), 5);
    }

    #[test]
    fn unknown_tags_are_an_explicit_error() {
        assert_eq!(MessageTag::try_from(0x35), Err(CodecError::UnknownTag(0x35)));
        assert_eq!(MessageTag::try_from(0x7F), Ok(MessageTag::Terminate));
    }
}
