//! Envelope encoding
//!
//! Layout (all integers little-endian):
//! - Bytes 0-3: magic `SPRA`
//! - Byte 4: format version
//! - Byte 5: envelope tag (relayable / retraction)
//! - Body, see `encode_relayable` and `encode_retraction`
//!
//! Strings are u16-length-prefixed UTF-8, payloads u32-length-prefixed.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use spora_core::{
    Guid, Handle, ParentKind, ParentRef, Payload, RelayableDraft, RelayableKind, RelayableObject,
    Signature, SporaError, SporaResult, Timestamp,
};

/// Envelope magic
pub const MAGIC: [u8; 4] = *b"SPRA";

/// Current format version
pub const WIRE_VERSION: u8 = 1;

/// Magic + version + tag
pub const ENVELOPE_HEADER_SIZE: usize = 6;

/// Upper bound on an encoded envelope
pub const MAX_ENVELOPE_SIZE: usize = 512 * 1024;

const SIGNATURE_SIZE: usize = 64;

const TAG_RELAYABLE: u8 = 0x01;
const TAG_RETRACTION: u8 = 0x02;

/// A signed request to remove a relayable, issued by its author or by
/// the owner of its parent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Retraction {
    pub target: Guid,
    pub kind: RelayableKind,
    pub author: Handle,
    pub signature: Signature,
}

/// Everything a pod can send another about relayables
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Envelope {
    Relayable(RelayableObject),
    Retraction(Retraction),
}

impl Envelope {
    /// Serialize to bytes
    pub fn encode(&self) -> SporaResult<Bytes> {
        let mut buf = BytesMut::with_capacity(256);
        buf.put_slice(&MAGIC);
        buf.put_u8(WIRE_VERSION);

        match self {
            Envelope::Relayable(object) => {
                buf.put_u8(TAG_RELAYABLE);
                encode_relayable(&mut buf, object)?;
            }
            Envelope::Retraction(retraction) => {
                buf.put_u8(TAG_RETRACTION);
                encode_retraction(&mut buf, retraction)?;
            }
        }

        if buf.len() > MAX_ENVELOPE_SIZE {
            return Err(SporaError::InvalidWireFormat(format!(
                "Envelope too large: {} > {}",
                buf.len(),
                MAX_ENVELOPE_SIZE
            )));
        }

        Ok(buf.freeze())
    }

    /// Parse from bytes
    pub fn decode(data: &[u8]) -> SporaResult<Self> {
        if data.len() > MAX_ENVELOPE_SIZE {
            return Err(SporaError::InvalidWireFormat(format!(
                "Envelope too large: {} > {}",
                data.len(),
                MAX_ENVELOPE_SIZE
            )));
        }

        let mut reader = Reader::new(data);
        let mut magic = [0u8; 4];
        reader.copy_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(SporaError::InvalidWireFormat("Bad magic".into()));
        }

        let version = reader.u8()?;
        if version != WIRE_VERSION {
            return Err(SporaError::InvalidWireFormat(format!(
                "Unsupported version: {}",
                version
            )));
        }

        let envelope = match reader.u8()? {
            TAG_RELAYABLE => Envelope::Relayable(decode_relayable(&mut reader)?),
            TAG_RETRACTION => Envelope::Retraction(decode_retraction(&mut reader)?),
            other => {
                return Err(SporaError::InvalidWireFormat(format!(
                    "Unknown envelope tag: {:#04x}",
                    other
                )))
            }
        };

        if reader.remaining() != 0 {
            return Err(SporaError::InvalidWireFormat(format!(
                "{} trailing bytes",
                reader.remaining()
            )));
        }

        Ok(envelope)
    }
}

fn put_str(buf: &mut BytesMut, s: &str) -> SporaResult<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| SporaError::InvalidWireFormat(format!("String too long: {}", s.len())))?;
    buf.put_u16_le(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn put_blob(buf: &mut BytesMut, data: &[u8]) -> SporaResult<()> {
    let len = u32::try_from(data.len())
        .map_err(|_| SporaError::InvalidWireFormat(format!("Payload too long: {}", data.len())))?;
    buf.put_u32_le(len);
    buf.put_slice(data);
    Ok(())
}

/// Relayable body:
/// guid, parent kind (u8), parent guid, author, kind (u8), created_at (i64),
/// payload, author signature (64), flag (u8), parent author signature (64, iff flag)
fn encode_relayable(buf: &mut BytesMut, object: &RelayableObject) -> SporaResult<()> {
    let draft = &object.draft;
    put_str(buf, draft.guid.as_str())?;
    buf.put_u8(draft.parent.kind.to_byte());
    put_str(buf, draft.parent.guid.as_str())?;
    put_str(buf, draft.author.as_str())?;
    buf.put_u8(draft.kind().to_byte());
    buf.put_i64_le(draft.created_at.as_micros());
    put_blob(buf, draft.payload.canonical_bytes())?;
    buf.put_slice(object.author_signature.as_bytes());

    match &object.parent_author_signature {
        Some(sig) => {
            buf.put_u8(1);
            buf.put_slice(sig.as_bytes());
        }
        None => buf.put_u8(0),
    }
    Ok(())
}

fn decode_relayable(reader: &mut Reader<'_>) -> SporaResult<RelayableObject> {
    let guid = Guid::parse(&reader.str()?)?;
    let parent_kind = reader.u8()?;
    let parent_kind = ParentKind::from_byte(parent_kind).ok_or_else(|| {
        SporaError::InvalidWireFormat(format!("Unknown parent kind: {:#04x}", parent_kind))
    })?;
    let parent_guid = Guid::parse(&reader.str()?)?;
    let author = Handle::parse(&reader.str()?)?;
    let kind = reader.relayable_kind()?;
    let created_at = Timestamp::from_micros(reader.i64()?);
    let payload_bytes = reader.blob()?;
    let payload = Payload::from_parts(kind, &payload_bytes)
        .ok_or_else(|| SporaError::InvalidWireFormat(format!("Bad {} payload", kind)))?;
    let author_signature = reader.signature()?;

    let parent_author_signature = match reader.u8()? {
        0 => None,
        1 => Some(reader.signature()?),
        other => {
            return Err(SporaError::InvalidWireFormat(format!(
                "Bad signature flag: {}",
                other
            )))
        }
    };

    let draft = RelayableDraft {
        guid,
        parent: ParentRef::new(parent_kind, parent_guid),
        author,
        payload,
        created_at,
    };

    Ok(RelayableObject::new(
        draft,
        author_signature,
        parent_author_signature,
    ))
}

/// Retraction body: target guid, kind (u8), author, signature (64)
fn encode_retraction(buf: &mut BytesMut, retraction: &Retraction) -> SporaResult<()> {
    put_str(buf, retraction.target.as_str())?;
    buf.put_u8(retraction.kind.to_byte());
    put_str(buf, retraction.author.as_str())?;
    buf.put_slice(retraction.signature.as_bytes());
    Ok(())
}

fn decode_retraction(reader: &mut Reader<'_>) -> SporaResult<Retraction> {
    let target = Guid::parse(&reader.str()?)?;
    let kind = reader.relayable_kind()?;
    let author = Handle::parse(&reader.str()?)?;
    let signature = reader.signature()?;

    Ok(Retraction {
        target,
        kind,
        author,
        signature,
    })
}

/// Bounds-checked cursor over an input buffer
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf }
    }

    fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize) -> SporaResult<()> {
        if self.buf.remaining() < n {
            return Err(SporaError::BufferTooShort {
                expected: n,
                actual: self.buf.remaining(),
            });
        }
        Ok(())
    }

    fn u8(&mut self) -> SporaResult<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn i64(&mut self) -> SporaResult<i64> {
        self.need(8)?;
        Ok(self.buf.get_i64_le())
    }

    fn copy_exact(&mut self, dst: &mut [u8]) -> SporaResult<()> {
        self.need(dst.len())?;
        self.buf.copy_to_slice(dst);
        Ok(())
    }

    fn str(&mut self) -> SporaResult<String> {
        self.need(2)?;
        let len = self.buf.get_u16_le() as usize;
        self.need(len)?;
        let s = std::str::from_utf8(&self.buf[..len])
            .map_err(|_| SporaError::InvalidWireFormat("Invalid UTF-8".into()))?
            .to_string();
        self.buf.advance(len);
        Ok(s)
    }

    fn blob(&mut self) -> SporaResult<Vec<u8>> {
        self.need(4)?;
        let len = self.buf.get_u32_le() as usize;
        self.need(len)?;
        let data = self.buf[..len].to_vec();
        self.buf.advance(len);
        Ok(data)
    }

    fn signature(&mut self) -> SporaResult<Signature> {
        let mut sig = [0u8; SIGNATURE_SIZE];
        self.copy_exact(&mut sig)?;
        Ok(Signature(sig))
    }

    fn relayable_kind(&mut self) -> SporaResult<RelayableKind> {
        let b = self.u8()?;
        RelayableKind::from_byte(b)
            .ok_or_else(|| SporaError::InvalidWireFormat(format!("Unknown relayable kind: {:#04x}", b)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spora_crypto::Identity;

    fn signed_comment(countersigned: bool) -> RelayableObject {
        let author = Identity::generate();
        let owner = Identity::generate();
        let draft = RelayableDraft {
            guid: Guid::parse("aaaaaaaaaaaaaaaa0001").unwrap(),
            parent: ParentRef::post(Guid::parse("pppppppppppppppp0001").unwrap()),
            author: Handle::parse("alice@pod-x.example").unwrap(),
            payload: Payload::comment("ünïcode ok #tag"),
            created_at: Timestamp::from_micros(1_700_000_000_123_456),
        };
        let author_sig = author.sign(&draft.canonical_bytes());
        let owner_sig = countersigned.then(|| owner.sign(&draft.canonical_bytes()));
        RelayableObject::new(draft, author_sig, owner_sig)
    }

    #[test]
    fn test_relayable_envelope_preserves_signatures() {
        for countersigned in [true, false] {
            let object = signed_comment(countersigned);
            let bytes = Envelope::Relayable(object.clone()).encode().unwrap();
            let decoded = Envelope::decode(&bytes).unwrap();
            assert_eq!(decoded, Envelope::Relayable(object));
        }
    }

    #[test]
    fn test_retraction_envelope() {
        let retraction = Retraction {
            target: Guid::parse("aaaaaaaaaaaaaaaa0001").unwrap(),
            kind: RelayableKind::Like,
            author: Handle::parse("alice@pod-x.example").unwrap(),
            signature: Signature([7u8; 64]),
        };
        let bytes = Envelope::Retraction(retraction.clone()).encode().unwrap();
        assert_eq!(&bytes[..4], b"SPRA");
        assert_eq!(Envelope::decode(&bytes).unwrap(), Envelope::Retraction(retraction));
    }

    #[test]
    fn test_truncated_input_rejected() {
        let bytes = Envelope::Relayable(signed_comment(true)).encode().unwrap();
        for cut in [0, 3, ENVELOPE_HEADER_SIZE, bytes.len() / 2, bytes.len() - 1] {
            assert!(Envelope::decode(&bytes[..cut]).is_err(), "cut at {}", cut);
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = Envelope::Relayable(signed_comment(false)).encode().unwrap().to_vec();
        bytes.push(0);
        assert!(matches!(
            Envelope::decode(&bytes),
            Err(SporaError::InvalidWireFormat(_))
        ));
    }

    #[test]
    fn test_bad_header_rejected() {
        let mut bytes = Envelope::Relayable(signed_comment(false)).encode().unwrap().to_vec();
        bytes[0] = b'X';
        assert!(Envelope::decode(&bytes).is_err());

        let mut bytes = Envelope::Relayable(signed_comment(false)).encode().unwrap().to_vec();
        bytes[4] = 99;
        assert!(Envelope::decode(&bytes).is_err());

        let mut bytes = Envelope::Relayable(signed_comment(false)).encode().unwrap().to_vec();
        bytes[5] = 0x7f;
        assert!(Envelope::decode(&bytes).is_err());
    }

    #[test]
    fn test_like_with_payload_rejected() {
        let mut object = signed_comment(false);
        object.draft.payload = Payload::Like;
        let mut bytes = Envelope::Relayable(object).encode().unwrap().to_vec();

        // Splice a non-empty payload into the like: find the u32 zero length
        // right after created_at and bump it with one extra byte.
        let guid_len = 2 + 20;
        let parent_len = 1 + 2 + 20;
        let author_len = 2 + "alice@pod-x.example".len();
        let offset = ENVELOPE_HEADER_SIZE + guid_len + parent_len + author_len + 1 + 8;
        bytes[offset] = 1;
        bytes.insert(offset + 4, 0xAA);

        assert!(Envelope::decode(&bytes).is_err());
    }

    proptest::proptest! {
        #[test]
        fn prop_decode_never_panics(data in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..512)) {
            let _ = Envelope::decode(&data);
        }
    }
}
