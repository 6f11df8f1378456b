//! Relayable objects
//!
//! A relayable is a reply-type object (comment or like) attached to a
//! parent owned by some other participant. Its identity, authorship,
//! parent linkage and payload are fixed at creation and covered by the
//! author's signature; when the author is not the parent owner, the same
//! bytes are countersigned by the owner.

use std::collections::BTreeSet;
use std::fmt;

use bytes::BufMut;

use crate::{Guid, Handle, ParentRef, Timestamp, ValidationError};

/// Default comment length limit (characters)
pub const DEFAULT_MAX_COMMENT_LENGTH: usize = 65_535;

/// Domain separator for relayable canonical bytes
pub const RELAYABLE_DOMAIN: &[u8] = b"spora.relayable.v1";

/// Domain separator for retraction canonical bytes
pub const RETRACTION_DOMAIN: &[u8] = b"spora.retraction.v1";

/// Relayable kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum RelayableKind {
    Comment = 0x01,
    Like = 0x02,
}

impl RelayableKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(RelayableKind::Comment),
            0x02 => Some(RelayableKind::Like),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for RelayableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayableKind::Comment => f.write_str("comment"),
            RelayableKind::Like => f.write_str("like"),
        }
    }
}

/// Kind-specific content
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Comment { text: String },
    Like,
}

impl Payload {
    pub fn comment(text: impl Into<String>) -> Self {
        Payload::Comment { text: text.into() }
    }

    pub fn kind(&self) -> RelayableKind {
        match self {
            Payload::Comment { .. } => RelayableKind::Comment,
            Payload::Like => RelayableKind::Like,
        }
    }

    /// Bytes that enter the canonical representation
    pub fn canonical_bytes(&self) -> &[u8] {
        match self {
            Payload::Comment { text } => text.as_bytes(),
            Payload::Like => &[],
        }
    }

    /// Rebuild a payload from its kind and canonical bytes
    pub fn from_parts(kind: RelayableKind, bytes: &[u8]) -> Option<Self> {
        match kind {
            RelayableKind::Comment => {
                let text = std::str::from_utf8(bytes).ok()?;
                Some(Payload::comment(text))
            }
            RelayableKind::Like if bytes.is_empty() => Some(Payload::Like),
            RelayableKind::Like => None,
        }
    }

    /// Trim text-bearing payloads and enforce presence and length.
    /// Must run before any signature is computed.
    pub fn normalized(self, max_comment_length: usize) -> Result<Self, ValidationError> {
        match self {
            Payload::Comment { text } => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(ValidationError::EmptyPayload);
                }
                let len = text.chars().count();
                if len > max_comment_length {
                    return Err(ValidationError::PayloadTooLong {
                        len,
                        max: max_comment_length,
                    });
                }
                Ok(Payload::comment(text))
            }
            Payload::Like => Ok(Payload::Like),
        }
    }

    /// Hashtags mentioned in a comment, lowercased and deduplicated
    pub fn tags(&self) -> BTreeSet<String> {
        match self {
            Payload::Comment { text } => extract_tags(text),
            Payload::Like => BTreeSet::new(),
        }
    }
}

fn extract_tags(text: &str) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    let mut prev: Option<char> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let at_boundary = prev.map_or(true, char::is_whitespace);
        prev = Some(c);
        if c != '#' || !at_boundary {
            continue;
        }

        let start = i + c.len_utf8();
        let mut end = start;
        while let Some(&(j, next)) = chars.peek() {
            if next.is_alphanumeric() || next == '_' || next == '-' {
                end = j + next.len_utf8();
                prev = Some(next);
                chars.next();
            } else {
                break;
            }
        }

        if end > start {
            tags.insert(text[start..end].to_lowercase());
        }
    }

    tags
}

/// Detached Ed25519 signature
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    #[inline]
    pub fn to_bytes(self) -> [u8; 64] {
        self.0
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sig(")?;
        for b in &self.0[..6] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..)")
    }
}

fn put_field(buf: &mut Vec<u8>, field: &[u8]) {
    buf.put_u32_le(field.len() as u32);
    buf.put_slice(field);
}

/// The immutable part of a relayable, before any signature exists
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayableDraft {
    pub guid: Guid,
    pub parent: ParentRef,
    pub author: Handle,
    pub payload: Payload,
    pub created_at: Timestamp,
}

impl RelayableDraft {
    /// Start a new local draft with a fresh guid
    pub fn new(author: Handle, parent: ParentRef, payload: Payload) -> Self {
        RelayableDraft {
            guid: Guid::generate(),
            parent,
            author,
            payload,
            created_at: Timestamp::now(),
        }
    }

    pub fn kind(&self) -> RelayableKind {
        self.payload.kind()
    }

    /// Deterministic bytes covered by both signatures.
    ///
    /// Layout: domain tag, then guid, parent kind, parent guid, author,
    /// relayable kind and payload, each variable field prefixed with its
    /// u32 LE length. Signatures and derived fields never enter.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let payload = self.payload.canonical_bytes();
        let mut buf = Vec::with_capacity(
            RELAYABLE_DOMAIN.len()
                + self.guid.as_str().len()
                + self.parent.guid.as_str().len()
                + self.author.as_str().len()
                + payload.len()
                + 18,
        );

        put_field(&mut buf, RELAYABLE_DOMAIN);
        put_field(&mut buf, self.guid.as_str().as_bytes());
        buf.put_u8(self.parent.kind.to_byte());
        put_field(&mut buf, self.parent.guid.as_str().as_bytes());
        put_field(&mut buf, self.author.as_str().as_bytes());
        buf.put_u8(self.kind().to_byte());
        put_field(&mut buf, payload);
        buf
    }
}

/// A signed relayable object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayableObject {
    pub draft: RelayableDraft,
    pub author_signature: Signature,
    /// Present iff the author is not the parent owner
    pub parent_author_signature: Option<Signature>,
}

impl RelayableObject {
    pub fn new(
        draft: RelayableDraft,
        author_signature: Signature,
        parent_author_signature: Option<Signature>,
    ) -> Self {
        RelayableObject {
            draft,
            author_signature,
            parent_author_signature,
        }
    }

    #[inline]
    pub fn guid(&self) -> &Guid {
        &self.draft.guid
    }

    #[inline]
    pub fn author(&self) -> &Handle {
        &self.draft.author
    }

    #[inline]
    pub fn parent(&self) -> &ParentRef {
        &self.draft.parent
    }

    #[inline]
    pub fn payload(&self) -> &Payload {
        &self.draft.payload
    }

    #[inline]
    pub fn kind(&self) -> RelayableKind {
        self.draft.kind()
    }

    #[inline]
    pub fn created_at(&self) -> Timestamp {
        self.draft.created_at
    }

    pub fn canonical_bytes(&self) -> Vec<u8> {
        self.draft.canonical_bytes()
    }

    /// Does this object need the parent owner's countersignature?
    #[inline]
    pub fn requires_parent_author_signature(&self, parent_owner: &Handle) -> bool {
        self.author() != parent_owner
    }

    /// Presentation order within a parent: `created_at`, then guid
    pub fn presentation_key(&self) -> (Timestamp, &Guid) {
        (self.created_at(), self.guid())
    }
}

/// Deterministic bytes an author signs to retract one of their relayables
pub fn retraction_canonical_bytes(target: &Guid, kind: RelayableKind, author: &Handle) -> Vec<u8> {
    let mut buf = Vec::new();
    put_field(&mut buf, RETRACTION_DOMAIN);
    put_field(&mut buf, target.as_str().as_bytes());
    buf.put_u8(kind.to_byte());
    put_field(&mut buf, author.as_str().as_bytes());
    buf
}
