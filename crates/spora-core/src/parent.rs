//! Parent references
//!
//! A relayable attaches to a parent through a tagged reference
//! `{kind, guid}`. What may attach to what is decided by a small, closed
//! table of per-kind rules rather than by the parent type itself.

use std::fmt;

use crate::{Guid, RelayableKind};

/// Kinds of objects that relayables can attach to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ParentKind {
    Post = 0x01,
    Comment = 0x02,
}

/// Rules for one parent kind
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParentRules {
    /// Relayable kinds allowed to attach
    pub accepts: &'static [RelayableKind],
    /// Whether the parent records `interacted_at`
    pub tracks_interaction: bool,
}

const POST_RULES: ParentRules = ParentRules {
    accepts: &[RelayableKind::Comment, RelayableKind::Like],
    tracks_interaction: true,
};

const COMMENT_RULES: ParentRules = ParentRules {
    accepts: &[RelayableKind::Like],
    tracks_interaction: false,
};

impl ParentKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(ParentKind::Post),
            0x02 => Some(ParentKind::Comment),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Registry lookup
    pub fn rules(self) -> &'static ParentRules {
        match self {
            ParentKind::Post => &POST_RULES,
            ParentKind::Comment => &COMMENT_RULES,
        }
    }

    #[inline]
    pub fn accepts(self, kind: RelayableKind) -> bool {
        self.rules().accepts.contains(&kind)
    }

    pub fn name(self) -> &'static str {
        match self {
            ParentKind::Post => "post",
            ParentKind::Comment => "comment",
        }
    }
}

impl fmt::Display for ParentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Polymorphic parent reference
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParentRef {
    pub kind: ParentKind,
    pub guid: Guid,
}

impl ParentRef {
    pub fn new(kind: ParentKind, guid: Guid) -> Self {
        ParentRef { kind, guid }
    }

    pub fn post(guid: Guid) -> Self {
        ParentRef::new(ParentKind::Post, guid)
    }

    pub fn comment(guid: Guid) -> Self {
        ParentRef::new(ParentKind::Comment, guid)
    }
}

impl fmt::Display for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.guid)
    }
}
