//! Identifiers for channels, generations and participants.
//!
//! Every identifier has a single canonical byte encoding used in derivation
//! contexts and domain separators. Composite keys are tuples with a total
//! order, never concatenated strings.

use std::{fmt, ops::Add, time::Duration};

use serde::{Deserialize, Serialize};

/// Wall-clock time in milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Timestamp from milliseconds since the Unix epoch.
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Milliseconds since the Unix epoch.
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// `self - duration`, clamped at the Unix epoch.
    pub fn saturating_sub(self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration_millis(duration)))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0.saturating_add(duration_millis(rhs)))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Milliseconds in `duration`, saturating at `u64::MAX`.
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// An opaque participant identity (e.g. a principal).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identity(Vec<u8>);

impl Identity {
    /// Wrap raw identity bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw identity bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if !s.is_empty() && s.chars().all(|c| c.is_ascii_graphic()) => f.write_str(s),
            _ => {
                f.write_str("0x")?;
                for byte in &self.0 {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            },
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({self})")
    }
}

/// A conversation: a direct channel between two identities or a group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChannelId {
    /// Two participants, stored in sorted order
    Direct(Identity, Identity),
    /// Group with a service-assigned id
    Group(u64),
}

impl ChannelId {
    const DIRECT_TAG: u8 = 0;
    const GROUP_TAG: u8 = 1;

    /// Direct channel between `a` and `b`, independent of argument order.
    pub fn direct(a: Identity, b: Identity) -> Self {
        if a <= b { Self::Direct(a, b) } else { Self::Direct(b, a) }
    }

    /// Group channel.
    pub fn group(id: u64) -> Self {
        Self::Group(id)
    }

    /// Canonical encoding.
    ///
    /// - Direct: `0x00 || u64_be(len a) || a || u64_be(len b) || b`
    /// - Group: `0x01 || u64_be(id)`
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Direct(a, b) => {
                let mut out = Vec::with_capacity(1 + 16 + a.0.len() + b.0.len());
                out.push(Self::DIRECT_TAG);
                for id in [a, b] {
                    out.extend_from_slice(&(id.0.len() as u64).to_be_bytes());
                    out.extend_from_slice(&id.0);
                }
                out
            },
            Self::Group(id) => {
                let mut out = Vec::with_capacity(9);
                out.push(Self::GROUP_TAG);
                out.extend_from_slice(&id.to_be_bytes());
                out
            },
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(a, b) => write!(f, "direct:{a}/{b}"),
            Self::Group(id) => write!(f, "group:{id}"),
        }
    }
}

/// Index of a root key in a channel's history.
///
/// A new generation starts whenever the channel's membership changes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct GenerationId(pub u64);

impl GenerationId {
    /// The generation after this one.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key of the epoch-key table: one ratchet per (channel, generation).
///
/// Orders by channel first, so all generations of a channel are contiguous.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EpochKeyId {
    /// Channel the key belongs to
    pub channel: ChannelId,
    /// Generation within the channel
    pub generation: GenerationId,
}

impl EpochKeyId {
    /// Key id for `generation` of `channel`.
    pub fn new(channel: ChannelId, generation: GenerationId) -> Self {
        Self { channel, generation }
    }
}

impl fmt::Display for EpochKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.channel, self.generation)
    }
}
