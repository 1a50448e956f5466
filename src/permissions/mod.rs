pub mod cache;
pub mod query;
pub mod resolve;

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// Effective permission set as a 64-bit bitfield.
///
/// Bit layout is part of the wire protocol and must not be rearranged:
/// bits 0-19 are guild-scoped, bits 20-39 are channel-scoped, bit 63 is
/// `ADMINISTRATOR`. Serialized as a decimal string so 64-bit values survive
/// JSON number precision.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Permissions(u64);

impl Permissions {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(u64::MAX);

    // Guild-scoped (bits 0-19; 15-19 reserved).
    pub const MANAGE_CHANNELS: Self = Self(1 << 0);
    pub const MANAGE_GUILD: Self = Self(1 << 1);
    pub const MANAGE_PERMISSIONS: Self = Self(1 << 2);
    pub const MANAGE_ROLES: Self = Self(1 << 3);
    pub const MANAGE_EMOJI: Self = Self(1 << 4);
    pub const MANAGE_WEBHOOKS: Self = Self(1 << 5);
    pub const KICK_MEMBERS: Self = Self(1 << 6);
    pub const BAN_MEMBERS: Self = Self(1 << 7);
    pub const TIMEOUT_MEMBERS: Self = Self(1 << 8);
    pub const ASSIGN_ROLES: Self = Self(1 << 9);
    pub const CHANGE_NICKNAME: Self = Self(1 << 10);
    pub const MANAGE_NICKNAMES: Self = Self(1 << 11);
    pub const VIEW_AUDIT_LOG: Self = Self(1 << 12);
    pub const VIEW_INSIGHTS: Self = Self(1 << 13);
    pub const MENTION_EVERYONE: Self = Self(1 << 14);

    // Channel-scoped (bits 20-39).
    pub const VIEW_CHANNEL: Self = Self(1 << 20);
    pub const READ_MESSAGE_HISTORY: Self = Self(1 << 21);
    pub const SEND_MESSAGES: Self = Self(1 << 22);
    pub const MANAGE_MESSAGES: Self = Self(1 << 23);
    pub const EMBED_LINKS: Self = Self(1 << 24);
    pub const UPLOAD_FILES: Self = Self(1 << 25);
    pub const ADD_REACTIONS: Self = Self(1 << 26);
    pub const USE_EXTERNAL_EMOJI: Self = Self(1 << 27);
    pub const CONNECT: Self = Self(1 << 28);
    pub const SPEAK: Self = Self(1 << 29);
    pub const MUTE_MEMBERS: Self = Self(1 << 30);
    pub const DEAFEN_MEMBERS: Self = Self(1 << 31);
    pub const MOVE_MEMBERS: Self = Self(1 << 32);
    pub const USE_VAD: Self = Self(1 << 33);
    pub const PRIORITY_SPEAKER: Self = Self(1 << 34);
    pub const STREAM: Self = Self(1 << 35);
    pub const MASQUERADE: Self = Self(1 << 36);
    pub const CREATE_INVITES: Self = Self(1 << 37);
    pub const MANAGE_THREADS: Self = Self(1 << 38);
    pub const CREATE_THREADS: Self = Self(1 << 39);

    pub const ADMINISTRATOR: Self = Self(1 << 63);

    /// Bits a moderation timeout suspends. Viewing is untouched.
    pub const TIMEOUT_STRIPPED: Self = Self(
        Self::SEND_MESSAGES.0
            | Self::ADD_REACTIONS.0
            | Self::CONNECT.0
            | Self::SPEAK.0
            | Self::STREAM.0
            | Self::CREATE_THREADS.0
            | Self::CREATE_INVITES.0,
    );

    /// Base grant for the `@everyone` position in a fresh guild.
    pub const DEFAULT_EVERYONE: Self = Self(
        Self::VIEW_CHANNEL.0
            | Self::READ_MESSAGE_HISTORY.0
            | Self::SEND_MESSAGES.0
            | Self::EMBED_LINKS.0
            | Self::UPLOAD_FILES.0
            | Self::ADD_REACTIONS.0
            | Self::USE_EXTERNAL_EMOJI.0
            | Self::CONNECT.0
            | Self::SPEAK.0
            | Self::USE_VAD.0
            | Self::STREAM.0
            | Self::CREATE_INVITES.0
            | Self::CHANGE_NICKNAME.0,
    );

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Database round-trip: sqlite stores the field as a signed BIGINT.
    pub const fn from_db(raw: i64) -> Self {
        Self(raw as u64)
    }

    pub const fn to_db(self) -> i64 {
        self.0 as i64
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// One allow/deny overwrite step: grant `allow`, then clear `deny`.
    /// Deny wins when the same bit appears in both halves of a single pair.
    pub const fn apply(self, allow: Self, deny: Self) -> Self {
        Self((self.0 | allow.0) & !deny.0)
    }
}

impl std::ops::BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Permissions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Permissions({:#018x})", self.0)
    }
}

impl Serialize for Permissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BitsVisitor;

        impl Visitor<'_> for BitsVisitor {
            type Value = Permissions;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a permission bitfield as a decimal string or integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Permissions, E> {
                v.parse::<u64>()
                    .map(Permissions)
                    .map_err(|_| E::custom("invalid permission bitfield"))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Permissions, E> {
                Ok(Permissions(v))
            }
        }

        deserializer.deserialize_any(BitsVisitor)
    }
}
