//! The position key codec.
//!
//! A [`Key`] is a fixed 16-byte value: the 128-bit position hash with
//! its lowest bits (under [`PackedReverseMove::MASK`]) overwritten by
//! the packed reverse-move + classification tail.

use std::cmp::Ordering;

use crate::chess::{Position, ReverseMove};
use crate::chess::moves::PackedReverseMove;

/// Which of the two total orders over [`Key`] is in effect.
///
/// `FullOrder` is a refinement of `HashOnlyOrder`: sorting by
/// `FullOrder` also yields a `HashOnlyOrder`-valid ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderKind {
    /// Lexicographic over all four quads: distinguishes positions
    /// reached by different reverse moves.
    FullOrder,
    /// Identical to `FullOrder`, except the packed tail bits are
    /// masked off before comparing the last quad: positions reached by
    /// any reverse move collapse to one equivalence class.
    HashOnlyOrder,
}

/// A player-strength tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Human,
    Engine,
    Server,
}

impl Tier {
    /// 2-bit packed ordinal.
    pub fn packed_ordinal(self) -> u8 {
        match self {
            Tier::Human => 0,
            Tier::Engine => 1,
            Tier::Server => 2,
        }
    }

    /// Inverse of [`Self::packed_ordinal`].
    pub fn from_packed_ordinal(n: u8) -> Option<Tier> {
        match n {
            0 => Some(Tier::Human),
            1 => Some(Tier::Engine),
            2 => Some(Tier::Server),
            _ => None,
        }
    }

    /// Directory/file-name fragment used under per-classification-directory
    /// database layouts.
    pub fn dir_name(self) -> &'static str {
        match self {
            Tier::Human => "human",
            Tier::Engine => "engine",
            Tier::Server => "server",
        }
    }

    /// All tiers, in a fixed canonical order.
    pub fn all() -> [Tier; 3] {
        [Tier::Human, Tier::Engine, Tier::Server]
    }
}

/// A game outcome, from the perspective of "white/black/draw" rather
/// than the querying side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Outcome {
    #[serde(rename = "win")]
    WhiteWin,
    #[serde(rename = "loss")]
    BlackWin,
    #[serde(rename = "draw")]
    Draw,
}

impl Outcome {
    /// 2-bit packed ordinal.
    pub fn packed_ordinal(self) -> u8 {
        match self {
            Outcome::WhiteWin => 0,
            Outcome::BlackWin => 1,
            Outcome::Draw => 2,
        }
    }

    /// Inverse of [`Self::packed_ordinal`].
    pub fn from_packed_ordinal(n: u8) -> Option<Outcome> {
        match n {
            0 => Some(Outcome::WhiteWin),
            1 => Some(Outcome::BlackWin),
            2 => Some(Outcome::Draw),
            _ => None,
        }
    }

    /// Directory/file-name fragment used under per-classification-directory
    /// database layouts.
    pub fn dir_name(self) -> &'static str {
        match self {
            Outcome::WhiteWin => "w",
            Outcome::BlackWin => "l",
            Outcome::Draw => "d",
        }
    }

    /// All outcomes, in a fixed canonical order.
    pub fn all() -> [Outcome; 3] {
        [Outcome::WhiteWin, Outcome::BlackWin, Outcome::Draw]
    }
}

/// Classification of a game: which tier produced it, and its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Classification {
    pub tier: Tier,
    pub outcome: Outcome,
}

impl Classification {
    /// All nine (tier, outcome) combinations, in canonical order.
    pub fn all() -> [Classification; 9] {
        let mut out = [Classification { tier: Tier::Human, outcome: Outcome::WhiteWin }; 9];
        let mut i = 0;
        for tier in Tier::all() {
            for outcome in Outcome::all() {
                out[i] = Classification { tier, outcome };
                i += 1;
            }
        }
        out
    }
}

/// A fixed-width 16-byte position key: 128-bit position hash, with the
/// packed reverse move + classification tail folded into the lowest
/// bits of the last quad.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Key {
    /// Four 32-bit quads, most significant first (`quads[0]` is the
    /// high quad of the hash; `quads[3]` carries the packed tail).
    quads: [u32; 4],
}

impl Key {
    /// Build a key from a position, the reverse move that reached it,
    /// and its classification. For a game root, pass [`ReverseMove::root`]
    /// and `classification = None`.
    pub fn new(pos: &Position, reverse_move: ReverseMove, classification: Option<Classification>) -> Key {
        let hash = pos.hash();
        let mut quads = hash_to_quads(hash);
        let (tier, outcome) = classification
            .map(|c| (c.tier.packed_ordinal(), c.outcome.packed_ordinal()))
            .unwrap_or((0, 0));
        let packed = PackedReverseMove::with_classification(reverse_move, tier, outcome).packed();
        quads[3] = (quads[3] & !PackedReverseMove::MASK) | packed;
        Key { quads }
    }

    /// Build a key directly from its quads (e.g. read back off disk).
    pub fn from_quads(quads: [u32; 4]) -> Key {
        Key { quads }
    }

    /// The raw quads, most significant first.
    pub fn quads(self) -> [u32; 4] {
        self.quads
    }

    /// Serialize to 16 bytes, little-endian per quad (the manifest
    /// records this as the database's native layout).
    pub fn to_bytes(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        for (i, q) in self.quads.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&q.to_le_bytes());
        }
        out
    }

    /// Deserialize from 16 bytes written by [`Self::to_bytes`].
    pub fn from_bytes(bytes: [u8; 16]) -> Key {
        let mut quads = [0u32; 4];
        for i in 0..4 {
            quads[i] = u32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap());
        }
        Key { quads }
    }

    /// The packed reverse-move/classification tail.
    pub fn packed_reverse_move(self) -> PackedReverseMove {
        PackedReverseMove::from_packed(self.quads[3] & PackedReverseMove::MASK)
    }

    /// Compare two keys under the given order.
    pub fn compare(self, other: Key, order: OrderKind) -> Ordering {
        for i in 0..3 {
            match self.quads[i].cmp(&other.quads[i]) {
                Ordering::Equal => continue,
                other_ord => return other_ord,
            }
        }
        match order {
            OrderKind::FullOrder => self.quads[3].cmp(&other.quads[3]),
            OrderKind::HashOnlyOrder => {
                let mask = !PackedReverseMove::MASK;
                (self.quads[3] & mask).cmp(&(other.quads[3] & mask))
            }
        }
    }

    /// `self == other` under the given order.
    pub fn equals(self, other: Key, order: OrderKind) -> bool {
        self.compare(other, order) == Ordering::Equal
    }

    /// The key with its packed tail masked off: the `HashOnlyOrder`
    /// equivalence-class representative.
    pub fn hash_only(self) -> Key {
        let mut quads = self.quads;
        quads[3] &= !PackedReverseMove::MASK;
        Key { quads }
    }
}

fn hash_to_quads(hash: u128) -> [u32; 4] {
    let high64 = (hash >> 64) as u64;
    let low64 = hash as u64;
    // m_hash[0] is the most significant quad of the high 64 bits, etc.
    [
        (high64 >> 32) as u32,
        high64 as u32,
        (low64 >> 32) as u32,
        low64 as u32,
    ]
}

/// A comparator adapter used by sort/merge/index code, fixing an
/// [`OrderKind`] so it can be passed where a plain `Fn(Key, Key) -> Ordering`
/// is wanted, without threading a parameter through every call site.
#[derive(Debug, Clone, Copy)]
pub struct KeyComparator(pub OrderKind);

impl KeyComparator {
    pub fn cmp(self, a: Key, b: Key) -> Ordering {
        a.compare(b, self.0)
    }
}
