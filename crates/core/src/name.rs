//! Base-32 encoded account, action and permission names.
//!
//! A name packs up to 13 characters from the alphabet `.12345a-z` into a
//! `u64`: twelve 5-bit characters and one trailing 4-bit character. The
//! all-zero name renders as the empty string and doubles as the wildcard in
//! filter rules.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

const CHARMAP: &[u8; 32] = b".12345abcdefghijklmnopqrstuvwxyz";

/// A 64-bit chain name (account, action or permission).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Name(u64);

impl Name {
    /// The empty name, used as the wildcard in filter entries.
    pub const ZERO: Name = Name(0);

    /// Wrap a raw 64-bit value.
    pub const fn from_u64(value: u64) -> Self {
        Name(value)
    }

    /// Get the raw 64-bit value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// True for the empty (wildcard) name.
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Parse a name, validating length and alphabet.
    pub fn new(s: &str) -> Result<Self, CoreError> {
        if s.len() > 13 {
            return Err(CoreError::InvalidName(s.to_string()));
        }

        let mut value: u64 = 0;
        for (i, c) in s.bytes().enumerate() {
            let sym = char_to_symbol(c).ok_or_else(|| CoreError::InvalidName(s.to_string()))?;
            if i < 12 {
                value |= (sym as u64 & 0x1f) << (64 - 5 * (i + 1));
            } else {
                // 13th character only has 4 bits of room
                if sym > 0x0f {
                    return Err(CoreError::InvalidName(s.to_string()));
                }
                value |= sym as u64 & 0x0f;
            }
        }
        Ok(Name(value))
    }
}

fn char_to_symbol(c: u8) -> Option<u8> {
    match c {
        b'.' => Some(0),
        b'1'..=b'5' => Some(c - b'1' + 1),
        b'a'..=b'z' => Some(c - b'a' + 6),
        _ => None,
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chars = [b'.'; 13];
        let mut tmp = self.0;
        for i in 0..13 {
            let mask = if i == 0 { 0x0f } else { 0x1f };
            chars[12 - i] = CHARMAP[(tmp & mask) as usize];
            tmp >>= if i == 0 { 4 } else { 5 };
        }
        let trimmed = {
            let mut end = 13;
            while end > 0 && chars[end - 1] == b'.' {
                end -= 1;
            }
            &chars[..end]
        };
        // charset is pure ASCII
        f.write_str(std::str::from_utf8(trimmed).expect("name charset is ascii"))
    }
}

impl FromStr for Name {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Name::new(s)
    }
}

impl From<u64> for Name {
    fn from(value: u64) -> Self {
        Name(value)
    }
}

impl Serialize for Name {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Name::new(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_common_names() {
        for s in ["eosio", "eosio.token", "alice", "transfer", "owner", "active"] {
            let n = Name::new(s).unwrap();
            assert_eq!(n.to_string(), s, "round trip of {s}");
        }
    }

    #[test]
    fn empty_name_is_zero() {
        let n = Name::new("").unwrap();
        assert_eq!(n, Name::ZERO);
        assert_eq!(n.to_string(), "");
        assert!(n.is_empty());
    }

    #[test]
    fn thirteen_character_names() {
        let n = Name::new("aaaaaaaaaaaaa").unwrap();
        assert_eq!(n.to_string(), "aaaaaaaaaaaaa");
        // 13th char is restricted to the 4-bit range '.'..'j'
        assert!(Name::new("aaaaaaaaaaaaz").is_err());
    }

    #[test]
    fn rejects_invalid_input() {
        assert!(Name::new("Alice").is_err());
        assert!(Name::new("has space").is_err());
        assert!(Name::new("0digit").is_err());
        assert!(Name::new("aaaaaaaaaaaaaa").is_err());
    }

    #[test]
    fn trailing_dots_are_trimmed() {
        let n = Name::new("abc").unwrap();
        assert_eq!(Name::from_u64(n.as_u64()).to_string(), "abc");
    }

    #[test]
    fn serde_as_string() {
        let n = Name::new("eosio.token").unwrap();
        let json = serde_json::to_string(&n).unwrap();
        assert_eq!(json, "\"eosio.token\"");
        let back: Name = serde_json::from_str(&json).unwrap();
        assert_eq!(back, n);
    }
}
