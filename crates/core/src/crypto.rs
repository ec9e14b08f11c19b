//! Digests, keys and signature recovery.

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{All, Message, Secp256k1};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::bytes::{ByteReader, ByteWriter};
use crate::error::{CoreError, Result};

fn secp() -> &'static Secp256k1<All> {
    static SECP: OnceLock<Secp256k1<All>> = OnceLock::new();
    SECP.get_or_init(Secp256k1::new)
}

/// sha256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// A 32-byte digest, rendered as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Checksum256(pub [u8; 32]);

impl Checksum256 {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Block ids embed the block number in their first four bytes.
    pub fn embedded_block_num(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }
}

impl fmt::Display for Checksum256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Checksum256 {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| CoreError::InvalidHex)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CoreError::InvalidHex)?;
        Ok(Checksum256(arr))
    }
}

impl From<[u8; 32]> for Checksum256 {
    fn from(bytes: [u8; 32]) -> Self {
        Checksum256(bytes)
    }
}

impl Serialize for Checksum256 {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Checksum256 {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Block id type alias; the first four bytes carry the block number.
pub type BlockId = Checksum256;

/// Transaction id type alias.
pub type TransactionId = Checksum256;

/// The 32-byte chain identifier mixed into signature digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainId(pub [u8; 32]);

impl ChainId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for ChainId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let c: Checksum256 = s.parse()?;
        Ok(ChainId(c.0))
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// A compressed secp256k1 public key in wire form: one curve-type byte
/// followed by the 33-byte compressed point.
///
/// The textual form is the `0x`-prefixed hex of the compressed point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey {
    curve: u8,
    data: [u8; 33],
}

impl PublicKey {
    pub fn from_parts(curve: u8, data: [u8; 33]) -> Self {
        Self { curve, data }
    }

    pub fn compressed_point(&self) -> &[u8; 33] {
        &self.data
    }

    pub(crate) fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        let curve = reader.read_u8()?;
        if curve > 1 {
            return Err(CoreError::InvalidPublicKey);
        }
        let data: [u8; 33] = reader
            .read_bytes(33)?
            .try_into()
            .map_err(|_| CoreError::InvalidPublicKey)?;
        Ok(Self { curve, data })
    }

    pub(crate) fn write(&self, writer: &mut ByteWriter) {
        writer.write_u8(self.curve);
        writer.write_bytes(&self.data);
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.data))
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// A recoverable secp256k1 signature in wire form: one curve-type byte
/// followed by 65 bytes (recovery byte, then r and s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    curve: u8,
    data: [u8; 65],
}

impl Signature {
    pub fn from_parts(curve: u8, data: [u8; 65]) -> Self {
        Self { curve, data }
    }

    /// Build a canonical signature from a recovery id and compact r ‖ s.
    pub fn from_recoverable(recovery_id: u8, compact: [u8; 64]) -> Self {
        let mut data = [0u8; 65];
        data[0] = recovery_id + 27 + 4;
        data[1..].copy_from_slice(&compact);
        Self { curve: 0, data }
    }

    pub(crate) fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        let curve = reader.read_u8()?;
        if curve > 1 {
            return Err(CoreError::InvalidSignature);
        }
        let data: [u8; 65] = reader
            .read_bytes(65)?
            .try_into()
            .map_err(|_| CoreError::InvalidSignature)?;
        Ok(Self { curve, data })
    }

    /// Recover the signing public key for `digest`.
    pub fn recover(&self, digest: &[u8; 32]) -> Result<PublicKey> {
        // only the K1 curve is recoverable here
        if self.curve != 0 {
            return Err(CoreError::RecoveryFailed);
        }
        let recid_raw = self.data[0].checked_sub(27 + 4).ok_or(CoreError::RecoveryFailed)?;
        let recid =
            RecoveryId::from_i32(i32::from(recid_raw & 0x03)).map_err(|_| CoreError::RecoveryFailed)?;
        let recoverable = RecoverableSignature::from_compact(&self.data[1..], recid)
            .map_err(|_| CoreError::RecoveryFailed)?;
        let msg = Message::from_digest_slice(digest).map_err(|_| CoreError::RecoveryFailed)?;
        let pubkey = secp()
            .recover_ecdsa(&msg, &recoverable)
            .map_err(|_| CoreError::RecoveryFailed)?;
        Ok(PublicKey::from_parts(0, pubkey.serialize()))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.data))
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}
