//! The chain object model observed through the four host signals.
//!
//! These are plain data carriers: the host chain hands them over by
//! reference-counted pointer and the indexer only reads them. Binary decode
//! is implemented exactly where the indexer needs it (system action payloads
//! and the authority structures they contain); transaction packing exists to
//! rebuild the signature digest for key recovery.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::bytes::{ByteReader, ByteWriter};
use crate::crypto::{sha256, BlockId, ChainId, Checksum256, PublicKey, Signature, TransactionId};
use crate::error::Result;
use crate::name::Name;

/// An authorization: which account acts under which permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PermissionLevel {
    pub actor: Name,
    pub permission: Name,
}

impl PermissionLevel {
    fn read(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            actor: Name::from_u64(r.read_u64()?),
            permission: Name::from_u64(r.read_u64()?),
        })
    }

    fn write(&self, w: &mut ByteWriter) {
        w.write_u64(self.actor.as_u64());
        w.write_u64(self.permission.as_u64());
    }
}

/// A public key with its voting weight inside an authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyWeight {
    pub key: PublicKey,
    pub weight: u16,
}

/// A delegated account with its weight inside an authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionLevelWeight {
    pub permission: PermissionLevel,
    pub weight: u16,
}

/// A time delay with its weight inside an authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WaitWeight {
    pub wait_sec: u32,
    pub weight: u16,
}

/// The keys, delegated accounts and waits behind one permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Authority {
    pub threshold: u32,
    pub keys: Vec<KeyWeight>,
    pub accounts: Vec<PermissionLevelWeight>,
    pub waits: Vec<WaitWeight>,
}

impl Authority {
    pub(crate) fn read(r: &mut ByteReader<'_>) -> Result<Self> {
        let threshold = r.read_u32()?;

        let key_count = r.read_varuint32()?;
        let mut keys = Vec::with_capacity(key_count.min(64) as usize);
        for _ in 0..key_count {
            let key = PublicKey::read(r)?;
            let weight = r.read_u16()?;
            keys.push(KeyWeight { key, weight });
        }

        let account_count = r.read_varuint32()?;
        let mut accounts = Vec::with_capacity(account_count.min(64) as usize);
        for _ in 0..account_count {
            let permission = PermissionLevel::read(r)?;
            let weight = r.read_u16()?;
            accounts.push(PermissionLevelWeight { permission, weight });
        }

        let wait_count = r.read_varuint32()?;
        let mut waits = Vec::with_capacity(wait_count.min(64) as usize);
        for _ in 0..wait_count {
            let wait_sec = r.read_u32()?;
            let weight = r.read_u16()?;
            waits.push(WaitWeight { wait_sec, weight });
        }

        Ok(Self { threshold, keys, accounts, waits })
    }

    /// Encode in wire form; used by tests building `newaccount` payloads.
    pub fn to_bytes_into(&self, w: &mut ByteWriter) {
        w.write_u32(self.threshold);
        w.write_varuint32(self.keys.len() as u32);
        for k in &self.keys {
            k.key.write(w);
            w.write_u16(k.weight);
        }
        w.write_varuint32(self.accounts.len() as u32);
        for a in &self.accounts {
            a.permission.write(w);
            w.write_u16(a.weight);
        }
        w.write_varuint32(self.waits.len() as u32);
        for wt in &self.waits {
            w.write_u32(wt.wait_sec);
            w.write_u16(wt.weight);
        }
    }
}

/// The smallest unit of on-chain effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub account: Name,
    pub name: Name,
    pub authorization: Vec<PermissionLevel>,
    /// Opaque payload, interpreted against the receiver's ABI.
    pub data: Vec<u8>,
}

impl Action {
    fn write(&self, w: &mut ByteWriter) {
        w.write_u64(self.account.as_u64());
        w.write_u64(self.name.as_u64());
        w.write_varuint32(self.authorization.len() as u32);
        for auth in &self.authorization {
            auth.write(w);
        }
        w.write_length_prefixed(&self.data);
    }
}

/// `newaccount` system action payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub creator: Name,
    pub name: Name,
    pub owner: Authority,
    pub active: Authority,
}

impl NewAccount {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(data);
        Ok(Self {
            creator: Name::from_u64(r.read_u64()?),
            name: Name::from_u64(r.read_u64()?),
            owner: Authority::read(&mut r)?,
            active: Authority::read(&mut r)?,
        })
    }
}

/// `updateauth` system action payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateAuth {
    pub account: Name,
    pub permission: Name,
    pub parent: Name,
    pub auth: Authority,
}

impl UpdateAuth {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(data);
        Ok(Self {
            account: Name::from_u64(r.read_u64()?),
            permission: Name::from_u64(r.read_u64()?),
            parent: Name::from_u64(r.read_u64()?),
            auth: Authority::read(&mut r)?,
        })
    }
}

/// `deleteauth` system action payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteAuth {
    pub account: Name,
    pub permission: Name,
}

impl DeleteAuth {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(data);
        Ok(Self {
            account: Name::from_u64(r.read_u64()?),
            permission: Name::from_u64(r.read_u64()?),
        })
    }
}

/// `setabi` system action payload; `abi` is the binary ABI blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetAbi {
    pub account: Name,
    pub abi: Vec<u8>,
}

impl SetAbi {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(data);
        Ok(Self {
            account: Name::from_u64(r.read_u64()?),
            abi: r.read_length_prefixed()?.to_vec(),
        })
    }
}

/// Terminal status of a transaction receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Executed,
    SoftFail,
    HardFail,
    Delayed,
    Expired,
}

/// The receipt header attached to an applied transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransactionReceiptHeader {
    pub status: TransactionStatus,
    pub cpu_usage_us: u32,
    pub net_usage_words: u32,
}

/// A transaction body: header fields plus its action lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub expiration: DateTime<Utc>,
    pub ref_block_num: u16,
    pub ref_block_prefix: u32,
    pub max_net_usage_words: u32,
    pub max_cpu_usage_ms: u8,
    pub delay_sec: u32,
    pub context_free_actions: Vec<Action>,
    pub actions: Vec<Action>,
    pub transaction_extensions: Vec<(u16, Vec<u8>)>,
}

impl Transaction {
    /// Wire encoding, as hashed into the signature digest.
    pub fn pack(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u32(self.expiration.timestamp() as u32);
        w.write_u16(self.ref_block_num);
        w.write_u32(self.ref_block_prefix);
        w.write_varuint32(self.max_net_usage_words);
        w.write_u8(self.max_cpu_usage_ms);
        w.write_varuint32(self.delay_sec);
        w.write_varuint32(self.context_free_actions.len() as u32);
        for a in &self.context_free_actions {
            a.write(&mut w);
        }
        w.write_varuint32(self.actions.len() as u32);
        for a in &self.actions {
            a.write(&mut w);
        }
        w.write_varuint32(self.transaction_extensions.len() as u32);
        for (tag, payload) in &self.transaction_extensions {
            w.write_u16(*tag);
            w.write_length_prefixed(payload);
        }
        w.into_inner()
    }
}

/// A transaction with its signatures and context-free data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub signatures: Vec<Signature>,
    pub context_free_data: Vec<Vec<u8>>,
}

impl SignedTransaction {
    /// The digest each signature commits to:
    /// `sha256(chain_id ‖ packed_trx ‖ cfd_digest)`.
    pub fn signature_digest(&self, chain_id: &ChainId) -> [u8; 32] {
        let mut preimage = Vec::new();
        preimage.extend_from_slice(chain_id.as_bytes());
        preimage.extend_from_slice(&self.transaction.pack());
        if self.context_free_data.is_empty() {
            preimage.extend_from_slice(&[0u8; 32]);
        } else {
            let mut w = ByteWriter::new();
            w.write_varuint32(self.context_free_data.len() as u32);
            for blob in &self.context_free_data {
                w.write_length_prefixed(blob);
            }
            preimage.extend_from_slice(&sha256(&w.into_inner()));
        }
        sha256(&preimage)
    }

    /// Recover the signing public keys, sorted and deduplicated.
    pub fn recover_keys(&self, chain_id: &ChainId) -> Result<Vec<PublicKey>> {
        let digest = self.signature_digest(chain_id);
        let mut keys = Vec::with_capacity(self.signatures.len());
        for sig in &self.signatures {
            keys.push(sig.recover(&digest)?);
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

/// An accepted transaction as delivered by the host signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionMetadata {
    pub id: TransactionId,
    pub trx: SignedTransaction,
    /// Signing keys the host already recovered, when available.
    pub signing_keys: Option<Vec<PublicKey>>,
    pub accepted: bool,
    pub implicit: bool,
    pub scheduled: bool,
}

/// The receipt attached to one executed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionReceipt {
    pub receiver: Name,
    pub act_digest: Checksum256,
    pub global_sequence: u64,
    pub recv_sequence: u64,
    pub auth_sequence: Vec<(Name, u64)>,
    pub code_sequence: u32,
    pub abi_sequence: u32,
}

/// The result of executing one action, with the inline actions it spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionTrace {
    pub receipt: ActionReceipt,
    pub act: Action,
    pub context_free: bool,
    pub elapsed_us: i64,
    pub console: String,
    pub trx_id: TransactionId,
    pub inline_traces: Vec<ActionTrace>,
}

/// The full trace of one applied transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionTrace {
    pub id: TransactionId,
    pub block_num: u32,
    pub block_time: DateTime<Utc>,
    /// Absent for traces that never made it into a block.
    pub receipt: Option<TransactionReceiptHeader>,
    pub elapsed_us: i64,
    pub net_usage: u64,
    pub scheduled: bool,
    pub action_traces: Vec<ActionTrace>,
    /// Error message when execution failed.
    pub except: Option<String>,
}

impl TransactionTrace {
    /// A trace counts as executed only when a receipt is present and marks
    /// the transaction executed.
    pub fn is_executed(&self) -> bool {
        matches!(
            self.receipt,
            Some(TransactionReceiptHeader { status: TransactionStatus::Executed, .. })
        )
    }
}

/// The transaction payload carried inside a block: either just the id (for
/// deferred transactions) or the full signed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionVariant {
    Id(TransactionId),
    Full(Box<SignedTransaction>),
}

/// One entry of a block's transaction list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub header: TransactionReceiptHeader,
    pub trx: TransactionVariant,
}

/// The signed header of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockHeader {
    pub timestamp: DateTime<Utc>,
    pub producer: Name,
    pub confirmed: u16,
    pub previous: BlockId,
    pub transaction_mroot: Checksum256,
    pub action_mroot: Checksum256,
    pub schedule_version: u32,
}

/// A full block body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBlock {
    pub header: BlockHeader,
    pub producer_signature: Signature,
    pub transactions: Vec<TransactionReceipt>,
}

/// A block plus the validation metadata produced by the host chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockState {
    pub block_num: u32,
    pub id: BlockId,
    pub validated: bool,
    pub in_current_chain: bool,
    pub block: SignedBlock,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256;
    use secp256k1::{Message, Secp256k1, SecretKey};

    fn test_authority(seed: u8) -> Authority {
        Authority {
            threshold: 1,
            keys: vec![KeyWeight {
                key: PublicKey::from_parts(0, [seed; 33]),
                weight: 1,
            }],
            accounts: vec![PermissionLevelWeight {
                permission: PermissionLevel {
                    actor: Name::new("delegatee").unwrap(),
                    permission: Name::new("active").unwrap(),
                },
                weight: 1,
            }],
            waits: vec![],
        }
    }

    #[test]
    fn newaccount_round_trip() {
        let mut w = ByteWriter::new();
        w.write_u64(Name::new("eosio").unwrap().as_u64());
        w.write_u64(Name::new("alice").unwrap().as_u64());
        test_authority(2).to_bytes_into(&mut w);
        test_authority(3).to_bytes_into(&mut w);

        let decoded = NewAccount::from_bytes(&w.into_inner()).unwrap();
        assert_eq!(decoded.creator.to_string(), "eosio");
        assert_eq!(decoded.name.to_string(), "alice");
        assert_eq!(decoded.owner, test_authority(2));
        assert_eq!(decoded.active, test_authority(3));
    }

    #[test]
    fn setabi_round_trip() {
        let mut w = ByteWriter::new();
        w.write_u64(Name::new("alice").unwrap().as_u64());
        w.write_length_prefixed(&[1, 2, 3]);
        let decoded = SetAbi::from_bytes(&w.into_inner()).unwrap();
        assert_eq!(decoded.account.to_string(), "alice");
        assert_eq!(decoded.abi, vec![1, 2, 3]);
    }

    #[test]
    fn deleteauth_rejects_short_input() {
        assert!(DeleteAuth::from_bytes(&[0u8; 8]).is_err());
    }

    #[test]
    fn executed_requires_receipt() {
        let mut trace = TransactionTrace {
            id: Checksum256::default(),
            block_num: 1,
            block_time: Utc::now(),
            receipt: None,
            elapsed_us: 0,
            net_usage: 0,
            scheduled: false,
            action_traces: vec![],
            except: None,
        };
        assert!(!trace.is_executed());

        trace.receipt = Some(TransactionReceiptHeader {
            status: TransactionStatus::SoftFail,
            cpu_usage_us: 0,
            net_usage_words: 0,
        });
        assert!(!trace.is_executed());

        trace.receipt = Some(TransactionReceiptHeader {
            status: TransactionStatus::Executed,
            cpu_usage_us: 0,
            net_usage_words: 0,
        });
        assert!(trace.is_executed());
    }

    #[test]
    fn recover_keys_matches_signer() {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[0x33; 32]).unwrap();
        let expected = sk.public_key(&secp).serialize();

        let trx = Transaction {
            expiration: DateTime::from_timestamp(1_600_000_000, 0).unwrap(),
            ref_block_num: 7,
            ref_block_prefix: 99,
            max_net_usage_words: 0,
            max_cpu_usage_ms: 0,
            delay_sec: 0,
            context_free_actions: vec![],
            actions: vec![Action {
                account: Name::new("eosio.token").unwrap(),
                name: Name::new("transfer").unwrap(),
                authorization: vec![PermissionLevel {
                    actor: Name::new("alice").unwrap(),
                    permission: Name::new("active").unwrap(),
                }],
                data: vec![0xaa, 0xbb],
            }],
            transaction_extensions: vec![],
        };

        let chain_id = ChainId(sha256(b"test chain"));
        let mut signed = SignedTransaction {
            transaction: trx,
            signatures: vec![],
            context_free_data: vec![],
        };

        let digest = signed.signature_digest(&chain_id);
        let msg = Message::from_digest_slice(&digest).unwrap();
        let sig = secp.sign_ecdsa_recoverable(&msg, &sk);
        let (recid, compact) = sig.serialize_compact();
        signed.signatures.push(Signature::from_recoverable(recid.to_i32() as u8, compact));

        let keys = signed.recover_keys(&chain_id).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].compressed_point(), &expected);
    }
}
