//! Chain object model and ABI decoding for the eosearch indexer.
//!
//! This crate is the pure half of the system: names, chain objects, the ABI
//! definition with its binary codec, and the ABI-driven payload serializer.
//! It performs no I/O; the indexer crate layers queues, decoding policy and
//! the search backend on top.

#![warn(clippy::all)]

pub mod abi;
pub mod asset;
pub mod bytes;
pub mod crypto;
pub mod error;
pub mod name;
pub mod serializer;
pub mod types;

pub use abi::AbiDef;
pub use crypto::{BlockId, ChainId, Checksum256, PublicKey, Signature, TransactionId};
pub use error::CoreError;
pub use name::Name;
pub use serializer::{AbiSerializer, SpecialUnpack};
