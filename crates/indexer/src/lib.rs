//! Chain event ingestion into Elasticsearch document collections.
//!
//! The host chain delivers four concurrent callback streams (accepted
//! transactions, applied transaction traces, accepted blocks, irreversible
//! blocks) and this crate projects them, with ABI-decoded payloads, into
//! the named collections of one physical index.
//!
//! # Architecture
//!
//! ```text
//! host signals ──► IngestHandle (producer side, adaptive backpressure)
//!                      │
//!                IngressQueues (4 FIFOs, one mutex, Notify wakeup)
//!                      │
//!                 Consumer (single worker task)
//!                      ├── Decoder ──► AbiCache ──► accounts/_source.abi
//!                      ├── ActionFilter
//!                      ├── AccountProjection (accounts, pub_keys,
//!                      │                      account_controls)
//!                      └── SearchBackend (ElasticClient over reqwest)
//! ```
//!
//! The [`plugin::Indexer`] ties it together: index bootstrap, the start-block
//! gate, the quit signal on non-recoverable backend errors, and drain-on-
//! shutdown.

#![warn(clippy::all)]

pub mod abi_cache;
pub mod accounts;
pub mod collections;
pub mod config;
pub mod consumer;
pub mod decoder;
pub mod elastic;
pub mod filter;
pub mod mappings;
pub mod plugin;
pub mod queues;

pub use config::IndexerConfig;
pub use elastic::{BulkBatch, BulkOp, ElasticClient, ElasticError, SearchBackend};
pub use plugin::{Indexer, IngestHandle, ShutdownHandle};
