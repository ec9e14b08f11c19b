//! Lifecycle controller: index bootstrap, producer callbacks, the consumer
//! worker and coordinated shutdown.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use eosearch_core::types::{BlockState, TransactionMetadata, TransactionTrace};
use eosearch_core::ChainId;

use crate::abi_cache::AbiCache;
use crate::accounts::AccountProjection;
use crate::collections;
use crate::config::IndexerConfig;
use crate::consumer::Consumer;
use crate::decoder::Decoder;
use crate::elastic::{ElasticClient, SearchBackend};
use crate::filter::ActionFilter;
use crate::mappings;
use crate::queues::IngressQueues;

/// The host-facing quit signal.
///
/// A non-recoverable backend failure raises it; the embedding host is
/// expected to observe it and call [`Indexer::shutdown`]. Restarting is the
/// recovery path; continuing after a lost write would mean silent gaps.
#[derive(Clone, Default)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the quit signal; idempotent.
    pub fn request_quit(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Wait until the quit signal is raised.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_requested() {
                return;
            }
            notified.await;
        }
    }
}

/// Clonable producer side handed to the host chain.
///
/// The four methods are the signal callbacks: synchronous, callable from the
/// chain's signal thread, throttled by the adaptive queue backpressure. After
/// detach (shutdown) they become logged no-ops, so a late signal can never
/// re-enqueue work.
#[derive(Clone)]
pub struct IngestHandle {
    queues: Arc<IngressQueues>,
    detached: Arc<AtomicBool>,
}

impl IngestHandle {
    fn is_detached(&self, signal: &'static str) -> bool {
        if self.detached.load(Ordering::SeqCst) {
            debug!(signal, "signal after detach, dropping");
            return true;
        }
        false
    }

    pub fn accepted_transaction(&self, meta: Arc<TransactionMetadata>) {
        if self.is_detached("accepted_transaction") {
            return;
        }
        self.queues.push_transaction(meta);
    }

    pub fn applied_transaction(&self, trace: Arc<TransactionTrace>) {
        if self.is_detached("applied_transaction") {
            return;
        }
        self.queues.push_trace(trace);
    }

    pub fn accepted_block(&self, state: Arc<BlockState>) {
        if self.is_detached("accepted_block") {
            return;
        }
        self.queues.push_block(state);
    }

    pub fn irreversible_block(&self, state: Arc<BlockState>) {
        if self.is_detached("irreversible_block") {
            return;
        }
        self.queues.push_irreversible(state);
    }
}

/// The assembled ingestion service.
pub struct Indexer {
    queues: Arc<IngressQueues>,
    detached: Arc<AtomicBool>,
    shutdown: ShutdownHandle,
    start_block_reached: Arc<AtomicBool>,
    consumer: JoinHandle<()>,
}

impl Indexer {
    /// Build the Elasticsearch client from `config` and start the service.
    pub async fn start(config: IndexerConfig, chain_id: ChainId) -> Result<Self> {
        let backend: Arc<dyn SearchBackend> = Arc::new(ElasticClient::new(
            config.elasticsearch.endpoints.clone(),
            config.elasticsearch.index_name.clone(),
        ));
        Self::start_with_backend(config, chain_id, backend).await
    }

    /// Start against an already-built backend; the seam tests drive.
    pub async fn start_with_backend(
        config: IndexerConfig,
        chain_id: ChainId,
        backend: Arc<dyn SearchBackend>,
    ) -> Result<Self> {
        config.validate()?;
        let filter =
            ActionFilter::from_rules(&config.filter).context("invalid filter configuration")?;
        let system_account = config.system_account();

        if config.elasticsearch.delete_index_on_startup {
            info!(index = %config.elasticsearch.index_name, "dropping index on startup");
            backend
                .delete_index()
                .await
                .context("failed to delete index")?;
        }

        backend
            .init_index(&mappings::index_mappings())
            .await
            .context("failed to initialize index")?;

        // a fresh index knows nothing; seed the system account so ABI
        // lookups for it resolve once its setabi arrives
        let accounts = backend
            .count_doc(collections::ACCOUNTS)
            .await
            .context("failed to count accounts")?;
        if accounts == 0 {
            let doc = json!({
                "name": system_account,
                "createAt": Utc::now().timestamp_millis(),
            });
            backend
                .index_doc(collections::ACCOUNTS, &doc, None)
                .await
                .context("failed to seed the system account")?;
            info!(account = %system_account, "seeded system account");
        }

        let queues = Arc::new(IngressQueues::new(config.ingest.max_queue_size));
        let shutdown = ShutdownHandle::new();
        let start_block_reached = Arc::new(AtomicBool::new(config.ingest.start_block_num == 0));

        let cache = AbiCache::new(
            config.ingest.abi_cache_size,
            config.abi_serializer_max_time(),
            system_account,
        );
        let consumer = Consumer::new(
            backend,
            queues.clone(),
            Decoder::new(cache),
            AccountProjection::new(system_account),
            filter,
            config.store.clone(),
            config.ingest.start_block_num,
            start_block_reached.clone(),
            chain_id,
            shutdown.clone(),
        );

        info!("starting consumer worker");
        let consumer = tokio::spawn(consumer.run());

        Ok(Self {
            queues,
            detached: Arc::new(AtomicBool::new(false)),
            shutdown,
            start_block_reached,
            consumer,
        })
    }

    /// The producer callbacks to register with the host chain's signals.
    pub fn handle(&self) -> IngestHandle {
        IngestHandle {
            queues: self.queues.clone(),
            detached: self.detached.clone(),
        }
    }

    /// The quit signal raised on non-recoverable backend errors.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Whether the start-block gate has opened.
    pub fn start_block_reached(&self) -> bool {
        self.start_block_reached.load(Ordering::SeqCst)
    }

    /// Detach the producers, then drain and join the consumer.
    pub async fn shutdown(self) {
        info!("shutdown in progress; draining can take a while");
        self.detached.store(true, Ordering::SeqCst);
        self.queues.set_done();
        if let Err(err) = self.consumer.await {
            error!(error = %err, "consumer worker panicked during shutdown");
        }
        info!("shutdown complete");
    }
}
