//! The single background worker that drains the ingress queues and drives
//! decoding, filtering, projection and backend writes.

use chrono::Utc;
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use eosearch_core::types::{ActionTrace, BlockState, TransactionMetadata, TransactionTrace};
use eosearch_core::ChainId;

use crate::accounts::AccountProjection;
use crate::collections;
use crate::config::StoreConfig;
use crate::decoder::Decoder;
use crate::elastic::{BulkBatch, ElasticError, SearchBackend};
use crate::filter::ActionFilter;
use crate::plugin::ShutdownHandle;
use crate::queues::IngressQueues;

/// Per-category drains slower than this are reported.
const SLOW_DRAIN: Duration = Duration::from_millis(500);

/// The consumer worker. Owns every piece of mutable ingestion state; nothing
/// here is shared with the producers except the queues and the start gate.
pub struct Consumer {
    backend: Arc<dyn SearchBackend>,
    queues: Arc<IngressQueues>,
    decoder: Decoder,
    projection: AccountProjection,
    filter: ActionFilter,
    store: StoreConfig,
    start_block_num: u32,
    start_block_reached: Arc<AtomicBool>,
    chain_id: ChainId,
    shutdown: ShutdownHandle,
}

impl Consumer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        backend: Arc<dyn SearchBackend>,
        queues: Arc<IngressQueues>,
        decoder: Decoder,
        projection: AccountProjection,
        filter: ActionFilter,
        store: StoreConfig,
        start_block_num: u32,
        start_block_reached: Arc<AtomicBool>,
        chain_id: ChainId,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            backend,
            queues,
            decoder,
            projection,
            filter,
            store,
            start_block_num,
            start_block_reached,
            chain_id,
            shutdown,
        }
    }

    fn start_block_reached(&self) -> bool {
        self.start_block_reached.load(Ordering::SeqCst)
    }

    /// The worker loop: wait, swap, then drain in fixed order. Applied
    /// traces first so their `update_account` effects are visible before the
    /// enclosing block is decoded.
    pub async fn run(mut self) {
        loop {
            self.queues.wait_for_work().await;
            let done = self.queues.is_done();
            let mut batch = self.queues.drain();
            let total = batch.total();

            if done {
                info!(queued = total, "draining remaining events before shutdown");
            }

            let start = Instant::now();
            let size = batch.traces.len();
            for trace in batch.traces.drain(..) {
                if let Err(err) = self.process_applied_transaction(&trace).await {
                    self.handle_backend_error("applied transaction processing", &err);
                }
            }
            log_throughput("applied transactions", size, start.elapsed());

            let start = Instant::now();
            let size = batch.transactions.len();
            for meta in batch.transactions.drain(..) {
                if let Err(err) = self.process_accepted_transaction(&meta).await {
                    self.handle_backend_error("accepted transaction processing", &err);
                }
            }
            log_throughput("accepted transactions", size, start.elapsed());

            let start = Instant::now();
            let size = batch.blocks.len();
            for block in batch.blocks.drain(..) {
                if let Err(err) = self.process_accepted_block(&block).await {
                    self.handle_backend_error("accepted block processing", &err);
                }
            }
            log_throughput("accepted blocks", size, start.elapsed());

            let start = Instant::now();
            let size = batch.irreversible.len();
            for block in batch.irreversible.drain(..) {
                if let Err(err) = self.process_irreversible_block(&block).await {
                    self.handle_backend_error("irreversible block processing", &err);
                }
            }
            log_throughput("irreversible blocks", size, start.elapsed());

            if done && total == 0 {
                break;
            }
        }
        info!("consumer worker stopped");
    }

    /// Route a backend failure: log with its origin, then ask the host to
    /// quit. Continuing after a lost write would leave silent gaps, and a
    /// restart is the recovery path.
    fn handle_backend_error(&self, context: &'static str, err: &ElasticError) {
        error!(context, error = %err, "backend write failed, requesting shutdown");
        self.shutdown.request_quit();
    }

    /// Accepted transactions are processed even before the start gate opens
    /// and even when their collection is disabled: decoding warms the ABI
    /// cache that later trace and block decoding relies on.
    async fn process_accepted_transaction(
        &mut self,
        meta: &TransactionMetadata,
    ) -> Result<(), ElasticError> {
        let backend = self.backend.clone();
        let mut doc = self.decoder.transaction_doc(backend.as_ref(), &meta.trx).await;

        doc["trx_id"] = json!(meta.id);

        let signing_keys: Option<Vec<String>> = match &meta.signing_keys {
            Some(keys) => Some(keys.iter().map(ToString::to_string).collect()),
            None => match meta.trx.recover_keys(&self.chain_id) {
                Ok(keys) if !keys.is_empty() => {
                    Some(keys.iter().map(ToString::to_string).collect())
                }
                Ok(_) => None,
                Err(err) => {
                    debug!(trx_id = %meta.id, error = %err, "signing key recovery failed");
                    None
                }
            },
        };
        if let Some(keys) = signing_keys {
            doc["signing_keys"] = json!(keys);
        }

        doc["accepted"] = json!(meta.accepted);
        doc["implicit"] = json!(meta.implicit);
        doc["scheduled"] = json!(meta.scheduled);
        doc["createAt"] = json!(Utc::now().timestamp_millis());

        if !self.store.transactions {
            return Ok(());
        }
        self.backend
            .index_doc(collections::TRANSACTIONS, &doc, None)
            .await
    }

    /// Walk the action-trace forest post-order, applying the account
    /// projection for executed system actions and collecting the filtered
    /// flat documents; then write the batch and, if anything survived, the
    /// full trace document.
    async fn process_applied_transaction(
        &mut self,
        trace: &TransactionTrace,
    ) -> Result<(), ElasticError> {
        let now_ms = Utc::now().timestamp_millis();
        let executed = trace.is_executed();

        let mut bulk = BulkBatch::new();
        let mut wrote_atraces = false;
        for atrace in &trace.action_traces {
            wrote_atraces |= self
                .add_action_trace(&mut bulk, atrace, executed, now_ms)
                .await?;
        }

        if wrote_atraces {
            self.backend.bulk_perform(&bulk).await?;
        }

        if !self.start_block_reached() || !self.store.transaction_traces {
            return Ok(());
        }
        // a trace whose every action was filtered out is not indexed
        if !wrote_atraces {
            return Ok(());
        }

        let backend = self.backend.clone();
        let mut doc = self
            .decoder
            .transaction_trace_doc(backend.as_ref(), trace)
            .await;
        doc["createAt"] = json!(now_ms);
        self.backend
            .index_doc(collections::TRANSACTION_TRACES, &doc, None)
            .await
    }

    /// One node of the trace walk. The account projection runs ungated (ABI
    /// state must be warm before the start gate opens); the document append
    /// is gated by the start block, the store switch and the filter.
    /// Children are walked unconditionally.
    fn add_action_trace<'a>(
        &'a mut self,
        bulk: &'a mut BulkBatch,
        trace: &'a ActionTrace,
        executed: bool,
        now_ms: i64,
    ) -> Pin<Box<dyn Future<Output = Result<bool, ElasticError>> + Send + 'a>> {
        Box::pin(async move {
            let backend = self.backend.clone();

            if executed && trace.receipt.receiver == self.projection.system_account() {
                self.projection
                    .update_account(backend.as_ref(), self.decoder.cache_mut(), &trace.act, now_ms)
                    .await?;
            }

            let mut added = false;
            if self.start_block_reached()
                && self.store.action_traces
                && self.filter.include(&trace.act)
            {
                let mut doc = self.decoder.action_trace_doc(backend.as_ref(), trace).await;
                doc["createAt"] = json!(now_ms);
                bulk.push(collections::ACTION_TRACES, None, doc);
                added = true;
            }

            for inline in &trace.inline_traces {
                added |= self.add_action_trace(bulk, inline, executed, now_ms).await?;
            }
            Ok(added)
        })
    }

    async fn process_accepted_block(&mut self, state: &BlockState) -> Result<(), ElasticError> {
        if !self.start_block_reached() && state.block_num >= self.start_block_num {
            self.start_block_reached.store(true, Ordering::SeqCst);
            info!(block_num = state.block_num, "start block reached, indexing enabled");
        }
        if !self.start_block_reached() {
            return Ok(());
        }

        if state.block_num % 1000 == 0 {
            info!(block_num = state.block_num, "indexing progress");
        }

        let now_ms = Utc::now().timestamp_millis();

        if self.store.block_states {
            let mut doc = Decoder::block_state_doc(state);
            doc["createAt"] = json!(now_ms);
            self.backend
                .index_doc(collections::BLOCK_STATES, &doc, None)
                .await?;
        }

        if self.store.blocks {
            let backend = self.backend.clone();
            let body = self.decoder.block_doc(backend.as_ref(), state).await;
            let doc = json!({
                "block_num": state.block_num,
                "block_id": state.id,
                "irreversible": false,
                "block": body,
                "createAt": now_ms,
            });
            self.backend
                .index_doc(collections::BLOCKS, &doc, None)
                .await?;
        }

        Ok(())
    }

    /// Reserved hook. The intended behavior is to re-index the block's
    /// `blocks` and `transactions` documents with `irreversible = true` once
    /// finality handling is settled; until then this is a gate-checked no-op.
    async fn process_irreversible_block(&mut self, state: &BlockState) -> Result<(), ElasticError> {
        if !self.start_block_reached() {
            return Ok(());
        }
        debug!(block_num = state.block_num, "irreversible block observed");
        Ok(())
    }
}

fn log_throughput(category: &'static str, size: usize, elapsed: Duration) {
    if elapsed > SLOW_DRAIN && size > 0 {
        info!(
            category,
            size,
            elapsed_ms = elapsed.as_millis() as u64,
            per_item_us = elapsed.as_micros() as u64 / size as u64,
            "slow drain"
        );
    }
}
