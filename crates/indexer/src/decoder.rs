//! Builders that turn typed chain objects into JSON documents, substituting
//! binary action payloads with their ABI-decoded form.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

use eosearch_core::types::{
    Action, ActionTrace, BlockState, SignedTransaction, TransactionTrace, TransactionVariant,
};

use crate::abi_cache::AbiCache;
use crate::elastic::SearchBackend;

/// Document builder over the ABI cache.
///
/// Owned by the consumer worker; decoding an account's payload may fetch
/// that account's ABI from the backend through the cache.
pub struct Decoder {
    cache: AbiCache,
}

impl Decoder {
    pub fn new(cache: AbiCache) -> Self {
        Self { cache }
    }

    /// The underlying cache, for `setabi` evictions.
    pub fn cache_mut(&mut self) -> &mut AbiCache {
        &mut self.cache
    }

    /// Decode an action's payload, falling back to hex when no ABI applies
    /// or decoding fails.
    async fn action_data(&mut self, backend: &dyn SearchBackend, act: &Action) -> Value {
        if let Some(serializer) = self.cache.get(act.account, backend).await {
            match serializer.unpack_action_data(act.name, &act.data) {
                Ok(value) => return value,
                Err(err) => {
                    debug!(
                        account = %act.account,
                        action = %act.name,
                        error = %err,
                        "payload decode failed, storing hex"
                    );
                }
            }
        }
        json!(hex::encode(&act.data))
    }

    /// One action as a document fragment.
    pub async fn action_doc(&mut self, backend: &dyn SearchBackend, act: &Action) -> Value {
        let authorization: Vec<Value> = act
            .authorization
            .iter()
            .map(|a| json!({ "actor": a.actor, "permission": a.permission }))
            .collect();
        let data = self.action_data(backend, act).await;
        json!({
            "account": act.account,
            "name": act.name,
            "authorization": authorization,
            "data": data,
        })
    }

    /// One action trace without its inline children; this is the shape of
    /// `action_traces` documents (the tree is flattened, one doc per node).
    pub async fn action_trace_doc(
        &mut self,
        backend: &dyn SearchBackend,
        trace: &ActionTrace,
    ) -> Value {
        let receipt = &trace.receipt;
        let auth_sequence: Vec<Value> = receipt
            .auth_sequence
            .iter()
            .map(|(account, seq)| json!([account, seq]))
            .collect();
        let act = self.action_doc(backend, &trace.act).await;
        json!({
            "receipt": {
                "receiver": receipt.receiver,
                "act_digest": receipt.act_digest,
                "global_sequence": receipt.global_sequence,
                "recv_sequence": receipt.recv_sequence,
                "auth_sequence": auth_sequence,
                "code_sequence": receipt.code_sequence,
                "abi_sequence": receipt.abi_sequence,
            },
            "act": act,
            "context_free": trace.context_free,
            "elapsed": trace.elapsed_us,
            "console": trace.console,
            "trx_id": trace.trx_id,
        })
    }

    fn action_trace_tree_doc<'a>(
        &'a mut self,
        backend: &'a dyn SearchBackend,
        trace: &'a ActionTrace,
    ) -> Pin<Box<dyn Future<Output = Value> + Send + 'a>> {
        Box::pin(async move {
            let mut doc = self.action_trace_doc(backend, trace).await;
            let mut inline = Vec::with_capacity(trace.inline_traces.len());
            for child in &trace.inline_traces {
                inline.push(self.action_trace_tree_doc(backend, child).await);
            }
            doc["inline_traces"] = Value::Array(inline);
            doc
        })
    }

    /// A full transaction trace, inline trees included; the shape of
    /// `transaction_traces` documents.
    pub async fn transaction_trace_doc(
        &mut self,
        backend: &dyn SearchBackend,
        trace: &TransactionTrace,
    ) -> Value {
        let receipt = trace.receipt.as_ref().map(|r| {
            json!({
                "status": r.status,
                "cpu_usage_us": r.cpu_usage_us,
                "net_usage_words": r.net_usage_words,
            })
        });
        let mut action_traces = Vec::with_capacity(trace.action_traces.len());
        for atrace in &trace.action_traces {
            action_traces.push(self.action_trace_tree_doc(backend, atrace).await);
        }
        json!({
            "id": trace.id,
            "block_num": trace.block_num,
            "block_time": format_time(&trace.block_time),
            "receipt": receipt,
            "elapsed": trace.elapsed_us,
            "net_usage": trace.net_usage,
            "scheduled": trace.scheduled,
            "action_traces": action_traces,
            "except": trace.except,
        })
    }

    /// A signed transaction body with decoded action payloads.
    pub async fn transaction_doc(
        &mut self,
        backend: &dyn SearchBackend,
        signed: &SignedTransaction,
    ) -> Value {
        let trx = &signed.transaction;
        let mut context_free_actions = Vec::with_capacity(trx.context_free_actions.len());
        for act in &trx.context_free_actions {
            context_free_actions.push(self.action_doc(backend, act).await);
        }
        let mut actions = Vec::with_capacity(trx.actions.len());
        for act in &trx.actions {
            actions.push(self.action_doc(backend, act).await);
        }
        let extensions: Vec<Value> = trx
            .transaction_extensions
            .iter()
            .map(|(tag, payload)| json!([tag, hex::encode(payload)]))
            .collect();
        let signatures: Vec<Value> = signed
            .signatures
            .iter()
            .map(|s| json!(s.to_string()))
            .collect();
        let context_free_data: Vec<Value> = signed
            .context_free_data
            .iter()
            .map(|blob| json!(hex::encode(blob)))
            .collect();
        json!({
            "expiration": format_time(&trx.expiration),
            "ref_block_num": trx.ref_block_num,
            "ref_block_prefix": trx.ref_block_prefix,
            "max_net_usage_words": trx.max_net_usage_words,
            "max_cpu_usage_ms": trx.max_cpu_usage_ms,
            "delay_sec": trx.delay_sec,
            "context_free_actions": context_free_actions,
            "actions": actions,
            "transaction_extensions": extensions,
            "signatures": signatures,
            "context_free_data": context_free_data,
        })
    }

    /// The decoded block body for `blocks` documents.
    pub async fn block_doc(&mut self, backend: &dyn SearchBackend, state: &BlockState) -> Value {
        let header = &state.block.header;
        let mut transactions = Vec::with_capacity(state.block.transactions.len());
        for receipt in &state.block.transactions {
            let trx = match &receipt.trx {
                TransactionVariant::Id(id) => json!(id),
                TransactionVariant::Full(signed) => self.transaction_doc(backend, signed).await,
            };
            transactions.push(json!({
                "status": receipt.header.status,
                "cpu_usage_us": receipt.header.cpu_usage_us,
                "net_usage_words": receipt.header.net_usage_words,
                "trx": trx,
            }));
        }
        json!({
            "timestamp": format_time(&header.timestamp),
            "producer": header.producer,
            "confirmed": header.confirmed,
            "previous": header.previous,
            "transaction_mroot": header.transaction_mroot,
            "action_mroot": header.action_mroot,
            "schedule_version": header.schedule_version,
            "producer_signature": state.block.producer_signature.to_string(),
            "transactions": transactions,
        })
    }

    /// The audit-trail document for `block_states`; no ABI decoding.
    pub fn block_state_doc(state: &BlockState) -> Value {
        json!({
            "block_num": state.block_num,
            "block_id": state.id,
            "validated": state.validated,
            "in_current_chain": state.in_current_chain,
            "block_header_state": {
                "block_num": state.block_num,
                "id": state.id,
                "header": serde_json::to_value(&state.block.header).unwrap_or(Value::Null),
            },
        })
    }
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}
