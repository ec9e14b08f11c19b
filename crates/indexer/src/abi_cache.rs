//! Bounded LRU cache of per-account ABI serializers.
//!
//! Serializers are rebuilt on miss from the `abi` field of the account's
//! document in the `accounts` collection, the very collection this indexer
//! maintains, which is why ABI state must be warm before the start-block
//! gate opens.

use lru::LruCache;
use serde_json::{json, Value};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use eosearch_core::{AbiDef, AbiSerializer, Name, SpecialUnpack};

use crate::collections;
use crate::elastic::SearchBackend;

/// LRU-bounded map from account name to its compiled serializer.
///
/// Owned exclusively by the consumer worker; no synchronization.
pub struct AbiCache {
    serializers: LruCache<Name, Arc<AbiSerializer>>,
    max_time: Duration,
    system_account: Name,
}

impl AbiCache {
    pub fn new(capacity: usize, max_time: Duration, system_account: Name) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            serializers: LruCache::new(capacity),
            max_time,
            system_account,
        }
    }

    /// Number of resident serializers.
    pub fn len(&self) -> usize {
        self.serializers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.serializers.is_empty()
    }

    /// Drop the cached serializer for `account`; the next `get` refetches.
    pub fn evict(&mut self, account: Name) {
        self.serializers.pop(&account);
    }

    /// The serializer for `account`, consulting the backend on a miss.
    ///
    /// Returns `None` when the account has no stored ABI, the stored ABI is
    /// undecodable, or the lookup itself fails; lookup failures are logged
    /// and treated as a miss so decoding can fall back to hex.
    pub async fn get(
        &mut self,
        account: Name,
        backend: &dyn SearchBackend,
    ) -> Option<Arc<AbiSerializer>> {
        if account.is_empty() {
            return None;
        }
        if let Some(serializer) = self.serializers.get(&account) {
            return Some(serializer.clone());
        }

        let abi_json = match fetch_account_abi(backend, account).await {
            Ok(Some(value)) => value,
            Ok(None) => return None,
            Err(err) => {
                warn!(account = %account, error = %err, "ABI lookup failed");
                return None;
            }
        };

        let abi: AbiDef = match serde_json::from_value(abi_json) {
            Ok(abi) => abi,
            Err(err) => {
                info!(account = %account, error = %err, "stored ABI is not a valid definition");
                return None;
            }
        };

        let serializer = Arc::new(self.build_serializer(account, abi));
        // push evicts the least recently used entry once at capacity
        self.serializers.push(account, serializer.clone());
        debug!(account = %account, resident = self.serializers.len(), "ABI serializer cached");
        Some(serializer)
    }

    fn build_serializer(&self, account: Name, mut abi: AbiDef) -> AbiSerializer {
        let mut specialize = false;
        if account == self.system_account {
            // Rewrite setabi.abi from bytes to abi_def so the decoded
            // document carries the structured definition instead of a blob.
            if let Some(setabi) = abi.structs.iter_mut().find(|s| s.name == "setabi") {
                if let Some(field) = setabi.fields.iter_mut().find(|f| f.name == "abi") {
                    if field.type_ == "bytes" {
                        field.type_ = "abi_def".to_string();
                        specialize = true;
                    }
                }
            }
        }
        let serializer = AbiSerializer::new(&abi, self.max_time);
        if specialize {
            serializer.with_special("abi_def", SpecialUnpack::AbiDefBytes)
        } else {
            serializer
        }
    }
}

/// Read `_source.abi` of the account's document, if the account exists and
/// carries one.
async fn fetch_account_abi(
    backend: &dyn SearchBackend,
    account: Name,
) -> Result<Option<Value>, crate::elastic::ElasticError> {
    let query = json!({ "query": { "term": { "name": account.to_string() } } });
    let result = backend.search(collections::ACCOUNTS, &query).await?;
    if result["hits"]["total"] != json!(1) {
        return Ok(None);
    }
    let abi = &result["hits"]["hits"][0]["_source"]["abi"];
    if abi.is_null() {
        return Ok(None);
    }
    Ok(Some(abi.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elastic::{BulkBatch, ElasticError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves an empty ABI for every account and counts the lookups.
    #[derive(Default)]
    struct AbiShelf {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl SearchBackend for AbiShelf {
        async fn init_index(&self, _: &Value) -> Result<(), ElasticError> {
            Ok(())
        }
        async fn delete_index(&self) -> Result<(), ElasticError> {
            Ok(())
        }
        async fn index_doc(&self, _: &str, _: &Value, _: Option<&str>) -> Result<(), ElasticError> {
            Ok(())
        }
        async fn bulk_perform(&self, _: &BulkBatch) -> Result<(), ElasticError> {
            Ok(())
        }
        async fn search(&self, _: &str, query: &Value) -> Result<Value, ElasticError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            let name = query["query"]["term"]["name"].clone();
            Ok(json!({
                "hits": {
                    "total": 1,
                    "hits": [{
                        "_id": "1",
                        "_source": { "name": name, "abi": { "version": "eosio::abi/1.1" } }
                    }]
                }
            }))
        }
        async fn delete_by_query(&self, _: &str, _: &Value) -> Result<(), ElasticError> {
            Ok(())
        }
        async fn count_doc(&self, _: &str) -> Result<u64, ElasticError> {
            Ok(0)
        }
    }

    fn account(i: usize) -> Name {
        Name::new(&format!("account{}", (b'a' + (i % 26) as u8) as char)).unwrap()
    }

    #[tokio::test]
    async fn never_exceeds_capacity() {
        let shelf = AbiShelf::default();
        let mut cache = AbiCache::new(4, Duration::from_secs(1), Name::new("eosio").unwrap());

        for i in 0..26 {
            cache.get(account(i), &shelf).await.unwrap();
            assert!(cache.len() <= 4, "cache grew past its bound at step {i}");
        }
    }

    #[tokio::test]
    async fn hit_avoids_lookup_and_refreshes_recency() {
        let shelf = AbiShelf::default();
        let mut cache = AbiCache::new(2, Duration::from_secs(1), Name::new("eosio").unwrap());

        cache.get(account(0), &shelf).await.unwrap();
        cache.get(account(1), &shelf).await.unwrap();
        assert_eq!(shelf.lookups.load(Ordering::SeqCst), 2);

        // hit: no backend traffic, and `a` becomes most recently used
        cache.get(account(0), &shelf).await.unwrap();
        assert_eq!(shelf.lookups.load(Ordering::SeqCst), 2);

        // inserting a third evicts `b`, the least recently used
        cache.get(account(2), &shelf).await.unwrap();
        cache.get(account(0), &shelf).await.unwrap();
        assert_eq!(shelf.lookups.load(Ordering::SeqCst), 3);
        cache.get(account(1), &shelf).await.unwrap();
        assert_eq!(shelf.lookups.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn evict_forces_refetch() {
        let shelf = AbiShelf::default();
        let mut cache = AbiCache::new(4, Duration::from_secs(1), Name::new("eosio").unwrap());

        let n = account(0);
        cache.get(n, &shelf).await.unwrap();
        cache.evict(n);
        cache.get(n, &shelf).await.unwrap();
        assert_eq!(shelf.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_name_is_never_looked_up() {
        let shelf = AbiShelf::default();
        let mut cache = AbiCache::new(4, Duration::from_secs(1), Name::new("eosio").unwrap());
        assert!(cache.get(Name::ZERO, &shelf).await.is_none());
        assert_eq!(shelf.lookups.load(Ordering::SeqCst), 0);
    }
}
