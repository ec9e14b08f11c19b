//! Account projection: derived `accounts`, `pub_keys` and `account_controls`
//! collections, maintained from the system account's authority actions.

use serde_json::{json, Value};
use tracing::debug;

use eosearch_core::types::{
    Action, DeleteAuth, KeyWeight, NewAccount, PermissionLevelWeight, SetAbi, UpdateAuth,
};
use eosearch_core::{AbiDef, Name};

use crate::abi_cache::AbiCache;
use crate::collections;
use crate::elastic::{BulkBatch, ElasticError, SearchBackend};

/// Projects executed system-account actions into the account collections.
pub struct AccountProjection {
    system_account: Name,
    newaccount: Name,
    updateauth: Name,
    deleteauth: Name,
    setabi: Name,
    owner: Name,
    active: Name,
}

impl AccountProjection {
    pub fn new(system_account: Name) -> Self {
        let name = |s: &str| Name::new(s).expect("static name");
        Self {
            system_account,
            newaccount: name("newaccount"),
            updateauth: name("updateauth"),
            deleteauth: name("deleteauth"),
            setabi: name("setabi"),
            owner: name("owner"),
            active: name("active"),
        }
    }

    /// The account whose actions this projection interprets.
    pub fn system_account(&self) -> Name {
        self.system_account
    }

    /// Apply one executed action. Non-system actions and undecodable
    /// payloads are ignored; backend failures propagate to the error router.
    pub async fn update_account(
        &self,
        backend: &dyn SearchBackend,
        cache: &mut AbiCache,
        act: &Action,
        now_ms: i64,
    ) -> Result<(), ElasticError> {
        if act.account != self.system_account {
            return Ok(());
        }

        if act.name == self.newaccount {
            match NewAccount::from_bytes(&act.data) {
                Ok(newacc) => self.on_newaccount(backend, &newacc, now_ms).await?,
                Err(err) => debug!(error = %err, "undecodable newaccount payload, skipping"),
            }
        } else if act.name == self.updateauth {
            match UpdateAuth::from_bytes(&act.data) {
                Ok(update) => self.on_updateauth(backend, &update, now_ms).await?,
                Err(err) => debug!(error = %err, "undecodable updateauth payload, skipping"),
            }
        } else if act.name == self.deleteauth {
            match DeleteAuth::from_bytes(&act.data) {
                Ok(del) => self.on_deleteauth(backend, &del).await?,
                Err(err) => debug!(error = %err, "undecodable deleteauth payload, skipping"),
            }
        } else if act.name == self.setabi {
            match SetAbi::from_bytes(&act.data) {
                Ok(setabi) => self.on_setabi(backend, cache, &setabi, now_ms).await?,
                Err(err) => debug!(error = %err, "undecodable setabi payload, skipping"),
            }
        }

        Ok(())
    }

    async fn on_newaccount(
        &self,
        backend: &dyn SearchBackend,
        newacc: &NewAccount,
        now_ms: i64,
    ) -> Result<(), ElasticError> {
        self.create_account(backend, newacc.name, now_ms).await?;

        self.add_pub_keys(backend, &newacc.owner.keys, newacc.name, self.owner, now_ms)
            .await?;
        self.add_account_controls(backend, &newacc.owner.accounts, newacc.name, self.owner, now_ms)
            .await?;
        self.add_pub_keys(backend, &newacc.active.keys, newacc.name, self.active, now_ms)
            .await?;
        self.add_account_controls(backend, &newacc.active.accounts, newacc.name, self.active, now_ms)
            .await?;
        Ok(())
    }

    async fn on_updateauth(
        &self,
        backend: &dyn SearchBackend,
        update: &UpdateAuth,
        now_ms: i64,
    ) -> Result<(), ElasticError> {
        // stale rows must be gone before the replacement rows land
        self.remove_pub_keys(backend, update.account, update.permission)
            .await?;
        self.remove_account_controls(backend, update.account, update.permission)
            .await?;
        self.add_pub_keys(backend, &update.auth.keys, update.account, update.permission, now_ms)
            .await?;
        self.add_account_controls(
            backend,
            &update.auth.accounts,
            update.account,
            update.permission,
            now_ms,
        )
        .await?;
        Ok(())
    }

    async fn on_deleteauth(
        &self,
        backend: &dyn SearchBackend,
        del: &DeleteAuth,
    ) -> Result<(), ElasticError> {
        self.remove_pub_keys(backend, del.account, del.permission).await?;
        self.remove_account_controls(backend, del.account, del.permission)
            .await?;
        Ok(())
    }

    async fn on_setabi(
        &self,
        backend: &dyn SearchBackend,
        cache: &mut AbiCache,
        setabi: &SetAbi,
        now_ms: i64,
    ) -> Result<(), ElasticError> {
        cache.evict(setabi.account);

        if self.find_account(backend, setabi.account).await?.is_none() {
            self.create_account(backend, setabi.account, now_ms).await?;
        }

        let Some((id, source)) = self.find_account(backend, setabi.account).await? else {
            return Ok(());
        };

        // Malformed user ABIs must not take down ingestion; the account doc
        // simply stays without an abi field.
        let abi = match AbiDef::from_bytes(&setabi.abi) {
            Ok(abi) => abi,
            Err(err) => {
                debug!(account = %setabi.account, error = %err, "undecodable ABI in setabi, account kept without abi");
                return Ok(());
            }
        };

        let doc = json!({
            "name": setabi.account,
            "abi": serde_json::to_value(&abi).unwrap_or(Value::Null),
            "createAt": source.get("createAt").cloned().unwrap_or(Value::Null),
            "updateAt": now_ms,
        });
        backend
            .index_doc(collections::ACCOUNTS, &doc, Some(&id))
            .await
    }

    async fn create_account(
        &self,
        backend: &dyn SearchBackend,
        name: Name,
        now_ms: i64,
    ) -> Result<(), ElasticError> {
        let doc = json!({ "name": name, "createAt": now_ms });
        backend.index_doc(collections::ACCOUNTS, &doc, None).await
    }

    /// Locate an account document, returning its backend id and source.
    async fn find_account(
        &self,
        backend: &dyn SearchBackend,
        name: Name,
    ) -> Result<Option<(String, Value)>, ElasticError> {
        let query = json!({ "query": { "term": { "name": name.to_string() } } });
        let result = backend.search(collections::ACCOUNTS, &query).await?;
        if result["hits"]["total"] != json!(1) {
            return Ok(None);
        }
        let hit = &result["hits"]["hits"][0];
        let Some(id) = hit["_id"].as_str() else {
            return Ok(None);
        };
        Ok(Some((id.to_string(), hit["_source"].clone())))
    }

    async fn add_pub_keys(
        &self,
        backend: &dyn SearchBackend,
        keys: &[KeyWeight],
        name: Name,
        permission: Name,
        now_ms: i64,
    ) -> Result<(), ElasticError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut bulk = BulkBatch::new();
        for key_weight in keys {
            let doc = json!({
                "account": name,
                "public_key": key_weight.key.to_string(),
                "permission": permission,
                "createAt": now_ms,
            });
            bulk.push(collections::PUB_KEYS, None, doc);
        }
        backend.bulk_perform(&bulk).await
    }

    async fn remove_pub_keys(
        &self,
        backend: &dyn SearchBackend,
        name: Name,
        permission: Name,
    ) -> Result<(), ElasticError> {
        let query = json!({
            "query": {
                "bool": {
                    "must": [
                        { "term": { "account": name.to_string() } },
                        { "term": { "permission": permission.to_string() } },
                    ]
                }
            }
        });
        backend.delete_by_query(collections::PUB_KEYS, &query).await
    }

    async fn add_account_controls(
        &self,
        backend: &dyn SearchBackend,
        controlling: &[PermissionLevelWeight],
        name: Name,
        permission: Name,
        now_ms: i64,
    ) -> Result<(), ElasticError> {
        if controlling.is_empty() {
            return Ok(());
        }
        let mut bulk = BulkBatch::new();
        for controller in controlling {
            let doc = json!({
                "controlled_account": name,
                "controlled_permission": permission,
                "controlling_account": controller.permission.actor,
                "createAt": now_ms,
            });
            bulk.push(collections::ACCOUNT_CONTROLS, None, doc);
        }
        backend.bulk_perform(&bulk).await
    }

    async fn remove_account_controls(
        &self,
        backend: &dyn SearchBackend,
        name: Name,
        permission: Name,
    ) -> Result<(), ElasticError> {
        let query = json!({
            "query": {
                "bool": {
                    "must": [
                        { "term": { "controlled_account": name.to_string() } },
                        { "term": { "controlled_permission": permission.to_string() } },
                    ]
                }
            }
        });
        backend
            .delete_by_query(collections::ACCOUNT_CONTROLS, &query)
            .await
    }
}
