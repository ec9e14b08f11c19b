//! The fixed mapping schema installed by `init_index`.
//!
//! Every field the projection queries by term must be a keyword; timestamps
//! are epoch-millisecond dates. Decoded payloads (`abi`, action `data`) stay
//! unindexed objects so arbitrary user schemas cannot blow up the mapping.

use serde_json::{json, Value};

pub fn index_mappings() -> Value {
    json!({
        "settings": {
            "index": {
                "number_of_shards": 1,
                "number_of_replicas": 0
            }
        },
        "mappings": {
            "block_states": {
                "properties": {
                    "block_num": { "type": "long" },
                    "block_id": { "type": "keyword" },
                    "validated": { "type": "boolean" },
                    "in_current_chain": { "type": "boolean" },
                    "block_header_state": { "type": "object", "enabled": false },
                    "createAt": { "type": "date", "format": "epoch_millis" }
                }
            },
            "blocks": {
                "properties": {
                    "block_num": { "type": "long" },
                    "block_id": { "type": "keyword" },
                    "irreversible": { "type": "boolean" },
                    "block": { "type": "object", "enabled": false },
                    "createAt": { "type": "date", "format": "epoch_millis" }
                }
            },
            "transactions": {
                "properties": {
                    "trx_id": { "type": "keyword" },
                    "signing_keys": { "type": "keyword" },
                    "accepted": { "type": "boolean" },
                    "implicit": { "type": "boolean" },
                    "scheduled": { "type": "boolean" },
                    "actions": { "type": "object", "enabled": false },
                    "context_free_actions": { "type": "object", "enabled": false },
                    "createAt": { "type": "date", "format": "epoch_millis" }
                }
            },
            "transaction_traces": {
                "properties": {
                    "id": { "type": "keyword" },
                    "block_num": { "type": "long" },
                    "scheduled": { "type": "boolean" },
                    "action_traces": { "type": "object", "enabled": false },
                    "createAt": { "type": "date", "format": "epoch_millis" }
                }
            },
            "action_traces": {
                "properties": {
                    "trx_id": { "type": "keyword" },
                    "receipt": {
                        "properties": {
                            "receiver": { "type": "keyword" },
                            "global_sequence": { "type": "long" }
                        }
                    },
                    "act": {
                        "properties": {
                            "account": { "type": "keyword" },
                            "name": { "type": "keyword" },
                            "data": { "type": "object", "enabled": false }
                        }
                    },
                    "createAt": { "type": "date", "format": "epoch_millis" }
                }
            },
            "accounts": {
                "properties": {
                    "name": { "type": "keyword" },
                    "abi": { "type": "object", "enabled": false },
                    "createAt": { "type": "date", "format": "epoch_millis" },
                    "updateAt": { "type": "date", "format": "epoch_millis" }
                }
            },
            "pub_keys": {
                "properties": {
                    "account": { "type": "keyword" },
                    "public_key": { "type": "keyword" },
                    "permission": { "type": "keyword" },
                    "createAt": { "type": "date", "format": "epoch_millis" }
                }
            },
            "account_controls": {
                "properties": {
                    "controlled_account": { "type": "keyword" },
                    "controlled_permission": { "type": "keyword" },
                    "controlling_account": { "type": "keyword" },
                    "createAt": { "type": "date", "format": "epoch_millis" }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections;

    #[test]
    fn every_collection_is_mapped() {
        let mappings = index_mappings();
        for collection in collections::ALL {
            assert!(
                mappings["mappings"][collection].is_object(),
                "missing mapping for {collection}"
            );
        }
    }

    #[test]
    fn term_query_fields_are_keywords() {
        let mappings = index_mappings();
        for (collection, field) in [
            ("accounts", "name"),
            ("pub_keys", "account"),
            ("pub_keys", "permission"),
            ("account_controls", "controlled_account"),
            ("account_controls", "controlled_permission"),
            ("blocks", "block_id"),
        ] {
            assert_eq!(
                mappings["mappings"][collection]["properties"][field]["type"], "keyword",
                "{collection}.{field} must be a keyword"
            );
        }
    }
}
