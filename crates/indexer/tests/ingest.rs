//! End-to-end ingestion scenarios against the in-memory backend.
//!
//! These run on the single-threaded test runtime, so the consumer task only
//! makes progress at await points; pushing a batch of events and then
//! shutting down yields one deterministic drain.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use eosearch_core::abi::{ActionDef, FieldDef, StructDef};
use eosearch_core::bytes::ByteWriter;
use eosearch_core::crypto::sha256;
use eosearch_core::types::{
    Action, ActionReceipt, ActionTrace, Authority, BlockHeader, BlockState, KeyWeight,
    PermissionLevel, SignedBlock, SignedTransaction, Transaction, TransactionMetadata,
    TransactionReceiptHeader, TransactionStatus, TransactionTrace,
};
use eosearch_core::{AbiDef, ChainId, Checksum256, Name, PublicKey, Signature};
use eosearch_indexer::plugin::Indexer;
use eosearch_indexer::{collections, IndexerConfig};

use common::MockBackend;

fn name(s: &str) -> Name {
    Name::new(s).unwrap()
}

fn chain_id() -> ChainId {
    ChainId(sha256(b"eosearch integration chain"))
}

fn key(seed: u8) -> PublicKey {
    PublicKey::from_parts(0, [seed; 33])
}

fn key_authority(seed: u8) -> Authority {
    Authority {
        threshold: 1,
        keys: vec![KeyWeight { key: key(seed), weight: 1 }],
        accounts: vec![],
        waits: vec![],
    }
}

fn action(account: &str, act_name: &str, actor: &str, data: Vec<u8>) -> Action {
    Action {
        account: name(account),
        name: name(act_name),
        authorization: vec![PermissionLevel {
            actor: name(actor),
            permission: name("active"),
        }],
        data,
    }
}

fn action_trace(act: Action, receiver: &str, seq: u64) -> ActionTrace {
    ActionTrace {
        receipt: ActionReceipt {
            receiver: name(receiver),
            act_digest: Checksum256::default(),
            global_sequence: seq,
            recv_sequence: seq,
            auth_sequence: vec![],
            code_sequence: 0,
            abi_sequence: 0,
        },
        act,
        context_free: false,
        elapsed_us: 10,
        console: String::new(),
        trx_id: Checksum256([seq as u8; 32]),
        inline_traces: vec![],
    }
}

fn executed_trace(seq: u8, action_traces: Vec<ActionTrace>) -> Arc<TransactionTrace> {
    Arc::new(TransactionTrace {
        id: Checksum256([seq; 32]),
        block_num: 1,
        block_time: Utc::now(),
        receipt: Some(TransactionReceiptHeader {
            status: TransactionStatus::Executed,
            cpu_usage_us: 100,
            net_usage_words: 10,
        }),
        elapsed_us: 100,
        net_usage: 80,
        scheduled: false,
        action_traces,
        except: None,
    })
}

fn metadata(seq: u8, actions: Vec<Action>) -> Arc<TransactionMetadata> {
    Arc::new(TransactionMetadata {
        id: Checksum256([seq; 32]),
        trx: SignedTransaction {
            transaction: Transaction {
                expiration: Utc::now(),
                ref_block_num: 1,
                ref_block_prefix: 7,
                max_net_usage_words: 0,
                max_cpu_usage_ms: 0,
                delay_sec: 0,
                context_free_actions: vec![],
                actions,
                transaction_extensions: vec![],
            },
            signatures: vec![],
            context_free_data: vec![],
        },
        signing_keys: None,
        accepted: true,
        implicit: false,
        scheduled: false,
    })
}

fn block_state(block_num: u32) -> Arc<BlockState> {
    let mut id = [0u8; 32];
    id[..4].copy_from_slice(&block_num.to_be_bytes());
    Arc::new(BlockState {
        block_num,
        id: Checksum256(id),
        validated: true,
        in_current_chain: true,
        block: SignedBlock {
            header: BlockHeader {
                timestamp: Utc::now(),
                producer: name("producer"),
                confirmed: 0,
                previous: Checksum256::default(),
                transaction_mroot: Checksum256::default(),
                action_mroot: Checksum256::default(),
                schedule_version: 1,
            },
            producer_signature: Signature::from_parts(0, [0u8; 65]),
            transactions: vec![],
        },
    })
}

fn newaccount_action(account: &str, owner: Authority, active: Authority) -> Action {
    let mut w = ByteWriter::new();
    w.write_u64(name("eosio").as_u64());
    w.write_u64(name(account).as_u64());
    owner.to_bytes_into(&mut w);
    active.to_bytes_into(&mut w);
    action("eosio", "newaccount", "eosio", w.into_inner())
}

fn updateauth_action(account: &str, permission: &str, auth: Authority) -> Action {
    let mut w = ByteWriter::new();
    w.write_u64(name(account).as_u64());
    w.write_u64(name(permission).as_u64());
    w.write_u64(name("owner").as_u64());
    auth.to_bytes_into(&mut w);
    action("eosio", "updateauth", account, w.into_inner())
}

fn setabi_action(account: &str, abi: &AbiDef) -> Action {
    let mut w = ByteWriter::new();
    w.write_u64(name(account).as_u64());
    w.write_length_prefixed(&abi.to_bytes());
    action("eosio", "setabi", account, w.into_inner())
}

/// An ABI defining a single `doit(value: uint64)` action.
fn doit_abi() -> AbiDef {
    AbiDef {
        version: "eosio::abi/1.1".to_string(),
        structs: vec![StructDef {
            name: "doit".to_string(),
            base: String::new(),
            fields: vec![FieldDef { name: "value".to_string(), type_: "uint64".to_string() }],
        }],
        actions: vec![ActionDef {
            name: Name::new("doit").unwrap(),
            type_: "doit".to_string(),
            ricardian_contract: String::new(),
        }],
        ..Default::default()
    }
}

fn doit_action(account: &str, value: u64) -> Action {
    let mut w = ByteWriter::new();
    w.write_u64(value);
    action(account, "doit", account, w.into_inner())
}

async fn start(config: IndexerConfig, backend: Arc<MockBackend>) -> Indexer {
    Indexer::start_with_backend(config, chain_id(), backend)
        .await
        .expect("indexer failed to start")
}

fn pub_key_rows(backend: &MockBackend) -> Vec<(String, String, String)> {
    backend
        .docs(collections::PUB_KEYS)
        .iter()
        .map(|d| {
            (
                d.source["account"].as_str().unwrap().to_string(),
                d.source["permission"].as_str().unwrap().to_string(),
                d.source["public_key"].as_str().unwrap().to_string(),
            )
        })
        .collect()
}

#[tokio::test]
async fn star_filter_indexes_single_transfer() {
    let backend = Arc::new(MockBackend::new());
    let indexer = start(IndexerConfig::default(), backend.clone()).await;
    let handle = indexer.handle();

    let transfer = action("eosio.token", "transfer", "alice", vec![0xde, 0xad]);
    handle.applied_transaction(executed_trace(1, vec![action_trace(transfer.clone(), "eosio.token", 1)]));
    handle.accepted_transaction(metadata(1, vec![transfer]));

    indexer.shutdown().await;

    assert_eq!(backend.count(collections::ACTION_TRACES), 1);
    assert_eq!(backend.count(collections::TRANSACTION_TRACES), 1);
    assert_eq!(backend.count(collections::TRANSACTIONS), 1);

    let atrace = &backend.docs(collections::ACTION_TRACES)[0].source;
    assert_eq!(atrace["act"]["account"], "eosio.token");
    assert_eq!(atrace["act"]["name"], "transfer");
    // no ABI stored for the receiver, so the payload stays hex
    assert_eq!(atrace["act"]["data"], "dead");

    let trx = &backend.docs(collections::TRANSACTIONS)[0].source;
    assert_eq!(trx["accepted"], true);
    assert_eq!(trx["implicit"], false);
    assert!(trx["trx_id"].is_string());
}

#[tokio::test]
async fn empty_allowlist_suppresses_traces_but_not_transactions() {
    let backend = Arc::new(MockBackend::new());
    let mut config = IndexerConfig::default();
    config.filter.on = vec![];

    let indexer = start(config, backend.clone()).await;
    let handle = indexer.handle();

    let transfer = action("eosio.token", "transfer", "alice", vec![0xde, 0xad]);
    handle.applied_transaction(executed_trace(1, vec![action_trace(transfer.clone(), "eosio.token", 1)]));
    handle.accepted_transaction(metadata(1, vec![transfer]));
    handle.accepted_block(block_state(1));

    indexer.shutdown().await;

    assert_eq!(backend.count(collections::ACTION_TRACES), 0);
    assert_eq!(backend.count(collections::TRANSACTION_TRACES), 0);
    assert_eq!(backend.count(collections::TRANSACTIONS), 1);
    assert_eq!(backend.count(collections::BLOCKS), 1);
    assert_eq!(backend.count(collections::BLOCK_STATES), 1);
}

#[tokio::test]
async fn inline_child_survives_filtered_parent() {
    let backend = Arc::new(MockBackend::new());
    let mut config = IndexerConfig::default();
    config.filter.on = vec!["eosio.token:transfer:".to_string()];

    let indexer = start(config, backend.clone()).await;
    let handle = indexer.handle();

    let parent_act = action("gamecontract", "play", "alice", vec![]);
    let child_act = action("eosio.token", "transfer", "alice", vec![0x01]);
    let mut parent = action_trace(parent_act, "gamecontract", 1);
    parent.inline_traces.push(action_trace(child_act, "eosio.token", 2));

    handle.applied_transaction(executed_trace(1, vec![parent]));
    indexer.shutdown().await;

    let atraces = backend.docs(collections::ACTION_TRACES);
    assert_eq!(atraces.len(), 1);
    assert_eq!(atraces[0].source["act"]["name"], "transfer");
    // at least one action survived, so the full trace is indexed too
    assert_eq!(backend.count(collections::TRANSACTION_TRACES), 1);
}

#[tokio::test]
async fn newaccount_then_updateauth_replaces_keys() {
    let backend = Arc::new(MockBackend::new());
    let indexer = start(IndexerConfig::default(), backend.clone()).await;
    let handle = indexer.handle();

    handle.applied_transaction(executed_trace(
        1,
        vec![action_trace(
            newaccount_action("alice", key_authority(1), key_authority(2)),
            "eosio",
            1,
        )],
    ));
    handle.applied_transaction(executed_trace(
        2,
        vec![action_trace(updateauth_action("alice", "active", key_authority(3)), "eosio", 2)],
    ));

    indexer.shutdown().await;

    let mut rows = pub_key_rows(&backend);
    rows.sort();
    assert_eq!(
        rows,
        vec![
            ("alice".to_string(), "active".to_string(), key(3).to_string()),
            ("alice".to_string(), "owner".to_string(), key(1).to_string()),
        ]
    );

    // the account document itself was created exactly once
    let accounts = backend.docs(collections::ACCOUNTS);
    assert_eq!(
        accounts.iter().filter(|d| d.source["name"] == "alice").count(),
        1
    );
}

#[tokio::test]
async fn deleteauth_clears_both_collections() {
    let backend = Arc::new(MockBackend::new());
    let indexer = start(IndexerConfig::default(), backend.clone()).await;
    let handle = indexer.handle();

    let mut owner_auth = key_authority(1);
    owner_auth.accounts.push(eosearch_core::types::PermissionLevelWeight {
        permission: PermissionLevel { actor: name("guardian"), permission: name("active") },
        weight: 1,
    });
    handle.applied_transaction(executed_trace(
        1,
        vec![action_trace(newaccount_action("bob", owner_auth, key_authority(2)), "eosio", 1)],
    ));

    let mut w = ByteWriter::new();
    w.write_u64(name("bob").as_u64());
    w.write_u64(name("owner").as_u64());
    let deleteauth = action("eosio", "deleteauth", "bob", w.into_inner());
    handle.applied_transaction(executed_trace(2, vec![action_trace(deleteauth, "eosio", 2)]));

    indexer.shutdown().await;

    let rows = pub_key_rows(&backend);
    assert_eq!(rows, vec![("bob".to_string(), "active".to_string(), key(2).to_string())]);
    assert_eq!(backend.count(collections::ACCOUNT_CONTROLS), 0);
}

#[tokio::test]
async fn abi_cache_evicts_least_recently_used() {
    let backend = Arc::new(MockBackend::new());
    let mut config = IndexerConfig::default();
    config.ingest.abi_cache_size = 2;

    let indexer = start(config, backend.clone()).await;
    let handle = indexer.handle();

    // install ABIs for three accounts
    let abi = doit_abi();
    for (seq, account) in [(1u8, "accounta"), (2, "accountb"), (3, "accountc")] {
        handle.applied_transaction(executed_trace(
            seq,
            vec![action_trace(setabi_action(account, &abi), "eosio", seq as u64)],
        ));
    }
    // fill the cache in order a, b, c: c's insert evicts a
    for (seq, account) in [(4u8, "accounta"), (5, "accountb"), (6, "accountc")] {
        handle.applied_transaction(executed_trace(
            seq,
            vec![action_trace(doit_action(account, seq as u64), account, seq as u64)],
        ));
    }
    // b and c are resident: no further lookups; a must be refetched
    for (seq, account) in [(7u8, "accountb"), (8, "accountc"), (9, "accounta")] {
        handle.applied_transaction(executed_trace(
            seq,
            vec![action_trace(doit_action(account, seq as u64), account, seq as u64)],
        ));
    }

    indexer.shutdown().await;

    // every payload decoded through the ABI, eviction or not
    let decoded: Vec<_> = backend
        .docs(collections::ACTION_TRACES)
        .iter()
        .filter(|d| d.source["act"]["name"] == "doit")
        .map(|d| d.source["act"]["data"]["value"].as_u64().unwrap())
        .collect();
    assert_eq!(decoded.len(), 6);

    // setabi does two account lookups, the first decode one more
    let base = backend.search_count(collections::ACCOUNTS, "accountb");
    assert_eq!(backend.search_count(collections::ACCOUNTS, "accountc"), base);
    // the evicted account needed one extra fetch
    assert_eq!(backend.search_count(collections::ACCOUNTS, "accounta"), base + 1);
}

#[tokio::test]
async fn start_block_gate_suppresses_docs_but_not_abi_state() {
    let backend = Arc::new(MockBackend::new());
    let mut config = IndexerConfig::default();
    config.ingest.start_block_num = 100;

    let indexer = start(config, backend.clone()).await;
    let handle = indexer.handle();
    assert!(!indexer.start_block_reached());

    // a setabi before the gate: its projection side effect must land
    handle.applied_transaction(executed_trace(
        1,
        vec![action_trace(setabi_action("earlybird", &doit_abi()), "eosio", 1)],
    ));
    for block_num in 1..=99 {
        handle.accepted_block(block_state(block_num));
    }
    handle.accepted_block(block_state(100));
    handle.accepted_block(block_state(101));

    indexer.shutdown().await;

    let block_nums: Vec<u64> = backend
        .docs(collections::BLOCKS)
        .iter()
        .map(|d| d.source["block_num"].as_u64().unwrap())
        .collect();
    assert_eq!(block_nums, vec![100, 101]);
    assert_eq!(backend.count(collections::BLOCK_STATES), 2);
    // gated: the pre-gate setabi produced no action trace document
    assert_eq!(backend.count(collections::ACTION_TRACES), 0);

    // ungated: the account now carries its ABI
    let accounts = backend.docs(collections::ACCOUNTS);
    let earlybird = accounts
        .iter()
        .find(|d| d.source["name"] == "earlybird")
        .expect("account created before the gate");
    assert!(earlybird.source["abi"].is_object());
}

#[tokio::test]
async fn backend_failure_raises_quit_and_consumer_drains() {
    let backend = Arc::new(MockBackend::new());
    let indexer = start(IndexerConfig::default(), backend.clone()).await;
    let handle = indexer.handle();
    let shutdown = indexer.shutdown_handle();
    assert!(!shutdown.is_requested());

    backend.fail_writes(true);
    let transfer = action("eosio.token", "transfer", "alice", vec![0xde, 0xad]);
    handle.applied_transaction(executed_trace(1, vec![action_trace(transfer, "eosio.token", 1)]));

    tokio::time::timeout(Duration::from_secs(5), shutdown.wait())
        .await
        .expect("quit signal was never raised");
    assert!(shutdown.is_requested());

    // the host reacts by shutting down; the consumer exits cleanly
    indexer.shutdown().await;
    assert_eq!(backend.count(collections::ACTION_TRACES), 0);
}

#[tokio::test]
async fn traces_drain_before_blocks_within_a_round() {
    let backend = Arc::new(MockBackend::new());
    let indexer = start(IndexerConfig::default(), backend.clone()).await;
    let handle = indexer.handle();

    // enqueue the block first; the fixed drain order must still process the
    // trace ahead of it (single-threaded runtime: the consumer cannot run
    // between these two pushes)
    handle.accepted_block(block_state(1));
    let transfer = action("eosio.token", "transfer", "alice", vec![0x01]);
    handle.applied_transaction(executed_trace(1, vec![action_trace(transfer, "eosio.token", 1)]));

    indexer.shutdown().await;

    let writes = backend.write_order();
    let first_trace_write = writes
        .iter()
        .position(|c| c == collections::ACTION_TRACES)
        .expect("trace write missing");
    let first_block_write = writes
        .iter()
        .position(|c| c == collections::BLOCK_STATES)
        .expect("block write missing");
    assert!(first_trace_write < first_block_write);
}

#[tokio::test]
async fn setabi_with_garbage_bytes_keeps_account_without_abi() {
    let backend = Arc::new(MockBackend::new());
    let indexer = start(IndexerConfig::default(), backend.clone()).await;
    let handle = indexer.handle();

    let mut w = ByteWriter::new();
    w.write_u64(name("brokenacct").as_u64());
    w.write_length_prefixed(&[0xff, 0xff, 0xff]);
    let setabi = action("eosio", "setabi", "brokenacct", w.into_inner());
    handle.applied_transaction(executed_trace(1, vec![action_trace(setabi, "eosio", 1)]));

    indexer.shutdown().await;

    let accounts = backend.docs(collections::ACCOUNTS);
    let broken = accounts
        .iter()
        .find(|d| d.source["name"] == "brokenacct")
        .expect("account still created");
    assert!(broken.source.get("abi").is_none() || broken.source["abi"].is_null());
}

#[tokio::test]
async fn store_switches_disable_collections() {
    let backend = Arc::new(MockBackend::new());
    let mut config = IndexerConfig::default();
    config.store.blocks = false;
    config.store.transactions = false;

    let indexer = start(config, backend.clone()).await;
    let handle = indexer.handle();

    let transfer = action("eosio.token", "transfer", "alice", vec![0x01]);
    handle.accepted_transaction(metadata(1, vec![transfer]));
    handle.accepted_block(block_state(1));

    indexer.shutdown().await;

    assert_eq!(backend.count(collections::TRANSACTIONS), 0);
    assert_eq!(backend.count(collections::BLOCKS), 0);
    // block states remain on by default
    assert_eq!(backend.count(collections::BLOCK_STATES), 1);
}

#[tokio::test]
async fn seeds_system_account_on_fresh_index() {
    let backend = Arc::new(MockBackend::new());
    let indexer = start(IndexerConfig::default(), backend.clone()).await;
    indexer.shutdown().await;

    assert!(backend.is_initialized());
    let accounts = backend.docs(collections::ACCOUNTS);
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].source["name"], "eosio");

    // a second start against the same backend must not seed again
    let indexer = start(IndexerConfig::default(), backend.clone()).await;
    indexer.shutdown().await;
    assert_eq!(backend.count(collections::ACCOUNTS), 1);
}

#[tokio::test]
async fn system_abi_specialization_decodes_setabi_payload() {
    let backend = Arc::new(MockBackend::new());
    let indexer = start(IndexerConfig::default(), backend.clone()).await;
    let handle = indexer.handle();

    // the system account's own ABI: setabi whose abi field is raw bytes
    let system_abi = AbiDef {
        version: "eosio::abi/1.1".to_string(),
        structs: vec![StructDef {
            name: "setabi".to_string(),
            base: String::new(),
            fields: vec![
                FieldDef { name: "account".to_string(), type_: "name".to_string() },
                FieldDef { name: "abi".to_string(), type_: "bytes".to_string() },
            ],
        }],
        actions: vec![ActionDef {
            name: Name::new("setabi").unwrap(),
            type_: "setabi".to_string(),
            ricardian_contract: String::new(),
        }],
        ..Default::default()
    };
    handle.applied_transaction(executed_trace(
        1,
        vec![action_trace(setabi_action("eosio", &system_abi), "eosio", 1)],
    ));

    // now a user setabi: its document must carry the nested definition
    // decoded as an object, not a hex blob
    handle.applied_transaction(executed_trace(
        2,
        vec![action_trace(setabi_action("userabc", &doit_abi()), "eosio", 2)],
    ));

    indexer.shutdown().await;

    let atraces = backend.docs(collections::ACTION_TRACES);
    let user_setabi = atraces
        .iter()
        .find(|d| d.source["act"]["data"]["account"] == "userabc")
        .expect("decoded setabi trace");
    let nested = &user_setabi.source["act"]["data"]["abi"];
    assert!(nested.is_object(), "abi decoded as nested definition: {nested}");
    assert_eq!(nested["structs"][0]["name"], "doit");
}
