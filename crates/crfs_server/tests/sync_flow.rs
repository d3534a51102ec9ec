//! End-to-end reconciliation through the envelope dispatcher.

use crfs_protocol::{FileSystemId, OpHash, UserId};
use crfs_server::{Dispatcher, ServerConfig, SyncServer};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

struct Harness {
    dispatcher: Dispatcher,
    u1: UserId,
    u2: UserId,
    f1: FileSystemId,
}

fn harness(config: ServerConfig) -> Harness {
    let server = SyncServer::new(config).unwrap();
    let dispatcher = server.dispatcher();
    let u1 = UserId::new();
    let u2 = UserId::new();
    let f1 = FileSystemId::new();

    for user in [u1, u2] {
        let reply = call(&dispatcher, "register_user", json!({"user_uuid": user}));
        assert_eq!(reply["payload"]["code"], json!(0));
    }
    let reply = call(
        &dispatcher,
        "register_fs",
        json!({"user_uuid": u1, "fs_uuid": f1, "display_name": "f1"}),
    );
    assert_eq!(reply["payload"]["code"], json!(0));

    Harness {
        dispatcher,
        u1,
        u2,
        f1,
    }
}

fn call(dispatcher: &Dispatcher, kind: &str, payload: Value) -> Value {
    let (_, reply) = dispatcher.handle(&json!({
        "transaction_id": "tx",
        "type": kind,
        "payload": payload,
    }));
    serde_json::to_value(reply).unwrap()
}

fn push(h: &Harness, user: UserId, ops: &[OpHash]) -> Value {
    call(
        &h.dispatcher,
        "push_state",
        json!({"user_uuid": user, "fs_uuid": h.f1, "ops": ops}),
    )
}

fn fetch(h: &Harness, user: UserId) -> Value {
    call(
        &h.dispatcher,
        "fetch_state",
        json!({"user_uuid": user, "fs_uuid": h.f1}),
    )
}

fn state_of(reply: &Value) -> BTreeSet<OpHash> {
    serde_json::from_value(reply["payload"]["state"].clone()).unwrap()
}

#[test]
fn push_fetch_and_ownership_scenario() {
    let h = harness(ServerConfig::default());
    let aa = OpHash::from_hex("aa").unwrap();

    let reply = push(&h, h.u1, &[aa.clone()]);
    assert_eq!(reply["payload"], json!({"code": 0}));
    assert_eq!(reply["reply"], json!(true));
    assert_eq!(reply["transaction_id"], json!("tx"));
    assert_eq!(reply["notifications"], json!([]));

    let reply = fetch(&h, h.u1);
    assert_eq!(reply["payload"], json!({"code": 0, "state": [[0xAA]]}));

    let reply = fetch(&h, h.u2);
    assert_eq!(reply["payload"]["code"], json!(9));
}

#[test]
fn repeated_push_is_idempotent() {
    let h = harness(ServerConfig::default());
    let hash = OpHash::digest(b"op");

    push(&h, h.u1, &[hash.clone()]);
    push(&h, h.u1, &[hash.clone()]);

    assert_eq!(state_of(&fetch(&h, h.u1)), BTreeSet::from([hash]));
}

#[test]
fn non_owner_push_leaves_log_unchanged() {
    let h = harness(ServerConfig::default());
    let mine = OpHash::digest(b"mine");
    push(&h, h.u1, &[mine.clone()]);

    let reply = push(&h, h.u2, &[OpHash::digest(b"theirs")]);
    assert_eq!(reply["payload"]["code"], json!(9));
    assert!(reply["payload"]["err_msg"].is_string());

    assert_eq!(state_of(&fetch(&h, h.u1)), BTreeSet::from([mine]));
}

#[test]
fn unknown_filesystem() {
    let h = harness(ServerConfig::default());
    let reply = call(
        &h.dispatcher,
        "fetch_state",
        json!({"user_uuid": h.u1, "fs_uuid": FileSystemId::new()}),
    );
    assert_eq!(reply["payload"]["code"], json!(4));
}

#[test]
fn interleaved_pushes_from_many_replicas() {
    let h = Arc::new(harness(ServerConfig::default()));
    let all: Vec<OpHash> = (0..200u32)
        .map(|i| OpHash::digest(&i.to_be_bytes()))
        .collect();

    let handles: Vec<_> = all
        .chunks(25)
        .map(|chunk| {
            let h = Arc::clone(&h);
            let chunk = chunk.to_vec();
            thread::spawn(move || {
                for pair in chunk.chunks(2) {
                    let reply = push(&h, h.u1, pair);
                    assert_eq!(reply["payload"]["code"], json!(0));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let expected: BTreeSet<_> = all.into_iter().collect();
    assert_eq!(state_of(&fetch(&h, h.u1)), expected);
}

#[test]
fn push_requiring_blobs() {
    let server = SyncServer::new(ServerConfig::default().with_require_blobs_before_push(true)).unwrap();
    let dispatcher = server.dispatcher();
    let user = UserId::new();
    let fs = FileSystemId::new();
    call(&dispatcher, "register_user", json!({"user_uuid": user}));
    call(&dispatcher, "register_fs", json!({"user_uuid": user, "fs_uuid": fs}));

    let hash = OpHash::digest(b"body");
    let reply = call(
        &dispatcher,
        "push_state",
        json!({"user_uuid": user, "fs_uuid": fs, "ops": [hash.clone()]}),
    );
    assert_eq!(reply["payload"]["code"], json!(8));

    server
        .gateway()
        .put_blob(None, fs, &hash, b"body")
        .unwrap();
    let reply = call(
        &dispatcher,
        "push_state",
        json!({"user_uuid": user, "fs_uuid": fs, "ops": [hash]}),
    );
    assert_eq!(reply["payload"]["code"], json!(0));
}
