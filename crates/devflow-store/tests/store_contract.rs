use devflow_store::{
    CollectionPath, Direction, DocPath, DocumentStore, FieldOp, Fields, MemoryStore,
    MemoryStoreConfig, Precondition, Query, StoreError, Write,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn obj(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}

fn projects() -> CollectionPath {
    CollectionPath::root("projects").unwrap()
}

#[tokio::test]
async fn query_subscription_tracks_membership() {
    let store = MemoryStore::new();
    let query = Query::new(projects())
        .array_contains("collaborators", "u2")
        .order_by("createdAt", Direction::Descending);

    let mut sub = store.subscribe_query(&query).await.unwrap();
    assert!(sub.next().await.unwrap().is_empty());

    let p1: DocPath = "projects/p1".parse().unwrap();
    store
        .set(&p1, obj(json!({"createdAt": 1, "collaborators": []})), false)
        .await
        .unwrap();
    assert!(sub.next().await.unwrap().is_empty());

    store
        .update(
            &p1,
            vec![FieldOp::ArrayUnion("collaborators".into(), vec![json!("u2")])],
            Precondition::None,
        )
        .await
        .unwrap();
    let snapshot = sub.next().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id(), "p1");
}

#[tokio::test]
async fn chat_subcollection_does_not_wake_project_watchers() {
    let store = MemoryStore::new();
    let p1: DocPath = "projects/p1".parse().unwrap();
    store.set(&p1, Fields::new(), false).await.unwrap();

    let mut project_sub = store.subscribe_doc(&p1).await.unwrap();
    let _ = project_sub.next().await;
    let mut list_sub = store.subscribe_query(&Query::new(projects())).await.unwrap();
    let _ = list_sub.next().await;

    store
        .add(&p1.collection("chat").unwrap(), obj(json!({"text": "hi"})), vec![])
        .await
        .unwrap();

    assert!(project_sub.try_next().is_none());
    assert!(list_sub.try_next().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_array_union_loses_nothing() {
    let store = Arc::new(MemoryStore::new());
    let path: DocPath = "projects/p1".parse().unwrap();
    store
        .set(&path, obj(json!({"collaborators": []})), false)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..32 {
        let store = Arc::clone(&store);
        let path = path.clone();
        handles.push(tokio::spawn(async move {
            store
                .update(
                    &path,
                    vec![FieldOp::ArrayUnion("collaborators".into(), vec![json!(format!("u{i}"))])],
                    Precondition::None,
                )
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let doc = store.get(&path).await.unwrap().unwrap();
    assert_eq!(doc.fields["collaborators"].as_array().unwrap().len(), 32);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn version_guard_admits_exactly_one_writer() {
    let store = Arc::new(MemoryStore::new());
    let path: DocPath = "projects/p1".parse().unwrap();
    let doc = store.set(&path, obj(json!({"n": 0})), false).await.unwrap();

    let mut handles = Vec::new();
    for i in 1..=16 {
        let store = Arc::clone(&store);
        let path = path.clone();
        let version = doc.version;
        handles.push(tokio::spawn(async move {
            store
                .commit(vec![Write::set(path, obj(json!({"n": i}))).if_version(version)])
                .await
        }));
    }

    let mut won = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won += 1,
            Err(err) => assert!(err.is_conflict(), "unexpected error: {err}"),
        }
    }
    assert_eq!(won, 1);
}

#[tokio::test(start_paused = true)]
async fn configured_latency_delays_calls() {
    let store = MemoryStore::with_config(
        MemoryStoreConfig::new().with_latency(Duration::from_millis(50)),
    );
    let started = tokio::time::Instant::now();
    store.get(&"projects/p1".parse().unwrap()).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[tokio::test]
async fn offline_commit_changes_nothing() {
    let store = MemoryStore::new();
    let path: DocPath = "projects/p1".parse().unwrap();
    store.go_offline();
    let err = store.set(&path, Fields::new(), false).await.unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(_)));
    store.go_online();
    assert_eq!(store.document_count(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn query_order_is_total(values in proptest::collection::vec(0i64..5, 1..20)) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let store = MemoryStore::new();
            for (i, v) in values.iter().enumerate() {
                let path = projects().doc(&format!("d{i:02}")).unwrap();
                store.set(&path, obj(json!({"k": v})), false).await.unwrap();
            }
            let query = Query::new(projects()).order_by("k", Direction::Ascending);
            let first = store.query(&query).await.unwrap();
            let second = store.query(&query).await.unwrap();
            prop_assert_eq!(first.len(), values.len());

            let ids: Vec<&str> = first.iter().map(|d| d.id()).collect();
            let again: Vec<&str> = second.iter().map(|d| d.id()).collect();
            prop_assert_eq!(&ids, &again);

            for pair in first.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                let (ka, kb) = (a.fields["k"].as_i64().unwrap(), b.fields["k"].as_i64().unwrap());
                prop_assert!(ka < kb || (ka == kb && a.id() < b.id()));
            }
            Ok(())
        })?;
    }
}
