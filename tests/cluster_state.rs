//! Cluster state machine integration tests

use gantry::cluster::{State, ACTIVE_THRESHOLD_SECS, MASTER_KEY};
use gantry::common::store::{MemoryStore, SharedStore};
use gantry::common::utils::epoch;
use gantry::common::Config;
use serde_json::json;

fn state_for(node_id: &str, store: SharedStore) -> State {
    let config = Config {
        node_id: node_id.to_string(),
        node_address: "127.0.0.1".to_string(),
        ..Config::default()
    };
    State::new(store, &config)
}

async fn seed_node(store: &SharedStore, node_id: &str, age_secs: f64) {
    store
        .set_json(
            &format!("cluster:nodes:{node_id}:last_seen"),
            &json!(epoch() - age_secs),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_active_nodes_threshold_boundaries() {
    let store = MemoryStore::shared();
    seed_node(&store, "fresh", 29.0).await;
    seed_node(&store, "stale", 31.0).await;

    let state = state_for("observer", store);
    let nodes = state.get_active_nodes(30.0).await.unwrap();
    let ids: Vec<&str> = nodes.iter().map(|(_, id)| id.as_str()).collect();
    assert_eq!(ids, vec!["fresh"]);
}

#[tokio::test]
async fn test_active_nodes_sorted_ascending() {
    let store = MemoryStore::shared();
    seed_node(&store, "node-a", 5.0).await;
    seed_node(&store, "node-b", 10.0).await;
    seed_node(&store, "node-c", 40.0).await;

    let state = state_for("observer", store);
    let nodes = state.get_active_nodes(ACTIVE_THRESHOLD_SECS).await.unwrap();
    let ids: Vec<&str> = nodes.iter().map(|(_, id)| id.as_str()).collect();
    // Ascending age puts the most recently seen node first; node-c is out
    assert_eq!(ids, vec!["node-a", "node-b"]);
}

#[tokio::test]
async fn test_election_skips_never_promote() {
    let store = MemoryStore::shared();
    seed_node(&store, "node-a", 10.0).await;
    seed_node(&store, "node-b", 5.0).await;
    store
        .set_json("cluster:nodes:node-a:never_promote", &json!(true))
        .await
        .unwrap();

    let state = state_for("node-b", store.clone());
    let master = state.confirm_master().await.unwrap();
    assert_eq!(master.as_deref(), Some("node-b"));
    assert_eq!(store.get_raw(MASTER_KEY).await.unwrap().as_deref(), Some("node-b"));
    assert!(state.is_master());
}

#[tokio::test]
async fn test_master_retained_at_19s() {
    let store = MemoryStore::shared();
    seed_node(&store, "master-node", 19.0).await;
    store
        .set_json("cluster:nodes:master-node:never_promote", &json!(true))
        .await
        .unwrap();
    store.set_raw(MASTER_KEY, "master-node").await.unwrap();

    let state = state_for("observer", store);
    let master = state.confirm_master().await.unwrap();
    assert_eq!(master.as_deref(), Some("master-node"));
}

#[tokio::test]
async fn test_master_cleared_at_21s() {
    let store = MemoryStore::shared();
    // The stale master opted out of promotion, so once cleared it cannot
    // win the follow-up election; the fresh node does.
    seed_node(&store, "master-node", 21.0).await;
    store
        .set_json("cluster:nodes:master-node:never_promote", &json!(true))
        .await
        .unwrap();
    seed_node(&store, "other-node", 1.0).await;
    store.set_raw(MASTER_KEY, "master-node").await.unwrap();

    let state = state_for("observer", store.clone());
    let master = state.confirm_master().await.unwrap();
    assert_eq!(master.as_deref(), Some("other-node"));
    assert_eq!(
        store.get_raw(MASTER_KEY).await.unwrap().as_deref(),
        Some("other-node")
    );
}

#[tokio::test]
async fn test_master_with_missing_record_cleared() {
    let store = MemoryStore::shared();
    store.set_raw(MASTER_KEY, "ghost").await.unwrap();
    seed_node(&store, "node-a", 2.0).await;

    let state = state_for("node-a", store);
    let master = state.confirm_master().await.unwrap();
    assert_eq!(master.as_deref(), Some("node-a"));
}

#[tokio::test]
async fn test_election_scenario_three_nodes() {
    // A, B, C last seen 5s, 10s and 40s ago; C is excluded and the most
    // recently seen node (A) wins the election.
    let store = MemoryStore::shared();
    seed_node(&store, "node-a", 5.0).await;
    seed_node(&store, "node-b", 10.0).await;
    seed_node(&store, "node-c", 40.0).await;

    let state = state_for("node-a", store);
    let nodes = state.get_active_nodes(30.0).await.unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].1, "node-a");
    assert_eq!(nodes[1].1, "node-b");
    assert!(nodes[0].0 < nodes[1].0);

    let master = state.confirm_master().await.unwrap();
    assert_eq!(master.as_deref(), Some("node-a"));
}

#[tokio::test]
async fn test_confirm_master_adopts_recorded_master() {
    let store = MemoryStore::shared();
    seed_node(&store, "existing", 2.0).await;
    store.set_raw(MASTER_KEY, "existing").await.unwrap();

    let state = state_for("newcomer", store);
    let master = state.confirm_master().await.unwrap();
    assert_eq!(master.as_deref(), Some("existing"));
    assert!(!state.is_master());
}

#[tokio::test]
async fn test_no_candidates_yields_no_master() {
    let store = MemoryStore::shared();
    seed_node(&store, "loner", 50.0).await;

    let state = state_for("observer", store);
    assert_eq!(state.confirm_master().await.unwrap(), None);
    assert!(!state.is_master());
}
