//! # Node Runtime Integration Tests
//!
//! Starts `SpvNode` on regtest against `MockProtocolClient` and an
//! in-memory store.

use std::sync::Arc;
use std::time::Duration;

use header_sync::ports::{subscription_key, HEADERS_SUBSCRIBE, SCRIPTHASH_SUBSCRIBE};
use header_sync::test_utils::{mine_chain, mine_header, EASY_BITS};
use header_sync::{
    BlockHeader, HeaderChainApi, InMemoryKVStore, MockProtocolClient, ScriptHash, SyncConfig,
};
use serde_json::json;
use spv_node::{Network, NodeConfig, SpvNode};

const SCRIPT: &[u8] = &[0x51];

fn regtest_config() -> NodeConfig {
    NodeConfig {
        network: Network::Regtest,
        status_interval_secs: 1,
        sync: SyncConfig::for_testing(),
        ..Default::default()
    }
}

/// Regtest genesis followed by `len` mined headers, hex by height.
fn served_chain(len: usize) -> (Vec<BlockHeader>, Vec<String>) {
    let genesis = Network::Regtest.genesis().unwrap();
    let mut chain = vec![genesis.clone()];
    chain.extend(mine_chain(genesis.hash, len, EASY_BITS, genesis.timestamp + 600));
    let hexes = chain.iter().map(BlockHeader::to_hex).collect();
    (chain, hexes)
}

async fn start(client: &Arc<MockProtocolClient>) -> SpvNode<MockProtocolClient, InMemoryKVStore> {
    SpvNode::start_with_store(regtest_config(), Arc::clone(client), InMemoryKVStore::new())
        .await
        .unwrap()
}

async fn wait_for_height<C, S>(node: &SpvNode<C, S>, height: u64) -> bool
where
    C: header_sync::ProtocolClient + 'static,
    S: header_sync::KeyValueStore + 'static,
{
    for _ in 0..100 {
        if let Ok(Some(tip)) = node.engine().canonical_tip() {
            if tip.height >= height {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_start_seeds_genesis_and_syncs_to_tip() {
    let (chain, hexes) = served_chain(10);
    let client = Arc::new(MockProtocolClient::with_headers(hexes));

    let mut node = start(&client).await;

    assert_eq!(node.wait_for_sync().await.unwrap(), 10);
    let tip = node.engine().canonical_tip().unwrap().unwrap();
    assert_eq!(tip.hash, chain[10].hash);
    assert_eq!(tip.height, 10);
    // Genesis plus ten difficulty-1 headers
    assert_eq!(tip.accumulated_work, primitive_types::U256::from(11u64));

    node.shutdown().await;
}

#[tokio::test]
async fn test_catch_up_spans_server_windows() {
    let (chain, hexes) = served_chain(20);
    let mut mock = MockProtocolClient::with_headers(hexes);
    mock.max_window = 6;
    let client = Arc::new(mock);

    let mut node = start(&client).await;

    assert_eq!(node.wait_for_sync().await.unwrap(), 20);
    assert_eq!(node.engine().canonical_tip().unwrap().unwrap().hash, chain[20].hash);
    assert!(client.requests().len() >= 4);

    node.shutdown().await;
}

#[tokio::test]
async fn test_pushed_header_extends_tip() {
    let (chain, hexes) = served_chain(3);
    let client = Arc::new(MockProtocolClient::with_headers(hexes));

    let mut node = start(&client).await;
    node.wait_for_sync().await.unwrap();
    assert!(client.is_subscribed(HEADERS_SUBSCRIBE));

    let next = mine_header(chain[3].hash, EASY_BITS, chain[3].timestamp + 600);
    assert!(
        client
            .push(HEADERS_SUBSCRIBE, json!({ "hex": next.to_hex(), "height": 4 }))
            .await
    );

    assert!(wait_for_height(&node, 4).await);
    assert_eq!(node.engine().canonical_tip().unwrap().unwrap().hash, next.hash);

    node.shutdown().await;
}

#[tokio::test]
async fn test_watched_scripts_are_subscribed() {
    let (_, hexes) = served_chain(1);
    let client = Arc::new(MockProtocolClient::with_headers(hexes));
    let mut config = regtest_config();
    config.watch_scripts = vec![hex::encode(SCRIPT)];

    let script_hash = ScriptHash::from_script(SCRIPT);
    let key = subscription_key(SCRIPTHASH_SUBSCRIBE, &[json!(script_hash.to_string())]);
    client.set_initial(key.clone(), json!("initial-status"));

    let node = SpvNode::start_with_store(config, Arc::clone(&client), InMemoryKVStore::new())
        .await
        .unwrap();

    assert!(client.is_subscribed(&key));
    assert!(client.push(&key, json!("new-status")).await);

    node.shutdown().await;
}

#[tokio::test]
async fn test_start_fails_when_server_unavailable() {
    let (_, hexes) = served_chain(1);
    let mut mock = MockProtocolClient::with_headers(hexes);
    mock.should_fail = true;

    let result =
        SpvNode::start_with_store(regtest_config(), Arc::new(mock), InMemoryKVStore::new()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_shutdown_completes_promptly() {
    let (_, hexes) = served_chain(2);
    let client = Arc::new(MockProtocolClient::with_headers(hexes));

    let node = SpvNode::start_with_store(regtest_config(), client, InMemoryKVStore::new())
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), node.shutdown())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_shutdown_during_slow_catch_up() {
    let (_, hexes) = served_chain(2);
    let mut mock = MockProtocolClient::with_headers(hexes);
    mock.request_delay = Some(Duration::from_secs(3600));
    let client = Arc::new(mock);

    let node = tokio::time::timeout(Duration::from_secs(1), start(&client))
        .await
        .unwrap();
    while client.requests().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    tokio::time::timeout(Duration::from_secs(1), node.shutdown())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_wait_for_sync_only_once() {
    let (_, hexes) = served_chain(1);
    let client = Arc::new(MockProtocolClient::with_headers(hexes));
    let mut node = start(&client).await;

    assert_eq!(node.wait_for_sync().await.unwrap(), 1);
    assert!(node.wait_for_sync().await.is_err());
    node.shutdown().await;
}
