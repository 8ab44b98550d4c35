mod common;

use clangd_client::connection::ConnectionOptions;
use clangd_client::edit_collector::RecordingEditCollector;
use clangd_client::watcher::{ListenerFactory, Watcher};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn initialize_round_trip_against_fake_server() {
    let mut responses = HashMap::new();
    responses.insert("initialize", json!({"capabilities": {"hoverProvider": true}}));

    let connection = common::connection_with_fake_server(responses, ConnectionOptions::default()).await;

    let pending = connection
        .send_request("initialize", Some(json!({"processId": 1})))
        .await
        .unwrap();
    let response = pending.await_response(Duration::from_secs(2)).await.unwrap();
    assert_eq!(
        response.result,
        Some(json!({"capabilities": {"hoverProvider": true}}))
    );
}

#[tokio::test]
async fn apply_edit_is_routed_through_the_active_collector() {
    let (connection, mut from_client, mut to_client) =
        common::connection_with_raw_server(ConnectionOptions::default()).await;

    let collector = Arc::new(RecordingEditCollector::new());
    connection.set_edit_collector(collector.clone()).await;

    to_client
        .send(json!({"jsonrpc": "2.0", "id": 1, "method": "workspace/applyEdit", "params": {"edit": {"changes": {}}}}))
        .await
        .unwrap();

    let response = from_client.next().await.unwrap().unwrap();
    assert_eq!(response["result"]["applied"], json!(true));

    let edits = collector.take_edits();
    assert_eq!(edits.len(), 1);
}

struct RecordingListenerFactory {
    watched: Arc<std::sync::Mutex<Vec<Vec<String>>>>,
}

struct NoopWatcher;
impl Watcher for NoopWatcher {
    fn stop(&mut self) {}
}

impl ListenerFactory for RecordingListenerFactory {
    fn watch(&self, glob_patterns: &[String]) -> clangd_client::Result<Box<dyn Watcher>> {
        self.watched.lock().unwrap().push(glob_patterns.to_vec());
        Ok(Box::new(NoopWatcher))
    }
}

#[tokio::test]
async fn register_capability_starts_a_watcher_for_did_change_watched_files() {
    let watched = Arc::new(std::sync::Mutex::new(Vec::new()));
    let options = ConnectionOptions {
        listener_factory: Some(Arc::new(RecordingListenerFactory { watched: watched.clone() })),
        workspace_configuration_handler: None,
        notification_handler: None,
    };

    let (_connection, mut from_client, mut to_client) = common::connection_with_raw_server(options).await;

    let registration = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "client/registerCapability",
        "params": {
            "registrations": [{
                "id": "watch-1",
                "method": "workspace/didChangeWatchedFiles",
                "registerOptions": {"watchers": [{"globPattern": "src/**/*.cpp"}]},
            }]
        }
    });
    to_client.send(registration).await.unwrap();

    let response = from_client.next().await.unwrap().unwrap();
    assert_eq!(response["result"], json!(null));
    assert_eq!(watched.lock().unwrap().len(), 1);
    assert_eq!(watched.lock().unwrap()[0], vec!["/proj/src/**/*.cpp".to_string()]);
}

#[tokio::test]
async fn unsupported_server_request_gets_method_not_found() {
    let (_connection, mut from_client, mut to_client) =
        common::connection_with_raw_server(ConnectionOptions::default()).await;

    to_client
        .send(json!({"jsonrpc": "2.0", "id": 1, "method": "test"}))
        .await
        .unwrap();

    let response = from_client.next().await.unwrap().unwrap();
    assert_eq!(response["error"]["code"], json!(-32601));
}
