//! End-to-end comment flow: an expired access token is rotated once,
//! transparently, and the optimistic comment reconciles to its server id.

use std::sync::Arc;

use atrium_client::testing::{FakeDispatcher, json_response, status_response};
use atrium_client::{ApiClient, ApiClientConfig};
use atrium_session::{MemoryTokenStore, SessionStore};
use atrium_sync::{Delta, EntryStatus, OptimisticStore, ReconciledTree};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct CommentResponse {
    id: String,
    body: String,
}

#[tokio::test]
async fn expired_token_comment_is_retried_once_and_reconciled() {
    let dispatcher = Arc::new(FakeDispatcher::default());
    // Original request hits an expired token.
    dispatcher.push(status_response(401));
    // The rotation succeeds and the user snapshot is refetched.
    dispatcher.push(json_response(
        200,
        &json!({"access": "fresh-access", "refresh": "refresh-2"}),
    ));
    dispatcher.push(json_response(
        200,
        &json!({"id": "u1", "email": "u1@example.com"}),
    ));
    // The single retry lands; the server assigns the real id.
    dispatcher.push(json_response(
        200,
        &json!({"id": "c42", "body": "nice one"}),
    ));

    let session = SessionStore::new(Arc::new(MemoryTokenStore::default()));
    session.set_tokens("expired-access", "refresh-1");
    let client = ApiClient::with_dispatcher(
        ApiClientConfig::new("https://api.example.com"),
        session,
        dispatcher.clone(),
    )
    .expect("client");

    // Optimistic side: comment appears immediately under its parent.
    let mut store: OptimisticStore<String> = OptimisticStore::new();
    let mut tree: ReconciledTree<String> = ReconciledTree::new();
    tree.insert_confirmed("c1", None, "first!".to_string(), 0)
        .expect("seed");

    let temp_id = store.apply(
        "nice one".to_string(),
        vec![Delta::AdjustCount {
            key: "c1".to_string(),
            by: 1,
        }],
    );
    tree.insert_local(&temp_id, Some("c1"), "nice one".to_string())
        .expect("insert");
    assert_eq!(tree.node("c1").expect("parent").reply_count, 1);

    let confirmed: CommentResponse = client
        .post_json(
            "/posts/p1/comments",
            &json!({"parent_id": "c1", "body": "nice one"}),
        )
        .await
        .expect("comment");
    assert_eq!(confirmed.body, "nice one");

    assert!(store.confirm(&temp_id, &confirmed.id));
    assert!(tree.confirm(&temp_id, &confirmed.id));

    // Exactly two HTTP calls besides the auth traffic: original + retry.
    let log = dispatcher.log();
    let comment_calls = log
        .iter()
        .filter(|request| request.url.ends_with("/posts/p1/comments"))
        .count();
    assert_eq!(comment_calls, 2);
    let auth_calls = log
        .iter()
        .filter(|request| request.url.contains("/auth/"))
        .count();
    assert_eq!(log.len(), comment_calls + auth_calls);

    // The comment is reachable by server id, in place, still one reply.
    let entry = store.entry(&temp_id).expect("entry");
    assert_eq!(entry.status, EntryStatus::Confirmed);
    assert_eq!(entry.entity_id.as_deref(), Some("c42"));
    let node = tree.node("c42").expect("node");
    assert_eq!(node.key, temp_id);
    assert_eq!(tree.node("c1").expect("parent").reply_count, 1);
    assert_eq!(store.aggregates().count("c1"), 1);
}

#[tokio::test]
async fn failed_comment_rolls_back_tree_and_aggregates() {
    let dispatcher = Arc::new(FakeDispatcher::default());
    dispatcher.push(status_response(500));

    let session = SessionStore::new(Arc::new(MemoryTokenStore::default()));
    session.set_tokens("access-1", "refresh-1");
    let client = ApiClient::with_dispatcher(
        ApiClientConfig::new("https://api.example.com"),
        session,
        dispatcher,
    )
    .expect("client");

    let mut store: OptimisticStore<String> = OptimisticStore::new();
    let mut tree: ReconciledTree<String> = ReconciledTree::new();
    tree.insert_confirmed("c1", None, "first!".to_string(), 2)
        .expect("seed");
    store.aggregates_mut().seed_count("c1", 2);

    let temp_id = store.apply(
        "hot take".to_string(),
        vec![Delta::AdjustCount {
            key: "c1".to_string(),
            by: 1,
        }],
    );
    tree.insert_local(&temp_id, Some("c1"), "hot take".to_string())
        .expect("insert");

    let outcome: Result<CommentResponse, _> = client
        .post_json("/posts/p1/comments", &json!({"parent_id": "c1"}))
        .await;
    assert!(outcome.is_err());

    assert!(store.fail(&temp_id));
    assert!(tree.fail(&temp_id));

    // Visible state matches what it would have been had the comment never
    // been attempted.
    assert_eq!(store.aggregates().count("c1"), 2);
    assert_eq!(tree.node("c1").expect("parent").reply_count, 2);
    assert!(tree.children("c1").is_empty());
}
