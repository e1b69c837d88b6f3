mod common;

use std::collections::HashMap;
use std::time::Duration;

use chatrelay_storage::{ConversationFileStore, ConversationPersistence, FileStoreConfig};
use chatrelay_traits::{InboundMessage, Message, Role};
use common::{collect_replies, settings, start_relay};
use tempfile::TempDir;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_threshold_batch_is_answered_and_persisted() {
    let dir = TempDir::new().unwrap();
    let mut t = start_relay(dir.path(), settings(3, 10_000));

    for text in ["a", "b", "c"] {
        t.relay.submit(InboundMessage::text("alice", text)).await;
    }

    let replies = collect_replies(&mut t.replies, 1, Duration::from_secs(2)).await;
    assert_eq!(replies, vec![("alice".to_string(), "echo: abc".to_string())]);

    t.relay.shutdown().await.unwrap();

    let files = ConversationFileStore::new(FileStoreConfig::new(dir.path())).unwrap();
    assert_eq!(
        files.load("alice").await.unwrap(),
        vec![Message::user("abc"), Message::assistant("echo: abc")]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_quiet_period_flushes_partial_batch() {
    let dir = TempDir::new().unwrap();
    let mut t = start_relay(dir.path(), settings(5, 150));

    t.relay.submit(InboundMessage::text("bob", "Hello ")).await;
    t.relay.submit(InboundMessage::text("bob", "World")).await;

    let replies = collect_replies(&mut t.replies, 1, Duration::from_secs(2)).await;
    assert_eq!(replies[0].1, "echo: Hello World");
    assert_eq!(t.model.seen(), vec!["Hello World"]);

    t.relay.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tool_call_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut t = start_relay(dir.path(), settings(1, 10_000));

    t.relay
        .submit(InboundMessage::text("carol", "shout: hi there"))
        .await;

    let replies = collect_replies(&mut t.replies, 1, Duration::from_secs(2)).await;
    assert_eq!(replies[0].1, "tool said: HI THERE (carol)");

    let history = t.relay.store().get("carol").await.unwrap();
    let roles: Vec<Role> = history.iter().map(Message::role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
    assert_eq!(history[2].tool_call_id(), Some("call_1"));

    t.relay.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_flushes_pending_batches() {
    let dir = TempDir::new().unwrap();
    let mut t = start_relay(dir.path(), settings(10, 60_000));

    t.relay.submit(InboundMessage::text("dave", "unfinished")).await;
    t.relay.shutdown().await.unwrap();

    let replies = collect_replies(&mut t.replies, 1, Duration::from_secs(1)).await;
    assert_eq!(replies[0], ("dave".to_string(), "echo: unfinished".to_string()));

    let files = ConversationFileStore::new(FileStoreConfig::new(dir.path())).unwrap();
    assert_eq!(files.load("dave").await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_history_survives_restart() {
    let dir = TempDir::new().unwrap();

    let mut first = start_relay(dir.path(), settings(1, 10_000));
    first.relay.submit(InboundMessage::text("erin", "one")).await;
    collect_replies(&mut first.replies, 1, Duration::from_secs(2)).await;
    first.relay.shutdown().await.unwrap();

    let mut second = start_relay(dir.path(), settings(1, 10_000));
    second.relay.submit(InboundMessage::text("erin", "two")).await;
    collect_replies(&mut second.replies, 1, Duration::from_secs(2)).await;

    let contents: Vec<String> = second
        .relay
        .store()
        .get("erin")
        .await
        .unwrap()
        .iter()
        .map(|m| m.content().to_string())
        .collect();
    assert_eq!(contents, vec!["one", "echo: one", "two", "echo: two"]);

    second.relay.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_identities_in_parallel() {
    let dir = TempDir::new().unwrap();
    let mut t = start_relay(dir.path(), settings(3, 10_000));

    let submitters: Vec<_> = (0..20)
        .map(|i| {
            let key = format!("user-{i}");
            let relay = &t.relay;
            async move {
                for part in ["x", "y", "z"] {
                    relay.submit(InboundMessage::text(&key, part)).await;
                }
            }
        })
        .collect();
    futures::future::join_all(submitters).await;

    let replies: HashMap<String, String> =
        collect_replies(&mut t.replies, 20, Duration::from_secs(5))
            .await
            .into_iter()
            .collect();
    assert_eq!(replies.len(), 20);
    assert!(replies.values().all(|reply| reply == "echo: xyz"));

    t.relay.shutdown().await.unwrap();
}
