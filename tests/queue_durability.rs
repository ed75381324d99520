use std::collections::BTreeMap;
use std::path::PathBuf;

use streamsense::{Event, EventKind, EventQueue};
use tempfile::TempDir;

fn queue_path(dir: &TempDir) -> PathBuf {
    dir.path().join("queue.sqlite3")
}

fn event(session: &str, kind: EventKind, position: u32) -> Event {
    let mut payload = BTreeMap::new();
    payload.insert("name".to_string(), serde_json::Value::from("show1"));
    payload.insert("pos".to_string(), serde_json::Value::from(position));
    Event::new(session.to_string(), kind, payload)
}

#[tokio::test]
async fn append_assigns_monotonic_sequences_in_fifo_order() {
    let dir = TempDir::new().unwrap();
    let queue = EventQueue::open(queue_path(&dir), 500).unwrap();

    for position in [0, 5, 10] {
        queue
            .append(event("s1", EventKind::Heartbeat, position))
            .await
            .unwrap();
    }

    assert_eq!(queue.size().await.unwrap(), 3);
    assert!(!queue.is_empty().await.unwrap());

    let entries = queue.peek_batch(10).await.unwrap();
    let sequences: Vec<u64> = entries.iter().map(|entry| entry.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
    let positions: Vec<u64> = entries
        .iter()
        .map(|entry| entry.event.payload["pos"].as_u64().unwrap())
        .collect();
    assert_eq!(positions, vec![0, 5, 10]);

    // Peek is non-destructive and restartable.
    assert_eq!(queue.peek_batch(10).await.unwrap().len(), 3);
    assert_eq!(queue.size().await.unwrap(), 3);
}

#[tokio::test]
async fn capacity_overflow_evicts_oldest_first() {
    let dir = TempDir::new().unwrap();
    let queue = EventQueue::open(queue_path(&dir), 2).unwrap();

    for position in [1, 2, 3] {
        queue
            .append(event("s1", EventKind::Heartbeat, position))
            .await
            .unwrap();
    }

    assert_eq!(queue.size().await.unwrap(), 2);
    let entries = queue.peek_batch(10).await.unwrap();
    let positions: Vec<u64> = entries
        .iter()
        .map(|entry| entry.event.payload["pos"].as_u64().unwrap())
        .collect();
    // The two most recent survive; the oldest was dropped.
    assert_eq!(positions, vec![2, 3]);
}

#[tokio::test]
async fn remove_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let queue = EventQueue::open(queue_path(&dir), 500).unwrap();

    let first = queue
        .append(event("s1", EventKind::Heartbeat, 0))
        .await
        .unwrap();
    queue
        .append(event("s1", EventKind::Heartbeat, 5))
        .await
        .unwrap();

    queue.remove(vec![first]).await.unwrap();
    assert_eq!(queue.size().await.unwrap(), 1);

    // Removing an already-absent sequence is a no-op.
    queue.remove(vec![first]).await.unwrap();
    queue.remove(vec![999]).await.unwrap();
    assert_eq!(queue.size().await.unwrap(), 1);
}

#[tokio::test]
async fn pending_entries_survive_restart() {
    let dir = TempDir::new().unwrap();
    let path = queue_path(&dir);

    {
        let queue = EventQueue::open(path.clone(), 500).unwrap();
        queue
            .append(event("s1", EventKind::Heartbeat, 0))
            .await
            .unwrap();
        queue.append(event("s1", EventKind::Stop, 10)).await.unwrap();
    }

    // Simulated restart: everything unconfirmed is still pending, in order.
    let queue = EventQueue::open(path, 500).unwrap();
    assert_eq!(queue.size().await.unwrap(), 2);
    let entries = queue.peek_batch(10).await.unwrap();
    assert_eq!(entries[0].sequence, 0);
    assert_eq!(entries[0].event.kind, EventKind::Heartbeat);
    assert_eq!(entries[1].sequence, 1);
    assert_eq!(entries[1].event.kind, EventKind::Stop);
}

#[tokio::test]
async fn sequence_counter_survives_drain_and_restart() {
    let dir = TempDir::new().unwrap();
    let path = queue_path(&dir);

    {
        let queue = EventQueue::open(path.clone(), 500).unwrap();
        let a = queue
            .append(event("s1", EventKind::Heartbeat, 0))
            .await
            .unwrap();
        let b = queue
            .append(event("s1", EventKind::Heartbeat, 5))
            .await
            .unwrap();
        queue.remove(vec![a, b]).await.unwrap();
        assert!(queue.is_empty().await.unwrap());
    }

    // Sequences never regress, even after a full drain and restart.
    let queue = EventQueue::open(path, 500).unwrap();
    let next = queue
        .append(event("s1", EventKind::Heartbeat, 10))
        .await
        .unwrap();
    assert_eq!(next, 2);
}

#[tokio::test]
async fn corrupt_records_are_discarded_on_recovery() {
    let dir = TempDir::new().unwrap();
    let path = queue_path(&dir);

    {
        let queue = EventQueue::open(path.clone(), 500).unwrap();
        for position in [0, 5, 10] {
            queue
                .append(event("s1", EventKind::Heartbeat, position))
                .await
                .unwrap();
        }
    }

    // Tamper with the middle record: unparseable payload.
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute(
            "UPDATE pending_events SET payload = 'not json' WHERE seq = 1",
            [],
        )
        .unwrap();
    }

    let queue = EventQueue::open(path, 500).unwrap();
    assert_eq!(queue.size().await.unwrap(), 2);
    let sequences: Vec<u64> = queue
        .peek_batch(10)
        .await
        .unwrap()
        .iter()
        .map(|entry| entry.sequence)
        .collect();
    assert_eq!(sequences, vec![0, 2]);
}

#[tokio::test]
async fn checksum_mismatch_is_treated_as_corruption() {
    let dir = TempDir::new().unwrap();
    let path = queue_path(&dir);

    {
        let queue = EventQueue::open(path.clone(), 500).unwrap();
        queue
            .append(event("s1", EventKind::Heartbeat, 0))
            .await
            .unwrap();
        queue
            .append(event("s1", EventKind::Heartbeat, 5))
            .await
            .unwrap();
    }

    // Valid JSON, but not what was checksummed at append time.
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute(
            "UPDATE pending_events SET payload = '{\"pos\":999}' WHERE seq = 0",
            [],
        )
        .unwrap();
    }

    let queue = EventQueue::open(path, 500).unwrap();
    assert_eq!(queue.size().await.unwrap(), 1);
    let entries = queue.peek_batch(10).await.unwrap();
    assert_eq!(entries[0].sequence, 1);
}
