use std::{
    convert::TryFrom,
    path::PathBuf,
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::{oneshot, Notify};

mod migrations;

use crate::models::{Event, EventKind, EventPayload};
use crate::utils::logging::debug_log;
use migrations::run_migrations;

const NEXT_SEQ_KEY: &str = "next_seq";

type QueueTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum QueueCommand {
    Execute(QueueTask),
    Shutdown,
}

/// One persisted pending event: the record addressed by delivery and
/// removal. The sequence is assigned at append time, is unique for the
/// lifetime of the store (it survives both removals and restarts), and
/// defines FIFO order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub sequence: u64,
    #[serde(flatten)]
    pub event: Event,
}

struct QueueInner {
    sender: mpsc::Sender<QueueCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(QueueCommand::Shutdown) {
                error!("Failed to send shutdown to queue thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join queue thread: {join_err:?}");
            }
        }
    }
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

fn to_u64(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("value {value} is negative"))
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid datetime '{value}': {err}"))
}

fn kind_from_str(value: &str) -> Result<EventKind> {
    match value {
        "Start" => Ok(EventKind::Start),
        "Heartbeat" => Ok(EventKind::Heartbeat),
        "Scrub" => Ok(EventKind::Scrub),
        "Stop" => Ok(EventKind::Stop),
        _ => Err(anyhow!("unknown event kind '{value}'")),
    }
}

/// Checksum over a record's content fields. A row whose stored checksum no
/// longer matches is treated as corrupt and discarded on recovery.
fn record_checksum(session_id: &str, kind: &str, payload: &str, created_at: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(kind.as_bytes());
    hasher.update([0u8]);
    hasher.update(payload.as_bytes());
    hasher.update([0u8]);
    hasher.update(created_at.as_bytes());
    hex::encode(hasher.finalize())
}

/// Bounded, persisted, FIFO-ordered store of pending measurement events.
///
/// All access runs on a dedicated worker thread owning the single SQLite
/// connection, so appends (sampler side) and removals (delivery side) are
/// serialized and readers never observe a torn record.
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<QueueInner>,
    appended: Arc<Notify>,
    capacity: usize,
    db_path: Arc<PathBuf>,
}

impl EventQueue {
    pub fn open(db_path: PathBuf, capacity: usize) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create queue directory {}", parent.display())
                })?;
            }
        }

        let (command_tx, command_rx) = mpsc::channel::<QueueCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("streamsense-queue".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open queue store")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }

                let init_result = run_migrations(&mut conn)
                    .context("failed to migrate queue store")
                    .and_then(|_| recover_pending(&mut conn));
                let recovered = match init_result {
                    Ok(stats) => {
                        let _ = ready_tx.send(Ok(()));
                        Some(stats)
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        None
                    }
                };
                let Some(stats) = recovered else {
                    return;
                };

                if stats.discarded > 0 {
                    warn!(
                        "Queue recovery discarded {} corrupt record(s); {} pending event(s) retained",
                        stats.discarded, stats.kept
                    );
                } else if stats.kept > 0 {
                    info!("Queue recovered {} pending event(s)", stats.kept);
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        QueueCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        QueueCommand::Shutdown => break,
                    }
                }
            })
            .with_context(|| "failed to spawn queue worker thread")?;

        ready_rx
            .recv()
            .context("queue worker exited before signaling readiness")??;

        Ok(Self {
            inner: Arc::new(QueueInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            appended: Arc::new(Notify::new()),
            capacity,
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        self.db_path.as_path()
    }

    /// Wakeup signal fired after every successful append; the delivery
    /// scheduler subscribes to it for eager (non-offline) delivery.
    pub(crate) fn append_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.appended)
    }

    async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = QueueCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Queue caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to queue thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("queue thread terminated unexpectedly"))?
    }

    /// Appends one event, assigning its delivery sequence and persisting it
    /// in the same transaction. When the store is at capacity the oldest
    /// entries are evicted; measurement favors recency over completeness.
    pub async fn append(&self, event: Event) -> Result<u64> {
        let capacity = self.capacity;
        let (sequence, evicted) = self
            .execute(move |conn| {
                let tx = conn.transaction()?;

                let next: Option<i64> = tx
                    .query_row(
                        "SELECT value FROM queue_meta WHERE key = ?1",
                        params![NEXT_SEQ_KEY],
                        |row| row.get(0),
                    )
                    .optional()?;
                let sequence = to_u64(next.unwrap_or(0))?;

                tx.execute(
                    "INSERT OR REPLACE INTO queue_meta (key, value) VALUES (?1, ?2)",
                    params![NEXT_SEQ_KEY, to_i64(sequence + 1)?],
                )?;

                let kind = event.kind.as_str();
                let payload = serde_json::to_string(&event.payload)
                    .context("failed to serialize event payload")?;
                let created_at = event.created_at.to_rfc3339();
                let checksum = record_checksum(&event.session_id, kind, &payload, &created_at);

                tx.execute(
                    "INSERT INTO pending_events (seq, session_id, kind, payload, created_at, checksum)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        to_i64(sequence)?,
                        event.session_id,
                        kind,
                        payload,
                        created_at,
                        checksum,
                    ],
                )
                .with_context(|| "failed to insert pending event")?;

                let evicted = tx.execute(
                    "DELETE FROM pending_events WHERE seq NOT IN (
                         SELECT seq FROM pending_events ORDER BY seq DESC LIMIT ?1
                     )",
                    params![capacity as i64],
                )?;

                tx.commit().context("failed to commit append")?;
                Ok((sequence, evicted))
            })
            .await?;

        if evicted > 0 {
            warn!("Queue at capacity; evicted {evicted} oldest pending event(s)");
        }
        debug_log!("Appended event seq={sequence}");

        self.appended.notify_one();
        Ok(sequence)
    }

    /// Non-destructive FIFO snapshot of at most `max` pending entries.
    /// Independent of prior reads; removal happens separately after the
    /// collector confirms delivery.
    pub async fn peek_batch(&self, max: usize) -> Result<Vec<QueueEntry>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT seq, session_id, kind, payload, created_at
                 FROM pending_events
                 ORDER BY seq ASC
                 LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![max as i64])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                let payload: EventPayload = serde_json::from_str(&row.get::<_, String>(3)?)
                    .context("failed to parse persisted payload")?;
                entries.push(QueueEntry {
                    sequence: to_u64(row.get::<_, i64>(0)?)?,
                    event: Event {
                        session_id: row.get(1)?,
                        kind: kind_from_str(&row.get::<_, String>(2)?)?,
                        payload,
                        created_at: parse_datetime(&row.get::<_, String>(4)?)?,
                    },
                });
            }

            Ok(entries)
        })
        .await
    }

    /// Removes confirmed-delivered entries. Sequences already absent are
    /// ignored, so a crash between send and remove only causes a resend.
    pub async fn remove(&self, sequences: Vec<u64>) -> Result<()> {
        if sequences.is_empty() {
            return Ok(());
        }
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            for sequence in &sequences {
                tx.execute(
                    "DELETE FROM pending_events WHERE seq = ?1",
                    params![to_i64(*sequence)?],
                )?;
            }
            tx.commit().context("failed to commit removal")?;
            Ok(())
        })
        .await
    }

    pub async fn size(&self) -> Result<usize> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM pending_events", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.size().await? == 0)
    }
}

struct RecoveryStats {
    kept: usize,
    discarded: usize,
}

/// Re-verifies every persisted record on startup. Rows whose checksum or
/// content fails verification are unrecoverable and deleted; recovery never
/// aborts, and the sequence counter is repaired to stay ahead of every
/// surviving row.
fn recover_pending(conn: &mut Connection) -> Result<RecoveryStats> {
    let tx = conn.transaction()?;

    let mut corrupt: Vec<i64> = Vec::new();
    let mut kept = 0usize;
    let mut max_seq: Option<i64> = None;
    {
        let mut stmt = tx.prepare(
            "SELECT seq, session_id, kind, payload, created_at, checksum
             FROM pending_events
             ORDER BY seq ASC",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let seq: i64 = row.get(0)?;
            let session_id: String = row.get(1)?;
            let kind: String = row.get(2)?;
            let payload: String = row.get(3)?;
            let created_at: String = row.get(4)?;
            let checksum: String = row.get(5)?;

            let valid = record_checksum(&session_id, &kind, &payload, &created_at) == checksum
                && kind_from_str(&kind).is_ok()
                && serde_json::from_str::<EventPayload>(&payload).is_ok()
                && parse_datetime(&created_at).is_ok();

            if valid {
                kept += 1;
                max_seq = Some(max_seq.map_or(seq, |current| current.max(seq)));
            } else {
                corrupt.push(seq);
            }
        }
    }

    for seq in &corrupt {
        tx.execute("DELETE FROM pending_events WHERE seq = ?1", params![seq])?;
    }

    // The counter must never regress below a surviving row, even if the
    // meta row itself was lost.
    let stored: Option<i64> = tx
        .query_row(
            "SELECT value FROM queue_meta WHERE key = ?1",
            params![NEXT_SEQ_KEY],
            |row| row.get(0),
        )
        .optional()?;
    let floor = max_seq.map_or(0, |seq| seq + 1);
    let next = stored.unwrap_or(0).max(floor);
    tx.execute(
        "INSERT OR REPLACE INTO queue_meta (key, value) VALUES (?1, ?2)",
        params![NEXT_SEQ_KEY, next],
    )?;

    tx.commit().context("failed to commit recovery")?;

    Ok(RecoveryStats {
        kept,
        discarded: corrupt.len(),
    })
}
