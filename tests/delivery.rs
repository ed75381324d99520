use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use streamsense::{
    CollectorTransport, ConnectivityMonitor, EventKind, PlayerAdapter, QueueEntry, Sensor,
    SensorConfig, TransportError,
};
use tempfile::TempDir;

struct RecordingTransport {
    sent: Mutex<Vec<(u64, EventKind)>>,
    attempts: AtomicUsize,
    failing: AtomicBool,
}

impl RecordingTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        })
    }

    fn sent(&self) -> Vec<(u64, EventKind)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl CollectorTransport for RecordingTransport {
    async fn send(&self, entry: &QueueEntry) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::new("collector unavailable"));
        }
        self.sent
            .lock()
            .unwrap()
            .push((entry.sequence, entry.event.kind));
        Ok(())
    }
}

struct SwitchableMonitor {
    reachable: AtomicBool,
}

impl SwitchableMonitor {
    fn new(reachable: bool) -> Arc<Self> {
        Arc::new(Self {
            reachable: AtomicBool::new(reachable),
        })
    }
}

impl ConnectivityMonitor for SwitchableMonitor {
    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// Adapter whose position advances by one second per sample, like playback
/// observed at a fast test cadence.
struct AdvancingAdapter {
    position: AtomicU32,
}

impl AdvancingAdapter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            position: AtomicU32::new(0),
        })
    }
}

impl PlayerAdapter for AdvancingAdapter {
    fn position(&self) -> u32 {
        self.position.fetch_add(1, Ordering::SeqCst)
    }

    fn duration(&self) -> u32 {
        600
    }

    fn width(&self) -> u32 {
        1920
    }

    fn height(&self) -> u32 {
        1080
    }
}

fn test_config(dir: &TempDir) -> SensorConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    SensorConfig {
        site: "test-site".into(),
        app_name: "test-app".into(),
        storage_path: dir.path().join("queue.sqlite3"),
        sample_interval_ms: 20,
        // Keep the periodic tick out of the way; tests drive drains through
        // flush(), and offline mode suppresses append wakeups.
        delivery_interval_ms: 3_600_000,
        offline_mode: true,
        ..SensorConfig::default()
    }
}

fn attributes() -> BTreeMap<String, String> {
    let mut attributes = BTreeMap::new();
    attributes.insert("name".to_string(), "show1".to_string());
    attributes
}

#[tokio::test]
async fn unreachable_network_skips_delivery_entirely() {
    let dir = TempDir::new().unwrap();
    let transport = RecordingTransport::new();
    let monitor = SwitchableMonitor::new(false);
    let sensor = Sensor::with_collaborators(
        test_config(&dir),
        Arc::clone(&transport) as Arc<dyn CollectorTransport>,
        Arc::clone(&monitor) as Arc<dyn ConnectivityMonitor>,
    )
    .unwrap();

    let session = sensor
        .track(AdvancingAdapter::new(), attributes())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    session.stop().await;

    // Several drain attempts while unreachable: zero send invocations.
    for _ in 0..3 {
        assert_eq!(sensor.flush().await, 0);
    }
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 0);

    let pending = sensor.pending_events().await.unwrap();
    assert!(pending >= 2, "expected heartbeats and stop, got {pending}");

    // First reachable pass drains everything in FIFO order.
    monitor.reachable.store(true, Ordering::SeqCst);
    let delivered = sensor.flush().await;
    assert_eq!(delivered, pending);
    assert_eq!(sensor.pending_events().await.unwrap(), 0);

    let sent = transport.sent();
    let sequences: Vec<u64> = sent.iter().map(|(sequence, _)| *sequence).collect();
    let mut sorted = sequences.clone();
    sorted.sort_unstable();
    assert_eq!(sequences, sorted);
    assert_eq!(sent.last().unwrap().1, EventKind::Stop);
}

#[tokio::test]
async fn failed_send_halts_batch_and_retries_in_order() {
    let dir = TempDir::new().unwrap();
    let transport = RecordingTransport::new();
    let monitor = SwitchableMonitor::new(true);
    let sensor = Sensor::with_collaborators(
        test_config(&dir),
        Arc::clone(&transport) as Arc<dyn CollectorTransport>,
        Arc::clone(&monitor) as Arc<dyn ConnectivityMonitor>,
    )
    .unwrap();

    let session = sensor
        .track(AdvancingAdapter::new(), attributes())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    session.stop().await;

    let pending = sensor.pending_events().await.unwrap();
    assert!(pending >= 2);

    // Collector down: the pass stops at the first failure and nothing is
    // removed.
    transport.failing.store(true, Ordering::SeqCst);
    assert_eq!(sensor.flush().await, 0);
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(sensor.pending_events().await.unwrap(), pending);

    // Recovery: the retried entry goes out first, order intact, no gaps.
    transport.failing.store(false, Ordering::SeqCst);
    assert_eq!(sensor.flush().await, pending);
    assert_eq!(sensor.pending_events().await.unwrap(), 0);

    let sent = transport.sent();
    let sequences: Vec<u64> = sent.iter().map(|(sequence, _)| *sequence).collect();
    let expected: Vec<u64> = (0..pending as u64).collect();
    assert_eq!(sequences, expected);
}

#[tokio::test]
async fn start_event_leads_the_stream_when_enabled() {
    let dir = TempDir::new().unwrap();
    let transport = RecordingTransport::new();
    let monitor = SwitchableMonitor::new(true);
    let mut config = test_config(&dir);
    config.emit_start_event = true;

    let sensor = Sensor::with_collaborators(
        config,
        Arc::clone(&transport) as Arc<dyn CollectorTransport>,
        Arc::clone(&monitor) as Arc<dyn ConnectivityMonitor>,
    )
    .unwrap();

    let session = sensor
        .track(AdvancingAdapter::new(), attributes())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    session.stop().await;
    sensor.flush().await;

    let sent = transport.sent();
    assert!(!sent.is_empty());
    assert_eq!(sent[0], (0, EventKind::Start));
    assert_eq!(sent.last().unwrap().1, EventKind::Stop);
}

#[tokio::test]
async fn offline_mode_still_delivers_when_drained() {
    let dir = TempDir::new().unwrap();
    let transport = RecordingTransport::new();
    let monitor = SwitchableMonitor::new(true);
    let sensor = Sensor::with_collaborators(
        test_config(&dir),
        Arc::clone(&transport) as Arc<dyn CollectorTransport>,
        Arc::clone(&monitor) as Arc<dyn ConnectivityMonitor>,
    )
    .unwrap();

    assert!(sensor.offline_mode());

    let session = sensor
        .track(AdvancingAdapter::new(), attributes())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    session.stop().await;

    // Offline mode defers delivery, it never withholds a reachable drain.
    let delivered = sensor.flush().await;
    assert!(delivered >= 1);
    assert_eq!(sensor.pending_events().await.unwrap(), 0);

    sensor.set_offline_mode(false);
    assert!(!sensor.offline_mode());
}
