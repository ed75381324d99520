use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use log::{error, info};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::adapter::PlayerAdapter;
use crate::config::SensorConfig;
use crate::connectivity::{AlwaysReachable, ConnectivityMonitor};
use crate::delivery::scheduler::{drain_once, DeliveryContext, DeliveryScheduler};
use crate::delivery::transport::{CollectorTransport, HttpCollectorTransport};
use crate::error::{SensorError, SensorResult};
use crate::identifiers::hash_identifiers;
use crate::models::{Event, EventKind, EventPayload};
use crate::queue::EventQueue;
use crate::session::Session;
use crate::utils::logging;
use crate::utils::logging::debug_log;

static SENSOR: OnceLock<Sensor> = OnceLock::new();

/// The measurement sensor. Exists once per application; owns the durable
/// queue and the delivery scheduler, and hands out [`Session`] handles via
/// [`Sensor::track`].
///
/// Must be created inside a Tokio runtime; the sampling and delivery tasks
/// are spawned on it and never block the host's own threads.
#[derive(Clone)]
pub struct Sensor {
    inner: Arc<SensorInner>,
}

struct SensorInner {
    config: SensorConfig,
    queue: EventQueue,
    delivery: DeliveryContext,
    scheduler: Mutex<DeliveryScheduler>,
    sessions: Mutex<Vec<Session>>,
    next_uid: Mutex<String>,
    tracking: Arc<AtomicBool>,
    offline_mode: Arc<AtomicBool>,
    unloaded: AtomicBool,
}

impl Sensor {
    /// Initializes the process-wide sensor. Fails with `AlreadyInitialized`
    /// on a second call; use [`Sensor::instance`] afterwards.
    pub fn init(config: SensorConfig) -> SensorResult<Sensor> {
        if SENSOR.get().is_some() {
            return Err(SensorError::AlreadyInitialized);
        }
        let sensor = Sensor::new(config)?;
        SENSOR
            .set(sensor.clone())
            .map_err(|_| SensorError::AlreadyInitialized)?;
        Ok(sensor)
    }

    /// The previously initialized process-wide sensor.
    pub fn instance() -> SensorResult<Sensor> {
        SENSOR.get().cloned().ok_or(SensorError::NotInitialized)
    }

    /// Builds a sensor with the default HTTP transport and an always-on
    /// connectivity monitor. Not registered as the process-wide instance.
    pub fn new(config: SensorConfig) -> SensorResult<Sensor> {
        let transport = HttpCollectorTransport::new(&config.endpoint, config.http_timeout())
            .map_err(|err| SensorError::InvalidConfig(err.to_string()))?;
        Self::with_collaborators(config, Arc::new(transport), Arc::new(AlwaysReachable))
    }

    /// Builds a sensor around caller-supplied transport and connectivity
    /// collaborators.
    pub fn with_collaborators(
        config: SensorConfig,
        transport: Arc<dyn CollectorTransport>,
        monitor: Arc<dyn ConnectivityMonitor>,
    ) -> SensorResult<Sensor> {
        logging::set_debug(config.debug);

        let queue = EventQueue::open(config.storage_path.clone(), config.capacity)
            .map_err(|err| SensorError::Storage(format!("{err:?}")))?;

        let offline_mode = Arc::new(AtomicBool::new(config.offline_mode));
        let tracking = Arc::new(AtomicBool::new(config.tracking));

        let delivery = DeliveryContext {
            queue: queue.clone(),
            transport,
            monitor,
            interval: config.delivery_interval(),
            batch_size: config.delivery_batch_size,
            offline_mode: Arc::clone(&offline_mode),
            drain_lock: Arc::new(Mutex::new(())),
        };

        let mut scheduler = DeliveryScheduler::new();
        scheduler.start(delivery.clone());

        info!(
            "Sensor initialized for site '{}' app '{}' (queue at {})",
            config.site,
            config.app_name,
            queue.path().display()
        );

        Ok(Sensor {
            inner: Arc::new(SensorInner {
                config,
                queue,
                delivery,
                scheduler: Mutex::new(scheduler),
                sessions: Mutex::new(Vec::new()),
                next_uid: Mutex::new(generate_uid()),
                tracking,
                offline_mode,
                unloaded: AtomicBool::new(false),
            }),
        })
    }

    /// Starts tracking a playback stream through the given adapter.
    ///
    /// The attribute map describes the content and must contain a non-empty
    /// `name`. Returns the session handle whose UID was previously visible
    /// via [`Sensor::next_uid`].
    pub async fn track(
        &self,
        adapter: Arc<dyn PlayerAdapter>,
        attributes: BTreeMap<String, String>,
    ) -> SensorResult<Session> {
        if self.inner.unloaded.load(Ordering::Relaxed) {
            return Err(SensorError::AlreadyUnloaded);
        }

        let name_present = attributes
            .get("name")
            .map(|name| !name.trim().is_empty())
            .unwrap_or(false);
        if !name_present {
            return Err(SensorError::MissingName);
        }

        let uid = {
            let mut guard = self.inner.next_uid.lock().await;
            std::mem::replace(&mut *guard, generate_uid())
        };

        if self.inner.config.emit_start_event && self.inner.tracking.load(Ordering::Relaxed) {
            self.emit_start(&uid, &attributes).await;
        }

        let session = Session::spawn(
            uid,
            attributes,
            adapter,
            self.inner.queue.clone(),
            &self.inner.config,
            Arc::clone(&self.inner.tracking),
        );

        debug_log!("tracking session {}", session.uid());
        self.inner.sessions.lock().await.push(session.clone());
        Ok(session)
    }

    /// The UID the next `track` call will assign. Stable until consumed.
    pub async fn next_uid(&self) -> String {
        self.inner.next_uid.lock().await.clone()
    }

    pub fn tracking(&self) -> bool {
        self.inner.tracking.load(Ordering::Relaxed)
    }

    /// Master switch for measurement; sessions keep sampling while disabled
    /// but emit nothing.
    pub fn set_tracking(&self, enabled: bool) {
        self.inner.tracking.store(enabled, Ordering::Relaxed);
    }

    pub fn offline_mode(&self) -> bool {
        self.inner.offline_mode.load(Ordering::Relaxed)
    }

    /// Governs delivery eagerness only: when enabled, appends no longer wake
    /// the scheduler and delivery happens on the periodic tick. Durability
    /// is unaffected.
    pub fn set_offline_mode(&self, enabled: bool) {
        self.inner.offline_mode.store(enabled, Ordering::Relaxed);
    }

    /// Toggles verbose internal logging at runtime.
    pub fn set_debug(&self, enabled: bool) {
        logging::set_debug(enabled);
    }

    /// Applies the configured identifier hasher to host-supplied identifier
    /// pairs, returning privacy-safe tokens keyed by identifier name.
    pub fn hashed_identifiers<'a, I>(&self, pairs: I) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        hash_identifiers(self.inner.config.identifier_hasher, pairs)
    }

    /// Number of events currently pending delivery.
    pub async fn pending_events(&self) -> SensorResult<usize> {
        self.inner
            .queue
            .size()
            .await
            .map_err(|err| SensorError::Storage(format!("{err:?}")))
    }

    /// Best-effort immediate drain, e.g. when the host is about to be
    /// backgrounded. Returns the number of events confirmed delivered.
    pub async fn flush(&self) -> usize {
        match drain_once(&self.inner.delivery).await {
            Ok(delivered) => delivered,
            Err(err) => {
                error!("flush failed: {err:?}");
                0
            }
        }
    }

    /// Terminates all tracking: stops every active session (emitting their
    /// Stop events), performs one final best-effort flush regardless of the
    /// offline flag, and halts the scheduler. Idempotent; `track` fails with
    /// `AlreadyUnloaded` afterwards.
    pub async fn unload(&self) {
        if self.inner.unloaded.swap(true, Ordering::Relaxed) {
            return;
        }

        let sessions: Vec<Session> = self.inner.sessions.lock().await.drain(..).collect();
        for session in sessions {
            session.stop().await;
        }

        if let Err(err) = drain_once(&self.inner.delivery).await {
            error!("final flush on unload failed: {err:?}");
        }

        self.inner.scheduler.lock().await.stop().await;
        info!("Sensor unloaded");
    }

    async fn emit_start(&self, uid: &str, attributes: &BTreeMap<String, String>) {
        let mut payload = EventPayload::new();
        for (key, value) in attributes {
            payload.insert(key.clone(), serde_json::Value::from(value.clone()));
        }
        payload.insert("site".into(), self.inner.config.site.clone().into());
        payload.insert("app".into(), self.inner.config.app_name.clone().into());
        payload.insert("uid".into(), uid.to_string().into());
        payload.insert("ts".into(), chrono::Utc::now().timestamp().into());

        let event = Event::new(uid.to_string(), EventKind::Start, payload);
        if let Err(err) = self.inner.queue.append(event).await {
            error!("failed to append start event for session {uid}: {err:?}");
        }
    }
}

fn generate_uid() -> String {
    Uuid::new_v4().to_string()
}
