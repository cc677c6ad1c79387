/*!
Versioned single-value stores.

A [`PersistentStore`] binds one key on one adapter to a target version. It
writes `{version, data}` envelopes and brings older (or newer) envelopes to
the target version on load.

Saves can be coalesced. Each store owns one scheduler with a single timer
task, so at most one write is pending per store at any time:

```text
debounce:  Idle -> PendingDebounce -> Idle
throttle:  Idle -> Throttled(last_write) -> PendingTrailing -> Throttled
```

A later call only cancels the scheduling of a pending write. A write that
has started runs to completion.
*/

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::migration::{Migration, MigrationManager};
use crate::storage::StorageAdapter;
use crate::sync::{ReplicationOptions, SyncHook, SyncOptions};
use crate::{Result, StowageError, Value};

/// Version, migrations and sync wiring for a store
#[derive(Clone)]
pub struct StoreOptions {
    /// Target version written with every save
    pub version: u32,
    pub migrations: Vec<Migration>,
    pub sync: Option<SyncOptions>,
    pub replication: Option<ReplicationOptions>,
    pub sync_hook: Option<Arc<dyn SyncHook>>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::new(1)
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("version", &self.version)
            .field("migrations", &self.migrations)
            .field("sync", &self.sync)
            .field("replication", &self.replication)
            .field("sync_hook", &self.sync_hook.is_some())
            .finish()
    }
}

impl StoreOptions {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            migrations: Vec::new(),
            sync: None,
            replication: None,
            sync_hook: None,
        }
    }

    pub fn with_migration(mut self, migration: Migration) -> Self {
        self.migrations.push(migration);
        self
    }

    pub fn with_migrations<I: IntoIterator<Item = Migration>>(mut self, migrations: I) -> Self {
        self.migrations.extend(migrations);
        self
    }

    pub fn with_sync(mut self, options: SyncOptions, hook: Arc<dyn SyncHook>) -> Self {
        self.sync = Some(options);
        self.sync_hook = Some(hook);
        self
    }

    pub fn with_replication(mut self, options: ReplicationOptions) -> Self {
        self.replication = Some(options);
        self
    }
}

/// Coalescing policy for one save
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Write only after this long without another save
    pub debounce: Option<Duration>,
    /// Write at most once per window, with one trailing write
    pub throttle: Option<Duration>,
}

impl SaveOptions {
    pub fn debounce(quiet: Duration) -> Self {
        Self {
            debounce: Some(quiet),
            throttle: None,
        }
    }

    pub fn throttle(window: Duration) -> Self {
        Self {
            debounce: None,
            throttle: Some(window),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedulerState {
    Idle,
    PendingDebounce,
    Throttled,
    PendingTrailing,
}

struct Scheduler {
    state: SchedulerState,
    pending: Option<Value>,
    timer: Option<JoinHandle<()>>,
    // bumped whenever a timer is replaced or cancelled
    generation: u64,
    last_write: Option<Instant>,
}

impl Scheduler {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation += 1;
    }
}

struct StoreCore {
    key: String,
    version: u32,
    adapter: Arc<dyn StorageAdapter>,
    migrations: MigrationManager,
    sync: Option<SyncOptions>,
    replication: Option<ReplicationOptions>,
    sync_hook: Option<Arc<dyn SyncHook>>,
    scheduler: tokio::sync::Mutex<Scheduler>,
    background_error: parking_lot::Mutex<Option<StowageError>>,
}

impl StoreCore {
    /// Write `data` at the target version, then notify the sync hook
    async fn write(&self, data: Value) -> Result<()> {
        let envelope = Value::object([
            ("version", Value::from(self.version as u64)),
            ("data", data),
        ]);
        self.adapter.set(&self.key, envelope.clone()).await?;
        debug!(key = %self.key, version = self.version, "Store written");

        if let Some(hook) = &self.sync_hook {
            let data = envelope.take_field("data").unwrap_or_default();
            if let Err(e) = hook.after_write(&self.key, self.version, &data).await {
                warn!(key = %self.key, error = %e, "Sync hook failed; local write kept");
            }
        }
        Ok(())
    }

    /// Timer body: write the pending value if this timer is still current
    async fn fire(self: Arc<Self>, generation: u64) {
        let pending = {
            let mut scheduler = self.scheduler.lock().await;
            if scheduler.generation != generation {
                return;
            }
            // past this point the write belongs to nobody else and cannot be cancelled
            scheduler.timer = None;
            scheduler.state = match scheduler.state {
                SchedulerState::PendingTrailing => {
                    scheduler.last_write = Some(Instant::now());
                    SchedulerState::Throttled
                }
                _ => SchedulerState::Idle,
            };
            scheduler.pending.take()
        };

        if let Some(data) = pending {
            if let Err(e) = self.write(data).await {
                error!(key = %self.key, error = %e, "Scheduled save failed");
                *self.background_error.lock() = Some(e);
            }
        }
    }
}

/// One versioned value of type `T` behind one adapter key
///
/// `T` crosses into the store through serde, except [`Value`] itself, which
/// is stored unchanged so dates, maps, sets and buffers reach the adapter's
/// serializer.
pub struct PersistentStore<T> {
    core: Arc<StoreCore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for PersistentStore<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for PersistentStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentStore")
            .field("key", &self.core.key)
            .field("version", &self.core.version)
            .field("adapter", &self.core.adapter.name())
            .finish()
    }
}

/// `Value` data is stored as is; any other type goes through serde's JSON model
fn to_value<T: Serialize + 'static>(data: &T) -> Result<Value> {
    if let Some(value) = (data as &dyn Any).downcast_ref::<Value>() {
        return Ok(value.clone());
    }
    Ok(Value::from(serde_json::to_value(data)?))
}

fn from_value<T: DeserializeOwned + 'static>(value: Value) -> Result<T> {
    let mut slot = Some(value);
    if let Some(data) = (&mut slot as &mut dyn Any).downcast_mut::<Option<T>>() {
        if let Some(data) = data.take() {
            return Ok(data);
        }
    }
    let value = slot.unwrap_or_default();
    Ok(serde_json::from_value(value.to_json()?)?)
}

/// Split a stored payload into `(version, data)`; anything that is not an
/// envelope is version 0 data
fn split_envelope(stored: Value) -> (u32, Value) {
    let version = match &stored {
        Value::Object(map) if map.len() == 2 && map.contains_key("data") => map
            .get("version")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok()),
        _ => None,
    };
    match version {
        Some(version) => (version, stored.take_field("data").unwrap_or_default()),
        None => (0, stored),
    }
}

impl<T> PersistentStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new<K: Into<String>>(
        adapter: Arc<dyn StorageAdapter>,
        key: K,
        options: StoreOptions,
    ) -> Self {
        let StoreOptions {
            version,
            migrations,
            sync,
            replication,
            sync_hook,
        } = options;
        Self {
            core: Arc::new(StoreCore {
                key: key.into(),
                version,
                adapter,
                migrations: MigrationManager::with_migrations(migrations),
                sync,
                replication,
                sync_hook,
                scheduler: tokio::sync::Mutex::new(Scheduler {
                    state: SchedulerState::Idle,
                    pending: None,
                    timer: None,
                    generation: 0,
                    last_write: None,
                }),
                background_error: parking_lot::Mutex::new(None),
            }),
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.core.key
    }

    pub fn version(&self) -> u32 {
        self.core.version
    }

    pub fn migrations(&self) -> &MigrationManager {
        &self.core.migrations
    }

    pub fn sync_options(&self) -> Option<&SyncOptions> {
        self.core.sync.as_ref()
    }

    pub fn replication_options(&self) -> Option<&ReplicationOptions> {
        self.core.replication.as_ref()
    }

    /// Read the value, migrating it to the target version when needed
    ///
    /// A migrated value is written back at the target version before it is
    /// returned. If migration fails nothing is written.
    pub async fn load(&self) -> Result<Option<T>> {
        let core = &self.core;
        let Some(stored) = core.adapter.try_get(&core.key).await? else {
            return Ok(None);
        };

        let (stored_version, data) = split_envelope(stored);
        let data = if stored_version == core.version {
            data
        } else {
            let migrated = core
                .migrations
                .migrate(data, stored_version, core.version)?;
            core.write(migrated.clone()).await?;
            info!(
                key = %core.key,
                from = stored_version,
                to = core.version,
                "Migrated stored value"
            );
            migrated
        };
        from_value(data).map(Some)
    }

    /// Write now, superseding any pending scheduled write
    pub async fn save(&self, data: &T) -> Result<()> {
        let value = to_value(data)?;
        {
            let mut scheduler = self.core.scheduler.lock().await;
            scheduler.cancel_timer();
            scheduler.pending = None;
            scheduler.last_write = Some(Instant::now());
            scheduler.state = SchedulerState::Idle;
        }
        self.core.write(value).await
    }

    /// Write with debounce or throttle coalescing
    ///
    /// Returns once the value is written or scheduled. Failures of a
    /// scheduled write are logged and reported by the next [`Self::flush`].
    pub async fn save_with(&self, data: &T, options: SaveOptions) -> Result<()> {
        match (options.debounce, options.throttle) {
            (None, None) => self.save(data).await,
            (Some(_), Some(_)) => Err(StowageError::validation(
                "debounce and throttle cannot be combined on one save",
            )),
            (Some(quiet), None) => self.schedule_debounced(to_value(data)?, quiet).await,
            (None, Some(window)) => self.schedule_throttled(to_value(data)?, window).await,
        }
    }

    async fn schedule_debounced(&self, value: Value, quiet: Duration) -> Result<()> {
        let mut scheduler = self.core.scheduler.lock().await;
        scheduler.cancel_timer();
        scheduler.pending = Some(value);
        scheduler.state = SchedulerState::PendingDebounce;

        let generation = scheduler.generation;
        let core = self.core.clone();
        scheduler.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            core.fire(generation).await;
        }));
        debug!(key = %self.core.key, delay_ms = quiet.as_millis() as u64, "Debounced save scheduled");
        Ok(())
    }

    async fn schedule_throttled(&self, value: Value, window: Duration) -> Result<()> {
        let now = Instant::now();
        {
            let mut scheduler = self.core.scheduler.lock().await;
            if scheduler.state == SchedulerState::PendingTrailing {
                scheduler.pending = Some(value);
                return Ok(());
            }

            let elapsed = scheduler.last_write.map(|at| now.duration_since(at));
            if let Some(elapsed) = elapsed.filter(|elapsed| *elapsed < window) {
                scheduler.cancel_timer();
                scheduler.pending = Some(value);
                scheduler.state = SchedulerState::PendingTrailing;

                let delay = window - elapsed;
                let generation = scheduler.generation;
                let core = self.core.clone();
                scheduler.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    core.fire(generation).await;
                }));
                debug!(key = %self.core.key, delay_ms = delay.as_millis() as u64, "Trailing save scheduled");
                return Ok(());
            }

            scheduler.cancel_timer();
            scheduler.pending = None;
            scheduler.last_write = Some(now);
            scheduler.state = SchedulerState::Throttled;
        }
        self.core.write(value).await
    }

    /// Write any pending value now
    ///
    /// Also returns the error of the last failed scheduled write, if any.
    pub async fn flush(&self) -> Result<()> {
        let pending = {
            let mut scheduler = self.core.scheduler.lock().await;
            scheduler.cancel_timer();
            if scheduler.state == SchedulerState::PendingTrailing {
                scheduler.last_write = Some(Instant::now());
                scheduler.state = SchedulerState::Throttled;
            } else if scheduler.state == SchedulerState::PendingDebounce {
                scheduler.state = SchedulerState::Idle;
            }
            scheduler.pending.take()
        };

        if let Some(e) = self.core.background_error.lock().take() {
            if let Some(data) = pending {
                self.core.write(data).await?;
            }
            return Err(e);
        }
        match pending {
            Some(data) => self.core.write(data).await,
            None => Ok(()),
        }
    }

    /// Whether a scheduled write is waiting
    pub async fn has_pending(&self) -> bool {
        self.core.scheduler.lock().await.pending.is_some()
    }

    /// Cancel any pending write and delete the stored value
    pub async fn remove(&self) -> Result<()> {
        {
            let mut scheduler = self.core.scheduler.lock().await;
            scheduler.cancel_timer();
            scheduler.pending = None;
            scheduler.state = SchedulerState::Idle;
        }
        self.core.adapter.remove(&self.core.key).await
    }

    pub async fn exists(&self) -> Result<bool> {
        self.core.adapter.has(&self.core.key).await
    }
}
