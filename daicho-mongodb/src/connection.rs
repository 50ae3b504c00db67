//! Managed connection lifecycle for the MongoDB backend.
//!
//! [`ConnectionManager`] owns the pooled client and keeps it usable: it
//! establishes the connection with retry and exponential backoff, verifies it
//! with a ping, re-checks it on a background interval, and reconnects when a
//! check fails. Concurrent callers that need a connection while none exists
//! share one in-flight attempt instead of racing to open their own.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bson::{Document, doc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use daicho_core::error::{DatabaseError, DatabaseResult};

use crate::config::{ConnectionConfig, sanitize_uri};
use crate::retry::RetryPolicy;

type ConnectFuture = Shared<BoxFuture<'static, Result<(), DatabaseError>>>;

#[derive(Clone)]
struct Handles {
    client: Client,
    database: Database,
}

/// Point-in-time view of the connection state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionStats {
    pub connected: bool,
    /// Message of the most recent connection failure, if any.
    pub last_error: Option<String>,
    /// Retries used by the last successful connect sequence.
    pub retry_count: u32,
    /// Physical connect attempts performed over the manager's lifetime.
    pub total_attempts: u64,
}

/// Manages the lifecycle of one pooled client.
///
/// Held in an `Arc` because the background health task keeps a weak
/// reference to it; dropping the last `Arc` ends the task.
pub struct ConnectionManager {
    config: ConnectionConfig,
    handles: Mutex<Option<Handles>>,
    connected: AtomicBool,
    /// One in-flight connect attempt shared by every concurrent caller.
    in_flight: AsyncMutex<Option<ConnectFuture>>,
    total_attempts: AtomicU64,
    retry_count: AtomicU32,
    last_error: Mutex<Option<String>>,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("uri", &sanitize_uri(&self.config.uri))
            .field("db_name", &self.config.db_name)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

static SHARED: Mutex<Option<Arc<ConnectionManager>>> = Mutex::new(None);

impl ConnectionManager {
    /// Creates a manager with the given configuration. No connection is made
    /// until the first call that needs one.
    pub fn new(config: ConnectionConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            handles: Mutex::new(None),
            connected: AtomicBool::new(false),
            in_flight: AsyncMutex::new(None),
            total_attempts: AtomicU64::new(0),
            retry_count: AtomicU32::new(0),
            last_error: Mutex::new(None),
            health_task: Mutex::new(None),
        })
    }

    /// Creates a manager configured from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Configuration`] when `MONGODB_URI` is unset.
    pub fn from_env() -> DatabaseResult<Arc<Self>> {
        Ok(Self::new(ConnectionConfig::from_env()?))
    }

    /// Returns the process-wide manager, creating it from the environment on
    /// first use.
    pub fn shared() -> DatabaseResult<Arc<Self>> {
        let mut guard = lock(&SHARED);
        if let Some(existing) = guard.as_ref() {
            return Ok(Arc::clone(existing));
        }
        let manager = Self::from_env()?;
        *guard = Some(Arc::clone(&manager));
        Ok(manager)
    }

    /// The configuration this manager runs with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Whether the last known state of the connection was healthy.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Snapshots the connection counters.
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            connected: self.is_connected(),
            last_error: lock(&self.last_error).clone(),
            retry_count: self.retry_count.load(Ordering::Relaxed),
            total_attempts: self.total_attempts.load(Ordering::Relaxed),
        }
    }

    /// Returns the configured database, connecting first if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Connection`] when the connect retries are
    /// exhausted. Every caller sharing the failed attempt receives the same
    /// error.
    pub async fn database(self: &Arc<Self>) -> DatabaseResult<Database> {
        if self.is_connected() {
            if let Some(handles) = lock(&self.handles).clone() {
                return Ok(handles.database);
            }
        }
        self.ensure_connected().await?;
        lock(&self.handles)
            .clone()
            .map(|handles| handles.database)
            .ok_or_else(|| DatabaseError::Connection {
                attempts: 0,
                message: "connection was closed while connecting".to_string(),
            })
    }

    /// Returns a handle to a named collection, connecting first if necessary.
    ///
    /// # Errors
    ///
    /// Connection failures surface as [`DatabaseError::Connection`]; an
    /// invalid collection name surfaces later, from the operation using the
    /// handle.
    pub async fn collection(self: &Arc<Self>, name: &str) -> DatabaseResult<Collection<Document>> {
        let database = self.database().await.map_err(|err| match err {
            err @ DatabaseError::Connection { .. } => err,
            other => DatabaseError::CollectionAccess {
                collection: name.to_string(),
                message: other.to_string(),
            },
        })?;
        Ok(database.collection(name))
    }

    /// Answers whether the current connection responds to a ping. Never
    /// connects: with no established handle the answer is `false`.
    pub async fn ping(&self) -> bool {
        if !self.is_connected() {
            return false;
        }
        let client = lock(&self.handles)
            .as_ref()
            .map(|handles| handles.client.clone());
        match client {
            Some(client) => client
                .database("admin")
                .run_command(doc! { "ping": 1 })
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Tears down the current connection and establishes a fresh one. Used
    /// by the health loop after a failed probe and available to callers
    /// that know the connection has gone bad. The health task keeps
    /// running; [`Self::disconnect`] is the call that stops it.
    pub async fn reconnect(self: &Arc<Self>) -> DatabaseResult<()> {
        self.connected.store(false, Ordering::Release);
        let handles = lock(&self.handles).take();
        if let Some(handles) = handles {
            handles.client.shutdown().await;
        }
        self.ensure_connected().await
    }

    /// Drops the connection and stops the health task. The next call that
    /// needs a connection re-establishes it from scratch.
    pub async fn disconnect(&self) {
        if let Some(task) = lock(&self.health_task).take() {
            task.abort();
        }
        self.connected.store(false, Ordering::Release);
        let handles = lock(&self.handles).take();
        if let Some(handles) = handles {
            handles.client.shutdown().await;
        }
    }

    /// Makes sure a connection exists, joining the in-flight attempt if one
    /// is already underway.
    async fn ensure_connected(self: &Arc<Self>) -> DatabaseResult<()> {
        let attempt = {
            let mut slot = self.in_flight.lock().await;
            // Re-check under the lock: another caller may have finished
            // connecting while this one waited.
            if self.is_connected() {
                return Ok(());
            }
            match slot.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let manager = Arc::clone(self);
                    let fresh = async move { manager.establish().await }.boxed().shared();
                    *slot = Some(fresh.clone());
                    fresh
                }
            }
        };
        let result = attempt.clone().await;
        let mut slot = self.in_flight.lock().await;
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&attempt)) {
            *slot = None;
        }
        result
    }

    /// One full connect sequence: attempts with backoff until the budget is
    /// spent, then either installs the handles or reports exhaustion.
    async fn establish(self: Arc<Self>) -> Result<(), DatabaseError> {
        let policy = RetryPolicy {
            max_retries: self.config.max_retries,
            base_delay: self.config.retry_delay,
        };
        let masked = sanitize_uri(&self.config.uri);
        let attempts_before = self.total_attempts.load(Ordering::Relaxed);
        let outcome = policy
            .run("mongodb connect", || {
                self.total_attempts.fetch_add(1, Ordering::Relaxed);
                let manager = Arc::clone(&self);
                async move { manager.try_connect_once().await }
            })
            .await;
        match outcome {
            Ok(handles) => {
                let used = self.total_attempts.load(Ordering::Relaxed) - attempts_before;
                self.retry_count
                    .store(used.saturating_sub(1) as u32, Ordering::Relaxed);
                *lock(&self.last_error) = None;
                *lock(&self.handles) = Some(handles);
                self.connected.store(true, Ordering::Release);
                info!(uri = %masked, db = %self.config.db_name, "connected to mongodb");
                self.spawn_health_task();
                Ok(())
            }
            Err(exhausted) => {
                let message = exhausted.last_error.to_string();
                *lock(&self.last_error) = Some(message.clone());
                self.connected.store(false, Ordering::Release);
                error!(
                    uri = %masked,
                    attempts = exhausted.attempts,
                    error = %message,
                    "giving up on mongodb connection"
                );
                Err(DatabaseError::Connection {
                    attempts: exhausted.attempts,
                    message,
                })
            }
        }
    }

    /// A single physical connect attempt: parse options, open the client,
    /// and verify it with a ping against the admin database.
    async fn try_connect_once(&self) -> Result<Handles, mongodb::error::Error> {
        let mut options = ClientOptions::parse(&self.config.uri).await?;
        options.max_pool_size = Some(self.config.max_pool_size);
        options.min_pool_size = Some(self.config.min_pool_size);
        options.server_selection_timeout = Some(self.config.server_selection_timeout);
        options.connect_timeout = Some(self.config.connect_timeout);
        options.max_idle_time = Some(self.config.max_idle_time);
        options.retry_writes = Some(true);
        options.retry_reads = Some(true);
        options.app_name = Some("daicho".to_string());

        let client = Client::with_options(options)?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;
        let database = client.database(&self.config.db_name);
        Ok(Handles { client, database })
    }

    /// Starts the periodic health check unless one is already running. The
    /// task holds only a weak reference, so dropping the manager ends it.
    fn spawn_health_task(self: &Arc<Self>) {
        let mut guard = lock(&self.health_task);
        if guard.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let weak: Weak<ConnectionManager> = Arc::downgrade(self);
        let interval = self.config.health_check_interval;
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // An interval's first tick fires immediately; skipping it puts
            // the first check one interval after the verified connect.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                manager.health_check().await;
            }
        }));
    }

    /// Pings the server; on failure shuts the dead client down and
    /// reconnects through the normal de-duplicated path.
    async fn health_check(self: &Arc<Self>) {
        let client = lock(&self.handles)
            .as_ref()
            .map(|handles| handles.client.clone());
        let Some(client) = client else {
            return;
        };
        match client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
        {
            Ok(_) => {
                self.connected.store(true, Ordering::Release);
            }
            Err(err) => {
                warn!(error = %err, "mongodb health check failed, reconnecting");
                *lock(&self.last_error) = Some(err.to_string());
                if let Err(err) = self.reconnect().await {
                    warn!(error = %err, "mongodb reconnect failed");
                }
            }
        }
    }
}
