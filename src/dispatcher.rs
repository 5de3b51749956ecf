//! The owned bus facade tying the registries to durable storage.
//!
//! [`JobBus`] wires together:
//!
//! - [`Registry`] with the QoS-partitioned job buckets and the per-topic
//!   consumer sequences
//! - [`DurableStores`] covering the session, local, and database media
//! - a [`JobsLoaded`] signal that resolves once previously stored jobs are
//!   back in the registry after startup

use std::path::PathBuf;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::BusError;
use crate::job::{Fingerprint, Job, JobData, QosLevel};
use crate::registry::Registry;
use crate::storage::DurableStores;

/// Configuration for a [`JobBus`].
///
/// # Example
///
/// ```
/// use durabus::BusConfig;
///
/// let config = BusConfig::new("./data");
/// assert_eq!(config.data_dir.to_str(), Some("./data"));
/// ```
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Directory holding the slot files and the database file.
    pub data_dir: PathBuf,
}

impl BusConfig {
    /// Create a configuration rooted at `data_dir`.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }
}

/// Resolves once the bus has loaded stored jobs into the registry.
///
/// Obtained from [`JobBus::jobs_loaded`]. Waiting after the load has
/// already happened returns immediately.
pub struct JobsLoaded(watch::Receiver<bool>);

impl JobsLoaded {
    /// Wait until stored jobs have been loaded.
    pub async fn wait(mut self) {
        let _ = self.0.wait_for(|loaded| *loaded).await;
    }
}

/// A durable, QoS-aware job bus.
///
/// The bus owns all of its state: the in-memory [`Registry`] and the
/// [`DurableStores`] under one data directory. Callers hold the bus
/// directly (or behind their own lock) and drive it through `&mut self`
/// operations, so delivery order is the call order.
///
/// # Example
///
/// ```no_run
/// use durabus::{BusConfig, BusError, Job, JobBus, QosLevel};
///
/// #[tokio::main]
/// async fn main() -> Result<(), BusError> {
///     let mut bus = JobBus::new(BusConfig::new("./data"));
///     bus.load_stored_jobs().await?;
///
///     bus.register_consumer("orders", |data| {
///         println!("order received: {data:?}");
///     });
///
///     bus.dispatch_job(Job::new("orders", QosLevel::AtLeastOnce)).await?;
///     Ok(())
/// }
/// ```
pub struct JobBus {
    registry: Registry,
    stores: DurableStores,
    loaded_tx: watch::Sender<bool>,
}

impl JobBus {
    /// Create a bus over the configured data directory.
    ///
    /// No storage is touched until a durable job is registered or
    /// [`load_stored_jobs`](JobBus::load_stored_jobs) runs.
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        let (loaded_tx, _) = watch::channel(false);
        Self {
            registry: Registry::new(),
            stores: DurableStores::new(&config.data_dir),
            loaded_tx,
        }
    }

    /// Handle that resolves once stored jobs have been loaded.
    #[must_use]
    pub fn jobs_loaded(&self) -> JobsLoaded {
        JobsLoaded(self.loaded_tx.subscribe())
    }

    /// Admit `job` into the registry, persisting it first if it is durable.
    ///
    /// Persistence happens strictly before admission: a job observable in
    /// the registry is guaranteed to have its durable record on disk.
    /// Admission alone delivers nothing to consumers.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Io`] or [`BusError::Database`] if the durable
    /// write fails (the job is then not admitted), and [`BusError::Json`]
    /// if the record cannot be serialized.
    pub async fn register_job(&mut self, job: Job) -> Result<Fingerprint, BusError> {
        if let Some(medium) = job.durable_medium() {
            self.stores.persist(medium, &job).await?;
        }
        self.registry.admit(job)
    }

    /// Admit `job` and deliver it to the topic's current consumers.
    ///
    /// Delivery strength follows the job's QoS level:
    ///
    /// - `AtMostOnce` and `AtLeastOnce` invoke every consumer on the topic
    ///   once per dispatch
    /// - `ExactlyOnce` invokes only consumers that have not yet seen the
    ///   job's fingerprint, and marks it seen
    ///
    /// Dispatching to a topic with no consumers admits the job and returns
    /// without delivering.
    ///
    /// # Errors
    ///
    /// Fails like [`register_job`](JobBus::register_job); nothing is
    /// delivered if admission fails.
    pub async fn dispatch_job(&mut self, job: Job) -> Result<(), BusError> {
        let topic = job.topic.clone();
        let qos = job.qos;
        let data = job.data.clone();

        let fingerprint = self.register_job(job).await?;

        if let Some(consumers) = self.registry.consumers_mut(&topic) {
            match qos {
                QosLevel::AtMostOnce | QosLevel::AtLeastOnce => {
                    for consumer in consumers.iter_mut() {
                        consumer.deliver(data.as_ref());
                    }
                }
                QosLevel::ExactlyOnce => {
                    for consumer in consumers.iter_mut() {
                        consumer.deliver_once(fingerprint, data.as_ref());
                    }
                }
            }
        }
        Ok(())
    }

    /// Register `handler` against `topic`.
    ///
    /// Registration immediately replays pending jobs per QoS level, see
    /// [`Registry::register_consumer`].
    pub fn register_consumer(
        &mut self,
        topic: impl Into<String>,
        handler: impl FnMut(Option<&JobData>) + Send + 'static,
    ) {
        self.registry.register_consumer(topic, handler);
    }

    /// Snapshot every admitted job and dispatch each one again.
    ///
    /// Each snapshotted job re-enters [`dispatch_job`](JobBus::dispatch_job),
    /// so the registry buckets grow by the snapshot and durable jobs are
    /// persisted again. Intended for early-life flushes, right after
    /// consumers attach.
    ///
    /// # Errors
    ///
    /// Stops at the first job whose re-dispatch fails.
    pub async fn dispatch_all_jobs_from_registry(&mut self) -> Result<(), BusError> {
        let jobs = self.registry.snapshot_jobs();
        debug!(count = jobs.len(), "Re-dispatching all registered jobs");
        for job in jobs {
            self.dispatch_job(job).await?;
        }
        Ok(())
    }

    /// Load previously stored jobs back into the registry and fire the
    /// [`JobsLoaded`] signal.
    ///
    /// Jobs from the session and local slots are admitted first, then the
    /// database rows. Loading bypasses re-persistence; the stored records
    /// stay exactly as they are on disk. Consumers registered afterwards
    /// receive the loaded jobs through replay-on-subscribe.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Database`] if the database cannot be read. Slot
    /// files that are missing or malformed load as empty.
    pub async fn load_stored_jobs(&mut self) -> Result<(), BusError> {
        let mut count = 0usize;
        for job in self.stores.all_stored_jobs() {
            self.registry.admit(job)?;
            count += 1;
        }
        for stored in self.stores.database.jobs().await? {
            self.registry.admit(stored.job)?;
            count += 1;
        }
        info!(count = count, "Stored jobs loaded into registry");
        self.loaded_tx.send_replace(true);
        Ok(())
    }

    /// Live view of the registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The durable stores backing this bus.
    #[must_use]
    pub fn stores(&self) -> &DurableStores {
        &self.stores
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
