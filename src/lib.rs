//! A durable, QoS-aware in-process job bus.
//!
//! This crate routes job records to topic consumers at three delivery
//! strengths and optionally persists them across restarts:
//!
//! - [`QosLevel::AtMostOnce`] - fire-and-forget, never replayed
//! - [`QosLevel::AtLeastOnce`] - replayed to every newly registered consumer
//! - [`QosLevel::ExactlyOnce`] - at most one delivery per consumer, keyed by
//!   content [`Fingerprint`]
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐     ┌─────────────┐     ┌──────────────────────┐
//! │ dispatch_job  │────►│             │────►│ consumer handlers    │
//! ├───────────────┤     │   JobBus    │     ├──────────────────────┤
//! │ register_job  │────►│             │◄───►│ slot files + sqlite  │
//! └───────────────┘     └─────────────┘     └──────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use durabus::{BusConfig, Job, JobBus, QosLevel, StorageMedium};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), durabus::BusError> {
//!     let mut bus = JobBus::new(BusConfig::new("./data"));
//!
//!     // Bring jobs persisted by earlier runs back into the registry.
//!     bus.load_stored_jobs().await?;
//!
//!     bus.register_consumer("orders", |data| {
//!         println!("order received: {data:?}");
//!     });
//!
//!     // Durable jobs hit storage before they are admitted.
//!     let job = Job::new("orders", QosLevel::ExactlyOnce).durable(StorageMedium::Database);
//!     bus.dispatch_job(job).await?;
//!     Ok(())
//! }
//! ```

mod dispatcher;
mod error;
mod job;
mod registry;
mod storage;

pub use dispatcher::{BusConfig, JobBus, JobsLoaded};
pub use error::BusError;
pub use job::{
    is_job, is_job_collection, is_job_data, Durability, Fingerprint, Job, JobData, QosLevel,
    StorageMedium, StoredJob,
};
pub use registry::{AdmittedJob, ConsumerHandler, Registry, RegisteredConsumer};
pub use storage::{
    DatabaseStore, DurableStores, SlotStore, DATABASE_FILE_NAME, DATABASE_VERSION,
    LOCAL_STORE_KEY, SESSION_STORE_KEY,
};
