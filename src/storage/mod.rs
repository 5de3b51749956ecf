//! Durable job storage across three mediums.
//!
//! This module provides:
//! - [`SlotStore`] - Single-slot JSON-array file store (session and local
//!   mediums)
//! - [`DatabaseStore`] - Asynchronous embedded SQLite medium
//! - [`DurableStores`] - The aggregate owned by the bus, including the
//!   synchronous [`DurableStores::all_stored_jobs`] union

use std::path::Path;

mod database;
mod slot;

pub use database::DatabaseStore;
pub use slot::SlotStore;

use crate::error::BusError;
use crate::job::{Job, StorageMedium};

/// Fixed key identifying the session slot.
pub const SESSION_STORE_KEY: &str = "durabus.stored.session";

/// Fixed key identifying the local slot.
pub const LOCAL_STORE_KEY: &str = "durabus.stored.local";

/// File name of the database medium under the data directory.
pub const DATABASE_FILE_NAME: &str = "durabus.db";

/// Schema version stamped into the database's `user_version` pragma.
pub const DATABASE_VERSION: i32 = 1;

/// Handles to the three storage mediums, rooted at one data directory.
///
/// The two slot mediums are synchronous; the database medium suspends.
/// All reads fail open: corrupt content degrades to an empty collection
/// instead of an error.
#[derive(Debug)]
pub struct DurableStores {
    /// Session slot, the ephemeral medium. The bus never clears it; the
    /// embedding application decides when a session ends.
    pub session: SlotStore,
    /// Local slot, the durable synchronous medium.
    pub local: SlotStore,
    /// Embedded database, the asynchronous medium.
    pub database: DatabaseStore,
}

impl DurableStores {
    /// Create handles rooted at `data_dir`. No I/O happens until first use.
    #[must_use]
    pub fn new(data_dir: &Path) -> Self {
        Self {
            session: SlotStore::new(data_dir, SESSION_STORE_KEY),
            local: SlotStore::new(data_dir, LOCAL_STORE_KEY),
            database: DatabaseStore::new(data_dir.join(DATABASE_FILE_NAME)),
        }
    }

    /// Synchronous union of the session and local mediums, session first.
    ///
    /// The database medium is deliberately excluded: reading it suspends,
    /// and this aggregate serves the synchronous half of startup replay.
    #[must_use = "this returns the stored jobs, it does not modify the mediums"]
    pub fn all_stored_jobs(&self) -> Vec<Job> {
        let mut jobs = self.session.jobs();
        jobs.extend(self.local.jobs());
        jobs
    }

    /// Persist `job` to `medium`, returning the assigned id when the medium
    /// is the database.
    ///
    /// # Errors
    ///
    /// Propagates the medium's write failure; see [`BusError`].
    pub async fn persist(
        &self,
        medium: StorageMedium,
        job: &Job,
    ) -> Result<Option<i64>, BusError> {
        match medium {
            StorageMedium::Session => self.session.append(job).map(|()| None),
            StorageMedium::Local => self.local.append(job).map(|()| None),
            StorageMedium::Database => self.database.insert(job).await.map(Some),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
