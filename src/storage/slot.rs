//! Single-slot JSON-array file store backing the session and local mediums.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::warn;

use crate::error::BusError;
use crate::job::{is_job_collection, Job};

/// A fixed slot holding one JSON array of job records.
///
/// Reads are permissive: a missing slot, non-JSON content, or a value that
/// fails [`is_job_collection`] all degrade to an empty sequence rather than
/// an error. Writes append to the validated current content and replace the
/// whole slot in one atomic step (temp file, sync, rename), so a crash
/// mid-write leaves the previous array intact.
#[derive(Debug)]
pub struct SlotStore {
    key: &'static str,
    path: PathBuf,
}

impl SlotStore {
    /// Create a store for `key` under `dir`. No I/O happens until first use.
    pub(crate) fn new(dir: &Path, key: &'static str) -> Self {
        Self {
            key,
            path: dir.join(format!("{key}.json")),
        }
    }

    /// Location of the backing slot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and validate every job currently in the slot.
    ///
    /// Returns an empty vector when the slot is absent or its content fails
    /// validation; storage corruption never surfaces as an error.
    #[must_use = "this returns the stored jobs, it does not modify the slot"]
    pub fn jobs(&self) -> Vec<Job> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(key = self.key, error = %e, "Failed to read job slot, treating as empty");
                return Vec::new();
            }
        };

        match parse_job_array(&raw) {
            Some(jobs) => jobs,
            None => {
                warn!(
                    key = self.key,
                    "Stored jobs failed validation, treating slot as empty"
                );
                Vec::new()
            }
        }
    }

    /// Append `job` to the slot, overwriting it with the extended array.
    ///
    /// The current content is re-read and validated first, so a corrupt slot
    /// is replaced by a fresh single-job array.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Io`] when the slot cannot be written and
    /// [`BusError::Json`] when the extended array cannot be serialized.
    pub fn append(&self, job: &Job) -> Result<(), BusError> {
        let mut jobs = self.jobs();
        jobs.push(job.clone());
        let payload = serde_json::to_string(&jobs)?;
        self.overwrite(payload.as_bytes())
    }

    fn overwrite(&self, payload: &[u8]) -> Result<(), BusError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write the replacement next to the slot, sync, then rename over it.
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(payload)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

// The sole gate for untrusted slot content: parse, then shape-check the
// whole array before any job re-enters the registry.
fn parse_job_array(raw: &str) -> Option<Vec<Job>> {
    let value: Value = serde_json::from_str(raw).ok()?;
    if !is_job_collection(&value) {
        return None;
    }
    serde_json::from_value(value).ok()
}

// =============================================================================
// Unit Tests
// =============================================================================
