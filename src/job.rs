//! Job model, structural validation, and content fingerprinting.
//!
//! This module provides:
//! - [`Job`] - The record producers dispatch onto topics
//! - [`QosLevel`] - The three delivery-strength levels
//! - [`is_job_data`] / [`is_job`] / [`is_job_collection`] - Guards deciding
//!   whether untrusted parsed JSON is well formed
//! - [`Fingerprint`] - Content-addressed job identity used for exactly-once
//!   deduplication

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::BusError;

/// Payload carried by a job: string keys mapped to JSON values.
pub type JobData = serde_json::Map<String, Value>;

/// Delivery strength for a job. Serialized as its ordinal (`0`, `1`, `2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum QosLevel {
    /// Delivered to each currently-registered consumer once per dispatch
    /// call; never replayed to late subscribers; no deduplication.
    AtMostOnce = 0,
    /// Delivered to each currently-registered consumer on every dispatch
    /// call, duplicates included; replayed to consumers that register after
    /// the job was admitted.
    AtLeastOnce = 1,
    /// Delivered to each consumer at most once ever, tracked per
    /// (consumer, fingerprint) pair; replayed to late subscribers that have
    /// not yet seen it.
    ExactlyOnce = 2,
}

impl QosLevel {
    /// The three levels in ordinal order.
    pub const ALL: [QosLevel; 3] = [
        QosLevel::AtMostOnce,
        QosLevel::AtLeastOnce,
        QosLevel::ExactlyOnce,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for QosLevel {
    type Error = String;

    fn try_from(ordinal: u8) -> Result<Self, Self::Error> {
        match ordinal {
            0 => Ok(QosLevel::AtMostOnce),
            1 => Ok(QosLevel::AtLeastOnce),
            2 => Ok(QosLevel::ExactlyOnce),
            other => Err(format!("unknown QoS level: {other}")),
        }
    }
}

impl From<QosLevel> for u8 {
    fn from(qos: QosLevel) -> Self {
        qos as u8
    }
}

/// Storage medium a durable job is persisted to at admission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMedium {
    /// Session slot file, the ephemeral medium.
    Session,
    /// Local slot file, the durable synchronous medium.
    Local,
    /// Embedded database, the asynchronous medium.
    Database,
}

/// Durability marker on a job record.
///
/// Two wire forms are accepted: a boolean (`true` selects the local medium,
/// `false` means not durable) and an explicit medium name (`"session"`,
/// `"local"`, `"database"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Durability {
    /// Boolean form; `true` is shorthand for the local medium.
    Flag(bool),
    /// Explicit medium selection.
    Medium(StorageMedium),
}

impl Durability {
    /// The medium this marker selects, if any.
    #[must_use]
    pub fn medium(self) -> Option<StorageMedium> {
        match self {
            Durability::Flag(true) => Some(StorageMedium::Local),
            Durability::Flag(false) => None,
            Durability::Medium(medium) => Some(medium),
        }
    }
}

/// A job record dispatched onto a topic.
///
/// Serialized field names are `topic`, `qos`, `data`, and `isDurable`;
/// absent options are omitted. Unknown extra properties are ignored when
/// parsing. A job has no identity beyond its structural content: two jobs
/// with equal topic, qos, and data share a [`Fingerprint`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Opaque routing key. Non-empty by convention, not enforced.
    pub topic: String,
    /// Delivery strength.
    pub qos: QosLevel,
    /// Optional payload handed to consumer handlers on delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JobData>,
    /// Optional durability marker, consulted once at admission time.
    #[serde(rename = "isDurable", default, skip_serializing_if = "Option::is_none")]
    pub is_durable: Option<Durability>,
}

impl Job {
    /// Create a non-durable job without a payload.
    #[must_use]
    pub fn new(topic: impl Into<String>, qos: QosLevel) -> Self {
        Self {
            topic: topic.into(),
            qos,
            data: None,
            is_durable: None,
        }
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_data(mut self, data: JobData) -> Self {
        self.data = Some(data);
        self
    }

    /// Mark the job for persistence to `medium` at admission time.
    #[must_use]
    pub fn durable(mut self, medium: StorageMedium) -> Self {
        self.is_durable = Some(Durability::Medium(medium));
        self
    }

    /// The medium this job persists to, if it is durable.
    #[must_use]
    pub fn durable_medium(&self) -> Option<StorageMedium> {
        self.is_durable.and_then(Durability::medium)
    }

    /// Compute the content fingerprint of this record.
    ///
    /// The record is serialized to canonical JSON (object keys in sorted
    /// order, no whitespace) and hashed with SHA-256, so equal content
    /// yields an equal fingerprint regardless of how the record was built.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Json`] if the record cannot be serialized. This
    /// does not occur for jobs built from this crate's types; the error path
    /// is kept explicit rather than panicking.
    pub fn fingerprint(&self) -> Result<Fingerprint, BusError> {
        let record = serde_json::to_value(self)?;
        let mut canonical = String::new();
        write_canonical(&record, &mut canonical);
        Ok(Fingerprint(Sha256::digest(canonical.as_bytes()).into()))
    }
}

/// A job record held in the database medium, carrying its store-assigned id.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredJob {
    /// Auto-assigned primary key of the stored record.
    pub job_id: i64,
    /// The job record itself.
    pub job: Job,
}

/// Content-addressed identity of a job record.
///
/// Displays as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

// Object keys are written in sorted order so the fingerprint is stable no
// matter what map backing produced the value. Leaf encoding reuses
// serde_json's Display.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(record) => {
            let mut entries: Vec<(&String, &Value)> = record.iter().collect();
            entries.sort_by_key(|(key, _)| *key);
            out.push('{');
            for (i, (key, entry)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(entry, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        leaf => out.push_str(&leaf.to_string()),
    }
}

/// Returns `true` when `value` is acceptable as a job payload.
///
/// `None` means "no data" and is accepted. Null, booleans, arrays, strings,
/// and numbers are rejected; any JSON object is accepted.
#[must_use]
pub fn is_job_data(value: Option<&Value>) -> bool {
    match value {
        None => true,
        Some(Value::Object(_)) => true,
        Some(_) => false,
    }
}

/// Returns `true` when `value` is a structurally well-formed job record.
///
/// Requires a string `topic` and an integral `qos` naming one of the three
/// QoS ordinals. `data`, when present, must satisfy [`is_job_data`];
/// `isDurable`, when present, must be a boolean or a known medium name.
/// Unknown extra properties are permitted: validation is structural, not
/// nominal.
#[must_use]
pub fn is_job(value: &Value) -> bool {
    let Some(record) = value.as_object() else {
        return false;
    };

    if !record.get("topic").is_some_and(Value::is_string) {
        return false;
    }

    // Decoding through the field types keeps the guard in lockstep with
    // what the typed parse will accept.
    let valid_qos = record
        .get("qos")
        .is_some_and(|qos| serde_json::from_value::<QosLevel>(qos.clone()).is_ok());
    if !valid_qos {
        return false;
    }

    if !is_job_data(record.get("data")) {
        return false;
    }

    record.get("isDurable").map_or(true, |flag| {
        serde_json::from_value::<Durability>(flag.clone()).is_ok()
    })
}

/// Returns `true` when `value` is an array whose every element satisfies
/// [`is_job`].
#[must_use]
pub fn is_job_collection(value: &Value) -> bool {
    value
        .as_array()
        .is_some_and(|items| items.iter().all(is_job))
}

// =============================================================================
// Unit Tests
// =============================================================================
