//! Topic registries for admitted jobs and registered consumers.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::BusError;
use crate::job::{Fingerprint, Job, JobData, QosLevel};

/// Handler invoked with a job's payload on delivery.
pub type ConsumerHandler = Box<dyn FnMut(Option<&JobData>) + Send>;

/// A job held in a QoS bucket together with its content fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmittedJob {
    job: Job,
    fingerprint: Fingerprint,
}

impl AdmittedJob {
    /// The admitted record.
    #[must_use]
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Fingerprint cached at admission time.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }
}

/// A consumer registered against one topic.
///
/// Each registration carries its own `seen_jobs` set: exactly-once delivery
/// is tracked per (consumer, fingerprint) pair, and the set only grows for
/// the lifetime of the registration.
pub struct RegisteredConsumer {
    handler: ConsumerHandler,
    seen_jobs: HashSet<Fingerprint>,
}

impl RegisteredConsumer {
    fn new(handler: ConsumerHandler) -> Self {
        Self {
            handler,
            seen_jobs: HashSet::new(),
        }
    }

    /// Fingerprints this consumer has received exactly-once delivery for.
    #[must_use]
    pub fn seen_jobs(&self) -> &HashSet<Fingerprint> {
        &self.seen_jobs
    }

    pub(crate) fn deliver(&mut self, data: Option<&JobData>) {
        (self.handler)(data);
    }

    // Unseen -> Seen is terminal: once a fingerprint is recorded the
    // consumer never receives that content again.
    pub(crate) fn deliver_once(
        &mut self,
        fingerprint: Fingerprint,
        data: Option<&JobData>,
    ) -> bool {
        if !self.seen_jobs.insert(fingerprint) {
            return false;
        }
        (self.handler)(data);
        true
    }
}

/// The two registration maps: QoS-partitioned pending jobs and per-topic
/// consumers.
///
/// Buckets are append-only for the life of the process. Admission never
/// deduplicates and nothing is ever evicted; a topic key is only created
/// together with its first entry, so every present key maps to a non-empty
/// sequence.
#[derive(Default)]
pub struct Registry {
    job_registries: [HashMap<String, Vec<AdmittedJob>>; 3],
    consumer_registry: HashMap<String, Vec<RegisteredConsumer>>,
}

impl Registry {
    /// Create empty registries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `job` into its QoS bucket under its topic, appending to the
    /// existing sequence or creating a singleton. Each admission of
    /// identical content stands on its own and is dispatched independently.
    ///
    /// Admission alone delivers nothing; it only makes the job visible to
    /// replay-on-subscribe and bulk re-dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Json`] if the record cannot be fingerprinted.
    pub fn admit(&mut self, job: Job) -> Result<Fingerprint, BusError> {
        let fingerprint = job.fingerprint()?;
        debug!(topic = %job.topic, qos = u8::from(job.qos), "Job admitted");
        self.job_registries[job.qos.index()]
            .entry(job.topic.clone())
            .or_default()
            .push(AdmittedJob { job, fingerprint });
        Ok(fingerprint)
    }

    /// Register `handler` against `topic` and immediately replay pending
    /// jobs (replay-on-subscribe):
    ///
    /// - every admitted AtLeastOnce job for the topic is delivered to the
    ///   new handler, even if other consumers already received it;
    /// - every admitted ExactlyOnce job for the topic is re-offered to
    ///   *every* consumer on the topic, not just the new one, subject to
    ///   each consumer's own `seen_jobs` filter.
    ///
    /// AtMostOnce jobs are never replayed.
    pub fn register_consumer(
        &mut self,
        topic: impl Into<String>,
        handler: impl FnMut(Option<&JobData>) + Send + 'static,
    ) {
        let topic = topic.into();
        debug!(topic = %topic, "Consumer registered");
        let consumers = self.consumer_registry.entry(topic.clone()).or_default();
        consumers.push(RegisteredConsumer::new(Box::new(handler)));

        if let Some(pending) = self.job_registries[QosLevel::AtLeastOnce.index()].get(&topic) {
            if let Some(newest) = consumers.last_mut() {
                for admitted in pending {
                    newest.deliver(admitted.job().data.as_ref());
                }
            }
        }

        // An earlier registration may still be unsatisfied for some
        // fingerprint, so the exactly-once pass walks all consumers.
        if let Some(pending) = self.job_registries[QosLevel::ExactlyOnce.index()].get(&topic) {
            for admitted in pending {
                for consumer in consumers.iter_mut() {
                    consumer.deliver_once(admitted.fingerprint(), admitted.job().data.as_ref());
                }
            }
        }
    }

    /// Live view of the `qos` bucket: topic to admitted jobs in insertion
    /// order.
    #[must_use]
    pub fn job_registry(&self, qos: QosLevel) -> &HashMap<String, Vec<AdmittedJob>> {
        &self.job_registries[qos.index()]
    }

    /// Live view of the consumer registry.
    #[must_use]
    pub fn consumer_registry(&self) -> &HashMap<String, Vec<RegisteredConsumer>> {
        &self.consumer_registry
    }

    pub(crate) fn consumers_mut(&mut self, topic: &str) -> Option<&mut Vec<RegisteredConsumer>> {
        self.consumer_registry.get_mut(topic)
    }

    // Snapshot every admitted job, buckets in ordinal order, for bulk
    // re-dispatch. Cloned up front because delivery appends to the buckets
    // being iterated.
    pub(crate) fn snapshot_jobs(&self) -> Vec<Job> {
        let mut jobs = Vec::new();
        for qos in QosLevel::ALL {
            for pending in self.job_registries[qos.index()].values() {
                jobs.extend(pending.iter().map(|admitted| admitted.job().clone()));
            }
        }
        jobs
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_consumer(registry: &mut Registry, topic: &str) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        registry.register_consumer(topic, move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    fn job_with_data(topic: &str, qos: QosLevel) -> Job {
        let mut data = JobData::new();
        data.insert("k".into(), json!("v"));
        Job::new(topic, qos).with_data(data)
    }

    // =========================================================================
    // Admission Tests
    // =========================================================================

    #[test]
    fn admit_appends_to_the_qos_bucket() {
        let mut registry = Registry::new();
        for _ in 0..3 {
            registry.admit(Job::new("jobs", QosLevel::AtLeastOnce)).unwrap();
        }

        let bucket = registry.job_registry(QosLevel::AtLeastOnce);
        assert_eq!(bucket.get("jobs").map(Vec::len), Some(3));
        assert!(registry.job_registry(QosLevel::AtMostOnce).is_empty());
    }

    #[test]
    fn admit_partitions_by_qos() {
        let mut registry = Registry::new();
        registry.admit(Job::new("jobs", QosLevel::AtMostOnce)).unwrap();
        registry.admit(Job::new("jobs", QosLevel::ExactlyOnce)).unwrap();

        assert_eq!(
            registry.job_registry(QosLevel::AtMostOnce)["jobs"].len(),
            1
        );
        assert_eq!(
            registry.job_registry(QosLevel::ExactlyOnce)["jobs"].len(),
            1
        );
        assert!(registry.job_registry(QosLevel::AtLeastOnce).is_empty());
    }

    #[test]
    fn admit_caches_the_fingerprint() {
        let mut registry = Registry::new();
        let job = job_with_data("jobs", QosLevel::ExactlyOnce);
        let expected = job.fingerprint().unwrap();

        let cached = registry.admit(job).unwrap();

        assert_eq!(cached, expected);
        let bucket = registry.job_registry(QosLevel::ExactlyOnce);
        assert_eq!(bucket["jobs"][0].fingerprint(), expected);
    }

    #[test]
    fn admit_does_not_deliver_to_existing_consumers() {
        let mut registry = Registry::new();
        let count = counting_consumer(&mut registry, "jobs");

        registry.admit(Job::new("jobs", QosLevel::AtLeastOnce)).unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    // =========================================================================
    // Consumer Registration Tests
    // =========================================================================

    #[test]
    fn register_consumer_appends_to_the_topic_sequence() {
        let mut registry = Registry::new();
        for _ in 0..3 {
            counting_consumer(&mut registry, "jobs");
        }

        assert_eq!(registry.consumer_registry()["jobs"].len(), 3);
    }

    #[test]
    fn new_consumers_start_with_empty_seen_jobs() {
        let mut registry = Registry::new();
        counting_consumer(&mut registry, "jobs");

        assert!(registry.consumer_registry()["jobs"][0].seen_jobs().is_empty());
    }

    // =========================================================================
    // Replay-on-subscribe Tests
    // =========================================================================

    #[test]
    fn at_least_once_jobs_replay_to_late_consumers() {
        let mut registry = Registry::new();
        registry
            .admit(job_with_data("jobs", QosLevel::AtLeastOnce))
            .unwrap();

        let count = counting_consumer(&mut registry, "jobs");

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn at_least_once_replay_goes_only_to_the_new_consumer() {
        let mut registry = Registry::new();
        registry
            .admit(Job::new("jobs", QosLevel::AtLeastOnce))
            .unwrap();

        let first = counting_consumer(&mut registry, "jobs");
        let second = counting_consumer(&mut registry, "jobs");

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn at_most_once_jobs_are_never_replayed() {
        let mut registry = Registry::new();
        registry.admit(Job::new("jobs", QosLevel::AtMostOnce)).unwrap();

        let count = counting_consumer(&mut registry, "jobs");

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn exactly_once_replay_marks_the_fingerprint_seen() {
        let mut registry = Registry::new();
        let fingerprint = registry
            .admit(job_with_data("jobs", QosLevel::ExactlyOnce))
            .unwrap();

        let count = counting_consumer(&mut registry, "jobs");

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let consumers = registry.consumer_registry();
        assert!(consumers["jobs"][0].seen_jobs().contains(&fingerprint));
    }

    #[test]
    fn exactly_once_replay_re_drives_all_consumers_on_the_topic() {
        let mut registry = Registry::new();

        // Registered before admission, so replay-on-subscribe found nothing
        // and admission itself delivered nothing.
        let early = counting_consumer(&mut registry, "jobs");
        registry
            .admit(job_with_data("jobs", QosLevel::ExactlyOnce))
            .unwrap();
        assert_eq!(early.load(Ordering::SeqCst), 0);

        // A later registration re-offers the job to the earlier consumer too.
        let late = counting_consumer(&mut registry, "jobs");

        assert_eq!(early.load(Ordering::SeqCst), 1);
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exactly_once_replay_respects_seen_jobs() {
        let mut registry = Registry::new();
        registry
            .admit(job_with_data("jobs", QosLevel::ExactlyOnce))
            .unwrap();

        let first = counting_consumer(&mut registry, "jobs");
        assert_eq!(first.load(Ordering::SeqCst), 1);

        // The second registration re-offers to both, but the first consumer
        // already saw the fingerprint.
        let second = counting_consumer(&mut registry, "jobs");
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn replay_passes_the_job_payload() {
        let mut registry = Registry::new();
        registry
            .admit(job_with_data("jobs", QosLevel::AtLeastOnce))
            .unwrap();

        let received = Arc::new(std::sync::Mutex::new(None));
        let sink = received.clone();
        registry.register_consumer("jobs", move |data| {
            *sink.lock().unwrap() = data.cloned();
        });

        let received = received.lock().unwrap();
        let data = received.as_ref().expect("payload should be delivered");
        assert_eq!(data.get("k"), Some(&json!("v")));
    }

    #[test]
    fn replay_is_scoped_to_the_consumer_topic() {
        let mut registry = Registry::new();
        registry
            .admit(Job::new("other", QosLevel::AtLeastOnce))
            .unwrap();

        let count = counting_consumer(&mut registry, "jobs");

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    // =========================================================================
    // Snapshot Tests
    // =========================================================================

    #[test]
    fn snapshot_walks_buckets_in_ordinal_order() {
        let mut registry = Registry::new();
        registry.admit(Job::new("a", QosLevel::ExactlyOnce)).unwrap();
        registry.admit(Job::new("b", QosLevel::AtMostOnce)).unwrap();
        registry.admit(Job::new("c", QosLevel::AtLeastOnce)).unwrap();

        let snapshot = registry.snapshot_jobs();
        let levels: Vec<QosLevel> = snapshot.iter().map(|job| job.qos).collect();
        assert_eq!(
            levels,
            vec![
                QosLevel::AtMostOnce,
                QosLevel::AtLeastOnce,
                QosLevel::ExactlyOnce
            ]
        );
    }
}
