//! Group stock synchronization engine.
//!
//! One event flows through: variant lookup, group resolution, fresh reads of
//! every group member, planning, then writes. At most one synchronization per
//! group is in flight. Events for a busy group wait in a single pending slot
//! where a newer event replaces an older one, and the task that started the
//! group's synchronization drains that slot before releasing the group.
//! Different groups run fully in parallel.

use crate::config::ConfigStore;
use crate::metrics::Metrics;
use crate::models::{ProductId, Quantity, SyncEvent, VariantId, VariantRef};
use crate::services::activity::ActivityLog;
use crate::services::inventory::{ApiError, InventoryClient};
use crate::services::planner;
use crate::services::registry::{ConfigError, Group, GroupRegistry};
use crate::state::{GroupPhase, SyncStateManager};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

/// Why a synchronization ended before any write was attempted
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncFailure {
    #[error("invalid group configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("could not look up variant {variant_id}: {source}")]
    Lookup {
        variant_id: VariantId,
        source: ApiError,
    },

    #[error("could not list variants of product {product_id}: {source}")]
    ProductVariants {
        product_id: ProductId,
        source: ApiError,
    },

    #[error("could not read {variant}: {source}")]
    Read {
        variant: VariantRef,
        source: ApiError,
    },
}

/// A write the platform did not acknowledge
#[derive(Debug, Clone, PartialEq)]
pub struct WriteFailure {
    pub variant: VariantRef,
    pub error: ApiError,
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.variant, self.error)
    }
}

/// What one synchronization did to its group
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub group: String,
    pub target: Quantity,
    pub written: Vec<VariantRef>,
    pub unchanged: Vec<VariantRef>,

    /// Writes the platform reported as superseded; accepted, not failures
    pub conflicts: Vec<VariantRef>,
}

impl SyncReport {
    fn summary(&self) -> String {
        let mut message = if self.written.is_empty() {
            format!("Group {} already at {}", self.group, self.target)
        } else {
            format!(
                "Synced group {} to {}: updated {}",
                self.group,
                self.target,
                letters(&self.written)
            )
        };
        if !self.unchanged.is_empty() {
            message.push_str(&format!(" ({} already in sync)", self.unchanged.len()));
        }
        if !self.conflicts.is_empty() {
            message.push_str(&format!(
                "; superseded upstream: {}",
                letters(&self.conflicts)
            ));
        }
        message
    }
}

/// Result of handing one event to the engine
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Synchronization is disabled
    Skipped,

    /// The variant is not under group management
    Unmapped { variant_id: VariantId },

    /// The group was busy; the event waits for the running synchronization
    Queued { group: String },

    /// A newer event for the same group made this one irrelevant
    Superseded { group: String },

    Synced(SyncReport),

    PartiallyFailed {
        report: SyncReport,
        failed: Vec<WriteFailure>,
    },

    Failed(SyncFailure),
}

/// An event with its admission sequence
#[derive(Debug, Clone)]
pub struct Admitted {
    seq: u64,
    event: SyncEvent,
}

impl Admitted {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn event(&self) -> &SyncEvent {
        &self.event
    }
}

#[derive(Debug, Clone)]
struct Job {
    seq: u64,
    event: SyncEvent,
    trigger: VariantRef,
    product_id: ProductId,
    group: Group,
}

#[derive(Debug, Default)]
struct GroupSlot {
    running: Option<u64>,
    pending: Option<Job>,
    last_applied: u64,
}

/// Ownership of a group's running slot.
///
/// Dropped without reaching the end of the queue (the driving future was
/// cancelled or a synchronization panicked), it releases the group so later
/// events are not queued behind work that will never finish.
struct GroupClaim<'a> {
    engine: &'a SyncEngine,
    group: String,
    seq: u64,
    released: bool,
}

impl<'a> GroupClaim<'a> {
    fn new(engine: &'a SyncEngine, job: &Job) -> Self {
        Self {
            engine,
            group: job.group.name.clone(),
            seq: job.seq,
            released: false,
        }
    }

    /// Complete the current job and take over its queued successor.
    fn next(&mut self) -> Option<Job> {
        let next = self.engine.complete(&self.group, self.seq);
        match &next {
            Some(job) => self.seq = job.seq,
            None => self.released = true,
        }
        next
    }
}

impl Drop for GroupClaim<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.engine.abandon(&self.group, self.seq);
        }
    }
}

enum Claim {
    Run(Job),
    Queued {
        group: String,
        replaced: Option<Job>,
    },
    Stale(Job),
}

pub struct SyncEngine {
    config: Arc<ConfigStore>,
    client: InventoryClient,
    activity: Arc<ActivityLog>,
    state: SyncStateManager,
    metrics: Arc<Metrics>,
    next_seq: AtomicU64,
    // Never held across an await
    slots: Mutex<HashMap<String, GroupSlot>>,
}

impl SyncEngine {
    pub fn new(
        config: Arc<ConfigStore>,
        client: InventoryClient,
        activity: Arc<ActivityLog>,
        state: SyncStateManager,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            client,
            activity,
            state,
            metrics,
            next_seq: AtomicU64::new(1),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn activity(&self) -> &Arc<ActivityLog> {
        &self.activity
    }

    pub fn state(&self) -> &SyncStateManager {
        &self.state
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn group_phase(&self, group: &str) -> GroupPhase {
        self.state.phase(group)
    }

    /// Admit and process one event.
    pub async fn handle(&self, event: SyncEvent) -> SyncOutcome {
        let admitted = self.admit(event);
        self.process(admitted).await
    }

    /// Give an event its place in the admission order.
    ///
    /// Later admissions win over earlier ones for the same group, whatever
    /// order their lookups finish in.
    pub fn admit(&self, event: SyncEvent) -> Admitted {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            "Admitted event #{} for variant {} ({} -> {})",
            seq,
            event.variant_id,
            event.source,
            event.new_quantity
        );
        Admitted { seq, event }
    }

    /// Resolve the event's group and synchronize it, or queue behind the
    /// running synchronization of that group.
    pub async fn process(&self, admitted: Admitted) -> SyncOutcome {
        let Admitted { seq, event } = admitted;

        let config = self.config.snapshot();
        self.state.set_enabled(config.enabled);
        if !config.enabled {
            return self.skip_disabled(event.variant_id);
        }

        let registry = match GroupRegistry::from_groups(&config.groups) {
            Ok(registry) => registry,
            Err(e) => return self.fail(SyncFailure::Config(e)),
        };

        let record = match self.client.variant(event.variant_id).await {
            Ok(record) => record,
            Err(ApiError::NotFound(reason)) => {
                tracing::debug!("Variant {} not found: {}", event.variant_id, reason);
                return self.unmapped(event.variant_id, None);
            }
            Err(source) => {
                return self.fail(SyncFailure::Lookup {
                    variant_id: event.variant_id,
                    source,
                });
            }
        };

        let Some(group) = registry.resolve(&record.variant.size_letter).cloned() else {
            return self.unmapped(event.variant_id, Some(&record.variant.size_letter));
        };

        let job = Job {
            seq,
            event,
            trigger: record.variant,
            product_id: record.product_id,
            group,
        };

        match self.claim(job) {
            Claim::Run(job) => self.drain(job).await,
            Claim::Queued { group, replaced } => {
                if let Some(old) = &replaced {
                    self.superseded(old);
                }
                SyncOutcome::Queued { group }
            }
            Claim::Stale(job) => {
                self.superseded(&job);
                SyncOutcome::Superseded {
                    group: job.group.name,
                }
            }
        }
    }

    /// Forward every event from `events` into the engine until the channel closes.
    ///
    /// Each event gets its admission sequence in channel order, then runs on
    /// its own task. In-flight synchronizations finish before the returned
    /// handle completes.
    pub fn spawn_dispatcher(self: Arc<Self>, mut events: mpsc::Receiver<SyncEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tasks = JoinSet::new();

            while let Some(event) = events.recv().await {
                let admitted = self.admit(event);
                let engine = Arc::clone(&self);
                tasks.spawn(async move { engine.process(admitted).await });

                while let Some(result) = tasks.try_join_next() {
                    log_task_result(result);
                }
            }

            tracing::info!("Event channel closed, waiting for {} syncs", tasks.len());
            while let Some(result) = tasks.join_next().await {
                log_task_result(result);
            }
            tracing::info!("Dispatcher stopped");
        })
    }

    fn claim(&self, job: Job) -> Claim {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.entry(job.group.name.clone()).or_default();

        let stale = job.seq <= slot.last_applied
            || slot.running.is_some_and(|running| job.seq < running)
            || slot.pending.as_ref().is_some_and(|pending| job.seq < pending.seq);
        if stale {
            return Claim::Stale(job);
        }

        if slot.running.is_some() {
            let group = job.group.name.clone();
            let replaced = slot.pending.replace(job);
            tracing::debug!("Group {} busy, event queued", group);
            return Claim::Queued { group, replaced };
        }

        slot.running = Some(job.seq);
        Claim::Run(job)
    }

    /// Mark `seq` applied and hand over the pending successor, if any.
    fn complete(&self, group: &str, seq: u64) -> Option<Job> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(group.to_string()).or_default();

        slot.last_applied = slot.last_applied.max(seq);
        match slot.pending.take() {
            Some(next) => {
                slot.running = Some(next.seq);
                Some(next)
            }
            None => {
                slot.running = None;
                None
            }
        }
    }

    /// Release a group whose running synchronization will never complete.
    ///
    /// The interrupted job is not marked applied. Its queued successor is
    /// dropped with an error entry: nothing is left to run it.
    fn abandon(&self, group: &str, seq: u64) {
        let orphan = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = slots.entry(group.to_string()).or_default();
            if slot.running == Some(seq) {
                slot.running = None;
            }
            slot.pending.take()
        };

        tracing::warn!("Sync #{} of group {} interrupted, group released", seq, group);
        self.state.finish(group, GroupPhase::Failed);
        self.metrics.record_sync_failed();
        self.activity
            .error(format!("Sync of group {} interrupted before completion", group));
        if let Some(job) = orphan {
            self.activity.error(format!(
                "Dropped queued event for {} ({}) in group {}: its sync was interrupted",
                job.trigger, job.event.new_quantity, job.group.name
            ));
        }
    }

    // Runs `first`, then every successor queued meanwhile. Returns the
    // outcome of `first`.
    async fn drain(&self, first: Job) -> SyncOutcome {
        let mut claim = GroupClaim::new(self, &first);
        let outcome = self.run(&first).await;

        while let Some(next) = claim.next() {
            tracing::debug!("Draining queued event #{} for group {}", next.seq, next.group.name);
            self.run(&next).await;
        }

        outcome
    }

    async fn run(&self, job: &Job) -> SyncOutcome {
        // Queued jobs may start after the operator disabled synchronization
        if !self.config.snapshot().enabled {
            return self.skip_disabled(job.event.variant_id);
        }

        let started = Instant::now();
        let name = job.group.name.as_str();
        self.state.set_phase(name, GroupPhase::Planning);

        let members = match self.members(job).await {
            Ok(members) => members,
            Err(failure) => return self.finish_failed(name, failure, started),
        };

        let mut levels = Vec::with_capacity(members.len());
        for member in &members {
            match self.client.read(member).await {
                Ok(level) => levels.push(level),
                Err(source) => {
                    let failure = SyncFailure::Read {
                        variant: member.clone(),
                        source,
                    };
                    return self.finish_failed(name, failure, started);
                }
            }
        }

        let plan = planner::plan(&job.trigger, job.event.new_quantity, &levels);
        self.state.set_phase(name, GroupPhase::Applying);

        let mut written = Vec::new();
        let mut conflicts = Vec::new();
        let mut failed = Vec::new();
        for write in &plan.writes {
            match self.client.write(&write.variant, write.quantity).await {
                Ok(()) => written.push(write.variant.clone()),
                Err(ApiError::Conflict(reason)) => {
                    tracing::warn!("Write to {} superseded upstream: {}", write.variant, reason);
                    conflicts.push(write.variant.clone());
                }
                Err(error) => failed.push(WriteFailure {
                    variant: write.variant.clone(),
                    error,
                }),
            }
        }
        self.metrics.record_sync_time(started.elapsed());

        let report = SyncReport {
            group: name.to_string(),
            target: plan.target,
            written,
            unchanged: plan.unchanged,
            conflicts,
        };

        if failed.is_empty() {
            self.activity.success(report.summary());
            self.metrics.record_sync_succeeded();
            self.state.finish(name, GroupPhase::Idle);
            SyncOutcome::Synced(report)
        } else {
            let details: Vec<String> = failed.iter().map(ToString::to_string).collect();
            self.activity.error(format!(
                "Partial sync of group {} to {}: {} of {} writes failed: {}",
                name,
                report.target,
                failed.len(),
                plan.writes.len(),
                details.join("; ")
            ));
            self.metrics.record_sync_partial();
            self.state.finish(name, GroupPhase::PartiallyFailed);
            SyncOutcome::PartiallyFailed { report, failed }
        }
    }

    // Group members present on the trigger's product; the trigger is always included.
    async fn members(&self, job: &Job) -> Result<Vec<VariantRef>, SyncFailure> {
        let variants = self
            .client
            .product_variants(job.product_id)
            .await
            .map_err(|source| SyncFailure::ProductVariants {
                product_id: job.product_id,
                source,
            })?;

        let mut members: Vec<VariantRef> = variants
            .into_iter()
            .filter(|variant| job.group.contains(&variant.size_letter))
            .collect();

        if !members
            .iter()
            .any(|variant| variant.variant_id == job.trigger.variant_id)
        {
            members.insert(0, job.trigger.clone());
        }

        Ok(members)
    }

    fn finish_failed(&self, group: &str, failure: SyncFailure, started: Instant) -> SyncOutcome {
        self.metrics.record_sync_time(started.elapsed());
        self.state.finish(group, GroupPhase::Failed);
        self.activity
            .error(format!("Sync of group {} failed: {}", group, failure));
        self.metrics.record_sync_failed();
        SyncOutcome::Failed(failure)
    }

    fn fail(&self, failure: SyncFailure) -> SyncOutcome {
        self.activity.error(format!("Sync failed: {}", failure));
        self.metrics.record_sync_failed();
        SyncOutcome::Failed(failure)
    }

    fn skip_disabled(&self, variant_id: VariantId) -> SyncOutcome {
        tracing::debug!("Ignoring event for variant {}", variant_id);
        self.activity.info("Sync skipped — disabled");
        self.metrics.record_sync_skipped();
        SyncOutcome::Skipped
    }

    fn unmapped(&self, variant_id: VariantId, letter: Option<&str>) -> SyncOutcome {
        let message = match letter {
            Some(letter) => format!(
                "Variant {} (size {}) is not in any group, nothing to sync",
                variant_id, letter
            ),
            None => format!("Variant {} not found, nothing to sync", variant_id),
        };
        self.activity.info(message);
        self.metrics.record_unmapped();
        SyncOutcome::Unmapped { variant_id }
    }

    fn superseded(&self, job: &Job) {
        self.activity.info(format!(
            "Dropped event for {} ({}) in group {}: superseded by a newer event",
            job.trigger, job.event.new_quantity, job.group.name
        ));
        self.metrics.record_superseded();
    }
}

fn letters(variants: &[VariantRef]) -> String {
    variants
        .iter()
        .map(|variant| variant.size_letter.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn log_task_result(result: Result<SyncOutcome, tokio::task::JoinError>) {
    match result {
        Ok(outcome) => tracing::trace!("Sync task finished: {:?}", outcome),
        Err(e) => tracing::error!("Sync task aborted: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvOverrides;
    use crate::models::EventSource;
    use crate::services::inventory::{MockAdminApi, RetryPolicy};
    use camino::Utf8PathBuf;
    use indexmap::IndexSet;
    use tempfile::TempDir;

    fn engine() -> (SyncEngine, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let store = Arc::new(ConfigStore::open(&dir, EnvOverrides::default()).unwrap());
        let metrics = Arc::new(Metrics::new());
        let client = InventoryClient::new(
            Arc::new(MockAdminApi::new()),
            RetryPolicy::default(),
            metrics.clone(),
        );
        let engine = SyncEngine::new(
            store,
            client,
            Arc::new(ActivityLog::new(10)),
            SyncStateManager::new(),
            metrics,
        );
        (engine, temp_dir)
    }

    fn job(seq: u64, quantity: u32) -> Job {
        Job {
            seq,
            event: SyncEvent::new(VariantId(1001), Quantity::new(quantity), EventSource::Manual),
            trigger: VariantRef::new("I", 1001, 2001),
            product_id: ProductId(1),
            group: Group {
                name: "XS".to_string(),
                members: ["I", "J", "K"].iter().map(|s| s.to_string()).collect::<IndexSet<_>>(),
            },
        }
    }

    #[test]
    fn test_first_claim_runs_second_queues() {
        let (engine, _dir) = engine();

        assert!(matches!(engine.claim(job(1, 5)), Claim::Run(_)));
        match engine.claim(job(2, 6)) {
            Claim::Queued { group, replaced } => {
                assert_eq!(group, "XS");
                assert!(replaced.is_none());
            }
            _ => panic!("expected queued"),
        }
    }

    #[test]
    fn test_newer_pending_replaces_older() {
        let (engine, _dir) = engine();
        engine.claim(job(1, 5));
        engine.claim(job(2, 6));

        match engine.claim(job(3, 7)) {
            Claim::Queued { replaced, .. } => assert_eq!(replaced.unwrap().seq, 2),
            _ => panic!("expected queued"),
        }

        let next = engine.complete("XS", 1).unwrap();
        assert_eq!(next.seq, 3);
        assert_eq!(next.event.new_quantity, Quantity::new(7));
        assert!(engine.complete("XS", 3).is_none());
    }

    #[test]
    fn test_older_event_is_stale() {
        let (engine, _dir) = engine();
        engine.claim(job(5, 5));
        assert!(matches!(engine.claim(job(4, 4)), Claim::Stale(_)));

        engine.complete("XS", 5);
        assert!(matches!(engine.claim(job(3, 3)), Claim::Stale(_)));
        assert!(matches!(engine.claim(job(6, 6)), Claim::Run(_)));
    }

    #[test]
    fn test_groups_are_independent() {
        let (engine, _dir) = engine();
        let mut other = job(2, 1);
        other.group.name = "S".to_string();

        assert!(matches!(engine.claim(job(1, 5)), Claim::Run(_)));
        assert!(matches!(engine.claim(other), Claim::Run(_)));
    }

    #[test]
    fn test_dropped_claim_releases_group() {
        let (engine, _dir) = engine();
        let first = job(1, 5);
        assert!(matches!(engine.claim(first.clone()), Claim::Run(_)));
        engine.claim(job(2, 6));

        drop(GroupClaim::new(&engine, &first));

        assert!(matches!(engine.claim(job(3, 7)), Claim::Run(_)));
        let messages: Vec<String> = engine
            .activity()
            .list()
            .into_iter()
            .map(|entry| entry.message)
            .collect();
        assert!(messages.iter().any(|m| m.contains("interrupted before completion")));
        assert!(messages.iter().any(|m| m.contains("its sync was interrupted")));
        assert_eq!(engine.group_phase("XS"), GroupPhase::Idle);
    }

    #[test]
    fn test_completed_claim_keeps_queue_order() {
        let (engine, _dir) = engine();
        let first = job(1, 5);
        engine.claim(first.clone());
        engine.claim(job(2, 6));

        let mut claim = GroupClaim::new(&engine, &first);
        assert_eq!(claim.next().map(|next| next.seq), Some(2));
        assert!(claim.next().is_none());
        drop(claim);

        assert!(engine.activity().is_empty());
        assert!(matches!(engine.claim(job(1, 5)), Claim::Stale(_)));
    }

    #[test]
    fn test_report_summary() {
        let report = SyncReport {
            group: "XS".to_string(),
            target: Quantity::new(5),
            written: vec![VariantRef::new("J", 1002, 2002), VariantRef::new("K", 1003, 2003)],
            unchanged: vec![VariantRef::new("I", 1001, 2001)],
            conflicts: Vec::new(),
        };
        assert_eq!(
            report.summary(),
            "Synced group XS to 5: updated J, K (1 already in sync)"
        );
    }

    #[tokio::test]
    async fn test_disabled_engine_makes_no_calls() {
        let (engine, _dir) = engine();
        engine.config.set_enabled(false).unwrap();

        let outcome = engine
            .handle(SyncEvent::new(VariantId(1001), Quantity::new(5), EventSource::Webhook))
            .await;

        assert_eq!(outcome, SyncOutcome::Skipped);
        assert_eq!(engine.activity().list()[0].message, "Sync skipped — disabled");
        assert!(!engine.state().snapshot().enabled);
    }
}
