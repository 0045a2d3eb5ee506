//! Background scan scheduler: drives collect -> diff -> classify -> persist
//! each cycle, owns the previous snapshot, and enforces single-flight
//! execution between the periodic loop and "scan now" triggers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::classify::RiskRules;
use crate::collector::SnapshotSource;
use crate::config::Config;
use crate::diff::{self, ChangeSet};
use crate::store::{AlertStore, NewAlert};
use crate::types::{Alert, ScanStats, Snapshot, SnapshotEntry};

/// Reader-facing state published after each cycle. Buffers are swapped
/// wholesale behind fresh `Arc`s so concurrent readers never observe a
/// half-written snapshot or alert list.
#[derive(Clone)]
pub struct ScanView {
    pub last_snapshot: Arc<Vec<SnapshotEntry>>,
    pub last_changes: ChangeSet,
    pub recent_alerts: Arc<Vec<Alert>>,
    pub stats: ScanStats,
}

impl Default for ScanView {
    fn default() -> Self {
        ScanView {
            last_snapshot: Arc::new(Vec::new()),
            last_changes: ChangeSet::default(),
            recent_alerts: Arc::new(Vec::new()),
            stats: ScanStats::default(),
        }
    }
}

/// Result of one completed cycle.
#[derive(Serialize, Debug, Clone)]
pub struct CycleReport {
    pub endpoints: usize,
    pub had_changes: bool,
    pub new_alerts: usize,
    pub duration_ms: u64,
    /// True for the first cycle, which only establishes the baseline.
    pub baseline: bool,
}

#[derive(Debug)]
pub enum ScanOutcome {
    Completed(CycleReport),
    /// Another scan already held the single-flight guard.
    Conflict,
}

struct SchedulerTiming {
    busy: Duration,
    idle: Duration,
    cooldown: Duration,
}

struct Inner {
    source: Arc<dyn SnapshotSource>,
    store: Arc<AlertStore>,
    rules: RiskRules,
    ignore_ports: HashSet<u16>,
    timing: SchedulerTiming,
    recent_capacity: usize,
    scanning: AtomicBool,
    /// Previous-cycle snapshot. Only touched while the scan guard is held.
    previous: Mutex<Option<Snapshot>>,
    view: RwLock<ScanView>,
}

/// Cheap-to-clone handle shared between the scan loop and request handlers.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

/// RAII single-flight guard: the scanning flag drops back to false even if
/// the cycle errors or panics mid-way.
pub struct ScanGuard {
    inner: Arc<Inner>,
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.inner.scanning.store(false, Ordering::Release);
    }
}

impl Scheduler {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        store: Arc<AlertStore>,
        config: &Config,
    ) -> Result<Self> {
        Ok(Scheduler {
            inner: Arc::new(Inner {
                source,
                store,
                rules: config.risk_rules()?,
                ignore_ports: config.ignored_ports()?,
                timing: SchedulerTiming {
                    busy: config.busy_interval(),
                    idle: config.idle_interval(),
                    cooldown: config.cooldown(),
                },
                recent_capacity: config.recent_alerts_capacity.max(1),
                scanning: AtomicBool::new(false),
                previous: Mutex::new(None),
                view: RwLock::new(ScanView::default()),
            }),
        })
    }

    pub fn is_scanning(&self) -> bool {
        self.inner.scanning.load(Ordering::Acquire)
    }

    /// Point-in-time copy of the reader-facing state.
    pub fn view(&self) -> ScanView {
        self.inner.view.read().clone()
    }

    /// Reserve the single-flight guard, or `None` if a scan is in progress.
    pub fn try_begin(&self) -> Option<ScanGuard> {
        self.inner
            .scanning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            .then(|| ScanGuard {
                inner: self.inner.clone(),
            })
    }

    /// Run one scan cycle if no other scan is in flight. Blocking; callers on
    /// the async runtime wrap this in `spawn_blocking`.
    pub fn scan_once(&self) -> Result<ScanOutcome> {
        match self.try_begin() {
            None => Ok(ScanOutcome::Conflict),
            Some(guard) => self.cycle(guard).map(ScanOutcome::Completed),
        }
    }

    /// One-shot "scan now": rejected (not queued) when a scan is already in
    /// flight. Must be called from within a tokio runtime.
    pub fn trigger(&self) -> bool {
        let Some(guard) = self.try_begin() else {
            return false;
        };
        let scheduler = self.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = scheduler.cycle(guard) {
                error!(error = %e, "triggered scan failed");
            }
        });
        true
    }

    fn cycle(&self, guard: ScanGuard) -> Result<CycleReport> {
        let started = Instant::now();
        let snapshot = self.inner.source.collect()?;

        let mut prev_slot = self.inner.previous.lock();
        let baseline = prev_slot.is_none();
        // Cold start is baseline-only: no previous snapshot means no changes
        // and no alerts, but the snapshot is still kept for the next diff.
        let changes = match prev_slot.as_ref() {
            Some(previous) => diff::detect_changes(previous, &snapshot),
            None => ChangeSet::default(),
        };

        let fresh_alerts = self.classify_and_persist(&changes);

        let entries = snapshot.sorted_entries();
        let endpoints = entries.len();
        let had_changes = !changes.is_empty();
        let duration_ms = started.elapsed().as_millis() as u64;

        {
            let mut view = self.inner.view.write();
            view.last_snapshot = Arc::new(entries);
            view.last_changes = changes;
            if !fresh_alerts.is_empty() {
                let mut buffer: Vec<Alert> = view.recent_alerts.iter().cloned().collect();
                buffer.extend(fresh_alerts.iter().cloned());
                if buffer.len() > self.inner.recent_capacity {
                    let overflow = buffer.len() - self.inner.recent_capacity;
                    buffer.drain(..overflow);
                }
                view.recent_alerts = Arc::new(buffer);
            }
            view.stats.record(duration_ms);
        }

        *prev_slot = Some(snapshot);
        drop(prev_slot);

        let report = CycleReport {
            endpoints,
            had_changes,
            new_alerts: fresh_alerts.len(),
            duration_ms,
            baseline,
        };
        debug!(
            endpoints = report.endpoints,
            had_changes = report.had_changes,
            new_alerts = report.new_alerts,
            duration_ms = report.duration_ms,
            "scan cycle completed"
        );
        drop(guard);
        Ok(report)
    }

    fn classify_and_persist(&self, changes: &ChangeSet) -> Vec<Alert> {
        let mut alerts = Vec::new();
        for change in changes.changes() {
            // Ignore-listed ports are filtered before classification, so no
            // alert of any level is emitted for them.
            if self.inner.ignore_ports.contains(&change.port()) {
                continue;
            }
            let verdict = self.inner.rules.classify(&change);
            let persisted = self.inner.store.persist(NewAlert {
                level: verdict.level,
                title: verdict.title,
                message: verdict.message,
                port: Some(change.port()),
            });
            if let Some(alert) = persisted {
                alerts.push(alert);
            }
        }
        alerts
    }

    /// Scan loop: runs forever until cancelled. Cycle failures are isolated
    /// at the cycle boundary; the loop sleeps a cooldown and carries on.
    pub async fn run(self, cancel: CancellationToken) {
        info!("scan loop started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let scheduler = self.clone();
            let result = tokio::task::spawn_blocking(move || scheduler.scan_once()).await;
            let sleep_for = match result {
                Ok(Ok(ScanOutcome::Completed(report))) => next_interval(
                    report.had_changes,
                    self.inner.timing.busy,
                    self.inner.timing.idle,
                ),
                Ok(Ok(ScanOutcome::Conflict)) => {
                    debug!("scan already in progress, skipping cycle");
                    self.inner.timing.busy
                }
                Ok(Err(e)) => {
                    error!(error = %e, "scan cycle failed");
                    self.inner.timing.cooldown
                }
                Err(e) => {
                    error!(error = %e, "scan task aborted");
                    self.inner.timing.cooldown
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
        info!("scan loop stopped");
    }
}

/// Adaptive cadence: re-observe quickly while the port surface is moving,
/// back off when it is quiet.
pub fn next_interval(had_changes: bool, busy: Duration, idle: Duration) -> Duration {
    if had_changes {
        busy
    } else {
        idle
    }
}
