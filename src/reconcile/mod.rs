use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use indicatif::ProgressBar;
use log::{debug, info, warn};
use uuid::Uuid;

use crate::data::cache::{CoordinateCache, UpsertOutcome};
use crate::data::loader::observed_pincodes;
use crate::data::models::{AddressRecord, Pincode, PincodeLocation, Provenance};
use crate::geocode::{Geocoder, ResolutionFailure, ResolvedLocation};

pub use self::error::ReconcileError;

pub mod error;

/// Published provider price, used only for the pre-run estimate.
pub const COST_PER_THOUSAND_REQUESTS_USD: f64 = 5.0;

/// How a run decides which observed pincodes need a provider lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// No lookups, the snapshot is used as is.
    UseExisting,
    /// Look up only pincodes missing from the snapshot.
    Append,
    /// Look up every observed pincode and replace what is held.
    RefetchAll,
}

impl FetchMode {
    pub fn pincodes_to_fetch(
        &self,
        observed: &BTreeSet<Pincode>,
        cache: &CoordinateCache,
    ) -> Vec<Pincode> {
        match self {
            FetchMode::UseExisting => Vec::new(),
            FetchMode::Append => observed
                .iter()
                .copied()
                .filter(|p| !cache.contains(*p))
                .collect(),
            FetchMode::RefetchAll => observed.iter().copied().collect(),
        }
    }

    fn merge(&self, cache: &mut CoordinateCache, batch: Vec<PincodeLocation>) -> UpsertOutcome {
        match self {
            FetchMode::UseExisting | FetchMode::Append => cache.insert_missing(batch),
            FetchMode::RefetchAll => cache.upsert(batch),
        }
    }
}

impl FetchMode {
    /// Reads the interactive `[U/A/R]` answer. Anything that is not a known mode means refetch.
    pub fn from_answer(answer: &str) -> Self {
        answer.parse().unwrap_or(FetchMode::RefetchAll)
    }
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            FetchMode::UseExisting => "use-existing",
            FetchMode::Append => "append",
            FetchMode::RefetchAll => "refetch",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for FetchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "u" | "use" | "use-existing" => Ok(FetchMode::UseExisting),
            "a" | "append" => Ok(FetchMode::Append),
            "r" | "refetch" | "refetch-all" => Ok(FetchMode::RefetchAll),
            other => Err(format!("unknown fetch mode '{}'", other)),
        }
    }
}

/// Requests go out in bursts of `burst_size` with `pause` between bursts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub burst_size: usize,
    pub pause: Duration,
}

impl Pacing {
    /// Whether to pause after the `sent`-th of `total` requests. Never after the last one.
    pub fn pause_after(&self, sent: usize, total: usize) -> bool {
        self.burst_size > 0 && sent % self.burst_size == 0 && sent < total
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing {
            burst_size: 10,
            pause: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    pub mode: FetchMode,
    pub observed: usize,
    pub already_cached: usize,
    pub pincodes: Vec<Pincode>,
}

impl FetchPlan {
    /// Decides which pincodes a run will look up. Makes no provider calls.
    pub fn new(mode: FetchMode, records: &[AddressRecord], cache: &CoordinateCache) -> Self {
        let observed = observed_pincodes(records);
        let already_cached = observed.iter().filter(|p| cache.contains(**p)).count();
        let pincodes = mode.pincodes_to_fetch(&observed, cache);
        info!(
            "{} unique pincodes observed, {} cached, {} to fetch ({} mode)",
            observed.len(),
            already_cached,
            pincodes.len(),
            mode
        );

        FetchPlan {
            mode,
            observed: observed.len(),
            already_cached,
            pincodes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pincodes.is_empty()
    }

    pub fn estimated_cost_usd(&self) -> f64 {
        self.pincodes.len() as f64 / 1000.0 * COST_PER_THOUSAND_REQUESTS_USD
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub batch_id: Uuid,
    pub mode: FetchMode,
    pub attempted: usize,
    pub resolved: usize,
    pub no_result: usize,
    pub permanent_failures: usize,
    pub transient_failures: usize,
    pub retries: usize,
    pub inserted: usize,
    pub replaced: usize,
    pub persisted: bool,
}

impl ReconcileReport {
    fn new(mode: FetchMode) -> Self {
        ReconcileReport {
            batch_id: Uuid::new_v4(),
            mode,
            attempted: 0,
            resolved: 0,
            no_result: 0,
            permanent_failures: 0,
            transient_failures: 0,
            retries: 0,
            inserted: 0,
            replaced: 0,
            persisted: false,
        }
    }

    pub fn skipped(&self) -> usize {
        self.no_result + self.permanent_failures + self.transient_failures
    }

    fn record_failure(&mut self, failure: &ResolutionFailure) {
        match failure {
            ResolutionFailure::NoResult => self.no_result += 1,
            ResolutionFailure::PermanentError(_) => self.permanent_failures += 1,
            ResolutionFailure::TransientError(_) => self.transient_failures += 1,
        }
    }
}

/// Brings the coordinate snapshot up to date with the observed pincodes.
///
/// A run must have the snapshot to itself; nothing here guards against a
/// second concurrent run on the same file.
pub struct Reconciler<G> {
    geocoder: G,
    pacing: Pacing,
    retry: RetryPolicy,
    show_progress: bool,
}

impl<G: Geocoder> Reconciler<G> {
    pub fn new(geocoder: G) -> Self {
        Reconciler {
            geocoder,
            pacing: Pacing::default(),
            retry: RetryPolicy::default(),
            show_progress: true,
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Executes the plan against `cache` and persists the result to `snapshot`.
    ///
    /// An empty plan touches neither the cache nor the snapshot file.
    pub fn run(
        &self,
        plan: &FetchPlan,
        cache: &mut CoordinateCache,
        snapshot: &Path,
    ) -> Result<ReconcileReport, ReconcileError> {
        let mut report = self.apply(plan, cache);
        if plan.is_empty() {
            info!("All pincodes already cached, nothing to persist");
            return Ok(report);
        }

        cache.persist(snapshot)?;
        report.persisted = true;
        info!(
            "Batch {}: attempted {}, resolved {}, skipped {} ({} no result, {} permanent, {} transient), {} retries",
            report.batch_id,
            report.attempted,
            report.resolved,
            report.skipped(),
            report.no_result,
            report.permanent_failures,
            report.transient_failures,
            report.retries
        );
        Ok(report)
    }

    /// Fetches every planned pincode and merges successes into `cache` without persisting.
    pub fn apply(&self, plan: &FetchPlan, cache: &mut CoordinateCache) -> ReconcileReport {
        let mut report = ReconcileReport::new(plan.mode);
        if plan.is_empty() {
            return report;
        }

        let progress_bar = if self.show_progress {
            ProgressBar::new(plan.pincodes.len() as u64)
        } else {
            ProgressBar::hidden()
        };

        let mut batch = Vec::with_capacity(plan.pincodes.len());
        for (i, pincode) in plan.pincodes.iter().copied().enumerate() {
            report.attempted += 1;
            match self.resolve_with_retry(pincode, &mut report) {
                Ok(resolved) => {
                    report.resolved += 1;
                    batch.push(stamp(pincode, resolved, report.batch_id));
                }
                Err(failure) => {
                    warn!("Pincode {} unresolved: {}", pincode, failure);
                    report.record_failure(&failure);
                }
            }
            progress_bar.inc(1);

            if self.pacing.pause_after(i + 1, plan.pincodes.len()) {
                thread::sleep(self.pacing.pause);
            }
        }
        progress_bar.finish();

        let outcome = plan.mode.merge(cache, batch);
        report.inserted = outcome.inserted;
        report.replaced = outcome.replaced;
        report
    }

    fn resolve_with_retry(
        &self,
        pincode: Pincode,
        report: &mut ReconcileReport,
    ) -> Result<ResolvedLocation, ResolutionFailure> {
        let mut attempt = 0;
        loop {
            match self.geocoder.resolve(pincode) {
                Err(failure) if failure.is_transient() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    report.retries += 1;
                    debug!(
                        "Retrying pincode {} ({}/{}) after {}",
                        pincode, attempt, self.retry.max_retries, failure
                    );
                    thread::sleep(self.retry.backoff * attempt);
                }
                result => return result,
            }
        }
    }
}

fn stamp(pincode: Pincode, resolved: ResolvedLocation, batch_id: Uuid) -> PincodeLocation {
    PincodeLocation {
        pincode,
        coordinate: Some(resolved.coordinate),
        city: resolved.city,
        state: resolved.state,
        formatted_address: resolved.formatted_address,
        provenance: Some(Provenance {
            batch_id,
            resolved_at: Utc::now().naive_utc(),
        }),
    }
}
