//! Usage tracker service
//!
//! One task owns the counter store and the quota context and applies every
//! mutation in arrival order. Observers talk to it through a
//! [`TrackerHandle`]; the CLI can also drive a [`UsageTracker`] directly.
//!
//! # Architecture
//!
//! ```text
//!  observers ──TrackerRequest──▶ ┌──────────────────────────────┐
//!  (banner, model, api call)     │ UsageTracker (owning task)   │
//!                                │   QuotaContext  Reconciler   │
//!  SweepScheduler ──Sweep──────▶ │   dyn CounterStore           │
//!                                └──────────────┬───────────────┘
//!                                               │ RecordsChanged
//!                                               ▼
//!                                     broadcast subscribers
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::models::TrackerConfig;
use crate::utils::{retry_with_backoff, RetryPolicy};

use super::banner;
use super::context::{model_key, QuotaContext};
use super::counter::{CounterStore, QuotaError, UsageRecords};
use super::engine::{Reconciler, RecordUpdate};
use super::period;
use super::types::{PlanId, Signal, UsageRecord, UsageView};

/// Pending requests before senders wait
pub const REQUEST_BUFFER: usize = 64;

/// Change notifications kept for slow subscribers
pub const EVENT_CAPACITY: usize = 32;

/// Reply channel carried by a request
pub type Reply<T> = oneshot::Sender<Result<T, QuotaError>>;

/// Source of "now" in epoch milliseconds
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Wall clock
pub fn system_clock() -> Clock {
    Arc::new(|| Utc::now().timestamp_millis())
}

// ============================================================================
// Requests and Events
// ============================================================================

/// Which reconciliation a sweep runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepKind {
    /// Expire ended windows only
    Light,
    /// Roll stale windows forward, then expire
    Full,
}

impl std::fmt::Display for SweepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SweepKind::Light => write!(f, "light"),
            SweepKind::Full => write!(f, "full"),
        }
    }
}

/// Outcome of one sweep over every stored record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub kind: SweepKind,
    pub examined: usize,
    /// Models whose record was replaced
    pub changed: Vec<String>,
    /// Models left unchanged because their update failed
    pub failed: Vec<String>,
}

/// Broadcast after records change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordsChanged {
    pub models: Vec<String>,
}

/// Everything the tracker task accepts
#[derive(Debug)]
pub enum TrackerRequest {
    /// Banner text seen on the page; replies with the affected model
    BannerObserved {
        text: String,
        model_hint: Option<String>,
        reply: Reply<Option<String>>,
    },
    /// The model picker changed
    ModelDisplayed { model: String, reply: Reply<()> },
    /// A message was sent; `None` means the displayed model
    ApiCallCompleted {
        model: Option<String>,
        reply: Reply<Option<(String, UsageRecord)>>,
    },
    SetManualOverride {
        model: String,
        count: u32,
        until: i64,
        reply: Reply<UsageRecord>,
    },
    GetRecord {
        model: String,
        reply: Reply<Option<UsageRecord>>,
    },
    GetAllRecords { reply: Reply<UsageRecords> },
    GetUsage { model: String, reply: Reply<UsageView> },
    GetPlan { reply: Reply<PlanId> },
    SetPlan { plan: PlanId, reply: Reply<()> },
    /// Replies with the number of records reset
    ResetAll { reply: Reply<usize> },
    Sweep {
        kind: SweepKind,
        reply: Reply<SweepReport>,
    },
    Shutdown,
}

// ============================================================================
// UsageTracker
// ============================================================================

/// Owner of all usage records
pub struct UsageTracker<Tz: TimeZone> {
    store: Arc<dyn CounterStore>,
    context: QuotaContext,
    reconciler: Reconciler<Tz>,
    config: TrackerConfig,
    events: broadcast::Sender<RecordsChanged>,
    clock: Clock,
}

impl<Tz: TimeZone> UsageTracker<Tz> {
    /// Build a tracker, restoring the persisted plan
    pub async fn load(
        store: Arc<dyn CounterStore>,
        config: TrackerConfig,
        tz: Tz,
    ) -> Result<Self, QuotaError> {
        let config = config.validate();
        let plan = match store.get_plan().await? {
            Some(plan) => plan,
            None => config.default_plan.clone(),
        };
        let limits = config.limits_for(&plan);
        log::info!(
            "[quota:tracker] Loaded {} store, plan {} ({} limits)",
            store.store_id(),
            plan,
            limits.len()
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            store,
            context: QuotaContext::new(plan, limits),
            reconciler: Reconciler::new(tz),
            config,
            events,
            clock: system_clock(),
        })
    }

    /// Replace the clock
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordsChanged> {
        self.events.subscribe()
    }

    pub fn context(&self) -> &QuotaContext {
        &self.context
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    fn notify(&self, models: Vec<String>) {
        if models.is_empty() {
            return;
        }
        // no subscribers is fine
        let _ = self.events.send(RecordsChanged { models });
    }

    async fn apply(&self, signal: Signal, now: i64) -> Result<(String, UsageRecord), QuotaError> {
        let key = model_key(signal.model());
        let current = self.store.get_record(&key).await?;
        let descriptor = self.context.descriptor_for(&key);

        let record = self
            .reconciler
            .apply_signal(&signal, current.as_ref(), descriptor, now)
            .map_err(|e| {
                log::warn!(
                    "[quota:tracker] Dropped {} for '{}': {}",
                    signal.kind(),
                    key,
                    e
                );
                e
            })?;

        self.store.put_record(&key, &record).await?;
        self.notify(vec![key.clone()]);
        Ok((key, record))
    }

    /// Parse banner text and apply the resulting signal
    ///
    /// Unparseable text is not an error; it yields `Ok(None)`.
    pub async fn banner_observed(
        &self,
        text: &str,
        model_hint: Option<&str>,
    ) -> Result<Option<String>, QuotaError> {
        let now = self.now();
        let signal = {
            let Some(now_dt) = period::from_millis(self.reconciler.timezone(), now) else {
                return Err(QuotaError::InvalidInstant {
                    model: model_hint.unwrap_or_default().to_string(),
                    detail: format!("clock reading {} out of range", now),
                });
            };
            let hint = model_hint.or(self.context.current_model());
            banner::parse_banner(text, hint, self.context.limits(), &now_dt)
        };

        match signal {
            Some(signal) => Ok(Some(self.apply(signal, now).await?.0)),
            None => Ok(None),
        }
    }

    /// Remember the model the UI shows; blank clears it
    pub fn model_displayed(&mut self, model: &str) {
        let model = model.trim();
        if model.is_empty() {
            self.context.set_current_model(None);
        } else {
            log::debug!("[quota:tracker] Displayed model is now '{}'", model);
            self.context.set_current_model(Some(model.to_string()));
        }
    }

    /// Count one sent message
    ///
    /// Returns `None` when neither `model` nor a displayed model is known.
    pub async fn api_call_completed(
        &self,
        model: Option<&str>,
    ) -> Result<Option<(String, UsageRecord)>, QuotaError> {
        let Some(key) = model
            .or(self.context.current_model())
            .map(model_key)
            .filter(|k| !k.is_empty())
        else {
            log::debug!("[quota:tracker] API call with no known model, not counted");
            return Ok(None);
        };

        let now = self.now();
        let current = self.store.get_record(&key).await?;
        let descriptor = self.context.descriptor_for(&key);
        let record = self
            .reconciler
            .record_usage(&key, current.as_ref(), descriptor, now)?;

        self.store.put_record(&key, &record).await?;
        self.notify(vec![key.clone()]);
        Ok(Some((key, record)))
    }

    /// Apply a user-entered count and reset time
    pub async fn set_manual_override(
        &self,
        model: &str,
        count: u32,
        until: i64,
    ) -> Result<UsageRecord, QuotaError> {
        let key = model_key(model);
        if key.is_empty() {
            return Err(QuotaError::ParseError("model name is empty".to_string()));
        }
        let signal = Signal::ManualOverride {
            model: key,
            count,
            until,
        };
        Ok(self.apply(signal, self.now()).await?.1)
    }

    pub async fn get_record(&self, model: &str) -> Result<Option<UsageRecord>, QuotaError> {
        self.store.get_record(&model_key(model)).await
    }

    pub async fn get_all_records(&self) -> Result<UsageRecords, QuotaError> {
        self.store.get_all_records().await
    }

    /// Record and descriptor for one model; untracked models show a zero count
    pub async fn get_usage(&self, model: &str) -> Result<UsageView, QuotaError> {
        let key = model_key(model);
        let record = self.store.get_record(&key).await?.unwrap_or_default();
        Ok(UsageView::new(
            key.clone(),
            record,
            self.context.descriptor_for(&key).cloned(),
        ))
    }

    /// Every stored record as a view, ordered by model
    pub async fn usage_overview(&self) -> Result<Vec<UsageView>, QuotaError> {
        let records = self.store.get_all_records().await?;
        Ok(records
            .into_iter()
            .map(|(model, record)| {
                let descriptor = self.context.descriptor_for(&model).cloned();
                UsageView::new(model, record, descriptor)
            })
            .collect())
    }

    pub fn plan(&self) -> &PlanId {
        self.context.plan()
    }

    /// Persist and activate a plan
    ///
    /// Records are kept; the next sweep applies the new plan's windows.
    pub async fn set_plan(&mut self, plan: PlanId) -> Result<(), QuotaError> {
        self.store.set_plan(&plan).await?;
        let limits = self.config.limits_for(&plan);
        log::info!(
            "[quota:tracker] Plan changed {} -> {} ({} limits)",
            self.context.plan(),
            plan,
            limits.len()
        );
        self.context.set_plan(plan, limits);

        let models = self.store.get_all_records().await?.into_keys().collect();
        self.notify(models);
        Ok(())
    }

    /// Zero every record and open a fresh window from now
    ///
    /// All-or-nothing: if any window cannot be computed nothing is written.
    pub async fn reset_all(&self) -> Result<usize, QuotaError> {
        let records = self.store.get_all_records().await?;
        let now = self.now();

        let mut reset = UsageRecords::new();
        for model in records.keys() {
            let descriptor = self.context.descriptor_for(model);
            reset.insert(model.clone(), self.reconciler.fresh(model, descriptor, now)?);
        }

        self.store.put_all_records(&reset).await?;
        log::info!("[quota:tracker] Reset {} records", reset.len());
        self.notify(reset.keys().cloned().collect());
        Ok(reset.len())
    }

    /// Reconcile every stored record against the clock
    ///
    /// A record whose update fails is logged, left as it was and listed in
    /// the report; the rest of the sweep continues.
    pub async fn sweep(&self, kind: SweepKind) -> Result<SweepReport, QuotaError> {
        let records = self.store.get_all_records().await?;
        let now = self.now();
        let mut report = SweepReport {
            kind,
            examined: records.len(),
            changed: Vec::new(),
            failed: Vec::new(),
        };

        for (model, record) in &records {
            let descriptor = self.context.descriptor_for(model);
            let update = match kind {
                SweepKind::Light => self.reconciler.expire(model, record, descriptor, now),
                SweepKind::Full => self.reconciler.sweep(model, record, descriptor, now),
            };
            match update {
                Ok(RecordUpdate::Replaced(next)) => match self.store.put_record(model, &next).await {
                    Ok(()) => report.changed.push(model.clone()),
                    Err(e) => {
                        log::warn!("[quota:tracker] {} sweep could not save '{}': {}", kind, model, e);
                        report.failed.push(model.clone());
                    }
                },
                Ok(RecordUpdate::Unchanged) => {}
                Err(e) => {
                    log::warn!("[quota:tracker] {} sweep skipped '{}': {}", kind, model, e);
                    report.failed.push(model.clone());
                }
            }
        }

        if !report.changed.is_empty() {
            log::debug!(
                "[quota:tracker] {} sweep changed {} of {} records",
                kind,
                report.changed.len(),
                report.examined
            );
        }
        self.notify(report.changed.clone());
        Ok(report)
    }

    /// Process one request; returns `false` on shutdown
    pub async fn handle(&mut self, request: TrackerRequest) -> bool {
        // A requester that timed out has dropped its receiver; ignore send errors
        match request {
            TrackerRequest::BannerObserved {
                text,
                model_hint,
                reply,
            } => {
                let _ = reply.send(self.banner_observed(&text, model_hint.as_deref()).await);
            }
            TrackerRequest::ModelDisplayed { model, reply } => {
                self.model_displayed(&model);
                let _ = reply.send(Ok(()));
            }
            TrackerRequest::ApiCallCompleted { model, reply } => {
                let _ = reply.send(self.api_call_completed(model.as_deref()).await);
            }
            TrackerRequest::SetManualOverride {
                model,
                count,
                until,
                reply,
            } => {
                let _ = reply.send(self.set_manual_override(&model, count, until).await);
            }
            TrackerRequest::GetRecord { model, reply } => {
                let _ = reply.send(self.get_record(&model).await);
            }
            TrackerRequest::GetAllRecords { reply } => {
                let _ = reply.send(self.get_all_records().await);
            }
            TrackerRequest::GetUsage { model, reply } => {
                let _ = reply.send(self.get_usage(&model).await);
            }
            TrackerRequest::GetPlan { reply } => {
                let _ = reply.send(Ok(self.plan().clone()));
            }
            TrackerRequest::SetPlan { plan, reply } => {
                let _ = reply.send(self.set_plan(plan).await);
            }
            TrackerRequest::ResetAll { reply } => {
                let _ = reply.send(self.reset_all().await);
            }
            TrackerRequest::Sweep { kind, reply } => {
                let _ = reply.send(self.sweep(kind).await);
            }
            TrackerRequest::Shutdown => return false,
        }
        true
    }

    /// Serve requests until shutdown or every handle is dropped
    pub async fn run(mut self, mut requests: mpsc::Receiver<TrackerRequest>) {
        log::info!("[quota:tracker] Started (plan {})", self.context.plan());
        while let Some(request) = requests.recv().await {
            if !self.handle(request).await {
                break;
            }
        }
        log::info!("[quota:tracker] Stopped");
    }
}

impl<Tz> UsageTracker<Tz>
where
    Tz: TimeZone + Send + Sync + 'static,
    Tz::Offset: Send + Sync,
{
    /// Run the tracker on its own task
    pub fn spawn(self) -> (TrackerHandle, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(REQUEST_BUFFER);
        let handle = TrackerHandle {
            tx,
            events: self.events.clone(),
            retry: self.config.retry_policy(),
            timeout: self.config.request_timeout(),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }
}

// ============================================================================
// TrackerHandle
// ============================================================================

/// Cloneable client for a spawned tracker
///
/// Reads and idempotent writes are retried on transient failure. Message
/// counting is retried only when the request never reached the tracker, so
/// a slow reply cannot count a message twice.
#[derive(Clone)]
pub struct TrackerHandle {
    tx: mpsc::Sender<TrackerRequest>,
    events: broadcast::Sender<RecordsChanged>,
    retry: RetryPolicy,
    timeout: Duration,
}

/// Failure of a single request attempt
#[derive(Debug)]
enum Attempt {
    NotDelivered,
    Failed(QuotaError),
}

impl std::fmt::Display for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Attempt::NotDelivered => write!(f, "request not delivered"),
            Attempt::Failed(e) => write!(f, "{}", e),
        }
    }
}

impl From<Attempt> for QuotaError {
    fn from(attempt: Attempt) -> Self {
        match attempt {
            Attempt::NotDelivered => QuotaError::ChannelClosed,
            Attempt::Failed(e) => e,
        }
    }
}

impl TrackerHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<RecordsChanged> {
        self.events.subscribe()
    }

    async fn attempt<T, F>(&self, make: &F) -> Result<T, Attempt>
    where
        F: Fn(Reply<T>) -> TrackerRequest,
    {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| Attempt::NotDelivered)?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result.map_err(Attempt::Failed),
            Ok(Err(_)) => Err(Attempt::Failed(QuotaError::ChannelClosed)),
            Err(_) => Err(Attempt::Failed(QuotaError::Timeout(self.timeout))),
        }
    }

    async fn request<T, F>(&self, make: F) -> Result<T, QuotaError>
    where
        F: Fn(Reply<T>) -> TrackerRequest,
    {
        let make = &make;
        retry_with_backoff(&self.retry, move || self.attempt(make), |a| match a {
            Attempt::NotDelivered => true,
            Attempt::Failed(e) => e.is_transient(),
        })
        .await
        .map_err(|e| e.last_error.into())
    }

    async fn request_once_delivered<T, F>(&self, make: F) -> Result<T, QuotaError>
    where
        F: Fn(Reply<T>) -> TrackerRequest,
    {
        let make = &make;
        retry_with_backoff(&self.retry, move || self.attempt(make), |a| {
            matches!(a, Attempt::NotDelivered)
        })
        .await
        .map_err(|e| e.last_error.into())
    }

    pub async fn banner_observed(
        &self,
        text: &str,
        model_hint: Option<&str>,
    ) -> Result<Option<String>, QuotaError> {
        self.request(|reply| TrackerRequest::BannerObserved {
            text: text.to_string(),
            model_hint: model_hint.map(str::to_string),
            reply,
        })
        .await
    }

    pub async fn model_displayed(&self, model: &str) -> Result<(), QuotaError> {
        self.request(|reply| TrackerRequest::ModelDisplayed {
            model: model.to_string(),
            reply,
        })
        .await
    }

    pub async fn api_call_completed(
        &self,
        model: Option<&str>,
    ) -> Result<Option<(String, UsageRecord)>, QuotaError> {
        self.request_once_delivered(|reply| TrackerRequest::ApiCallCompleted {
            model: model.map(str::to_string),
            reply,
        })
        .await
    }

    pub async fn set_manual_override(
        &self,
        model: &str,
        count: u32,
        until: i64,
    ) -> Result<UsageRecord, QuotaError> {
        self.request(|reply| TrackerRequest::SetManualOverride {
            model: model.to_string(),
            count,
            until,
            reply,
        })
        .await
    }

    pub async fn get_record(&self, model: &str) -> Result<Option<UsageRecord>, QuotaError> {
        self.request(|reply| TrackerRequest::GetRecord {
            model: model.to_string(),
            reply,
        })
        .await
    }

    pub async fn get_all_records(&self) -> Result<UsageRecords, QuotaError> {
        self.request(|reply| TrackerRequest::GetAllRecords { reply }).await
    }

    pub async fn get_usage(&self, model: &str) -> Result<UsageView, QuotaError> {
        self.request(|reply| TrackerRequest::GetUsage {
            model: model.to_string(),
            reply,
        })
        .await
    }

    /// Usage for display, degrading to the unknown sentinel on failure
    pub async fn usage_or_unknown(&self, model: &str) -> UsageView {
        match self.get_usage(model).await {
            Ok(view) => view,
            Err(e) => {
                log::warn!("[quota:tracker] Usage for '{}' unavailable: {}", model, e);
                UsageView::unknown(model)
            }
        }
    }

    pub async fn get_plan(&self) -> Result<PlanId, QuotaError> {
        self.request(|reply| TrackerRequest::GetPlan { reply }).await
    }

    pub async fn set_plan(&self, plan: PlanId) -> Result<(), QuotaError> {
        self.request(|reply| TrackerRequest::SetPlan {
            plan: plan.clone(),
            reply,
        })
        .await
    }

    pub async fn reset_all(&self) -> Result<usize, QuotaError> {
        self.request(|reply| TrackerRequest::ResetAll { reply }).await
    }

    pub async fn sweep(&self, kind: SweepKind) -> Result<SweepReport, QuotaError> {
        self.request(|reply| TrackerRequest::Sweep { kind, reply }).await
    }

    /// Ask the tracker task to stop; a stopped tracker is not an error
    pub async fn shutdown(&self) {
        if self.tx.send(TrackerRequest::Shutdown).await.is_err() {
            log::debug!("[quota:tracker] Shutdown requested but tracker already stopped");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
