//! Instance Publisher
//!
//! Owns the active/inactive generation pointer. A run writes into the
//! generation that was inactive when it began; once every in-scope
//! provider succeeded, one compare-and-set flips the persisted indicator.
//! Readers therefore see either the previous generation or the complete
//! new one, never a partially written generation.
//!
//! State machine: `Idle -> Processing -> {ReadyToActivate | Failed}`.
//! A successful activation returns to `Idle`; a failed activation stays in
//! `ReadyToActivate` so that [`InstancePublisher::activate`] can be retried.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use sos_common::events::{EventBus, ProcessingEvent};
use sos_common::models::{Instance, ProviderScope, RunInfo};

use crate::store::{InstanceStateStore, RunInfoStore};

#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("a processing run is already in progress (job {0})")]
    RunInProgress(Uuid),

    #[error("provider scope is empty")]
    EmptyScope,

    #[error("no processing run to complete or activate")]
    NoRunInProgress,

    #[error("run {0} is not ready to activate: {1}")]
    NotReady(Uuid, String),

    #[error("active instance changed concurrently: expected {expected}, found {found}")]
    Conflict { expected: Instance, found: Instance },

    #[error(transparent)]
    Store(#[from] sos_common::Error),
}

/// Handle of one processing run against the inactive generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTicket {
    pub job_id: Uuid,
    /// Active generation observed when the run began
    pub observed_active: Instance,
    /// Generation the run writes to
    pub target: Instance,
    pub scope: ProviderScope,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublisherState {
    Idle,
    Processing(RunTicket),
    ReadyToActivate(RunTicket),
    Failed { ticket: RunTicket, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The indicator was flipped
    Activated { previous: Instance, active: Instance },
    /// The target generation was already active; nothing written
    AlreadyActive { active: Instance },
    /// Some in-scope providers have no successful run; indicator untouched
    NotActivated { incomplete_provider_ids: Vec<i32> },
}

pub struct InstancePublisher {
    instance_store: Arc<dyn InstanceStateStore>,
    run_info_store: Arc<dyn RunInfoStore>,
    event_bus: EventBus,
    state: Mutex<PublisherState>,
    /// Serializes every write of the indicator within this process
    activation_lock: Mutex<()>,
}

impl InstancePublisher {
    pub fn new(
        instance_store: Arc<dyn InstanceStateStore>,
        run_info_store: Arc<dyn RunInfoStore>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            instance_store,
            run_info_store,
            event_bus,
            state: Mutex::new(PublisherState::Idle),
            activation_lock: Mutex::new(()),
        }
    }

    pub async fn state(&self) -> PublisherState {
        self.state.lock().await.clone()
    }

    pub async fn active_instance(&self) -> Result<Instance, ActivationError> {
        Ok(self.instance_store.active_instance().await?)
    }

    /// Start a run writing to the currently inactive generation
    pub async fn begin_run(&self, scope: ProviderScope) -> Result<RunTicket, ActivationError> {
        if scope.is_empty() {
            return Err(ActivationError::EmptyScope);
        }
        let mut state = self.state.lock().await;

        match &*state {
            PublisherState::Processing(ticket) => {
                return Err(ActivationError::RunInProgress(ticket.job_id))
            }
            PublisherState::ReadyToActivate(ticket) => {
                tracing::warn!(
                    job_id = %ticket.job_id,
                    "Abandoning pending activation, new run started"
                );
            }
            PublisherState::Idle | PublisherState::Failed { .. } => {}
        }

        let observed_active = self.instance_store.active_instance().await?;
        let ticket = RunTicket {
            job_id: Uuid::new_v4(),
            observed_active,
            target: observed_active.other(),
            scope,
        };

        tracing::info!(
            job_id = %ticket.job_id,
            active = %observed_active,
            generation = %ticket.target,
            providers = ?scope.ids().collect::<Vec<_>>(),
            "Processing run begins against inactive generation"
        );

        *state = PublisherState::Processing(ticket.clone());
        Ok(ticket)
    }

    /// Finish a run: activate if every in-scope provider succeeded
    pub async fn complete_run(
        &self,
        ticket: &RunTicket,
        run_infos: &[RunInfo],
    ) -> Result<PublishOutcome, ActivationError> {
        let incomplete = self.stage_run(ticket, run_infos).await?;
        if !incomplete.is_empty() {
            return Ok(PublishOutcome::NotActivated {
                incomplete_provider_ids: incomplete,
            });
        }
        self.activate().await
    }

    /// Finish a run without activating it
    ///
    /// A complete run is left in `ReadyToActivate`; an incomplete one moves
    /// to `Failed`. Returns the in-scope providers lacking a successful run.
    pub async fn stage_run(
        &self,
        ticket: &RunTicket,
        run_infos: &[RunInfo],
    ) -> Result<Vec<i32>, ActivationError> {
        let mut state = self.state.lock().await;
        match &*state {
            PublisherState::Processing(current) if current == ticket => {}
            _ => return Err(ActivationError::NoRunInProgress),
        }

        let incomplete = incomplete_providers(ticket.scope, ticket.target, run_infos);
        if incomplete.is_empty() {
            *state = PublisherState::ReadyToActivate(ticket.clone());
        } else {
            tracing::warn!(
                job_id = %ticket.job_id,
                generation = %ticket.target,
                incomplete = ?incomplete,
                "Run incomplete, active instance unchanged"
            );
            *state = PublisherState::Failed {
                ticket: ticket.clone(),
                reason: format!("providers without a successful run: {:?}", incomplete),
            };
        }
        Ok(incomplete)
    }

    /// Activate the run waiting in `ReadyToActivate`
    ///
    /// Safe to call again after an error; once the indicator holds the
    /// target generation further calls are no-ops.
    pub async fn activate(&self) -> Result<PublishOutcome, ActivationError> {
        let ticket = match &*self.state.lock().await {
            PublisherState::ReadyToActivate(ticket) => ticket.clone(),
            PublisherState::Failed { ticket, reason } => {
                return Err(ActivationError::NotReady(ticket.job_id, reason.clone()))
            }
            PublisherState::Processing(ticket) => {
                return Err(ActivationError::NotReady(
                    ticket.job_id,
                    "run still processing".to_string(),
                ))
            }
            PublisherState::Idle => return Err(ActivationError::NoRunInProgress),
        };

        let outcome = self.swap(ticket.observed_active, ticket.target).await?;

        let mut state = self.state.lock().await;
        if *state == PublisherState::ReadyToActivate(ticket) {
            *state = PublisherState::Idle;
        }
        Ok(outcome)
    }

    /// Activate the inactive generation from persisted run metadata
    ///
    /// Used when the process that ran the job is gone. Every in-scope
    /// provider needs a successful run into the inactive generation that is
    /// newer than its latest run into the active one; otherwise the
    /// inactive generation holds older data and is left alone.
    pub async fn retry_activation(
        &self,
        scope: ProviderScope,
    ) -> Result<PublishOutcome, ActivationError> {
        if scope.is_empty() {
            return Err(ActivationError::EmptyScope);
        }
        if let PublisherState::Processing(ticket) = &*self.state.lock().await {
            return Err(ActivationError::RunInProgress(ticket.job_id));
        }

        let active = self.instance_store.active_instance().await?;
        let target = active.other();

        let target_runs = self.run_info_store.latest_run_infos(Some(target)).await?;
        let active_runs: HashMap<i32, RunInfo> = self
            .run_info_store
            .latest_run_infos(Some(active))
            .await?
            .into_iter()
            .map(|info| (info.data_provider_id, info))
            .collect();

        let fresh: Vec<RunInfo> = target_runs
            .into_iter()
            .filter(|info| {
                active_runs
                    .get(&info.data_provider_id)
                    .map_or(true, |previous| info.start > previous.start)
            })
            .collect();

        let incomplete = incomplete_providers(scope, target, &fresh);
        if !incomplete.is_empty() {
            tracing::info!(
                generation = %target,
                incomplete = ?incomplete,
                "Inactive generation not ready, nothing activated"
            );
            return Ok(PublishOutcome::NotActivated {
                incomplete_provider_ids: incomplete,
            });
        }

        self.swap(active, target).await
    }

    /// Operator escape hatch: set the indicator without any checks
    pub async fn override_instance(&self, instance: Instance) -> Result<PublishOutcome, ActivationError> {
        let _guard = self.activation_lock.lock().await;

        let previous = self.instance_store.active_instance().await?;
        self.instance_store.set(instance).await?;

        tracing::warn!(previous = %previous, active = %instance, "Active instance overridden");
        self.event_bus.emit_lossy(ProcessingEvent::ActiveInstanceChanged {
            previous,
            active: instance,
            overridden: true,
            timestamp: Utc::now(),
        });

        Ok(PublishOutcome::Activated {
            previous,
            active: instance,
        })
    }

    /// Single compare-and-set of the indicator from `expected` to `target`
    async fn swap(&self, expected: Instance, target: Instance) -> Result<PublishOutcome, ActivationError> {
        let _guard = self.activation_lock.lock().await;

        if self.instance_store.compare_and_set(expected, target).await? {
            tracing::info!(previous = %expected, active = %target, "Active instance switched");
            self.event_bus.emit_lossy(ProcessingEvent::ActiveInstanceChanged {
                previous: expected,
                active: target,
                overridden: false,
                timestamp: Utc::now(),
            });
            return Ok(PublishOutcome::Activated {
                previous: expected,
                active: target,
            });
        }

        let found = self.instance_store.active_instance().await?;
        if found == target {
            tracing::debug!(active = %target, "Target generation already active");
            Ok(PublishOutcome::AlreadyActive { active: target })
        } else {
            Err(ActivationError::Conflict { expected, found })
        }
    }
}

/// In-scope provider ids lacking a successful run into `target`
///
/// The latest run per provider counts. An empty scope is never complete,
/// since activating it would publish an empty generation.
pub fn incomplete_providers(scope: ProviderScope, target: Instance, run_infos: &[RunInfo]) -> Vec<i32> {
    let mut latest: HashMap<i32, &RunInfo> = HashMap::new();
    for info in run_infos.iter().filter(|info| info.instance == target) {
        latest
            .entry(info.data_provider_id)
            .and_modify(|current| {
                if info.start > current.start {
                    *current = info;
                }
            })
            .or_insert(info);
    }

    scope
        .ids()
        .filter(|id| !latest.get(id).is_some_and(|info| info.is_success()))
        .collect()
}

pub fn is_scope_complete(scope: ProviderScope, target: Instance, run_infos: &[RunInfo]) -> bool {
    !scope.is_empty() && incomplete_providers(scope, target, run_infos).is_empty()
}
