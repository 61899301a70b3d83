//! Processing Job
//!
//! One run over a provider scope: reserve the inactive generation, run
//! every in-scope provider concurrently into it, then hand the RunInfos
//! to the publisher.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use sos_common::events::{EventBus, ProcessingEvent};
use sos_common::models::{Instance, ProviderScope, RunInfo, RunStatus};

use crate::error::ProcessingResult;
use crate::services::batch_processor::BatchProcessor;
use crate::services::instance_publisher::{InstancePublisher, PublishOutcome};
use crate::store::VerbatimSource;

/// Result of one processing job
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: Uuid,
    /// Generation the job wrote to
    pub target: Instance,
    /// One RunInfo per in-scope provider, ordered by provider id
    pub run_infos: Vec<RunInfo>,
    /// `None` when activation was deferred
    pub publish: Option<PublishOutcome>,
}

impl JobOutcome {
    /// True if `target` is the active generation after the job
    pub fn is_active(&self) -> bool {
        matches!(
            self.publish,
            Some(PublishOutcome::Activated { .. }) | Some(PublishOutcome::AlreadyActive { .. })
        )
    }

    pub fn failed_provider_ids(&self) -> Vec<i32> {
        self.run_infos
            .iter()
            .filter(|info| !info.is_success())
            .map(|info| info.data_provider_id)
            .collect()
    }
}

pub struct ProcessingJob {
    processor: Arc<BatchProcessor>,
    publisher: Arc<InstancePublisher>,
    event_bus: EventBus,
}

impl ProcessingJob {
    pub fn new(
        processor: Arc<BatchProcessor>,
        publisher: Arc<InstancePublisher>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            processor,
            publisher,
            event_bus,
        }
    }

    pub fn publisher(&self) -> &Arc<InstancePublisher> {
        &self.publisher
    }

    /// Process `scope` from `sources` into the inactive generation
    ///
    /// With `activate` false a complete run is staged but the indicator is
    /// left alone; [`InstancePublisher::activate`] or
    /// [`InstancePublisher::retry_activation`] can flip it later.
    pub async fn run(
        &self,
        scope: ProviderScope,
        sources: Vec<Arc<dyn VerbatimSource>>,
        activate: bool,
        cancel_token: &CancellationToken,
    ) -> ProcessingResult<JobOutcome> {
        let sources = select_sources(scope, sources);
        let ticket = self.publisher.begin_run(scope).await?;
        let target = ticket.target;

        self.event_bus.emit_lossy(ProcessingEvent::JobStarted {
            job_id: ticket.job_id,
            instance: target,
            provider_ids: scope.ids().collect(),
            timestamp: Utc::now(),
        });

        let mut run_infos: Vec<RunInfo> = scope
            .ids()
            .filter(|id| !sources.contains_key(id))
            .map(|id| {
                tracing::error!(provider_id = id, "No verbatim source for provider in scope");
                let mut info = RunInfo::start(Uuid::new_v4(), id, target);
                info.fail("no verbatim source configured", 0, 0);
                info
            })
            .collect();

        let processor = &self.processor;
        let concurrency = sources.len().max(1);
        let completed: Vec<RunInfo> = stream::iter(sources.into_values())
            .map(|source| async move {
                processor
                    .run_provider(Uuid::new_v4(), source.as_ref(), target, cancel_token)
                    .await
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        run_infos.extend(completed);
        run_infos.sort_by_key(|info| info.data_provider_id);

        let succeeded = run_infos.iter().filter(|info| info.is_success()).count();
        let canceled = run_infos
            .iter()
            .filter(|info| info.status == RunStatus::Canceled)
            .count();
        tracing::info!(
            job_id = %ticket.job_id,
            generation = %target,
            succeeded,
            canceled,
            failed = run_infos.len() - succeeded - canceled,
            "Provider runs finished"
        );

        let publish = if activate {
            Some(self.publisher.complete_run(&ticket, &run_infos).await?)
        } else {
            let incomplete = self.publisher.stage_run(&ticket, &run_infos).await?;
            if incomplete.is_empty() {
                tracing::info!(
                    job_id = %ticket.job_id,
                    generation = %target,
                    "Run complete, activation deferred"
                );
            }
            None
        };

        Ok(JobOutcome {
            job_id: ticket.job_id,
            target,
            run_infos,
            publish,
        })
    }
}

/// Keep one source per in-scope provider
fn select_sources(
    scope: ProviderScope,
    sources: Vec<Arc<dyn VerbatimSource>>,
) -> BTreeMap<i32, Arc<dyn VerbatimSource>> {
    let mut selected = BTreeMap::new();
    for source in sources {
        let id = source.data_provider_id();
        if !scope.contains(id) {
            tracing::debug!(provider_id = id, "Source outside scope skipped");
            continue;
        }
        if selected.contains_key(&id) {
            tracing::warn!(provider_id = id, "Duplicate source for provider ignored");
            continue;
        }
        selected.insert(id, source);
    }
    selected
}
