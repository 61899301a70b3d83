//! Instance publisher behaviour against the SQLite stores

mod helpers;

use std::sync::Arc;

use helpers::*;

use sos_common::events::ProcessingEvent;
use sos_common::models::{Instance, ProviderScope, RunInfo, RunStatus};
use sos_processing::services::{ActivationError, PublishOutcome, PublisherState};
use sos_processing::store::InstanceStateStore;
use sos_processing::InstancePublisher;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn scope(ids: &[i32]) -> ProviderScope {
    ProviderScope::from_ids(ids.iter().copied()).unwrap()
}

fn successful_run(provider: i32, instance: Instance) -> RunInfo {
    let mut info = RunInfo::start(Uuid::new_v4(), provider, instance);
    info.finish(RunStatus::Success, 1, 0);
    info
}

/// A second publisher over the same database, as another process would have
fn fresh_publisher(env: &TestEnv) -> InstancePublisher {
    InstancePublisher::new(
        env.instance_store.clone(),
        env.run_info_store.clone(),
        env.event_bus.clone(),
    )
}

#[tokio::test]
async fn test_second_run_rejected_while_processing() {
    let env = setup().await;

    let ticket = env.publisher.begin_run(scope(&[ARTPORTALEN])).await.unwrap();
    assert_eq!(ticket.observed_active, Instance::Zero);
    assert_eq!(ticket.target, Instance::One);

    match env.publisher.begin_run(scope(&[ARTPORTALEN])).await {
        Err(ActivationError::RunInProgress(job_id)) => assert_eq!(job_id, ticket.job_id),
        other => panic!("expected RunInProgress, got {:?}", other),
    }
    assert!(matches!(
        env.publisher.retry_activation(scope(&[ARTPORTALEN])).await,
        Err(ActivationError::RunInProgress(_))
    ));
}

#[tokio::test]
async fn test_activate_without_run() {
    let env = setup().await;
    assert!(matches!(
        env.publisher.activate().await,
        Err(ActivationError::NoRunInProgress)
    ));
}

#[tokio::test]
async fn test_failed_run_cannot_be_activated() {
    let env = setup().await;
    let ticket = env.publisher.begin_run(scope(&[ARTPORTALEN, NORS])).await.unwrap();

    let outcome = env
        .publisher
        .complete_run(&ticket, &[successful_run(ARTPORTALEN, Instance::One)])
        .await
        .unwrap();
    assert_eq!(
        outcome,
        PublishOutcome::NotActivated {
            incomplete_provider_ids: vec![NORS],
        }
    );

    assert!(matches!(
        env.publisher.activate().await,
        Err(ActivationError::NotReady(job_id, _)) if job_id == ticket.job_id
    ));
    assert_eq!(env.instance_store.active_instance().await.unwrap(), Instance::Zero);

    // A failed run does not block the next one
    assert!(env.publisher.begin_run(scope(&[ARTPORTALEN])).await.is_ok());
}

#[tokio::test]
async fn test_activation_is_idempotent() {
    let env = setup().await;
    let ticket = env.publisher.begin_run(scope(&[ARTPORTALEN])).await.unwrap();
    let incomplete = env
        .publisher
        .stage_run(&ticket, &[successful_run(ARTPORTALEN, Instance::One)])
        .await
        .unwrap();
    assert!(incomplete.is_empty());

    // Someone else already flipped the indicator to our target
    env.instance_store.set(Instance::One).await.unwrap();

    assert_eq!(
        env.publisher.activate().await.unwrap(),
        PublishOutcome::AlreadyActive {
            active: Instance::One,
        }
    );
    assert_eq!(env.publisher.state().await, PublisherState::Idle);
    assert_eq!(env.instance_store.active_instance().await.unwrap(), Instance::One);
}

#[tokio::test]
async fn test_override_bypasses_checks() {
    let env = setup().await;
    let mut rx = env.event_bus.subscribe();

    let outcome = env.publisher.override_instance(Instance::One).await.unwrap();
    assert_eq!(
        outcome,
        PublishOutcome::Activated {
            previous: Instance::Zero,
            active: Instance::One,
        }
    );
    assert_eq!(env.instance_store.active_instance().await.unwrap(), Instance::One);

    match rx.try_recv().unwrap() {
        ProcessingEvent::ActiveInstanceChanged {
            previous,
            active,
            overridden,
            ..
        } => {
            assert_eq!(previous, Instance::Zero);
            assert_eq!(active, Instance::One);
            assert!(overridden);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_retry_activation_from_persisted_runs() {
    let env = setup().await;
    seed_provider(&env.pool, ARTPORTALEN, &[verbatim(ARTPORTALEN, "1", FOX)], RunStatus::Success).await;

    let first = env
        .job
        .run(scope(&[ARTPORTALEN]), env.sources(&[ARTPORTALEN]), true, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.target, Instance::One);

    let second = env
        .job
        .run(scope(&[ARTPORTALEN]), env.sources(&[ARTPORTALEN]), false, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.target, Instance::Zero);
    assert_eq!(env.instance_store.active_instance().await.unwrap(), Instance::One);

    let publisher = fresh_publisher(&env);
    assert_eq!(
        publisher.retry_activation(scope(&[ARTPORTALEN])).await.unwrap(),
        PublishOutcome::Activated {
            previous: Instance::One,
            active: Instance::Zero,
        }
    );

    // Generation One now holds the older run; it must not come back
    assert_eq!(
        publisher.retry_activation(scope(&[ARTPORTALEN])).await.unwrap(),
        PublishOutcome::NotActivated {
            incomplete_provider_ids: vec![ARTPORTALEN],
        }
    );
    assert_eq!(env.instance_store.active_instance().await.unwrap(), Instance::Zero);
}

#[tokio::test]
async fn test_retry_activation_needs_every_provider() {
    let env = setup().await;
    let publisher: Arc<InstancePublisher> = env.publisher.clone();

    assert_eq!(
        publisher.retry_activation(scope(&[ARTPORTALEN, NORS])).await.unwrap(),
        PublishOutcome::NotActivated {
            incomplete_provider_ids: vec![ARTPORTALEN, NORS],
        }
    );
    assert!(matches!(
        publisher.retry_activation(ProviderScope::empty()).await,
        Err(ActivationError::EmptyScope)
    ));
}

#[tokio::test]
async fn test_store_failure_during_activation_is_retryable() {
    let env = setup().await;
    let publisher = InstancePublisher::new(
        Arc::new(FlakyInstanceStore::new(env.instance_store.clone(), 1)),
        env.run_info_store.clone(),
        env.event_bus.clone(),
    );

    let ticket = publisher.begin_run(scope(&[ARTPORTALEN])).await.unwrap();
    let incomplete = publisher
        .stage_run(&ticket, &[successful_run(ARTPORTALEN, Instance::One)])
        .await
        .unwrap();
    assert!(incomplete.is_empty());

    assert!(matches!(publisher.activate().await, Err(ActivationError::Store(_))));
    assert_eq!(publisher.state().await, PublisherState::ReadyToActivate(ticket));
    assert_eq!(env.instance_store.active_instance().await.unwrap(), Instance::Zero);

    assert_eq!(
        publisher.activate().await.unwrap(),
        PublishOutcome::Activated {
            previous: Instance::Zero,
            active: Instance::One,
        }
    );
    assert_eq!(publisher.state().await, PublisherState::Idle);
    assert_eq!(env.instance_store.active_instance().await.unwrap(), Instance::One);
}
