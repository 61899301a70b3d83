//! Concurrent activation and cache invalidation

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::*;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use sos_common::events::ProcessingEvent;
use sos_common::models::{Instance, ProviderScope, RunInfo, RunStatus};
use sos_processing::cache::ActiveInstanceCache;
use sos_processing::services::PublishOutcome;
use sos_processing::InstancePublisher;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_activation_flips_once() {
    let env = setup().await;
    let scope = ProviderScope::from_ids([ARTPORTALEN]).unwrap();

    // Several publishers, as separate processes would hold, all staged for 0 -> 1
    let mut publishers = Vec::new();
    for _ in 0..8 {
        let publisher = Arc::new(InstancePublisher::new(
            env.instance_store.clone(),
            env.run_info_store.clone(),
            env.event_bus.clone(),
        ));
        let ticket = publisher.begin_run(scope).await.unwrap();
        let mut run = RunInfo::start(Uuid::new_v4(), ARTPORTALEN, ticket.target);
        run.finish(RunStatus::Success, 1, 0);
        assert!(publisher.stage_run(&ticket, &[run]).await.unwrap().is_empty());
        publishers.push(publisher);
    }

    let mut join_set = JoinSet::new();
    for publisher in publishers {
        join_set.spawn(async move { publisher.activate().await });
    }

    let mut activated = 0;
    let mut already_active = 0;
    while let Some(result) = join_set.join_next().await {
        match result.unwrap().unwrap() {
            PublishOutcome::Activated { previous, active } => {
                assert_eq!((previous, active), (Instance::Zero, Instance::One));
                activated += 1;
            }
            PublishOutcome::AlreadyActive { active } => {
                assert_eq!(active, Instance::One);
                already_active += 1;
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    assert_eq!(activated, 1);
    assert_eq!(already_active, 7);
    assert_eq!(env.publisher.active_instance().await.unwrap(), Instance::One);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_activation_invalidates_reader_cache() {
    let env = setup().await;
    seed_provider(&env.pool, ARTPORTALEN, &[verbatim(ARTPORTALEN, "1", FOX)], RunStatus::Success).await;

    let cache = Arc::new(ActiveInstanceCache::new(
        env.instance_store.clone(),
        Duration::from_secs(3600),
        env.event_bus.clone(),
    ));
    let cancel_token = CancellationToken::new();
    let listener = cache.spawn_invalidation_listener(cancel_token.clone());
    let mut rx = env.event_bus.subscribe();

    assert_eq!(cache.get().await.unwrap(), Instance::Zero);

    let outcome = env
        .job
        .run(
            ProviderScope::from_ids([ARTPORTALEN]).unwrap(),
            env.sources(&[ARTPORTALEN]),
            true,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(outcome.is_active());

    let cleared = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(ProcessingEvent::CacheCleared { .. }) = rx.recv().await {
                break;
            }
        }
    })
    .await;
    assert!(cleared.is_ok(), "cache was not cleared after activation");
    assert_eq!(cache.get().await.unwrap(), Instance::One);

    cancel_token.cancel();
    listener.await.unwrap();
}
