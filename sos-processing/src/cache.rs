//! Reader-side cache of the active generation
//!
//! Readers resolve the active instance through this cache instead of
//! reading the indicator per request. An entry is reloaded once it is
//! older than the refresh interval, and dropped immediately when an
//! activation is announced on the event bus.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sos_common::events::{EventBus, ProcessingEvent};
use sos_common::models::Instance;
use sos_common::Result;

use crate::store::InstanceStateStore;

pub struct ActiveInstanceCache {
    store: Arc<dyn InstanceStateStore>,
    refresh_interval: Duration,
    cached: RwLock<Option<(Instance, Instant)>>,
    event_bus: EventBus,
}

impl ActiveInstanceCache {
    pub fn new(
        store: Arc<dyn InstanceStateStore>,
        refresh_interval: Duration,
        event_bus: EventBus,
    ) -> Self {
        Self {
            store,
            refresh_interval,
            cached: RwLock::new(None),
            event_bus,
        }
    }

    /// Active instance, reloaded if missing or stale
    pub async fn get(&self) -> Result<Instance> {
        if let Some((instance, loaded_at)) = *self.cached.read().await {
            if loaded_at.elapsed() < self.refresh_interval {
                return Ok(instance);
            }
        }

        let mut cached = self.cached.write().await;
        // Another caller may have reloaded while we waited for the lock
        if let Some((instance, loaded_at)) = *cached {
            if loaded_at.elapsed() < self.refresh_interval {
                return Ok(instance);
            }
        }

        let instance = self.store.active_instance().await?;
        *cached = Some((instance, Instant::now()));
        Ok(instance)
    }

    /// Drop the cached value and announce it
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
        tracing::debug!("Active instance cache cleared");
        self.event_bus.emit_lossy(ProcessingEvent::CacheCleared {
            timestamp: Utc::now(),
        });
    }

    pub async fn is_cached(&self) -> bool {
        self.cached.read().await.is_some()
    }

    /// Invalidate on every `ActiveInstanceChanged` until cancelled
    ///
    /// The subscription is taken before returning, so activations that
    /// happen right after this call are not missed.
    pub fn spawn_invalidation_listener(
        self: &Arc<Self>,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let mut rx = self.event_bus.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(ProcessingEvent::ActiveInstanceChanged { active, .. }) => {
                            tracing::info!(active = %active, "Active instance changed, invalidating cache");
                            cache.invalidate().await;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // A missed activation cannot be ruled out
                            tracing::warn!(skipped, "Cache listener lagged, invalidating");
                            cache.invalidate().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }
}
