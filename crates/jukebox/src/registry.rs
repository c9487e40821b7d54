//! Scope → subscription registry.
//!
//! Owned by whoever runs the bot and shared by cloning. Entries are added only
//! once a voice session is ready and removed on leave or transport teardown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use jukebox_types::{ScopeId, TransportState};
use uuid::Uuid;

use crate::config::DEFAULT_READY_TIMEOUT_MS;
use crate::error::TransportError;
use crate::events::EventBus;
use crate::media::MediaFetcher;
use crate::subscription::{self, SubscriptionHandle, WorkerDeps};
use crate::voice::{ChannelRef, VoiceGateway, wait_for_state};

type Entries = Mutex<HashMap<ScopeId, SubscriptionHandle>>;

/// Back-reference a worker uses to deregister itself.
#[derive(Clone, Default)]
pub(crate) struct RegistryLink {
    entries: Weak<Entries>,
}

impl RegistryLink {
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self::default()
    }

    /// Remove the entry for `scope` if it still belongs to subscription `id`.
    pub(crate) fn release(&self, scope: &ScopeId, id: Uuid) {
        let Some(entries) = self.entries.upgrade() else {
            return;
        };
        let mut entries = entries.lock().unwrap_or_else(|err| err.into_inner());
        if entries.get(scope).is_some_and(|handle| handle.id() == id) {
            entries.remove(scope);
            tracing::debug!(scope = %scope, subscription = %id, "subscription deregistered");
        }
    }
}

#[derive(Clone)]
pub struct SubscriptionRegistry {
    entries: Arc<Entries>,
    gateway: Arc<dyn VoiceGateway>,
    fetcher: Arc<dyn MediaFetcher>,
    events: EventBus,
    ready_timeout: Duration,
}

impl SubscriptionRegistry {
    pub fn new(
        gateway: Arc<dyn VoiceGateway>,
        fetcher: Arc<dyn MediaFetcher>,
        events: EventBus,
    ) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            gateway,
            fetcher,
            events,
            ready_timeout: Duration::from_millis(DEFAULT_READY_TIMEOUT_MS),
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ScopeId, SubscriptionHandle>> {
        self.entries.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Live subscription for `scope`, if any.
    pub fn get(&self, scope: &ScopeId) -> Option<SubscriptionHandle> {
        self.lock()
            .get(scope)
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    /// Return the subscription for the channel's scope, joining the voice
    /// channel and waiting for readiness if none exists yet.
    ///
    /// Nothing is registered unless the session became ready in time.
    pub async fn join(&self, channel: &ChannelRef) -> Result<SubscriptionHandle, TransportError> {
        if let Some(existing) = self.get(&channel.scope) {
            existing.wait_ready(self.ready_timeout).await?;
            return Ok(existing);
        }

        tracing::info!(scope = %channel.scope, channel = %channel.channel_id, "joining voice channel");
        let session = self.gateway.join(channel).await?;
        if let Err(err) = wait_for_state(session.as_ref(), TransportState::Ready, self.ready_timeout).await {
            tracing::warn!(scope = %channel.scope, error = %err, "voice session not ready; leaving");
            session.destroy();
            return Err(err);
        }
        let player = self.gateway.create_player(&session);

        let mut entries = self.lock();
        if let Some(existing) = entries.get(&channel.scope).filter(|h| !h.is_closed()) {
            // Lost a race with a concurrent join for the same scope.
            session.destroy();
            return Ok(existing.clone());
        }
        let handle = subscription::spawn(
            channel.clone(),
            session,
            player,
            WorkerDeps {
                fetcher: Arc::clone(&self.fetcher),
                events: self.events.clone(),
                registry: RegistryLink {
                    entries: Arc::downgrade(&self.entries),
                },
            },
        );
        entries.insert(channel.scope.clone(), handle.clone());
        drop(entries);
        self.events
            .subscription_created(&channel.scope, &channel.channel_id);
        Ok(handle)
    }

    /// Leave the scope's channel. Returns `false` if there was no subscription.
    pub async fn leave(&self, scope: &ScopeId) -> bool {
        let Some(handle) = self.remove(scope) else {
            return false;
        };
        if handle.leave().await.is_err() {
            tracing::debug!(scope = %scope, "subscription already closed");
        }
        true
    }

    /// Drop the registry entry without touching the subscription.
    pub fn remove(&self, scope: &ScopeId) -> Option<SubscriptionHandle> {
        self.lock().remove(scope)
    }

    pub fn scopes(&self) -> Vec<ScopeId> {
        let mut scopes: Vec<ScopeId> = self.lock().keys().cloned().collect();
        scopes.sort();
        scopes
    }

    /// Leave every channel.
    pub async fn shutdown(&self) {
        let handles: Vec<SubscriptionHandle> = self.lock().drain().map(|(_, handle)| handle).collect();
        for handle in handles {
            tracing::info!(scope = %handle.scope(), "leaving on shutdown");
            let _ = handle.leave().await;
        }
    }
}
