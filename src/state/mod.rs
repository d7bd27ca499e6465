/// Remote-console connection state machine.
pub mod console;
/// Parsed game events.
pub mod event;
/// Configuration snapshot and its validation.
pub mod snapshot;
/// Broadcast hub behind SSE streams.
pub mod sse;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{
    config::AppConfig,
    dao::file_store::FileStore,
    services::{
        banned_words::BannedWordFilter,
        chat_sink::{ChatSink, SseChatSink},
        config_store::{ConfigError, ConfigStore},
        console_pool::ConnectionPool,
        identity::IdentityIndex,
        ingress::SessionRegistry,
        notifier::Notifier,
        persistence::WriteBehindCache,
        reconciler::{Reconciler, Reloader},
        relay::ChatRelay,
    },
    state::event::IngressEvent,
};

pub use self::sse::SseHub;

/// Shared handle passed to every route and task.
pub type SharedState = Arc<AppState>;

/// Buffered events per delivery stream subscriber.
const DELIVERY_BUFFER: usize = 64;

/// Central application state wiring every bridge component together.
pub struct AppState {
    settings: AppConfig,
    config: Arc<ConfigStore>,
    identity: Arc<IdentityIndex>,
    pool: Arc<ConnectionPool>,
    registry: Arc<SessionRegistry>,
    banned_words: Arc<BannedWordFilter>,
    deliveries: Arc<SseHub>,
    notifier: Arc<Notifier>,
    reloader: Reloader,
    relay: ChatRelay,
}

impl AppState {
    /// Load the configuration from `store` and build every component.
    ///
    /// The returned receiver carries ingress events and must be handed to
    /// [`Notifier::spawn`]. Nothing is listening yet; see [`SessionRegistry::start`].
    pub async fn bootstrap(
        settings: AppConfig,
        store: Arc<dyn FileStore>,
    ) -> Result<(SharedState, mpsc::UnboundedReceiver<IngressEvent>), ConfigError> {
        let cache = Arc::new(WriteBehindCache::new(store, settings.flush_threshold));
        let config = Arc::new(ConfigStore::new(cache));
        let snapshot = config.init().await?;

        let identity = Arc::new(IdentityIndex::new(config.clone()));
        let pool = Arc::new(ConnectionPool::new(
            config.subscribe(),
            settings.connect_timeout,
        ));
        let banned_words = Arc::new(BannedWordFilter::new(snapshot.banned_words.clone()));

        let deliveries = Arc::new(SseHub::new(DELIVERY_BUFFER));
        let sink: Arc<dyn ChatSink> = Arc::new(SseChatSink::new(deliveries.clone()));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(SessionRegistry::new(pool.clone(), events_tx));

        let notifier = Arc::new(Notifier::new(
            config.clone(),
            identity.clone(),
            banned_words.clone(),
            sink,
            settings.status_delay,
        ));
        let reloader = Reloader::new(
            config.clone(),
            Reconciler::new(
                registry.clone(),
                pool.clone(),
                identity.clone(),
                banned_words.clone(),
            ),
        );
        let relay = ChatRelay::new(
            config.clone(),
            pool.clone(),
            identity.clone(),
            banned_words.clone(),
        );

        let state = Arc::new(Self {
            settings,
            config,
            identity,
            pool,
            registry,
            banned_words,
            deliveries,
            notifier,
            reloader,
            relay,
        });
        Ok((state, events_rx))
    }

    /// Process-level settings.
    pub fn settings(&self) -> &AppConfig {
        &self.settings
    }

    /// Owner of the effective configuration snapshot.
    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    /// Write-behind cache backing every persisted file.
    pub fn cache(&self) -> &Arc<WriteBehindCache> {
        self.config.cache()
    }

    /// Player identity index.
    pub fn identity(&self) -> &Arc<IdentityIndex> {
        &self.identity
    }

    /// Remote-console connection pool.
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Ingress session registry and listener.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Banned-word filter applied to relayed text.
    pub fn banned_words(&self) -> &Arc<BannedWordFilter> {
        &self.banned_words
    }

    /// Broadcast hub the chat bot subscribes to for group deliveries.
    pub fn deliveries(&self) -> &SseHub {
        &self.deliveries
    }

    /// Game event dispatcher.
    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Single-flight configuration reloader.
    pub fn reloader(&self) -> &Reloader {
        &self.reloader
    }

    /// Group → server relay.
    pub fn relay(&self) -> &ChatRelay {
        &self.relay
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_seeds_sample_configuration() {
        let (state, _events) = testing::state().await;
        let snapshot = state.config().current();
        assert_eq!(snapshot.servers[0].name, snapshot::DEFAULT_SERVER);
        assert_eq!(state.banned_words().word_count(), 1);
        assert!(state.pool().is_empty());
        assert!(!state.registry().is_running().await);
    }
}
