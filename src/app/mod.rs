pub mod state;
mod sync;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::Config;
use crate::entity_cache::EntityCache;
use crate::filter::{CanonicalQuery, FilterCompiler};
use crate::poller::{Poller, Visibility};
use crate::response_cache::{CacheStats, ResponseCache};
use crate::sequencer::{RequestSequencer, Settled};
use crate::service::{ChannelInfo, Page, Stats, StatsApiClient, StatsBackend, StatsQuery};

pub use state::{
    ActiveView, ContentType, MatchMode, StateStore, Stream, ViewState, ViewStatePatch,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Diagnostics exposed to the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub pages: CacheStats,
    pub stats: CacheStats,
    pub state_version: u64,
}

/// One dashboard session.
///
/// Owns the view state, the response caches and the request sequencers.
/// Everything is constructed explicitly, so independent sessions (and
/// tests) never share state. Locks are never held across an `.await`.
pub struct Dashboard {
    config: Config,
    backend: Arc<dyn StatsBackend>,
    compiler: FilterCompiler,
    store: Mutex<StateStore>,
    pages: Arc<Mutex<ResponseCache<Page>>>,
    stats: Arc<Mutex<ResponseCache<Stats>>>,
    page_requests: RequestSequencer<Page>,
    stats_requests: RequestSequencer<Stats>,
    channel_info: Option<Mutex<EntityCache<ChannelInfo>>>,
    icons: Option<Mutex<EntityCache<String>>>,
}

impl Dashboard {
    pub fn new(config: Config, backend: Arc<dyn StatsBackend>) -> Self {
        let max_entries = config.cache.max_entries;

        Self {
            compiler: FilterCompiler::new(config.paging.page_size),
            store: Mutex::new(StateStore::new()),
            pages: Arc::new(Mutex::new(ResponseCache::new(max_entries))),
            stats: Arc::new(Mutex::new(ResponseCache::new(max_entries))),
            page_requests: RequestSequencer::new(),
            stats_requests: RequestSequencer::new(),
            channel_info: None,
            icons: None,
            backend,
            config,
        }
    }

    /// Build a session talking HTTP to the configured server
    pub fn from_config(config: Config) -> Result<Self> {
        let client = StatsApiClient::new(&config.api)?;
        let mut dashboard = Self::new(config, Arc::new(client));

        if dashboard.config.cache.persist_entities {
            let info_ttl = chrono::Duration::hours(dashboard.config.cache.channel_info_ttl_hours);
            let icon_ttl = chrono::Duration::days(dashboard.config.cache.icon_ttl_days);

            match (
                EntityCache::open("channels", info_ttl),
                EntityCache::open("icons", icon_ttl),
            ) {
                (Ok(mut info), Ok(mut icons)) => {
                    match (info.clear_expired(), icons.clear_expired()) {
                        (Ok(a), Ok(b)) if a + b > 0 => {
                            tracing::debug!("Removed {} expired entity files", a + b);
                        }
                        (Err(e), _) | (_, Err(e)) => {
                            tracing::debug!("Entity cache cleanup failed: {:#}", e);
                        }
                        _ => {}
                    }
                    dashboard = dashboard.with_entity_caches(info, icons);
                }
                (Err(e), _) | (_, Err(e)) => {
                    tracing::warn!("Entity caches disabled: {:#}", e);
                }
            }
        }

        Ok(dashboard)
    }

    pub fn with_entity_caches(
        mut self,
        channel_info: EntityCache<ChannelInfo>,
        icons: EntityCache<String>,
    ) -> Self {
        self.channel_info = Some(Mutex::new(channel_info));
        self.icons = Some(Mutex::new(icons));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // === State ===

    pub fn view(&self) -> Arc<ViewState> {
        lock(&self.store).read()
    }

    pub fn update(&self, patch: ViewStatePatch) -> Arc<ViewState> {
        lock(&self.store).update(patch)
    }

    pub fn reset(&self) -> Arc<ViewState> {
        lock(&self.store).reset()
    }

    pub fn state_version(&self) -> u64 {
        lock(&self.store).version()
    }

    /// Canonical query for the current page of `stream`
    pub fn query(&self, stream: Stream) -> CanonicalQuery {
        self.compiler.compile(&self.view(), stream)
    }

    // === Loading ===

    /// Load the current page of `stream`.
    ///
    /// Served from cache when possible. Otherwise the request goes through the
    /// stream's sequencer and the result is only returned as fresh if no
    /// newer load was started on the same stream in the meantime. Failures
    /// come back as [`Settled::Failed`] and never touch the view state.
    pub async fn load(&self, stream: Stream) -> Settled<Page> {
        let query = self.query(stream);
        let key = query.key();

        let cached = lock(&self.pages).get(&key);
        if let Some(page) = cached {
            // Anything still pending on this stream is older than this result
            self.page_requests.supersede(stream.name());
            tracing::debug!("Cache hit for {}", key);
            return Settled::Fresh(page);
        }
        tracing::debug!("Cache miss for {}", key);

        let backend = Arc::clone(&self.backend);
        let cache = Arc::clone(&self.pages);
        let ttl = self.config.cache.ttl_for(stream);
        let cache_key = key.clone();

        let ticket = self.page_requests.dispatch(stream.name(), &key, move || async move {
            let page = backend.fetch_page(&query).await?;
            lock(&cache).put(cache_key, page.clone(), ttl);
            Ok(page)
        });

        let outcome = ticket.settle().await;
        if let Settled::Failed(ref e) = outcome {
            tracing::warn!("Loading {} failed: {:#}", stream, e);
        }
        outcome
    }

    /// Load one statistics panel, with the same cache and sequencing rules as
    /// [`Dashboard::load`]
    pub async fn load_stats(&self, query: StatsQuery) -> Settled<Stats> {
        let key = query.key();
        let stream = query.kind.stream_name();

        let cached = lock(&self.stats).get(&key);
        if let Some(stats) = cached {
            self.stats_requests.supersede(stream);
            tracing::debug!("Cache hit for {}", key);
            return Settled::Fresh(stats);
        }

        let backend = Arc::clone(&self.backend);
        let cache = Arc::clone(&self.stats);
        let ttl = self.config.cache.stats_ttl();
        let cache_key = key.clone();

        let ticket = self.stats_requests.dispatch(stream, &key, move || async move {
            let stats = backend.fetch_stats(&query).await?;
            lock(&cache).put(cache_key, stats.clone(), ttl);
            Ok(stats)
        });

        let outcome = ticket.settle().await;
        if let Settled::Failed(ref e) = outcome {
            tracing::warn!("Loading {} failed: {:#}", stream, e);
        }
        outcome
    }

    pub fn cache_stats(&self) -> DashboardStats {
        DashboardStats {
            pages: lock(&self.pages).stats(),
            stats: lock(&self.stats).stats(),
            state_version: self.state_version(),
        }
    }

    /// Forget every cached page and statistic
    pub fn invalidate_caches(&self) {
        lock(&self.pages).clear();
        lock(&self.stats).clear();
    }

    // === Channel lookups ===

    pub async fn channel_info(&self, channel_id: &str) -> Result<ChannelInfo> {
        if let Some(cache) = &self.channel_info {
            let cached = lock(cache).get(channel_id);
            if let Some(info) = cached {
                return Ok(info);
            }
        }

        let info = self
            .backend
            .channel_info(channel_id)
            .await
            .with_context(|| format!("Failed to load channel {}", channel_id))?;

        if let Some(cache) = &self.channel_info {
            lock(cache).insert(channel_id, info.clone());
        }
        Ok(info)
    }

    /// Icon URL for a channel, falling back to the server's image proxy
    pub async fn channel_icon(&self, channel_id: &str) -> String {
        if let Some(cache) = &self.icons {
            let cached = lock(cache).get(channel_id);
            if let Some(url) = cached {
                return url;
            }
        }

        let url = match self.channel_info(channel_id).await {
            Ok(ChannelInfo {
                photo: Some(photo),
                ..
            }) if !photo.is_empty() => photo,
            Ok(_) => self.backend.channel_icon_url(channel_id),
            Err(e) => {
                tracing::debug!("Icon lookup for {} failed: {:#}", channel_id, e);
                return self.backend.channel_icon_url(channel_id);
            }
        };

        if let Some(cache) = &self.icons {
            lock(cache).insert(channel_id, url.clone());
        }
        url
    }

    // === Background work ===

    /// Start live auto-refresh and sync status polling.
    ///
    /// The returned pollers stop when dropped.
    pub fn start_polling(self: &Arc<Self>, visibility: &Visibility) -> Vec<Poller> {
        let live_period = Duration::from_secs(self.config.polling.live_refresh_secs.max(1));
        let sync_period = Duration::from_secs(self.config.polling.sync_status_secs.max(1));

        let dashboard = Arc::clone(self);
        let live = Poller::spawn("live-refresh", live_period, visibility, move || {
            let dashboard = Arc::clone(&dashboard);
            async move {
                if dashboard.view().active_view != ActiveView::Live {
                    return;
                }
                if let Settled::Fresh(page) = dashboard.load(Stream::Live).await {
                    tracing::info!("Live refresh: {} streams", page.items.len());
                }
            }
        });

        let dashboard = Arc::clone(self);
        let sync = Poller::spawn("sync-status", sync_period, visibility, move || {
            let dashboard = Arc::clone(&dashboard);
            async move {
                if let Err(e) = dashboard.refresh_sync_status().await {
                    tracing::debug!("Sync status poll failed: {:#}", e);
                }
            }
        });

        vec![live, sync]
    }
}
