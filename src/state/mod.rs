use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;
use sea_orm::DatabaseConnection;

use crate::config::CacheConfig;
use crate::polls::scheduler::SchedulerStatus;
use crate::polls::service::{PollService, SuggestionPolls};

#[derive(Clone)]
pub struct AppState {
    pub database: DatabaseConnection,
    pub cache: Arc<ApiCache>,
    pub polls: PollService,
    pub scheduler_status: Arc<SchedulerStatus>,
    pub scheduler_enabled: bool,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        database: DatabaseConnection,
        cache: Arc<ApiCache>,
        polls: PollService,
        scheduler_status: Arc<SchedulerStatus>,
        scheduler_enabled: bool,
    ) -> Self {
        assert!(
            cache.poll_capacity >= 10,
            "Poll cache capacity must be configured"
        );
        Self {
            database,
            cache,
            polls,
            scheduler_status,
            scheduler_enabled,
            start_time: Instant::now(),
        }
    }
}

pub struct ApiCache {
    /// Viewer-independent poll lists keyed by suggestion id.
    pub poll_lists: Cache<i32, Arc<SuggestionPolls>>,
    pub poll_capacity: u64,
}

impl ApiCache {
    pub fn new(config: &CacheConfig) -> Self {
        assert!(
            config.polls_max_capacity >= 10,
            "Poll cache capacity threshold"
        );

        let poll_lists = Cache::builder()
            .max_capacity(config.polls_max_capacity)
            .time_to_live(Duration::from_secs(config.polls_ttl_seconds))
            .time_to_idle(Duration::from_secs(config.polls_ttl_seconds / 2 + 1))
            .build();

        Self {
            poll_lists,
            poll_capacity: config.polls_max_capacity,
        }
    }
}
