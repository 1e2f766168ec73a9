use std::sync::Arc;

use crate::config::Config;
use crate::db::{PostRepo, ProfileRepo};
use crate::events::EventProducer;
use crate::services::{
    CreatorService, FeedService, InterestService, PostMetricsService, SessionLifecycle,
};
use crate::session::{SessionLocks, SessionStore};

/// Shared handler state: repos, the fast store, producers and services.
pub struct AppState {
    pub config: Arc<Config>,
    pub profiles: Arc<ProfileRepo>,
    pub posts: Arc<PostRepo>,
    pub sessions: SessionStore,
    pub locks: SessionLocks,
    pub interest: InterestService,
    pub creator: CreatorService,
    pub post_metrics: Arc<PostMetricsService>,
    pub lifecycle: Arc<SessionLifecycle>,
    pub feed: FeedService,
    pub engagement_producer: Arc<EventProducer>,
    pub score_producer: Arc<EventProducer>,
}
