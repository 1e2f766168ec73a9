pub mod creator;
pub mod feed;
pub mod interest;
pub mod merge;
pub mod post_metrics;
pub mod profile_access;
pub mod session_lifecycle;

pub use creator::CreatorService;
pub use feed::FeedService;
pub use interest::InterestService;
pub use post_metrics::PostMetricsService;
pub use session_lifecycle::SessionLifecycle;
