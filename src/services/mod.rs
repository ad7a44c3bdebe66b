pub mod analytics;
pub mod fanout;
pub mod liveness;
pub mod notifications;
pub mod probe;
pub mod sessions;
pub mod social;

pub use analytics::AnalyticsService;
pub use fanout::FanoutService;
pub use liveness::LivenessService;
pub use notifications::NotificationService;
pub use probe::{HttpManifestProbe, LiveStatus, ManifestProbe};
pub use sessions::SessionService;
pub use social::SocialService;
