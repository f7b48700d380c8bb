use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NewsKind {
    /// Broadcast channels, mostly news desks.
    Channel,
    /// Community group chatter.
    Group,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub channel: String,
    pub text: String,
    pub kind: NewsKind,
    pub date: DateTime<Utc>,
}
