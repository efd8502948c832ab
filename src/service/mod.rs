pub mod stats_api;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use crate::filter::CanonicalQuery;

/// A video as returned by the search and proxy endpoints.
///
/// Only the fields the dashboard reads are typed; everything else is kept
/// verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub topic_id: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub available_at: Option<String>,
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One page of a stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub items: Vec<Video>,
    #[serde(deserialize_with = "de_total")]
    pub total: u64,
}

/// The proxy passes `total` through as-is and it is sometimes a string.
fn de_total<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Total {
        Number(u64),
        Text(String),
    }

    match Total::deserialize(deserializer)? {
        Total::Number(n) => Ok(n),
        Total::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Aggregate statistic requested from `/api/stats/*`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "year")]
pub enum StatsKind {
    Yearly,
    Monthly(i32),
    YearlyMembership,
    Membership(i32),
    Collab,
    YearlyCollab(i32),
    Topic,
    YearlyTopic(i32),
}

impl StatsKind {
    pub fn path(self) -> &'static str {
        match self {
            StatsKind::Yearly => "/api/stats/yearly",
            StatsKind::Monthly(_) => "/api/stats/monthly",
            StatsKind::YearlyMembership => "/api/stats/yearly-membership",
            StatsKind::Membership(_) => "/api/stats/membership",
            StatsKind::Collab => "/api/stats/collab",
            StatsKind::YearlyCollab(_) => "/api/stats/yearly-collab",
            StatsKind::Topic => "/api/stats/topic",
            StatsKind::YearlyTopic(_) => "/api/stats/yearly-topic",
        }
    }

    pub fn year(self) -> Option<i32> {
        match self {
            StatsKind::Monthly(y)
            | StatsKind::Membership(y)
            | StatsKind::YearlyCollab(y)
            | StatsKind::YearlyTopic(y) => Some(y),
            _ => None,
        }
    }

    /// Sequencer stream of the panel this statistic feeds.
    ///
    /// All-time and per-year variants of one ranking share a panel, so
    /// switching between them supersedes the older request.
    pub fn stream_name(self) -> &'static str {
        match self {
            StatsKind::Yearly => "stats.years",
            StatsKind::Monthly(_) => "stats.months",
            StatsKind::YearlyMembership => "stats.membership_years",
            StatsKind::Membership(_) => "stats.membership_months",
            StatsKind::Collab | StatsKind::YearlyCollab(_) => "stats.collab",
            StatsKind::Topic | StatsKind::YearlyTopic(_) => "stats.topics",
        }
    }
}

impl std::str::FromStr for StatsKind {
    type Err = anyhow::Error;

    /// Parses `"yearly"`, `"monthly:2024"` and friends.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, year) = match s.split_once(':') {
            Some((name, year)) => (name, Some(year.trim().parse::<i32>()?)),
            None => (s, None),
        };
        let need_year = || year.ok_or_else(|| anyhow::anyhow!("Statistic '{}' needs a year", name));

        match name.trim().to_lowercase().as_str() {
            "yearly" => Ok(StatsKind::Yearly),
            "monthly" => Ok(StatsKind::Monthly(need_year()?)),
            "yearly-membership" => Ok(StatsKind::YearlyMembership),
            "membership" => Ok(StatsKind::Membership(need_year()?)),
            "collab" => Ok(match year {
                Some(y) => StatsKind::YearlyCollab(y),
                None => StatsKind::Collab,
            }),
            "topic" => Ok(match year {
                Some(y) => StatsKind::YearlyTopic(y),
                None => StatsKind::Topic,
            }),
            _ => Err(anyhow::anyhow!("Unknown statistic: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatsQuery {
    pub channel_id: String,
    pub kind: StatsKind,
}

impl StatsQuery {
    pub fn new(channel_id: impl Into<String>, kind: StatsKind) -> Self {
        Self {
            channel_id: channel_id.into(),
            kind,
        }
    }

    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("channel_id", self.channel_id.clone())];
        if let Some(year) = self.kind.year() {
            pairs.push(("year", year.to_string()));
        }
        pairs
    }

    pub fn key(&self) -> String {
        let query = self
            .pairs()
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(&v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.kind.path(), query)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearCount {
    /// `None` for rows without a usable date
    pub year: Option<String>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthCount {
    pub month: u8,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollabCount {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub photo: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicCount {
    pub topic: String,
    pub count: u64,
}

/// Decoded statistics payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "shape", content = "items")]
pub enum Stats {
    Years(Vec<YearCount>),
    Months(Vec<MonthCount>),
    Collaborators(Vec<CollabCount>),
    Topics(Vec<TopicCount>),
}

impl Stats {
    pub fn len(&self) -> usize {
        match self {
            Stats::Years(items) => items.len(),
            Stats::Months(items) => items.len(),
            Stats::Collaborators(items) => items.len(),
            Stats::Topics(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Server-side sync progress
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub last_sync_time: Option<i64>,
    pub total_channels: u64,
    pub synced_channels: u64,
    pub current_channel: Option<String>,
    pub total_videos: u64,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub full_sync: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<ChannelRef>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Started,
    AlreadyRunning,
}

/// Channel metadata from the proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub english_name: Option<String>,
    #[serde(default)]
    pub photo: Option<String>,
    #[serde(default)]
    pub video_count: Option<String>,
    #[serde(default)]
    pub subscriber_count: Option<String>,
}

/// The stats backend seen by the dashboard.
///
/// Implementations only do I/O: no caching, retries or sequencing.
#[async_trait]
pub trait StatsBackend: Send + Sync {
    /// Fetch one page of the query's stream
    async fn fetch_page(&self, query: &CanonicalQuery) -> Result<Page>;

    /// Fetch one aggregate statistic
    async fn fetch_stats(&self, query: &StatsQuery) -> Result<Stats>;

    async fn sync_status(&self) -> Result<SyncStatus>;

    async fn trigger_sync(&self, request: &SyncRequest) -> Result<SyncTrigger>;

    /// Ask the server to stop the running sync. Not an error when idle.
    async fn cancel_sync(&self) -> Result<()>;

    async fn channel_info(&self, channel_id: &str) -> Result<ChannelInfo>;

    /// Icon URL for a channel that has no photo in its info
    fn channel_icon_url(&self, channel_id: &str) -> String;
}

pub use stats_api::StatsApiClient;
