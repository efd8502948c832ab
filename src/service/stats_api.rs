use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client as HttpClient, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use super::{
    ChannelInfo, CollabCount, MonthCount, Page, Stats, StatsBackend, StatsKind, StatsQuery,
    SyncRequest, SyncStatus, SyncTrigger, TopicCount, Video, YearCount,
};
use crate::app::state::Stream;
use crate::config::ApiConfig;
use crate::filter::CanonicalQuery;

const API_KEY_HEADER: &str = "X-APIKEY";

#[derive(Debug, Deserialize)]
struct ItemsResponse<T> {
    items: Vec<T>,
}

/// Proxied endpoints answer with a bare list unless `paginated` is honoured
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PageResponse {
    Paged(Page),
    List(Vec<Video>),
}

impl From<PageResponse> for Page {
    fn from(response: PageResponse) -> Self {
        match response {
            PageResponse::Paged(page) => page,
            PageResponse::List(items) => Page {
                total: items.len() as u64,
                items,
            },
        }
    }
}

fn owned(pairs: Vec<(&str, &str)>) -> Vec<(String, String)> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// HTTP client for the stats server
pub struct StatsApiClient {
    base_url: String,
    api_key: Option<String>,
    http_client: HttpClient,
}

impl StatsApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn with_key(&self, request: RequestBuilder) -> RequestBuilder {
        match self.api_key {
            Some(ref key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    /// Path and parameters for one page of a stream
    fn page_request(&self, query: &CanonicalQuery) -> Result<(String, Vec<(String, String)>)> {
        match query.stream {
            Stream::Archive => Ok((self.url("/api/search"), owned(query.pairs()))),
            Stream::Live => Ok((self.url("/api/v2/live"), owned(query.pairs()))),
            Stream::Clips => {
                let id = query
                    .channel_id()
                    .ok_or_else(|| anyhow!("Clips need an active channel"))?;
                let mut pairs: Vec<_> = query
                    .pairs()
                    .into_iter()
                    .filter(|(name, _)| *name != "channel_id")
                    .collect();
                pairs.push(("paginated", "1"));
                let path = format!("/api/v2/channels/{}/clips", urlencoding::encode(id));
                Ok((self.url(&path), owned(pairs)))
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, params: &[(String, String)]) -> Result<T> {
        let response = self
            .with_key(self.http_client.get(url))
            .query(params)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        if !response.status().is_success() {
            return Err(anyhow!("{} failed with status: {}", url, response.status()));
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to decode response from {}", url))
    }
}

#[async_trait]
impl StatsBackend for StatsApiClient {
    async fn fetch_page(&self, query: &CanonicalQuery) -> Result<Page> {
        let (url, params) = self.page_request(query)?;
        let response: PageResponse = self.get_json(&url, &params).await?;
        Ok(response.into())
    }

    async fn fetch_stats(&self, query: &StatsQuery) -> Result<Stats> {
        let url = self.url(query.kind.path());
        let params: Vec<(String, String)> = query
            .pairs()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let stats = match query.kind {
            StatsKind::Yearly | StatsKind::YearlyMembership => {
                let body: ItemsResponse<YearCount> = self.get_json(&url, &params).await?;
                Stats::Years(body.items)
            }
            StatsKind::Monthly(_) | StatsKind::Membership(_) => {
                let body: ItemsResponse<MonthCount> = self.get_json(&url, &params).await?;
                Stats::Months(body.items)
            }
            StatsKind::Collab | StatsKind::YearlyCollab(_) => {
                let body: ItemsResponse<CollabCount> = self.get_json(&url, &params).await?;
                Stats::Collaborators(body.items)
            }
            StatsKind::Topic | StatsKind::YearlyTopic(_) => {
                let body: ItemsResponse<TopicCount> = self.get_json(&url, &params).await?;
                Stats::Topics(body.items)
            }
        };

        Ok(stats)
    }

    async fn sync_status(&self) -> Result<SyncStatus> {
        self.get_json(&self.url("/api/sync/status"), &[]).await
    }

    async fn trigger_sync(&self, request: &SyncRequest) -> Result<SyncTrigger> {
        let mut body = request.clone();
        if body.api_key.is_none() {
            body.api_key = self.api_key.clone();
        }

        let url = self.url("/api/sync");
        let response = self
            .with_key(self.http_client.post(&url))
            .json(&body)
            .send()
            .await
            .context("Failed to trigger sync")?;

        match response.status() {
            status if status.is_success() => Ok(SyncTrigger::Started),
            StatusCode::CONFLICT => Ok(SyncTrigger::AlreadyRunning),
            status => Err(anyhow!("Sync trigger failed with status: {}", status)),
        }
    }

    async fn cancel_sync(&self) -> Result<()> {
        let url = self.url("/api/sync/cancel");
        let response = self
            .with_key(self.http_client.post(&url))
            .send()
            .await
            .context("Failed to cancel sync")?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::BAD_REQUEST => {
                tracing::debug!("Cancel requested with no sync in progress");
                Ok(())
            }
            status => Err(anyhow!("Sync cancel failed with status: {}", status)),
        }
    }

    async fn channel_info(&self, channel_id: &str) -> Result<ChannelInfo> {
        let path = format!("/api/v2/channels/{}", urlencoding::encode(channel_id));
        self.get_json(&self.url(&path), &[]).await
    }

    fn channel_icon_url(&self, channel_id: &str) -> String {
        self.url(&format!(
            "/api/statics/channelImg/{}",
            urlencoding::encode(channel_id)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::state::ViewState;
    use crate::filter::FilterCompiler;

    fn client() -> StatsApiClient {
        StatsApiClient::new(&ApiConfig {
            base_url: "http://stats.local/".to_string(),
            ..ApiConfig::default()
        })
        .unwrap()
    }

    fn state_for(channel: Option<&str>) -> ViewState {
        let mut state = ViewState::default();
        state.active_collection_id = channel.map(String::from);
        state.search_text = "asmr".to_string();
        state.archive_page = 2;
        state
    }

    #[test]
    fn test_archive_routes_to_search_with_all_params() {
        let query = FilterCompiler::default().compile(&state_for(Some("UC1")), Stream::Archive);
        let (url, params) = client().page_request(&query).unwrap();

        assert_eq!(url, "http://stats.local/api/search");
        assert!(params.contains(&("q".to_string(), "asmr".to_string())));
        assert!(params.contains(&("offset".to_string(), "32".to_string())));
        assert!(params.contains(&("channel_id".to_string(), "UC1".to_string())));
    }

    #[test]
    fn test_live_routes_to_proxy() {
        let query = FilterCompiler::default().compile(&state_for(None), Stream::Live);
        let (url, params) = client().page_request(&query).unwrap();

        assert_eq!(url, "http://stats.local/api/v2/live");
        assert!(!params.iter().any(|(k, _)| k == "q" || k == "channel_id"));

        let query = FilterCompiler::default().compile(&state_for(Some("UC1")), Stream::Live);
        let (_, params) = client().page_request(&query).unwrap();
        assert!(params.contains(&("channel_id".to_string(), "UC1".to_string())));
    }

    #[test]
    fn test_clips_need_channel() {
        let query = FilterCompiler::default().compile(&state_for(None), Stream::Clips);
        assert!(client().page_request(&query).is_err());

        let query = FilterCompiler::default().compile(&state_for(Some("UC1")), Stream::Clips);
        let (url, params) = client().page_request(&query).unwrap();
        assert_eq!(url, "http://stats.local/api/v2/channels/UC1/clips");
        assert!(params.contains(&("paginated".to_string(), "1".to_string())));
        assert!(!params.iter().any(|(k, _)| k == "channel_id"));
    }

    #[test]
    fn test_list_response_becomes_page() {
        let response: PageResponse =
            serde_json::from_str(r#"[{"id": "a"}, {"id": "b"}]"#).unwrap();
        let page: Page = response.into();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[1].id, "b");
    }

    #[test]
    fn test_icon_url() {
        assert_eq!(
            client().channel_icon_url("UC1"),
            "http://stats.local/api/statics/channelImg/UC1"
        );
    }
}
