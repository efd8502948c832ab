//! Compiles a [`ViewState`] into the canonical query used both as the cache
//! key and as the outgoing request parameters.
//!
//! Filter categories (text, collaborators, dates, years/months, content type,
//! availability) always narrow the result set together. Only inside the
//! collaborator category does the match mode choose between OR and AND.
//! Filters only apply to the archive stream; live and clips pages are keyed
//! by paging and channel alone.

use std::collections::BTreeMap;
use std::fmt::Display;

use serde::Serialize;

use crate::app::state::{ContentType, MatchMode, Stream, ViewState};

pub const DEFAULT_PAGE_SIZE: u32 = 32;

/// Largest `limit` the search endpoint accepts
pub const MAX_PAGE_SIZE: u32 = 100;

/// Deterministic parameter set for one page of one stream.
///
/// Parameters live in a `BTreeMap`, so serialization order is fixed by key
/// name and never by the order filters were applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalQuery {
    pub stream: Stream,
    params: BTreeMap<&'static str, String>,
}

impl CanonicalQuery {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.get("channel_id")
    }

    /// Parameters in canonical order, ready for `RequestBuilder::query`
    pub fn pairs(&self) -> Vec<(&'static str, &str)> {
        self.params.iter().map(|(k, v)| (*k, v.as_str())).collect()
    }

    /// Byte-stable cache key: `<stream>?k=v&k=v`
    pub fn key(&self) -> String {
        let query = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.stream, query)
    }
}

impl Display for CanonicalQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// Pure `ViewState` → `CanonicalQuery` transformation
#[derive(Debug, Clone, Copy)]
pub struct FilterCompiler {
    page_size: u32,
}

impl Default for FilterCompiler {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl FilterCompiler {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Build the query for the current page of `stream`.
    ///
    /// Filters sitting at their unconstrained default are left out entirely
    /// so every "no filter" state shares one key.
    pub fn compile(&self, state: &ViewState, stream: Stream) -> CanonicalQuery {
        let mut params = BTreeMap::new();

        let offset = (state.page(stream).max(1) - 1) as u64 * self.page_size as u64;
        params.insert("limit", self.page_size.to_string());
        params.insert("offset", offset.to_string());

        if let Some(id) = &state.active_collection_id {
            params.insert("channel_id", id.clone());
        }

        if stream != Stream::Archive {
            return CanonicalQuery { stream, params };
        }

        let text = state.search_text.trim();
        if !text.is_empty() {
            params.insert("q", text.to_string());
        }

        if !state.collaborator_ids.is_empty() {
            params.insert("collab", join(&state.collaborator_ids));
            let mode = match state.collaborator_match_mode {
                MatchMode::Any => "or",
                MatchMode::All => "and",
            };
            params.insert("collab_mode", mode.to_string());
        }

        if state.hide_unavailable {
            params.insert("hide_unarchived", "true".to_string());
        }

        if !state.explicit_dates.is_empty() {
            let dates = state
                .explicit_dates
                .iter()
                .map(|d| d.format("%Y-%m-%d"));
            params.insert("filter_dates", join(dates));
        }

        if let Some(years) = state.quick_years.as_ref().filter(|y| !y.is_empty()) {
            params.insert("filter_years", join(years));
            if let Some(months) = state.quick_months.as_ref().filter(|m| !m.is_empty()) {
                params.insert("filter_months", join(months));
            }
        }

        if state.content_type == ContentType::Music {
            params.insert("video_type", "music".to_string());
        }

        CanonicalQuery { stream, params }
    }
}

fn join<I>(values: I) -> String
where
    I: IntoIterator,
    I::Item: Display,
{
    values
        .into_iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
