//! View state and the store that owns it.
//!
//! The store is pull-based: it never notifies anyone. Loaders re-read the
//! snapshot after every mutation and compare [`StateStore::version`] to decide
//! whether anything needs reloading.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Top-level view shown by the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveView {
    #[default]
    Home,
    Live,
    Archive,
    Clips,
}

/// A paginated logical feed with its own page counter and request serial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Live,
    Archive,
    Clips,
}

impl Stream {
    pub const ALL: [Stream; 3] = [Stream::Live, Stream::Archive, Stream::Clips];

    pub fn name(self) -> &'static str {
        match self {
            Stream::Live => "live",
            Stream::Archive => "archive",
            Stream::Clips => "clips",
        }
    }
}

impl std::fmt::Display for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Stream {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "live" => Ok(Stream::Live),
            "archive" => Ok(Stream::Archive),
            "clips" | "clip" => Ok(Stream::Clips),
            _ => Err(anyhow::anyhow!("Unknown stream: {}", s)),
        }
    }
}

impl From<Stream> for ActiveView {
    fn from(stream: Stream) -> Self {
        match stream {
            Stream::Live => ActiveView::Live,
            Stream::Archive => ActiveView::Archive,
            Stream::Clips => ActiveView::Clips,
        }
    }
}

/// How selected collaborators combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// At least one selected collaborator appears
    #[default]
    Any,
    /// Every selected collaborator appears
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    All,
    Music,
}

/// The single snapshot of dashboard state.
///
/// Collections are ordered sets, so two selections with the same members are
/// equal no matter the order they were picked in. Updates compare fields
/// structurally: re-applying an identical set is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewState {
    pub active_collection_id: Option<String>,
    pub active_view: ActiveView,
    pub live_page: u32,
    pub archive_page: u32,
    pub clips_page: u32,

    pub search_text: String,
    pub collaborator_ids: BTreeSet<String>,
    pub collaborator_match_mode: MatchMode,
    pub hide_unavailable: bool,
    pub explicit_dates: BTreeSet<NaiveDate>,
    /// `None` means unconstrained
    pub quick_years: Option<BTreeSet<i32>>,
    /// Only meaningful while `quick_years` is set
    pub quick_months: Option<BTreeSet<u8>>,
    pub content_type: ContentType,

    pub is_syncing: bool,
    pub has_triggered_initial_sync: bool,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            active_collection_id: None,
            active_view: ActiveView::Home,
            live_page: 1,
            archive_page: 1,
            clips_page: 1,
            search_text: String::new(),
            collaborator_ids: BTreeSet::new(),
            collaborator_match_mode: MatchMode::Any,
            hide_unavailable: false,
            explicit_dates: BTreeSet::new(),
            quick_years: None,
            quick_months: None,
            content_type: ContentType::All,
            is_syncing: false,
            has_triggered_initial_sync: false,
        }
    }
}

impl ViewState {
    /// Current 1-based page for a stream
    pub fn page(&self, stream: Stream) -> u32 {
        match stream {
            Stream::Live => self.live_page,
            Stream::Archive => self.archive_page,
            Stream::Clips => self.clips_page,
        }
    }

    /// True when no filter field deviates from its default
    pub fn filters_are_default(&self) -> bool {
        let defaults = ViewState::default();
        self.search_text == defaults.search_text
            && self.collaborator_ids == defaults.collaborator_ids
            && self.collaborator_match_mode == defaults.collaborator_match_mode
            && self.hide_unavailable == defaults.hide_unavailable
            && self.explicit_dates == defaults.explicit_dates
            && self.quick_years == defaults.quick_years
            && self.quick_months == defaults.quick_months
            && self.content_type == defaults.content_type
    }

    fn reset_filters_and_pages(&mut self) {
        let defaults = ViewState::default();
        self.live_page = defaults.live_page;
        self.archive_page = defaults.archive_page;
        self.clips_page = defaults.clips_page;
        self.search_text = defaults.search_text;
        self.collaborator_ids = defaults.collaborator_ids;
        self.collaborator_match_mode = defaults.collaborator_match_mode;
        self.hide_unavailable = defaults.hide_unavailable;
        self.explicit_dates = defaults.explicit_dates;
        self.quick_years = defaults.quick_years;
        self.quick_months = defaults.quick_months;
        self.content_type = defaults.content_type;
    }

    /// Restore the structural invariants after a merge.
    fn normalize(&mut self) {
        if self.quick_years.as_ref().is_some_and(|years| years.is_empty()) {
            self.quick_years = None;
        }
        if let Some(months) = self.quick_months.as_mut() {
            months.retain(|m| (1..=12).contains(m));
        }
        if self.quick_years.is_none() || self.quick_months.as_ref().is_some_and(|m| m.is_empty()) {
            self.quick_months = None;
        }
        self.live_page = self.live_page.max(1);
        self.archive_page = self.archive_page.max(1);
        self.clips_page = self.clips_page.max(1);
    }
}

/// A partial update: only `Some` fields are merged.
///
/// Nullable fields use `Option<Option<_>>` so "set to none" can be told apart
/// from "leave alone".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewStatePatch {
    pub active_collection_id: Option<Option<String>>,
    pub active_view: Option<ActiveView>,
    pub live_page: Option<u32>,
    pub archive_page: Option<u32>,
    pub clips_page: Option<u32>,
    pub search_text: Option<String>,
    pub collaborator_ids: Option<BTreeSet<String>>,
    pub collaborator_match_mode: Option<MatchMode>,
    pub hide_unavailable: Option<bool>,
    pub explicit_dates: Option<BTreeSet<NaiveDate>>,
    pub quick_years: Option<Option<BTreeSet<i32>>>,
    pub quick_months: Option<Option<BTreeSet<u8>>>,
    pub content_type: Option<ContentType>,
    pub is_syncing: Option<bool>,
    pub has_triggered_initial_sync: Option<bool>,
}

impl ViewStatePatch {
    pub fn collection(mut self, id: Option<impl Into<String>>) -> Self {
        self.active_collection_id = Some(id.map(Into::into));
        self
    }

    pub fn view(mut self, view: ActiveView) -> Self {
        self.active_view = Some(view);
        self
    }

    pub fn page(mut self, stream: Stream, page: u32) -> Self {
        match stream {
            Stream::Live => self.live_page = Some(page),
            Stream::Archive => self.archive_page = Some(page),
            Stream::Clips => self.clips_page = Some(page),
        }
        self
    }

    pub fn search_text(mut self, text: impl Into<String>) -> Self {
        self.search_text = Some(text.into());
        self
    }

    pub fn collaborators<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collaborator_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn match_mode(mut self, mode: MatchMode) -> Self {
        self.collaborator_match_mode = Some(mode);
        self
    }

    pub fn hide_unavailable(mut self, hide: bool) -> Self {
        self.hide_unavailable = Some(hide);
        self
    }

    pub fn dates(mut self, dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.explicit_dates = Some(dates.into_iter().collect());
        self
    }

    pub fn years(mut self, years: Option<impl IntoIterator<Item = i32>>) -> Self {
        self.quick_years = Some(years.map(|y| y.into_iter().collect()));
        self
    }

    pub fn months(mut self, months: Option<impl IntoIterator<Item = u8>>) -> Self {
        self.quick_months = Some(months.map(|m| m.into_iter().collect()));
        self
    }

    pub fn content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }

    pub fn syncing(mut self, syncing: bool) -> Self {
        self.is_syncing = Some(syncing);
        self
    }

    pub fn initial_sync_triggered(mut self, triggered: bool) -> Self {
        self.has_triggered_initial_sync = Some(triggered);
        self
    }
}

/// Owns the one [`ViewState`] of a session.
///
/// Snapshots are shared `Arc`s: a no-op update hands back the very same
/// allocation, so `Arc::ptr_eq` (or [`StateStore::version`]) tells callers
/// whether anything changed.
#[derive(Debug)]
pub struct StateStore {
    current: Arc<ViewState>,
    version: u64,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            current: Arc::new(ViewState::default()),
            version: 0,
        }
    }

    /// Immutable snapshot of the current state
    pub fn read(&self) -> Arc<ViewState> {
        Arc::clone(&self.current)
    }

    /// Number of effective mutations since creation
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Merge `patch` into the current state.
    ///
    /// Switching the active collection resets every filter field and page
    /// counter before the rest of the patch is applied. Clearing the year
    /// selection also clears the month selection.
    pub fn update(&mut self, patch: ViewStatePatch) -> Arc<ViewState> {
        let mut next = (*self.current).clone();

        if let Some(id) = patch.active_collection_id {
            if id != next.active_collection_id {
                next.active_collection_id = id;
                next.reset_filters_and_pages();
            }
        }

        if let Some(view) = patch.active_view {
            next.active_view = view;
        }
        if let Some(page) = patch.live_page {
            next.live_page = page;
        }
        if let Some(page) = patch.archive_page {
            next.archive_page = page;
        }
        if let Some(page) = patch.clips_page {
            next.clips_page = page;
        }
        if let Some(text) = patch.search_text {
            next.search_text = text;
        }
        if let Some(ids) = patch.collaborator_ids {
            next.collaborator_ids = ids;
        }
        if let Some(mode) = patch.collaborator_match_mode {
            next.collaborator_match_mode = mode;
        }
        if let Some(hide) = patch.hide_unavailable {
            next.hide_unavailable = hide;
        }
        if let Some(dates) = patch.explicit_dates {
            next.explicit_dates = dates;
        }
        if let Some(years) = patch.quick_years {
            next.quick_years = years;
        }
        if let Some(months) = patch.quick_months {
            next.quick_months = months;
        }
        if let Some(content_type) = patch.content_type {
            next.content_type = content_type;
        }
        if let Some(syncing) = patch.is_syncing {
            next.is_syncing = syncing;
        }
        if let Some(triggered) = patch.has_triggered_initial_sync {
            next.has_triggered_initial_sync = triggered;
        }

        next.normalize();

        if next == *self.current {
            return self.read();
        }

        self.current = Arc::new(next);
        self.version += 1;
        self.read()
    }

    /// Restore every field to its default
    pub fn reset(&mut self) -> Arc<ViewState> {
        if *self.current != ViewState::default() {
            self.current = Arc::new(ViewState::default());
            self.version += 1;
        }
        self.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filtered_store() -> StateStore {
        let mut store = StateStore::new();
        store.update(ViewStatePatch::default().collection(Some("X")));
        store.update(
            ViewStatePatch::default()
                .search_text("karaoke")
                .collaborators(["A", "B"])
                .match_mode(MatchMode::All)
                .hide_unavailable(true)
                .dates([NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()])
                .years(Some([2023, 2024]))
                .months(Some([3, 4]))
                .content_type(ContentType::Music)
                .page(Stream::Archive, 4)
                .page(Stream::Clips, 2),
        );
        store
    }

    #[test]
    fn test_defaults() {
        let store = StateStore::new();
        let state = store.read();

        assert_eq!(state.active_collection_id, None);
        assert_eq!(state.active_view, ActiveView::Home);
        assert_eq!(state.archive_page, 1);
        assert!(state.filters_are_default());
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn test_noop_update_keeps_snapshot_identity() {
        let mut store = filtered_store();
        let before = store.read();
        let version = store.version();

        let after = store.update(
            ViewStatePatch::default()
                .search_text("karaoke")
                .collaborators(["B", "A"])
                .years(Some([2024, 2023]))
                .content_type(ContentType::Music),
        );

        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(store.version(), version);
    }

    #[test]
    fn test_empty_patch_is_noop() {
        let mut store = filtered_store();
        let before = store.read();
        let after = store.update(ViewStatePatch::default());
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_update_only_touches_supplied_fields() {
        let mut store = filtered_store();
        let after = store.update(ViewStatePatch::default().search_text("utawaku"));

        assert_eq!(after.search_text, "utawaku");
        assert_eq!(after.collaborator_match_mode, MatchMode::All);
        assert_eq!(after.archive_page, 4);
        assert_eq!(after.content_type, ContentType::Music);
    }

    #[test]
    fn test_collection_switch_resets_filters() {
        let mut store = filtered_store();
        let after = store.update(ViewStatePatch::default().collection(Some("Y")));

        assert_eq!(after.active_collection_id.as_deref(), Some("Y"));
        assert!(after.filters_are_default());
        assert_eq!(after.live_page, 1);
        assert_eq!(after.archive_page, 1);
        assert_eq!(after.clips_page, 1);
    }

    #[test]
    fn test_collection_switch_to_none_resets_filters() {
        let mut store = filtered_store();
        let after = store.update(ViewStatePatch::default().collection(None::<String>));

        assert_eq!(after.active_collection_id, None);
        assert!(after.filters_are_default());
    }

    #[test]
    fn test_same_collection_keeps_filters() {
        let mut store = filtered_store();
        let after = store.update(ViewStatePatch::default().collection(Some("X")));

        assert_eq!(after.search_text, "karaoke");
        assert_eq!(after.archive_page, 4);
    }

    #[test]
    fn test_filters_in_switch_patch_apply_after_reset() {
        let mut store = filtered_store();
        let after = store.update(
            ViewStatePatch::default()
                .collection(Some("Y"))
                .search_text("asmr"),
        );

        assert_eq!(after.search_text, "asmr");
        assert!(after.collaborator_ids.is_empty());
        assert_eq!(after.quick_years, None);
    }

    #[test]
    fn test_clearing_years_clears_months() {
        let mut store = filtered_store();
        let after = store.update(ViewStatePatch::default().years(None::<Vec<i32>>));

        assert_eq!(after.quick_years, None);
        assert_eq!(after.quick_months, None);
    }

    #[test]
    fn test_empty_year_set_counts_as_cleared() {
        let mut store = filtered_store();
        let after = store.update(ViewStatePatch::default().years(Some(Vec::<i32>::new())));

        assert_eq!(after.quick_years, None);
        assert_eq!(after.quick_months, None);
    }

    #[test]
    fn test_months_without_years_are_dropped() {
        let mut store = StateStore::new();
        let before = store.read();
        let after = store.update(ViewStatePatch::default().months(Some([1, 2])));

        assert_eq!(after.quick_months, None);
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_out_of_range_months_are_dropped() {
        let mut store = StateStore::new();
        let after = store.update(
            ViewStatePatch::default()
                .years(Some([2024]))
                .months(Some([0, 5, 13])),
        );

        assert_eq!(after.quick_months, Some(BTreeSet::from([5])));
    }

    #[test]
    fn test_page_zero_is_clamped() {
        let mut store = StateStore::new();
        let after = store.update(ViewStatePatch::default().page(Stream::Live, 0));
        assert_eq!(after.live_page, 1);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut store = filtered_store();
        let after = store.reset();

        assert_eq!(*after, ViewState::default());

        let version = store.version();
        store.reset();
        assert_eq!(store.version(), version);
    }

    #[test]
    fn test_stream_parse() {
        assert_eq!("archive".parse::<Stream>().unwrap(), Stream::Archive);
        assert_eq!("LIVE".parse::<Stream>().unwrap(), Stream::Live);
        assert!("shorts".parse::<Stream>().is_err());
    }
}
