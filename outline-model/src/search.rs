//! Search and view state.
//!
//! Match positions come from an external text index and are treated as opaque
//! coordinates. The outline only needs to know which rows hold a match so the
//! shadow table can show those rows and their ancestors.

use crate::outline::Outline;
use crate::shadow_table::ShadowTableChanges;
use std::collections::HashSet;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchState {
    #[default]
    NotSearching,
    /// A search field is open but no results have been supplied yet. Every
    /// row is shown regardless of expansion.
    BeginSearch,
    /// Only rows that are part of a search result are shown.
    Searching,
}

/// Where a match sits inside a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchResultCoordinates {
    pub row_id: String,
    pub is_in_notes: bool,
    pub range: Range<usize>,
}

/// Transient presentation state that shapes the shadow table.
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    pub completed_filter: bool,
    pub notes_filter: bool,
    pub focus: Option<String>,
    pub search: SearchState,
    pub(crate) search_results: Vec<SearchResultCoordinates>,
    /// Rows holding a match plus all of their ancestors.
    pub(crate) search_hits: HashSet<String>,
    pub(crate) current_result: Option<usize>,
}

impl ViewState {
    pub fn search_results(&self) -> &[SearchResultCoordinates] {
        &self.search_results
    }

    pub fn is_part_of_search_result(&self, row_id: &str) -> bool {
        self.search_hits.contains(row_id)
    }
}

impl Outline {
    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn begin_search(&mut self) -> ShadowTableChanges {
        self.view.search = SearchState::BeginSearch;
        self.view.search_results.clear();
        self.view.search_hits.clear();
        self.view.current_result = None;
        self.refresh_shadow_table(&[])
    }

    /// Installs a new result set and shows only the rows it touches.
    pub fn search(&mut self, results: Vec<SearchResultCoordinates>) -> ShadowTableChanges {
        let mut hits = HashSet::new();
        for result in &results {
            if self.row(&result.row_id).is_none() {
                continue;
            }
            hits.insert(result.row_id.clone());
            hits.extend(self.ancestors(&result.row_id));
        }

        self.view.search = SearchState::Searching;
        self.view.current_result = (!results.is_empty()).then_some(0);
        self.view.search_results = results;
        self.view.search_hits = hits;
        self.refresh_shadow_table(&[])
    }

    pub fn end_search(&mut self) -> ShadowTableChanges {
        if self.view.search == SearchState::NotSearching {
            return ShadowTableChanges::default();
        }
        self.view.search = SearchState::NotSearching;
        self.view.search_results.clear();
        self.view.search_hits.clear();
        self.view.current_result = None;
        self.refresh_shadow_table(&[])
    }

    pub fn current_search_result(&self) -> Option<&SearchResultCoordinates> {
        self.view
            .current_result
            .and_then(|i| self.view.search_results.get(i))
    }

    /// Advances to the next match, wrapping at the end.
    pub fn next_search_result(&mut self) -> Option<&SearchResultCoordinates> {
        let count = self.view.search_results.len();
        if count == 0 {
            return None;
        }
        let next = self.view.current_result.map_or(0, |i| (i + 1) % count);
        self.view.current_result = Some(next);
        self.view.search_results.get(next)
    }

    /// Steps back to the previous match, wrapping at the start.
    pub fn previous_search_result(&mut self) -> Option<&SearchResultCoordinates> {
        let count = self.view.search_results.len();
        if count == 0 {
            return None;
        }
        let previous = self
            .view
            .current_result
            .map_or(count - 1, |i| (i + count - 1) % count);
        self.view.current_result = Some(previous);
        self.view.search_results.get(previous)
    }
}
