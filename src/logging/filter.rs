// SPDX-License-Identifier: Apache-2.0 OR MIT
// Tag filter consulted by every producer before formatting a record

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock};

/// How the tag set is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Block-list: everything is logged except the listed tags
    #[default]
    EnableAll,
    /// Allow-list: only the listed tags are logged
    DisableAll,
}

impl FilterMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            FilterMode::EnableAll => "enable_all",
            FilterMode::DisableAll => "disable_all",
        }
    }
}

impl std::fmt::Display for FilterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Default)]
struct FilterState {
    mode: FilterMode,
    tags: BTreeSet<String>,
}

/// Shared set of tags plus a mode, guarded by one reader-writer lock
///
/// Switching modes clears the set, so a tag toggled under one mode never
/// silently flips meaning under the other.
#[derive(Debug, Default)]
pub struct FilterRegistry {
    state: RwLock<FilterState>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry in `mode` with `tags` already listed
    pub fn with_tags<I, S>(mode: FilterMode, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state: RwLock::new(FilterState {
                mode,
                tags: tags.into_iter().map(Into::into).collect(),
            }),
        }
    }

    /// True if records under `tag` must be dropped
    pub fn is_filtered(&self, tag: &str) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let listed = state.tags.contains(tag);
        match state.mode {
            FilterMode::EnableAll => listed,
            FilterMode::DisableAll => !listed,
        }
    }

    /// Log every tag; clears the set
    pub fn enable_all(&self) {
        self.reset(FilterMode::EnableAll);
    }

    /// Log no tag; clears the set
    pub fn disable_all(&self) {
        self.reset(FilterMode::DisableAll);
    }

    /// Let `tag` through
    ///
    /// Returns `false` if the tag was already enabled (usually a typo in the
    /// caller's tag name).
    pub fn enable(&self, tag: &str) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match state.mode {
            FilterMode::EnableAll => state.tags.remove(tag),
            FilterMode::DisableAll => state.tags.insert(tag.to_string()),
        }
    }

    /// Suppress `tag`
    ///
    /// Returns `false` if the tag was already disabled.
    pub fn disable(&self, tag: &str) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match state.mode {
            FilterMode::EnableAll => state.tags.insert(tag.to_string()),
            FilterMode::DisableAll => state.tags.remove(tag),
        }
    }

    pub fn mode(&self) -> FilterMode {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .mode
    }

    /// Snapshot of the listed tags, sorted
    pub fn tags(&self) -> Vec<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tags
            .iter()
            .cloned()
            .collect()
    }

    fn reset(&self, mode: FilterMode) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.mode = mode;
        state.tags.clear();
    }
}
