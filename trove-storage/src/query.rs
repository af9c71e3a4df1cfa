//! Event queries, pre-resolved for storage.
//!
//! The API layer expands stream queries (subtree membership, tag streams)
//! into flat id sets before handing the query to a backend, so backends
//! only ever see concrete ids.

use std::collections::HashSet;

use trove_model::Event;

/// Trashed-state filter shared by event and stream reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateFilter {
    #[default]
    Default,
    Trashed,
    All,
}

impl StateFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "default" => Some(Self::Default),
            "trashed" => Some(Self::Trashed),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    pub fn keeps(self, trashed: bool) -> bool {
        match self {
            Self::Default => !trashed,
            Self::Trashed => trashed,
            Self::All => true,
        }
    }
}

/// Resolved compound stream filter: `any` / `all` / `not` over concrete ids.
#[derive(Debug, Clone, Default)]
pub struct StreamSets {
    pub any: HashSet<String>,
    pub all: Vec<String>,
    pub not: HashSet<String>,
}

impl StreamSets {
    pub fn matches(&self, stream_ids: &[String]) -> bool {
        if !self.any.is_empty() && !stream_ids.iter().any(|id| self.any.contains(id)) {
            return false;
        }
        if !self.all.iter().all(|id| stream_ids.contains(id)) {
            return false;
        }
        if stream_ids.iter().any(|id| self.not.contains(id)) {
            return false;
        }
        true
    }
}

/// A fully resolved `events.get` query.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub streams: Option<StreamSets>,
    /// Tag filter, pre-resolved to synthetic tag stream ids; an event must
    /// carry at least one. Conjoined with `streams`.
    pub tag_streams: Vec<String>,
    /// Type filters; `family/*` wildcards allowed.
    pub types: Vec<String>,
    pub from_time: Option<f64>,
    pub to_time: Option<f64>,
    pub state: StateFilter,
    pub modified_since: Option<f64>,
    /// Only events with a null duration (running periods).
    pub running: bool,
    pub sort_ascending: bool,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl EventQuery {
    /// Whether an event satisfies every filter except skip/limit/sort.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.state.keeps(event.trashed) {
            return false;
        }
        if let Some(streams) = &self.streams {
            if !streams.matches(&event.stream_ids) {
                return false;
            }
        }
        if !self.tag_streams.is_empty()
            && !event
                .stream_ids
                .iter()
                .any(|id| self.tag_streams.contains(id))
        {
            return false;
        }
        if !self.types.is_empty()
            && !self
                .types
                .iter()
                .any(|t| trove_model::event::type_matches(t, &event.event_type))
        {
            return false;
        }
        if self.running && event.duration.is_some() {
            return false;
        }
        if let Some(since) = self.modified_since {
            if event.modified <= since {
                return false;
            }
        }
        if (self.from_time.is_some() || self.to_time.is_some())
            && !event.overlaps(self.from_time, self.to_time)
        {
            return false;
        }
        true
    }
}
