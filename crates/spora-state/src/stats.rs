//! Pod activity statistics
//!
//! Read-only views over the store for administrators: how many posts,
//! comments and likes appeared within a window, how that compares with the
//! window before, and which tags are most used.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use spora_core::{ParentKind, RelayableKind, TimeWindow, Timestamp};

use crate::store::RelayableStore;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Entity kinds counted by [`ActivityStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    Post,
    Comment,
    Like,
}

impl From<RelayableKind> for ActivityKind {
    fn from(kind: RelayableKind) -> Self {
        match kind {
            RelayableKind::Comment => ActivityKind::Comment,
            RelayableKind::Like => ActivityKind::Like,
        }
    }
}

/// Length of a statistics segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatsRange {
    #[default]
    Day,
    Week,
    TwoWeeks,
    Month,
}

impl StatsRange {
    pub fn duration(self) -> Duration {
        match self {
            StatsRange::Day => DAY,
            StatsRange::Week => DAY * 7,
            StatsRange::TwoWeeks => DAY * 14,
            StatsRange::Month => DAY * 30,
        }
    }
}

/// Current segment compared with the one before it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentSummary {
    pub previous: usize,
    pub current: usize,
    /// Change in percent, two decimals. `None` when the previous segment
    /// is empty.
    pub percent_change: Option<f64>,
}

impl fmt::Display for SegmentSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.percent_change {
            Some(p) => write!(f, "{} -> {} ({:+.2}%)", self.previous, self.current, p),
            None => write!(f, "{} -> {}", self.previous, self.current),
        }
    }
}

fn percent_change(current: usize, previous: usize) -> Option<f64> {
    if previous == 0 {
        return None;
    }
    let change = (current as f64 - previous as f64) / previous as f64 * 100.0;
    Some((change * 100.0).round() / 100.0)
}

/// Statistics view over a store
pub struct ActivityStats<'a> {
    store: &'a RelayableStore,
}

impl<'a> ActivityStats<'a> {
    pub fn new(store: &'a RelayableStore) -> Self {
        Self { store }
    }

    /// Number of entities of `kind` created within `window`
    pub fn count_within(&self, kind: ActivityKind, window: TimeWindow) -> usize {
        match kind {
            ActivityKind::Post => self
                .store
                .parents()
                .iter()
                .filter(|r| r.parent.kind == ParentKind::Post && window.contains(r.created_at))
                .count(),
            ActivityKind::Comment | ActivityKind::Like => self
                .store
                .snapshot()
                .iter()
                .filter(|o| ActivityKind::from(o.kind()) == kind && window.contains(o.created_at()))
                .count(),
        }
    }

    /// Compare the segment ending at `end` with the one before it
    pub fn segment_summary(
        &self,
        kind: ActivityKind,
        range: StatsRange,
        end: Timestamp,
    ) -> SegmentSummary {
        let window = TimeWindow::ending_at(end, range.duration());
        let current = self.count_within(kind, window);
        let previous = self.count_within(kind, window.previous());
        SegmentSummary {
            previous,
            current,
            percent_change: percent_change(current, previous),
        }
    }

    /// Most used comment tags, by count then name
    pub fn popular_tags(&self, limit: usize) -> Vec<(String, usize)> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for object in self.store.snapshot() {
            for tag in object.payload().tags() {
                *counts.entry(tag).or_insert(0) += 1;
            }
        }

        let mut tags: Vec<_> = counts.into_iter().collect();
        tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        tags.truncate(limit);
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ParentRecord;
    use spora_core::{Guid, Handle, ParentRef, Payload, RelayableDraft, RelayableObject, Signature};

    fn post(n: u32) -> ParentRef {
        ParentRef::post(Guid::parse(&format!("post{:016}", n)).unwrap())
    }

    fn seeded_store() -> RelayableStore {
        let store = RelayableStore::new();
        let owner = Handle::parse("bob@b.example").unwrap();
        for n in 0..3 {
            store.register_parent(ParentRecord {
                parent: post(n),
                owner: owner.clone(),
                created_at: Timestamp::from_secs(DAY.as_secs() as i64 * n as i64),
            });
        }

        let texts = ["#rust and #pods", "more #rust", "#Rust again", "plain"];
        for (i, text) in texts.iter().enumerate() {
            let object = RelayableObject::new(
                RelayableDraft {
                    guid: Guid::parse(&format!("comment{:012}", i)).unwrap(),
                    parent: post(0),
                    author: Handle::parse("alice@a.example").unwrap(),
                    payload: Payload::comment(*text),
                    created_at: Timestamp::from_secs(DAY.as_secs() as i64 * 2 + i as i64),
                },
                Signature([0u8; 64]),
                None,
            );
            store.persist(&object, Timestamp::ZERO).unwrap();
        }
        store
    }

    #[test]
    fn test_count_within_by_kind() {
        let store = seeded_store();
        let stats = ActivityStats::new(&store);
        let all = TimeWindow::new(Timestamp::ZERO, Timestamp::from_secs(i64::from(u32::MAX)));

        assert_eq!(stats.count_within(ActivityKind::Post, all), 3);
        assert_eq!(stats.count_within(ActivityKind::Comment, all), 4);
        assert_eq!(stats.count_within(ActivityKind::Like, all), 0);
    }

    #[test]
    fn test_segment_summary() {
        let store = seeded_store();
        let stats = ActivityStats::new(&store);
        let end = Timestamp::from_secs(DAY.as_secs() as i64 * 3);

        let comments = stats.segment_summary(ActivityKind::Comment, StatsRange::Day, end);
        assert_eq!(comments.current, 4);
        assert_eq!(comments.previous, 0);
        assert_eq!(comments.percent_change, None);

        // Posts at day 0, 1, 2: one in [2d, 3d), one in [1d, 2d)
        let posts = stats.segment_summary(ActivityKind::Post, StatsRange::Day, end);
        assert_eq!((posts.previous, posts.current), (1, 1));
        assert_eq!(posts.percent_change, Some(0.0));
    }

    #[test]
    fn test_percent_change_rounds() {
        assert_eq!(percent_change(2, 3), Some(-33.33));
        assert_eq!(percent_change(3, 2), Some(50.0));
        assert_eq!(percent_change(5, 0), None);
    }

    #[test]
    fn test_popular_tags() {
        let store = seeded_store();
        let stats = ActivityStats::new(&store);
        let tags = stats.popular_tags(5);
        assert_eq!(
            tags,
            vec![("rust".to_string(), 3), ("pods".to_string(), 1)]
        );
        assert_eq!(stats.popular_tags(1).len(), 1);
    }
}
