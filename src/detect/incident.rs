use crate::event::{Event, Level};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// How an event stream is partitioned into incident groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingStrategy {
    /// Split whenever consecutive timestamps are further apart than the window.
    #[default]
    TimeWindow,
    /// One partition per service; a group spans at most one window.
    Service,
}

impl std::fmt::Display for GroupingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupingStrategy::TimeWindow => write!(f, "time_window"),
            GroupingStrategy::Service => write!(f, "service"),
        }
    }
}

/// A set of events analysed together as one incident.
///
/// Timestamped events come first in ascending order; events without a
/// timestamp follow in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IncidentGroup {
    events: Vec<Event>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    services: BTreeSet<String>,
}

impl IncidentGroup {
    pub fn from_events(events: Vec<Event>) -> Self {
        let (mut timed, untimed): (Vec<Event>, Vec<Event>) =
            events.into_iter().partition(|e| e.timestamp.is_some());
        // Stable: equal timestamps keep arrival order.
        timed.sort_by_key(|e| e.timestamp);

        let start_time = timed.first().and_then(|e| e.timestamp);
        let end_time = timed.last().and_then(|e| e.timestamp);

        let mut events = timed;
        events.extend(untimed);
        let services = events.iter().filter_map(|e| e.service.clone()).collect();

        Self {
            events,
            start_time,
            end_time,
            services,
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    /// Events eligible for causal-graph placement, in timestamp order.
    pub fn timed_events(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(|e| e.timestamp.is_some())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn services(&self) -> &BTreeSet<String> {
        &self.services
    }

    /// Highest ranked level present in the group.
    pub fn severity(&self) -> Option<Level> {
        self.events
            .iter()
            .filter_map(|e| e.level.rank().map(|r| (r, &e.level)))
            .max_by_key(|(r, _)| *r)
            .map(|(_, l)| l.clone())
    }

    /// Keep the first `max` events (timestamp order); returns the new group
    /// and the number of events dropped.
    pub fn truncated(&self, max: usize) -> (IncidentGroup, usize) {
        if self.events.len() <= max {
            return (self.clone(), 0);
        }
        let dropped = self.events.len() - max;
        let kept = self.events[..max].to_vec();
        (IncidentGroup::from_events(kept), dropped)
    }
}

/// Partition `events` into incident groups.
///
/// An event without a timestamp is placed as if it had the timestamp of the
/// event that arrived before it (or at the start of the first group). Every
/// input event ends up in exactly one group.
pub fn group_events(
    events: Vec<Event>,
    window: Duration,
    strategy: GroupingStrategy,
) -> Vec<IncidentGroup> {
    if events.is_empty() {
        return Vec::new();
    }
    let total = events.len();

    let groups = match strategy {
        GroupingStrategy::TimeWindow => split_on_gap(placement_order(events), window),
        GroupingStrategy::Service => {
            let mut partitions: BTreeMap<Option<String>, Vec<Event>> = BTreeMap::new();
            for e in events {
                partitions.entry(e.service.clone()).or_default().push(e);
            }
            let mut groups = Vec::new();
            for (service, events) in partitions {
                debug!(service = ?service, events = events.len(), "Grouping service partition");
                groups.extend(split_on_span(placement_order(events), window));
            }
            groups.sort_by(|a: &IncidentGroup, b: &IncidentGroup| {
                a.start_time
                    .cmp(&b.start_time)
                    .then_with(|| a.services.iter().next().cmp(&b.services.iter().next()))
            });
            groups
        }
    };

    info!(
        events = total,
        groups = groups.len(),
        strategy = %strategy,
        window_secs = window.num_seconds(),
        "Grouped events into incidents"
    );
    groups
}

/// Order events by effective timestamp, ties by arrival.
fn placement_order(events: Vec<Event>) -> Vec<Event> {
    let mut last_seen: Option<DateTime<Utc>> = None;
    let mut keyed: Vec<(Option<DateTime<Utc>>, usize, Event)> = events
        .into_iter()
        .enumerate()
        .map(|(i, e)| {
            let effective = e.timestamp.or(last_seen);
            if e.timestamp.is_some() {
                last_seen = e.timestamp;
            }
            (effective, i, e)
        })
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    keyed.into_iter().map(|(_, _, e)| e).collect()
}

fn split_on_gap(ordered: Vec<Event>, window: Duration) -> Vec<IncidentGroup> {
    let mut groups = Vec::new();
    let mut current: Vec<Event> = Vec::new();
    let mut prev: Option<DateTime<Utc>> = None;

    for e in ordered {
        if let (Some(ts), Some(p)) = (e.timestamp, prev) {
            if ts - p > window && !current.is_empty() {
                groups.push(IncidentGroup::from_events(std::mem::take(&mut current)));
            }
        }
        if e.timestamp.is_some() {
            prev = e.timestamp;
        }
        current.push(e);
    }
    if !current.is_empty() {
        groups.push(IncidentGroup::from_events(current));
    }
    groups
}

fn split_on_span(ordered: Vec<Event>, window: Duration) -> Vec<IncidentGroup> {
    let mut groups = Vec::new();
    let mut current: Vec<Event> = Vec::new();
    let mut group_start: Option<DateTime<Utc>> = None;

    for e in ordered {
        if let Some(ts) = e.timestamp {
            match group_start {
                Some(start) if ts - start > window => {
                    groups.push(IncidentGroup::from_events(std::mem::take(&mut current)));
                    group_start = Some(ts);
                }
                None => group_start = Some(ts),
                _ => {}
            }
        }
        current.push(e);
    }
    if !current.is_empty() {
        groups.push(IncidentGroup::from_events(current));
    }
    groups
}
