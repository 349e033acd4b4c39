use crate::analysis::model::RootCause;
use crate::detect::IncidentGroup;
use crate::event::Level;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    Investigate,
    Fix,
    Monitor,
    Document,
}

/// A remediation step; priority 1 is the most urgent, 5 the least.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendedAction {
    pub description: String,
    pub priority: u8,
    pub category: ActionCategory,
}

/// Failure class recognised from root-cause text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ResourceExhaustion,
    Deadlock,
    Timeout,
    Connectivity,
}

// Checked in order; "lock wait timeout" is a deadlock, not a timeout.
const KEYWORDS: &[(FailureKind, &[&str])] = &[
    (
        FailureKind::ResourceExhaustion,
        &[
            "exhausted",
            "exhaustion",
            "out of memory",
            "oom",
            "disk full",
            "no space left",
            "too many open files",
            "quota exceeded",
            "limit exceeded",
        ],
    ),
    (
        FailureKind::Deadlock,
        &["deadlock", "lock wait", "lock contention"],
    ),
    (
        FailureKind::Timeout,
        &["timeout", "timed out", "deadline exceeded"],
    ),
    (
        FailureKind::Connectivity,
        &[
            "connection refused",
            "connection reset",
            "unreachable",
            "name resolution",
            "dns",
            "broken pipe",
        ],
    ),
];

type Template = (u8, ActionCategory, &'static str);

const RESOURCE_ACTIONS: &[Template] = &[
    (1, ActionCategory::Fix, "Raise the exhausted capacity or pool limits of {service}"),
    (2, ActionCategory::Investigate, "Check {service} for resource leaks and recent load changes"),
    (3, ActionCategory::Monitor, "Alert on {service} resource saturation before exhaustion"),
];

const DEADLOCK_ACTIONS: &[Template] = &[
    (1, ActionCategory::Fix, "Inspect lock ordering and long-running transactions in {service}"),
    (2, ActionCategory::Investigate, "Capture thread and transaction dumps from {service}"),
    (4, ActionCategory::Document, "Document the lock contention scenario for {service}"),
];

const TIMEOUT_ACTIONS: &[Template] = &[
    (1, ActionCategory::Investigate, "Check latency and health of the dependencies of {service}"),
    (2, ActionCategory::Fix, "Review timeout and retry settings in {service}"),
    (3, ActionCategory::Monitor, "Track {service} response-time percentiles"),
];

const CONNECTIVITY_ACTIONS: &[Template] = &[
    (1, ActionCategory::Investigate, "Verify network reachability and DNS for {service}"),
    (2, ActionCategory::Fix, "Check {service} endpoint configuration and firewall rules"),
    (3, ActionCategory::Monitor, "Add connectivity health checks for {service}"),
];

impl FailureKind {
    /// First kind whose keywords appear in `text` (case-insensitive).
    pub fn classify(text: &str) -> Option<Self> {
        let text = text.to_lowercase();
        KEYWORDS
            .iter()
            .find(|(_, words)| words.iter().any(|w| contains_word(&text, w)))
            .map(|(kind, _)| *kind)
    }

    fn templates(self) -> &'static [Template] {
        match self {
            FailureKind::ResourceExhaustion => RESOURCE_ACTIONS,
            FailureKind::Deadlock => DEADLOCK_ACTIONS,
            FailureKind::Timeout => TIMEOUT_ACTIONS,
            FailureKind::Connectivity => CONNECTIVITY_ACTIONS,
        }
    }
}

/// Match `word` at word boundaries so "oom" does not fire on "room".
fn contains_word(text: &str, word: &str) -> bool {
    text.match_indices(word).any(|(i, _)| {
        let before = text[..i].chars().next_back();
        let after = text[i + word.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Recommended actions for the ranked root causes, most urgent first.
pub fn recommend(group: &IncidentGroup, root_causes: &[RootCause]) -> Vec<RecommendedAction> {
    let mut actions = Vec::new();

    let has_fatal = group
        .events()
        .iter()
        .any(|e| matches!(e.level, Level::Critical | Level::Fatal));
    if has_fatal {
        actions.push(RecommendedAction {
            description: "Review critical/fatal errors immediately".to_string(),
            priority: 1,
            category: ActionCategory::Investigate,
        });
    }

    for rc in root_causes {
        let service = rc.originating_service.as_deref().unwrap_or("the affected component");
        let text = std::iter::once(rc.description.as_str())
            .chain(rc.evidence.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join("\n");

        match FailureKind::classify(&text) {
            Some(kind) => {
                for (priority, category, template) in kind.templates() {
                    actions.push(RecommendedAction {
                        description: template.replace("{service}", service),
                        priority: *priority,
                        category: *category,
                    });
                }
            }
            None => actions.push(RecommendedAction {
                description: format!("Investigate {}", service),
                priority: 5,
                category: ActionCategory::Investigate,
            }),
        }
    }

    let mut seen = HashSet::new();
    actions.retain(|a| seen.insert(a.description.clone()));
    // Stable: within a priority, actions of higher-ranked causes stay first.
    actions.sort_by_key(|a| a.priority);
    actions
}
