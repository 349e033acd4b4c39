use crate::detect::IncidentGroup;
use crate::event::Event;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b").unwrap()
});
static HEX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(HEX_PATTERN).unwrap());
static IPV4_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}(?::\d+)?\b").unwrap());
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());
static SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// `0x` literals, or bare hex runs holding at least one digit and one letter.
const HEX_PATTERN: &str = concat!(
    r"\b(?:0x[0-9a-f]+",
    r"|[0-9a-f]*[a-f][0-9a-f]*[0-9][0-9a-f]*",
    r"|[0-9a-f]*[0-9][0-9a-f]*[a-f][0-9a-f]*)\b",
);

/// Hex runs shorter than this are left alone ("dead", "cafe", "a1").
const MIN_HEX_LEN: usize = 6;

/// Normalise a message so repeated occurrences of the same error with
/// different ids, addresses or counts collapse to one signature.
pub fn signature(message: &str) -> String {
    let s = message.to_lowercase();
    let s = UUID_RE.replace_all(&s, "<uuid>");
    let s = IPV4_RE.replace_all(&s, "<ip>");
    let s = HEX_RE.replace_all(&s, |caps: &regex::Captures| {
        let m = &caps[0];
        if m.starts_with("0x") || m.len() >= MIN_HEX_LEN {
            "<hex>".to_string()
        } else {
            m.to_string()
        }
    });
    let s = NUMBER_RE.replace_all(&s, "<n>");
    SPACE_RE.replace_all(s.trim(), " ").into_owned()
}

/// Events sharing one message signature.
#[derive(Debug, Clone)]
pub struct MessageCluster<'a> {
    pub signature: String,
    /// Earliest event of the cluster (timed events first, then arrival).
    pub first: &'a Event,
    pub events: Vec<&'a Event>,
    /// Fraction of the whole group.
    pub share: f64,
}

impl MessageCluster<'_> {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Cluster every event of `group` by message signature, largest first.
///
/// Events without timestamps count here even though the graph ignores them.
pub fn cluster_messages(group: &IncidentGroup) -> Vec<MessageCluster<'_>> {
    let total = group.len();
    if total == 0 {
        return Vec::new();
    }

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut clusters: Vec<MessageCluster<'_>> = Vec::new();
    for e in group.events() {
        let sig = signature(&e.message);
        match index.get(&sig) {
            Some(&i) => clusters[i].events.push(e),
            None => {
                index.insert(sig.clone(), clusters.len());
                clusters.push(MessageCluster {
                    signature: sig,
                    first: e,
                    events: vec![e],
                    share: 0.0,
                });
            }
        }
    }

    for c in &mut clusters {
        c.share = (c.events.len() as f64 / total as f64).min(1.0);
    }
    // Stable: equal sizes keep first-occurrence order.
    clusters.sort_by(|a, b| b.events.len().cmp(&a.events.len()));
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_masks_variable_tokens() {
        assert_eq!(
            signature("Request 7f3c9a12-0b4e-4c1d-9a7e-1234567890ab failed after 30s"),
            "request <uuid> failed after <n>s"
        );
        assert_eq!(
            signature("Connection to 10.0.0.12:5432 refused"),
            "connection to <ip> refused"
        );
        assert_eq!(signature("bad ptr 0x7ffe1234 in   worker"), "bad ptr <hex> in worker");
        assert_eq!(signature("commit deadbeef42 rolled back"), "commit <hex> rolled back");
    }

    #[test]
    fn test_signature_keeps_plain_words() {
        assert_eq!(signature("Cache DEAD, face reset"), "cache dead, face reset");
        assert_eq!(signature("  upstream   timeout "), "upstream timeout");
    }

    #[test]
    fn test_clusters_and_shares() {
        let group = IncidentGroup::from_events(vec![
            Event::new("1", "Timeout after 100ms"),
            Event::new("2", "timeout after 250ms"),
            Event::new("3", "disk full"),
            Event::new("4", "Timeout after 90ms"),
        ]);
        let clusters = cluster_messages(&group);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].signature, "timeout after <n>ms");
        assert_eq!(clusters[0].len(), 3);
        assert_eq!(clusters[0].share, 0.75);
        assert_eq!(clusters[0].first.id.as_str(), "1");
        assert_eq!(clusters[1].share, 0.25);
    }

    #[test]
    fn test_empty_group_has_no_clusters() {
        assert!(cluster_messages(&IncidentGroup::default()).is_empty());
    }
}
