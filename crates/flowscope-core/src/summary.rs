use crate::aggregate::{AggregationTable, GroupKey, ServiceTally};
use crate::models::PolicyVerdict;

pub const SUMMARY_HEADERS: [&str; 5] = [
    "src_app_group",
    "dst_app_group",
    "allowed_flow_summary",
    "potentially_blocked_flow_summary",
    "blocked_flow_summary",
];

const ENTRY_SEPARATOR: &str = ";";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedService<'a> {
    pub signature: &'a str,
    pub connections: u64,
}

/// Order a tally by connection count, highest first. Equal counts fall back
/// to ascending signature so output is stable between runs.
pub fn rank(tally: &ServiceTally) -> Vec<RankedService<'_>> {
    let mut ranked: Vec<_> = tally
        .iter()
        .map(|(signature, &connections)| RankedService { signature, connections })
        .collect();
    ranked.sort_by(|a, b| {
        b.connections
            .cmp(&a.connections)
            .then_with(|| a.signature.cmp(b.signature))
    });
    ranked
}

pub fn render_tally(tally: &ServiceTally) -> String {
    rank(tally)
        .iter()
        .map(|s| format!("{} ({} flows)", s.signature, s.connections))
        .collect::<Vec<_>>()
        .join(ENTRY_SEPARATOR)
}

/// One output row per group key. Exactly one of the three summary columns
/// is filled, the one matching the key's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRow {
    pub source_group: String,
    pub destination_group: String,
    pub allowed: String,
    pub potentially_blocked: String,
    pub blocked: String,
}

impl SummaryRow {
    fn new(key: &GroupKey, summary: String) -> Self {
        let mut row = Self {
            source_group: key.source.clone(),
            destination_group: key.destination.clone(),
            allowed: String::new(),
            potentially_blocked: String::new(),
            blocked: String::new(),
        };
        match key.verdict {
            PolicyVerdict::Allowed => row.allowed = summary,
            PolicyVerdict::PotentiallyBlocked => row.potentially_blocked = summary,
            PolicyVerdict::Blocked => row.blocked = summary,
        }
        row
    }

    pub fn to_record(&self) -> Vec<String> {
        vec![
            self.source_group.clone(),
            self.destination_group.clone(),
            self.allowed.clone(),
            self.potentially_blocked.clone(),
            self.blocked.clone(),
        ]
    }
}

/// Render every key in the table, sorted by source group, destination
/// group, then verdict.
pub fn summarize(table: &AggregationTable) -> Vec<SummaryRow> {
    let mut keys: Vec<_> = table.iter().collect();
    keys.sort_by(|a, b| a.0.cmp(b.0));
    keys.into_iter()
        .map(|(key, tally)| SummaryRow::new(key, render_tally(tally)))
        .collect()
}
