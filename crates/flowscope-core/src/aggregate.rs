use std::collections::HashMap;

use crate::models::{FlowRecord, PolicyVerdict};
use crate::protocol::protocol_name;
use crate::resolve::GroupResolver;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub source: String,
    pub destination: String,
    pub verdict: PolicyVerdict,
}

/// Service signature (`"<port> <protocol>"`) to summed connection count.
pub type ServiceTally = HashMap<String, u64>;

pub fn service_signature(port: u16, proto: u8) -> String {
    format!("{} {}", port, protocol_name(proto))
}

/// Per group-pair service tallies for one invocation.
///
/// Ingest is a pure additive fold, so the table is the same whatever order
/// records arrive in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationTable {
    entries: HashMap<GroupKey, ServiceTally>,
}

impl AggregationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&mut self, record: &FlowRecord, resolver: &impl GroupResolver) {
        let key = GroupKey {
            source: resolver.resolve(&record.src),
            destination: resolver.resolve(&record.dst),
            verdict: record.verdict,
        };
        let svc = service_signature(record.port, record.proto);
        *self.entries.entry(key).or_default().entry(svc).or_insert(0) += record.connections;
    }

    pub fn get(&self, key: &GroupKey) -> Option<&ServiceTally> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GroupKey, &ServiceTally)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_connections(&self) -> u64 {
        self.entries.values().flat_map(|t| t.values()).sum()
    }
}

pub fn aggregate<'r>(
    records: impl IntoIterator<Item = &'r FlowRecord>,
    resolver: &impl GroupResolver,
) -> AggregationTable {
    let mut table = AggregationTable::new();
    for record in records {
        table.ingest(record, resolver);
    }
    table
}
