use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FlowError;

// ---------------------------------------------------------------------------
// Policy verdicts
// ---------------------------------------------------------------------------

/// How the PCE classified an observed flow against the active policy.
///
/// Variant order is the row order used when two summaries share a group pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PolicyVerdict {
    Allowed,
    PotentiallyBlocked,
    Blocked,
}

impl PolicyVerdict {
    pub const ALL: [PolicyVerdict; 3] = [
        PolicyVerdict::Allowed,
        PolicyVerdict::PotentiallyBlocked,
        PolicyVerdict::Blocked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyVerdict::Allowed => "allowed",
            PolicyVerdict::PotentiallyBlocked => "potentially_blocked",
            PolicyVerdict::Blocked => "blocked",
        }
    }
}

impl fmt::Display for PolicyVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyVerdict {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "allowed" => Ok(PolicyVerdict::Allowed),
            "potentially_blocked" => Ok(PolicyVerdict::PotentiallyBlocked),
            "blocked" => Ok(PolicyVerdict::Blocked),
            _ => Err(format!(
                "unknown policy decision '{}': expected allowed, potentially_blocked, or blocked",
                s
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Labels and workloads
// ---------------------------------------------------------------------------

pub const LABEL_ROLE: &str = "role";
pub const LABEL_APP: &str = "app";
pub const LABEL_ENV: &str = "env";
pub const LABEL_LOC: &str = "loc";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Label {
    pub href: String,
    pub key: String,
    pub value: String,
}

/// Workload reference as it appears on one side of a flow. Labels are hrefs
/// into the [`LabelDirectory`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkloadRef {
    pub href: String,
    pub hostname: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    pub ip: String,
    pub workload: Option<WorkloadRef>,
}

impl Endpoint {
    pub fn ip(ip: impl Into<String>) -> Self {
        Self { ip: ip.into(), workload: None }
    }

    pub fn workload(ip: impl Into<String>, workload: WorkloadRef) -> Self {
        Self { ip: ip.into(), workload: Some(workload) }
    }
}

/// All labels known to the PCE, keyed by href. Loaded once per invocation.
#[derive(Debug, Clone, Default)]
pub struct LabelDirectory {
    by_href: HashMap<String, Label>,
}

impl LabelDirectory {
    pub fn new(labels: impl IntoIterator<Item = Label>) -> Self {
        Self {
            by_href: labels.into_iter().map(|l| (l.href.clone(), l)).collect(),
        }
    }

    pub fn get(&self, href: &str) -> Option<&Label> {
        self.by_href.get(href)
    }

    pub fn find(&self, key: &str, value: &str) -> Option<&Label> {
        self.by_href.values().find(|l| l.key == key && l.value == value)
    }

    /// The workload's label for one dimension, if it carries one.
    pub fn workload_label(&self, workload: &WorkloadRef, key: &str) -> Option<&Label> {
        workload
            .labels
            .iter()
            .filter_map(|href| self.get(href))
            .find(|l| l.key == key)
    }

    pub fn len(&self) -> usize {
        self.by_href.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_href.is_empty()
    }
}

/// Lookup used by the query builder to turn a group name into the opaque
/// identity reference the flow source filters on.
pub trait GroupDirectory {
    fn find_group(&self, name: &str) -> Option<String>;
}

impl GroupDirectory for LabelDirectory {
    fn find_group(&self, name: &str) -> Option<String> {
        self.find(LABEL_APP, name).map(|l| l.href.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub address: String,
    pub cidr_block: Option<u8>,
    pub default_gateway: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Workload {
    pub href: String,
    pub hostname: String,
    pub interfaces: Vec<Interface>,
}

impl Workload {
    /// Net mask of the interface carrying `ip`. IPv4 masks are dotted,
    /// anything else is rendered as a prefix length.
    pub fn net_mask(&self, ip: &str) -> Option<String> {
        let iface = self.interfaces.iter().find(|i| i.address == ip)?;
        let bits = iface.cidr_block?;
        match iface.address.parse::<IpAddr>() {
            Ok(IpAddr::V4(_)) if bits <= 32 => {
                let mask = u32::MAX.checked_shl(32 - bits as u32).unwrap_or(0);
                Some(Ipv4Addr::from(mask).to_string())
            }
            _ => Some(format!("/{}", bits)),
        }
    }

    pub fn default_gateway(&self) -> Option<&str> {
        self.interfaces
            .iter()
            .find_map(|i| i.default_gateway.as_deref().filter(|gw| !gw.is_empty()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkloadDirectory {
    by_hostname: HashMap<String, Workload>,
}

impl WorkloadDirectory {
    pub fn new(workloads: impl IntoIterator<Item = Workload>) -> Self {
        Self {
            by_hostname: workloads
                .into_iter()
                .filter(|w| !w.hostname.is_empty())
                .map(|w| (w.hostname.clone(), w))
                .collect(),
        }
    }

    pub fn get(&self, hostname: &str) -> Option<&Workload> {
        self.by_hostname.get(hostname)
    }
}

// ---------------------------------------------------------------------------
// Flow records and queries
// ---------------------------------------------------------------------------

/// A `(port, IANA protocol number)` pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServicePort {
    pub port: u16,
    pub proto: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlowRecord {
    pub src: Endpoint,
    pub dst: Endpoint,
    pub port: u16,
    pub proto: u8,
    pub verdict: PolicyVerdict,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub connections: u64,
}

/// A time-windowed, policy-filtered traffic query. Immutable once built;
/// the window covers `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowQuery {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    verdicts: BTreeSet<PolicyVerdict>,
    source_group: Option<String>,
    destination_group: Option<String>,
    excluded_services: Vec<ServicePort>,
    max_records: usize,
}

impl FlowQuery {
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        verdicts: BTreeSet<PolicyVerdict>,
        max_records: usize,
    ) -> Result<Self, FlowError> {
        if start >= end {
            return Err(FlowError::InvalidDateRange { start, end });
        }
        if max_records == 0 {
            return Err(FlowError::InvalidMaxRecords);
        }
        if verdicts.is_empty() {
            return Err(FlowError::NoPolicyVerdicts);
        }
        Ok(Self {
            start,
            end,
            verdicts,
            source_group: None,
            destination_group: None,
            excluded_services: Vec::new(),
            max_records,
        })
    }

    pub fn with_source_group(mut self, group: impl Into<String>) -> Self {
        self.source_group = Some(group.into());
        self.destination_group = None;
        self
    }

    pub fn with_destination_group(mut self, group: impl Into<String>) -> Self {
        self.destination_group = Some(group.into());
        self.source_group = None;
        self
    }

    pub fn with_excluded_services(mut self, services: Vec<ServicePort>) -> Self {
        self.excluded_services = services;
        self
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn verdicts(&self) -> &BTreeSet<PolicyVerdict> {
        &self.verdicts
    }

    pub fn source_group(&self) -> Option<&str> {
        self.source_group.as_deref()
    }

    pub fn destination_group(&self) -> Option<&str> {
        self.destination_group.as_deref()
    }

    pub fn excluded_services(&self) -> &[ServicePort] {
        &self.excluded_services
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }

    /// Bisect the window at its midpoint. `None` once the window is too
    /// narrow to produce two non-empty halves.
    pub fn split(&self) -> Option<(FlowQuery, FlowQuery)> {
        let mid = self.start + (self.end - self.start) / 2;
        if mid <= self.start || mid >= self.end {
            return None;
        }
        let mut left = self.clone();
        left.end = mid;
        let mut right = self.clone();
        right.start = mid;
        Some((left, right))
    }
}
