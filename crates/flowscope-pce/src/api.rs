//! Wire types for the PCE REST API and their conversion into core models.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use flowscope_core::models::{
    Endpoint, FlowQuery, FlowRecord, Interface, Label, PolicyVerdict, Workload, WorkloadRef,
};

// ---------------------------------------------------------------------------
// Traffic analysis query (request)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, PartialEq)]
pub struct TrafficQueryBody {
    pub sources: Selector,
    pub destinations: Selector,
    pub services: ServiceSelector,
    pub sources_destinations_query_op: &'static str,
    pub start_date: String,
    pub end_date: String,
    pub policy_decisions: Vec<&'static str>,
    pub max_results: usize,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Selector {
    pub include: Vec<Vec<Actor>>,
    pub exclude: Vec<Actor>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Actor {
    pub label: Href,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Href {
    pub href: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ServiceSelector {
    pub include: Vec<ServiceEntry>,
    pub exclude: Vec<ServiceEntry>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ServiceEntry {
    pub port: u16,
    pub proto: u8,
}

fn selector(group: Option<&str>) -> Selector {
    let include = match group {
        Some(href) => vec![vec![Actor { label: Href { href: href.to_string() } }]],
        None => vec![Vec::new()],
    };
    Selector { include, exclude: Vec::new() }
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl From<&FlowQuery> for TrafficQueryBody {
    fn from(q: &FlowQuery) -> Self {
        Self {
            sources: selector(q.source_group()),
            destinations: selector(q.destination_group()),
            services: ServiceSelector {
                include: Vec::new(),
                exclude: q
                    .excluded_services()
                    .iter()
                    .map(|s| ServiceEntry { port: s.port, proto: s.proto })
                    .collect(),
            },
            sources_destinations_query_op: "and",
            start_date: rfc3339(q.start()),
            end_date: rfc3339(q.end()),
            policy_decisions: q.verdicts().iter().map(PolicyVerdict::as_str).collect(),
            max_results: q.max_records(),
        }
    }
}

// ---------------------------------------------------------------------------
// Traffic analysis query (response)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TrafficFlow {
    pub src: FlowEndpoint,
    pub dst: FlowEndpoint,
    pub service: FlowService,
    #[serde(default)]
    pub num_connections: u64,
    pub policy_decision: String,
    pub timestamp_range: TimestampRange,
}

#[derive(Debug, Deserialize)]
pub struct FlowEndpoint {
    pub ip: String,
    #[serde(default)]
    pub workload: Option<FlowWorkload>,
}

#[derive(Debug, Deserialize)]
pub struct FlowWorkload {
    pub href: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub labels: Vec<Href>,
}

#[derive(Debug, Deserialize)]
pub struct FlowService {
    #[serde(default)]
    pub port: u16,
    pub proto: u8,
}

#[derive(Debug, Deserialize)]
pub struct TimestampRange {
    pub first_detected: DateTime<Utc>,
    pub last_detected: DateTime<Utc>,
}

impl From<FlowEndpoint> for Endpoint {
    fn from(ep: FlowEndpoint) -> Self {
        Endpoint {
            ip: ep.ip,
            workload: ep.workload.map(|w| WorkloadRef {
                href: w.href,
                hostname: w.hostname,
                labels: w.labels.into_iter().map(|l| l.href).collect(),
            }),
        }
    }
}

impl TryFrom<TrafficFlow> for FlowRecord {
    type Error = String;

    fn try_from(flow: TrafficFlow) -> Result<Self, Self::Error> {
        let verdict = flow.policy_decision.parse::<PolicyVerdict>()?;
        Ok(FlowRecord {
            src: flow.src.into(),
            dst: flow.dst.into(),
            port: flow.service.port,
            proto: flow.service.proto,
            verdict,
            first_seen: flow.timestamp_range.first_detected,
            last_seen: flow.timestamp_range.last_detected,
            connections: flow.num_connections.max(1),
        })
    }
}

// ---------------------------------------------------------------------------
// Async collection jobs
// ---------------------------------------------------------------------------

/// Status document for a `Prefer: respond-async` collection request.
#[derive(Debug, Deserialize)]
pub struct AsyncJob {
    pub status: String,
    #[serde(default)]
    pub result: Option<Href>,
}

impl AsyncJob {
    pub fn is_done(&self) -> bool {
        self.status == "done"
    }

    pub fn is_failed(&self) -> bool {
        self.status == "failed"
    }
}

// ---------------------------------------------------------------------------
// Labels and workloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ApiLabel {
    pub href: String,
    pub key: String,
    pub value: String,
}

impl From<ApiLabel> for Label {
    fn from(l: ApiLabel) -> Self {
        Label { href: l.href, key: l.key, value: l.value }
    }
}

#[derive(Debug, Deserialize)]
pub struct ApiWorkload {
    pub href: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<ApiInterface>,
}

#[derive(Debug, Deserialize)]
pub struct ApiInterface {
    #[serde(default)]
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub cidr_block: Option<u8>,
    #[serde(default)]
    pub default_gateway_address: Option<String>,
}

impl From<ApiWorkload> for Workload {
    fn from(w: ApiWorkload) -> Self {
        Workload {
            href: w.href,
            hostname: w.hostname.unwrap_or_default(),
            interfaces: w
                .interfaces
                .into_iter()
                .map(|i| Interface {
                    name: i.name,
                    address: i.address,
                    cidr_block: i.cidr_block,
                    default_gateway: i.default_gateway_address,
                })
                .collect(),
        }
    }
}
