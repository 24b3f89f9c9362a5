//! Flat, one-row-per-flow export of fetched traffic with workload context.

use crate::models::{
    Endpoint, FlowRecord, LabelDirectory, WorkloadDirectory, LABEL_APP, LABEL_ENV, LABEL_LOC,
    LABEL_ROLE,
};
use crate::protocol::protocol_name;

pub const EXPLORER_HEADERS: [&str; 22] = [
    "src_ip",
    "src_net_mask",
    "src_default_gw",
    "src_hostname",
    "src_role",
    "src_app",
    "src_env",
    "src_loc",
    "dst_ip",
    "dst_net_mask",
    "dst_default_gw",
    "dst_hostname",
    "dst_role",
    "dst_app",
    "dst_env",
    "dst_loc",
    "port",
    "protocol",
    "policy_status",
    "date_first",
    "date_last",
    "num_flows",
];

const NOT_APPLICABLE: &str = "NA";

pub struct ExplorerExport<'a> {
    labels: &'a LabelDirectory,
    workloads: &'a WorkloadDirectory,
}

impl<'a> ExplorerExport<'a> {
    pub fn new(labels: &'a LabelDirectory, workloads: &'a WorkloadDirectory) -> Self {
        Self { labels, workloads }
    }

    pub fn row(&self, record: &FlowRecord) -> Vec<String> {
        let mut row = Vec::with_capacity(EXPLORER_HEADERS.len());
        row.extend(self.endpoint_columns(&record.src));
        row.extend(self.endpoint_columns(&record.dst));
        row.push(record.port.to_string());
        row.push(protocol_name(record.proto).into_owned());
        row.push(record.verdict.to_string());
        row.push(record.first_seen.to_rfc3339_opts(chrono::SecondsFormat::Millis, true));
        row.push(record.last_seen.to_rfc3339_opts(chrono::SecondsFormat::Millis, true));
        row.push(record.connections.to_string());
        row
    }

    pub fn rows<'r>(&self, records: impl IntoIterator<Item = &'r FlowRecord>) -> Vec<Vec<String>> {
        records.into_iter().map(|r| self.row(r)).collect()
    }

    fn endpoint_columns(&self, endpoint: &Endpoint) -> [String; 8] {
        let Some(wkld) = endpoint.workload.as_ref() else {
            let na = || NOT_APPLICABLE.to_string();
            return [endpoint.ip.clone(), na(), na(), na(), na(), na(), na(), na()];
        };

        let host = self.workloads.get(&wkld.hostname);
        let net_mask = host
            .and_then(|w| w.net_mask(&endpoint.ip))
            .unwrap_or_else(|| NOT_APPLICABLE.to_string());
        let gateway = host
            .and_then(|w| w.default_gateway())
            .unwrap_or(NOT_APPLICABLE)
            .to_string();
        let label = |key: &str| {
            self.labels
                .workload_label(wkld, key)
                .map(|l| l.value.clone())
                .unwrap_or_default()
        };

        [
            endpoint.ip.clone(),
            net_mask,
            gateway,
            wkld.hostname.clone(),
            label(LABEL_ROLE),
            label(LABEL_APP),
            label(LABEL_ENV),
            label(LABEL_LOC),
        ]
    }
}
