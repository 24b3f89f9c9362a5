use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::FlowError;
use crate::models::{FlowQuery, GroupDirectory, PolicyVerdict, ServicePort};

pub const DEFAULT_MAX_RECORDS: usize = 100_000;

/// What the user asked for, before any validation.
#[derive(Debug, Clone)]
pub struct QueryIntent {
    pub start: String,
    pub end: String,
    pub exclude_allowed: bool,
    pub exclude_potentially_blocked: bool,
    pub exclude_blocked: bool,
    pub group: Option<String>,
    pub excluded_services: Vec<ServicePort>,
    pub max_records: usize,
}

impl QueryIntent {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            exclude_allowed: false,
            exclude_potentially_blocked: false,
            exclude_blocked: false,
            group: None,
            excluded_services: Vec::new(),
            max_records: DEFAULT_MAX_RECORDS,
        }
    }

    pub fn verdicts(&self) -> BTreeSet<PolicyVerdict> {
        let mut set = BTreeSet::new();
        if !self.exclude_allowed {
            set.insert(PolicyVerdict::Allowed);
        }
        if !self.exclude_potentially_blocked {
            set.insert(PolicyVerdict::PotentiallyBlocked);
        }
        if !self.exclude_blocked {
            set.insert(PolicyVerdict::Blocked);
        }
        set
    }
}

/// Parse a zero-padded `yyyy-mm-dd` calendar date as midnight UTC.
pub fn parse_date(input: &str) -> Result<DateTime<Utc>, FlowError> {
    let trimmed = input.trim();
    // chrono's %m and %d also take unpadded fields
    let shaped = trimmed.len() == 10
        && trimmed.bytes().enumerate().all(|(i, b)| match i {
            4 | 7 => b == b'-',
            _ => b.is_ascii_digit(),
        });
    shaped
        .then(|| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok())
        .flatten()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| FlowError::InvalidDateFormat { input: input.to_string() })
}

/// Build the queries for an intent. A group restriction yields two queries,
/// one with the group as source and one with it as destination, because the
/// source cannot express "either side" in a single request.
pub fn build_queries(
    intent: &QueryIntent,
    groups: &impl GroupDirectory,
) -> Result<Vec<FlowQuery>, FlowError> {
    let start = parse_date(&intent.start)?;
    let end = parse_date(&intent.end)?;

    let base = FlowQuery::new(start, end, intent.verdicts(), intent.max_records)?
        .with_excluded_services(intent.excluded_services.clone());

    let group = match intent.group.as_deref().filter(|g| !g.is_empty()) {
        Some(name) => name,
        None => {
            tracing::debug!(?base, "built traffic query");
            return Ok(vec![base]);
        }
    };

    let href = groups
        .find_group(group)
        .ok_or_else(|| FlowError::UnknownGroup(group.to_string()))?;

    let queries = vec![
        base.clone().with_source_group(href.clone()),
        base.with_destination_group(href),
    ];
    tracing::debug!(group, ?queries, "built source-side and destination-side queries");
    Ok(queries)
}

/// Read a header-less, two-column `port,protocol` CSV of services to exclude.
pub fn parse_service_exclusions<R: Read>(reader: R) -> Result<Vec<ServicePort>, FlowError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut services = Vec::new();
    for (idx, row) in rdr.records().enumerate() {
        let line = idx as u64 + 1;
        let row = row.map_err(|e| FlowError::MalformedServiceExclusionInput {
            line,
            reason: e.to_string(),
        })?;
        if row.iter().all(|f| f.is_empty()) {
            continue;
        }
        if row.len() < 2 {
            return Err(FlowError::MalformedServiceExclusionInput {
                line,
                reason: format!("expected port and protocol, found {} column(s)", row.len()),
            });
        }
        let port = row[0].parse::<u16>().map_err(|_| FlowError::MalformedServiceExclusionInput {
            line,
            reason: format!("'{}' is not a valid port", &row[0]),
        })?;
        let proto = row[1].parse::<u8>().map_err(|_| FlowError::MalformedServiceExclusionInput {
            line,
            reason: format!("'{}' is not an IANA protocol number", &row[1]),
        })?;
        services.push(ServicePort { port, proto });
    }
    Ok(services)
}

pub fn load_service_exclusions(path: &Path) -> Result<Vec<ServicePort>, FlowError> {
    let file = std::fs::File::open(path).map_err(|e| FlowError::MalformedServiceExclusionInput {
        line: 0,
        reason: format!("cannot open {}: {}", path.display(), e),
    })?;
    parse_service_exclusions(file)
}
