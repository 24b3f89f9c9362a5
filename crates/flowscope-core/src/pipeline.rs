use crate::aggregate::{aggregate, AggregationTable};
use crate::error::FlowError;
use crate::fetch::{FetchSettings, Fetcher, FlowSource, TruncationWarning};
use crate::models::FlowQuery;
use crate::resolve::GroupResolver;
use crate::summary::{summarize, SummaryRow};

#[derive(Debug)]
pub struct FlowSummary {
    pub rows: Vec<SummaryRow>,
    pub table: AggregationTable,
    pub records_fetched: usize,
    pub truncated: Vec<TruncationWarning>,
}

/// Fetch, resolve, fold and rank. Nothing is returned unless every
/// sub-fetch succeeded.
pub async fn summarize_flows<S: FlowSource>(
    source: &S,
    queries: &[FlowQuery],
    settings: FetchSettings,
    resolver: &impl GroupResolver,
) -> Result<FlowSummary, FlowError> {
    let outcome = Fetcher::new(source, settings).fetch_all(queries).await?;
    let table = aggregate(&outcome.records, resolver);
    tracing::info!(
        records = outcome.records.len(),
        groups = table.len(),
        connections = table.total_connections(),
        "aggregation complete"
    );
    Ok(FlowSummary {
        rows: summarize(&table),
        table,
        records_fetched: outcome.records.len(),
        truncated: outcome.truncated,
    })
}
