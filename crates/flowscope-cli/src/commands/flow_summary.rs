use std::time::Instant;

use anyhow::Result;
use clap::Args;

use flowscope_core::pipeline::summarize_flows;
use flowscope_core::query::build_queries;
use flowscope_core::resolve::LabelResolver;
use flowscope_core::summary::{SummaryRow, SUMMARY_HEADERS};

use super::{GlobalOpts, TrafficArgs};
use crate::output;

#[derive(Args)]
pub struct FlowSummaryArgs {
    #[command(flatten)]
    pub traffic: TrafficArgs,

    /// Include the location label in app group names
    #[arg(long, default_value_t = false)]
    pub app_group_loc: bool,
}

pub async fn run(args: FlowSummaryArgs, opts: &GlobalOpts) -> Result<()> {
    let started = Instant::now();
    let intent = args.traffic.intent()?;
    let settings = args.traffic.settings()?;
    let client = opts.client()?;

    println!(
        "  {} labels from {}",
        console::style("[1/3] loading").cyan().bold(),
        client.config().display_name(),
    );
    let labels = client.labels().await?;
    let queries = build_queries(&intent, &labels)?;

    println!(
        "  {} {} query(s), {} to {}",
        console::style("[2/3] fetching traffic").cyan().bold(),
        queries.len(),
        intent.start,
        intent.end,
    );
    let resolver = LabelResolver::new(&labels, args.app_group_loc);
    let summary = summarize_flows(&client, &queries, settings, &resolver).await?;

    for warning in &summary.truncated {
        println!(
            "  {} {} to {} returned {} records and could not be split further",
            console::style("warning:").yellow().bold(),
            warning.start,
            warning.end,
            warning.returned,
        );
    }

    println!(
        "        {} flows folded into {} app group pairs",
        console::style(summary.records_fetched).green().bold(),
        console::style(summary.rows.len()).green().bold(),
    );

    if summary.rows.is_empty() {
        println!(
            "\n  {} no explorer data to summarize",
            console::style("note:").yellow().bold(),
        );
        tracing::info!("no explorer data to summarize");
        return Ok(());
    }

    println!("  {}", console::style("[3/3] writing summaries").cyan().bold());
    let rows: Vec<_> = summary.rows.iter().map(SummaryRow::to_record).collect();
    let path = args
        .traffic
        .output_file
        .clone()
        .unwrap_or_else(|| output::default_file_name("flow-summary"));
    let written = output::write_output(opts.out, &SUMMARY_HEADERS, &rows, &path)?;

    println!();
    if let Some(path) = written {
        println!(
            "  {} {}",
            console::style("summary ->").green().bold(),
            path.display(),
        );
    }
    println!(
        "  {} {} summaries exported in {:.1}s",
        console::style("done:").white().bold(),
        rows.len(),
        started.elapsed().as_secs_f64(),
    );
    tracing::info!(summaries = rows.len(), "flow summary complete");

    Ok(())
}
