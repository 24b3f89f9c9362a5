use anyhow::Result;
use clap::Args;

use flowscope_core::explorer::{ExplorerExport, EXPLORER_HEADERS};
use flowscope_core::fetch::Fetcher;
use flowscope_core::query::build_queries;

use super::{GlobalOpts, TrafficArgs};
use crate::output;

#[derive(Args)]
pub struct ExplorerArgs {
    #[command(flatten)]
    pub traffic: TrafficArgs,
}

pub async fn run(args: ExplorerArgs, opts: &GlobalOpts) -> Result<()> {
    let intent = args.traffic.intent()?;
    let settings = args.traffic.settings()?;
    let client = opts.client()?;

    println!(
        "  {} labels and workloads from {}",
        console::style("[1/3] loading").cyan().bold(),
        client.config().display_name(),
    );
    let labels = client.labels().await?;
    let queries = build_queries(&intent, &labels)?;
    let workloads = client.workloads().await?;

    println!(
        "  {} {} query(s), {} to {}",
        console::style("[2/3] fetching traffic").cyan().bold(),
        queries.len(),
        intent.start,
        intent.end,
    );
    let outcome = Fetcher::new(&client, settings)
        .fetch_all(&queries)
        .await?;

    for warning in &outcome.truncated {
        println!(
            "  {} {} to {} returned {} records and could not be split further",
            console::style("warning:").yellow().bold(),
            warning.start,
            warning.end,
            warning.returned,
        );
    }
    println!(
        "        {} flows across {} windows",
        console::style(outcome.records.len()).green().bold(),
        outcome.windows,
    );

    if outcome.records.is_empty() {
        println!(
            "\n  {} no explorer data to export",
            console::style("note:").yellow().bold(),
        );
        return Ok(());
    }

    println!("  {}", console::style("[3/3] writing flows").cyan().bold());
    let rows = ExplorerExport::new(&labels, &workloads).rows(&outcome.records);
    let path = args
        .traffic
        .output_file
        .clone()
        .unwrap_or_else(|| output::default_file_name("explorer"));
    if let Some(path) = output::write_output(opts.out, &EXPLORER_HEADERS, &rows, &path)? {
        println!(
            "\n  {} {}",
            console::style("explorer ->").green().bold(),
            path.display(),
        );
    }
    tracing::info!(flows = rows.len(), "explorer export complete");

    Ok(())
}
