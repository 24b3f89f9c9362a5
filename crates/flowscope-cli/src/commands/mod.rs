pub mod explorer;
pub mod flow_summary;

use std::path::PathBuf;

use anyhow::Result;
use chrono::{Datelike, Duration, Utc};
use clap::{Args, Parser, Subcommand};

use flowscope_core::fetch::{FetchSettings, DEFAULT_CONCURRENCY, DEFAULT_THRESHOLD};
use flowscope_core::query::{self, QueryIntent};
use flowscope_pce::{PceClient, PceConfig};

use crate::output::OutputFormat;

#[derive(Parser)]
#[command(
    name = "flowscope",
    about = "Summarize and export PCE traffic flows",
    long_about = "flowscope - pull observed traffic from a PCE, collapse it by app group,\n\
                  and write ranked per-service summaries as CSV or console tables.",
    version,
    propagate_version = true,
    styles = get_styles(),
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the PCE config file (default: $FLOWSCOPE_CONFIG or ~/.flowscope/pce.toml)
    #[arg(long, global = true)]
    pub config_file: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Csv)]
    pub out: OutputFormat,

    /// Enable debug level logging
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Summarize flows by port and protocol between app groups
    FlowSummary(flow_summary::FlowSummaryArgs),

    /// Export explorer traffic with workload subnet and default gateway
    Explorer(explorer::ExplorerArgs),
}

pub fn run(cli: Cli) -> Result<()> {
    let opts = GlobalOpts {
        config_file: cli.config_file,
        out: cli.out,
    };
    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Commands::FlowSummary(args) => rt.block_on(flow_summary::run(args, &opts)),
        Commands::Explorer(args) => rt.block_on(explorer::run(args, &opts)),
    }
}

/// Global options handed to every command.
pub struct GlobalOpts {
    pub config_file: Option<PathBuf>,
    pub out: OutputFormat,
}

impl GlobalOpts {
    pub fn client(&self) -> Result<PceClient> {
        let config = PceConfig::load(self.config_file.as_deref())?;
        tracing::info!(pce = config.display_name(), "using PCE");
        PceClient::new(config)
    }
}

/// Query flags shared by the traffic commands.
#[derive(Args, Clone)]
pub struct TrafficArgs {
    /// App name to limit results to flows with that app as a provider or consumer
    #[arg(short = 'a', long)]
    pub app: Option<String>,

    /// Start date (yyyy-mm-dd, midnight UTC)
    #[arg(short, long, default_value_t = default_start())]
    pub start: String,

    /// End date (yyyy-mm-dd, midnight UTC)
    #[arg(short, long, default_value_t = default_end())]
    pub end: String,

    /// Exclude allowed traffic flows
    #[arg(long, default_value_t = false)]
    pub exclude_allowed: bool,

    /// Exclude potentially blocked traffic flows
    #[arg(long, default_value_t = false)]
    pub exclude_potentially_blocked: bool,

    /// Exclude blocked traffic flows
    #[arg(long, default_value_t = false)]
    pub exclude_blocked: bool,

    /// Header-less CSV of services to exclude: port in column 1, IANA protocol number in column 2
    #[arg(short = 'x', long)]
    pub exclude_service_csv: Option<PathBuf>,

    /// Maximum records per request
    #[arg(long, default_value_t = query::DEFAULT_MAX_RECORDS, hide = true)]
    pub max_records: usize,

    /// Result count at which a time window is split and re-queried
    #[arg(long, default_value_t = DEFAULT_THRESHOLD, hide = true)]
    pub threshold: usize,

    /// Parallel sub-window requests
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY, hide = true)]
    pub concurrency: usize,

    /// Output file (default: timestamped file in the current directory)
    #[arg(long)]
    pub output_file: Option<PathBuf>,
}

impl TrafficArgs {
    /// Validate the date and service inputs before anything touches the
    /// network. Group resolution needs labels and happens later.
    pub fn intent(&self) -> Result<QueryIntent> {
        query::parse_date(&self.start)?;
        query::parse_date(&self.end)?;

        let mut intent = QueryIntent::new(&self.start, &self.end);
        intent.exclude_allowed = self.exclude_allowed;
        intent.exclude_potentially_blocked = self.exclude_potentially_blocked;
        intent.exclude_blocked = self.exclude_blocked;
        intent.group = self.app.clone();
        intent.max_records = self.max_records;
        if let Some(path) = &self.exclude_service_csv {
            intent.excluded_services = query::load_service_exclusions(path)?;
            tracing::info!(count = intent.excluded_services.len(), "loaded service exclusions");
        }
        Ok(intent)
    }

    pub fn settings(&self) -> Result<FetchSettings> {
        let settings = FetchSettings {
            threshold: self.threshold.min(self.max_records),
            concurrency: self.concurrency,
        };
        settings.validate()?;
        Ok(settings)
    }
}

fn default_start() -> String {
    let now = Utc::now();
    now.with_year(now.year() - 5)
        .unwrap_or(now - Duration::days(5 * 365))
        .format("%Y-%m-%d")
        .to_string()
}

fn default_end() -> String {
    (Utc::now() + Duration::days(1)).format("%Y-%m-%d").to_string()
}

fn get_styles() -> clap::builder::Styles {
    clap::builder::Styles::styled()
        .header(
            clap::builder::styling::AnsiColor::BrightCyan
                .on_default()
                .bold(),
        )
        .usage(
            clap::builder::styling::AnsiColor::BrightCyan
                .on_default()
                .bold(),
        )
        .literal(
            clap::builder::styling::AnsiColor::BrightGreen
                .on_default()
                .bold(),
        )
        .placeholder(
            clap::builder::styling::AnsiColor::BrightWhite
                .on_default()
                .dimmed(),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flow_summary_flags() {
        let cli = Cli::try_parse_from([
            "flowscope",
            "flow-summary",
            "--app",
            "payroll",
            "--start",
            "2024-01-01",
            "--end",
            "2024-02-01",
            "--exclude-blocked",
            "--out",
            "both",
        ])
        .unwrap();
        assert_eq!(cli.out, OutputFormat::Both);
        let Commands::FlowSummary(args) = cli.command else {
            panic!("expected flow-summary");
        };
        let intent = args.traffic.intent().unwrap();
        assert_eq!(intent.group.as_deref(), Some("payroll"));
        assert!(intent.exclude_blocked);
        assert_eq!(intent.verdicts().len(), 2);
    }

    #[test]
    fn test_bad_date_fails_before_fetch() {
        let cli = Cli::try_parse_from(["flowscope", "explorer", "--start", "01/01/2024"]).unwrap();
        let Commands::Explorer(args) = cli.command else {
            panic!("expected explorer");
        };
        let err = args.traffic.intent().unwrap_err();
        assert!(format!("{err:#}").contains("expected yyyy-mm-dd"));
    }

    #[test]
    fn test_threshold_capped_by_max_records() {
        let cli = Cli::try_parse_from([
            "flowscope",
            "explorer",
            "--max-records",
            "500",
            "--threshold",
            "900",
        ])
        .unwrap();
        let Commands::Explorer(args) = cli.command else {
            panic!("expected explorer");
        };
        assert_eq!(args.traffic.settings().unwrap().threshold, 500);
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let cli = Cli::try_parse_from(["flowscope", "flow-summary", "--threshold", "0"]).unwrap();
        let Commands::FlowSummary(args) = cli.command else {
            panic!("expected flow-summary");
        };
        let err = args.traffic.settings().unwrap_err();
        assert!(format!("{err:#}").contains("threshold must be greater than zero"));
    }
}
