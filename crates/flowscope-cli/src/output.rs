use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Csv,
    Stdout,
    Both,
}

impl OutputFormat {
    fn writes_csv(self) -> bool {
        matches!(self, OutputFormat::Csv | OutputFormat::Both)
    }

    fn writes_stdout(self) -> bool {
        matches!(self, OutputFormat::Stdout | OutputFormat::Both)
    }
}

/// `flowscope-<command>-<YYYYMMDD_HHMMSS>.csv` in the working directory.
pub fn default_file_name(command: &str) -> PathBuf {
    PathBuf::from(format!(
        "flowscope-{}-{}.csv",
        command,
        chrono::Local::now().format("%Y%m%d_%H%M%S"),
    ))
}

pub fn write_csv(path: &Path, headers: &[&str], rows: &[Vec<String>]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("cannot create {}", path.display()))?;
    wtr.write_record(headers)?;
    for row in rows {
        wtr.write_record(row)?;
    }
    wtr.flush()
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut builder = tabled::builder::Builder::default();
    builder.push_record(headers.iter().map(|h| h.to_string()));
    for row in rows {
        builder.push_record(row.iter().cloned());
    }
    let mut table = builder.build();
    table.with(tabled::settings::Style::rounded());
    table.to_string()
}

/// Emit rows in the requested format. Returns the CSV path when one was
/// written.
pub fn write_output(
    format: OutputFormat,
    headers: &[&str],
    rows: &[Vec<String>],
    path: &Path,
) -> Result<Option<PathBuf>> {
    if format.writes_stdout() {
        println!("{}", render_table(headers, rows));
    }
    if format.writes_csv() {
        write_csv(path, headers, rows)?;
        tracing::info!(path = %path.display(), rows = rows.len(), "wrote csv");
        return Ok(Some(path.to_path_buf()));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<Vec<String>> {
        vec![
            vec!["A".into(), "B".into(), "443 TCP (20 flows)".into(), "".into(), "".into()],
            vec!["C".into(), "B".into(), "".into(), "".into(), "22 TCP (1 flows);53 UDP (1 flows)".into()],
        ]
    }

    const HEADERS: [&str; 5] = ["src", "dst", "allowed", "potentially_blocked", "blocked"];

    #[test]
    fn test_csv_quotes_and_empties() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let written = write_output(OutputFormat::Csv, &HEADERS, &rows(), &path).unwrap();
        assert_eq!(written.as_deref(), Some(path.as_path()));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines[0], "src,dst,allowed,potentially_blocked,blocked");
        assert_eq!(lines[1], "A,B,443 TCP (20 flows),,");
        assert_eq!(lines[2], "C,B,,,22 TCP (1 flows);53 UDP (1 flows)");
    }

    #[test]
    fn test_stdout_only_writes_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let written = write_output(OutputFormat::Stdout, &HEADERS, &rows(), &path).unwrap();
        assert!(written.is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_table_contains_cells() {
        let table = render_table(&HEADERS, &rows());
        assert!(table.contains("443 TCP (20 flows)"));
        assert!(table.contains("potentially_blocked"));
    }

    #[test]
    fn test_default_file_name() {
        let name = default_file_name("flow-summary");
        let name = name.to_string_lossy();
        assert!(name.starts_with("flowscope-flow-summary-"));
        assert!(name.ends_with(".csv"));
    }
}
