use super::types::SuiteReport;
use crate::Result;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

pub struct ReportWriter;

impl ReportWriter {
    /// Write a suite report to a file as pretty JSON
    pub fn to_file(report: &SuiteReport, path: &Path) -> Result<()> {
        tracing::debug!("Writing report to: {}", path.display());

        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, report)?;

        tracing::info!(
            "Wrote report for {} scenario(s) to {}",
            report.total(),
            path.display()
        );

        Ok(())
    }

    /// Convert a suite report to a JSON string
    pub fn to_string(report: &SuiteReport) -> Result<String> {
        Ok(serde_json::to_string_pretty(report)?)
    }
}
