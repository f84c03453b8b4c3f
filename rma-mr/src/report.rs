//! Text and JSON rendering of a [`RateReport`].
use crate::RateReport;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReportFormat {
    /// Per-thread table followed by a summary row.
    #[default]
    Text,
    Json,
}

impl ReportFormat {
    pub fn render(self, report: &RateReport) -> Result<String, serde_json::Error> {
        match self {
            ReportFormat::Text => Ok(report.to_string()),
            ReportFormat::Json => serde_json::to_string_pretty(report),
        }
    }
}

impl fmt::Display for RateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<10}\t{:<10}\t{:<10}", "Thread", "Mmsgs/s", "MB/s")?;
        for t in &self.threads {
            writeln!(
                f,
                "{:<10}\t{:<10.2}\t{:<10.2}",
                t.thread_id, t.message_rate, t.bandwidth
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:<10}\t{:<10}\t{:<10}\t{:<10}",
            "Size", "Threads", "Mmsgs/s", "MB/s"
        )?;
        write!(
            f,
            "{:<10}\t{:<10}\t{:.6}\t{:.6}",
            self.message_size, self.num_threads, self.total_message_rate, self.total_bandwidth
        )?;
        if self.approximate {
            write!(f, "\n(approximate: message count is not a multiple of the window size)")?;
        }
        Ok(())
    }
}
