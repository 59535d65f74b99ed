//! Run summary and the process exit status derived from it.

use std::fmt;
use std::time::Duration;

use crate::reaper::Outcome;

/// Exit status for a clean run with no errors.
pub const EXIT_OK: u8 = 0;
/// Exit status for a fatal error (store unreachable, scan failure).
pub const EXIT_FATAL: u8 = 1;
/// Exit status for a completed run that counted errors.
pub const EXIT_PARTIAL: u8 = 2;
/// Exit status after an interrupt (128 + SIGINT).
pub const EXIT_INTERRUPTED: u8 = 130;

const RULE_WIDTH: usize = 60;

/// Counters accumulated over one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total_seen: u64,
    pub evicted: u64,
    pub errors: u64,
    /// Keys the store confirmed it removed.  Always 0 in dry-run mode.
    pub keys_deleted: u64,
    pub dry_run: bool,
    pub interrupted: bool,
    pub duration: Duration,
}

impl RunSummary {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    /// Fold the outcome of one checked mapping into the counters.
    ///
    /// `total_seen` is counted by the scan loop once the check finishes.
    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Retained => {}
            Outcome::Evicted { deleted } => {
                self.evicted += 1;
                self.keys_deleted += *deleted as u64;
            }
            Outcome::Skipped(_) | Outcome::RetainedOnError(_) => self.errors += 1,
        }
    }

    pub fn exit_status(&self) -> u8 {
        if self.interrupted {
            EXIT_INTERRUPTED
        } else if self.errors > 0 {
            EXIT_PARTIAL
        } else {
            EXIT_OK
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(RULE_WIDTH);
        writeln!(f, "{rule}")?;
        writeln!(f, "REAPER SUMMARY")?;
        writeln!(f, "{rule}")?;
        writeln!(f, "Total domains scanned:  {}", self.total_seen)?;
        writeln!(f, "Stale domains cleaned:  {}", self.evicted)?;
        writeln!(f, "Errors encountered:     {}", self.errors)?;
        writeln!(
            f,
            "Duration:               {:.2} seconds",
            self.duration.as_secs_f64()
        )?;
        if self.dry_run {
            writeln!(f)?;
            writeln!(f, "DRY RUN - No actual changes were made")?;
        }
        if self.interrupted {
            writeln!(f)?;
            writeln!(f, "INTERRUPTED - scan stopped before completion")?;
        }
        write!(f, "{rule}")
    }
}
