//! Run-info report.
//!
//! When enabled through [`RuntimeOptions::report`], the registry appends
//! one line per lifecycle edge with the wall-clock timestamps captured at
//! start and stop, so recordings made on different machines can be aligned
//! after the fact.
//!
//! [`RuntimeOptions::report`]: crate::config::RuntimeOptions::report

use crate::error::Result;
use chrono::{DateTime, Local, Utc};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

const TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.3f";

pub struct RunReport {
    file: File,
}

impl RunReport {
    /// Open (or create) the report file in append mode.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self { file })
    }

    pub fn record_start(&mut self, utc: DateTime<Utc>, local: DateTime<Local>) -> Result<()> {
        writeln!(self.file, "start system {}", utc.format(TIME_FORMAT))?;
        writeln!(self.file, "start local {}", local.format(TIME_FORMAT))?;
        self.file.flush()?;
        Ok(())
    }

    pub fn record_stop(&mut self, utc: DateTime<Utc>, local: DateTime<Local>) -> Result<()> {
        writeln!(self.file, "stop system {}", utc.format(TIME_FORMAT))?;
        writeln!(self.file, "stop local {}", local.format(TIME_FORMAT))?;
        self.file.flush()?;
        Ok(())
    }
}
