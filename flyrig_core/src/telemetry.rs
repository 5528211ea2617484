//! Per-trial telemetry streams.
//!
//! Each stream is a newline-delimited, comma-separated log with a fixed
//! header row, opened and closed at trial phase boundaries. Opening a stream
//! closes its predecessor so two trials never interleave in one file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub struct TelemetryStream {
    header: &'static str,
    out: Option<BufWriter<File>>,
}

impl TelemetryStream {
    pub fn new(header: &'static str) -> Self {
        Self { header, out: None }
    }

    /// Open a fresh log file and write the header row. Any previously open
    /// file is flushed and closed first.
    pub fn open(&mut self, path: &Path) -> std::io::Result<()> {
        self.close();
        let file = File::create(path)?;
        let mut out = BufWriter::new(file);
        writeln!(out, "{}", self.header)?;
        self.out = Some(out);
        Ok(())
    }

    /// Flush and close the stream. Safe to call when already closed.
    pub fn close(&mut self) {
        if let Some(mut out) = self.out.take()
            && let Err(e) = out.flush()
        {
            tracing::warn!(error = %e, "failed to flush telemetry stream");
        }
    }

    pub fn is_open(&self) -> bool {
        self.out.is_some()
    }

    /// Append one data row. A write failure closes the stream and emits one
    /// warning rather than failing the control loop.
    pub fn record(&mut self, row: std::fmt::Arguments<'_>) {
        if let Some(out) = &mut self.out
            && let Err(e) = writeln!(out, "{row}")
        {
            tracing::warn!(error = %e, "telemetry write failed; closing stream");
            self.out = None;
        }
    }
}
