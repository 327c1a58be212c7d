//! Terminal progress for indexing runs, with log lines printed above the
//! spinners instead of through them.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

static MULTI_PROGRESS: OnceLock<MultiProgress> = OnceLock::new();

fn multi_progress() -> &'static MultiProgress {
    MULTI_PROGRESS.get_or_init(|| {
        let mp = MultiProgress::new();
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
        mp
    })
}

fn println_above(line: &str) {
    let _ = multi_progress().println(line.trim_end_matches('\r').to_string());
}

/// One spinner per site being indexed
#[derive(Default)]
pub struct SiteSpinners {
    bars: Mutex<HashMap<String, ProgressBar>>,
    hidden: bool,
}

impl SiteSpinners {
    /// Spinners that draw nothing (JSON output, non-interactive runs)
    pub fn hidden() -> Self {
        Self {
            bars: Mutex::new(HashMap::new()),
            hidden: true,
        }
    }

    /// Start a spinner for a site
    pub fn start(&self, site: &str) {
        let pb = if self.hidden {
            ProgressBar::hidden()
        } else {
            let pb = multi_progress().add(ProgressBar::new_spinner());
            pb.set_style(
                ProgressStyle::with_template("{spinner:.green} {prefix:.bold} [{pos} pages] {wide_msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        };
        pb.set_prefix(site.to_string());
        pb.set_message("starting");
        self.bars.lock().insert(site.to_string(), pb);
    }

    /// Record a stored page
    pub fn page(&self, site: &str, path: &str) {
        if let Some(pb) = self.bars.lock().get(site) {
            pb.inc(1);
            pb.set_message(path.to_string());
        }
    }

    /// Stop a site's spinner with a final message
    pub fn finish(&self, site: &str, message: &str) {
        if let Some(pb) = self.bars.lock().remove(site) {
            pb.finish_with_message(message.to_string());
        }
    }
}

/// `MakeWriter` that routes log output through the progress display
#[derive(Default, Clone)]
pub struct LogWriterFactory;

pub struct LogWriter {
    buffer: String,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.push_str(&String::from_utf8_lossy(buf));

        while let Some(idx) = self.buffer.find('\n') {
            println_above(&self.buffer[..idx]);
            self.buffer.drain(..idx + 1);
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buffer.is_empty() {
            println_above(&self.buffer);
            self.buffer.clear();
        }
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

impl<'a> MakeWriter<'a> for LogWriterFactory {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            buffer: String::new(),
        }
    }
}
