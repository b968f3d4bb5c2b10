use indicatif::{ProgressBar, ProgressStyle};
use snapkeeper_core::{ProgressEvent, ProgressReporter, Stage};
use std::sync::Mutex;

/// CLI progress reporter using indicatif.
///
/// - Scan: spinner (total unknown upfront)
/// - Hash / Copy / Verification: byte progress bar with throughput
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        let mut guard = self.bar.lock().unwrap();
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn finish_bar(&self) {
        let mut guard = self.bar.lock().unwrap();
        if let Some(pb) = guard.take() {
            pb.finish_and_clear();
        }
    }
}

impl Default for CliReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for CliReporter {
    fn on_stage_start(&self, stage: Stage) {
        let pb = match stage {
            Stage::Scan => {
                let pb = ProgressBar::new_spinner();
                pb.set_style(
                    ProgressStyle::with_template("{spinner:.cyan} {msg}")
                        .unwrap()
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
                );
                pb.set_message("Scanning...");
                pb
            }
            _ => {
                let pb = ProgressBar::new(0);
                pb.set_style(
                    ProgressStyle::with_template(
                        "  {spinner:.cyan} {prefix} [{bar:30.cyan/dim}] {pos}/{len} files {msg}",
                    )
                    .unwrap()
                    .progress_chars("━╸─")
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
                );
                pb.set_prefix(stage.as_str());
                pb
            }
        };
        pb.enable_steady_tick(std::time::Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_progress(&self, event: &ProgressEvent) {
        let guard = self.bar.lock().unwrap();
        let Some(pb) = guard.as_ref() else { return };
        if event.stage == Stage::Scan {
            pb.set_message(format!(
                "Scanning... {} files found, {} errors",
                event.files_done, event.error_count
            ));
            return;
        }
        if pb.length() != Some(event.files_total) {
            pb.set_length(event.files_total);
        }
        pb.set_position(event.files_done);
        let mut status = format!("({:.1} MB/s)", event.mb_per_sec);
        if event.paused {
            status.push_str(" [paused]");
        }
        pb.set_message(status);
    }

    fn on_stage_complete(&self, stage: Stage, files: u64, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m {} complete: {} files in {:.2}s",
            stage.as_str(),
            files,
            duration_secs
        );
    }

    fn on_job_failed(&self, job_id: i64, destination: &str, error: &str) {
        eprintln!(
            "  \x1b[31m✗\x1b[0m job {} failed for {}: {}",
            job_id, destination, error
        );
    }
}
