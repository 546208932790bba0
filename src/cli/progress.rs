//! Progress bar and summary reporting for bulk cache fetches.

use std::sync::atomic::{AtomicU64, Ordering};

use console::style;
use indicatif::{HumanBytes, HumanDuration, MultiProgress, ProgressBar, ProgressStyle};

use crate::{ActivationReport, SyncProgress, SyncStats};

const SEPARATOR: &str = "────────────────────────────────────────────────────────────";

/// Creates the bar tracking how many resources of a batch are done.
fn make_total_progress_bar(count: u64) -> ProgressBar {
    let bar = ProgressBar::new(count);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} [{bar:40.green/white}] {pos}/{len} resources - {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━━╌"),
    );
    bar
}

/// Reports bulk fetch progress on the terminal.
pub struct CliProgress {
    multi: MultiProgress,
    total: ProgressBar,
    bytes: AtomicU64,
}

impl Default for CliProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl CliProgress {
    pub fn new() -> Self {
        let multi = MultiProgress::new();
        let total = multi.add(make_total_progress_bar(0));
        Self {
            multi,
            total,
            bytes: AtomicU64::new(0),
        }
    }

    /// Clears the bars once the batch is over.
    pub fn finish(&self) {
        self.total.finish_and_clear();
        self.multi.clear().ok();
    }
}

impl SyncProgress for CliProgress {
    fn on_batch_start(&self, count: usize) {
        self.total.set_length(count as u64);
        self.total.set_position(0);
        self.total.enable_steady_tick(std::time::Duration::from_millis(250));
    }

    fn on_fetch_start(&self, url: &str) {
        self.total.set_message(url.to_string());
    }

    fn on_fetch_complete(&self, url: &str, bytes: u64) {
        let total = self.bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.total.inc(1);
        self.total.set_message(format!("{} fetched", HumanBytes(total)));
        let _ = self
            .multi
            .println(format!("  {url} ({})", HumanBytes(bytes)));
    }

    fn on_error(&self, url: &str, error: &str) {
        let _ = self
            .multi
            .println(format!("  {} {url}: {error}", style("failed").red()));
    }
}

/// Prints a summary of a bulk fetch.
pub fn print_summary(title: &str, stats: &SyncStats) {
    println!("\n{SEPARATOR}");
    println!("{}", style(title).bold());
    println!("{SEPARATOR}");
    println!("  Resources fetched: {}", stats.fetched);
    if stats.already_cached > 0 {
        println!("  Already cached:    {}", stats.already_cached);
    }
    if stats.fetched > 0 {
        println!("  Total size:        {}", HumanBytes(stats.total_bytes));
        println!("  Total time:        {}", HumanDuration(stats.elapsed));
        println!(
            "  Average speed:     {}/s",
            HumanBytes(stats.average_speed())
        );
    }
    println!("{SEPARATOR}");
}

/// Prints what an activation did to the current partition.
pub fn print_activation(report: &ActivationReport) {
    match report {
        ActivationReport::Fresh { promoted } => {
            println!(
                "{} fresh cache, {promoted} core resource(s) promoted",
                style("Activated:").green().bold()
            );
        }
        ActivationReport::Upgraded {
            kept,
            evicted,
            promoted,
        } => {
            println!(
                "{} {kept} kept, {evicted} evicted, {promoted} promoted",
                style("Upgraded:").green().bold()
            );
        }
        ActivationReport::Cleared { error } => {
            println!(
                "{} all partitions cleared after error: {error}",
                style("Activation failed:").red().bold()
            );
        }
    }
}
