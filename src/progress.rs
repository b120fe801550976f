use indicatif::{ProgressBar, ProgressFinish, ProgressStyle};

const BAR_TEMPLATE: &str =
    "[{elapsed_precise}] {bar:40.cyan/blue} {human_pos:>7}/{human_len:7} {msg}";
const SPINNER_TEMPLATE: &str = "[{elapsed_precise}] {spinner} {human_pos:>7} {msg}";

/// Receives per-phase progress of an import.
///
/// Each phase starts with an optional total, then gets increments as records
/// are written. Totals are display hints only. A phase ends with
/// `finish_phase` once its table is committed, or `abandon_phase` when the
/// table was rolled back.
pub trait ProgressSink: Send {
    fn start_phase(&mut self, phase: &'static str, total: Option<u64>);
    fn increment(&mut self, completed: u64);
    fn finish_phase(&mut self);
    fn abandon_phase(&mut self);
}

/// Draws one indicatif bar per phase and leaves finished bars on screen.
pub struct TerminalProgress {
    bar: Option<ProgressBar>,
}

impl TerminalProgress {
    pub fn new() -> Self {
        TerminalProgress { bar: None }
    }
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self::new()
    }
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar())
}

impl ProgressSink for TerminalProgress {
    fn start_phase(&mut self, phase: &'static str, total: Option<u64>) {
        self.finish_phase();
        let bar = match total {
            Some(total) => ProgressBar::new(total).with_style(style(BAR_TEMPLATE)),
            None => ProgressBar::new_spinner().with_style(style(SPINNER_TEMPLATE)),
        };
        self.bar = Some(
            bar.with_message(phase)
                .with_finish(ProgressFinish::AndLeave),
        );
    }

    fn increment(&mut self, completed: u64) {
        if let Some(bar) = &self.bar {
            bar.inc(completed);
        }
    }

    fn finish_phase(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish();
        }
    }

    fn abandon_phase(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.abandon_with_message(format!("{} (rolled back)", bar.message()));
        }
    }
}

/// Discards all progress; used with `--no-progress` and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn start_phase(&mut self, _phase: &'static str, _total: Option<u64>) {}
    fn increment(&mut self, _completed: u64) {}
    fn finish_phase(&mut self) {}
    fn abandon_phase(&mut self) {}
}
