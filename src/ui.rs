use anyhow::Result;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::notify::{EventObserver, JobEvent};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    pub fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    /// Observer rendering progress for `job_id` only; other jobs' events are ignored.
    pub fn job_progress(&self, job_id: &str) -> JobProgress {
        let bar = if self.use_pretty() {
            let bar = ProgressBar::new(100);
            bar.set_draw_target(ProgressDrawTarget::stderr());
            bar.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template(
                "{spinner} {prefix} [{bar:40}] {pos:>3}% {elapsed_precise} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
            bar.set_style(style);
            bar.set_prefix(job_id.to_string());
            Some(bar)
        } else {
            eprintln!("==> job {}", job_id);
            None
        };
        JobProgress {
            job_id: job_id.to_string(),
            start: Instant::now(),
            bar,
        }
    }
}

/// Terminal progress for one job.
pub struct JobProgress {
    job_id: String,
    start: Instant,
    bar: Option<ProgressBar>,
}

impl JobProgress {
    fn finish(&self, message: String) {
        match &self.bar {
            Some(bar) => bar.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

impl EventObserver for JobProgress {
    fn deliver(&self, event: &JobEvent) -> Result<()> {
        if event.job_id() != self.job_id {
            return Ok(());
        }
        let elapsed = format_duration(self.start.elapsed());
        match event {
            JobEvent::Progress { progress, .. } => match &self.bar {
                Some(bar) => bar.set_position(progress.round() as u64),
                None => eprintln!("    {:>5.1}%", progress),
            },
            JobEvent::Completed {
                output_location, ..
            } => {
                if let Some(bar) = &self.bar {
                    bar.set_position(100);
                }
                self.finish(format!("✔ {} ({})", output_location, elapsed));
            }
            JobEvent::Failed { message, .. } => {
                if let Some(bar) = &self.bar {
                    bar.abandon_with_message(format!("✘ {} ({})", message, elapsed));
                } else {
                    eprintln!("✘ {} ({})", message, elapsed);
                }
            }
        }
        Ok(())
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
