use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context as _;
use indicatif::ProgressBar;
use tracing::{error, warn};

use crate::config::Config;
use crate::util::create_progress_style;

/// Flag raised when the user asks the sweep to stop.
#[derive(Clone, Debug, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    /// Starts a background listener that raises the flag on the first Ctrl-C
    /// and exits the process on the second.
    pub fn listen() -> anyhow::Result<Self> {
        let interrupt = Self::default();
        let flag = interrupt.clone();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Unable to create signal handling runtime")?;

        std::thread::Builder::new()
            .name("interrupt".to_owned())
            .spawn(move || {
                runtime.block_on(async {
                    loop {
                        if let Err(err) = tokio::signal::ctrl_c().await {
                            error!("Unable to listen for Ctrl-C: {err}");
                            return;
                        }

                        if flag.is_set() {
                            #[allow(clippy::exit)]
                            std::process::exit(130);
                        }

                        warn!("Interrupt received, stopping the current job...");
                        flag.trigger();
                    }
                });
            })
            .context("Unable to spawn signal handling thread")?;

        Ok(interrupt)
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State shared by every stage of a sweep.
#[derive(Clone, Debug)]
pub struct Context {
    pub interrupt: Interrupt,
    pub show_commands: bool,
    pub show_progress: bool,
    pub decimal_places: usize,
}

impl Context {
    #[must_use]
    pub fn new(config: &Config, interrupt: Interrupt) -> Self {
        Self {
            interrupt,
            show_commands: config.show_commands,
            show_progress: true,
            decimal_places: config.decimal_places,
        }
    }

    /// A context without progress output or signal handling.
    #[must_use]
    pub fn quiet(decimal_places: usize) -> Self {
        Self {
            interrupt: Interrupt::default(),
            show_commands: false,
            show_progress: false,
            decimal_places,
        }
    }

    pub fn progress_bar(&self, length: Option<u64>, prefix: &str) -> anyhow::Result<ProgressBar> {
        if !self.show_progress {
            return Ok(ProgressBar::hidden());
        }

        let progress_bar = length.map_or_else(ProgressBar::new_spinner, ProgressBar::new);

        progress_bar.set_style(
            create_progress_style(
                "{spinner:.green} [{elapsed_precise}] {prefix} [{wide_bar:.cyan/blue}] {percent:>3}% {human_pos:>8}/{human_len:>8} ({smooth_per_sec:>6} FPS, {msg}, ETA: {smooth_eta:>3})",
            )
            .context("Unable to create progress bar style")?,
        );
        progress_bar.set_prefix(prefix.to_owned());
        progress_bar.enable_steady_tick(std::time::Duration::from_secs(1));

        Ok(progress_bar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_is_shared_between_clones() {
        let interrupt = Interrupt::default();
        let clone = interrupt.clone();

        assert!(!clone.is_set());
        interrupt.trigger();
        assert!(clone.is_set());
    }
}
