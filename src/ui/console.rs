// Console front end - Prompt-driven flow on top of AppController
//
// Prompts for the token and URL (offering the saved values as defaults),
// runs one conversion while streaming the tool's output, then offers any
// update the background check found.

use crate::models::AppState;
use crate::services::conversion::{ProcessRunner, mask_token};
use crate::services::installer::DownloadProgress;
use crate::services::update::UpdateCheckState;
use crate::services::url::UrlFormatError;
use crate::ui::bridge::WorkerEvent;
use crate::ui::controller::{AppController, MissingInputs};
use anyhow::{Context, Result};
use std::io::{BufRead, Write};
use std::time::Duration;
use thiserror::Error;

/// Pause before prompting again after blank input
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Input ended (EOF) before the flow completed
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Input closed by user")]
pub struct Interrupted;

/// Prompt-driven front end reading from `input` and writing to `output`
pub struct ConsoleUi<I, O> {
    input: I,
    output: O,
    retry_delay: Duration,

    /// Number of output log lines already written
    printed: usize,
}

impl<I: BufRead, O: Write> ConsoleUi<I, O> {
    pub fn new(input: I, output: O) -> Self {
        Self {
            input,
            output,
            retry_delay: DEFAULT_RETRY_DELAY,
            printed: 0,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn into_output(self) -> O {
        self.output
    }

    /// Run the whole flow: prompt, convert, offer an update
    ///
    /// # Returns
    /// Whether the conversion succeeded. Fails with [`Interrupted`] when input
    /// ends early.
    pub fn run<P: ProcessRunner + 'static>(
        &mut self,
        controller: &mut AppController<P>,
        runtime: &tokio::runtime::Handle,
    ) -> Result<bool> {
        // A corrupt file was already reported into the output log
        let _ = controller.load_settings();
        controller.start_update_check();
        self.render(controller)?;

        loop {
            let (token, url) = self.collect_inputs(controller)?;
            controller.set_inputs(&token, &url);

            match controller.start_conversion() {
                Ok(_) => break,
                Err(e) if e.downcast_ref::<UrlFormatError>().is_some() => {
                    writeln!(self.output, "{e}")?;
                }
                Err(e) if e.downcast_ref::<MissingInputs>().is_some() => {
                    writeln!(self.output, "{e}")?;
                    std::thread::sleep(self.retry_delay);
                }
                Err(e) => return Err(e),
            }
        }

        self.pump_until(controller, runtime, |s| !s.is_converting)?;
        let success = controller
            .state_manager()
            .read(|s| s.last_conversion_ok.unwrap_or(false));

        self.pump_until(controller, runtime, |s| !s.update.is_checking())?;
        self.offer_update(controller, runtime)?;

        Ok(success)
    }

    /// Prompt until both the token and the URL are non-empty
    pub fn collect_inputs<P: ProcessRunner + 'static>(
        &mut self,
        controller: &AppController<P>,
    ) -> Result<(String, String)> {
        loop {
            let (saved_token, saved_url) = controller
                .state_manager()
                .read(|s| (s.token.trim().to_string(), s.url.trim().to_string()));

            let token_hint = if saved_token.is_empty() {
                String::new()
            } else {
                mask_token(&saved_token)
            };
            let token = self.prompt("Figma token", &token_hint)?;
            let token = if token.is_empty() { saved_token } else { token };

            let url = self.prompt("Figma file URL", &saved_url)?;
            let url = if url.is_empty() { saved_url } else { url };

            if !token.is_empty() && !url.is_empty() {
                return Ok((token, url));
            }

            writeln!(self.output, "{}", MissingInputs)?;
            self.output.flush()?;
            std::thread::sleep(self.retry_delay);
        }
    }

    fn offer_update<P: ProcessRunner + 'static>(
        &mut self,
        controller: &mut AppController<P>,
        runtime: &tokio::runtime::Handle,
    ) -> Result<()> {
        let update = match controller.state_manager().update_state() {
            UpdateCheckState::UpdateFound(update) => update,
            // Failures are only logged
            _ => {
                controller.state_manager().acknowledge_update();
                return Ok(());
            }
        };

        writeln!(self.output)?;
        writeln!(self.output, "Version {} is available.", update.version)?;
        writeln!(self.output, "{}", update.notes_or_default())?;

        if !self.confirm("Install it now?", false)? {
            controller.state_manager().acknowledge_update();
            return Ok(());
        }

        if let Err(e) = controller.start_update_install() {
            controller.state_manager().acknowledge_update();
            self.render(controller)?;
            tracing::warn!("Update not installed: {:#}", e);
            return Ok(());
        }

        self.pump_until(controller, runtime, |s| !s.is_installing)?;
        writeln!(self.output)?;
        controller.state_manager().acknowledge_update();

        if controller.restart_pending() && self.confirm("Restart now?", true)? {
            self.output.flush()?;
            // Only comes back if the restart failed
            let _ = controller.restart_into_update();
            self.render(controller)?;
        }
        Ok(())
    }

    /// Apply worker events until `done` holds, echoing output as it arrives
    fn pump_until<P, F>(
        &mut self,
        controller: &mut AppController<P>,
        runtime: &tokio::runtime::Handle,
        done: F,
    ) -> Result<()>
    where
        P: ProcessRunner + 'static,
        F: Fn(&AppState) -> bool,
    {
        loop {
            self.render(controller)?;
            if controller.state_manager().read(&done) {
                return Ok(());
            }

            let Some(event) = runtime.block_on(controller.next_event()) else {
                return Ok(());
            };
            if let WorkerEvent::DownloadProgress(progress) = &event {
                self.render_progress(*progress)?;
            }
            controller.handle_event(event);
        }
    }

    /// Write output log lines not yet shown
    fn render<P>(&mut self, controller: &AppController<P>) -> Result<()>
    where
        P: ProcessRunner + 'static,
    {
        let lines: Vec<String> = controller
            .state_manager()
            .read(|s| s.output_log.iter().skip(self.printed).cloned().collect());
        for line in &lines {
            writeln!(self.output, "{line}")?;
        }
        self.printed += lines.len();
        self.output.flush()?;
        Ok(())
    }

    fn render_progress(&mut self, progress: DownloadProgress) -> Result<()> {
        match progress.fraction() {
            Some(fraction) => write!(self.output, "\rDownloading... {:>3.0}%", fraction * 100.0)?,
            None => write!(self.output, "\rDownloading... {} bytes", progress.downloaded)?,
        }
        self.output.flush()?;
        Ok(())
    }

    fn prompt(&mut self, label: &str, default: &str) -> Result<String> {
        if default.is_empty() {
            write!(self.output, "{label}: ")?;
        } else {
            write!(self.output, "{label} [{default}]: ")?;
        }
        self.output.flush()?;
        self.read_line()
    }

    fn confirm(&mut self, question: &str, default_yes: bool) -> Result<bool> {
        let hint = if default_yes { "Y/n" } else { "y/N" };
        write!(self.output, "{question} [{hint}] ")?;
        self.output.flush()?;

        let answer = self.read_line()?.to_lowercase();
        Ok(match answer.as_str() {
            "" => default_yes,
            "y" | "yes" => true,
            _ => false,
        })
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .context("Failed to read from standard input")?;
        if read == 0 {
            return Err(Interrupted.into());
        }
        Ok(line.trim().to_string())
    }
}
