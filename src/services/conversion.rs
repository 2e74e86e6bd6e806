use crate::services::url::CanonicalUrl;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::fs;
use std::io;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

/// A fully built invocation of the external conversion tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    /// Render the command for logs with every occurrence of `secret` masked.
    pub fn display_masked(&self, secret: &str) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        for arg in &self.args {
            if !secret.is_empty() && arg == secret {
                parts.push(mask_token(secret));
            } else {
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }
}

/// Outcome of a finished tool run: merged stdout/stderr plus exit status.
#[derive(Debug, Clone)]
pub struct CompletedProcess {
    pub output: String,

    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

impl CompletedProcess {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Errors that can occur during a conversion
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("A conversion is already running")]
    Busy,

    #[error("Failed to create output directory {path}: {source}")]
    OutputDir {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to start {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} failed ({})", describe_exit(.exit_code))]
    ExternalTool {
        program: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("{program} timed out after {timeout:?}")]
    Timeout {
        program: String,
        timeout: Duration,
        output: String,
    },
}

impl ConversionError {
    /// Output captured from the tool before it failed, if it ever started.
    pub fn output(&self) -> Option<&str> {
        match self {
            ConversionError::ExternalTool { output, .. }
            | ConversionError::Timeout { output, .. } => Some(output),
            _ => None,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// Keep the first four characters of a token and hide the rest.
pub fn mask_token(token: &str) -> String {
    let visible: String = token.chars().take(4).collect();
    format!("{visible}***")
}

/// Launches the external tool.
///
/// Abstracted so the conversion workflow can run against a stand-in tool.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessRunner: Send + Sync {
    /// Run `command` to completion, merging stdout and stderr.
    ///
    /// Only launch failures and timeouts are errors here; a non-zero exit is
    /// reported through [`CompletedProcess::exit_code`].
    fn run(
        &self,
        command: &ToolCommand,
        timeout: Duration,
    ) -> BoxFuture<'static, Result<CompletedProcess, ConversionError>>;
}

/// [`ProcessRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

impl ProcessRunner for TokioProcessRunner {
    fn run(
        &self,
        command: &ToolCommand,
        timeout: Duration,
    ) -> BoxFuture<'static, Result<CompletedProcess, ConversionError>> {
        run_merged(command.clone(), timeout).boxed()
    }
}

async fn run_merged(
    command: ToolCommand,
    timeout: Duration,
) -> Result<CompletedProcess, ConversionError> {
    let start = Instant::now();

    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ConversionError::Launch {
            program: command.program.clone(),
            source,
        })?;

    // Both pipes feed one channel so lines keep their arrival order
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, line_tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, line_tx.clone()));
    }
    drop(line_tx);

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut output = String::new();
    loop {
        tokio::select! {
            line = line_rx.recv() => match line {
                Some(line) => {
                    tracing::debug!("[{}] {}", command.program, line);
                    output.push_str(&line);
                    output.push('\n');
                }
                None => break,
            },
            _ = &mut deadline => {
                return Err(timed_out(&mut child, &command.program, timeout, output).await);
            }
        }
    }

    let status = tokio::select! {
        status = child.wait() => status.map_err(|source| ConversionError::Launch {
            program: command.program.clone(),
            source,
        })?,
        _ = &mut deadline => {
            return Err(timed_out(&mut child, &command.program, timeout, output).await);
        }
    };

    let duration = start.elapsed();
    tracing::info!(
        "{} completed in {:.2}s ({})",
        command.program,
        duration.as_secs_f32(),
        describe_exit(&status.code())
    );

    Ok(CompletedProcess {
        output,
        exit_code: status.code(),
        duration,
    })
}

async fn timed_out(
    child: &mut tokio::process::Child,
    program: &str,
    timeout: Duration,
    output: String,
) -> ConversionError {
    tracing::warn!("{} timed out after {:?}, killing it", program, timeout);
    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill {}: {}", program, e);
    }
    ConversionError::Timeout {
        program: program.to_string(),
        timeout,
        output,
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                if tx.send(line).is_err() {
                    break;
                }
            }
        }
    }
}

/// Create a fresh, never reused output directory under `root`.
///
/// Directories are named `New_gui_<timestamp>`; a numeric suffix is appended
/// when two jobs start within the same second.
pub fn create_output_dir(root: &Utf8Path) -> Result<Utf8PathBuf, ConversionError> {
    fs::create_dir_all(root).map_err(|source| ConversionError::OutputDir {
        path: root.to_path_buf(),
        source,
    })?;

    let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let mut attempt = 1;
    loop {
        let name = if attempt == 1 {
            format!("New_gui_{stamp}")
        } else {
            format!("New_gui_{stamp}_{attempt}")
        };
        let path = root.join(name);

        match fs::create_dir(&path) {
            Ok(()) => {
                tracing::info!("Created output directory: {}", path);
                return Ok(path);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(source) => return Err(ConversionError::OutputDir { path, source }),
        }
    }
}

/// Runs the design-to-code converter.
///
/// The command line is `<tool> -o <output_dir> <canonical_url> <token>`; the URL
/// must precede the token.
pub struct ConversionService<R = TokioProcessRunner> {
    tool: String,
    timeout: Duration,
    runner: R,
}

impl ConversionService<TokioProcessRunner> {
    pub fn new(tool: impl Into<String>, timeout: Duration) -> Self {
        Self::with_runner(tool, timeout, TokioProcessRunner)
    }
}

impl<R: ProcessRunner> ConversionService<R> {
    pub fn with_runner(tool: impl Into<String>, timeout: Duration, runner: R) -> Self {
        Self {
            tool: tool.into(),
            timeout,
            runner,
        }
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn build_command(
        &self,
        token: &str,
        canonical_url: &CanonicalUrl,
        output_dir: &Utf8Path,
    ) -> ToolCommand {
        ToolCommand {
            program: self.tool.clone(),
            args: vec![
                "-o".to_string(),
                output_dir.to_string(),
                canonical_url.to_string(),
                token.to_string(),
            ],
        }
    }

    /// Run one conversion job to completion.
    ///
    /// Fails with [`ConversionError::ExternalTool`] on a non-zero exit, carrying
    /// everything the tool printed. Never retried.
    pub async fn convert(
        &self,
        token: &str,
        canonical_url: &CanonicalUrl,
        output_dir: &Utf8Path,
    ) -> Result<CompletedProcess, ConversionError> {
        let command = self.build_command(token, canonical_url, output_dir);
        tracing::info!("Executing: {}", command.display_masked(token));

        let completed = self.runner.run(&command, self.timeout).await?;
        tracing::info!("Command output:\n{}", completed.output);

        if completed.success() {
            Ok(completed)
        } else {
            tracing::error!(
                "{} failed with {}",
                self.tool,
                describe_exit(&completed.exit_code)
            );
            Err(ConversionError::ExternalTool {
                program: self.tool.clone(),
                exit_code: completed.exit_code,
                output: completed.output,
            })
        }
    }
}
