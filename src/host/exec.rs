// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The remote command-execution protocol.
//!
//! Commands run through a plain shell, so the exit status is smuggled back
//! on stdout: the wrapped command ends with `echo $?`, and the demultiplexer
//! holds back any chunk tail that looks like that marker until the channel
//! closes.

use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, trace};

use super::Host;
use crate::error::{FleetError, Result};
use crate::log::Severity;
use crate::security::contains_sudo_failure;
use crate::transport::{ChannelEvent, ChannelInput, ExecChannel};
use crate::utils::shell::{chomp, escape};

/// Stream type of standard error in SSH extended data.
const STDERR_STREAM: u32 = 1;

/// Longest run of digits accepted as a status marker.
const MAX_STATUS_DIGITS: usize = 3;

/// Callback receiving a stream of command output.
pub type OutputCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Concurrent worker receiving the live channel while output drains.
pub type ChannelBody =
    Box<dyn FnOnce(ChannelInput) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Per-call options for [`Host::exec`].
#[derive(Clone)]
pub struct ExecOptions {
    /// Payload written to the command's standard input
    pub stdin: Option<Vec<u8>>,
    pub on_stdout: Option<OutputCallback>,
    pub on_stderr: Option<OutputCallback>,
    /// Log output lines to the host log as they arrive
    pub echo: bool,
    /// Redirect stdout to this remote file
    pub to: Option<String>,
    /// Redirect stdin from this remote file
    pub from: Option<String>,
    /// Raise [`FleetError::CommandFailure`] on non-zero exit
    pub check_exit_status: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            stdin: None,
            on_stdout: None,
            on_stderr: None,
            echo: false,
            to: None,
            from: None,
            check_exit_status: true,
        }
    }
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    pub fn on_stdout<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_stdout = Some(Arc::new(f));
        self
    }

    pub fn on_stderr<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_stderr = Some(Arc::new(f));
        self
    }

    pub fn echo(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Redirect stdout into a remote file.
    pub fn stdout_to(mut self, path: impl Into<String>) -> Self {
        self.to = Some(path.into());
        self
    }

    /// Feed stdin from a remote file.
    pub fn stdin_from(mut self, path: impl Into<String>) -> Self {
        self.from = Some(path.into());
        self
    }

    /// Accept any exit status.
    pub fn unchecked(mut self) -> Self {
        self.check_exit_status = false;
        self
    }
}

/// Everything a command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// Parsed status marker; `None` when the marker never arrived
    pub status: Option<i32>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Shell state folded into every command line.
pub(crate) struct CommandEnv<'a> {
    pub env: &'a [(String, String)],
    pub cwd: Option<&'a str>,
    pub sudo: Option<&'a str>,
}

/// Build the full command line sent to the remote shell.
pub(crate) fn wrap_command(command: &str, shell: &CommandEnv<'_>, opts: &ExecOptions) -> String {
    let mut line = String::new();

    if !shell.env.is_empty() {
        let assignments: Vec<String> = shell
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k.to_uppercase(), escape(v)))
            .collect();
        line = format!("{} {command}", assignments.join(" "));
    } else {
        line.push_str(command);
    }

    line = format!("cd {}; {line}", escape(shell.cwd.unwrap_or_default()));

    if let Some(from) = &opts.from {
        line.push_str(&format!(" <{}", escape(from)));
    }
    if let Some(to) = &opts.to {
        line.push_str(&format!(" >{}", escape(to)));
    }

    if !line.trim_end().ends_with(';') {
        line.push(';');
    }
    line.push_str(" echo $?; ");

    match shell.sudo {
        Some(user) => format!("sudo -S -u {} bash -c {}", escape(user), escape(&line)),
        None => line,
    }
}

/// Byte offset where a trailing status marker (`\d{1,3}\n`) starts.
fn marker_start(chunk: &[u8]) -> Option<usize> {
    let body = chunk.strip_suffix(b"\n")?;
    let digits = body
        .iter()
        .rev()
        .take_while(|b| b.is_ascii_digit())
        .count()
        .min(MAX_STATUS_DIGITS);
    (digits > 0).then(|| body.len() - digits)
}

/// Splits a channel's output into stdout, stderr and the status marker.
#[derive(Debug, Default)]
pub(crate) struct OutputDemux {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    /// Provisional marker held back from stdout
    held: Vec<u8>,
    /// Bytes of stdout already echoed to the host log
    echoed: usize,
}

impl OutputDemux {
    /// Accept a stdout chunk and return the bytes that are now known to be
    /// real output.
    pub(crate) fn push_stdout(&mut self, chunk: &[u8]) -> Vec<u8> {
        // A held marker followed by more data was ordinary output.
        let mut flushed = std::mem::take(&mut self.held);
        match marker_start(chunk) {
            Some(pos) => {
                flushed.extend_from_slice(&chunk[..pos]);
                self.held = chunk[pos..].to_vec();
            }
            None => flushed.extend_from_slice(chunk),
        }
        self.stdout.extend_from_slice(&flushed);
        flushed
    }

    pub(crate) fn push_stderr(&mut self, chunk: &[u8]) {
        self.stderr.extend_from_slice(chunk);
    }

    /// Complete stdout lines not yet echoed. With `all`, the trailing
    /// partial line is included.
    fn take_echo_lines(&mut self, all: bool) -> Vec<String> {
        let pending = &self.stdout[self.echoed..];
        let end = if all {
            pending.len()
        } else {
            match pending.iter().rposition(|b| *b == b'\n') {
                Some(pos) => pos + 1,
                None => return Vec::new(),
            }
        };
        let text = String::from_utf8_lossy(&pending[..end]).into_owned();
        self.echoed += end;
        text.lines().map(str::to_string).collect()
    }

    pub(crate) fn status(&self) -> Option<i32> {
        let digits = self.held.strip_suffix(b"\n")?;
        std::str::from_utf8(digits).ok()?.parse().ok()
    }

    pub(crate) fn finish(self) -> ExecOutput {
        let status = self.status();
        ExecOutput {
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            status,
        }
    }
}

impl Host {
    /// Run `command` and return its stdout with one trailing newline
    /// removed.
    ///
    /// Fails with [`FleetError::CommandFailure`] on a non-zero exit unless
    /// [`ExecOptions::unchecked`] is set, and with [`FleetError::Protocol`]
    /// when checking is on but no status marker arrived.
    pub async fn exec(&self, command: &str, opts: ExecOptions) -> Result<String> {
        let output = self.exec_output(command, opts).await?;
        Ok(chomp(&output.stdout).to_string())
    }

    /// Run `command` and return stdout, stderr and status.
    pub async fn exec_output(&self, command: &str, opts: ExecOptions) -> Result<ExecOutput> {
        self.run_channel(command, opts, None)
            .await
            .map_err(into_fleet_error)
    }

    /// Run `command` while `body` drives its input side concurrently.
    ///
    /// Any `stdin` payload is written before `body` starts. Standard input
    /// is closed once `body` returns; `body` may close it earlier or
    /// close the whole channel to stop the remote process.
    pub async fn exec_with<F, Fut>(
        &self,
        command: &str,
        opts: ExecOptions,
        body: F,
    ) -> anyhow::Result<String>
    where
        F: FnOnce(ChannelInput) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let body: ChannelBody = Box::new(move |input| Box::pin(body(input)));
        let output = self.run_channel(command, opts, Some(body)).await?;
        Ok(chomp(&output.stdout).to_string())
    }

    async fn run_channel(
        &self,
        command: &str,
        opts: ExecOptions,
        body: Option<ChannelBody>,
    ) -> anyhow::Result<ExecOutput> {
        let (wrapped, stdin, escalated) = {
            let state = self.state();
            let env: Vec<(String, String)> = state
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let shell = CommandEnv {
                env: &env,
                cwd: state.cwd.as_deref(),
                sudo: state.sudo.as_deref(),
            };
            let wrapped = wrap_command(command, &shell, &opts);

            let stdin = match (&state.sudo, &state.password) {
                (Some(_), Some(password)) => {
                    let mut data = password.with_newline().to_vec();
                    data.extend_from_slice(opts.stdin.as_deref().unwrap_or_default());
                    Some(data)
                }
                _ => opts.stdin.clone(),
            };
            (wrapped, stdin, state.sudo.is_some())
        };

        let _queued = self.exec_queue.lock().await;
        let connection = self.connection().await?;
        debug!(host = %self.name, "exec: {}", wrapped);

        let ExecChannel { mut events, input } = connection.open_channel(&wrapped).await?;
        if let Some(data) = stdin {
            input.send(data)?;
        }

        let drain = async {
            let mut demux = OutputDemux::default();
            while let Some(event) = events.recv().await {
                match event {
                    ChannelEvent::Data(data) => {
                        let flushed = demux.push_stdout(&data);
                        if !flushed.is_empty() {
                            if let Some(cb) = &opts.on_stdout {
                                cb(&String::from_utf8_lossy(&flushed));
                            }
                        }
                        if opts.echo {
                            for line in demux.take_echo_lines(false) {
                                self.log(Severity::Info, line);
                            }
                        }
                    }
                    ChannelEvent::ExtendedData { ext, data } if ext == STDERR_STREAM => {
                        demux.push_stderr(&data);
                        let text = String::from_utf8_lossy(&data);
                        if let Some(cb) = &opts.on_stderr {
                            cb(&text);
                        }
                        if opts.echo {
                            self.log(Severity::Stderr, chomp(&text));
                        }
                    }
                    ChannelEvent::ExitStatus(code) => {
                        trace!(host = %self.name, "transport reported exit status {code}");
                    }
                    _ => {}
                }
            }
            if opts.echo {
                for line in demux.take_echo_lines(true) {
                    self.log(Severity::Info, line);
                }
            }
            demux
        };

        let worker = async {
            let result = match body {
                Some(body) => body(input.clone()).await,
                None => Ok(()),
            };
            // The channel may already be gone; nothing left to close then.
            let _ = input.eof();
            result
        };

        let (demux, worker_result) = tokio::join!(drain, worker);
        drop(input);
        worker_result?;

        let output = demux.finish();
        if escalated && contains_sudo_failure(&output.stderr) {
            self.log(Severity::Warn, format!("sudo authentication failed for `{command}`"));
        }
        if opts.check_exit_status {
            let code = output.status.ok_or_else(|| FleetError::Protocol {
                host: self.name.clone(),
                command: command.to_string(),
            })?;
            if code != 0 {
                return Err(FleetError::CommandFailure {
                    host: self.name.clone(),
                    command: command.to_string(),
                    code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                }
                .into());
            }
        }
        Ok(output)
    }
}

/// Recover the typed error from a channel run without a caller body.
fn into_fleet_error(err: anyhow::Error) -> FleetError {
    match err.downcast::<FleetError>() {
        Ok(err) => err,
        Err(other) => FleetError::Io(std::io::Error::other(format!("{other:#}"))),
    }
}
