//! Frame sources
//!
//! `CommandCapture` shells out to a camera tool that writes one JPEG/PNG to
//! stdout (e.g. `rpicam-still -o -` or `fswebcam -`). `FileCapture` reads a
//! picked image file on every call.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use crate::collab::CaptureSource;
use crate::{Error, Result};

/// Default timeout for one camera invocation
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Captures a frame by running an external camera command
#[derive(Debug, Clone)]
pub struct CommandCapture {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandCapture {
    /// Create a capture source running `program` with `args`
    #[must_use]
    pub const fn new(program: String, args: Vec<String>) -> Self {
        Self {
            program,
            args,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Build from a whitespace-separated command line
    ///
    /// # Errors
    ///
    /// Returns error if the command line is empty
    pub fn from_command_line(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(ToString::to_string);
        let program = parts
            .next()
            .ok_or_else(|| Error::Config("capture command is empty".to_string()))?;
        Ok(Self::new(program, parts.collect()))
    }

    /// Override the per-capture timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Program that will be executed
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments passed to the program
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl CaptureSource for CommandCapture {
    async fn capture(&self) -> Result<Vec<u8>> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Capture(format!("failed to spawn {}: {e}", self.program)))?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Capture(format!("camera timed out after {:?}", self.timeout)))?
            .map_err(|e| Error::Capture(format!("camera command failed: {e}")))?;

        if !output.stderr.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::trace!(program = %self.program, stderr = %stderr, "camera stderr");
        }

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            return Err(Error::Capture(format!("camera exited with code {code}")));
        }

        if output.stdout.is_empty() {
            return Err(Error::Capture("camera produced no image".to_string()));
        }

        Ok(output.stdout)
    }
}

/// Reads a picked image file
#[derive(Debug, Clone)]
pub struct FileCapture {
    path: PathBuf,
}

impl FileCapture {
    /// Create a source that reads `path`
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl CaptureSource for FileCapture {
    async fn capture(&self) -> Result<Vec<u8>> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|e| Error::Capture(format!("failed to read {}: {e}", self.path.display())))
    }
}
