use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::artifact::run_command;
use crate::fetch::download_to_path;
use crate::sanitize::{build_kill_command, classify_kill_exit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    Terminated,
    NotRunning,
}

/// Everything the stage sequencer does to the outside world: network, child
/// processes and the persistent user PATH.
pub trait Host {
    /// Writes the body of `url` to `dest`. No retry.
    fn fetch(&mut self, url: &str, dest: &Path) -> Result<()>;

    /// Runs `command` to completion; a nonzero exit is an error carrying `context`.
    fn run(&mut self, command: &mut Command, context: &str) -> Result<()>;

    /// Starts a background process that [`terminate_daemon`] must later stop.
    fn spawn_daemon(&mut self, command: &mut Command, process_name: &str) -> Result<DaemonHandle>;

    /// Force-terminates every process with this image name.
    fn kill_by_name(&mut self, process_name: &str) -> Result<KillOutcome>;

    fn read_user_path(&mut self) -> Result<Option<String>>;

    fn write_user_path(&mut self, value: &str) -> Result<()>;

    fn settle(&mut self, interval: Duration);
}

/// A background process started for verification only. Dropping the handle kills
/// the owned child, so an early return cannot leave it listening.
#[derive(Debug)]
pub struct DaemonHandle {
    process_name: String,
    child: Option<Child>,
}

impl DaemonHandle {
    pub fn from_child(process_name: &str, child: Child) -> Self {
        Self {
            process_name: process_name.to_string(),
            child: Some(child),
        }
    }

    /// For hosts that track the process themselves.
    pub fn untracked(process_name: &str) -> Self {
        Self {
            process_name: process_name.to_string(),
            child: None,
        }
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    fn stop_child(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Err(err) = child.kill() {
            debug!(process = %self.process_name, "daemon child already exited: {err}");
        }
        if let Err(err) = child.wait() {
            warn!(process = %self.process_name, "failed to reap daemon child: {err}");
        }
    }
}

impl Drop for DaemonHandle {
    fn drop(&mut self) {
        self.stop_child();
    }
}

/// Stops the owned child and then kills by name, catching anything the daemon
/// forked under the same image name.
pub fn terminate_daemon<H>(host: &mut H, mut handle: DaemonHandle) -> Result<()>
where
    H: Host + ?Sized,
{
    handle.stop_child();
    let outcome = host
        .kill_by_name(handle.process_name())
        .with_context(|| format!("failed to stop daemon '{}'", handle.process_name()))?;
    debug!(process = %handle.process_name(), ?outcome, "daemon torn down");
    Ok(())
}

#[derive(Debug)]
pub struct SystemHost {
    client: reqwest::blocking::Client,
}

impl SystemHost {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("localocr-setup/", env!("CARGO_PKG_VERSION")))
            .timeout(None)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl Host for SystemHost {
    fn fetch(&mut self, url: &str, dest: &Path) -> Result<()> {
        download_to_path(&self.client, url, dest)
    }

    fn run(&mut self, command: &mut Command, context: &str) -> Result<()> {
        debug!(command = ?command, "running");
        run_command(command, context)
    }

    fn spawn_daemon(&mut self, command: &mut Command, process_name: &str) -> Result<DaemonHandle> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;

            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            command.creation_flags(CREATE_NO_WINDOW);
        }
        let child = command
            .spawn()
            .with_context(|| format!("failed to start {process_name}"))?;
        info!(process = process_name, pid = child.id(), "started background daemon");
        Ok(DaemonHandle::from_child(process_name, child))
    }

    fn kill_by_name(&mut self, process_name: &str) -> Result<KillOutcome> {
        let mut command = build_kill_command(process_name);
        let output = command
            .output()
            .with_context(|| format!("failed to run process killer for '{process_name}'"))?;
        match classify_kill_exit(output.status.code(), cfg!(windows)) {
            Some(outcome) => {
                debug!(process = process_name, ?outcome, "kill by name");
                Ok(outcome)
            }
            None => Err(anyhow!(
                "failed to terminate '{process_name}': status={} stderr='{}'",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )),
        }
    }

    fn read_user_path(&mut self) -> Result<Option<String>> {
        if !cfg!(windows) {
            return Ok(None);
        }
        let mut command = Command::new("powershell");
        command.arg("-NoProfile").arg("-Command").arg(
            "[Environment]::GetEnvironmentVariable('Path', [EnvironmentVariableTarget]::User)",
        );
        let output = command
            .output()
            .context("failed to read user PATH: command failed to start")?;
        if !output.status.success() {
            return Err(anyhow!(
                "failed to read user PATH: status={} stderr='{}'",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!value.is_empty()).then_some(value))
    }

    fn write_user_path(&mut self, value: &str) -> Result<()> {
        if !cfg!(windows) {
            return Ok(());
        }
        let mut command = Command::new("powershell");
        command.arg("-NoProfile").arg("-Command").arg(format!(
            "[Environment]::SetEnvironmentVariable('Path', '{}', [EnvironmentVariableTarget]::User)",
            value.replace('\'', "''")
        ));
        run_command(&mut command, "failed to write user PATH")
    }

    fn settle(&mut self, interval: Duration) {
        std::thread::sleep(interval);
    }
}
