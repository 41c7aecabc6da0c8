//! Long-lived scheduler process.
//!
//! Holds the only live set of timers, so lifecycle commands are served on its
//! stdin console while it runs. It holds the scheduler lock for its whole
//! life, which keeps one-shot mutations from the shell out; the PID file
//! serves `stop` and `status`.

use std::fs;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::app::{AppContext, PostflowError, Result};
use crate::cli::commands;
use crate::cli::{ConsoleCommand, ConsoleLine};
use crate::lock::SchedulerLock;

/// Daemon runner
pub struct Daemon {
    ctx: Arc<AppContext>,
}

impl Daemon {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Get the PID file path
    pub fn pid_file_path() -> Option<PathBuf> {
        dirs::runtime_dir()
            .or_else(dirs::cache_dir)
            .map(|d| d.join("postflow").join("daemon.pid"))
    }

    fn read_pid() -> Option<u32> {
        let pid_path = Self::pid_file_path()?;
        fs::read_to_string(pid_path).ok()?.trim().parse().ok()
    }

    /// Check if another daemon is already running
    pub fn is_running() -> bool {
        Self::read_pid().is_some_and(Self::process_exists)
    }

    #[cfg(unix)]
    fn process_exists(pid: u32) -> bool {
        use std::process::Command;
        Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(windows)]
    fn process_exists(pid: u32) -> bool {
        use std::process::Command;
        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid)])
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }

    /// Write PID file
    fn write_pid_file(&self) -> std::io::Result<()> {
        if let Some(pid_path) = Self::pid_file_path() {
            if let Some(parent) = pid_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = fs::File::create(&pid_path)?;
            writeln!(file, "{}", std::process::id())?;
        }
        Ok(())
    }

    /// Remove PID file
    fn remove_pid_file(&self) {
        if let Some(pid_path) = Self::pid_file_path() {
            let _ = fs::remove_file(pid_path);
        }
    }

    /// Run until SIGINT/SIGTERM or `quit` on the console.
    pub async fn run(&self) -> Result<()> {
        // Check for existing daemon
        if Self::is_running() {
            return Err(PostflowError::Other(
                "Another scheduler instance is already running".to_string(),
            ));
        }

        // A one-shot command may be flushing due posts; let it finish first.
        let lock = SchedulerLock::acquire(&self.ctx.lock_path()?).await?;

        self.write_pid_file()
            .map_err(|e| PostflowError::Other(format!("Failed to write PID file: {}", e)))?;

        let result = self.serve().await;

        self.ctx.shutdown();
        self.remove_pid_file();
        drop(lock);
        tracing::info!("Scheduler stopped");
        result
    }

    async fn serve(&self) -> Result<()> {
        let shutdown = shutdown_signal()?;
        tokio::pin!(shutdown);

        let report = self.ctx.coordinator.rehydrate().await?;
        tracing::info!(
            "PostFlow scheduler started (PID: {}, {} pending jobs, {} overdue handled)",
            std::process::id(),
            report.registered,
            report.published + report.failed
        );

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut console_open = true;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
                line = lines.next_line(), if console_open => match line {
                    Ok(Some(line)) => {
                        if !self.handle_line(&line).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::debug!("Console closed; waiting for a signal");
                        console_open = false;
                    }
                    Err(e) => {
                        tracing::warn!("Console read failed: {}", e);
                        console_open = false;
                    }
                },
            }
        }
        Ok(())
    }

    /// Serve one console line. Returns `false` when the operator asked to quit.
    async fn handle_line(&self, line: &str) -> bool {
        if line.trim().is_empty() {
            return true;
        }

        match ConsoleLine::parse_line(line) {
            Ok(ConsoleCommand::Quit) => false,
            Ok(ConsoleCommand::Operator(command)) => {
                if let Err(e) = commands::execute(&self.ctx, command).await {
                    eprintln!("Error: {}", e);
                }
                true
            }
            Err(e) => {
                let _ = e.print();
                true
            }
        }
    }
}

#[cfg(unix)]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    Ok(async {
        let _ = tokio::signal::ctrl_c().await;
    })
}

/// Stop a running daemon by reading PID file and sending signal
pub fn stop_daemon() -> std::result::Result<(), String> {
    let pid_path =
        Daemon::pid_file_path().ok_or_else(|| "Could not determine PID file path".to_string())?;

    if !pid_path.exists() {
        return Err("No scheduler is running (PID file not found)".to_string());
    }

    let pid = Daemon::read_pid().ok_or_else(|| "Invalid PID in PID file".to_string())?;

    #[cfg(unix)]
    let status = std::process::Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status();

    #[cfg(windows)]
    let status = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .status();

    let status = status.map_err(|e| format!("Failed to send signal: {}", e))?;
    if status.success() {
        // The daemon removes its own PID file on a clean exit.
        Ok(())
    } else {
        Err(format!("Failed to stop scheduler (PID {})", pid))
    }
}

/// Check daemon status
pub fn daemon_status() -> String {
    match Daemon::read_pid() {
        Some(pid) if Daemon::process_exists(pid) => format!("Scheduler is running (PID: {})", pid),
        Some(_) => "Scheduler is not running (stale PID file)".to_string(),
        None => "Scheduler is not running".to_string(),
    }
}
