/// Service restart through the host process manager.
///
/// Runs the configured restart command to completion and reports whether it
/// exited 0. No retries here; the orchestrator's attempt loop does that.
use std::process::Stdio;
use tokio::process::Command;

/// Outcome of one restart invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartOutcome {
    pub ok: bool,
    /// `"ok"` on success, otherwise the exit code and captured output or the
    /// reason the command could not be run.
    pub message: String,
}

impl RestartOutcome {
    pub fn ok() -> Self {
        Self {
            ok: true,
            message: "ok".to_string(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Restarts the named service.
pub trait Restarter {
    async fn restart(&mut self, service: &str) -> RestartOutcome;
}

/// Restarts by running an external command such as `systemctl restart {service}`.
pub struct CommandRestarter {
    command: Vec<String>,
}

impl CommandRestarter {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

/// Replace `{service}` placeholders in the command template.
fn build_command(template: &[String], service: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| arg.replace("{service}", service))
        .collect()
}

impl Restarter for CommandRestarter {
    async fn restart(&mut self, service: &str) -> RestartOutcome {
        let argv = build_command(&self.command, service);
        let Some((program, args)) = argv.split_first() else {
            return RestartOutcome::failed("restart command is empty");
        };

        tracing::info!(%service, command = ?argv, "restarting service");

        let output = match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(o) => o,
            Err(e) => {
                tracing::error!(error = %e, %program, "failed to run restart command");
                return RestartOutcome::failed(format!("{program} exception: {e}"));
            }
        };

        if output.status.success() {
            tracing::info!(%service, "restart command succeeded");
            return RestartOutcome::ok();
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let captured = if stderr.trim().is_empty() {
            stdout.trim()
        } else {
            stderr.trim()
        };
        let rc = match output.status.code() {
            Some(code) => code.to_string(),
            None => "signal".to_string(),
        };

        tracing::warn!(%service, rc = %rc, output = %captured, "restart command failed");
        RestartOutcome::failed(format!("{program} failed rc={rc}: {captured}"))
    }
}
