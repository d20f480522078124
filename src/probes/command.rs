// Subprocess prober - runs the system ping/traceroute binaries

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::{Prober, normalize_output, traceroute};
use crate::config::ProbeConfig;
use crate::error::{DiagError, DiagResult};

/// iputils ping exits with 1 when no reply was received
const PING_NO_REPLY_EXIT: i32 = 1;

pub struct SubprocessProber {
    ping_binary: String,
    traceroute_binary: String,
    reply_timeout: Duration,
    max_hops: u8,
}

impl SubprocessProber {
    pub fn new(config: &ProbeConfig) -> Self {
        SubprocessProber {
            ping_binary: config.ping_binary.clone(),
            traceroute_binary: config.traceroute_binary.clone(),
            reply_timeout: config.reply_timeout,
            max_hops: config.traceroute_max_hops,
        }
    }

    /// Run a binary to completion and hand back stdout.
    ///
    /// The child is killed if the returned future is dropped, so an
    /// executor timing out never leaves a stray process behind.
    async fn run(&self, program: &str, args: &[String], target: &str) -> DiagResult<String> {
        tracing::debug!("Executing {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => DiagError::Internal(format!(
                    "'{}' command not found. Please install {}.",
                    program, program
                )),
                std::io::ErrorKind::PermissionDenied => {
                    DiagError::Permission(format!("not allowed to execute '{}'", program))
                }
                _ => DiagError::Internal(format!("Failed to execute {}: {}", program, e)),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() {
            return Ok(normalize_output(&stdout));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify_failure(
            program,
            target,
            output.status.code(),
            &stderr,
        ))
    }
}

#[async_trait]
impl Prober for SubprocessProber {
    async fn ping(&self, host: &str, count: u8) -> DiagResult<String> {
        let wait_secs = self.reply_timeout.as_secs().max(1);
        let args = vec![
            "-c".to_string(),
            count.to_string(),
            "-W".to_string(),
            wait_secs.to_string(),
            host.to_string(),
        ];
        self.run(&self.ping_binary, &args, host).await
    }

    async fn traceroute(&self, host: &str) -> DiagResult<String> {
        let wait_secs = self.reply_timeout.as_secs().max(1);
        let args = vec![
            "-q".to_string(),
            "3".to_string(),
            "-w".to_string(),
            wait_secs.to_string(),
            "-m".to_string(),
            self.max_hops.to_string(),
            host.to_string(),
        ];
        let output = self.run(&self.traceroute_binary, &args, host).await?;

        let hops = traceroute::parse_hops(&output);
        if let Some(last) = hops.last() {
            if hops.iter().all(|hop| hop.timed_out) {
                return Err(DiagError::Unreachable(format!(
                    "no hop towards {} answered within {} hops",
                    host, last.hop_number
                )));
            }
            tracing::debug!(
                "traceroute to {} ended at hop {} ({})",
                host,
                last.hop_number,
                last.ip.as_deref().unwrap_or("*")
            );
        }

        Ok(output)
    }
}

/// Map a failed probe run onto the error taxonomy.
///
/// Privilege problems are checked first so they are never reported as an
/// unreachable host.
fn classify_failure(program: &str, target: &str, code: Option<i32>, stderr: &str) -> DiagError {
    let lowered = stderr.to_lowercase();
    let message = stderr.trim();

    if lowered.contains("operation not permitted")
        || lowered.contains("permission denied")
        || lowered.contains("must be root")
        || lowered.contains("cap_net_raw")
    {
        return DiagError::Permission(format!("{}: {}", program, message));
    }

    if lowered.contains("name or service not known")
        || lowered.contains("unknown host")
        || lowered.contains("cannot resolve")
        || lowered.contains("temporary failure in name resolution")
        || lowered.contains("no address associated")
        || lowered.contains("cannot handle \"host\"")
    {
        return DiagError::Resolution(target.to_string());
    }

    if lowered.contains("network is unreachable")
        || lowered.contains("no route to host")
        || lowered.contains("host unreachable")
    {
        return DiagError::Unreachable(format!("{}: {}", target, message));
    }

    if program.ends_with("ping") && code == Some(PING_NO_REPLY_EXIT) {
        return DiagError::Unreachable(format!("no reply from {}", target));
    }

    if message.is_empty() {
        DiagError::Internal(format!(
            "{} failed with exit code {}",
            program,
            code.map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        ))
    } else {
        DiagError::Internal(format!("{} failed: {}", program, message))
    }
}
