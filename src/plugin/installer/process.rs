//! 受安装截止时间约束的子进程

use crate::plugin::types::{Context, PluginError};
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Instant;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// stderr 的最后几行，用于错误信息
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stderr.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

fn drain<R: Read + Send + 'static>(reader: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut reader) = reader {
            let _ = reader.read_to_end(&mut buffer);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!(error = %e, "failed to kill child process");
    }
    let _ = child.wait();
}

/// 运行 `command` 直到结束；`ctx` 先到期则杀掉子进程
///
/// `what` 用于超时错误信息
pub fn run(command: &mut Command, ctx: &Context, what: &str) -> Result<ProcessOutput, PluginError> {
    if ctx.expired() {
        return Err(PluginError::Timeout(format!("deadline passed before {}", what)));
    }

    debug!(command = ?command, "spawning");
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            PluginError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to start {}: {}", what, e),
            ))
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match ctx.deadline() {
        Some(deadline) => {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match child.wait_timeout(remaining)? {
                Some(status) => status,
                None => {
                    kill(&mut child);
                    let _ = stdout.join();
                    let _ = stderr.join();
                    return Err(PluginError::Timeout(format!("{} did not finish in time", what)));
                }
            }
        }
        None => child.wait()?,
    };

    Ok(ProcessOutput {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}
