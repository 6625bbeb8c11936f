//! 远程执行通道
//!
//! 插件只看到 [`Connection`] trait。`SshConnection` 调用系统的 `ssh`，
//! `LocalConnection` 在本机执行。

use std::io::Write;
use std::process::{Command, Stdio};
use thiserror::Error;

/// 远程命令的执行结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("transport error on {target}: {source}")]
    Transport {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command on {target} exited with status {status}: {stderr}")]
    CommandFailed {
        target: String,
        status: i32,
        stderr: String,
    },
}

/// 在一台主机上执行命令、写文件和交互式会话
pub trait Connection: Send + Sync {
    /// 便于阅读的目标描述，例如 `root@web-1`
    fn target(&self) -> &str;

    fn exec(&self, command: &str) -> Result<ExecOutput, ConnectionError>;

    fn write_file(&self, path: &str, contents: &[u8], mode: u32) -> Result<(), ConnectionError>;

    /// 接管调用方终端执行命令，返回退出状态
    fn interactive(&self, command: &str) -> Result<i32, ConnectionError>;

    /// 同 `exec`，但非零退出状态视为错误
    fn exec_checked(&self, command: &str) -> Result<ExecOutput, ConnectionError> {
        let output = self.exec(command)?;
        if output.success() {
            Ok(output)
        } else {
            Err(ConnectionError::CommandFailed {
                target: self.target().to_string(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

fn collect(target: &str, command: &mut Command) -> Result<ExecOutput, ConnectionError> {
    let output = command
        .stdin(Stdio::null())
        .output()
        .map_err(|source| ConnectionError::Transport {
            target: target.to_string(),
            source,
        })?;

    Ok(ExecOutput {
        status: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

fn pipe_into(target: &str, mut command: Command, contents: &[u8]) -> Result<(), ConnectionError> {
    let transport = |source| ConnectionError::Transport {
        target: target.to_string(),
        source,
    };

    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(transport)?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(contents).map_err(transport)?;
    }

    let output = child.wait_with_output().map_err(transport)?;
    if output.status.success() {
        Ok(())
    } else {
        Err(ConnectionError::CommandFailed {
            target: target.to_string(),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// 为 POSIX shell 引用参数
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// 通过系统 `ssh` 客户端建立的连接
#[derive(Debug, Clone)]
pub struct SshConnection {
    destination: String,
    port: Option<u16>,
    identity: Option<String>,
}

impl SshConnection {
    pub fn new(destination: &str) -> Self {
        Self {
            destination: destination.to_string(),
            port: None,
            identity: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_identity(mut self, identity: &str) -> Self {
        self.identity = Some(identity.to_string());
        self
    }

    fn ssh(&self, tty: bool) -> Command {
        let mut cmd = Command::new("ssh");
        // 从不提示输入密码，只用密钥认证
        cmd.args(["-o", "BatchMode=yes"]);
        if tty {
            cmd.arg("-t");
        }
        if let Some(port) = self.port {
            cmd.args(["-p", &port.to_string()]);
        }
        if let Some(identity) = &self.identity {
            cmd.args(["-i", identity]);
        }
        cmd.arg(&self.destination);
        cmd
    }
}

impl Connection for SshConnection {
    fn target(&self) -> &str {
        &self.destination
    }

    fn exec(&self, command: &str) -> Result<ExecOutput, ConnectionError> {
        let mut cmd = self.ssh(false);
        cmd.arg(command);
        collect(&self.destination, &mut cmd)
    }

    fn write_file(&self, path: &str, contents: &[u8], mode: u32) -> Result<(), ConnectionError> {
        let quoted = shell_quote(path);
        let mut cmd = self.ssh(false);
        cmd.arg(format!("cat > {q} && chmod {mode:o} {q}", q = quoted, mode = mode));
        pipe_into(&self.destination, cmd, contents)
    }

    fn interactive(&self, command: &str) -> Result<i32, ConnectionError> {
        let mut cmd = self.ssh(true);
        cmd.arg(command);
        let status = cmd.status().map_err(|source| ConnectionError::Transport {
            target: self.destination.clone(),
            source,
        })?;
        Ok(status.code().unwrap_or(-1))
    }
}

/// 通过 `sh -c` 连接本机
#[derive(Debug, Clone, Default)]
pub struct LocalConnection;

impl Connection for LocalConnection {
    fn target(&self) -> &str {
        "local"
    }

    fn exec(&self, command: &str) -> Result<ExecOutput, ConnectionError> {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        collect("local", &mut cmd)
    }

    fn write_file(&self, path: &str, contents: &[u8], mode: u32) -> Result<(), ConnectionError> {
        let mut cmd = Command::new("sh");
        cmd.args([
            "-c",
            &format!("cat > {q} && chmod {mode:o} {q}", q = shell_quote(path), mode = mode),
        ]);
        pipe_into("local", cmd, contents)
    }

    fn interactive(&self, command: &str) -> Result<i32, ConnectionError> {
        let status = Command::new("sh")
            .args(["-c", command])
            .status()
            .map_err(|source| ConnectionError::Transport {
                target: "local".to_string(),
                source,
            })?;
        Ok(status.code().unwrap_or(-1))
    }
}

/// 根据 `--host` 打开连接；`local` 表示本机
pub fn open(host: &str) -> Box<dyn Connection> {
    if host == "local" || host == "localhost" {
        return Box::new(LocalConnection);
    }

    if host.matches(':').count() == 1
        && let Some((destination, port)) = host.split_once(':')
        && let Ok(port) = port.parse::<u16>()
    {
        return Box::new(SshConnection::new(destination).with_port(port));
    }

    Box::new(SshConnection::new(host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/etc/motd"), "'/etc/motd'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[cfg(unix)]
    #[test]
    fn test_local_exec() {
        let conn = LocalConnection;
        let out = conn.exec("echo hello").unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");

        let err = conn.exec_checked("exit 3").unwrap_err();
        assert!(matches!(err, ConnectionError::CommandFailed { status: 3, .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_local_write_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("motd");
        let conn = LocalConnection;
        conn.write_file(path.to_str().unwrap(), b"welcome\n", 0o644)
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "welcome\n");
    }

    #[test]
    fn test_open_selects_transport() {
        assert_eq!(open("local").target(), "local");
        assert_eq!(open("root@web-1").target(), "root@web-1");
        assert_eq!(open("root@web-1:2222").target(), "root@web-1");
    }
}
