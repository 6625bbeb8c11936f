//! 基础系统管理

use crate::connection::{Connection, shell_quote};
use crate::plugin::compatibility::HOST_VERSION;
use crate::plugin::types::{Command, CommandArgs, Plugin, PluginError};

/// 识别包管理器并用它执行更新
const UPDATE_SCRIPT: &str = "if command -v apt-get >/dev/null 2>&1; then \
    DEBIAN_FRONTEND=noninteractive apt-get update -y && DEBIAN_FRONTEND=noninteractive apt-get upgrade -y; \
elif command -v dnf >/dev/null 2>&1; then dnf -y upgrade; \
elif command -v apk >/dev/null 2>&1; then apk update && apk upgrade; \
else echo 'no supported package manager' >&2; exit 1; fi";

#[derive(Debug, Default)]
pub struct SystemPlugin;

fn info(conn: &dyn Connection, _args: &CommandArgs) -> Result<(), PluginError> {
    let output = conn.exec_checked(
        "uname -srm; if [ -r /etc/os-release ]; then . /etc/os-release && echo \"$PRETTY_NAME\"; fi",
    )?;
    print!("{}", output.stdout);
    Ok(())
}

fn update(conn: &dyn Connection, _args: &CommandArgs) -> Result<(), PluginError> {
    conn.exec_checked(UPDATE_SCRIPT)?;
    Ok(())
}

fn hostname(conn: &dyn Connection, args: &CommandArgs) -> Result<(), PluginError> {
    let name = args
        .arg(0)
        .ok_or_else(|| PluginError::ExecutionFailed("hostname is required".to_string()))?;
    conn.exec_checked(&format!("hostnamectl set-hostname {}", shell_quote(name)))?;
    Ok(())
}

fn motd(conn: &dyn Connection, args: &CommandArgs) -> Result<(), PluginError> {
    let mut text = args.positional.join(" ");
    text.push('\n');
    conn.write_file("/etc/motd", text.as_bytes(), 0o644)?;
    Ok(())
}

fn shell(conn: &dyn Connection, _args: &CommandArgs) -> Result<(), PluginError> {
    let status = conn.interactive("exec \"${SHELL:-/bin/sh}\" -l")?;
    if status == 0 {
        Ok(())
    } else {
        Err(PluginError::ExecutionFailed(format!("shell exited with status {}", status)))
    }
}

impl Plugin for SystemPlugin {
    fn name(&self) -> &str {
        "system"
    }

    fn description(&self) -> &str {
        "Base system administration: host facts, package updates, hostname and motd"
    }

    fn version(&self) -> &str {
        HOST_VERSION
    }

    fn author(&self) -> &str {
        "hostkit"
    }

    fn commands(&self) -> Vec<Command> {
        vec![
            Command::new("info", "Print kernel and distribution", info),
            Command::new("update", "Update installed packages", update),
            Command::new("hostname", "Set the host name", hostname)
                .with_arg("name", "New host name", true),
            Command::new("motd", "Replace /etc/motd", motd)
                .with_arg("text", "Message text", true),
            Command::new("shell", "Open a login shell", shell),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::validation::Validator;
    use crate::test_utils::RecordingConnection;

    fn command(name: &str) -> Command {
        SystemPlugin
            .commands()
            .into_iter()
            .find(|c| c.name == name)
            .unwrap()
    }

    #[test]
    fn test_is_valid() {
        assert!(Validator::validate_plugin(&SystemPlugin).is_empty());
    }

    #[test]
    fn test_hostname_quotes_argument() {
        let conn = RecordingConnection::new();
        let args = CommandArgs::parse(&["web-1".to_string()]);
        command("hostname").run(&conn, &args).unwrap();
        assert_eq!(conn.executed(), vec!["hostnamectl set-hostname 'web-1'"]);
    }

    #[test]
    fn test_hostname_requires_argument() {
        let conn = RecordingConnection::new();
        let err = command("hostname").run(&conn, &CommandArgs::default()).unwrap_err();
        assert!(err.to_string().contains("name"));
        assert!(conn.executed().is_empty());
    }

    #[test]
    fn test_motd_writes_file() {
        let conn = RecordingConnection::new();
        let args = CommandArgs::parse(&["hello".to_string(), "ops".to_string()]);
        command("motd").run(&conn, &args).unwrap();
        let files = conn.files.lock().unwrap();
        assert_eq!(files.get("/etc/motd"), Some(&(b"hello ops\n".to_vec(), 0o644)));
    }
}
