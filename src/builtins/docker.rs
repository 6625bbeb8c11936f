//! Docker 引擎管理

use crate::connection::{Connection, shell_quote};
use crate::plugin::compatibility::HOST_VERSION;
use crate::plugin::types::{Command, CommandArgs, Compatibility, Dependency, Plugin, PluginError};

#[derive(Debug, Default)]
pub struct DockerPlugin;

fn install(conn: &dyn Connection, _args: &CommandArgs) -> Result<(), PluginError> {
    let present = conn.exec("command -v docker")?;
    if present.success() {
        println!("docker already installed on {}", conn.target());
        return Ok(());
    }
    conn.exec_checked("curl -fsSL https://get.docker.com | sh")?;
    conn.exec_checked("systemctl enable --now docker")?;
    Ok(())
}

fn ps(conn: &dyn Connection, args: &CommandArgs) -> Result<(), PluginError> {
    let command = if args.has_flag("all") {
        "docker ps --all"
    } else {
        "docker ps"
    };
    let output = conn.exec_checked(command)?;
    print!("{}", output.stdout);
    Ok(())
}

fn exec(conn: &dyn Connection, args: &CommandArgs) -> Result<(), PluginError> {
    let container = args
        .arg(0)
        .ok_or_else(|| PluginError::ExecutionFailed("container is required".to_string()))?;
    let shell = args.flag("shell").unwrap_or("sh");
    let status = conn.interactive(&format!(
        "docker exec -it {} {}",
        shell_quote(container),
        shell_quote(shell)
    ))?;
    if status == 0 {
        Ok(())
    } else {
        Err(PluginError::ExecutionFailed(format!(
            "docker exec exited with status {}",
            status
        )))
    }
}

impl Plugin for DockerPlugin {
    fn name(&self) -> &str {
        "docker"
    }

    fn description(&self) -> &str {
        "Install the Docker engine and inspect containers"
    }

    fn version(&self) -> &str {
        HOST_VERSION
    }

    fn author(&self) -> &str {
        "hostkit"
    }

    fn commands(&self) -> Vec<Command> {
        vec![
            Command::new("install", "Install and start the Docker engine", install),
            Command::new("ps", "List containers", ps).with_flag("all", "Include stopped containers", false),
            Command::new("exec", "Open a shell in a running container", exec)
                .with_arg("container", "Container name or id", true)
                .with_flag("shell", "Shell to run (default sh)", true),
        ]
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency::required("system", ">=0.1.0")]
    }

    fn compatibility(&self) -> Compatibility {
        Compatibility {
            platforms: vec!["linux/*".to_string(), "darwin/*".to_string()],
            ..Default::default()
        }
    }
}
