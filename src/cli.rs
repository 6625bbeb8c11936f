//! 命令行参数定义

use clap::{Parser, Subcommand};

/// hostkit - 基于可插拔能力模块的主机自动化工具
#[derive(Parser, Debug)]
#[command(
    name = "hostkit",
    version,
    about = "Host automation with pluggable capability modules",
    long_about = "Dispatches configuration commands to servers over SSH. Capabilities come from plugins: built-ins compiled into the binary and plugins installed from git repositories."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 输出完整错误链和调试日志
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// 日志过滤级别 (error/warn/info/debug/trace)，RUST_LOG 优先
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 插件管理
    Plugin {
        #[command(subcommand)]
        command: PluginCommands,
    },

    /// 在目标主机上执行插件命令
    Run {
        /// 插件名称
        plugin: String,
        /// 命令名称
        command: String,
        /// 目标主机：`local`、`user@host` 或 `host:port`
        #[arg(short = 'H', long)]
        host: String,
        /// 传给命令的参数
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum PluginCommands {
    /// 从 git 仓库安装插件
    Install {
        /// `host/owner/repo`、`https://host/owner/repo` 或 `user@host:owner/repo`，可附加 `@version`
        repository: String,
        /// 以该名称安装
        #[arg(long)]
        name: Option<String>,
        /// 语义化版本或标签
        #[arg(long)]
        version: Option<String>,
        #[arg(long, conflicts_with = "version")]
        branch: Option<String>,
        #[arg(long, conflicts_with_all = ["version", "branch"])]
        commit: Option<String>,
        /// 即使已安装也重新克隆并安装
        #[arg(short, long)]
        force: bool,
        /// 跳过元数据校验
        #[arg(long)]
        no_verify: bool,
        /// 超过该秒数后中止安装
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// 列出已注册插件
    List {
        /// 输出 JSON 而不是表格
        #[arg(long)]
        json: bool,
    },

    /// 显示插件的元数据、命令和依赖
    Info {
        name: String,
    },

    /// 校验所有已注册插件
    Validate {
        /// 把警告视为失败
        #[arg(long)]
        strict: bool,
    },

    /// 按依赖优先输出加载顺序
    Order,

    /// 在 plugins.toml 中启用插件
    Enable {
        name: String,
    },

    /// 禁用插件但不卸载
    Disable {
        name: String,
    },

    /// 设置插件初始化时读取的配置项
    Set {
        name: String,
        key: String,
        value: String,
    },

    /// 删除插件的配置条目和已安装文件
    Remove {
        name: String,
        /// 即使有其他插件依赖它也删除
        #[arg(short, long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_install() {
        let cli = Cli::try_parse_from([
            "hostkit", "plugin", "install", "github.com/acme/widget@1.2.0", "--name", "w", "--force",
        ])
        .unwrap();
        match cli.command {
            Commands::Plugin {
                command:
                    PluginCommands::Install {
                        repository,
                        name,
                        force,
                        no_verify,
                        ..
                    },
            } => {
                assert_eq!(repository, "github.com/acme/widget@1.2.0");
                assert_eq!(name.as_deref(), Some("w"));
                assert!(force);
                assert!(!no_verify);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_version_and_branch_conflict() {
        assert!(
            Cli::try_parse_from([
                "hostkit", "plugin", "install", "acme/x", "--version", "1.0.0", "--branch", "main",
            ])
            .is_err()
        );
    }

    #[test]
    fn test_parse_config_subcommands() {
        let cli = Cli::try_parse_from(["hostkit", "plugin", "set", "docker", "socket", "/run/docker.sock"])
            .unwrap();
        match cli.command {
            Commands::Plugin {
                command: PluginCommands::Set { name, key, value },
            } => assert_eq!(
                (name.as_str(), key.as_str(), value.as_str()),
                ("docker", "socket", "/run/docker.sock")
            ),
            other => panic!("unexpected {:?}", other),
        }

        let cli = Cli::try_parse_from(["hostkit", "plugin", "remove", "widget", "--force"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Plugin {
                command: PluginCommands::Remove { force: true, .. }
            }
        ));
    }

    #[test]
    fn test_parse_run_with_trailing_args() {
        let cli = Cli::try_parse_from([
            "hostkit", "-v", "run", "docker", "ps", "--host", "local", "--", "--all",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Run {
                plugin,
                command,
                host,
                args,
            } => {
                assert_eq!((plugin.as_str(), command.as_str(), host.as_str()), ("docker", "ps", "local"));
                assert_eq!(args, vec!["--all"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
