//! hostkit 入口
//!
//! 默认安静：stdout 只有命令输出，日志和错误写到 stderr。
//! `--verbose` 时错误输出完整原因链。

use clap::Parser;
use hostkit::app::{AppConfig, Application};
use hostkit::cli::{Cli, Commands, PluginCommands};
use hostkit::commands::plugin::{
    EnableCommand, InfoCommand, InstallCommand, ListCommand, OrderCommand, RemoveCommand,
    SetCommand, ValidateCommand,
};
use hostkit::commands::run::RunCommand;
use hostkit::commands::{CommandContext, CommandHandler};
use hostkit::error::Result;
use tracing_subscriber::{EnvFilter, fmt};

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.verbose);

    let verbose = cli.verbose;
    if let Err(e) = run_command(cli) {
        e.report(verbose);
        std::process::exit(1);
    }
}

fn init_tracing(level: &str, verbose: bool) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(env) if !env.is_empty() => EnvFilter::try_new(env).ok(),
        _ => None,
    }
    .unwrap_or_else(|| {
        let level = if verbose { "debug" } else { level };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    });

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

fn run_command(cli: Cli) -> Result<()> {
    let app = Application::new(AppConfig {
        verbose: cli.verbose,
    })?;
    let report = app.load()?;
    let ctx = CommandContext {
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Plugin { command } => match command {
            PluginCommands::Install {
                repository,
                name,
                version,
                branch,
                commit,
                force,
                no_verify,
                timeout,
            } => InstallCommand::new(
                &app, repository, name, version, branch, commit, force, no_verify, timeout,
            )
            .execute(&ctx),

            PluginCommands::List { json } => ListCommand::new(&app, json).execute(&ctx),

            PluginCommands::Info { name } => InfoCommand::new(&app, name).execute(&ctx),

            PluginCommands::Validate { strict } => {
                ValidateCommand::new(&app, strict, &report.failed).execute(&ctx)
            }

            PluginCommands::Order => OrderCommand::new(&app).execute(&ctx),

            PluginCommands::Enable { name } => EnableCommand::new(&app, name, true).execute(&ctx),

            PluginCommands::Disable { name } => {
                EnableCommand::new(&app, name, false).execute(&ctx)
            }

            PluginCommands::Set { name, key, value } => {
                SetCommand::new(&app, name, key, value).execute(&ctx)
            }

            PluginCommands::Remove { name, force } => {
                RemoveCommand::new(&app, name, force).execute(&ctx)
            }
        },

        Commands::Run {
            plugin,
            command,
            host,
            args,
        } => RunCommand::new(&app, plugin, command, host, args).execute(&ctx),
    }
}
