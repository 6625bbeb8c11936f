//! plugin 子命令处理器

use super::{CommandContext, CommandHandler};
use crate::app::Application;
use crate::error::{HostError, Result};
use crate::plugin::config::{PluginEntry, PluginSource};
use crate::plugin::installed;
use crate::plugin::installer::InstallOptions;
use crate::plugin::loader::builtin;
use crate::plugin::types::{Plugin, PluginError};
use std::fs;
use std::time::Duration;

/// plugin install 命令
pub struct InstallCommand<'a> {
    app: &'a Application,
    repository: String,
    options: InstallOptions,
}

impl<'a> InstallCommand<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        app: &'a Application,
        repository: String,
        name: Option<String>,
        version: Option<String>,
        branch: Option<String>,
        commit: Option<String>,
        force: bool,
        no_verify: bool,
        timeout: Option<u64>,
    ) -> Self {
        let options = InstallOptions {
            name,
            version,
            branch,
            commit,
            force,
            verify: !no_verify,
            timeout: timeout.map(Duration::from_secs),
            ..Default::default()
        };
        Self {
            app,
            repository,
            options,
        }
    }
}

impl CommandHandler for InstallCommand<'_> {
    fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let (outcome, registered) = self.app.registry.install_from(
            &self.app.installer,
            &self.repository,
            &self.options,
        )?;

        let meta = &outcome.metadata;
        if outcome.unchanged {
            println!("✓ {} {} already installed", outcome.target, meta.version);
        } else {
            println!("✓ installed {} {}", outcome.target, meta.version);
        }

        if ctx.verbose {
            println!("  path:     {}", outcome.install_dir.display());
            if let Some(source) = &meta.source {
                println!("  source:   {}", source);
            }
            if let Some(checksum) = &meta.checksum {
                println!("  checksum: {}", checksum);
            }
            if let Some(trust) = &meta.trust_level {
                println!("  trust:    {}", trust);
            }
        }

        for warning in outcome.warnings.iter().chain(&registered.warnings) {
            eprintln!("warning: {}", warning);
        }
        Ok(())
    }
}

/// plugin list 命令
pub struct ListCommand<'a> {
    app: &'a Application,
    json: bool,
}

impl<'a> ListCommand<'a> {
    pub fn new(app: &'a Application, json: bool) -> Self {
        Self { app, json }
    }
}

impl CommandHandler for ListCommand<'_> {
    fn execute(&self, _ctx: &CommandContext) -> Result<()> {
        let plugins = self.app.registry.get_all();

        if self.json {
            let records: Vec<_> = plugins.iter().map(|p| p.metadata()).collect();
            println!("{}", serde_json::to_string_pretty(&records)?);
            return Ok(());
        }

        if plugins.is_empty() {
            println!("no plugins registered");
            return Ok(());
        }

        let width = plugins.iter().map(|p| p.name().len()).max().unwrap_or(4).max(4);
        println!("{:<width$}  {:<10}  DESCRIPTION", "NAME", "VERSION", width = width);
        for plugin in &plugins {
            println!(
                "{:<width$}  {:<10}  {}",
                plugin.name(),
                plugin.version(),
                plugin.description(),
                width = width
            );
        }
        Ok(())
    }
}

/// plugin info 命令
pub struct InfoCommand<'a> {
    app: &'a Application,
    name: String,
}

impl<'a> InfoCommand<'a> {
    pub fn new(app: &'a Application, name: String) -> Self {
        Self { app, name }
    }
}

impl CommandHandler for InfoCommand<'_> {
    fn execute(&self, _ctx: &CommandContext) -> Result<()> {
        let plugin = self.app.registry.require(&self.name)?;
        print_identity(plugin.as_ref());

        // 只有已安装插件才有来源记录
        let dir = self.app.installer.plugin_dir().join(&self.name);
        if let Ok(record) = installed::read_metadata(&dir) {
            println!();
            println!("Installed:");
            if let Some(path) = &record.install_path {
                println!("  path:      {}", path.display());
            }
            if let Some(at) = &record.installed_at {
                println!("  at:        {}", at.to_rfc3339());
            }
            if let Some(source) = &record.source {
                println!("  source:    {}", source);
            }
            if let Some(checksum) = &record.checksum {
                println!("  checksum:  {}", checksum);
            }
            if let Some(trust) = &record.trust_level {
                println!("  trust:     {}", trust);
            }
            println!("  validated: {}", record.validated);
            if let Some(build) = &record.build {
                println!(
                    "  build:     {} ({}), {} ms",
                    build.builder, build.profile, build.duration_ms
                );
                if let Some(commit) = &build.commit {
                    println!("  commit:    {}", commit);
                }
            }
        }
        Ok(())
    }
}

fn print_identity(plugin: &dyn Plugin) {
    println!("Name:        {}", plugin.name());
    println!("Version:     {}", plugin.version());
    println!("Author:      {}", plugin.author());
    println!("Description: {}", plugin.description());

    let compat = plugin.compatibility();
    if compat.min_host_version.is_some() || compat.max_host_version.is_some() {
        println!(
            "Host:        {} .. {}",
            compat.min_host_version.as_deref().unwrap_or("*"),
            compat.max_host_version.as_deref().unwrap_or("*")
        );
    }
    if !compat.platforms.is_empty() {
        println!("Platforms:   {}", compat.platforms.join(", "));
    }

    println!();
    println!("Commands:");
    for command in plugin.commands() {
        let args: String = command
            .args
            .iter()
            .map(|a| {
                if a.required {
                    format!(" <{}>", a.name)
                } else {
                    format!(" [{}]", a.name)
                }
            })
            .collect();
        println!("  {}{}  {}", command.name, args, command.description);
        for flag in &command.flags {
            let value = if flag.takes_value { "=VALUE" } else { "" };
            println!("      --{}{}  {}", flag.name, value, flag.description);
        }
    }

    let deps = plugin.dependencies();
    if !deps.is_empty() {
        println!();
        println!("Dependencies:");
        for dep in deps {
            let optional = if dep.optional { " (optional)" } else { "" };
            println!(
                "  {} {}{}",
                dep.name,
                dep.version.as_deref().unwrap_or("*"),
                optional
            );
        }
    }
}

/// plugin validate 命令
pub struct ValidateCommand<'a> {
    app: &'a Application,
    strict: bool,
    /// 没能进入注册表的插件
    load_failures: Vec<(String, String)>,
}

impl<'a> ValidateCommand<'a> {
    pub fn new(app: &'a Application, strict: bool, load_failures: &[(String, PluginError)]) -> Self {
        Self {
            app,
            strict,
            load_failures: load_failures
                .iter()
                .map(|(name, err)| (name.clone(), err.to_string()))
                .collect(),
        }
    }
}

impl CommandHandler for ValidateCommand<'_> {
    fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let reports = self.app.registry.validate_all();
        let mut failed = self.load_failures.len();

        for report in &reports {
            let passed = report.passed(self.strict);
            if !passed {
                failed += 1;
            }
            let mark = if passed { "✓" } else { "✗" };
            println!("{} {} {}", mark, report.name, report.version);
            for error in &report.errors {
                println!("    error: {}", error);
            }
            if !report.warnings.is_empty() && (self.strict || ctx.verbose || !passed) {
                for warning in &report.warnings {
                    println!("    warning: {}", warning);
                }
            }
        }

        for (name, error) in &self.load_failures {
            println!("✗ {} (not loaded)", name);
            println!("    error: {}", error);
        }

        let total = reports.len() + self.load_failures.len();
        if failed > 0 {
            return Err(HostError::Failed(format!(
                "{} of {} plugins failed validation",
                failed, total
            )));
        }
        println!("{} plugins valid", total);
        Ok(())
    }
}

/// plugin order 命令
pub struct OrderCommand<'a> {
    app: &'a Application,
}

impl<'a> OrderCommand<'a> {
    pub fn new(app: &'a Application) -> Self {
        Self { app }
    }
}

impl CommandHandler for OrderCommand<'_> {
    fn execute(&self, _ctx: &CommandContext) -> Result<()> {
        for (i, name) in self.app.registry.load_order()?.iter().enumerate() {
            println!("{:>3}. {}", i + 1, name);
        }
        Ok(())
    }
}

/// 为没有配置条目的已知插件补一条条目
fn ensure_entry(app: &Application, name: &str) -> Result<()> {
    if app.plugin_config.entry(name).is_some() {
        return Ok(());
    }

    let installed_dir = app.installer.plugin_dir().join(name);
    let source = if builtin::contains(name) {
        PluginSource::Builtin(name.to_string())
    } else if installed::is_plugin_dir(&installed_dir) {
        PluginSource::Path(installed_dir)
    } else {
        return Err(PluginError::PluginNotFound(name.to_string()).into());
    };
    app.plugin_config.upsert_entry(PluginEntry::new(name, source))
}

/// plugin enable / plugin disable 命令
pub struct EnableCommand<'a> {
    app: &'a Application,
    name: String,
    enabled: bool,
}

impl<'a> EnableCommand<'a> {
    pub fn new(app: &'a Application, name: String, enabled: bool) -> Self {
        Self { app, name, enabled }
    }
}

impl CommandHandler for EnableCommand<'_> {
    fn execute(&self, _ctx: &CommandContext) -> Result<()> {
        ensure_entry(self.app, &self.name)?;
        self.app.plugin_config.set_enabled(&self.name, self.enabled)?;

        if self.enabled {
            println!("✓ enabled {}", self.name);
        } else {
            println!("✓ disabled {}", self.name);
            let dependents = self.app.registry.required_by(&self.name);
            if !dependents.is_empty() {
                eprintln!(
                    "warning: {} will fail to load without {}",
                    dependents.join(", "),
                    self.name
                );
            }
        }
        Ok(())
    }
}

/// plugin set 命令
pub struct SetCommand<'a> {
    app: &'a Application,
    name: String,
    key: String,
    value: String,
}

impl<'a> SetCommand<'a> {
    pub fn new(app: &'a Application, name: String, key: String, value: String) -> Self {
        Self {
            app,
            name,
            key,
            value,
        }
    }
}

impl CommandHandler for SetCommand<'_> {
    fn execute(&self, _ctx: &CommandContext) -> Result<()> {
        ensure_entry(self.app, &self.name)?;
        self.app
            .plugin_config
            .set_setting(&self.name, &self.key, &self.value)?;
        println!("✓ {}.{} = {}", self.name, self.key, self.value);
        Ok(())
    }
}

/// plugin remove 命令
pub struct RemoveCommand<'a> {
    app: &'a Application,
    name: String,
    force: bool,
}

impl<'a> RemoveCommand<'a> {
    pub fn new(app: &'a Application, name: String, force: bool) -> Self {
        Self { app, name, force }
    }
}

impl CommandHandler for RemoveCommand<'_> {
    fn execute(&self, _ctx: &CommandContext) -> Result<()> {
        let dependents = self.app.registry.required_by(&self.name);
        if !dependents.is_empty() && !self.force {
            return Err(HostError::Failed(format!(
                "{} is required by {}; use --force to remove it anyway",
                self.name,
                dependents.join(", ")
            )));
        }

        let entry = self.app.plugin_config.remove(&self.name)?;
        let installed_dir = self.app.installer.plugin_dir().join(&self.name);
        let had_files = installed::is_plugin_dir(&installed_dir);
        if had_files {
            fs::remove_dir_all(&installed_dir)?;
        }

        if entry.is_none() && !had_files {
            return Err(PluginError::PluginNotFound(self.name.clone()).into());
        }
        println!("✓ removed {}", self.name);
        Ok(())
    }
}
