//! `git` 命令行的薄封装

use crate::plugin::installer::process::{self, ProcessOutput};
use crate::plugin::types::{Context, PluginError};
use std::path::Path;
use std::process::Command;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Git {
    program: String,
}

impl Default for Git {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
        }
    }
}

impl Git {
    pub fn new() -> Self {
        Self::default()
    }

    /// `PATH` 上是否有可用的 `git`
    pub fn available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn command(&self, dir: Option<&Path>) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(dir) = dir {
            cmd.arg("-C").arg(dir);
        }
        // 永不阻塞在凭据提示上
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd
    }

    fn run(&self, mut cmd: Command, ctx: &Context, what: &str) -> Result<ProcessOutput, PluginError> {
        process::run(&mut cmd, ctx, what)
    }

    fn run_checked(&self, cmd: Command, ctx: &Context, what: &str) -> Result<ProcessOutput, PluginError> {
        let output = self.run(cmd, ctx, what)?;
        if output.success() {
            Ok(output)
        } else {
            Err(PluginError::ExecutionFailed(format!(
                "{} failed: {}",
                what,
                output.stderr_tail(5)
            )))
        }
    }

    pub fn clone_repo(&self, url: &str, dest: &Path, ctx: &Context) -> Result<(), PluginError> {
        debug!(url, dest = %dest.display(), "cloning");
        let mut cmd = self.command(None);
        cmd.args(["clone", "--quiet", "--no-checkout", url]).arg(dest);
        self.run_checked(cmd, ctx, "git clone")?;
        Ok(())
    }

    pub fn fetch(&self, dir: &Path, ctx: &Context) -> Result<(), PluginError> {
        debug!(dir = %dir.display(), "fetching");
        let mut cmd = self.command(Some(dir));
        cmd.args(["fetch", "--quiet", "--tags", "--force", "--prune", "origin"]);
        self.run_checked(cmd, ctx, "git fetch")?;
        Ok(())
    }

    /// 缓存克隆的 `origin` 地址；读取失败时返回 `None`
    pub fn remote_url(&self, dir: &Path, ctx: &Context) -> Result<Option<String>, PluginError> {
        let mut cmd = self.command(Some(dir));
        cmd.args(["remote", "get-url", "origin"]);
        let output = self.run(cmd, ctx, "git remote")?;
        if !output.success() {
            return Ok(None);
        }
        Ok(Some(output.stdout.trim().to_string()))
    }

    /// 分离头指针检出 `rev`；修订不存在时返回 `Ok(false)`
    pub fn checkout(&self, dir: &Path, rev: &str, ctx: &Context) -> Result<bool, PluginError> {
        let mut verify = self.command(Some(dir));
        verify.args(["rev-parse", "--verify", "--quiet"]);
        verify.arg(format!("{}^{{commit}}", rev));
        if !self.run(verify, ctx, "git rev-parse")?.success() {
            return Ok(false);
        }

        let mut cmd = self.command(Some(dir));
        cmd.args(["checkout", "--quiet", "--force", "--detach", rev]);
        self.run_checked(cmd, ctx, "git checkout")?;

        let mut clean = self.command(Some(dir));
        clean.args(["clean", "-ffdxq"]);
        self.run_checked(clean, ctx, "git clean")?;
        Ok(true)
    }

    pub fn tags(&self, dir: &Path, ctx: &Context) -> Result<Vec<String>, PluginError> {
        let mut cmd = self.command(Some(dir));
        cmd.args(["tag", "--list"]);
        let output = self.run_checked(cmd, ctx, "git tag")?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub fn head_commit(&self, dir: &Path, ctx: &Context) -> Result<String, PluginError> {
        let mut cmd = self.command(Some(dir));
        cmd.args(["rev-parse", "HEAD"]);
        let output = self.run_checked(cmd, ctx, "git rev-parse")?;
        Ok(output.stdout.trim().to_string())
    }
}
