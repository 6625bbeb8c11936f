//! 基于 git 的插件安装器
//!
//! 一次安装依次执行 parse、fetch、resolve-version、discover、validate、
//! build、install 和 finalize。任一步失败即中止流水线，
//! 返回的错误会标明失败的步骤。

pub mod builder;
pub mod git;
pub mod lock;
pub mod manifest;
pub mod process;
pub mod repository;

use crate::plugin::config::PluginConfigManager;
use crate::plugin::installed::{self, METADATA_FILE};
use crate::plugin::types::{Context, InstallStep, PluginError, PluginMetadata, TrustLevel};
use crate::plugin::validation::Validator;
use crate::plugin::version::{parse_version, tag_matches};
use builder::{BuildOptions, BuildResult, Builder, default_builders};
use chrono::Utc;
use git::Git;
use lock::CacheLock;
use manifest::PluginManifest;
use regex::Regex;
use repository::RepositoryInfo;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use builder::{CargoBuilder, PrebuiltBuilder};
pub use repository::Protocol;

/// 来源地址以这些前缀开头的插件归为官方插件
pub const OFFICIAL_SOURCES: &[&str] = &["https://github.com/hostkit-plugins/"];

#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// 语义化版本或标签；覆盖引用中的 `@version`
    pub version: Option<String>,
    pub branch: Option<String>,
    pub commit: Option<String>,
    /// 以该名称安装，而不是清单声明的名称
    pub name: Option<String>,
    /// 即使已有相同安装也重新克隆并安装
    pub force: bool,
    /// 构建前校验发现的元数据
    pub verify: bool,
    /// 整个流水线的时限
    pub timeout: Option<Duration>,
    pub build: BuildOptions,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            version: None,
            branch: None,
            commit: None,
            name: None,
            force: false,
            verify: true,
            timeout: None,
            build: BuildOptions::default(),
        }
    }
}

/// 安装成功的结果
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    /// 插件目录下的子目录名
    pub target: String,
    pub install_dir: PathBuf,
    pub metadata: PluginMetadata,
    /// 已有相同安装，未做改动
    pub unchanged: bool,
    pub warnings: Vec<String>,
}

fn at(step: InstallStep) -> impl Fn(PluginError) -> PluginError {
    move |source| PluginError::Install {
        step,
        source: Box::new(source),
    }
}

fn io_failure(path: &Path) -> impl Fn(std::io::Error) -> PluginError + '_ {
    move |source| PluginError::InstallIoFailure {
        path: path.to_path_buf(),
        source,
    }
}

fn check_deadline(ctx: &Context, before: InstallStep) -> Result<(), PluginError> {
    if ctx.expired() {
        return Err(at(before)(PluginError::Timeout(format!(
            "install deadline passed before the {} step",
            before
        ))));
    }
    Ok(())
}

fn target_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9-]{0,49}$").unwrap_or_else(|_| unreachable!()))
}

/// 用户要求的修订，越具体越优先
fn requested_revision<'a>(repo: &'a RepositoryInfo, opts: &'a InstallOptions) -> Option<&'a str> {
    opts.commit
        .as_deref()
        .or(opts.version.as_deref())
        .or(opts.branch.as_deref())
        .or(repo.version.as_deref())
}

/// 判定来源可信级别。声明的级别只能降低推断出的级别，
/// 不能提高。
pub fn trust_level(
    repo: Option<&RepositoryInfo>,
    declared: Option<&str>,
    official_sources: &[String],
) -> TrustLevel {
    let inferred = match repo {
        None => TrustLevel::Untrusted,
        Some(r) if !r.is_remote() => TrustLevel::Untrusted,
        Some(r) => {
            let url = format!("{}/", r.canonical_url());
            if official_sources.iter().any(|prefix| url.starts_with(prefix.as_str())) {
                TrustLevel::Official
            } else {
                TrustLevel::Community
            }
        }
    };

    match declared.and_then(|d| d.parse::<TrustLevel>().ok()) {
        Some(level) => level.min(inferred),
        None => inferred,
    }
}

/// 已换入、尚未完成收尾的安装
#[derive(Debug)]
struct Committed {
    final_dir: PathBuf,
    /// 被替换的旧安装
    backup: Option<PathBuf>,
}

impl Committed {
    /// 收尾成功：丢弃旧安装
    fn keep(self) {
        if let Some(backup) = &self.backup
            && let Err(e) = fs::remove_dir_all(backup)
        {
            warn!(dir = %backup.display(), error = %e, "failed to remove previous install");
        }
    }

    /// 收尾失败：删除新安装并恢复旧安装
    fn roll_back(self) {
        if let Err(e) = fs::remove_dir_all(&self.final_dir) {
            warn!(dir = %self.final_dir.display(), error = %e, "failed to remove rejected install");
        }
        if let Some(backup) = &self.backup
            && let Err(e) = fs::rename(backup, &self.final_dir)
        {
            warn!(dir = %backup.display(), error = %e, "failed to restore previous install");
        }
    }
}

pub struct GitInstaller {
    plugin_dir: PathBuf,
    cache_dir: PathBuf,
    git: Git,
    builders: Vec<Box<dyn Builder>>,
    rewrites: Vec<(String, String)>,
    official_sources: Vec<String>,
    config: Option<PluginConfigManager>,
}

impl GitInstaller {
    pub fn new(plugin_dir: PathBuf, cache_dir: PathBuf) -> Self {
        Self {
            plugin_dir,
            cache_dir,
            git: Git::new(),
            builders: default_builders(),
            rewrites: Vec::new(),
            official_sources: OFFICIAL_SOURCES.iter().map(|s| s.to_string()).collect(),
            config: None,
        }
    }

    /// 每次安装成功后在 `plugins.toml` 中记录远程条目
    pub fn with_config(mut self, config: PluginConfigManager) -> Self {
        self.config = Some(config);
        self
    }

    /// 以 `prefix` 开头的克隆地址改从 `replacement` 获取，
    /// 类似 git 的 `url.<base>.insteadOf`
    pub fn with_url_rewrite(mut self, prefix: &str, replacement: &str) -> Self {
        self.rewrites.push((prefix.to_string(), replacement.to_string()));
        self
    }

    /// 替换官方来源前缀列表（来自 `plugins.toml` 的 `official_sources`）
    pub fn with_official_sources(mut self, sources: Vec<String>) -> Self {
        self.official_sources = sources;
        self
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    fn clone_url(&self, repo: &RepositoryInfo) -> String {
        let url = repo.clone_url();
        for (prefix, replacement) in &self.rewrites {
            if let Some(rest) = url.strip_prefix(prefix.as_str()) {
                return format!("{}{}", replacement, rest);
            }
        }
        url
    }

    pub fn install(&self, reference: &str, opts: &InstallOptions) -> Result<InstallOutcome, PluginError> {
        let ctx = opts
            .timeout
            .map(Context::with_timeout)
            .unwrap_or_else(Context::background);

        let repo = RepositoryInfo::parse(reference).map_err(at(InstallStep::Parse))?;
        info!(repository = %repo.canonical_url(), "installing plugin");

        let _lock = CacheLock::acquire(&self.cache_dir, &repo.cache_key(), &ctx)
            .map_err(at(InstallStep::Fetch))?;
        let checkout = self.fetch(&repo, opts.force, &ctx).map_err(at(InstallStep::Fetch))?;

        check_deadline(&ctx, InstallStep::ResolveVersion)?;
        let commit = self
            .resolve_version(&checkout, &repo, requested_revision(&repo, opts), &ctx)
            .map_err(at(InstallStep::ResolveVersion))?;

        check_deadline(&ctx, InstallStep::Discover)?;
        let (source_dir, manifest) =
            manifest::discover(&checkout).map_err(at(InstallStep::Discover))?;

        let target = opts.name.clone().unwrap_or_else(|| manifest.name.clone());
        self.validate(&manifest, &target, opts.verify)
            .map_err(at(InstallStep::Validate))?;

        let source = repo.canonical_url();
        if !opts.force
            && let Some(existing) = self.existing_install(&target, &manifest, &source, &commit)
        {
            info!(plugin = %target, version = %existing.version, "already installed, nothing to do");
            return Ok(InstallOutcome {
                install_dir: self.plugin_dir.join(&target),
                target,
                metadata: existing,
                unchanged: true,
                warnings: Vec::new(),
            });
        }

        check_deadline(&ctx, InstallStep::Build)?;
        let build = self
            .build(&source_dir, &manifest, &repo, opts, &ctx)
            .map_err(at(InstallStep::Build))?;

        check_deadline(&ctx, InstallStep::Install)?;
        let record = self.stamp(&build, &repo, &target, &commit);
        let committed = self
            .commit_install(&target, &build.artifact_path, &record, &ctx)
            .map_err(at(InstallStep::Install))?;
        let install_dir = committed.final_dir.clone();

        let metadata = match self.finalize(&install_dir, &target, &record) {
            Ok(metadata) => {
                committed.keep();
                metadata
            }
            Err(e) => {
                warn!(plugin = %target, error = %e, "finalize failed, restoring the previous install");
                committed.roll_back();
                return Err(at(InstallStep::Finalize)(e));
            }
        };

        for warning in &build.warnings {
            warn!(plugin = %target, "{}", warning);
        }
        info!(plugin = %target, version = %metadata.version, dir = %install_dir.display(), "plugin installed");

        Ok(InstallOutcome {
            target,
            install_dir,
            metadata,
            unchanged: false,
            warnings: build.warnings,
        })
    }

    /// 克隆到缓存，或就地刷新已有克隆
    fn fetch(&self, repo: &RepositoryInfo, force: bool, ctx: &Context) -> Result<PathBuf, PluginError> {
        fs::create_dir_all(&self.cache_dir)?;
        let checkout = self.cache_dir.join(repo.cache_key());

        let clone_url = self.clone_url(repo);
        if checkout.join(".git").is_dir() && !force {
            match self.git.remote_url(&checkout, ctx)? {
                Some(origin) if origin == clone_url => {
                    debug!(dir = %checkout.display(), "refreshing cached clone");
                    self.git.fetch(&checkout, ctx)?;
                    return Ok(checkout);
                }
                origin => {
                    warn!(
                        dir = %checkout.display(),
                        cached = ?origin,
                        requested = %clone_url,
                        "cached clone points elsewhere, cloning again"
                    );
                }
            }
        }

        if checkout.exists() {
            fs::remove_dir_all(&checkout)?;
        }

        // 在最终位置旁克隆，被杀掉的克隆不会被误当作缓存
        let partial = self.cache_dir.join(format!("{}.partial", repo.cache_key()));
        if partial.exists() {
            fs::remove_dir_all(&partial)?;
        }
        if let Err(e) = self.git.clone_repo(&clone_url, &partial, ctx) {
            let _ = fs::remove_dir_all(&partial);
            return Err(e);
        }
        fs::rename(&partial, &checkout)?;
        Ok(checkout)
    }

    /// 检出请求的修订并返回对应提交
    fn resolve_version(
        &self,
        checkout: &Path,
        repo: &RepositoryInfo,
        requested: Option<&str>,
        ctx: &Context,
    ) -> Result<String, PluginError> {
        let Some(requested) = requested else {
            if !self.git.checkout(checkout, "origin/HEAD", ctx)?
                && !self.git.checkout(checkout, "HEAD", ctx)?
            {
                return Err(PluginError::VersionNotFound {
                    repository: repo.canonical_url(),
                    requested: "default branch".to_string(),
                });
            }
            return self.git.head_commit(checkout, ctx);
        };

        // 先查远程分支，刷新后的克隆才能看到新提交
        if self.git.checkout(checkout, &format!("origin/{}", requested), ctx)?
            || self.git.checkout(checkout, requested, ctx)?
        {
            return self.git.head_commit(checkout, ctx);
        }

        if let Ok(version) = parse_version(requested) {
            let tags = self.git.tags(checkout, ctx)?;
            if let Some(tag) = tags.iter().find(|t| tag_matches(t, &version)) {
                debug!(tag = %tag, requested, "resolved version to tag");
                if self.git.checkout(checkout, &format!("refs/tags/{}", tag), ctx)? {
                    return self.git.head_commit(checkout, ctx);
                }
            }
        }

        Err(PluginError::VersionNotFound {
            repository: repo.canonical_url(),
            requested: requested.to_string(),
        })
    }

    fn validate(&self, manifest: &PluginManifest, target: &str, verify: bool) -> Result<(), PluginError> {
        // target 会成为目录名，始终检查
        if !target_pattern().is_match(target) {
            return Err(PluginError::Invalid(format!(
                "'{}' is not a valid plugin name",
                target
            )));
        }

        if !verify {
            debug!(plugin = %manifest.name, "metadata validation skipped");
            return Ok(());
        }

        let errors = Validator::validate_metadata(&manifest.to_metadata());
        if errors.is_empty() {
            Ok(())
        } else {
            Err(PluginError::ValidationFailed {
                plugin: manifest.name.clone(),
                errors,
            })
        }
    }

    /// `target` 的现有安装：要求来源、版本和提交都相同，
    /// 且制品完好
    fn existing_install(
        &self,
        target: &str,
        manifest: &PluginManifest,
        source: &str,
        commit: &str,
    ) -> Option<PluginMetadata> {
        let dir = self.plugin_dir.join(target);
        let existing = installed::read_metadata(&dir).ok()?;
        let same_origin = existing.version == manifest.version
            && existing.source.as_deref() == Some(source)
            && existing.build.as_ref().and_then(|b| b.commit.as_deref()) == Some(commit);
        if !same_origin {
            return None;
        }

        let artifact = installed::find_artifact(&dir).ok()?;
        let checksum = installed::sha256_file(&artifact).ok()?;
        (existing.checksum.as_deref() == Some(checksum.as_str())).then_some(existing)
    }

    fn build(
        &self,
        source_dir: &Path,
        manifest: &PluginManifest,
        repo: &RepositoryInfo,
        opts: &InstallOptions,
        ctx: &Context,
    ) -> Result<BuildResult, PluginError> {
        let builder = self
            .builders
            .iter()
            .find(|b| b.can_build(source_dir, manifest))
            .ok_or_else(|| {
                PluginError::BuildFailed(format!(
                    "no builder recognizes the layout of {}",
                    source_dir.display()
                ))
            })?;

        let mut options = opts.build.clone();
        if options.target_dir.is_none() {
            // 放在检出目录外，`git clean` 不会清掉增量构建
            options.target_dir = Some(self.cache_dir.join(format!("{}.target", repo.cache_key())));
        }

        debug!(builder = builder.name(), plugin = %manifest.name, "building");
        builder.build(source_dir, manifest, &options, ctx)
    }

    /// 写入前盖到记录上的来源信息
    fn stamp(&self, build: &BuildResult, repo: &RepositoryInfo, target: &str, commit: &str) -> PluginMetadata {
        let mut record = build.metadata.clone();
        record.install_path = Some(self.plugin_dir.join(target));
        record.installed_at = Some(Utc::now());
        record.checksum = Some(build.checksum.clone());
        record.source = Some(repo.canonical_url());
        record.trust_level = Some(
            trust_level(
                Some(repo),
                build.metadata.trust_level.as_deref(),
                &self.official_sources,
            )
            .to_string(),
        );
        record.validated = Validator::validate_metadata(&record).is_empty();
        if let Some(info) = record.build.as_mut() {
            info.commit = Some(commit.to_string());
        }
        record
    }

    /// 先把制品和记录写入隐藏的暂存目录，再整体换入。最后一次
    /// rename 成功之前，`target` 下看不到任何新文件。
    fn commit_install(
        &self,
        target: &str,
        artifact: &Path,
        record: &PluginMetadata,
        ctx: &Context,
    ) -> Result<Committed, PluginError> {
        fs::create_dir_all(&self.plugin_dir).map_err(io_failure(&self.plugin_dir))?;

        // 每次安装独占一个暂存目录；出错返回时随 TempDir 一起删除
        let staging = tempfile::Builder::new()
            .prefix(&format!(".{}.staging-", target))
            .tempdir_in(&self.plugin_dir)
            .map_err(io_failure(&self.plugin_dir))?;
        Self::stage(staging.path(), artifact, record)?;

        if ctx.expired() {
            return Err(PluginError::Timeout("install deadline passed before commit".to_string()));
        }

        let final_dir = self.plugin_dir.join(target);
        let backup = final_dir.exists().then(|| {
            let mut name = staging.path().as_os_str().to_owned();
            name.push(".previous");
            PathBuf::from(name)
        });

        Self::swap_in(staging.path(), &final_dir, backup.as_deref())?;
        Ok(Committed { final_dir, backup })
    }

    /// 把旧安装移到 `backup`，再把暂存目录改名为 `final_dir`；
    /// 第二步失败时旧安装被移回原处。
    fn swap_in(staging: &Path, final_dir: &Path, backup: Option<&Path>) -> Result<(), PluginError> {
        if let Some(backup) = backup {
            fs::rename(final_dir, backup).map_err(io_failure(final_dir))?;
        }

        if let Err(e) = fs::rename(staging, final_dir) {
            if let Some(backup) = backup
                && let Err(restore) = fs::rename(backup, final_dir)
            {
                warn!(dir = %backup.display(), error = %restore, "failed to restore previous install");
            }
            return Err(io_failure(final_dir)(e));
        }
        Ok(())
    }

    fn stage(staging: &Path, artifact: &Path, record: &PluginMetadata) -> Result<(), PluginError> {
        fs::create_dir_all(staging).map_err(io_failure(staging))?;

        let file_name = artifact
            .file_name()
            .ok_or_else(|| PluginError::BuildFailed(format!("{} has no file name", artifact.display())))?;
        let staged_artifact = staging.join(file_name);
        fs::copy(artifact, &staged_artifact).map_err(io_failure(&staged_artifact))?;

        let metadata_path = staging.join(METADATA_FILE);
        let json = serde_json::to_string_pretty(record)?;
        fs::write(&metadata_path, json).map_err(io_failure(&metadata_path))?;
        Ok(())
    }

    /// 重新读取已安装记录，与磁盘上的制品核对，
    /// 并把插件写入启用配置
    fn finalize(&self, install_dir: &Path, target: &str, record: &PluginMetadata) -> Result<PluginMetadata, PluginError> {
        let written = installed::read_metadata(install_dir)?;
        let artifact = installed::find_artifact(install_dir)?;
        let checksum = installed::sha256_file(&artifact)?;
        if written.checksum.as_deref() != Some(checksum.as_str()) || &written != record {
            return Err(PluginError::LoadFailed(format!(
                "installed files in {} do not match the build",
                install_dir.display()
            )));
        }

        if let (Some(config), Some(source)) = (&self.config, &written.source) {
            config
                .record_remote(target, source, &checksum)
                .map_err(|e| PluginError::Config(e.to_string()))?;
        }
        Ok(written)
    }
}
