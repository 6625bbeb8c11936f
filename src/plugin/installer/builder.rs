//! 构建器把发现的插件源码变成可加载的制品

use crate::plugin::compatibility::RUNTIME_VERSION;
use crate::plugin::installed::sha256_file;
use crate::plugin::installer::manifest::{BuildKind, PluginManifest};
use crate::plugin::installer::process;
use crate::plugin::loader::dynamic::{is_library, library_extension};
use crate::plugin::types::{BuildInfo, Context, PluginError, PluginMetadata};
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Cargo profile，默认 `release`
    pub profile: String,
    /// 默认为检出目录内的 `target/`
    pub target_dir: Option<PathBuf>,
    pub features: Vec<String>,
    pub offline: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            profile: "release".to_string(),
            target_dir: None,
            features: Vec::new(),
            offline: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildResult {
    pub artifact_path: PathBuf,
    /// 制品的十六进制 SHA-256
    pub checksum: String,
    pub metadata: PluginMetadata,
    pub warnings: Vec<String>,
    pub duration: Duration,
}

impl BuildResult {
    fn new(
        builder: &str,
        profile: &str,
        artifact_path: PathBuf,
        manifest: &PluginManifest,
        warnings: Vec<String>,
        started: Instant,
    ) -> Result<Self, PluginError> {
        let checksum = sha256_file(&artifact_path)?;
        let duration = started.elapsed();

        let mut metadata = manifest.to_metadata();
        metadata.checksum = Some(checksum.clone());
        metadata.build = Some(BuildInfo {
            builder: builder.to_string(),
            profile: profile.to_string(),
            rustc_version: Some(RUNTIME_VERSION.to_string()),
            commit: None,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            warnings: warnings.clone(),
        });

        Ok(Self {
            artifact_path,
            checksum,
            metadata,
            warnings,
            duration,
        })
    }
}

pub trait Builder: Send + Sync {
    fn name(&self) -> &str;

    /// 本构建器能否处理 `dir` 的源码布局
    fn can_build(&self, dir: &Path, manifest: &PluginManifest) -> bool;

    fn build(
        &self,
        dir: &Path,
        manifest: &PluginManifest,
        options: &BuildOptions,
        ctx: &Context,
    ) -> Result<BuildResult, PluginError>;
}

/// 按顺序尝试的构建器；第一个识别出布局的胜出
pub fn default_builders() -> Vec<Box<dyn Builder>> {
    vec![Box::new(PrebuiltBuilder), Box::new(CargoBuilder::default())]
}

/// 直接使用仓库中提交的动态库
#[derive(Debug, Default, Clone, Copy)]
pub struct PrebuiltBuilder;

impl Builder for PrebuiltBuilder {
    fn name(&self) -> &str {
        "prebuilt"
    }

    fn can_build(&self, dir: &Path, manifest: &PluginManifest) -> bool {
        match manifest.build.kind {
            BuildKind::Prebuilt => true,
            BuildKind::Auto => manifest
                .build
                .artifact
                .as_ref()
                .is_some_and(|a| a.is_relative() && dir.join(a).is_file()),
            BuildKind::Cargo => false,
        }
    }

    fn build(
        &self,
        dir: &Path,
        manifest: &PluginManifest,
        _options: &BuildOptions,
        _ctx: &Context,
    ) -> Result<BuildResult, PluginError> {
        let started = Instant::now();
        let relative = manifest.build.artifact.as_ref().ok_or_else(|| {
            PluginError::BuildFailed("prebuilt plugin does not name its artifact".to_string())
        })?;

        let artifact = contained_artifact(dir, relative)?;
        if !is_library(&artifact) {
            return Err(PluginError::BuildFailed(format!(
                "prebuilt artifact {} is not a .{} library",
                relative.display(),
                library_extension()
            )));
        }

        BuildResult::new(self.name(), "prebuilt", artifact, manifest, Vec::new(), started)
    }
}

/// 把清单里的制品路径解析为检出目录内的真实文件
///
/// 拒绝绝对路径和 `..`；规范化后（含符号链接）仍须位于 `dir` 之下。
fn contained_artifact(dir: &Path, relative: &Path) -> Result<PathBuf, PluginError> {
    let escapes = relative.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(PluginError::BuildFailed(format!(
            "prebuilt artifact {} must be a relative path inside the repository",
            relative.display()
        )));
    }

    let candidate = dir.join(relative);
    if !candidate.is_file() {
        return Err(PluginError::BuildFailed(format!(
            "prebuilt artifact {} does not exist",
            relative.display()
        )));
    }

    let root = dir.canonicalize()?;
    let artifact = candidate.canonicalize()?;
    if !artifact.starts_with(&root) {
        return Err(PluginError::BuildFailed(format!(
            "prebuilt artifact {} resolves outside the repository",
            relative.display()
        )));
    }
    Ok(artifact)
}

/// 对 `cdylib` crate 执行 `cargo build --lib`
#[derive(Debug, Clone)]
pub struct CargoBuilder {
    program: String,
}

impl Default for CargoBuilder {
    fn default() -> Self {
        Self {
            program: std::env::var("CARGO").unwrap_or_else(|_| "cargo".to_string()),
        }
    }
}

impl CargoBuilder {
    /// cargo 将生成的库名，取自 `[lib].name` 或 `[package].name`
    fn library_name(dir: &Path, manifest: &PluginManifest) -> Result<String, PluginError> {
        if let Some(package) = &manifest.build.package {
            return Ok(package.replace('-', "_"));
        }

        let content = std::fs::read_to_string(dir.join("Cargo.toml"))?;
        let cargo: toml::Value = toml::from_str(&content)?;
        let name = cargo
            .get("lib")
            .and_then(|l| l.get("name"))
            .or_else(|| cargo.get("package").and_then(|p| p.get("name")))
            .and_then(|n| n.as_str())
            .ok_or_else(|| {
                PluginError::BuildFailed("Cargo.toml has no package name".to_string())
            })?;
        Ok(name.replace('-', "_"))
    }

    fn artifact_name(lib_name: &str) -> String {
        if cfg!(target_os = "windows") {
            format!("{}.{}", lib_name, library_extension())
        } else {
            format!("lib{}.{}", lib_name, library_extension())
        }
    }
}

/// cargo 输出中的 `warning:` 行，去掉每个 crate 的汇总行
fn collect_warnings(stderr: &str) -> Vec<String> {
    stderr
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("warning:"))
        .filter(|l| !l.contains(" generated "))
        .map(str::to_string)
        .collect()
}

impl Builder for CargoBuilder {
    fn name(&self) -> &str {
        "cargo"
    }

    fn can_build(&self, dir: &Path, manifest: &PluginManifest) -> bool {
        match manifest.build.kind {
            BuildKind::Cargo => true,
            BuildKind::Auto => dir.join("Cargo.toml").is_file(),
            BuildKind::Prebuilt => false,
        }
    }

    fn build(
        &self,
        dir: &Path,
        manifest: &PluginManifest,
        options: &BuildOptions,
        ctx: &Context,
    ) -> Result<BuildResult, PluginError> {
        let started = Instant::now();
        let lib_name = Self::library_name(dir, manifest)?;
        let target_dir = options
            .target_dir
            .clone()
            .unwrap_or_else(|| dir.join("target"));

        let mut cmd = Command::new(&self.program);
        cmd.current_dir(dir)
            .args(["build", "--lib", "--message-format", "short"])
            .args(["--profile", &options.profile])
            .env("CARGO_TARGET_DIR", &target_dir);
        if let Some(package) = &manifest.build.package {
            cmd.args(["--package", package]);
        }
        if !options.features.is_empty() {
            cmd.args(["--features", &options.features.join(",")]);
        }
        if options.offline {
            cmd.arg("--offline");
        }

        info!(plugin = %manifest.name, dir = %dir.display(), "building plugin with cargo");
        let output = process::run(&mut cmd, ctx, "cargo build")?;
        if !output.success() {
            return Err(PluginError::BuildFailed(format!(
                "cargo build exited with {}: {}",
                output.status,
                output.stderr_tail(20)
            )));
        }
        let warnings = collect_warnings(&output.stderr);

        // dev profile 输出到 target/debug
        let profile_dir = if options.profile == "dev" {
            "debug"
        } else {
            options.profile.as_str()
        };
        let artifact = target_dir
            .join(profile_dir)
            .join(Self::artifact_name(&lib_name));
        if !artifact.is_file() {
            return Err(PluginError::BuildFailed(format!(
                "cargo did not produce {}; is the crate type cdylib?",
                artifact.display()
            )));
        }

        debug!(artifact = %artifact.display(), warnings = warnings.len(), "cargo build finished");
        BuildResult::new(self.name(), &options.profile, artifact, manifest, warnings, started)
    }
}
