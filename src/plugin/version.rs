//! 语义化版本工具
//!
//! 所有版本比较都经过 `semver`，优先级遵循语义化版本规则
//! （预发布版本排在对应正式版之前）。

use semver::{Version, VersionReq};

/// 解析版本，容忍 git 标签中的前导 `v`
pub fn parse_version(input: &str) -> Result<Version, semver::Error> {
    let trimmed = input.trim();
    let stripped = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    Version::parse(stripped)
}

/// 解析版本范围，例如 `>=2.0.0`、`^1.4` 或 `>=1, <3`
///
/// 单独的完整版本（`2.0.0`、`v2.0.0`）表示“至少为该版本”。
pub fn parse_constraint(input: &str) -> Result<VersionReq, semver::Error> {
    let trimmed = input.trim();
    if let Ok(version) = parse_version(trimmed) {
        return VersionReq::parse(&format!(">={}", version));
    }
    VersionReq::parse(trimmed)
}

/// `version` 是否满足 `constraint`；没有约束时总是满足
pub fn satisfies(version: &Version, constraint: Option<&str>) -> Result<bool, semver::Error> {
    match constraint {
        None => Ok(true),
        Some(c) if c.trim().is_empty() || c.trim() == "*" => Ok(true),
        Some(c) => Ok(parse_constraint(c)?.matches(version)),
    }
}

/// 把 git 标签解释为版本（`v1.2.0` 和 `1.2.0` 均可）
pub fn tag_version(tag: &str) -> Option<Version> {
    parse_version(tag).ok()
}

/// 去掉前导 `v` 后，`tag` 是否恰好是 `requested`
pub fn tag_matches(tag: &str, requested: &Version) -> bool {
    tag_version(tag).is_some_and(|v| &v == requested)
}
