//! 插件结构校验
//!
//! 各条规则独立执行并报告全部违规，
//! 调用方一次即可拿到完整诊断。

use crate::plugin::types::{Dependency, Plugin, PluginError, PluginMetadata, TrustLevel};
use crate::plugin::version::{parse_constraint, parse_version};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

pub const MAX_NAME_LEN: usize = 50;
pub const MAX_DESCRIPTION_LEN: usize = 500;

/// 规则违规的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    Name,
    Description,
    Author,
    Version,
    Dependency,
    Command,
    Checksum,
    TrustLevel,
    Custom,
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationErrorKind::Name => "name",
            ValidationErrorKind::Description => "description",
            ValidationErrorKind::Author => "author",
            ValidationErrorKind::Version => "version",
            ValidationErrorKind::Dependency => "dependency",
            ValidationErrorKind::Command => "command",
            ValidationErrorKind::Checksum => "checksum",
            ValidationErrorKind::TrustLevel => "trust_level",
            ValidationErrorKind::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// 单条规则违规
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub message: String,
    /// 稳定的机器可读代码，例如 `name.pattern`
    pub code: String,
}

impl ValidationError {
    fn new(kind: ValidationErrorKind, code: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: code.to_string(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

struct Patterns {
    name: Regex,
    command: Regex,
    checksum: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        name: Regex::new(r"^[a-z0-9-]+$").unwrap_or_else(|_| unreachable!()),
        command: Regex::new(r"^[a-z][a-z0-9-]*$").unwrap_or_else(|_| unreachable!()),
        checksum: Regex::new(r"^[a-f0-9]{64}$").unwrap_or_else(|_| unreachable!()),
    })
}

/// 面向插件实例和元数据记录的结构校验器
pub struct Validator;

impl Validator {
    /// 检查插件实例；结果为空表示有效
    pub fn validate_plugin(plugin: &dyn Plugin) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        Self::check_name(plugin.name(), &mut errors);
        Self::check_description(plugin.description(), &mut errors);
        Self::check_author(plugin.author(), &mut errors);
        Self::check_version(plugin.version(), &mut errors);
        Self::check_dependencies(&plugin.dependencies(), &mut errors);

        let commands = plugin.commands();
        if commands.is_empty() {
            errors.push(ValidationError::new(
                ValidationErrorKind::Command,
                "command.none",
                "plugin must declare at least one command",
            ));
        }

        let mut seen = HashSet::new();
        for command in &commands {
            if command.name.is_empty() {
                errors.push(ValidationError::new(
                    ValidationErrorKind::Command,
                    "command.name_empty",
                    "command name must not be empty",
                ));
            } else if !patterns().command.is_match(&command.name) {
                errors.push(ValidationError::new(
                    ValidationErrorKind::Command,
                    "command.name_pattern",
                    format!(
                        "command name '{}' must start with a lowercase letter and contain only lowercase letters, digits and hyphens",
                        command.name
                    ),
                ));
            }

            if !command.name.is_empty() && !seen.insert(command.name.clone()) {
                errors.push(ValidationError::new(
                    ValidationErrorKind::Command,
                    "command.duplicate",
                    format!("command '{}' is declared more than once", command.name),
                ));
            }

            if command.description.trim().is_empty() {
                errors.push(ValidationError::new(
                    ValidationErrorKind::Command,
                    "command.description_empty",
                    format!("command '{}' has no description", command.name),
                ));
            }

            if command.handler.is_none() {
                errors.push(ValidationError::new(
                    ValidationErrorKind::Command,
                    "command.handler_missing",
                    format!("command '{}' has no handler", command.name),
                ));
            }
        }

        if let Err(e) = plugin.validate() {
            errors.push(ValidationError::new(
                ValidationErrorKind::Custom,
                "plugin.validate",
                e.to_string(),
            ));
        }

        errors
    }

    /// 在没有插件实例时检查元数据记录：身份、依赖声明、
    /// 校验和格式以及可信级别
    pub fn validate_metadata(metadata: &PluginMetadata) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        Self::check_name(&metadata.name, &mut errors);
        Self::check_description(&metadata.description, &mut errors);
        Self::check_version(&metadata.version, &mut errors);
        Self::check_dependencies(&metadata.dependencies, &mut errors);

        if let Some(checksum) = &metadata.checksum
            && !patterns().checksum.is_match(checksum)
        {
            errors.push(ValidationError::new(
                ValidationErrorKind::Checksum,
                "checksum.format",
                format!("checksum '{}' is not a lowercase hex SHA-256 digest", checksum),
            ));
        }

        if let Some(level) = &metadata.trust_level
            && level.parse::<TrustLevel>().is_err()
        {
            errors.push(ValidationError::new(
                ValidationErrorKind::TrustLevel,
                "trust_level.unknown",
                format!(
                    "trust level '{}' must be one of official, community, untrusted",
                    level
                ),
            ));
        }

        errors
    }

    /// 以 `Result` 形式返回 `validate_plugin` 的结果，供注册流程使用
    pub fn ensure_valid(plugin: &dyn Plugin) -> Result<(), PluginError> {
        let errors = Self::validate_plugin(plugin);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(PluginError::ValidationFailed {
                plugin: plugin.name().to_string(),
                errors,
            })
        }
    }

    fn check_name(name: &str, errors: &mut Vec<ValidationError>) {
        if name.is_empty() {
            errors.push(ValidationError::new(
                ValidationErrorKind::Name,
                "name.empty",
                "plugin name must not be empty",
            ));
            return;
        }
        if !patterns().name.is_match(name) {
            errors.push(ValidationError::new(
                ValidationErrorKind::Name,
                "name.pattern",
                format!(
                    "plugin name '{}' may only contain lowercase letters, digits and hyphens",
                    name
                ),
            ));
        }
        if name.chars().count() > MAX_NAME_LEN {
            errors.push(ValidationError::new(
                ValidationErrorKind::Name,
                "name.length",
                format!("plugin name exceeds {} characters", MAX_NAME_LEN),
            ));
        }
    }

    fn check_description(description: &str, errors: &mut Vec<ValidationError>) {
        if description.trim().is_empty() {
            errors.push(ValidationError::new(
                ValidationErrorKind::Description,
                "description.empty",
                "description must not be empty",
            ));
        } else if description.chars().count() > MAX_DESCRIPTION_LEN {
            errors.push(ValidationError::new(
                ValidationErrorKind::Description,
                "description.length",
                format!("description exceeds {} characters", MAX_DESCRIPTION_LEN),
            ));
        }
    }

    fn check_author(author: &str, errors: &mut Vec<ValidationError>) {
        if author.trim().is_empty() {
            errors.push(ValidationError::new(
                ValidationErrorKind::Author,
                "author.empty",
                "author must not be empty",
            ));
        }
    }

    fn check_version(version: &str, errors: &mut Vec<ValidationError>) {
        if version.trim().is_empty() {
            errors.push(ValidationError::new(
                ValidationErrorKind::Version,
                "version.empty",
                "version must not be empty",
            ));
        } else if let Err(e) = parse_version(version) {
            errors.push(ValidationError::new(
                ValidationErrorKind::Version,
                "version.format",
                format!("version '{}' is not a semantic version: {}", version, e),
            ));
        }
    }

    fn check_dependencies(dependencies: &[Dependency], errors: &mut Vec<ValidationError>) {
        for dep in dependencies {
            if dep.name.trim().is_empty() {
                errors.push(ValidationError::new(
                    ValidationErrorKind::Dependency,
                    "dependency.name_empty",
                    "dependency name must not be empty",
                ));
            }
            if let Some(constraint) = &dep.version
                && let Err(e) = parse_constraint(constraint)
            {
                errors.push(ValidationError::new(
                    ValidationErrorKind::Dependency,
                    "dependency.constraint",
                    format!(
                        "dependency '{}' has an invalid version constraint '{}': {}",
                        dep.name, constraint, e
                    ),
                ));
            }
        }
    }
}
