//! 仓库引用解析
//!
//! 支持以下形式，均可带 `@version` 后缀：
//!
//! - `host/owner/repo`
//! - `scheme://[user@]host[:port]/owner/repo`（`https`、`http`、`ssh`、`git`、`file`）
//! - `user@host:owner/repo`（SCP 风格的 ssh）
//!
//! URL 形式交给 `url` 解析：IPv6 主机、查询串和片段、百分号编码的路径段都按标准处理。

use crate::plugin::types::PluginError;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::{Host, Url};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Https,
    Http,
    Ssh,
    Git,
    File,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Https => "https",
            Protocol::Http => "http",
            Protocol::Ssh => "ssh",
            Protocol::Git => "git",
            Protocol::File => "file",
        };
        f.write_str(s)
    }
}

/// 解析后的仓库引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    /// 小写主机名；IPv6 地址带方括号
    pub host: String,
    /// 主机与仓库名之间的全部路径，如 `acme` 或 `group/sub`
    pub owner: String,
    pub repo: String,
    pub protocol: Protocol,
    pub user: Option<String>,
    pub port: Option<u16>,
    /// 内联的 `@version` 后缀
    pub version: Option<String>,
    /// 拉取需要凭据（ssh 或 URL 中带用户名）
    pub private: bool,
    scp: bool,
    /// `file://` 引用对应的本地路径
    local_path: Option<String>,
}

fn invalid(input: &str) -> PluginError {
    PluginError::InvalidRepositoryUrl(input.to_string())
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn valid_host(host: &str) -> bool {
    !host.is_empty()
        && !host.starts_with('.')
        && !host.starts_with('-')
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-'))
}

fn decode(component: &str) -> Option<String> {
    percent_decode_str(component)
        .decode_utf8()
        .ok()
        .map(|s| s.into_owned())
}

/// 从最后一个路径段上拆出 `@version`
fn split_version(input: &str) -> (&str, Option<&str>) {
    let tail_start = input.rfind('/').map(|i| i + 1).unwrap_or(0);
    match input[tail_start..].rfind('@') {
        Some(at) => {
            let at = tail_start + at;
            (&input[..at], Some(&input[at + 1..]))
        }
        None => (input, None),
    }
}

/// 把 `owner/.../repo[.git]` 的各段拆成 owner 和仓库名
fn split_segments<S: AsRef<str>>(segments: &[S]) -> Option<(String, String)> {
    if segments.len() < 2 {
        return None;
    }
    let (last, owner) = segments.split_last()?;
    let last = last.as_ref();
    let repo = last.strip_suffix(".git").unwrap_or(last);
    if !valid_segment(repo) || !owner.iter().all(|s| valid_segment(s.as_ref())) {
        return None;
    }
    let owner: Vec<&str> = owner.iter().map(|s| s.as_ref()).collect();
    Some((owner.join("/"), repo.to_string()))
}

fn split_path(path: &str) -> Option<(String, String)> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    split_segments(&segments)
}

impl RepositoryInfo {
    pub fn parse(input: &str) -> Result<Self, PluginError> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(invalid(input));
        }

        let is_url = trimmed.contains("://");
        // 查询串和片段不参与版本拆分
        let trimmed = if is_url {
            trimmed.split(['?', '#']).next().unwrap_or(trimmed)
        } else {
            trimmed
        };

        let (reference, version) = split_version(trimmed);
        let version = match version {
            Some("") => return Err(invalid(input)),
            Some(v) => Some(v.to_string()),
            None => None,
        };

        let mut info = if is_url {
            Self::parse_url(reference).ok_or_else(|| invalid(input))?
        } else if Self::looks_like_scp(reference) {
            Self::parse_scp(reference).ok_or_else(|| invalid(input))?
        } else {
            Self::parse_bare(reference).ok_or_else(|| invalid(input))?
        };

        info.version = version;
        Ok(info)
    }

    fn looks_like_scp(reference: &str) -> bool {
        match (reference.find(':'), reference.find('/')) {
            (Some(colon), Some(slash)) => colon < slash,
            (Some(_), None) => true,
            _ => false,
        }
    }

    fn parse_url(reference: &str) -> Option<Self> {
        let url = Url::parse(reference).ok()?;
        let protocol = match url.scheme() {
            "https" => Protocol::Https,
            "http" => Protocol::Http,
            "ssh" | "git+ssh" | "ssh+git" => Protocol::Ssh,
            "git" => Protocol::Git,
            "file" => Protocol::File,
            _ => return None,
        };
        // 口令交给 git 凭据助手，不写进引用
        if url.password().is_some() {
            return None;
        }

        let segments = url
            .path_segments()?
            .filter(|s| !s.is_empty())
            .map(decode)
            .collect::<Option<Vec<String>>>()?;
        let (owner, repo) = split_segments(&segments)?;

        if protocol == Protocol::File {
            match url.host() {
                None => {}
                Some(Host::Domain(host)) if host.eq_ignore_ascii_case("localhost") => {}
                Some(_) => return None,
            }
            return Some(Self {
                host: "localhost".to_string(),
                owner,
                repo,
                protocol,
                user: None,
                port: None,
                version: None,
                private: false,
                scp: false,
                local_path: Some(format!("/{}", segments.join("/"))),
            });
        }

        let host = match url.host()? {
            Host::Domain(domain) => {
                let domain = domain.to_ascii_lowercase();
                if !valid_host(&domain) {
                    return None;
                }
                domain
            }
            Host::Ipv4(addr) => addr.to_string(),
            Host::Ipv6(addr) => format!("[{}]", addr),
        };
        let user = match url.username() {
            "" => None,
            name => Some(decode(name)?),
        };

        Some(Self {
            host,
            owner,
            repo,
            protocol,
            private: protocol == Protocol::Ssh || user.is_some(),
            user,
            port: url.port(),
            version: None,
            scp: false,
            local_path: None,
        })
    }

    fn parse_scp(reference: &str) -> Option<Self> {
        let (authority, path) = reference.split_once(':')?;
        let (user, host) = match authority.split_once('@') {
            Some((user, host)) if !user.is_empty() => (Some(user.to_string()), host),
            Some(_) => return None,
            None => (None, authority),
        };
        if !valid_host(host) || path.starts_with('/') {
            return None;
        }
        let (owner, repo) = split_path(path)?;

        Some(Self {
            host: host.to_ascii_lowercase(),
            owner,
            repo,
            protocol: Protocol::Ssh,
            user,
            port: None,
            version: None,
            private: true,
            scp: true,
            local_path: None,
        })
    }

    fn parse_bare(reference: &str) -> Option<Self> {
        let (host, path) = reference.split_once('/')?;
        if !valid_host(host) || !(host.contains('.') || host == "localhost") {
            return None;
        }
        let (owner, repo) = split_path(path)?;

        Some(Self {
            host: host.to_ascii_lowercase(),
            owner,
            repo,
            protocol: Protocol::Https,
            user: None,
            port: None,
            version: None,
            private: false,
            scp: false,
            local_path: None,
        })
    }

    /// 写入安装元数据的规范化来源地址
    pub fn canonical_url(&self) -> String {
        match &self.local_path {
            Some(path) => format!("file://{}", path),
            None => format!("https://{}/{}/{}", self.host, self.owner, self.repo),
        }
    }

    /// 交给 `git clone` 的地址
    pub fn clone_url(&self) -> String {
        if let Some(path) = &self.local_path {
            return format!("file://{}", path);
        }

        let user = self
            .user
            .as_deref()
            .map(|u| format!("{}@", u))
            .unwrap_or_default();
        let port = self.port.map(|p| format!(":{}", p)).unwrap_or_default();

        if self.scp {
            return format!("{}{}:{}/{}", user, self.host, self.owner, self.repo);
        }
        format!(
            "{}://{}{}{}/{}/{}",
            self.protocol, user, self.host, port, self.owner, self.repo
        )
    }

    /// 克隆缓存目录名：主机、端口、owner 和仓库各不相同的引用互不共享
    pub fn cache_key(&self) -> String {
        let host = match self.port {
            Some(port) => format!("{}_{}", self.host, port),
            None => self.host.clone(),
        };
        format!("{}__{}__{}", host, self.owner.replace('/', "_"), self.repo)
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// 引用是否指向远程仓库
    pub fn is_remote(&self) -> bool {
        self.protocol != Protocol::File
    }
}
