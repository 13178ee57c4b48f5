use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::{
    fmt::Display,
    str::FromStr,
    sync::OnceLock,
};

use crate::model::ParseError;

/// Revision used when a specifier does not name one.
pub const DEFAULT_COMMITTISH: &str = "HEAD";

#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Serialize, Deserialize, Ord, PartialOrd)]
pub enum Provider {
    #[serde(rename = "github")]
    GitHub,
    #[serde(rename = "gitlab")]
    GitLab,
    #[serde(rename = "bitbucket")]
    Bitbucket,
    #[serde(rename = "gist")]
    Gist,
    #[serde(rename = "generic")]
    Generic,
}

impl Provider {
    const HOSTED: [Provider; 4] = [
        Provider::GitHub,
        Provider::GitLab,
        Provider::Bitbucket,
        Provider::Gist,
    ];

    /// Domain of a hosted provider, `None` for [`Provider::Generic`].
    pub fn domain(self) -> Option<&'static str> {
        match self {
            Provider::GitHub => Some("github.com"),
            Provider::GitLab => Some("gitlab.com"),
            Provider::Bitbucket => Some("bitbucket.org"),
            Provider::Gist => Some("gist.github.com"),
            Provider::Generic => None,
        }
    }

    fn from_shortcut(shortcut: &str) -> Option<Provider> {
        Self::HOSTED
            .into_iter()
            .find(|provider| provider.to_string() == shortcut)
    }

    fn from_host(host: &str) -> Option<Provider> {
        let host = host.to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        Self::HOSTED
            .into_iter()
            .find(|provider| provider.domain() == Some(host))
    }
}

impl Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Provider::GitHub => f.write_str("github"),
            Provider::GitLab => f.write_str("gitlab"),
            Provider::Bitbucket => f.write_str("bitbucket"),
            Provider::Gist => f.write_str("gist"),
            Provider::Generic => f.write_str("generic"),
        }
    }
}

#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Default, Serialize, Deserialize, Ord, PartialOrd)]
pub enum Protocol {
    #[default]
    #[serde(rename = "https")]
    Https,
    #[serde(rename = "ssh")]
    Ssh,
}

impl FromStr for Protocol {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.to_ascii_lowercase();
        match value.as_str() {
            "https" => Ok(Protocol::Https),
            "ssh" => Ok(Protocol::Ssh),
            _ => Err(ParseError::InvalidProtocol(value)),
        }
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Protocol::Https => f.write_str("https"),
            Protocol::Ssh => f.write_str("ssh"),
        }
    }
}

/// A git dependency specifier normalized to the repository it points at.
///
/// Hosted providers are decomposed into `owner` and `name`. Anything else that
/// is still a git URL is kept as [`Provider::Generic`] with the URL retained
/// verbatim in `url`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct HostedGitDescriptor {
    pub provider: Provider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committish: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl HostedGitDescriptor {
    /// Parses a dependency specifier.
    ///
    /// Returns `None` when the input does not look like a git reference at all,
    /// so callers can fall back to other kinds of dependency.
    pub fn parse(specifier: &str) -> Option<HostedGitDescriptor> {
        let specifier = specifier.trim();
        if specifier.is_empty() {
            return None;
        }
        parse_shortcut(specifier)
            .or_else(|| parse_github_shorthand(specifier))
            .or_else(|| parse_url(specifier))
    }

    pub fn hosted(
        provider: Provider,
        owner: Option<&str>,
        name: &str,
        committish: Option<&str>,
    ) -> HostedGitDescriptor {
        HostedGitDescriptor {
            provider,
            owner: owner.map(str::to_owned),
            name: name.to_owned(),
            committish: committish.map(str::to_owned),
            protocol: None,
            url: None,
        }
    }

    pub fn is_hosted(&self) -> bool {
        self.provider != Provider::Generic
    }

    /// The committish to resolve, `HEAD` when the specifier did not name one.
    pub fn committish_or_head(&self) -> &str {
        self.committish.as_deref().unwrap_or(DEFAULT_COMMITTISH)
    }

    /// URL handed to git for ls-remote, fetch and clone.
    pub fn clone_url(&self, default_protocol: Protocol) -> String {
        match (self.provider.domain(), &self.url) {
            (Some(_), _) => match self.protocol.unwrap_or(default_protocol) {
                Protocol::Https => self.https_url().unwrap_or_default(),
                Protocol::Ssh => self.ssh_url().unwrap_or_default(),
            },
            (None, Some(url)) => url.strip_prefix("git+").unwrap_or(url).to_owned(),
            (None, None) => self.name.clone(),
        }
    }

    pub fn https_url(&self) -> Option<String> {
        let domain = self.provider.domain()?;
        Some(format!("https://{}/{}.git", domain, self.project_path()))
    }

    pub fn ssh_url(&self) -> Option<String> {
        let domain = self.provider.domain()?;
        Some(format!("ssh://git@{}/{}.git", domain, self.project_path()))
    }

    /// Documentation page of the repository.
    pub fn docs_url(&self) -> Option<String> {
        let path = self.project_path();
        match self.provider {
            Provider::GitHub => Some(format!("https://github.com/{path}#readme")),
            Provider::GitLab => Some(format!("https://gitlab.com/{path}#README")),
            Provider::Bitbucket => Some(format!("https://bitbucket.org/{path}#readme")),
            Provider::Gist => Some(format!("https://gist.github.com/{path}")),
            Provider::Generic => None,
        }
    }

    pub fn browse_url(&self) -> Option<String> {
        let domain = self.provider.domain()?;
        let base = format!("https://{}/{}", domain, self.project_path());
        let Some(committish) = &self.committish else {
            return Some(base);
        };
        match self.provider {
            Provider::Bitbucket => Some(format!("{base}/src/{committish}")),
            Provider::Gist => Some(format!("{base}/{committish}")),
            _ => Some(format!("{base}/tree/{committish}")),
        }
    }

    pub fn tarball_url(&self) -> Option<String> {
        let path = self.project_path();
        let committish = self.committish_or_head();
        match self.provider {
            Provider::GitHub => Some(format!(
                "https://codeload.github.com/{path}/tar.gz/{committish}"
            )),
            Provider::GitLab => Some(format!(
                "https://gitlab.com/{path}/repository/archive.tar.gz?ref={committish}"
            )),
            Provider::Bitbucket => Some(format!(
                "https://bitbucket.org/{path}/get/{committish}.tar.gz"
            )),
            Provider::Gist => Some(format!(
                "https://codeload.github.com/gist/{path}/tar.gz/{committish}"
            )),
            Provider::Generic => None,
        }
    }

    /// Canonical `provider:owner/name[#committish]` form.
    pub fn shortcut(&self) -> Option<String> {
        if !self.is_hosted() {
            return None;
        }
        let mut shortcut = format!("{}:{}", self.provider, self.project_path());
        if let Some(committish) = &self.committish {
            shortcut.push('#');
            shortcut.push_str(committish);
        }
        Some(shortcut)
    }

    fn project_path(&self) -> String {
        match (&self.owner, self.provider) {
            (_, Provider::Gist) | (None, _) => self.name.clone(),
            (Some(owner), _) => format!("{}/{}", owner, self.name),
        }
    }
}

impl Display for HostedGitDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match (self.shortcut(), &self.url) {
            (Some(shortcut), _) => f.write_str(&shortcut),
            (None, Some(url)) => f.write_str(url),
            (None, None) => f.write_str(&self.name),
        }
    }
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex is valid"))
}

fn shortcut_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r"^(?P<provider>github|gitlab|bitbucket|gist):(?P<path>[^#\s]+)(?:#(?P<committish>.*))?$",
    )
}

fn github_shorthand_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r"^(?P<owner>[^./@:#\s][^/@:#\s]*)/(?P<name>[^/@:#\s]+)(?:#(?P<committish>.*))?$",
    )
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r"^(?P<scheme>git\+ssh|git\+https|git\+http|ssh|https|http|git)://(?:(?P<auth>[^-@/#\s][^@/#\s]*)@)?(?P<host>[^-@/:#\s][^@/:#\s]*)(?::(?P<port>\d+))?(?P<path>[:/][^#\s]*)?(?:#(?P<committish>.*))?$",
    )
}

/// `user@host:path`. Neither part may start with `-` so the URL cannot be
/// taken for an option by git or ssh.
fn scp_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r"^(?P<auth>[^-@/:#\s][^@/:#\s]*)@(?P<host>[^-/:#\s][^/:#\s]*):(?P<path>[^#\s]+)(?:#(?P<committish>.*))?$",
    )
}

fn committish(captures: &Captures) -> Option<String> {
    captures
        .name("committish")
        .map(|m| m.as_str())
        .filter(|c| !c.is_empty())
        .map(str::to_owned)
}

fn strip_git_suffix(name: &str) -> Option<&str> {
    let name = name.strip_suffix(".git").unwrap_or(name);
    (!name.is_empty()).then_some(name)
}

/// `provider:owner/name[#committish]`
fn parse_shortcut(specifier: &str) -> Option<HostedGitDescriptor> {
    let captures = shortcut_regex().captures(specifier)?;
    let provider = Provider::from_shortcut(captures.name("provider")?.as_str())?;
    let path = captures.name("path")?.as_str().trim_matches('/');
    let (owner, name) = split_project_path(provider, path)?;
    Some(HostedGitDescriptor {
        provider,
        owner,
        name,
        committish: committish(&captures),
        protocol: None,
        url: None,
    })
}

/// `owner/name[#committish]`, which always means GitHub.
fn parse_github_shorthand(specifier: &str) -> Option<HostedGitDescriptor> {
    let captures = github_shorthand_regex().captures(specifier)?;
    let owner = captures.name("owner")?.as_str();
    let name = strip_git_suffix(captures.name("name")?.as_str())?;
    Some(HostedGitDescriptor {
        provider: Provider::GitHub,
        owner: Some(owner.to_owned()),
        name: name.to_owned(),
        committish: committish(&captures),
        protocol: None,
        url: None,
    })
}

fn parse_url(specifier: &str) -> Option<HostedGitDescriptor> {
    let (captures, protocol) = match url_regex().captures(specifier) {
        Some(captures) => {
            let protocol = match captures.name("scheme")?.as_str() {
                "git+ssh" | "ssh" => Some(Protocol::Ssh),
                "git+https" | "https" => Some(Protocol::Https),
                _ => None,
            };
            (captures, protocol)
        }
        None => (scp_regex().captures(specifier)?, Some(Protocol::Ssh)),
    };

    let host = captures.name("host")?.as_str();
    let path = captures
        .name("path")
        .map(|m| m.as_str().trim_matches(|c: char| c == '/' || c == ':'))
        .unwrap_or_default();
    let committish = committish(&captures);

    if let Some(provider) = Provider::from_host(host) {
        if let Some((owner, name, tree_committish)) = extract_hosted_path(provider, path) {
            return Some(HostedGitDescriptor {
                provider,
                owner,
                name,
                committish: committish.or(tree_committish),
                protocol,
                url: None,
            });
        }
    }

    let url = specifier
        .split_once('#')
        .map_or(specifier, |(url, _)| url)
        .to_owned();
    let name = path
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .and_then(strip_git_suffix)
        .unwrap_or(host);
    Some(HostedGitDescriptor {
        provider: Provider::Generic,
        owner: None,
        name: name.to_owned(),
        committish,
        protocol,
        url: Some(url),
    })
}

/// Splits a shortcut path into owner and repository name.
fn split_project_path(provider: Provider, path: &str) -> Option<(Option<String>, String)> {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return None;
    }
    let (name, owner) = segments.split_last()?;
    let name = strip_git_suffix(name)?.to_owned();
    match (provider, owner.len()) {
        (Provider::Gist, 0) => Some((None, name)),
        (Provider::GitLab, n) if n >= 1 => Some((Some(owner.join("/")), name)),
        (_, 1) => Some((Some(owner[0].to_owned()), name)),
        _ => None,
    }
}

/// Decomposes the path of a URL on a known provider's host.
///
/// Returns `None` when the path does not name a repository in the provider's
/// layout, in which case the URL is treated as a generic git URL.
fn extract_hosted_path(
    provider: Provider,
    path: &str,
) -> Option<(Option<String>, String, Option<String>)> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match provider {
        Provider::GitHub => match segments.as_slice() {
            [owner, name] => Some((Some(owner.to_string()), strip_git_suffix(name)?.to_owned(), None)),
            [owner, name, "tree", rest @ ..] if !rest.is_empty() => Some((
                Some(owner.to_string()),
                strip_git_suffix(name)?.to_owned(),
                Some(rest.join("/")),
            )),
            _ => None,
        },
        Provider::GitLab => {
            if segments.contains(&"-") || path.contains("archive.tar.gz") {
                return None;
            }
            let (name, owner) = segments.split_last()?;
            if owner.is_empty() {
                return None;
            }
            Some((Some(owner.join("/")), strip_git_suffix(name)?.to_owned(), None))
        }
        Provider::Bitbucket => match segments.as_slice() {
            [_, _, "get", ..] => None,
            [owner, name, ..] => Some((Some(owner.to_string()), strip_git_suffix(name)?.to_owned(), None)),
            _ => None,
        },
        Provider::Gist => match segments.as_slice() {
            [_, _, "raw", ..] => None,
            [name] => Some((None, strip_git_suffix(name)?.to_owned(), None)),
            [owner, name, ..] => Some((Some(owner.to_string()), strip_git_suffix(name)?.to_owned(), None)),
            _ => None,
        },
        Provider::Generic => None,
    }
}
