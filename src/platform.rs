use std::{borrow::Cow, fmt::Display, str::FromStr};

use crate::{git::GitOptions, model::ParseError};

/// Characters `cmd.exe` interprets unless escaped with `^`.
const CMD_METACHARACTERS: &str = "()[]%!^\"`<>&|;, *?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Windows,
    Posix,
}

/// Platform the git invocations of `options` should be prepared for.
///
/// An explicit `fake_platform` always wins over the host the process runs on.
pub fn platform_of(options: &GitOptions) -> Platform {
    options.fake_platform.unwrap_or_else(Platform::host)
}

/// A fully prepared process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Arguments are already quoted and must reach process creation untouched.
    pub verbatim: bool,
}

impl Platform {
    pub fn host() -> Platform {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Posix
        }
    }

    /// Conventional name of the git executable. `.exe` resolution is left to
    /// process creation.
    pub fn git_executable(self) -> &'static str {
        "git"
    }

    /// Windows goes through `cmd.exe` so that `git.cmd` shims resolve.
    pub fn uses_shell(self) -> bool {
        self == Platform::Windows
    }

    pub fn quote_arg(self, arg: &str) -> Cow<'_, str> {
        match self {
            Platform::Posix => Cow::Borrowed(arg),
            Platform::Windows => quote_windows_arg(arg),
        }
    }

    pub fn invocation(self, program: &str, args: &[String]) -> Invocation {
        if !self.uses_shell() {
            return Invocation {
                program: program.to_owned(),
                args: args.to_vec(),
                verbatim: false,
            };
        }
        let command_line = std::iter::once(program)
            .chain(args.iter().map(String::as_str))
            .map(|arg| self.quote_arg(arg))
            .collect::<Vec<_>>()
            .join(" ");
        Invocation {
            program: "cmd.exe".to_owned(),
            args: vec![
                "/d".to_owned(),
                "/s".to_owned(),
                "/c".to_owned(),
                format!("\"{command_line}\""),
            ],
            verbatim: true,
        }
    }
}

impl FromStr for Platform {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.to_ascii_lowercase();
        match value.as_str() {
            "win32" | "windows" => Ok(Platform::Windows),
            "posix" | "unix" | "linux" | "darwin" | "macos" | "freebsd" | "openbsd"
            | "netbsd" | "android" | "aix" | "sunos" => Ok(Platform::Posix),
            _ => Err(ParseError::InvalidPlatform(value)),
        }
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Platform::Windows => f.write_str("windows"),
            Platform::Posix => f.write_str("posix"),
        }
    }
}

fn quote_windows_arg(arg: &str) -> Cow<'_, str> {
    let needs_quoting = arg.is_empty()
        || arg
            .chars()
            .any(|c| c.is_whitespace() || CMD_METACHARACTERS.contains(c));
    if !needs_quoting {
        return Cow::Borrowed(arg);
    }

    // Command line rules of the C runtime: backslashes are literal unless they
    // precede a double quote.
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                quoted.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                quoted.extend(std::iter::repeat('\\').take(backslashes));
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    quoted.extend(std::iter::repeat('\\').take(backslashes * 2));
    quoted.push('"');

    let mut escaped = String::with_capacity(quoted.len() * 2);
    for c in quoted.chars() {
        if CMD_METACHARACTERS.contains(c) {
            escaped.push('^');
        }
        escaped.push(c);
    }
    Cow::Owned(escaped)
}
