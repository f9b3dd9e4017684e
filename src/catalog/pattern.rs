//! Tool permission patterns.
//!
//! A pattern is one of three shapes:
//! - `Exact("Read")` matches the tool by name, including parameterized calls
//!   such as `Read(/etc/hosts)`.
//! - `Wildcard("mcp__*")` matches the tool name against an anchored glob where
//!   `*` stands for any run of characters.
//! - `Parameterized { tool: "Shell", argument: "git *" }` (written
//!   `Shell(git *)`) matches calls of `Shell` whose command argument matches
//!   the argument glob.

use std::fmt;

/// Errors produced while parsing a tool pattern.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    /// The pattern text was empty.
    #[error("tool pattern is empty")]
    Empty,

    /// Parentheses did not form `Tool(argument)`.
    #[error("malformed parameterized pattern: {0}")]
    Malformed(String),
}

/// Parse every pattern in `texts`, failing on the first malformed entry.
///
/// # Errors
///
/// Returns the [`PatternError`] of the first pattern that fails to parse.
pub fn parse_patterns(texts: &[String]) -> Result<Vec<ToolPattern>, PatternError> {
    texts.iter().map(|t| ToolPattern::parse(t)).collect()
}

/// A parsed allow/deny pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ToolPattern {
    /// Literal tool name.
    Exact(String),
    /// Anchored glob over the tool name.
    Wildcard(String),
    /// Tool name glob restricted to commands matching an argument glob.
    Parameterized {
        /// Glob over the base tool name.
        tool: String,
        /// Glob over the call's command argument.
        argument: String,
    },
}

impl ToolPattern {
    /// Parse a pattern from descriptor text.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] for empty text or unbalanced parentheses.
    pub fn parse(text: &str) -> Result<Self, PatternError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PatternError::Empty);
        }

        match text.split_once('(') {
            Some((tool, rest)) => {
                let Some(argument) = rest.strip_suffix(')') else {
                    return Err(PatternError::Malformed(text.to_owned()));
                };
                let tool = tool.trim();
                let argument = argument.trim();
                if tool.is_empty() || argument.contains('(') || argument.contains(')') {
                    return Err(PatternError::Malformed(text.to_owned()));
                }
                Ok(Self::Parameterized {
                    tool: tool.to_owned(),
                    argument: argument.to_owned(),
                })
            }
            None if text.contains(')') => Err(PatternError::Malformed(text.to_owned())),
            None if text.contains('*') => Ok(Self::Wildcard(text.to_owned())),
            None => Ok(Self::Exact(text.to_owned())),
        }
    }

    /// Whether this pattern covers a call of `tool` with an optional command.
    ///
    /// `tool` may itself be parameterized (`Shell(rm -rf /tmp)`), in which case
    /// the parenthesised text is used as the command.
    pub fn matches(&self, tool: &str, command: Option<&str>) -> bool {
        let call = ToolCall::split(tool, command);
        match self {
            Self::Exact(name) => name == tool || *name == call.name,
            Self::Wildcard(glob) => glob_match(glob, tool) || glob_match(glob, call.name),
            Self::Parameterized { tool, argument } => {
                if !glob_match(tool, call.name) {
                    return false;
                }
                match call.argument {
                    Some(arg) => glob_match(argument, arg),
                    None => argument == "*",
                }
            }
        }
    }
}

impl fmt::Display for ToolPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(name) | Self::Wildcard(name) => f.write_str(name),
            Self::Parameterized { tool, argument } => write!(f, "{tool}({argument})"),
        }
    }
}

/// A tool call split into its base name and argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolCall<'a> {
    /// Base tool name (`Shell` for `Shell(ls)`).
    pub name: &'a str,
    /// Parenthesised argument, or the supplied command.
    pub argument: Option<&'a str>,
}

impl<'a> ToolCall<'a> {
    /// Split `Name(argument)`; falls back to `command` when not parameterized.
    pub fn split(tool: &'a str, command: Option<&'a str>) -> Self {
        if let Some((name, rest)) = tool.split_once('(') {
            if let Some(argument) = rest.strip_suffix(')') {
                if !name.is_empty() {
                    return Self {
                        name,
                        argument: Some(argument),
                    };
                }
            }
        }
        Self {
            name: tool,
            argument: command,
        }
    }
}

/// Anchored glob match where `*` matches any (possibly empty) run of characters.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut resume = 0usize;

    while ti < t.len() {
        match p.get(pi) {
            Some('*') => {
                star = Some(pi);
                resume = ti;
                pi = pi.saturating_add(1);
            }
            Some(c) if t.get(ti) == Some(c) => {
                pi = pi.saturating_add(1);
                ti = ti.saturating_add(1);
            }
            _ => match star {
                Some(s) => {
                    pi = s.saturating_add(1);
                    resume = resume.saturating_add(1);
                    ti = resume;
                }
                None => return false,
            },
        }
    }

    p.get(pi..)
        .map_or(true, |rest| rest.iter().all(|c| *c == '*'))
}
