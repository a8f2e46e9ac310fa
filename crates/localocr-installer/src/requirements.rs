use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// The environment-marker variables a requirement line can be gated on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerEnv {
    pub sys_platform: String,
    pub os_name: String,
    pub platform_system: String,
}

impl MarkerEnv {
    /// Marker values for the OS this binary was built for.
    pub fn host() -> Self {
        Self::for_os(std::env::consts::OS)
    }

    /// `os` takes the values of `std::env::consts::OS`.
    pub fn for_os(os: &str) -> Self {
        let (sys_platform, os_name, platform_system) = match os {
            "windows" => ("win32", "nt", "Windows"),
            "macos" => ("darwin", "posix", "Darwin"),
            _ => ("linux", "posix", "Linux"),
        };
        Self {
            sys_platform: sys_platform.to_string(),
            os_name: os_name.to_string(),
            platform_system: platform_system.to_string(),
        }
    }

    fn lookup(&self, variable: &str) -> Option<&str> {
        match variable {
            "sys_platform" => Some(self.sys_platform.as_str()),
            "os_name" => Some(self.os_name.as_str()),
            "platform_system" => Some(self.platform_system.as_str()),
            _ => None,
        }
    }
}

/// Lowercases and collapses runs of `-`, `_` and `.` into a single `-`.
pub fn normalize_distribution_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut pending_separator = false;
    for ch in name.trim().chars() {
        if matches!(ch, '-' | '_' | '.') {
            pending_separator = true;
            continue;
        }
        if pending_separator && !normalized.is_empty() {
            normalized.push('-');
        }
        pending_separator = false;
        normalized.push(ch.to_ascii_lowercase());
    }
    normalized
}

/// Distribution names declared by a requirements file, normalized, in file order.
/// Options, editable installs, bare URLs and comments are ignored. A line gated by
/// an environment marker is kept only when the marker holds for `env`; a marker
/// that cannot be decided here (say on `python_version`) drops the line, since pip
/// alone knows whether it applied.
pub fn parse_requirement_names(contents: &str, env: &MarkerEnv) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut names = Vec::new();
    for raw_line in contents.lines() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() || line.starts_with('-') {
            continue;
        }
        let first_token = line.split_whitespace().next().unwrap_or(line);
        if first_token.contains("://") {
            continue;
        }

        let (requirement, marker) = match line.split_once(';') {
            Some((requirement, marker)) => (requirement, Some(marker.trim())),
            None => (line, None),
        };
        if let Some(marker) = marker {
            match evaluate_marker(marker, env) {
                Some(true) => {}
                Some(false) => {
                    debug!(requirement = requirement.trim(), marker, "marker excludes this platform");
                    continue;
                }
                None => {
                    debug!(requirement = requirement.trim(), marker, "marker not decidable; not verified");
                    continue;
                }
            }
        }

        let name: String = requirement
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
            .collect();
        if name.is_empty() {
            continue;
        }

        let normalized = normalize_distribution_name(&name);
        if seen.insert(normalized.clone()) {
            names.push(normalized);
        }
    }
    names
}

/// Normalized names of every distribution with metadata in `site_packages`.
pub fn installed_distributions(site_packages: &Path) -> Result<BTreeSet<String>> {
    let entries = match fs::read_dir(site_packages) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read {}", site_packages.display()));
        }
    };

    let mut installed = BTreeSet::new();
    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read {}", site_packages.display()))?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(stem) = file_name
            .strip_suffix(".dist-info")
            .or_else(|| file_name.strip_suffix(".egg-info"))
        else {
            continue;
        };
        // `{name}-{version}`; the name part never contains `-` in wheel metadata.
        let name = stem.split_once('-').map_or(stem, |(name, _)| name);
        installed.insert(normalize_distribution_name(name));
    }
    Ok(installed)
}

/// Requirements from `requirements_path` that apply under `env` and have no
/// metadata under `site_packages`.
pub fn missing_requirements(
    requirements_path: &Path,
    site_packages: &Path,
    env: &MarkerEnv,
) -> Result<Vec<String>> {
    let contents = fs::read_to_string(requirements_path).with_context(|| {
        format!(
            "failed to read requirements manifest: {}",
            requirements_path.display()
        )
    })?;
    let installed = installed_distributions(site_packages)?;
    Ok(parse_requirement_names(&contents, env)
        .into_iter()
        .filter(|name| !installed.contains(name))
        .collect())
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(index) => &line[..index],
        None => line,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MarkerToken {
    Word(String),
    Literal(String),
    Operator(String),
    Open,
    Close,
}

/// `None` when the marker is malformed or depends on a variable or operator that
/// is not modelled here. `and`/`or` use three-valued logic, so a known `false`
/// still settles `false and <unknown>`.
fn evaluate_marker(marker: &str, env: &MarkerEnv) -> Option<bool> {
    let tokens = tokenize_marker(marker)?;
    let mut parser = MarkerParser {
        tokens: &tokens,
        position: 0,
        env,
    };
    let value = parser.parse_or()?;
    if parser.position != tokens.len() {
        return None;
    }
    value
}

fn tokenize_marker(marker: &str) -> Option<Vec<MarkerToken>> {
    let mut tokens = Vec::new();
    let mut chars = marker.chars().peekable();
    while let Some(&ch) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
        } else if ch == '(' {
            chars.next();
            tokens.push(MarkerToken::Open);
        } else if ch == ')' {
            chars.next();
            tokens.push(MarkerToken::Close);
        } else if ch == '\'' || ch == '"' {
            chars.next();
            let mut literal = String::new();
            loop {
                match chars.next()? {
                    quote if quote == ch => break,
                    other => literal.push(other),
                }
            }
            tokens.push(MarkerToken::Literal(literal));
        } else if matches!(ch, '=' | '!' | '<' | '>' | '~') {
            let mut operator = String::new();
            while let Some(&next) = chars.peek() {
                if !matches!(next, '=' | '!' | '<' | '>' | '~') {
                    break;
                }
                operator.push(next);
                chars.next();
            }
            tokens.push(MarkerToken::Operator(operator));
        } else if ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' {
            let mut word = String::new();
            while let Some(&next) = chars.peek() {
                if !(next.is_ascii_alphanumeric() || next == '_' || next == '.') {
                    break;
                }
                word.push(next);
                chars.next();
            }
            tokens.push(MarkerToken::Word(word));
        } else {
            return None;
        }
    }
    Some(tokens)
}

/// Outer `None` is a syntax error; inner `None` is an undecidable clause.
struct MarkerParser<'a> {
    tokens: &'a [MarkerToken],
    position: usize,
    env: &'a MarkerEnv,
}

impl MarkerParser<'_> {
    fn peek(&self) -> Option<&MarkerToken> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<MarkerToken> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn eat_word(&mut self, expected: &str) -> bool {
        if matches!(self.peek(), Some(MarkerToken::Word(word)) if word == expected) {
            self.position += 1;
            return true;
        }
        false
    }

    fn parse_or(&mut self) -> Option<Option<bool>> {
        let mut value = self.parse_and()?;
        while self.eat_word("or") {
            let rhs = self.parse_and()?;
            value = match (value, rhs) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            };
        }
        Some(value)
    }

    fn parse_and(&mut self) -> Option<Option<bool>> {
        let mut value = self.parse_clause()?;
        while self.eat_word("and") {
            let rhs = self.parse_clause()?;
            value = match (value, rhs) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            };
        }
        Some(value)
    }

    fn parse_clause(&mut self) -> Option<Option<bool>> {
        if self.peek() == Some(&MarkerToken::Open) {
            self.position += 1;
            let value = self.parse_or()?;
            return match self.advance()? {
                MarkerToken::Close => Some(value),
                _ => None,
            };
        }

        let lhs = self.parse_operand()?;
        let operator = match self.advance()? {
            MarkerToken::Operator(operator) => operator,
            MarkerToken::Word(word) if word == "in" => word,
            MarkerToken::Word(word) if word == "not" => {
                if !self.eat_word("in") {
                    return None;
                }
                "not in".to_string()
            }
            _ => return None,
        };
        let rhs = self.parse_operand()?;

        let (Some(lhs), Some(rhs)) = (lhs, rhs) else {
            return Some(None);
        };
        Some(match operator.as_str() {
            "==" => Some(lhs == rhs),
            "!=" => Some(lhs != rhs),
            "in" => Some(rhs.contains(lhs.as_str())),
            "not in" => Some(!rhs.contains(lhs.as_str())),
            _ => None,
        })
    }

    fn parse_operand(&mut self) -> Option<Option<String>> {
        match self.advance()? {
            MarkerToken::Literal(literal) => Some(Some(literal)),
            MarkerToken::Word(variable) if !matches!(variable.as_str(), "and" | "or" | "in" | "not") => {
                Some(self.env.lookup(&variable).map(str::to_string))
            }
            _ => None,
        }
    }
}
