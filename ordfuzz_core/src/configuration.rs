use crate::level::Level;
use crate::option::SpaceError;
use crate::tool::Tool;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Level value assumed for a flag that is not followed by a value.
pub const FLAG_VALUE: &str = "TRUE";

/// Errors in a fuzzed configuration string. Recoverable: the caller discards
/// the string and asks for a new one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeedParseError {
    #[error("Unknown option '{0}' in configuration string")]
    UnknownOption(String),
    #[error("Invalid value '{value}' for option '{option}': {reason}")]
    InvalidValue {
        option: String,
        value: String,
        reason: String,
    },
    #[error("Expected an option name but found '{0}'")]
    UnexpectedToken(String),
    #[error(transparent)]
    Space(#[from] SpaceError),
}

/// A total assignment of levels to every option of a tool.
///
/// `option_under_investigation` names the single option whose level was
/// mutated away from a seed; `None` marks the seed itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Configuration {
    assignment: BTreeMap<String, Level>,
    pub option_under_investigation: Option<String>,
}

impl Configuration {
    /// The baseline configuration: every option at its default.
    pub fn default_for(tool: &Tool) -> Result<Self, SpaceError> {
        Self::complete(tool, BTreeMap::new())
    }

    /// Fills every option missing from `partial` with its declared default.
    pub fn complete(tool: &Tool, mut partial: BTreeMap<String, Level>) -> Result<Self, SpaceError> {
        for option in tool.options() {
            if !partial.contains_key(&option.name) {
                partial.insert(option.name.clone(), option.default_level()?.clone());
            }
        }
        Ok(Self {
            assignment: partial,
            option_under_investigation: None,
        })
    }

    /// Parses a `--option value --flag ...` string into a complete configuration.
    ///
    /// A flag directly followed by another flag, or by the end of the string,
    /// is read as [`FLAG_VALUE`].
    pub fn parse(tool: &Tool, input: &str) -> Result<Self, SeedParseError> {
        let mut partial = BTreeMap::new();
        let mut tokens = input.split_whitespace().peekable();
        while let Some(token) = tokens.next() {
            let Some(name) = token.strip_prefix("--") else {
                return Err(SeedParseError::UnexpectedToken(token.to_string()));
            };
            let option = tool
                .get_option(name)
                .map_err(|_| SeedParseError::UnknownOption(name.to_string()))?;
            let value = match tokens.peek() {
                Some(next) if !next.starts_with("--") => tokens.next().unwrap_or(FLAG_VALUE),
                _ => FLAG_VALUE,
            };
            let level = option
                .get_level(value)
                .map_err(|e| SeedParseError::InvalidValue {
                    option: name.to_string(),
                    value: value.to_string(),
                    reason: e.to_string(),
                })?;
            if option.is_integer() && level.is_sentinel() {
                return Err(SeedParseError::InvalidValue {
                    option: name.to_string(),
                    value: value.to_string(),
                    reason: "placeholder levels only appear in partial orders".to_string(),
                });
            }
            partial.insert(option.name.clone(), level);
        }
        Ok(Self::complete(tool, partial)?)
    }

    pub fn get(&self, option_name: &str) -> Option<&Level> {
        self.assignment.get(option_name)
    }

    pub fn levels(&self) -> impl Iterator<Item = &Level> {
        self.assignment.values()
    }

    /// A copy of this configuration with `level` substituted, marked as
    /// investigating `level`'s option.
    pub fn mutated(&self, level: Level) -> Self {
        let mut assignment = self.assignment.clone();
        let option_name = level.option_name.clone();
        assignment.insert(option_name.clone(), level);
        Self {
            assignment,
            option_under_investigation: Some(option_name),
        }
    }

    /// Names of the options whose levels differ between the two configurations.
    pub fn differing_options<'a>(&'a self, other: &'a Configuration) -> Vec<&'a str> {
        self.assignment
            .iter()
            .filter(|(name, level)| other.assignment.get(*name) != Some(*level))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Renders the non-default levels as command-line arguments.
    pub fn to_args(&self, tool: &Tool) -> Vec<String> {
        let mut args = Vec::new();
        for level in self.assignment.values() {
            let is_default = tool
                .get_option(&level.option_name)
                .and_then(|o| o.default_level())
                .is_ok_and(|d| d == level);
            if is_default {
                continue;
            }
            args.push(format!("--{}", level.option_name));
            if level.level_name != FLAG_VALUE {
                args.push(level.level_name.clone());
            }
        }
        args
    }

    /// Stable MD5 hex digest of the full assignment. Two configurations that
    /// hand the tool the same levels share a fingerprint.
    pub fn fingerprint(&self) -> String {
        format!("{:x}", md5::compute(self.to_string().as_bytes()))
    }

    pub fn to_string_map(&self) -> BTreeMap<String, String> {
        self.assignment
            .iter()
            .map(|(name, level)| (name.clone(), level.level_name.clone()))
            .collect()
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, level) in &self.assignment {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            write!(f, "--{} {}", name, level.level_name)?;
        }
        Ok(())
    }
}
