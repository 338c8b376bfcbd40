//! Layered INI-style configuration.
//!
//! Sources are read in order into one `EffectiveConfig`; a later definition of
//! a `(section, key)` replaces an earlier one, whether it comes from a later
//! file or later in the same file. Explicit `Override`s are applied last.
//! Comments and formatting are not carried through to the output.

use crate::error::{ProvisionError, Result};
use crate::io;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Override
// ---------------------------------------------------------------------------

/// A single `section.key=value` setting supplied outside the files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    pub section: String,
    pub key: String,
    pub value: String,
}

impl Override {
    pub fn new(
        section: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            section: section.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}

impl FromStr for Override {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ProvisionError::InvalidOverride(s.to_string());
        let (name, value) = s.split_once('=').ok_or_else(invalid)?;
        let mut parts = name.split('.');
        let (Some(section), Some(key), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid());
        };
        if section.is_empty() || key.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(section, key, value))
    }
}

// ---------------------------------------------------------------------------
// EffectiveConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub entries: Vec<(String, String)>,
}

impl Section {
    fn set(&mut self, key: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }
}

/// Merged configuration: sections and keys in first-definition order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectiveConfig {
    sections: Vec<Section>,
}

static SECTION_RE: OnceLock<Regex> = OnceLock::new();

fn section_re() -> &'static Regex {
    SECTION_RE.get_or_init(|| Regex::new(r"^\[(?P<name>[^\]]+)\]$").unwrap())
}

impl EffectiveConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read one source file on top of the current contents.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(ProvisionError::MissingFile(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        self.parse_str(&text, path)
    }

    /// Parse `text` on top of the current contents. `origin` is used in errors.
    pub fn parse_str(&mut self, text: &str, origin: &Path) -> Result<()> {
        let parse_err = |line: usize, message: &str| ProvisionError::ConfigParse {
            path: origin.to_path_buf(),
            line,
            message: message.to_string(),
        };

        let mut current: Option<String> = None;
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(caps) = section_re().captures(line) {
                let name = caps["name"].trim().to_string();
                self.section_mut(&name);
                current = Some(name);
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(parse_err(idx + 1, "expected key=value or [section]"));
            };
            let Some(section) = current.as_deref() else {
                return Err(parse_err(idx + 1, "key defined before any [section]"));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(parse_err(idx + 1, "empty key"));
            }
            self.set(section, key, value.trim());
        }
        Ok(())
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|s| s.name == section)?
            .entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Like `get`, but a missing value is an error naming the key.
    pub fn require(&self, section: &str, key: &str) -> Result<&str> {
        self.get(section, key)
            .ok_or_else(|| ProvisionError::MissingConfigKey {
                section: section.to_string(),
                key: key.to_string(),
            })
    }

    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        self.section_mut(section).set(key, value);
    }

    pub fn apply(&mut self, ov: &Override) {
        self.set(&ov.section, &ov.key, &ov.value);
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn section_mut(&mut self, name: &str) -> &mut Section {
        let idx = match self.sections.iter().position(|s| s.name == name) {
            Some(idx) => idx,
            None => {
                self.sections.push(Section {
                    name: name.to_string(),
                    entries: Vec::new(),
                });
                self.sections.len() - 1
            }
        };
        &mut self.sections[idx]
    }

    /// Serialize: `[section]`, one `key = value` per line, blank line after
    /// each section.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push_str(&format!("[{}]\n", section.name));
            for (k, v) in &section.entries {
                out.push_str(&format!("{k} = {v}\n"));
            }
            out.push('\n');
        }
        out
    }

    /// Atomically write the rendered config with owner-only permissions.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        io::write_private(path, self.render().as_bytes())
    }
}

// ---------------------------------------------------------------------------
// merge
// ---------------------------------------------------------------------------

/// Merge `sources` in order, then apply `overrides` in order.
///
/// Every source must exist; use `existing` to drop optional layers first.
pub fn merge(sources: &[PathBuf], overrides: &[Override]) -> Result<EffectiveConfig> {
    let mut config = EffectiveConfig::new();
    for source in sources {
        config.load(source)?;
    }
    for ov in overrides {
        config.apply(ov);
    }
    Ok(config)
}

/// Keep only the paths that exist as files, preserving order.
pub fn existing<I>(paths: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = PathBuf>,
{
    paths.into_iter().filter(|p| p.is_file()).collect()
}

/// Parse a list of `section.key=value` strings, failing on the first bad one.
pub fn parse_overrides<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Override>> {
    raw.iter().map(|s| s.as_ref().parse()).collect()
}
