//! YAML-backed configuration tree.
//!
//! A [`ConfigTree`] is a set of named sections, each persisted as its own
//! `<name>.yml` file in the configuration directory. Sections are linked
//! lazily: a missing file is created empty on first load, so a fresh
//! deployment starts with a valid (if blank) tree.
//!
//! Plugins get their own silently-linked section named `@plugin.<name>` via
//! [`ConfigTree::scoped`]; the section file is created the same way but the
//! section is not listed in the tree's public name set.

use parking_lot::RwLock;
use serde_yaml::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Configuration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("no configuration path specified")]
    NoPath,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unknown configuration section: {0}")]
    UnknownSection(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Sanitize a section name into its on-disk file stem: lowercase, restricted
/// to `[a-z0-9_\-.@]`.
fn sanitize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.' | '@'))
        .collect()
}

/// Split a dotted path like `server.port` into segments.
fn split_path(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

fn lookup<'a>(value: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for seg in segments {
        current = current.get(*seg)?;
    }
    Some(current)
}

fn set_path(value: &mut Value, segments: &[&str], new: Value) {
    if segments.is_empty() {
        *value = new;
        return;
    }
    if !value.is_mapping() {
        *value = Value::Mapping(Default::default());
    }
    let map = value.as_mapping_mut().expect("just coerced to mapping");
    let key = Value::String(segments[0].to_string());
    let entry = map.entry(key).or_insert(Value::Null);
    set_path(entry, &segments[1..], new);
}

// ─────────────────────────────────────────────────────────────────────────────
// ConfigSection
// ─────────────────────────────────────────────────────────────────────────────

/// One named section of the tree, backed by a single YAML file.
///
/// Cloning is cheap; clones share the same in-memory document.
#[derive(Clone)]
pub struct ConfigSection {
    name: String,
    path: PathBuf,
    doc: Arc<RwLock<Value>>,
}

impl ConfigSection {
    /// Link a section to its YAML file, creating the file if missing.
    fn link(name: &str, dir: &Path) -> ConfigResult<Self> {
        let stem = sanitize_name(name);
        let path = dir.join(format!("{stem}.yml"));
        let doc = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                Value::Mapping(Default::default())
            } else {
                serde_yaml::from_str(&raw)?
            }
        } else {
            fs::write(&path, "")?;
            Value::Mapping(Default::default())
        };
        Ok(Self {
            name: name.to_string(),
            path,
            doc: Arc::new(RwLock::new(doc)),
        })
    }

    /// Section name as registered (not the sanitized file stem).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read a value at a dotted path, falling back to `default` when absent.
    pub fn get(&self, path: &str, default: Value) -> Value {
        let doc = self.doc.read();
        lookup(&doc, &split_path(path)).cloned().unwrap_or(default)
    }

    /// Read a value and deserialize it, falling back to `default` on absence
    /// or type mismatch.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, path: &str, default: T) -> T {
        let doc = self.doc.read();
        lookup(&doc, &split_path(path))
            .and_then(|v| serde_yaml::from_value(v.clone()).ok())
            .unwrap_or(default)
    }

    /// Write a value at a dotted path and persist the section file.
    pub fn set(&self, path: &str, value: Value) -> ConfigResult<()> {
        let mut doc = self.doc.write();
        set_path(&mut doc, &split_path(path), value);
        let raw = serde_yaml::to_string(&*doc)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }

    /// A read-only nested view: the subtree at `path`, cloned.
    pub fn section(&self, path: &str) -> Value {
        self.get(path, Value::Null)
    }

    /// The whole document, cloned. Used to hand endpoint modules a read-only
    /// config copy.
    pub fn snapshot(&self) -> Value {
        self.doc.read().clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ConfigTree
// ─────────────────────────────────────────────────────────────────────────────

/// The full configuration tree: named sections plus the directory scoped
/// sections are created in.
#[derive(Clone)]
pub struct ConfigTree {
    dir: PathBuf,
    sections: Arc<RwLock<HashMap<String, ConfigSection>>>,
}

impl ConfigTree {
    /// Build the tree from a list of section names, linking (and creating)
    /// one `<name>.yml` file per section.
    pub fn build(names: &[&str], dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let dir = dir.into();
        if dir.as_os_str().is_empty() {
            return Err(ConfigError::NoPath);
        }
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }

        let mut sections = HashMap::new();
        for name in names {
            let section = ConfigSection::link(name, &dir)?;
            info!(section = %name, file = %section.path.display(), "linked configuration section");
            sections.insert(name.to_lowercase(), section);
        }
        debug!(count = sections.len(), "built configuration tree");

        Ok(Self {
            dir,
            sections: Arc::new(RwLock::new(sections)),
        })
    }

    /// Look up a section by name (case-insensitive).
    pub fn section(&self, name: &str) -> Option<ConfigSection> {
        self.sections.read().get(&name.to_lowercase()).cloned()
    }

    /// Read `section.rest.of.path` with a default. The first segment selects
    /// the section; the remainder walks into its document.
    pub fn get(&self, path: &str, default: Value) -> Value {
        let segments = split_path(path);
        let Some((section_name, rest)) = segments.split_first() else {
            return default;
        };
        match self.section(section_name) {
            Some(section) => {
                if rest.is_empty() {
                    section.snapshot()
                } else {
                    section.get(&rest.join("."), default)
                }
            }
            None => default,
        }
    }

    /// Write `section.rest.of.path`; fails on an unknown section.
    pub fn set(&self, path: &str, value: Value) -> ConfigResult<()> {
        let segments = split_path(path);
        let Some((section_name, rest)) = segments.split_first() else {
            return Err(ConfigError::UnknownSection(path.to_string()));
        };
        let section = self
            .section(section_name)
            .ok_or_else(|| ConfigError::UnknownSection(section_name.to_string()))?;
        section.set(&rest.join("."), value)
    }

    /// Silently link a scoped section (used for `@plugin.<name>` sections).
    /// The section is created on disk but not added to the tree's name set,
    /// so only the holder of the returned handle can reach it.
    pub fn scoped(&self, name: &str) -> ConfigResult<ConfigSection> {
        debug!(section = %name, "silently linking scoped configuration section");
        ConfigSection::link(name, &self.dir)
    }
}
