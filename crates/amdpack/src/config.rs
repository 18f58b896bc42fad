//! Module configuration
//!
//! Mirrors the `module.conf` layout used by AMD loaders: a base url, path
//! aliases, packages, per-entry combine policies and the dependency rename
//! map. Both JSON and TOML files are accepted.

use std::path::Path;

use anyhow::{Context, Result};
use indexmap::{IndexMap, IndexSet};
use log::debug;
use serde::Deserialize;

use crate::resolver::normalize_segments;

/// Default main module of a package when `main` is not configured
const DEFAULT_PACKAGE_MAIN: &str = "main";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModuleConfig {
    /// Directory, relative to the config file, that module ids are rooted at
    pub base_url: Option<String>,
    /// Alias id prefix -> target id prefix
    pub paths: IndexMap<String, String>,
    pub packages: Vec<PackageConfig>,
    /// Entry module id -> combine policy
    pub combine: IndexMap<String, CombineSetting>,
    /// Referer id prefix -> (dependency id prefix -> replacement)
    pub map: IndexMap<String, IndexMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    pub name: String,
    /// Package directory, relative to the base url
    pub location: String,
    pub main: Option<String>,
}

/// A package as seen by the bundler: its bare name resolves to `main_module_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDescriptor {
    pub name: String,
    pub location: String,
    /// Main module path inside the package, without `.js`
    pub main: String,
    /// `<name>/<main>`
    pub main_module_id: String,
}

impl PackageDescriptor {
    pub fn from_config(package: &PackageConfig) -> Self {
        let main = package.main.as_deref().unwrap_or(DEFAULT_PACKAGE_MAIN);
        let main = main.strip_suffix(".js").unwrap_or(main).to_owned();
        Self {
            main_module_id: format!("{}/{}", package.name, main),
            name: package.name.clone(),
            location: package.location.clone(),
            main,
        }
    }

    /// Whether `module_id` names this package, either bare or as its main module
    pub fn is_entry(&self, module_id: &str) -> bool {
        module_id == self.name || module_id == self.main_module_id
    }
}

/// The combine policy configured for one entry module
///
/// `true` or a non-zero number enables inlining of everything reachable;
/// `false` or `0` disables combining; an object carries explicit patterns.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CombineSetting {
    Flag(bool),
    Number(f64),
    Patterns(CombinePatternSpec),
}

impl CombineSetting {
    pub fn is_enabled(&self) -> bool {
        match self {
            Self::Flag(enabled) => *enabled,
            Self::Number(value) => *value != 0.0,
            Self::Patterns(_) => true,
        }
    }

    /// Ordered pattern list; empty for the flag forms
    pub fn patterns(&self) -> Vec<String> {
        match self {
            Self::Patterns(spec) => spec.to_patterns(),
            Self::Flag(_) | Self::Number(_) => Vec::new(),
        }
    }
}

/// Either a flat `files` list or an `include`/`exclude` pair
///
/// `files` (legacy name `modules`) wins when both shapes are present.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CombinePatternSpec {
    #[serde(alias = "modules")]
    pub files: Option<Vec<PatternEntry>>,
    pub include: Vec<PatternEntry>,
    pub exclude: Vec<PatternEntry>,
}

impl CombinePatternSpec {
    pub fn to_patterns(&self) -> Vec<String> {
        if let Some(files) = &self.files {
            return flatten(files);
        }

        let mut patterns = flatten(&self.include);
        patterns.extend(
            flatten(&self.exclude)
                .into_iter()
                .map(|pattern| format!("!{pattern}")),
        );
        patterns
    }
}

/// A pattern or an arbitrarily nested list of patterns
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PatternEntry {
    Pattern(String),
    Nested(Vec<PatternEntry>),
}

fn flatten(entries: &[PatternEntry]) -> Vec<String> {
    let mut patterns = Vec::new();
    let mut stack: Vec<&PatternEntry> = entries.iter().rev().collect();
    while let Some(entry) = stack.pop() {
        match entry {
            PatternEntry::Pattern(pattern) => patterns.push(pattern.clone()),
            PatternEntry::Nested(nested) => stack.extend(nested.iter().rev()),
        }
    }
    patterns
}

impl ModuleConfig {
    /// Load a config file; `.toml` files are read as TOML, everything else as JSON
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read module config {}", path.display()))?;

        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let config = if is_toml {
            Self::from_toml_str(&content)
        } else {
            Self::from_json_str(&content)
        };
        config.with_context(|| format!("Invalid module config {}", path.display()))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse module config as JSON")
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse module config as TOML")
    }

    /// Package descriptors in configuration order
    pub fn package_descriptors(&self) -> Vec<PackageDescriptor> {
        self.packages
            .iter()
            .map(PackageDescriptor::from_config)
            .collect()
    }

    /// The combine policy for `module_id`, if one is configured and enabled
    pub fn combine_setting(&self, module_id: &str) -> Option<&CombineSetting> {
        self.combine
            .get(module_id)
            .filter(|setting| setting.is_enabled())
    }

    /// Every module id a source file is reachable under
    ///
    /// `file` is relative to the directory the config lives in. The result
    /// lists path aliases first, then package ids, then the base-url id, so
    /// the alias wins as the canonical id of the group.
    pub fn module_ids_for_file(&self, file: &Path) -> Vec<String> {
        let file = file.to_string_lossy().replace('\\', "/");
        let Some(file) = file.strip_suffix(".js") else {
            return Vec::new();
        };
        let file = normalize_segments(file.split('/'));
        let base_url = normalize_segments(self.base_url.as_deref().unwrap_or("").split('/'));

        let base_id = relative_to(&file, &base_url);

        let mut package_ids = Vec::new();
        for package in self.package_descriptors() {
            let location = if base_url.is_empty() {
                package.location.clone()
            } else {
                format!("{base_url}/{}", package.location)
            };
            let location = normalize_segments(location.split('/'));
            let Some(inner) = relative_to(&file, &location) else {
                continue;
            };
            if inner == package.main {
                package_ids.push(package.name.clone());
                package_ids.push(package.main_module_id.clone());
            } else {
                package_ids.push(format!("{}/{}", package.name, inner));
            }
        }

        let derived: Vec<&str> = package_ids
            .iter()
            .map(String::as_str)
            .chain(base_id.as_deref())
            .collect();

        let mut ids = IndexSet::new();
        for (alias, target) in &self.paths {
            for id in &derived {
                if let Some(rest) = strip_id_prefix(id, target) {
                    ids.insert(format!("{alias}{rest}"));
                }
            }
        }
        ids.extend(package_ids);
        ids.extend(base_id);

        debug!("Module ids for {file}.js: {ids:?}");
        ids.into_iter().collect()
    }
}

/// `path` relative to `dir`, or `None` when it lies outside
fn relative_to(path: &str, dir: &str) -> Option<String> {
    if dir.is_empty() {
        return Some(path.to_owned());
    }
    path.strip_prefix(dir)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|rest| !rest.is_empty())
        .map(str::to_owned)
}

/// Remainder of `id` after the id prefix `prefix`, keeping the leading `/`
fn strip_id_prefix<'a>(id: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = id.strip_prefix(prefix)?;
    (rest.is_empty() || rest.starts_with('/')).then_some(rest)
}
