//! Dependency reference resolution
//!
//! Turns the raw strings found in a definition's dependency list into the
//! absolute module ids the bundler walks: loader-plugin prefixes are split
//! off, relative references are resolved against the referencing module, and
//! the `map` rename tables are applied.

use indexmap::IndexMap;
use log::trace;
use regex::Regex;

/// Key that matches every id when wildcards are enabled for a table
const WILDCARD_KEY: &str = "*";

/// The plugin part of a `plugin!resource` reference, or the reference itself
///
/// The bundler depends on the plugin module; the resource is loaded by the
/// plugin at runtime.
pub fn strip_plugin(reference: &str) -> &str {
    reference
        .split_once('!')
        .map_or(reference, |(plugin, _)| plugin)
}

/// Resolve `reference` against the id of the module that declares it
///
/// Only references starting with `.` are relative; they resolve against the
/// directory of `base_id`. Everything else is already absolute.
pub fn resolve_module_id(reference: &str, base_id: &str) -> String {
    if !reference.starts_with('.') {
        return reference.to_owned();
    }

    let mut base: Vec<&str> = base_id.split('/').collect();
    // Drop the module's own name to get its directory
    base.pop();
    normalize_segments(base.into_iter().chain(reference.split('/')))
}

/// Join segments with `/`, dropping empty and `.` segments and applying `..`
///
/// A `..` with nothing left to pop is kept so the result stays meaningful.
pub fn normalize_segments<'a>(segments: impl IntoIterator<Item = &'a str>) -> String {
    let mut normalized: Vec<&str> = Vec::new();
    for segment in segments {
        match segment {
            "" | "." => {}
            ".." => match normalized.last() {
                Some(&last) if last != ".." => {
                    normalized.pop();
                }
                _ => normalized.push(segment),
            },
            _ => normalized.push(segment),
        }
    }
    normalized.join("/")
}

/// One entry of a prefix table
#[derive(Debug, Clone)]
pub struct PrefixEntry<V> {
    pub key: String,
    pub value: V,
    pattern: Regex,
}

impl<V> PrefixEntry<V> {
    pub fn matches(&self, id: &str) -> bool {
        self.pattern.is_match(id)
    }
}

/// Id-prefix keyed table, searched longest key first
///
/// The `*` key is always searched last. It matches every id when the table
/// is built with wildcards enabled and is an ordinary literal key otherwise.
#[derive(Debug, Clone)]
pub struct PrefixIndex<V> {
    entries: Vec<PrefixEntry<V>>,
}

impl<V> Default for PrefixIndex<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> PrefixIndex<V> {
    pub fn new(source: impl IntoIterator<Item = (String, V)>, allow_wildcard: bool) -> Self {
        let mut entries: Vec<PrefixEntry<V>> = source
            .into_iter()
            .map(|(key, value)| {
                let pattern = if allow_wildcard && key == WILDCARD_KEY {
                    prefix_regex(None)
                } else {
                    prefix_regex(Some(&key))
                };
                PrefixEntry {
                    key,
                    value,
                    pattern,
                }
            })
            .collect();

        // Stable, so equally long keys keep their configured order
        entries.sort_by(|a, b| {
            let a_wild = a.key == WILDCARD_KEY;
            let b_wild = b.key == WILDCARD_KEY;
            a_wild
                .cmp(&b_wild)
                .then_with(|| b.key.len().cmp(&a.key.len()))
        });

        Self { entries }
    }

    /// First entry whose key is a prefix of `id`
    pub fn find(&self, id: &str) -> Option<&PrefixEntry<V>> {
        self.entries.iter().find(|entry| entry.matches(id))
    }
}

/// `^prefix(/|$)`, or `^` for the wildcard
fn prefix_regex(prefix: Option<&str>) -> Regex {
    let source = prefix.map_or_else(
        || "^".to_owned(),
        |prefix| format!("^{}(/|$)", regex::escape(prefix)),
    );
    Regex::new(&source).expect("escaped prefix is a valid expression")
}

/// Applies the two-level `map` rename tables to dependency ids
#[derive(Debug, Clone, Default)]
pub struct DependencyMapper {
    referers: PrefixIndex<PrefixIndex<String>>,
}

impl DependencyMapper {
    pub fn new(map: &IndexMap<String, IndexMap<String, String>>) -> Self {
        let referers = map.iter().map(|(referer, renames)| {
            let inner = PrefixIndex::new(
                renames
                    .iter()
                    .map(|(prefix, replacement)| (prefix.clone(), replacement.clone())),
                false,
            );
            (referer.clone(), inner)
        });

        Self {
            referers: PrefixIndex::new(referers, true),
        }
    }

    /// Rename `dependency_id` as seen from `referer_id`
    ///
    /// The first referer entry matching `referer_id` selects the rename table;
    /// its first entry matching `dependency_id` replaces that prefix. No match
    /// at either level leaves the id untouched.
    pub fn map_dependency(&self, referer_id: &str, dependency_id: &str) -> String {
        let Some(referer) = self.referers.find(referer_id) else {
            return dependency_id.to_owned();
        };

        match referer.value.find(dependency_id) {
            Some(rename) => {
                let mapped = format!("{}{}", rename.value, &dependency_id[rename.key.len()..]);
                trace!(
                    "Mapped dependency {dependency_id} -> {mapped} for {referer_id} (rule {} => {})",
                    referer.key, rename.key
                );
                mapped
            }
            None => dependency_id.to_owned(),
        }
    }

    /// Turn a raw dependency reference into the absolute module id to bundle
    pub fn normalize(&self, reference: &str, referer_id: &str) -> String {
        let resolved = resolve_module_id(strip_plugin(reference), referer_id);
        self.map_dependency(referer_id, &resolved)
    }
}
