//! Include/exclude classification of module ids for one combine policy
//!
//! A policy is an ordered list of glob patterns; a leading `!` negates a
//! pattern. Every id is classified by scanning the patterns left to right:
//! a matching pattern flips the status to its own polarity, a matching
//! pattern of the polarity already held changes nothing. So the last
//! matching pattern that disagrees with the running status decides.
//!
//! The classifier also owns the exclusion ledger of one bundle call. Once a
//! module's code has been emitted it is forced to `Exclude`, which is how the
//! bundler avoids emitting anything twice and how it breaks cycles.

use indexmap::{IndexMap, map::Entry};
use log::trace;
use rustc_hash::FxHasher;

use crate::{config::CombinePatternSpec, error::Result, matcher::IdPattern};

/// Type alias for FxHasher-based IndexMap
type FxIndexMap<K, V> = IndexMap<K, V, std::hash::BuildHasherDefault<FxHasher>>;

/// Loader-provided ids that are never bundled
pub const RESERVED_MODULE_IDS: [&str; 3] = ["require", "exports", "module"];

/// Classification of one module id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleStatus {
    /// No pattern matched
    Unknown,
    /// Pulled into the bundle even when nothing references it
    Include,
    /// Never inlined, or already emitted
    Exclude,
}

impl ModuleStatus {
    /// Status after `pattern` matched: a pattern only acts when its polarity
    /// differs from the current status
    fn on_match(self, negated: bool) -> Self {
        match (self, negated) {
            (Self::Exclude, true) | (Self::Include, false) => self,
            (_, true) => Self::Exclude,
            (_, false) => Self::Include,
        }
    }
}

#[derive(Debug, Clone)]
struct CombinePattern {
    negated: bool,
    pattern: IdPattern,
}

impl CombinePattern {
    fn parse(raw: &str) -> Result<Self> {
        let (negated, glob) = match raw.strip_prefix('!') {
            Some(glob) => (true, glob),
            None => (false, raw),
        };
        Ok(Self {
            negated,
            pattern: IdPattern::new(glob)?,
        })
    }
}

/// Classifier plus exclusion ledger for one top-level bundle call
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    patterns: Vec<CombinePattern>,
    /// Every id classified so far; `Include` entries form the include set,
    /// `Exclude` entries the exclusion ledger
    statuses: FxIndexMap<String, ModuleStatus>,
}

impl PatternClassifier {
    /// Build from an ordered pattern list and classify every id of `universe`
    pub fn new<P, U>(patterns: P, universe: U) -> Result<Self>
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
        U: IntoIterator,
        U::Item: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| CombinePattern::parse(pattern.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let mut statuses = FxIndexMap::default();
        for reserved in RESERVED_MODULE_IDS {
            statuses.insert(reserved.to_owned(), ModuleStatus::Exclude);
        }

        let mut classifier = Self { patterns, statuses };
        for id in universe {
            classifier.status(id.as_ref());
        }
        Ok(classifier)
    }

    /// Build from a `files` or `include`/`exclude` pattern spec
    pub fn from_spec<U>(spec: &CombinePatternSpec, universe: U) -> Result<Self>
    where
        U: IntoIterator,
        U::Item: AsRef<str>,
    {
        Self::new(spec.to_patterns(), universe)
    }

    /// The patterns in evaluation order, negated ones with their `!`
    pub fn patterns(&self) -> Vec<String> {
        self.patterns
            .iter()
            .map(|pattern| {
                if pattern.negated {
                    format!("!{}", pattern.pattern.as_str())
                } else {
                    pattern.pattern.as_str().to_owned()
                }
            })
            .collect()
    }

    /// Evaluate the patterns against `id` without recording anything
    pub fn classify(&self, id: &str) -> ModuleStatus {
        let mut status = ModuleStatus::Unknown;
        for pattern in &self.patterns {
            let target = status.on_match(pattern.negated);
            // Same polarity as the running status: no need to even match
            if target == status {
                continue;
            }
            if pattern.pattern.matches(id) {
                trace!(
                    "{id}: {status:?} -> {target:?} by pattern {}{}",
                    if pattern.negated { "!" } else { "" },
                    pattern.pattern.as_str()
                );
                status = target;
            }
        }
        status
    }

    /// Recorded status of `id`, classifying and recording it on first sight
    pub fn status(&mut self, id: &str) -> ModuleStatus {
        if let Some(status) = self.statuses.get(id) {
            return *status;
        }
        let status = self.classify(id);
        self.statuses.insert(id.to_owned(), status);
        status
    }

    pub fn is_included(&mut self, id: &str) -> bool {
        self.status(id) == ModuleStatus::Include
    }

    pub fn is_excluded(&mut self, id: &str) -> bool {
        self.status(id) == ModuleStatus::Exclude
    }

    /// Force `id` to `Exclude` regardless of the patterns
    ///
    /// Returns `false` when it was already excluded.
    pub fn add_exclude(&mut self, id: &str) -> bool {
        match self.statuses.entry(id.to_owned()) {
            Entry::Occupied(mut entry) => {
                let was_excluded = *entry.get() == ModuleStatus::Exclude;
                entry.insert(ModuleStatus::Exclude);
                !was_excluded
            }
            Entry::Vacant(entry) => {
                entry.insert(ModuleStatus::Exclude);
                true
            }
        }
    }

    /// Ids currently in the include set, in the order they were first classified
    pub fn includes(&self) -> Vec<String> {
        self.ids_with(ModuleStatus::Include)
    }

    /// The exclusion ledger, in the order ids were first recorded
    pub fn excludes(&self) -> Vec<String> {
        self.ids_with(ModuleStatus::Exclude)
    }

    fn ids_with(&self, wanted: ModuleStatus) -> Vec<String> {
        self.statuses
            .iter()
            .filter(|(_, status)| **status == wanted)
            .map(|(id, _)| id.clone())
            .collect()
    }
}
