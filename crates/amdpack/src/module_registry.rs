//! Module registry for tracking module sources during bundling
//!
//! The ModuleRegistry is the single source of truth for module identity: it
//! binds module ids to their source, remembers which ids share one source
//! (alias groups), knows which ids are package entries, and parses every
//! module at most once.

use std::{cell::RefCell, rc::Rc, sync::Arc};

use indexmap::IndexMap;
use log::{debug, warn};
use rustc_hash::{FxHashMap, FxHasher};

use crate::{
    config::PackageDescriptor,
    error::{BundleError, Result},
    source::{AmdSourceService, ModuleDefinition, SourceModuleService},
};

/// Type alias for FxHasher-based IndexMap
type FxIndexMap<K, V> = IndexMap<K, V, std::hash::BuildHasherDefault<FxHasher>>;

/// A parsed module, as seen through one of its ids
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    /// The id the module was requested under
    pub id: String,
    /// Decoded source text
    pub source: Arc<str>,
    /// Definitions found in the source, with ids assigned
    pub definitions: Vec<ModuleDefinition>,
    /// Set when the module is the main module of a package
    pub package: Option<PackageDescriptor>,
}

impl ModuleRecord {
    /// Ids of the definitions in this module's source
    pub fn definition_ids(&self) -> impl Iterator<Item = &str> {
        self.definitions
            .iter()
            .filter_map(|definition| definition.id.as_deref())
    }
}

/// Central registry of module sources
#[derive(Debug)]
pub struct ModuleRegistry {
    /// Module id -> source bytes; ids of one alias group share the allocation
    sources: FxIndexMap<String, Arc<[u8]>>,
    /// Alias groups in registration order
    alias_groups: Vec<Vec<String>>,
    /// Module id -> index into `alias_groups`
    alias_index: FxHashMap<String, usize>,
    packages: Vec<PackageDescriptor>,
    service: Box<dyn SourceModuleService>,
    /// Parse results per requested module id
    records: RefCell<FxHashMap<String, Rc<ModuleRecord>>>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ModuleRegistry {
    /// Create an empty registry reading sources with [`AmdSourceService`]
    pub fn new(packages: Vec<PackageDescriptor>) -> Self {
        Self::with_service(packages, Box::new(AmdSourceService))
    }

    pub fn with_service(
        packages: Vec<PackageDescriptor>,
        service: Box<dyn SourceModuleService>,
    ) -> Self {
        Self {
            sources: FxIndexMap::default(),
            alias_groups: Vec::new(),
            alias_index: FxHashMap::default(),
            packages,
            service,
            records: RefCell::new(FxHashMap::default()),
        }
    }

    /// Bind every id in `ids` to one source
    ///
    /// Two or more ids form an alias group whose canonical id is the first
    /// one. Only the first group an id takes part in counts.
    pub fn register_module_ids<S: AsRef<str>>(&mut self, ids: &[S], contents: impl AsRef<[u8]>) {
        let contents: Arc<[u8]> = Arc::from(contents.as_ref());
        for id in ids {
            let id = id.as_ref();
            // A new source for a known id invalidates its parse result
            self.records.get_mut().remove(id);
            self.sources.insert(id.to_owned(), Arc::clone(&contents));
        }

        if ids.len() > 1 {
            self.add_alias_group(ids.iter().map(|id| id.as_ref().to_owned()).collect());
        }
    }

    fn add_alias_group(&mut self, ids: Vec<String>) {
        if let Some(known) = ids.iter().find(|id| self.alias_index.contains_key(*id)) {
            warn!("Ignoring alias group {ids:?}: {known} already belongs to an alias group");
            return;
        }

        let index = self.alias_groups.len();
        for id in &ids {
            self.alias_index.insert(id.clone(), index);
        }
        debug!("Registered alias group {ids:?}");
        self.alias_groups.push(ids);
    }

    /// Every id of the alias group `id` belongs to, in registration order
    pub fn alias_group(&self, id: &str) -> Option<&[String]> {
        self.alias_index
            .get(id)
            .map(|index| self.alias_groups[*index].as_slice())
    }

    /// The package `id` is the bare name or main module id of
    pub fn package_for(&self, id: &str) -> Option<&PackageDescriptor> {
        self.packages.iter().find(|package| package.is_entry(id))
    }

    /// Parsed module for `id`, parsing its source on first request
    pub fn definition(&self, id: &str) -> Result<Rc<ModuleRecord>> {
        if let Some(record) = self.records.borrow().get(id) {
            return Ok(Rc::clone(record));
        }

        let record = Rc::new(self.load(id)?);
        self.records
            .borrow_mut()
            .insert(id.to_owned(), Rc::clone(&record));
        Ok(record)
    }

    fn load(&self, id: &str) -> Result<ModuleRecord> {
        let contents = self
            .sources
            .get(id)
            .ok_or_else(|| BundleError::ModuleNotFound { id: id.to_owned() })?;

        let source: Arc<str> = std::str::from_utf8(contents)
            .map_err(|err| BundleError::Parse {
                id: id.to_owned(),
                reason: err.to_string(),
            })?
            .into();

        let mut definitions = self
            .service
            .parse(&source)
            .map_err(|err| BundleError::Parse {
                id: id.to_owned(),
                reason: err.to_string(),
            })?;

        let package = self.package_for(id);
        let anonymous: Vec<usize> = definitions
            .iter()
            .enumerate()
            .filter(|(_, definition)| definition.id.is_none())
            .map(|(index, _)| index)
            .collect();

        match anonymous.as_slice() {
            [] => {}
            [index] => {
                let assigned = package.map_or(id, |package| package.main_module_id.as_str());
                definitions[*index].id = Some(assigned.to_owned());
            }
            _ => {
                return Err(BundleError::AmbiguousDefinitions {
                    id: id.to_owned(),
                    count: anonymous.len(),
                });
            }
        }

        // Only a module that actually defines the main id acts as the package
        let package = package
            .filter(|package| {
                let main = Some(package.main_module_id.as_str());
                definitions
                    .iter()
                    .any(|definition| definition.id.as_deref() == main)
            })
            .cloned();

        debug!(
            "Parsed module {id}: {} definition(s){}",
            definitions.len(),
            package
                .as_ref()
                .map(|package| format!(", main module of package {}", package.name))
                .unwrap_or_default()
        );

        Ok(ModuleRecord {
            id: id.to_owned(),
            source,
            definitions,
            package,
        })
    }

    /// Source text of a parsed module with its definitions regenerated
    pub fn render(&self, record: &ModuleRecord) -> String {
        self.service
            .render(&record.definitions, Some(&record.source))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    /// All registered ids, in registration order
    pub fn all_ids(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModuleConfig, PackageConfig};

    fn er_package() -> Vec<PackageDescriptor> {
        vec![PackageDescriptor::from_config(&PackageConfig {
            name: "er".to_string(),
            location: "../dep/er/src".to_string(),
            main: None,
        })]
    }

    #[test]
    fn test_registry_basic_operations() {
        let mut registry = ModuleRegistry::default();
        assert!(registry.is_empty());

        registry.register_module_ids(&["app"], "define(function () { return 1; });");
        registry.register_module_ids(&["lib", "common/lib"], "define({});");

        assert_eq!(registry.len(), 3);
        assert!(registry.contains("common/lib"));
        assert!(!registry.contains("missing"));
        let ids: Vec<&str> = registry.all_ids().collect();
        assert_eq!(ids, vec!["app", "lib", "common/lib"]);

        assert_eq!(registry.alias_group("app"), None);
        assert_eq!(
            registry.alias_group("common/lib").unwrap(),
            &["lib".to_string(), "common/lib".to_string()]
        );
    }

    #[test]
    fn test_first_alias_group_wins() {
        let mut registry = ModuleRegistry::default();
        registry.register_module_ids(&["tpl", "common/tpl"], "define({});");
        registry.register_module_ids(&["common/tpl", "other/tpl"], "define({});");

        assert_eq!(registry.alias_group("common/tpl").unwrap()[0], "tpl");
        assert_eq!(registry.alias_group("other/tpl"), None);
        // The id itself is still rebound to the newer source
        assert!(registry.contains("other/tpl"));
    }

    #[test]
    fn test_anonymous_definition_takes_registered_id() {
        let mut registry = ModuleRegistry::default();
        registry.register_module_ids(&["app"], r#"define(["./lib"], function () {});"#);

        let record = registry.definition("app").unwrap();
        assert_eq!(record.definitions[0].id.as_deref(), Some("app"));
        assert_eq!(record.package, None);
        let ids: Vec<&str> = record.definition_ids().collect();
        assert_eq!(ids, vec!["app"]);
    }

    #[test]
    fn test_package_main_takes_main_id() {
        let mut registry = ModuleRegistry::new(er_package());
        registry.register_module_ids(&["er", "er/main"], "define(function () {});");
        registry.register_module_ids(&["er/View"], "define(function () {});");

        for id in ["er", "er/main"] {
            let record = registry.definition(id).unwrap();
            assert_eq!(record.definitions[0].id.as_deref(), Some("er/main"));
            assert_eq!(record.package.as_ref().unwrap().name, "er");
        }

        let view = registry.definition("er/View").unwrap();
        assert_eq!(view.definitions[0].id.as_deref(), Some("er/View"));
        assert_eq!(view.package, None);
    }

    #[test]
    fn test_named_definitions_left_as_authored() {
        let mut registry = ModuleRegistry::default();
        registry.register_module_ids(
            &["bundle"],
            "define('a', [], {}); define('b', ['a'], {});",
        );

        let record = registry.definition("bundle").unwrap();
        let ids: Vec<&str> = record.definition_ids().collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_single_anonymous_among_named() {
        let mut registry = ModuleRegistry::default();
        registry.register_module_ids(&["page"], "define('helper', [], {}); define(function () {});");

        let record = registry.definition("page").unwrap();
        let ids: Vec<&str> = record.definition_ids().collect();
        assert_eq!(ids, vec!["helper", "page"]);
    }

    #[test]
    fn test_multiple_anonymous_definitions_rejected() {
        let mut registry = ModuleRegistry::default();
        registry.register_module_ids(&["bad"], "define({}); define(function () {});");

        let err = registry.definition("bad").unwrap_err();
        assert!(matches!(
            err,
            BundleError::AmbiguousDefinitions { ref id, count: 2 } if id == "bad"
        ));
    }

    #[test]
    fn test_lookup_and_parse_errors() {
        let mut registry = ModuleRegistry::default();
        registry.register_module_ids(&["broken"], "define(function () {");
        registry.register_module_ids(&["binary"], [0xff_u8, 0xfe, 0x00]);

        assert!(matches!(
            registry.definition("missing"),
            Err(BundleError::ModuleNotFound { .. })
        ));
        assert!(matches!(
            registry.definition("broken"),
            Err(BundleError::Parse { .. })
        ));
        assert!(matches!(
            registry.definition("binary"),
            Err(BundleError::Parse { .. })
        ));
    }

    #[test]
    fn test_parse_results_are_cached_per_id() {
        let mut registry = ModuleRegistry::default();
        registry.register_module_ids(&["app"], "define({});");

        let first = registry.definition("app").unwrap();
        let second = registry.definition("app").unwrap();
        assert!(Rc::ptr_eq(&first, &second));

        registry.register_module_ids(&["app"], "define('renamed', [], {});");
        let third = registry.definition("app").unwrap();
        assert_eq!(third.definitions[0].id.as_deref(), Some("renamed"));
    }

    #[test]
    fn test_package_lookup_follows_config() {
        let config = ModuleConfig::from_json_str(
            r#"{"packages": [{"name": "inf-ria", "location": "dep", "main": "startup.js"}]}"#,
        )
        .unwrap();
        let registry = ModuleRegistry::new(config.package_descriptors());

        assert!(registry.package_for("inf-ria").is_some());
        assert!(registry.package_for("inf-ria/startup").is_some());
        assert!(registry.package_for("inf-ria/main").is_none());
    }
}
