//! Compiler facade
//!
//! Binds one module configuration to a registry of sources and a dependency
//! mapper, and turns combine policies into bundle calls.

use std::path::Path;

use log::{debug, info};

use crate::{
    bundler::BundleEngine,
    combine::PatternClassifier,
    config::ModuleConfig,
    error::Result,
    module_registry::ModuleRegistry,
    resolver::DependencyMapper,
    source::{AmdSourceService, SourceModuleService},
};

#[derive(Debug)]
pub struct Compiler {
    config: ModuleConfig,
    registry: ModuleRegistry,
    mapper: DependencyMapper,
}

impl Compiler {
    pub fn new(config: ModuleConfig) -> Self {
        Self::with_service(config, Box::new(AmdSourceService))
    }

    /// Use `service` instead of the built-in AMD reader to parse and render sources
    pub fn with_service(config: ModuleConfig, service: Box<dyn SourceModuleService>) -> Self {
        let registry = ModuleRegistry::with_service(config.package_descriptors(), service);
        let mapper = DependencyMapper::new(&config.map);
        Self {
            config,
            registry,
            mapper,
        }
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Register one source under every id in `ids`
    pub fn register_module_ids<S: AsRef<str>>(&mut self, ids: &[S], contents: impl AsRef<[u8]>) {
        self.registry.register_module_ids(ids, contents);
    }

    /// Register a source file under the ids the configuration gives it
    ///
    /// `path` is relative to the config directory. Returns the ids, which are
    /// empty for files that are not modules.
    pub fn register_file(&mut self, path: &Path, contents: impl AsRef<[u8]>) -> Vec<String> {
        let ids = self.config.module_ids_for_file(path);
        if ids.is_empty() {
            debug!("Skipping {}: not reachable as a module", path.display());
        } else {
            self.registry.register_module_ids(&ids, contents);
        }
        ids
    }

    /// Classifier for the combine policy configured for `module_id`
    ///
    /// `None` when no enabled policy exists. Flag policies have no patterns,
    /// so everything reachable gets inlined.
    pub fn combine_classifier(&self, module_id: &str) -> Result<Option<PatternClassifier>> {
        self.config
            .combine_setting(module_id)
            .map(|setting| PatternClassifier::new(setting.patterns(), self.registry.all_ids()))
            .transpose()
    }

    /// Ids with an enabled combine policy, in configuration order
    pub fn combined_modules(&self) -> Vec<String> {
        self.config
            .combine
            .iter()
            .filter(|(_, setting)| setting.is_enabled())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Whether any of `module_ids` has an enabled combine policy
    pub fn should_combine<S: AsRef<str>>(&self, module_ids: &[S]) -> bool {
        module_ids
            .iter()
            .any(|id| self.config.combine_setting(id.as_ref()).is_some())
    }

    /// The module's own code plus its proxies, with nothing inlined
    ///
    /// Always single-module mode: a combine policy configured for
    /// `module_id` is not consulted here. Callers that want the policy
    /// applied check [`Self::should_combine`] and use [`Self::to_bundle`].
    pub fn to_single(&self, module_id: &str) -> Result<String> {
        BundleEngine::new(module_id, &self.registry, &self.mapper).bundle()
    }

    /// Bundle `module_id` under its configured combine policy
    pub fn to_bundle(&self, module_id: &str) -> Result<String> {
        let mut engine = BundleEngine::new(module_id, &self.registry, &self.mapper);
        if let Some(classifier) = self.combine_classifier(module_id)? {
            engine = engine.with_classifier(classifier);
        }
        let output = engine.bundle()?;
        info!("Built {module_id} ({} bytes)", output.len());
        Ok(output)
    }

    /// Bundle `module_id` under an explicit combine policy
    pub fn to_bundle_with(&self, module_id: &str, classifier: PatternClassifier) -> Result<String> {
        BundleEngine::new(module_id, &self.registry, &self.mapper)
            .with_classifier(classifier)
            .bundle()
    }

    /// Bundle a package with all of its own modules and nothing else
    pub fn to_package(&self, module_id: &str) -> Result<String> {
        let classifier = PatternClassifier::new(
            ["!**/*".to_owned(), format!("~{module_id}")],
            self.registry.all_ids(),
        )?;
        self.to_bundle_with(module_id, classifier)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::BundleError;

    fn compiler(config: &str) -> Compiler {
        Compiler::new(ModuleConfig::from_json_str(config).unwrap())
    }

    #[test]
    fn test_combine_classifier_follows_config() {
        let mut compiler = compiler(
            r#"{"combine": {"app": true, "off": false, "zero": 0, "one": 1,
                "page": {"include": ["er/**"], "exclude": ["er/tpl"]}}}"#,
        );
        compiler.register_module_ids(&["app"], "define({});");

        assert!(compiler.combine_classifier("off").unwrap().is_none());
        assert!(compiler.combine_classifier("zero").unwrap().is_none());
        assert!(compiler.combine_classifier("missing").unwrap().is_none());

        let app = compiler.combine_classifier("app").unwrap().unwrap();
        assert!(app.patterns().is_empty());
        let one = compiler.combine_classifier("one").unwrap().unwrap();
        assert!(one.patterns().is_empty());

        let page = compiler.combine_classifier("page").unwrap().unwrap();
        assert_eq!(page.patterns(), vec!["er/**", "!er/tpl"]);
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let compiler = compiler(r#"{"combine": {"app": {"files": ["er/[z-a]"]}}}"#);
        let err = compiler.combine_classifier("app").unwrap_err();
        assert!(err.is_config_error());
        assert!(matches!(err, BundleError::InvalidPattern { .. }));
    }

    #[test]
    fn test_combined_modules_and_should_combine() {
        let compiler = compiler(r#"{"combine": {"app": 1, "off": false, "page": {"files": []}}}"#);

        assert_eq!(compiler.combined_modules(), vec!["app", "page"]);
        assert!(compiler.should_combine(&["lib", "app"]));
        assert!(!compiler.should_combine(&["off", "lib"]));
        assert!(!compiler.should_combine::<&str>(&[]));
    }

    #[test]
    fn test_to_single_ignores_combine_policy() {
        let mut compiler = compiler(r#"{"combine": {"app": true}}"#);
        compiler.register_module_ids(&["app"], "define(['./lib'], function () {});");
        compiler.register_module_ids(&["lib"], "define([], function () {});");

        assert_eq!(
            compiler.to_single("app").unwrap(),
            "define('app', ['./lib'], function () {});"
        );
        assert_eq!(
            compiler.to_bundle("app").unwrap(),
            "define('lib', [], function () {});\n\ndefine('app', ['./lib'], function () {});"
        );
    }

    #[test]
    fn test_bundle_calls_do_not_share_state() {
        let mut compiler = compiler(r#"{"combine": {"app": true}}"#);
        compiler.register_module_ids(&["app"], "define(['lib'], function () {});");
        compiler.register_module_ids(&["lib"], "define([], function () {});");

        let first = compiler.to_bundle("app").unwrap();
        let second = compiler.to_bundle("app").unwrap();
        assert_eq!(first, second);
    }
}
