//! Bundle engine - walks the dependency graph of one entry module
//!
//! The engine produces the text for one top-level bundle call: every module
//! the combine policy lets it inline, dependencies first, each exactly once,
//! followed by the proxy definitions that keep alias and package ids loadable.
//!
//! The walk is depth-first in declaration order. It runs on an explicit stack
//! of frames instead of the call stack, so long dependency chains cannot
//! overflow it. The classifier's exclusion ledger doubles as the visited set:
//! an id is excluded before its frame is opened, which is what makes cycles
//! terminate.

use std::rc::Rc;

use log::{debug, trace};

use crate::{
    combine::PatternClassifier,
    config::PackageDescriptor,
    error::Result,
    module_registry::{ModuleRecord, ModuleRegistry},
    resolver::DependencyMapper,
    source::quote,
};

/// Separator between the fragments of one module's output
const FRAGMENT_SEPARATOR: &str = "\n\n";

/// Bundles one entry module
#[derive(Debug)]
pub struct BundleEngine<'a> {
    entry: String,
    registry: &'a ModuleRegistry,
    mapper: &'a DependencyMapper,
    /// `None` means single-module mode
    classifier: Option<PatternClassifier>,
}

impl<'a> BundleEngine<'a> {
    pub fn new(
        entry: impl Into<String>,
        registry: &'a ModuleRegistry,
        mapper: &'a DependencyMapper,
    ) -> Self {
        Self {
            entry: entry.into(),
            registry,
            mapper,
            classifier: None,
        }
    }

    /// Inline dependencies as `classifier` allows instead of emitting only
    /// the entry itself
    pub fn with_classifier(mut self, classifier: PatternClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// The classifier with everything recorded during bundling so far
    pub fn classifier(&self) -> Option<&PatternClassifier> {
        self.classifier.as_ref()
    }

    /// Produce the bundled text for the entry module
    ///
    /// Any failure aborts the whole call; no partial output is returned.
    pub fn bundle(&mut self) -> Result<String> {
        debug!(
            "Bundling {} ({})",
            self.entry,
            if self.classifier.is_some() {
                "combined"
            } else {
                "single module"
            }
        );

        let mut context = TraversalContext {
            registry: self.registry,
            mapper: self.mapper,
            classifier: self.classifier.as_mut(),
        };
        context.run(&self.entry)
    }
}

/// State shared by every frame of one bundle call
struct TraversalContext<'a, 'c> {
    registry: &'a ModuleRegistry,
    mapper: &'a DependencyMapper,
    classifier: Option<&'c mut PatternClassifier>,
}

/// Dependency references to walk, and the id they resolve against
struct WorkItem {
    defining_id: String,
    references: Vec<String>,
}

/// One module whose dependencies are being walked
struct Frame {
    module_id: String,
    record: Rc<ModuleRecord>,
    work: Vec<WorkItem>,
    /// Cursor into `work`
    item: usize,
    /// Cursor into the current work item's references
    reference: usize,
    /// Finished output of the dependencies inlined so far
    fragments: Vec<String>,
}

impl TraversalContext<'_, '_> {
    fn run(&mut self, entry: &str) -> Result<String> {
        let mut stack: Vec<Frame> = Vec::new();
        let mut current = self.open_frame(entry)?;

        loop {
            if let Some(dependency) = self.next_dependency(&mut current) {
                let child = self.open_frame(&dependency)?;
                stack.push(std::mem::replace(&mut current, child));
                continue;
            }

            let text = self.finish_frame(current);
            match stack.pop() {
                Some(parent) => {
                    current = parent;
                    current.fragments.push(text);
                }
                None => return Ok(text),
            }
        }
    }

    /// Load `module_id` and queue the references it may inline
    fn open_frame(&mut self, module_id: &str) -> Result<Frame> {
        let record = self.registry.definition(module_id)?;
        let mut work = Vec::new();

        if let Some(classifier) = self.classifier.as_deref_mut() {
            classifier.add_exclude(module_id);
            for definition_id in record.definition_ids() {
                classifier.add_exclude(definition_id);
            }
            // The package proxy emitted with this frame answers for both ids
            if let Some(package) = &record.package {
                classifier.add_exclude(&package.name);
                classifier.add_exclude(&package.main_module_id);
            }

            for definition in &record.definitions {
                work.push(WorkItem {
                    defining_id: definition
                        .id
                        .clone()
                        .unwrap_or_else(|| module_id.to_owned()),
                    references: definition.actual_dependencies.clone(),
                });
            }

            // Modules the policy asks for explicitly, as of now
            for included in classifier.includes() {
                work.push(WorkItem {
                    defining_id: included.clone(),
                    references: vec![included],
                });
            }
        }

        trace!("Opened {module_id} with {} work item(s)", work.len());

        Ok(Frame {
            module_id: module_id.to_owned(),
            record,
            work,
            item: 0,
            reference: 0,
            fragments: Vec::new(),
        })
    }

    /// Next dependency of `frame` to inline, marked excluded already
    fn next_dependency(&mut self, frame: &mut Frame) -> Option<String> {
        let classifier = self.classifier.as_deref_mut()?;

        while let Some(item) = frame.work.get(frame.item) {
            let Some(reference) = item.references.get(frame.reference) else {
                frame.item += 1;
                frame.reference = 0;
                continue;
            };
            frame.reference += 1;

            let dependency = self.mapper.normalize(reference, &item.defining_id);
            if classifier.is_excluded(&dependency) {
                trace!("Skipping {dependency} required by {}", item.defining_id);
                continue;
            }

            classifier.add_exclude(&dependency);
            debug!("Inlining {dependency} into {}", frame.module_id);
            return Some(dependency);
        }

        None
    }

    /// Append the module's own code and proxies to its dependencies' output
    fn finish_frame(&mut self, frame: Frame) -> String {
        let Frame {
            module_id,
            record,
            mut fragments,
            ..
        } = frame;

        fragments.push(self.registry.render(&record));

        if let Some(package) = &record.package {
            debug!("Adding package proxy {} -> {}", package.name, package.main_module_id);
            fragments.push(package_proxy(package));
        } else if let Some(group) = self.registry.alias_group(&module_id) {
            for alias in group {
                if let Some(classifier) = self.classifier.as_deref_mut() {
                    if classifier.is_excluded(alias) {
                        continue;
                    }
                    classifier.add_exclude(alias);
                }
                if *alias != module_id {
                    debug!("Adding alias proxy {alias} -> {module_id}");
                    fragments.push(alias_proxy(alias, &module_id));
                }
            }
        }

        fragments.join(FRAGMENT_SEPARATOR)
    }
}

/// `define('<name>', ['<main>'], ...)` so the bare package name loads its main module
fn package_proxy(package: &PackageDescriptor) -> String {
    format!(
        "define({}, [{}], function (main) {{ return main; }});",
        quote(&package.name),
        quote(&package.main_module_id)
    )
}

/// Definition of `alias` that forwards to `target`
fn alias_proxy(alias: &str, target: &str) -> String {
    format!(
        "\n/** d e f i n e */\ndefine({}, [{}], function (target) {{ return target; }});",
        quote(alias),
        quote(target)
    )
}
