//! Build-time bundler for AMD modules
//!
//! Given an entry module id, amdpack concatenates the text of every module
//! the entry's combine policy lets it inline, dependencies first, and adds
//! small proxy definitions so alias ids and bare package names keep loading.

pub mod bundler;
pub mod combine;
pub mod compiler;
pub mod config;
pub mod error;
pub mod matcher;
pub mod module_registry;
pub mod resolver;
pub mod source;

pub use compiler::Compiler;
pub use config::ModuleConfig;
pub use error::{BundleError, Result};
