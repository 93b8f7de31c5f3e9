//! burlap: a CommonJS/AMD module-dependency walker and bundler core
//!
//! Given one or more entry module references, [`walk`] discovers the
//! transitive closure of required modules (honoring package-path aliases,
//! relative references and `text!` resource pseudo-imports) and emits one
//! [`ModuleRecord`] per unique resolved location through an incremental
//! stream. [`emit::bundle`] consumes the records into a single
//! identity-annotated artifact.

pub mod config;
pub mod emit;
pub mod error;
pub mod extractor;
pub mod loader;
pub mod resolver;
pub mod walker;

pub use error::WalkError;
pub use walker::{ModuleRecord, RecordStream, WalkOptions, walk};
