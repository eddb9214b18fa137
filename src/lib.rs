//! # autograder
//!
//! Grades student programming submissions: unpacks submission archives,
//! works out who each one belongs to, compiles and runs the entry file with
//! the right toolchain under deadlines, and scores the output against the
//! expected output.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// Safe extraction of submission archives
pub mod archive;
/// Ad-hoc grading of uploaded archives
pub mod batch;
/// Output normalization, scoring strategies, and diffs
pub mod compare;
/// Runtime settings read from the environment
pub mod config;
/// Compile-and-run dispatch for single source files
pub mod dispatch;
/// Evaluation of extracted submissions against assignments
pub mod engine;
/// Typed errors
pub mod error;
/// Student id resolution and the identity mapping file
pub mod identity;
/// Supported languages
pub mod language;
/// Entry file search
pub mod locate;
/// Subprocesses with deadlines
pub mod process;
/// Assignment, score, and toolchain configuration stores
pub mod store;
/// Toolchain adapters and tool resolution
pub mod toolchain;
/// Shared domain types
pub mod types;
/// Filesystem helpers
pub mod util;

use std::sync::Arc;

use config::Settings;
use dispatch::ExecutionDispatcher;
use store::ToolchainConfigStore;
use toolchain::{AdapterRegistry, ToolchainResolver};

/// Builds a dispatcher with every built-in adapter, resolving tools through
/// `store` when one is given.
pub fn default_dispatcher(
    settings: &Settings,
    store: Option<Arc<dyn ToolchainConfigStore>>,
) -> ExecutionDispatcher {
    let tools = match store {
        Some(store) => ToolchainResolver::new(store),
        None => ToolchainResolver::without_store(),
    };
    ExecutionDispatcher::new(AdapterRegistry::with_defaults(), tools, settings)
}
