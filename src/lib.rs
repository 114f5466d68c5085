//! CCRenderState redirection transformer
//!
//! Rewrites compiled classes so static uses of the legacy
//! `codechicken/lib/render/CCRenderState` API go through the per-thread
//! instance returned by `CCRenderState.instance()`:
//!
//! - **Pre-filter**: [`scanner`] rejects classes whose constant pool never
//!   mentions the render state type, without decoding them
//! - **Rules**: [`rules`] holds the closed table of redirected fields and calls
//! - **Rewrite**: [`rewrite`] applies stack-preserving substitutions
//! - **Entry point**: [`Redirector::transform`], invoked once per class load
//!
//! Class file decoding, encoding and `max_stack`/`max_locals` recomputation
//! live in the `ccl-classfile` crate.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod metrics;
pub mod rewrite;
pub mod rules;
pub mod scanner;
pub mod transformer;

pub use config::RedirectorConfig;
pub use diagnostics::{DumpPhase, DumpSink, FsDumpSink, MemoryDumpSink, Snapshot};
pub use error::{RuleTableError, TransformError};
pub use metrics::{MetricsSnapshot, RedirectorMetrics};
pub use rewrite::{rewrite_class, RewriteReport};
pub use rules::{RedirectionRule, RuleMismatch, RuleTable, SiteKind};
pub use scanner::ConstantPoolScanner;
pub use transformer::Redirector;
