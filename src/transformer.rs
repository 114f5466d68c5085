//! Per-unit entry point.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use ccl_classfile::ClassFile;
use tracing::{debug, warn};

use crate::config::RedirectorConfig;
use crate::diagnostics::{DumpPhase, DumpSink, FsDumpSink};
use crate::error::{RuleTableError, TransformError};
use crate::metrics::RedirectorMetrics;
use crate::rewrite::{rewrite_class, RewriteReport};
use crate::rules::RuleTable;
use crate::scanner::ConstantPoolScanner;

/// Redirects static `CCRenderState` usage in class files handed over by a
/// class loader.
///
/// One `Redirector` serves every loader thread; each call owns the unit it
/// decodes.
pub struct Redirector {
    scanner: ConstantPoolScanner,
    rules: Arc<RuleTable>,
    sink: Option<Arc<dyn DumpSink>>,
    metrics: RedirectorMetrics,
}

impl fmt::Debug for Redirector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Redirector")
            .field("scanner", &self.scanner)
            .field("rules", &self.rules.len())
            .field("dumps", &self.sink.is_some())
            .finish()
    }
}

impl Redirector {
    pub fn new(rules: Arc<RuleTable>) -> Self {
        Self {
            scanner: ConstantPoolScanner::new(rules.owner()),
            rules,
            sink: None,
            metrics: RedirectorMetrics::default(),
        }
    }

    /// Shipped rule table, dumping to the filesystem when the config asks for it.
    pub fn from_config(config: &RedirectorConfig) -> Result<Self, RuleTableError> {
        let redirector = Self::new(Arc::new(RuleTable::render_state()?));
        Ok(if config.dump_classes {
            redirector.with_sink(Arc::new(FsDumpSink::new(&config.dump_dir)))
        } else {
            redirector
        })
    }

    pub fn from_env() -> Result<Self, RuleTableError> {
        Self::from_config(&RedirectorConfig::from_env())
    }

    pub fn with_sink(mut self, sink: Arc<dyn DumpSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_metrics(mut self, metrics: RedirectorMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn metrics(&self) -> &RedirectorMetrics {
        &self.metrics
    }

    /// Transform one unit.
    ///
    /// Returns the input slice itself when nothing had to change, so callers
    /// can tell a pass-through from a rewrite with `Cow::Borrowed`.
    pub fn transform<'a>(
        &self,
        name: &str,
        bytes: &'a [u8],
    ) -> Result<Cow<'a, [u8]>, TransformError> {
        self.metrics.record_seen();
        if !self.scanner.matches(bytes) {
            self.metrics.record_skipped();
            return Ok(Cow::Borrowed(bytes));
        }

        let mut class =
            ClassFile::decode(bytes).map_err(|e| TransformError::malformed(name, e))?;
        self.metrics.record_decoded();

        let report = rewrite_class(name, &mut class, &self.rules)?;
        if !report.edited() {
            self.metrics.record_unchanged();
            return Ok(Cow::Borrowed(bytes));
        }

        let rewritten = class.encode().map_err(|e| {
            if e.is_decode_error() {
                TransformError::malformed(name, e)
            } else {
                TransformError::invariant(name, format!("re-encoding failed: {}", e))
            }
        })?;
        self.metrics.record_rewritten(u64::from(report.sites()));
        log_report(name, &report);

        if let Some(sink) = &self.sink {
            self.dump(sink.as_ref(), name, DumpPhase::Pre, bytes);
            self.dump(sink.as_ref(), name, DumpPhase::Post, &rewritten);
        }
        Ok(Cow::Owned(rewritten))
    }

    fn dump(&self, sink: &dyn DumpSink, name: &str, phase: DumpPhase, bytes: &[u8]) {
        if let Err(e) = sink.dump(name, phase, bytes) {
            self.metrics.record_dump_failure();
            warn!(unit = name, phase = %phase, error = %format!("{:#}", e), "snapshot failed");
        }
    }
}

fn log_report(name: &str, report: &RewriteReport) {
    debug!(
        unit = name,
        methods = report.methods,
        field_reads = report.field_reads,
        field_writes = report.field_writes,
        static_calls = report.static_calls,
        spilled_calls = report.spilled_calls,
        renamed_calls = report.renamed_calls,
        "redirected render state usage"
    );
}
