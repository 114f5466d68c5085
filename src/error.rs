//! Transformer error types.
//!
//! Diagnostics failures never appear here: the sink logs and counts them
//! instead of failing the transform.

use ccl_classfile::ClassFileError;

/// Why a unit could not be transformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// The admitted bytes are not a well-formed class file.
    MalformedUnit {
        /// Name the host asked to transform
        unit: String,
        source: ClassFileError,
    },

    /// A rewrite produced, or would produce, an inconsistent method body.
    InvariantViolation {
        /// Name the host asked to transform
        unit: String,
        /// What went wrong, including the offending member
        detail: String,
    },
}

impl TransformError {
    pub fn malformed(unit: &str, source: ClassFileError) -> Self {
        TransformError::MalformedUnit {
            unit: unit.to_string(),
            source,
        }
    }

    pub fn invariant(unit: &str, detail: impl Into<String>) -> Self {
        TransformError::InvariantViolation {
            unit: unit.to_string(),
            detail: detail.into(),
        }
    }

    /// Name of the unit the error belongs to.
    pub fn unit(&self) -> &str {
        match self {
            TransformError::MalformedUnit { unit, .. }
            | TransformError::InvariantViolation { unit, .. } => unit,
        }
    }
}

impl std::fmt::Display for TransformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformError::MalformedUnit { unit, source } => {
                write!(f, "malformed class {}: {}", unit, source)
            }
            TransformError::InvariantViolation { unit, detail } => {
                write!(f, "invariant violation while rewriting {}: {}", unit, detail)
            }
        }
    }
}

impl std::error::Error for TransformError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransformError::MalformedUnit { source, .. } => Some(source),
            TransformError::InvariantViolation { .. } => None,
        }
    }
}

/// A rule table that would map one name to two categories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleTableError {
    Overlap {
        name: String,
        first: &'static str,
        second: &'static str,
    },
}

impl std::fmt::Display for RuleTableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleTableError::Overlap {
                name,
                first,
                second,
            } => write!(
                f,
                "member {:?} is registered as both a {} rule and a {} rule",
                name, first, second
            ),
        }
    }
}

impl std::error::Error for RuleTableError {}
