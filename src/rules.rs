//! Redirection rule table.
//!
//! Every rule is keyed by `(owner, name)`. The table is closed at
//! construction and only read afterwards, so one instance is shared by
//! every loader thread.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::RuleTableError;

/// Type whose static API is redirected.
pub const RENDER_STATE_OWNER: &str = "codechicken/lib/render/CCRenderState";

/// Static accessor returning the current thread's instance.
pub const ACCESSOR_NAME: &str = "instance";
pub const ACCESSOR_DESCRIPTOR: &str = "()Lcodechicken/lib/render/CCRenderState;";

/// Appended to redirected call names.
pub const INSTANCE_SUFFIX: &str = "Instance";

pub const REDIRECTED_FIELDS: &[&str] = &[
    "pipeline",
    "model",
    "firstVertexIndex",
    "lastVertexIndex",
    "vertexIndex",
    "baseColour",
    "alphaOverride",
    "useNormals",
    "computeLighting",
    "useColour",
    "lightMatrix",
    "vert",
    "hasNormal",
    "normal",
    "hasColour",
    "colour",
    "hasBrightness",
    "brightness",
    "side",
    "lc",
];

pub const REDIRECTED_SIMPLE_CALLS: &[&str] =
    &["reset", "pullLightmap", "pushLightmap", "setDynamic", "draw"];

pub const REDIRECTED_COMPLEX_CALLS: &[&str] = &[
    "setPipeline",
    "bindModel",
    "setModel",
    "setVertexRange",
    "render",
    "runPipeline",
    "writeVert",
    "setNormal",
    "setColour",
    "setBrightness",
    "startDrawing",
];

/// What a rule redirects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum RedirectionRule {
    /// Static field now living on the instance
    Field { name: String },
    /// Call whose instance form takes no extra arguments
    SimpleCall { name: String },
    /// Call whose instance form may take arguments
    ComplexCall { name: String },
}

impl RedirectionRule {
    pub fn name(&self) -> &str {
        match self {
            RedirectionRule::Field { name }
            | RedirectionRule::SimpleCall { name }
            | RedirectionRule::ComplexCall { name } => name,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            RedirectionRule::Field { .. } => "field",
            RedirectionRule::SimpleCall { .. } => "simple call",
            RedirectionRule::ComplexCall { .. } => "complex call",
        }
    }

    pub fn is_call(&self) -> bool {
        !matches!(self, RedirectionRule::Field { .. })
    }

    /// Name of the instance method a call rule targets.
    pub fn instance_name(&self) -> String {
        format!("{}{}", self.name(), INSTANCE_SUFFIX)
    }
}

/// Kind of instruction being looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteKind {
    FieldAccess,
    Invocation,
}

/// A registered name reached by the wrong kind of instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMismatch {
    pub name: String,
    pub rule: &'static str,
    pub site: SiteKind,
}

impl std::fmt::Display for RuleMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let site = match self.site {
            SiteKind::FieldAccess => "a field access",
            SiteKind::Invocation => "an invocation",
        };
        write!(
            f,
            "{} rule {:?} reached through {}",
            self.rule, self.name, site
        )
    }
}

impl std::error::Error for RuleMismatch {}

#[derive(Debug, Clone)]
pub struct RuleTable {
    owner: Vec<u8>,
    rules: HashMap<Vec<u8>, RedirectionRule>,
}

impl RuleTable {
    /// Build a table for `owner`, rejecting names registered in two categories.
    pub fn new(
        owner: &str,
        fields: &[&str],
        simple_calls: &[&str],
        complex_calls: &[&str],
    ) -> Result<Self, RuleTableError> {
        let mut table = Self {
            owner: owner.as_bytes().to_vec(),
            rules: HashMap::new(),
        };
        for name in fields {
            table.insert(RedirectionRule::Field {
                name: name.to_string(),
            })?;
        }
        for name in simple_calls {
            table.insert(RedirectionRule::SimpleCall {
                name: name.to_string(),
            })?;
        }
        for name in complex_calls {
            table.insert(RedirectionRule::ComplexCall {
                name: name.to_string(),
            })?;
        }
        Ok(table)
    }

    /// The shipped `CCRenderState` table.
    pub fn render_state() -> Result<Self, RuleTableError> {
        Self::new(
            RENDER_STATE_OWNER,
            REDIRECTED_FIELDS,
            REDIRECTED_SIMPLE_CALLS,
            REDIRECTED_COMPLEX_CALLS,
        )
    }

    fn insert(&mut self, rule: RedirectionRule) -> Result<(), RuleTableError> {
        let key = rule.name().as_bytes().to_vec();
        if let Some(existing) = self.rules.get(&key) {
            if existing.category() != rule.category() {
                return Err(RuleTableError::Overlap {
                    name: rule.name().to_string(),
                    first: existing.category(),
                    second: rule.category(),
                });
            }
            return Ok(());
        }
        self.rules.insert(key, rule);
        Ok(())
    }

    pub fn owner(&self) -> &[u8] {
        &self.owner
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> impl Iterator<Item = &RedirectionRule> {
        self.rules.values()
    }

    /// Find the rule for a member reference.
    ///
    /// Returns `Ok(None)` for unregistered members and `Err` when the name is
    /// registered under the category the instruction kind cannot use.
    pub fn lookup(
        &self,
        owner: &[u8],
        name: &[u8],
        site: SiteKind,
    ) -> Result<Option<&RedirectionRule>, RuleMismatch> {
        if owner != self.owner.as_slice() {
            return Ok(None);
        }
        let Some(rule) = self.rules.get(name) else {
            return Ok(None);
        };
        let compatible = match site {
            SiteKind::FieldAccess => !rule.is_call(),
            SiteKind::Invocation => rule.is_call(),
        };
        if compatible {
            Ok(Some(rule))
        } else {
            Err(RuleMismatch {
                name: rule.name().to_string(),
                rule: rule.category(),
                site,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: &[u8] = RENDER_STATE_OWNER.as_bytes();

    #[test]
    fn test_shipped_table_is_disjoint_and_complete() {
        let table = RuleTable::render_state().unwrap();
        assert_eq!(
            table.len(),
            REDIRECTED_FIELDS.len() + REDIRECTED_SIMPLE_CALLS.len() + REDIRECTED_COMPLEX_CALLS.len()
        );
        let fields = table.rules().filter(|r| !r.is_call()).count();
        assert_eq!(fields, 20);
    }

    #[test]
    fn test_instance_names_are_not_rules() {
        let table = RuleTable::render_state().unwrap();
        for rule in table.rules().filter(|r| r.is_call()) {
            let renamed = rule.instance_name();
            assert_eq!(
                table.lookup(OWNER, renamed.as_bytes(), SiteKind::Invocation),
                Ok(None),
                "{}",
                renamed
            );
        }
        assert_eq!(
            table.lookup(OWNER, ACCESSOR_NAME.as_bytes(), SiteKind::Invocation),
            Ok(None)
        );
    }

    #[test]
    fn test_lookup_by_category() {
        let table = RuleTable::render_state().unwrap();
        assert_eq!(
            table.lookup(OWNER, b"baseColour", SiteKind::FieldAccess),
            Ok(Some(&RedirectionRule::Field {
                name: "baseColour".to_string()
            }))
        );
        assert!(matches!(
            table.lookup(OWNER, b"reset", SiteKind::Invocation),
            Ok(Some(RedirectionRule::SimpleCall { .. }))
        ));
        assert!(matches!(
            table.lookup(OWNER, b"setPipeline", SiteKind::Invocation),
            Ok(Some(RedirectionRule::ComplexCall { .. }))
        ));
    }

    #[test]
    fn test_lookup_ignores_other_owners_and_names() {
        let table = RuleTable::render_state().unwrap();
        assert_eq!(
            table.lookup(b"codechicken/lib/render/Other", b"baseColour", SiteKind::FieldAccess),
            Ok(None)
        );
        assert_eq!(table.lookup(OWNER, b"unknown", SiteKind::FieldAccess), Ok(None));
    }

    #[test]
    fn test_lookup_reports_mismatch() {
        let table = RuleTable::render_state().unwrap();
        let err = table
            .lookup(OWNER, b"baseColour", SiteKind::Invocation)
            .unwrap_err();
        assert_eq!(err.rule, "field");
        assert_eq!(
            err.to_string(),
            "field rule \"baseColour\" reached through an invocation"
        );
        assert!(table.lookup(OWNER, b"draw", SiteKind::FieldAccess).is_err());
    }

    #[test]
    fn test_overlap_is_rejected() {
        let err = RuleTable::new("a/B", &["x"], &["y"], &["x"]).unwrap_err();
        assert_eq!(
            err,
            RuleTableError::Overlap {
                name: "x".to_string(),
                first: "field",
                second: "complex call",
            }
        );
    }

    #[test]
    fn test_duplicate_in_one_category_is_accepted() {
        let table = RuleTable::new("a/B", &["x", "x"], &[], &[]).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_instance_name() {
        let rule = RedirectionRule::SimpleCall {
            name: "reset".to_string(),
        };
        assert_eq!(rule.instance_name(), "resetInstance");
        assert_eq!(rule.category(), "simple call");
    }
}
