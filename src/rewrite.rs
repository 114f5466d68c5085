//! Instruction rewriting.
//!
//! One pass over every method body. Each matching site is rewritten in place
//! and the accessor call is inserted immediately before it:
//!
//! | site                         | becomes                                          |
//! |------------------------------|--------------------------------------------------|
//! | `getstatic f`                | `invokestatic instance; getfield f`              |
//! | `putstatic f` (1 slot)       | `invokestatic instance; swap; putfield f`        |
//! | `putstatic f` (2 slots)      | `invokestatic instance; dup_x2; pop; putfield f` |
//! | `invokestatic m()`           | `invokestatic instance; invokevirtual mInstance` |
//! | `invokestatic m(args)`       | spill args; `instance`; reload; `invokevirtual`  |
//! | `invokevirtual m`            | `invokevirtual mInstance`                        |
//!
//! Matching is syntactic on `(opcode, owner, name)`, so a second pass over
//! rewritten output finds nothing to do.

use std::collections::HashMap;

use ccl_classfile::{
    ClassFile, ClassFileError, ConstantPool, FieldAccess, FieldType, Insn, InsnId, InsnList,
    InvokeMode, MemberKind, MethodDescriptor, Scope, StackOp,
};
use serde::Serialize;
use tracing::trace;

use crate::error::TransformError;
use crate::rules::{RedirectionRule, RuleTable, SiteKind, ACCESSOR_DESCRIPTOR, ACCESSOR_NAME};

/// Edits made to one unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RewriteReport {
    /// `getstatic` sites turned into instance reads
    pub field_reads: u32,
    /// `putstatic` sites turned into instance writes
    pub field_writes: u32,
    /// `invokestatic` sites without arguments
    pub static_calls: u32,
    /// `invokestatic` sites whose arguments were spilled around the accessor
    pub spilled_calls: u32,
    /// `invokevirtual` sites that only needed the new name
    pub renamed_calls: u32,
    /// Methods that received at least one edit
    pub methods: u32,
}

impl RewriteReport {
    pub fn sites(&self) -> u32 {
        self.field_reads
            + self.field_writes
            + self.static_calls
            + self.spilled_calls
            + self.renamed_calls
    }

    pub fn edited(&self) -> bool {
        self.sites() > 0
    }
}

/// Rewrite every matching site of `class` in place.
///
/// `unit` only labels errors.
pub fn rewrite_class(
    unit: &str,
    class: &mut ClassFile,
    rules: &RuleTable,
) -> Result<RewriteReport, TransformError> {
    let mut report = RewriteReport::default();
    let mut rewriter = Rewriter {
        unit,
        rules,
        pool: &mut class.pool,
        accessor: None,
        renamed: HashMap::new(),
    };
    for method in &mut class.methods {
        let Some(code) = method.code.as_mut() else {
            continue;
        };
        let before = report.sites();
        let spill_base = code.max_locals;
        for id in code.insns.ids() {
            let Some(insn) = code.insns.get(id).cloned() else {
                continue;
            };
            let edit = match insn {
                Insn::Field { access, field } => rewriter.field_site(access, field)?,
                Insn::Invoke { mode, method: index } => {
                    rewriter.invoke_site(mode, index, spill_base)?
                }
                _ => None,
            };
            let Some(edit) = edit else {
                continue;
            };
            trace!(
                unit = unit,
                method = %rewriter.pool.utf8_lossy(method.name),
                site = ?edit.kind,
                "redirected site"
            );
            edit.kind.count(&mut report);
            apply(&mut code.insns, id, edit).ok_or_else(|| {
                TransformError::invariant(unit, "rewritten site vanished from its method body")
            })?;
        }
        if report.sites() > before {
            report.methods += 1;
        }
    }
    Ok(report)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditKind {
    FieldRead,
    FieldWrite,
    StaticCall,
    SpilledCall,
    RenamedCall,
}

impl EditKind {
    fn count(self, report: &mut RewriteReport) {
        match self {
            EditKind::FieldRead => report.field_reads += 1,
            EditKind::FieldWrite => report.field_writes += 1,
            EditKind::StaticCall => report.static_calls += 1,
            EditKind::SpilledCall => report.spilled_calls += 1,
            EditKind::RenamedCall => report.renamed_calls += 1,
        }
    }
}

/// Code to insert before a site and the instruction replacing it.
struct Edit {
    kind: EditKind,
    prefix: Vec<Insn>,
    replacement: Insn,
}

fn apply(list: &mut InsnList, id: InsnId, edit: Edit) -> Option<()> {
    list.insert_all_before(id, edit.prefix)?;
    list.replace(id, edit.replacement)?;
    Some(())
}

struct Rewriter<'a> {
    unit: &'a str,
    rules: &'a RuleTable,
    pool: &'a mut ConstantPool,
    /// Pool index of the accessor `Methodref`, interned on first use
    accessor: Option<u16>,
    /// Redirected call `Methodref` index to its renamed counterpart
    renamed: HashMap<u16, u16>,
}

impl Rewriter<'_> {
    fn malformed(&self, source: ClassFileError) -> TransformError {
        TransformError::malformed(self.unit, source)
    }

    fn accessor_call(&mut self) -> Result<Insn, TransformError> {
        let method = match self.accessor {
            Some(index) => index,
            None => {
                let index = self
                    .pool
                    .intern_member_ref(
                        MemberKind::Method,
                        self.rules.owner(),
                        ACCESSOR_NAME.as_bytes(),
                        ACCESSOR_DESCRIPTOR.as_bytes(),
                    )
                    .map_err(|e| TransformError::invariant(self.unit, e.to_string()))?;
                self.accessor = Some(index);
                index
            }
        };
        Ok(Insn::Invoke {
            mode: InvokeMode::Static,
            method,
        })
    }

    fn rule(
        &self,
        owner: &[u8],
        name: &[u8],
        site: SiteKind,
    ) -> Result<Option<RedirectionRule>, TransformError> {
        self.rules
            .lookup(owner, name, site)
            .map(|rule| rule.cloned())
            .map_err(|mismatch| TransformError::invariant(self.unit, mismatch.to_string()))
    }

    fn field_site(&mut self, access: FieldAccess, field: u16) -> Result<Option<Edit>, TransformError> {
        if access.scope != Scope::Static {
            return Ok(None);
        }
        let member = self.pool.member_ref(field).map_err(|e| self.malformed(e))?;
        if self.rule(member.owner, member.name, SiteKind::FieldAccess)?.is_none() {
            return Ok(None);
        }
        let wide = FieldType::parse(member.descriptor)
            .map_err(|e| self.malformed(e))?
            .is_category2();

        let replacement = Insn::Field {
            access: access.with_scope(Scope::Instance),
            field,
        };
        let mut prefix = vec![self.accessor_call()?];
        let kind = if access == FieldAccess::GET_STATIC {
            EditKind::FieldRead
        } else {
            // objectref has to sit beneath the value
            if wide {
                prefix.push(Insn::Stack(StackOp::DupX2));
                prefix.push(Insn::Stack(StackOp::Pop));
            } else {
                prefix.push(Insn::Stack(StackOp::Swap));
            }
            EditKind::FieldWrite
        };
        Ok(Some(Edit {
            kind,
            prefix,
            replacement,
        }))
    }

    fn invoke_site(
        &mut self,
        mode: InvokeMode,
        method: u16,
        spill_base: u16,
    ) -> Result<Option<Edit>, TransformError> {
        if !matches!(mode, InvokeMode::Static | InvokeMode::Virtual) {
            return Ok(None);
        }
        let member = self.pool.member_ref(method).map_err(|e| self.malformed(e))?;
        let Some(rule) = self.rule(member.owner, member.name, SiteKind::Invocation)? else {
            return Ok(None);
        };
        let kind = member.kind;
        let owner = member.owner.to_vec();
        let descriptor = member.descriptor.to_vec();

        let renamed = match self.renamed.get(&method) {
            Some(&index) => index,
            None => {
                let index = self
                    .pool
                    .intern_member_ref(kind, &owner, rule.instance_name().as_bytes(), &descriptor)
                    .map_err(|e| TransformError::invariant(self.unit, e.to_string()))?;
                self.renamed.insert(method, index);
                index
            }
        };
        let replacement = Insn::Invoke {
            mode: InvokeMode::Virtual,
            method: renamed,
        };

        if mode == InvokeMode::Virtual {
            return Ok(Some(Edit {
                kind: EditKind::RenamedCall,
                prefix: Vec::new(),
                replacement,
            }));
        }

        let params = MethodDescriptor::parse(&descriptor)
            .map_err(|e| self.malformed(e))?
            .params;
        if params.is_empty() {
            return Ok(Some(Edit {
                kind: EditKind::StaticCall,
                prefix: vec![self.accessor_call()?],
                replacement,
            }));
        }

        let prefix = self.spill_around_accessor(&params, spill_base)?;
        Ok(Some(Edit {
            kind: EditKind::SpilledCall,
            prefix,
            replacement,
        }))
    }

    /// Store the pushed arguments, call the accessor, then load them back so
    /// the receiver ends up beneath them.
    fn spill_around_accessor(
        &mut self,
        params: &[FieldType],
        base: u16,
    ) -> Result<Vec<Insn>, TransformError> {
        let mut slots = Vec::with_capacity(params.len());
        let mut next = u32::from(base);
        for param in params {
            let slot = u16::try_from(next).map_err(|_| {
                TransformError::invariant(self.unit, "argument spill exceeds the local variable limit")
            })?;
            slots.push(slot);
            next += u32::from(param.slots());
        }
        if next > u32::from(u16::MAX) {
            return Err(TransformError::invariant(
                self.unit,
                "argument spill exceeds the local variable limit",
            ));
        }

        let mut prefix = Vec::with_capacity(params.len() * 2 + 1);
        for (param, slot) in params.iter().zip(&slots).rev() {
            prefix.push(Insn::var(param.store_opcode(), *slot));
        }
        prefix.push(self.accessor_call()?);
        for (param, slot) in params.iter().zip(&slots) {
            prefix.push(Insn::var(param.load_opcode(), *slot));
        }
        Ok(prefix)
    }
}
