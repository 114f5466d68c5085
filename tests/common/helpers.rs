//! Instruction inspection helpers.

use ccl_classfile::{stack_effect, ClassFile, Code, ConstantPool, Insn, InsnId, InsnList};

pub fn code_of<'a>(class: &'a ClassFile, name: &str, desc: &str) -> &'a Code {
    class
        .method(name, desc)
        .unwrap_or_else(|| panic!("no method {}{}", name, desc))
        .code
        .as_ref()
        .unwrap()
}

/// Instructions of a method, labels removed.
pub fn real_insns(class: &ClassFile, name: &str, desc: &str) -> Vec<Insn> {
    code_of(class, name, desc)
        .insns
        .iter()
        .map(|(_, insn)| insn.clone())
        .filter(|insn| !insn.is_label())
        .collect()
}

/// First non-label node at or after `id`.
pub fn real_at(list: &InsnList, mut id: InsnId) -> Option<&Insn> {
    loop {
        match list.get(id)? {
            Insn::Label => id = list.next(id)?,
            insn => return Some(insn),
        }
    }
}

/// Name of the field or method an instruction refers to.
pub fn member_name(class: &ClassFile, insn: &Insn) -> String {
    let index = match insn {
        Insn::Field { field, .. } => *field,
        Insn::Invoke { method, .. } => *method,
        other => panic!("not a member instruction: {:?}", other),
    };
    class.pool.member_ref(index).unwrap().name_str().into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Simulation {
    /// Height after the last instruction
    pub net: i32,
    /// Highest height reached
    pub peak: i32,
}

/// Straight-line stack simulation from an empty stack, panicking on underflow.
pub fn simulate(insns: &[Insn], pool: &ConstantPool) -> Simulation {
    let mut height = 0;
    let mut peak = 0;
    for insn in insns {
        let effect = stack_effect(insn, pool).unwrap();
        assert!(
            height >= effect.pop as i32,
            "underflow at {:?}: height {} pops {}",
            insn,
            height,
            effect.pop
        );
        height += effect.delta();
        peak = peak.max(height);
    }
    Simulation { net: height, peak }
}
