//! Human-readable listing of a class file.
//!
//! The layout loosely follows the `javap -c` / ASM textifier style: one line
//! per instruction, symbolic members, and `L<n>` names for labels that
//! something actually refers to.

use std::collections::{HashMap, HashSet};
use std::fmt::Write;

use crate::class::{ClassFile, Method};
use crate::code::{Code, CodeAttribute, FrameKind};
use crate::constant_pool::{Constant, ConstantPool};
use crate::insn::{Insn, InsnId};
use crate::opcodes;

/// Render `class` as text.
pub fn disassemble(class: &ClassFile) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "// class version {}.{}",
        class.major_version, class.minor_version
    );
    let _ = writeln!(out, "// access flags 0x{:X}", class.access_flags);
    let _ = write!(out, "class {}", class.name());
    if let Some(super_name) = class.super_name() {
        let _ = write!(out, " extends {}", super_name);
    }
    let _ = writeln!(out, " {{");

    for field in &class.fields {
        let _ = writeln!(
            out,
            "\n  // access flags 0x{:X}\n  {} : {}",
            field.access_flags,
            class.pool.utf8_lossy(field.name),
            class.pool.utf8_lossy(field.descriptor)
        );
    }
    for method in &class.methods {
        write_method(&mut out, method, &class.pool);
    }
    out.push_str("}\n");
    out
}

fn write_method(out: &mut String, method: &Method, pool: &ConstantPool) {
    let _ = writeln!(
        out,
        "\n  // access flags 0x{:X}\n  {}{}",
        method.access_flags,
        method.name(pool),
        method.descriptor(pool)
    );
    let Some(code) = &method.code else {
        return;
    };
    let labels = label_names(code);
    let name_of = |id: &InsnId| labels.get(id).cloned().unwrap_or_else(|| "L?".to_string());

    for h in &code.handlers {
        let catch = if h.catch_type == 0 {
            "null".to_string()
        } else {
            class_label(pool, h.catch_type)
        };
        let _ = writeln!(
            out,
            "    TRYCATCHBLOCK {} {} {} {}",
            name_of(&h.start),
            name_of(&h.end),
            name_of(&h.handler),
            catch
        );
    }

    let mut lines: HashMap<InsnId, Vec<u16>> = HashMap::new();
    let mut frames: HashMap<InsnId, &FrameKind> = HashMap::new();
    for attr in &code.attributes {
        match attr {
            CodeAttribute::LineNumbers { entries, .. } => {
                for e in entries {
                    lines.entry(e.start).or_default().push(e.line);
                }
            }
            CodeAttribute::StackMap { frames: fs, .. } => {
                for f in fs {
                    frames.insert(f.label, &f.kind);
                }
            }
            _ => {}
        }
    }

    for (id, insn) in code.insns.iter() {
        if insn.is_label() {
            if let Some(name) = labels.get(&id) {
                let _ = writeln!(out, "   {}", name);
            }
            for line in lines.get(&id).into_iter().flatten() {
                let _ = writeln!(out, "    LINENUMBER {} {}", line, name_of(&id));
            }
            if let Some(kind) = frames.get(&id) {
                let _ = writeln!(out, "    FRAME {}", frame_name(kind));
            }
            continue;
        }
        let _ = writeln!(out, "    {}", render_insn(insn, pool, &name_of));
    }
    let _ = writeln!(out, "    MAXSTACK = {}", code.max_stack);
    let _ = writeln!(out, "    MAXLOCALS = {}", code.max_locals);
}

/// Names for the labels referenced by branches, handlers, debug tables and frames.
fn label_names(code: &Code) -> HashMap<InsnId, String> {
    let mut referenced = HashSet::new();
    for (_, insn) in code.insns.iter() {
        referenced.extend(insn.branch_targets());
    }
    for h in &code.handlers {
        referenced.extend([h.start, h.end, h.handler]);
    }
    for attr in &code.attributes {
        match attr {
            CodeAttribute::LineNumbers { entries, .. } => {
                referenced.extend(entries.iter().map(|e| e.start))
            }
            CodeAttribute::LocalVariables { entries, .. }
            | CodeAttribute::LocalVariableTypes { entries, .. } => {
                referenced.extend(entries.iter().flat_map(|e| [e.start, e.end]))
            }
            CodeAttribute::StackMap { frames, .. } => {
                referenced.extend(frames.iter().map(|f| f.label))
            }
            _ => {}
        }
    }
    let mut names = HashMap::new();
    for (id, insn) in code.insns.iter() {
        if insn.is_label() && referenced.contains(&id) {
            let next = names.len();
            names.insert(id, format!("L{}", next));
        }
    }
    names
}

fn frame_name(kind: &FrameKind) -> &'static str {
    match kind {
        FrameKind::Same => "SAME",
        FrameKind::SameLocals1(_) => "SAME1",
        FrameKind::Chop(_) => "CHOP",
        FrameKind::Append(_) => "APPEND",
        FrameKind::Full { .. } => "FULL",
    }
}

fn class_label(pool: &ConstantPool, index: u16) -> String {
    match pool.class_name(index) {
        Ok(name) => String::from_utf8_lossy(name).into_owned(),
        Err(_) => format!("#{}", index),
    }
}

fn member_label(pool: &ConstantPool, index: u16, field: bool) -> String {
    match pool.member_ref(index) {
        Ok(m) if field => format!("{}.{} : {}", m.owner_str(), m.name_str(), m.descriptor_str()),
        Ok(m) => format!("{}.{} {}", m.owner_str(), m.name_str(), m.descriptor_str()),
        Err(_) => format!("#{}", index),
    }
}

fn constant_label(pool: &ConstantPool, index: u16) -> String {
    match pool.get(index) {
        Ok(Constant::Integer(v)) => v.to_string(),
        Ok(Constant::Float(bits)) => format!("{}F", f32::from_bits(*bits)),
        Ok(Constant::Long(v)) => format!("{}L", v),
        Ok(Constant::Double(bits)) => format!("{}D", f64::from_bits(*bits)),
        Ok(Constant::String { value }) => format!("{:?}", pool.utf8_lossy(*value)),
        Ok(Constant::Class { .. }) => format!("L{};", class_label(pool, index)),
        _ => format!("#{}", index),
    }
}

fn render_insn(insn: &Insn, pool: &ConstantPool, name_of: &dyn Fn(&InsnId) -> String) -> String {
    let mnemonic = insn
        .opcode()
        .map(|op| opcodes::mnemonic(op).to_uppercase())
        .unwrap_or_default();
    match insn {
        Insn::Push { value, .. } => format!("{} {}", mnemonic, value),
        Insn::Ldc { index, .. } => format!("{} {}", mnemonic, constant_label(pool, *index)),
        Insn::Var { index, .. } => match insn.opcode() {
            // Short forms already carry the index in the mnemonic
            Some(op) if crate::insn::expand_short_var(op).is_some() => mnemonic,
            _ => format!("{} {}", mnemonic, index),
        },
        Insn::Iinc { index, delta, .. } => format!("{} {} {}", mnemonic, index, delta),
        Insn::Jump { target, .. } => format!("{} {}", mnemonic, name_of(target)),
        Insn::TableSwitch {
            default,
            low,
            targets,
            ..
        } => {
            let mut s = mnemonic;
            for (i, t) in targets.iter().enumerate() {
                let _ = write!(s, "\n      {}: {}", *low as i64 + i as i64, name_of(t));
            }
            let _ = write!(s, "\n      default: {}", name_of(default));
            s
        }
        Insn::LookupSwitch { default, pairs } => {
            let mut s = mnemonic;
            for (key, t) in pairs {
                let _ = write!(s, "\n      {}: {}", key, name_of(t));
            }
            let _ = write!(s, "\n      default: {}", name_of(default));
            s
        }
        Insn::Field { field, .. } => format!("{} {}", mnemonic, member_label(pool, *field, true)),
        Insn::Invoke { method, mode } => match mode {
            crate::insn::InvokeMode::Dynamic => match pool.dynamic_name_and_type(*method) {
                Ok((name, desc)) => format!(
                    "{} {}{}",
                    mnemonic,
                    String::from_utf8_lossy(name),
                    String::from_utf8_lossy(desc)
                ),
                Err(_) => format!("{} #{}", mnemonic, method),
            },
            _ => format!("{} {}", mnemonic, member_label(pool, *method, false)),
        },
        Insn::Type { class, .. } => format!("{} {}", mnemonic, class_label(pool, *class)),
        Insn::NewArray { atype } => format!("{} {}", mnemonic, array_type(*atype)),
        Insn::MultiANewArray { class, dims } => {
            format!("{} {} {}", mnemonic, class_label(pool, *class), dims)
        }
        _ => mnemonic,
    }
}

fn array_type(atype: u8) -> &'static str {
    match atype {
        4 => "T_BOOLEAN",
        5 => "T_CHAR",
        6 => "T_FLOAT",
        7 => "T_DOUBLE",
        8 => "T_BYTE",
        9 => "T_SHORT",
        10 => "T_INT",
        11 => "T_LONG",
        _ => "T_?",
    }
}
