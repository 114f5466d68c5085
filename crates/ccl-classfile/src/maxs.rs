//! `max_stack` / `max_locals` recomputation for edited methods.
//!
//! Stack heights are propagated over the control-flow graph with a worklist.
//! A block is revisited whenever it is reached with a greater height than
//! before, so the result is the largest height any path can produce.

use crate::code::Code;
use crate::constant_pool::ConstantPool;
use crate::descriptor::{field_slots, MethodDescriptor};
use crate::error::{ClassFileError, Result};
use crate::insn::{AccessMode, Insn, InsnId, InsnList, InvokeMode, Scope};
use crate::opcodes::{self, *};

/// Stack slots an instruction pops and pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackEffect {
    pub pop: u16,
    pub push: u16,
}

impl StackEffect {
    const fn new(pop: u16, push: u16) -> Self {
        Self { pop, push }
    }

    pub fn delta(self) -> i32 {
        self.push as i32 - self.pop as i32
    }
}

/// Stack effect of `insn`, resolving member descriptors through `pool`.
pub fn stack_effect(insn: &Insn, pool: &ConstantPool) -> Result<StackEffect> {
    Ok(match insn {
        Insn::Label => StackEffect::new(0, 0),
        Insn::Op(op) => op_effect(*op),
        Insn::Stack(op) => {
            let required = op.required() as u16;
            StackEffect::new(required, (required as i32 + op.delta()) as u16)
        }
        Insn::Push { .. } => StackEffect::new(0, 1),
        Insn::Ldc { opcode, .. } => StackEffect::new(0, if *opcode == LDC2_W { 2 } else { 1 }),
        Insn::Var { opcode, .. } => match *opcode {
            LLOAD | DLOAD => StackEffect::new(0, 2),
            ILOAD | FLOAD | ALOAD => StackEffect::new(0, 1),
            LSTORE | DSTORE => StackEffect::new(2, 0),
            ISTORE | FSTORE | ASTORE => StackEffect::new(1, 0),
            _ => StackEffect::new(0, 0),
        },
        Insn::Iinc { .. } => StackEffect::new(0, 0),
        Insn::Jump { opcode, .. } => match *opcode {
            IFEQ..=IFLE | IFNULL | IFNONNULL => StackEffect::new(1, 0),
            IF_ICMPEQ..=IF_ACMPNE => StackEffect::new(2, 0),
            // The return address is only on the stack at the subroutine entry
            _ => StackEffect::new(0, 0),
        },
        Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => StackEffect::new(1, 0),
        Insn::Field { access, field } => {
            let slots = field_slots(pool.member_ref(*field)?.descriptor)?;
            let receiver = u16::from(access.scope == Scope::Instance);
            match access.mode {
                AccessMode::Get => StackEffect::new(receiver, slots),
                AccessMode::Put => StackEffect::new(receiver + slots, 0),
            }
        }
        Insn::Invoke { mode, method } => {
            let descriptor = match mode {
                InvokeMode::Dynamic => pool.dynamic_name_and_type(*method)?.1,
                _ => pool.member_ref(*method)?.descriptor,
            };
            let parsed = MethodDescriptor::parse(descriptor)?;
            let receiver = u16::from(mode.has_receiver());
            StackEffect::new(parsed.param_slots() + receiver, parsed.return_slots())
        }
        Insn::Type { opcode, .. } => {
            if *opcode == NEW {
                StackEffect::new(0, 1)
            } else {
                StackEffect::new(1, 1)
            }
        }
        Insn::NewArray { .. } => StackEffect::new(1, 1),
        Insn::MultiANewArray { dims, .. } => StackEffect::new(*dims as u16, 1),
    })
}

fn op_effect(op: u8) -> StackEffect {
    let (pop, push) = match op {
        NOP => (0, 0),
        ACONST_NULL..=ICONST_5 | FCONST_0..=FCONST_2 => (0, 1),
        LCONST_0 | LCONST_1 | DCONST_0 | DCONST_1 => (0, 2),
        IALOAD | FALOAD | AALOAD | BALOAD | CALOAD | SALOAD => (2, 1),
        LALOAD | DALOAD => (2, 2),
        IASTORE | FASTORE | AASTORE | BASTORE | CASTORE | SASTORE => (3, 0),
        LASTORE | DASTORE => (4, 0),
        // add, sub, mul, div, rem cycle through int, long, float, double
        IADD..=DREM => {
            if (op - IADD) % 2 == 1 {
                (4, 2)
            } else {
                (2, 1)
            }
        }
        INEG | FNEG => (1, 1),
        LNEG | DNEG => (2, 2),
        ISHL | ISHR | IUSHR => (2, 1),
        LSHL | LSHR | LUSHR => (3, 2),
        IAND | IOR | IXOR => (2, 1),
        LAND | LOR | LXOR => (4, 2),
        I2L | I2D | F2L | F2D => (1, 2),
        I2F | F2I | I2B | I2C | I2S => (1, 1),
        L2I | L2F | D2I | D2F => (2, 1),
        L2D | D2L => (2, 2),
        LCMP | DCMPL | DCMPG => (4, 1),
        FCMPL | FCMPG => (2, 1),
        IRETURN | FRETURN | ARETURN => (1, 0),
        LRETURN | DRETURN => (2, 0),
        ARRAYLENGTH => (1, 1),
        ATHROW | MONITORENTER | MONITOREXIT => (1, 0),
        _ => (0, 0),
    };
    StackEffect::new(pop, push)
}

/// Successors of the instruction at `pos` as `(position, height)` pairs.
fn successors(
    insn: &Insn,
    pos: usize,
    height: u32,
    positions: &[Option<usize>],
    len: usize,
) -> Result<Vec<(usize, u32)>> {
    let resolve = |label: InsnId| -> Result<usize> {
        positions
            .get(label.index())
            .copied()
            .flatten()
            .ok_or(ClassFileError::DanglingLabel)
    };
    let mut out = Vec::new();
    match insn {
        Insn::Jump { opcode, target } => match *opcode {
            GOTO | GOTO_W => out.push((resolve(*target)?, height)),
            JSR | JSR_W => {
                out.push((resolve(*target)?, height + 1));
                out.push((pos + 1, height));
            }
            _ => {
                out.push((resolve(*target)?, height));
                out.push((pos + 1, height));
            }
        },
        Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => {
            for target in insn.branch_targets() {
                out.push((resolve(target)?, height));
            }
        }
        other => match other.opcode() {
            Some(op) if opcodes::ends_flow(op) => {}
            _ => out.push((pos + 1, height)),
        },
    }
    out.retain(|(p, _)| *p < len);
    Ok(out)
}

fn max_stack(list: &InsnList, handlers: &[InsnId], pool: &ConstantPool) -> Result<u16> {
    let order: Vec<(InsnId, &Insn)> = list.iter().collect();
    let mut positions = vec![None; list.len()];
    for (pos, (id, _)) in order.iter().enumerate() {
        positions[id.index()] = Some(pos);
    }

    let mut heights: Vec<Option<u32>> = vec![None; order.len()];
    let mut worklist = Vec::new();
    let enqueue = |pos: usize, height: u32, heights: &mut [Option<u32>], worklist: &mut Vec<usize>| {
        if heights[pos].map_or(true, |h| height > h) {
            heights[pos] = Some(height);
            worklist.push(pos);
        }
    };
    if !order.is_empty() {
        enqueue(0, 0, &mut heights, &mut worklist);
    }
    for handler in handlers {
        let pos = positions
            .get(handler.index())
            .copied()
            .flatten()
            .ok_or(ClassFileError::DanglingLabel)?;
        enqueue(pos, 1, &mut heights, &mut worklist);
    }

    let mut max = 0u32;
    while let Some(pos) = worklist.pop() {
        let Some(height) = heights[pos] else { continue };
        max = max.max(height);
        let insn = order[pos].1;
        let effect = stack_effect(insn, pool)?;
        if height < effect.pop as u32 {
            return Err(ClassFileError::StackUnderflow {
                mnemonic: insn.opcode().map_or("label", opcodes::mnemonic),
            });
        }
        let after = height - effect.pop as u32 + effect.push as u32;
        if after > u16::MAX as u32 {
            return Err(ClassFileError::TooLarge {
                what: "operand stack",
                size: after as usize,
            });
        }
        max = max.max(after);
        for (next, h) in successors(insn, pos, after, &positions, order.len())? {
            enqueue(next, h, &mut heights, &mut worklist);
        }
    }
    Ok(max as u16)
}

fn max_locals(list: &InsnList, is_static: bool, descriptor: &[u8]) -> Result<u16> {
    let args = MethodDescriptor::parse(descriptor)?.param_slots() as u32 + u32::from(!is_static);
    let mut max = args;
    for (_, insn) in list.iter() {
        let end = match insn {
            Insn::Var { opcode, index, .. } => {
                let width = match *opcode {
                    LLOAD | DLOAD | LSTORE | DSTORE => 2,
                    _ => 1,
                };
                *index as u32 + width
            }
            Insn::Iinc { index, .. } => *index as u32 + 1,
            _ => continue,
        };
        max = max.max(end);
    }
    u16::try_from(max).map_err(|_| ClassFileError::TooLarge {
        what: "local variables",
        size: max as usize,
    })
}

/// Recompute `(max_stack, max_locals)` for a method body.
pub fn compute_maxs(
    code: &Code,
    pool: &ConstantPool,
    is_static: bool,
    descriptor: &[u8],
) -> Result<(u16, u16)> {
    let handlers: Vec<InsnId> = code.handlers.iter().map(|h| h.handler).collect();
    Ok((
        max_stack(&code.insns, &handlers, pool)?,
        max_locals(&code.insns, is_static, descriptor)?,
    ))
}
