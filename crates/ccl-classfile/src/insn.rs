//! Instruction model and the editable instruction list.
//!
//! `InsnList` is an arena of nodes linked through explicit `prev`/`next`
//! indices. An `InsnId` stays valid for the lifetime of the list, so callers
//! can snapshot the ids, walk them, and insert new nodes before any of them
//! without invalidating the rest of the walk.

use crate::opcodes;

/// Stable handle of a node inside one `InsnList`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InsnId(u32);

impl InsnId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Get,
    Put,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Static,
    Instance,
}

/// The four field instructions as a `(mode, scope)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldAccess {
    pub mode: AccessMode,
    pub scope: Scope,
}

impl FieldAccess {
    pub const GET_STATIC: Self = Self {
        mode: AccessMode::Get,
        scope: Scope::Static,
    };
    pub const PUT_STATIC: Self = Self {
        mode: AccessMode::Put,
        scope: Scope::Static,
    };
    pub const GET_FIELD: Self = Self {
        mode: AccessMode::Get,
        scope: Scope::Instance,
    };
    pub const PUT_FIELD: Self = Self {
        mode: AccessMode::Put,
        scope: Scope::Instance,
    };

    pub fn opcode(self) -> u8 {
        match (self.mode, self.scope) {
            (AccessMode::Get, Scope::Static) => opcodes::GETSTATIC,
            (AccessMode::Put, Scope::Static) => opcodes::PUTSTATIC,
            (AccessMode::Get, Scope::Instance) => opcodes::GETFIELD,
            (AccessMode::Put, Scope::Instance) => opcodes::PUTFIELD,
        }
    }

    pub fn from_opcode(opcode: u8) -> Option<Self> {
        Some(match opcode {
            opcodes::GETSTATIC => Self::GET_STATIC,
            opcodes::PUTSTATIC => Self::PUT_STATIC,
            opcodes::GETFIELD => Self::GET_FIELD,
            opcodes::PUTFIELD => Self::PUT_FIELD,
            _ => return None,
        })
    }

    pub fn with_scope(self, scope: Scope) -> Self {
        Self { scope, ..self }
    }
}

/// Dispatch mode of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokeMode {
    Virtual,
    Special,
    Static,
    /// `count` is the historical argument-slot byte, kept for exact round trips
    Interface { count: u8 },
    Dynamic,
}

impl InvokeMode {
    pub fn opcode(self) -> u8 {
        match self {
            InvokeMode::Virtual => opcodes::INVOKEVIRTUAL,
            InvokeMode::Special => opcodes::INVOKESPECIAL,
            InvokeMode::Static => opcodes::INVOKESTATIC,
            InvokeMode::Interface { .. } => opcodes::INVOKEINTERFACE,
            InvokeMode::Dynamic => opcodes::INVOKEDYNAMIC,
        }
    }

    /// Whether the call consumes a receiver beneath its arguments.
    pub fn has_receiver(self) -> bool {
        !matches!(self, InvokeMode::Static | InvokeMode::Dynamic)
    }
}

/// Operand-stack shuffling primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackOp {
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
}

impl StackOp {
    pub fn opcode(self) -> u8 {
        match self {
            StackOp::Pop => opcodes::POP,
            StackOp::Pop2 => opcodes::POP2,
            StackOp::Dup => opcodes::DUP,
            StackOp::DupX1 => opcodes::DUP_X1,
            StackOp::DupX2 => opcodes::DUP_X2,
            StackOp::Dup2 => opcodes::DUP2,
            StackOp::Dup2X1 => opcodes::DUP2_X1,
            StackOp::Dup2X2 => opcodes::DUP2_X2,
            StackOp::Swap => opcodes::SWAP,
        }
    }

    pub fn from_opcode(opcode: u8) -> Option<Self> {
        Some(match opcode {
            opcodes::POP => StackOp::Pop,
            opcodes::POP2 => StackOp::Pop2,
            opcodes::DUP => StackOp::Dup,
            opcodes::DUP_X1 => StackOp::DupX1,
            opcodes::DUP_X2 => StackOp::DupX2,
            opcodes::DUP2 => StackOp::Dup2,
            opcodes::DUP2_X1 => StackOp::Dup2X1,
            opcodes::DUP2_X2 => StackOp::Dup2X2,
            opcodes::SWAP => StackOp::Swap,
            _ => return None,
        })
    }

    /// Net change in stack slots.
    pub fn delta(self) -> i32 {
        match self {
            StackOp::Pop => -1,
            StackOp::Pop2 => -2,
            StackOp::Dup | StackOp::DupX1 | StackOp::DupX2 => 1,
            StackOp::Dup2 | StackOp::Dup2X1 | StackOp::Dup2X2 => 2,
            StackOp::Swap => 0,
        }
    }

    /// Slots that must already be on the stack.
    pub fn required(self) -> i32 {
        match self {
            StackOp::Pop | StackOp::Dup => 1,
            StackOp::Pop2 | StackOp::DupX1 | StackOp::Dup2 | StackOp::Swap => 2,
            StackOp::DupX2 | StackOp::Dup2X1 => 3,
            StackOp::Dup2X2 => 4,
        }
    }
}

/// How a local-variable instruction was encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarForm {
    /// `iload_0` .. `astore_3`
    Short,
    /// One-byte index operand
    Normal,
    /// `wide` prefix with a two-byte index
    Wide,
}

impl VarForm {
    /// Smallest encoding able to carry `index`.
    pub fn for_index(opcode: u8, index: u16) -> Self {
        if index <= 3 && opcode != opcodes::RET {
            VarForm::Short
        } else if index <= u8::MAX as u16 {
            VarForm::Normal
        } else {
            VarForm::Wide
        }
    }

    /// This form if it can carry `index`, otherwise the smallest one that can.
    pub fn fit(self, opcode: u8, index: u16) -> Self {
        let fits = match self {
            VarForm::Short => index <= 3 && opcode != opcodes::RET,
            VarForm::Normal => index <= u8::MAX as u16,
            VarForm::Wide => true,
        };
        if fits {
            self
        } else {
            VarForm::for_index(opcode, index)
        }
    }
}

/// One instruction, or a zero-width label position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insn {
    /// Position marker referenced by branches, handlers, frames and debug tables
    Label,
    /// Any instruction without operands that is not a stack shuffle
    Op(u8),
    Stack(StackOp),
    /// `bipush` / `sipush`
    Push { opcode: u8, value: i16 },
    /// `ldc` / `ldc_w` / `ldc2_w`
    Ldc { opcode: u8, index: u16 },
    /// Loads, stores and `ret`; `opcode` is always the indexed form (`iload`, not `iload_0`)
    Var { opcode: u8, index: u16, form: VarForm },
    Iinc { index: u16, delta: i16, wide: bool },
    /// Conditional and unconditional branches, `jsr`, and their wide forms
    Jump { opcode: u8, target: InsnId },
    TableSwitch {
        default: InsnId,
        low: i32,
        high: i32,
        targets: Vec<InsnId>,
    },
    LookupSwitch {
        default: InsnId,
        pairs: Vec<(i32, InsnId)>,
    },
    Field { access: FieldAccess, field: u16 },
    Invoke { mode: InvokeMode, method: u16 },
    /// `new` / `anewarray` / `checkcast` / `instanceof`
    Type { opcode: u8, class: u16 },
    NewArray { atype: u8 },
    MultiANewArray { class: u16, dims: u8 },
}

impl Insn {
    /// Build a local-variable instruction in its smallest encoding.
    pub fn var(opcode: u8, index: u16) -> Self {
        Insn::Var {
            opcode,
            index,
            form: VarForm::for_index(opcode, index),
        }
    }

    pub fn is_label(&self) -> bool {
        matches!(self, Insn::Label)
    }

    /// Opcode this instruction encodes to (`None` for labels).
    pub fn opcode(&self) -> Option<u8> {
        Some(match self {
            Insn::Label => return None,
            Insn::Op(op) => *op,
            Insn::Stack(op) => op.opcode(),
            Insn::Push { opcode, .. }
            | Insn::Ldc { opcode, .. }
            | Insn::Jump { opcode, .. }
            | Insn::Type { opcode, .. } => *opcode,
            Insn::Var {
                opcode,
                index,
                form,
            } => match form.fit(*opcode, *index) {
                VarForm::Short => short_var_opcode(*opcode, *index),
                _ => *opcode,
            },
            Insn::Iinc { .. } => opcodes::IINC,
            Insn::TableSwitch { .. } => opcodes::TABLESWITCH,
            Insn::LookupSwitch { .. } => opcodes::LOOKUPSWITCH,
            Insn::Field { access, .. } => access.opcode(),
            Insn::Invoke { mode, .. } => mode.opcode(),
            Insn::NewArray { .. } => opcodes::NEWARRAY,
            Insn::MultiANewArray { .. } => opcodes::MULTIANEWARRAY,
        })
    }

    /// Labels this instruction may transfer control to.
    pub fn branch_targets(&self) -> Vec<InsnId> {
        match self {
            Insn::Jump { target, .. } => vec![*target],
            Insn::TableSwitch {
                default, targets, ..
            } => std::iter::once(*default)
                .chain(targets.iter().copied())
                .collect(),
            Insn::LookupSwitch { default, pairs } => std::iter::once(*default)
                .chain(pairs.iter().map(|(_, t)| *t))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// `iload_0`-style opcode for an indexed load/store with index 0..=3.
pub fn short_var_opcode(opcode: u8, index: u16) -> u8 {
    let index = index as u8;
    if (opcodes::ILOAD..=opcodes::ALOAD).contains(&opcode) {
        opcodes::ILOAD_0 + (opcode - opcodes::ILOAD) * 4 + index
    } else {
        opcodes::ISTORE_0 + (opcode - opcodes::ISTORE) * 4 + index
    }
}

/// Split a short-form opcode back into its indexed opcode and index.
pub fn expand_short_var(opcode: u8) -> Option<(u8, u16)> {
    match opcode {
        opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
            let rel = opcode - opcodes::ILOAD_0;
            Some((opcodes::ILOAD + rel / 4, (rel % 4) as u16))
        }
        opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
            let rel = opcode - opcodes::ISTORE_0;
            Some((opcodes::ISTORE + rel / 4, (rel % 4) as u16))
        }
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Node {
    insn: Insn,
    prev: Option<InsnId>,
    next: Option<InsnId>,
}

/// Ordered, editable instruction sequence of one method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsnList {
    nodes: Vec<Node>,
    head: Option<InsnId>,
    tail: Option<InsnId>,
    modified: bool,
}

impl InsnList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes, labels included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether the list changed since it was decoded.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub(crate) fn mark_clean(&mut self) {
        self.modified = false;
    }

    pub fn contains(&self, id: InsnId) -> bool {
        id.index() < self.nodes.len()
    }

    pub fn get(&self, id: InsnId) -> Option<&Insn> {
        self.nodes.get(id.index()).map(|n| &n.insn)
    }

    pub fn first(&self) -> Option<InsnId> {
        self.head
    }

    pub fn last(&self) -> Option<InsnId> {
        self.tail
    }

    pub fn next(&self, id: InsnId) -> Option<InsnId> {
        self.nodes.get(id.index()).and_then(|n| n.next)
    }

    pub fn prev(&self, id: InsnId) -> Option<InsnId> {
        self.nodes.get(id.index()).and_then(|n| n.prev)
    }

    /// Ids in list order.
    pub fn ids(&self) -> Vec<InsnId> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    fn alloc(&mut self, insn: Insn) -> InsnId {
        let id = InsnId(self.nodes.len() as u32);
        self.nodes.push(Node {
            insn,
            prev: None,
            next: None,
        });
        id
    }

    /// Append at the end.
    pub fn push(&mut self, insn: Insn) -> InsnId {
        let id = self.alloc(insn);
        match self.tail {
            Some(tail) => {
                self.nodes[tail.index()].next = Some(id);
                self.nodes[id.index()].prev = Some(tail);
            }
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.modified = true;
        id
    }

    /// Insert immediately before `at`. Returns `None` if `at` is not in this list.
    pub fn insert_before(&mut self, at: InsnId, insn: Insn) -> Option<InsnId> {
        if !self.contains(at) {
            return None;
        }
        let prev = self.nodes[at.index()].prev;
        let id = self.alloc(insn);
        self.nodes[id.index()].prev = prev;
        self.nodes[id.index()].next = Some(at);
        self.nodes[at.index()].prev = Some(id);
        match prev {
            Some(p) => self.nodes[p.index()].next = Some(id),
            None => self.head = Some(id),
        }
        self.modified = true;
        Some(id)
    }

    /// Insert a sequence before `at`, keeping its order.
    pub fn insert_all_before(
        &mut self,
        at: InsnId,
        insns: impl IntoIterator<Item = Insn>,
    ) -> Option<Vec<InsnId>> {
        if !self.contains(at) {
            return None;
        }
        let mut ids = Vec::new();
        for insn in insns {
            ids.extend(self.insert_before(at, insn));
        }
        Some(ids)
    }

    /// Replace the instruction at `id`, returning the previous one.
    pub fn replace(&mut self, id: InsnId, insn: Insn) -> Option<Insn> {
        let node = self.nodes.get_mut(id.index())?;
        self.modified = true;
        Some(std::mem::replace(&mut node.insn, insn))
    }
}

pub struct Iter<'a> {
    list: &'a InsnList,
    cursor: Option<InsnId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (InsnId, &'a Insn);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let node = &self.list.nodes[id.index()];
        self.cursor = node.next;
        Some((id, &node.insn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opcodes_of(list: &InsnList) -> Vec<u8> {
        list.iter().filter_map(|(_, i)| i.opcode()).collect()
    }

    #[test]
    fn test_insert_before_head_and_middle() {
        let mut list = InsnList::new();
        let a = list.push(Insn::Op(opcodes::ICONST_0));
        let b = list.push(Insn::Op(opcodes::IRETURN));
        list.insert_before(b, Insn::Op(opcodes::NOP)).unwrap();
        list.insert_before(a, Insn::Op(opcodes::ACONST_NULL)).unwrap();
        assert_eq!(
            opcodes_of(&list),
            vec![opcodes::ACONST_NULL, opcodes::ICONST_0, opcodes::NOP, opcodes::IRETURN]
        );
        assert_eq!(list.prev(list.first().unwrap()), None);
        assert_eq!(list.last(), Some(b));
    }

    #[test]
    fn test_ids_stay_valid_while_inserting() {
        let mut list = InsnList::new();
        for _ in 0..3 {
            list.push(Insn::Op(opcodes::NOP));
        }
        let snapshot = list.ids();
        for id in &snapshot {
            list.insert_before(*id, Insn::Stack(StackOp::Swap)).unwrap();
        }
        assert_eq!(list.len(), 6);
        for id in snapshot {
            assert_eq!(list.get(id), Some(&Insn::Op(opcodes::NOP)));
            assert_eq!(list.get(list.prev(id).unwrap()), Some(&Insn::Stack(StackOp::Swap)));
        }
    }

    #[test]
    fn test_insert_before_foreign_id_fails() {
        let mut list = InsnList::new();
        list.push(Insn::Op(opcodes::NOP));
        assert!(list.insert_before(InsnId(7), Insn::Op(opcodes::NOP)).is_none());
    }

    #[test]
    fn test_short_var_opcodes() {
        assert_eq!(short_var_opcode(opcodes::ALOAD, 0), opcodes::ALOAD_0);
        assert_eq!(short_var_opcode(opcodes::DSTORE, 3), opcodes::DSTORE_3);
        assert_eq!(expand_short_var(opcodes::LLOAD_2), Some((opcodes::LLOAD, 2)));
        assert_eq!(expand_short_var(opcodes::ASTORE_1), Some((opcodes::ASTORE, 1)));
        assert_eq!(expand_short_var(opcodes::IALOAD), None);
        assert_eq!(Insn::var(opcodes::ILOAD, 2).opcode(), Some(opcodes::ILOAD_2));
        assert_eq!(Insn::var(opcodes::ILOAD, 300).opcode(), Some(opcodes::ILOAD));
    }

    #[test]
    fn test_field_access_opcodes() {
        let get = FieldAccess::from_opcode(opcodes::GETSTATIC).unwrap();
        assert_eq!(get.with_scope(Scope::Instance).opcode(), opcodes::GETFIELD);
        assert_eq!(FieldAccess::PUT_STATIC.with_scope(Scope::Instance), FieldAccess::PUT_FIELD);
    }
}
