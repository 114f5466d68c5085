//! `Code` attribute decoding and encoding.
//!
//! Decoding turns bytecode offsets into `Label` nodes so that edits to the
//! instruction list carry branch targets, exception ranges, debug tables and
//! stack map frames along with them. Encoding assigns fresh offsets and
//! writes every offset-bearing structure back out.
//!
//! A `Code` that was decoded and never edited keeps its original attribute
//! bytes and writes them back untouched.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::bytes::{put_i4, put_u1, put_u2, put_u4, u2_len, u4_len, ByteReader};
use crate::constant_pool::ConstantPool;
use crate::error::{ClassFileError, Result};
use crate::insn::{expand_short_var, FieldAccess, Insn, InsnId, InsnList, InvokeMode, StackOp, VarForm};
use crate::opcodes;

const MAX_CODE_LENGTH: usize = 65_535;

/// A class-file attribute kept as opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    /// Constant pool index of the attribute name
    pub name: u16,
    pub data: Vec<u8>,
}

impl RawAttribute {
    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let name = r.u2()?;
        let len = r.u4()? as usize;
        Ok(Self {
            name,
            data: r.bytes(len)?.to_vec(),
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        put_u2(out, self.name);
        put_u4(out, u4_len(self.data.len(), "attribute")?);
        out.extend_from_slice(&self.data);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start: InsnId,
    /// Exclusive
    pub end: InsnId,
    pub handler: InsnId,
    /// `0` catches everything
    pub catch_type: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineNumber {
    pub start: InsnId,
    pub line: u16,
}

/// Entry of a `LocalVariableTable` or `LocalVariableTypeTable`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    pub start: InsnId,
    pub end: InsnId,
    pub name: u16,
    /// Descriptor, or signature for the type table
    pub descriptor: u16,
    pub index: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    Object(u16),
    /// Value created by the `new` at this label
    Uninitialized(InsnId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    Same,
    SameLocals1(VerificationType),
    Chop(u8),
    Append(Vec<VerificationType>),
    Full {
        locals: Vec<VerificationType>,
        stack: Vec<VerificationType>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapFrame {
    pub label: InsnId,
    pub kind: FrameKind,
    /// Written with the two-byte delta form even when a short one would fit
    pub extended: bool,
}

/// Attributes nested inside `Code`, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeAttribute {
    LineNumbers {
        name: u16,
        entries: Vec<LineNumber>,
    },
    LocalVariables {
        name: u16,
        entries: Vec<LocalVariable>,
    },
    LocalVariableTypes {
        name: u16,
        entries: Vec<LocalVariable>,
    },
    StackMap {
        name: u16,
        frames: Vec<StackMapFrame>,
    },
    /// Carries bytecode offsets this codec does not model; dropped once the code changes.
    OffsetBound(RawAttribute),
    Other(RawAttribute),
}

/// A decoded `Code` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    /// Constant pool index of the `"Code"` name
    pub name: u16,
    pub max_stack: u16,
    pub max_locals: u16,
    pub insns: InsnList,
    pub handlers: Vec<ExceptionHandler>,
    pub attributes: Vec<CodeAttribute>,
    original: Option<Vec<u8>>,
}

impl Code {
    /// A fresh, unencoded body. Always counts as modified.
    pub fn new(name: u16, insns: InsnList) -> Self {
        Self {
            name,
            max_stack: 0,
            max_locals: 0,
            insns,
            handlers: Vec::new(),
            attributes: Vec::new(),
            original: None,
        }
    }

    /// Whether encoding has to rebuild the attribute instead of copying it.
    pub fn is_modified(&self) -> bool {
        self.original.is_none() || self.insns.is_modified()
    }

    /// Attribute body exactly as it was read, while the code is unmodified.
    pub fn original_bytes(&self) -> Option<&[u8]> {
        if self.insns.is_modified() {
            None
        } else {
            self.original.as_deref()
        }
    }

    /// Forget the original bytes so the next encode rebuilds the attribute.
    pub fn mark_modified(&mut self) {
        self.original = None;
    }

    pub fn stack_map_frames(&self) -> impl Iterator<Item = &StackMapFrame> {
        self.attributes.iter().flat_map(|a| match a {
            CodeAttribute::StackMap { frames, .. } => frames.as_slice(),
            _ => &[],
        })
    }

    pub fn line_numbers(&self) -> impl Iterator<Item = &LineNumber> {
        self.attributes.iter().flat_map(|a| match a {
            CodeAttribute::LineNumbers { entries, .. } => entries.as_slice(),
            _ => &[],
        })
    }

    /// Decode the body of a `Code` attribute (everything after its length).
    pub fn decode(name: u16, data: &[u8], pool: &ConstantPool) -> Result<Self> {
        let mut r = ByteReader::new(data);
        let max_stack = r.u2()?;
        let max_locals = r.u2()?;
        let code_len = r.u4()? as usize;
        let bytecode = r.bytes(code_len)?;

        let mut builder = LabelBuilder::decode_instructions(bytecode)?;

        let handler_count = r.u2()?;
        let mut handlers = Vec::with_capacity(handler_count as usize);
        for _ in 0..handler_count {
            let start = builder.label(r.u2()? as i64, "exception range")?;
            let end = builder.label(r.u2()? as i64, "exception range")?;
            let handler = builder.label(r.u2()? as i64, "exception handler")?;
            handlers.push(ExceptionHandler {
                start,
                end,
                handler,
                catch_type: r.u2()?,
            });
        }

        let attr_count = r.u2()?;
        let mut attributes = Vec::with_capacity(attr_count as usize);
        for _ in 0..attr_count {
            let raw = RawAttribute::decode(&mut r)?;
            attributes.push(decode_code_attribute(raw, pool, &mut builder)?);
        }
        if !r.is_empty() {
            return Err(ClassFileError::AttributeLength {
                name: "Code".to_string(),
            });
        }

        let mut insns = builder.finish();
        insns.mark_clean();
        Ok(Self {
            name,
            max_stack,
            max_locals,
            insns,
            handlers,
            attributes,
            original: Some(data.to_vec()),
        })
    }

    /// Write the full attribute (name, length, body) with the given maxima.
    pub fn encode(&self, out: &mut Vec<u8>, max_stack: u16, max_locals: u16) -> Result<()> {
        let body = self.encode_body(max_stack, max_locals)?;
        put_u2(out, self.name);
        put_u4(out, u4_len(body.len(), "Code attribute")?);
        out.extend_from_slice(&body);
        Ok(())
    }

    /// Write the original attribute, which must still be available.
    pub fn encode_original(&self, out: &mut Vec<u8>) -> Result<bool> {
        let Some(body) = self.original_bytes() else {
            return Ok(false);
        };
        put_u2(out, self.name);
        put_u4(out, u4_len(body.len(), "Code attribute")?);
        out.extend_from_slice(body);
        Ok(true)
    }

    fn encode_body(&self, max_stack: u16, max_locals: u16) -> Result<Vec<u8>> {
        let has_frames = self
            .attributes
            .iter()
            .any(|a| matches!(a, CodeAttribute::StackMap { .. }));
        let offsets = Offsets::assign(&self.insns, has_frames)?;
        let bytecode = offsets.write_code(&self.insns)?;

        let mut out = Vec::with_capacity(bytecode.len() + 64);
        put_u2(&mut out, max_stack);
        put_u2(&mut out, max_locals);
        put_u4(&mut out, bytecode.len() as u32);
        out.extend_from_slice(&bytecode);

        put_u2(&mut out, u2_len(self.handlers.len(), "exception table")?);
        for h in &self.handlers {
            put_u2(&mut out, offsets.pc(h.start)?);
            put_u2(&mut out, offsets.pc(h.end)?);
            put_u2(&mut out, offsets.pc(h.handler)?);
            put_u2(&mut out, h.catch_type);
        }

        let kept: Vec<&CodeAttribute> = self
            .attributes
            .iter()
            .filter(|a| {
                if let CodeAttribute::OffsetBound(raw) = a {
                    debug!(name_index = raw.name, "dropping offset-bound code attribute");
                    false
                } else {
                    true
                }
            })
            .collect();
        put_u2(&mut out, u2_len(kept.len(), "code attributes")?);
        for attr in kept {
            encode_code_attribute(attr, &offsets, &mut out)?;
        }
        Ok(out)
    }
}

fn decode_code_attribute(
    raw: RawAttribute,
    pool: &ConstantPool,
    builder: &mut LabelBuilder,
) -> Result<CodeAttribute> {
    let name = pool.utf8(raw.name).unwrap_or(b"");
    match name {
        b"LineNumberTable" | b"LocalVariableTable" | b"LocalVariableTypeTable" | b"StackMapTable" => {}
        b"RuntimeVisibleTypeAnnotations" | b"RuntimeInvisibleTypeAnnotations" | b"StackMap" => {
            return Ok(CodeAttribute::OffsetBound(raw));
        }
        _ => return Ok(CodeAttribute::Other(raw)),
    }
    let mut r = ByteReader::new(&raw.data);
    let attr = match name {
        b"LineNumberTable" => {
            let count = r.u2()?;
            let mut entries = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let pc = r.u2()?;
                let line = r.u2()?;
                match builder.label_lenient(pc as i64) {
                    Some(start) => entries.push(LineNumber { start, line }),
                    None => trace!(pc, line, "dropping line number with bad offset"),
                }
            }
            CodeAttribute::LineNumbers {
                name: raw.name,
                entries,
            }
        }
        b"LocalVariableTable" | b"LocalVariableTypeTable" => {
            let count = r.u2()?;
            let mut entries = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let pc = r.u2()? as i64;
                let len = r.u2()? as i64;
                let var_name = r.u2()?;
                let descriptor = r.u2()?;
                let index = r.u2()?;
                match (builder.label_lenient(pc), builder.label_lenient(pc + len)) {
                    (Some(start), Some(end)) => entries.push(LocalVariable {
                        start,
                        end,
                        name: var_name,
                        descriptor,
                        index,
                    }),
                    _ => trace!(pc, len, index, "dropping local variable with bad range"),
                }
            }
            if name == b"LocalVariableTable" {
                CodeAttribute::LocalVariables {
                    name: raw.name,
                    entries,
                }
            } else {
                CodeAttribute::LocalVariableTypes {
                    name: raw.name,
                    entries,
                }
            }
        }
        b"StackMapTable" => {
            let count = r.u2()?;
            let mut frames = Vec::with_capacity(count as usize);
            let mut offset: i64 = -1;
            for _ in 0..count {
                let (delta, kind, extended) = decode_frame(&mut r, builder)?;
                offset += delta as i64 + 1;
                let label = builder.label(offset, "stack map frame")?;
                frames.push(StackMapFrame {
                    label,
                    kind,
                    extended,
                });
            }
            CodeAttribute::StackMap {
                name: raw.name,
                frames,
            }
        }
        _ => unreachable!("attribute kinds filtered above"),
    };
    if !r.is_empty() {
        return Err(ClassFileError::AttributeLength {
            name: String::from_utf8_lossy(name).into_owned(),
        });
    }
    Ok(attr)
}

fn decode_frame(
    r: &mut ByteReader<'_>,
    builder: &mut LabelBuilder,
) -> Result<(u16, FrameKind, bool)> {
    let frame_type = r.u1()?;
    Ok(match frame_type {
        0..=63 => (frame_type as u16, FrameKind::Same, false),
        64..=127 => (
            frame_type as u16 - 64,
            FrameKind::SameLocals1(decode_vtype(r, builder)?),
            false,
        ),
        247 => {
            let delta = r.u2()?;
            (delta, FrameKind::SameLocals1(decode_vtype(r, builder)?), true)
        }
        248..=250 => (r.u2()?, FrameKind::Chop(251 - frame_type), false),
        251 => (r.u2()?, FrameKind::Same, true),
        252..=254 => {
            let delta = r.u2()?;
            let mut locals = Vec::new();
            for _ in 0..(frame_type - 251) {
                locals.push(decode_vtype(r, builder)?);
            }
            (delta, FrameKind::Append(locals), false)
        }
        255 => {
            let delta = r.u2()?;
            let local_count = r.u2()?;
            let mut locals = Vec::with_capacity(local_count as usize);
            for _ in 0..local_count {
                locals.push(decode_vtype(r, builder)?);
            }
            let stack_count = r.u2()?;
            let mut stack = Vec::with_capacity(stack_count as usize);
            for _ in 0..stack_count {
                stack.push(decode_vtype(r, builder)?);
            }
            (delta, FrameKind::Full { locals, stack }, false)
        }
        _ => return Err(ClassFileError::BadStackMapFrame { frame_type }),
    })
}

fn decode_vtype(r: &mut ByteReader<'_>, builder: &mut LabelBuilder) -> Result<VerificationType> {
    let tag = r.u1()?;
    Ok(match tag {
        0 => VerificationType::Top,
        1 => VerificationType::Integer,
        2 => VerificationType::Float,
        3 => VerificationType::Double,
        4 => VerificationType::Long,
        5 => VerificationType::Null,
        6 => VerificationType::UninitializedThis,
        7 => VerificationType::Object(r.u2()?),
        8 => VerificationType::Uninitialized(builder.label(r.u2()? as i64, "uninitialized type")?),
        _ => return Err(ClassFileError::BadStackMapFrame { frame_type: tag }),
    })
}

fn encode_code_attribute(attr: &CodeAttribute, offsets: &Offsets, out: &mut Vec<u8>) -> Result<()> {
    let mut body = Vec::new();
    let name = match attr {
        CodeAttribute::LineNumbers { name, entries } => {
            put_u2(&mut body, u2_len(entries.len(), "line number table")?);
            for e in entries {
                put_u2(&mut body, offsets.pc(e.start)?);
                put_u2(&mut body, e.line);
            }
            *name
        }
        CodeAttribute::LocalVariables { name, entries }
        | CodeAttribute::LocalVariableTypes { name, entries } => {
            put_u2(&mut body, u2_len(entries.len(), "local variable table")?);
            for e in entries {
                let start = offsets.pc(e.start)?;
                let end = offsets.pc(e.end)?;
                put_u2(&mut body, start);
                put_u2(&mut body, end.saturating_sub(start));
                put_u2(&mut body, e.name);
                put_u2(&mut body, e.descriptor);
                put_u2(&mut body, e.index);
            }
            *name
        }
        CodeAttribute::StackMap { name, frames } => {
            put_u2(&mut body, u2_len(frames.len(), "stack map table")?);
            let mut previous: Option<u16> = None;
            for frame in frames {
                let pc = offsets.pc(frame.label)?;
                let delta = match previous {
                    None => pc,
                    Some(prev) if pc > prev => pc - prev - 1,
                    Some(_) => {
                        return Err(ClassFileError::BadCodeOffset {
                            offset: pc as i64,
                            context: "stack map frame",
                        })
                    }
                };
                previous = Some(pc);
                encode_frame(frame, delta, offsets, &mut body)?;
            }
            *name
        }
        CodeAttribute::OffsetBound(raw) | CodeAttribute::Other(raw) => return raw.encode(out),
    };
    put_u2(out, name);
    put_u4(out, u4_len(body.len(), "code attribute")?);
    out.extend_from_slice(&body);
    Ok(())
}

fn encode_frame(frame: &StackMapFrame, delta: u16, offsets: &Offsets, out: &mut Vec<u8>) -> Result<()> {
    let short = delta < 64 && !frame.extended;
    match &frame.kind {
        FrameKind::Same if short => put_u1(out, delta as u8),
        FrameKind::Same => {
            put_u1(out, 251);
            put_u2(out, delta);
        }
        FrameKind::SameLocals1(vt) => {
            if short {
                put_u1(out, 64 + delta as u8);
            } else {
                put_u1(out, 247);
                put_u2(out, delta);
            }
            encode_vtype(vt, offsets, out)?;
        }
        FrameKind::Chop(k) => {
            if !(1..=3).contains(k) {
                return Err(ClassFileError::BadStackMapFrame { frame_type: 248 });
            }
            put_u1(out, 251 - k);
            put_u2(out, delta);
        }
        FrameKind::Append(locals) => {
            if !(1..=3).contains(&locals.len()) {
                return Err(ClassFileError::BadStackMapFrame { frame_type: 252 });
            }
            put_u1(out, 251 + locals.len() as u8);
            put_u2(out, delta);
            for vt in locals {
                encode_vtype(vt, offsets, out)?;
            }
        }
        FrameKind::Full { locals, stack } => {
            put_u1(out, 255);
            put_u2(out, delta);
            put_u2(out, u2_len(locals.len(), "frame locals")?);
            for vt in locals {
                encode_vtype(vt, offsets, out)?;
            }
            put_u2(out, u2_len(stack.len(), "frame stack")?);
            for vt in stack {
                encode_vtype(vt, offsets, out)?;
            }
        }
    }
    Ok(())
}

fn encode_vtype(vt: &VerificationType, offsets: &Offsets, out: &mut Vec<u8>) -> Result<()> {
    match vt {
        VerificationType::Top => put_u1(out, 0),
        VerificationType::Integer => put_u1(out, 1),
        VerificationType::Float => put_u1(out, 2),
        VerificationType::Double => put_u1(out, 3),
        VerificationType::Long => put_u1(out, 4),
        VerificationType::Null => put_u1(out, 5),
        VerificationType::UninitializedThis => put_u1(out, 6),
        VerificationType::Object(class) => {
            put_u1(out, 7);
            put_u2(out, *class);
        }
        VerificationType::Uninitialized(label) => {
            put_u1(out, 8);
            put_u2(out, offsets.pc(*label)?);
        }
    }
    Ok(())
}

/// Branch-carrying instruction whose targets are still byte offsets.
enum PendingBranch {
    Jump {
        opcode: u8,
        target: i64,
    },
    Table {
        default: i64,
        low: i32,
        high: i32,
        targets: Vec<i64>,
    },
    Lookup {
        default: i64,
        pairs: Vec<(i32, i64)>,
    },
}

/// Builds the instruction list of one method and hands out labels by offset.
struct LabelBuilder {
    list: InsnList,
    /// Offset of each instruction start -> its node
    starts: HashMap<u32, InsnId>,
    labels: HashMap<u32, InsnId>,
    code_len: u32,
}

impl LabelBuilder {
    fn decode_instructions(code: &[u8]) -> Result<Self> {
        if code.is_empty() || code.len() > MAX_CODE_LENGTH {
            return Err(ClassFileError::TooLarge {
                what: "code",
                size: code.len(),
            });
        }
        let mut builder = Self {
            list: InsnList::new(),
            starts: HashMap::new(),
            labels: HashMap::new(),
            code_len: code.len() as u32,
        };
        let mut pending = Vec::new();
        let mut r = ByteReader::new(code);
        while !r.is_empty() {
            let offset = r.position();
            let decoded = decode_insn(&mut r, offset)?;
            let id = match decoded {
                Ok(insn) => builder.list.push(insn),
                Err(branch) => {
                    let id = builder.list.push(Insn::Op(opcodes::NOP));
                    pending.push((id, branch));
                    id
                }
            };
            builder.starts.insert(offset as u32, id);
        }
        for (id, branch) in pending {
            let insn = match branch {
                PendingBranch::Jump { opcode, target } => Insn::Jump {
                    opcode,
                    target: builder.label(target, "branch")?,
                },
                PendingBranch::Table {
                    default,
                    low,
                    high,
                    targets,
                } => Insn::TableSwitch {
                    default: builder.label(default, "switch")?,
                    low,
                    high,
                    targets: targets
                        .into_iter()
                        .map(|t| builder.label(t, "switch"))
                        .collect::<Result<_>>()?,
                },
                PendingBranch::Lookup { default, pairs } => Insn::LookupSwitch {
                    default: builder.label(default, "switch")?,
                    pairs: pairs
                        .into_iter()
                        .map(|(k, t)| Ok((k, builder.label(t, "switch")?)))
                        .collect::<Result<_>>()?,
                },
            };
            builder.list.replace(id, insn);
        }
        Ok(builder)
    }

    fn label_lenient(&mut self, offset: i64) -> Option<InsnId> {
        let offset = u32::try_from(offset).ok()?;
        if let Some(id) = self.labels.get(&offset) {
            return Some(*id);
        }
        let id = if offset == self.code_len {
            self.list.push(Insn::Label)
        } else {
            let at = *self.starts.get(&offset)?;
            self.list.insert_before(at, Insn::Label)?
        };
        self.labels.insert(offset, id);
        Some(id)
    }

    fn label(&mut self, offset: i64, context: &'static str) -> Result<InsnId> {
        self.label_lenient(offset)
            .ok_or(ClassFileError::BadCodeOffset { offset, context })
    }

    fn finish(self) -> InsnList {
        self.list
    }
}

fn switch_padding(offset: usize) -> usize {
    (4 - (offset + 1) % 4) % 4
}

fn decode_insn(
    r: &mut ByteReader<'_>,
    offset: usize,
) -> Result<std::result::Result<Insn, PendingBranch>> {
    let opcode = r.u1()?;
    let at = offset as i64;
    let insn = match opcode {
        opcodes::BIPUSH => Insn::Push {
            opcode,
            value: r.i1()? as i16,
        },
        opcodes::SIPUSH => Insn::Push {
            opcode,
            value: r.i2()?,
        },
        opcodes::LDC => Insn::Ldc {
            opcode,
            index: r.u1()? as u16,
        },
        opcodes::LDC_W | opcodes::LDC2_W => Insn::Ldc {
            opcode,
            index: r.u2()?,
        },
        opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => {
            Insn::Var {
                opcode,
                index: r.u1()? as u16,
                form: VarForm::Normal,
            }
        }
        opcodes::ILOAD_0..=opcodes::ALOAD_3 | opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
            let (opcode, index) =
                expand_short_var(opcode).ok_or(ClassFileError::InvalidOpcode { opcode, offset })?;
            Insn::Var {
                opcode,
                index,
                form: VarForm::Short,
            }
        }
        opcodes::POP..=opcodes::SWAP => {
            Insn::Stack(StackOp::from_opcode(opcode).ok_or(ClassFileError::InvalidOpcode { opcode, offset })?)
        }
        opcodes::IINC => Insn::Iinc {
            index: r.u1()? as u16,
            delta: r.i1()? as i16,
            wide: false,
        },
        opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
            return Ok(Err(PendingBranch::Jump {
                opcode,
                target: at + r.i2()? as i64,
            }))
        }
        opcodes::GOTO_W | opcodes::JSR_W => {
            return Ok(Err(PendingBranch::Jump {
                opcode,
                target: at + r.i4()? as i64,
            }))
        }
        opcodes::TABLESWITCH => {
            r.skip(switch_padding(offset))?;
            let default = at + r.i4()? as i64;
            let low = r.i4()?;
            let high = r.i4()?;
            let count = high as i64 - low as i64 + 1;
            if count < 1 || count as usize > r.remaining() / 4 {
                return Err(ClassFileError::InvalidOpcode { opcode, offset });
            }
            let mut targets = Vec::with_capacity(count as usize);
            for _ in 0..count {
                targets.push(at + r.i4()? as i64);
            }
            return Ok(Err(PendingBranch::Table {
                default,
                low,
                high,
                targets,
            }));
        }
        opcodes::LOOKUPSWITCH => {
            r.skip(switch_padding(offset))?;
            let default = at + r.i4()? as i64;
            let count = r.i4()?;
            if count < 0 || count as usize > r.remaining() / 8 {
                return Err(ClassFileError::InvalidOpcode { opcode, offset });
            }
            let mut pairs = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let key = r.i4()?;
                pairs.push((key, at + r.i4()? as i64));
            }
            return Ok(Err(PendingBranch::Lookup { default, pairs }));
        }
        opcodes::GETSTATIC..=opcodes::PUTFIELD => Insn::Field {
            access: FieldAccess::from_opcode(opcode).ok_or(ClassFileError::InvalidOpcode { opcode, offset })?,
            field: r.u2()?,
        },
        opcodes::INVOKEVIRTUAL => Insn::Invoke {
            mode: InvokeMode::Virtual,
            method: r.u2()?,
        },
        opcodes::INVOKESPECIAL => Insn::Invoke {
            mode: InvokeMode::Special,
            method: r.u2()?,
        },
        opcodes::INVOKESTATIC => Insn::Invoke {
            mode: InvokeMode::Static,
            method: r.u2()?,
        },
        opcodes::INVOKEINTERFACE => {
            let method = r.u2()?;
            let count = r.u1()?;
            r.skip(1)?;
            Insn::Invoke {
                mode: InvokeMode::Interface { count },
                method,
            }
        }
        opcodes::INVOKEDYNAMIC => {
            let method = r.u2()?;
            r.skip(2)?;
            Insn::Invoke {
                mode: InvokeMode::Dynamic,
                method,
            }
        }
        opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => Insn::Type {
            opcode,
            class: r.u2()?,
        },
        opcodes::NEWARRAY => Insn::NewArray { atype: r.u1()? },
        opcodes::MULTIANEWARRAY => Insn::MultiANewArray {
            class: r.u2()?,
            dims: r.u1()?,
        },
        opcodes::WIDE => {
            let inner = r.u1()?;
            match inner {
                opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => {
                    Insn::Var {
                        opcode: inner,
                        index: r.u2()?,
                        form: VarForm::Wide,
                    }
                }
                opcodes::IINC => Insn::Iinc {
                    index: r.u2()?,
                    delta: r.i2()?,
                    wide: true,
                },
                _ => {
                    return Err(ClassFileError::InvalidOpcode {
                        opcode: inner,
                        offset,
                    })
                }
            }
        }
        op if op <= opcodes::JSR_W => Insn::Op(op),
        _ => return Err(ClassFileError::InvalidOpcode { opcode, offset }),
    };
    Ok(Ok(insn))
}

/// Byte size of an instruction placed at `offset`.
fn insn_size(insn: &Insn, offset: usize) -> usize {
    match insn {
        Insn::Label => 0,
        Insn::Op(_) | Insn::Stack(_) => 1,
        Insn::Push { opcode, .. } => {
            if *opcode == opcodes::BIPUSH {
                2
            } else {
                3
            }
        }
        Insn::Ldc { opcode, index } => {
            if *opcode == opcodes::LDC && *index <= u8::MAX as u16 {
                2
            } else {
                3
            }
        }
        Insn::Var {
            opcode,
            index,
            form,
        } => match form.fit(*opcode, *index) {
            VarForm::Short => 1,
            VarForm::Normal => 2,
            VarForm::Wide => 4,
        },
        Insn::Iinc { index, delta, wide } => {
            if *wide || *index > u8::MAX as u16 || i8::try_from(*delta).is_err() {
                6
            } else {
                3
            }
        }
        Insn::Jump { opcode, .. } => {
            if *opcode == opcodes::GOTO_W || *opcode == opcodes::JSR_W {
                5
            } else {
                3
            }
        }
        Insn::TableSwitch { targets, .. } => 1 + switch_padding(offset) + 12 + 4 * targets.len(),
        Insn::LookupSwitch { pairs, .. } => 1 + switch_padding(offset) + 8 + 8 * pairs.len(),
        Insn::Field { .. } | Insn::Type { .. } => 3,
        Insn::Invoke { mode, .. } => match mode {
            InvokeMode::Interface { .. } | InvokeMode::Dynamic => 5,
            _ => 3,
        },
        Insn::NewArray { .. } => 2,
        Insn::MultiANewArray { .. } => 4,
    }
}

/// Encoded form of a branch instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BranchForm {
    /// As written, with a 16-bit offset unless the opcode is already wide
    Short,
    /// `goto`/`jsr` promoted to `goto_w`/`jsr_w`
    Wide,
    /// Inverted condition skipping over a `goto_w` to the target
    Inverted,
}

impl BranchForm {
    fn size(self) -> usize {
        match self {
            BranchForm::Short => 3,
            BranchForm::Wide => 5,
            BranchForm::Inverted => 8,
        }
    }
}

/// Offsets assigned to every node of a list during encoding.
struct Offsets {
    by_node: Vec<Option<u32>>,
    /// Branches that no longer fit their 16-bit form
    forms: HashMap<InsnId, BranchForm>,
    code_len: usize,
}

impl Offsets {
    /// Lay out `list`, widening short branches until every offset fits.
    ///
    /// A widened conditional creates a new branch target, so it is refused
    /// when the method carries stack map frames.
    fn assign(list: &InsnList, has_frames: bool) -> Result<Self> {
        let mut forms: HashMap<InsnId, BranchForm> = HashMap::new();
        loop {
            let mut by_node = vec![None; list.len()];
            let mut offset = 0usize;
            for (id, insn) in list.iter() {
                by_node[id.index()] = Some(offset as u32);
                offset += match (insn, forms.get(&id)) {
                    (Insn::Jump { .. }, Some(form)) => form.size(),
                    _ => insn_size(insn, offset),
                };
            }
            if offset == 0 || offset > MAX_CODE_LENGTH {
                return Err(ClassFileError::TooLarge {
                    what: "code",
                    size: offset,
                });
            }
            let layout = Self {
                by_node,
                forms,
                code_len: offset,
            };

            let mut grown = Vec::new();
            for (id, insn) in list.iter() {
                let Insn::Jump { opcode, target } = insn else {
                    continue;
                };
                if layout.forms.contains_key(&id) || *opcode == opcodes::GOTO_W || *opcode == opcodes::JSR_W {
                    continue;
                }
                let delta = layout.offset(*target)? as i64 - layout.offset(id)? as i64;
                if i16::try_from(delta).is_ok() {
                    continue;
                }
                let form = if opcodes::widened(*opcode).is_some() {
                    BranchForm::Wide
                } else if has_frames || opcodes::inverted_condition(*opcode).is_none() {
                    return Err(ClassFileError::BranchOutOfRange {
                        opcode: *opcode,
                        delta,
                    });
                } else {
                    BranchForm::Inverted
                };
                trace!(opcode = *opcode, delta, ?form, "widening branch");
                grown.push((id, form));
            }
            if grown.is_empty() {
                return Ok(layout);
            }
            forms = layout.forms;
            forms.extend(grown);
        }
    }

    fn offset(&self, label: InsnId) -> Result<u32> {
        self.by_node
            .get(label.index())
            .copied()
            .flatten()
            .ok_or(ClassFileError::DanglingLabel)
    }

    fn pc(&self, label: InsnId) -> Result<u16> {
        Ok(self.offset(label)? as u16)
    }

    fn write_code(&self, list: &InsnList) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.code_len);
        for (id, insn) in list.iter() {
            let at = self.offset(id)? as i64;
            debug_assert_eq!(at as usize, out.len());
            let relative = |target: InsnId| -> Result<i64> {
                match list.get(target) {
                    Some(Insn::Label) => Ok(self.offset(target)? as i64 - at),
                    _ => Err(ClassFileError::DanglingLabel),
                }
            };
            match insn {
                Insn::Label => {}
                Insn::Op(op) => put_u1(&mut out, *op),
                Insn::Stack(op) => put_u1(&mut out, op.opcode()),
                Insn::Push { opcode, value } => {
                    put_u1(&mut out, *opcode);
                    if *opcode == opcodes::BIPUSH {
                        put_u1(&mut out, *value as i8 as u8);
                    } else {
                        put_u2(&mut out, *value as u16);
                    }
                }
                Insn::Ldc { opcode, index } => {
                    if *opcode == opcodes::LDC && *index <= u8::MAX as u16 {
                        put_u1(&mut out, opcodes::LDC);
                        put_u1(&mut out, *index as u8);
                    } else {
                        let op = if *opcode == opcodes::LDC2_W {
                            opcodes::LDC2_W
                        } else {
                            opcodes::LDC_W
                        };
                        put_u1(&mut out, op);
                        put_u2(&mut out, *index);
                    }
                }
                Insn::Var {
                    opcode,
                    index,
                    form,
                } => match form.fit(*opcode, *index) {
                    VarForm::Short => put_u1(&mut out, crate::insn::short_var_opcode(*opcode, *index)),
                    VarForm::Normal => {
                        put_u1(&mut out, *opcode);
                        put_u1(&mut out, *index as u8);
                    }
                    VarForm::Wide => {
                        put_u1(&mut out, opcodes::WIDE);
                        put_u1(&mut out, *opcode);
                        put_u2(&mut out, *index);
                    }
                },
                Insn::Iinc { index, delta, .. } => {
                    if insn_size(insn, at as usize) == 6 {
                        put_u1(&mut out, opcodes::WIDE);
                        put_u1(&mut out, opcodes::IINC);
                        put_u2(&mut out, *index);
                        put_u2(&mut out, *delta as u16);
                    } else {
                        put_u1(&mut out, opcodes::IINC);
                        put_u1(&mut out, *index as u8);
                        put_u1(&mut out, *delta as i8 as u8);
                    }
                }
                Insn::Jump { opcode, target } => {
                    let delta = relative(*target)?;
                    let form = self.forms.get(&id).copied().unwrap_or(BranchForm::Short);
                    match form {
                        BranchForm::Short if *opcode == opcodes::GOTO_W || *opcode == opcodes::JSR_W => {
                            put_u1(&mut out, *opcode);
                            put_i4(&mut out, wide_offset(*opcode, delta)?);
                        }
                        BranchForm::Short => {
                            let narrow = i16::try_from(delta).map_err(|_| ClassFileError::BranchOutOfRange {
                                opcode: *opcode,
                                delta,
                            })?;
                            put_u1(&mut out, *opcode);
                            put_u2(&mut out, narrow as u16);
                        }
                        BranchForm::Wide => {
                            let wide = opcodes::widened(*opcode).ok_or(ClassFileError::BranchOutOfRange {
                                opcode: *opcode,
                                delta,
                            })?;
                            put_u1(&mut out, wide);
                            put_i4(&mut out, wide_offset(wide, delta)?);
                        }
                        BranchForm::Inverted => {
                            let skip = opcodes::inverted_condition(*opcode).ok_or(
                                ClassFileError::BranchOutOfRange {
                                    opcode: *opcode,
                                    delta,
                                },
                            )?;
                            // the goto_w sits 3 bytes past the conditional
                            put_u1(&mut out, skip);
                            put_u2(&mut out, BranchForm::Inverted.size() as u16);
                            put_u1(&mut out, opcodes::GOTO_W);
                            put_i4(&mut out, wide_offset(opcodes::GOTO_W, delta - 3)?);
                        }
                    }
                }
                Insn::TableSwitch {
                    default,
                    low,
                    high,
                    targets,
                } => {
                    put_u1(&mut out, opcodes::TABLESWITCH);
                    out.resize(out.len() + switch_padding(at as usize), 0);
                    put_i4(&mut out, relative(*default)? as i32);
                    put_i4(&mut out, *low);
                    put_i4(&mut out, *high);
                    for t in targets {
                        put_i4(&mut out, relative(*t)? as i32);
                    }
                }
                Insn::LookupSwitch { default, pairs } => {
                    put_u1(&mut out, opcodes::LOOKUPSWITCH);
                    out.resize(out.len() + switch_padding(at as usize), 0);
                    put_i4(&mut out, relative(*default)? as i32);
                    put_i4(&mut out, pairs.len() as i32);
                    for (key, t) in pairs {
                        put_i4(&mut out, *key);
                        put_i4(&mut out, relative(*t)? as i32);
                    }
                }
                Insn::Field { access, field } => {
                    put_u1(&mut out, access.opcode());
                    put_u2(&mut out, *field);
                }
                Insn::Invoke { mode, method } => {
                    put_u1(&mut out, mode.opcode());
                    put_u2(&mut out, *method);
                    match mode {
                        InvokeMode::Interface { count } => {
                            put_u1(&mut out, *count);
                            put_u1(&mut out, 0);
                        }
                        InvokeMode::Dynamic => put_u2(&mut out, 0),
                        _ => {}
                    }
                }
                Insn::Type { opcode, class } => {
                    put_u1(&mut out, *opcode);
                    put_u2(&mut out, *class);
                }
                Insn::NewArray { atype } => {
                    put_u1(&mut out, opcodes::NEWARRAY);
                    put_u1(&mut out, *atype);
                }
                Insn::MultiANewArray { class, dims } => {
                    put_u1(&mut out, opcodes::MULTIANEWARRAY);
                    put_u2(&mut out, *class);
                    put_u1(&mut out, *dims);
                }
            }
        }
        Ok(out)
    }
}

fn wide_offset(opcode: u8, delta: i64) -> Result<i32> {
    i32::try_from(delta).map_err(|_| ClassFileError::BranchOutOfRange { opcode, delta })
}
