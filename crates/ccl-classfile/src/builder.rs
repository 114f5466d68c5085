//! Programmatic construction of small class files.
//!
//! Used to produce realistic fixtures without a Java toolchain. Bodies built
//! here have no original bytes, so `max_stack`/`max_locals` are computed when
//! the class is encoded.

use crate::class::{ClassFile, Field, Method, ACC_PUBLIC, ACC_SUPER};
use crate::code::{Code, CodeAttribute, ExceptionHandler, FrameKind, LineNumber, StackMapFrame};
use crate::constant_pool::{Constant, ConstantPool, MemberKind};
use crate::descriptor::MethodDescriptor;
use crate::error::Result;
use crate::insn::{FieldAccess, Insn, InsnId, InsnList, InvokeMode, StackOp};
use crate::opcodes;

/// Builds a `ClassFile` one member at a time.
pub struct ClassBuilder {
    class: ClassFile,
}

impl ClassBuilder {
    /// A public class extending `java/lang/Object`, class file version 52.
    pub fn new(name: &str) -> Result<Self> {
        let mut pool = ConstantPool::new();
        let this_class = pool.intern_class(name.as_bytes())?;
        let super_class = pool.intern_class(b"java/lang/Object")?;
        Ok(Self {
            class: ClassFile {
                minor_version: 0,
                major_version: 52,
                pool,
                access_flags: ACC_PUBLIC | ACC_SUPER,
                this_class,
                super_class,
                interfaces: Vec::new(),
                fields: Vec::new(),
                methods: Vec::new(),
                attributes: Vec::new(),
            },
        })
    }

    pub fn pool(&mut self) -> &mut ConstantPool {
        &mut self.class.pool
    }

    pub fn field(&mut self, access_flags: u16, name: &str, descriptor: &str) -> Result<&mut Self> {
        let name = self.class.pool.intern_utf8(name.as_bytes())?;
        let descriptor = self.class.pool.intern_utf8(descriptor.as_bytes())?;
        self.class.fields.push(Field {
            access_flags,
            name,
            descriptor,
            attributes: Vec::new(),
        });
        Ok(self)
    }

    /// Add a method without a body (abstract or native).
    pub fn declare(&mut self, access_flags: u16, name: &str, descriptor: &str) -> Result<&mut Self> {
        let name = self.class.pool.intern_utf8(name.as_bytes())?;
        let descriptor = self.class.pool.intern_utf8(descriptor.as_bytes())?;
        self.class
            .methods
            .push(Method::new(access_flags, name, descriptor, None));
        Ok(self)
    }

    /// Add a method whose body is produced by `body`.
    pub fn method<F>(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        body: F,
    ) -> Result<&mut Self>
    where
        F: FnOnce(&mut MethodBuilder<'_>) -> Result<()>,
    {
        MethodDescriptor::parse(descriptor.as_bytes())?;
        let name = self.class.pool.intern_utf8(name.as_bytes())?;
        let descriptor = self.class.pool.intern_utf8(descriptor.as_bytes())?;
        let mut mb = MethodBuilder {
            pool: &mut self.class.pool,
            insns: InsnList::new(),
            handlers: Vec::new(),
            lines: Vec::new(),
            frames: Vec::new(),
        };
        body(&mut mb)?;
        let code = mb.into_code()?;
        self.class
            .methods
            .push(Method::new(access_flags, name, descriptor, Some(code)));
        Ok(self)
    }

    pub fn finish(self) -> ClassFile {
        self.class
    }

    pub fn build(self) -> Result<Vec<u8>> {
        self.class.encode()
    }
}

/// A forward branch whose target has not been placed yet.
#[derive(Debug)]
#[must_use = "a forward branch must be bound"]
pub struct Forward(InsnId);

/// Appends instructions to one method body.
pub struct MethodBuilder<'a> {
    pool: &'a mut ConstantPool,
    insns: InsnList,
    handlers: Vec<ExceptionHandler>,
    lines: Vec<LineNumber>,
    frames: Vec<StackMapFrame>,
}

impl<'a> MethodBuilder<'a> {
    pub fn pool(&mut self) -> &mut ConstantPool {
        self.pool
    }

    pub fn insn(&mut self, insn: Insn) -> InsnId {
        self.insns.push(insn)
    }

    pub fn op(&mut self, opcode: u8) -> InsnId {
        self.insns.push(Insn::Op(opcode))
    }

    pub fn stack(&mut self, op: StackOp) -> InsnId {
        self.insns.push(Insn::Stack(op))
    }

    /// Mark the current position.
    pub fn label(&mut self) -> InsnId {
        self.insns.push(Insn::Label)
    }

    /// Branch to an already placed label.
    pub fn jump(&mut self, opcode: u8, target: InsnId) -> InsnId {
        self.insns.push(Insn::Jump { opcode, target })
    }

    pub fn forward(&mut self, opcode: u8) -> Forward {
        let id = self.insns.push(Insn::Op(opcodes::NOP));
        self.insns.replace(id, Insn::Jump { opcode, target: id });
        Forward(id)
    }

    /// Place a label here and point the pending branch at it.
    pub fn bind(&mut self, forward: Forward) -> InsnId {
        let label = self.label();
        if let Some(Insn::Jump { opcode, .. }) = self.insns.get(forward.0).cloned() {
            self.insns.replace(forward.0, Insn::Jump { opcode, target: label });
        }
        label
    }

    /// Push an int constant using the shortest instruction.
    pub fn iconst(&mut self, value: i32) -> Result<InsnId> {
        Ok(match value {
            -1..=5 => self.op((opcodes::ICONST_0 as i32 + value) as u8),
            v if i8::try_from(v).is_ok() => self.insn(Insn::Push {
                opcode: opcodes::BIPUSH,
                value: v as i16,
            }),
            v if i16::try_from(v).is_ok() => self.insn(Insn::Push {
                opcode: opcodes::SIPUSH,
                value: v as i16,
            }),
            v => {
                let index = self.pool.push(Constant::Integer(v))?;
                self.ldc(index)
            }
        })
    }

    pub fn ldc_string(&mut self, value: &str) -> Result<InsnId> {
        let index = self.pool.intern_string(value.as_bytes())?;
        Ok(self.ldc(index))
    }

    pub fn ldc_long(&mut self, value: i64) -> Result<InsnId> {
        let index = self.pool.push(Constant::Long(value))?;
        Ok(self.insn(Insn::Ldc {
            opcode: opcodes::LDC2_W,
            index,
        }))
    }

    fn ldc(&mut self, index: u16) -> InsnId {
        let opcode = if index <= u8::MAX as u16 {
            opcodes::LDC
        } else {
            opcodes::LDC_W
        };
        self.insn(Insn::Ldc { opcode, index })
    }

    /// Local load or store (`iload`, `astore`, ...) in its smallest form.
    pub fn var(&mut self, opcode: u8, index: u16) -> InsnId {
        self.insn(Insn::var(opcode, index))
    }

    pub fn iinc(&mut self, index: u16, delta: i16) -> InsnId {
        self.insn(Insn::Iinc {
            index,
            delta,
            wide: index > u8::MAX as u16 || i8::try_from(delta).is_err(),
        })
    }

    fn field(&mut self, access: FieldAccess, owner: &str, name: &str, desc: &str) -> Result<InsnId> {
        let field = self.pool.intern_member_ref(
            MemberKind::Field,
            owner.as_bytes(),
            name.as_bytes(),
            desc.as_bytes(),
        )?;
        Ok(self.insn(Insn::Field { access, field }))
    }

    pub fn get_static(&mut self, owner: &str, name: &str, desc: &str) -> Result<InsnId> {
        self.field(FieldAccess::GET_STATIC, owner, name, desc)
    }

    pub fn put_static(&mut self, owner: &str, name: &str, desc: &str) -> Result<InsnId> {
        self.field(FieldAccess::PUT_STATIC, owner, name, desc)
    }

    pub fn get_field(&mut self, owner: &str, name: &str, desc: &str) -> Result<InsnId> {
        self.field(FieldAccess::GET_FIELD, owner, name, desc)
    }

    pub fn put_field(&mut self, owner: &str, name: &str, desc: &str) -> Result<InsnId> {
        self.field(FieldAccess::PUT_FIELD, owner, name, desc)
    }

    fn invoke(&mut self, mode: InvokeMode, owner: &str, name: &str, desc: &str) -> Result<InsnId> {
        let kind = match mode {
            InvokeMode::Interface { .. } => MemberKind::InterfaceMethod,
            _ => MemberKind::Method,
        };
        let method =
            self.pool
                .intern_member_ref(kind, owner.as_bytes(), name.as_bytes(), desc.as_bytes())?;
        Ok(self.insn(Insn::Invoke { mode, method }))
    }

    pub fn invoke_static(&mut self, owner: &str, name: &str, desc: &str) -> Result<InsnId> {
        self.invoke(InvokeMode::Static, owner, name, desc)
    }

    pub fn invoke_virtual(&mut self, owner: &str, name: &str, desc: &str) -> Result<InsnId> {
        self.invoke(InvokeMode::Virtual, owner, name, desc)
    }

    pub fn invoke_special(&mut self, owner: &str, name: &str, desc: &str) -> Result<InsnId> {
        self.invoke(InvokeMode::Special, owner, name, desc)
    }

    pub fn invoke_interface(&mut self, owner: &str, name: &str, desc: &str) -> Result<InsnId> {
        let slots = MethodDescriptor::parse(desc.as_bytes())?.param_slots() + 1;
        let count = u8::try_from(slots).unwrap_or(u8::MAX);
        self.invoke(InvokeMode::Interface { count }, owner, name, desc)
    }

    pub fn new_object(&mut self, class: &str) -> Result<InsnId> {
        let class = self.pool.intern_class(class.as_bytes())?;
        Ok(self.insn(Insn::Type {
            opcode: opcodes::NEW,
            class,
        }))
    }

    /// Start a new source line at the current position.
    pub fn line(&mut self, line: u16) -> InsnId {
        let start = self.label();
        self.lines.push(LineNumber { start, line });
        start
    }

    /// Register an exception handler; `catch_type` of `None` catches everything.
    pub fn try_catch(
        &mut self,
        start: InsnId,
        end: InsnId,
        handler: InsnId,
        catch_type: Option<&str>,
    ) -> Result<()> {
        let catch_type = match catch_type {
            Some(name) => self.pool.intern_class(name.as_bytes())?,
            None => 0,
        };
        self.handlers.push(ExceptionHandler {
            start,
            end,
            handler,
            catch_type,
        });
        Ok(())
    }

    /// Record a stack map frame at the current position.
    pub fn frame(&mut self, kind: FrameKind) -> InsnId {
        let label = self.label();
        self.frames.push(StackMapFrame {
            label,
            kind,
            extended: false,
        });
        label
    }

    fn into_code(self) -> Result<Code> {
        let code_name = self.pool.intern_utf8(b"Code")?;
        let mut attributes = Vec::new();
        if !self.lines.is_empty() {
            attributes.push(CodeAttribute::LineNumbers {
                name: self.pool.intern_utf8(b"LineNumberTable")?,
                entries: self.lines,
            });
        }
        if !self.frames.is_empty() {
            attributes.push(CodeAttribute::StackMap {
                name: self.pool.intern_utf8(b"StackMapTable")?,
                frames: self.frames,
            });
        }
        let mut code = Code::new(code_name, self.insns);
        code.handlers = self.handlers;
        code.attributes = attributes;
        Ok(code)
    }
}
