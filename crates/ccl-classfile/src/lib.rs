//! JVM class file codec with an editable instruction list.
//!
//! This crate decodes class files into a mutable model and encodes them back:
//! - [`ClassFile`] / [`Method`] - top-level structure, attributes kept in order
//! - [`ConstantPool`] - append-only pool; existing indices never move
//! - [`InsnList`] - arena of instructions with stable [`InsnId`] handles and
//!   `Label` nodes for every offset-bearing structure
//! - [`compute_maxs`] - `max_stack` / `max_locals` for edited bodies
//! - [`disassemble`] - text listing used for diagnostics
//!
//! Methods whose code was never edited are written back byte for byte.

pub mod builder;
pub mod bytes;
pub mod class;
pub mod code;
pub mod constant_pool;
pub mod descriptor;
pub mod disasm;
pub mod error;
pub mod insn;
pub mod maxs;
pub mod opcodes;

pub use builder::{ClassBuilder, MethodBuilder};
pub use class::{ClassFile, Field, Method};
pub use code::{Code, CodeAttribute, ExceptionHandler, FrameKind, StackMapFrame, VerificationType};
pub use constant_pool::{Constant, ConstantPool, MemberKind, MemberRef};
pub use descriptor::{FieldType, MethodDescriptor};
pub use disasm::disassemble;
pub use error::{ClassFileError, Result};
pub use insn::{AccessMode, FieldAccess, Insn, InsnId, InsnList, InvokeMode, Scope, StackOp, VarForm};
pub use maxs::{compute_maxs, stack_effect, StackEffect};
