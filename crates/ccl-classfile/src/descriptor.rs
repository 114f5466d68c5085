//! Field and method descriptor parsing.

use crate::error::{ClassFileError, Result};
use crate::opcodes;

/// A parsed field type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    /// Internal class name without the `L`/`;` wrapper
    Object(String),
    Array(Box<FieldType>),
}

impl FieldType {
    /// Operand stack / local variable slots taken by a value of this type.
    pub fn slots(&self) -> u16 {
        match self {
            FieldType::Long | FieldType::Double => 2,
            _ => 1,
        }
    }

    pub fn is_category2(&self) -> bool {
        self.slots() == 2
    }

    /// Opcode storing a value of this type into a local (`istore`, `astore`, ...).
    pub fn store_opcode(&self) -> u8 {
        match self {
            FieldType::Long => opcodes::LSTORE,
            FieldType::Float => opcodes::FSTORE,
            FieldType::Double => opcodes::DSTORE,
            FieldType::Object(_) | FieldType::Array(_) => opcodes::ASTORE,
            _ => opcodes::ISTORE,
        }
    }

    /// Opcode loading a value of this type from a local.
    pub fn load_opcode(&self) -> u8 {
        match self {
            FieldType::Long => opcodes::LLOAD,
            FieldType::Float => opcodes::FLOAD,
            FieldType::Double => opcodes::DLOAD,
            FieldType::Object(_) | FieldType::Array(_) => opcodes::ALOAD,
            _ => opcodes::ILOAD,
        }
    }

    pub fn parse(descriptor: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let ty = parse_field_type(descriptor, &mut pos)?;
        if pos != descriptor.len() {
            return Err(bad(descriptor));
        }
        Ok(ty)
    }
}

/// A parsed method descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub params: Vec<FieldType>,
    /// `None` for `void`
    pub ret: Option<FieldType>,
}

impl MethodDescriptor {
    pub fn parse(descriptor: &[u8]) -> Result<Self> {
        if descriptor.first() != Some(&b'(') {
            return Err(bad(descriptor));
        }
        let mut pos = 1;
        let mut params = Vec::new();
        loop {
            match descriptor.get(pos) {
                Some(b')') => {
                    pos += 1;
                    break;
                }
                Some(_) => params.push(parse_field_type(descriptor, &mut pos)?),
                None => return Err(bad(descriptor)),
            }
        }
        let ret = if descriptor.get(pos) == Some(&b'V') {
            pos += 1;
            None
        } else {
            Some(parse_field_type(descriptor, &mut pos)?)
        };
        if pos != descriptor.len() {
            return Err(bad(descriptor));
        }
        Ok(Self { params, ret })
    }

    /// Slots popped for the arguments (receiver excluded).
    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(FieldType::slots).sum()
    }

    /// Slots pushed for the return value.
    pub fn return_slots(&self) -> u16 {
        self.ret.as_ref().map_or(0, FieldType::slots)
    }
}

/// Slots taken by a value of the given field descriptor.
pub fn field_slots(descriptor: &[u8]) -> Result<u16> {
    Ok(FieldType::parse(descriptor)?.slots())
}

fn parse_field_type(d: &[u8], pos: &mut usize) -> Result<FieldType> {
    let c = *d.get(*pos).ok_or_else(|| bad(d))?;
    *pos += 1;
    Ok(match c {
        b'B' => FieldType::Byte,
        b'C' => FieldType::Char,
        b'D' => FieldType::Double,
        b'F' => FieldType::Float,
        b'I' => FieldType::Int,
        b'J' => FieldType::Long,
        b'S' => FieldType::Short,
        b'Z' => FieldType::Boolean,
        b'L' => {
            let start = *pos;
            let len = d[start..]
                .iter()
                .position(|&b| b == b';')
                .ok_or_else(|| bad(d))?;
            if len == 0 {
                return Err(bad(d));
            }
            *pos = start + len + 1;
            FieldType::Object(String::from_utf8_lossy(&d[start..start + len]).into_owned())
        }
        b'[' => FieldType::Array(Box::new(parse_field_type(d, pos)?)),
        _ => return Err(bad(d)),
    })
}

fn bad(descriptor: &[u8]) -> ClassFileError {
    ClassFileError::BadDescriptor(String::from_utf8_lossy(descriptor).into_owned())
}
