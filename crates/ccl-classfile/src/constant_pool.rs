//! Constant pool model.
//!
//! Entries are kept in file order so that every index in the original bytes
//! stays valid; new entries are only ever appended. `CONSTANT_Utf8` payloads
//! are stored as raw (modified UTF-8) bytes, which round-trips exactly and
//! compares byte-for-byte against ASCII member names.

use std::borrow::Cow;

use crate::bytes::{put_u1, put_u2, put_u4, put_u8, ByteReader};
use crate::error::{ClassFileError, Result};

pub const TAG_UTF8: u8 = 1;
pub const TAG_INTEGER: u8 = 3;
pub const TAG_FLOAT: u8 = 4;
pub const TAG_LONG: u8 = 5;
pub const TAG_DOUBLE: u8 = 6;
pub const TAG_CLASS: u8 = 7;
pub const TAG_STRING: u8 = 8;
pub const TAG_FIELDREF: u8 = 9;
pub const TAG_METHODREF: u8 = 10;
pub const TAG_INTERFACE_METHODREF: u8 = 11;
pub const TAG_NAME_AND_TYPE: u8 = 12;
pub const TAG_METHOD_HANDLE: u8 = 15;
pub const TAG_METHOD_TYPE: u8 = 16;
pub const TAG_DYNAMIC: u8 = 17;
pub const TAG_INVOKE_DYNAMIC: u8 = 18;
pub const TAG_MODULE: u8 = 19;
pub const TAG_PACKAGE: u8 = 20;

/// Payload width in bytes of a constant with a fixed-size body.
///
/// Returns `None` for `CONSTANT_Utf8` (length-prefixed) and for tags the
/// format does not define.
pub fn fixed_width(tag: u8) -> Option<usize> {
    match tag {
        TAG_INTEGER | TAG_FLOAT => Some(4),
        TAG_LONG | TAG_DOUBLE => Some(8),
        TAG_CLASS | TAG_STRING | TAG_METHOD_TYPE | TAG_MODULE | TAG_PACKAGE => Some(2),
        TAG_FIELDREF | TAG_METHODREF | TAG_INTERFACE_METHODREF | TAG_NAME_AND_TYPE => Some(4),
        TAG_DYNAMIC | TAG_INVOKE_DYNAMIC => Some(4),
        TAG_METHOD_HANDLE => Some(3),
        _ => None,
    }
}

/// Number of pool slots a tag occupies (`long` and `double` take two).
pub fn slot_width(tag: u8) -> u16 {
    if tag == TAG_LONG || tag == TAG_DOUBLE {
        2
    } else {
        1
    }
}

/// One constant pool entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    /// Index 0 and the slot following a `long`/`double`.
    Unusable,
    Utf8(Vec<u8>),
    Integer(i32),
    /// Raw IEEE-754 bits, kept as bits so NaN payloads survive.
    Float(u32),
    Long(i64),
    /// Raw IEEE-754 bits.
    Double(u64),
    Class { name: u16 },
    String { value: u16 },
    FieldRef { class: u16, name_and_type: u16 },
    MethodRef { class: u16, name_and_type: u16 },
    InterfaceMethodRef { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType { descriptor: u16 },
    Dynamic { bootstrap: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    Module { name: u16 },
    Package { name: u16 },
}

impl Constant {
    pub fn tag(&self) -> Option<u8> {
        Some(match self {
            Constant::Unusable => return None,
            Constant::Utf8(_) => TAG_UTF8,
            Constant::Integer(_) => TAG_INTEGER,
            Constant::Float(_) => TAG_FLOAT,
            Constant::Long(_) => TAG_LONG,
            Constant::Double(_) => TAG_DOUBLE,
            Constant::Class { .. } => TAG_CLASS,
            Constant::String { .. } => TAG_STRING,
            Constant::FieldRef { .. } => TAG_FIELDREF,
            Constant::MethodRef { .. } => TAG_METHODREF,
            Constant::InterfaceMethodRef { .. } => TAG_INTERFACE_METHODREF,
            Constant::NameAndType { .. } => TAG_NAME_AND_TYPE,
            Constant::MethodHandle { .. } => TAG_METHOD_HANDLE,
            Constant::MethodType { .. } => TAG_METHOD_TYPE,
            Constant::Dynamic { .. } => TAG_DYNAMIC,
            Constant::InvokeDynamic { .. } => TAG_INVOKE_DYNAMIC,
            Constant::Module { .. } => TAG_MODULE,
            Constant::Package { .. } => TAG_PACKAGE,
        })
    }

    fn decode(tag: u8, index: u16, r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(match tag {
            TAG_UTF8 => {
                let len = r.u2()? as usize;
                Constant::Utf8(r.bytes(len)?.to_vec())
            }
            TAG_INTEGER => Constant::Integer(r.i4()?),
            TAG_FLOAT => Constant::Float(r.u4()?),
            TAG_LONG => Constant::Long(r.u8()? as i64),
            TAG_DOUBLE => Constant::Double(r.u8()?),
            TAG_CLASS => Constant::Class { name: r.u2()? },
            TAG_STRING => Constant::String { value: r.u2()? },
            TAG_FIELDREF => Constant::FieldRef {
                class: r.u2()?,
                name_and_type: r.u2()?,
            },
            TAG_METHODREF => Constant::MethodRef {
                class: r.u2()?,
                name_and_type: r.u2()?,
            },
            TAG_INTERFACE_METHODREF => Constant::InterfaceMethodRef {
                class: r.u2()?,
                name_and_type: r.u2()?,
            },
            TAG_NAME_AND_TYPE => Constant::NameAndType {
                name: r.u2()?,
                descriptor: r.u2()?,
            },
            TAG_METHOD_HANDLE => Constant::MethodHandle {
                kind: r.u1()?,
                reference: r.u2()?,
            },
            TAG_METHOD_TYPE => Constant::MethodType { descriptor: r.u2()? },
            TAG_DYNAMIC => Constant::Dynamic {
                bootstrap: r.u2()?,
                name_and_type: r.u2()?,
            },
            TAG_INVOKE_DYNAMIC => Constant::InvokeDynamic {
                bootstrap: r.u2()?,
                name_and_type: r.u2()?,
            },
            TAG_MODULE => Constant::Module { name: r.u2()? },
            TAG_PACKAGE => Constant::Package { name: r.u2()? },
            _ => return Err(ClassFileError::UnknownConstantTag { tag, index }),
        })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let Some(tag) = self.tag() else {
            return;
        };
        put_u1(out, tag);
        match self {
            Constant::Unusable => {}
            Constant::Utf8(bytes) => {
                // Length is bounded at insertion time
                put_u2(out, bytes.len() as u16);
                out.extend_from_slice(bytes);
            }
            Constant::Integer(v) => put_u4(out, *v as u32),
            Constant::Float(bits) => put_u4(out, *bits),
            Constant::Long(v) => put_u8(out, *v as u64),
            Constant::Double(bits) => put_u8(out, *bits),
            Constant::Class { name }
            | Constant::Module { name }
            | Constant::Package { name } => put_u2(out, *name),
            Constant::String { value } => put_u2(out, *value),
            Constant::MethodType { descriptor } => put_u2(out, *descriptor),
            Constant::FieldRef {
                class,
                name_and_type,
            }
            | Constant::MethodRef {
                class,
                name_and_type,
            }
            | Constant::InterfaceMethodRef {
                class,
                name_and_type,
            } => {
                put_u2(out, *class);
                put_u2(out, *name_and_type);
            }
            Constant::NameAndType { name, descriptor } => {
                put_u2(out, *name);
                put_u2(out, *descriptor);
            }
            Constant::MethodHandle { kind, reference } => {
                put_u1(out, *kind);
                put_u2(out, *reference);
            }
            Constant::Dynamic {
                bootstrap,
                name_and_type,
            }
            | Constant::InvokeDynamic {
                bootstrap,
                name_and_type,
            } => {
                put_u2(out, *bootstrap);
                put_u2(out, *name_and_type);
            }
        }
    }
}

/// Which kind of symbolic reference a member constant is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Field,
    Method,
    InterfaceMethod,
}

/// A resolved `Fieldref` / `Methodref` / `InterfaceMethodref`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub kind: MemberKind,
    /// Internal name of the declaring type, e.g. `java/lang/Object`
    pub owner: &'a [u8],
    pub name: &'a [u8],
    pub descriptor: &'a [u8],
}

impl MemberRef<'_> {
    pub fn owner_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.owner)
    }

    pub fn name_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.name)
    }

    pub fn descriptor_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.descriptor)
    }
}

/// The constant pool of one class file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    pub fn new() -> Self {
        Self {
            entries: vec![Constant::Unusable],
        }
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let count = r.u2()?;
        let mut entries = Vec::with_capacity(count as usize);
        entries.push(Constant::Unusable);
        let mut index: u16 = 1;
        while index < count {
            let tag = r.u1()?;
            entries.push(Constant::decode(tag, index, r)?);
            if slot_width(tag) == 2 {
                entries.push(Constant::Unusable);
            }
            index = index.saturating_add(slot_width(tag));
        }
        // A trailing long/double may claim one slot past the declared count
        entries.truncate(count.max(1) as usize);
        Ok(Self { entries })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        put_u2(out, self.entries.len() as u16);
        for entry in &self.entries[1..] {
            entry.encode(out);
        }
    }

    /// Number of slots, i.e. the `constant_pool_count` field.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> {
        self.entries
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, c)| !matches!(c, Constant::Unusable))
            .map(|(i, c)| (i as u16, c))
    }

    pub fn get(&self, index: u16) -> Result<&Constant> {
        match self.entries.get(index as usize) {
            Some(Constant::Unusable) | None => Err(ClassFileError::BadConstant {
                index,
                expected: "constant",
            }),
            Some(c) => Ok(c),
        }
    }

    pub fn utf8(&self, index: u16) -> Result<&[u8]> {
        match self.get(index) {
            Ok(Constant::Utf8(bytes)) => Ok(bytes),
            _ => Err(ClassFileError::BadConstant {
                index,
                expected: "Utf8",
            }),
        }
    }

    pub fn utf8_lossy(&self, index: u16) -> Cow<'_, str> {
        match self.utf8(index) {
            Ok(bytes) => String::from_utf8_lossy(bytes),
            Err(_) => Cow::Owned(format!("#{}", index)),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<&[u8]> {
        match self.get(index) {
            Ok(Constant::Class { name }) => self.utf8(*name),
            _ => Err(ClassFileError::BadConstant {
                index,
                expected: "Class",
            }),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&[u8], &[u8])> {
        match self.get(index) {
            Ok(Constant::NameAndType { name, descriptor }) => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            _ => Err(ClassFileError::BadConstant {
                index,
                expected: "NameAndType",
            }),
        }
    }

    /// Resolve a field or method reference to its owner, name and descriptor.
    pub fn member_ref(&self, index: u16) -> Result<MemberRef<'_>> {
        let (kind, class, nat) = match self.get(index) {
            Ok(Constant::FieldRef {
                class,
                name_and_type,
            }) => (MemberKind::Field, *class, *name_and_type),
            Ok(Constant::MethodRef {
                class,
                name_and_type,
            }) => (MemberKind::Method, *class, *name_and_type),
            Ok(Constant::InterfaceMethodRef {
                class,
                name_and_type,
            }) => (MemberKind::InterfaceMethod, *class, *name_and_type),
            _ => {
                return Err(ClassFileError::BadConstant {
                    index,
                    expected: "member reference",
                })
            }
        };
        let owner = self.class_name(class)?;
        let (name, descriptor) = self.name_and_type(nat)?;
        Ok(MemberRef {
            kind,
            owner,
            name,
            descriptor,
        })
    }

    /// Name and descriptor of an `InvokeDynamic` / `Dynamic` constant.
    pub fn dynamic_name_and_type(&self, index: u16) -> Result<(&[u8], &[u8])> {
        match self.get(index) {
            Ok(Constant::InvokeDynamic { name_and_type, .. })
            | Ok(Constant::Dynamic { name_and_type, .. }) => self.name_and_type(*name_and_type),
            _ => Err(ClassFileError::BadConstant {
                index,
                expected: "InvokeDynamic",
            }),
        }
    }

    pub fn find(&self, constant: &Constant) -> Option<u16> {
        self.entries
            .iter()
            .position(|c| c == constant)
            .filter(|&i| i != 0)
            .map(|i| i as u16)
    }

    /// Append an entry, returning its index.
    pub fn push(&mut self, constant: Constant) -> Result<u16> {
        let tag = constant.tag().ok_or(ClassFileError::BadConstant {
            index: 0,
            expected: "usable constant",
        })?;
        if let Constant::Utf8(bytes) = &constant {
            crate::bytes::u2_len(bytes.len(), "Utf8 constant")?;
        }
        let index = self.entries.len();
        let new_len = index + slot_width(tag) as usize;
        if new_len > u16::MAX as usize {
            return Err(ClassFileError::TooLarge {
                what: "constant pool",
                size: new_len,
            });
        }
        self.entries.push(constant);
        if slot_width(tag) == 2 {
            self.entries.push(Constant::Unusable);
        }
        Ok(index as u16)
    }

    fn intern(&mut self, constant: Constant) -> Result<u16> {
        match self.find(&constant) {
            Some(index) => Ok(index),
            None => self.push(constant),
        }
    }

    pub fn intern_utf8(&mut self, value: &[u8]) -> Result<u16> {
        self.intern(Constant::Utf8(value.to_vec()))
    }

    pub fn intern_class(&mut self, name: &[u8]) -> Result<u16> {
        let name = self.intern_utf8(name)?;
        self.intern(Constant::Class { name })
    }

    pub fn intern_name_and_type(&mut self, name: &[u8], descriptor: &[u8]) -> Result<u16> {
        let name = self.intern_utf8(name)?;
        let descriptor = self.intern_utf8(descriptor)?;
        self.intern(Constant::NameAndType { name, descriptor })
    }

    pub fn intern_member_ref(
        &mut self,
        kind: MemberKind,
        owner: &[u8],
        name: &[u8],
        descriptor: &[u8],
    ) -> Result<u16> {
        let class = self.intern_class(owner)?;
        let name_and_type = self.intern_name_and_type(name, descriptor)?;
        self.intern(match kind {
            MemberKind::Field => Constant::FieldRef {
                class,
                name_and_type,
            },
            MemberKind::Method => Constant::MethodRef {
                class,
                name_and_type,
            },
            MemberKind::InterfaceMethod => Constant::InterfaceMethodRef {
                class,
                name_and_type,
            },
        })
    }

    pub fn intern_string(&mut self, value: &[u8]) -> Result<u16> {
        let value = self.intern_utf8(value)?;
        self.intern(Constant::String { value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(pool: &ConstantPool) -> Vec<u8> {
        let mut out = Vec::new();
        pool.encode(&mut out);
        out
    }

    #[test]
    fn test_long_takes_two_slots() {
        let mut pool = ConstantPool::new();
        let long = pool.push(Constant::Long(7)).unwrap();
        let next = pool.intern_utf8(b"after").unwrap();
        assert_eq!(long, 1);
        assert_eq!(next, 3);
        assert!(pool.get(2).is_err());
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn test_decode_encode_identity() {
        let mut pool = ConstantPool::new();
        pool.intern_member_ref(MemberKind::Method, b"a/B", b"run", b"()V")
            .unwrap();
        pool.push(Constant::Double(0x7FF8_0000_0000_0001)).unwrap();
        pool.intern_string(b"hello").unwrap();

        let bytes = encoded(&pool);
        let decoded = ConstantPool::decode(&mut ByteReader::new(&bytes)).unwrap();
        assert_eq!(decoded, pool);
        assert_eq!(encoded(&decoded), bytes);
    }

    #[test]
    fn test_member_ref_resolution() {
        let mut pool = ConstantPool::new();
        let idx = pool
            .intern_member_ref(MemberKind::Field, b"x/Owner", b"value", b"I")
            .unwrap();
        let member = pool.member_ref(idx).unwrap();
        assert_eq!(member.kind, MemberKind::Field);
        assert_eq!(member.owner, b"x/Owner");
        assert_eq!(member.name, b"value");
        assert_eq!(member.descriptor, b"I");
        assert!(pool.member_ref(1).is_err());
    }

    #[test]
    fn test_intern_reuses_entries() {
        let mut pool = ConstantPool::new();
        let a = pool
            .intern_member_ref(MemberKind::Method, b"a/B", b"run", b"()V")
            .unwrap();
        let len = pool.len();
        let b = pool
            .intern_member_ref(MemberKind::Method, b"a/B", b"run", b"()V")
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.len(), len);
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let bytes = [0x00, 0x02, 0x02, 0x00];
        let err = ConstantPool::decode(&mut ByteReader::new(&bytes)).unwrap_err();
        assert_eq!(err, ClassFileError::UnknownConstantTag { tag: 2, index: 1 });
    }
}
