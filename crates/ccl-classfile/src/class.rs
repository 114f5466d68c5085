//! Top-level class file structure.

use std::borrow::Cow;

use crate::bytes::{put_u2, put_u4, u2_len, ByteReader};
use crate::code::{Code, RawAttribute};
use crate::constant_pool::ConstantPool;
use crate::error::{ClassFileError, Result};
use crate::maxs::compute_maxs;

pub const MAGIC: u32 = 0xCAFE_BABE;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_FINAL: u16 = 0x0010;
pub const ACC_SUPER: u16 = 0x0020;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_ABSTRACT: u16 = 0x0400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub access_flags: u16,
    pub name: u16,
    pub descriptor: u16,
    pub attributes: Vec<RawAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub access_flags: u16,
    pub name: u16,
    pub descriptor: u16,
    pub code: Option<Code>,
    /// Attributes other than `Code`
    pub attributes: Vec<RawAttribute>,
    /// Position of `Code` among the method attributes
    code_slot: usize,
}

impl Method {
    pub fn new(access_flags: u16, name: u16, descriptor: u16, code: Option<Code>) -> Self {
        Self {
            access_flags,
            name,
            descriptor,
            code,
            attributes: Vec::new(),
            code_slot: 0,
        }
    }

    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }

    pub fn name<'p>(&self, pool: &'p ConstantPool) -> Cow<'p, str> {
        pool.utf8_lossy(self.name)
    }

    pub fn descriptor<'p>(&self, pool: &'p ConstantPool) -> Cow<'p, str> {
        pool.utf8_lossy(self.descriptor)
    }

    /// Whether the body changed since decoding.
    pub fn is_modified(&self) -> bool {
        self.code.as_ref().is_some_and(Code::is_modified)
    }

    fn decode(r: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<Self> {
        let access_flags = r.u2()?;
        let name = r.u2()?;
        let descriptor = r.u2()?;
        let count = r.u2()?;
        let mut code = None;
        let mut code_slot = 0;
        let mut attributes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let raw = RawAttribute::decode(r)?;
            if code.is_none() && pool.utf8(raw.name).ok() == Some(b"Code".as_slice()) {
                code_slot = attributes.len();
                code = Some(Code::decode(raw.name, &raw.data, pool)?);
            } else {
                attributes.push(raw);
            }
        }
        Ok(Self {
            access_flags,
            name,
            descriptor,
            code,
            attributes,
            code_slot,
        })
    }

    fn encode(&self, out: &mut Vec<u8>, pool: &ConstantPool) -> Result<()> {
        put_u2(out, self.access_flags);
        put_u2(out, self.name);
        put_u2(out, self.descriptor);
        let count = self.attributes.len() + usize::from(self.code.is_some());
        put_u2(out, u2_len(count, "method attributes")?);
        let slot = self.code_slot.min(self.attributes.len());
        for (i, attr) in self.attributes.iter().enumerate() {
            if i == slot {
                self.encode_code(out, pool)?;
            }
            attr.encode(out)?;
        }
        if slot == self.attributes.len() {
            self.encode_code(out, pool)?;
        }
        Ok(())
    }

    fn encode_code(&self, out: &mut Vec<u8>, pool: &ConstantPool) -> Result<()> {
        let Some(code) = &self.code else {
            return Ok(());
        };
        if code.encode_original(out)? {
            return Ok(());
        }
        let (max_stack, max_locals) =
            compute_maxs(code, pool, self.is_static(), pool.utf8(self.descriptor)?)?;
        code.encode(out, max_stack, max_locals)
    }
}

/// A decoded class file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<RawAttribute>,
}

impl ClassFile {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        let magic = r.u4()?;
        if magic != MAGIC {
            return Err(ClassFileError::BadMagic(magic));
        }
        let minor_version = r.u2()?;
        let major_version = r.u2()?;
        let pool = ConstantPool::decode(&mut r)?;
        let access_flags = r.u2()?;
        let this_class = r.u2()?;
        let super_class = r.u2()?;
        pool.class_name(this_class)?;

        let interface_count = r.u2()?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            interfaces.push(r.u2()?);
        }

        let field_count = r.u2()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let access_flags = r.u2()?;
            let name = r.u2()?;
            let descriptor = r.u2()?;
            let attr_count = r.u2()?;
            let mut attributes = Vec::with_capacity(attr_count as usize);
            for _ in 0..attr_count {
                attributes.push(RawAttribute::decode(&mut r)?);
            }
            fields.push(Field {
                access_flags,
                name,
                descriptor,
                attributes,
            });
        }

        let method_count = r.u2()?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            methods.push(Method::decode(&mut r, &pool)?);
        }

        let attr_count = r.u2()?;
        let mut attributes = Vec::with_capacity(attr_count as usize);
        for _ in 0..attr_count {
            attributes.push(RawAttribute::decode(&mut r)?);
        }
        if !r.is_empty() {
            return Err(ClassFileError::TrailingBytes {
                remaining: r.remaining(),
            });
        }

        Ok(Self {
            minor_version,
            major_version,
            pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// Serialize, recomputing `max_stack`/`max_locals` for modified methods only.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(4096);
        put_u4(&mut out, MAGIC);
        put_u2(&mut out, self.minor_version);
        put_u2(&mut out, self.major_version);
        self.pool.encode(&mut out);
        put_u2(&mut out, self.access_flags);
        put_u2(&mut out, self.this_class);
        put_u2(&mut out, self.super_class);

        put_u2(&mut out, u2_len(self.interfaces.len(), "interfaces")?);
        for iface in &self.interfaces {
            put_u2(&mut out, *iface);
        }

        put_u2(&mut out, u2_len(self.fields.len(), "fields")?);
        for field in &self.fields {
            put_u2(&mut out, field.access_flags);
            put_u2(&mut out, field.name);
            put_u2(&mut out, field.descriptor);
            put_u2(&mut out, u2_len(field.attributes.len(), "field attributes")?);
            for attr in &field.attributes {
                attr.encode(&mut out)?;
            }
        }

        put_u2(&mut out, u2_len(self.methods.len(), "methods")?);
        for method in &self.methods {
            method.encode(&mut out, &self.pool)?;
        }

        put_u2(&mut out, u2_len(self.attributes.len(), "class attributes")?);
        for attr in &self.attributes {
            attr.encode(&mut out)?;
        }
        Ok(out)
    }

    /// Internal name of this class, e.g. `net/example/Foo`.
    pub fn name(&self) -> Cow<'_, str> {
        match self.pool.class_name(self.this_class) {
            Ok(bytes) => String::from_utf8_lossy(bytes),
            Err(_) => Cow::Owned(format!("#{}", self.this_class)),
        }
    }

    pub fn super_name(&self) -> Option<Cow<'_, str>> {
        self.pool
            .class_name(self.super_class)
            .ok()
            .map(String::from_utf8_lossy)
    }

    pub fn is_modified(&self) -> bool {
        self.methods.iter().any(Method::is_modified)
    }

    pub fn method(&self, name: &str, descriptor: &str) -> Option<&Method> {
        self.methods.iter().find(|m| {
            self.pool.utf8(m.name).ok() == Some(name.as_bytes())
                && self.pool.utf8(m.descriptor).ok() == Some(descriptor.as_bytes())
        })
    }

    pub fn method_mut(&mut self, name: &str, descriptor: &str) -> Option<&mut Method> {
        let pool = &self.pool;
        self.methods.iter_mut().find(|m| {
            pool.utf8(m.name).ok() == Some(name.as_bytes())
                && pool.utf8(m.descriptor).ok() == Some(descriptor.as_bytes())
        })
    }
}
