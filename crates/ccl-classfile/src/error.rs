//! Codec error type.
//!
//! Decode-side variants mean the input bytes are not a well-formed class file.
//! Encode-side variants mean the in-memory model was left in a state that
//! cannot be serialized, which is always a defect in the code that edited it.

use std::fmt;

/// Errors produced while decoding or encoding a class file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassFileError {
    /// Input ended before a structure was complete.
    Truncated {
        /// Byte offset where the read started
        offset: usize,
        /// Number of bytes the read needed
        needed: usize,
    },
    /// The first four bytes are not `0xCAFEBABE`.
    BadMagic(u32),
    /// Bytes remain after the last class-level attribute.
    TrailingBytes {
        /// Number of unconsumed bytes
        remaining: usize,
    },
    /// A constant pool index is zero, out of range, or names the wrong kind of entry.
    BadConstant {
        /// Offending index
        index: u16,
        /// What the caller expected to find there
        expected: &'static str,
    },
    /// A constant pool tag byte is not defined by the class file format.
    UnknownConstantTag {
        /// The tag byte
        tag: u8,
        /// Pool index at which it was found
        index: u16,
    },
    /// An opcode byte is not defined, or is not valid after `wide`.
    InvalidOpcode {
        /// The opcode byte
        opcode: u8,
        /// Code offset of the instruction
        offset: usize,
    },
    /// A branch, handler, frame or table offset does not land on an instruction boundary.
    BadCodeOffset {
        /// The offending offset
        offset: i64,
        /// Structure that carried it
        context: &'static str,
    },
    /// A descriptor string could not be parsed.
    BadDescriptor(String),
    /// A stack map frame or verification type is malformed.
    BadStackMapFrame {
        /// Frame type byte
        frame_type: u8,
    },
    /// An attribute's declared length disagrees with its contents.
    AttributeLength {
        /// Attribute name
        name: String,
    },
    /// An instruction refers to a label that is not part of the list.
    DanglingLabel,
    /// A branch offset does not fit the width of its instruction.
    BranchOutOfRange {
        /// Opcode of the branch instruction
        opcode: u8,
        /// Required relative offset
        delta: i64,
    },
    /// A table grew beyond the limits of its count field.
    TooLarge {
        /// What overflowed
        what: &'static str,
        /// Size it reached
        size: usize,
    },
    /// Operand stack simulation popped more values than were available.
    StackUnderflow {
        /// Mnemonic of the instruction that underflowed
        mnemonic: &'static str,
    },
}

impl fmt::Display for ClassFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassFileError::Truncated { offset, needed } => {
                write!(f, "unexpected end of input at byte {} (needed {} more)", offset, needed)
            }
            ClassFileError::BadMagic(magic) => write!(f, "bad magic number 0x{:08X}", magic),
            ClassFileError::TrailingBytes { remaining } => {
                write!(f, "{} trailing bytes after class attributes", remaining)
            }
            ClassFileError::BadConstant { index, expected } => {
                write!(f, "constant pool index {} is not a valid {}", index, expected)
            }
            ClassFileError::UnknownConstantTag { tag, index } => {
                write!(f, "unknown constant pool tag {} at index {}", tag, index)
            }
            ClassFileError::InvalidOpcode { opcode, offset } => {
                write!(f, "invalid opcode 0x{:02X} at code offset {}", opcode, offset)
            }
            ClassFileError::BadCodeOffset { offset, context } => {
                write!(f, "{} offset {} is not an instruction boundary", context, offset)
            }
            ClassFileError::BadDescriptor(desc) => write!(f, "malformed descriptor {:?}", desc),
            ClassFileError::BadStackMapFrame { frame_type } => {
                write!(f, "malformed stack map frame (type {})", frame_type)
            }
            ClassFileError::AttributeLength { name } => {
                write!(f, "attribute {} length does not match its contents", name)
            }
            ClassFileError::DanglingLabel => {
                write!(f, "instruction refers to a label outside its list")
            }
            ClassFileError::BranchOutOfRange { opcode, delta } => write!(
                f,
                "branch offset {} does not fit opcode 0x{:02X}",
                delta, opcode
            ),
            ClassFileError::TooLarge { what, size } => {
                write!(f, "{} too large ({})", what, size)
            }
            ClassFileError::StackUnderflow { mnemonic } => {
                write!(f, "operand stack underflow at {}", mnemonic)
            }
        }
    }
}

impl std::error::Error for ClassFileError {}

impl ClassFileError {
    /// Whether the error describes bad input rather than a bad edit.
    pub fn is_decode_error(&self) -> bool {
        !matches!(
            self,
            ClassFileError::DanglingLabel
                | ClassFileError::BranchOutOfRange { .. }
                | ClassFileError::TooLarge { .. }
                | ClassFileError::StackUnderflow { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ClassFileError>;
