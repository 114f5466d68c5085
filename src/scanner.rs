//! Constant pool pre-filter.
//!
//! Walks the raw pool by tag width and looks for a marker inside `Utf8`
//! payloads. Nothing is allocated and nothing past the pool is read, so
//! the check costs far less than a decode for the common no-match case.

use ccl_classfile::bytes::ByteReader;
use ccl_classfile::class::MAGIC;
use ccl_classfile::constant_pool::{fixed_width, slot_width, TAG_UTF8};
use ccl_classfile::Result;

/// Internal name every redirected reference mentions.
pub const RENDER_STATE_MARKER: &[u8] = b"codechicken/lib/render/CCRenderState";

#[derive(Debug, Clone)]
pub struct ConstantPoolScanner {
    marker: Vec<u8>,
}

impl Default for ConstantPoolScanner {
    fn default() -> Self {
        Self::new(RENDER_STATE_MARKER)
    }
}

impl ConstantPoolScanner {
    pub fn new(marker: &[u8]) -> Self {
        Self {
            marker: marker.to_vec(),
        }
    }

    pub fn marker(&self) -> &[u8] {
        &self.marker
    }

    /// Whether some `Utf8` constant contains the marker.
    ///
    /// Input that is not a class file, or whose pool cannot be walked, is
    /// never admitted.
    pub fn matches(&self, bytes: &[u8]) -> bool {
        self.scan(bytes).unwrap_or(false)
    }

    fn scan(&self, bytes: &[u8]) -> Result<bool> {
        let mut r = ByteReader::new(bytes);
        if r.u4()? != MAGIC {
            return Ok(false);
        }
        // minor_version, major_version
        r.skip(4)?;
        let count = r.u2()?;
        let mut index: u16 = 1;
        while index < count {
            let tag = r.u1()?;
            if tag == TAG_UTF8 {
                let len = r.u2()?;
                if contains(r.bytes(len as usize)?, &self.marker) {
                    return Ok(true);
                }
            } else {
                match fixed_width(tag) {
                    Some(width) => r.skip(width)?,
                    None => return Ok(false),
                }
            }
            index = index.saturating_add(slot_width(tag));
        }
        Ok(false)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty()
        || haystack.len() >= needle.len() && haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccl_classfile::ClassBuilder;

    fn class_referencing(owner: &str) -> Vec<u8> {
        let mut builder = ClassBuilder::new("demo/Scanned").unwrap();
        builder
            .method(0x0009, "run", "()V", |m| {
                m.invoke_static(owner, "reset", "()V")?;
                m.op(ccl_classfile::opcodes::RETURN);
                Ok(())
            })
            .unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_admits_marker_reference() {
        let scanner = ConstantPoolScanner::default();
        assert!(scanner.matches(&class_referencing("codechicken/lib/render/CCRenderState")));
    }

    #[test]
    fn test_admits_marker_inside_descriptor() {
        let mut builder = ClassBuilder::new("demo/Holder").unwrap();
        builder
            .field(0x0001, "state", "Lcodechicken/lib/render/CCRenderState;")
            .unwrap();
        let bytes = builder.build().unwrap();
        assert!(ConstantPoolScanner::default().matches(&bytes));
    }

    #[test]
    fn test_rejects_unrelated_class() {
        let scanner = ConstantPoolScanner::default();
        assert!(!scanner.matches(&class_referencing("codechicken/lib/render/Other")));
    }

    #[test]
    fn test_rejects_non_class_bytes() {
        let scanner = ConstantPoolScanner::default();
        assert!(!scanner.matches(b""));
        assert!(!scanner.matches(b"codechicken/lib/render/CCRenderState"));
        let mut bytes = class_referencing("codechicken/lib/render/CCRenderState");
        bytes[0] = 0;
        assert!(!scanner.matches(&bytes));
    }

    #[test]
    fn test_rejects_truncated_pool() {
        let bytes = class_referencing("codechicken/lib/render/CCRenderState");
        // Header plus count plus one tag byte
        assert!(!ConstantPoolScanner::default().matches(&bytes[..11]));
    }

    #[test]
    fn test_long_constants_take_two_slots() {
        let mut builder = ClassBuilder::new("demo/Longs").unwrap();
        builder
            .method(0x0009, "run", "()J", |m| {
                m.ldc_long(0x1234_5678_9ABC)?;
                m.invoke_static("codechicken/lib/render/CCRenderState", "reset", "()V")?;
                m.op(ccl_classfile::opcodes::LRETURN);
                Ok(())
            })
            .unwrap();
        assert!(ConstantPoolScanner::default().matches(&builder.build().unwrap()));
    }
}
