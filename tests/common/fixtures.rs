//! Class files used by the redirection tests.
//!
//! Every fixture is assembled with `ClassBuilder`, so the bytes carry
//! correct `max_stack` / `max_locals` and stack map frames.

use ccl_classfile::class::{ACC_PUBLIC, ACC_STATIC};
use ccl_classfile::opcodes::*;
use ccl_classfile::{ClassBuilder, FrameKind, StackOp, VerificationType};

pub const OWNER: &str = "codechicken/lib/render/CCRenderState";
pub const ACCESSOR_DESC: &str = "()Lcodechicken/lib/render/CCRenderState;";
pub const PUBLIC_STATIC: u16 = ACC_PUBLIC | ACC_STATIC;

fn build(name: &str, body: impl FnOnce(&mut ClassBuilder)) -> Vec<u8> {
    let mut builder = ClassBuilder::new(name).unwrap();
    body(&mut builder);
    builder.build().unwrap()
}

/// `static int colour() { return CCRenderState.baseColour; }`
pub fn static_read_class() -> Vec<u8> {
    build("mods/Reader", |b| {
        b.method(PUBLIC_STATIC, "colour", "()I", |m| {
            m.get_static(OWNER, "baseColour", "I")?;
            m.op(IRETURN);
            Ok(())
        })
        .unwrap();
    })
}

/// `static void paint(int c) { CCRenderState.baseColour = c; }`
pub fn static_write_class() -> Vec<u8> {
    build("mods/Writer", |b| {
        b.method(PUBLIC_STATIC, "paint", "(I)V", |m| {
            m.var(ILOAD, 0);
            m.put_static(OWNER, "baseColour", "I")?;
            m.op(RETURN);
            Ok(())
        })
        .unwrap();
    })
}

/// A category-2 static write.
pub fn wide_write_class() -> Vec<u8> {
    build("mods/WideWriter", |b| {
        b.method(PUBLIC_STATIC, "store", "(J)V", |m| {
            m.var(LLOAD, 0);
            m.put_static(OWNER, "colour", "J")?;
            m.op(RETURN);
            Ok(())
        })
        .unwrap();
    })
}

/// `static void clear() { CCRenderState.reset(); }`
pub fn static_call_class() -> Vec<u8> {
    build("mods/Resetter", |b| {
        b.method(PUBLIC_STATIC, "clear", "()V", |m| {
            m.invoke_static(OWNER, "reset", "()V")?;
            m.op(RETURN);
            Ok(())
        })
        .unwrap();
    })
}

/// `static void tint(int, long)` forwarding both arguments to `setColour`.
pub fn spilled_call_class() -> Vec<u8> {
    build("mods/Tinter", |b| {
        b.method(PUBLIC_STATIC, "tint", "(IJ)V", |m| {
            m.var(ILOAD, 0);
            m.var(LLOAD, 1);
            m.invoke_static(OWNER, "setColour", "(IJ)V")?;
            m.op(RETURN);
            Ok(())
        })
        .unwrap();
    })
}

/// Code already written against the instance API, with old method names.
pub fn instance_shaped_class() -> Vec<u8> {
    build("mods/Modern", |b| {
        b.method(PUBLIC_STATIC, "draw", "()V", |m| {
            m.invoke_static(OWNER, "instance", ACCESSOR_DESC)?;
            m.stack(StackOp::Dup);
            m.op(ACONST_NULL);
            m.invoke_virtual(OWNER, "setPipeline", "(Ljava/lang/Object;)V")?;
            m.invoke_virtual(OWNER, "draw", "()V")?;
            m.op(RETURN);
            Ok(())
        })
        .unwrap();
    })
}

/// Mentions the render state type without any redirectable site.
pub fn marker_only_class() -> Vec<u8> {
    build("mods/Bystander", |b| {
        b.method(PUBLIC_STATIC, "peek", "()I", |m| {
            m.invoke_static(OWNER, "instance", ACCESSOR_DESC)?;
            m.get_field(OWNER, "baseColour", "I")?;
            m.op(IRETURN);
            Ok(())
        })
        .unwrap();
    })
}

/// No reference to the render state type at all.
pub fn unrelated_class() -> Vec<u8> {
    build("mods/Unrelated", |b| {
        b.method(PUBLIC_STATIC, "answer", "()I", |m| {
            m.iconst(42)?;
            m.op(IRETURN);
            Ok(())
        })
        .unwrap();
    })
}

/// `static int pick(boolean)` whose else branch starts at a redirected read.
pub fn branch_to_site_class() -> Vec<u8> {
    build("mods/Picker", |b| {
        b.method(PUBLIC_STATIC, "pick", "(Z)I", |m| {
            m.line(20);
            m.var(ILOAD, 0);
            let to_else = m.forward(IFEQ);
            m.op(ICONST_0);
            m.op(IRETURN);
            m.bind(to_else);
            m.frame(FrameKind::Same);
            m.line(21);
            m.get_static(OWNER, "baseColour", "I")?;
            m.op(IRETURN);
            Ok(())
        })
        .unwrap();
    })
}

/// `static void guarded()` with a catch-all handler around a redirected call.
pub fn guarded_call_class() -> Vec<u8> {
    build("mods/Guarded", |b| {
        b.method(PUBLIC_STATIC, "guarded", "()V", |m| {
            let start = m.label();
            m.invoke_static(OWNER, "draw", "()V")?;
            let end = m.label();
            m.op(RETURN);
            let throwable = m.pool().intern_class(b"java/lang/Throwable")?;
            let handler = m.frame(FrameKind::SameLocals1(VerificationType::Object(throwable)));
            m.stack(StackOp::Pop);
            m.op(RETURN);
            m.try_catch(start, end, handler, Some("java/lang/Throwable"))?;
            Ok(())
        })
        .unwrap();
    })
}

/// Several methods covering every rewrite, plus one untouched method.
pub fn mixed_class() -> Vec<u8> {
    build("mods/Mixed", |b| {
        b.method(PUBLIC_STATIC, "read", "()I", |m| {
            m.get_static(OWNER, "vertexIndex", "I")?;
            m.get_static(OWNER, "lastVertexIndex", "I")?;
            m.op(IADD);
            m.op(IRETURN);
            Ok(())
        })
        .unwrap()
        .method(PUBLIC_STATIC, "write", "(Ljava/lang/Object;)V", |m| {
            m.var(ALOAD, 0);
            m.put_static(OWNER, "model", "Ljava/lang/Object;")?;
            m.op(ICONST_1);
            m.put_static(OWNER, "useNormals", "Z")?;
            m.op(RETURN);
            Ok(())
        })
        .unwrap()
        .method(PUBLIC_STATIC, "calls", "(II)V", |m| {
            m.invoke_static(OWNER, "pullLightmap", "()V")?;
            m.var(ILOAD, 0);
            m.var(ILOAD, 1);
            m.invoke_static(OWNER, "setVertexRange", "(II)V")?;
            m.invoke_static(OWNER, "startDrawing", "()V")?;
            m.op(RETURN);
            Ok(())
        })
        .unwrap()
        .method(PUBLIC_STATIC, "untouched", "()I", |m| {
            m.iconst(7)?;
            m.op(IRETURN);
            Ok(())
        })
        .unwrap();
    })
}

/// A call site naming a field rule.
pub fn mismatched_call_class() -> Vec<u8> {
    build("mods/Confused", |b| {
        b.method(PUBLIC_STATIC, "odd", "()I", |m| {
            m.invoke_static(OWNER, "baseColour", "()I")?;
            m.op(IRETURN);
            Ok(())
        })
        .unwrap();
    })
}

/// A field access naming a call rule.
pub fn mismatched_field_class() -> Vec<u8> {
    build("mods/Confused2", |b| {
        b.method(PUBLIC_STATIC, "odd", "()I", |m| {
            m.get_static(OWNER, "reset", "I")?;
            m.op(IRETURN);
            Ok(())
        })
        .unwrap();
    })
}

/// Padding that leaves a branch over a redirected read just inside the
/// 16-bit offset range.
pub const FAR_PADDING: usize = 32_760;

/// `branch` (a `goto` or `if*` on the `boolean` argument) jumping over a
/// redirected read and `FAR_PADDING` nops. `framed` adds a stack map frame
/// at the target.
pub fn far_branch_class(branch: u8, framed: bool) -> Vec<u8> {
    build("mods/Far", |b| {
        b.method(PUBLIC_STATIC, "skip", "(Z)V", |m| {
            if branch != GOTO {
                m.var(ILOAD, 0);
            }
            let over = m.forward(branch);
            m.get_static(OWNER, "baseColour", "I")?;
            m.stack(StackOp::Pop);
            for _ in 0..FAR_PADDING {
                m.op(NOP);
            }
            m.bind(over);
            if framed {
                m.frame(FrameKind::Same);
            }
            m.op(RETURN);
            Ok(())
        })
        .unwrap();
    })
}
