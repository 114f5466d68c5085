//! End-to-end transformer behaviour.
//!
//! Test coverage areas:
//! - The four reference scenarios (read, write, call, no marker)
//! - Byte identity for units with nothing to rewrite
//! - Stack shape and metadata of rewritten bodies
//! - Offset-bearing structures that pointed at rewritten sites
//! - Fixed point and rule mismatches
//! - Concurrent use of one transformer

mod common;

use std::borrow::Cow;
use std::sync::Arc;
use std::thread;

use ccl_classfile::opcodes::*;
use ccl_classfile::{ClassFile, FieldAccess, Insn, InvokeMode, StackOp};
use ccl_redirector::{Redirector, RedirectorConfig, RuleTable, TransformError};

use common::*;

fn redirector() -> Redirector {
    Redirector::from_config(&RedirectorConfig::default()).unwrap()
}

fn transformed(name: &str, bytes: &[u8]) -> ClassFile {
    let out = assert_ok(redirector().transform(name, bytes), name);
    ClassFile::decode(&assert_owned(out, name)).unwrap()
}

// =============================================================================
// Reference scenarios
// =============================================================================

mod scenario_tests {
    use super::*;

    #[test]
    fn test_static_field_read() {
        let class = transformed("mods.Reader", &static_read_class());
        let insns = real_insns(&class, "colour", "()I");
        assert_eq!(insns.len(), 3);
        assert!(matches!(insns[0], Insn::Invoke { mode: InvokeMode::Static, .. }));
        assert_eq!(member_name(&class, &insns[0]), "instance");
        assert!(matches!(
            insns[1],
            Insn::Field {
                access: FieldAccess::GET_FIELD,
                ..
            }
        ));
        assert_eq!(member_name(&class, &insns[1]), "baseColour");
        assert_eq!(insns[2], Insn::Op(IRETURN));
    }

    #[test]
    fn test_static_field_write() {
        let class = transformed("mods.Writer", &static_write_class());
        let insns = real_insns(&class, "paint", "(I)V");
        assert_eq!(insns[0], Insn::var(ILOAD, 0));
        assert_eq!(member_name(&class, &insns[1]), "instance");
        assert_eq!(insns[2], Insn::Stack(StackOp::Swap));
        assert!(matches!(
            insns[3],
            Insn::Field {
                access: FieldAccess::PUT_FIELD,
                ..
            }
        ));
        assert_eq!(member_name(&class, &insns[3]), "baseColour");
        assert_eq!(code_of(&class, "paint", "(I)V").max_stack, 2);
    }

    #[test]
    fn test_static_simple_call() {
        let class = transformed("mods.Resetter", &static_call_class());
        let insns = real_insns(&class, "clear", "()V");
        assert_eq!(insns.len(), 3);
        assert_eq!(member_name(&class, &insns[0]), "instance");
        assert!(matches!(insns[1], Insn::Invoke { mode: InvokeMode::Virtual, .. }));
        assert_eq!(member_name(&class, &insns[1]), "resetInstance");
    }

    #[test]
    fn test_unit_without_marker_is_never_decoded() {
        let redirector = redirector();
        let bytes = unrelated_class();
        let out = redirector.transform("mods.Unrelated", &bytes).unwrap();
        assert_borrowed(&out, &bytes, "unrelated class");

        let snap = redirector.metrics().snapshot();
        assert_eq!(snap.units_seen, 1);
        assert_eq!(snap.units_skipped, 1);
        assert_eq!(snap.units_decoded, 0);
    }
}

// =============================================================================
// Byte identity
// =============================================================================

mod identity_tests {
    use super::*;

    #[test]
    fn test_marker_without_sites_returns_input() {
        let redirector = redirector();
        let bytes = marker_only_class();
        let out = redirector.transform("mods.Bystander", &bytes).unwrap();
        assert_borrowed(&out, &bytes, "marker-only class");

        let snap = redirector.metrics().snapshot();
        assert_eq!(snap.units_decoded, 1);
        assert_eq!(snap.units_unchanged, 1);
        assert_eq!(snap.units_rewritten, 0);
    }

    #[test]
    fn test_untouched_method_keeps_its_code() {
        let original = ClassFile::decode(&mixed_class()).unwrap();
        let class = transformed("mods.Mixed", &mixed_class());
        let before = code_of(&original, "untouched", "()I").original_bytes().unwrap();
        let after = code_of(&class, "untouched", "()I").original_bytes().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_existing_pool_indices_survive() {
        let original = ClassFile::decode(&mixed_class()).unwrap();
        let class = transformed("mods.Mixed", &mixed_class());
        for (index, constant) in original.pool.iter() {
            assert_eq!(class.pool.get(index).unwrap(), constant, "pool index {}", index);
        }
        assert!(class.pool.len() > original.pool.len());
    }
}

// =============================================================================
// Stack shape and metadata
// =============================================================================

mod stack_shape_tests {
    use super::*;

    fn compare(bytes: &[u8], name: &str, desc: &str) -> (Simulation, Simulation) {
        let original = ClassFile::decode(bytes).unwrap();
        let class = transformed("mods.Shape", bytes);
        let before = simulate(&real_insns(&original, name, desc), &original.pool);
        let after = simulate(&real_insns(&class, name, desc), &class.pool);
        assert_eq!(before.net, after.net, "{}{} net stack effect changed", name, desc);
        assert!(code_of(&class, name, desc).max_stack as i32 >= after.peak);
        (before, after)
    }

    #[test]
    fn test_field_read_shape() {
        let (before, after) = compare(&static_read_class(), "colour", "()I");
        assert_eq!(before.peak, 1);
        assert_eq!(after.peak, 1);
    }

    #[test]
    fn test_field_write_shape() {
        let (_, after) = compare(&static_write_class(), "paint", "(I)V");
        assert_eq!(after.peak, 2);
    }

    #[test]
    fn test_wide_field_write_shape() {
        let (before, after) = compare(&wide_write_class(), "store", "(J)V");
        assert_eq!(before.peak, 2);
        assert_eq!(after.peak, 4);

        let class = transformed("mods.WideWriter", &wide_write_class());
        let insns = real_insns(&class, "store", "(J)V");
        assert_eq!(insns[2], Insn::Stack(StackOp::DupX2));
        assert_eq!(insns[3], Insn::Stack(StackOp::Pop));
        assert_eq!(code_of(&class, "store", "(J)V").max_stack, 4);
    }

    #[test]
    fn test_simple_call_shape() {
        compare(&static_call_class(), "clear", "()V");
    }

    #[test]
    fn test_spilled_call_shape_and_locals() {
        let (before, after) = compare(&spilled_call_class(), "tint", "(IJ)V");
        assert_eq!(before.peak, 3);
        assert_eq!(after.peak, 4);

        let class = transformed("mods.Tinter", &spilled_call_class());
        let code = code_of(&class, "tint", "(IJ)V");
        assert_eq!(code.max_locals, 6);
        assert_eq!(code.max_stack, 4);

        let insns = real_insns(&class, "tint", "(IJ)V");
        assert_eq!(
            &insns[2..8],
            &[
                Insn::var(LSTORE, 4),
                Insn::var(ISTORE, 3),
                insns[4].clone(),
                Insn::var(ILOAD, 3),
                Insn::var(LLOAD, 4),
                insns[7].clone(),
            ]
        );
        assert_eq!(member_name(&class, &insns[4]), "instance");
        assert_eq!(member_name(&class, &insns[7]), "setColourInstance");
    }

    #[test]
    fn test_mixed_methods_keep_shape() {
        let bytes = mixed_class();
        compare(&bytes, "read", "()I");
        compare(&bytes, "write", "(Ljava/lang/Object;)V");
        compare(&bytes, "calls", "(II)V");
    }

    #[test]
    fn test_mixed_report_counts() {
        let mut class = ClassFile::decode(&mixed_class()).unwrap();
        let report = ccl_redirector::rewrite_class(
            "mods.Mixed",
            &mut class,
            &RuleTable::render_state().unwrap(),
        )
        .unwrap();
        assert_eq!(report.field_reads, 2);
        assert_eq!(report.field_writes, 2);
        assert_eq!(report.static_calls, 2);
        assert_eq!(report.spilled_calls, 1);
        assert_eq!(report.renamed_calls, 0);
        assert_eq!(report.methods, 3);
        assert_eq!(report.sites(), 7);
    }
}

// =============================================================================
// Branches, handlers, debug tables and frames
// =============================================================================

mod retarget_tests {
    use super::*;

    #[test]
    fn test_branch_reaches_inserted_accessor() {
        let class = transformed("mods.Picker", &branch_to_site_class());
        let code = code_of(&class, "pick", "(Z)I");
        let target = code
            .insns
            .iter()
            .find_map(|(_, insn)| match insn {
                Insn::Jump { target, .. } => Some(*target),
                _ => None,
            })
            .unwrap();
        let landing = real_at(&code.insns, target).unwrap();
        assert_eq!(member_name(&class, landing), "instance");

        let frame = code.stack_map_frames().next().unwrap();
        assert_eq!(real_at(&code.insns, frame.label), Some(landing));

        let line = code.line_numbers().find(|l| l.line == 21).unwrap();
        assert_eq!(real_at(&code.insns, line.start), Some(landing));
    }

    #[test]
    fn test_handler_range_covers_accessor() {
        let class = transformed("mods.Guarded", &guarded_call_class());
        let code = code_of(&class, "guarded", "()V");
        let handler = &code.handlers[0];
        let start = real_at(&code.insns, handler.start).unwrap();
        assert_eq!(member_name(&class, start), "instance");
        assert_eq!(real_at(&code.insns, handler.end), Some(&Insn::Op(RETURN)));
        assert_eq!(real_at(&code.insns, handler.handler), Some(&Insn::Stack(StackOp::Pop)));
        assert_eq!(code.max_stack, 1);
    }

    fn jump_target(insn: &Insn) -> ccl_classfile::InsnId {
        match insn {
            Insn::Jump { target, .. } => *target,
            other => panic!("not a jump: {:?}", other),
        }
    }

    #[test]
    fn test_far_goto_is_widened() {
        for framed in [false, true] {
            let class = transformed("mods.Far", &far_branch_class(GOTO, framed));
            let code = code_of(&class, "skip", "(Z)V");
            let insns = real_insns(&class, "skip", "(Z)V");
            assert!(matches!(insns[0], Insn::Jump { opcode: GOTO_W, .. }), "framed={}", framed);
            assert_eq!(member_name(&class, &insns[1]), "instance");
            assert_eq!(real_at(&code.insns, jump_target(&insns[0])), Some(&Insn::Op(RETURN)));
            if framed {
                let frame = code.stack_map_frames().next().unwrap();
                assert_eq!(real_at(&code.insns, frame.label), Some(&Insn::Op(RETURN)));
            }
        }
    }

    #[test]
    fn test_far_conditional_without_frames_is_inverted() {
        let class = transformed("mods.Far", &far_branch_class(IFEQ, false));
        let code = code_of(&class, "skip", "(Z)V");
        let insns = real_insns(&class, "skip", "(Z)V");
        assert!(matches!(insns[1], Insn::Jump { opcode: IFNE, .. }));
        assert!(matches!(insns[2], Insn::Jump { opcode: GOTO_W, .. }));
        let fall_through = real_at(&code.insns, jump_target(&insns[1])).unwrap();
        assert_eq!(member_name(&class, fall_through), "instance");
        assert_eq!(real_at(&code.insns, jump_target(&insns[2])), Some(&Insn::Op(RETURN)));
    }

    #[test]
    fn test_far_conditional_with_frames_is_refused() {
        let err = redirector()
            .transform("mods.Far", &far_branch_class(IFEQ, true))
            .unwrap_err();
        assert!(matches!(err, TransformError::InvariantViolation { .. }));
        assert_error_contains(&err, "does not fit opcode", "framed conditional");
    }
}

// =============================================================================
// Fixed point and renames
// =============================================================================

mod fixed_point_tests {
    use super::*;

    #[test]
    fn test_second_pass_changes_nothing() {
        for (name, bytes) in [
            ("mods.Mixed", mixed_class()),
            ("mods.Tinter", spilled_call_class()),
            ("mods.Modern", instance_shaped_class()),
            ("mods.Guarded", guarded_call_class()),
        ] {
            let redirector = redirector();
            let once = assert_owned(redirector.transform(name, &bytes).unwrap(), name);
            let twice = redirector.transform(name, &once).unwrap();
            assert_borrowed(&twice, &once, name);
        }
    }

    #[test]
    fn test_instance_shaped_calls_are_only_renamed() {
        let original = ClassFile::decode(&instance_shaped_class()).unwrap();
        let class = transformed("mods.Modern", &instance_shaped_class());
        let before = real_insns(&original, "draw", "()V");
        let after = real_insns(&class, "draw", "()V");
        assert_eq!(before.len(), after.len());
        assert_eq!(member_name(&class, &after[3]), "setPipelineInstance");
        assert_eq!(member_name(&class, &after[4]), "drawInstance");
        assert!(matches!(after[4], Insn::Invoke { mode: InvokeMode::Virtual, .. }));
    }
}

// =============================================================================
// Failures
// =============================================================================

mod failure_tests {
    use super::*;

    #[test]
    fn test_call_on_field_rule_is_violation() {
        let err = redirector()
            .transform("mods.Confused", &mismatched_call_class())
            .unwrap_err();
        assert!(matches!(err, TransformError::InvariantViolation { .. }));
        assert_eq!(err.unit(), "mods.Confused");
        assert_error_contains(&err, "baseColour", "field rule via call");
    }

    #[test]
    fn test_field_on_call_rule_is_violation() {
        let err = redirector()
            .transform("mods.Confused2", &mismatched_field_class())
            .unwrap_err();
        assert!(matches!(err, TransformError::InvariantViolation { .. }));
        assert_error_contains(&err, "simple call", "call rule via field");
    }

    #[test]
    fn test_truncated_admitted_unit_is_malformed() {
        let bytes = static_call_class();
        let truncated = &bytes[..bytes.len() - 3];
        let err = redirector().transform("mods.Resetter", truncated).unwrap_err();
        assert!(matches!(err, TransformError::MalformedUnit { .. }));
        assert_error_contains(&err, "malformed class mods.Resetter", "truncated class");
    }

    #[test]
    fn test_trailing_garbage_is_malformed() {
        let mut bytes = static_read_class();
        bytes.extend_from_slice(&[0, 0]);
        assert!(matches!(
            redirector().transform("mods.Reader", &bytes),
            Err(TransformError::MalformedUnit { .. })
        ));
    }
}

// =============================================================================
// Concurrency and metrics
// =============================================================================

mod shared_tests {
    use super::*;

    #[test]
    fn test_concurrent_transforms_agree() {
        let redirector = Arc::new(redirector());
        let inputs = [mixed_class(), spilled_call_class(), unrelated_class()];
        let expected: Vec<Vec<u8>> = inputs
            .iter()
            .map(|bytes| redirector.transform("mods.Shared", bytes).unwrap().into_owned())
            .collect();

        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        for (bytes, want) in inputs.iter().zip(&expected) {
                            let got = redirector.transform("mods.Shared", bytes).unwrap();
                            assert_eq!(got.as_ref(), want.as_slice());
                        }
                    }
                });
            }
        });

        let snap = redirector.metrics().snapshot();
        assert_eq!(snap.units_seen, 3 * (1 + 8 * 25));
        assert_eq!(snap.units_skipped, 1 + 8 * 25);
        assert_eq!(snap.units_rewritten, 2 * (1 + 8 * 25));
    }

    #[test]
    fn test_metrics_snapshot_json() {
        let redirector = redirector();
        redirector.transform("mods.Mixed", &mixed_class()).unwrap();
        redirector.transform("mods.Unrelated", &unrelated_class()).unwrap();

        let json = serde_json::to_value(redirector.metrics().snapshot()).unwrap();
        assert_eq!(json["units_seen"], 2);
        assert_eq!(json["units_skipped"], 1);
        assert_eq!(json["units_rewritten"], 1);
        assert_eq!(json["sites_rewritten"], 7);
        assert_eq!(json["dump_failures"], 0);
    }

    #[test]
    fn test_custom_rule_table() {
        let rules = RuleTable::new("demo/State", &["level"], &[], &[]).unwrap();
        let redirector = Redirector::new(Arc::new(rules));
        // The shipped owner is unknown to this table
        let bytes = static_read_class();
        let out = redirector.transform("mods.Reader", &bytes).unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(redirector.metrics().snapshot().units_skipped, 1);
    }
}
