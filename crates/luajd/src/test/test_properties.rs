// Cross-stage properties: serialization round-trips, elimination reaches a
// fixpoint, and the stage validators hold on both sides of unwarping.

use crate::ast::nodes::Statement;
use crate::ast::{builder, locals, mutator, slotworks, unwarper, validator};
use crate::opcode::Op;
use crate::rawdump::prototype::NumericConstant;
use crate::rawdump::testutil::{ins_abc, ins_ad, jump_d};
use crate::test::{op, proto, v21, visible, ProtoSpec};

fn arithmetic_proto() -> crate::rawdump::prototype::Prototype {
    proto(ProtoSpec {
        instructions: vec![
            ins_ad(op(Op::KShort), 0, 2),
            ins_ad(op(Op::KShort), 1, 3),
            ins_abc(op(Op::MulVV), 0, 0, 1),
            ins_abc(op(Op::AddNV), 0, 0, 0),
            ins_ad(op(Op::Ret0), 0, 1),
        ],
        strings: vec![],
        numerics: vec![NumericConstant::Integer(1)],
        locals: vec![visible("x", 4, 5)],
        frame_size: 2,
    })
}

fn branchy_proto() -> crate::rawdump::prototype::Prototype {
    proto(ProtoSpec {
        instructions: vec![
            ins_ad(op(Op::GGet), 0, 0),
            ins_ad(op(Op::GGet), 1, 1),
            ins_ad(op(Op::IsGe), 0, 1),
            ins_ad(op(Op::Jmp), 2, jump_d(2)),
            ins_ad(op(Op::KShort), 2, 1),
            ins_ad(op(Op::Ret1), 2, 2),
            ins_ad(op(Op::KShort), 2, 2),
            ins_ad(op(Op::Ret1), 2, 2),
        ],
        strings: vec!["a", "b"],
        numerics: vec![],
        locals: vec![],
        frame_size: 3,
    })
}

#[test]
fn test_slot_elimination_is_idempotent() {
    let (ctx, header) = v21();
    let prototype = arithmetic_proto();
    let mut chunk = builder::build(&ctx, &header, &prototype).unwrap();
    locals::mark_locals(&mut chunk, false);

    slotworks::eliminate_temporary(&mut chunk, true);
    let after_first = chunk.clone();
    slotworks::eliminate_temporary(&mut chunk, true);
    assert_eq!(chunk, after_first);
}

#[test]
fn test_incoming_edge_counts() {
    let (ctx, header) = v21();
    let prototype = branchy_proto();
    let chunk = builder::build(&ctx, &header, &prototype).unwrap();

    let counts: Vec<u32> = chunk
        .statements
        .contents
        .iter()
        .map(|s| match s {
            Statement::Block(b) => b.warpins_count,
            _ => unreachable!(),
        })
        .collect();
    // Entry block has no incoming warps; each return block has exactly one.
    assert_eq!(counts, vec![0, 1, 1]);
}

#[test]
fn test_warp_discipline_across_stages() {
    let (ctx, header) = v21();
    let prototype = branchy_proto();
    let mut chunk = builder::build(&ctx, &header, &prototype).unwrap();
    validator::validate(&chunk, true).unwrap();

    mutator::pre_pass(&mut chunk);
    validator::validate(&chunk, true).unwrap();

    locals::mark_locals(&mut chunk, false);
    slotworks::eliminate_temporary(&mut chunk, true);
    validator::validate(&chunk, true).unwrap();

    unwarper::unwarp(&mut chunk).unwrap();
    locals::mark_local_definitions(&mut chunk);
    mutator::primary_pass(&mut chunk);
    validator::validate(&chunk, false).unwrap();

    // No block statements survive the unwarper.
    assert!(!chunk
        .statements
        .contents
        .iter()
        .any(|s| matches!(s, Statement::Block(_))));
}

#[test]
fn test_final_ast_serialization_roundtrip() {
    let (ctx, header) = v21();
    let prototype = branchy_proto();
    let chunk = crate::decompile(&ctx, &header, &prototype).unwrap();

    let json = serde_json::to_value(&chunk).unwrap();
    let loaded: crate::FunctionDefinition = serde_json::from_value(json).unwrap();
    assert_eq!(loaded, chunk);
}

#[test]
fn test_warped_ast_serialization_roundtrip() {
    // Warp targets are plain block indices, so even the warped form
    // round-trips structurally.
    let (ctx, header) = v21();
    let prototype = branchy_proto();
    let chunk = builder::build(&ctx, &header, &prototype).unwrap();

    let json = serde_json::to_value(&chunk).unwrap();
    let loaded: crate::FunctionDefinition = serde_json::from_value(json).unwrap();
    assert_eq!(loaded, chunk);
}

#[test]
fn test_decompile_output_is_stable() {
    // Running the whole pipeline twice over the same prototype gives
    // byte-identical text.
    let prototype = branchy_proto();
    let first = crate::test::decompile_to_text(&prototype);
    let second = crate::test::decompile_to_text(&prototype);
    assert_eq!(first, second);
}
