// End-to-end pipeline tests: hand-assembled instruction streams through the
// full decompile pipeline, compared against the Lua source they came from.

use crate::opcode::Op;
use crate::rawdump::prototype::NumericConstant;
use crate::rawdump::testutil::{ins_abc, ins_ad, jump_d, write_dump, ProtoSketch};
use crate::test::{decompile_to_text, internal, op, proto, visible, ProtoSpec};

#[test]
fn test_arithmetic_precedence_survives() {
    // local x = 1 + 2 * 3, with folding disabled in the source stream.
    let prototype = proto(ProtoSpec {
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
    });
    assert_eq!(decompile_to_text(&prototype), "local x = 1 + 2 * 3\n");
}

#[test]
fn test_multi_assignment_not_collapsed() {
    // local a, b = f(), g(): two separate calls merged back into one
    // definition without absorbing f() into a single-value context.
    let prototype = proto(ProtoSpec {
        instructions: vec![
            ins_ad(op(Op::GGet), 0, 0),
            ins_abc(op(Op::Call), 0, 2, 1),
            ins_ad(op(Op::GGet), 1, 1),
            ins_abc(op(Op::Call), 1, 2, 1),
            ins_ad(op(Op::Ret0), 0, 1),
        ],
        strings: vec!["f", "g"],
        numerics: vec![],
        locals: vec![visible("a", 4, 5), visible("b", 4, 5)],
        frame_size: 2,
    });
    assert_eq!(decompile_to_text(&prototype), "local a, b = f(), g()\n");
}

#[test]
fn test_if_else_with_returns() {
    // if a < b then return 1 else return 2 end (a, b globals).
    let prototype = proto(ProtoSpec {
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
    });
    assert_eq!(
        decompile_to_text(&prototype),
        "if a < b then\n  return 1\nelse\n  return 2\nend\n"
    );
}

#[test]
fn test_numeric_for_with_step() {
    // for i = 1, 10, 2 do t[i] = i * i end
    let prototype = proto(ProtoSpec {
        instructions: vec![
            ins_ad(op(Op::KShort), 0, 1),
            ins_ad(op(Op::KShort), 1, 10),
            ins_ad(op(Op::KShort), 2, 2),
            ins_ad(op(Op::ForI), 0, jump_d(4)),
            ins_ad(op(Op::GGet), 4, 0),
            ins_abc(op(Op::MulVV), 5, 3, 3),
            ins_abc(op(Op::TSetV), 5, 4, 3),
            ins_ad(op(Op::ForL), 0, jump_d(-4)),
            ins_ad(op(Op::Ret0), 0, 1),
        ],
        strings: vec!["t"],
        numerics: vec![],
        locals: vec![
            internal("(for index)", 4, 8),
            internal("(for limit)", 4, 8),
            internal("(for step)", 4, 8),
            visible("i", 4, 8),
        ],
        frame_size: 6,
    });
    assert_eq!(
        decompile_to_text(&prototype),
        "for i = 1, 10, 2 do\n  t[i] = i * i\nend\n"
    );
}

#[test]
fn test_iterator_for() {
    // for k, v in pairs(t) do print(k, v) end
    let prototype = proto(ProtoSpec {
        instructions: vec![
            ins_ad(op(Op::GGet), 0, 0),
            ins_ad(op(Op::GGet), 1, 1),
            ins_abc(op(Op::Call), 0, 4, 2),
            ins_ad(op(Op::Jmp), 3, jump_d(4)),
            ins_ad(op(Op::GGet), 5, 2),
            ins_ad(op(Op::Mov), 6, 3),
            ins_ad(op(Op::Mov), 7, 4),
            ins_abc(op(Op::Call), 5, 1, 3),
            ins_abc(op(Op::IterC), 3, 3, 3),
            ins_ad(op(Op::IterL), 3, jump_d(-6)),
            ins_ad(op(Op::Ret0), 0, 1),
        ],
        strings: vec!["pairs", "t", "print"],
        numerics: vec![],
        locals: vec![
            internal("(for generator)", 4, 10),
            internal("(for state)", 4, 10),
            internal("(for control)", 4, 10),
            visible("k", 4, 10),
            visible("v", 4, 10),
        ],
        frame_size: 8,
    });
    assert_eq!(
        decompile_to_text(&prototype),
        "for k, v in pairs(t) do\n  print(k, v)\nend\n"
    );
}

#[test]
fn test_while_with_break() {
    // local x = 10
    // while x do x = x - 1 if x == 0 then break end end
    let prototype = proto(ProtoSpec {
        instructions: vec![
            ins_ad(op(Op::KShort), 0, 10),
            ins_ad(op(Op::IsF), 0, 0),
            ins_ad(op(Op::Jmp), 1, jump_d(6)),
            ins_ad(op(Op::Loop), 1, jump_d(5)),
            ins_abc(op(Op::SubVN), 0, 0, 0),
            ins_ad(op(Op::IsNeN), 0, 1),
            ins_ad(op(Op::Jmp), 1, jump_d(1)),
            ins_ad(op(Op::Jmp), 1, jump_d(1)),
            ins_ad(op(Op::Jmp), 1, jump_d(-8)),
            ins_ad(op(Op::Ret0), 0, 1),
        ],
        strings: vec![],
        numerics: vec![NumericConstant::Integer(1), NumericConstant::Integer(0)],
        locals: vec![visible("x", 1, 10)],
        frame_size: 2,
    });
    let text = decompile_to_text(&prototype);
    assert_eq!(
        text,
        "local x = 10\nwhile x do\n  x = x - 1\n  if x == 0 then\n    break\n  end\nend\n"
    );
    assert_eq!(text.matches("break").count(), 1);
}

#[test]
fn test_repeat_until() {
    // local x = 10
    // repeat x = x - 1 until x == 0
    let prototype = proto(ProtoSpec {
        instructions: vec![
            ins_ad(op(Op::KShort), 0, 10),
            ins_abc(op(Op::SubVN), 0, 0, 0),
            ins_ad(op(Op::IsNeN), 0, 1),
            ins_ad(op(Op::Jmp), 1, jump_d(-3)),
            ins_ad(op(Op::Ret0), 0, 1),
        ],
        strings: vec![],
        numerics: vec![NumericConstant::Integer(1), NumericConstant::Integer(0)],
        locals: vec![visible("x", 1, 5)],
        frame_size: 2,
    });
    assert_eq!(
        decompile_to_text(&prototype),
        "local x = 10\nrepeat\n  x = x - 1\nuntil x == 0\n"
    );
}

#[test]
fn test_table_constructor_folding() {
    // local t = {} t[1] = f() -- array append folds into the constructor
    // when the write directly follows it.
    let prototype = proto(ProtoSpec {
        instructions: vec![
            ins_ad(op(Op::TNew), 0, 0),
            ins_ad(op(Op::GGet), 1, 0),
            ins_abc(op(Op::Call), 1, 2, 1),
            ins_abc(op(Op::TSetB), 1, 0, 1),
            ins_ad(op(Op::Ret0), 0, 1),
        ],
        strings: vec!["f"],
        numerics: vec![],
        locals: vec![visible("t", 4, 5)],
        frame_size: 2,
    });
    assert_eq!(decompile_to_text(&prototype), "local t = {f()}\n");
}

#[test]
fn test_method_call_sugar() {
    // obj:move(1) where obj is a global.
    let prototype = proto(ProtoSpec {
        instructions: vec![
            ins_ad(op(Op::GGet), 0, 0),
            ins_abc(op(Op::TGetS), 0, 0, 1),
            ins_ad(op(Op::GGet), 1, 0),
            ins_ad(op(Op::KShort), 2, 1),
            ins_abc(op(Op::Call), 0, 1, 3),
            ins_ad(op(Op::Ret0), 0, 1),
        ],
        strings: vec!["obj", "move"],
        numerics: vec![],
        locals: vec![],
        frame_size: 3,
    });
    assert_eq!(decompile_to_text(&prototype), "obj:move(1)\n");
}

#[test]
fn test_vararg_return() {
    // return ...
    let prototype = proto(ProtoSpec {
        instructions: vec![
            ins_abc(op(Op::VarG), 0, 0, 1),
            ins_ad(op(Op::RetM), 0, 0),
        ],
        strings: vec![],
        numerics: vec![],
        locals: vec![],
        frame_size: 1,
    });
    assert_eq!(decompile_to_text(&prototype), "return ...\n");
}

#[test]
fn test_binary_dump_roundtrip() {
    // The same arithmetic program through the binary container, stripped:
    // synthetic slot names appear instead of debug names.
    let version = crate::opcode::BytecodeVersion::V21;
    let buf = write_dump(
        version,
        &[ProtoSketch {
            frame_size: 2,
            instructions: vec![
                ins_ad(op(Op::KShort), 0, 2),
                ins_ad(op(Op::KShort), 1, 3),
                ins_abc(op(Op::MulVV), 0, 0, 1),
                ins_abc(op(Op::AddNV), 0, 0, 0),
                ins_ad(op(Op::Ret0), 0, 1),
            ],
            numerics: vec![NumericConstant::Integer(1)],
            ..Default::default()
        }],
    );
    let text = crate::decompile_buffer(&buf).unwrap();
    assert_eq!(text, "local slot0 = 1 + 2 * 3\n");
}

#[test]
fn test_nested_function() {
    // local function id(a) return a end — via the dump container so the
    // child prototype wiring is exercised.
    let version = crate::opcode::BytecodeVersion::V21;
    let child = ProtoSketch {
        arguments_count: 1,
        frame_size: 1,
        instructions: vec![ins_ad(op(Op::Ret1), 0, 2)],
        ..Default::default()
    };
    let root = ProtoSketch {
        flags: crate::rawdump::prototype::PROTO_FLAG_CHILD,
        frame_size: 1,
        instructions: vec![
            ins_ad(op(Op::FNew), 0, 0),
            ins_ad(op(Op::Ret0), 0, 1),
        ],
        child_count: 1,
        ..Default::default()
    };
    let buf = write_dump(version, &[child, root]);
    let text = crate::decompile_buffer(&buf).unwrap();
    assert_eq!(
        text,
        "local slot0 = function(slot0)\n  return slot0\nend\n"
    );
}

#[test]
fn test_and_expression_from_short_circuit() {
    // local x = a and b (a, b globals), compiled through ISFC.
    let prototype = proto(ProtoSpec {
        instructions: vec![
            ins_ad(op(Op::GGet), 1, 0),
            ins_ad(op(Op::IsFC), 0, 1),
            ins_ad(op(Op::Jmp), 1, jump_d(1)),
            ins_ad(op(Op::GGet), 0, 1),
            ins_ad(op(Op::Ret0), 0, 1),
        ],
        strings: vec!["a", "b"],
        numerics: vec![],
        locals: vec![visible("x", 4, 5)],
        frame_size: 2,
    });
    assert_eq!(decompile_to_text(&prototype), "local x = a and b\n");
}

#[test]
fn test_comparison_materialized_into_slot() {
    // local x = a < b: a KPRI diamond folded back into one comparison.
    let prototype = proto(ProtoSpec {
        instructions: vec![
            ins_ad(op(Op::GGet), 1, 0),
            ins_ad(op(Op::GGet), 2, 1),
            ins_ad(op(Op::IsGe), 1, 2),
            ins_ad(op(Op::Jmp), 3, jump_d(2)),
            ins_ad(op(Op::KPri), 0, 2),
            ins_ad(op(Op::Jmp), 3, jump_d(1)),
            ins_ad(op(Op::KPri), 0, 1),
            ins_ad(op(Op::Ret0), 0, 1),
        ],
        strings: vec!["a", "b"],
        numerics: vec![],
        locals: vec![visible("x", 5, 8)],
        frame_size: 3,
    });
    assert_eq!(decompile_to_text(&prototype), "local x = a < b\n");
}

#[test]
fn test_unknown_opcode_poisons_only_that_function() {
    // An undecodable instruction leaves a placeholder body instead of
    // failing the file.
    let prototype = proto(ProtoSpec {
        instructions: vec![0xFFu32, ins_ad(op(Op::Ret0), 0, 1)],
        strings: vec![],
        numerics: vec![],
        locals: vec![],
        frame_size: 1,
    });
    let text = decompile_to_text(&prototype);
    assert!(text.contains("-- decompilation error"));
}
