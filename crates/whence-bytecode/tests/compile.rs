//! Structural checks on compiled output for every runtime version.

use std::sync::Arc;

use itertools::Itertools;
use whence_bytecode::{
    all_codes, decode_wordcode, ArgValue, CodeObject, Compiler, Opcode, RuntimeVersion,
};
use whence_python::{parse_module, Ast, NodeKind};

const PROGRAM: &str = "\
import os

class Config(dict):
    def get_path(self, key, default=None):
        value = self.get(key) or default
        if value is not None and not value.startswith('/'):
            return os.path.join(os.getcwd(), value)
        return value

def totals(rows, *, scale=1):
    result = {}
    for row in rows:
        try:
            result[row.key] = result.get(row.key, 0) + row.amount * scale
        except (KeyError, TypeError) as error:
            print(error, -row.amount)
        finally:
            scale = scale + 1
    while scale > 0:
        scale -= 1
    return sorted(result.items(), key=lambda item: item[1])[::-1]

squares = {n: n ** 2 for n in range(10) if n % 2}
print(*[totals(x) for x in squares.values()], sep=', ')
";

/// Statements only 3.10 and 3.11 compile.
const NEWER_PROGRAM: &str = "\
def describe(shape):
    match shape:
        case {'kind': 'circle', 'r': r, **rest} if r > 0:
            return ('circle', r, rest)
        case Point(x=0, y=0) | Point(x=0, y=None):
            return 'origin'
        case [first, *others] as whole:
            return (first, len(others), whole)
        case str() | bytes():
            return 'text'
        case _:
            return None

def run(jobs):
    try:
        for job in jobs:
            job()
    except* (ValueError, KeyError) as group:
        print(group.exceptions)
    except* OSError:
        pass
    finally:
        print('done')
";

fn compile(version: RuntimeVersion, ast: &Ast) -> Arc<CodeObject> {
    Compiler::new(version).compile_module(ast, "program.py").unwrap()
}

#[test]
fn wordcode_decodes_to_the_instruction_list() {
    let ast = parse_module(PROGRAM).unwrap();
    for version in RuntimeVersion::ALL {
        for code in all_codes(&compile(version, &ast)) {
            let raw = decode_wordcode(&code.code).unwrap();
            assert_eq!(raw.len(), code.instructions.len(), "{} {}", version, code.name);
            for (raw, instruction) in raw.iter().zip(&code.instructions) {
                assert_eq!(raw.offset, instruction.offset);
                assert_eq!(raw.opcode, instruction.opcode);
                assert_eq!(raw.arg, instruction.arg, "{} at {}", code.name, raw.offset);
            }
        }
    }
}

#[test]
fn lines_stay_inside_the_source() {
    let ast = parse_module(PROGRAM).unwrap();
    let line_count = PROGRAM.lines().count() as u32;
    for version in RuntimeVersion::ALL {
        for code in all_codes(&compile(version, &ast)) {
            for instruction in &code.instructions {
                assert!(
                    (1..=line_count).contains(&instruction.line),
                    "{} {} line {}",
                    version,
                    code.name,
                    instruction.line
                );
                assert_eq!(code.line_for_offset(instruction.offset), Some(instruction.line));
            }
            assert!(code.line_starts.iter().tuple_windows().all(|(a, b)| a.0 < b.0));
        }
    }
}

#[test]
fn jumps_land_on_instructions() {
    let ast = parse_module(PROGRAM).unwrap();
    for version in RuntimeVersion::ALL {
        for code in all_codes(&compile(version, &ast)) {
            for instruction in &code.instructions {
                if let ArgValue::Jump(target) = instruction.argval {
                    let landed = code.instruction_at(target);
                    assert!(landed.is_some(), "{} {} jumps to {}", version, code.name, target);
                    assert!(landed.is_some_and(|i| i.is_jump_target));
                }
            }
        }
    }
}

#[test]
fn version_specific_instruction_sets() {
    let ast = parse_module(PROGRAM).unwrap();
    let opcodes = |version| {
        all_codes(&compile(version, &ast))
            .iter()
            .flat_map(|code| code.instructions.iter().map(|i| i.opcode).collect_vec())
            .collect_vec()
    };
    let v38 = opcodes(RuntimeVersion::V3_8);
    let v311 = opcodes(RuntimeVersion::V3_11);
    assert!(v38.contains(&Opcode::BinaryAdd));
    assert!(!v38.contains(&Opcode::BinaryOp));
    assert!(v311.contains(&Opcode::BinaryOp));
    assert!(v311.contains(&Opcode::Precall));
    assert!(!v311.contains(&Opcode::CallFunction));
    assert!(opcodes(RuntimeVersion::V3_9).contains(&Opcode::IsOp));
}

/// Marking a node leaves everything before its last instruction alone, and
/// the instruction right before the marker sits where the node's own
/// instruction sits in the plain compilation.
#[test]
fn marking_preserves_the_prefix() {
    let ast = parse_module(PROGRAM).unwrap();
    let marked_nodes = ast
        .ids()
        .filter(|id| {
            matches!(
                ast.kind(*id),
                NodeKind::BinOp { .. } | NodeKind::Call { .. } | NodeKind::Attribute { .. }
            ) && ast.ctx(*id).map_or(true, |ctx| ctx == whence_python::ExprContext::Load)
        })
        .collect_vec();
    assert!(marked_nodes.len() > 20);

    for version in RuntimeVersion::ALL {
        let plain = all_codes(&compile(version, &ast));
        for node in &marked_nodes {
            let marked = all_codes(
                &Compiler::new(version)
                    .compile_module_marked(&ast, "program.py", *node)
                    .unwrap(),
            );
            assert_eq!(marked.len(), plain.len());
            let (position, marker) = marked
                .iter()
                .enumerate()
                .find_map(|(i, code)| {
                    code.instructions
                        .iter()
                        .position(|ins| ins.loaded_const().is_some_and(|c| c.is_marker()))
                        .map(|m| (i, m))
                })
                .unwrap_or_else(|| panic!("{} no marker for {}", version, node));
            let before = &marked[position].instructions[..marker];
            let original = &plain[position].instructions;
            assert!(original.len() >= before.len());
            for (a, b) in before.iter().zip(original) {
                assert_eq!(a.opcode, b.opcode, "{} marking {}", version, node);
                if a.opcode.jump_kind(version).is_none() {
                    assert_eq!(a.arg, b.arg, "{} marking {}", version, node);
                }
            }
        }
    }
}

#[test]
fn newer_statements_lay_out_cleanly() {
    let ast = parse_module(NEWER_PROGRAM).unwrap();
    let code = compile(RuntimeVersion::V3_11, &ast);
    let codes = all_codes(&code);
    assert_eq!(codes.len(), 3);
    for code in &codes {
        let raw = decode_wordcode(&code.code).unwrap();
        assert_eq!(raw.len(), code.instructions.len(), "{}", code.name);
        for instruction in &code.instructions {
            if let ArgValue::Jump(target) = instruction.argval {
                assert!(code.instruction_at(target).is_some_and(|i| i.is_jump_target));
            }
        }
    }
    let describe = &codes[1];
    assert_eq!(describe.varnames, ["shape", "r", "rest", "first", "others", "whole"]);
    let v310 = Compiler::new(RuntimeVersion::V3_10).compile_module(&ast, "program.py");
    assert!(v310.unwrap_err().message.contains("except*"));
}
