//! End-to-end resolution tests.
//!
//! Each test registers a source, compiles it the way the host runtime
//! would, and resolves the instructions a frame could stop at.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use whence::{
    all_codes, Category, CodeObject, ExecutionPoint, Frame, NodeKind, Opcode, Outcome, Resolver,
    RuntimeVersion, Source, SourceRegistry, TracebackEntry, Unresolved,
};
use whence_bytecode::Compiler;
use whence_python::parse_module;

// ============================================================================
// Test Infrastructure
// ============================================================================

/// One resolvable instruction and what it resolved to.
#[derive(Debug, Clone)]
struct Resolved {
    qualname: String,
    category: Category,
    offset: u32,
    text: Option<String>,
    outcome: Outcome,
}

struct Fixture {
    resolver: Resolver,
    source: Arc<Source>,
    module: Arc<CodeObject>,
}

impl Fixture {
    fn new(version: RuntimeVersion, text: &str) -> Self {
        let registry = Arc::new(SourceRegistry::new());
        let filename = registry.register_text("test", text);
        let source = registry.for_filename(&filename).unwrap();
        let module = source.module_code(version).unwrap();
        Fixture {
            resolver: Resolver::new(registry, version),
            source,
            module,
        }
    }

    fn code(&self, name: &str) -> Arc<CodeObject> {
        all_codes(&self.module)
            .into_iter()
            .find(|code| code.name == name)
            .unwrap_or_else(|| panic!("no code object named {}", name))
    }

    /// Resolve every resolvable instruction of every code object.
    fn resolve_all(&self) -> Vec<Resolved> {
        let mut resolved = Vec::new();
        for code in all_codes(&self.module) {
            for instruction in &code.instructions {
                let Some(category) = self.resolver.classifier().classify(instruction) else {
                    continue;
                };
                let point = ExecutionPoint::at_offset(Arc::clone(&code), instruction.offset).unwrap();
                let executing = self.resolver.executing(point).unwrap();
                resolved.push(Resolved {
                    qualname: executing.code_qualname(),
                    category,
                    offset: instruction.offset,
                    text: executing.text().map(str::to_string),
                    outcome: executing.outcome().clone(),
                });
            }
        }
        resolved
    }

    /// Texts of resolved nodes of `category` inside `qualname`.
    fn texts(&self, qualname: &str, category: Category) -> Vec<String> {
        self.resolve_all()
            .into_iter()
            .filter(|r| r.qualname == qualname && r.category == category)
            .filter_map(|r| r.text)
            .collect()
    }
}

fn samples_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests")
}

// ============================================================================
// Calls
// ============================================================================

const TESTER: &str = "\
def tester(arg, returns=None):
    return arg if returns is None else returns

tester(1); tester(2)
x = tester(
    tester(3),
    tester(4),
)
tester(tester(5) + tester(6))
";

#[test]
fn every_tester_call_resolves_to_its_own_node() {
    for version in RuntimeVersion::ALL {
        let fixture = Fixture::new(version, TESTER);
        let calls = fixture.texts("<module>", Category::Call);
        assert_eq!(
            calls,
            [
                "tester(1)",
                "tester(2)",
                "tester(3)",
                "tester(4)",
                "tester(\n    tester(3),\n    tester(4),\n)",
                "tester(5)",
                "tester(6)",
                "tester(tester(5) + tester(6))",
            ],
            "{}",
            version
        );
        let sums = fixture.texts("<module>", Category::BinOp);
        assert_eq!(sums, ["tester(5) + tester(6)"], "{}", version);
    }
}

#[test]
fn extended_args_do_not_shift_positions() {
    let elements: Vec<String> = (0..66000).map(|i| i.to_string()).collect();
    let text = format!("tester(6)\n[{}]\ntester(9)\n", elements.join(", "));
    for version in [RuntimeVersion::V3_8, RuntimeVersion::V3_11] {
        let fixture = Fixture::new(version, &text);
        if version == RuntimeVersion::V3_8 {
            assert!(fixture
                .module
                .instructions
                .iter()
                .any(|i| i.opcode == Opcode::ExtendedArg));
        }
        assert_eq!(
            fixture.texts("<module>", Category::Call),
            ["tester(6)", "tester(9)"],
            "{}",
            version
        );
    }
}

// ============================================================================
// Scopes
// ============================================================================

const DECORATED: &str = "\
def deco(*args):
    return lambda f: f

@deco(lambda x: x + 1)
def decorated(a, key=lambda y: y * 2):
    return a.b.c
";

#[test]
fn decorator_expressions_resolve() {
    for version in RuntimeVersion::ALL {
        let fixture = Fixture::new(version, DECORATED);
        let calls = fixture.texts("<module>", Category::Call);
        assert_eq!(calls, ["deco(lambda x: x + 1)"], "{}", version);
        assert_eq!(fixture.texts("decorated", Category::Attribute), ["a.b", "a.b.c"]);
    }
}

#[test]
fn lambdas_in_decorators_and_defaults_live_in_the_enclosing_scope() {
    let fixture = Fixture::new(RuntimeVersion::V3_9, DECORATED);
    let resolved = fixture.resolve_all();
    let binops: Vec<_> = resolved
        .iter()
        .filter(|r| r.category == Category::BinOp)
        .map(|r| (r.qualname.as_str(), r.text.as_deref()))
        .collect();
    assert_eq!(
        binops,
        [("<lambda>", Some("x + 1")), ("<lambda>", Some("y * 2"))]
    );

    let inner = all_codes(&fixture.module)
        .into_iter()
        .find(|code| code.name == "<lambda>" && code.first_line == 2)
        .unwrap();
    assert_eq!(fixture.source.code_qualname(&inner), "deco.<locals>.<lambda>");
}

#[test]
fn nested_function_qualnames_render_the_full_chain() {
    let text = "\
class Outer:
    def method(self):
        def inner():
            return self.value + 1
        return inner
";
    for version in RuntimeVersion::ALL {
        let fixture = Fixture::new(version, text);
        let sums: Vec<_> = fixture
            .resolve_all()
            .into_iter()
            .filter(|r| r.category == Category::BinOp)
            .map(|r| (r.qualname, r.text))
            .collect();
        assert_eq!(
            sums,
            [(
                "Outer.method.<locals>.inner".to_string(),
                Some("self.value + 1".to_string())
            )],
            "{}",
            version
        );
    }
}

// ============================================================================
// Comprehensions
// ============================================================================

#[test]
fn identical_calls_in_different_comprehensions_resolve_separately() {
    let text = "values = [str(v) for v in items] + list({str(v) for v in items})\n";
    for version in RuntimeVersion::ALL {
        let fixture = Fixture::new(version, text);
        let list = fixture.texts("<listcomp>", Category::Call);
        let set = fixture.texts("<setcomp>", Category::Call);
        assert_eq!(list, ["str(v)"], "{}", version);
        assert_eq!(set, ["str(v)"], "{}", version);

        let nodes: Vec<_> = fixture
            .resolve_all()
            .into_iter()
            .filter(|r| r.category == Category::Call && r.text.as_deref() == Some("str(v)"))
            .map(|r| r.outcome.unwrap())
            .collect();
        assert_eq!(nodes.len(), 2);
        assert_ne!(nodes[0], nodes[1]);
    }
}

#[test]
fn indistinguishable_comprehensions_are_ambiguous() {
    let text = "values = [str(v) for v in items] + [str(v) for v in items]\n";
    for version in RuntimeVersion::ALL {
        let fixture = Fixture::new(version, text);
        let inside: Vec<_> = fixture
            .resolve_all()
            .into_iter()
            .filter(|r| r.qualname == "<listcomp>" && r.category == Category::Call)
            .map(|r| r.outcome)
            .collect();
        assert_eq!(inside.len(), 2, "{}", version);
        for outcome in inside {
            assert_eq!(outcome, Err(Unresolved::Ambiguous { count: 2 }), "{}", version);
        }
        assert_eq!(
            fixture.texts("<module>", Category::BinOp),
            ["[str(v) for v in items] + [str(v) for v in items]"]
        );
    }
}

#[test]
fn closures_inside_comprehensions_resolve() {
    let text = "\
def outer(n):
    return [lambda: n * i for i in range(n)]
";
    for version in RuntimeVersion::ALL {
        let fixture = Fixture::new(version, text);
        let resolved: Vec<_> = fixture
            .resolve_all()
            .into_iter()
            .filter(|r| r.category == Category::BinOp)
            .map(|r| (r.qualname, r.text))
            .collect();
        assert_eq!(
            resolved,
            [(
                "outer.<locals>.<listcomp>.<lambda>".to_string(),
                Some("n * i".to_string())
            )],
            "{}",
            version
        );
        assert_eq!(fixture.texts("outer", Category::Call), ["range(n)"]);
    }
}

// ============================================================================
// Statements and expressions
// ============================================================================

#[test]
fn generators_and_multiline_strings() {
    let text = "\
def gen(xs):
    for x in xs:
        yield x.value ** 2

banner = \"\"\"
hello
\"\"\".strip().upper()
";
    for version in RuntimeVersion::ALL {
        let fixture = Fixture::new(version, text);
        assert!(fixture.code("gen").is_generator());
        assert_eq!(fixture.texts("gen", Category::BinOp), ["x.value ** 2"]);
        assert_eq!(fixture.texts("gen", Category::Attribute), ["x.value"]);

        let calls = fixture.texts("<module>", Category::Call);
        assert_eq!(calls.len(), 2, "{}", version);
        assert!(calls[0].ends_with("\"\"\".strip()"));
        assert!(calls[1].ends_with("\"\"\".strip().upper()"));
        assert!(calls[1].starts_with("\"\"\"\nhello"));
    }
}

#[test]
fn compound_statement_headers_resolve() {
    let text = "\
while queue.pending(limit) > 0:
    if -item.weight < bound[0]:
        break
";
    for version in RuntimeVersion::ALL {
        let fixture = Fixture::new(version, text);
        let mut texts: Vec<_> = fixture
            .resolve_all()
            .into_iter()
            .filter_map(|r| r.text)
            .collect();
        texts.sort();
        assert_eq!(
            texts,
            [
                "-item.weight",
                "-item.weight < bound[0]",
                "bound[0]",
                "item.weight",
                "queue.pending",
                "queue.pending(limit)",
                "queue.pending(limit) > 0",
            ],
            "{}",
            version
        );
    }
}

#[test]
fn chained_comparisons_stay_unresolved() {
    let fixture = Fixture::new(RuntimeVersion::V3_10, "ok = low < value <= high\n");
    let compares: Vec<_> = fixture
        .resolve_all()
        .into_iter()
        .filter(|r| r.category == Category::Compare)
        .collect();
    assert_eq!(compares.len(), 2);
    assert!(compares.iter().all(|r| r.outcome.is_err()));
}

// ============================================================================
// Frames and tracebacks
// ============================================================================

#[test]
fn traceback_at_division_by_zero() {
    let text = "\
def divide():
    return 134895 / 0

divide()
";
    for version in RuntimeVersion::ALL {
        let fixture = Fixture::new(version, text);
        let code = fixture.code("divide");
        let division = code
            .instructions
            .iter()
            .find(|i| matches!(i.opcode, Opcode::BinaryTrueDivide | Opcode::BinaryOp))
            .unwrap()
            .offset;
        let entry = TracebackEntry::at(Arc::clone(&code), division).unwrap();
        assert_eq!(entry.lineno, 2);
        let executing = fixture.resolver.executing(&entry).unwrap();
        assert_eq!(executing.text(), Some("134895 / 0"), "{}", version);
        assert!(matches!(executing.node_kind(), Some(NodeKind::BinOp { .. })));
        assert_eq!(executing.code_qualname(), "divide");

        let range = executing.text_range().unwrap();
        assert_eq!(&fixture.source.text()[range], "134895 / 0");
        assert_eq!(executing.statements().len(), 1);
    }
}

#[test]
fn frames_and_tracebacks_agree() {
    let fixture = Fixture::new(RuntimeVersion::V3_8, "result = compute(a)[key]\n");
    let subscript = fixture
        .module
        .instructions
        .iter()
        .find(|i| i.opcode == Opcode::BinarySubscr)
        .unwrap()
        .offset;
    let frame = Frame::at(Arc::clone(&fixture.module), subscript).unwrap();
    let entry = TracebackEntry::at(Arc::clone(&fixture.module), subscript).unwrap();
    let from_frame = fixture.resolver.resolve(&frame).unwrap();
    let from_entry = fixture.resolver.resolve(&entry).unwrap();
    assert_eq!(from_frame, from_entry);
    let node = from_frame.unwrap();
    assert_eq!(
        fixture.source.node_text(node),
        Some("compute(a)[key]")
    );
}

#[test]
fn repeated_resolution_is_deterministic() {
    let fixture = Fixture::new(RuntimeVersion::V3_11, TESTER);
    let first = fixture.resolve_all();
    let second = fixture.resolve_all();
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.offset, b.offset);
        assert_eq!(a.outcome, b.outcome);
    }

    fixture.source.clear_caches();
    let third = fixture.resolve_all();
    for (a, c) in first.iter().zip(&third) {
        assert_eq!(a.outcome, c.outcome);
    }
}

// ============================================================================
// Sources
// ============================================================================

#[test]
fn sources_that_are_not_python_never_resolve() {
    let path = samples_dir().join("not_code.txt");
    let filename = path.to_string_lossy().into_owned();
    let registry = Arc::new(SourceRegistry::new());
    let source = registry.for_filename(&filename).unwrap();
    assert!(source.tree().is_none());
    assert!(source.syntax_error().is_some());

    for version in RuntimeVersion::ALL {
        let resolver = Resolver::new(Arc::clone(&registry), version);
        let ast = parse_module("x = a.b + c[0]\nprint(x)\n").unwrap();
        let module = Compiler::new(version).compile_module(&ast, &filename).unwrap();
        let classifier = resolver.classifier();
        let mut resolvable = 0;
        for instruction in &module.instructions {
            if classifier.classify(instruction).is_none() {
                continue;
            }
            resolvable += 1;
            let point = ExecutionPoint::at_offset(Arc::clone(&module), instruction.offset).unwrap();
            assert_eq!(resolver.resolve(point).unwrap(), Err(Unresolved::NoSource));
        }
        assert!(resolvable >= 4);
    }
}

#[test]
fn declared_encodings_are_honored() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("latin.py");
    let mut bytes = b"# -*- coding: latin-1 -*-\nword = 'caf".to_vec();
    bytes.push(0xe9);
    bytes.extend_from_slice(b"'.upper()\n");
    fs::write(&path, &bytes).unwrap();

    let registry = Arc::new(SourceRegistry::new());
    let filename = path.to_string_lossy().into_owned();
    let source = registry.for_filename(&filename).unwrap();
    assert_eq!(source.encoding(), "iso-8859-1");
    assert!(source.text().contains("'café'"));

    let resolver = Resolver::new(Arc::clone(&registry), RuntimeVersion::V3_9);
    let module = source.module_code(RuntimeVersion::V3_9).unwrap();
    let method = module
        .instructions
        .iter()
        .find(|i| i.opcode == Opcode::LoadMethod)
        .unwrap()
        .offset;
    let executing = resolver
        .executing(ExecutionPoint::at_offset(Arc::clone(&module), method).unwrap())
        .unwrap();
    assert_eq!(executing.text(), Some("'café'.upper"));
    let range = executing.text_range().unwrap();
    assert_eq!(&source.text()[range], "'café'.upper");
}

#[test]
fn mismatched_declarations_are_errors() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ascii.py");
    let mut bytes = b"# coding: ascii\nword = 'caf".to_vec();
    bytes.push(0xe9);
    bytes.extend_from_slice(b"'\n");
    fs::write(&path, &bytes).unwrap();

    let registry = SourceRegistry::new();
    assert!(registry.for_filename(&path.to_string_lossy()).is_err());
}

#[test]
fn registry_reset_reloads_from_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("module.py");
    fs::write(&path, "x = a + b\n").unwrap();
    let filename = path.to_string_lossy().into_owned();

    let registry = SourceRegistry::new();
    let first = registry.for_filename(&filename).unwrap();
    assert!(Arc::ptr_eq(&first, &registry.for_filename(&filename).unwrap()));

    fs::write(&path, "x = a - b\n").unwrap();
    assert_eq!(registry.for_filename(&filename).unwrap().text(), "x = a + b\n");
    registry.clear();
    assert_eq!(registry.for_filename(&filename).unwrap().text(), "x = a - b\n");
}
