//! The node resolution engine.
//!
//! Given an [`ExecutionPoint`], [`Resolver::executing`] finds the syntax
//! node whose evaluation the instruction at that point performs:
//!
//! 1. Load the [`Source`] of the code object. No tree, no node.
//! 2. Classify the instruction. Bookkeeping instructions have no node.
//! 3. Collect candidate nodes of the instruction's shape among the
//!    statements at the current line.
//! 4. Check that the code object occurs exactly once in a fresh
//!    compilation of the source, by name, first line and referenced names.
//! 5. For each candidate, find the statement of the code object's unit that
//!    contains it (or the whole unit, for lambdas and comprehensions) and
//!    compile only that fragment, once plain and once with the candidate
//!    marked. The instruction right before the marker is the candidate's
//!    own instruction, at some position inside the fragment. The candidate
//!    matches when the plain fragment lines up with the code object's
//!    instructions so that this position falls on the instruction being
//!    resolved. Positions ignore `EXTENDED_ARG` prefixes; jump targets and
//!    nested units compare loosely.
//! 6. Exactly one match is the answer. None, or several, is
//!    [`Unresolved`], never a guess.
//!
//! Results are memoized per source by code identity, offset and line.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use whence_bytecode::{
    all_codes, fold_constant, ArgValue, CodeObject, Const, Fragment, Instruction, Opcode,
    RuntimeVersion, UnsupportedVersion,
};
use whence_core::Only;
use whence_python::{Annotations, Ast, NodeId, NodeKind, UnaryOperator};

use crate::classifier::{classifier_for, Category, InstructionClassifier};
use crate::error::ResolutionError;
use crate::frame::{out_of_range, ExecutionPoint};
use crate::source::{Source, SourceRegistry};

/// Why no node was found. An expected outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Unresolved {
    /// The source is unavailable, undecodable or does not parse.
    NoSource,
    /// The instruction has no expression of its own.
    NotResolvable { opname: &'static str },
    /// No statement occupies the current line.
    NoStatement { line: u32 },
    /// The code object does not occur in the recompiled source.
    NoCode,
    /// No candidate node produces the instruction.
    NoMatch,
    /// More than one code object or node fits.
    Ambiguous { count: usize },
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unresolved::NoSource => write!(f, "no source available"),
            Unresolved::NotResolvable { opname } => write!(f, "{} has no source expression", opname),
            Unresolved::NoStatement { line } => write!(f, "no statement at line {}", line),
            Unresolved::NoCode => write!(f, "code object not found in its source"),
            Unresolved::NoMatch => write!(f, "no node matches"),
            Unresolved::Ambiguous { count } => write!(f, "{} candidates match", count),
        }
    }
}

/// A resolved node or the reason there is none.
pub type Outcome = Result<NodeId, Unresolved>;

/// Identity of a code object that survives recompilation.
struct CodeKey<'a> {
    code: &'a CodeObject,
}

impl<'a> CodeKey<'a> {
    fn new(code: &'a CodeObject) -> Self {
        CodeKey { code }
    }

    fn matches(&self, other: &CodeObject) -> bool {
        other.name == self.code.name
            && other.first_line == self.code.first_line
            && other.code_names() == self.code.code_names()
            && other.cellvars == self.code.cellvars
            && other.freevars == self.code.freevars
    }
}

/// Position of the instruction at `index`, not counting `EXTENDED_ARG`
/// prefixes, which come and go as jump arguments change size.
fn logical_index(instructions: &[Instruction], index: usize) -> usize {
    instructions[..index]
        .iter()
        .filter(|i| i.opcode != Opcode::ExtendedArg)
        .count()
}

/// Logical index of the instruction a marked compilation put right before
/// its marker.
fn marked_position(code: &CodeObject) -> Option<usize> {
    let marker = code
        .instructions
        .iter()
        .position(|i| i.loaded_const().is_some_and(|c| c.is_marker()))?;
    let index = code.instructions[..marker]
        .iter()
        .rposition(|i| i.opcode != Opcode::ExtendedArg)?;
    Some(logical_index(&code.instructions, index))
}

/// Instructions without their `EXTENDED_ARG` prefixes.
fn logical(instructions: &[Instruction]) -> Vec<&Instruction> {
    instructions
        .iter()
        .filter(|i| i.opcode != Opcode::ExtendedArg)
        .collect()
}

/// Same opcode and argument. Jump targets move with the code around a
/// fragment, and nested units are separate objects, known by name and
/// first line.
fn same_instruction(a: &Instruction, b: &Instruction) -> bool {
    if a.opcode != b.opcode {
        return false;
    }
    match (&a.argval, &b.argval) {
        (ArgValue::Jump(_), ArgValue::Jump(_)) => true,
        (ArgValue::Const(Const::Code(x)), ArgValue::Const(Const::Code(y))) => {
            x.name == y.name && x.first_line == y.first_line
        }
        (x, y) => x == y,
    }
}

/// Whether `fragment` occurs in `real` starting at logical index `start`.
fn lines_up(real: &[&Instruction], start: usize, fragment: &[&Instruction]) -> bool {
    real.get(start..start + fragment.len())
        .is_some_and(|window| window.iter().zip(fragment).all(|(a, b)| same_instruction(a, b)))
}

/// Whether `unit` is the node `code` was compiled from, by name and first
/// line.
fn is_unit_of(ast: &Ast, unit: NodeId, code: &CodeObject) -> bool {
    if unit == ast.root() {
        return code.name == "<module>";
    }
    ast.scope_name(unit) == Some(code.name.as_str())
        && ast.definition_first_line(unit) == code.first_line
}

/// True for a single `in` / `is` comparison (or its negation).
fn is_fusible_compare(ast: &Ast, id: NodeId) -> bool {
    matches!(
        ast.kind(id),
        NodeKind::Compare { ops, .. } if ops.len() == 1 && ops[0].is_membership_or_identity()
    )
}

/// Whether a node of a resolvable shape is deliberately left out of
/// matching: chained comparisons, `not` fused into an `in` / `is` test, and
/// expressions the compiler folds into a constant.
pub fn is_excluded(ast: &Ast, annotations: &Annotations, id: NodeId) -> bool {
    match ast.kind(id) {
        NodeKind::Compare { ops, .. } if ops.len() > 1 => true,
        NodeKind::Compare { .. } if annotations.is_not_operand(ast, id) => {
            is_fusible_compare(ast, id)
        }
        NodeKind::UnaryOp {
            op: UnaryOperator::Not,
            operand,
        } if is_fusible_compare(ast, *operand) => true,
        _ => fold_constant(ast, id).is_some(),
    }
}

/// Resolves execution points for one runtime version.
#[derive(Debug)]
pub struct Resolver {
    registry: Arc<SourceRegistry>,
    classifier: Box<dyn InstructionClassifier>,
}

impl Resolver {
    pub fn new(registry: Arc<SourceRegistry>, version: RuntimeVersion) -> Self {
        Resolver {
            registry,
            classifier: classifier_for(version),
        }
    }

    /// A resolver for the version named by `WHENCE_RUNTIME_VERSION`.
    pub fn detect(registry: Arc<SourceRegistry>) -> Result<Self, UnsupportedVersion> {
        Ok(Self::new(registry, RuntimeVersion::detect()?))
    }

    pub fn version(&self) -> RuntimeVersion {
        self.classifier.version()
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn classifier(&self) -> &dyn InstructionClassifier {
        self.classifier.as_ref()
    }

    /// Resolve `point`.
    ///
    /// # Errors
    ///
    /// Only for broken inputs: an offset that is not an instruction of the
    /// code, a code object from another runtime version, a source file
    /// that cannot be read or decoded, or one the compiler rejects.
    pub fn executing(&self, point: impl Into<ExecutionPoint>) -> Result<Executing, ResolutionError> {
        let point = point.into();
        let code = &point.code;
        if code.version != self.version() {
            return Err(ResolutionError::VersionMismatch {
                code: code.name.clone(),
                expected: self.version(),
                found: code.version,
            });
        }
        let index = code
            .index_of(point.offset)
            .ok_or_else(|| out_of_range(code, point.offset))?;
        let source = self.registry.for_code(code)?;
        let statements = source.statements_at_line(point.lineno).to_vec();
        let outcome = self.memoized(&source, &point, index)?;
        Ok(Executing {
            source,
            point,
            statements,
            outcome,
        })
    }

    /// Shorthand for [`executing`](Self::executing) when only the outcome
    /// matters.
    pub fn resolve(&self, point: impl Into<ExecutionPoint>) -> Result<Outcome, ResolutionError> {
        Ok(self.executing(point)?.outcome)
    }

    fn memoized(
        &self,
        source: &Source,
        point: &ExecutionPoint,
        index: usize,
    ) -> Result<Outcome, ResolutionError> {
        let key = (point.code_id(), point.offset, point.lineno);
        if let Some((_, outcome)) = source.memo.lock().expect("memo poisoned").get(&key) {
            return Ok(outcome.clone());
        }
        let outcome = self.find_node(source, point, index)?;
        let mut memo = source.memo.lock().expect("memo poisoned");
        let (_, stored) = memo
            .entry(key)
            .or_insert_with(|| (Arc::clone(&point.code), outcome));
        Ok(stored.clone())
    }

    fn find_node(
        &self,
        source: &Source,
        point: &ExecutionPoint,
        index: usize,
    ) -> Result<Outcome, ResolutionError> {
        let Some(tree) = source.tree() else {
            return Ok(Err(Unresolved::NoSource));
        };
        let code = &point.code;
        let instruction = &code.instructions[index];
        let Some(category) = self.classifier.classify(instruction) else {
            return Ok(Err(Unresolved::NotResolvable {
                opname: instruction.opname(),
            }));
        };
        let statements = source.statements_at_line(point.lineno);
        if statements.is_empty() {
            return Ok(Err(Unresolved::NoStatement { line: point.lineno }));
        }

        let candidates = candidates(tree, source.annotations(), statements, category, point.lineno);
        debug!(
            "{} {} candidate(s) for {} at {}:{}",
            candidates.len(),
            category,
            instruction.opname(),
            source.filename(),
            point.lineno
        );
        if candidates.is_empty() {
            return Ok(Err(Unresolved::NoMatch));
        }

        let key = CodeKey::new(code);
        let module = source.compile(self.version())?;
        let units = all_codes(&module);
        if let Err(err) = units.iter().filter(|unit| key.matches(unit)).only() {
            if err.is_empty() {
                return Ok(Err(Unresolved::NoCode));
            }
            let count = units.iter().filter(|unit| key.matches(unit)).count();
            debug!("{} code objects named {} at line {}", count, code.name, code.first_line);
            return Ok(Err(Unresolved::Ambiguous { count }));
        }

        let target = logical_index(&code.instructions, index);
        let real = logical(&code.instructions);
        let qualname = source.code_qualname(code);
        let mut plain: HashMap<NodeId, Arc<CodeObject>> = HashMap::new();
        let mut matches = Vec::new();
        for candidate in candidates {
            let Some((unit, top)) = source.annotations().enclosing_unit(tree, candidate) else {
                continue;
            };
            if !is_unit_of(tree, unit, code) {
                continue;
            }
            let fragment = Fragment {
                unit,
                qualname: &qualname,
                statement: match tree.kind(unit) {
                    NodeKind::Module { .. } | NodeKind::FunctionDef { .. } | NodeKind::ClassDef { .. } => {
                        Some(top)
                    }
                    _ => None,
                },
            };
            let marked = source.compile_fragment(self.version(), fragment, Some(candidate))?;
            let Some(start) = marked_position(&marked).and_then(|p| target.checked_sub(p)) else {
                continue;
            };
            let base = fragment.statement.unwrap_or(unit);
            let unmarked = match plain.get(&base) {
                Some(code) => Arc::clone(code),
                None => {
                    let code = source.compile_fragment(self.version(), fragment, None)?;
                    plain.insert(base, Arc::clone(&code));
                    code
                }
            };
            if lines_up(&real, start, &logical(&unmarked.instructions)) {
                matches.push(candidate);
            }
        }

        let count = matches.len();
        Ok(matches.into_iter().only().map_err(|err| {
            if err.is_empty() {
                Unresolved::NoMatch
            } else {
                debug!("{} nodes match {} at {}", count, instruction.opname(), point.offset);
                Unresolved::Ambiguous { count }
            }
        }))
    }
}

/// Nodes of `category`'s shape inside `statements` whose lines include
/// `line`, in source order and without duplicates.
fn candidates(
    ast: &Ast,
    annotations: &Annotations,
    statements: &[NodeId],
    category: Category,
    line: u32,
) -> Vec<NodeId> {
    let mut found = Vec::new();
    for statement in statements {
        for id in ast.walk_from(*statement) {
            let node = ast.node(id);
            if !(node.lineno..=node.end_lineno).contains(&line)
                || !category.matches(ast, id)
                || is_excluded(ast, annotations, id)
                || found.contains(&id)
            {
                continue;
            }
            found.push(id);
        }
    }
    found
}

/// The result of resolving one execution point.
#[derive(Debug, Clone)]
pub struct Executing {
    source: Arc<Source>,
    point: ExecutionPoint,
    statements: Vec<NodeId>,
    outcome: Outcome,
}

impl Executing {
    pub fn source(&self) -> &Arc<Source> {
        &self.source
    }

    pub fn point(&self) -> &ExecutionPoint {
        &self.point
    }

    /// Statements at the point's line.
    pub fn statements(&self) -> &[NodeId] {
        &self.statements
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    /// The resolved node.
    pub fn node(&self) -> Option<NodeId> {
        self.outcome.as_ref().ok().copied()
    }

    /// Why there is no node.
    pub fn unresolved(&self) -> Option<&Unresolved> {
        self.outcome.as_ref().err()
    }

    pub fn node_kind(&self) -> Option<&NodeKind> {
        let node = self.node()?;
        Some(self.source.tree()?.kind(node))
    }

    /// Qualified name of the executing code object.
    pub fn code_qualname(&self) -> String {
        self.source.code_qualname(&self.point.code)
    }

    /// Source text of the resolved node.
    pub fn text(&self) -> Option<&str> {
        self.source.node_text(self.node()?)
    }

    /// Byte range of the resolved node in the source text.
    pub fn text_range(&self) -> Option<Range<usize>> {
        self.source.node_range(self.node()?)
    }
}
