//! Validation harness.
//!
//! Compiles a source, resolves every instruction the classifier considers
//! resolvable, and checks the results against the tree:
//!
//! - every such instruction resolves, except calls and comparisons (which
//!   the compiler also emits for class creation, decorators, comprehension
//!   calls, `with` exits and exception matching) and instructions on a line
//!   holding a lone augmented assignment or import
//! - a resolved node has the instruction's shape
//! - no node is claimed by two instructions
//! - every node of a resolvable shape is claimed, unless it is a `not`, a
//!   store or delete target, a chained or fused comparison, or a literal
//!
//! The list of `(opname, node text)` pairs doubles as a baseline that is
//! compared across runs to catch behavior changes.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use walkdir::WalkDir;
use whence_bytecode::{all_codes, fold_constant, RuntimeVersion};
use whence_python::{Ast, ExprContext, NodeId, NodeKind, UnaryOperator};

use crate::error::{ResolutionError, WhenceError};
use crate::executing::{is_excluded, Resolver};
use crate::frame::ExecutionPoint;
use crate::source::Source;

/// Sources with dead `if 0:` blocks legitimately leave nodes unclaimed.
static DEAD_BRANCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*if 0(:| and )").expect("static regex"));

/// One resolved instruction: its opname and the text of its node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry(pub String, pub String);

/// Something the harness objects to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    /// The source has no syntax tree.
    NoTree { message: String },
    /// An instruction that must resolve did not.
    Unresolved {
        code: String,
        offset: u32,
        line: u32,
        opname: String,
        reason: String,
    },
    /// A node of the wrong shape came back.
    WrongKind {
        offset: u32,
        opname: String,
        node: String,
    },
    /// Two instructions resolved to the same node.
    Duplicate { line: u32, text: String },
    /// A node no instruction resolved to.
    Missed { line: u32, node: String, text: String },
}

/// Outcome of checking one source.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub filename: String,
    pub version: RuntimeVersion,
    pub entries: Vec<Entry>,
    pub failures: Vec<Failure>,
}

impl FileReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of checking several sources.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub version: RuntimeVersion,
    pub files: Vec<FileReport>,
}

impl Report {
    pub fn failure_count(&self) -> usize {
        self.files.iter().map(|f| f.failures.len()).sum()
    }

    /// Entries per file name, the shape baselines are stored in.
    pub fn baseline(&self) -> Baseline {
        self.files
            .iter()
            .map(|file| {
                let name = Path::new(&file.filename)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file.filename.clone());
                (name, file.entries.clone())
            })
            .collect()
    }
}

/// Recorded entries keyed by file name.
pub type Baseline = BTreeMap<String, Vec<Entry>>;

/// Literal expressions, which the compiler may fold away entirely.
fn is_literal(ast: &Ast, id: NodeId) -> bool {
    let literal = |child: &NodeId| is_literal(ast, *child);
    match ast.kind(id) {
        NodeKind::Constant { .. } => true,
        NodeKind::UnaryOp { operand, .. } => literal(operand),
        NodeKind::BinOp { left, right, .. } => literal(left) && literal(right),
        NodeKind::Compare {
            left, comparators, ..
        } => literal(left) && comparators.iter().all(literal),
        NodeKind::Subscript { value, slice, .. } => literal(value) && literal(slice),
        NodeKind::Slice { lower, upper, step } => {
            [lower, upper, step].into_iter().flatten().all(literal)
        }
        NodeKind::Tuple { elts, .. } | NodeKind::List { elts, .. } | NodeKind::Set { elts } => {
            elts.iter().all(literal)
        }
        NodeKind::Dict { keys, values } => {
            keys.iter().all(|k| k.as_ref().is_some_and(literal)) && values.iter().all(literal)
        }
        _ => fold_constant(ast, id).is_some(),
    }
}

fn is_resolvable_shape(kind: &NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::UnaryOp { .. }
            | NodeKind::BinOp { .. }
            | NodeKind::Subscript { .. }
            | NodeKind::Call { .. }
            | NodeKind::Compare { .. }
            | NodeKind::Attribute { .. }
    )
}

/// Whether a node that no instruction claimed is acceptable.
fn may_be_unclaimed(source: &Source, ast: &Ast, id: NodeId) -> bool {
    let kind = ast.kind(id);
    matches!(
        kind,
        NodeKind::UnaryOp {
            op: UnaryOperator::Not,
            ..
        }
    ) || matches!(ast.ctx(id), Some(ExprContext::Store | ExprContext::Del))
        || is_excluded(ast, source.annotations(), id)
        || is_literal(ast, id)
}

/// True when the only statement at `line` is an augmented assignment or an
/// import, whose target loads and module attribute loads have no node.
fn is_lone_aug_assign_or_import(source: &Source, ast: &Ast, line: u32) -> bool {
    match source.statements_at_line(line) {
        [only] => matches!(
            ast.kind(*only),
            NodeKind::AugAssign { .. } | NodeKind::Import { .. }
        ),
        _ => false,
    }
}

/// Check one source.
///
/// # Errors
///
/// Resolution errors, which indicate a bug rather than a check failure.
pub fn check_source(resolver: &Resolver, source: &Arc<Source>) -> Result<FileReport, ResolutionError> {
    let version = resolver.version();
    let mut report = FileReport {
        filename: source.filename().to_string(),
        version,
        entries: Vec::new(),
        failures: Vec::new(),
    };
    let Some(ast) = source.tree() else {
        let message = source
            .prettify_syntax_error()
            .unwrap_or_else(|| "source did not decode".to_string());
        report.failures.push(Failure::NoTree { message });
        return Ok(report);
    };

    let mut claimed: HashMap<NodeId, u32> = ast
        .ids()
        .filter(|id| is_resolvable_shape(ast.kind(*id)))
        .map(|id| (id, u32::MAX))
        .collect();

    let module = source.compile(version)?;
    for code in all_codes(&module) {
        for instruction in &code.instructions {
            let Some(category) = resolver.classifier().classify(instruction) else {
                continue;
            };
            let point = ExecutionPoint::at_offset(Arc::clone(&code), instruction.offset)?;
            let line = point.lineno;
            let executing = resolver.executing(point)?;
            let node = match executing.outcome() {
                Ok(node) => *node,
                Err(_) if category.has_implicit_instructions() => continue,
                Err(_) if is_lone_aug_assign_or_import(source, ast, line) => continue,
                Err(reason) => {
                    report.failures.push(Failure::Unresolved {
                        code: executing.code_qualname(),
                        offset: instruction.offset,
                        line,
                        opname: instruction.opname().to_string(),
                        reason: reason.to_string(),
                    });
                    continue;
                }
            };
            let text = executing.text().unwrap_or_default().to_string();
            if !category.matches(ast, node) {
                report.failures.push(Failure::WrongKind {
                    offset: instruction.offset,
                    opname: instruction.opname().to_string(),
                    node: ast.kind(node).type_name().to_string(),
                });
            }
            match claimed.get_mut(&node) {
                Some(offset) if *offset == u32::MAX => *offset = instruction.offset,
                _ => report.failures.push(Failure::Duplicate {
                    line,
                    text: text.clone(),
                }),
            }
            report
                .entries
                .push(Entry(instruction.opname().to_string(), text));
        }
    }

    if !DEAD_BRANCH.is_match(source.text()) {
        let mut missed: Vec<_> = claimed
            .iter()
            .filter(|(id, offset)| **offset == u32::MAX && !may_be_unclaimed(source, ast, **id))
            .map(|(id, _)| *id)
            .collect();
        missed.sort();
        for id in missed {
            report.failures.push(Failure::Missed {
                line: ast.node(id).lineno,
                node: ast.kind(id).type_name().to_string(),
                text: ast.text(id, source.text()).to_string(),
            });
        }
    }

    if report.passed() {
        info!(
            "{}: {} instruction(s) resolved on {}",
            report.filename,
            report.entries.len(),
            version
        );
    } else {
        warn!(
            "{}: {} failure(s) on {}",
            report.filename,
            report.failures.len(),
            version
        );
    }
    Ok(report)
}

/// Every `*.py` file under `paths` (files are taken as given), sorted.
pub fn collect_python_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>, WhenceError> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            files.push(path.clone());
            continue;
        }
        if !path.exists() {
            return Err(WhenceError::invalid_args(format!(
                "no such file or directory: {}",
                path.display()
            )));
        }
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = entry.map_err(|e| WhenceError::internal(e.to_string()))?;
            if entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "py")
            {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// Check every Python file under `paths`.
pub fn check_paths(resolver: &Resolver, paths: &[PathBuf]) -> Result<Report, WhenceError> {
    let mut files = Vec::new();
    for path in collect_python_files(paths)? {
        let source = resolver
            .registry()
            .for_filename(&path.to_string_lossy())?;
        files.push(check_source(resolver, &source)?);
    }
    Ok(Report {
        version: resolver.version(),
        files,
    })
}
