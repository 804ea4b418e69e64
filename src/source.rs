//! Source units and the registry that caches them.
//!
//! A [`Source`] is the decoded text of one origin key, its syntax tree (when
//! it parses), the parent links and statement-by-line index built from that
//! tree, and the qualified names of its scopes. A source is built completely
//! before anyone can see it and never changes afterwards; failures to parse
//! are stored as a source without a tree.
//!
//! The [`SourceRegistry`] maps origin keys to sources. Lookups are
//! serialized per key, so two threads asking for the same file at once parse
//! it once and get the same `Arc`.

use std::collections::HashMap;
use std::fs;
use std::ops::Range;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use tracing::{debug, warn};
use whence_bytecode::{CodeObject, CompileError, Compiler, Fragment, RuntimeVersion, SymbolTable};
use whence_core::{ContentHash, LineIndex};
use whence_python::{parse_module, prettify_error, Annotations, Ast, NodeId, ParserError, Qualnames};

use crate::encoding::decode_source;
use crate::error::{ResolutionError, SourceError};
use crate::executing::Outcome;

/// Memoized resolutions keyed by (code identity, offset, line). The entry
/// keeps the code alive so its address is not reused while memoized.
pub(crate) type Memo = HashMap<(usize, u32, u32), (Arc<CodeObject>, Outcome)>;

/// Plain recompilations keyed by runtime version. Marked compilations are
/// fragments and are never kept.
type CompileCache = HashMap<RuntimeVersion, Arc<CodeObject>>;

/// The decoded and parsed text behind one origin key.
#[derive(Debug)]
pub struct Source {
    filename: String,
    text: String,
    encoding: String,
    tree: Option<Ast>,
    syntax_error: Option<ParserError>,
    annotations: Annotations,
    qualnames: Qualnames,
    line_index: LineIndex,
    pub(crate) memo: Mutex<Memo>,
    compiled: Mutex<CompileCache>,
    symbols: OnceLock<Result<SymbolTable, CompileError>>,
}

impl Source {
    /// Parse `text`. A parse failure yields a source without a tree.
    pub fn from_text(filename: impl Into<String>, text: impl Into<String>) -> Self {
        Self::build(filename.into(), text.into(), "utf-8".to_string())
    }

    /// Decode and parse `bytes`.
    ///
    /// # Errors
    ///
    /// [`SourceError::Decode`] when the bytes contradict their declared
    /// encoding. Undecodable bytes without a declaration give a source
    /// without a tree, like a syntax error would.
    pub fn from_bytes(filename: impl Into<String>, bytes: &[u8]) -> Result<Self, SourceError> {
        let filename = filename.into();
        match decode_source(&filename, bytes) {
            Ok(decoded) => Ok(Self::build(filename, decoded.text, decoded.encoding)),
            Err(SourceError::Syntax { message, .. }) => {
                warn!("{}: {}", filename, message);
                Ok(Self::without_tree(
                    filename,
                    String::from_utf8_lossy(bytes).into_owned(),
                ))
            }
            Err(err) => Err(err),
        }
    }

    /// Read, decode and parse the file at `path`.
    pub fn from_path(path: &Path) -> Result<Self, SourceError> {
        let bytes = fs::read(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(path.to_string_lossy(), &bytes)
    }

    fn build(filename: String, text: String, encoding: String) -> Self {
        let (tree, syntax_error) = match parse_module(&text) {
            Ok(ast) => (Some(ast), None),
            Err(err) => {
                debug!("{} does not parse: {}", filename, err);
                (None, Some(err))
            }
        };
        let annotations = tree.as_ref().map(Annotations::build).unwrap_or_default();
        let qualnames = tree.as_ref().map(Qualnames::build).unwrap_or_default();
        Source {
            line_index: LineIndex::new(&text),
            filename,
            text,
            encoding,
            tree,
            syntax_error,
            annotations,
            qualnames,
            memo: Mutex::new(HashMap::new()),
            compiled: Mutex::new(HashMap::new()),
            symbols: OnceLock::new(),
        }
    }

    fn without_tree(filename: String, text: String) -> Self {
        Source {
            line_index: LineIndex::new(&text),
            filename,
            text,
            encoding: "utf-8".to_string(),
            tree: None,
            syntax_error: None,
            annotations: Annotations::default(),
            qualnames: Qualnames::default(),
            memo: Mutex::new(HashMap::new()),
            compiled: Mutex::new(HashMap::new()),
            symbols: OnceLock::new(),
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Decoded text, without any byte order mark.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Encoding the bytes were decoded with.
    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    /// The syntax tree; `None` when the text did not decode or parse.
    pub fn tree(&self) -> Option<&Ast> {
        self.tree.as_ref()
    }

    pub fn syntax_error(&self) -> Option<&ParserError> {
        self.syntax_error.as_ref()
    }

    /// The parse failure rendered with a snippet of the offending text.
    pub fn prettify_syntax_error(&self) -> Option<String> {
        self.syntax_error
            .as_ref()
            .map(|err| prettify_error(err, &self.text, &self.filename))
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    pub fn line_index(&self) -> &LineIndex {
        &self.line_index
    }

    /// Statements attributed to `line`, in source order.
    pub fn statements_at_line(&self, line: u32) -> &[NodeId] {
        self.annotations.statements_at_line(line)
    }

    /// Qualified name of the scope `code` was compiled from. Runtimes that
    /// record a qualname on the code object are trusted; otherwise it is
    /// derived from the tree, falling back to the bare name.
    pub fn code_qualname(&self, code: &CodeObject) -> String {
        if let Some(qualname) = &code.qualname {
            return qualname.clone();
        }
        self.qualnames.get_or_name(&code.name, code.first_line)
    }

    /// Byte range of `id` in [`text`](Self::text).
    pub fn node_range(&self, id: NodeId) -> Option<Range<usize>> {
        self.tree.as_ref()?.get(id).map(|node| node.span.range())
    }

    /// Source text of `id`.
    pub fn node_text(&self, id: NodeId) -> Option<&str> {
        let tree = self.tree.as_ref()?;
        tree.get(id)?;
        Some(tree.text(id, &self.text))
    }

    fn tree_or_error(&self) -> Result<&Ast, ResolutionError> {
        self.tree.as_ref().ok_or_else(|| ResolutionError::Compile {
            filename: self.filename.clone(),
            message: "source has no syntax tree".to_string(),
        })
    }

    /// Compile the whole tree for `version`. Results are cached for the
    /// life of the source.
    pub(crate) fn compile(&self, version: RuntimeVersion) -> Result<Arc<CodeObject>, ResolutionError> {
        if let Some(code) = self
            .compiled
            .lock()
            .expect("compile cache poisoned")
            .get(&version)
        {
            return Ok(Arc::clone(code));
        }
        let tree = self.tree_or_error()?;
        let code = Compiler::new(version)
            .compile_module(tree, &self.filename)
            .map_err(|err| ResolutionError::from_compile(&self.filename, err))?;
        self.compiled
            .lock()
            .expect("compile cache poisoned")
            .insert(version, Arc::clone(&code));
        Ok(code)
    }

    /// Compile one statement or one lambda or comprehension unit,
    /// optionally marking a node inside it. Not cached.
    pub(crate) fn compile_fragment(
        &self,
        version: RuntimeVersion,
        fragment: Fragment<'_>,
        marked: Option<NodeId>,
    ) -> Result<Arc<CodeObject>, ResolutionError> {
        let tree = self.tree_or_error()?;
        let symbols = self
            .symbols
            .get_or_init(|| SymbolTable::build(tree))
            .as_ref()
            .map_err(|err| ResolutionError::from_compile(&self.filename, err.clone()))?;
        Compiler::new(version)
            .compile_fragment(tree, symbols, &self.filename, fragment, marked)
            .map_err(|err| ResolutionError::from_compile(&self.filename, err))
    }

    /// Number of cached whole-module compilations.
    #[cfg(test)]
    pub(crate) fn compiled_len(&self) -> usize {
        self.compiled.lock().expect("compile cache poisoned").len()
    }

    /// The module code object for `version`, as the host runtime would
    /// have compiled this source.
    pub fn module_code(&self, version: RuntimeVersion) -> Result<Arc<CodeObject>, ResolutionError> {
        self.compile(version)
    }

    /// Drop memoized resolutions and recompilations.
    pub fn clear_caches(&self) {
        self.memo.lock().expect("memo poisoned").clear();
        self.compiled.lock().expect("compile cache poisoned").clear();
    }
}

/// Whether `filename` names an in-memory source, e.g. `<string>`.
pub fn is_synthetic(filename: &str) -> bool {
    filename.starts_with('<') && filename.ends_with('>')
}

type Slot = Arc<Mutex<Option<Arc<Source>>>>;

/// Process-scoped cache of [`Source`]s keyed by origin key.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    slots: RwLock<HashMap<String, Slot>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Slot {
        if let Some(slot) = self
            .slots
            .read()
            .expect("source registry RwLock poisoned")
            .get(key)
        {
            return Arc::clone(slot);
        }
        let mut slots = self
            .slots
            .write()
            .expect("source registry RwLock poisoned");
        Arc::clone(slots.entry(key.to_string()).or_default())
    }

    /// The source for `filename`, loading it on first use.
    ///
    /// Repeated calls return the same `Arc`. An unregistered in-memory key
    /// (`<...>`) yields an empty source without a tree and is not cached.
    ///
    /// # Errors
    ///
    /// [`SourceError::Io`] when the file cannot be read and
    /// [`SourceError::Decode`] when it contradicts its declared encoding.
    /// Neither is cached.
    pub fn for_filename(&self, filename: &str) -> Result<Arc<Source>, SourceError> {
        if is_synthetic(filename) {
            return Ok(self.registered(filename).unwrap_or_else(|| {
                debug!("no registered text for {}", filename);
                Arc::new(Source::without_tree(filename.to_string(), String::new()))
            }));
        }
        let slot = self.slot(filename);
        let mut guard = slot.lock().expect("source slot poisoned");
        if let Some(source) = guard.as_ref() {
            return Ok(Arc::clone(source));
        }
        debug!("loading {}", filename);
        let source = Arc::new(Source::from_path(Path::new(filename))?);
        *guard = Some(Arc::clone(&source));
        Ok(source)
    }

    /// An in-memory source, without creating a slot for unknown keys.
    fn registered(&self, filename: &str) -> Option<Arc<Source>> {
        let slot = Arc::clone(
            self.slots
                .read()
                .expect("source registry RwLock poisoned")
                .get(filename)?,
        );
        let guard = slot.lock().expect("source slot poisoned");
        guard.as_ref().map(Arc::clone)
    }

    /// The source `code` was compiled from.
    pub fn for_code(&self, code: &CodeObject) -> Result<Arc<Source>, SourceError> {
        self.for_filename(&code.filename)
    }

    /// Register in-memory `text` and return the key to compile it under:
    /// `<name-XXXXXXXXXXXX>`, the suffix being a content fingerprint, so
    /// different texts registered under one name never collide.
    pub fn register_text(&self, name: &str, text: &str) -> String {
        let hash = ContentHash::compute(text.as_bytes());
        let filename = format!("<{}-{}>", name, hash.short());
        let slot = self.slot(&filename);
        let mut guard = slot.lock().expect("source slot poisoned");
        if guard.is_none() {
            debug!("registered {}", filename);
            *guard = Some(Arc::new(Source::from_text(filename.clone(), text)));
        }
        filename
    }

    /// Insert an already built source, replacing any cached one.
    pub fn insert(&self, source: Source) -> Arc<Source> {
        let source = Arc::new(source);
        let slot = self.slot(&source.filename);
        *slot.lock().expect("source slot poisoned") = Some(Arc::clone(&source));
        source
    }

    /// Number of cached sources.
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .expect("source registry RwLock poisoned")
            .values()
            .filter(|slot| slot.lock().map(|s| s.is_some()).unwrap_or(false))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every cached source.
    pub fn clear(&self) {
        self.slots
            .write()
            .expect("source registry RwLock poisoned")
            .clear();
    }
}
