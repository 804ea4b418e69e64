//! Expression compilation.

use whence_python::{BoolOperator, CmpOperator, ExprContext, Keyword, NodeId, NodeKind, UnaryOperator};

use super::{CodeGen, CompileError, NameOp, Result, ScopeKind};
use crate::builder::JumpLabel;
use crate::code::Const;
use crate::opcode::{compare_instruction, nb_op_arg, Opcode};

/// Which display a run of elements builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Display {
    List,
    Tuple,
    Set,
}

impl CodeGen<'_> {
    /// Compile `id`, leaving its value on the stack.
    pub(super) fn compile_expr(&mut self, id: NodeId) -> Result<()> {
        let line = self.line_of(id);
        let previous = self.set_line(line);
        self.compile_expr_kind(id, line)?;
        if self.is_marked(id) {
            self.emit_marker();
        }
        self.set_line(previous);
        Ok(())
    }

    fn compile_expr_kind(&mut self, id: NodeId, line: u32) -> Result<()> {
        let ast = self.ast;
        let kind = ast.kind(id);
        if matches!(
            kind,
            NodeKind::BinOp { .. } | NodeKind::UnaryOp { .. } | NodeKind::Tuple { .. }
        ) {
            if let Some(value) = self.folded(id) {
                self.emit_const(value);
                return Ok(());
            }
        }
        match kind {
            NodeKind::BoolOp { op, values } => {
                let end = self.new_label();
                let jump = match op {
                    BoolOperator::And => Opcode::JumpIfFalseOrPop,
                    BoolOperator::Or => Opcode::JumpIfTrueOrPop,
                };
                if let Some((last, rest)) = values.split_last() {
                    for value in rest {
                        self.compile_expr(*value)?;
                        self.emit_jump_to(jump, end);
                    }
                    self.compile_expr(*last)?;
                }
                self.patch(end);
            }
            NodeKind::NamedExpr { target, value } => {
                self.compile_expr(*value)?;
                self.emit_dup_top();
                self.compile_store(*target)?;
            }
            NodeKind::BinOp { left, op, right } => {
                self.compile_expr(*left)?;
                self.compile_expr(*right)?;
                if self.version.has_unified_binary_op() {
                    self.emit_arg(Opcode::BinaryOp, nb_op_arg(*op, false));
                } else {
                    self.emit(Opcode::for_binary(*op, false));
                }
            }
            NodeKind::UnaryOp { op, operand } => {
                // `not (a in b)` is `a not in b`.
                if let (UnaryOperator::Not, Some((left, cmp, right))) =
                    (op, self.fusible_compare(*operand))
                {
                    self.compile_expr(left)?;
                    self.compile_expr(right)?;
                    self.emit_compare(cmp.negated().unwrap_or(cmp));
                } else {
                    self.compile_expr(*operand)?;
                    self.emit(Opcode::for_unary(*op));
                }
            }
            NodeKind::Lambda { .. } => self.compile_lambda(id)?,
            NodeKind::IfExp { test, body, orelse } => {
                let next = self.new_label();
                let end = self.new_label();
                self.compile_jump_if(*test, false, next)?;
                self.compile_expr(*body)?;
                self.emit_jump_to(Opcode::JumpForward, end);
                self.patch(next);
                self.compile_expr(*orelse)?;
                self.patch(end);
            }
            NodeKind::Dict { keys, values } => self.compile_dict(keys, values)?,
            NodeKind::Set { elts } => self.compile_display(elts, Display::Set)?,
            NodeKind::List { elts, .. } => self.compile_display(elts, Display::List)?,
            NodeKind::Tuple { elts, .. } => self.compile_display(elts, Display::Tuple)?,
            NodeKind::ListComp { .. }
            | NodeKind::SetComp { .. }
            | NodeKind::DictComp { .. }
            | NodeKind::GeneratorExp { .. } => self.compile_comprehension(id)?,
            NodeKind::Await { value } => {
                let scope = self.scope();
                if !scope.kind.is_function_like() {
                    return Err(CompileError::new("'await' outside function", line));
                }
                if !scope.is_coroutine && scope.kind != ScopeKind::Comprehension {
                    return Err(CompileError::new("'await' outside async function", line));
                }
                self.compile_expr(*value)?;
                self.emit(Opcode::GetAwaitable);
                self.emit_const(Const::None);
                self.emit_await_tail();
            }
            NodeKind::Yield { value } => {
                if !self.scope().kind.is_function_like() {
                    return Err(CompileError::new("'yield' outside function", line));
                }
                match value {
                    Some(value) => self.compile_expr(*value)?,
                    None => self.emit_const(Const::None),
                }
                self.emit_yield_value();
            }
            NodeKind::YieldFrom { value } => {
                if !self.scope().kind.is_function_like() {
                    return Err(CompileError::new("'yield' outside function", line));
                }
                if self.scope().is_coroutine {
                    return Err(CompileError::new("'yield from' inside async function", line));
                }
                self.compile_expr(*value)?;
                self.emit(Opcode::GetYieldFromIter);
                self.emit_const(Const::None);
                self.emit_send_loop(2);
            }
            NodeKind::Compare {
                left,
                ops,
                comparators,
            } => self.compile_compare(*left, ops, comparators)?,
            NodeKind::Call {
                func,
                args,
                keywords,
            } => self.compile_call(*func, args, keywords)?,
            NodeKind::FormattedValue {
                value,
                conversion,
                format_spec,
            } => {
                self.compile_expr(*value)?;
                let mut arg = match conversion {
                    Some('s') => 1,
                    Some('r') => 2,
                    Some('a') => 3,
                    _ => 0,
                };
                if let Some(spec) = format_spec {
                    self.compile_expr(*spec)?;
                    arg |= 4;
                }
                self.emit_arg(Opcode::FormatValue, arg);
            }
            NodeKind::JoinedStr { values } => {
                for value in values {
                    self.compile_expr(*value)?;
                }
                if values.len() != 1 {
                    self.emit_arg(Opcode::BuildString, values.len() as u32);
                }
            }
            NodeKind::Constant { value } => self.emit_const(Const::from(value)),
            NodeKind::Attribute { value, attr, ctx } => {
                if *ctx != ExprContext::Load {
                    return Err(CompileError::new("attribute target used as a value", line));
                }
                self.compile_expr(*value)?;
                self.builder().emit_name(Opcode::LoadAttr, attr);
            }
            NodeKind::Subscript { value, slice, .. } => {
                self.compile_expr(*value)?;
                self.compile_expr(*slice)?;
                self.emit(Opcode::BinarySubscr);
            }
            NodeKind::Slice { lower, upper, step } => {
                for part in [lower, upper] {
                    match part {
                        Some(part) => self.compile_expr(*part)?,
                        None => self.emit_const(Const::None),
                    }
                }
                match step {
                    Some(step) => {
                        self.compile_expr(*step)?;
                        self.emit_arg(Opcode::BuildSlice, 3);
                    }
                    None => self.emit_arg(Opcode::BuildSlice, 2),
                }
            }
            NodeKind::Name { id: name, .. } => self.compile_name(name, NameOp::Load)?,
            NodeKind::Starred { .. } => {
                return Err(CompileError::new("can't use starred expression here", line));
            }
            other => {
                return Err(CompileError::new(
                    format!("{} is not an expression", other.type_name()),
                    line,
                ));
            }
        }
        Ok(())
    }

    /// Compile the iterable of a `for` loop or comprehension clause. A list
    /// or set display of constants is loaded as one tuple or frozenset.
    pub(super) fn compile_iter(&mut self, id: NodeId) -> Result<()> {
        match self.constant_display(id) {
            Some(value) => {
                let previous = self.set_line(self.line_of(id));
                self.emit_const(value);
                self.set_line(previous);
                Ok(())
            }
            None => self.compile_expr(id),
        }
    }

    fn constant_display(&self, id: NodeId) -> Option<Const> {
        if self.is_marked(id) {
            return None;
        }
        let (elts, is_set) = match self.ast.kind(id) {
            NodeKind::List { elts, ctx: ExprContext::Load } => (elts, false),
            NodeKind::Set { elts } => (elts, true),
            _ => return None,
        };
        let items = self.folded_all(elts)?;
        Some(if is_set {
            Const::FrozenSet(items)
        } else {
            Const::Tuple(items)
        })
    }

    /// Every element folded, or `None` if any does not fold.
    fn folded_all(&self, elts: &[NodeId]) -> Option<Vec<Const>> {
        elts.iter().map(|elt| self.folded(*elt)).collect()
    }

    /// A single `is`/`in` comparison that a surrounding `not` negates.
    fn fusible_compare(&self, id: NodeId) -> Option<(NodeId, CmpOperator, NodeId)> {
        match self.ast.kind(id) {
            NodeKind::Compare {
                left,
                ops,
                comparators,
            } if ops.len() == 1 && ops[0].is_membership_or_identity() => {
                Some((*left, ops[0], comparators[0]))
            }
            _ => None,
        }
    }

    fn emit_compare(&mut self, op: CmpOperator) {
        let (opcode, arg) = compare_instruction(op, self.version);
        self.emit_arg(opcode, arg);
    }

    /// Compile the right operand of a comparison.
    fn compile_comparator(&mut self, op: CmpOperator, id: NodeId) -> Result<()> {
        if matches!(op, CmpOperator::In | CmpOperator::NotIn) {
            self.compile_iter(id)
        } else {
            self.compile_expr(id)
        }
    }

    /// Leave the operand below the top in place for the next comparison.
    fn emit_chain_step(&mut self) {
        if self.version.has_exception_tables() {
            self.emit_arg(Opcode::Swap, 2);
            self.emit_arg(Opcode::Copy, 2);
        } else {
            self.emit(Opcode::DupTop);
            self.emit(Opcode::RotThree);
        }
    }

    fn compile_compare(
        &mut self,
        left: NodeId,
        ops: &[CmpOperator],
        comparators: &[NodeId],
    ) -> Result<()> {
        self.compile_expr(left)?;
        let (Some((last_op, ops)), Some((last, comparators))) =
            (ops.split_last(), comparators.split_last())
        else {
            return Ok(());
        };
        if ops.is_empty() {
            self.compile_comparator(*last_op, *last)?;
            self.emit_compare(*last_op);
            return Ok(());
        }
        let cleanup = self.new_label();
        for (op, comparator) in ops.iter().zip(comparators) {
            self.compile_comparator(*op, *comparator)?;
            self.emit_chain_step();
            self.emit_compare(*op);
            self.emit_jump_to(Opcode::JumpIfFalseOrPop, cleanup);
        }
        self.compile_comparator(*last_op, *last)?;
        self.emit_compare(*last_op);
        let end = self.emit_jump(Opcode::JumpForward);
        self.patch(cleanup);
        self.emit_rot_two();
        self.emit(Opcode::PopTop);
        self.patch(end);
        Ok(())
    }

    /// Jump to `target` when `id` evaluates to `cond`; fall through
    /// otherwise.
    pub(super) fn compile_jump_if(&mut self, id: NodeId, cond: bool, target: JumpLabel) -> Result<()> {
        if self.is_marked(id) {
            return self.compile_jump_if_generic(id, cond, target);
        }
        let ast = self.ast;
        match ast.kind(id) {
            NodeKind::UnaryOp {
                op: UnaryOperator::Not,
                operand,
            } if self.fusible_compare(*operand).is_none() && self.folded(id).is_none() => {
                self.compile_jump_if(*operand, !cond, target)
            }
            NodeKind::BoolOp { op, values } => {
                let is_or = *op == BoolOperator::Or;
                let next = if is_or != cond {
                    self.new_label()
                } else {
                    target
                };
                if let Some((last, rest)) = values.split_last() {
                    for value in rest {
                        self.compile_jump_if(*value, is_or, next)?;
                    }
                    self.compile_jump_if(*last, cond, target)?;
                }
                if next != target {
                    self.patch(next);
                }
                Ok(())
            }
            NodeKind::Compare {
                left,
                ops,
                comparators,
            } if ops.len() > 1 => {
                let line = self.line_of(id);
                let previous = self.set_line(line);
                let cleanup = self.new_label();
                self.compile_expr(*left)?;
                let n = ops.len() - 1;
                for (op, comparator) in ops[..n].iter().zip(comparators) {
                    self.compile_comparator(*op, *comparator)?;
                    self.emit_chain_step();
                    self.emit_compare(*op);
                    self.emit_jump_to(Opcode::PopJumpIfFalse, cleanup);
                }
                self.compile_comparator(ops[n], comparators[n])?;
                self.emit_compare(ops[n]);
                self.emit_jump_to(
                    if cond {
                        Opcode::PopJumpIfTrue
                    } else {
                        Opcode::PopJumpIfFalse
                    },
                    target,
                );
                let end = self.emit_jump(Opcode::JumpForward);
                self.patch(cleanup);
                self.emit(Opcode::PopTop);
                if !cond {
                    self.emit_jump_to(Opcode::JumpForward, target);
                }
                self.patch(end);
                self.set_line(previous);
                Ok(())
            }
            _ => self.compile_jump_if_generic(id, cond, target),
        }
    }

    fn compile_jump_if_generic(&mut self, id: NodeId, cond: bool, target: JumpLabel) -> Result<()> {
        self.compile_expr(id)?;
        let opcode = if cond {
            Opcode::PopJumpIfTrue
        } else {
            Opcode::PopJumpIfFalse
        };
        self.emit_jump_to(opcode, target);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Displays
    // ------------------------------------------------------------------

    fn compile_display(&mut self, elts: &[NodeId], display: Display) -> Result<()> {
        if self.version.extends_constant_lists() {
            self.starunpack(elts, 0, display)
        } else {
            self.starunpack_legacy(elts, display)
        }
    }

    /// Build a display from runs of plain elements and `*` unpackings.
    fn starunpack(&mut self, elts: &[NodeId], pushed: u32, display: Display) -> Result<()> {
        let ast = self.ast;
        let (build, add, extend) = match display {
            Display::Set => (Opcode::BuildSet, Opcode::SetAdd, Opcode::SetUpdate),
            Display::List | Display::Tuple => {
                (Opcode::BuildList, Opcode::ListAppend, Opcode::ListExtend)
            }
        };
        if elts.len() > 2 {
            if let Some(items) = self.folded_all(elts) {
                match display {
                    Display::Tuple => self.emit_const(Const::Tuple(items)),
                    Display::List => {
                        self.emit_arg(build, pushed);
                        self.emit_const(Const::Tuple(items));
                        self.emit_arg(extend, 1);
                    }
                    Display::Set => {
                        self.emit_arg(build, pushed);
                        self.emit_const(Const::FrozenSet(items));
                        self.emit_arg(extend, 1);
                    }
                }
                return Ok(());
            }
        }
        let has_star = elts
            .iter()
            .any(|e| matches!(ast.kind(*e), NodeKind::Starred { .. }));
        if !has_star {
            for elt in elts {
                self.compile_expr(*elt)?;
            }
            let count = elts.len() as u32 + pushed;
            match display {
                Display::Tuple => self.emit_arg(Opcode::BuildTuple, count),
                _ => self.emit_arg(build, count),
            }
            return Ok(());
        }
        let mut seen_star = false;
        for (i, elt) in elts.iter().enumerate() {
            match ast.kind(*elt) {
                NodeKind::Starred { value, .. } => {
                    if !seen_star {
                        self.emit_arg(build, i as u32 + pushed);
                        seen_star = true;
                    }
                    self.compile_expr(*value)?;
                    self.emit_arg(extend, 1);
                }
                _ => {
                    self.compile_expr(*elt)?;
                    if seen_star {
                        self.emit_arg(add, 1);
                    }
                }
            }
        }
        if display == Display::Tuple {
            self.emit(Opcode::ListToTuple);
        }
        Ok(())
    }

    /// Displays on runtimes that concatenate unpackings with `BUILD_*_UNPACK`.
    fn starunpack_legacy(&mut self, elts: &[NodeId], display: Display) -> Result<()> {
        let ast = self.ast;
        let (single, inner, outer) = match display {
            Display::List => (Opcode::BuildList, Opcode::BuildTuple, Opcode::BuildListUnpack),
            Display::Tuple => (Opcode::BuildTuple, Opcode::BuildTuple, Opcode::BuildTupleUnpack),
            Display::Set => (Opcode::BuildSet, Opcode::BuildSet, Opcode::BuildSetUnpack),
        };
        let mut seen = 0u32;
        let mut subitems = 0u32;
        for elt in elts {
            match ast.kind(*elt) {
                NodeKind::Starred { value, .. } => {
                    if seen > 0 {
                        self.emit_arg(inner, seen);
                        seen = 0;
                        subitems += 1;
                    }
                    self.compile_expr(*value)?;
                    subitems += 1;
                }
                _ => {
                    self.compile_expr(*elt)?;
                    seen += 1;
                }
            }
        }
        if subitems > 0 {
            if seen > 0 {
                self.emit_arg(inner, seen);
                subitems += 1;
            }
            self.emit_arg(outer, subitems);
        } else {
            self.emit_arg(single, seen);
        }
        Ok(())
    }

    /// A dict built from a run of `key: value` entries.
    fn compile_subdict(&mut self, keys: &[Option<NodeId>], values: &[NodeId]) -> Result<()> {
        let constant_keys: Option<Vec<Const>> = keys
            .iter()
            .map(|key| key.and_then(|k| self.folded(k)))
            .collect();
        match constant_keys {
            Some(key_consts) if keys.len() > 1 => {
                for value in values {
                    self.compile_expr(*value)?;
                }
                self.emit_const(Const::Tuple(key_consts));
                self.emit_arg(Opcode::BuildConstKeyMap, keys.len() as u32);
            }
            _ => {
                for (key, value) in keys.iter().zip(values) {
                    if let Some(key) = key {
                        self.compile_expr(*key)?;
                    }
                    self.compile_expr(*value)?;
                }
                self.emit_arg(Opcode::BuildMap, keys.len() as u32);
            }
        }
        Ok(())
    }

    fn compile_dict(&mut self, keys: &[Option<NodeId>], values: &[NodeId]) -> Result<()> {
        let n = values.len();
        if !self.version.extends_constant_lists() {
            let mut containers = 0u32;
            let mut elements = 0usize;
            let mut is_unpacking = false;
            for i in 0..n {
                is_unpacking = keys[i].is_none();
                if elements > 0 && is_unpacking {
                    self.compile_subdict(&keys[i - elements..i], &values[i - elements..i])?;
                    containers += 1;
                    elements = 0;
                }
                if is_unpacking {
                    self.compile_expr(values[i])?;
                    containers += 1;
                } else {
                    elements += 1;
                }
            }
            if elements > 0 || containers == 0 {
                self.compile_subdict(&keys[n - elements..], &values[n - elements..])?;
                containers += 1;
            }
            if containers > 1 || is_unpacking {
                self.emit_arg(Opcode::BuildMapUnpack, containers);
            }
            return Ok(());
        }

        let mut have_dict = false;
        let mut elements = 0usize;
        for i in 0..n {
            if keys[i].is_none() {
                if elements > 0 {
                    self.compile_subdict(&keys[i - elements..i], &values[i - elements..i])?;
                    if have_dict {
                        self.emit_arg(Opcode::DictUpdate, 1);
                    }
                    have_dict = true;
                    elements = 0;
                }
                if !have_dict {
                    self.emit_arg(Opcode::BuildMap, 0);
                    have_dict = true;
                }
                self.compile_expr(values[i])?;
                self.emit_arg(Opcode::DictUpdate, 1);
            } else {
                elements += 1;
            }
        }
        if elements > 0 {
            self.compile_subdict(&keys[n - elements..], &values[n - elements..])?;
            if have_dict {
                self.emit_arg(Opcode::DictUpdate, 1);
            }
            have_dict = true;
        }
        if !have_dict {
            self.emit_arg(Opcode::BuildMap, 0);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Generators and coroutines
    // ------------------------------------------------------------------

    pub(super) fn emit_yield_value(&mut self) {
        self.emit(Opcode::YieldValue);
        if self.version.has_exception_tables() {
            self.emit_arg(Opcode::Resume, 1);
        }
    }

    /// Delegate to the awaitable on top of the stack.
    pub(super) fn emit_await_tail(&mut self) {
        self.emit_send_loop(3);
    }

    fn emit_send_loop(&mut self, resume: u32) {
        if !self.version.has_exception_tables() {
            self.emit(Opcode::YieldFrom);
            return;
        }
        let start = self.label_here();
        let exit = self.emit_jump(Opcode::Send);
        self.emit(Opcode::YieldValue);
        self.emit_arg(Opcode::Resume, resume);
        self.emit_jump_to(Opcode::JumpBackwardNoInterrupt, start);
        self.patch(exit);
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn compile_call(&mut self, func: NodeId, args: &[NodeId], keywords: &[Keyword]) -> Result<()> {
        let ast = self.ast;
        if let NodeKind::Attribute {
            value,
            attr,
            ctx: ExprContext::Load,
        } = ast.kind(func)
        {
            let has_star = args
                .iter()
                .any(|a| matches!(ast.kind(*a), NodeKind::Starred { .. }));
            let has_double_star = keywords.iter().any(|k| k.arg.is_none());
            let keywords_allowed = keywords.is_empty() || self.version.has_precall();
            if !has_star && !has_double_star && keywords_allowed {
                return self.compile_method_call(func, *value, attr, args, keywords);
            }
        }
        if self.version.has_precall() {
            self.emit(Opcode::PushNull);
        }
        self.compile_expr(func)?;
        self.compile_call_helper(0, args, keywords)
    }

    fn compile_method_call(
        &mut self,
        func: NodeId,
        object: NodeId,
        attr: &str,
        args: &[NodeId],
        keywords: &[Keyword],
    ) -> Result<()> {
        let previous = self.set_line(self.line_of(func));
        self.compile_expr(object)?;
        self.builder().emit_name(Opcode::LoadMethod, attr);
        if self.is_marked(func) {
            self.emit_marker();
        }
        self.set_line(previous);
        for arg in args {
            self.compile_expr(*arg)?;
        }
        let argc = (args.len() + keywords.len()) as u32;
        if self.version.has_precall() {
            for keyword in keywords {
                self.compile_expr(keyword.value)?;
            }
            if !keywords.is_empty() {
                self.emit_kw_names(keywords);
            }
            self.emit_arg(Opcode::Precall, argc);
            self.emit_arg(Opcode::Call, argc);
        } else {
            self.emit_arg(Opcode::CallMethod, argc);
        }
        Ok(())
    }

    fn keyword_names(keywords: &[Keyword]) -> Const {
        Const::Tuple(
            keywords
                .iter()
                .map(|k| Const::Str(k.arg.clone().unwrap_or_default()))
                .collect(),
        )
    }

    fn emit_kw_names(&mut self, keywords: &[Keyword]) {
        let index = self.builder().add_const(Self::keyword_names(keywords));
        self.emit_arg(Opcode::KwNames, index);
    }

    /// Arguments and the call itself, for a callable already on the stack
    /// with `pushed` positional arguments above it.
    pub(super) fn compile_call_helper(
        &mut self,
        pushed: u32,
        args: &[NodeId],
        keywords: &[Keyword],
    ) -> Result<()> {
        if !self.version.extends_constant_lists() {
            return self.compile_call_helper_legacy(pushed, args, keywords);
        }
        let ast = self.ast;
        let has_star = args
            .iter()
            .any(|a| matches!(ast.kind(*a), NodeKind::Starred { .. }));
        let has_double_star = keywords.iter().any(|k| k.arg.is_none());
        if !has_star && !has_double_star {
            for arg in args {
                self.compile_expr(*arg)?;
            }
            let argc = pushed + (args.len() + keywords.len()) as u32;
            for keyword in keywords {
                self.compile_expr(keyword.value)?;
            }
            if self.version.has_precall() {
                if !keywords.is_empty() {
                    self.emit_kw_names(keywords);
                }
                self.emit_arg(Opcode::Precall, argc);
                self.emit_arg(Opcode::Call, argc);
            } else if !keywords.is_empty() {
                self.emit_const(Self::keyword_names(keywords));
                self.emit_arg(Opcode::CallFunctionKw, argc);
            } else {
                self.emit_arg(Opcode::CallFunction, argc);
            }
            return Ok(());
        }

        match args {
            [only] if pushed == 0 => match ast.kind(*only) {
                NodeKind::Starred { value, .. } => self.compile_expr(*value)?,
                _ => self.starunpack(args, pushed, Display::Tuple)?,
            },
            _ => self.starunpack(args, pushed, Display::Tuple)?,
        }
        if !keywords.is_empty() {
            let mut have_dict = false;
            let mut seen = 0usize;
            for (i, keyword) in keywords.iter().enumerate() {
                if keyword.arg.is_some() {
                    seen += 1;
                    continue;
                }
                if seen > 0 {
                    self.compile_subkwargs(&keywords[i - seen..i])?;
                    if have_dict {
                        self.emit_arg(Opcode::DictMerge, 1);
                    }
                    have_dict = true;
                    seen = 0;
                }
                if !have_dict {
                    self.emit_arg(Opcode::BuildMap, 0);
                    have_dict = true;
                }
                self.compile_expr(keyword.value)?;
                self.emit_arg(Opcode::DictMerge, 1);
            }
            if seen > 0 {
                self.compile_subkwargs(&keywords[keywords.len() - seen..])?;
                if have_dict {
                    self.emit_arg(Opcode::DictMerge, 1);
                }
            }
        }
        self.emit_arg(Opcode::CallFunctionEx, u32::from(!keywords.is_empty()));
        Ok(())
    }

    /// A dict of plain keyword arguments.
    fn compile_subkwargs(&mut self, keywords: &[Keyword]) -> Result<()> {
        if keywords.len() > 1 {
            for keyword in keywords {
                self.compile_expr(keyword.value)?;
            }
            self.emit_const(Self::keyword_names(keywords));
            self.emit_arg(Opcode::BuildConstKeyMap, keywords.len() as u32);
        } else {
            for keyword in keywords {
                self.emit_const(Const::Str(keyword.arg.clone().unwrap_or_default()));
                self.compile_expr(keyword.value)?;
            }
            self.emit_arg(Opcode::BuildMap, keywords.len() as u32);
        }
        Ok(())
    }

    fn compile_call_helper_legacy(
        &mut self,
        pushed: u32,
        args: &[NodeId],
        keywords: &[Keyword],
    ) -> Result<()> {
        let ast = self.ast;
        let must_unpack_dict = keywords.iter().any(|k| k.arg.is_none());
        let mut seen = pushed;
        let mut subargs = 0u32;
        for arg in args {
            match ast.kind(*arg) {
                NodeKind::Starred { value, .. } => {
                    if seen > 0 {
                        self.emit_arg(Opcode::BuildTuple, seen);
                        seen = 0;
                        subargs += 1;
                    }
                    self.compile_expr(*value)?;
                    subargs += 1;
                }
                _ => {
                    self.compile_expr(*arg)?;
                    seen += 1;
                }
            }
        }

        if subargs == 0 && !must_unpack_dict {
            if keywords.is_empty() {
                self.emit_arg(Opcode::CallFunction, seen);
            } else {
                for keyword in keywords {
                    self.compile_expr(keyword.value)?;
                }
                self.emit_const(Self::keyword_names(keywords));
                self.emit_arg(Opcode::CallFunctionKw, seen + keywords.len() as u32);
            }
            return Ok(());
        }

        if seen > 0 {
            self.emit_arg(Opcode::BuildTuple, seen);
            subargs += 1;
        }
        if subargs > 1 {
            self.emit_arg(Opcode::BuildTupleUnpackWithCall, subargs);
        } else if subargs == 0 {
            self.emit_arg(Opcode::BuildTuple, 0);
        }
        let mut subkwargs = 0u32;
        let mut seen = 0usize;
        for (i, keyword) in keywords.iter().enumerate() {
            if keyword.arg.is_some() {
                seen += 1;
                continue;
            }
            if seen > 0 {
                self.compile_subkwargs(&keywords[i - seen..i])?;
                subkwargs += 1;
                seen = 0;
            }
            self.compile_expr(keyword.value)?;
            subkwargs += 1;
        }
        if seen > 0 {
            self.compile_subkwargs(&keywords[keywords.len() - seen..])?;
            subkwargs += 1;
        }
        if subkwargs > 1 {
            self.emit_arg(Opcode::BuildMapUnpackWithCall, subkwargs);
        }
        self.emit_arg(Opcode::CallFunctionEx, u32::from(subkwargs > 0));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::Compiler;
    use crate::code::{CodeObject, Const};
    use crate::version::RuntimeVersion;
    use std::sync::Arc;
    use whence_python::parse_module;

    fn compile(source: &str, version: RuntimeVersion) -> Arc<CodeObject> {
        let ast = parse_module(source).unwrap();
        Compiler::new(version).compile_module(&ast, "test.py").unwrap()
    }

    fn ops(source: &str, version: RuntimeVersion) -> Vec<&'static str> {
        compile(source, version)
            .instructions
            .iter()
            .map(|i| i.opname())
            .collect()
    }

    #[test]
    fn method_calls() {
        assert_eq!(
            ops("a.b(1)\n", RuntimeVersion::V3_8),
            ["LOAD_NAME", "LOAD_METHOD", "LOAD_CONST", "CALL_METHOD", "POP_TOP", "LOAD_CONST", "RETURN_VALUE"]
        );
        assert_eq!(
            ops("a.b(x=1)\n", RuntimeVersion::V3_10)[..4],
            ["LOAD_NAME", "LOAD_ATTR", "LOAD_CONST", "LOAD_CONST"]
        );
        assert_eq!(
            ops("a.b(x=1)\n", RuntimeVersion::V3_11)[..6],
            ["RESUME", "LOAD_NAME", "LOAD_METHOD", "LOAD_CONST", "KW_NAMES", "PRECALL"]
        );
    }

    #[test]
    fn star_calls_per_version() {
        assert_eq!(
            ops("f(*a)\n", RuntimeVersion::V3_8)[..3],
            ["LOAD_NAME", "LOAD_NAME", "CALL_FUNCTION_EX"]
        );
        assert_eq!(
            ops("f(1, *a)\n", RuntimeVersion::V3_8)[..6],
            ["LOAD_NAME", "LOAD_CONST", "BUILD_TUPLE", "LOAD_NAME", "BUILD_TUPLE_UNPACK_WITH_CALL", "CALL_FUNCTION_EX"]
        );
        assert_eq!(
            ops("f(1, *a)\n", RuntimeVersion::V3_9)[..6],
            ["LOAD_NAME", "LOAD_CONST", "BUILD_LIST", "LOAD_NAME", "LIST_EXTEND", "LIST_TO_TUPLE"]
        );
        assert_eq!(
            ops("f(**k)\n", RuntimeVersion::V3_9)[..6],
            ["LOAD_NAME", "BUILD_TUPLE", "BUILD_MAP", "LOAD_NAME", "DICT_MERGE", "CALL_FUNCTION_EX"]
        );
    }

    #[test]
    fn keyword_calls() {
        let code = compile("f(1, x=2)\n", RuntimeVersion::V3_8);
        let names: Vec<_> = code.instructions.iter().map(|i| i.opname()).collect();
        assert_eq!(
            names[..5],
            ["LOAD_NAME", "LOAD_CONST", "LOAD_CONST", "LOAD_CONST", "CALL_FUNCTION_KW"]
        );
        assert!(code.consts.contains(&Const::Tuple(vec![Const::Str("x".into())])));
    }

    #[test]
    fn not_in_is_fused() {
        assert_eq!(
            ops("not a in b\n", RuntimeVersion::V3_8)[..3],
            ["LOAD_NAME", "LOAD_NAME", "COMPARE_OP"]
        );
        assert_eq!(
            ops("not a in b\n", RuntimeVersion::V3_9)[..3],
            ["LOAD_NAME", "LOAD_NAME", "CONTAINS_OP"]
        );
        let code = compile("not a is b\n", RuntimeVersion::V3_9);
        assert_eq!(code.instructions[2].arg, Some(1));
    }

    #[test]
    fn chained_comparison() {
        assert_eq!(
            ops("a < b < c\n", RuntimeVersion::V3_8)[..11],
            [
                "LOAD_NAME",
                "LOAD_NAME",
                "DUP_TOP",
                "ROT_THREE",
                "COMPARE_OP",
                "JUMP_IF_FALSE_OR_POP",
                "LOAD_NAME",
                "COMPARE_OP",
                "JUMP_FORWARD",
                "ROT_TWO",
                "POP_TOP"
            ]
        );
    }

    #[test]
    fn displays() {
        assert_eq!(
            ops("[1, 2, 3]\n", RuntimeVersion::V3_9)[..3],
            ["BUILD_LIST", "LOAD_CONST", "LIST_EXTEND"]
        );
        assert_eq!(
            ops("[1, 2, 3]\n", RuntimeVersion::V3_8)[..4],
            ["LOAD_CONST", "LOAD_CONST", "LOAD_CONST", "BUILD_LIST"]
        );
        assert_eq!(
            ops("[*a, 1]\n", RuntimeVersion::V3_8)[..4],
            ["LOAD_NAME", "LOAD_CONST", "BUILD_TUPLE", "BUILD_LIST_UNPACK"]
        );
        assert_eq!(
            ops("{'a': 1, 'b': 2}\n", RuntimeVersion::V3_8)[..4],
            ["LOAD_CONST", "LOAD_CONST", "LOAD_CONST", "BUILD_CONST_KEY_MAP"]
        );
        assert_eq!(
            ops("{**a}\n", RuntimeVersion::V3_9)[..3],
            ["BUILD_MAP", "LOAD_NAME", "DICT_UPDATE"]
        );
    }

    #[test]
    fn constant_iterables_become_tuples() {
        let code = compile("for x in [1, 2]:\n    pass\n", RuntimeVersion::V3_8);
        assert_eq!(code.instructions[0].opname(), "LOAD_CONST");
        assert!(code
            .consts
            .contains(&Const::Tuple(vec![Const::Int(1), Const::Int(2)])));
    }

    #[test]
    fn folded_expressions_load_one_constant() {
        let code = compile("x = (2 ** 8, 'a' * 2)\n", RuntimeVersion::V3_8);
        assert_eq!(code.instructions[0].opname(), "LOAD_CONST");
        assert_eq!(code.instructions[1].opname(), "STORE_NAME");
    }

    #[test]
    fn binary_op_on_unified_runtimes() {
        let code = compile("a - b\n", RuntimeVersion::V3_11);
        let binary = code
            .instructions
            .iter()
            .find(|i| i.opname() == "BINARY_OP")
            .unwrap();
        assert_eq!(binary.arg, Some(10));
    }

    #[test]
    fn formatted_strings() {
        assert_eq!(
            ops("f'{a!r:>4} x'\n", RuntimeVersion::V3_8)[..5],
            ["LOAD_NAME", "LOAD_CONST", "FORMAT_VALUE", "LOAD_CONST", "BUILD_STRING"]
        );
    }

    #[test]
    fn await_sends_on_newer_runtimes() {
        let code = compile("async def f():\n    await g()\n", RuntimeVersion::V3_11);
        let f = code.nested_codes().next().unwrap();
        let names: Vec<_> = f.instructions.iter().map(|i| i.opname()).collect();
        assert!(names.contains(&"SEND"));
        assert!(names.contains(&"JUMP_BACKWARD_NO_INTERRUPT"));
        let code = compile("async def f():\n    await g()\n", RuntimeVersion::V3_8);
        let f = code.nested_codes().next().unwrap();
        assert!(f.instructions.iter().any(|i| i.opname() == "YIELD_FROM"));
    }
}
