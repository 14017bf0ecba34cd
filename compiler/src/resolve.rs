// resolve.rs — Lower the syntax tree into arena regions
//
// Walks each parsed `func`, binds value names to arena values, checks types
// and operand kinds, and builds one `Region` per function.
//
// Preconditions: `program` is a well-formed AST from the parser.
// Postconditions: returns a `Module` with one region per function plus all
//                 accumulated diagnostics. Statements with errors are dropped.
// Failure modes: undefined or duplicate names, arity mismatches, unknown
//                types and non-memref memory operands produce `Diagnostic`
//                entries. Resolution continues past errors.
// Side effects: none.

use std::collections::{HashMap, HashSet};

use crate::ast::*;
use crate::diag::{codes, Diagnostic};
use crate::ir::{Attr, AttrAccess, Module, NodeKind, Region, Shape, Type, DATAFLOW_ATTR, LEVEL_ATTR};
use crate::id::{NodeId, ValueId};
use crate::lexer::ShapedLit;

// ── Public types ────────────────────────────────────────────────────────────

/// Result of resolution.
#[derive(Debug)]
pub struct ResolveResult {
    pub module: Module,
    pub diagnostics: Vec<Diagnostic>,
}

/// Lower every function of `program` into a region.
pub fn resolve(program: &Program) -> ResolveResult {
    let mut diagnostics = Vec::new();
    let mut module = Module::default();
    let mut seen: HashMap<String, Span> = HashMap::new();

    for item in &program.items {
        let Item::Func(func) = item else { continue };
        if let Some(prev) = seen.get(&func.name.name) {
            diagnostics.push(
                Diagnostic::error(
                    codes::E0101,
                    func.name.span,
                    format!("redefinition of function @{}", func.name.name),
                )
                .with_related(*prev, "first defined here"),
            );
            continue;
        }
        seen.insert(func.name.name.clone(), func.name.span);

        let mut ctx = FuncCtx::new(func);
        ctx.lower_func(func);
        diagnostics.extend(ctx.diagnostics);
        module.regions.push(ctx.region);
    }

    ResolveResult {
        module,
        diagnostics,
    }
}

/// Scalar element types: `iN`, `uiN`, `siN`, `fN`, `bf16`, `index`.
pub fn is_scalar_type(name: &str) -> bool {
    if name == "index" || name == "bf16" {
        return true;
    }
    let digits = name
        .strip_prefix("ui")
        .or_else(|| name.strip_prefix("si"))
        .or_else(|| name.strip_prefix('i'))
        .or_else(|| name.strip_prefix('f'));
    matches!(digits, Some(d) if !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit()))
}

// ── Per-function context ────────────────────────────────────────────────────

/// A bound name: a live value, or `None` when its defining statement failed
/// (uses are then silently skipped instead of cascading errors).
type Binding = Option<ValueId>;

struct FuncCtx {
    region: Region,
    scopes: Vec<HashMap<String, Binding>>,
    defined: HashSet<String>,
    def_spans: HashMap<String, Span>,
    diagnostics: Vec<Diagnostic>,
}

impl FuncCtx {
    fn new(func: &FuncDef) -> Self {
        FuncCtx {
            region: Region::new(func.name.name.clone(), func.span),
            scopes: vec![HashMap::new()],
            defined: HashSet::new(),
            def_spans: HashMap::new(),
            diagnostics: Vec::new(),
        }
    }

    fn error(&mut self, code: crate::diag::DiagCode, span: Span, msg: impl Into<String>) {
        self.diagnostics.push(Diagnostic::error(code, span, msg));
    }

    fn lower_func(&mut self, func: &FuncDef) {
        for arg in &func.args {
            let ty = self.lower_type(&arg.ty);
            if !self.declare_check(&arg.value) {
                continue;
            }
            let binding = ty.map(|ty| self.region.add_arg(arg.value.name.clone(), ty));
            self.bind(&arg.value, binding);
        }

        for entry in &func.attrs {
            match (entry.key.name.as_str(), &entry.value) {
                (DATAFLOW_ATTR, AttrValue::Bool(flag)) => self.region.dataflow = *flag,
                (DATAFLOW_ATTR, _) => self.error(
                    codes::E0106,
                    entry.span,
                    "attribute 'dataflow' expects a boolean",
                ),
                (key, value) => self.region.set_attr(key, lower_attr(value)),
            }
        }

        self.lower_block(&func.body, None);
    }

    fn lower_block(&mut self, stmts: &[Stmt], parent: Option<NodeId>) {
        for stmt in stmts {
            if let Some(node) = self.lower_stmt(stmt) {
                self.region.append(parent, node);
            }
        }
    }

    // ── Names ───────────────────────────────────────────────────────────

    /// Check a definition site. Names are unique across the whole function.
    fn declare_check(&mut self, name: &ValueRef) -> bool {
        if let Some(prev) = self.def_spans.get(&name.name) {
            self.diagnostics.push(
                Diagnostic::error(
                    codes::E0101,
                    name.span,
                    format!("redefinition of value %{}", name.name),
                )
                .with_related(*prev, "previous definition here"),
            );
            return false;
        }
        true
    }

    fn bind(&mut self, name: &ValueRef, binding: Binding) {
        self.defined.insert(name.name.clone());
        self.def_spans.insert(name.name.clone(), name.span);
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.name.clone(), binding);
        }
    }

    /// Look up a use. `Err(())` means the use is invalid and already reported
    /// or poisoned; the caller drops the statement.
    fn lookup(&mut self, name: &ValueRef) -> Result<ValueId, ()> {
        for scope in self.scopes.iter().rev() {
            if let Some(binding) = scope.get(&name.name) {
                return binding.ok_or(());
            }
        }
        let mut diag = Diagnostic::error(
            codes::E0100,
            name.span,
            format!("use of undefined value %{}", name.name),
        );
        if self.defined.contains(&name.name) {
            diag = diag.with_hint("the value is defined in a loop body that is not visible here");
        }
        self.diagnostics.push(diag);
        Err(())
    }

    fn lookup_all(&mut self, names: &[ValueRef]) -> Option<Vec<ValueId>> {
        let mut ok = true;
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            match self.lookup(name) {
                Ok(v) => out.push(v),
                Err(()) => ok = false,
            }
        }
        ok.then_some(out)
    }

    fn require_memref(&mut self, value: ValueId, at: &ValueRef, what: &str) -> bool {
        let ty = &self.region.value(value).ty;
        if ty.is_memref() {
            return true;
        }
        let msg = format!("{what} operand %{} has type {ty}, expected a memref", at.name);
        self.error(codes::E0104, at.span, msg);
        false
    }

    // ── Types ───────────────────────────────────────────────────────────

    fn lower_type(&mut self, ty: &TypeExpr) -> Option<Type> {
        match ty {
            TypeExpr::Named(id) => {
                if is_scalar_type(&id.name) {
                    Some(Type::Scalar(id.name.clone()))
                } else {
                    self.error(codes::E0103, id.span, format!("unknown type '{}'", id.name));
                    None
                }
            }
            TypeExpr::Shaped { lit, span } => self.lower_shaped(lit, *span),
        }
    }

    fn lower_shaped(&mut self, lit: &ShapedLit, span: Span) -> Option<Type> {
        if !is_scalar_type(&lit.elem) {
            self.error(
                codes::E0103,
                span,
                format!("unknown element type '{}'", lit.elem),
            );
            return None;
        }
        let shape = Shape {
            dims: lit.dims.clone(),
            elem: lit.elem.clone(),
        };
        Some(if lit.memref {
            Type::MemRef(shape)
        } else {
            Type::Tensor(shape)
        })
    }

    // ── Statements ──────────────────────────────────────────────────────

    fn expect_results(&mut self, stmt: &Stmt, expected: usize, what: &str) -> bool {
        if stmt.results.len() == expected {
            return true;
        }
        self.error(
            codes::E0102,
            stmt.span,
            format!(
                "{what} produces {expected} result(s), but {} name(s) were given",
                stmt.results.len()
            ),
        );
        false
    }

    /// Lower one statement into a detached node. On failure its result names
    /// are bound as poisoned.
    fn lower_stmt(&mut self, stmt: &Stmt) -> Option<NodeId> {
        let fresh = stmt.results.iter().all(|r| self.declare_check(r));
        let node = if fresh { self.lower_op(stmt) } else { None };
        if node.is_none() {
            for r in &stmt.results {
                if !self.def_spans.contains_key(&r.name) {
                    self.bind(r, None);
                }
            }
            return None;
        }
        let node = node?;
        self.apply_node_attrs(node, &stmt.attrs);
        Some(node)
    }

    fn lower_op(&mut self, stmt: &Stmt) -> Option<NodeId> {
        match &stmt.op {
            OpExpr::Alloc { stack, ty } => {
                let ty = self.lower_type(ty)?;
                if !ty.is_memref() {
                    self.error(
                        codes::E0103,
                        stmt.span,
                        format!("allocation must produce a memref, found {ty}"),
                    );
                    return None;
                }
                self.expect_results(stmt, 1, "allocation").then_some(())?;
                Some(self.finish(stmt, NodeKind::Alloc { stack: *stack }, vec![], vec![ty]))
            }
            OpExpr::Constant { value, ty } => {
                let ty = self.lower_type(ty)?;
                self.expect_results(stmt, 1, "constant").then_some(())?;
                Some(self.finish(stmt, NodeKind::Constant(*value), vec![], vec![ty]))
            }
            OpExpr::Convert {
                conversion,
                operand,
                ty,
            } => {
                let ty = self.lower_type(ty);
                let operand = self.lookup(operand).ok();
                let (ty, operand) = (ty?, operand?);
                self.expect_results(stmt, 1, "layout conversion").then_some(())?;
                Some(self.finish(stmt, NodeKind::Convert(*conversion), vec![operand], vec![ty]))
            }
            OpExpr::Return { operands } => {
                let operands = self.lookup_all(operands)?;
                self.expect_results(stmt, 0, "return").then_some(())?;
                Some(self.finish(stmt, NodeKind::Return, operands, vec![]))
            }
            OpExpr::Compute {
                name,
                operands,
                types,
            } => {
                let operands = self.lookup_all(operands);
                let types: Vec<Option<Type>> = types.iter().map(|t| self.lower_type(t)).collect();
                let operands = operands?;
                let types: Vec<Type> = types.into_iter().collect::<Option<_>>()?;
                self.expect_results(stmt, types.len(), &format!("op \"{name}\""))
                    .then_some(())?;
                let kind = NodeKind::Compute { name: name.clone() };
                Some(self.finish(stmt, kind, operands, types))
            }
            OpExpr::Load { memref, ty } => {
                let ty = self.lower_type(ty);
                let mem = self.lookup(memref).ok();
                let (ty, mem) = (ty?, mem?);
                self.require_memref(mem, memref, "load").then_some(())?;
                self.expect_results(stmt, 1, "load").then_some(())?;
                Some(self.finish(stmt, NodeKind::Load, vec![mem], vec![ty]))
            }
            OpExpr::Store { value, memref } => {
                let v = self.lookup(value).ok();
                let mem = self.lookup(memref).ok();
                let (v, mem) = (v?, mem?);
                self.require_memref(mem, memref, "store").then_some(())?;
                self.expect_results(stmt, 0, "store").then_some(())?;
                Some(self.finish(stmt, NodeKind::Store, vec![v, mem], vec![]))
            }
            OpExpr::Copy { operands, ty } => self.lower_copy(stmt, operands, ty.as_ref()),
            OpExpr::Loop {
                iv,
                lower,
                upper,
                body,
            } => {
                self.expect_results(stmt, 0, "loop").then_some(())?;
                self.declare_check(iv).then_some(())?;
                let node = self
                    .region
                    .create_loop(Some(iv.name.clone()), *lower, *upper, stmt.span);
                let iv_value = match &self.region.node(node).kind {
                    NodeKind::Loop { iv, .. } => *iv,
                    _ => return None,
                };
                self.scopes.push(HashMap::new());
                self.bind(iv, Some(iv_value));
                self.lower_block(body, Some(node));
                self.scopes.pop();
                Some(node)
            }
        }
    }

    fn lower_copy(&mut self, stmt: &Stmt, operands: &[ValueRef], ty: Option<&TypeExpr>) -> Option<NodeId> {
        let values = self.lookup_all(operands)?;
        match values.as_slice() {
            // Array copy: `copy %src, %dst`.
            [src, dst] => {
                let src_ok = self.require_memref(*src, &operands[0], "copy source");
                let dst_ok = self.require_memref(*dst, &operands[1], "copy target");
                (src_ok && dst_ok).then_some(())?;
                self.expect_results(stmt, 0, "array copy").then_some(())?;
                Some(self.finish(stmt, NodeKind::Copy, values, vec![]))
            }
            // Value copy: `%r = copy %src [: T]`.
            [src] => {
                let ty = match ty {
                    Some(t) => self.lower_type(t)?,
                    None => self.region.value(*src).ty.clone(),
                };
                self.expect_results(stmt, 1, "value copy").then_some(())?;
                Some(self.finish(stmt, NodeKind::Copy, values, vec![ty]))
            }
            _ => None,
        }
    }

    /// Create the node and bind its results in the current scope.
    fn finish(&mut self, stmt: &Stmt, kind: NodeKind, operands: Vec<ValueId>, types: Vec<Type>) -> NodeId {
        let results = stmt
            .results
            .iter()
            .zip(types)
            .map(|(r, ty)| (Some(r.name.clone()), ty))
            .collect();
        let node = self.region.create_node(kind, operands, results, stmt.span);
        let result_ids = self.region.node(node).results.clone();
        for (name, id) in stmt.results.iter().zip(result_ids) {
            self.bind(name, Some(id));
        }
        node
    }

    fn apply_node_attrs(&mut self, node: NodeId, attrs: &[AttrEntry]) {
        for entry in attrs {
            match (entry.key.name.as_str(), &entry.value) {
                (LEVEL_ATTR, AttrValue::Int(level)) if *level >= 0 && *level <= u32::MAX as i64 => {
                    self.region.node_mut(node).level = Some(*level as u32);
                }
                (LEVEL_ATTR, _) => self.error(
                    codes::E0106,
                    entry.span,
                    "attribute 'dataflow_level' expects a non-negative integer",
                ),
                (key, value) => self.region.node_mut(node).set_attr(key, lower_attr(value)),
            }
        }
    }
}

fn lower_attr(value: &AttrValue) -> Attr {
    match value {
        AttrValue::Int(v) => Attr::Int(*v),
        AttrValue::Bool(b) => Attr::Bool(*b),
        AttrValue::Str(s) => Attr::Str(s.clone()),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
