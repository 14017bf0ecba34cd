// ir.rs — Arena IR for dataflow regions
//
// A `Region` is a function body: an ordered list of top-level nodes, some of
// which are loops with nested bodies. Nodes and values live in arenas owned by
// the region and are addressed by `NodeId` / `ValueId`.
//
// Preconditions: nodes are created through `Region` so IDs stay consistent.
// Postconditions: `Display` output is accepted by `parser::parse`.
// Failure modes: structural misuse (e.g. moving across blocks) returns `false`/`None`.
// Side effects: none.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use sha2::{Digest, Sha256};

use crate::ast::Span;
use crate::id::{IdAllocator, NodeId, ValueId};

/// Attribute key holding the scheduled dataflow level of a node.
pub const LEVEL_ATTR: &str = "dataflow_level";
/// Region attribute marking a successfully legalized region.
pub const DATAFLOW_ATTR: &str = "dataflow";

// ── Types ───────────────────────────────────────────────────────────────────

/// Shape of a memref or tensor. `None` marks a dynamic (`?`) dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    pub dims: Vec<Option<u64>>,
    pub elem: String,
}

impl Shape {
    pub fn is_static(&self) -> bool {
        self.dims.iter().all(|d| d.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Scalar(String),
    MemRef(Shape),
    Tensor(Shape),
}

impl Type {
    /// Array/buffer-typed values are the only ones that create scheduling edges.
    pub fn is_shaped(&self) -> bool {
        matches!(self, Type::MemRef(_) | Type::Tensor(_))
    }

    pub fn is_memref(&self) -> bool {
        matches!(self, Type::MemRef(_))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for dim in &self.dims {
            match dim {
                Some(n) => write!(f, "{n}x")?,
                None => write!(f, "?x")?,
            }
        }
        write!(f, "{}", self.elem)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Scalar(name) => write!(f, "{name}"),
            Type::MemRef(shape) => write!(f, "memref<{shape}>"),
            Type::Tensor(shape) => write!(f, "tensor<{shape}>"),
        }
    }
}

// ── Attributes ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Attr {
    Int(i64),
    Bool(bool),
    Str(String),
}

impl fmt::Display for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attr::Int(v) => write!(f, "{v}"),
            Attr::Bool(v) => write!(f, "{v}"),
            Attr::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// Typed accessors over a node or region attribute dictionary.
pub trait AttrAccess {
    fn attrs(&self) -> &BTreeMap<String, Attr>;
    fn attrs_mut(&mut self) -> &mut BTreeMap<String, Attr>;

    fn int_attr(&self, name: &str) -> Option<i64> {
        match self.attrs().get(name) {
            Some(Attr::Int(v)) => Some(*v),
            _ => None,
        }
    }

    fn bool_attr(&self, name: &str) -> Option<bool> {
        match self.attrs().get(name) {
            Some(Attr::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    fn str_attr(&self, name: &str) -> Option<&str> {
        match self.attrs().get(name) {
            Some(Attr::Str(s)) => Some(s),
            _ => None,
        }
    }

    fn set_attr(&mut self, name: &str, value: Attr) {
        self.attrs_mut().insert(name.to_string(), value);
    }
}

// ── Nodes ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    ToTensor,
    ToMemref,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// `alloc` (heap) or `alloca` (stack) buffer allocation.
    Alloc { stack: bool },
    Constant(i64),
    /// Layout conversion between tensor and memref views.
    Convert(Conversion),
    Return,
    /// Generic dataflow computation.
    Compute { name: String },
    /// Operands: `[memref]`, one result.
    Load,
    /// Operands: `[value, memref]`.
    Store,
    /// Array copy (`[src, dst]`, no result) or value copy (`[src]`, one result).
    Copy,
    Loop {
        iv: ValueId,
        lower: i64,
        upper: i64,
        body: Vec<NodeId>,
    },
}

impl NodeKind {
    /// Allocation, constant, return and layout-conversion nodes are never scheduled.
    pub fn is_dataflow(&self) -> bool {
        !matches!(
            self,
            NodeKind::Alloc { .. } | NodeKind::Constant(_) | NodeKind::Convert(_) | NodeKind::Return
        )
    }

    pub fn is_loop(&self) -> bool {
        matches!(self, NodeKind::Loop { .. })
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            NodeKind::Alloc { stack: false } => "alloc",
            NodeKind::Alloc { stack: true } => "alloca",
            NodeKind::Constant(_) => "constant",
            NodeKind::Convert(Conversion::ToTensor) => "to_tensor",
            NodeKind::Convert(Conversion::ToMemref) => "to_memref",
            NodeKind::Return => "return",
            NodeKind::Compute { .. } => "op",
            NodeKind::Load => "load",
            NodeKind::Store => "store",
            NodeKind::Copy => "copy",
            NodeKind::Loop { .. } => "for",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub operands: Vec<ValueId>,
    pub results: Vec<ValueId>,
    /// Enclosing loop, `None` for top-level nodes.
    pub parent: Option<NodeId>,
    /// Scheduled pipeline stage (`dataflow_level`).
    pub level: Option<u32>,
    pub attrs: BTreeMap<String, Attr>,
    pub span: Span,
}

impl AttrAccess for Node {
    fn attrs(&self) -> &BTreeMap<String, Attr> {
        &self.attrs
    }

    fn attrs_mut(&mut self) -> &mut BTreeMap<String, Attr> {
        &mut self.attrs
    }
}

// ── Values ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDef {
    Arg(usize),
    Result { node: NodeId, index: usize },
    InductionVar(NodeId),
}

#[derive(Debug, Clone)]
pub struct ValueData {
    pub id: ValueId,
    pub name: String,
    pub ty: Type,
    pub def: ValueDef,
}

impl ValueData {
    pub fn defining_node(&self) -> Option<NodeId> {
        match self.def {
            ValueDef::Arg(_) => None,
            ValueDef::Result { node, .. } | ValueDef::InductionVar(node) => Some(node),
        }
    }
}

// ── Region ──────────────────────────────────────────────────────────────────

/// A function body: arguments plus an ordered top-level node list.
#[derive(Debug, Clone)]
pub struct Region {
    pub name: String,
    pub args: Vec<ValueId>,
    pub body: Vec<NodeId>,
    /// Set once dataflow legalization succeeded.
    pub dataflow: bool,
    pub attrs: BTreeMap<String, Attr>,
    pub span: Span,
    nodes: Vec<Node>,
    values: Vec<ValueData>,
    ids: IdAllocator,
    names: HashSet<String>,
}

impl AttrAccess for Region {
    fn attrs(&self) -> &BTreeMap<String, Attr> {
        &self.attrs
    }

    fn attrs_mut(&mut self) -> &mut BTreeMap<String, Attr> {
        &mut self.attrs
    }
}

/// A parsed source file: independent regions in source order.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub regions: Vec<Region>,
}

impl Region {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Region {
            name: name.into(),
            args: Vec::new(),
            body: Vec::new(),
            dataflow: false,
            attrs: BTreeMap::new(),
            span,
            nodes: Vec::new(),
            values: Vec::new(),
            ids: IdAllocator::new(),
            names: HashSet::new(),
        }
    }

    // ── Arena access ────────────────────────────────────────────────────

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.index()]
    }

    /// Every node in the arena, attached or not, in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Return an unused value name of the form `{prefix}{n}`.
    pub fn fresh_name(&self, prefix: &str) -> String {
        let mut n = 0usize;
        loop {
            let candidate = format!("{prefix}{n}");
            if !self.names.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn new_value(&mut self, name: Option<String>, ty: Type, def: ValueDef) -> ValueId {
        let id = self.ids.alloc_value();
        let name = name.unwrap_or_else(|| self.fresh_name("v"));
        self.names.insert(name.clone());
        self.values.push(ValueData { id, name, ty, def });
        id
    }

    // ── Construction ────────────────────────────────────────────────────

    pub fn add_arg(&mut self, name: impl Into<String>, ty: Type) -> ValueId {
        let index = self.args.len();
        let id = self.new_value(Some(name.into()), ty, ValueDef::Arg(index));
        self.args.push(id);
        id
    }

    /// Create a detached node. Results are `(name, type)` pairs; a `None`
    /// name is replaced by a fresh one. Attach with `append` or `insert_before`.
    pub fn create_node(
        &mut self,
        kind: NodeKind,
        operands: Vec<ValueId>,
        results: Vec<(Option<String>, Type)>,
        span: Span,
    ) -> NodeId {
        let id = self.ids.alloc_node();
        let mut result_ids = Vec::with_capacity(results.len());
        for (index, (name, ty)) in results.into_iter().enumerate() {
            result_ids.push(self.new_value(name, ty, ValueDef::Result { node: id, index }));
        }
        self.nodes.push(Node {
            id,
            kind,
            operands,
            results: result_ids,
            parent: None,
            level: None,
            attrs: BTreeMap::new(),
            span,
        });
        id
    }

    /// Create a detached loop with an empty body and its induction variable.
    pub fn create_loop(&mut self, iv_name: Option<String>, lower: i64, upper: i64, span: Span) -> NodeId {
        let id = self.ids.alloc_node();
        let iv = self.new_value(iv_name, Type::Scalar("index".to_string()), ValueDef::InductionVar(id));
        self.nodes.push(Node {
            id,
            kind: NodeKind::Loop {
                iv,
                lower,
                upper,
                body: Vec::new(),
            },
            operands: Vec::new(),
            results: Vec::new(),
            parent: None,
            level: None,
            attrs: BTreeMap::new(),
            span,
        });
        id
    }

    // ── Blocks ──────────────────────────────────────────────────────────

    /// The node list of a block: the region body for `None`, a loop body otherwise.
    pub fn block(&self, parent: Option<NodeId>) -> &[NodeId] {
        match parent {
            None => &self.body,
            Some(p) => match &self.node(p).kind {
                NodeKind::Loop { body, .. } => body,
                _ => &[],
            },
        }
    }

    fn block_mut(&mut self, parent: Option<NodeId>) -> Option<&mut Vec<NodeId>> {
        match parent {
            None => Some(&mut self.body),
            Some(p) => match &mut self.node_mut(p).kind {
                NodeKind::Loop { body, .. } => Some(body),
                _ => None,
            },
        }
    }

    /// Append a detached node to the end of a block.
    pub fn append(&mut self, parent: Option<NodeId>, node: NodeId) -> bool {
        match self.block_mut(parent) {
            Some(block) => block.push(node),
            None => return false,
        }
        self.node_mut(node).parent = parent;
        true
    }

    /// Insert a detached node at `index` of a block.
    pub fn insert_at(&mut self, parent: Option<NodeId>, index: usize, node: NodeId) -> bool {
        match self.block_mut(parent) {
            Some(block) if index <= block.len() => block.insert(index, node),
            _ => return false,
        }
        self.node_mut(node).parent = parent;
        true
    }

    /// Insert a detached node immediately before `anchor`, in the anchor's block.
    pub fn insert_before(&mut self, anchor: NodeId, node: NodeId) -> bool {
        let parent = self.node(anchor).parent;
        match self.block(parent).iter().position(|&n| n == anchor) {
            Some(index) => self.insert_at(parent, index, node),
            None => false,
        }
    }

    /// Move an attached node to immediately before `anchor`. Both must share a block.
    pub fn move_before(&mut self, node: NodeId, anchor: NodeId) -> bool {
        if node == anchor {
            return true;
        }
        let parent = self.node(node).parent;
        if self.node(anchor).parent != parent {
            return false;
        }
        let Some(block) = self.block_mut(parent) else {
            return false;
        };
        let Some(from) = block.iter().position(|&n| n == node) else {
            return false;
        };
        block.remove(from);
        match block.iter().position(|&n| n == anchor) {
            Some(to) => {
                block.insert(to, node);
                true
            }
            None => {
                block.insert(from, node);
                false
            }
        }
    }

    /// Position of a top-level node in program order.
    pub fn position(&self, node: NodeId) -> Option<usize> {
        self.body.iter().position(|&n| n == node)
    }

    // ── Structure queries ───────────────────────────────────────────────

    pub fn top_level_ancestor(&self, node: NodeId) -> NodeId {
        let mut cur = node;
        while let Some(p) = self.node(cur).parent {
            cur = p;
        }
        cur
    }

    /// Pre-order walk of `root` and everything nested inside it.
    pub fn walk(&self, root: NodeId, f: &mut impl FnMut(&Node)) {
        let node = self.node(root);
        f(node);
        if let NodeKind::Loop { body, .. } = &node.kind {
            for &child in body {
                self.walk(child, f);
            }
        }
    }

    /// Top-level nodes eligible for dataflow scheduling, in program order.
    pub fn dataflow_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.body
            .iter()
            .copied()
            .filter(|&n| self.node(n).kind.is_dataflow())
    }

    // ── Mutation helpers ────────────────────────────────────────────────

    /// Replace uses of `old` by `new` in `scope` and every node nested in it.
    /// Returns the number of operand slots rewritten.
    pub fn replace_uses_within(&mut self, old: ValueId, new: ValueId, scope: NodeId) -> usize {
        let mut targets = Vec::new();
        self.walk(scope, &mut |n| targets.push(n.id));
        let mut rewritten = 0;
        for id in targets {
            for operand in &mut self.node_mut(id).operands {
                if *operand == old {
                    *operand = new;
                    rewritten += 1;
                }
            }
        }
        rewritten
    }

    pub fn clear_levels(&mut self) {
        for node in &mut self.nodes {
            node.level = None;
        }
    }

    /// Short human-readable description used in diagnostics.
    pub fn describe(&self, id: NodeId) -> String {
        let node = self.node(id);
        let head = match &node.kind {
            NodeKind::Compute { name } => format!("op \"{name}\""),
            NodeKind::Loop { iv, .. } => format!("for %{}", self.value(*iv).name),
            other => other.mnemonic().to_string(),
        };
        match node.results.first() {
            Some(&r) => format!("'{head}' defining %{}", self.value(r).name),
            None => format!("'{head}'"),
        }
    }

    /// SHA-256 of the printed region, hex encoded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_string().as_bytes());
        let digest = hasher.finalize();
        let mut s = String::with_capacity(64);
        for b in digest {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
        }
        s
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

fn write_value_list(f: &mut fmt::Formatter<'_>, region: &Region, values: &[ValueId]) -> fmt::Result {
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "%{}", region.value(*v).name)?;
    }
    Ok(())
}

fn write_attr_dict(
    f: &mut fmt::Formatter<'_>,
    head: Option<(&str, Attr)>,
    attrs: &BTreeMap<String, Attr>,
) -> fmt::Result {
    if head.is_none() && attrs.is_empty() {
        return Ok(());
    }
    write!(f, " {{")?;
    let mut first = true;
    let head = head.map(|(k, v)| (k.to_string(), v));
    for (key, value) in head.iter().map(|(k, v)| (k, v)).chain(attrs.iter()) {
        if !first {
            write!(f, ", ")?;
        }
        first = false;
        write!(f, "{key} = {value}")?;
    }
    write!(f, "}}")
}

fn write_node(f: &mut fmt::Formatter<'_>, region: &Region, id: NodeId, indent: usize) -> fmt::Result {
    let node = region.node(id);
    let pad = "  ".repeat(indent);
    write!(f, "{pad}")?;
    if !node.results.is_empty() {
        write_value_list(f, region, &node.results)?;
        write!(f, " = ")?;
    }
    let result_ty = |i: usize| region.value(node.results[i]).ty.clone();
    match &node.kind {
        NodeKind::Alloc { .. } => write!(f, "{} : {}", node.kind.mnemonic(), result_ty(0))?,
        NodeKind::Constant(v) => write!(f, "constant {v} : {}", result_ty(0))?,
        NodeKind::Convert(_) | NodeKind::Load => {
            write!(f, "{} ", node.kind.mnemonic())?;
            write_value_list(f, region, &node.operands)?;
            write!(f, " : {}", result_ty(0))?;
        }
        NodeKind::Return => {
            write!(f, "return")?;
            if !node.operands.is_empty() {
                write!(f, " ")?;
                write_value_list(f, region, &node.operands)?;
            }
        }
        NodeKind::Compute { name } => {
            write!(f, "op {name:?}(")?;
            write_value_list(f, region, &node.operands)?;
            write!(f, ")")?;
            if !node.results.is_empty() {
                write!(f, " : ")?;
                for (i, _) in node.results.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", result_ty(i))?;
                }
            }
        }
        NodeKind::Store => {
            write!(f, "store ")?;
            write_value_list(f, region, &node.operands)?;
        }
        NodeKind::Copy => {
            write!(f, "copy ")?;
            write_value_list(f, region, &node.operands)?;
            if !node.results.is_empty() {
                write!(f, " : {}", result_ty(0))?;
            }
        }
        NodeKind::Loop {
            iv,
            lower,
            upper,
            body,
        } => {
            writeln!(f, "for %{} = {lower} to {upper} {{", region.value(*iv).name)?;
            for &child in body {
                write_node(f, region, child, indent + 1)?;
            }
            write!(f, "{pad}}}")?;
        }
    }
    let level = node.level.map(|l| (LEVEL_ATTR, Attr::Int(l as i64)));
    write_attr_dict(f, level, &node.attrs)?;
    writeln!(f)
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "func @{}(", self.name)?;
        for (i, &arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let value = self.value(arg);
            write!(f, "%{}: {}", value.name, value.ty)?;
        }
        write!(f, ")")?;
        let flag = self.dataflow.then_some((DATAFLOW_ATTR, Attr::Bool(true)));
        if flag.is_some() || !self.attrs.is_empty() {
            write!(f, " attributes")?;
            write_attr_dict(f, flag, &self.attrs)?;
        }
        writeln!(f, " {{")?;
        for &node in &self.body {
            write_node(f, self, node, 1)?;
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, region) in self.regions.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{region}")?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
