// AST node types for textual dataflow IR (.dfir) files.
//
// A thin syntax tree: names are still strings and types are still literals.
// `resolve` turns it into arena regions.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

use crate::ir::Conversion;
use crate::lexer::ShapedLit;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

// ── Root ──

/// A complete source file: `set` directives and function definitions.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub items: Vec<Item>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Set(SetStmt),
    Func(FuncDef),
}

// ── set_stmt: 'set' IDENT '=' set_value ──

#[derive(Debug, Clone, PartialEq)]
pub struct SetStmt {
    pub name: Ident,
    pub value: SetValue,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SetValue {
    Int(i64, Span),
    Bool(bool, Span),
    Str(String, Span),
    Ident(Ident),
}

impl SetValue {
    pub fn span(&self) -> Span {
        match self {
            SetValue::Int(_, s) | SetValue::Bool(_, s) | SetValue::Str(_, s) => *s,
            SetValue::Ident(id) => id.span,
        }
    }
}

// ── func_def: 'func' SYMBOL '(' args ')' ('attributes' attr_dict)? block ──

#[derive(Debug, Clone, PartialEq)]
pub struct FuncDef {
    pub name: Ident,
    pub args: Vec<ArgDecl>,
    pub attrs: Vec<AttrEntry>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArgDecl {
    pub value: ValueRef,
    pub ty: TypeExpr,
}

// ── Leaves ──

#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

/// A `%name` occurrence (definition or use).
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRef {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    Named(Ident),
    Shaped { lit: ShapedLit, span: Span },
}

impl TypeExpr {
    pub fn span(&self) -> Span {
        match self {
            TypeExpr::Named(id) => id.span,
            TypeExpr::Shaped { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttrEntry {
    pub key: Ident,
    pub value: AttrValue,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Int(i64),
    Bool(bool),
    Str(String),
}

// ── Statements ──

/// One node: optional result list, the operation, optional attribute dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub results: Vec<ValueRef>,
    pub op: OpExpr,
    pub attrs: Vec<AttrEntry>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpExpr {
    Alloc {
        stack: bool,
        ty: TypeExpr,
    },
    Constant {
        value: i64,
        ty: TypeExpr,
    },
    Convert {
        conversion: Conversion,
        operand: ValueRef,
        ty: TypeExpr,
    },
    Return {
        operands: Vec<ValueRef>,
    },
    Compute {
        name: String,
        operands: Vec<ValueRef>,
        types: Vec<TypeExpr>,
    },
    Load {
        memref: ValueRef,
        ty: TypeExpr,
    },
    Store {
        value: ValueRef,
        memref: ValueRef,
    },
    Copy {
        operands: Vec<ValueRef>,
        ty: Option<TypeExpr>,
    },
    Loop {
        iv: ValueRef,
        lower: i64,
        upper: i64,
        body: Vec<Stmt>,
    },
}
