// AST node types for swpc .swp source files.
//
// Surface syntax only: names are unresolved strings and index expressions
// are arbitrary expressions. `resolve` turns this into the arena IR.
// Every node carries a `SimpleSpan` for error reporting in downstream phases.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

// ── Root ──

/// A complete source file: buffer declarations and top-level loops, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub items: Vec<Item>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Buffer(BufferDecl),
    Loop(LoopStmt),
}

// ── buffer_decl: ('buffer' | 'alloc') IDENT ':' TYPE '[' INT (',' INT)* ']' ';' ──

#[derive(Debug, Clone, PartialEq)]
pub struct BufferDecl {
    pub name: Ident,
    pub dtype: Ident,
    pub shape: Vec<(i64, Span)>,
    pub span: Span,
}

// ── loop: 'for' IDENT 'in' INT '..' INT annotation* '{' loop_item* '}' ──

#[derive(Debug, Clone, PartialEq)]
pub struct LoopStmt {
    pub var: Ident,
    pub min: (i64, Span),
    pub max: (i64, Span),
    pub annotations: Vec<Annotation>,
    pub body: Vec<LoopItem>,
    pub span: Span,
}

/// `@key = value`
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub key: Ident,
    pub value: AnnotationLit,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationLit {
    Int(i64),
    Ints(Vec<i64>),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopItem {
    /// `alloc NAME: TYPE[...];`: loop-local buffer.
    Alloc(BufferDecl),
    Block(BlockDecl),
    Reduction(ReductionDecl),
    Loop(LoopStmt),
}

// ── block: 'block' IDENT '{' ('init' '{' op* '}')? op* '}' ──

#[derive(Debug, Clone, PartialEq)]
pub struct BlockDecl {
    pub name: Ident,
    pub init: Option<Vec<Op>>,
    pub body: Vec<Op>,
    pub span: Span,
}

// ── reduction: 'reduction' IDENT '{' 'init' '{' op* '}' 'update' '{' op* '}' '}' ──

/// An already-decomposed reduction: two sibling blocks written together.
#[derive(Debug, Clone, PartialEq)]
pub struct ReductionDecl {
    pub name: Ident,
    pub init: Vec<Op>,
    pub update: Vec<Op>,
    pub span: Span,
}

// ── Ops inside blocks ──

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// `NAME[idx, ...] = expr;`
    Store {
        target: Access,
        value: Expr,
        span: Span,
    },
    /// `for IDENT in INT..INT { op* }`
    Grid {
        var: Ident,
        min: i64,
        max: i64,
        body: Vec<Op>,
        span: Span,
    },
    /// `if (expr) { op* }`: executes when expr is non-zero.
    If {
        cond: Expr,
        then: Vec<Op>,
        span: Span,
    },
}

/// `NAME[idx, ...]`
#[derive(Debug, Clone, PartialEq)]
pub struct Access {
    pub buffer: Ident,
    pub indices: Vec<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64, Span),
    Var(Ident),
    Load(Access),
    Neg(Box<Expr>, Span),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Int(_, span) | Expr::Neg(_, span) | Expr::Binary { span, .. } => *span,
            Expr::Var(ident) => ident.span,
            Expr::Load(access) => access.span,
        }
    }
}

// ── Identifier ──

/// An identifier with its source text and span.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}
