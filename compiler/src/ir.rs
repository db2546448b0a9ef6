// ir.rs — Arena-indexed loop IR
//
// The representation every pass after `resolve` works on. Buffers, blocks
// and variables live in flat arenas on `Program`; statements refer to them by
// id. Loops are owned by their parent statement list.
//
// Preconditions: ids stored anywhere in the tree index into the owning
//                program's arenas.
// Postconditions: none (data-only module plus small helpers).
// Failure modes: `Affine::eval` reports the first unbound variable.
// Side effects: none.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use crate::ast::BinOp;
use crate::ast::Span;
use crate::id::{BlockId, BufferId, LoopId, VarId};

// ── Arenas ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub buffers: Vec<Buffer>,
    pub blocks: Vec<Block>,
    pub vars: Vec<Var>,
    pub body: Vec<Stmt>,
}

impl Program {
    pub fn buffer(&self, id: BufferId) -> &Buffer {
        &self.buffers[id.index()]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn var(&self, id: VarId) -> &Var {
        &self.vars[id.index()]
    }

    pub fn add_buffer(&mut self, buffer: Buffer) -> BufferId {
        let id = BufferId(self.buffers.len() as u32);
        self.buffers.push(buffer);
        id
    }

    pub fn add_block(&mut self, block: Block) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(block);
        id
    }

    pub fn add_var(&mut self, name: impl Into<String>) -> VarId {
        let id = VarId(self.vars.len() as u32);
        self.vars.push(Var { name: name.into() });
        id
    }

    /// Largest loop id anywhere in the program (pipelined loops count by
    /// their origin id).
    pub fn max_loop_id(&self) -> Option<LoopId> {
        fn walk(stmts: &[Stmt], best: &mut Option<LoopId>) {
            for stmt in stmts {
                match stmt {
                    Stmt::For(lp) => {
                        *best = (*best).max(Some(lp.id));
                        walk(&lp.body, best);
                    }
                    Stmt::Pipeline(p) => *best = (*best).max(Some(p.origin)),
                    Stmt::Allocate { body, .. } => walk(body, best),
                    Stmt::Block(_) | Stmt::Reduction { .. } => {}
                }
            }
        }
        let mut best = None;
        walk(&self.body, &mut best);
        best
    }

    /// Ids of all `Global` buffers, in arena order.
    pub fn globals(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.buffers
            .iter()
            .enumerate()
            .filter(|(_, b)| b.scope == Scope::Global)
            .map(|(i, _)| BufferId(i as u32))
    }
}

// ── Buffers and variables ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    I32,
    I64,
    F32,
}

impl DType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "i32" => Some(DType::I32),
            "i64" => Some(DType::I64),
            "f32" => Some(DType::F32),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F32 => "f32",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Program parameter; observable after execution.
    Global,
    /// Allocated by a loop (or an `Allocate` scope); dead after it.
    Local,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    pub name: String,
    pub dtype: DType,
    pub shape: Vec<u64>,
    pub scope: Scope,
}

impl Buffer {
    pub fn len(&self) -> usize {
        self.shape.iter().product::<u64>() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Var {
    pub name: String,
}

// ── Annotations ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationValue {
    Int(i64),
    Ints(Vec<i64>),
    Str(String),
}

/// String-keyed loop annotations. Ordered so printing is deterministic.
pub type Annotations = BTreeMap<String, AnnotationValue>;

// ── Statements ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Loop {
    pub id: LoopId,
    pub var: VarId,
    pub min: i64,
    /// Trip count.
    pub extent: u64,
    /// Local buffers owned by this loop, zero-filled on loop entry.
    pub allocs: Vec<BufferId>,
    pub annotations: Annotations,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Block(BlockRef),
    /// A decomposed reduction: `init` was split off `update`'s original
    /// block. Counts as two direct children.
    Reduction { init: BlockRef, update: BlockRef },
    For(Loop),
    Pipeline(PipelinedLoop),
    /// Zero-filled allocation scope around `body`.
    Allocate {
        buffers: Vec<BufferId>,
        body: Vec<Stmt>,
    },
}

/// A use of a block. Outside pipelined code `bind` and `guard` are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRef {
    pub block: BlockId,
    /// Variable bound for the duration of the block (the original induction
    /// variable, as a function of the time variable).
    pub bind: Option<Binding>,
    pub guard: Option<Guard>,
}

impl BlockRef {
    pub fn plain(block: BlockId) -> Self {
        Self {
            block,
            bind: None,
            guard: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub var: VarId,
    pub value: Affine,
}

/// Half-open guard `lo <= var < hi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guard {
    pub var: VarId,
    pub lo: i64,
    pub hi: i64,
}

impl Guard {
    pub fn holds(&self, value: i64) -> bool {
        self.lo <= value && value < self.hi
    }
}

// ── Pipelined loops ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionKind {
    Prologue,
    Steady,
    Epilogue,
}

impl RegionKind {
    pub fn name(self) -> &'static str {
        match self {
            RegionKind::Prologue => "prologue",
            RegionKind::Steady => "steady",
            RegionKind::Epilogue => "epilogue",
        }
    }
}

/// One emitted region: a loop of the time variable over `[min, min + extent)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub kind: RegionKind,
    pub min: i64,
    pub extent: u64,
    pub body: Vec<BlockRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelinedLoop {
    pub origin: LoopId,
    /// The original induction variable; rebound per block.
    pub var: VarId,
    pub time_var: VarId,
    pub allocs: Vec<BufferId>,
    /// Annotations of the original loop other than the pipeline keys.
    pub annotations: Annotations,
    pub prologue: Region,
    pub steady: Region,
    pub epilogue: Region,
    pub span: Span,
}

impl PipelinedLoop {
    pub fn regions(&self) -> [&Region; 3] {
        [&self.prologue, &self.steady, &self.epilogue]
    }
}

// ── Blocks and ops ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOrigin {
    Source,
    ReductionInit { update: BlockId },
    ReductionUpdate { init: BlockId },
    /// Copy of `from` with rotated buffer accesses.
    Rotated { from: BlockId },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub name: String,
    pub origin: BlockOrigin,
    /// Reduction initialization, run before `body` on every execution.
    pub init: Option<Vec<Op>>,
    pub body: Vec<Op>,
}

impl Block {
    /// Init ops followed by body ops, in execution order.
    pub fn ops(&self) -> impl Iterator<Item = &Op> {
        self.init.iter().flatten().chain(self.body.iter())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Store {
        buffer: BufferId,
        indices: Vec<Index>,
        value: Expr,
    },
    /// Nested constant-extent iteration inside a block.
    Grid {
        var: VarId,
        min: i64,
        extent: u64,
        body: Vec<Op>,
    },
    /// Runs `then` when `cond` is non-zero.
    If { cond: Expr, then: Vec<Op> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Index {
    Affine(Affine),
    /// Copy selection `iter mod depth` for a rotated buffer.
    Rotate { iter: Affine, depth: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Var(VarId),
    Load {
        buffer: BufferId,
        indices: Vec<Index>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Neg(Box<Expr>),
}

impl Expr {
    /// True if evaluating this expression reads any buffer.
    pub fn loads(&self) -> bool {
        match self {
            Expr::Int(_) | Expr::Var(_) => false,
            Expr::Load { .. } => true,
            Expr::Binary { lhs, rhs, .. } => lhs.loads() || rhs.loads(),
            Expr::Neg(inner) => inner.loads(),
        }
    }
}

// ── Affine expressions ──────────────────────────────────────────────────────

/// `Σ coeff·var + constant`. Terms are sorted by var with no zero coefficients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Affine {
    pub terms: Vec<(VarId, i64)>,
    pub constant: i64,
}

impl Affine {
    pub fn constant(c: i64) -> Self {
        Self {
            terms: Vec::new(),
            constant: c,
        }
    }

    pub fn var(v: VarId) -> Self {
        Self {
            terms: vec![(v, 1)],
            constant: 0,
        }
    }

    pub fn coeff(&self, v: VarId) -> i64 {
        self.terms
            .iter()
            .find(|(var, _)| *var == v)
            .map_or(0, |(_, c)| *c)
    }

    pub fn as_constant(&self) -> Option<i64> {
        self.terms.is_empty().then_some(self.constant)
    }

    pub fn add(&self, other: &Affine) -> Affine {
        let mut terms = self.terms.clone();
        terms.extend(other.terms.iter().copied());
        Affine::normalized(terms, self.constant.wrapping_add(other.constant))
    }

    pub fn scale(&self, k: i64) -> Affine {
        let terms = self.terms.iter().map(|&(v, c)| (v, c.wrapping_mul(k))).collect();
        Affine::normalized(terms, self.constant.wrapping_mul(k))
    }

    pub fn offset(&self, c: i64) -> Affine {
        Affine {
            terms: self.terms.clone(),
            constant: self.constant.wrapping_add(c),
        }
    }

    /// Evaluate under `env`; `Err(var)` names the first unbound variable.
    pub fn eval(&self, env: impl Fn(VarId) -> Option<i64>) -> Result<i64, VarId> {
        let mut acc = self.constant;
        for &(v, c) in &self.terms {
            let value = env(v).ok_or(v)?;
            acc = acc.wrapping_add(c.wrapping_mul(value));
        }
        Ok(acc)
    }

    fn normalized(mut terms: Vec<(VarId, i64)>, constant: i64) -> Affine {
        terms.sort_by_key(|(v, _)| *v);
        let mut merged: Vec<(VarId, i64)> = Vec::with_capacity(terms.len());
        for (v, c) in terms {
            match merged.last_mut() {
                Some((last, acc)) if *last == v => *acc = acc.wrapping_add(c),
                _ => merged.push((v, c)),
            }
        }
        merged.retain(|(_, c)| *c != 0);
        Affine {
            terms: merged,
            constant,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affine_add_merges_and_drops_zero_terms() {
        let i = VarId(0);
        let k = VarId(1);
        let a = Affine::var(i).scale(2).add(&Affine::var(k)).offset(3);
        let b = Affine::var(i).scale(-2).offset(1);
        let sum = a.add(&b);
        assert_eq!(sum.terms, vec![(k, 1)]);
        assert_eq!(sum.constant, 4);
        assert_eq!(sum.coeff(i), 0);
    }

    #[test]
    fn affine_eval_reports_unbound_var() {
        let i = VarId(0);
        let k = VarId(7);
        let a = Affine::var(i).add(&Affine::var(k).scale(3));
        let env = |v: VarId| (v == i).then_some(5);
        assert_eq!(a.eval(env), Err(k));
        let env = |v: VarId| Some(if v == i { 5 } else { 2 });
        assert_eq!(a.eval(env), Ok(11));
    }

    #[test]
    fn expr_loads_detects_nested_loads() {
        let load = Expr::Load {
            buffer: BufferId(0),
            indices: vec![Index::Affine(Affine::constant(0))],
        };
        let e = Expr::Binary {
            op: BinOp::Add,
            lhs: Box::new(Expr::Int(1)),
            rhs: Box::new(Expr::Neg(Box::new(load))),
        };
        assert!(e.loads());
        assert!(!Expr::Var(VarId(0)).loads());
    }

    #[test]
    fn dtype_names_round_trip() {
        for dt in [DType::I32, DType::I64, DType::F32] {
            assert_eq!(DType::from_name(dt.name()), Some(dt));
        }
        assert_eq!(DType::from_name("f64"), None);
    }
}
