// resolve.rs — Name resolution and IR construction for swpc sources
//
// Walks the parsed AST, resolves buffer and variable names against scoped
// tables, converts index expressions to affine form and builds the arena
// IR. Reports diagnostics for unknown or duplicate names, index arity,
// non-affine indices, empty shapes and inverted ranges.
//
// Preconditions: `program` is a well-formed AST from the parser.
// Postconditions: returns the IR plus all accumulated diagnostics. Global
//                 buffers occupy the first arena slots, in declaration order;
//                 loop ids are assigned in pre-order.
// Failure modes: unknown names, duplicate definitions and constraint
//                violations produce `Diagnostic` entries. Resolution
//                continues past errors.
// Side effects: none.

use std::collections::HashSet;

use crate::annotation::PIPELINE_KEYS;
use crate::ast;
use crate::diag::codes;
use crate::diag::{DiagCode, DiagLevel, Diagnostic};
use crate::id::{BlockId, BufferId, IdAllocator, VarId};
use crate::ir::{
    Affine, AnnotationValue, Annotations, Block, BlockOrigin, BlockRef, Buffer, DType, Expr,
    Index, Loop, Op, Program, Scope, Stmt,
};

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ResolveResult {
    pub program: Program,
    pub diagnostics: Vec<Diagnostic>,
}

impl ResolveResult {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.level == DiagLevel::Error)
    }
}

/// Resolve a parsed program into IR.
pub fn resolve(program: &ast::Program) -> ResolveResult {
    let mut ctx = ResolveCtx::new();
    ctx.collect_globals(program);
    for item in &program.items {
        if let ast::Item::Loop(ls) = item {
            let stmt = ctx.resolve_loop(ls);
            ctx.program.body.push(stmt);
        }
    }
    ResolveResult {
        program: ctx.program,
        diagnostics: ctx.diagnostics,
    }
}

/// Parse and resolve `source`. Errors (parse or resolve) are returned as
/// diagnostics; warnings are dropped.
pub fn program_from_source(source: &str) -> Result<Program, Vec<Diagnostic>> {
    let parsed = crate::parser::parse(source);
    if !parsed.errors.is_empty() {
        return Err(parsed
            .errors
            .iter()
            .map(|e| Diagnostic::new(DiagLevel::Error, *e.span(), e.to_string()))
            .collect());
    }
    let Some(ast) = parsed.program else {
        return Err(vec![Diagnostic::new(
            DiagLevel::Error,
            (0..source.len()).into(),
            "parse failed with no output",
        )]);
    };
    let result = resolve(&ast);
    if result.has_errors() {
        return Err(result
            .diagnostics
            .into_iter()
            .filter(|d| d.level == DiagLevel::Error)
            .collect());
    }
    Ok(result.program)
}

// ── Resolve context ─────────────────────────────────────────────────────────

struct ResolveCtx {
    program: Program,
    diagnostics: Vec<Diagnostic>,
    ids: IdAllocator,
    /// Visible buffers, innermost last.
    buffers: Vec<(String, BufferId)>,
    /// Bound variables (loop and grid), innermost last.
    vars: Vec<(String, VarId)>,
}

impl ResolveCtx {
    fn new() -> Self {
        ResolveCtx {
            program: Program::default(),
            diagnostics: Vec::new(),
            ids: IdAllocator::new(),
            buffers: Vec::new(),
            vars: Vec::new(),
        }
    }

    fn error(&mut self, code: DiagCode, span: ast::Span, message: String) {
        self.diagnostics
            .push(Diagnostic::new(DiagLevel::Error, span, message).with_code(code));
    }

    fn warning(&mut self, code: DiagCode, span: ast::Span, message: String) {
        self.diagnostics
            .push(Diagnostic::new(DiagLevel::Warning, span, message).with_code(code));
    }

    // ── Buffers ─────────────────────────────────────────────────────────

    fn collect_globals(&mut self, program: &ast::Program) {
        for item in &program.items {
            if let ast::Item::Buffer(decl) = item {
                self.declare_buffer(decl, Scope::Global);
            }
        }
    }

    fn declare_buffer(&mut self, decl: &ast::BufferDecl, scope: Scope) -> Option<BufferId> {
        if self.lookup_buffer(&decl.name.name).is_some() {
            self.error(
                codes::E0101,
                decl.name.span,
                format!("duplicate buffer '{}'", decl.name.name),
            );
            return None;
        }
        let mut shape = Vec::with_capacity(decl.shape.len());
        for &(dim, span) in &decl.shape {
            if dim <= 0 {
                self.error(
                    codes::E0105,
                    span,
                    format!(
                        "buffer '{}' has non-positive dimension {dim}",
                        decl.name.name
                    ),
                );
                return None;
            }
            shape.push(dim as u64);
        }
        // The parser only admits known element type names.
        let dtype = DType::from_name(&decl.dtype.name).unwrap_or(DType::I32);
        let id = self.program.add_buffer(Buffer {
            name: decl.name.name.clone(),
            dtype,
            shape,
            scope,
        });
        self.buffers.push((decl.name.name.clone(), id));
        Some(id)
    }

    fn lookup_buffer(&self, name: &str) -> Option<BufferId> {
        self.buffers
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }

    // ── Variables ───────────────────────────────────────────────────────

    fn bind_var(&mut self, ident: &ast::Ident) -> VarId {
        if self.lookup_var(&ident.name).is_some() {
            self.error(
                codes::E0108,
                ident.span,
                format!("variable '{}' shadows an enclosing variable", ident.name),
            );
        }
        let id = self.program.add_var(ident.name.clone());
        self.vars.push((ident.name.clone(), id));
        id
    }

    fn lookup_var(&self, name: &str) -> Option<VarId> {
        self.vars
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }

    fn range(&mut self, min: i64, max: i64, span: ast::Span) -> u64 {
        if max < min {
            self.error(
                codes::E0106,
                span,
                format!("range {min}..{max} is inverted"),
            );
            return 0;
        }
        match max.checked_sub(min) {
            Some(extent) => extent as u64,
            None => {
                self.error(
                    codes::E0106,
                    span,
                    format!("range {min}..{max} has more than {} iterations", i64::MAX),
                );
                0
            }
        }
    }

    // ── Loops ───────────────────────────────────────────────────────────

    fn resolve_loop(&mut self, ls: &ast::LoopStmt) -> Stmt {
        let id = self.ids.alloc_loop();
        let extent = self.range(ls.min.0, ls.max.0, ls.max.1);
        let annotations = self.annotations(&ls.annotations);

        let buffer_mark = self.buffers.len();
        let var = self.bind_var(&ls.var);

        let mut allocs = Vec::new();
        let mut body = Vec::new();
        let mut block_names: HashSet<String> = HashSet::new();
        for item in &ls.body {
            match item {
                ast::LoopItem::Alloc(decl) => {
                    if let Some(b) = self.declare_buffer(decl, Scope::Local) {
                        allocs.push(b);
                    }
                }
                ast::LoopItem::Block(bd) => {
                    self.check_block_name(&bd.name, &mut block_names);
                    let init = bd.init.as_ref().map(|ops| self.ops(ops));
                    let ops = self.ops(&bd.body);
                    let block = self.program.add_block(Block {
                        name: bd.name.name.clone(),
                        origin: BlockOrigin::Source,
                        init,
                        body: ops,
                    });
                    body.push(Stmt::Block(BlockRef::plain(block)));
                }
                ast::LoopItem::Reduction(rd) => {
                    self.check_block_name(&rd.name, &mut block_names);
                    let init_ops = self.ops(&rd.init);
                    let update_ops = self.ops(&rd.update);
                    let init = BlockId(self.program.blocks.len() as u32);
                    let update = BlockId(init.0 + 1);
                    self.program.add_block(Block {
                        name: format!("{}_init", rd.name.name),
                        origin: BlockOrigin::ReductionInit { update },
                        init: None,
                        body: init_ops,
                    });
                    self.program.add_block(Block {
                        name: format!("{}_update", rd.name.name),
                        origin: BlockOrigin::ReductionUpdate { init },
                        init: None,
                        body: update_ops,
                    });
                    body.push(Stmt::Reduction {
                        init: BlockRef::plain(init),
                        update: BlockRef::plain(update),
                    });
                }
                ast::LoopItem::Loop(inner) => body.push(self.resolve_loop(inner)),
            }
        }

        self.vars.pop();
        self.buffers.truncate(buffer_mark);

        Stmt::For(Loop {
            id,
            var,
            min: ls.min.0,
            extent,
            allocs,
            annotations,
            body,
            span: ls.span,
        })
    }

    fn check_block_name(&mut self, name: &ast::Ident, seen: &mut HashSet<String>) {
        if !seen.insert(name.name.clone()) {
            self.error(
                codes::E0107,
                name.span,
                format!("duplicate block '{}' in loop body", name.name),
            );
        }
    }

    fn annotations(&mut self, anns: &[ast::Annotation]) -> Annotations {
        let mut out = Annotations::new();
        for ann in anns {
            let key = &ann.key.name;
            if key.starts_with("software_pipeline_") && !PIPELINE_KEYS.contains(&key.as_str()) {
                self.warning(
                    codes::W0100,
                    ann.key.span,
                    format!("unknown pipeline annotation '{key}' is ignored by the pass"),
                );
            }
            let value = match &ann.value {
                ast::AnnotationLit::Int(n) => AnnotationValue::Int(*n),
                ast::AnnotationLit::Ints(items) => AnnotationValue::Ints(items.clone()),
                ast::AnnotationLit::Str(s) => AnnotationValue::Str(s.clone()),
            };
            out.insert(key.clone(), value);
        }
        out
    }

    // ── Ops and expressions ─────────────────────────────────────────────

    fn ops(&mut self, ops: &[ast::Op]) -> Vec<Op> {
        ops.iter().filter_map(|op| self.op(op)).collect()
    }

    fn op(&mut self, op: &ast::Op) -> Option<Op> {
        match op {
            ast::Op::Store { target, value, .. } => {
                let value = self.expr(value);
                let (buffer, indices) = self.access(target)?;
                Some(Op::Store {
                    buffer,
                    indices,
                    value: value?,
                })
            }
            ast::Op::Grid {
                var,
                min,
                max,
                body,
                span,
            } => {
                let extent = self.range(*min, *max, *span);
                let id = self.bind_var(var);
                let body = self.ops(body);
                self.vars.pop();
                Some(Op::Grid {
                    var: id,
                    min: *min,
                    extent,
                    body,
                })
            }
            ast::Op::If { cond, then, .. } => {
                let cond = self.expr(cond);
                let then = self.ops(then);
                Some(Op::If { cond: cond?, then })
            }
        }
    }

    fn access(&mut self, access: &ast::Access) -> Option<(BufferId, Vec<Index>)> {
        let name = &access.buffer.name;
        let Some(buffer) = self.lookup_buffer(name) else {
            self.error(
                codes::E0100,
                access.buffer.span,
                format!("undefined buffer '{name}'"),
            );
            return None;
        };
        let rank = self.program.buffer(buffer).shape.len();
        if access.indices.len() != rank {
            self.error(
                codes::E0103,
                access.span,
                format!(
                    "buffer '{name}' has {rank} dimension(s) but is indexed with {}",
                    access.indices.len()
                ),
            );
            return None;
        }
        let mut indices = Vec::with_capacity(rank);
        let mut ok = true;
        for idx in &access.indices {
            match self.affine(idx) {
                Some(a) => indices.push(Index::Affine(a)),
                None => ok = false,
            }
        }
        ok.then_some((buffer, indices))
    }

    /// Convert an index expression to affine form.
    fn affine(&mut self, expr: &ast::Expr) -> Option<Affine> {
        match expr {
            ast::Expr::Int(n, _) => Some(Affine::constant(*n)),
            ast::Expr::Var(ident) => self.var_ref(ident).map(Affine::var),
            ast::Expr::Neg(inner, _) => self.affine(inner).map(|a| a.scale(-1)),
            ast::Expr::Binary { op, lhs, rhs, span } => {
                let (l, r) = (self.affine(lhs)?, self.affine(rhs)?);
                match op {
                    ast::BinOp::Add => Some(l.add(&r)),
                    ast::BinOp::Sub => Some(l.add(&r.scale(-1))),
                    ast::BinOp::Mul => match (l.as_constant(), r.as_constant()) {
                        (Some(k), _) => Some(r.scale(k)),
                        (_, Some(k)) => Some(l.scale(k)),
                        (None, None) => {
                            self.error(
                                codes::E0104,
                                *span,
                                "index is not affine: product of two variables".to_string(),
                            );
                            None
                        }
                    },
                }
            }
            ast::Expr::Load(access) => {
                self.error(
                    codes::E0104,
                    access.span,
                    format!(
                        "index is not affine: loads from buffer '{}'",
                        access.buffer.name
                    ),
                );
                None
            }
        }
    }

    fn expr(&mut self, expr: &ast::Expr) -> Option<Expr> {
        match expr {
            ast::Expr::Int(n, _) => Some(Expr::Int(*n)),
            ast::Expr::Var(ident) => self.var_ref(ident).map(Expr::Var),
            ast::Expr::Load(access) => {
                let (buffer, indices) = self.access(access)?;
                Some(Expr::Load { buffer, indices })
            }
            ast::Expr::Neg(inner, _) => Some(Expr::Neg(Box::new(self.expr(inner)?))),
            ast::Expr::Binary { op, lhs, rhs, .. } => {
                let l = self.expr(lhs);
                let r = self.expr(rhs);
                Some(Expr::Binary {
                    op: *op,
                    lhs: Box::new(l?),
                    rhs: Box::new(r?),
                })
            }
        }
    }

    fn var_ref(&mut self, ident: &ast::Ident) -> Option<VarId> {
        let found = self.lookup_var(&ident.name);
        if found.is_none() {
            self.error(
                codes::E0102,
                ident.span,
                format!("undefined variable '{}'", ident.name),
            );
        }
        found
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
