// print.rs — Deterministic textual rendering of the IR
//
// Plain loops print in source syntax, so an unpipelined program reads back
// like its input. Pipelined loops print their regions explicitly:
//
//   pipeline i (loop #0) {
//     alloc S_rot: i32[2, 4];
//     prologue for i_t in 0..1 {
//       block load [i = i_t] { ... }
//     }
//     ...
//   }
//
// Preconditions: ids in `program` index into its own arenas.
// Postconditions: output depends only on the program (annotations print in
//                 key order).
// Failure modes: none.
// Side effects: none.

use std::fmt::{self, Write};

use crate::annotation::render_value;
use crate::id::BufferId;
use crate::ir::{
    Affine, BinOp, Block, BlockRef, Expr, Index, Loop, Op, PipelinedLoop, Program, Stmt,
};

pub fn print_program(program: &Program) -> String {
    program.to_string()
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut p = Printer {
            program: self,
            out: f,
            indent: 0,
        };
        let mut any = false;
        for id in self.globals() {
            p.buffer_decl("buffer", id)?;
            any = true;
        }
        for stmt in &self.body {
            if any {
                p.out.write_char('\n')?;
            }
            p.stmt(stmt)?;
            any = true;
        }
        Ok(())
    }
}

struct Printer<'a, 'f, 'w> {
    program: &'a Program,
    out: &'f mut fmt::Formatter<'w>,
    indent: usize,
}

impl Printer<'_, '_, '_> {
    fn pad(&mut self) -> fmt::Result {
        for _ in 0..self.indent {
            self.out.write_str("  ")?;
        }
        Ok(())
    }

    fn buffer_decl(&mut self, keyword: &str, id: BufferId) -> fmt::Result {
        let b = self.program.buffer(id);
        let dims: Vec<String> = b.shape.iter().map(|d| d.to_string()).collect();
        self.pad()?;
        writeln!(
            self.out,
            "{keyword} {}: {}[{}];",
            b.name,
            b.dtype.name(),
            dims.join(", ")
        )
    }

    fn open(&mut self, header: fmt::Arguments<'_>) -> fmt::Result {
        self.pad()?;
        self.out.write_fmt(header)?;
        self.out.write_str(" {\n")?;
        self.indent += 1;
        Ok(())
    }

    fn close(&mut self) -> fmt::Result {
        self.indent -= 1;
        self.pad()?;
        self.out.write_str("}\n")
    }

    fn var(&self, id: crate::id::VarId) -> &str {
        &self.program.var(id).name
    }

    // ── Statements ──

    fn stmt(&mut self, stmt: &Stmt) -> fmt::Result {
        match stmt {
            Stmt::Block(r) => self.block_ref(r),
            Stmt::Reduction { init, update } => {
                let program = self.program;
                let name = program.block(update.block).name.as_str();
                let name = name.strip_suffix("_update").unwrap_or(name);
                self.open(format_args!("reduction {name}"))?;
                self.open(format_args!("init"))?;
                self.ops(&program.block(init.block).body)?;
                self.close()?;
                self.open(format_args!("update"))?;
                self.ops(&program.block(update.block).body)?;
                self.close()?;
                self.close()
            }
            Stmt::For(lp) => self.for_loop(lp),
            Stmt::Pipeline(p) => self.pipeline(p),
            Stmt::Allocate { buffers, body } => {
                self.open(format_args!("allocate"))?;
                for &b in buffers {
                    self.buffer_decl("alloc", b)?;
                }
                for stmt in body {
                    self.stmt(stmt)?;
                }
                self.close()
            }
        }
    }

    fn for_loop(&mut self, lp: &Loop) -> fmt::Result {
        let mut header = format!(
            "for {} in {}..{}",
            self.var(lp.var),
            lp.min,
            lp.min + lp.extent as i64
        );
        for (key, value) in &lp.annotations {
            let _ = write!(header, " @{key} = {}", render_value(value));
        }
        self.open(format_args!("{header}"))?;
        for &b in &lp.allocs {
            self.buffer_decl("alloc", b)?;
        }
        for stmt in &lp.body {
            self.stmt(stmt)?;
        }
        self.close()
    }

    fn pipeline(&mut self, p: &PipelinedLoop) -> fmt::Result {
        let var = self.var(p.var).to_string();
        let time = self.var(p.time_var).to_string();
        let mut header = format!("pipeline {var} (loop #{})", p.origin.0);
        for (key, value) in &p.annotations {
            let _ = write!(header, " @{key} = {}", render_value(value));
        }
        self.open(format_args!("{header}"))?;
        for &b in &p.allocs {
            self.buffer_decl("alloc", b)?;
        }
        for region in p.regions() {
            let hi = region.min + region.extent as i64;
            self.open(format_args!(
                "{} for {time} in {}..{hi}",
                region.kind.name(),
                region.min
            ))?;
            for r in &region.body {
                self.block_ref(r)?;
            }
            self.close()?;
        }
        self.close()
    }

    fn block_ref(&mut self, r: &BlockRef) -> fmt::Result {
        let program = self.program;
        let block = program.block(r.block);
        let mut header = format!("block {}", block.name);
        if let Some(bind) = &r.bind {
            let _ = write!(
                header,
                " [{} = {}]",
                self.var(bind.var),
                self.affine(&bind.value)
            );
        }
        if let Some(g) = r.guard {
            let _ = write!(header, " when {} <= {} < {}", g.lo, self.var(g.var), g.hi);
        }
        self.open(format_args!("{header}"))?;
        self.block_body(block)?;
        self.close()
    }

    fn block_body(&mut self, block: &Block) -> fmt::Result {
        if let Some(init) = &block.init {
            self.open(format_args!("init"))?;
            self.ops(init)?;
            self.close()?;
        }
        self.ops(&block.body)
    }

    // ── Ops ──

    fn ops(&mut self, ops: &[Op]) -> fmt::Result {
        for op in ops {
            self.op(op)?;
        }
        Ok(())
    }

    fn op(&mut self, op: &Op) -> fmt::Result {
        match op {
            Op::Store {
                buffer,
                indices,
                value,
            } => {
                let line = format!("{} = {};", self.access(*buffer, indices), self.expr(value, 0));
                self.pad()?;
                writeln!(self.out, "{line}")
            }
            Op::Grid {
                var,
                min,
                extent,
                body,
            } => {
                let header = format!("for {} in {}..{}", self.var(*var), min, min + *extent as i64);
                self.open(format_args!("{header}"))?;
                self.ops(body)?;
                self.close()
            }
            Op::If { cond, then } => {
                let header = format!("if ({})", self.expr(cond, 0));
                self.open(format_args!("{header}"))?;
                self.ops(then)?;
                self.close()
            }
        }
    }

    fn access(&self, buffer: BufferId, indices: &[Index]) -> String {
        render_access(self.program, buffer, indices)
    }

    fn expr(&self, expr: &Expr, parent: u8) -> String {
        render_expr(self.program, expr, parent)
    }

    fn affine(&self, a: &Affine) -> String {
        render_affine(self.program, a)
    }
}

// ── Expressions ─────────────────────────────────────────────────────────────

fn render_access(program: &Program, buffer: BufferId, indices: &[Index]) -> String {
    let parts: Vec<String> = indices
        .iter()
        .map(|idx| match idx {
            Index::Affine(a) => render_affine(program, a),
            Index::Rotate { iter, depth } => {
                let inner = render_affine(program, iter);
                if iter.terms.len() == 1 && iter.constant == 0 && iter.terms[0].1 == 1 {
                    format!("{inner} % {depth}")
                } else {
                    format!("({inner}) % {depth}")
                }
            }
        })
        .collect();
    format!("{}[{}]", program.buffer(buffer).name, parts.join(", "))
}

/// Render `expr` inside a context of precedence `parent` (0 = top).
fn render_expr(program: &Program, expr: &Expr, parent: u8) -> String {
    match expr {
        Expr::Int(n) if *n < 0 && parent > 0 => format!("({n})"),
        Expr::Int(n) => n.to_string(),
        Expr::Var(v) => program.var(*v).name.clone(),
        Expr::Load { buffer, indices } => render_access(program, *buffer, indices),
        Expr::Neg(inner) => format!("-{}", render_expr(program, inner, 3)),
        Expr::Binary { op, lhs, rhs } => {
            let (prec, sym) = match op {
                BinOp::Add => (1, "+"),
                BinOp::Sub => (1, "-"),
                BinOp::Mul => (2, "*"),
            };
            let text = format!(
                "{} {sym} {}",
                render_expr(program, lhs, prec),
                render_expr(program, rhs, prec + 1)
            );
            if prec < parent {
                format!("({text})")
            } else {
                text
            }
        }
    }
}

pub fn render_affine(program: &Program, a: &Affine) -> String {
    let mut out = String::new();
    for &(v, c) in &a.terms {
        let name = &program.var(v).name;
        let (neg, mag) = (c < 0, c.unsigned_abs());
        match (out.is_empty(), neg) {
            (true, false) => {}
            (true, true) => out.push('-'),
            (false, false) => out.push_str(" + "),
            (false, true) => out.push_str(" - "),
        }
        if mag == 1 {
            out.push_str(name);
        } else {
            let _ = write!(out, "{mag}*{name}");
        }
    }
    match (out.is_empty(), a.constant) {
        (true, c) => out = c.to_string(),
        (false, 0) => {}
        (false, c) if c < 0 => {
            let _ = write!(out, " - {}", c.unsigned_abs());
        }
        (false, c) => {
            let _ = write!(out, " + {c}");
        }
    }
    out
}

// ── Tests ───────────────────────────────────────────────────────────────────
