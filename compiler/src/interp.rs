// interp.rs — Reference interpreter over the IR
//
// Executes a `Program` on concrete memory. Used to check that pipelining
// (and lowering) preserve the contents of every global buffer.
//
// Values are i64 with wrapping arithmetic; stores into i32 buffers truncate
// to 32 bits. f32 buffers hold integers too. Local buffers are zero-filled
// when the owning loop, pipeline or allocation scope is entered and released
// when it exits.
//
// Preconditions: ids in `program` index into its own arenas.
// Postconditions: `run` leaves global buffers holding the program's result.
// Failure modes: InterpError for out-of-bounds accesses, unbound variables
//                and accesses to unallocated buffers.
// Side effects: none beyond the `Memory` passed in.

use crate::id::{BufferId, VarId};
use crate::ir::{Affine, BinOp, BlockRef, DType, Expr, Index, Op, Program, Scope, Stmt};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterpError {
    #[error("out-of-bounds access {buffer}{index:?}")]
    OutOfBounds { buffer: String, index: Vec<i64> },
    #[error("variable '{var}' is unbound")]
    UnboundVar { var: String },
    #[error("buffer '{buffer}' is not allocated")]
    Unallocated { buffer: String },
}

// ── Seeding ─────────────────────────────────────────────────────────────────

/// xorshift64* generator for reproducible buffer contents.
struct Rng {
    state: u64,
}

impl Rng {
    fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }
}

/// Seed derived from the buffer name, so programs that only differ in arena
/// layout see the same inputs.
fn name_seed(seed: u64, name: &str) -> u64 {
    name.bytes().fold(seed ^ 0x9E37_79B9_7F4A_7C15, |h, b| {
        (h ^ b as u64).wrapping_mul(0x0100_0000_01B3)
    })
}

// ── Memory ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memory {
    /// One slot per buffer of the program; `None` while unallocated.
    buffers: Vec<Option<Vec<i64>>>,
}

impl Memory {
    /// Globals filled with small pseudo-random values, locals unallocated.
    pub fn seeded(program: &Program, seed: u64) -> Self {
        let buffers = program
            .buffers
            .iter()
            .map(|b| match b.scope {
                Scope::Global => {
                    let mut rng = Rng::new(name_seed(seed, &b.name));
                    Some(
                        (0..b.len())
                            .map(|_| (rng.next_u64() % 201) as i64 - 100)
                            .collect(),
                    )
                }
                Scope::Local => None,
            })
            .collect();
        Self { buffers }
    }

    pub fn get(&self, buffer: BufferId) -> Option<&[i64]> {
        self.buffers.get(buffer.index())?.as_deref()
    }

    /// Contents of the global buffer called `name`.
    pub fn global<'a>(&'a self, program: &Program, name: &str) -> Option<&'a [i64]> {
        let pos = program
            .buffers
            .iter()
            .position(|b| b.scope == Scope::Global && b.name == name)?;
        self.get(BufferId(pos as u32))
    }
}

// ── Execution ───────────────────────────────────────────────────────────────

pub fn run(program: &Program, memory: &mut Memory) -> Result<(), InterpError> {
    let mut machine = Machine {
        program,
        memory,
        env: vec![None; program.vars.len()],
    };
    machine.stmts(&program.body)
}

/// Run `program` on seeded memory and return the final memory.
pub fn execute(program: &Program, seed: u64) -> Result<Memory, InterpError> {
    let mut memory = Memory::seeded(program, seed);
    run(program, &mut memory)?;
    Ok(memory)
}

/// Run both programs from the same inputs and list the global buffers whose
/// final contents differ. Globals are matched by name.
pub fn compare_globals(
    before: &Program,
    after: &Program,
    seed: u64,
) -> Result<Vec<String>, InterpError> {
    let m_before = execute(before, seed)?;
    let m_after = execute(after, seed)?;
    let mut differing = Vec::new();
    for id in before.globals() {
        let name = &before.buffer(id).name;
        if m_before.get(id) != m_after.global(after, name) {
            differing.push(name.clone());
        }
    }
    Ok(differing)
}

struct Machine<'a> {
    program: &'a Program,
    memory: &'a mut Memory,
    env: Vec<Option<i64>>,
}

impl Machine<'_> {
    fn stmts(&mut self, stmts: &[Stmt]) -> Result<(), InterpError> {
        for stmt in stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), InterpError> {
        match stmt {
            Stmt::Block(r) => self.block(r),
            Stmt::Reduction { init, update } => {
                self.block(init)?;
                self.block(update)
            }
            Stmt::For(lp) => self.scoped(&lp.allocs, |m| {
                for step in 0..lp.extent as i64 {
                    m.with_var(lp.var, lp.min + step, |m| m.stmts(&lp.body))?;
                }
                Ok(())
            }),
            Stmt::Pipeline(p) => self.scoped(&p.allocs, |m| {
                for region in p.regions() {
                    for step in 0..region.extent as i64 {
                        m.with_var(p.time_var, region.min + step, |m| {
                            region.body.iter().try_for_each(|r| m.block(r))
                        })?;
                    }
                }
                Ok(())
            }),
            Stmt::Allocate { buffers, body } => self.scoped(buffers, |m| m.stmts(body)),
        }
    }

    fn block(&mut self, r: &BlockRef) -> Result<(), InterpError> {
        if let Some(guard) = r.guard {
            if !guard.holds(self.lookup(guard.var)?) {
                return Ok(());
            }
        }
        let program = self.program;
        let block = program.block(r.block);
        match &r.bind {
            Some(bind) => {
                let value = self.affine(&bind.value)?;
                self.with_var(bind.var, value, |m| m.ops(block.ops()))
            }
            None => self.ops(block.ops()),
        }
    }

    fn ops<'o>(&mut self, ops: impl Iterator<Item = &'o Op>) -> Result<(), InterpError> {
        for op in ops {
            self.op(op)?;
        }
        Ok(())
    }

    fn op(&mut self, op: &Op) -> Result<(), InterpError> {
        match op {
            Op::Store {
                buffer,
                indices,
                value,
            } => {
                let v = self.expr(value)?;
                let offset = self.offset(*buffer, indices)?;
                let v = match self.program.buffer(*buffer).dtype {
                    DType::I32 => v as i32 as i64,
                    DType::I64 | DType::F32 => v,
                };
                let slot = self.storage(*buffer)?;
                slot[offset] = v;
                Ok(())
            }
            Op::Grid {
                var,
                min,
                extent,
                body,
            } => {
                for step in 0..*extent as i64 {
                    self.with_var(*var, min + step, |m| m.ops(body.iter()))?;
                }
                Ok(())
            }
            Op::If { cond, then } => {
                if self.expr(cond)? != 0 {
                    self.ops(then.iter())?;
                }
                Ok(())
            }
        }
    }

    fn expr(&mut self, expr: &Expr) -> Result<i64, InterpError> {
        Ok(match expr {
            Expr::Int(n) => *n,
            Expr::Var(v) => self.lookup(*v)?,
            Expr::Load { buffer, indices } => {
                let offset = self.offset(*buffer, indices)?;
                self.storage(*buffer)?[offset]
            }
            Expr::Binary { op, lhs, rhs } => {
                let (a, b) = (self.expr(lhs)?, self.expr(rhs)?);
                match op {
                    BinOp::Add => a.wrapping_add(b),
                    BinOp::Sub => a.wrapping_sub(b),
                    BinOp::Mul => a.wrapping_mul(b),
                }
            }
            Expr::Neg(inner) => self.expr(inner)?.wrapping_neg(),
        })
    }

    fn offset(&self, buffer: BufferId, indices: &[Index]) -> Result<usize, InterpError> {
        let buf = self.program.buffer(buffer);
        let mut point = Vec::with_capacity(indices.len());
        for idx in indices {
            point.push(match idx {
                Index::Affine(a) => self.affine(a)?,
                Index::Rotate { iter, depth } => self.affine(iter)?.rem_euclid(*depth as i64),
            });
        }
        let out_of_bounds = || InterpError::OutOfBounds {
            buffer: buf.name.clone(),
            index: point.clone(),
        };
        if point.len() != buf.shape.len() {
            return Err(out_of_bounds());
        }
        let mut offset = 0usize;
        for (&p, &dim) in point.iter().zip(&buf.shape) {
            if p < 0 || p as u64 >= dim {
                return Err(out_of_bounds());
            }
            offset = offset * dim as usize + p as usize;
        }
        Ok(offset)
    }

    fn storage(&mut self, buffer: BufferId) -> Result<&mut Vec<i64>, InterpError> {
        let program = self.program;
        let name = &program.buffer(buffer).name;
        self.memory
            .buffers
            .get_mut(buffer.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| InterpError::Unallocated {
                buffer: name.clone(),
            })
    }

    fn affine(&self, a: &Affine) -> Result<i64, InterpError> {
        a.eval(|v| self.env.get(v.index()).copied().flatten())
            .map_err(|v| self.unbound(v))
    }

    fn lookup(&self, var: VarId) -> Result<i64, InterpError> {
        self.env
            .get(var.index())
            .copied()
            .flatten()
            .ok_or_else(|| self.unbound(var))
    }

    fn unbound(&self, var: VarId) -> InterpError {
        InterpError::UnboundVar {
            var: self.program.var(var).name.clone(),
        }
    }

    /// Bind `var` while running `f`, restoring the previous binding after.
    fn with_var(
        &mut self,
        var: VarId,
        value: i64,
        f: impl FnOnce(&mut Self) -> Result<(), InterpError>,
    ) -> Result<(), InterpError> {
        let saved = self.env[var.index()].replace(value);
        let result = f(self);
        self.env[var.index()] = saved;
        result
    }

    /// Zero-fill `buffers` while running `f`, restoring their previous state
    /// after.
    fn scoped(
        &mut self,
        buffers: &[BufferId],
        f: impl FnOnce(&mut Self) -> Result<(), InterpError>,
    ) -> Result<(), InterpError> {
        let mut saved = Vec::with_capacity(buffers.len());
        for &b in buffers {
            let zeros = vec![0; self.program.buffer(b).len()];
            saved.push((b, self.memory.buffers[b.index()].replace(zeros)));
        }
        let result = f(self);
        for (b, previous) in saved.into_iter().rev() {
            self.memory.buffers[b.index()] = previous;
        }
        result
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::program_from_source;

    #[test]
    fn computes_row_sums() {
        let program = program_from_source(
            "buffer A: i32[2, 3]; buffer B: i32[2];
             for i in 0..2 {
               block sum { init { B[i] = 0; } for k in 0..3 { B[i] = B[i] + A[i, k]; } }
             }",
        )
        .unwrap();
        let memory = execute(&program, 7).unwrap();
        let a = memory.global(&program, "A").unwrap().to_vec();
        let b = memory.global(&program, "B").unwrap();
        assert_eq!(b, &[a[0] + a[1] + a[2], a[3] + a[4] + a[5]]);
    }

    #[test]
    fn seeding_is_deterministic_and_by_name() {
        let p1 = program_from_source("buffer A: i32[8]; buffer B: i32[8];").unwrap();
        let p2 = program_from_source("buffer B: i32[8]; buffer A: i32[8];").unwrap();
        let m1 = Memory::seeded(&p1, 3);
        let m2 = Memory::seeded(&p2, 3);
        assert_eq!(m1.global(&p1, "A"), m2.global(&p2, "A"));
        assert_ne!(m1.global(&p1, "A"), Memory::seeded(&p1, 4).global(&p1, "A"));
    }

    #[test]
    fn out_of_bounds_is_reported() {
        let program =
            program_from_source("buffer A: i32[4]; for i in 0..5 { block a { A[i] = 1; } }").unwrap();
        let err = execute(&program, 1).unwrap_err();
        assert_eq!(
            err,
            InterpError::OutOfBounds {
                buffer: "A".to_string(),
                index: vec![4]
            }
        );
    }

    #[test]
    fn locals_are_zero_filled_per_loop_entry() {
        let program = program_from_source(
            "buffer B: i32[3];
             for o in 0..3 {
               alloc S: i32[1];
               for i in 0..2 { block acc { S[0] = S[0] + 1; } }
               block out { B[o] = S[0]; }
             }",
        )
        .unwrap();
        let memory = execute(&program, 1).unwrap();
        assert_eq!(memory.global(&program, "B"), Some(&[2, 2, 2][..]));
    }

    #[test]
    fn i32_stores_wrap() {
        let program = program_from_source(
            "buffer A: i32[1]; for i in 0..1 { block a { A[0] = 2147483647 + 1; } }",
        )
        .unwrap();
        let memory = execute(&program, 1).unwrap();
        assert_eq!(memory.global(&program, "A"), Some(&[i32::MIN as i64][..]));
    }

    #[test]
    fn identical_programs_compare_equal() {
        let program = program_from_source(
            "buffer A: i32[4]; buffer B: i32[4];
             for i in 0..4 { block a { B[i] = A[i] * 2; } }",
        )
        .unwrap();
        assert!(compare_globals(&program, &program, 11).unwrap().is_empty());
    }
}
