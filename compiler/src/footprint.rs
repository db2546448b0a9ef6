// footprint.rs — Buffer access regions of blocks inside a candidate loop
//
// Summarizes each load and store of a block, per buffer dimension, as an
// interval that moves with the pipelined induction variable:
//
//   [coeff·iv + Σ outer + lo, coeff·iv + Σ outer + hi]
//
// Grid variables are folded into `[lo, hi]`; variables of enclosing loops
// stay symbolic in `outer`. Conflict tests between two regions at an
// iteration distance are solved exactly over the loop's iteration range.
//
// Preconditions: `iv` is the induction variable of the loop owning the block.
// Postconditions: every buffer element a block instance may touch lies inside
//                 one of its regions.
// Failure modes: none; data-dependent control is reported as a flag.
// Side effects: none.

use crate::id::{BufferId, VarId};
use crate::ir::{Block, Expr, Index, Op};

/// One dimension of an access region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimRange {
    /// Coefficient of the pipelined induction variable.
    pub coeff: i64,
    /// Enclosing-loop variable terms, sorted by var.
    pub outer: Vec<(VarId, i64)>,
    /// Inclusive bounds of the grid-folded remainder.
    pub lo: i64,
    pub hi: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRegion {
    pub buffer: BufferId,
    pub dims: Vec<DimRange>,
    /// Every point of the box is accessed (unconditionally).
    pub exact: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockFootprint {
    pub reads: Vec<AccessRegion>,
    pub writes: Vec<AccessRegion>,
    /// Some `If` condition loads from a buffer.
    pub data_dependent_control: bool,
}

impl BlockFootprint {
    pub fn touches(&self, buffer: BufferId) -> bool {
        self.reads
            .iter()
            .chain(&self.writes)
            .any(|r| r.buffer == buffer)
    }
}

/// Extract the footprint of `block` with respect to induction variable `iv`.
pub fn block_footprint(block: &Block, iv: VarId) -> BlockFootprint {
    let mut walker = Walker {
        iv,
        grids: Vec::new(),
        conditional: 0,
        out: BlockFootprint::default(),
    };
    for op in block.ops() {
        walker.op(op);
    }
    walker.out
}

struct Walker {
    iv: VarId,
    /// Active grid variables with inclusive ranges.
    grids: Vec<(VarId, i64, i64)>,
    conditional: usize,
    out: BlockFootprint,
}

impl Walker {
    fn op(&mut self, op: &Op) {
        match op {
            Op::Store {
                buffer,
                indices,
                value,
            } => {
                self.expr(value);
                let region = self.region(*buffer, indices);
                self.out.writes.push(region);
            }
            Op::Grid {
                var,
                min,
                extent,
                body,
            } => {
                if *extent == 0 {
                    return;
                }
                let hi = min.saturating_add(*extent as i64 - 1);
                self.grids.push((*var, *min, hi));
                for inner in body {
                    self.op(inner);
                }
                self.grids.pop();
            }
            Op::If { cond, then } => {
                if cond.loads() {
                    self.out.data_dependent_control = true;
                }
                self.expr(cond);
                self.conditional += 1;
                for inner in then {
                    self.op(inner);
                }
                self.conditional -= 1;
            }
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Int(_) | Expr::Var(_) => {}
            Expr::Load { buffer, indices } => {
                let region = self.region(*buffer, indices);
                self.out.reads.push(region);
            }
            Expr::Binary { lhs, rhs, .. } => {
                self.expr(lhs);
                self.expr(rhs);
            }
            Expr::Neg(inner) => self.expr(inner),
        }
    }

    fn region(&self, buffer: BufferId, indices: &[Index]) -> AccessRegion {
        let mut exact = self.conditional == 0;
        let mut used_grids: Vec<VarId> = Vec::new();
        let mut dims = Vec::with_capacity(indices.len());

        for idx in indices {
            match idx {
                Index::Affine(a) => {
                    let mut dim = DimRange {
                        coeff: a.coeff(self.iv),
                        outer: Vec::new(),
                        lo: a.constant,
                        hi: a.constant,
                    };
                    let mut grid_terms = 0;
                    for &(v, c) in &a.terms {
                        if v == self.iv {
                            continue;
                        }
                        match self.grids.iter().rev().find(|(g, _, _)| *g == v) {
                            Some(&(_, glo, ghi)) => {
                                let (a, b) = (c.saturating_mul(glo), c.saturating_mul(ghi));
                                dim.lo = dim.lo.saturating_add(a.min(b));
                                dim.hi = dim.hi.saturating_add(a.max(b));
                                grid_terms += 1;
                                if c.abs() != 1 || used_grids.contains(&v) {
                                    exact = false;
                                }
                                used_grids.push(v);
                            }
                            None => dim.outer.push((v, c)),
                        }
                    }
                    if grid_terms > 1 {
                        exact = false;
                    }
                    dims.push(dim);
                }
                Index::Rotate { depth, .. } => {
                    exact = false;
                    dims.push(DimRange {
                        coeff: 0,
                        outer: Vec::new(),
                        lo: 0,
                        hi: *depth as i64 - 1,
                    });
                }
            }
        }

        AccessRegion {
            buffer,
            dims,
            exact,
        }
    }
}

// ── Conflict tests ──────────────────────────────────────────────────────────

/// Can region `a` of iteration `j` and region `b` of iteration `j + delta`
/// touch a common element, for some `j` with both iterations in range?
///
/// Dimensions whose symbolic outer terms differ are treated as overlapping.
pub fn may_conflict(a: &AccessRegion, b: &AccessRegion, delta: u64, min: i64, trip: u64) -> bool {
    if a.buffer != b.buffer {
        return false;
    }
    if trip <= delta {
        return false;
    }
    if a.dims.len() != b.dims.len() {
        return true;
    }

    // Feasible values of a's induction variable.
    let mut lo = min as i128;
    let mut hi = min as i128 + (trip - delta) as i128 - 1;
    let delta = delta as i128;

    for (da, db) in a.dims.iter().zip(&b.dims) {
        if da.outer != db.outer {
            continue;
        }
        let (ca, cb) = (da.coeff as i128, db.coeff as i128);
        // ca·i + lo_a <= cb·(i+δ) + hi_b
        restrict(&mut lo, &mut hi, ca - cb, cb * delta + db.hi as i128 - da.lo as i128);
        // cb·(i+δ) + lo_b <= ca·i + hi_a
        restrict(&mut lo, &mut hi, cb - ca, da.hi as i128 - cb * delta - db.lo as i128);
        if lo > hi {
            return false;
        }
    }
    lo <= hi
}

/// Intersect `[lo, hi]` with `{ i | k·i <= r }`.
fn restrict(lo: &mut i128, hi: &mut i128, k: i128, r: i128) {
    if k > 0 {
        *hi = (*hi).min(r.div_euclid(k));
    } else if k < 0 {
        *lo = (*lo).max(-(r.div_euclid(-k)));
    } else if r < 0 {
        *lo = 1;
        *hi = 0;
    }
}

/// Does the exact write `w` include every element of read `r` in the same
/// iteration?
pub fn covers(w: &AccessRegion, r: &AccessRegion) -> bool {
    w.buffer == r.buffer
        && w.exact
        && w.dims.len() == r.dims.len()
        && w.dims.iter().zip(&r.dims).all(|(dw, dr)| {
            dw.coeff == dr.coeff && dw.outer == dr.outer && dw.lo <= dr.lo && dr.hi <= dw.hi
        })
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn dim(coeff: i64, lo: i64, hi: i64) -> DimRange {
        DimRange {
            coeff,
            outer: Vec::new(),
            lo,
            hi,
        }
    }

    fn region(dims: Vec<DimRange>) -> AccessRegion {
        AccessRegion {
            buffer: BufferId(0),
            dims,
            exact: true,
        }
    }

    #[test]
    fn same_element_conflicts_only_at_distance_zero() {
        // X[i] vs X[i]
        let a = region(vec![dim(1, 0, 0)]);
        assert!(may_conflict(&a, &a, 0, 0, 16));
        assert!(!may_conflict(&a, &a, 1, 0, 16));
    }

    #[test]
    fn shifted_read_conflicts_at_its_distance() {
        // write X[i], read X[i - 2] two iterations later hits the same element
        let w = region(vec![dim(1, 0, 0)]);
        let r = region(vec![dim(1, -2, -2)]);
        assert!(!may_conflict(&w, &r, 1, 0, 16));
        assert!(may_conflict(&w, &r, 2, 0, 16));
    }

    #[test]
    fn distance_beyond_trip_count_never_conflicts() {
        let a = region(vec![dim(0, 0, 0)]);
        assert!(may_conflict(&a, &a, 3, 0, 4));
        assert!(!may_conflict(&a, &a, 4, 0, 4));
    }

    #[test]
    fn scalar_accumulator_conflicts_at_every_distance() {
        // sum[0] is touched by every iteration
        let a = region(vec![dim(0, 0, 0)]);
        for delta in 0..8 {
            assert!(may_conflict(&a, &a, delta, 0, 8));
        }
    }

    #[test]
    fn disjoint_tiles_do_not_conflict() {
        // iteration i touches [4i, 4i + 3]
        let a = region(vec![dim(4, 0, 3)]);
        assert!(may_conflict(&a, &a, 0, 0, 8));
        assert!(!may_conflict(&a, &a, 1, 0, 8));
    }

    #[test]
    fn differing_outer_terms_are_conservative() {
        let mut a = region(vec![dim(1, 0, 0)]);
        let b = region(vec![dim(1, 100, 100)]);
        a.dims[0].outer = vec![(VarId(9), 1)];
        assert!(may_conflict(&a, &b, 1, 0, 4));
    }

    #[test]
    fn covers_requires_containment_and_exactness() {
        let w = region(vec![dim(0, 0, 7)]);
        let r = region(vec![dim(0, 2, 5)]);
        assert!(covers(&w, &r));
        assert!(!covers(&r, &w));
        let mut inexact = w.clone();
        inexact.exact = false;
        assert!(!covers(&inexact, &r));
    }
}
