// annotation.rs — Typed stage/order annotations on loops
//
// The scheduling phase attaches three string-keyed entries to a loop:
// per-block stages, per-block orders and the block count they were computed
// against (the version tag). This module converts between that raw form and
// `PipelineAnnotation`.
//
// Preconditions: none.
// Postconditions: `from_annotations` returns `Ok(None)` for loops with no
//                 pipeline annotation at all.
// Failure modes: malformed entries produce `InvalidAnnotation`. Length
//                checks belong to the validator, not here.
// Side effects: none.

use std::fmt::Write;

use serde::Serialize;

use crate::error::{LoopRef, PipelineError};
use crate::ir::{AnnotationValue, Annotations};

pub const STAGE_KEY: &str = "software_pipeline_stage";
pub const ORDER_KEY: &str = "software_pipeline_order";
pub const BLOCK_COUNT_KEY: &str = "software_pipeline_block_count";

/// Keys owned by the pipeline pass. None survive a successful rewrite.
pub const PIPELINE_KEYS: [&str; 3] = [STAGE_KEY, ORDER_KEY, BLOCK_COUNT_KEY];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineAnnotation {
    pub stages: Vec<u32>,
    pub orders: Vec<u32>,
    /// Number of direct child blocks the arrays were computed for.
    pub computed_for: usize,
}

impl PipelineAnnotation {
    pub fn new(stages: Vec<u32>, orders: Vec<u32>) -> Self {
        let computed_for = stages.len();
        Self {
            stages,
            orders,
            computed_for,
        }
    }

    /// True if any pipeline key is present.
    pub fn is_annotated(annotations: &Annotations) -> bool {
        annotations.contains_key(STAGE_KEY) || annotations.contains_key(ORDER_KEY)
    }

    /// Parse the raw annotation entries of a loop.
    pub fn from_annotations(
        annotations: &Annotations,
        loop_ref: &LoopRef,
    ) -> Result<Option<Self>, PipelineError> {
        let invalid = |reason: String| PipelineError::InvalidAnnotation {
            loop_ref: loop_ref.clone(),
            reason,
            snapshot: snapshot(annotations),
        };

        let (stage, order) = match (annotations.get(STAGE_KEY), annotations.get(ORDER_KEY)) {
            (None, None) => return Ok(None),
            (Some(s), Some(o)) => (s, o),
            (Some(_), None) => return Err(invalid(format!("'{STAGE_KEY}' without '{ORDER_KEY}'"))),
            (None, Some(_)) => return Err(invalid(format!("'{ORDER_KEY}' without '{STAGE_KEY}'"))),
        };

        let stages = int_list(stage, STAGE_KEY).map_err(invalid)?;
        let orders = int_list(order, ORDER_KEY).map_err(invalid)?;

        let computed_for = match annotations.get(BLOCK_COUNT_KEY) {
            None => stages.len(),
            Some(AnnotationValue::Int(n)) if *n >= 0 => *n as usize,
            Some(other) => {
                return Err(invalid(format!(
                    "'{BLOCK_COUNT_KEY}' must be a non-negative integer, found {}",
                    render_value(other)
                )))
            }
        };

        Ok(Some(Self {
            stages,
            orders,
            computed_for,
        }))
    }

    /// Write all three entries, replacing any existing ones.
    pub fn attach(&self, annotations: &mut Annotations) {
        annotations.insert(
            STAGE_KEY.to_string(),
            AnnotationValue::Ints(self.stages.iter().map(|&s| s as i64).collect()),
        );
        annotations.insert(
            ORDER_KEY.to_string(),
            AnnotationValue::Ints(self.orders.iter().map(|&o| o as i64).collect()),
        );
        annotations.insert(
            BLOCK_COUNT_KEY.to_string(),
            AnnotationValue::Int(self.computed_for as i64),
        );
    }

    pub fn strip(annotations: &mut Annotations) {
        for key in PIPELINE_KEYS {
            annotations.remove(key);
        }
    }

    /// Duplicate entry `pos` for a new sibling inserted right before it.
    ///
    /// The copy keeps the stage. Orders are re-ranked so that they remain a
    /// permutation and the new entry runs immediately before the original.
    /// `self.orders` must already be a permutation and `pos` in range.
    pub fn split_entry(&self, pos: usize) -> Self {
        let pivot = self.orders[pos];
        let mut stages = Vec::with_capacity(self.stages.len() + 1);
        let mut orders = Vec::with_capacity(self.orders.len() + 1);
        for (k, (&stage, &order)) in self.stages.iter().zip(&self.orders).enumerate() {
            if k == pos {
                stages.extend([stage, stage]);
                orders.extend([pivot, pivot + 1]);
            } else {
                stages.push(stage);
                orders.push(if order > pivot { order + 1 } else { order });
            }
        }
        Self {
            stages,
            orders,
            computed_for: self.computed_for + 1,
        }
    }
}

/// Human-readable rendering of the pipeline entries, for error context.
pub fn snapshot(annotations: &Annotations) -> String {
    let mut out = String::new();
    for key in PIPELINE_KEYS {
        if let Some(value) = annotations.get(key) {
            if !out.is_empty() {
                out.push(' ');
            }
            let _ = write!(out, "{key}={}", render_value(value));
        }
    }
    if out.is_empty() {
        out.push_str("<none>");
    }
    out
}

pub fn render_value(value: &AnnotationValue) -> String {
    match value {
        AnnotationValue::Int(n) => n.to_string(),
        AnnotationValue::Ints(items) => {
            let parts: Vec<String> = items.iter().map(|n| n.to_string()).collect();
            format!("[{}]", parts.join(", "))
        }
        AnnotationValue::Str(s) => format!("{s:?}"),
    }
}

fn int_list(value: &AnnotationValue, key: &str) -> Result<Vec<u32>, String> {
    let AnnotationValue::Ints(items) = value else {
        return Err(format!(
            "'{key}' must be an integer list, found {}",
            render_value(value)
        ));
    };
    items
        .iter()
        .map(|&n| {
            u32::try_from(n).map_err(|_| format!("'{key}' entry {n} is not a non-negative integer"))
        })
        .collect()
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;
    use crate::id::LoopId;
    use chumsky::span::Span as _;

    fn loop_ref() -> LoopRef {
        LoopRef {
            id: LoopId(0),
            var: "i".to_string(),
            span: Span::new((), 0..0),
        }
    }

    fn ints(items: &[i64]) -> AnnotationValue {
        AnnotationValue::Ints(items.to_vec())
    }

    #[test]
    fn absent_annotation_is_none() {
        let ann = Annotations::new();
        assert_eq!(
            PipelineAnnotation::from_annotations(&ann, &loop_ref()),
            Ok(None)
        );
        assert!(!PipelineAnnotation::is_annotated(&ann));
    }

    #[test]
    fn block_count_defaults_to_array_length() {
        let mut ann = Annotations::new();
        ann.insert(STAGE_KEY.into(), ints(&[0, 1, 1]));
        ann.insert(ORDER_KEY.into(), ints(&[0, 1, 2]));
        let parsed = PipelineAnnotation::from_annotations(&ann, &loop_ref())
            .unwrap()
            .unwrap();
        assert_eq!(parsed.computed_for, 3);
        assert_eq!(parsed.stages, vec![0, 1, 1]);
    }

    #[test]
    fn negative_stage_is_invalid() {
        let mut ann = Annotations::new();
        ann.insert(STAGE_KEY.into(), ints(&[0, -1]));
        ann.insert(ORDER_KEY.into(), ints(&[0, 1]));
        let err = PipelineAnnotation::from_annotations(&ann, &loop_ref()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidAnnotation { .. }));
    }

    #[test]
    fn stage_without_order_is_invalid() {
        let mut ann = Annotations::new();
        ann.insert(STAGE_KEY.into(), ints(&[0]));
        let err = PipelineAnnotation::from_annotations(&ann, &loop_ref()).unwrap_err();
        let PipelineError::InvalidAnnotation { reason, .. } = err else {
            panic!("expected InvalidAnnotation")
        };
        assert!(reason.contains("without"), "{reason}");
    }

    #[test]
    fn attach_then_strip_leaves_other_keys() {
        let mut ann = Annotations::new();
        ann.insert("note".into(), AnnotationValue::Str("keep".into()));
        PipelineAnnotation::new(vec![0, 1], vec![1, 0]).attach(&mut ann);
        assert_eq!(ann.get(BLOCK_COUNT_KEY), Some(&AnnotationValue::Int(2)));
        PipelineAnnotation::strip(&mut ann);
        assert_eq!(ann.len(), 1);
        assert!(ann.contains_key("note"));
    }

    #[test]
    fn split_entry_keeps_stage_and_reranks_orders() {
        // Blocks: load (stage 0, order 0), compute (stage 1, order 2),
        // store (stage 1, order 1). Split compute into init + update.
        let ann = PipelineAnnotation::new(vec![0, 1, 1], vec![0, 2, 1]);
        let split = ann.split_entry(1);
        assert_eq!(split.stages, vec![0, 1, 1, 1]);
        assert_eq!(split.orders, vec![0, 2, 3, 1]);
        assert_eq!(split.computed_for, 4);
    }

    #[test]
    fn snapshot_lists_present_keys() {
        let mut ann = Annotations::new();
        ann.insert(STAGE_KEY.into(), ints(&[0, 1]));
        ann.insert(ORDER_KEY.into(), ints(&[0, 1]));
        ann.insert(BLOCK_COUNT_KEY.into(), AnnotationValue::Int(2));
        assert_eq!(
            snapshot(&ann),
            "software_pipeline_stage=[0, 1] software_pipeline_order=[0, 1] software_pipeline_block_count=2"
        );
    }
}
