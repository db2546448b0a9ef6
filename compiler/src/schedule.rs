// schedule.rs — Pipeline schedule report
//
// `PipelineSchedule` is the derived, transient summary of one pipelined
// loop: per-block stage/order, per-buffer rotation depth, and the step and
// iteration counts of the three emitted regions. It is computed fresh by the
// structure builder and only used for reporting (`--emit schedule`,
// `--emit schedule-json`) and tests.
//
// Preconditions: built by `build::build_pipeline` for an accepted loop.
// Postconditions: region iterations sum to `trip_count`.
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::ir::RegionKind;
use crate::rotation::RotationStrategy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledBlock {
    pub name: String,
    pub stage: u32,
    pub order: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BufferSchedule {
    pub name: String,
    pub depth: u64,
    pub strategy: RotationStrategy,
    pub stages: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionSummary {
    pub kind: RegionKind,
    /// First time step.
    pub min: i64,
    /// Number of time steps.
    pub extent: u64,
    /// Original iterations attributed to the region.
    pub iterations: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineSchedule {
    pub loop_id: u32,
    pub var: String,
    pub trip_count: u64,
    pub max_stage: u32,
    /// The annotation was reconciled against decomposed reductions.
    pub reconciled: bool,
    pub blocks: Vec<ScheduledBlock>,
    pub buffers: Vec<BufferSchedule>,
    pub regions: Vec<RegionSummary>,
}

impl PipelineSchedule {
    pub fn region(&self, kind: RegionKind) -> Option<&RegionSummary> {
        self.regions.iter().find(|r| r.kind == kind)
    }

    pub fn iterations(&self, kind: RegionKind) -> u64 {
        self.region(kind).map_or(0, |r| r.iterations)
    }

    pub fn total_iterations(&self) -> u64 {
        self.regions.iter().map(|r| r.iterations).sum()
    }

    pub fn depth_of(&self, buffer: &str) -> Option<u64> {
        self.buffers
            .iter()
            .find(|b| b.name == buffer)
            .map(|b| b.depth)
    }

    pub fn block(&self, name: &str) -> Option<&ScheduledBlock> {
        self.blocks.iter().find(|b| b.name == name)
    }
}

impl fmt::Display for PipelineSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "loop '{}' (#{}): trip count {}, stages 0..={}{}",
            self.var,
            self.loop_id,
            self.trip_count,
            self.max_stage,
            if self.reconciled { " (reconciled)" } else { "" }
        )?;

        let name_width = self.blocks.iter().map(|b| b.name.len()).max().unwrap_or(0);
        writeln!(f, "  blocks:")?;
        for b in &self.blocks {
            writeln!(
                f,
                "    {:<w$}  stage {}  order {}",
                b.name,
                b.stage,
                b.order,
                w = name_width
            )?;
        }

        if !self.buffers.is_empty() {
            writeln!(f, "  buffers:")?;
            for b in &self.buffers {
                let strategy = match b.strategy {
                    RotationStrategy::InPlace => "in-place",
                    RotationStrategy::Rotate => "rotate",
                };
                let stages: Vec<String> = b.stages.iter().map(|s| s.to_string()).collect();
                writeln!(
                    f,
                    "    {}  depth {}  {}  (stages {})",
                    b.name,
                    b.depth,
                    strategy,
                    stages.join(", ")
                )?;
            }
        }

        writeln!(f, "  regions:")?;
        for r in &self.regions {
            writeln!(
                f,
                "    {:<8}  t in {}..{}  iterations {}",
                r.kind.name(),
                r.min,
                r.min + r.extent as i64,
                r.iterations
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PipelineSchedule {
        PipelineSchedule {
            loop_id: 0,
            var: "i".to_string(),
            trip_count: 16,
            max_stage: 1,
            reconciled: false,
            blocks: vec![
                ScheduledBlock {
                    name: "load".to_string(),
                    stage: 0,
                    order: 0,
                },
                ScheduledBlock {
                    name: "compute".to_string(),
                    stage: 1,
                    order: 1,
                },
            ],
            buffers: vec![BufferSchedule {
                name: "S".to_string(),
                depth: 2,
                strategy: RotationStrategy::Rotate,
                stages: vec![0, 1],
            }],
            regions: vec![
                RegionSummary {
                    kind: RegionKind::Prologue,
                    min: 0,
                    extent: 1,
                    iterations: 1,
                },
                RegionSummary {
                    kind: RegionKind::Steady,
                    min: 1,
                    extent: 15,
                    iterations: 14,
                },
                RegionSummary {
                    kind: RegionKind::Epilogue,
                    min: 16,
                    extent: 1,
                    iterations: 1,
                },
            ],
        }
    }

    #[test]
    fn accessors() {
        let s = sample();
        assert_eq!(s.total_iterations(), 16);
        assert_eq!(s.iterations(RegionKind::Steady), 14);
        assert_eq!(s.depth_of("S"), Some(2));
        assert_eq!(s.depth_of("T"), None);
        assert_eq!(s.block("compute").map(|b| b.stage), Some(1));
    }

    #[test]
    fn display_report() {
        let text = sample().to_string();
        assert_eq!(
            text,
            "loop 'i' (#0): trip count 16, stages 0..=1\n\
             \x20 blocks:\n\
             \x20   load     stage 0  order 0\n\
             \x20   compute  stage 1  order 1\n\
             \x20 buffers:\n\
             \x20   S  depth 2  rotate  (stages 0, 1)\n\
             \x20 regions:\n\
             \x20   prologue  t in 0..1  iterations 1\n\
             \x20   steady    t in 1..16  iterations 14\n\
             \x20   epilogue  t in 16..17  iterations 1\n"
        );
    }

    #[test]
    fn json_uses_lowercase_kinds() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(json.contains("\"kind\":\"prologue\""), "{json}");
        assert!(json.contains("\"strategy\":\"rotate\""), "{json}");
    }
}
