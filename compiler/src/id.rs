// id.rs — Stable arena identifiers for swpc IR entities
//
// Buffers, blocks, variables and loops are stored in flat arenas and referred
// to by small integer ids. Ids are allocated in source order during resolve
// (and appended by later passes), so numbering is deterministic.

use serde::Serialize;

/// Index into `Program::buffers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BufferId(pub u32);

/// Index into `Program::blocks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BlockId(pub u32);

/// Index into `Program::vars`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VarId(pub u32);

/// Stable identifier for a loop. Not an arena index: loops are owned by
/// their parent statement list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LoopId(pub u32);

impl BufferId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl VarId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Allocator for loop ids. Buffer, block and var ids come from arena
/// lengths; loops have no arena, so they need an explicit counter.
#[derive(Debug, Default, Clone)]
pub struct IdAllocator {
    next_loop: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue numbering after an existing id (used when a program built
    /// elsewhere gains new loops).
    pub fn starting_after(last: Option<LoopId>) -> Self {
        Self {
            next_loop: last.map_or(0, |id| id.0 + 1),
        }
    }

    pub fn alloc_loop(&mut self) -> LoopId {
        let id = LoopId(self.next_loop);
        self.next_loop += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_ids_are_monotonic() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.alloc_loop(), LoopId(0));
        assert_eq!(ids.alloc_loop(), LoopId(1));
        assert_eq!(ids.alloc_loop(), LoopId(2));
    }

    #[test]
    fn starting_after_resumes_numbering() {
        let mut ids = IdAllocator::starting_after(Some(LoopId(4)));
        assert_eq!(ids.alloc_loop(), LoopId(5));
        let mut fresh = IdAllocator::starting_after(None);
        assert_eq!(fresh.alloc_loop(), LoopId(0));
    }
}
