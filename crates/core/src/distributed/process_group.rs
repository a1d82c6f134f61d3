//! Process group abstractions.
//!
//! A process group represents the fixed set of processes ("ranks") that
//! participate in collective operations. Membership is assigned externally
//! at initialization and is immutable for the lifetime of the process.

/// Trait for process group membership.
///
/// A process group manages rank assignment and provides the foundation
/// for collective communications. Ranks are arranged in a logical ring
/// by index for the ring-based collectives.
pub trait ProcessGroup: Send + Sync {
    /// Global rank of this process (0..world_size).
    fn rank(&self) -> usize;

    /// Total number of processes in the group. Always >= 1.
    fn world_size(&self) -> usize;

    /// Local rank on this node (for multi-node setups).
    fn local_rank(&self) -> usize;

    /// Whether this is the coordinator (rank 0).
    fn is_coordinator(&self) -> bool {
        self.rank() == 0
    }

    /// Whether this is a single-process group.
    fn is_single(&self) -> bool {
        self.world_size() == 1
    }

    /// Ring predecessor: `(rank - 1) mod world_size`.
    fn left_neighbor(&self) -> usize {
        (self.rank() + self.world_size() - 1) % self.world_size()
    }

    /// Ring successor: `(rank + 1) mod world_size`.
    fn right_neighbor(&self) -> usize {
        (self.rank() + 1) % self.world_size()
    }
}

/// Process group for single-process execution.
///
/// The simplest implementation, where world_size = 1 and every collective
/// degenerates to the identity.
#[derive(Debug, Clone)]
pub struct LocalProcessGroup {
    rank: usize,
    world_size: usize,
}

impl LocalProcessGroup {
    /// Create a new local process group (single process).
    pub fn new() -> Self {
        Self {
            rank: 0,
            world_size: 1,
        }
    }

    /// Create a local process group with specific rank/size.
    ///
    /// Useful for testing multi-rank logic without a transport.
    ///
    /// # Panics
    /// Panics if `rank >= world_size`.
    pub fn with_rank(rank: usize, world_size: usize) -> Self {
        assert!(rank < world_size, "rank must be < world_size");
        Self { rank, world_size }
    }
}

impl Default for LocalProcessGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessGroup for LocalProcessGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn local_rank(&self) -> usize {
        self.rank
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_pg_defaults() {
        let pg = LocalProcessGroup::new();
        assert_eq!(pg.rank(), 0);
        assert_eq!(pg.world_size(), 1);
        assert!(pg.is_coordinator());
        assert!(pg.is_single());
    }

    #[test]
    fn local_pg_with_rank() {
        let pg = LocalProcessGroup::with_rank(2, 4);
        assert_eq!(pg.rank(), 2);
        assert_eq!(pg.world_size(), 4);
        assert!(!pg.is_coordinator());
        assert!(!pg.is_single());
    }

    #[test]
    fn ring_neighbors_wrap() {
        let pg = LocalProcessGroup::with_rank(0, 4);
        assert_eq!(pg.left_neighbor(), 3);
        assert_eq!(pg.right_neighbor(), 1);

        let pg = LocalProcessGroup::with_rank(3, 4);
        assert_eq!(pg.left_neighbor(), 2);
        assert_eq!(pg.right_neighbor(), 0);
    }

    #[test]
    fn single_rank_ring_is_self() {
        let pg = LocalProcessGroup::new();
        assert_eq!(pg.left_neighbor(), 0);
        assert_eq!(pg.right_neighbor(), 0);
    }

    #[test]
    #[should_panic(expected = "rank must be < world_size")]
    fn invalid_rank_panics() {
        LocalProcessGroup::with_rank(5, 4);
    }
}
