//! Splitting policy: how a job of `size` items is scattered
//!
//! Jobs above the minimum partition size are carved into sub-jobs of
//! `max(size / min, min)` items, the last one taking whatever remains.
//! Jobs at or below it are dispatched as individual leaf tasks.

use crate::core::errors::{Result, ScatterError};

/// Default `MinPartitionSize`
pub const DEFAULT_MIN_PARTITION_SIZE: u64 = 10;

/// Smallest usable minimum partition size. Below it a split yields a single
/// child as large as its parent and the tree never bottoms out.
pub const MIN_PARTITION_FLOOR: u64 = 2;

/// What a coordinator does with a freshly started job
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScatterPlan {
    /// Spawn one child coordinator per entry, each with that many items
    Split(Vec<u64>),
    /// Dispatch this many leaf tasks directly
    Leaves(u64),
}

impl ScatterPlan {
    /// Total items covered by the plan
    pub fn total(&self) -> u64 {
        match self {
            ScatterPlan::Split(sizes) => sizes.iter().sum(),
            ScatterPlan::Leaves(count) => *count,
        }
    }
}

/// Reject a minimum partition size that would never shrink a job
pub fn check_min_partition_size(min_partition_size: u64) -> Result<()> {
    if min_partition_size < MIN_PARTITION_FLOOR {
        return Err(ScatterError::configuration(format!(
            "min_partition_size must be at least {}, got {}",
            MIN_PARTITION_FLOOR, min_partition_size
        )));
    }
    Ok(())
}

/// Decide between the split path and the leaf path
pub fn plan(size: u64, min_partition_size: u64) -> Result<ScatterPlan> {
    check_min_partition_size(min_partition_size)?;
    if size > min_partition_size {
        Ok(ScatterPlan::Split(partition_sizes(size, min_partition_size)?))
    } else {
        Ok(ScatterPlan::Leaves(size))
    }
}

/// Sub-job sizes for the split path.
///
/// The partition size is computed once from the original `size`, not from the
/// remainder, so only the last partition can be smaller.
pub fn partition_sizes(size: u64, min_partition_size: u64) -> Result<Vec<u64>> {
    check_min_partition_size(min_partition_size)?;
    let partition_size = (size / min_partition_size).max(min_partition_size);

    let mut sizes = Vec::with_capacity((size / partition_size + 1) as usize);
    let mut scheduled = 0;
    while scheduled < size {
        let next = partition_size.min(size - scheduled);
        sizes.push(next);
        scheduled += next;
    }
    Ok(sizes)
}
