//! Domain errors for trajectory lifecycle operations.

use uuid::Uuid;

/// Errors a caller must branch on when operating on trajectories.
///
/// These are usage errors, not transient faults: none of them is retryable
/// without the caller changing its request.
#[derive(Debug, Clone, PartialEq)]
pub enum TrajectoryError {
    /// The trajectory id was never seen by this collector.
    NotFound { trajectory_id: Uuid },
    /// The trajectory exists but has already reached a terminal status.
    NotActive { trajectory_id: Uuid },
    /// The active set is full and eviction freed no slots.
    CapacityExceeded { active: usize, limit: usize },
}

impl std::fmt::Display for TrajectoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrajectoryError::NotFound { trajectory_id } => {
                write!(f, "Trajectory {} not found", trajectory_id)
            }
            TrajectoryError::NotActive { trajectory_id } => {
                write!(f, "Trajectory {} is not active", trajectory_id)
            }
            TrajectoryError::CapacityExceeded { active, limit } => {
                write!(
                    f,
                    "Active trajectory capacity exceeded: {} of {} slots in use",
                    active, limit
                )
            }
        }
    }
}

impl std::error::Error for TrajectoryError {}
