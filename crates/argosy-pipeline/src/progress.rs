//! Stage progress notifications
//!
//! Front-ends observe a run through this seam: a stage reports when it
//! starts, each time one unit of its work settles, and when it is done.
//! The library stays free of terminal dependencies; rendering is the
//! observer's problem. `NullObserver` is the silent default everywhere.

/// Pipeline stages that report progress, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Catalog,
    Audit,
    Download,
    Convert,
    Merge,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Catalog => "catalog",
            Stage::Audit => "audit",
            Stage::Download => "download",
            Stage::Convert => "convert",
            Stage::Merge => "merge",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives coarse progress while a run executes
///
/// Calls arrive from worker tasks; implementations must be cheap and must
/// not block. Every method defaults to a no-op so observers implement
/// only what they render.
pub trait ProgressObserver: Send + Sync {
    /// A stage is starting; `total` is the number of work units when that
    /// is known up front, 0 otherwise.
    fn stage_started(&self, stage: Stage, total: u64) {
        let _ = (stage, total);
    }

    /// One unit of the stage's work reached a terminal state.
    fn item_finished(&self, stage: Stage) {
        let _ = stage;
    }

    /// The stage finished; `completed` counts the units that succeeded.
    fn stage_finished(&self, stage: Stage, completed: u64) {
        let _ = (stage, completed);
    }
}

/// Observer that discards every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl ProgressObserver for NullObserver {}
