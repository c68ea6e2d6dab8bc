use anyhow::Error as AnyError;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Enumerates the unit-of-work types dispatched to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Probe,
    Process,
    ApplyNew,
    ApplyUpdate,
    Unrank,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Probe => "probe",
            TaskKind::Process => "process",
            TaskKind::ApplyNew => "apply_new",
            TaskKind::ApplyUpdate => "apply_update",
            TaskKind::Unrank => "unrank",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum TaskErrorReason {
    /// The soft limit fired and the task aborted cooperatively.
    SoftTimeout { limit: Duration },
    /// The task ignored its soft limit and was dropped at the hard limit.
    HardTimeout { limit: Duration },
    Cancelled,
    Failed(AnyError),
}

/// Error surfaced by a unit of work, tagged with the kind that produced it.
#[derive(Debug)]
pub struct TaskError {
    kind: TaskKind,
    reason: TaskErrorReason,
}

impl TaskError {
    pub fn failed(kind: TaskKind, source: AnyError) -> Self {
        Self {
            kind,
            reason: TaskErrorReason::Failed(source),
        }
    }

    pub fn soft_timeout(kind: TaskKind, limit: Duration) -> Self {
        Self {
            kind,
            reason: TaskErrorReason::SoftTimeout { limit },
        }
    }

    pub fn hard_timeout(kind: TaskKind, limit: Duration) -> Self {
        Self {
            kind,
            reason: TaskErrorReason::HardTimeout { limit },
        }
    }

    pub fn cancelled(kind: TaskKind) -> Self {
        Self {
            kind,
            reason: TaskErrorReason::Cancelled,
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn reason(&self) -> &TaskErrorReason {
        &self.reason
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self.reason,
            TaskErrorReason::SoftTimeout { .. } | TaskErrorReason::HardTimeout { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.reason, TaskErrorReason::Cancelled)
    }

    pub fn into_source(self) -> AnyError {
        match self.reason {
            TaskErrorReason::Failed(source) => source,
            _ => AnyError::new(self),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            TaskErrorReason::SoftTimeout { limit } => {
                write!(f, "{} task exceeded soft time limit of {limit:?}", self.kind)
            }
            TaskErrorReason::HardTimeout { limit } => {
                write!(f, "{} task killed at hard time limit of {limit:?}", self.kind)
            }
            TaskErrorReason::Cancelled => write!(f, "{} task cancelled", self.kind),
            TaskErrorReason::Failed(source) => write!(f, "{} task failed: {source:#}", self.kind),
        }
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.reason {
            TaskErrorReason::Failed(source) => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Per-attempt context handed to a task operation.
///
/// The token is cancelled when the soft time limit fires (or the executor shuts
/// down); operations should check it between steps and bail out promptly.
#[derive(Debug, Clone)]
pub struct TaskContext {
    kind: TaskKind,
    attempt: usize,
    cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(kind: TaskKind, attempt: usize, cancel: CancellationToken) -> Self {
        Self {
            kind,
            attempt,
            cancel,
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}
