use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "essaystatus", rename_all = "lowercase")]
pub(crate) enum EssayStatus {
    Pending,
    Processing,
    Correcting,
    Completed,
    Failed,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "correctionstatus", rename_all = "lowercase")]
pub(crate) enum CorrectionStatus {
    Pending,
    Processing,
    Correcting,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "correctiontype", rename_all = "lowercase")]
pub(crate) enum CorrectionType {
    Automated,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "jobstatus", rename_all = "lowercase")]
pub(crate) enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Dead,
}

/// Coarse lifecycle phase shared by an essay and its correction. The two
/// records may sit in different statuses within the queued phase
/// (PENDING vs PROCESSING) but must never disagree on the phase itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecyclePhase {
    Queued,
    Correcting,
    Completed,
    Failed,
}

impl EssayStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            EssayStatus::Pending => "pending",
            EssayStatus::Processing => "processing",
            EssayStatus::Correcting => "correcting",
            EssayStatus::Completed => "completed",
            EssayStatus::Failed => "failed",
            EssayStatus::Archived => "archived",
        }
    }

    /// Legal successor states. Anything not listed here is rejected by the
    /// transition primitive.
    pub(crate) fn can_transition_to(self, to: EssayStatus) -> bool {
        use EssayStatus::*;
        match self {
            Pending => matches!(to, Processing | Correcting | Failed),
            Processing => matches!(to, Correcting | Failed | Pending),
            Correcting => matches!(to, Completed | Failed),
            Completed => matches!(to, Archived),
            Failed => matches!(to, Pending | Processing),
            Archived => false,
        }
    }

    pub(crate) fn phase(self) -> LifecyclePhase {
        match self {
            EssayStatus::Pending | EssayStatus::Processing => LifecyclePhase::Queued,
            EssayStatus::Correcting => LifecyclePhase::Correcting,
            // An essay is only archivable once completed, so both map to the
            // completed phase and pair with a COMPLETED correction.
            EssayStatus::Completed | EssayStatus::Archived => LifecyclePhase::Completed,
            EssayStatus::Failed => LifecyclePhase::Failed,
        }
    }

    /// The correction status that keeps the pair in the same phase when the
    /// essay moves to `self`.
    pub(crate) fn correction_counterpart(self) -> CorrectionStatus {
        match self {
            EssayStatus::Pending => CorrectionStatus::Pending,
            EssayStatus::Processing => CorrectionStatus::Processing,
            EssayStatus::Correcting => CorrectionStatus::Correcting,
            EssayStatus::Completed | EssayStatus::Archived => CorrectionStatus::Completed,
            EssayStatus::Failed => CorrectionStatus::Failed,
        }
    }

    #[allow(dead_code)]
    pub(crate) fn is_terminal(self) -> bool {
        matches!(self, EssayStatus::Archived)
    }
}

impl CorrectionStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            CorrectionStatus::Pending => "pending",
            CorrectionStatus::Processing => "processing",
            CorrectionStatus::Correcting => "correcting",
            CorrectionStatus::Completed => "completed",
            CorrectionStatus::Failed => "failed",
        }
    }

    #[allow(dead_code)]
    pub(crate) fn can_transition_to(self, to: CorrectionStatus) -> bool {
        use CorrectionStatus::*;
        match self {
            Pending => matches!(to, Processing | Correcting | Failed),
            Processing => matches!(to, Correcting | Failed | Pending),
            Correcting => matches!(to, Completed | Failed),
            Completed => false,
            Failed => matches!(to, Pending | Processing),
        }
    }

    pub(crate) fn phase(self) -> LifecyclePhase {
        match self {
            CorrectionStatus::Pending | CorrectionStatus::Processing => LifecyclePhase::Queued,
            CorrectionStatus::Correcting => LifecyclePhase::Correcting,
            CorrectionStatus::Completed => LifecyclePhase::Completed,
            CorrectionStatus::Failed => LifecyclePhase::Failed,
        }
    }
}

impl std::fmt::Display for EssayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for CorrectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
