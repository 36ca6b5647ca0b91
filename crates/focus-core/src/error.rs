//! Error types for core operations

use focus_api::DenialReason;
use focus_store::StoreError;
use thiserror::Error;

use crate::TransitionError;

/// Error returned by controller and monitor operations
#[derive(Debug, Error)]
pub enum FocusError {
    #[error("Admission denied: {}", join_reasons(.0))]
    AdmissionDenied(Vec<DenialReason>),

    #[error("Invalid transition: {0}")]
    Transition(TransitionError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Store kept changing, gave up after {0} attempts")]
    Contention(u32),
}

impl FocusError {
    pub fn is_admission_denied(&self) -> bool {
        matches!(self, FocusError::AdmissionDenied(_))
    }
}

impl From<TransitionError> for FocusError {
    fn from(e: TransitionError) -> Self {
        // Creation conflicts are business-rule rejections, not bugs
        match e {
            TransitionError::SessionActive { active } => {
                FocusError::AdmissionDenied(vec![DenialReason::SessionActive {
                    session_id: active,
                }])
            }
            TransitionError::DuplicateId(session_id) => {
                FocusError::AdmissionDenied(vec![DenialReason::DuplicateSession { session_id }])
            }
            other => FocusError::Transition(other),
        }
    }
}

fn join_reasons(reasons: &[DenialReason]) -> String {
    reasons
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type FocusResult<T> = Result<T, FocusError>;

