use crate::BoxError;
use derive_more::Display;
use thiserror::Error;

/// The error returned when an [`AuditCollaborator`](super::AuditCollaborator) could not give an
/// answer.
#[derive(Debug, Error)]
#[error("collaborator error: {kind}")]
pub struct CollaboratorError {
    kind: ErrorKind,
    #[source]
    source: Option<BoxError>,
}

/// The kinds of failures a collaborator can report.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
pub enum ErrorKind {
    /// The collaborator is not reachable or not implemented for this operation.
    #[display("collaborator unavailable")]
    Unavailable,
    /// The collaborator did not answer in time.
    #[display("collaborator timed out")]
    TimedOut,
    /// The collaborator answered with something that could not be interpreted.
    #[display("unexpected collaborator response")]
    BadResponse,
}

impl CollaboratorError {
    /// Creates a new collaborator error with the given kind and source.
    pub fn new<E>(kind: ErrorKind, error: E) -> CollaboratorError
    where
        E: Into<BoxError>,
    {
        CollaboratorError {
            kind,
            source: Some(error.into()),
        }
    }

    /// Detailed information about what went wrong.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<ErrorKind> for CollaboratorError {
    fn from(kind: ErrorKind) -> CollaboratorError {
        CollaboratorError { kind, source: None }
    }
}
