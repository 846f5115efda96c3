//! Core traits and types shared by libmigauth and its collaborator adapters.
//!
//! The decision engine itself lives in `libmigauth`. This crate only carries the pieces an
//! adapter for the external audit / rate-limit service needs to compile against: the
//! [`AuditCollaborator`](audit::AuditCollaborator) trait, the [`AttemptFlags`](audit::AttemptFlags)
//! reported for every login attempt and the [`Secret`](secret::Secret) wrapper that keeps
//! presented passwords out of logs.

pub mod audit;
pub mod secret;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
