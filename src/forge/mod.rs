//! Repository existence checks against the upstream forge.
//!
//! The reaper asks one question of the forge: does `owner/repository` still
//! publish a `.pages` file?  [`ExistenceOracle`] hides how that question is
//! answered so the reconciliation loop never deals with HTTP directly.

pub mod forgejo;

use anyhow::Result;

/// Definitive answer from the forge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    /// The repository still opts in to being served.
    Present,
    /// The forge answered "not found".
    Absent,
}

#[async_trait::async_trait]
pub trait ExistenceOracle: Send + Sync {
    /// Check whether `owner/repository` still opts in.
    ///
    /// `Err` means the forge gave no definitive answer (transport failure,
    /// timeout, unexpected status).  Callers must not treat it as
    /// [`Existence::Absent`].
    async fn exists(&self, owner: &str, repository: &str) -> Result<Existence>;
}
