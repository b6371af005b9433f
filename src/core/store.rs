use anyhow::Result;
use async_trait::async_trait;
use log::warn;

use crate::core::state::{Artifact, SourceContent};

/// Current source of a chapter together with the revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSnapshot {
    pub content: SourceContent,
    pub revision: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Applied,
    /// The chapter's source changed since the artifact's generation started.
    Stale,
}

/// Where generated artifacts land.
///
/// A commit replaces the whole artifact field for its kind; nothing is merged
/// inside a field.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn source(&self, chapter_id: &str) -> Result<Option<SourceSnapshot>>;

    async fn commit(
        &self,
        chapter_id: &str,
        source_revision: u64,
        artifact: Artifact,
    ) -> Result<CommitOutcome>;
}

/// Publish point bound to one chapter and the source revision being worked on.
#[derive(Clone, Copy)]
pub struct CommitTarget<'a> {
    store: &'a dyn ArtifactStore,
    chapter_id: &'a str,
    revision: u64,
}

impl<'a> CommitTarget<'a> {
    pub fn new(store: &'a dyn ArtifactStore, chapter_id: &'a str, revision: u64) -> Self {
        Self {
            store,
            chapter_id,
            revision,
        }
    }

    pub fn chapter_id(&self) -> &str {
        self.chapter_id
    }

    pub async fn publish(&self, artifact: Artifact) -> Result<CommitOutcome> {
        let kind = artifact.kind();
        let outcome = self.store.commit(self.chapter_id, self.revision, artifact).await?;
        if outcome == CommitOutcome::Stale {
            warn!(
                "Discarded {} for chapter {}: source changed during generation",
                kind, self.chapter_id
            );
        }
        Ok(outcome)
    }
}
