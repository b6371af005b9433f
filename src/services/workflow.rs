use anyhow::Context;
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;

use crate::core::config::Config;
use crate::core::error::PipelineError;
use crate::core::io::Storage;
use crate::core::state::{Artifact, ArtifactKind, Chapter, PanelImage};
use crate::core::store::{ArtifactStore, CommitOutcome, CommitTarget};
use crate::services::generator::ArtifactGenerator;
use crate::services::llm::GenerativeBackend;
use crate::services::manga::{MangaOrchestrator, PanelPolicy};
use crate::services::prompts::GenerationParams;
use crate::utils::data_uri;

/// Runs one generation request for a chapter and commits the result.
pub struct WorkflowManager {
    generator: ArtifactGenerator,
    orchestrator: MangaOrchestrator,
    store: Arc<dyn ArtifactStore>,
    storage: Arc<dyn Storage>,
}

impl WorkflowManager {
    pub fn new(
        config: &Config,
        backend: Arc<dyn GenerativeBackend>,
        store: Arc<dyn ArtifactStore>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let generator = ArtifactGenerator::new(backend, config.llm.models());
        let orchestrator =
            MangaOrchestrator::new(generator.clone(), PanelPolicy::from(&config.manga));
        Self {
            generator,
            orchestrator,
            store,
            storage,
        }
    }

    pub async fn generate(
        &self,
        chapter_id: &str,
        kind: ArtifactKind,
    ) -> Result<Artifact, PipelineError> {
        let snapshot = self
            .store
            .source(chapter_id)
            .await?
            .ok_or_else(|| PipelineError::MissingSource {
                chapter_id: chapter_id.to_string(),
            })?;
        let target = CommitTarget::new(self.store.as_ref(), chapter_id, snapshot.revision);

        match kind {
            ArtifactKind::MangaScript => {
                let panels = self.orchestrator.run(&snapshot.content, target).await?;
                Ok(Artifact::MangaScript(panels))
            }
            ArtifactKind::Summary | ArtifactKind::Quiz | ArtifactKind::Flashcards => {
                let artifact = self
                    .generator
                    .generate(&snapshot.content, kind, &GenerationParams::default())
                    .await?;
                match target.publish(artifact.clone()).await? {
                    CommitOutcome::Applied => {
                        info!("Stored {} for chapter {}", kind, chapter_id);
                        Ok(artifact)
                    }
                    CommitOutcome::Stale => Err(PipelineError::SourceChanged {
                        chapter_id: chapter_id.to_string(),
                    }),
                }
            }
        }
    }

    /// Writes every drawn panel of the chapter's manga under `output_dir`.
    /// Returns the written paths; failed and pending panels are skipped.
    pub async fn export_panels(&self, chapter: &Chapter, output_dir: &str) -> anyhow::Result<Vec<String>> {
        let Some(panels) = &chapter.manga_script else {
            return Ok(Vec::new());
        };

        let dir = Path::new(output_dir).join(&chapter.id);
        let mut written = Vec::new();
        for (i, panel) in panels.iter().enumerate() {
            let PanelImage::Ready(uri) = &panel.image else {
                warn!("Panel {} has no image, skipping", i + 1);
                continue;
            };
            let (mime_type, bytes) = data_uri::decode(uri)
                .with_context(|| format!("Panel {} image is corrupt", i + 1))?;
            let path = dir.join(format!(
                "panel_{:02}.{}",
                i + 1,
                data_uri::image_extension(&mime_type)
            ));
            let path = path.to_string_lossy().to_string();
            self.storage.write(&path, &bytes).await?;
            written.push(path);
        }
        info!("Exported {} panel(s) to {}", written.len(), dir.display());
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::core::library::LibraryStore;
    use crate::core::state::SourceContent;
    use crate::core::store::SourceSnapshot;
    use crate::services::generator::tests::MockBackend;
    use async_trait::async_trait;

    const CONFIG: &str = r#"
llm:
  provider: gemini
  gemini:
    api_key: "k"
manga:
  image_panels: 2
"#;

    struct Fixture {
        _dir: tempfile::TempDir,
        library: Arc<LibraryStore>,
        chapter_id: String,
        output: String,
    }

    async fn fixture(source: Option<SourceContent>) -> anyhow::Result<Fixture> {
        let dir = tempfile::tempdir()?;
        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
        let library = Arc::new(
            LibraryStore::load(storage, dir.path().join("lib.json").to_string_lossy()).await?,
        );
        let course = library.create_course("Biology").await?;
        let chapter = library.create_chapter(&course.id, "Cells").await?;
        if source.is_some() {
            library.replace_source(&chapter.id, source).await?;
        }
        let output = dir.path().join("out").to_string_lossy().to_string();
        Ok(Fixture {
            _dir: dir,
            library,
            chapter_id: chapter.id,
            output,
        })
    }

    fn manager(backend: Arc<MockBackend>, library: Arc<LibraryStore>) -> anyhow::Result<WorkflowManager> {
        let config = Config::from_yaml(CONFIG)?;
        Ok(WorkflowManager::new(
            &config,
            backend,
            library,
            Arc::new(NativeStorage::new()),
        ))
    }

    #[tokio::test]
    async fn test_missing_source() -> anyhow::Result<()> {
        let fx = fixture(None).await?;
        let backend = Arc::new(MockBackend::default());
        let workflow = manager(backend.clone(), fx.library.clone())?;

        let err = workflow
            .generate(&fx.chapter_id, ArtifactKind::Summary)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingSource { .. }));
        assert!(backend.requests.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_summary_is_committed() -> anyhow::Result<()> {
        let fx = fixture(Some(SourceContent::text("a.txt", "Cells divide."))).await?;
        let workflow = manager(Arc::new(MockBackend::text("## Cells")), fx.library.clone())?;

        let artifact = workflow.generate(&fx.chapter_id, ArtifactKind::Summary).await?;
        assert_eq!(artifact, Artifact::Summary("## Cells".to_string()));

        let chapter = fx.library.chapter(&fx.chapter_id).await.unwrap();
        assert_eq!(chapter.summary.as_deref(), Some("## Cells"));
        assert!(chapter.quiz.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_generation_leaves_chapter_untouched() -> anyhow::Result<()> {
        let fx = fixture(Some(SourceContent::text("a.txt", "Cells divide."))).await?;
        let workflow = manager(Arc::new(MockBackend::text("no json here")), fx.library.clone())?;

        let err = workflow
            .generate(&fx.chapter_id, ArtifactKind::Flashcards)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Parse(_)));
        assert!(!fx.library.chapter(&fx.chapter_id).await.unwrap().has_artifacts());
        Ok(())
    }

    #[tokio::test]
    async fn test_manga_is_committed_and_exported() -> anyhow::Result<()> {
        let image = SourceContent::new(
            "diagram.png",
            "data:image/png;base64,AQID",
            crate::core::state::ContentKind::Image,
            Some("image/png".to_string()),
        )?;
        let fx = fixture(Some(image)).await?;
        let backend = Arc::new(MockBackend {
            failing_scenes: vec!["second".to_string()],
            ..MockBackend::text(
                r#"[{"scene": "first", "dialogue": [], "emotion": "calm"},
                    {"scene": "second", "dialogue": [], "emotion": "tense"}]"#,
            )
        });
        let workflow = manager(backend, fx.library.clone())?;

        workflow.generate(&fx.chapter_id, ArtifactKind::MangaScript).await?;

        let chapter = fx.library.chapter(&fx.chapter_id).await.unwrap();
        let script = chapter.manga_script.as_ref().unwrap();
        assert_eq!(script.len(), 2);
        assert_eq!(script[1].image, PanelImage::Failed);

        let written = workflow.export_panels(&chapter, &fx.output).await?;
        assert_eq!(written.len(), 1);
        assert!(written[0].ends_with("panel_01.png"));
        assert_eq!(std::fs::read(&written[0])?, vec![1, 2, 3]);
        Ok(())
    }

    /// Serves a fixed source but refuses every commit, as if the chapter's
    /// source was replaced while generation ran.
    struct ReplacedSourceStore {
        snapshot: SourceSnapshot,
    }

    #[async_trait]
    impl ArtifactStore for ReplacedSourceStore {
        async fn source(&self, _chapter_id: &str) -> anyhow::Result<Option<SourceSnapshot>> {
            Ok(Some(self.snapshot.clone()))
        }

        async fn commit(
            &self,
            _chapter_id: &str,
            _source_revision: u64,
            _artifact: Artifact,
        ) -> anyhow::Result<CommitOutcome> {
            Ok(CommitOutcome::Stale)
        }
    }

    #[tokio::test]
    async fn test_stale_commit_reports_source_changed() -> anyhow::Result<()> {
        let config = Config::from_yaml(CONFIG)?;
        let store = Arc::new(ReplacedSourceStore {
            snapshot: SourceSnapshot {
                content: SourceContent::text("a.txt", "Cells divide."),
                revision: 1,
            },
        });

        let backend = Arc::new(MockBackend::with_replies(vec![
            Ok("## Cells".to_string()),
            Ok(r#"[{"scene": "a", "dialogue": [], "emotion": "calm"},
                   {"scene": "b", "dialogue": [], "emotion": "calm"}]"#
                .to_string()),
        ]));
        let workflow =
            WorkflowManager::new(&config, backend, store, Arc::new(NativeStorage::new()));

        for kind in [ArtifactKind::Summary, ArtifactKind::MangaScript] {
            let err = workflow.generate("ch1", kind).await.unwrap_err();
            assert!(
                matches!(err, PipelineError::SourceChanged { .. }),
                "{}: {:?}",
                kind,
                err
            );
        }
        Ok(())
    }
}
