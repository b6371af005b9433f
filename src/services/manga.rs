//! Two-phase manga generation: one script call, then one image call per panel.
//!
//! Script-phase failures abort the run. Image-phase failures are recorded on
//! the affected panel and never abort siblings.

use futures_util::future::join_all;
use log::{debug, error, info, warn};

use crate::core::config::MangaConfig;
use crate::core::error::PipelineError;
use crate::core::state::{Artifact, ContentKind, MangaPanel, PanelImage, SourceContent};
use crate::core::store::{CommitOutcome, CommitTarget};
use crate::services::generator::ArtifactGenerator;
use crate::services::prompts::GenerationParams;

/// Below this many words a text gets the minimal two-panel treatment.
pub const SHORT_TEXT_WORDS: usize = 75;
pub const SHORT_TEXT_PANELS: usize = 2;
pub const WORDS_PER_PANEL: usize = 125;
pub const MIN_TEXT_PANELS: usize = 3;
pub const MAX_TEXT_PANELS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MangaState {
    Idle,
    ScriptRequested,
    ScriptReady,
    ImagesPending,
    Done,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelPolicy {
    pub image_panels: usize,
    pub document_panels: usize,
}

impl Default for PanelPolicy {
    fn default() -> Self {
        PanelPolicy::from(&MangaConfig::default())
    }
}

impl From<&MangaConfig> for PanelPolicy {
    fn from(config: &MangaConfig) -> Self {
        Self {
            image_panels: config.image_panels,
            document_panels: config.document_panels,
        }
    }
}

impl PanelPolicy {
    pub fn panel_count(&self, content: &SourceContent) -> usize {
        match content.kind() {
            ContentKind::Text => text_panel_count(word_count(content.content())),
            ContentKind::Image => self.image_panels,
            ContentKind::Document => self.document_panels,
        }
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn text_panel_count(words: usize) -> usize {
    if words < SHORT_TEXT_WORDS {
        SHORT_TEXT_PANELS
    } else {
        words
            .div_ceil(WORDS_PER_PANEL)
            .clamp(MIN_TEXT_PANELS, MAX_TEXT_PANELS)
    }
}

/// Splits `text` into contiguous word runs of `ceil(words / count)` words each;
/// the last run takes the remainder. Whitespace between words collapses to a
/// single space.
pub fn segment_scenes(text: &str, count: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() || count == 0 {
        return Vec::new();
    }
    let run = words.len().div_ceil(count);
    words.chunks(run).map(|chunk| chunk.join(" ")).collect()
}

#[derive(Debug, Clone)]
pub struct MangaOrchestrator {
    generator: ArtifactGenerator,
    policy: PanelPolicy,
}

impl MangaOrchestrator {
    pub fn new(generator: ArtifactGenerator, policy: PanelPolicy) -> Self {
        Self { generator, policy }
    }

    /// Panel count and, for text, the scene split handed to the script prompt.
    /// Text too short to yield one scene per panel is sent whole instead.
    pub fn plan(&self, content: &SourceContent) -> GenerationParams {
        let count = self.policy.panel_count(content);
        let scenes = match content.kind() {
            ContentKind::Text => {
                let scenes = segment_scenes(content.content(), count);
                if scenes.len() == count {
                    scenes
                } else {
                    debug!("Text splits into {} of {} scenes, sending it whole", scenes.len(), count);
                    Vec::new()
                }
            }
            ContentKind::Image | ContentKind::Document => Vec::new(),
        };
        GenerationParams::manga(count, scenes)
    }

    pub fn begin<'a>(&'a self, content: &'a SourceContent, target: CommitTarget<'a>) -> MangaRun<'a> {
        MangaRun {
            orchestrator: self,
            content,
            target,
            state: MangaState::Idle,
        }
    }

    pub async fn run(
        &self,
        content: &SourceContent,
        target: CommitTarget<'_>,
    ) -> Result<Vec<MangaPanel>, PipelineError> {
        self.begin(content, target).execute().await
    }
}

/// One manga request. Holds no state beyond the run itself; results go to
/// the commit target.
pub struct MangaRun<'a> {
    orchestrator: &'a MangaOrchestrator,
    content: &'a SourceContent,
    target: CommitTarget<'a>,
    state: MangaState,
}

impl<'a> MangaRun<'a> {
    pub fn state(&self) -> MangaState {
        self.state
    }

    fn transition(&mut self, next: MangaState) {
        debug!(
            "Manga run for chapter {}: {:?} -> {:?}",
            self.target.chapter_id(),
            self.state,
            next
        );
        self.state = next;
    }

    fn abort(&mut self, reason: String) -> PipelineError {
        error!("Manga script for chapter {} failed: {}", self.target.chapter_id(), reason);
        self.transition(MangaState::Aborted);
        PipelineError::ScriptGenerationFailed(reason)
    }

    pub async fn execute(&mut self) -> Result<Vec<MangaPanel>, PipelineError> {
        if self.state != MangaState::Idle {
            return Err(PipelineError::InvalidTransition { from: self.state });
        }
        let orchestrator = self.orchestrator;

        let params = orchestrator.plan(self.content);
        let requested = params.panel_count.unwrap_or_default();
        self.transition(MangaState::ScriptRequested);

        let mut panels = match orchestrator.generator.manga_script(self.content, &params).await {
            Ok(panels) if !panels.is_empty() => panels,
            Ok(_) => return Err(self.abort("model returned no panels".to_string())),
            Err(e) => return Err(self.abort(e.to_string())),
        };
        if panels.len() != requested {
            warn!(
                "Requested {} manga panels, model returned {}; keeping the model's script",
                requested,
                panels.len()
            );
        }
        self.transition(MangaState::ScriptReady);

        match self.target.publish(Artifact::MangaScript(panels.clone())).await {
            Ok(CommitOutcome::Applied) => {}
            Ok(CommitOutcome::Stale) => {
                info!("Source replaced mid-run; images will still be generated but not stored")
            }
            Err(e) => return Err(self.abort(format!("could not publish script: {:#}", e))),
        }

        self.transition(MangaState::ImagesPending);
        info!("Generating {} manga panels...", panels.len());

        let generator = &orchestrator.generator;
        let results = join_all(panels.iter().map(|panel| generator.panel_image(&panel.scene))).await;

        for (i, (panel, result)) in panels.iter_mut().zip(results).enumerate() {
            panel.image = match result {
                Ok(uri) => PanelImage::Ready(uri),
                Err(e) => {
                    warn!("Failed to generate image for panel {}: {}", i + 1, e);
                    PanelImage::Failed
                }
            };
        }
        self.transition(MangaState::Done);

        match self.target.publish(Artifact::MangaScript(panels.clone())).await? {
            CommitOutcome::Applied => Ok(panels),
            CommitOutcome::Stale => Err(PipelineError::SourceChanged {
                chapter_id: self.target.chapter_id().to_string(),
            }),
        }
    }
}
