use log::{debug, info};
use serde::Deserialize;
use std::sync::Arc;

use crate::core::error::PipelineError;
use crate::core::state::{
    Artifact, ArtifactKind, ContentKind, Flashcard, MangaPanel, PanelImage, QuizQuestion,
    SourceContent,
};
use crate::services::llm::{GenerativeBackend, ModelSet, PromptPart, TextRequest};
use crate::services::parser::parse_structured;
use crate::services::prompts::{self, GenerationParams, PromptSpec};
use crate::utils::data_uri;

/// Single-call generation unit: one request, one backend call, one artifact.
#[derive(Debug, Clone)]
pub struct ArtifactGenerator {
    backend: Arc<dyn GenerativeBackend>,
    models: ModelSet,
}

/// Panel shape the model returns; the image slot is added afterwards.
#[derive(Deserialize)]
struct ScriptPanel {
    scene: String,
    #[serde(default)]
    dialogue: Vec<String>,
    #[serde(default)]
    narration: Option<String>,
    #[serde(default)]
    emotion: String,
}

impl From<ScriptPanel> for MangaPanel {
    fn from(panel: ScriptPanel) -> Self {
        MangaPanel {
            scene: panel.scene,
            dialogue: panel.dialogue,
            narration: panel.narration.filter(|n| !n.trim().is_empty()),
            emotion: panel.emotion,
            image: PanelImage::Pending,
        }
    }
}

impl ArtifactGenerator {
    pub fn new(backend: Arc<dyn GenerativeBackend>, models: ModelSet) -> Self {
        Self { backend, models }
    }

    pub async fn generate(
        &self,
        content: &SourceContent,
        kind: ArtifactKind,
        params: &GenerationParams,
    ) -> Result<Artifact, PipelineError> {
        let spec = prompts::lookup(kind, content.kind());
        let request = self.build_request(&spec, content, params)?;
        info!("Generating {} with {}", kind, request.model);

        let text = self.backend.generate_text(&request).await?;
        debug!("Received {} bytes for {}", text.len(), kind);

        let artifact = match kind {
            ArtifactKind::Summary => Artifact::Summary(text),
            ArtifactKind::Quiz => Artifact::Quiz(validate_quiz(parse_structured(&text)?)?),
            ArtifactKind::Flashcards => {
                Artifact::Flashcards(validate_flashcards(parse_structured(&text)?)?)
            }
            ArtifactKind::MangaScript => {
                let panels: Vec<ScriptPanel> = parse_structured(&text)?;
                Artifact::MangaScript(panels.into_iter().map(MangaPanel::from).collect())
            }
        };
        Ok(artifact)
    }

    pub async fn summary(&self, content: &SourceContent) -> Result<String, PipelineError> {
        match self.generate(content, ArtifactKind::Summary, &GenerationParams::default()).await? {
            Artifact::Summary(text) => Ok(text),
            other => Err(unexpected(ArtifactKind::Summary, &other)),
        }
    }

    pub async fn quiz(&self, content: &SourceContent) -> Result<Vec<QuizQuestion>, PipelineError> {
        match self.generate(content, ArtifactKind::Quiz, &GenerationParams::default()).await? {
            Artifact::Quiz(questions) => Ok(questions),
            other => Err(unexpected(ArtifactKind::Quiz, &other)),
        }
    }

    pub async fn flashcards(&self, content: &SourceContent) -> Result<Vec<Flashcard>, PipelineError> {
        match self.generate(content, ArtifactKind::Flashcards, &GenerationParams::default()).await? {
            Artifact::Flashcards(cards) => Ok(cards),
            other => Err(unexpected(ArtifactKind::Flashcards, &other)),
        }
    }

    pub async fn manga_script(
        &self,
        content: &SourceContent,
        params: &GenerationParams,
    ) -> Result<Vec<MangaPanel>, PipelineError> {
        match self.generate(content, ArtifactKind::MangaScript, params).await? {
            Artifact::MangaScript(panels) => Ok(panels),
            other => Err(unexpected(ArtifactKind::MangaScript, &other)),
        }
    }

    /// Draws one panel and returns it as a data URI.
    pub async fn panel_image(&self, scene: &str) -> Result<String, PipelineError> {
        let model = self.models.model_for(prompts::PANEL_IMAGE_TIER);
        let image = self
            .backend
            .generate_image(model, &prompts::panel_image_prompt(scene))
            .await?;
        Ok(data_uri::encode(&image.mime_type, &image.data))
    }

    fn build_request(
        &self,
        spec: &PromptSpec,
        content: &SourceContent,
        params: &GenerationParams,
    ) -> Result<TextRequest, PipelineError> {
        let instruction = spec.instruction(params);

        let parts = match content.kind() {
            ContentKind::Text => {
                let mut prompt = instruction;
                // Scenes already carry the whole text.
                if params.scenes.is_empty() {
                    prompt.push_str("\n\n---\n\n");
                    prompt.push_str(content.content());
                }
                vec![PromptPart::Text(prompt)]
            }
            ContentKind::Image | ContentKind::Document => {
                let mime_type = content.mime_type().ok_or_else(|| {
                    PipelineError::InvalidSource(format!("{} has no MIME type", content.name()))
                })?;
                let (_, payload) = data_uri::split(content.content()).ok_or_else(|| {
                    PipelineError::InvalidSource(format!("{} is not a base64 data URI", content.name()))
                })?;
                vec![
                    PromptPart::Inline {
                        mime_type: mime_type.to_string(),
                        data: payload.to_string(),
                    },
                    PromptPart::Text(instruction),
                ]
            }
        };

        Ok(TextRequest {
            model: self.models.model_for(spec.tier).to_string(),
            system: Some(spec.system.to_string()),
            parts,
            schema: spec.schema(params),
            temperature: spec.temperature,
        })
    }
}

fn unexpected(expected: ArtifactKind, got: &Artifact) -> PipelineError {
    PipelineError::InvalidArtifact(format!("expected {}, got {}", expected, got.kind()))
}

/// Enforces `correct_answer ∈ options`, repairing answers that only differ
/// from an option by surrounding whitespace or letter case.
pub fn validate_quiz(questions: Vec<QuizQuestion>) -> Result<Vec<QuizQuestion>, PipelineError> {
    if questions.is_empty() {
        return Err(PipelineError::InvalidArtifact("quiz has no questions".to_string()));
    }

    questions
        .into_iter()
        .enumerate()
        .map(|(i, mut q)| {
            if q.options.len() < 2 {
                return Err(PipelineError::InvalidArtifact(format!(
                    "question {} has {} option(s)",
                    i + 1,
                    q.options.len()
                )));
            }
            if !q.options.contains(&q.correct_answer) {
                let wanted = q.correct_answer.trim().to_lowercase();
                let repaired = q
                    .options
                    .iter()
                    .find(|o| o.trim().to_lowercase() == wanted)
                    .cloned()
                    .ok_or_else(|| {
                        PipelineError::InvalidArtifact(format!(
                            "answer to question {} is not among its options",
                            i + 1
                        ))
                    })?;
                q.correct_answer = repaired;
            }
            Ok(q)
        })
        .collect()
}

pub fn validate_flashcards(cards: Vec<Flashcard>) -> Result<Vec<Flashcard>, PipelineError> {
    if cards.is_empty() {
        return Err(PipelineError::InvalidArtifact("no flashcards returned".to_string()));
    }
    Ok(cards)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::error::{BackendError, ParseError};
    use crate::services::llm::GeneratedImage;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted backend: replies to text calls in order and fails image calls
    /// whose prompt contains any of `failing_scenes`.
    #[derive(Debug, Default)]
    pub(crate) struct MockBackend {
        pub replies: Mutex<VecDeque<Result<String, BackendError>>>,
        pub requests: Mutex<Vec<TextRequest>>,
        pub image_prompts: Mutex<Vec<String>>,
        pub failing_scenes: Vec<String>,
    }

    impl MockBackend {
        pub fn with_replies(replies: Vec<Result<String, BackendError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Default::default()
            }
        }

        pub fn text(reply: &str) -> Self {
            Self::with_replies(vec![Ok(reply.to_string())])
        }
    }

    #[async_trait]
    impl GenerativeBackend for MockBackend {
        async fn generate_text(&self, request: &TextRequest) -> Result<String, BackendError> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(BackendError::Empty))
        }

        async fn generate_image(
            &self,
            _model: &str,
            prompt: &str,
        ) -> Result<GeneratedImage, BackendError> {
            self.image_prompts.lock().unwrap().push(prompt.to_string());
            if self.failing_scenes.iter().any(|s| prompt.contains(s.as_str())) {
                return Err(BackendError::Blocked {
                    reason: "IMAGE_SAFETY".to_string(),
                });
            }
            Ok(GeneratedImage {
                mime_type: "image/png".to_string(),
                data: vec![1, 2, 3],
            })
        }
    }

    fn generator(backend: Arc<MockBackend>) -> ArtifactGenerator {
        ArtifactGenerator::new(backend, ModelSet::default())
    }

    const QUIZ_JSON: &str = r#"[
        {"question": "What powers the cell?", "options": ["ATP", "DNA", "RNA", "Lipids"], "correctAnswer": "ATP"},
        {"question": "Where is DNA stored?", "options": ["Nucleus", "Ribosome", "Membrane", "Vacuole"], "correctAnswer": " nucleus "}
    ]"#;

    #[tokio::test]
    async fn test_summary_is_returned_verbatim() {
        let backend = Arc::new(MockBackend::text("# Cells\n- basic unit of life"));
        let summary = generator(backend.clone())
            .summary(&SourceContent::text("a.txt", "Cells are the basic unit of life."))
            .await
            .unwrap();
        assert_eq!(summary, "# Cells\n- basic unit of life");

        let requests = backend.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.model, "gemini-2.5-flash");
        assert!(request.schema.is_none());
        match &request.parts[..] {
            [PromptPart::Text(prompt)] => {
                assert!(prompt.ends_with("---\n\nCells are the basic unit of life."))
            }
            other => panic!("unexpected parts {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_image_content_is_sent_inline_to_capable_model() {
        let backend = Arc::new(MockBackend::text("```json\n[{\"term\": \"t\", \"definition\": \"d\"}]\n```"));
        let source = SourceContent::new(
            "diagram.png",
            "data:image/png;base64,AQID",
            ContentKind::Image,
            Some("image/png".to_string()),
        )
        .unwrap();

        let cards = generator(backend.clone()).flashcards(&source).await.unwrap();
        assert_eq!(cards, vec![Flashcard { term: "t".into(), definition: "d".into() }]);

        let requests = backend.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.model, "gemini-2.5-pro");
        assert!(request.schema.is_some());
        match &request.parts[..] {
            [PromptPart::Inline { mime_type, data }, PromptPart::Text(instruction)] => {
                assert_eq!(mime_type, "image/png");
                assert_eq!(data, "AQID");
                assert!(!instruction.contains("AQID"));
            }
            other => panic!("unexpected parts {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_quiz_answers_are_members_of_options() {
        let backend = Arc::new(MockBackend::text(QUIZ_JSON));
        let quiz = generator(backend)
            .quiz(&SourceContent::text("a.txt", "text"))
            .await
            .unwrap();

        assert_eq!(quiz.len(), 2);
        for q in &quiz {
            assert!(q.options.contains(&q.correct_answer), "{:?}", q);
        }
        assert_eq!(quiz[1].correct_answer, "Nucleus");
    }

    #[test]
    fn test_quiz_with_foreign_answer_is_rejected() {
        let questions = vec![QuizQuestion {
            question: "Q".into(),
            options: vec!["a".into(), "b".into()],
            correct_answer: "c".into(),
        }];
        assert!(matches!(validate_quiz(questions), Err(PipelineError::InvalidArtifact(_))));
    }

    #[test]
    fn test_quiz_needs_two_options() {
        let questions = vec![QuizQuestion {
            question: "Q".into(),
            options: vec!["a".into()],
            correct_answer: "a".into(),
        }];
        assert!(matches!(validate_quiz(questions), Err(PipelineError::InvalidArtifact(_))));
        assert!(matches!(validate_quiz(vec![]), Err(PipelineError::InvalidArtifact(_))));
    }

    #[tokio::test]
    async fn test_backend_failure_is_generation_failed() {
        let backend = Arc::new(MockBackend::with_replies(vec![Err(BackendError::Blocked {
            reason: "SAFETY".into(),
        })]));
        let err = generator(backend)
            .summary(&SourceContent::text("a.txt", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::GenerationFailed(BackendError::Blocked { .. })));
    }

    #[tokio::test]
    async fn test_unparseable_quiz_propagates_parse_error() {
        let backend = Arc::new(MockBackend::text("Sorry, I can't do that."));
        let err = generator(backend)
            .quiz(&SourceContent::text("a.txt", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Parse(ParseError::NoStructuralToken)));
    }

    #[tokio::test]
    async fn test_manga_script_panels_start_pending() {
        let backend = Arc::new(MockBackend::text(
            r#"[{"scene": "A lab", "dialogue": ["PROF: Look!"], "narration": "", "emotion": "awe"}]"#,
        ));
        let params = GenerationParams::manga(1, vec!["one two three".into()]);
        let panels = generator(backend.clone())
            .manga_script(&SourceContent::text("a.txt", "one two three"), &params)
            .await
            .unwrap();

        assert_eq!(panels.len(), 1);
        assert_eq!(panels[0].image, PanelImage::Pending);
        assert_eq!(panels[0].narration, None);

        let requests = backend.requests.lock().unwrap();
        match &requests[0].parts[..] {
            // Scenes replace the appended raw text.
            [PromptPart::Text(prompt)] => assert!(!prompt.contains("---")),
            other => panic!("unexpected parts {:?}", other),
        }
        assert_eq!(requests[0].schema.as_ref().unwrap()["maxItems"], 1);
    }

    #[tokio::test]
    async fn test_document_without_data_uri_is_invalid() {
        let backend = Arc::new(MockBackend::text("unused"));
        let source = SourceContent::new(
            "notes.pdf",
            "not a data uri",
            ContentKind::Document,
            Some("application/pdf".into()),
        )
        .unwrap();
        let err = generator(backend.clone()).summary(&source).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidSource(_)));
        assert!(backend.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_panel_image_is_data_uri() {
        let backend = Arc::new(MockBackend::default());
        let uri = generator(backend.clone()).panel_image("a cell").await.unwrap();
        assert_eq!(uri, "data:image/png;base64,AQID");
        assert!(backend.image_prompts.lock().unwrap()[0].contains("a cell"));
    }
}
