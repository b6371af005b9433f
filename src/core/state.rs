use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::core::error::PipelineError;

/// What kind of material a chapter's source holds. Drives model choice,
/// request shape and the manga panel policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Image,
    #[serde(rename = "file")]
    Document,
}

/// Normalized upload, ready for model consumption.
///
/// `content` is raw UTF-8 text for [`ContentKind::Text`] and a base64 data URI
/// otherwise. A MIME type is always present for non-text content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "StoredSource")]
pub struct SourceContent {
    name: String,
    content: String,
    #[serde(rename = "type")]
    kind: ContentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mime_type: Option<String>,
}

/// Wire shape of [`SourceContent`]; loading goes through [`SourceContent::new`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSource {
    name: String,
    content: String,
    #[serde(rename = "type")]
    kind: ContentKind,
    #[serde(default)]
    mime_type: Option<String>,
}

impl TryFrom<StoredSource> for SourceContent {
    type Error = PipelineError;

    fn try_from(stored: StoredSource) -> Result<Self, Self::Error> {
        SourceContent::new(stored.name, stored.content, stored.kind, stored.mime_type)
    }
}

impl SourceContent {
    pub fn new(
        name: impl Into<String>,
        content: impl Into<String>,
        kind: ContentKind,
        mime_type: Option<String>,
    ) -> Result<Self, PipelineError> {
        if kind != ContentKind::Text && mime_type.is_none() {
            return Err(PipelineError::InvalidSource(format!(
                "{:?} content requires a MIME type",
                kind
            )));
        }
        Ok(Self {
            name: name.into(),
            content: content.into(),
            kind,
            mime_type,
        })
    }

    pub fn text(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            kind: ContentKind::Text,
            mime_type: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Summary,
    Quiz,
    Flashcards,
    MangaScript,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Summary,
        ArtifactKind::Quiz,
        ArtifactKind::Flashcards,
        ArtifactKind::MangaScript,
    ];
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ArtifactKind::Summary => "summary",
            ArtifactKind::Quiz => "quiz",
            ArtifactKind::Flashcards => "flashcards",
            ArtifactKind::MangaScript => "manga",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flashcard {
    pub term: String,
    pub definition: String,
}

/// Image slot of a manga panel.
///
/// Starts `Pending` when the script is generated and is resolved exactly once
/// to `Ready` or `Failed`. Stored as `null`, the data URI, or `"error"`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PanelImage {
    #[default]
    Pending,
    Ready(String),
    Failed,
}

const PANEL_IMAGE_ERROR: &str = "error";

impl PanelImage {
    pub fn is_pending(&self) -> bool {
        matches!(self, PanelImage::Pending)
    }
}

impl Serialize for PanelImage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PanelImage::Pending => serializer.serialize_none(),
            PanelImage::Ready(uri) => serializer.serialize_str(uri),
            PanelImage::Failed => serializer.serialize_str(PANEL_IMAGE_ERROR),
        }
    }
}

impl<'de> Deserialize<'de> for PanelImage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<String>::deserialize(deserializer)? {
            None => PanelImage::Pending,
            Some(s) if s == PANEL_IMAGE_ERROR => PanelImage::Failed,
            Some(s) => PanelImage::Ready(s),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MangaPanel {
    pub scene: String,
    #[serde(default)]
    pub dialogue: Vec<String>,
    #[serde(default)]
    pub narration: Option<String>,
    #[serde(default)]
    pub emotion: String,
    #[serde(rename = "imageUrl", default)]
    pub image: PanelImage,
}

/// One generated study artifact; also the unit of a store commit.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Summary(String),
    Quiz(Vec<QuizQuestion>),
    Flashcards(Vec<Flashcard>),
    MangaScript(Vec<MangaPanel>),
}

impl Artifact {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Artifact::Summary(_) => ArtifactKind::Summary,
            Artifact::Quiz(_) => ArtifactKind::Quiz,
            Artifact::Flashcards(_) => ArtifactKind::Flashcards,
            Artifact::MangaScript(_) => ArtifactKind::MangaScript,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: String,
    pub name: String,
    #[serde(default)]
    source_file: Option<SourceContent>,
    #[serde(default)]
    source_revision: u64,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub quiz: Option<Vec<QuizQuestion>>,
    #[serde(default)]
    pub flashcards: Option<Vec<Flashcard>>,
    #[serde(default)]
    pub manga_script: Option<Vec<MangaPanel>>,
}

impl Chapter {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source_file: None,
            source_revision: 0,
            summary: None,
            quiz: None,
            flashcards: None,
            manga_script: None,
        }
    }

    pub fn source(&self) -> Option<&SourceContent> {
        self.source_file.as_ref()
    }

    pub fn source_revision(&self) -> u64 {
        self.source_revision
    }

    /// Swaps the source and drops every artifact derived from the old one.
    pub fn replace_source(&mut self, source: Option<SourceContent>) {
        self.source_file = source;
        self.source_revision += 1;
        self.summary = None;
        self.quiz = None;
        self.flashcards = None;
        self.manga_script = None;
    }

    /// Replaces the artifact field matching `artifact`'s kind.
    pub fn apply(&mut self, artifact: Artifact) {
        match artifact {
            Artifact::Summary(text) => self.summary = Some(text),
            Artifact::Quiz(questions) => self.quiz = Some(questions),
            Artifact::Flashcards(cards) => self.flashcards = Some(cards),
            Artifact::MangaScript(panels) => self.manga_script = Some(panels),
        }
    }

    pub fn has_artifacts(&self) -> bool {
        self.summary.is_some()
            || self.quiz.is_some()
            || self.flashcards.is_some()
            || self.manga_script.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_source_requires_mime_type() {
        let err = SourceContent::new("a.png", "data:...", ContentKind::Image, None).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidSource(_)));

        let ok = SourceContent::new("a.txt", "hello", ContentKind::Text, None).unwrap();
        assert_eq!(ok.kind(), ContentKind::Text);
    }

    #[test]
    fn test_stored_source_is_validated_on_load() {
        let ok: SourceContent = serde_json::from_str(
            r#"{"name": "a.png", "content": "data:image/png;base64,AA==", "type": "image", "mimeType": "image/png"}"#,
        )
        .unwrap();
        assert_eq!(ok.mime_type(), Some("image/png"));

        let text: SourceContent =
            serde_json::from_str(r#"{"name": "a.txt", "content": "hi", "type": "text"}"#).unwrap();
        assert_eq!(text.kind(), ContentKind::Text);

        let err = serde_json::from_str::<SourceContent>(
            r#"{"name": "a.pdf", "content": "data:application/pdf;base64,AA==", "type": "file"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("requires a MIME type"), "{}", err);
    }

    #[test]
    fn test_replace_source_clears_all_artifacts() {
        let mut chapter = Chapter::new("c1", "Cells");
        chapter.replace_source(Some(SourceContent::text("a.txt", "old")));
        chapter.apply(Artifact::Summary("s".to_string()));
        chapter.apply(Artifact::Quiz(vec![]));
        chapter.apply(Artifact::Flashcards(vec![]));
        chapter.apply(Artifact::MangaScript(vec![]));
        assert!(chapter.has_artifacts());
        let revision = chapter.source_revision();

        chapter.replace_source(Some(SourceContent::text("b.txt", "new")));

        assert_eq!(chapter.source().unwrap().content(), "new");
        assert_eq!(chapter.source_revision(), revision + 1);
        assert!(chapter.summary.is_none());
        assert!(chapter.quiz.is_none());
        assert!(chapter.flashcards.is_none());
        assert!(chapter.manga_script.is_none());
    }

    #[test]
    fn test_panel_image_serialization() {
        let panel = MangaPanel {
            scene: "lab".to_string(),
            dialogue: vec!["A: hi".to_string()],
            narration: None,
            emotion: "calm".to_string(),
            image: PanelImage::Failed,
        };
        let json = serde_json::to_value(&panel).unwrap();
        assert_eq!(json["imageUrl"], "error");

        let pending: MangaPanel =
            serde_json::from_str(r#"{"scene":"s","dialogue":[],"emotion":"e","imageUrl":null}"#)
                .unwrap();
        assert_eq!(pending.image, PanelImage::Pending);

        let ready: MangaPanel = serde_json::from_str(
            r#"{"scene":"s","dialogue":[],"emotion":"e","imageUrl":"data:image/png;base64,AA=="}"#,
        )
        .unwrap();
        assert_eq!(ready.image, PanelImage::Ready("data:image/png;base64,AA==".to_string()));
    }

    #[test]
    fn test_chapter_uses_stored_field_names() {
        let json = r#"{
            "id": "1",
            "name": "Intro",
            "sourceFile": { "name": "a.png", "content": "data:image/png;base64,AA==", "type": "image", "mimeType": "image/png" },
            "summary": null,
            "quiz": [{ "question": "Q", "options": ["a", "b"], "correctAnswer": "a" }],
            "mangaScript": null,
            "flashcards": null
        }"#;
        let chapter: Chapter = serde_json::from_str(json).unwrap();
        let source = chapter.source().unwrap();
        assert_eq!(source.kind(), ContentKind::Image);
        assert_eq!(source.mime_type(), Some("image/png"));
        assert_eq!(chapter.quiz.as_ref().unwrap()[0].correct_answer, "a");
        assert_eq!(chapter.source_revision(), 0);
    }
}
