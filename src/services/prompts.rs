//! Instruction templates, output schemas and model tiers per artifact kind.
//!
//! Schemas use the OpenAPI subset accepted by Gemini's `responseSchema`.

use serde_json::{json, Value};

use crate::core::state::{ArtifactKind, ContentKind};
use crate::services::llm::ModelTier;

pub const QUIZ_QUESTIONS: usize = 5;
pub const QUIZ_OPTIONS: usize = 4;
pub const FLASHCARD_COUNT: usize = 10;

/// Per-request values injected into a template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationParams {
    /// Panels the manga script must contain.
    pub panel_count: Option<usize>,
    /// Pre-split source text, one entry per panel.
    pub scenes: Vec<String>,
}

impl GenerationParams {
    pub fn manga(panel_count: usize, scenes: Vec<String>) -> Self {
        Self {
            panel_count: Some(panel_count),
            scenes,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptSpec {
    pub kind: ArtifactKind,
    pub system: &'static str,
    pub tier: ModelTier,
    pub temperature: Option<f32>,
}

pub fn lookup(kind: ArtifactKind, content_kind: ContentKind) -> PromptSpec {
    let tier = match content_kind {
        ContentKind::Text => ModelTier::Fast,
        ContentKind::Image | ContentKind::Document => ModelTier::Capable,
    };

    let (system, temperature) = match kind {
        ArtifactKind::Summary => (
            "You are an expert academic summarizer. Your summaries are clear, structured, and focus on the key takeaways of the provided material.",
            None,
        ),
        ArtifactKind::Quiz => (
            "You are an AI that performs extractive question answering. You extract answers directly from the source material without modification.",
            Some(0.0),
        ),
        ArtifactKind::Flashcards => (
            "You are a study coach who writes precise, self-contained flashcards.",
            None,
        ),
        ArtifactKind::MangaScript => (
            "You are a professional manga storyboarder who turns educational material into engaging scripts.",
            Some(1.0),
        ),
    };

    PromptSpec {
        kind,
        system,
        tier,
        temperature,
    }
}

impl PromptSpec {
    pub fn instruction(&self, params: &GenerationParams) -> String {
        match self.kind {
            ArtifactKind::Summary => "Please provide a concise, easy-to-digest summary of the provided material. \
                Use headings and bullet points for maximum clarity and readability."
                .to_string(),
            ArtifactKind::Quiz => format!(
                "Act as an extractive question-answering model. Generate a quiz based strictly on the provided material.\n\
                \n\
                Instructions:\n\
                1. Scan the material for factual statements.\n\
                2. Select a specific phrase or sentence segment from the material to serve as the correct answer. The answer must be verbatim from the material.\n\
                3. Create a question that this segment answers.\n\
                4. Provide exactly {} options: the correct answer plus {} distractors that are contextually relevant but incorrect.\n\
                5. The \"correctAnswer\" field must repeat one of the options exactly, character for character.\n\
                \n\
                Generate exactly {} questions.",
                QUIZ_OPTIONS,
                QUIZ_OPTIONS - 1,
                QUIZ_QUESTIONS
            ),
            ArtifactKind::Flashcards => format!(
                "Generate exactly {} flashcards for the key terms, concepts, and definitions in the provided material. \
                Each card has a short term and a one or two sentence definition.",
                FLASHCARD_COUNT
            ),
            ArtifactKind::MangaScript => manga_instruction(params),
        }
    }

    pub fn schema(&self, params: &GenerationParams) -> Option<Value> {
        match self.kind {
            ArtifactKind::Summary => None,
            ArtifactKind::Quiz => Some(json!({
                "type": "ARRAY",
                "minItems": QUIZ_QUESTIONS,
                "maxItems": QUIZ_QUESTIONS,
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "question": { "type": "STRING" },
                        "options": {
                            "type": "ARRAY",
                            "minItems": QUIZ_OPTIONS,
                            "maxItems": QUIZ_OPTIONS,
                            "items": { "type": "STRING" }
                        },
                        "correctAnswer": { "type": "STRING" }
                    },
                    "required": ["question", "options", "correctAnswer"]
                }
            })),
            ArtifactKind::Flashcards => Some(json!({
                "type": "ARRAY",
                "minItems": FLASHCARD_COUNT,
                "maxItems": FLASHCARD_COUNT,
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "term": { "type": "STRING" },
                        "definition": { "type": "STRING" }
                    },
                    "required": ["term", "definition"]
                }
            })),
            ArtifactKind::MangaScript => {
                let mut schema = json!({
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "properties": {
                            "scene": {
                                "type": "STRING",
                                "description": "Detailed visual description of the scene for the artist."
                            },
                            "dialogue": {
                                "type": "ARRAY",
                                "items": { "type": "STRING" },
                                "description": "Lines spoken in the panel, formatted as 'CHARACTER: text'."
                            },
                            "narration": {
                                "type": "STRING",
                                "nullable": true,
                                "description": "Narration box text, if any."
                            },
                            "emotion": {
                                "type": "STRING",
                                "description": "Dominant mood of the panel in one or two words."
                            }
                        },
                        "required": ["scene", "dialogue", "emotion"]
                    }
                });
                if let Some(count) = params.panel_count {
                    schema["minItems"] = json!(count);
                    schema["maxItems"] = json!(count);
                }
                Some(schema)
            }
        }
    }
}

fn manga_instruction(params: &GenerationParams) -> String {
    let mut prompt = String::from(
        "Transform the provided educational material into a manga script in a dramatic, engaging Japanese manga style.\n\
        \n\
        For each panel provide:\n\
        - \"scene\": a detailed visual description an artist can draw from.\n\
        - \"dialogue\": the lines characters speak, each as 'CHARACTER: text'.\n\
        - \"narration\": narration box text, or null.\n\
        - \"emotion\": the dominant mood of the panel.\n\
        \n\
        Cover every fact and concept in the material; do not drop key information.\n",
    );

    if let Some(count) = params.panel_count {
        prompt.push_str(&format!("\nCreate exactly {} panels.\n", count));
    }

    if !params.scenes.is_empty() {
        prompt.push_str(&format!(
            "\nThe material has been split into {} consecutive scenes. Turn each scene into exactly one panel, in order.\n",
            params.scenes.len()
        ));
        for (i, scene) in params.scenes.iter().enumerate() {
            prompt.push_str(&format!("\nScene {}:\n{}\n", i + 1, scene));
        }
    }

    prompt
}

pub fn panel_image_prompt(scene: &str) -> String {
    format!(
        "Generate a single manga panel image in a dramatic black and white style with high contrast. The scene is: {}",
        scene
    )
}

pub const PANEL_IMAGE_TIER: ModelTier = ModelTier::Image;
