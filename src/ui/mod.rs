//! Interactive terminal front-end: courses, chapters and their study material.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, InquireError, Select, Text};
use log::error;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::Config;
use crate::core::library::LibraryStore;
use crate::core::state::{ArtifactKind, Chapter, Course, Flashcard, MangaPanel, PanelImage, QuizQuestion};
use crate::services::normalizer;
use crate::services::workflow::WorkflowManager;

pub struct App {
    config: Config,
    library: Arc<LibraryStore>,
    workflow: WorkflowManager,
}

/// Esc and Ctrl-C both step back one menu.
fn optional<T>(answer: std::result::Result<T, InquireError>) -> Result<Option<T>> {
    match answer {
        Ok(value) => Ok(Some(value)),
        Err(InquireError::OperationCanceled) | Err(InquireError::OperationInterrupted) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

enum DashboardItem {
    Open(Course),
    Create,
    Delete,
    Quit,
}

impl fmt::Display for DashboardItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DashboardItem::Open(course) => {
                write!(f, "{} ({} chapters)", course.name, course.chapters.len())
            }
            DashboardItem::Create => write!(f, "+ New course"),
            DashboardItem::Delete => write!(f, "- Delete a course"),
            DashboardItem::Quit => write!(f, "Quit"),
        }
    }
}

enum CourseItem {
    Open(Chapter),
    Create,
    Delete,
    Back,
}

impl fmt::Display for CourseItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CourseItem::Open(chapter) => match chapter.source() {
                Some(source) => write!(f, "{} [{}]", chapter.name, source.name()),
                None => write!(f, "{} [no source]", chapter.name),
            },
            CourseItem::Create => write!(f, "+ New chapter"),
            CourseItem::Delete => write!(f, "- Delete a chapter"),
            CourseItem::Back => write!(f, "Back"),
        }
    }
}

enum ChapterItem {
    Upload,
    Reset,
    Generate(ArtifactKind),
    Show(ArtifactKind),
    ExportPanels,
    Back,
}

impl fmt::Display for ChapterItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChapterItem::Upload => write!(f, "Upload source file"),
            ChapterItem::Reset => write!(f, "Reset source"),
            ChapterItem::Generate(kind) => write!(f, "Generate {}", kind),
            ChapterItem::Show(ArtifactKind::Quiz) => write!(f, "Take quiz"),
            ChapterItem::Show(ArtifactKind::Flashcards) => write!(f, "Study flashcards"),
            ChapterItem::Show(kind) => write!(f, "Show {}", kind),
            ChapterItem::ExportPanels => write!(f, "Export manga panels"),
            ChapterItem::Back => write!(f, "Back"),
        }
    }
}

fn is_generated(chapter: &Chapter, kind: ArtifactKind) -> bool {
    match kind {
        ArtifactKind::Summary => chapter.summary.is_some(),
        ArtifactKind::Quiz => chapter.quiz.is_some(),
        ArtifactKind::Flashcards => chapter.flashcards.is_some(),
        ArtifactKind::MangaScript => chapter.manga_script.is_some(),
    }
}

fn chapter_menu(chapter: &Chapter) -> Vec<ChapterItem> {
    let mut items = vec![ChapterItem::Upload];
    if chapter.source().is_none() {
        items.push(ChapterItem::Back);
        return items;
    }
    items.push(ChapterItem::Reset);
    for kind in ArtifactKind::ALL {
        items.push(ChapterItem::Generate(kind));
        if is_generated(chapter, kind) {
            items.push(ChapterItem::Show(kind));
        }
    }
    if chapter
        .manga_script
        .as_ref()
        .is_some_and(|panels| panels.iter().any(|p| matches!(p.image, PanelImage::Ready(_))))
    {
        items.push(ChapterItem::ExportPanels);
    }
    items.push(ChapterItem::Back);
    items
}

impl App {
    pub fn new(config: Config, library: Arc<LibraryStore>, workflow: WorkflowManager) -> Self {
        Self {
            config,
            library,
            workflow,
        }
    }

    pub async fn run(&self) -> Result<()> {
        loop {
            let mut items: Vec<DashboardItem> = self
                .library
                .courses()
                .await
                .into_iter()
                .map(DashboardItem::Open)
                .collect();
            let has_courses = !items.is_empty();
            items.push(DashboardItem::Create);
            if has_courses {
                items.push(DashboardItem::Delete);
            }
            items.push(DashboardItem::Quit);

            let Some(choice) = optional(Select::new("IntelliLearn - your courses:", items).prompt())? else {
                return Ok(());
            };
            match choice {
                DashboardItem::Open(course) => self.course_view(&course.id).await?,
                DashboardItem::Create => {
                    if let Some(name) = optional(Text::new("Course name:").prompt())? {
                        if !name.trim().is_empty() {
                            self.library.create_course(&name).await?;
                        }
                    }
                }
                DashboardItem::Delete => self.delete_course().await?,
                DashboardItem::Quit => return Ok(()),
            }
        }
    }

    async fn delete_course(&self) -> Result<()> {
        let courses = self.library.courses().await;
        let names: Vec<String> = courses.iter().map(|c| c.name.clone()).collect();
        let Some(index) = optional(Select::new("Delete which course?", names).raw_prompt())? else {
            return Ok(());
        };
        let course = &courses[index.index];
        let confirmed = optional(
            Confirm::new(&format!("Delete '{}' and all its chapters?", course.name))
                .with_default(false)
                .prompt(),
        )?;
        if confirmed == Some(true) {
            self.library.delete_course(&course.id).await?;
        }
        Ok(())
    }

    async fn course_view(&self, course_id: &str) -> Result<()> {
        loop {
            let Some(course) = self.library.course(course_id).await else {
                return Ok(());
            };
            let mut items: Vec<CourseItem> =
                course.chapters.iter().cloned().map(CourseItem::Open).collect();
            let has_chapters = !items.is_empty();
            items.push(CourseItem::Create);
            if has_chapters {
                items.push(CourseItem::Delete);
            }
            items.push(CourseItem::Back);

            let prompt = format!("{} - chapters:", course.name);
            let Some(choice) = optional(Select::new(&prompt, items).prompt())? else {
                return Ok(());
            };
            match choice {
                CourseItem::Open(chapter) => self.chapter_view(&chapter.id).await?,
                CourseItem::Create => {
                    if let Some(name) = optional(Text::new("Chapter name:").prompt())? {
                        if !name.trim().is_empty() {
                            self.library.create_chapter(course_id, &name).await?;
                        }
                    }
                }
                CourseItem::Delete => {
                    let names: Vec<String> = course.chapters.iter().map(|c| c.name.clone()).collect();
                    if let Some(picked) = optional(Select::new("Delete which chapter?", names).raw_prompt())? {
                        let chapter = &course.chapters[picked.index];
                        self.library.delete_chapter(course_id, &chapter.id).await?;
                    }
                }
                CourseItem::Back => return Ok(()),
            }
        }
    }

    async fn chapter_view(&self, chapter_id: &str) -> Result<()> {
        loop {
            let Some(chapter) = self.library.chapter(chapter_id).await else {
                return Ok(());
            };
            let prompt = match chapter.source() {
                Some(source) => format!("{} ({}):", chapter.name, source.name()),
                None => format!("{} (upload a source to start):", chapter.name),
            };
            let Some(choice) = optional(Select::new(&prompt, chapter_menu(&chapter)).prompt())? else {
                return Ok(());
            };
            match choice {
                ChapterItem::Upload => self.upload(&chapter).await?,
                ChapterItem::Reset => {
                    let confirmed = optional(
                        Confirm::new("Remove the source and all generated material?")
                            .with_default(false)
                            .prompt(),
                    )?;
                    if confirmed == Some(true) {
                        self.library.replace_source(chapter_id, None).await?;
                    }
                }
                ChapterItem::Generate(kind) => self.generate(&chapter, kind).await?,
                ChapterItem::Show(ArtifactKind::Quiz) => {
                    take_quiz(chapter.quiz.as_deref().unwrap_or_default())?
                }
                ChapterItem::Show(ArtifactKind::Flashcards) => {
                    study_flashcards(chapter.flashcards.as_deref().unwrap_or_default())?
                }
                ChapterItem::Show(kind) => println!("{}", render(&chapter, kind)),
                ChapterItem::ExportPanels => {
                    let written = self
                        .workflow
                        .export_panels(&chapter, &self.config.output_folder)
                        .await?;
                    for path in written {
                        println!("  {}", path);
                    }
                }
                ChapterItem::Back => return Ok(()),
            }
        }
    }

    async fn upload(&self, chapter: &Chapter) -> Result<()> {
        let Some(path) = optional(
            Text::new("Path to file (.txt, .pdf, .doc(x), .ppt(x), .jpg, .png):").prompt(),
        )?
        else {
            return Ok(());
        };
        if chapter.has_artifacts() {
            let confirmed = optional(
                Confirm::new("Replacing the source discards all generated material. Continue?")
                    .with_default(false)
                    .prompt(),
            )?;
            if confirmed != Some(true) {
                return Ok(());
            }
        }

        match normalizer::load_file(Path::new(path.trim())).await {
            Ok(source) => {
                println!("Loaded {}", source.name());
                self.library.replace_source(&chapter.id, Some(source)).await?;
            }
            Err(e) => {
                error!("Upload of {} failed: {}", path.trim(), e);
                println!("{}", e.user_message());
            }
        }
        Ok(())
    }

    async fn generate(&self, chapter: &Chapter, kind: ArtifactKind) -> Result<()> {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
        pb.set_message(format!("Generating {} for {}...", kind, chapter.name));
        pb.enable_steady_tick(Duration::from_millis(120));

        let result = self.workflow.generate(&chapter.id, kind).await;
        pb.finish_and_clear();

        match result {
            Ok(_) => {
                if let Some(updated) = self.library.chapter(&chapter.id).await {
                    println!("{}", render(&updated, kind));
                }
            }
            Err(e) => {
                error!("Generating {} for chapter {} failed: {}", kind, chapter.id, e);
                println!("{}", e.user_message());
            }
        }
        Ok(())
    }
}

fn render(chapter: &Chapter, kind: ArtifactKind) -> String {
    match kind {
        ArtifactKind::Summary => chapter.summary.clone().unwrap_or_default(),
        ArtifactKind::Quiz => format!(
            "{} questions ready. Choose 'Take quiz' to start.",
            chapter.quiz.as_ref().map_or(0, Vec::len)
        ),
        ArtifactKind::Flashcards => format!(
            "{} flashcards ready. Choose 'Study flashcards' to start.",
            chapter.flashcards.as_ref().map_or(0, Vec::len)
        ),
        ArtifactKind::MangaScript => chapter
            .manga_script
            .as_deref()
            .map(render_manga)
            .unwrap_or_default(),
    }
}

/// Whether `picked` is right, and the line shown after checking it.
fn check_answer(question: &QuizQuestion, picked: &str) -> (bool, String) {
    if picked == question.correct_answer {
        (true, "Correct!".to_string())
    } else {
        (false, format!("Correct answer: {}", question.correct_answer))
    }
}

fn take_quiz(questions: &[QuizQuestion]) -> Result<()> {
    let mut answered = 0;
    let mut correct = 0;
    for (i, question) in questions.iter().enumerate() {
        let prompt = format!("{}. {}", i + 1, question.question);
        let Some(picked) = optional(Select::new(&prompt, question.options.clone()).prompt())? else {
            break;
        };
        answered += 1;
        let (right, verdict) = check_answer(question, &picked);
        if right {
            correct += 1;
        }
        println!("  {}", verdict);
    }
    println!("Score: {}/{}", correct, answered);
    Ok(())
}

enum DeckMove {
    Flip,
    Next,
    Prev,
    Done,
}

impl fmt::Display for DeckMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeckMove::Flip => "Flip",
            DeckMove::Next => "Next",
            DeckMove::Prev => "Prev",
            DeckMove::Done => "Done",
        };
        f.write_str(label)
    }
}

/// Next card position; the deck wraps at both ends.
fn step(index: usize, len: usize, forward: bool) -> usize {
    if forward {
        (index + 1) % len
    } else {
        (index + len - 1) % len
    }
}

fn card_face(card: &Flashcard, flipped: bool) -> &str {
    if flipped {
        &card.definition
    } else {
        &card.term
    }
}

fn study_flashcards(cards: &[Flashcard]) -> Result<()> {
    if cards.is_empty() {
        println!("No flashcards.");
        return Ok(());
    }
    let mut index = 0;
    let mut flipped = false;
    loop {
        println!("\n[{} / {}] {}", index + 1, cards.len(), card_face(&cards[index], flipped));
        let moves = vec![DeckMove::Flip, DeckMove::Next, DeckMove::Prev, DeckMove::Done];
        match optional(Select::new("Card:", moves).prompt())? {
            Some(DeckMove::Flip) => flipped = !flipped,
            Some(DeckMove::Next) => {
                index = step(index, cards.len(), true);
                flipped = false;
            }
            Some(DeckMove::Prev) => {
                index = step(index, cards.len(), false);
                flipped = false;
            }
            Some(DeckMove::Done) | None => return Ok(()),
        }
    }
}

fn render_manga(panels: &[MangaPanel]) -> String {
    let mut out = String::new();
    for (i, panel) in panels.iter().enumerate() {
        let status = match &panel.image {
            PanelImage::Pending => "drawing...",
            PanelImage::Ready(_) => "drawn",
            PanelImage::Failed => "image failed",
        };
        out.push_str(&format!("Panel {} [{}] ({})\n", i + 1, panel.emotion, status));
        out.push_str(&format!("  {}\n", panel.scene));
        if let Some(narration) = &panel.narration {
            out.push_str(&format!("  Narration: {}\n", narration));
        }
        for line in &panel.dialogue {
            out.push_str(&format!("  \"{}\"\n", line));
        }
        out.push('\n');
    }
    out
}
