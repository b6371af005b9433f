use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

use crate::core::io::Storage;
use crate::core::state::{Artifact, Chapter, Course, SourceContent};
use crate::core::store::{ArtifactStore, CommitOutcome, SourceSnapshot};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Library {
    #[serde(default)]
    pub courses: Vec<Course>,
}

impl Library {
    fn course_mut(&mut self, course_id: &str) -> Result<&mut Course> {
        self.courses
            .iter_mut()
            .find(|c| c.id == course_id)
            .with_context(|| format!("Course {} not found", course_id))
    }

    fn chapter(&self, chapter_id: &str) -> Option<&Chapter> {
        self.courses
            .iter()
            .flat_map(|c| c.chapters.iter())
            .find(|ch| ch.id == chapter_id)
    }

    fn chapter_mut(&mut self, chapter_id: &str) -> Option<&mut Chapter> {
        self.courses
            .iter_mut()
            .flat_map(|c| c.chapters.iter_mut())
            .find(|ch| ch.id == chapter_id)
    }
}

/// Courses and chapters persisted as one JSON document.
pub struct LibraryStore {
    storage: Arc<dyn Storage>,
    path: String,
    library: Mutex<Library>,
}

fn new_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{}-{:06x}", millis, rand::random::<u32>() & 0xff_ffff)
}

impl LibraryStore {
    pub async fn load(storage: Arc<dyn Storage>, path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let library = if storage.exists(&path).await? {
            let bytes = storage
                .read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path))?;
            serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse {}", path))?
        } else {
            info!("No library at {}, starting empty", path);
            Library::default()
        };

        Ok(Self {
            storage,
            path,
            library: Mutex::new(library),
        })
    }

    async fn save(&self, library: &Library) -> Result<()> {
        let json = serde_json::to_vec_pretty(library)?;
        self.storage
            .write(&self.path, &json)
            .await
            .with_context(|| format!("Failed to write {}", self.path))?;
        debug!("Saved library to {}", self.path);
        Ok(())
    }

    pub async fn courses(&self) -> Vec<Course> {
        self.library.lock().await.courses.clone()
    }

    pub async fn course(&self, course_id: &str) -> Option<Course> {
        self.library
            .lock()
            .await
            .courses
            .iter()
            .find(|c| c.id == course_id)
            .cloned()
    }

    /// Applies `change` to a copy of the library. The copy replaces the live
    /// library only after it is saved, so a failed write leaves nothing behind.
    async fn update<T, F>(&self, change: F) -> Result<T>
    where
        F: FnOnce(&mut Library) -> Result<T> + Send,
        T: Send,
    {
        let mut library = self.library.lock().await;
        let mut next = library.clone();
        let value = change(&mut next)?;
        self.save(&next).await?;
        *library = next;
        Ok(value)
    }

    pub async fn create_course(&self, name: &str) -> Result<Course> {
        let course = Course {
            id: new_id(),
            name: name.trim().to_string(),
            chapters: Vec::new(),
        };
        self.update(|library| {
            library.courses.push(course.clone());
            Ok(())
        })
        .await?;
        info!("Created course {} ({})", course.name, course.id);
        Ok(course)
    }

    pub async fn delete_course(&self, course_id: &str) -> Result<()> {
        self.update(|library| {
            let before = library.courses.len();
            library.courses.retain(|c| c.id != course_id);
            if library.courses.len() == before {
                anyhow::bail!("Course {} not found", course_id);
            }
            Ok(())
        })
        .await
    }

    pub async fn create_chapter(&self, course_id: &str, name: &str) -> Result<Chapter> {
        let chapter = Chapter::new(new_id(), name.trim());
        self.update(|library| {
            library.course_mut(course_id)?.chapters.push(chapter.clone());
            Ok(())
        })
        .await?;
        info!("Created chapter {} ({})", chapter.name, chapter.id);
        Ok(chapter)
    }

    pub async fn delete_chapter(&self, course_id: &str, chapter_id: &str) -> Result<()> {
        self.update(|library| {
            let course = library.course_mut(course_id)?;
            let before = course.chapters.len();
            course.chapters.retain(|ch| ch.id != chapter_id);
            if course.chapters.len() == before {
                anyhow::bail!("Chapter {} not found in course {}", chapter_id, course_id);
            }
            Ok(())
        })
        .await
    }

    pub async fn chapter(&self, chapter_id: &str) -> Option<Chapter> {
        self.library.lock().await.chapter(chapter_id).cloned()
    }

    /// Uploads (`Some`) or resets (`None`) a chapter's source. Every artifact
    /// goes in the same update.
    pub async fn replace_source(
        &self,
        chapter_id: &str,
        source: Option<SourceContent>,
    ) -> Result<Chapter> {
        self.update(|library| {
            let chapter = library
                .chapter_mut(chapter_id)
                .with_context(|| format!("Chapter {} not found", chapter_id))?;
            chapter.replace_source(source);
            Ok(chapter.clone())
        })
        .await
    }
}

#[async_trait]
impl ArtifactStore for LibraryStore {
    async fn source(&self, chapter_id: &str) -> Result<Option<SourceSnapshot>> {
        let library = self.library.lock().await;
        let chapter = library
            .chapter(chapter_id)
            .with_context(|| format!("Chapter {} not found", chapter_id))?;
        Ok(chapter.source().map(|content| SourceSnapshot {
            content: content.clone(),
            revision: chapter.source_revision(),
        }))
    }

    async fn commit(
        &self,
        chapter_id: &str,
        source_revision: u64,
        artifact: Artifact,
    ) -> Result<CommitOutcome> {
        self.update(|library| {
            let chapter = library
                .chapter_mut(chapter_id)
                .with_context(|| format!("Chapter {} not found", chapter_id))?;
            if chapter.source_revision() != source_revision {
                return Ok(CommitOutcome::Stale);
            }
            chapter.apply(artifact);
            Ok(CommitOutcome::Applied)
        })
        .await
    }
}
