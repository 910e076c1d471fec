use std::path::{Path, PathBuf};

use crate::{
    errors::{PipelineError, Result},
    slide::{Script, SlideImage, SlideIndex},
    util::{local_rfc3339, now_local},
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

const IMAGE_PREFIX: &str = "page";
const SLIDE_PREFIX: &str = "slide";
const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];
const MANIFEST_FILE: &str = "run.json";

/// Per-slide artifacts on disk, addressed by `SlideIndex`.
///
/// ```text
/// <root>/images/page_{k}.png
/// <root>/scripts/slide_{k}_script.txt
/// <root>/audio/slide_{k}.mp3
/// <root>/video/{run_id}_slideshow.mp4
/// <root>/run.json
/// ```
pub struct ArtifactStore {
    root: PathBuf,
    images_dir: PathBuf,
    audio_extension: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: Uuid,
    pub created_at: String,
    pub slides: Vec<ManifestSlide>,
    pub video: Option<PathBuf>,
    pub total_duration_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestSlide {
    pub index: SlideIndex,
    pub script_chars: usize,
    pub audio_seconds: Option<f64>,
    pub in_video: bool,
}

impl RunManifest {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            created_at: local_rfc3339(&now_local()),
            slides: Vec::new(),
            video: None,
            total_duration_seconds: 0.0,
        }
    }
}

impl ArtifactStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let store = Self {
            images_dir: root.join("images"),
            root,
            audio_extension: "mp3".to_string(),
        };
        for dir in [
            store.root.clone(),
            store.images_dir.clone(),
            store.scripts_dir(),
            store.audio_dir(),
            store.video_dir(),
        ] {
            fs::create_dir_all(&dir).await?;
        }
        Ok(store)
    }

    /// Reads slide images from `dir` instead of `<root>/images`.
    pub fn with_images_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.images_dir = dir.into();
        self
    }

    pub fn with_audio_extension(mut self, extension: impl Into<String>) -> Self {
        self.audio_extension = extension.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join("scripts")
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.root.join("audio")
    }

    pub fn video_dir(&self) -> PathBuf {
        self.root.join("video")
    }

    pub fn script_path(&self, index: SlideIndex) -> PathBuf {
        self.scripts_dir()
            .join(format!("{SLIDE_PREFIX}_{index}_script.txt"))
    }

    pub fn audio_path(&self, index: SlideIndex) -> PathBuf {
        self.audio_dir()
            .join(format!("{SLIDE_PREFIX}_{index}.{}", self.audio_extension))
    }

    pub fn image_path(&self, index: SlideIndex) -> PathBuf {
        self.images_dir.join(format!("{IMAGE_PREFIX}_{index}.png"))
    }

    pub fn video_path(&self, run_id: &Uuid) -> PathBuf {
        self.video_dir().join(format!("{run_id}_slideshow.mp4"))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Lists slide images in ascending index order. Indices must form the
    /// contiguous range `1..=N`.
    pub async fn list_images(&self) -> Result<Vec<SlideImage>> {
        let mut images = Vec::new();
        let mut entries = match fs::read_dir(&self.images_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(images),
            Err(err) => return Err(err.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if !is_image {
                continue;
            }
            match SlideIndex::from_file_name(IMAGE_PREFIX, name) {
                Some(index) => images.push(SlideImage { index, path }),
                None => debug!(target: "artifact_store", file = name, "skipping unindexed image"),
            }
        }

        images.sort_by_key(|image| image.index);

        for (offset, image) in images.iter().enumerate() {
            let expected = SlideIndex::from_offset(offset)?;
            if image.index != expected {
                return Err(PipelineError::InvalidInput(format!(
                    "expected image for slide {expected}, found {:?}",
                    image.path
                )));
            }
        }

        Ok(images)
    }

    pub async fn write_script(&self, script: &Script) -> Result<PathBuf> {
        let path = self.script_path(script.index);
        fs::write(&path, script.text.as_bytes()).await?;
        Ok(path)
    }

    /// Scripts of the last run, in slide order.
    pub async fn read_scripts(&self) -> Result<Vec<Script>> {
        let mut scripts = Vec::new();
        let mut entries = fs::read_dir(self.scripts_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if !name.ends_with("_script.txt") {
                continue;
            }
            if let Some(index) = SlideIndex::from_file_name(SLIDE_PREFIX, name) {
                let text = fs::read_to_string(&path).await?;
                scripts.push(Script { index, text });
            }
        }
        scripts.sort_by_key(|script| script.index);
        Ok(scripts)
    }

    pub async fn write_audio(&self, index: SlideIndex, data: &[u8]) -> Result<PathBuf> {
        let path = self.audio_path(index);
        fs::write(&path, data).await?;
        Ok(path)
    }

    pub async fn write_manifest(&self, manifest: &RunManifest) -> Result<PathBuf> {
        let path = self.manifest_path();
        fs::write(&path, serde_json::to_vec_pretty(manifest)?).await?;
        Ok(path)
    }

    pub async fn read_manifest(&self) -> Result<Option<RunManifest>> {
        match fs::read(self.manifest_path()).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Drops scripts, audio and the manifest of the previous run so the next
    /// run supersedes it. Images and finished videos are kept.
    pub async fn reset_run(&self) -> Result<()> {
        remove_files(&self.scripts_dir(), |name| name.ends_with("_script.txt")).await?;
        let audio_suffix = format!(".{}", self.audio_extension);
        remove_files(&self.audio_dir(), |name| name.ends_with(&audio_suffix)).await?;
        remove_file_if_exists(&self.manifest_path()).await?;
        Ok(())
    }

    /// Removes every artifact, including videos. Images are only removed
    /// when they live inside the store.
    pub async fn clear(&self) -> Result<()> {
        self.reset_run().await?;
        remove_files(&self.video_dir(), |name| name.ends_with(".mp4")).await?;
        if self.images_dir.starts_with(&self.root) {
            remove_files(&self.images_dir, |name| {
                SlideIndex::from_file_name(IMAGE_PREFIX, name).is_some()
            })
            .await?;
        }
        Ok(())
    }
}

async fn remove_files(dir: &Path, matches: impl Fn(&str) -> bool) -> Result<()> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let matched = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(&matches)
            .unwrap_or(false);
        if matched && entry.file_type().await?.is_file() {
            fs::remove_file(&path).await?;
        }
    }
    Ok(())
}

pub(crate) async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
