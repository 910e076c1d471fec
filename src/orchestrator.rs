use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use rig::providers::openai;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    control::{Progress, ProgressReporter, RunControl, Stage},
    errors::{PipelineError, Result},
    media::{self, DurationProbe, Encoder, Ffmpeg, Ffprobe, VideoAssembler},
    narration::{NarrationModel, OpenAiNarrator, ScriptOrchestrator},
    qa::{AnswerModel, Embedder, OpenAiAnswerer, OpenAiEmbedder, QaChainConfig, QaOutcome, QaSession},
    slide::{Script, SyncedPair},
    speech::{self, OpenAiSpeech, SpeechSynthesizer},
    store::{ArtifactStore, ManifestSlide, RunManifest},
};

/// What a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub video_path: PathBuf,
    pub scripts: Vec<Script>,
    #[serde(skip)]
    pub pairs: Vec<SyncedPair>,
    pub total_duration: f64,
}

/// The external services a pipeline talks to.
pub struct Collaborators<N, S, P, E, M, A> {
    pub narrator: N,
    pub speech: S,
    pub probe: P,
    pub encoder: E,
    pub embedder: M,
    pub answerer: A,
}

pub type OpenAiPipeline =
    PipelineController<OpenAiNarrator, OpenAiSpeech, Ffprobe, Ffmpeg, OpenAiEmbedder, OpenAiAnswerer>;

/// Owns the per-session pipeline state: the artifact store, the stage
/// drivers and the QA session. Runs are serialized; questions may be asked
/// concurrently with each other.
pub struct PipelineController<N, S, P, E, M, A> {
    store: ArtifactStore,
    orchestrator: ScriptOrchestrator<N>,
    speech: S,
    probe: P,
    assembler: VideoAssembler<E>,
    qa: QaSession<M, A>,
    progress: ProgressReporter,
    run_lock: Mutex<()>,
}

impl OpenAiPipeline {
    /// Wires the OpenAI-backed collaborators and the ffmpeg tools from
    /// configuration. `images_dir` overrides `<artifacts_dir>/images`.
    pub async fn from_config(config: &AppConfig, images_dir: Option<PathBuf>) -> Result<Self> {
        let AppConfig {
            openai: openai_cfg,
            narration,
            speech,
            encoder,
            qa,
            run: _,
            artifacts_dir,
        } = config;

        if openai_cfg.api_key.is_empty() {
            return Err(PipelineError::MissingConfig("openai.api_key"));
        }

        let mut builder = openai::Client::builder(&openai_cfg.api_key);
        if let Some(base_url) = openai_cfg.base_url.as_deref() {
            builder = builder.base_url(base_url);
        }
        let client = builder.build()?;

        let mut store = ArtifactStore::open(artifacts_dir.clone())
            .await?
            .with_audio_extension(speech.format.clone());
        if let Some(dir) = images_dir {
            store = store.with_images_dir(dir);
        }

        let collaborators = Collaborators {
            narrator: OpenAiNarrator::new(&client, &openai_cfg.vision_model, narration),
            speech: OpenAiSpeech::new(openai_cfg, speech),
            probe: Ffprobe::new(&encoder.ffprobe),
            encoder: Ffmpeg::new(&encoder.ffmpeg),
            embedder: OpenAiEmbedder::new(&client, &openai_cfg.embedding_model),
            answerer: OpenAiAnswerer::new(&client, &openai_cfg.answer_model),
        };

        Self::new(store, collaborators, qa.clone())
    }
}

impl<N, S, P, E, M, A> PipelineController<N, S, P, E, M, A>
where
    N: NarrationModel,
    S: SpeechSynthesizer,
    P: DurationProbe,
    E: Encoder,
    M: Embedder,
    A: AnswerModel,
{
    pub fn new(
        store: ArtifactStore,
        collaborators: Collaborators<N, S, P, E, M, A>,
        qa_config: QaChainConfig,
    ) -> Result<Self> {
        qa_config.validate()?;
        let Collaborators {
            narrator,
            speech,
            probe,
            encoder,
            embedder,
            answerer,
        } = collaborators;

        Ok(Self {
            store,
            orchestrator: ScriptOrchestrator::new(Arc::new(narrator)),
            speech,
            probe,
            assembler: VideoAssembler::new(Arc::new(encoder)),
            qa: QaSession::new(Arc::new(embedder), Arc::new(answerer), qa_config),
            progress: ProgressReporter::new(),
            run_lock: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    /// Slides to narrated video, then the QA index over the new scripts.
    /// A new run supersedes the previous run's artifacts and QA state.
    pub async fn run(&self, control: &RunControl) -> Result<RunReport> {
        let _run = self.run_lock.lock().await;
        let run_id = Uuid::new_v4();
        self.progress.reset();
        self.store.reset_run().await?;

        let images = self.store.list_images().await?;
        if images.is_empty() {
            return Err(PipelineError::EmptyInput(format!(
                "no slide images in {:?}",
                self.store.images_dir()
            )));
        }
        info!(target: "pipeline", %run_id, slides = images.len(), "run started");

        self.progress.enter(Stage::Scripts, "generating narration");
        let (scripts, _conversation) = self
            .orchestrator
            .generate(&images, control, &self.store, &self.progress)
            .await?;

        self.progress.enter(Stage::Audio, "synthesizing audio");
        let clips = speech::synthesize_scripts(
            &self.speech,
            &self.probe,
            &scripts,
            &self.store,
            control,
            &self.progress,
        )
        .await?;

        self.progress.enter(Stage::Synchronize, "pairing slides with audio");
        let pairs = media::pair(&images, &clips)?;

        control.check()?;
        self.progress.enter(Stage::Assemble, format!("encoding {} segments", pairs.len()));
        let video_path = self.store.video_path(&run_id);
        let video = self.assembler.assemble(&pairs, &video_path).await?;

        let mut manifest = RunManifest::new(run_id);
        manifest.slides = scripts
            .iter()
            .map(|script| ManifestSlide {
                index: script.index,
                script_chars: script.text.chars().count(),
                audio_seconds: clips
                    .iter()
                    .find(|clip| clip.index == script.index)
                    .map(|clip| clip.duration_seconds),
                in_video: pairs.iter().any(|pair| pair.index == script.index),
            })
            .collect();
        manifest.video = Some(video.path.clone());
        manifest.total_duration_seconds = video.total_seconds;
        self.store.write_manifest(&manifest).await?;

        self.progress.enter(Stage::QaIndex, "indexing narration for questions");
        if let Err(err) = self.qa.install_scripts(scripts.clone()).await {
            warn!(
                target: "pipeline",
                error = %err,
                "QA index build failed; it will be retried on the first question"
            );
        }

        self.progress.finish(format!("video ready at {}", video.path.display()));
        info!(
            target: "pipeline",
            %run_id,
            video = ?video.path,
            segments = video.segments,
            total_seconds = video.total_seconds,
            "run finished"
        );

        Ok(RunReport {
            run_id,
            video_path: video.path,
            scripts,
            pairs,
            total_duration: video.total_seconds,
        })
    }

    /// Reloads the last run's scripts from the store into the QA session.
    pub async fn restore_qa(&self) -> Result<usize> {
        let scripts = self.store.read_scripts().await?;
        if scripts.is_empty() {
            return Err(PipelineError::EmptyInput(format!(
                "no scripts under {:?}",
                self.store.scripts_dir()
            )));
        }
        let count = scripts.len();
        self.qa.install_scripts(scripts).await?;
        Ok(count)
    }

    pub async fn ask(&self, question: &str) -> Result<QaOutcome> {
        self.qa.ask(question).await
    }

    pub async fn qa_settings(&self) -> QaChainConfig {
        self.qa.config().await
    }

    pub async fn update_qa_settings(&self, config: QaChainConfig) -> Result<()> {
        self.qa.update_config(config).await?;
        info!(target: "pipeline", "QA settings updated");
        Ok(())
    }

    /// Forgets the scripts, gate and chain, and removes all artifacts.
    pub async fn clear(&self) -> Result<()> {
        let _run = self.run_lock.lock().await;
        self.qa.clear().await;
        self.store.clear().await?;
        self.progress.reset();
        info!(target: "pipeline", root = ?self.store.root(), "session cleared");
        Ok(())
    }

    pub fn images_dir(&self) -> &Path {
        self.store.images_dir()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::TempDir;

    use super::*;
    use crate::{
        media::FakeEncoder,
        narration::tests::ScriptedNarrator,
        qa::{KeywordEmbedder, REFUSAL, RecordingAnswerer, sorting_embedder},
        speech::tests::{EchoSpeech, TableProbe},
    };

    type TestPipeline = PipelineController<
        ScriptedNarrator,
        EchoSpeech,
        TableProbe,
        FakeEncoder,
        KeywordEmbedder,
        RecordingAnswerer,
    >;

    async fn build_pipeline(dir: &TempDir, replies: Vec<Option<&'static str>>) -> TestPipeline {
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        for index in 1..=replies.len() {
            std::fs::write(store.images_dir().join(format!("page_{index}.png")), b"png").unwrap();
        }
        let durations = HashMap::from([
            ("slide_1.mp3".to_string(), 2.0),
            ("slide_2.mp3".to_string(), 45.0),
            ("slide_3.mp3".to_string(), 3.0),
        ]);
        PipelineController::new(
            store,
            Collaborators {
                narrator: ScriptedNarrator {
                    replies,
                    ..Default::default()
                },
                speech: EchoSpeech::default(),
                probe: TableProbe { durations },
                encoder: FakeEncoder::default(),
                embedder: sorting_embedder(),
                answerer: RecordingAnswerer::default(),
            },
            QaChainConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn run_produces_video_manifest_and_qa_index() {
        let dir = TempDir::new().unwrap();
        let pipeline = build_pipeline(
            &dir,
            vec![
                Some("Intro to sorting."),
                Some("Bubble sort compares adjacent elements."),
                Some("In summary, sorting is foundational."),
            ],
        )
        .await;
        let progress = pipeline.subscribe_progress();

        let report = pipeline.run(&RunControl::new()).await.unwrap();

        assert!((report.total_duration - 50.0).abs() < 1e-9);
        let order: Vec<u32> = report.pairs.iter().map(|pair| pair.index.get()).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert!(report.video_path.exists());
        assert_eq!(progress.borrow().stage, Stage::Done);

        let manifest = pipeline.store().read_manifest().await.unwrap().unwrap();
        assert_eq!(manifest.run_id, report.run_id);
        assert_eq!(manifest.slides.len(), 3);
        assert!(manifest.slides.iter().all(|slide| slide.in_video));

        assert!(matches!(
            pipeline.ask("How does bubble sort compare elements?").await.unwrap(),
            QaOutcome::Answered(_)
        ));
        assert_eq!(
            pipeline.ask("Who won the football match?").await.unwrap(),
            QaOutcome::Rejected(REFUSAL.to_string())
        );
    }

    #[tokio::test]
    async fn failed_narration_drops_slide_from_video() {
        let dir = TempDir::new().unwrap();
        let pipeline = build_pipeline(&dir, vec![Some("Intro to sorting."), None, Some("Done.")]).await;

        let report = pipeline.run(&RunControl::new()).await.unwrap();

        let order: Vec<u32> = report.pairs.iter().map(|pair| pair.index.get()).collect();
        assert_eq!(order, vec![1, 3]);
        assert!((report.total_duration - 5.0).abs() < 1e-9);
        let manifest = pipeline.store().read_manifest().await.unwrap().unwrap();
        assert!(!manifest.slides[1].in_video);
        assert_eq!(manifest.slides[1].audio_seconds, None);
    }

    #[tokio::test]
    async fn run_without_images_is_empty_input() {
        let dir = TempDir::new().unwrap();
        let pipeline = build_pipeline(&dir, Vec::new()).await;
        assert!(matches!(
            pipeline.run(&RunControl::new()).await.unwrap_err(),
            PipelineError::EmptyInput(_)
        ));
    }

    #[tokio::test]
    async fn all_scripts_empty_means_no_usable_pairs() {
        let dir = TempDir::new().unwrap();
        let pipeline = build_pipeline(&dir, vec![None, None]).await;
        let err = pipeline.run(&RunControl::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::NoUsablePairs { images: 2, audios: 0 }));
        assert!(!err.is_external());
    }

    #[tokio::test]
    async fn cancelled_run_never_reaches_the_encoder() {
        let dir = TempDir::new().unwrap();
        let pipeline = build_pipeline(&dir, vec![Some("Intro to sorting.")]).await;
        let control = RunControl::new();
        control.cancel();

        assert!(matches!(
            pipeline.run(&control).await.unwrap_err(),
            PipelineError::Aborted(_)
        ));
        let videos = std::fs::read_dir(pipeline.store().video_dir()).unwrap().count();
        assert_eq!(videos, 0);
    }

    #[tokio::test]
    async fn settings_and_clear() {
        let dir = TempDir::new().unwrap();
        let pipeline = build_pipeline(
            &dir,
            vec![Some("Intro to sorting."), Some("Bubble sort compares adjacent elements.")],
        )
        .await;
        pipeline.run(&RunControl::new()).await.unwrap();

        pipeline
            .update_qa_settings(QaChainConfig {
                threshold: 0.08,
                safety_instructions: "Stay on topic.".to_string(),
                ..QaChainConfig::default()
            })
            .await
            .unwrap();
        assert!((pipeline.qa_settings().await.threshold - 0.08).abs() < f64::EPSILON);

        pipeline.clear().await.unwrap();
        assert!(matches!(
            pipeline.ask("bubble sort?").await.unwrap_err(),
            PipelineError::ChainNotBuilt
        ));
        assert!(pipeline.store().read_manifest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn restore_reloads_scripts_from_disk() {
        let dir = TempDir::new().unwrap();
        let pipeline = build_pipeline(&dir, vec![Some("Intro to sorting.")]).await;
        pipeline.run(&RunControl::new()).await.unwrap();

        let other = build_pipeline(&dir, Vec::new()).await;
        assert_eq!(other.restore_qa().await.unwrap(), 1);
        assert!(matches!(
            other.ask("What is sorting about?").await.unwrap(),
            QaOutcome::Answered(_)
        ));
    }

    #[tokio::test]
    async fn openai_pipeline_wires_from_config() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::from_toml(&format!(
            r#"
            artifacts_dir = {:?}
            [openai]
            api_key = "sk-test"
            base_url = "http://localhost:8080/v1"
            "#,
            dir.path().join("artifacts").to_string_lossy()
        ))
        .unwrap();
        let slides = dir.path().join("slides");

        let pipeline = OpenAiPipeline::from_config(&config, Some(slides.clone()))
            .await
            .unwrap();

        assert_eq!(pipeline.images_dir(), slides.as_path());
        assert!(pipeline.store().root().ends_with("artifacts"));
    }
}
