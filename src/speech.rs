use std::future::Future;

use reqwest::Client;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    config::{OpenAiConfig, SpeechConfig},
    control::{ProgressReporter, RunControl, Stage},
    errors::{PipelineError, Result},
    media::{DurationProbe, MIN_SEGMENT_SECONDS},
    slide::{AudioClip, Script},
    store::ArtifactStore,
};

/// Text-to-speech backend returning encoded audio bytes.
pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize(&self, text: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

#[derive(Clone)]
pub struct OpenAiSpeech {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
    format: String,
}

impl OpenAiSpeech {
    pub fn new(openai: &OpenAiConfig, speech: &SpeechConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: openai.api_base().trim_end_matches('/').to_string(),
            api_key: openai.api_key.clone(),
            model: speech.model.clone(),
            voice: speech.voice.clone(),
            format: speech.format.clone(),
        }
    }
}

impl SpeechSynthesizer for OpenAiSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let url = format!("{}/audio/speech", self.base_url);

        let payload = json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
            "response_format": self.format
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(PipelineError::Speech(format!("{status}: {error_text}")));
        }

        let audio_data = response.bytes().await?;
        if audio_data.is_empty() {
            return Err(PipelineError::Speech("empty audio response".to_string()));
        }
        Ok(audio_data.to_vec())
    }
}

/// Voices every non-empty script in slide order and measures each clip.
/// Slides whose synthesis or probe fails are left out.
pub async fn synthesize_scripts<S, P>(
    synthesizer: &S,
    probe: &P,
    scripts: &[Script],
    store: &ArtifactStore,
    control: &RunControl,
    progress: &ProgressReporter,
) -> Result<Vec<AudioClip>>
where
    S: SpeechSynthesizer,
    P: DurationProbe,
{
    let total = scripts.len();
    let mut clips = Vec::with_capacity(total);

    for (done, script) in scripts.iter().enumerate() {
        control.check()?;
        progress.step(
            Stage::Audio,
            done,
            total,
            format!("voicing slide {} of {total}", script.index),
        );

        if script.is_blank() {
            info!(
                target: "speech",
                slide = script.index.get(),
                "empty script; slide excluded from the video"
            );
            continue;
        }

        let bytes = match synthesizer.synthesize(&script.text).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    target: "speech",
                    slide = script.index.get(),
                    error = %err,
                    "speech synthesis failed; slide excluded from the video"
                );
                continue;
            }
        };
        let path = store.write_audio(script.index, &bytes).await?;

        let duration_seconds = match probe.probe(&path).await {
            Ok(seconds) if seconds.is_finite() && seconds >= MIN_SEGMENT_SECONDS => seconds,
            Ok(seconds) => {
                warn!(
                    target: "speech",
                    slide = script.index.get(),
                    seconds,
                    "audio has no measurable duration; slide excluded from the video"
                );
                continue;
            }
            Err(err) => {
                warn!(
                    target: "speech",
                    slide = script.index.get(),
                    error = %err,
                    "duration probe failed; slide excluded from the video"
                );
                continue;
            }
        };

        info!(
            target: "speech",
            slide = script.index.get(),
            bytes = bytes.len(),
            duration_seconds,
            "audio clip ready"
        );
        clips.push(AudioClip {
            index: script.index,
            path,
            duration_seconds,
        });
    }

    progress.step(Stage::Audio, total, total, format!("{} audio clips", clips.len()));
    Ok(clips)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::HashMap,
        path::Path,
        sync::Mutex,
    };

    use tempfile::TempDir;

    use super::*;
    use crate::slide::SlideIndex;

    /// Encodes the text itself as the "audio"; fails on texts it is told to.
    #[derive(Default)]
    pub(crate) struct EchoSpeech {
        pub fail_on: Vec<&'static str>,
        pub calls: Mutex<Vec<String>>,
    }

    impl SpeechSynthesizer for EchoSpeech {
        async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
            self.calls.lock().unwrap().push(text.to_string());
            if self.fail_on.iter().any(|needle| text.contains(needle)) {
                return Err(PipelineError::Speech("voice unavailable".to_string()));
            }
            Ok(text.as_bytes().to_vec())
        }
    }

    /// Looks durations up by file name; unknown files fail to probe.
    #[derive(Default)]
    pub(crate) struct TableProbe {
        pub durations: HashMap<String, f64>,
    }

    impl DurationProbe for TableProbe {
        async fn probe(&self, path: &Path) -> Result<f64> {
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default();
            self.durations
                .get(name)
                .copied()
                .ok_or_else(|| PipelineError::Probe {
                    path: path.to_path_buf(),
                    reason: "no duration".to_string(),
                })
        }
    }

    fn script(index: u32, text: &str) -> Script {
        Script {
            index: SlideIndex::new(index).unwrap(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn skips_empty_failed_and_unmeasurable_slides() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        let speech = EchoSpeech {
            fail_on: vec!["broken"],
            ..Default::default()
        };
        let probe = TableProbe {
            durations: HashMap::from([
                ("slide_1.mp3".to_string(), 2.0),
                ("slide_4.mp3".to_string(), 0.0),
                ("slide_5.mp3".to_string(), 3.5),
                ("slide_6.mp3".to_string(), 0.0004),
            ]),
        };
        let scripts = vec![
            script(1, "Intro."),
            script(2, "  "),
            script(3, "broken slide"),
            script(4, "Silent."),
            script(5, "Outro."),
            script(6, "Blip."),
        ];

        let clips = synthesize_scripts(
            &speech,
            &probe,
            &scripts,
            &store,
            &RunControl::new(),
            &ProgressReporter::new(),
        )
        .await
        .unwrap();

        let kept: Vec<u32> = clips.iter().map(|clip| clip.index.get()).collect();
        assert_eq!(kept, vec![1, 5]);
        assert_eq!(clips[1].duration_seconds, 3.5);
        assert_eq!(speech.calls.lock().unwrap().len(), 5);
        assert_eq!(std::fs::read(&clips[0].path).unwrap(), b"Intro.");
    }

    #[tokio::test]
    async fn abort_is_checked_before_each_slide() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        let control = RunControl::new();
        control.cancel();

        let err = synthesize_scripts(
            &EchoSpeech::default(),
            &TableProbe::default(),
            &[script(1, "Intro.")],
            &store,
            &control,
            &ProgressReporter::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Aborted(_)));
    }
}
