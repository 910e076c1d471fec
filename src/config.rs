use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;

use crate::{
    errors::{PipelineError, Result},
    qa::{GateFailurePolicy, QaChainConfig},
};

const DEFAULT_CONFIG_PATH: &str = "config/app_config.toml";
const DEFAULT_VISION_MODEL: &str = "gpt-4o";
const DEFAULT_ANSWER_MODEL: &str = "gpt-4o-mini";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub vision_model: String,
    pub answer_model: String,
    pub embedding_model: String,
}

impl OpenAiConfig {
    pub fn api_base(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_OPENAI_BASE_URL)
    }
}

#[derive(Clone, Debug)]
pub struct NarrationConfig {
    pub temperature: f64,
    pub max_tokens: u64,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 350,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SpeechConfig {
    pub model: String,
    pub voice: String,
    pub format: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            format: "mp3".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct EncoderConfig {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RunConfig {
    pub timeout: Option<Duration>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub openai: OpenAiConfig,
    pub narration: NarrationConfig,
    pub speech: SpeechConfig,
    pub encoder: EncoderConfig,
    pub qa: QaChainConfig,
    pub run: RunConfig,
    pub artifacts_dir: PathBuf,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let config_path =
            env::var("APP_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&config_path))
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file {:?}", config_path))?;

        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let file_config: FileConfig = toml::from_str(contents)?;

        let artifacts_dir = if let Some(dir) = &file_config.artifacts_dir {
            PathBuf::from(dir)
        } else if let Ok(dir) = env::var("ARTIFACTS_DIR") {
            PathBuf::from(dir)
        } else {
            env::current_dir()?.join("output")
        };

        let openai = file_config
            .openai
            .unwrap_or_default()
            .into_domain(env::var("OPENAI_API_KEY").ok())
            .ok_or(PipelineError::MissingConfig("openai.api_key (or OPENAI_API_KEY)"))?;

        Ok(Self {
            openai,
            narration: file_config.narration.unwrap_or_default().into_domain(),
            speech: file_config.speech.unwrap_or_default().into_domain(),
            encoder: file_config.encoder.unwrap_or_default().into_domain(),
            qa: file_config.qa.unwrap_or_default().into_domain()?,
            run: file_config.run.unwrap_or_default().into_domain(),
            artifacts_dir,
        })
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    artifacts_dir: Option<String>,
    #[serde(default)]
    openai: Option<FileOpenAiConfig>,
    #[serde(default)]
    narration: Option<FileNarrationConfig>,
    #[serde(default)]
    speech: Option<FileSpeechConfig>,
    #[serde(default)]
    encoder: Option<FileEncoderConfig>,
    #[serde(default)]
    qa: Option<FileQaConfig>,
    #[serde(default)]
    run: Option<FileRunConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct FileOpenAiConfig {
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    vision_model: Option<String>,
    #[serde(default)]
    answer_model: Option<String>,
    #[serde(default)]
    embedding_model: Option<String>,
}

impl FileOpenAiConfig {
    /// A blank file key counts as unset, so `env_key` still applies.
    fn into_domain(self, env_key: Option<String>) -> Option<OpenAiConfig> {
        let api_key = self
            .api_key
            .filter(|key| !key.trim().is_empty())
            .or(env_key)
            .filter(|key| !key.trim().is_empty())?;

        Some(OpenAiConfig {
            api_key,
            base_url: self.base_url,
            vision_model: self
                .vision_model
                .unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string()),
            answer_model: self
                .answer_model
                .unwrap_or_else(|| DEFAULT_ANSWER_MODEL.to_string()),
            embedding_model: self
                .embedding_model
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
        })
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileNarrationConfig {
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    max_tokens: Option<u64>,
}

impl FileNarrationConfig {
    fn into_domain(self) -> NarrationConfig {
        let defaults = NarrationConfig::default();
        NarrationConfig {
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens).max(16),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileSpeechConfig {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    voice: Option<String>,
    #[serde(default)]
    format: Option<String>,
}

impl FileSpeechConfig {
    fn into_domain(self) -> SpeechConfig {
        let defaults = SpeechConfig::default();
        SpeechConfig {
            model: self.model.unwrap_or(defaults.model),
            voice: self.voice.unwrap_or(defaults.voice),
            format: self.format.unwrap_or(defaults.format),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileEncoderConfig {
    #[serde(default)]
    ffmpeg: Option<String>,
    #[serde(default)]
    ffprobe: Option<String>,
}

impl FileEncoderConfig {
    fn into_domain(self) -> EncoderConfig {
        let defaults = EncoderConfig::default();
        EncoderConfig {
            ffmpeg: self.ffmpeg.map(PathBuf::from).unwrap_or(defaults.ffmpeg),
            ffprobe: self.ffprobe.map(PathBuf::from).unwrap_or(defaults.ffprobe),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileQaConfig {
    #[serde(default)]
    threshold: Option<f64>,
    #[serde(default)]
    safety_instructions: Option<String>,
    #[serde(default)]
    k: Option<usize>,
    #[serde(default)]
    fail_open: Option<bool>,
}

impl FileQaConfig {
    fn into_domain(self) -> Result<QaChainConfig> {
        let defaults = QaChainConfig::default();
        let config = QaChainConfig {
            threshold: self.threshold.unwrap_or(defaults.threshold),
            safety_instructions: self
                .safety_instructions
                .unwrap_or(defaults.safety_instructions),
            k: self.k.unwrap_or(defaults.k),
            failure_policy: match self.fail_open {
                Some(false) => GateFailurePolicy::Closed,
                _ => GateFailurePolicy::Open,
            },
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileRunConfig {
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

impl FileRunConfig {
    fn into_domain(self) -> RunConfig {
        RunConfig {
            timeout: self
                .timeout_seconds
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }
}
