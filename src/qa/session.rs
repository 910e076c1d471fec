use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use super::{AnswerModel, ContentRelevanceGate, Embedder, QaChainConfig, REFUSAL, RetrievalQaChain};
use crate::{
    errors::{PipelineError, Result},
    slide::Script,
};

/// Gate and chain built together from one script set and one config.
/// Never mutated; a rebuild swaps in a new engine.
pub struct QaEngine<E, A> {
    pub gate: ContentRelevanceGate,
    pub chain: RetrievalQaChain<E, A>,
    pub config: QaChainConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QaOutcome {
    Answered(String),
    Rejected(String),
}

impl QaOutcome {
    pub fn text(&self) -> &str {
        match self {
            QaOutcome::Answered(text) | QaOutcome::Rejected(text) => text,
        }
    }
}

struct SessionState<E, A> {
    config: QaChainConfig,
    scripts: Option<Vec<Script>>,
    engine: Option<Arc<QaEngine<E, A>>>,
    stale: bool,
}

/// Session-scoped QA state shared by concurrent askers.
///
/// Writers (new scripts, new settings) and rebuilds are serialized on
/// `build_lock`. The engine is built outside the state lock and swapped in
/// with a single write, so a reader sees either the old engine or the new
/// one. A reader that finds the state stale waits for the rebuild instead of
/// answering with outdated settings.
pub struct QaSession<E, A> {
    embedder: Arc<E>,
    answerer: Arc<A>,
    state: RwLock<SessionState<E, A>>,
    build_lock: Mutex<()>,
}

impl<E: Embedder, A: AnswerModel> QaSession<E, A> {
    pub fn new(embedder: Arc<E>, answerer: Arc<A>, config: QaChainConfig) -> Self {
        Self {
            embedder,
            answerer,
            state: RwLock::new(SessionState {
                config,
                scripts: None,
                engine: None,
                stale: false,
            }),
            build_lock: Mutex::new(()),
        }
    }

    pub async fn config(&self) -> QaChainConfig {
        self.state.read().await.config.clone()
    }

    pub async fn engine(&self) -> Option<Arc<QaEngine<E, A>>> {
        self.state.read().await.engine.clone()
    }

    /// Replaces the script set (a new run supersedes the old one) and
    /// rebuilds.
    pub async fn install_scripts(&self, scripts: Vec<Script>) -> Result<()> {
        let _guard = self.build_lock.lock().await;
        {
            let mut state = self.state.write().await;
            state.scripts = Some(scripts);
            state.stale = true;
        }
        self.rebuild_locked().await.map(|_| ())
    }

    /// Applies new settings. The next answer always uses them: if the eager
    /// rebuild fails, the session stays stale and the rebuild is retried
    /// before answering.
    pub async fn update_config(&self, config: QaChainConfig) -> Result<()> {
        config.validate()?;
        let _guard = self.build_lock.lock().await;
        let has_scripts = {
            let mut state = self.state.write().await;
            state.config = config;
            state.stale = state.scripts.is_some();
            state.scripts.is_some()
        };
        if has_scripts {
            if let Err(err) = self.rebuild_locked().await {
                warn!(
                    target: "qa_session",
                    error = %err,
                    "rebuild after settings change failed; will retry before next answer"
                );
            }
        }
        Ok(())
    }

    /// Drops scripts and engine.
    pub async fn clear(&self) {
        let _guard = self.build_lock.lock().await;
        let mut state = self.state.write().await;
        state.scripts = None;
        state.engine = None;
        state.stale = false;
    }

    pub async fn accepts(&self, question: &str) -> Result<bool> {
        let engine = self.current_engine().await?;
        Ok(engine.gate.accepts(question))
    }

    pub async fn ask(&self, question: &str) -> Result<QaOutcome> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PipelineError::EmptyInput("question cannot be empty".to_string()));
        }

        let engine = self.current_engine().await?;
        if !engine.gate.accepts(question) {
            info!(target: "qa_session", question, "question rejected as off-topic");
            return Ok(QaOutcome::Rejected(REFUSAL.to_string()));
        }

        let answer = engine.chain.answer(question).await?;
        Ok(QaOutcome::Answered(answer))
    }

    async fn current_engine(&self) -> Result<Arc<QaEngine<E, A>>> {
        if let Some(engine) = self.fresh_engine().await? {
            return Ok(engine);
        }

        let _guard = self.build_lock.lock().await;
        // Another task may have finished the rebuild while we waited.
        if let Some(engine) = self.fresh_engine().await? {
            return Ok(engine);
        }
        self.rebuild_locked().await
    }

    async fn fresh_engine(&self) -> Result<Option<Arc<QaEngine<E, A>>>> {
        let state = self.state.read().await;
        if state.scripts.is_none() {
            return Err(PipelineError::ChainNotBuilt);
        }
        if state.stale {
            return Ok(None);
        }
        Ok(state.engine.clone())
    }

    /// Caller must hold `build_lock`.
    async fn rebuild_locked(&self) -> Result<Arc<QaEngine<E, A>>> {
        let (config, scripts) = {
            let state = self.state.read().await;
            let scripts = state.scripts.clone().ok_or(PipelineError::ChainNotBuilt)?;
            (state.config.clone(), scripts)
        };

        let texts: Vec<&str> = scripts.iter().map(|script| script.text.as_str()).collect();
        let gate = ContentRelevanceGate::build(&texts, config.threshold, config.failure_policy);
        let chain = RetrievalQaChain::build(
            self.embedder.clone(),
            self.answerer.clone(),
            &scripts,
            config.k,
            config.extra_instructions(),
        )
        .await?;

        let engine = Arc::new(QaEngine {
            gate,
            chain,
            config,
        });

        let mut state = self.state.write().await;
        state.engine = Some(engine.clone());
        state.stale = false;
        info!(
            target: "qa_session",
            threshold = engine.config.threshold,
            k = engine.config.k,
            "QA engine rebuilt"
        );
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::qa::chain::tests::{RecordingAnswerer, sorting_embedder};
    use crate::slide::SlideIndex;

    fn sorting_scripts() -> Vec<Script> {
        [
            "Intro to sorting.",
            "Bubble sort compares adjacent elements.",
            "In summary, sorting is foundational.",
        ]
        .iter()
        .enumerate()
        .map(|(offset, text)| Script {
            index: SlideIndex::from_offset(offset).unwrap(),
            text: text.to_string(),
        })
        .collect()
    }

    fn session() -> QaSession<crate::qa::chain::tests::KeywordEmbedder, RecordingAnswerer> {
        QaSession::new(
            Arc::new(sorting_embedder()),
            Arc::new(RecordingAnswerer::default()),
            QaChainConfig::default(),
        )
    }

    #[tokio::test]
    async fn asking_before_any_run_is_an_error() {
        let session = session();
        let err = session.ask("What is sorting?").await.unwrap_err();
        assert!(matches!(err, PipelineError::ChainNotBuilt));
    }

    #[tokio::test]
    async fn answers_on_topic_and_refuses_off_topic() {
        let session = session();
        session.install_scripts(sorting_scripts()).await.unwrap();

        let answered = session.ask("How does bubble sort compare elements?").await.unwrap();
        assert_eq!(answered, QaOutcome::Answered("An answer.".to_string()));

        let rejected = session.ask("Who won the football match?").await.unwrap();
        assert_eq!(rejected, QaOutcome::Rejected(REFUSAL.to_string()));

        assert!(matches!(
            session.ask("   ").await.unwrap_err(),
            PipelineError::EmptyInput(_)
        ));
    }

    #[tokio::test]
    async fn threshold_change_applies_to_next_check() {
        // 200 distinct words: 399 equally weighted terms, so a one-word
        // question scores 1/sqrt(399), about 0.05.
        let long_script = (0..200).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        let session = session();
        session
            .install_scripts(vec![Script {
                index: SlideIndex::new(1).unwrap(),
                text: long_script,
            }])
            .await
            .unwrap();

        let question = "word7";
        let score = session.engine().await.unwrap().gate.score(question).unwrap();
        assert!(score > 0.04 && score < 0.08, "score was {score}");
        assert!(session.accepts(question).await.unwrap());

        session
            .update_config(QaChainConfig {
                threshold: 0.08,
                ..QaChainConfig::default()
            })
            .await
            .unwrap();

        let engine = session.engine().await.unwrap();
        assert!((engine.gate.threshold() - 0.08).abs() < f64::EPSILON);
        assert!(!session.accepts(question).await.unwrap());
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected_without_side_effects() {
        let session = session();
        session.install_scripts(sorting_scripts()).await.unwrap();
        let err = session
            .update_config(QaChainConfig {
                threshold: 0.2,
                ..QaChainConfig::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
        assert!((session.config().await.threshold - 0.04).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn safety_instructions_reach_the_prompt() {
        let answerer = Arc::new(RecordingAnswerer::default());
        let session = QaSession::new(
            Arc::new(sorting_embedder()),
            answerer.clone(),
            QaChainConfig::default(),
        );
        session.install_scripts(sorting_scripts()).await.unwrap();
        session
            .update_config(QaChainConfig {
                safety_instructions: "Do not give exam answers.".to_string(),
                ..QaChainConfig::default()
            })
            .await
            .unwrap();

        session.ask("What does bubble sort compare?").await.unwrap();
        let prompts = answerer.prompts.lock().unwrap();
        assert!(prompts[0].contains("Additional Instructions:\nDo not give exam answers."));
    }

    /// Fails embedding while `down` is set.
    struct FlakyEmbedder {
        down: AtomicBool,
    }

    impl Embedder for FlakyEmbedder {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
            if self.down.load(Ordering::SeqCst) {
                return Err(PipelineError::other("embedding service unavailable"));
            }
            Ok(texts.iter().map(|text| vec![text.len() as f64, 1.0]).collect())
        }
    }

    #[tokio::test]
    async fn failed_rebuild_is_retried_before_answering() {
        let embedder = Arc::new(FlakyEmbedder {
            down: AtomicBool::new(false),
        });
        let session = QaSession::new(
            embedder.clone(),
            Arc::new(RecordingAnswerer::default()),
            QaChainConfig::default(),
        );
        session.install_scripts(sorting_scripts()).await.unwrap();

        embedder.down.store(true, Ordering::SeqCst);
        session
            .update_config(QaChainConfig {
                threshold: 0.01,
                ..QaChainConfig::default()
            })
            .await
            .unwrap();
        // The old engine is still installed, but it must not serve answers.
        assert!((session.engine().await.unwrap().gate.threshold() - 0.04).abs() < f64::EPSILON);

        embedder.down.store(false, Ordering::SeqCst);
        session.ask("Tell me about bubble sort").await.unwrap();
        assert!((session.engine().await.unwrap().gate.threshold() - 0.01).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn clear_forgets_the_engine() {
        let session = session();
        session.install_scripts(sorting_scripts()).await.unwrap();
        session.clear().await;
        assert!(session.engine().await.is_none());
        assert!(matches!(
            session.ask("sorting?").await.unwrap_err(),
            PipelineError::ChainNotBuilt
        ));
    }
}
