mod openai;

use std::{future::Future, sync::Arc};

use tracing::{info, warn};

pub use openai::OpenAiNarrator;

use crate::{
    control::{ProgressReporter, RunControl, Stage},
    errors::Result,
    slide::{PositionClass, Script, SlideImage},
    store::ArtifactStore,
};

pub const SYSTEM_INSTRUCTION: &str = "You are an expert computer science lecturer delivering clear, concise explanations.
Rules:
1. ONLY explain visible content
2. Use natural speech patterns
3. No meta-references or slide mentions
4. Skip irrelevant metadata (names, dates, institutions)
5. Maintain logical flow between slides
6. Keep explanations focused and precise
7. Explain concepts concisely based on the visible content only
8. Never say \"Title:...\"

Speaking style:
- Conversational and engaging
- Direct and clear
- Professional but approachable
- Concise yet thorough
";

/// Narration policy for a position in the deck.
pub fn position_instruction(position: PositionClass) -> &'static str {
    match position {
        PositionClass::First => {
            "Just mention the name of the algorithm or topic we will explore. Duration: 2-5 seconds."
        }
        PositionClass::Middle => {
            "Continue the technical explanation, connecting with previous concepts. \
             Typically 40-90 seconds, but if the slide is mostly a short title or an outline, \
             keep it 4-15 seconds."
        }
        PositionClass::Last => "Conclude the visible content naturally.",
    }
}

/// The text half of the per-slide user turn; the image travels beside it.
pub fn render_user_instruction(position: PositionClass) -> String {
    format!(
        "Generate a teaching script following these parameters:\n\
         1. Content scope: Only explain visible elements and avoid mentioning what we will come in coming slides\n\
         2. Position context: {}\n\
         3. Technical accuracy: Maintain precise terminology\n\
         4. Flow: Natural transitions between concepts\n\
         5. Avoid repeating 'Building upon'",
        position_instruction(position)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationRole {
    System,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationEntry {
    pub role: ConversationRole,
    pub content: String,
}

/// Append-only record of one orchestration run: the system entry followed by
/// one assistant entry per narrated slide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationState {
    entries: Vec<ConversationEntry>,
}

impl ConversationState {
    pub fn new(system: &str) -> Self {
        Self {
            entries: vec![ConversationEntry {
                role: ConversationRole::System,
                content: system.to_string(),
            }],
        }
    }

    pub fn push_assistant(&mut self, content: &str) {
        self.entries.push(ConversationEntry {
            role: ConversationRole::Assistant,
            content: content.to_string(),
        });
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn system(&self) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.role == ConversationRole::System)
            .map(|entry| entry.content.as_str())
    }

    pub fn narrations(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|entry| entry.role == ConversationRole::Assistant)
            .map(|entry| entry.content.as_str())
    }

    pub fn narration_count(&self) -> usize {
        self.narrations().count()
    }
}

pub struct NarrationRequest<'a> {
    pub image: &'a SlideImage,
    pub total: usize,
    pub position: PositionClass,
    pub state: &'a ConversationState,
    pub instruction: String,
}

/// Vision-language model producing narration for one slide.
pub trait NarrationModel: Send + Sync {
    fn narrate(&self, request: NarrationRequest<'_>) -> impl Future<Output = Result<String>> + Send;
}

pub struct ScriptOrchestrator<N> {
    model: Arc<N>,
}

impl<N: NarrationModel> ScriptOrchestrator<N> {
    pub fn new(model: Arc<N>) -> Self {
        Self { model }
    }

    /// Narrates the slides strictly in order. A failed slide gets an empty
    /// script and the run continues; only an abort stops it early.
    pub async fn generate(
        &self,
        images: &[SlideImage],
        control: &RunControl,
        store: &ArtifactStore,
        progress: &ProgressReporter,
    ) -> Result<(Vec<Script>, ConversationState)> {
        let total = images.len();
        let mut state = ConversationState::new(SYSTEM_INSTRUCTION);
        let mut scripts = Vec::with_capacity(total);

        for (done, image) in images.iter().enumerate() {
            control.check()?;
            progress.step(
                Stage::Scripts,
                done,
                total,
                format!("narrating slide {} of {total}", image.index),
            );

            let position = image.index.position(total);
            let request = NarrationRequest {
                image,
                total,
                position,
                state: &state,
                instruction: render_user_instruction(position),
            };

            let text = match self.model.narrate(request).await {
                Ok(text) => text.trim().to_string(),
                Err(err) => {
                    warn!(
                        target: "script_orchestrator",
                        slide = image.index.get(),
                        error = %err,
                        "narration failed; continuing with an empty script"
                    );
                    String::new()
                }
            };

            state.push_assistant(&text);
            let script = Script {
                index: image.index,
                text,
            };
            store.write_script(&script).await?;
            info!(
                target: "script_orchestrator",
                slide = image.index.get(),
                %position,
                chars = script.text.len(),
                "script generated"
            );
            scripts.push(script);
        }

        progress.step(Stage::Scripts, total, total, format!("{total} scripts generated"));
        Ok((scripts, state))
    }
}
