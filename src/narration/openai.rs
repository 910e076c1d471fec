use std::path::Path;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rig::{
    agent::Agent,
    client::CompletionClient,
    completion::{
        Chat, Message,
        message::{ContentFormat, ImageDetail, ImageMediaType, UserContent},
    },
    one_or_many::OneOrMany,
    providers::openai,
};
use tokio::fs;
use tracing::debug;

use super::{NarrationModel, NarrationRequest, SYSTEM_INSTRUCTION};
use crate::{config::NarrationConfig, errors::Result};

type OpenAiCompletionModel = <openai::Client as CompletionClient>::CompletionModel;

/// Vision-capable chat agent. The system instruction is the agent preamble;
/// prior narrations are replayed as assistant history.
pub struct OpenAiNarrator {
    agent: Agent<OpenAiCompletionModel>,
}

impl OpenAiNarrator {
    pub fn new(client: &openai::Client, model: &str, config: &NarrationConfig) -> Self {
        let agent = client
            .agent(model)
            .name("slide-narrator")
            .preamble(SYSTEM_INSTRUCTION)
            .temperature(config.temperature)
            .max_tokens(config.max_tokens)
            .build();
        Self { agent }
    }
}

/// PNG unless the file is a JPEG.
fn media_type_for(path: &Path) -> ImageMediaType {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => ImageMediaType::JPEG,
        _ => ImageMediaType::PNG,
    }
}

/// The user turn for one slide: instruction text, then the inline image.
fn slide_message(instruction: &str, media_type: ImageMediaType, bytes: &[u8]) -> Message {
    let mut content = OneOrMany::one(UserContent::text(instruction));
    content.push(UserContent::image(
        BASE64.encode(bytes),
        Some(ContentFormat::Base64),
        Some(media_type),
        Some(ImageDetail::Auto),
    ));
    Message::User { content }
}

impl NarrationModel for OpenAiNarrator {
    async fn narrate(&self, request: NarrationRequest<'_>) -> Result<String> {
        let bytes = fs::read(&request.image.path).await?;
        let prompt = slide_message(
            &request.instruction,
            media_type_for(&request.image.path),
            &bytes,
        );

        let history: Vec<Message> = request.state.narrations().map(Message::assistant).collect();
        debug!(
            target: "script_orchestrator",
            slide = request.image.index.get(),
            history = history.len(),
            image_bytes = bytes.len(),
            "requesting narration"
        );

        Ok(self.agent.chat(prompt, history).await?)
    }
}

#[cfg(test)]
mod tests {
    use rig::completion::message::Image;

    use super::*;

    #[test]
    fn slide_turn_carries_text_then_inline_base64_image() {
        let media_type = media_type_for(Path::new("page_1.JPG"));
        let message = slide_message("Narrate slide 1.", media_type, b"jpeg");

        let Message::User { content } = message else {
            panic!("expected a user turn");
        };
        let parts: Vec<&UserContent> = content.iter().collect();
        assert_eq!(parts.len(), 2);
        assert!(matches!(parts[0], UserContent::Text(text) if text.text == "Narrate slide 1."));
        let UserContent::Image(Image {
            data,
            format,
            media_type,
            detail,
            ..
        }) = parts[1]
        else {
            panic!("expected an image part");
        };
        assert_eq!(BASE64.decode(data).unwrap(), b"jpeg");
        assert_eq!(*format, Some(ContentFormat::Base64));
        assert_eq!(*media_type, Some(ImageMediaType::JPEG));
        assert_eq!(*detail, Some(ImageDetail::Auto));
    }

    #[test]
    fn non_jpeg_slides_are_sent_as_png() {
        assert_eq!(media_type_for(Path::new("page_2.png")), ImageMediaType::PNG);
        assert_eq!(media_type_for(Path::new("page_3")), ImageMediaType::PNG);
    }
}
