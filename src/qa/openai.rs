use rig::{
    agent::Agent,
    client::{CompletionClient, EmbeddingsClient},
    completion::Prompt,
    embeddings::EmbeddingModel,
    providers::openai,
};

use super::{AnswerModel, Embedder};
use crate::errors::Result;

type OpenAiCompletionModel = <openai::Client as CompletionClient>::CompletionModel;
type OpenAiEmbeddingModel = <openai::Client as EmbeddingsClient>::EmbeddingModel;

pub struct OpenAiEmbedder {
    model: OpenAiEmbeddingModel,
}

impl OpenAiEmbedder {
    pub fn new(client: &openai::Client, model_name: &str) -> Self {
        Self {
            model: client.embedding_model(model_name),
        }
    }
}

impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
        let embeddings = self.model.embed_texts(texts).await?;
        Ok(embeddings.into_iter().map(|embedding| embedding.vec).collect())
    }
}

pub struct OpenAiAnswerer {
    agent: Agent<OpenAiCompletionModel>,
}

impl OpenAiAnswerer {
    pub fn new(client: &openai::Client, model_name: &str) -> Self {
        let agent = client.agent(model_name).name("lecture-qa").build();
        Self { agent }
    }
}

impl AnswerModel for OpenAiAnswerer {
    async fn complete(&self, prompt: String) -> Result<String> {
        Ok(self.agent.prompt(prompt).await?)
    }
}
