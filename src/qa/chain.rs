use std::{future::Future, sync::Arc};

use tracing::{debug, info};

use super::{REFUSAL, cosine_similarity};
use crate::{
    errors::{PipelineError, Result},
    slide::{Script, SlideIndex},
};

/// Turns texts into dense vectors, one per input, in input order.
pub trait Embedder: Send + Sync {
    fn embed(&self, texts: Vec<String>) -> impl Future<Output = Result<Vec<Vec<f64>>>> + Send;
}

/// Completes a fully rendered prompt.
pub trait AnswerModel: Send + Sync {
    fn complete(&self, prompt: String) -> impl Future<Output = Result<String>> + Send;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedPassage {
    pub index: SlideIndex,
    pub text: String,
    pub score: f64,
}

#[derive(Debug, Clone)]
struct IndexedPassage {
    index: SlideIndex,
    text: String,
    vector: Vec<f64>,
}

/// Answers questions from the narration. A pure function of the scripts and
/// the extra instructions it was built with; rebuilding replaces it.
pub struct RetrievalQaChain<E, A> {
    embedder: Arc<E>,
    answerer: Arc<A>,
    passages: Vec<IndexedPassage>,
    k: usize,
    extra_instructions: Option<String>,
}

impl<E: Embedder, A: AnswerModel> RetrievalQaChain<E, A> {
    pub async fn build(
        embedder: Arc<E>,
        answerer: Arc<A>,
        scripts: &[Script],
        k: usize,
        extra_instructions: Option<&str>,
    ) -> Result<Self> {
        // Embedding endpoints reject empty input.
        let indexed: Vec<&Script> = scripts.iter().filter(|script| !script.is_blank()).collect();
        let texts: Vec<String> = indexed.iter().map(|script| script.text.clone()).collect();

        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            embedder.embed(texts).await?
        };

        if vectors.len() != indexed.len() {
            return Err(PipelineError::other(format!(
                "embedder returned {} vectors for {} passages",
                vectors.len(),
                indexed.len()
            )));
        }

        let passages = indexed
            .into_iter()
            .zip(vectors)
            .map(|(script, vector)| IndexedPassage {
                index: script.index,
                text: script.text.clone(),
                vector,
            })
            .collect::<Vec<_>>();

        info!(
            target: "qa_chain",
            passages = passages.len(),
            k,
            extra_instructions = extra_instructions.is_some(),
            "retrieval index built"
        );

        Ok(Self {
            embedder,
            answerer,
            passages,
            k: k.max(1),
            extra_instructions: extra_instructions.map(str::to_string),
        })
    }

    pub fn passage_count(&self) -> usize {
        self.passages.len()
    }

    pub fn extra_instructions(&self) -> Option<&str> {
        self.extra_instructions.as_deref()
    }

    /// Top-k passages by cosine similarity; ties keep slide order.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<RetrievedPassage>> {
        if self.passages.is_empty() {
            return Ok(Vec::new());
        }

        let query = self
            .embedder
            .embed(vec![question.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::other("embedder returned no vector for the question"))?;

        let mut scored: Vec<RetrievedPassage> = self
            .passages
            .iter()
            .map(|passage| RetrievedPassage {
                index: passage.index,
                text: passage.text.clone(),
                score: cosine_similarity(&query, &passage.vector),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(self.k);
        Ok(scored)
    }

    pub async fn answer(&self, question: &str) -> Result<String> {
        let passages = self
            .retrieve(question)
            .await
            .map_err(|err| PipelineError::AnswerUnavailable(err.to_string()))?;
        debug!(
            target: "qa_chain",
            slides = ?passages.iter().map(|p| p.index.get()).collect::<Vec<_>>(),
            "retrieved context"
        );

        let context = passages
            .iter()
            .map(|passage| passage.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = build_prompt(&context, question, self.extra_instructions.as_deref());

        self.answerer
            .complete(prompt)
            .await
            .map(|answer| answer.trim().to_string())
            .map_err(|err| PipelineError::AnswerUnavailable(err.to_string()))
    }
}

pub fn build_prompt(context: &str, question: &str, extra_instructions: Option<&str>) -> String {
    let mut prompt = format!(
        "\nYou are an expert lecturer. Below is some context from the lecture:\n\
         {context}\n\n\
         Now, answer the following question:\n\
         Question: {question}\n\n\
         If the question requires further explanation beyond what is in the provided lecture notes, \
         feel free to include additional relevant details from your expertise. However, if the \
         question is completely off-topic, reply with: '{REFUSAL}'\n"
    );
    if let Some(extra) = extra_instructions {
        prompt.push_str("\nAdditional Instructions:\n");
        prompt.push_str(extra);
    }
    prompt.push_str("\nAnswer:");
    prompt
}
