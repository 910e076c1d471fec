use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::LazyLock,
};

use regex::Regex;
use tracing::{debug, warn};

use super::{GateFailurePolicy, stop_words};
use crate::errors::{PipelineError, Result};

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w\w+\b").expect("token pattern should compile"));

static STOP_WORDS: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| stop_words::ENGLISH.iter().copied().collect());

const MAX_NGRAM: usize = 2;

type SparseVector = BTreeMap<usize, f64>;

/// Decides whether a question is close enough to the narration to be worth
/// answering. Fitted once per script collection; the threshold is applied at
/// query time.
#[derive(Debug, Clone)]
pub struct ContentRelevanceGate {
    model: Option<TfIdfModel>,
    threshold: f64,
    failure_policy: GateFailurePolicy,
}

impl ContentRelevanceGate {
    /// Fits the model over every script plus their concatenation. A fit
    /// failure is logged and leaves the gate governed by `failure_policy`.
    pub fn build<S: AsRef<str>>(
        scripts: &[S],
        threshold: f64,
        failure_policy: GateFailurePolicy,
    ) -> Self {
        let model = match TfIdfModel::fit(scripts) {
            Ok(model) => {
                debug!(
                    target: "relevance_gate",
                    documents = model.documents.len(),
                    terms = model.vocabulary.len(),
                    threshold,
                    "relevance model fitted"
                );
                Some(model)
            }
            Err(err) => {
                warn!(
                    target: "relevance_gate",
                    error = %err,
                    policy = ?failure_policy,
                    "relevance model could not be fitted"
                );
                None
            }
        };

        Self {
            model,
            threshold,
            failure_policy,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    /// Highest cosine similarity between the question and any fitted
    /// document, or `None` when no model is available.
    pub fn score(&self, question: &str) -> Option<f64> {
        let model = self.model.as_ref()?;
        Some(model.max_similarity(question))
    }

    pub fn accepts(&self, question: &str) -> bool {
        let question = question.trim();
        if question.is_empty() {
            return false;
        }

        match self.score(question) {
            Some(score) => {
                let accepted = score > self.threshold;
                debug!(
                    target: "relevance_gate",
                    score,
                    threshold = self.threshold,
                    accepted,
                    "scored question"
                );
                accepted
            }
            None => self.failure_policy == GateFailurePolicy::Open,
        }
    }
}

#[derive(Debug, Clone)]
struct TfIdfModel {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f64>,
    documents: Vec<SparseVector>,
}

impl TfIdfModel {
    fn fit<S: AsRef<str>>(scripts: &[S]) -> Result<Self> {
        let combined = scripts
            .iter()
            .map(|script| script.as_ref())
            .collect::<Vec<_>>()
            .join(" ");
        let mut corpus: Vec<Vec<String>> = scripts
            .iter()
            .map(|script| analyze(script.as_ref()))
            .collect();
        corpus.push(analyze(&combined));

        let mut vocabulary: HashMap<String, usize> = HashMap::new();
        let mut document_frequency: Vec<usize> = Vec::new();
        for terms in &corpus {
            let unique: HashSet<&String> = terms.iter().collect();
            for term in unique {
                let next_id = vocabulary.len();
                let id = *vocabulary.entry(term.clone()).or_insert(next_id);
                if id == document_frequency.len() {
                    document_frequency.push(0);
                }
                document_frequency[id] += 1;
            }
        }

        if vocabulary.is_empty() {
            return Err(PipelineError::EmptyInput(
                "scripts contain no indexable terms".to_string(),
            ));
        }

        let n = corpus.len() as f64;
        let idf: Vec<f64> = document_frequency
            .iter()
            .map(|df| ((1.0 + n) / (1.0 + *df as f64)).ln() + 1.0)
            .collect();

        let mut model = Self {
            vocabulary,
            idf,
            documents: Vec::with_capacity(corpus.len()),
        };
        model.documents = corpus.iter().map(|terms| model.vectorize(terms)).collect();
        Ok(model)
    }

    fn vectorize(&self, terms: &[String]) -> SparseVector {
        let mut vector = SparseVector::new();
        for term in terms {
            if let Some(&id) = self.vocabulary.get(term) {
                *vector.entry(id).or_insert(0.0) += 1.0;
            }
        }
        for (id, weight) in vector.iter_mut() {
            *weight *= self.idf[*id];
        }
        let norm = vector.values().map(|w| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            for weight in vector.values_mut() {
                *weight /= norm;
            }
        }
        vector
    }

    fn max_similarity(&self, question: &str) -> f64 {
        let query = self.vectorize(&analyze(question));
        if query.is_empty() {
            return 0.0;
        }
        self.documents
            .iter()
            .map(|document| dot(&query, document))
            .fold(0.0, f64::max)
    }
}

/// Unit-normalized vectors, so the dot product is the cosine.
fn dot(a: &SparseVector, b: &SparseVector) -> f64 {
    a.iter()
        .filter_map(|(id, x)| b.get(id).map(|y| x * y))
        .sum()
}

/// Lowercased word unigrams and bigrams with stop words removed.
fn analyze(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = TOKEN
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|token| !STOP_WORDS.contains(token))
        .collect();

    let mut terms: Vec<String> = tokens.iter().map(|token| token.to_string()).collect();
    for n in 2..=MAX_NGRAM {
        terms.extend(tokens.windows(n).map(|window| window.join(" ")));
    }
    terms
}
