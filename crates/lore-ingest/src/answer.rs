use std::sync::Arc;

use anyhow::{bail, Context, Result};
use lore_ai::{ChatRequest, LlmClient, Message, ResponseFormat, DEFAULT_LLM_MODEL};
use lore_graph::{search_terms, GraphFact, GraphRetriever};

pub const BLANK_QUESTION_REPLY: &str = "Please provide a question to ask.";

const ANSWER_SYSTEM_PROMPT: &str = "You answer questions about people in a chat community \
using only the facts you are given. Reply with one short, warm sentence addressed to the \
asker by name, highlight the answer in **bold**, and never output JSON, code or reasoning. \
If the facts do not answer the question, say so plainly.";

#[derive(Debug, Clone, PartialEq)]
pub struct QuestionAnswererConfig {
    pub model: String,
    pub fact_limit: usize,
    pub max_tokens: Option<u32>,
    pub temperature: f32,
}

impl Default for QuestionAnswererConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_LLM_MODEL.to_string(),
            fact_limit: 25,
            max_tokens: Some(256),
            temperature: 0.0,
        }
    }
}

/// Read-only question path: keyword retrieval over the graph, then a friendly reply.
pub struct QuestionAnswerer {
    client: Arc<dyn LlmClient>,
    retriever: Arc<dyn GraphRetriever>,
    config: QuestionAnswererConfig,
}

impl QuestionAnswerer {
    pub fn new(
        client: Arc<dyn LlmClient>,
        retriever: Arc<dyn GraphRetriever>,
        config: QuestionAnswererConfig,
    ) -> Self {
        Self {
            client,
            retriever,
            config,
        }
    }

    pub async fn answer(&self, question: &str, asker: &str) -> Result<String> {
        let question = question.trim();
        if question.is_empty() {
            return Ok(BLANK_QUESTION_REPLY.to_string());
        }
        let asker = asker.trim();

        let mut terms = search_terms(question);
        let asker_term = asker.to_lowercase();
        if !asker_term.is_empty() && !terms.contains(&asker_term) {
            terms.push(asker_term);
        }
        let facts = self
            .retriever
            .retrieve_facts(&terms, self.config.fact_limit)
            .await
            .context("failed to retrieve graph facts")?;
        tracing::debug!(terms = terms.len(), facts = facts.len(), "retrieved graph facts");

        if facts.is_empty() {
            return Ok(format!(
                "Hey {asker}, I don't know anything about that yet."
            ));
        }

        let response = self
            .client
            .complete(ChatRequest {
                model: self.config.model.clone(),
                messages: vec![
                    Message::system(ANSWER_SYSTEM_PROMPT),
                    Message::user(render_answer_prompt(question, asker, &facts)),
                ],
                max_tokens: self.config.max_tokens,
                temperature: Some(self.config.temperature),
                response_format: ResponseFormat::Text,
            })
            .await
            .context("answer request failed")?;
        let reply = response.message.content.trim();
        if reply.is_empty() {
            bail!("answer model returned an empty reply");
        }
        Ok(reply.to_string())
    }
}

fn render_answer_prompt(question: &str, asker: &str, facts: &[GraphFact]) -> String {
    let mut prompt = format!("userName: {asker}\nquestion: {asker} : {question}\nfacts:\n");
    for fact in facts {
        prompt.push_str("- ");
        prompt.push_str(&fact.to_string());
        prompt.push('\n');
    }
    prompt
}
