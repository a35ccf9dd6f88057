use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
    Client,
};
use async_trait::async_trait;
use common::{error::AppError, storage::types::passage::Passage, utils::config::AppConfig};
use tracing::{debug, instrument};

use crate::retriever::RetrievedPassage;

pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 4000;

const CONTEXT_SEPARATOR: &str = "\n\n";

pub const ANSWER_SYSTEM_PROMPT: &str = "You answer questions about a single document. \
Use only the provided context to answer. If the context does not contain the answer, \
say that the document does not provide enough information. Keep the answer concise.";

/// Produces text from a prompt. Implemented by remote models and by test doubles.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String, AppError>;
}

pub struct OpenAiGenerator {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiGenerator {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: String) -> Self {
        Self {
            client,
            model,
            temperature: 0.1,
            max_tokens: 512,
        }
    }

    pub fn from_config(client: Arc<Client<OpenAIConfig>>, config: &AppConfig) -> Self {
        Self {
            client,
            model: config.generation_model.clone(),
            temperature: config.generation_temperature,
            max_tokens: config.generation_max_tokens,
        }
    }

    pub fn create_chat_request(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<CreateChatCompletionRequest, OpenAIError> {
        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(self.temperature)
            .max_completion_tokens(self.max_tokens)
            .messages([
                ChatCompletionRequestSystemMessage::from(system_prompt).into(),
                ChatCompletionRequestUserMessage::from(user_prompt).into(),
            ])
            .build()
    }
}

#[async_trait]
impl AnswerGenerator for OpenAiGenerator {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String, AppError> {
        let request = self
            .create_chat_request(system_prompt, user_prompt)
            .map_err(|err| AppError::GenerationUnavailable(err.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|err| AppError::GenerationUnavailable(err.to_string()))?;

        process_llm_response(response)
    }
}

pub fn process_llm_response(response: CreateChatCompletionResponse) -> Result<String, AppError> {
    response
        .choices
        .first()
        .and_then(|choice| choice.message.content.as_ref())
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| AppError::GenerationUnavailable("model returned no content".into()))
}

pub fn create_user_message(context: &str, question: &str) -> String {
    format!(
        r"
        Context Information:
        ==================
        {context}

        User Question:
        ==================
        {question}
        "
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAnswer {
    pub answer: String,
    pub cited_pages: Vec<u32>,
    pub passages_used: usize,
}

/// Context handed to the generator plus the passages that made it in.
#[derive(Debug)]
pub struct ContextWindow<'a> {
    pub text: String,
    pub passages: Vec<&'a Passage>,
}

impl ContextWindow<'_> {
    /// Pages of the included passages, first occurrence order, without duplicates.
    pub fn cited_pages(&self) -> Vec<u32> {
        let mut pages = Vec::new();
        for page in self.passages.iter().filter_map(|passage| passage.page) {
            if !pages.contains(&page) {
                pages.push(page);
            }
        }
        pages
    }
}

pub struct AnswerSynthesizer {
    generator: Arc<dyn AnswerGenerator>,
    max_context_chars: usize,
}

impl AnswerSynthesizer {
    pub fn new(generator: Arc<dyn AnswerGenerator>, max_context_chars: usize) -> Self {
        Self {
            generator,
            max_context_chars: max_context_chars.max(1),
        }
    }

    /// Concatenates passages in retrieval order until the character budget is spent.
    ///
    /// The first passage is always present, cut to the budget if it alone exceeds it.
    /// Assembly stops at the first later passage that does not fit whole.
    pub fn build_context<'a>(&self, passages: &'a [RetrievedPassage]) -> ContextWindow<'a> {
        let mut text = String::new();
        let mut used_chars = 0usize;
        let mut included = Vec::new();
        let separator_chars = CONTEXT_SEPARATOR.chars().count();

        for retrieved in passages {
            let passage_chars = retrieved.passage.text.chars().count();

            if included.is_empty() {
                if passage_chars > self.max_context_chars {
                    text.extend(retrieved.passage.text.chars().take(self.max_context_chars));
                    used_chars = self.max_context_chars;
                } else {
                    text.push_str(&retrieved.passage.text);
                    used_chars = passage_chars;
                }
                included.push(&retrieved.passage);
                continue;
            }

            let needed = separator_chars.saturating_add(passage_chars);
            if used_chars.saturating_add(needed) > self.max_context_chars {
                break;
            }
            text.push_str(CONTEXT_SEPARATOR);
            text.push_str(&retrieved.passage.text);
            used_chars = used_chars.saturating_add(needed);
            included.push(&retrieved.passage);
        }

        ContextWindow {
            text,
            passages: included,
        }
    }

    #[instrument(skip_all, fields(passages = passages.len()))]
    pub async fn synthesize(
        &self,
        question: &str,
        passages: &[RetrievedPassage],
    ) -> Result<SynthesizedAnswer, AppError> {
        if passages.is_empty() {
            return Err(AppError::InsufficientContext);
        }

        let context = self.build_context(passages);
        let user_message = create_user_message(&context.text, question);

        let answer = self
            .generator
            .generate(ANSWER_SYSTEM_PROMPT, &user_message)
            .await?;

        debug!(
            context_chars = context.text.chars().count(),
            passages_used = context.passages.len(),
            "answer generated"
        );

        Ok(SynthesizedAnswer {
            answer,
            cited_pages: context.cited_pages(),
            passages_used: context.passages.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingGenerator {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AnswerGenerator for RecordingGenerator {
        async fn generate(&self, _system: &str, user_prompt: &str) -> Result<String, AppError> {
            self.prompts.lock().await.push(user_prompt.to_string());
            Ok("generated answer".to_string())
        }
    }

    struct UnavailableGenerator;

    #[async_trait]
    impl AnswerGenerator for UnavailableGenerator {
        async fn generate(&self, _system: &str, _user: &str) -> Result<String, AppError> {
            Err(AppError::GenerationUnavailable("connection refused".into()))
        }
    }

    fn retrieved(ordinal: usize, text: &str, page: Option<u32>, score: f32) -> RetrievedPassage {
        RetrievedPassage {
            passage: Passage {
                document_id: "doc".into(),
                ordinal,
                text: text.into(),
                char_range: 0..text.chars().count(),
                page,
                last_page: page,
            },
            score,
        }
    }

    #[tokio::test]
    async fn test_no_passages_is_insufficient_context() {
        let generator = Arc::new(RecordingGenerator::default());
        let synthesizer = AnswerSynthesizer::new(generator.clone(), DEFAULT_MAX_CONTEXT_CHARS);

        let result = synthesizer.synthesize("anything?", &[]).await;
        assert!(matches!(result, Err(AppError::InsufficientContext)));
        assert!(generator.prompts.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_cited_pages_are_deduplicated_and_skip_missing_pages() {
        let generator = Arc::new(RecordingGenerator::default());
        let synthesizer = AnswerSynthesizer::new(generator.clone(), DEFAULT_MAX_CONTEXT_CHARS);
        let passages = vec![
            retrieved(0, "alpha", Some(2), 0.9),
            retrieved(1, "beta", None, 0.8),
            retrieved(2, "gamma", Some(2), 0.7),
            retrieved(3, "delta", Some(1), 0.6),
        ];

        let answer = synthesizer
            .synthesize("what?", &passages)
            .await
            .expect("synthesize");

        assert_eq!(answer.answer, "generated answer");
        assert_eq!(answer.cited_pages, vec![2, 1]);
        assert_eq!(answer.passages_used, 4);

        let prompts = generator.prompts.lock().await;
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("alpha\n\nbeta\n\ngamma\n\ndelta"));
        assert!(prompts[0].contains("what?"));
    }

    #[test]
    fn test_context_budget_stops_at_first_passage_that_does_not_fit() {
        let synthesizer = AnswerSynthesizer::new(Arc::new(RecordingGenerator::default()), 12);
        let passages = vec![
            retrieved(0, "aaaa", Some(1), 0.9),
            retrieved(1, "bbbbbbbbbb", Some(2), 0.8),
            retrieved(2, "cc", Some(3), 0.7),
        ];

        let window = synthesizer.build_context(&passages);
        assert_eq!(window.text, "aaaa");
        assert_eq!(window.cited_pages(), vec![1]);
    }

    #[test]
    fn test_oversized_first_passage_is_truncated() {
        let synthesizer = AnswerSynthesizer::new(Arc::new(RecordingGenerator::default()), 5);
        let passages = vec![retrieved(0, "ééééééééé", Some(4), 0.9)];

        let window = synthesizer.build_context(&passages);
        assert_eq!(window.text.chars().count(), 5);
        assert_eq!(window.cited_pages(), vec![4]);
    }

    #[tokio::test]
    async fn test_generator_failure_is_propagated() {
        let synthesizer =
            AnswerSynthesizer::new(Arc::new(UnavailableGenerator), DEFAULT_MAX_CONTEXT_CHARS);
        let result = synthesizer
            .synthesize("q", &[retrieved(0, "text", Some(1), 0.5)])
            .await;
        assert!(matches!(result, Err(AppError::GenerationUnavailable(_))));
    }

    #[test]
    fn test_chat_request_carries_sampling_settings() {
        let generator = OpenAiGenerator::new(Arc::new(Client::new()), "gpt-4o-mini".into());
        let request = generator
            .create_chat_request(ANSWER_SYSTEM_PROMPT, "question")
            .expect("request builds");
        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.temperature, Some(0.1));
        assert_eq!(request.max_completion_tokens, Some(512));
        assert_eq!(request.messages.len(), 2);
    }
}
