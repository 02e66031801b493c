//! # LLM Helpers
//!
//! Provider dispatch for skills. `with_llm!` builds the radkit client for a
//! [`ModelConfig`](crate::models::ModelConfig) and evaluates a body with it;
//! the two runners on top cover structured calls with and without tools.

/// Bind `$llm` to the configured provider's client and evaluate `$body`.
/// Each provider is a different type, so `$body` is expanded once per arm.
#[macro_export]
macro_rules! with_llm {
    ($config:expr, |$llm:ident| $body:expr) => {{
        use radkit::models::providers::{
            AnthropicLlm, DeepSeekLlm, GeminiLlm, GrokLlm, OpenAILlm, OpenRouterLlm,
        };
        use $crate::models::LlmProvider;

        let config = $config;
        match config.provider {
            LlmProvider::Anthropic => {
                let $llm = AnthropicLlm::from_env(&config.model)?;
                $body
            }
            LlmProvider::OpenAI => {
                let $llm = match &config.base_url {
                    Some(base_url) => OpenAILlm::from_env(&config.model)?.with_base_url(base_url),
                    None => OpenAILlm::from_env(&config.model)?,
                };
                $body
            }
            LlmProvider::Gemini => {
                let $llm = GeminiLlm::from_env(&config.model)?;
                $body
            }
            LlmProvider::OpenRouter => {
                let $llm = OpenRouterLlm::from_env(&config.model)?;
                $body
            }
            LlmProvider::Grok => {
                let $llm = GrokLlm::from_env(&config.model)?;
                $body
            }
            LlmProvider::DeepSeek => {
                let $llm = DeepSeekLlm::from_env(&config.model)?;
                $body
            }
        }
    }};
}

/// Run a structured-output LlmFunction with any provider.
#[macro_export]
macro_rules! run_llm_function {
    ($config:expr, $output_type:ty, $system_prompt:expr, $input:expr) => {{
        use radkit::agent::LlmFunction;

        let result: anyhow::Result<$output_type> = $crate::with_llm!($config, |llm| {
            LlmFunction::<$output_type>::new_with_system_instructions(llm, $system_prompt)
                .run($input)
                .await
                .map_err(Into::into)
        });
        result
    }};
}

/// Run an LlmWorker with tools with any provider.
#[macro_export]
macro_rules! run_llm_worker {
    ($config:expr, $output_type:ty, $system_prompt:expr, $input:expr, $($tool:expr),* $(,)?) => {{
        use radkit::agent::LlmWorker;

        let result: anyhow::Result<$output_type> = $crate::with_llm!($config, |llm| {
            LlmWorker::<$output_type>::builder(llm)
                .with_system_instructions($system_prompt)
                $(.with_tool($tool))*
                .build()
                .run($input)
                .await
                .map_err(Into::into)
        });
        result
    }};
}

pub use run_llm_function;
pub use run_llm_worker;
pub use with_llm;
