use crate::llm;
use crate::models::{ModelOption, Provider, ProviderKind};
use crate::telemetry;

/**
 * \brief Hard-coded fallback catalog for a provider.
 *
 * Used whenever network discovery is unavailable or fails. Insertion
 * order is display order; ids are unique within a provider.
 */
pub fn defaults(kind: ProviderKind) -> Vec<ModelOption> {
    match kind {
        ProviderKind::Gemini => gemini_defaults(),
        ProviderKind::HuggingFace => huggingface_defaults(),
    }
}

/**
 * \brief Refresh the catalog from the provider's listing endpoint.
 *
 * Gemini supports live listing; any network or parse failure, or an
 * empty filtered result, silently falls back to defaults() (logged
 * only). Hugging Face exposes no listing endpoint here, so its catalog
 * is always the default list. No caching: each call re-queries.
 */
pub async fn discover(provider: &Provider) -> Vec<ModelOption> {
    match provider.kind {
        ProviderKind::HuggingFace => defaults(ProviderKind::HuggingFace),
        ProviderKind::Gemini => match llm::list_gemini_models(provider).await {
            Ok(models) if !models.is_empty() => models,
            Ok(_) => {
                telemetry::log_event(
                    telemetry::Category::Catalog,
                    "gemini discovery returned no usable models; using defaults",
                );
                defaults(ProviderKind::Gemini)
            }
            Err(e) => {
                telemetry::log_error(
                    telemetry::Category::Catalog,
                    &format!("gemini discovery failed: {}", e),
                );
                defaults(ProviderKind::Gemini)
            }
        },
    }
}

fn gemini_defaults() -> Vec<ModelOption> {
    vec![
        ModelOption::new(
            "gemini-1.5-pro",
            "Gemini 1.5 Pro",
            "Stable version with 2 million token support",
        ),
        ModelOption::new(
            "gemini-1.5-flash",
            "Gemini 1.5 Flash",
            "Fast and versatile multimodal model",
        ),
        ModelOption::new(
            "gemini-pro-vision",
            "Gemini 1.0 Pro Vision",
            "Optimized for image understanding",
        ),
        ModelOption::new(
            "gemini-1.5-flash-8b",
            "Gemini 1.5 Flash-8B",
            "Cost effective smaller flash model",
        ),
    ]
}

fn huggingface_defaults() -> Vec<ModelOption> {
    vec![
        ModelOption::new("gpt2", "GPT-2", "OpenAI's GPT-2 language model"),
        ModelOption::new(
            "microsoft/DialoGPT-large",
            "DialoGPT Large",
            "Microsoft's dialogue generation model",
        ),
        ModelOption::new(
            "facebook/blenderbot-400M-distill",
            "BlenderBot 400M",
            "Facebook's conversational AI",
        ),
        ModelOption::new(
            "EleutherAI/gpt-neo-1.3B",
            "GPT-Neo 1.3B",
            "EleutherAI's GPT-Neo model",
        ),
        ModelOption::new(
            "EleutherAI/gpt-j-6B",
            "GPT-J 6B",
            "EleutherAI's GPT-J model",
        ),
        ModelOption::new(
            "bigscience/bloom",
            "BLOOM",
            "BigScience's Large Language Model",
        ),
        ModelOption::new(
            "google/flan-t5-xxl",
            "Flan-T5 XXL",
            "Google's Flan-T5 model",
        ),
        ModelOption::new(
            "meta-llama/Llama-2-7b-chat-hf",
            "Llama-2 7B Chat",
            "Meta's Llama 2 chat model",
        ),
        ModelOption::new("tiiuae/falcon-7b", "Falcon 7B", "TIIUAE's Falcon model"),
        ModelOption::new(
            "mistralai/Mistral-7B-Instruct-v0.2",
            "Mistral 7B Instruct",
            "Mistral AI's instruction-tuned model",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_defaults_are_idempotent() {
        for kind in ProviderKind::ALL {
            let first: Vec<String> = defaults(kind).into_iter().map(|m| m.id).collect();
            let second: Vec<String> = defaults(kind).into_iter().map(|m| m.id).collect();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_default_ids_are_unique_within_a_provider() {
        for kind in ProviderKind::ALL {
            let models = defaults(kind);
            let ids: HashSet<&str> = models.iter().map(|m| m.id.as_str()).collect();
            assert_eq!(ids.len(), models.len());
        }
    }

    #[test]
    fn test_first_gemini_default_matches_fallback_model_id() {
        assert_eq!(
            defaults(ProviderKind::Gemini)[0].id,
            ProviderKind::Gemini.default_model()
        );
        assert_eq!(
            defaults(ProviderKind::HuggingFace)[0].id,
            ProviderKind::HuggingFace.default_model()
        );
    }

    #[tokio::test]
    async fn test_failed_discovery_falls_back_to_defaults() {
        // A blank key makes the listing call fail fast server-side or
        // not even authenticate; discover must still hand back the
        // default catalog rather than an error.
        let provider =
            Provider::new(ProviderKind::Gemini, "").with_api_base("http://127.0.0.1:1");
        let models = discover(&provider).await;
        let expected: Vec<String> = defaults(ProviderKind::Gemini)
            .into_iter()
            .map(|m| m.id)
            .collect();
        let got: Vec<String> = models.into_iter().map(|m| m.id).collect();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn test_huggingface_discovery_is_the_default_list() {
        let provider = Provider::new(ProviderKind::HuggingFace, "hf-key");
        let models = discover(&provider).await;
        assert_eq!(models, defaults(ProviderKind::HuggingFace));
    }
}
