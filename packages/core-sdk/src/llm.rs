use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::models::{CompletionRequest, ModelOption, Provider, ProviderKind};
use crate::telemetry;

const HF_WHOAMI_URL: &str = "https://huggingface.co/api/whoami";

/**
 * \brief Issue one text-generation call and return the normalized reply.
 *
 * Dispatches on the provider kind; the two providers differ only in
 * endpoint shape, auth placement and envelope field names. A 200
 * response whose payload matches neither known shape degrades to the
 * stringified raw payload — it never fails the caller.
 */
pub async fn complete(provider: &Provider, req: &CompletionRequest) -> Result<String> {
    if provider.api_key.trim().is_empty() {
        return Err(Error::Configuration(provider.kind));
    }
    match provider.kind {
        ProviderKind::Gemini => complete_gemini(provider, req).await,
        ProviderKind::HuggingFace => complete_huggingface(provider, req).await,
    }
}

async fn complete_gemini(provider: &Provider, req: &CompletionRequest) -> Result<String> {
    let url = format!(
        "{}/models/{}:generateContent",
        provider.api_base.trim_end_matches('/'),
        req.model
    );
    let client = reqwest::Client::new();
    let resp = client
        .post(url)
        .query(&[("key", provider.api_key.as_str())])
        .json(&gemini_request_body(req))
        .send()
        .await
        .map_err(|e| network_error(provider.kind, e))?;

    if !resp.status().is_success() {
        return Err(status_error(provider.kind, resp).await);
    }
    let body = resp
        .text()
        .await
        .map_err(|e| network_error(provider.kind, e))?;
    Ok(unwrap_gemini_body(&body))
}

async fn complete_huggingface(provider: &Provider, req: &CompletionRequest) -> Result<String> {
    let url = format!(
        "{}/{}",
        provider.api_base.trim_end_matches('/'),
        req.model
    );
    let client = reqwest::Client::new();
    let resp = client
        .post(url)
        .bearer_auth(&provider.api_key)
        .json(&huggingface_request_body(req))
        .send()
        .await
        .map_err(|e| network_error(provider.kind, e))?;

    if !resp.status().is_success() {
        return Err(status_error(provider.kind, resp).await);
    }
    let body = resp
        .text()
        .await
        .map_err(|e| network_error(provider.kind, e))?;
    Ok(unwrap_huggingface_body(&body))
}

/**
 * \brief Query Gemini's model-listing endpoint, filtered to text-generation models.
 *
 * The catalog layer decides what to do when this fails or comes back
 * empty; this function just reports what the provider said.
 */
pub async fn list_gemini_models(provider: &Provider) -> Result<Vec<ModelOption>> {
    let url = format!("{}/models", provider.api_base.trim_end_matches('/'));
    let client = reqwest::Client::new();
    let resp = client
        .get(url)
        .query(&[("key", provider.api_key.as_str())])
        .send()
        .await
        .map_err(|e| network_error(provider.kind, e))?;
    if !resp.status().is_success() {
        return Err(status_error(provider.kind, resp).await);
    }
    let v: Value = resp
        .json()
        .await
        .map_err(|e| network_error(provider.kind, e))?;
    Ok(parse_gemini_models(&v))
}

/**
 * \brief Classify a candidate key as usable or not.
 *
 * Blank/whitespace keys short-circuit to false without any network
 * traffic. Gemini is probed through its listing endpoint (no text
 * generation required); Hugging Face through the account whoami
 * endpoint. Any non-2xx or transport failure counts as invalid.
 */
pub async fn validate_key(provider: &Provider) -> bool {
    if provider.api_key.trim().is_empty() {
        return false;
    }
    let client = reqwest::Client::new();
    let result = match provider.kind {
        ProviderKind::Gemini => {
            let url = format!("{}/models", provider.api_base.trim_end_matches('/'));
            client
                .get(url)
                .query(&[("key", provider.api_key.as_str())])
                .send()
                .await
        }
        ProviderKind::HuggingFace => {
            client
                .get(HF_WHOAMI_URL)
                .bearer_auth(&provider.api_key)
                .send()
                .await
        }
    };
    match result {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            telemetry::log_error(
                telemetry::Category::Keys,
                &format!("{} key probe failed: {}", provider.kind, e),
            );
            false
        }
    }
}

fn gemini_request_body(req: &CompletionRequest) -> Value {
    let mut generation_config = json!({
        "temperature": req.temperature,
        "maxOutputTokens": req.max_output_tokens,
        "stopSequences": req.stop_sequences,
    });
    if let Some(top_p) = req.top_p {
        generation_config["topP"] = json!(top_p);
    }
    if let Some(top_k) = req.top_k {
        generation_config["topK"] = json!(top_k);
    }
    json!({
        "contents": [
            {
                "parts": [
                    {"text": req.prompt}
                ]
            }
        ],
        "generationConfig": generation_config,
    })
}

fn huggingface_request_body(req: &CompletionRequest) -> Value {
    json!({
        "inputs": req.prompt,
        "parameters": {
            "max_new_tokens": req.max_output_tokens,
            "temperature": req.temperature,
            "top_p": req.top_p.unwrap_or(0.9),
            "stop_sequences": req.stop_sequences,
            "return_full_text": false,
        },
    })
}

/**
 * \brief Normalize a successful Gemini payload into plain text.
 *
 * Known shape: candidates[0].content.parts[0].text. Anything else is
 * returned as the stringified payload so a malformed-but-200 response
 * never crashes the caller.
 */
fn unwrap_gemini_body(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(v) => extract_gemini_text(&v).unwrap_or_else(|| v.to_string()),
        Err(_) => body.to_string(),
    }
}

/**
 * \brief Normalize a successful Hugging Face payload into plain text.
 *
 * Known shapes: a one-element array carrying generated_text, or a bare
 * object with that field. Same degrade-to-raw rule as Gemini.
 */
fn unwrap_huggingface_body(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(v) => extract_generated_text(&v).unwrap_or_else(|| v.to_string()),
        Err(_) => body.to_string(),
    }
}

fn extract_gemini_text(v: &Value) -> Option<String> {
    v.get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .get(0)?
        .get("text")?
        .as_str()
        .map(|s| s.to_string())
}

fn extract_generated_text(v: &Value) -> Option<String> {
    let holder = if let Some(arr) = v.as_array() {
        arr.first()?
    } else {
        v
    };
    holder
        .get("generated_text")?
        .as_str()
        .map(|s| s.to_string())
}

/**
 * \brief Filter Gemini's listing payload down to usable chat models.
 *
 * Keeps models that declare generateContent support and whose id (after
 * stripping the "models/" prefix) starts with "gemini-". Provider order
 * is preserved.
 */
pub(crate) fn parse_gemini_models(v: &Value) -> Vec<ModelOption> {
    let Some(models) = v.get("models").and_then(|m| m.as_array()) else {
        return Vec::new();
    };
    let mut options = Vec::new();
    for model in models {
        let Some(name) = model.get("name").and_then(|n| n.as_str()) else {
            continue;
        };
        let supports_generate = model
            .get("supportedGenerationMethods")
            .and_then(|m| m.as_array())
            .map(|methods| {
                methods
                    .iter()
                    .any(|m| m.as_str() == Some("generateContent"))
            })
            .unwrap_or(false);
        if !supports_generate {
            continue;
        }
        let id = name.strip_prefix("models/").unwrap_or(name);
        if !id.starts_with("gemini-") {
            continue;
        }
        options.push(ModelOption::new(
            id,
            model
                .get("displayName")
                .and_then(|d| d.as_str())
                .unwrap_or(id),
            model
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or(""),
        ));
    }
    options
}

async fn status_error(kind: ProviderKind, resp: reqwest::Response) -> Error {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Error::Authentication(kind);
    }
    let message = resp.text().await.unwrap_or_default();
    Error::Provider {
        provider: kind,
        status: status.as_u16(),
        message,
    }
}

fn network_error(kind: ProviderKind, source: reqwest::Error) -> Error {
    Error::Network {
        provider: kind,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemini_well_formed_response_returns_text_unmodified() {
        let body = json!({
            "candidates": [
                {"content": {"parts": [{"text": "fn main() {} is a Rust entry point"}]}}
            ]
        })
        .to_string();
        assert_eq!(
            unwrap_gemini_body(&body),
            "fn main() {} is a Rust entry point"
        );
    }

    #[test]
    fn test_gemini_unexpected_shape_degrades_to_raw_payload() {
        let v = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        assert_eq!(unwrap_gemini_body(&v.to_string()), v.to_string());
    }

    #[test]
    fn test_gemini_non_json_success_body_is_returned_verbatim() {
        assert_eq!(unwrap_gemini_body("not json at all"), "not json at all");
    }

    #[test]
    fn test_huggingface_array_response() {
        let body = json!([{"generated_text": "hello from the model"}]).to_string();
        assert_eq!(unwrap_huggingface_body(&body), "hello from the model");
    }

    #[test]
    fn test_huggingface_bare_object_response() {
        let body = json!({"generated_text": "also fine"}).to_string();
        assert_eq!(unwrap_huggingface_body(&body), "also fine");
    }

    #[test]
    fn test_huggingface_unknown_shape_degrades_to_raw_payload() {
        let v = json!({"error": "model overloaded", "estimated_time": 20.0});
        assert_eq!(unwrap_huggingface_body(&v.to_string()), v.to_string());
    }

    #[test]
    fn test_parse_gemini_models_filters_and_preserves_order() {
        let v = json!({
            "models": [
                {
                    "name": "models/gemini-1.5-pro",
                    "displayName": "Gemini 1.5 Pro",
                    "description": "Stable",
                    "supportedGenerationMethods": ["generateContent", "countTokens"]
                },
                {
                    "name": "models/embedding-001",
                    "displayName": "Embedding",
                    "supportedGenerationMethods": ["embedContent"]
                },
                {
                    "name": "models/text-bison",
                    "displayName": "Bison",
                    "supportedGenerationMethods": ["generateContent"]
                },
                {
                    "name": "models/gemini-1.5-flash",
                    "supportedGenerationMethods": ["generateContent"]
                }
            ]
        });
        let models = parse_gemini_models(&v);
        let ids: Vec<&str> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["gemini-1.5-pro", "gemini-1.5-flash"]);
        assert_eq!(models[0].display_name, "Gemini 1.5 Pro");
        // Missing displayName falls back to the id.
        assert_eq!(models[1].display_name, "gemini-1.5-flash");
    }

    #[test]
    fn test_parse_gemini_models_unexpected_payload_is_empty() {
        assert!(parse_gemini_models(&json!({"data": []})).is_empty());
        assert!(parse_gemini_models(&json!("nope")).is_empty());
    }

    #[test]
    fn test_gemini_body_omits_unset_sampling_params() {
        let req = CompletionRequest::new("gemini-1.5-pro", "hi");
        let body = gemini_request_body(&req);
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hi");
        assert!(body["generationConfig"].get("topP").is_none());
        assert!(body["generationConfig"].get("topK").is_none());
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn test_huggingface_body_suppresses_prompt_echo() {
        let mut req = CompletionRequest::new("gpt2", "hello");
        req.stop_sequences = vec!["\n\n".to_string()];
        let body = huggingface_request_body(&req);
        assert_eq!(body["inputs"], "hello");
        assert_eq!(body["parameters"]["return_full_text"], false);
        assert_eq!(body["parameters"]["stop_sequences"][0], "\n\n");
    }

    #[tokio::test]
    async fn test_blank_key_validation_short_circuits() {
        for kind in ProviderKind::ALL {
            let provider = Provider::new(kind, "   ");
            assert!(!validate_key(&provider).await);
        }
    }

    #[tokio::test]
    async fn test_blank_key_completion_is_a_configuration_error() {
        let provider = Provider::new(ProviderKind::Gemini, "");
        let req = CompletionRequest::new("gemini-1.5-pro", "hi");
        let err = complete(&provider, &req).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(ProviderKind::Gemini)));
    }
}
