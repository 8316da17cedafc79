use anyhow::Result;
use axum::{
    extract::{Path, Query},
    http::StatusCode,
    routing::{delete, get, get_service, post},
    Json, Router,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::services::ServeDir;

use crate::{
    analyze::{self, AnalysisPrompt},
    catalog,
    chat::ChatSession,
    db,
    error::Error,
    llm,
    models::{ChatMessage, KeyStatus, ModelOption, Provider, ProviderKind},
    telemetry,
};

/**
 * \brief Process-wide chat session backing the browser UI.
 *
 * The async mutex serializes sends: a second turn waits for the
 * in-flight one, so transcript order always matches issuance order.
 */
static CHAT_SESSION: Lazy<Mutex<ChatSession>> = Lazy::new(|| Mutex::new(ChatSession::new()));

/**
 * \brief Start the local HTTP server: static front end plus JSON API.
 * \param addr Listen address, e.g. "127.0.0.1:5173"
 */
pub async fn run(addr: &str) -> Result<()> {
    let conn = db::open_default_db()?;
    db::migrate(&conn)?;
    telemetry::set_enabled(db::get_telemetry_enabled(&conn)?);
    drop(conn);

    let ui_root =
        std::env::var("AGENTEGRATOR_UI_DIR").unwrap_or_else(|_| "packages/ui/dist".to_string());
    let fallback_root =
        std::env::var("AGENTEGRATOR_UI_FALLBACK").unwrap_or_else(|_| "web".to_string());

    let static_handler = if std::path::Path::new(&ui_root).exists() {
        ServeDir::new(ui_root)
    } else {
        ServeDir::new(fallback_root)
    }
    .append_index_html_on_directories(true);

    let static_service = get_service(static_handler);

    let app = Router::new()
        .route("/api/settings", get(get_settings).post(set_settings))
        .route("/api/keys", post(save_key))
        .route("/api/keys/validate", post(check_key))
        .route("/api/keys/{provider}", delete(delete_key))
        .route("/api/models", get(list_models))
        .route("/api/analyze", post(analyze_code))
        .route("/api/chat", get(get_transcript).post(send_chat))
        .route("/api/health", get(health_check))
        .fallback_service(static_service);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Serialize, Debug)]
struct ProviderSettings {
    provider: ProviderKind,
    has_key: bool,
    selected_model: Option<String>,
}

#[derive(Serialize, Debug)]
struct SettingsResponse {
    active_provider: Option<ProviderKind>,
    providers: Vec<ProviderSettings>,
    temperature: f64,
    max_output_tokens: u32,
    telemetry_enabled: bool,
}

#[derive(Deserialize, Debug)]
struct SettingsInput {
    #[serde(default)]
    active_provider: Option<ProviderKind>,
    /** \brief Provider the selected_model applies to (defaults to the active one). */
    #[serde(default)]
    provider: Option<ProviderKind>,
    #[serde(default)]
    selected_model: Option<String>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    max_output_tokens: Option<u32>,
    #[serde(default)]
    telemetry_enabled: Option<bool>,
}

#[derive(Deserialize, Debug)]
struct KeyRequest {
    provider: ProviderKind,
    api_key: String,
}

#[derive(Serialize, Debug)]
struct KeyValidationResponse {
    provider: ProviderKind,
    status: KeyStatus,
    saved: bool,
}

#[derive(Deserialize, Debug)]
struct ModelQuery {
    provider: Option<ProviderKind>,
}

#[derive(Serialize, Debug)]
struct ModelsResponse {
    provider: ProviderKind,
    models: Vec<ModelOption>,
}

#[derive(Deserialize, Debug)]
struct AnalyzeRequest {
    /** \brief Source code to analyze, embedded verbatim in the prompt. */
    code: String,
    #[serde(default)]
    provider: Option<ProviderKind>,
    #[serde(default)]
    model: Option<String>,
    /** \brief Use the lighter integration-suggestion prompt instead of the full report. */
    #[serde(default)]
    integrations: bool,
}

#[derive(Serialize, Debug)]
struct AnalyzeResponse {
    report: String,
    /** \brief Model that actually answered (may differ after fallback). */
    model: String,
}

#[derive(Deserialize, Debug)]
struct ChatRequest {
    message: String,
}

#[derive(Serialize, Debug)]
struct ChatResponse {
    /** \brief Assistant reply; None when the input was blank (no-op). */
    reply: Option<String>,
    transcript: Vec<ChatMessage>,
}

fn build_settings(conn: &rusqlite::Connection) -> Result<SettingsResponse> {
    let mut providers = Vec::new();
    for kind in ProviderKind::ALL {
        providers.push(ProviderSettings {
            provider: kind,
            has_key: db::get_api_key(conn, kind)?
                .map(|k| !k.trim().is_empty())
                .unwrap_or(false),
            selected_model: db::get_selected_model(conn, kind)?,
        });
    }
    Ok(SettingsResponse {
        active_provider: db::get_active_provider(conn)?,
        providers,
        temperature: db::get_temperature(conn)?,
        max_output_tokens: db::get_max_output_tokens(conn)?,
        telemetry_enabled: db::get_telemetry_enabled(conn)?,
    })
}

/** \brief Provider to use when the request names none: the active one, else Gemini. */
fn resolve_kind(conn: &rusqlite::Connection, requested: Option<ProviderKind>) -> ProviderKind {
    requested
        .or_else(|| db::get_active_provider(conn).ok().flatten())
        .unwrap_or(ProviderKind::Gemini)
}

fn load_provider(conn: &rusqlite::Connection, kind: ProviderKind) -> Result<Provider> {
    let key = db::get_api_key(conn, kind)?.unwrap_or_default();
    Ok(Provider::new(kind, key))
}

async fn get_settings() -> Result<Json<SettingsResponse>, (StatusCode, String)> {
    let conn = db::open_default_db().map_err(internal_err)?;
    let settings = build_settings(&conn).map_err(internal_err)?;
    Ok(Json(settings))
}

async fn set_settings(
    Json(input): Json<SettingsInput>,
) -> Result<Json<SettingsResponse>, (StatusCode, String)> {
    let conn = db::open_default_db().map_err(internal_err)?;
    if let Some(kind) = input.active_provider {
        db::set_active_provider(&conn, kind).map_err(internal_err)?;
    }
    if let Some(model) = &input.selected_model {
        let kind = resolve_kind(&conn, input.provider);
        db::set_selected_model(&conn, kind, model).map_err(internal_err)?;
    }
    if let Some(temperature) = input.temperature {
        if !(0.0..=1.0).contains(&temperature) {
            return Err((
                StatusCode::BAD_REQUEST,
                "temperature must be between 0 and 1".to_string(),
            ));
        }
        db::set_temperature(&conn, temperature).map_err(internal_err)?;
    }
    if let Some(max_output_tokens) = input.max_output_tokens {
        if max_output_tokens == 0 {
            return Err((
                StatusCode::BAD_REQUEST,
                "max output tokens must be greater than zero".to_string(),
            ));
        }
        db::set_max_output_tokens(&conn, max_output_tokens).map_err(internal_err)?;
    }
    if let Some(enabled) = input.telemetry_enabled {
        db::set_telemetry_enabled(&conn, enabled).map_err(internal_err)?;
        telemetry::set_enabled(enabled);
    }
    let settings = build_settings(&conn).map_err(internal_err)?;
    Ok(Json(settings))
}

/**
 * \brief Save a key unconditionally. Validation never gates a save;
 *        an invalid key is reported separately by the validate route.
 */
async fn save_key(
    Json(payload): Json<KeyRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let key = payload.api_key.trim();
    if key.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "API key must not be blank".to_string(),
        ));
    }
    let conn = db::open_default_db().map_err(internal_err)?;
    db::set_api_key(&conn, payload.provider, key).map_err(internal_err)?;
    telemetry::log_event(
        telemetry::Category::Keys,
        &format!("saved key for {}", payload.provider),
    );
    Ok(Json(serde_json::json!({"saved": true})))
}

/**
 * \brief Validate a candidate key; a passing key is also persisted so
 *        validated keys survive without a separate save step.
 */
async fn check_key(
    Json(payload): Json<KeyRequest>,
) -> Result<Json<KeyValidationResponse>, (StatusCode, String)> {
    let key = payload.api_key.trim().to_string();
    let provider = Provider::new(payload.provider, key.clone());
    let valid = llm::validate_key(&provider).await;
    if valid {
        let conn = db::open_default_db().map_err(internal_err)?;
        db::set_api_key(&conn, payload.provider, &key).map_err(internal_err)?;
    }
    telemetry::log_event(
        telemetry::Category::Keys,
        &format!(
            "validated key for {}: {}",
            payload.provider,
            if valid { "valid" } else { "invalid" }
        ),
    );
    Ok(Json(KeyValidationResponse {
        provider: payload.provider,
        status: if valid {
            KeyStatus::Valid
        } else {
            KeyStatus::Invalid
        },
        saved: valid,
    }))
}

async fn delete_key(
    Path(provider): Path<ProviderKind>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let conn = db::open_default_db().map_err(internal_err)?;
    db::clear_api_key(&conn, provider).map_err(internal_err)?;
    telemetry::log_event(
        telemetry::Category::Keys,
        &format!("cleared key for {}", provider),
    );
    Ok(Json(serde_json::json!({"cleared": true})))
}

/**
 * \brief Catalog for a provider: live discovery when a key exists,
 *        defaults otherwise. Discovery failures never fail this route.
 */
async fn list_models(
    Query(q): Query<ModelQuery>,
) -> Result<Json<ModelsResponse>, (StatusCode, String)> {
    let conn = db::open_default_db().map_err(internal_err)?;
    let kind = resolve_kind(&conn, q.provider);
    let provider = load_provider(&conn, kind).map_err(internal_err)?;
    let models = if provider.api_key.trim().is_empty() {
        catalog::defaults(kind)
    } else {
        catalog::discover(&provider).await
    };
    Ok(Json(ModelsResponse {
        provider: kind,
        models,
    }))
}

async fn analyze_code(
    Json(payload): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, (StatusCode, String)> {
    let conn = db::open_default_db().map_err(internal_err)?;
    let kind = resolve_kind(&conn, payload.provider);
    let provider = load_provider(&conn, kind).map_err(internal_err)?;
    let selected = match payload.model {
        Some(m) => Some(m),
        None => db::get_selected_model(&conn, kind).map_err(internal_err)?,
    };
    let prompt_kind = if payload.integrations {
        AnalysisPrompt::Integrations
    } else {
        AnalysisPrompt::Full
    };

    let outcome =
        analyze::analyze_with_prompt(&provider, selected.as_deref(), prompt_kind, &payload.code)
            .await
            .map_err(api_err)?;

    // A fallback sticks for next time; a first-try success never
    // overwrites the stored selection.
    analyze::adopt_fallback_model(&conn, kind, &outcome).map_err(internal_err)?;
    telemetry::log_event(
        telemetry::Category::Server,
        &format!(
            "provider={} model={} code_len={}",
            kind,
            outcome.model,
            payload.code.len()
        ),
    );
    Ok(Json(AnalyzeResponse {
        report: outcome.report,
        model: outcome.model,
    }))
}

async fn send_chat(
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    let conn = db::open_default_db().map_err(internal_err)?;
    let kind = resolve_kind(&conn, None);
    let provider = load_provider(&conn, kind).map_err(internal_err)?;
    let model = db::get_selected_model(&conn, kind)
        .map_err(internal_err)?
        .unwrap_or_else(|| kind.default_model().to_string());
    let temperature = db::get_temperature(&conn).map_err(internal_err)?;
    let max_output_tokens = db::get_max_output_tokens(&conn).map_err(internal_err)?;

    let mut session = CHAT_SESSION.lock().await;
    let reply = session
        .send(
            &provider,
            &model,
            temperature,
            max_output_tokens,
            &payload.message,
        )
        .await
        .map_err(api_err)?;
    telemetry::log_event(
        telemetry::Category::Chat,
        &format!("provider={} model={}", kind, model),
    );
    Ok(Json(ChatResponse {
        reply,
        transcript: session.transcript().to_vec(),
    }))
}

async fn get_transcript() -> Json<ChatResponse> {
    let session = CHAT_SESSION.lock().await;
    Json(ChatResponse {
        reply: None,
        transcript: session.transcript().to_vec(),
    })
}

/**
 * \brief Key-validation probe for the active provider. Provider
 *        failures come back as {ok:false} payloads, not 5xx.
 */
async fn health_check() -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let conn = db::open_default_db().map_err(internal_err)?;
    let kind = resolve_kind(&conn, None);
    let provider = load_provider(&conn, kind).map_err(internal_err)?;
    if provider.api_key.trim().is_empty() {
        return Ok(Json(serde_json::json!({
            "ok": false,
            "provider": kind,
            "error": format!("no {} API key configured", kind),
        })));
    }
    let ok = llm::validate_key(&provider).await;
    Ok(Json(serde_json::json!({
        "ok": ok,
        "provider": kind,
    })))
}

fn internal_err<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/** \brief Map the core taxonomy onto HTTP codes with short messages. */
fn api_err(e: Error) -> (StatusCode, String) {
    let code = match &e {
        Error::Configuration(_) => StatusCode::BAD_REQUEST,
        Error::Authentication(_) => StatusCode::UNAUTHORIZED,
        Error::Provider { .. } | Error::Network { .. } => StatusCode::BAD_GATEWAY,
    };
    (code, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_conn() -> rusqlite::Connection {
        let conn = rusqlite::Connection::open_in_memory().expect("open in-memory db");
        db::migrate(&conn).expect("migrate");
        conn
    }

    #[test]
    fn test_build_settings_masks_keys() {
        let conn = mem_conn();
        db::set_api_key(&conn, ProviderKind::Gemini, "AIza-secret").expect("set key");
        let settings = build_settings(&conn).expect("settings");
        let gemini = settings
            .providers
            .iter()
            .find(|p| p.provider == ProviderKind::Gemini)
            .expect("gemini entry");
        assert!(gemini.has_key);
        // The response only carries presence, never the key itself.
        let json = serde_json::to_string(&settings).expect("serialize");
        assert!(!json.contains("AIza-secret"));
    }

    #[test]
    fn test_resolve_kind_prefers_request_then_active() {
        let conn = mem_conn();
        assert_eq!(resolve_kind(&conn, None), ProviderKind::Gemini);

        db::set_active_provider(&conn, ProviderKind::HuggingFace).expect("set active");
        assert_eq!(resolve_kind(&conn, None), ProviderKind::HuggingFace);
        assert_eq!(
            resolve_kind(&conn, Some(ProviderKind::Gemini)),
            ProviderKind::Gemini
        );
    }

    #[test]
    fn test_api_err_codes_follow_the_taxonomy() {
        let (code, msg) = api_err(Error::Configuration(ProviderKind::Gemini));
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert!(msg.contains("API key"));

        let (code, _) = api_err(Error::Authentication(ProviderKind::HuggingFace));
        assert_eq!(code, StatusCode::UNAUTHORIZED);

        let (code, _) = api_err(Error::Provider {
            provider: ProviderKind::Gemini,
            status: 503,
            message: "overloaded".into(),
        });
        assert_eq!(code, StatusCode::BAD_GATEWAY);
    }
}
