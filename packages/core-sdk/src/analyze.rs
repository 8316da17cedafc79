use std::future::Future;

use crate::catalog;
use crate::db;
use crate::error::{Error, Result};
use crate::llm;
use crate::models::{CompletionRequest, ModelOption, Provider, ProviderKind};
use crate::telemetry;

/**
 * \brief Result of a code analysis run: the report plus the model that
 *        actually answered (which may differ from the requested one
 *        after a fallback).
 */
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub report: String,
    pub model: String,
    /** \brief True when the answer came from the substituted model, not the requested one. */
    pub fallback: bool,
}

/**
 * \brief Persist the answering model as the new selection, but only
 *        when a fallback actually happened. A one-off model choice on a
 *        request that succeeds first try never clobbers the stored
 *        selection. Returns whether the selection changed.
 */
pub fn adopt_fallback_model(
    conn: &db::Connection,
    kind: ProviderKind,
    outcome: &AnalysisOutcome,
) -> anyhow::Result<bool> {
    if !outcome.fallback {
        return Ok(false);
    }
    db::set_selected_model(conn, kind, &outcome.model)?;
    Ok(true)
}

/** \brief Which fixed prompt template to run over the submitted code. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisPrompt {
    /** \brief Full structured report with risk/opportunity sections. */
    Full,
    /** \brief Lighter variant focused on integration suggestions. */
    Integrations,
}

impl AnalysisPrompt {
    fn temperature(self) -> f64 {
        match self {
            AnalysisPrompt::Full => 0.2,
            AnalysisPrompt::Integrations => 0.3,
        }
    }
}

/**
 * \brief Run the full analysis prompt over submitted code.
 */
pub async fn analyze(
    provider: &Provider,
    selected_model: Option<&str>,
    code: &str,
) -> Result<AnalysisOutcome> {
    analyze_with_prompt(provider, selected_model, AnalysisPrompt::Full, code).await
}

/**
 * \brief Run one of the fixed analysis prompts over submitted code.
 *
 * Resolves the model as: caller selection, else the first discovered
 * model, else the provider's hard-coded default. On failure the call is
 * retried exactly once with a different model drawn from discovery
 * (excluding the failed id); this is model substitution, not a generic
 * retry loop — a second failure, or no alternate, propagates.
 */
pub async fn analyze_with_prompt(
    provider: &Provider,
    selected_model: Option<&str>,
    prompt_kind: AnalysisPrompt,
    code: &str,
) -> Result<AnalysisOutcome> {
    if provider.api_key.trim().is_empty() {
        return Err(Error::Configuration(provider.kind));
    }

    let model = match selected_model {
        Some(m) if !m.trim().is_empty() => m.to_string(),
        _ => catalog::discover(provider)
            .await
            .into_iter()
            .next()
            .map(|m| m.id)
            .unwrap_or_else(|| provider.kind.default_model().to_string()),
    };

    let prompt = build_prompt(prompt_kind, code);
    let call = |model: String| {
        let prompt = prompt.clone();
        async move {
            let mut req = CompletionRequest::new(model, prompt);
            req.temperature = prompt_kind.temperature();
            llm::complete(provider, &req).await
        }
    };

    complete_with_retry(model, call, || catalog::discover(provider)).await
}

/**
 * \brief The single designed piece of resilience: one retry with a
 *        substituted model id, on the premise that failures are often
 *        model-availability issues rather than transient network ones.
 */
pub async fn complete_with_retry<C, Fc, D, Fd>(
    model: String,
    call: C,
    alternates: D,
) -> Result<AnalysisOutcome>
where
    C: Fn(String) -> Fc,
    Fc: Future<Output = Result<String>>,
    D: FnOnce() -> Fd,
    Fd: Future<Output = Vec<ModelOption>>,
{
    let first_err = match call(model.clone()).await {
        Ok(report) => {
            return Ok(AnalysisOutcome {
                report,
                model,
                fallback: false,
            })
        }
        Err(e) => e,
    };

    let alternate = alternates()
        .await
        .into_iter()
        .map(|m| m.id)
        .find(|id| id != &model);
    match alternate {
        Some(alt) => {
            telemetry::log_error(
                telemetry::Category::Analyze,
                &format!("model {} failed ({}); retrying with {}", model, first_err, alt),
            );
            let report = call(alt.clone()).await?;
            Ok(AnalysisOutcome {
                report,
                model: alt,
                fallback: true,
            })
        }
        None => Err(first_err),
    }
}

/**
 * \brief Build the fixed prompt, embedding the submitted code verbatim.
 *
 * The full variant requests a markdown-heading layout the UI later
 * splits by section title.
 */
pub fn build_prompt(kind: AnalysisPrompt, code: &str) -> String {
    match kind {
        AnalysisPrompt::Full => format!(
            "Analyze this code:\n\n{}\n\nProvide a detailed analysis using exactly these markdown sections:\n\
             ## General Analysis\n\
             Main components and their functions, language and framework identification.\n\
             ## Integration Points\n\
             Where external services or modules can hook into this code.\n\
             ## Strategic Opportunities\n\
             Improvements and extensions worth pursuing.\n\
             ## Critical Risks\n\
             Potential issues, bugs or security concerns.",
            code
        ),
        AnalysisPrompt::Integrations => format!(
            "Analyze this code and suggest potential integrations:\n\n{}\n\nProvide:\n\
             1. Current architecture overview\n\
             2. Potential integration points\n\
             3. Suggested improvements for better AI integration\n\
             4. Examples of how a hosted LLM could enhance functionality",
            code
        ),
    }
}
