use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use agentegrator_core_sdk::{
    analyze::{self, AnalysisPrompt},
    catalog,
    chat::ChatSession,
    db, llm,
    models::{Provider, ProviderKind},
    server, telemetry,
};

/**
 * \brief CLI entry point: configure providers, analyze code, chat, serve the UI.
 */
#[derive(Parser, Debug)]
#[command(
    name = "agentegrator",
    version,
    about = "Code analysis chat over hosted LLM providers"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief Save a provider's API key and make it the active provider.
     */
    Init {
        #[arg(long, default_value = "gemini")]
        provider: ProviderKind,
        #[arg(long)]
        api_key: String,
        #[arg(long)]
        model: Option<String>,
        /** \brief Probe the key against the provider before reporting success. */
        #[arg(long, default_value_t = false)]
        validate: bool,
        #[arg(long, default_value_t = false)]
        enable_telemetry: bool,
    },

    /**
     * \brief Check a stored (or supplied) key against the provider.
     */
    Validate {
        #[arg(long, default_value = "gemini")]
        provider: ProviderKind,
        #[arg(long)]
        api_key: Option<String>,
    },

    /**
     * \brief List the model catalog (live discovery when a key is stored).
     */
    Models {
        #[arg(long)]
        provider: Option<ProviderKind>,
    },

    /**
     * \brief Analyze a source file (or stdin) and print the report.
     */
    Analyze {
        /** \brief File to analyze; reads stdin when omitted. */
        file: Option<PathBuf>,
        #[arg(long)]
        provider: Option<ProviderKind>,
        #[arg(long)]
        model: Option<String>,
        /** \brief Use the lighter integration-suggestion prompt. */
        #[arg(long, default_value_t = false)]
        integrations: bool,
    },

    /**
     * \brief Send one chat turn and print the reply.
     */
    Chat {
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        provider: Option<ProviderKind>,
        #[arg(long)]
        model: Option<String>,
    },

    /**
     * \brief Start the local HTTP server and serve the front end.
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:5173")]
        addr: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let conn = db::open_default_db().context("open database failed")?;
    db::migrate(&conn).context("apply migrations failed")?;
    telemetry::set_enabled(db::get_telemetry_enabled(&conn).unwrap_or(false));

    match cli.command {
        Commands::Init {
            provider,
            api_key,
            model,
            validate,
            enable_telemetry,
        } => {
            let key = api_key.trim();
            if key.is_empty() {
                bail!("API key must not be blank");
            }
            db::set_api_key(&conn, provider, key).context("save API key failed")?;
            db::set_active_provider(&conn, provider).context("save active provider failed")?;
            if let Some(model) = &model {
                db::set_selected_model(&conn, provider, model)
                    .context("save model selection failed")?;
            }
            db::set_telemetry_enabled(&conn, enable_telemetry)
                .context("save telemetry failed")?;
            telemetry::set_enabled(enable_telemetry);
            println!("Saved {} key (active provider: {})", provider, provider);

            if validate {
                let candidate = Provider::new(provider, key);
                if llm::validate_key(&candidate).await {
                    println!("Key check: valid");
                } else {
                    println!("Key check: invalid (saved anyway; fix it in settings)");
                }
            }
        }
        Commands::Validate { provider, api_key } => {
            let key = match api_key {
                Some(k) => k,
                None => db::get_api_key(&conn, provider)
                    .context("load API key failed")?
                    .unwrap_or_default(),
            };
            let candidate = Provider::new(provider, key);
            if llm::validate_key(&candidate).await {
                println!("{} key is valid", provider);
            } else {
                println!("{} key is invalid or missing", provider);
            }
        }
        Commands::Models { provider } => {
            let kind = resolve_kind(&conn, provider)?;
            let key = db::get_api_key(&conn, kind)
                .context("load API key failed")?
                .unwrap_or_default();
            let models = if key.trim().is_empty() {
                catalog::defaults(kind)
            } else {
                catalog::discover(&Provider::new(kind, key)).await
            };
            for model in models {
                println!("{}\t{}\t{}", model.id, model.display_name, model.description);
            }
        }
        Commands::Analyze {
            file,
            provider,
            model,
            integrations,
        } => {
            let code = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("read {} failed", path.display()))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("read stdin failed")?;
                    buf
                }
            };
            if code.trim().is_empty() {
                bail!("nothing to analyze");
            }

            let kind = resolve_kind(&conn, provider)?;
            let provider = load_provider(&conn, kind)?;
            let selected = match model {
                Some(m) => Some(m),
                None => db::get_selected_model(&conn, kind).context("load model failed")?,
            };
            let prompt_kind = if integrations {
                AnalysisPrompt::Integrations
            } else {
                AnalysisPrompt::Full
            };

            let outcome =
                analyze::analyze_with_prompt(&provider, selected.as_deref(), prompt_kind, &code)
                    .await
                    .context("analysis failed")?;
            analyze::adopt_fallback_model(&conn, kind, &outcome)
                .context("save model selection failed")?;
            println!("[model: {}]\n", outcome.model);
            println!("{}", outcome.report);
        }
        Commands::Chat {
            prompt,
            provider,
            model,
        } => {
            let kind = resolve_kind(&conn, provider)?;
            let provider = load_provider(&conn, kind)?;
            let model = match model {
                Some(m) => m,
                None => db::get_selected_model(&conn, kind)
                    .context("load model failed")?
                    .unwrap_or_else(|| kind.default_model().to_string()),
            };
            let temperature = db::get_temperature(&conn).context("load temperature failed")?;
            let max_output_tokens =
                db::get_max_output_tokens(&conn).context("load max tokens failed")?;

            let mut session = ChatSession::new();
            match session
                .send(&provider, &model, temperature, max_output_tokens, &prompt)
                .await
                .context("chat failed")?
            {
                Some(reply) => println!("{}", reply),
                None => bail!("prompt must not be blank"),
            }
        }
        Commands::Serve { addr } => {
            server::run(&addr).await?;
        }
    }

    Ok(())
}

fn resolve_kind(
    conn: &agentegrator_core_sdk::db::Connection,
    requested: Option<ProviderKind>,
) -> Result<ProviderKind> {
    Ok(requested
        .or_else(|| db::get_active_provider(conn).ok().flatten())
        .unwrap_or(ProviderKind::Gemini))
}

fn load_provider(
    conn: &agentegrator_core_sdk::db::Connection,
    kind: ProviderKind,
) -> Result<Provider> {
    let key = db::get_api_key(conn, kind)
        .context("load API key failed")?
        .unwrap_or_default();
    Ok(Provider::new(kind, key))
}
