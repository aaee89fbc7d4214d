//! LeafGuard prediction server
//!
//! Loads a trained model once and serves `POST /predict/`, optionally
//! attaching treatment advice from a chat completion service.

mod app;
mod error;
mod remedy;
mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderValue;
use clap::Parser;
use tracing::{info, warn};

use leafguard::backend::{backend_name, default_device, DefaultBackend};
use leafguard::model::artifact::DEFAULT_MODEL_NAME;
use leafguard::utils::logging::{init_logging, LogConfig};
use leafguard::{ArtifactPaths, Predictor};

use crate::app::DEFAULT_CORS_ORIGINS;
use crate::remedy::{GroqRemedyClient, DEFAULT_REMEDY_MODEL, DEFAULT_REMEDY_URL};
use crate::state::AppState;

/// LeafGuard prediction server
#[derive(Parser, Debug)]
#[command(name = "leafguard-server")]
#[command(version)]
#[command(about = "HTTP API for LeafGuard plant disease prediction")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "LEAFGUARD_PORT", default_value = "8000")]
    port: u16,

    /// Host to bind to
    #[arg(long, env = "LEAFGUARD_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Directory holding the model artifact and labels.txt
    #[arg(long, env = "LEAFGUARD_MODEL_DIR", default_value = "models")]
    model_dir: PathBuf,

    #[arg(long, env = "LEAFGUARD_MODEL_NAME", default_value = DEFAULT_MODEL_NAME)]
    model_name: String,

    /// API key for the remedy service
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    groq_api_key: Option<String>,

    /// OpenAI-compatible chat completion endpoint
    #[arg(long, env = "LEAFGUARD_REMEDY_URL", default_value = DEFAULT_REMEDY_URL)]
    remedy_url: String,

    #[arg(long, env = "LEAFGUARD_REMEDY_MODEL", default_value = DEFAULT_REMEDY_MODEL)]
    remedy_model: String,

    /// Respond with the predicted class only, without confidence or remedy
    #[arg(long, default_value = "false")]
    label_only: bool,

    /// Allowed CORS origins, comma separated
    #[arg(
        long,
        env = "LEAFGUARD_CORS_ORIGINS",
        value_delimiter = ',',
        default_values = DEFAULT_CORS_ORIGINS
    )]
    cors_origins: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _ = init_logging(&LogConfig::from_flags(cli.verbose, false));

    info!("LeafGuard Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Model dir:  {:?}", cli.model_dir);
    info!("  Model name: {}", cli.model_name);
    info!("  Backend:    {}", backend_name());
    info!("  Mode:       {}", if cli.label_only { "label only" } else { "label + remedy" });

    let origins = cli
        .cors_origins
        .iter()
        .map(|o| o.trim())
        .filter(|o| !o.is_empty())
        .map(|o| HeaderValue::from_str(o).with_context(|| format!("invalid CORS origin '{}'", o)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    info!("  CORS:       {:?}", cli.cors_origins);

    let paths = ArtifactPaths::new(&cli.model_dir, &cli.model_name);
    let predictor = Predictor::<DefaultBackend>::load(&paths, default_device())
        .with_context(|| format!("failed to load model from {:?}", paths.dir))?;
    info!("Model ready: {} classes", predictor.vocabulary().len());

    let remedy = GroqRemedyClient::new(cli.remedy_url, cli.remedy_model, cli.groq_api_key);
    if !cli.label_only && !remedy.has_api_key() {
        warn!("GROQ_API_KEY is not set; every remedy will be the fallback message");
    }

    let state = Arc::new(AppState::new(
        predictor,
        Arc::new(remedy),
        cli.label_only,
        cli.model_name,
    ));
    let app = app::router(state, origins);

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cors_origins_default_and_override() {
        let cli = Cli::try_parse_from(["leafguard-server"]).unwrap();
        assert_eq!(cli.cors_origins, DEFAULT_CORS_ORIGINS);
        assert_eq!(cli.port, 8000);

        let cli = Cli::try_parse_from([
            "leafguard-server",
            "--cors-origins",
            "http://a.test,http://b.test",
        ])
        .unwrap();
        assert_eq!(cli.cors_origins, vec!["http://a.test", "http://b.test"]);
    }
}
