use std::sync::Arc;

use anyhow::{Context, Result};
use envconfig::Envconfig;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use segment_overrides::client::HttpOverridesApi;
use segment_overrides::config::Config;
use segment_overrides::models::ChangeRequest;
use segment_overrides::session::{Computation, OverrideSession};

fn load_change_request(path: &str) -> Result<ChangeRequest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read change request from {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse change request in {path}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::init_from_env().context("Invalid configuration")?;

    // Logs go to stderr so stdout only carries the view.
    let log_layer = {
        let base_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true);

        if *config.debug {
            base_layer
                .with_ansi(true)
                .with_filter(EnvFilter::from_default_env())
                .boxed()
        } else {
            base_layer
                .json()
                .with_filter(EnvFilter::from_default_env())
                .boxed()
        }
    };
    tracing_subscriber::registry().with(log_layer).init();

    let change_request = config
        .change_request_path
        .as_deref()
        .map(load_change_request)
        .transpose()?;

    let api = HttpOverridesApi::new(
        &config.api_url,
        config.api_token.as_deref(),
        config.request_timeout.0,
    )?;
    let session = OverrideSession::new(
        Arc::new(api),
        config.project_id,
        config.segment_page_size,
    );

    let view = match session
        .compute_overrides(config.feature_id, &config.environment_id, change_request)
        .await
        .context("could not load overrides")?
    {
        Computation::Applied(view) => view,
        Computation::Superseded { token, latest } => {
            anyhow::bail!("computation {token} was superseded by {latest}")
        }
    };

    println!("{}", serde_json::to_string_pretty(&view)?);

    Ok(())
}
