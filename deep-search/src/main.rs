use deep_search::{
    init,
    assistant::configuration::Configuration,
    assistant::graph::ResearchGraph,
    server::run_server,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize environment variables from .env
    init();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("deep_search=info,tower_http=info")),
        )
        .init();

    let config = match Configuration::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            return Err(e.into());
        }
    };
    info!(
        provider = ?config.model_provider,
        model = config.planning_model(),
        "loaded configuration"
    );

    let graph = ResearchGraph::new(config.clone())?;
    run_server(graph, &config.server_addr).await
}
