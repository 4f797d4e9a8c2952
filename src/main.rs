use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::CorsLayer;
use tracing_appender::non_blocking::WorkerGuard;

use mindful_match::assessment::{
    AssessmentOrchestrator, AssessmentRegistry, InstantPacer, LlmAnalysisGateway,
    OrchestratorDeps, Pacer, TokioPacer, assessment_routes, spawn_eviction_task,
};
use mindful_match::channels::{CliChannel, CliExit};
use mindful_match::config::{AppConfig, RunMode};
use mindful_match::llm::{LlmBackend, LlmConfig, create_provider};
use mindful_match::store::{AssessmentStore, LibSqlBackend};

/// Install the global subscriber. The guard must outlive `main`.
fn init_tracing(config: &AppConfig) -> Option<WorkerGuard> {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mindful-match.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("  export ANTHROPIC_API_KEY=sk-ant-...");
            std::process::exit(1);
        }
    };

    let _log_guard = init_tracing(&config);

    eprintln!("🌿 Mindful Match v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.model);

    // ── LLM + analysis gateway ──────────────────────────────────────────
    let llm = create_provider(&LlmConfig {
        backend: LlmBackend::Anthropic,
        api_key: config.api_key.clone(),
        model: config.model.clone(),
        base_url: None,
    })?;
    let gateway = Arc::new(LlmAnalysisGateway::new(llm, config.assessment.gateway()));

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn AssessmentStore> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    let pacer: Arc<dyn Pacer> = if config.assessment.pacing {
        Arc::new(TokioPacer::new(config.assessment.pacing_scale))
    } else {
        Arc::new(InstantPacer)
    };

    let deps = OrchestratorDeps {
        gateway,
        store: Arc::clone(&store),
        pacer,
    };

    match config.mode {
        RunMode::Server => {
            let registry = Arc::new(AssessmentRegistry::with_limits(
                deps,
                config.assessment.session_limits,
            ));
            let _eviction = spawn_eviction_task(Arc::clone(&registry));
            let app = assessment_routes(registry).layer(CorsLayer::permissive());

            eprintln!("   API: http://0.0.0.0:{}/api/assessments", config.port);
            eprintln!("   WS:  ws://0.0.0.0:{}/ws/assessments/{{id}}\n", config.port);

            let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
                .await
                .with_context(|| format!("failed to bind port {}", config.port))?;
            tracing::info!(port = config.port, "Assessment server started");
            axum::serve(listener, app).await?;
        }
        RunMode::Cli => {
            eprintln!("   Type your answers and press Enter. /retry after a failure, /quit to exit.\n");
            let orchestrator = Arc::new(AssessmentOrchestrator::new(deps));
            let exit = CliChannel::new(orchestrator, store).run().await?;
            match exit {
                CliExit::Completed { record_id, .. } => {
                    eprintln!("   Saved as {record_id}");
                }
                CliExit::Quit | CliExit::InputClosed => eprintln!("   Goodbye."),
            }
        }
    }

    Ok(())
}
