use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use oxidized_queue::{config::Config, queue::FolderQueue, routes::AppState, utils::init_logger, Worker};

#[derive(Parser)]
#[command(name = "oxidized-queue", version, about = "File-based LLM job queue")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one scheduler pass and exit
    Process,
    /// Serve the job intake endpoint
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env()?;
    let _guard = init_logger(&config.logging);
    info!("Configuration loaded: {:?}", config.queue);

    match cli.command.unwrap_or(Command::Process) {
        Command::Process => {
            let worker = Worker::from_config(&config)?;
            let report = worker.run_once().await?;
            info!(
                job_id = ?report.job_id,
                outcome = ?report.outcome,
                redelivery = ?report.redelivery,
                "Pass complete"
            );
        }
        Command::Serve => {
            let queue = FolderQueue::new(&config.queue.data_dir);
            queue.ensure_folders().await?;

            let app = oxidized_queue::create_router(AppState::new(queue)).layer(TraceLayer::new_for_http());

            let addr = format!("{}:{}", config.server.host, config.server.port);
            info!("Server listening on {}", addr);

            let listener = TcpListener::bind(&addr).await?;
            axum::serve(listener, app)
                .await
                .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;
        }
    }

    Ok(())
}
