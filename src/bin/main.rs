use std::fs;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use wa_bridge::config::{expand_tilde, load_config};
use wa_bridge::create_bridge;

fn init_logging(phone_number: &str, environment: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let log_dir = expand_tilde("~/.wa-bridge/logs");
    let _ = fs::create_dir_all(&log_dir);
    let log_path = log_dir.join(format!("{}.{}.log", phone_number, environment));

    match fs::OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
            eprintln!("logging to {}", log_path.display());
        }
        Err(_) => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let boot_cfg = load_config();
    init_logging(&boot_cfg.account.phone_number, &boot_cfg.alerts.environment);

    let (state, app) = create_bridge().await?;

    // Login outcome arrives asynchronously on the event route; a refused
    // login action here is session-fatal and left to the supervisor.
    state.ctx.session.connect(&state.ctx.account).await?;

    let addr = format!(
        "{}:{}",
        state.ctx.config.server.host, state.ctx.config.server.port
    );
    info!(%addr, account = %state.ctx.account.phone_number, "bridge listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
