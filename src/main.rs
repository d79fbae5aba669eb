//src/main.rs

use tokio::net::TcpListener;
use tracing_subscriber::{fmt::MakeWriter, EnvFilter};

mod common;
mod config;
mod db;
mod docs;
mod handlers;
mod middleware;
mod models;
mod routes;
mod services;

#[cfg(test)]
mod test_support;

use crate::config::{AppState, Settings};

// Varredura periódica das reservas provisórias vencidas.
fn spawn_expiry_sweep(app_state: AppState, every: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match app_state.reservation_service.expire_stale(app_state.clock.now()).await {
                Ok(0) => {}
                Ok(expired) => tracing::info!(expired, "Reservas vencidas liberadas"),
                Err(e) => tracing::error!("Falha na varredura de expiração: {:?}", e),
            }
        }
    });
}

// O target fica visível: alertas saem em `ctrdv::consistency`.
fn log_subscriber<W>(filter: EnvFilter, writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .compact()
        .finish()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing::subscriber::set_global_default(log_subscriber(filter, std::io::stdout))?;

    let settings = Settings::from_env()?;
    let app_state = AppState::new(&settings).await?;

    spawn_expiry_sweep(app_state.clone(), settings.sweep_interval);

    let app = routes::app_router(app_state);

    let listener = TcpListener::bind(settings.addr()).await?;
    tracing::info!("🚀 Servidor escutando em {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
