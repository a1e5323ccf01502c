use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use pdf_sigcheck::{config::Config, server, Dispatcher, TrustList};

#[tokio::main]
async fn main() {
    let config = Config::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level()))
        .init();

    if let Err(e) = run(config).await {
        log::error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let trust_list = TrustList::load_optional(config.trusted_certs.as_deref())
        .context("failed to load the trusted certificate list")?;
    let dispatcher = Arc::new(Dispatcher::new(
        config.workers.into(),
        Arc::new(trust_list),
    ));

    let addr = config.bind_addr()?;
    let (addr, server) = warp::serve(server::routes(dispatcher.clone()))
        .try_bind_with_graceful_shutdown(addr, shutdown_signal())
        .with_context(|| format!("failed to listen on {addr}"))?;
    log::info!(
        "PDF signature verification listening on http://{addr} with {} workers",
        dispatcher.workers()
    );

    server.await;

    // Requests still in the pipeline finish before the process exits.
    dispatcher.shutdown().await;
    log::info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("can not listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("can not listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    log::info!("shutting down");
}
