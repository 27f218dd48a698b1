//! CLI entrypoint: parse flags, load config, start the kernel, wait for a stop signal.

use std::sync::Arc;

use clap::Parser;
use tonic::transport::Server;
use webrtc_relay::config::{Cli, Config};
use webrtc_relay::kernel::RelayKernel;
use webrtc_relay::legacy_metadata;
use webrtc_relay::rpc::pb::webrtc_relay_server::WebrtcRelayServer;
use webrtc_relay::rpc::RelayRpcService;
use webrtc_relay::signaling::UnimplementedSignalingFactory;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let log_level = cli.log_level.clone().unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&log_level)).init();

    log::info!("------------ Starting WebRTC Relay ----------------");

    let config = match Config::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            log::error!("failed to read config file: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            log::error!("fatal: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let factory = Arc::new(UnimplementedSignalingFactory);
    let kernel = Arc::new(RelayKernel::new(factory, Some(config.token_file.clone())));
    kernel.clone().start(&config).await?;

    if let Some(legacy) = config.legacy_metadata_channel.clone() {
        legacy_metadata::spawn(
            legacy,
            kernel.command_bus(),
            kernel.event_bus(),
            kernel.stop_signal(),
        );
    }

    let rpc_addr = config.rpc_address.strip_prefix(config.rpc_scheme()).unwrap_or(&config.rpc_address);
    let rpc_service = RelayRpcService::new(kernel.clone(), config.clone());
    let stop = kernel.stop_signal();

    let server_task = match config.rpc_scheme() {
        "unix://" => {
            let path = std::path::PathBuf::from(rpc_addr);
            let _ = tokio::fs::remove_file(&path).await;
            let listener = tokio::net::UnixListener::bind(&path)
                .map_err(|e| anyhow::anyhow!("failed to bind unix socket {path:?}: {e}"))?;
            let incoming = tokio_stream::wrappers::UnixListenerStream::new(listener);
            tokio::spawn(async move {
                Server::builder()
                    .add_service(WebrtcRelayServer::new(rpc_service))
                    .serve_with_incoming_shutdown(incoming, async move {
                        stop.wait().await;
                    })
                    .await
            })
        }
        _ => {
            let socket_addr: std::net::SocketAddr = rpc_addr
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid rpc_address {:?}: {e}", config.rpc_address))?;
            tokio::spawn(async move {
                Server::builder()
                    .add_service(WebrtcRelayServer::new(rpc_service))
                    .serve_with_shutdown(socket_addr, async move {
                        stop.wait().await;
                    })
                    .await
            })
        }
    };

    wait_for_shutdown(kernel.stop_signal()).await;
    kernel.stop().await;
    server_task
        .await?
        .map_err(|e| anyhow::anyhow!("grpc server error: {e}"))?;
    // give cooperative tasks their grace period to exit, mirroring the origin program
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    Ok(())
}

/// Waits for either the kernel's own stop signal or one of SIGINT/SIGTERM/SIGQUIT/SIGHUP.
#[cfg(unix)]
async fn wait_for_shutdown(stop: webrtc_relay::util::UnblockSignal) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigquit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");
    let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

    tokio::select! {
        _ = stop.wait() => log::info!("quit program channel triggered, exiting."),
        _ = sigint.recv() => { log::info!("ctrl+c received, exiting."); stop.trigger(); }
        _ = sigterm.recv() => { log::info!("SIGTERM received, exiting."); stop.trigger(); }
        _ = sigquit.recv() => { log::info!("SIGQUIT received, exiting."); stop.trigger(); }
        _ = sighup.recv() => { log::info!("SIGHUP received, exiting."); stop.trigger(); }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(stop: webrtc_relay::util::UnblockSignal) {
    tokio::select! {
        _ = stop.wait() => log::info!("quit program channel triggered, exiting."),
        _ = tokio::signal::ctrl_c() => { log::info!("ctrl+c received, exiting."); stop.trigger(); }
    }
}
