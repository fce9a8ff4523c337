use std::{process::ExitCode, sync::Arc};

use clap::{crate_authors, crate_version, Command};
use log::{error, info, warn};
use tokio::{
    net::{TcpListener, UdpSocket},
    signal::{
        self,
        unix::{signal, SignalKind},
    },
    task::JoinSet,
};
use zonemirror::{
    answer::Responder,
    center::Center,
    config::{Config, SocketConfig},
    loader::upstream::DnsUpstream,
    log::{ExitError, Logger},
    net::server::{DgramServer, StreamServer},
};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(ExitError) => ExitCode::FAILURE,
    }
}

fn run() -> Result<(), ExitError> {
    let logger = Logger::launch().map_err(|err| {
        eprintln!("Fatal: could not set up logging ({err}). Aborting.");
        ExitError
    })?;

    let cmd = Command::new("zonemirror")
        .version(crate_version!())
        .author(crate_authors!())
        .about("A secondary DNS server")
        .next_line_help(true);
    let matches = Config::setup_cli(cmd).get_matches();

    let config = Config::init(&matches).map_err(|err| {
        error!("Fatal: {err}. Aborting.");
        ExitError
    })?;
    apply_logging(logger, &config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            error!("Fatal: could not start the async runtime ({err}). Aborting.");
            ExitError
        })?;

    runtime.block_on(async {
        let upstream = Arc::new(DnsUpstream {
            query_timeout: config.loader.query_timeout,
            transfer_timeout: config.loader.transfer_timeout,
        });
        let center = Arc::new(Center::launch(
            config.zones.clone(),
            upstream,
            config.loader.refresh.clone(),
        ));
        let responder = Arc::new(Responder::new(center.clone()));

        let mut servers = JoinSet::new();
        for socket in &config.server.servers {
            spawn_server(&mut servers, socket, &responder).await?;
        }
        if config.server.servers.is_empty() {
            warn!("No servers are configured; zones will be transferred but not served");
        }

        let result = handle_signals(logger, config, &center, &mut servers).await;
        center.shutdown();
        servers.abort_all();
        result
    })
}

/// Bind a configured socket and serve zones on it.
async fn spawn_server(
    servers: &mut JoinSet<()>,
    socket: &SocketConfig,
    responder: &Arc<Responder>,
) -> Result<(), ExitError> {
    let addr = socket.addr();
    if socket.udp() {
        let sock = UdpSocket::bind(addr).await.map_err(|err| {
            error!("Fatal: could not bind UDP socket {addr} ({err}). Aborting.");
            ExitError
        })?;
        let server = DgramServer::new(sock, responder.clone());
        info!("Serving zones over UDP on {addr}");
        servers.spawn(async move {
            if let Err(err) = server.run().await {
                error!("The UDP server on {addr} failed: {err}");
            }
        });
    }
    if socket.tcp() {
        let sock = TcpListener::bind(addr).await.map_err(|err| {
            error!("Fatal: could not bind TCP socket {addr} ({err}). Aborting.");
            ExitError
        })?;
        let server = StreamServer::new(sock, responder.clone());
        info!("Serving zones over TCP on {addr}");
        servers.spawn(async move {
            if let Err(err) = server.run().await {
                error!("The TCP server on {addr} failed: {err}");
            }
        });
    }
    Ok(())
}

/// Wait for signals until shutdown.
async fn handle_signals(
    logger: &'static Logger,
    mut config: Config,
    center: &Center,
    servers: &mut JoinSet<()>,
) -> Result<(), ExitError> {
    let mut hup_signals = signal(SignalKind::hangup()).map_err(|err| {
        error!("Fatal: cannot listen for HUP signals ({err}). Aborting.");
        ExitError
    })?;

    loop {
        tokio::select! {
            res = hup_signals.recv() => {
                if res.is_none() {
                    error!("Fatal: listening for SIGHUP signals failed. Aborting.");
                    return Err(ExitError);
                }

                info!(
                    "SIGHUP signal received, re-reading configuration file '{}'",
                    config.daemon.config_file.value()
                );
                match config.reload() {
                    Ok(new) => {
                        if new.server != config.server {
                            warn!("Changes to the servers take effect after a restart");
                        }
                        if let Err(ExitError) = apply_logging(logger, &new) {
                            continue;
                        }
                        center.reconfigure(new.zones.clone());
                        config = new;
                        info!("Configuration changes applied");
                    }
                    Err(err) => {
                        error!("Failed to re-read the configuration: {err}");
                    }
                }
                for report in center.reports() {
                    info!("{report}");
                }
            }

            res = signal::ctrl_c() => {
                return match res {
                    Err(err) => {
                        error!(
                            "Fatal: listening for CTRL-C (SIGINT) signals failed \
                            ({err}). Aborting."
                        );
                        Err(ExitError)
                    }
                    Ok(()) => {
                        warn!("CTRL-C (SIGINT) received, shutting down.");
                        Ok(())
                    }
                };
            }

            Some(_) = servers.join_next() => {
                error!("Fatal: a server stopped unexpectedly. Aborting.");
                return Err(ExitError);
            }
        }
    }
}

/// Reconfigure logging.
fn apply_logging(logger: &Logger, config: &Config) -> Result<(), ExitError> {
    match logger.prepare(&config.daemon.logging) {
        Ok(Some(change)) => {
            logger.apply(change);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            error!("Could not set up the configured log target: {err}");
            Err(ExitError)
        }
    }
}
