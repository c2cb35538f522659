//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod config;

use std::path::Path;
use std::sync::{Arc, Mutex};

use clap::{App, Arg};
use config::{Config, LoggingFileRotation, LoggingFmtStyle};
use nix::unistd::{Uid, User};
use pickledb::{PickleDb, PickleDbDumpPolicy, SerializationMethod};
use ribd_routing::collaborator::{CollaboratorKind, SocketClient};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::level_filters::LevelFilter;
use tracing::{Subscriber, error, info};
use tracing_appender::rolling;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;

// Builds a formatting layer writing to the given destination.
fn fmt_layer<S, W>(
    fmt: &config::LoggingFmt,
    writer: W,
) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(false)
        .with_thread_ids(fmt.show_thread_id)
        .with_file(fmt.show_source)
        .with_line_number(fmt.show_source)
        .with_ansi(fmt.colors);
    match fmt.style {
        LoggingFmtStyle::Compact => layer.compact().boxed(),
        LoggingFmtStyle::Full => layer.boxed(),
        LoggingFmtStyle::Json => layer.json().boxed(),
        LoggingFmtStyle::Pretty => layer.pretty().boxed(),
    }
}

fn init_tracing(config: &config::Logging) {
    // Enable logging to journald.
    let journald = config.journald.enabled.then(|| {
        tracing_journald::layer().expect("couldn't connect to journald")
    });

    // Enable logging to a file.
    let file = config.file.enabled.then(|| {
        let file_appender = match config.file.rotation {
            LoggingFileRotation::Never => {
                rolling::never(&config.file.dir, &config.file.name)
            }
            LoggingFileRotation::Hourly => {
                rolling::hourly(&config.file.dir, &config.file.name)
            }
            LoggingFileRotation::Daily => {
                rolling::daily(&config.file.dir, &config.file.name)
            }
        };
        fmt_layer(&config.file.fmt, file_appender)
            .with_filter(LevelFilter::TRACE)
    });

    // Enable logging to stdout.
    let stdout = config.stdout.enabled.then(|| {
        fmt_layer(&config.stdout.fmt, std::io::stdout)
            .with_filter(LevelFilter::TRACE)
    });

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("ribd=debug".parse().unwrap())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(journald)
        .with(file)
        .with(stdout)
        .init();
}

fn init_db<P: AsRef<Path>>(
    path: P,
) -> Result<PickleDb, pickledb::error::Error> {
    let dump_policy = PickleDbDumpPolicy::AutoDump;
    let serialization_method = SerializationMethod::Bin;
    match path.as_ref().exists() {
        true => PickleDb::load(path, dump_policy, serialization_method),
        false => Ok(PickleDb::new(path, dump_policy, serialization_method)),
    }
}

fn privdrop(user: &str) -> nix::Result<()> {
    // Drop to unprivileged user and group.
    if let Some(user) = User::from_name(user)? {
        nix::unistd::setgroups(&[user.gid])?;
        nix::unistd::setresgid(user.gid, user.gid, user.gid)?;
        nix::unistd::setresuid(user.uid, user.uid, user.uid)?;
    } else {
        error!(name = %user, "failed to find user");
        std::process::exit(1);
    }

    Ok(())
}

fn signal_listener() -> mpsc::Receiver<()> {
    let (signal_tx, signal_rx) = mpsc::channel(1);

    tokio::task::spawn(async move {
        let mut sigint = signal(SignalKind::interrupt()).unwrap();
        let mut sigterm = signal(SignalKind::terminate()).unwrap();

        tokio::select! {
            _ = sigint.recv() => {
                info!("received SIGINT");
                let _ = signal_tx.send(()).await;
            },
            _ = sigterm.recv() => {
                info!("received SIGTERM");
                let _ = signal_tx.send(()).await;
            }
        }
    });

    signal_rx
}

fn build_version() -> String {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    match rustc_tools_util::get_version_info!().commit_hash {
        Some(hash) => format!("{VERSION} ({hash})"),
        None => VERSION.to_owned(),
    }
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = App::new("RIB daemon")
        .version(build_version().as_str())
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("file")
                .help("Specify an alternative configuration file."),
        )
        .get_matches();

    // Read configuration file.
    let config_file = matches.value_of("config");
    let config = Config::load(config_file);

    // Check for root privileges.
    if !Uid::effective().is_root() {
        eprintln!("need privileged user");
        std::process::exit(1);
    }

    // Initialize tracing.
    init_tracing(&config.logging);

    // Initialize non-volatile storage.
    let db = init_db(&config.database_path)
        .expect("failed to initialize non-volatile storage");

    // Drop privileges.
    if let Err(error) = privdrop(&config.user) {
        error!(%error, "failed to drop root privileges");
        std::process::exit(1);
    }

    // We're ready to go!
    info!("starting up");

    // Main loop.
    let main = || async {
        // Spawn signal listener.
        let mut signal_rx = signal_listener();

        // Start the RIB and its collaborator workers.
        let collaborators = &config.collaborators;
        let asic = collaborators.asic.enabled.then(|| {
            SocketClient::new(CollaboratorKind::Asic, &collaborators.asic.path)
        });
        let arp = collaborators.arp.enabled.then(|| {
            SocketClient::new(CollaboratorKind::Arp, &collaborators.arp.path)
        });
        let _rib = ribd_routing::start(
            config.rib.clone(),
            Arc::new(Mutex::new(db)),
            asic,
            arp,
            collaborators.retry_interval(),
        );

        // Run until a termination signal is received.
        let _ = signal_rx.recv().await;
    };
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime")
        .block_on(async {
            main().await;
        });

    info!("exiting");
}
