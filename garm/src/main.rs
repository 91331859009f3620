//! The drain daemon: attaches the XDP classifier to an interface, binds an
//! AF_XDP socket to the chosen receive queue, and drains redirected TCP
//! frames through the userspace classifier until told to stop.
#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use garm_classify::{ClassifyNode, ClassifyStats};
use garm_ebpf::XdpFilter;
use garm_ebpf_common::PIN_ROOT;
use garm_xsk::{ifindex, DrainStats, Drainer, RingConfig, Umem, XskSocket};

#[derive(Parser, Debug)]
#[command(author, version, about = "XDP packet filter with an AF_XDP drain path")]
struct Cli {
    /// Network interface to attach to
    #[arg(short, long, value_name = "INTERFACE", default_value = "veth-a")]
    iface: String,

    /// Compiled XDP object to load instead of the default
    #[arg(short, long, value_name = "FILE")]
    prog: Option<PathBuf>,

    /// Receive queue to bind the AF_XDP socket to
    #[arg(short, long, value_name = "QUEUE_ID", default_value_t = 0)]
    queue: u32,

    /// Verbose output (per-packet records at debug level)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Ebpf(#[from] garm_ebpf::EbpfError),

    #[error(transparent)]
    Xsk(#[from] garm_xsk::XskError),

    #[error("drain task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        eprintln!("[ERROR] {err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let pin_root = Path::new(PIN_ROOT);

    // Acquisition order: program, UMEM, socket, redirect registration.
    // Teardown happens in reverse on every exit path; the drainer owns the
    // socket and pool, the filter detaches itself on drop as a backstop.
    let mut filter = XdpFilter::load(&cli.iface, cli.prog.as_deref(), pin_root)?;
    let if_index = ifindex(&cli.iface)?;
    let umem = Umem::with_default_size()?;
    let socket = XskSocket::bind(&umem, if_index, cli.queue, RingConfig::default())?;
    filter.register_socket(cli.queue, &socket)?;

    // Redirected frames get the same stateful classification the graph node
    // applies, against the tables the kernel program just pinned.
    let stats = ClassifyStats::new(1);
    let mut node = ClassifyNode::new(Arc::clone(&stats), 0);
    node.set_enabled(if_index, true);
    if let Some(dual) = garm_classify::dual::try_open(pin_root) {
        info!("dual protection enabled");
        node = node.with_dual(dual);
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let handler = move |frame: &[u8]| {
        node.classify_redirected(frame, if_index, unix_now());
    };

    let mut drainer = Drainer::new(socket, umem, handler, Arc::clone(&cancel));
    let mut drain_task = tokio::task::spawn_blocking(move || drainer.run());

    info!(iface = %cli.iface, queue = cli.queue, "drain loop started; waiting for redirected TCP frames");

    tokio::select! {
        _ = shutdown_signal() => {
            info!("shutting down");
            cancel.store(true, Ordering::Relaxed);
        }
        // The drain loop only returns on its own for a fatal error.
        result = &mut drain_task => {
            let drained = result?;
            report(&drained, &stats, &filter);
            filter.detach();
            drained?;
            return Ok(());
        }
    }

    let drained = drain_task.await?;
    report(&drained, &stats, &filter);
    filter.detach();
    drained?;
    info!("shutdown complete");
    Ok(())
}

/// Final counters, logged on the way out.
fn report(
    drained: &Result<DrainStats, garm_xsk::XskError>,
    stats: &ClassifyStats,
    filter: &XdpFilter,
) {
    match drained {
        Ok(drain) => info!(
            frames = drain.frames,
            batches = drain.batches,
            handler_panics = drain.handler_panics,
            "drain loop finished"
        ),
        Err(err) => error!(%err, "drain loop failed"),
    }

    let snapshot = stats.aggregate();
    info!(
        allowed = snapshot.pkts_allowed,
        dropped = snapshot.pkts_dropped,
        sessions = snapshot.sessions_created,
        "classifier counters"
    );

    match filter.kernel_stats() {
        Ok(kernel) => info!(
            pass = kernel.pass,
            drop = kernel.drop,
            redirect = kernel.redirect,
            error = kernel.error,
            "kernel verdict counters"
        ),
        Err(err) => warn!(%err, "could not read kernel counters"),
    }
}

async fn shutdown_signal() {
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            warn!(%err, "cannot listen for SIGTERM; SIGINT only");
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(%err, "signal listener failed");
            }
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
        _ = term.recv() => info!("SIGTERM received"),
    }
}

/// Session timestamps are whole seconds of wall clock.
fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
