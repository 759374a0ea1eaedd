//! Supervisor: wire the board link, the bus endpoints and the pumps
//! together, then babysit them until one exits.

use anyhow::{Context, Result, anyhow};
use canbridge::board::BoardLink;
use canbridge::bridge;
use canbridge::bus::{PORT_CAN, PORT_HEALTH, PORT_SENDCAN, PORT_THERMAL, Publisher, Subscriber};
use canbridge::config::BridgeConfig;
use canbridge::params::Params;
use crossbeam_channel::Sender;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use thread_priority::{
    RealtimeThreadSchedulePolicy, ThreadPriority, ThreadSchedulePolicy,
    set_thread_priority_and_policy, thread_native_id,
};
use tracing::{error, info, warn};

/// FIFO priority the bridge runs at; worker threads inherit it.
const REALTIME_PRIORITY: u8 = 4;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = run() {
        error!("fatal: {:#}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    info!("starting canbridge");

    set_realtime_priority(REALTIME_PRIORITY)?;

    let config = BridgeConfig::from_env();
    let params = Params::from_env();
    info!(?config, "runtime flags");

    let do_exit = Arc::new(AtomicBool::new(false));
    {
        let do_exit = Arc::clone(&do_exit);
        ctrlc::set_handler(move || {
            do_exit.store(true, Ordering::Relaxed);
        })
        .context("failed to install signal handler")?;
    }

    // first connect retries until a board appears; this also spawns the
    // one-shot safety gate
    let Some(board) = BoardLink::connect(&config, params, Arc::clone(&do_exit)) else {
        info!("exit requested before a board appeared");
        return Ok(());
    };

    let can_publisher = Publisher::bind(PORT_CAN).context("failed to bind can topic")?;
    let health_publisher = Publisher::bind(PORT_HEALTH).context("failed to bind health topic")?;
    let sendcan_subscriber = Subscriber::connect(PORT_SENDCAN);
    let thermal_subscriber = Subscriber::connect(PORT_THERMAL);

    // each pump announces itself here when its loop returns; the first
    // announcement triggers shutdown of the rest
    let (exit_tx, exit_rx) = crossbeam_channel::bounded::<&'static str>(4);

    let handles = vec![
        spawn_pump("can-recv", &exit_tx, {
            let board = Arc::clone(&board);
            let do_exit = Arc::clone(&do_exit);
            let mut publisher = can_publisher;
            move || bridge::can_recv_loop(board.as_ref(), &mut publisher, &do_exit)
        })?,
        spawn_pump("can-send", &exit_tx, {
            let board = Arc::clone(&board);
            let do_exit = Arc::clone(&do_exit);
            let mut subscriber = sendcan_subscriber;
            move || bridge::can_send_loop(board.as_ref(), &mut subscriber, &config, &do_exit)
        })?,
        spawn_pump("health", &exit_tx, {
            let board = Arc::clone(&board);
            let do_exit = Arc::clone(&do_exit);
            let mut publisher = health_publisher;
            move || bridge::health_loop(board.as_ref(), &mut publisher, &config, &do_exit)
        })?,
        spawn_pump("fan", &exit_tx, {
            let board = Arc::clone(&board);
            let do_exit = Arc::clone(&do_exit);
            let mut subscriber = thermal_subscriber;
            move || bridge::fan_loop(board.as_ref(), &mut subscriber, &do_exit)
        })?,
    ];

    // block until any pump winds down (exit flag, or something unexpected),
    // then take the rest with it
    let first = exit_rx.recv().unwrap_or("<disconnected>");
    warn!("{} pump exited, shutting down", first);
    do_exit.store(true, Ordering::Relaxed);

    for handle in handles {
        let _ = handle.join();
    }

    // the USB interface is handed back when the last link reference drops
    // (the gate thread exits on the same flag)
    info!("canbridge exiting");
    Ok(())
}

/// Spawn a named worker that reports its own exit. Spawn failure at
/// startup is fatal.
fn spawn_pump(
    name: &'static str,
    exit_tx: &Sender<&'static str>,
    body: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>> {
    let exit_tx = exit_tx.clone();
    thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            body();
            let _ = exit_tx.send(name);
        })
        .with_context(|| format!("failed to spawn {} pump", name))
}

/// FIFO realtime scheduling for the whole bridge. Failure is fatal.
fn set_realtime_priority(level: u8) -> Result<()> {
    let priority = ThreadPriority::Crossplatform(
        level
            .try_into()
            .map_err(|e| anyhow!("invalid priority {}: {}", level, e))?,
    );
    set_thread_priority_and_policy(
        thread_native_id(),
        priority,
        ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
    )
    .map_err(|e| anyhow!("failed to set FIFO priority {}: {:?}", level, e))
}
