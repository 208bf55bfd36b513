use std::sync::Arc;

use clap::Parser;
use tracing::info;

use dronebot::controller::Controller;
use dronebot::logging;
use dronebot::transport::sim::SimDrone;
use dronebot::transport::{Drone, SystemAddress};
use dronebot::voice::LogSpeaker;
use phraseology::vocabulary::Vocabulary;

#[derive(Debug, Parser)]
#[command(
    name = "dronebot",
    version,
    about = "Control a drone flight stack with ATC phraseology (and respond)"
)]
struct Options {
    /// Call sign the aircraft answers to
    #[arg(short, long, default_value = "cityairbus1234")]
    call_sign: String,

    /// System address of the autopilot link (udp://, tcp:// or serial://)
    #[arg(short, long, default_value = "udp://:14550")]
    serial: String,

    /// Set logging level to DEBUG
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Restore the last persisted flight phase
    #[arg(short, long, default_value = "false")]
    restore: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let options = Options::parse();
    logging::init(options.verbose)?;

    let address: SystemAddress = options.serial.parse()?;
    let vocab = Vocabulary::load_default()?;
    let drone: Arc<dyn Drone> = Arc::new(SimDrone::new());

    let controller = Controller::new(
        drone,
        address,
        &options.call_sign,
        vocab,
        LogSpeaker,
        options.restore,
    );
    controller.spawn_stdin_reader();

    let cancel = controller.cancel_token();
    tokio::spawn(async move {
        handle_signals().await;
        cancel.cancel();
    });

    controller.run().await;
    info!("Successfully shutdown VCS");
    Ok(())
}

#[cfg(unix)]
async fn handle_signals() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(_) => return,
    };
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(_) => return,
    };
    let mut interrupt = match signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(_) => return,
    };
    tokio::select! {
        _ = hangup.recv() => info!("Received exit signal SIGHUP"),
        _ = terminate.recv() => info!("Received exit signal SIGTERM"),
        _ = interrupt.recv() => info!("Received exit signal SIGINT"),
    }
}

#[cfg(not(unix))]
async fn handle_signals() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received interrupt");
    }
}
