//! End-to-end flights against the simulated flight stack: stdin-style
//! lines go in, the aircraft flies, the readback comes out.

use std::sync::Arc;

use approx::assert_relative_eq;
use tokio::time::{sleep, Duration};

use dronebot::controller::Controller;
use dronebot::geo;
use dronebot::transport::sim::SimDrone;
use dronebot::transport::{Drone, SystemAddress};
use dronebot::voice::CollectSpeaker;
use phraseology::vocabulary::Vocabulary;

const MIQ_LAT: f64 = 48.688383;
const MIQ_LON: f64 = 11.525417;

/// The voice worker drains its queue on a real thread; give it wall-clock
/// time even under a paused test clock.
fn wait_for_utterance(speaker: &CollectSpeaker, needle: &str) {
    let deadline =
        std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        if speaker
            .utterances
            .lock()
            .unwrap()
            .iter()
            .any(|u| u.contains(needle))
        {
            return;
        }
        if std::time::Instant::now() > deadline {
            panic!(
                "never heard '{needle}' in {:?}",
                speaker.utterances.lock().unwrap()
            );
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
}

fn controller(
    sim: &Arc<SimDrone>,
) -> (Controller, CollectSpeaker, std::path::PathBuf) {
    let address: SystemAddress = "udp://:14550".parse().unwrap();
    let vocab = Vocabulary::load_default().unwrap();
    let speaker = CollectSpeaker::default();
    let save_path = std::env::temp_dir().join(format!(
        "dronebot-scenario-{}-{:p}.p",
        std::process::id(),
        Arc::as_ptr(sim),
    ));
    let drone: Arc<dyn Drone> = sim.clone();
    let mut controller = Controller::new(
        drone,
        address,
        "cityairbus1234",
        vocab,
        speaker.clone(),
        false,
    );
    controller.set_save_path(save_path.clone());
    (controller, speaker, save_path)
}

#[tokio::test(start_paused = true)]
async fn full_flight_from_clearance_to_shutdown() {
    let sim = Arc::new(SimDrone::new());
    let (controller, speaker, save_path) = controller(&sim);
    let input = controller.input_handle();
    let run = tokio::spawn(controller.run());

    // startup handshake and the initial check-in
    sleep(Duration::from_secs(5)).await;

    input
        .send("cityairbus1234 cleared flight planned route".into())
        .unwrap();
    sleep(Duration::from_secs(2)).await;
    assert!(sim.is_armed(), "route clearance should start the engine");

    input
        .send("cityairbus 1234 cleared for takeoff".into())
        .unwrap();
    sleep(Duration::from_secs(30)).await;
    assert!(sim.is_in_air(), "takeoff clearance should get airborne");

    input
        .send("cityairbus1234 climb flight level five zero".into())
        .unwrap();
    sleep(Duration::from_secs(60)).await;
    assert_relative_eq!(
        sim.current_position().relative_altitude_m,
        50.0 * 30.48 * 0.01,
        epsilon = 0.2
    );

    input.send("cityairbus1234 direct MIQ".into()).unwrap();
    sleep(Duration::from_secs(120)).await;
    let pos = sim.current_position();
    let dist = geo::distance_m(
        pos.latitude_deg,
        pos.longitude_deg,
        MIQ_LAT,
        MIQ_LON,
    );
    assert!(dist < 1.0, "expected to hold over MIQ, {dist:.1}m away");

    // first land clearance turns inbound, the second one lands
    input
        .send("cityairbus1234 cleared to land runway two six right".into())
        .unwrap();
    sleep(Duration::from_secs(120)).await;
    input
        .send("cityairbus1234 cleared to land runway two six right".into())
        .unwrap();
    sleep(Duration::from_secs(300)).await;
    assert!(!sim.is_in_air(), "expected to be on the ground");
    assert!(!sim.is_armed(), "expected to be disarmed after landing");

    // empty line terminates the session
    input.send(String::new()).unwrap();
    run.await.unwrap();

    let persisted = std::fs::read_to_string(&save_path).unwrap();
    assert_eq!(persisted.trim(), "parked");
    std::fs::remove_file(&save_path).ok();

    wait_for_utterance(&speaker, "Request IFR clearance");
    wait_for_utterance(&speaker, "Inbound 26 right");
    wait_for_utterance(&speaker, "request engine shutdown");
}

#[tokio::test(start_paused = true)]
async fn unknown_call_sign_commands_nothing() {
    let sim = Arc::new(SimDrone::new());
    let (controller, speaker, save_path) = controller(&sim);
    let input = controller.input_handle();
    let run = tokio::spawn(controller.run());
    sleep(Duration::from_secs(5)).await;

    input.send("foobar climb flight level 50".into()).unwrap();
    sleep(Duration::from_secs(5)).await;
    assert!(!sim.is_armed());
    assert_relative_eq!(sim.current_position().relative_altitude_m, 0.0);

    wait_for_utterance(&speaker, "Request IFR clearance");

    input.send(String::new()).unwrap();
    run.await.unwrap();
    std::fs::remove_file(&save_path).ok();
}

#[tokio::test(start_paused = true)]
async fn exhausted_preflight_checks_never_take_off() {
    let sim = Arc::new(SimDrone::new());
    let mut health = dronebot::transport::Health::nominal();
    health.is_global_position_ok = false;
    sim.set_health(health);

    let (controller, _speaker, save_path) = controller(&sim);
    let run = tokio::spawn(controller.run());
    run.await.unwrap();
    assert!(!sim.is_armed());
    assert!(!sim.is_in_air());

    let persisted = std::fs::read_to_string(&save_path).unwrap();
    assert_eq!(persisted.trim(), "parked");
    std::fs::remove_file(&save_path).ok();
}

#[tokio::test(start_paused = true)]
async fn rtb_input_returns_home_and_disarms() {
    let sim = Arc::new(SimDrone::new());
    let (controller, _speaker, save_path) = controller(&sim);
    let input = controller.input_handle();
    let run = tokio::spawn(controller.run());
    sleep(Duration::from_secs(5)).await;

    input
        .send("cityairbus1234 cleared flight planned route".into())
        .unwrap();
    input
        .send("cityairbus 1234 cleared for takeoff".into())
        .unwrap();
    sleep(Duration::from_secs(30)).await;
    assert!(sim.is_in_air());

    input.send("rtb".into()).unwrap();
    run.await.unwrap();
    assert!(!sim.is_in_air(), "expected to be back on the ground");
    assert!(!sim.is_armed(), "expected to be disarmed after the RTB");
    std::fs::remove_file(&save_path).ok();
}

#[tokio::test(start_paused = true)]
async fn heading_command_steps_away_from_the_fix() {
    let sim = Arc::new(SimDrone::new());
    let (controller, _speaker, save_path) = controller(&sim);
    let input = controller.input_handle();
    let run = tokio::spawn(controller.run());
    sleep(Duration::from_secs(5)).await;

    input
        .send("cityairbus1234 cleared flight planned route".into())
        .unwrap();
    input
        .send("cityairbus 1234 cleared for takeoff".into())
        .unwrap();
    sleep(Duration::from_secs(30)).await;
    let before = sim.current_position();

    input
        .send("cityairbus1234 turn heading one eight zero".into())
        .unwrap();
    sleep(Duration::from_secs(60)).await;
    let after = sim.current_position();
    assert!(
        after.latitude_deg < before.latitude_deg,
        "heading 180 should move south"
    );
    let dist = geo::distance_m(
        before.latitude_deg,
        before.longitude_deg,
        after.latitude_deg,
        after.longitude_deg,
    );
    assert_relative_eq!(dist, 5.0, epsilon = 0.5);

    input.send(String::new()).unwrap();
    run.await.unwrap();
    std::fs::remove_file(&save_path).ok();
}
