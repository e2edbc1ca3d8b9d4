//! DriveGuard Pipeline Simulation
//!
//! Runs the whole pipeline in one process over the in-memory broker: a
//! scripted drive feeds the edge loop, alerts cross the hub into the
//! ingestor, and the coordinator drives the trip ledger, notifications
//! and device commands. Prints what a deployment would persist and push.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Duration as ChronoDuration;

use driveguard::{
    Actuator, Alert, AlertIngestor, AlertTransport, AssignmentStore, ControlAction,
    CoordinatorConfig, DetectionRunner, Driver, EdgeConfig, EdgeIdentity, FleetStore,
    FrameFeatures, FrameSource, InMemoryBroker, InMemoryStores, Notification,
    NotificationDispatcher, NotificationSink, NotifyError, Settings, Severity,
    TripKey, TripLifecycleCoordinator, TripStore, Vehicle, TRIP_ALERT_TYPE,
};

#[derive(Default)]
struct Config {
    /// Frame rate override for the edge loop.
    fps: Option<u32>,
    /// Shrink detector sustains so the run finishes in seconds.
    fast: bool,
}

fn parse_args() -> Config {
    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--fps" => {
                if i + 1 < args.len() {
                    let fps: u32 = args[i + 1].parse().unwrap_or_else(|_| {
                        eprintln!("error: invalid frame rate: {}", args[i + 1]);
                        std::process::exit(1);
                    });
                    config.fps = Some(fps.max(1));
                    i += 2;
                } else {
                    eprintln!("error: --fps requires a value");
                    std::process::exit(1);
                }
            }
            "--fast" => {
                config.fast = true;
                i += 1;
            }
            "--help" | "-h" => {
                println!("driveguard-sim - DriveGuard pipeline simulation");
                println!();
                println!("USAGE:");
                println!("    driveguard-sim [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    --fps <N>    Edge frame rate [default: DRIVEGUARD_TARGET_FPS or 15]");
                println!("    --fast       Shrink detector sustains for a quick run");
                println!("    -h, --help   Print help information");
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
        }
    }

    config
}

/// Replays a fixed feature script, then closes the stream.
struct ScriptedSource {
    frames: Vec<FrameFeatures>,
    cursor: usize,
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Option<FrameFeatures> {
        let frame = self.frames.get(self.cursor).copied();
        self.cursor += 1;
        frame
    }
}

/// Prints device commands the way a buzzer/LED board would act on them.
struct ConsoleActuator;

impl Actuator for ConsoleActuator {
    fn apply(&mut self, action: ControlAction) {
        println!("[device] applying command: {action}");
    }
}

/// Prints notifications instead of calling a push service.
struct ConsoleSink;

impl NotificationSink for ConsoleSink {
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        println!("[push] ----------------------------------------");
        for line in notification.render().lines() {
            println!("[push] {line}");
        }
        println!("[push] ----------------------------------------");
        Ok(())
    }
}

/// One scripted drive: attentive stretches separated by a drowsy spell,
/// a long glance away and a held help gesture. Phase lengths follow the
/// configured sustains so every detector gets to fire exactly once.
fn scripted_drive(edge: &EdgeConfig) -> Vec<FrameFeatures> {
    let fps = f64::from(edge.target_fps.max(1));
    let sec = |s: f64| {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let frames = (s * fps).ceil() as usize;
        frames
    };
    let hold = |sustain: ChronoDuration| {
        #[allow(clippy::cast_precision_loss)]
        let sustain_secs = sustain.num_milliseconds() as f64 / 1000.0;
        sec(sustain_secs + 1.5)
    };

    let attentive = FrameFeatures {
        ear: Some(0.30),
        gaze_offset: Some(0.02),
        closed_fingers: None,
    };
    let drowsy = FrameFeatures {
        ear: Some(0.14),
        gaze_offset: Some(0.0),
        closed_fingers: None,
    };
    let looking_away = FrameFeatures {
        ear: Some(0.30),
        gaze_offset: Some(0.40),
        closed_fingers: None,
    };
    let help_gesture = FrameFeatures {
        ear: Some(0.30),
        gaze_offset: Some(0.02),
        closed_fingers: Some(5.0),
    };

    let mut frames = Vec::new();
    frames.extend(std::iter::repeat(attentive).take(sec(1.0)));
    frames.extend(std::iter::repeat(drowsy).take(hold(edge.drowsiness.sustain)));
    frames.extend(std::iter::repeat(attentive).take(sec(1.0)));
    frames.extend(std::iter::repeat(looking_away).take(hold(edge.gaze.sustain)));
    frames.extend(std::iter::repeat(attentive).take(sec(1.0)));
    frames.extend(std::iter::repeat(help_gesture).take(hold(edge.help.sustain)));
    frames.extend(std::iter::repeat(attentive).take(sec(0.5)));
    frames
}

fn press_trip_button(
    edge: &AlertTransport,
    driver: &Driver,
    vehicle: &Vehicle,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut alert = Alert::new(
        TRIP_ALERT_TYPE,
        Severity::Low,
        "Solicitud de inicio o fin de viaje",
    );
    alert.driver_id = Some(driver.id);
    alert.vehicle_id = Some(vehicle.id);
    edge.publish_alert(&alert)?;
    Ok(())
}

fn wait_for(
    what: &str,
    deadline: Duration,
    mut check: impl FnMut() -> bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return Ok(());
        }
        thread::sleep(Duration::from_millis(10));
    }
    Err(format!("timed out waiting for {what}").into())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = parse_args();
    let mut settings = Settings::from_env();
    if let Some(fps) = args.fps {
        settings.edge.target_fps = fps;
    }
    if args.fast {
        settings.edge.process_every = 1;
        settings.edge.drowsiness.sustain = ChronoDuration::milliseconds(400);
        settings.edge.gaze.sustain = ChronoDuration::milliseconds(300);
        settings.edge.help.sustain = ChronoDuration::milliseconds(200);
    }

    println!("driveguard-sim v{}", env!("CARGO_PKG_VERSION"));

    // Backend state: stores, fleet, notifier, coordinator.
    let stores = InMemoryStores::new();
    let trips = Arc::new(stores.trips);
    let assignments = Arc::new(stores.assignments);
    let fleet = Arc::new(stores.fleet);

    let driver = fleet.add_driver("Ana", "Torres")?;
    let vehicle = fleet.add_vehicle("ABC-123")?;
    let key = TripKey::new(driver.id, vehicle.id);
    println!("fleet seeded: {} driving {}", driver.full_name(), vehicle.plate);

    // One hub, two links: the device side and the backend side.
    let hub = InMemoryBroker::new();
    let edge = Arc::new(AlertTransport::start(
        Box::new(hub.clone()),
        settings.transport.clone(),
    ));
    let backend = Arc::new(AlertTransport::start(
        Box::new(hub.clone()),
        settings.transport.clone(),
    ));

    let notifier = Arc::new(NotificationDispatcher::new(
        Arc::new(ConsoleSink) as Arc<dyn NotificationSink>,
        Arc::clone(&trips) as Arc<dyn TripStore>,
        Arc::clone(&fleet) as Arc<dyn FleetStore>,
    ));
    let coordinator = Arc::new(
        TripLifecycleCoordinator::new(
            Arc::clone(&trips) as Arc<dyn TripStore>,
            Arc::clone(&assignments) as Arc<dyn AssignmentStore>,
            Arc::clone(&fleet) as Arc<dyn FleetStore>,
            notifier,
            CoordinatorConfig::default(),
        )
        .with_transport(Arc::clone(&backend)),
    );

    let subscription = backend.subscribe(backend.alerts_topic())?;
    let ingestor = AlertIngestor::start(subscription, Arc::clone(&coordinator));

    let assignment_id = coordinator.create_assignment(driver.id, vehicle.id)?;
    println!("assignment {assignment_id} opened for {key}");

    wait_for("pipeline links", Duration::from_secs(10), || {
        hub.subscriber_count(settings.transport.alerts_topic.as_str()) == 1
            && hub.subscriber_count(settings.transport.control_topic.as_str()) == 2
    })?;

    // The driver presses the trip button; the backend starts the trip.
    press_trip_button(&edge, &driver, &vehicle)?;
    wait_for("trip start", Duration::from_secs(10), || {
        trips.get_active_trip(key).map(|t| t.is_some()).unwrap_or(false)
    })?;
    let trip = trips
        .get_active_trip(key)?
        .ok_or("active trip disappeared")?;
    println!(
        "trip {} running: {} → {}",
        trip.id, trip.origin, trip.destination
    );

    // The device now knows its trip and starts watching the driver.
    let frames = scripted_drive(&settings.edge);
    let total_frames = frames.len() as u64;
    let runner = DetectionRunner::start(
        Box::new(ScriptedSource { frames, cursor: 0 }),
        Box::new(ConsoleActuator),
        Arc::clone(&edge),
        EdgeConfig {
            identity: EdgeIdentity {
                trip_id: Some(trip.id),
                driver_id: Some(driver.id),
                vehicle_id: Some(vehicle.id),
                ..EdgeIdentity::default()
            },
            ..settings.edge
        },
    )?;
    println!("edge loop running over {total_frames} scripted frames");

    // React to the first alert the way a deployment would: buzzer on,
    // then off once the driver recovers.
    let script_budget = Duration::from_secs(120);
    wait_for("first alert", script_budget, || {
        ingestor.accepted_alerts() >= 2
    })?;
    coordinator.sound_buzzer()?;
    wait_for("second alert", script_budget, || {
        ingestor.accepted_alerts() >= 3
    })?;
    coordinator.silence_buzzer()?;

    wait_for("scripted drive", script_budget, || {
        runner.frames_seen() >= total_frames
    })?;
    wait_for("help alert", script_budget, || {
        ingestor.accepted_alerts() >= 4
    })?;
    runner.stop();

    // Trip over.
    press_trip_button(&edge, &driver, &vehicle)?;
    wait_for("trip end", Duration::from_secs(10), || {
        trips.get_active_trip(key).map(|t| t.is_none()).unwrap_or(false)
    })?;
    coordinator.close_assignment(assignment_id)?;
    println!("trip {} finished, assignment closed", trip.id);

    // What the backend persisted, newest first.
    let records = trips.alerts_for_trip(trip.id, 50)?;
    println!();
    println!("trip {} ledger ({} alerts):", trip.id, records.len());
    for record in &records {
        println!(
            "  [{:>8}] {:<13} {}",
            record.severity, record.alert_type, record.message
        );
    }

    println!();
    println!(
        "edge: {} frames seen, {} processed, {} alerts emitted",
        runner.frames_seen(),
        runner.frames_processed(),
        runner.emitted_alerts()
    );
    println!(
        "ingest: {} accepted, {} rejected, {} decode failures",
        ingestor.accepted_alerts(),
        ingestor.rejected_alerts(),
        ingestor.decode_failures()
    );
    println!(
        "transport: {} connects, {} dropped publishes, {} dropped events",
        edge.connects() + backend.connects(),
        edge.dropped_publishes() + backend.dropped_publishes(),
        edge.dropped_events() + backend.dropped_events()
    );

    Ok(())
}
