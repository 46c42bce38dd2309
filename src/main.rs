//! vrtrackd: drives Rift DK2 HMDs and tracking cameras as they are plugged in.
//!
//! Usage: vrtrackd
//! Settings come from VRTRACKD_* environment variables, log levels from
//! RUST_LOG. Stop with Ctrl+C or SIGTERM.

use vrtrackd::{channel_tracker_factory, DaemonConfig, Hotplug, Monitor, ShutdownSignal, TrackerEvent, SIGNATURES};

const USAGE: &str = "\
Usage: vrtrackd [-h|--help]

Environment:
  VRTRACKD_REPORT_RATE       HMD report rate in Hz (default 500)
  VRTRACKD_IDLE_REPORT_RATE  report rate restored on stop (default 50)
  VRTRACKD_BLINK             cycle LED blink patterns (default true)
  VRTRACKD_LOW_PERSISTENCE   low persistence display (default true)
  VRTRACKD_PIXEL_READBACK    pixel readback for latency (default true)
  VRTRACKD_TRACKER_QUEUE     tracker event queue size (default 1024)
  RUST_LOG                   log filter (default info)";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Some(arg) = std::env::args().nth(1) {
        if arg == "-h" || arg == "--help" {
            println!("{}", USAGE);
            return;
        }
        eprintln!("Unknown argument: {}\n\n{}", arg, USAGE);
        std::process::exit(2);
    }

    // Block termination signals before any thread exists.
    let mut shutdown = match ShutdownSignal::install() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to set up signal handling: {}", e);
            std::process::exit(1);
        }
    };

    let config = DaemonConfig::from_env();
    log::debug!("Configuration: {:?}", config);

    let (sender, events) = crossbeam_channel::bounded(config.tracker_queue);
    let consumer = std::thread::Builder::new()
        .name("vrtrackd-tracker".into())
        .spawn(move || {
            for event in events {
                match event {
                    TrackerEvent::LedsRegistered(model) => log::info!("Tracker: {} LEDs registered", model.len()),
                    TrackerEvent::LedsUnregistered(count) => log::info!("Tracker: {} LEDs unregistered", count),
                    TrackerEvent::Imu(sample) => log::trace!("Tracker: {:?}", sample),
                    TrackerEvent::Frame(timing) => log::trace!("Tracker: {:?}", timing),
                }
            }
        });
    if let Err(e) = consumer {
        eprintln!("Failed to spawn tracker thread: {}", e);
        std::process::exit(1);
    }

    let monitor = match Monitor::new() {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Failed to start hotplug monitor: {}", e);
            std::process::exit(1);
        }
    };

    let mut hotplug = Hotplug::new(SIGNATURES, channel_tracker_factory(sender), config);
    log::info!("Watching for devices");
    let result = monitor.run(&mut hotplug, &mut shutdown);

    vrtrackd::shutdown::stop_all_devices(&mut hotplug);

    if let Err(e) = result {
        log::error!("Monitor failed: {}", e);
        std::process::exit(1);
    }
}
