//! Console front end: connect to the wearable, then type commands.

use clap::Parser;
use hearless::{
    args::{HearlessArgs, LinkCommand},
    config::Config,
    dummy_device::DummyDevice,
    session::{Session, SessionEvent},
    transport::{notification_pair, SerialTransport},
};

use log::{info, warn};
use std::{
    io::{self, BufRead},
    sync::mpsc::{self, Sender},
    thread::spawn,
    time::{Duration, Instant},
};

// Example:
// RUST_LOG=info cargo run --bin hearless -- --auto serial --port /dev/ttyUSB0
//
// Then type lines such as
//   motor1_freq=120
//   toggle 1
//   CAM SNAP
//   auto on
//   {"event":"result","data":{"sound":"horn","angle":300.0}}
//   status
//   quit

fn main() {
    env_logger::init();
    let args = HearlessArgs::parse();

    if let LinkCommand::Ports = args.command {
        let available_ports = SerialTransport::available_ports().expect("Failed to get available ports");
        println!("Available devices:");
        for port in available_ports {
            println!("\t{}", port.to_string_lossy());
        }
        return;
    }

    let config = match &args.config {
        Some(path) => Config::from_path(path).expect("Failed to load config"),
        None => Config::default(),
    };

    let (tx, rx) = mpsc::channel();
    let mut session = Session::new(&config, Instant::now()).with_auto_drive(args.auto_drive);

    if args.forward_images {
        let (feed_tx, feed_rx) = mpsc::channel();
        session = session.with_feed(feed_tx);
        spawn(move || {
            for signal in feed_rx {
                match signal.to_json() {
                    Ok(json) => println!("{json}"),
                    Err(e) => warn!("Could not encode feed message: {}", e),
                }
            }
        });
    }

    let mut dummy = None;
    let connected = match args.command {
        LinkCommand::Serial(serial) => {
            let baud_rate = serial.baud_rate.unwrap_or(config.baud_rate);
            let transport =
                SerialTransport::open(&serial.port, baud_rate, tx.clone()).expect("Failed to open port");
            session.connect(Box::new(transport), Instant::now())
        }
        LinkCommand::Dummy(options) => {
            let (transport, peer) = notification_pair("dummy wearable", tx.clone());
            let device = DummyDevice::start(peer);
            device.set_image_size(options.image_size);
            device.set_frame_interval(Duration::from_millis(options.frame_interval_ms));
            dummy = Some(device);
            session.connect(Box::new(transport), Instant::now())
        }
        LinkCommand::Ports => unreachable!(),
    };
    if let Err(e) = connected {
        warn!("Device did not accept the initial stop: {}", e);
    }

    spawn(move || read_console(tx));

    let session = session.run(rx);
    info!("Session ended after {} image(s)", session.images_received());
    print!("{}", session.snapshot());

    if let Some(mut device) = dummy {
        device.stop();
    }
}

/// Forward stdin to the session until EOF or `quit`.
fn read_console(tx: Sender<SessionEvent>) {
    for line in io::stdin().lock().lines() {
        let Ok(line) = line else { break };

        if line.trim() == "status" {
            let (reply_tx, reply_rx) = mpsc::channel();
            if tx.send(SessionEvent::Status(reply_tx)).is_err() {
                return;
            }
            if let Ok(snapshot) = reply_rx.recv() {
                print!("{snapshot}");
                for entry in &snapshot.log {
                    println!("{entry}");
                }
            }
            continue;
        }

        match SessionEvent::from_console(&line) {
            Ok(Some(event)) => {
                let quitting = matches!(event, SessionEvent::Shutdown);
                if tx.send(event).is_err() || quitting {
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => eprintln!("{e}"),
        }
    }
    let _ = tx.send(SessionEvent::Shutdown);
}
