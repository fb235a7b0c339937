// Commandline argument parser using clap for hearless

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct HearlessArgs {
    #[command(subcommand)]
    /// How to reach the wearable
    pub command: LinkCommand,

    /// RON file with runtime settings; defaults are used when omitted
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Drive the motors from detection results as soon as they arrive
    #[arg(short = 'a', long = "auto", global = true)]
    pub auto_drive: bool,

    /// Print completed camera frames to stdout as `image_stream` feed messages
    #[arg(long = "forward-images", global = true)]
    pub forward_images: bool,
}

#[derive(Debug, Subcommand, Clone)]
pub enum LinkCommand {
    /// List the serial devices the OS can see
    #[command(about)]
    Ports,

    /// Talk to the wearable over a serial cable
    #[command(about)]
    Serial(SerialCommand),

    /// Talk to a simulated wearable, no hardware needed
    #[command(about)]
    Dummy(DummyCommand),
}

#[derive(Debug, Args, Clone)]
pub struct SerialCommand {
    /// Serial device to open, e.g. /dev/ttyUSB0
    #[arg(short = 'p', long = "port")]
    pub port: PathBuf,

    /// Overrides the baud rate from the config
    #[arg(short = 'b', long = "baud")]
    pub baud_rate: Option<u32>,
}

#[derive(Debug, Args, Clone)]
pub struct DummyCommand {
    /// Size of each simulated camera frame, in bytes
    #[arg(long = "image-size", default_value_t = 2048)]
    pub image_size: usize,

    /// Milliseconds between streamed frames
    #[arg(long = "frame-ms", default_value_t = 500)]
    pub frame_interval_ms: u64,
}
