//! Hearless is a wearable for people who cannot hear: three vibration motors
//! around the torso and a camera, so that a sound coming from behind and to
//! the left is felt behind and to the left.
//!
//! This is the host-side software that talks to it. It decodes what the
//! wearable streams back (text lines and chunked camera frames), keeps track
//! of what each motor was last told to do, and turns results from a sound
//! detection service into motor commands.
//!
//! The entry point is [`session::Session`], which owns all of that state and
//! is driven by [`session::SessionEvent`]s from a single thread.

pub mod activity_log;
pub mod args;
pub mod command;
pub mod config;
pub mod detection;
pub mod dispatcher;
pub mod dummy_device;
pub mod error;
pub mod frame_decoder;
pub mod image_assembler;
pub mod localizer;
pub mod motor;
pub mod session;
pub mod timer;
pub mod transport;
