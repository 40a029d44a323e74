//! # ReelForge Synthesis
//!
//! Turns a validated script into a finished video: narration from a
//! speech engine, muxed over looping base footage with the output cut to
//! the narration's length.

pub mod ffmpeg;
pub mod service;
pub mod tts;

pub use ffmpeg::FfmpegTranscoder;
pub use service::{ArtifactPaths, SynthesisService, task_id_of};
pub use tts::HttpSpeechEngine;
