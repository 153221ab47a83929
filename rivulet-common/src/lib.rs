//! # Rivulet Common Library
//!
//! Shared code for the rivulet playback crates:
//! - Common error type
//! - Fade/easing curve definitions used by volume ramps
//! - Nanosecond time helpers
//! - Configuration file discovery

pub mod config;
pub mod error;
pub mod fade_curves;
pub mod time;

pub use error::{Error, Result};
pub use fade_curves::FadeCurve;
