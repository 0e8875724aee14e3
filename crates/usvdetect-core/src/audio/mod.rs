//! Audio processing module
//!
//! This module contains all audio-related functionality including:
//! - Sample buffers, WAV I/O, and detected-span extraction ([`buffer`])
//! - Band-limited spectral energy and peak frequency ([`spectral`])
//! - Window layout for file-mode analysis ([`segmenter`])
//! - RMS thresholding and the file-mode pipeline ([`detector`])
//! - Capture device abstraction and the cpal driver ([`source`])
//! - Live capture session and state machine ([`engine`])
//! - Fixed-duration capture ([`recorder`])

pub mod buffer;
pub mod detector;
pub mod engine;
pub mod recorder;
pub mod segmenter;
pub mod source;
pub mod spectral;
