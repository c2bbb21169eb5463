//! Native audio plumbing for calls: microphone capture, speaker playback, G.711 µ-law and resampling.
pub mod audio;
pub mod capture;
pub mod device;
pub mod playback;
