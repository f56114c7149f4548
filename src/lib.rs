//! Webcam hand-gesture recognition: a recognition session that turns camera
//! frames into a stream of discrete gestures, and the consumers built on top
//! of it (a live overlay and two gesture-driven games).

pub mod config;
pub mod consumer;
pub mod error;
pub mod gesture;
pub mod model_download;
pub mod pipeline;
pub mod session;
pub mod supervisor;
pub mod types;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
