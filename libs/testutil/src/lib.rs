//! Test doubles shared by the chatlink crates: a scripted widget runtime,
//! recording host surfaces and delegate, and small async assertion helpers.
use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde_json::Value;

mod hosts;
mod runtime;

pub use hosts::{
    DelegateEvent, RecordingContainer, RecordingDelegate, RecordingModalHost, ScriptedBanner,
};
pub use runtime::{AckRule, FakeRuntime, FakeRuntimeFactory, LoadMode};

const POLL_INTERVAL: Duration = Duration::from_millis(1);
const POLL_ATTEMPTS: usize = 2_000;

/// A panicking test thread must not hide recorded state from the others.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Polls `condition` until it holds, panicking after roughly two seconds of
/// (possibly paused) Tokio time.
pub async fn eventually<F>(condition: F)
where
    F: Fn() -> bool,
{
    for _ in 0..POLL_ATTEMPTS {
        if condition() {
            return;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    panic!("condition not met after {POLL_ATTEMPTS} polls");
}

/// Yields to the scheduler a few times so queued work can run without moving
/// the clock.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// Returns true when the payload contains the provided text fragment anywhere in its structure.
pub fn envelope_contains_text(value: &Value, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }

    let mut stack = vec![value];
    while let Some(current) = stack.pop() {
        match current {
            Value::String(text) => {
                if text.contains(needle) {
                    return true;
                }
            }
            Value::Array(items) => stack.extend(items),
            Value::Object(map) => stack.extend(map.values()),
            _ => {}
        }
    }
    false
}
