//! # Shutdown Coordination
//!
//! Stops a running session and waits, bounded, for it to release the sensor.
//! The session thread is never killed: on timeout the caller is told and
//! decides whether to exit regardless.

use crate::error::ShutdownTimedOut;
use crate::session::SessionHandle;
use std::time::{Duration, Instant};

/// Request a stop and wait up to `timeout` for the session to reach `Stopped`.
///
/// Idempotent: concurrent or repeated calls all return once the single
/// teardown has finished.
pub fn shutdown(handle: &SessionHandle, timeout: Duration) -> Result<(), ShutdownTimedOut> {
    let started = Instant::now();
    handle.request_stop();

    match handle.wait_stopped(timeout) {
        Ok(()) => {
            log::info!("Session shut down in {:?}", started.elapsed());
            Ok(())
        }
        Err(e) => {
            log::warn!("{}, abandoning session thread", e);
            Err(e)
        }
    }
}
