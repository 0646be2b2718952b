use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Exit code used when a second Ctrl+C forces the process down
pub const FORCED_EXIT_CODE: i32 = 130;

/// Register the Ctrl+C handler.
///
/// The first signal only sets the returned flag; queued uploads keep draining.
/// A second signal exits immediately.
pub fn register_interrupt_handler() -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();

    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            log::warn!("Received second Ctrl+C, exiting without waiting for uploads");
            std::process::exit(FORCED_EXIT_CODE);
        }
        log::info!("Received Ctrl+C, waiting for queued uploads to finish (press again to force exit)");
    })?;

    Ok(interrupted)
}
