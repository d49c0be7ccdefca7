use nah_materialize::CancelToken;
use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Route Ctrl-C into `cancel`. A second Ctrl-C exits immediately.
///
/// The handler can only be installed once per process; later calls are
/// ignored.
pub fn install_signal_handler(cancel: CancelToken) {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(130);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        cancel.cancel();
        eprintln!("\ncancelling, cleaning up staging data...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_shutdown_without_signal() {
        install_signal_handler(CancelToken::new());
        assert!(!shutdown_requested());
    }
}
