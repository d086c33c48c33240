use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;

/// Registers SIGINT/SIGTERM handlers that raise the returned flag. The walker
/// stops before its next title once the flag is set. A second signal while
/// the flag is already raised terminates the process.
pub fn install() -> Result<Arc<AtomicBool>> {
    let should_stop = Arc::new(AtomicBool::new(false));

    for sig in signal_hook::consts::TERM_SIGNALS {
        signal_hook::flag::register_conditional_shutdown(*sig, 1, Arc::clone(&should_stop))?;
        signal_hook::flag::register(*sig, Arc::clone(&should_stop))?;
    }

    Ok(should_stop)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_interrupt_raises_flag() {
        let should_stop = install().unwrap();
        assert!(!should_stop.load(Ordering::SeqCst));

        signal_hook::low_level::raise(signal_hook::consts::SIGINT).unwrap();

        assert!(should_stop.load(Ordering::SeqCst));
    }
}
