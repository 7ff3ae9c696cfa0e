//! Process-wide stop-signal watcher.
//!
//! One watcher task per process, installed lazily when the first service
//! registers. On SIGINT/SIGTERM (Ctrl-C/Ctrl-Break on Windows) it invokes
//! every registered stop hook exactly once; each hook holds a weak service
//! reference, so dropped services are simply skipped.

use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{error, info};

use crate::pool::IoHandle;

type StopHook = Box<dyn Fn() + Send + Sync>;

static STOP_HOOKS: Lazy<Mutex<Vec<StopHook>>> = Lazy::new(|| Mutex::new(Vec::new()));
static WATCHER_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Register a hook fired on the first termination signal, installing the
/// watcher if this is the first registration.
pub fn register_stop_hook(io: &IoHandle, hook: StopHook) {
    STOP_HOOKS.lock().push(hook);
    if !WATCHER_INSTALLED.swap(true, Ordering::SeqCst) {
        // Untracked: the watcher lives until signal or reactor shutdown and
        // must not hold the pool open during drain.
        io.spawn_untracked(async {
            wait_for_stop_signal().await;
            info!("termination signal received");
            fire_stop_hooks();
        });
    }
}

fn fire_stop_hooks() {
    let hooks = std::mem::take(&mut *STOP_HOOKS.lock());
    for hook in &hooks {
        hook();
    }
}

#[cfg(unix)]
async fn wait_for_stop_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = match signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(error) => {
            error!(%error, "failed to install SIGINT handler");
            return;
        }
    };
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(error) => {
            error!(%error, "failed to install SIGTERM handler");
            return;
        }
    };
    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(windows)]
async fn wait_for_stop_signal() {
    use tokio::signal::windows::{ctrl_break, ctrl_c};

    let mut interrupt = match ctrl_c() {
        Ok(stream) => stream,
        Err(error) => {
            error!(%error, "failed to install Ctrl-C handler");
            return;
        }
    };
    let mut console_break = match ctrl_break() {
        Ok(stream) => stream,
        Err(error) => {
            error!(%error, "failed to install Ctrl-Break handler");
            return;
        }
    };
    tokio::select! {
        _ = interrupt.recv() => {}
        _ = console_break.recv() => {}
    }
}

#[cfg(not(any(unix, windows)))]
async fn wait_for_stop_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to wait for Ctrl-C");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn hooks_fire_once_and_drain() {
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = fired.clone();
            STOP_HOOKS.lock().push(Box::new(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }));
        }
        fire_stop_hooks();
        fire_stop_hooks();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
