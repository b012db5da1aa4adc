use std::io;
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::sync::watch;

/// Determines how to shut down the sinker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShutdownMode {
    /// Shut down gracefully within the configured timeout.
    ///
    /// Services stop accepting new work and finish what they can before the timeout elapses.
    Graceful,
    /// Shut down immediately, without waiting for pending work.
    Immediate,
}

/// Shutdown request message sent by the [`Controller`] to subscribed services.
///
/// A handler has to ensure that it doesn't take longer than `timeout` to resolve the future.
/// Ideally, open work is persisted or finished in an orderly manner but no new requests are
/// accepted anymore.
///
/// After the timeout the system will shut down regardless of what the receivers of this message
/// do.
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    /// The timeout for this shutdown. `None` indicates an immediate forced shutdown.
    pub timeout: Option<Duration>,
}

/// Global notification channel for shutdowns.
static SHUTDOWN: Lazy<watch::Sender<Option<Shutdown>>> = Lazy::new(|| watch::channel(None).0);

/// Manual shutdown requests, in addition to process signals.
static MANUAL_SHUTDOWN: Lazy<watch::Sender<Option<ShutdownMode>>> =
    Lazy::new(|| watch::channel(None).0);

/// Notifies a service about an upcoming shutdown.
// TODO: The receiver of this message can not yet signal they have completed shutdown.
pub struct ShutdownHandle(watch::Receiver<Option<Shutdown>>);

impl ShutdownHandle {
    /// Returns `true` if a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.0.borrow().is_some()
    }

    /// Wait for a shutdown.
    ///
    /// This receives all shutdown signals since the [`Controller`] has been started, even before
    /// this shutdown handle has been obtained.
    ///
    /// # Cancel safety
    ///
    /// This method is cancellation safe and can be used in `select!`.
    pub async fn notified(&mut self) -> Shutdown {
        loop {
            if let Some(shutdown) = self.0.borrow_and_update().as_ref() {
                return shutdown.clone();
            }

            if self.0.changed().await.is_err() {
                // The sender is static and never dropped, park forever.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Service to start and gracefully stop the system runtime.
///
/// This service offers a static API to wait for a shutdown signal or manually initiate the
/// sinker shutdown. To use this functionality, it first needs to be started with
/// [`Controller::start`].
///
/// To shut down gracefully, other services can register with [`Controller::shutdown_handle`].
/// When a shutdown signal is sent to the process, they will receive a [`Shutdown`] message with
/// an optional timeout. After the timeout has passed, the process exits regardless of pending
/// work.
///
/// ### Example
///
/// ```
/// use std::time::Duration;
/// use sinker_system::{Controller, Shutdown, ShutdownMode};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     Controller::start(Duration::from_millis(10));
///     let mut shutdown = Controller::shutdown_handle();
///
///     // Normally, this would be a signal like SIGTERM.
///     Controller::shutdown(ShutdownMode::Graceful);
///
///     let Shutdown { timeout } = shutdown.notified().await;
///     assert_eq!(timeout, Some(Duration::from_millis(10)));
/// }
/// ```
#[derive(Debug)]
pub struct Controller;

impl Controller {
    /// Starts a controller that monitors shutdown signals.
    #[track_caller]
    pub fn start(shutdown_timeout: Duration) {
        let manual = MANUAL_SHUTDOWN.subscribe();
        tokio::spawn(async move {
            if let Err(error) = monitor_shutdown(shutdown_timeout, manual).await {
                sinker_log::error!(
                    error = &error as &dyn std::error::Error,
                    "failed to monitor shutdown signals"
                );
            }
        });
    }

    /// Returns a [handle](ShutdownHandle) to receive shutdown notifications.
    pub fn shutdown_handle() -> ShutdownHandle {
        ShutdownHandle(SHUTDOWN.subscribe())
    }

    /// Manually initiates the shutdown process of the system.
    pub fn shutdown(mode: ShutdownMode) {
        MANUAL_SHUTDOWN.send_replace(Some(mode));
    }
}

#[cfg(unix)]
async fn monitor_shutdown(
    timeout: Duration,
    mut manual: watch::Receiver<Option<ShutdownMode>>,
) -> io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sig_int = signal(SignalKind::interrupt())?;
    let mut sig_quit = signal(SignalKind::quit())?;
    let mut sig_term = signal(SignalKind::terminate())?;

    let timeout = tokio::select! {
        biased;

        Some(()) = sig_int.recv() => {
            sinker_log::info!("SIGINT received, exiting");
            None
        }
        Some(()) = sig_quit.recv() => {
            sinker_log::info!("SIGQUIT received, exiting");
            None
        }
        Some(()) = sig_term.recv() => {
            sinker_log::info!("SIGTERM received, stopping in {}s", timeout.as_secs());
            Some(timeout)
        }
        Ok(()) = manual.changed() => match *manual.borrow() {
            Some(ShutdownMode::Graceful) => {
                sinker_log::info!("graceful shutdown initiated");
                Some(timeout)
            }
            Some(ShutdownMode::Immediate) | None => {
                sinker_log::info!("immediate shutdown initiated");
                None
            }
        },
    };

    SHUTDOWN.send_replace(Some(Shutdown { timeout }));

    Ok(())
}

#[cfg(not(unix))]
async fn monitor_shutdown(
    timeout: Duration,
    mut manual: watch::Receiver<Option<ShutdownMode>>,
) -> io::Result<()> {
    let timeout = tokio::select! {
        biased;

        Ok(()) = tokio::signal::ctrl_c() => {
            sinker_log::info!("SIGINT received, exiting");
            None
        }
        Ok(()) = manual.changed() => match *manual.borrow() {
            Some(ShutdownMode::Graceful) => Some(timeout),
            Some(ShutdownMode::Immediate) | None => None,
        },
    };

    SHUTDOWN.send_replace(Some(Shutdown { timeout }));

    Ok(())
}
