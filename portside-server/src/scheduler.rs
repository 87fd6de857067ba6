//! Package handling schedulers.
//!
//! A scheduler decides how decoded packages flow into the application
//! handler: [`SerialPackageScheduler`] finishes one package before the next
//! is dispatched, [`ConcurrentPackageScheduler`] spawns a task per package.
//! Both share a [`SchedulerCore`] that owns the handler, the error handler
//! and the optional handling timeout.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::ServerOptions;
use crate::connection::CloseReason;
use crate::handler::{ErrorHandler, LogAndContinue, PackageHandler};
use crate::session::Session;

/// Why handling a package failed.
#[derive(Debug, Error)]
pub enum HandlingError {
    /// The handler did not finish within the configured time limit.
    #[error("package handling exceeded {0:?}")]
    TimedOut(Duration),
    /// The handler returned an error.
    #[error(transparent)]
    Application(#[from] portside_core::Error),
}

/// Dispatches packages from a session into handling.
#[async_trait]
pub trait PackageScheduler<P: Send + 'static>: Send + Sync {
    /// Schedules one package. Serial implementations complete the handling
    /// before returning; concurrent ones return once the work is spawned.
    ///
    /// `token` is the package's cancellation scope, derived from the
    /// connection's lifetime token by the dispatch loop.
    async fn schedule(&self, session: &Arc<Session>, package: P, token: CancellationToken);
}

#[async_trait]
impl<P: Send + 'static> PackageScheduler<P> for Box<dyn PackageScheduler<P>> {
    async fn schedule(&self, session: &Arc<Session>, package: P, token: CancellationToken) {
        (**self).schedule(session, package, token).await;
    }
}

/// Handler, error handler and timeout shared by the scheduler flavors.
pub struct SchedulerCore<P> {
    handler: Box<dyn PackageHandler<P>>,
    error_handler: Box<dyn ErrorHandler>,
    timeout: Option<Duration>,
}

impl<P> fmt::Debug for SchedulerCore<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerCore")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<P: Send + 'static> SchedulerCore<P> {
    /// Creates a core around `handler` with the default error handler and
    /// no handling timeout.
    pub fn new(handler: impl PackageHandler<P> + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            error_handler: Box::new(LogAndContinue),
            timeout: None,
        }
    }

    /// Replaces the error handler.
    pub fn with_error_handler(mut self, error_handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Box::new(error_handler);
        self
    }

    /// Bounds each package handling by `timeout`. A handler that exceeds it
    /// is cancelled and the timeout is reported to the error handler.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn handle_one(&self, session: &Arc<Session>, package: P, token: CancellationToken) {
        let result = match self.timeout {
            Some(limit) => tokio::select! {
                result = self.handler.handle(session, package, token.clone()) => {
                    result.map_err(HandlingError::Application)
                }
                _ = tokio::time::sleep(limit) => {
                    // The handler future is dropped here; work it parked on
                    // the token observes the cancellation as well.
                    token.cancel();
                    Err(HandlingError::TimedOut(limit))
                }
                _ = token.cancelled() => {
                    crate::log_debug!(
                        "session {}: connection closing, dropping in-flight handling",
                        session.id()
                    );
                    return;
                }
            },
            None => tokio::select! {
                result = self.handler.handle(session, package, token.clone()) => {
                    result.map_err(HandlingError::Application)
                }
                _ = token.cancelled() => {
                    crate::log_debug!(
                        "session {}: connection closing, dropping in-flight handling",
                        session.id()
                    );
                    return;
                }
            },
        };

        match result {
            Ok(()) => {
                #[cfg(feature = "metrics")]
                metrics::counter!("portside_server_packages_handled_total").increment(1);
            }
            Err(error) => {
                #[cfg(feature = "metrics")]
                metrics::counter!("portside_server_package_errors_total").increment(1);

                let keep_open = self.error_handler.handle_error(session, error).await;
                if !keep_open {
                    session
                        .connection()
                        .close(CloseReason::ApplicationError)
                        .await;
                }
            }
        }
    }
}

/// Handles packages strictly in arrival order, one at a time.
///
/// The previous package's handling (including its error handling) completes
/// before [`schedule`](PackageScheduler::schedule) returns, so a session
/// dispatch loop that awaits each call never overlaps handlers.
#[derive(Debug)]
pub struct SerialPackageScheduler<P> {
    core: SchedulerCore<P>,
}

impl<P: Send + 'static> SerialPackageScheduler<P> {
    /// Creates a serial scheduler around the given core.
    pub fn new(core: SchedulerCore<P>) -> Self {
        Self { core }
    }
}

#[async_trait]
impl<P: Send + 'static> PackageScheduler<P> for SerialPackageScheduler<P> {
    async fn schedule(&self, session: &Arc<Session>, package: P, token: CancellationToken) {
        self.core.handle_one(session, package, token).await;
    }
}

/// Spawns a task per package; ordering across packages is not preserved.
#[derive(Debug)]
pub struct ConcurrentPackageScheduler<P> {
    core: Arc<SchedulerCore<P>>,
}

impl<P: Send + 'static> ConcurrentPackageScheduler<P> {
    /// Creates a concurrent scheduler around the given core.
    pub fn new(core: SchedulerCore<P>) -> Self {
        Self {
            core: Arc::new(core),
        }
    }
}

#[async_trait]
impl<P: Send + 'static> PackageScheduler<P> for ConcurrentPackageScheduler<P> {
    async fn schedule(&self, session: &Arc<Session>, package: P, token: CancellationToken) {
        let core = self.core.clone();
        let session = session.clone();
        tokio::spawn(async move {
            core.handle_one(&session, package, token).await;
        });
    }
}

/// Builds the scheduler flavor picked by `options` around `core`.
///
/// The options' handling timeout replaces whatever the core carried.
pub fn scheduler_from_options<P: Send + 'static>(
    options: &ServerOptions,
    core: SchedulerCore<P>,
) -> Box<dyn PackageScheduler<P>> {
    let core = SchedulerCore {
        timeout: options.package_handling_timeout,
        ..core
    };

    if options.serial_handling {
        Box::new(SerialPackageScheduler::new(core))
    } else {
        Box::new(ConcurrentPackageScheduler::new(core))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use portside_core::LinePipelineFilter;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::Barrier;

    use super::*;
    use crate::config::ConnectionOptions;
    use crate::connection::{Connection, ConnectionState};
    use crate::handler::{error_handler_fn, handler_fn};
    use crate::session::{serve_packages, Session};

    async fn session_with_lines(
        lines: &str,
    ) -> (
        Arc<Session>,
        crate::connection::PackageStream<String>,
        tokio::io::DuplexStream,
    ) {
        let (server, mut client) = tokio::io::duplex(64 * 1024);
        let mut connection = Connection::new(Box::new(server), ConnectionOptions::default());
        let stream = connection.run(LinePipelineFilter::new()).unwrap();
        let session = Session::new(connection);

        client.write_all(lines.as_bytes()).await.unwrap();
        (session, stream, client)
    }

    fn package_token(session: &Arc<Session>) -> CancellationToken {
        session.connection().cancellation_token().child_token()
    }

    #[tokio::test]
    async fn serial_preserves_order_and_never_overlaps() {
        let (session, stream, client) = session_with_lines("a\r\nb\r\nc\r\n").await;
        drop(client);

        let order = Arc::new(Mutex::new(Vec::new()));
        let active = Arc::new(AtomicUsize::new(0));

        let scheduler = {
            let order = order.clone();
            let active = active.clone();
            SerialPackageScheduler::new(SchedulerCore::new(handler_fn(
                move |_session, package: String, _token| {
                    let order = order.clone();
                    let active = active.clone();
                    async move {
                        let running = active.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(running, 0, "handlers overlapped");
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        order.lock().unwrap().push(package);
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
            )))
        };

        serve_packages(session, stream, scheduler).await;
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn concurrent_handlers_overlap_and_lose_nothing() {
        let (session, stream, client) = session_with_lines("a\r\nb\r\nc\r\nd\r\n").await;
        drop(client);

        // Two handlers must be in flight at once to get past the barrier.
        let barrier = Arc::new(Barrier::new(2));
        let handled = Arc::new(AtomicUsize::new(0));

        let scheduler = {
            let barrier = barrier.clone();
            let handled = handled.clone();
            ConcurrentPackageScheduler::new(SchedulerCore::new(handler_fn(
                move |_session, _package: String, _token| {
                    let barrier = barrier.clone();
                    let handled = handled.clone();
                    async move {
                        barrier.wait().await;
                        handled.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
            )))
        };

        serve_packages(session, stream, scheduler).await;

        // Spawned handlers finish after the dispatch loop; poll for them.
        for _ in 0..100 {
            if handled.load(Ordering::SeqCst) == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handled.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn timeout_is_reported_and_connection_stays_open() {
        let (session, mut stream, client) = session_with_lines("slow\r\n").await;

        let seen = Arc::new(Mutex::new(None));
        let core = {
            let seen = seen.clone();
            SchedulerCore::new(handler_fn(
                move |_session, _package: String, _token| async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                },
            ))
            .with_timeout(Duration::from_millis(20))
            .with_error_handler(error_handler_fn(move |_session, error| {
                let seen = seen.clone();
                async move {
                    *seen.lock().unwrap() = Some(error.to_string());
                    true
                }
            }))
        };
        let scheduler = SerialPackageScheduler::new(core);

        let package = stream.next().await.unwrap();
        let token = package_token(&session);
        scheduler.schedule(&session, package, token).await;

        let report = seen.lock().unwrap().clone().expect("timeout not reported");
        assert!(report.contains("exceeded"), "unexpected report: {report}");
        assert_eq!(session.connection().state(), ConnectionState::Running);
        drop(client);
    }

    #[tokio::test]
    async fn timeout_cancels_the_package_token() {
        let (session, mut stream, client) = session_with_lines("slow\r\n").await;

        let observed = Arc::new(AtomicBool::new(false));
        let core = {
            let observed = observed.clone();
            SchedulerCore::new(handler_fn(
                move |_session, _package: String, token: CancellationToken| {
                    let observed = observed.clone();
                    async move {
                        // Side work tied to the package scope keeps running
                        // after the handler future itself is dropped.
                        tokio::spawn(async move {
                            token.cancelled().await;
                            observed.store(true, Ordering::SeqCst);
                        });
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(())
                    }
                },
            ))
            .with_timeout(Duration::from_millis(20))
        };
        let scheduler = SerialPackageScheduler::new(core);

        let package = stream.next().await.unwrap();
        scheduler
            .schedule(&session, package, package_token(&session))
            .await;

        for _ in 0..100 {
            if observed.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(observed.load(Ordering::SeqCst), "token never fired");
        drop(client);
    }

    #[tokio::test]
    async fn error_handler_can_close_the_connection() {
        let (session, mut stream, _client) = session_with_lines("bad\r\n").await;
        let mut closed = session.connection().closed();

        let core = SchedulerCore::new(handler_fn(
            |_session, _package: String, _token| async move {
                Err(portside_core::Error::Other("handler refused".into()))
            },
        ))
        .with_error_handler(error_handler_fn(|_session, _error| async move { false }));
        let scheduler = SerialPackageScheduler::new(core);

        let package = stream.next().await.unwrap();
        scheduler
            .schedule(&session, package, package_token(&session))
            .await;

        // The close cancels the receive loop; let it finish the teardown.
        assert!(stream.next().await.is_none());
        closed.changed().await.unwrap();
        assert_eq!(*closed.borrow(), Some(CloseReason::ApplicationError));
    }

    #[tokio::test]
    async fn default_error_handler_keeps_the_connection_open() {
        let (session, mut stream, client) = session_with_lines("bad\r\n").await;

        let scheduler = SerialPackageScheduler::new(SchedulerCore::new(handler_fn(
            |_session, _package: String, _token| async move {
                Err(portside_core::Error::Other("handler refused".into()))
            },
        )));

        let package = stream.next().await.unwrap();
        scheduler
            .schedule(&session, package, package_token(&session))
            .await;

        assert_eq!(session.connection().state(), ConnectionState::Running);
        drop(client);
    }

    #[tokio::test]
    async fn options_select_the_serial_flavor() {
        let (session, stream, client) = session_with_lines("a\r\nb\r\n").await;
        drop(client);

        let order = Arc::new(Mutex::new(Vec::new()));
        let scheduler = {
            let order = order.clone();
            scheduler_from_options(
                &ServerOptions::default(),
                SchedulerCore::new(handler_fn(move |_session, package: String, _token| {
                    let order = order.clone();
                    async move {
                        order.lock().unwrap().push(package);
                        Ok(())
                    }
                })),
            )
        };

        serve_packages(session, stream, scheduler).await;
        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn options_select_the_concurrent_flavor() {
        let (session, stream, client) = session_with_lines("a\r\nb\r\n").await;
        drop(client);

        let barrier = Arc::new(Barrier::new(2));
        let handled = Arc::new(AtomicUsize::new(0));

        let options = ServerOptions {
            serial_handling: false,
            ..Default::default()
        };
        let scheduler = {
            let barrier = barrier.clone();
            let handled = handled.clone();
            scheduler_from_options(
                &options,
                SchedulerCore::new(handler_fn(move |_session, _package: String, _token| {
                    let barrier = barrier.clone();
                    let handled = handled.clone();
                    async move {
                        barrier.wait().await;
                        handled.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })),
            )
        };

        serve_packages(session, stream, scheduler).await;

        for _ in 0..100 {
            if handled.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handled.load(Ordering::SeqCst), 2);
    }
}
