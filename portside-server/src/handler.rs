//! Package and error handler traits.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use portside_core::Result;
use tokio_util::sync::CancellationToken;

use crate::scheduler::HandlingError;
use crate::session::Session;

/// Application logic invoked for every decoded package.
#[async_trait]
pub trait PackageHandler<P>: Send + Sync {
    /// Handles one package on the given session.
    ///
    /// `token` is scoped to this dispatch: it fires when the connection
    /// closes or the handling timeout elapses. Handlers doing slow work can
    /// observe it to wind down early; the dispatch proceeds to the next
    /// package either way.
    async fn handle(
        &self,
        session: &Arc<Session>,
        package: P,
        token: CancellationToken,
    ) -> Result<()>;
}

/// Invoked when package handling fails or times out.
///
/// Returns whether the connection should stay open; returning `false`
/// closes it with an application error.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    /// Handles a package handling failure.
    async fn handle_error(&self, session: &Arc<Session>, error: HandlingError) -> bool;
}

/// Default error handler: log the failure and keep the connection open.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAndContinue;

#[async_trait]
impl ErrorHandler for LogAndContinue {
    async fn handle_error(&self, session: &Arc<Session>, error: HandlingError) -> bool {
        crate::log_error!("session {}: package handling failed: {}", session.id(), error);
        true
    }
}

/// Adapts a closure into a [`PackageHandler`].
pub fn handler_fn<P, F, Fut>(f: F) -> FnHandler<F>
where
    P: Send + 'static,
    F: Fn(Arc<Session>, P, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    FnHandler { f }
}

/// See [`handler_fn`].
#[derive(Debug, Clone)]
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<P, F, Fut> PackageHandler<P> for FnHandler<F>
where
    P: Send + 'static,
    F: Fn(Arc<Session>, P, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(
        &self,
        session: &Arc<Session>,
        package: P,
        token: CancellationToken,
    ) -> Result<()> {
        (self.f)(session.clone(), package, token).await
    }
}

/// Adapts a closure into an [`ErrorHandler`].
pub fn error_handler_fn<F, Fut>(f: F) -> FnErrorHandler<F>
where
    F: Fn(Arc<Session>, HandlingError) -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send + 'static,
{
    FnErrorHandler { f }
}

/// See [`error_handler_fn`].
#[derive(Debug, Clone)]
pub struct FnErrorHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ErrorHandler for FnErrorHandler<F>
where
    F: Fn(Arc<Session>, HandlingError) -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send + 'static,
{
    async fn handle_error(&self, session: &Arc<Session>, error: HandlingError) -> bool {
        (self.f)(session.clone(), error).await
    }
}
