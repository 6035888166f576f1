//! Declarative resource lifecycle.
//!
//! A resource owns a typed state record and exposes exactly three
//! transitions over it. Operations are atomic from the caller's perspective;
//! there is no observable intermediate state.

use std::future::Future;
use std::pin::Pin;

/// Future returned by resource operations.
pub type ResourceFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Create/update/delete contract over a typed state.
pub trait Resource {
    /// Inputs that describe the desired resource.
    type Params;
    /// Record persisted between operations.
    type State;
    /// Error type returned by the resource.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Brings the resource into existence and returns its state.
    fn create<'a>(&'a self, params: &'a Self::Params)
    -> ResourceFuture<'a, Self::State, Self::Error>;

    /// Moves an existing resource towards `params`, returning the new state.
    fn update<'a>(
        &'a self,
        state: &'a Self::State,
        params: &'a Self::Params,
    ) -> ResourceFuture<'a, Self::State, Self::Error>;

    /// Retires the resource described by `state`.
    fn delete<'a>(&'a self, state: &'a Self::State) -> ResourceFuture<'a, (), Self::Error>;
}
