//! Long-running services and their lifecycle.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub mod manager;
pub mod poller;
pub mod signals;
pub mod web;

/// A unit of work that runs for the lifetime of the process.
///
/// `run` should return once `shutdown` is cancelled. Returning earlier is
/// treated as an unexpected exit and stops the whole process.
#[async_trait]
pub trait Service: Send {
    fn name(&self) -> &'static str;

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()>;
}
