//! Remote command execution.

pub mod pipe;
pub mod pool;
pub mod rcon;

use crate::error::TransportResult;
use async_trait::async_trait;

/// Runs administrative commands on a server.
///
/// Commands of one batch are issued in order. A failure fails the whole
/// batch; commands issued before the failure are not rolled back.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Human-readable location of the channel, for logs.
    fn describe(&self) -> String;

    /// Runs `commands` in order and returns one response per command.
    ///
    /// Channels without responses return an empty list.
    async fn run_commands(&self, commands: &[String]) -> TransportResult<Vec<String>>;
}
