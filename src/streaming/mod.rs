//! Live view over HTTP: one MJPEG server per camera, fed by the hub's
//! latest-frame slot.

mod handlers;
mod server;
mod stats;
#[cfg(test)]
mod tests;

pub use server::{ServerState, StreamServer};
pub use stats::StreamStats;
