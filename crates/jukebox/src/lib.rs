//! Per-channel audio playback for a chat bot.
//!
//! Each scope (server) owns at most one [`subscription`]: a worker that drives
//! a voice player through a queue of lazily materialized [`track::Track`]s.

pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod local;
pub mod media;
pub mod playlist;
pub mod queue;
pub mod registry;
pub mod resource;
pub mod startup;
pub mod subscription;
pub mod track;
pub mod voice;
pub mod youtube;

#[cfg(test)]
mod test_support;

pub use command::{Command, Dispatcher, Invocation, PlayQuery, Reply, Replier};
pub use registry::SubscriptionRegistry;
pub use subscription::SubscriptionHandle;
pub use track::{Track, TrackHooks};
