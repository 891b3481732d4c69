//! stdplug core - platform-independent plumbing for stdio plugins
//!
//! Stream combining, subprocess channels and the graceful shutdown sequence.
//! Platform crates supply the OS-backed [`Spawner`] and [`ManagedProcess`].

mod channel;
mod config;
mod duplex;
mod error;
mod process;
mod reaper;
mod shutdown;
mod stdio;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use channel::*;
pub use config::*;
pub use duplex::*;
pub use error::*;
pub use process::*;
pub use reaper::{ChildReaper, Deliver};
pub use shutdown::{close_channel, shutdown_process};
pub use stdio::*;
