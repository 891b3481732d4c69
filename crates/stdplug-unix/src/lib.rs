#[cfg(unix)]
mod unix_process;

#[cfg(unix)]
pub use unix_process::{UnixProcess, UnixSpawner};

pub fn platform_name() -> &'static str {
    "Unix"
}
