#[cfg(windows)]
mod windows_process;

#[cfg(windows)]
pub use windows_process::{WindowsProcess, WindowsSpawner};

pub fn platform_name() -> &'static str {
    "Windows"
}
