use stdplug_core::{ChannelFactory, ChannelOf};

/// Spawner for the platform this crate was built for, selected at compile time
#[cfg(unix)]
pub type PlatformSpawner = stdplug_unix::UnixSpawner;

#[cfg(windows)]
pub type PlatformSpawner = stdplug_windows::WindowsSpawner;

/// A channel to a child started by [`PlatformSpawner`]
pub type PluginChannel = ChannelOf<PlatformSpawner>;

pub fn platform_factory() -> ChannelFactory<PlatformSpawner> {
    ChannelFactory::new(PlatformSpawner::default())
}

pub fn platform_name() -> &'static str {
    #[cfg(unix)]
    return stdplug_unix::platform_name();

    #[cfg(windows)]
    return stdplug_windows::platform_name();
}
