pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;
pub const DEFAULT_MAX_ACCEPT_FAILURES: usize = 10;

/// Server settings. The binary fills these from command-line flags; embedders usually start
/// from `Config::default()`.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Largest number of bytes a connection may buffer while waiting for a frame to complete.
    pub max_frame_size: usize,
    /// Number of failed `accept` calls tolerated before the listener gives up.
    pub max_accept_failures: usize,
    /// Write top-level null replies as `-1\r\n` rather than the RESP null bulk string.
    pub legacy_null: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_accept_failures: DEFAULT_MAX_ACCEPT_FAILURES,
            legacy_null: false,
        }
    }
}
