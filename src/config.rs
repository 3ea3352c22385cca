//! Runtime configuration for the emulator.

/// Emulator limits and recording options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmuConfig {
    /// Size of the flat memory in 4-byte words.
    pub memory_words: usize,
    /// Hard cap on executed instructions before the run fails with a loop error.
    pub max_steps: usize,
    /// Keep every debug capture, not only the last one.
    pub capture_log: bool,
}

impl Default for EmuConfig {
    fn default() -> Self {
        Self {
            memory_words: 16 * 1024,
            max_steps: 1_000_000,
            capture_log: false,
        }
    }
}

impl EmuConfig {
    pub fn with_capture_log(mut self) -> Self {
        self.capture_log = true;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }
}
