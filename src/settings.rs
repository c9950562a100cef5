/// Attempts the underrun-skipping audio pull makes before giving up. Calibrated to
/// roughly one second of audio at one-sample granularity and 48 kHz.
pub const DEFAULT_UNDERRUN_RETRY_LIMIT: u32 = 48_000;

/// Per-session configuration.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub struct SessionSettings {
    underrun_retry_limit: u32,
    retain_handshake_audio: bool,
}

impl SessionSettings {
    #[must_use]
    pub const fn new() -> Self {
        Self { underrun_retry_limit: DEFAULT_UNDERRUN_RETRY_LIMIT, retain_handshake_audio: true }
    }

    /// Maximum number of zero-duration audio frames skipped by a single pull. A value of
    /// zero is raised to one so a pull always looks at least once.
    #[must_use]
    pub const fn underrun_retry_limit(mut self, limit: u32) -> Self {
        self.underrun_retry_limit = if limit == 0 { 1 } else { limit };
        self
    }

    /// Whether the audio frame consumed while computing the origin is emitted as the first
    /// audio sample (at timestamp zero) instead of being dropped.
    #[must_use]
    pub const fn retain_handshake_audio(mut self, retain: bool) -> Self {
        self.retain_handshake_audio = retain;
        self
    }

    #[must_use]
    #[inline]
    pub const fn max_underrun_retries(&self) -> u32 {
        self.underrun_retry_limit
    }

    #[must_use]
    #[inline]
    pub const fn retains_handshake_audio(&self) -> bool {
        self.retain_handshake_audio
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = SessionSettings::default();
        assert_eq!(settings.max_underrun_retries(), 48_000);
        assert!(settings.retains_handshake_audio());
    }

    #[test]
    fn zero_retry_limit_still_pulls_once() {
        let settings = SessionSettings::new().underrun_retry_limit(0);
        assert_eq!(settings.max_underrun_retries(), 1);
    }
}
