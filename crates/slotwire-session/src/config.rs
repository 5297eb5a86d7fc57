use slotwire_frame::FrameConfig;

/// Default number of queued inbound stream items before `PAUSE` is sent.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16;

/// Configuration for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Frame layout shared by both directions.
    pub frame: FrameConfig,
    /// Inbound items a stream buffers before asking the writer to pause.
    pub stream_high_water_mark: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            stream_high_water_mark: DEFAULT_HIGH_WATER_MARK,
        }
    }
}

impl SessionConfig {
    pub fn with_magic(mut self, magic: u8) -> Self {
        self.frame.magic = Some(magic);
        self
    }

    /// Clamped to at least one item.
    pub fn with_high_water_mark(mut self, items: usize) -> Self {
        self.stream_high_water_mark = items.max(1);
        self
    }

    pub fn with_max_payload_size(mut self, bytes: usize) -> Self {
        self.frame.max_payload_size = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use slotwire_frame::DEFAULT_MAX_PAYLOAD;

    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.frame.magic, None);
        assert_eq!(config.frame.max_payload_size, DEFAULT_MAX_PAYLOAD);
        assert_eq!(config.stream_high_water_mark, DEFAULT_HIGH_WATER_MARK);
    }

    #[test]
    fn builders_compose() {
        let config = SessionConfig::default()
            .with_magic(0xa5)
            .with_max_payload_size(1024)
            .with_high_water_mark(0);
        assert_eq!(config.frame.magic, Some(0xa5));
        assert_eq!(config.frame.max_payload_size, 1024);
        assert_eq!(config.stream_high_water_mark, 1);
    }
}
