use serde::{Deserialize, Serialize};

/// Render buffer size in frames. Persisted as the plain frame count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum BufferSize {
    B64 = 64,
    B128 = 128,
    B256 = 256,
    #[default]
    B512 = 512,
    B1024 = 1024,
    B2048 = 2048,
}

impl BufferSize {
    pub const ALL: [BufferSize; 6] = [
        BufferSize::B64,
        BufferSize::B128,
        BufferSize::B256,
        BufferSize::B512,
        BufferSize::B1024,
        BufferSize::B2048,
    ];

    pub fn as_samples(&self) -> u32 {
        *self as u32
    }

    /// Latency in milliseconds at the given sample rate.
    pub fn latency_ms(&self, sample_rate: u32) -> f32 {
        (self.as_samples() as f32 / sample_rate as f32) * 1000.0
    }

    pub fn from_samples(frames: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.as_samples() == frames)
    }
}

impl TryFrom<u32> for BufferSize {
    type Error = String;

    fn try_from(frames: u32) -> Result<Self, Self::Error> {
        BufferSize::from_samples(frames)
            .ok_or_else(|| format!("unsupported buffer size {frames} (expected 64..2048, power of two)"))
    }
}

impl From<BufferSize> for u32 {
    fn from(size: BufferSize) -> u32 {
        size.as_samples()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_512() {
        assert_eq!(BufferSize::default().as_samples(), 512);
    }

    #[test]
    fn latency_at_48k() {
        let ms = BufferSize::B512.latency_ms(48_000);
        assert!((ms - 10.666).abs() < 0.01);
    }

    #[test]
    fn serializes_as_frame_count() {
        assert_eq!(serde_json::to_string(&BufferSize::B256).unwrap(), "256");
        let parsed: BufferSize = serde_json::from_str("1024").unwrap();
        assert_eq!(parsed, BufferSize::B1024);
        assert!(serde_json::from_str::<BufferSize>("500").is_err());
    }
}
