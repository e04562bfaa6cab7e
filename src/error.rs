#[derive(Debug, thiserror::Error)]
pub enum DefragError {
    #[error("bucket count must be at least 1")]
    InvalidBucketCount,
    #[error("fragment interval is empty")]
    EmptyInterval,
    #[error("fragment [{start}, {end}) overlaps previously received data")]
    OverlapConflict { start: u32, end: u32 },
    #[error("compacted payload is {actual} bytes, declared length is {declared}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("reassembled datagram would be {len} bytes, above the 65535 maximum")]
    OversizedDatagram { len: usize },
}
