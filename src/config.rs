// Engine configuration.
//
// Consumed once at construction; the memory limits and the timeout can also
// be adjusted later through the engine's setters. The struct deserializes
// with per-field defaults so a pipeline config file may carry a partial
// `[defrag6]` section.

use serde::{Deserialize, Serialize};

use crate::fraglist::OverlapPolicy;

/// Default number of buckets in the source hash table.
pub const DEFAULT_BUCKETS: usize = 1024;

/// Default memory budget for fragments held for a single source address.
pub const DEFAULT_PER_SOURCE_MEMORY_LIMIT: usize = 1024 * 1024;

/// Default memory budget for all held reassembly state.
pub const DEFAULT_TOTAL_MEMORY_LIMIT: usize = 10 * 1024 * 1024;

/// Default reassembly timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u8 = 30;

/// Tuning knobs for an [`Ipv6Reassembler`](crate::reassembly::Ipv6Reassembler).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentationConfig {
    /// Number of buckets in the source hash table. Must be at least 1.
    pub buckets: usize,
    /// Maximum bytes of reassembly state attributed to one source address
    /// before its flows are evicted.
    pub per_source_memory_limit: usize,
    /// Maximum bytes of reassembly state held across all sources before the
    /// oldest flows are reaped.
    pub total_memory_limit: usize,
    /// Seconds a flow may sit incomplete before the timer sweep reaps it.
    /// Changing this at runtime affects only flows created afterwards.
    pub timeout_secs: u8,
    /// How the fragment list resolves overlapping intervals.
    pub overlap_policy: OverlapPolicy,
    /// Reject fragments whose on-wire packet is smaller than the IPv6
    /// minimum MTU (1280 bytes). Such fragments are likely forged; disable
    /// only for test corpora with small packets.
    pub enforce_min_mtu: bool,
}

impl Default for FragmentationConfig {
    fn default() -> Self {
        Self {
            buckets: DEFAULT_BUCKETS,
            per_source_memory_limit: DEFAULT_PER_SOURCE_MEMORY_LIMIT,
            total_memory_limit: DEFAULT_TOTAL_MEMORY_LIMIT,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            overlap_policy: OverlapPolicy::PreferNewest,
            enforce_min_mtu: true,
        }
    }
}
