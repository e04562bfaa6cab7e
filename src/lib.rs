// defrag6 — IPv6 fragment reassembly engine for deep packet inspection
// pipelines.
//
// Callers hand in IPv6 fragments (unfragmentable header prefix +
// fragmentable payload, plus the Fragment-header fields); the engine hands
// back the complete datagram the moment its last missing byte arrives and
// consumes everything else silently. Per-source and global memory budgets
// and a timer sweep bound the state a fragment flood can pin.
//
// Module hierarchy:
//   config      — engine tuning knobs, serde-friendly
//   error       — crate error enum
//   packet      — IPv6 wire constants, fragment splitting, header patching
//   fraglist    — interval merge primitive shared with the IPv4 sibling
//   reassembly  — source table, flow records, timer list, controller

pub mod config;
pub mod error;
pub mod fraglist;
pub mod packet;
pub mod reassembly;

pub use config::FragmentationConfig;
pub use error::DefragError;
pub use fraglist::{FragmentList, InsertDelta, OverlapPolicy};
pub use packet::{parse_fragment, Ipv6Fragment};
pub use reassembly::{Ipv6Reassembler, ReassemblyStats};
