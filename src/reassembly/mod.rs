// IPv6 fragment reassembly engine.
//
// The controller behind `Ipv6Reassembler::process`: locates or creates the
// per-source and per-flow records for an arriving fragment, enforces the
// per-source and global memory budgets, sweeps expired flows, and hands the
// reconstructed datagram back the moment the last missing byte arrives.
// Everything else — capture, extension-header walking, upper-layer
// inspection — lives with the callers.
//
// Record layout follows the classic intrusive design: sources chained per
// hash bucket, flows chained per source, and one engine-wide expiration
// list threaded through the flows. The chains are realized as slotmap
// handles so unlink stays O(1) without raw pointers. A single mutex
// serializes all mutation; eviction sweeps may touch any record, so the
// guard spans the whole call.

mod flow;
mod source;
mod timer;

use std::mem::size_of;
use std::net::Ipv6Addr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, trace};
use serde::Serialize;
use slotmap::SlotMap;

use crate::config::FragmentationConfig;
use crate::error::DefragError;
use crate::fraglist::OverlapPolicy;
use crate::packet::{self, Ipv6Fragment, FRAGMENT_HLEN, MAX_DATAGRAM_SIZE, MINIMUM_MTU};

use flow::{Flow, FlowKey};
use source::{Source, SourceKey, SourceTable};
use timer::TimerQueue;

/// Aggregate view of the engine's tracked state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReassemblyStats {
    pub sources: usize,
    pub flows: usize,
    /// Bytes of reassembly state currently held across all sources.
    pub used_bytes: usize,
}

/// IPv6 fragment reassembly engine.
///
/// Shared freely across packet-processing workers; an internal mutex
/// serializes all work. The only object ever handed back out is the final
/// reassembled datagram, owned by the caller.
pub struct Ipv6Reassembler {
    /// Checked outside the lock; fixed at construction.
    enforce_min_mtu: bool,
    inner: Mutex<EngineState>,
}

struct EngineState {
    sources: SlotMap<SourceKey, Source>,
    flows: SlotMap<FlowKey, Flow>,
    table: SourceTable,
    timers: TimerQueue,
    per_source_memory_limit: usize,
    total_memory_limit: usize,
    timeout_secs: u8,
    overlap_policy: OverlapPolicy,
    total_used_mem: usize,
}

impl Ipv6Reassembler {
    /// Create an engine from `config`. Fails only on a zero bucket count.
    pub fn new(config: FragmentationConfig) -> Result<Self, DefragError> {
        if config.buckets == 0 {
            return Err(DefragError::InvalidBucketCount);
        }
        Ok(Self {
            enforce_min_mtu: config.enforce_min_mtu,
            inner: Mutex::new(EngineState {
                sources: SlotMap::with_key(),
                flows: SlotMap::with_key(),
                table: SourceTable::new(config.buckets),
                timers: TimerQueue::default(),
                per_source_memory_limit: config.per_source_memory_limit,
                total_memory_limit: config.total_memory_limit,
                timeout_secs: config.timeout_secs,
                overlap_policy: config.overlap_policy,
                total_used_mem: 0,
            }),
        })
    }

    /// Feed one fragment; `now` is the caller's logical seconds clock.
    ///
    /// Returns the complete reassembled datagram (unfragmentable prefix
    /// followed by the compacted payload, payload-length field corrected)
    /// when this fragment supplied the last missing byte. Every other
    /// fragment is consumed silently: its bytes are copied, so the caller
    /// may release the packet buffer either way.
    pub fn process(&self, frag: &Ipv6Fragment<'_>, now: u32) -> Option<Vec<u8>> {
        if frag.fragmentable.is_empty() {
            return None;
        }
        // Also validates the prefix: at least a fixed header, extension
        // chain ending exactly at the Fragment header.
        let patch_at = packet::next_header_patch_offset(frag.unfragmentable)?;

        if self.enforce_min_mtu {
            let wire_len = frag.unfragmentable.len() + FRAGMENT_HLEN + frag.fragmentable.len();
            if wire_len < MINIMUM_MTU {
                trace!("fragment below minimum MTU ({wire_len} bytes), likely forged");
                return None;
            }
        }

        let end = u32::from(frag.offset) + frag.fragmentable.len() as u32;
        if end as usize > MAX_DATAGRAM_SIZE {
            debug!("attempt to build an oversized datagram (end {end})");
            return None;
        }

        self.state().process_fragment(frag, end, patch_at, now)
    }

    /// Cap on bytes attributed to a single source before its flows are
    /// evicted. Takes effect on the next call.
    pub fn set_per_source_memory_limit(&self, bytes: usize) {
        self.state().per_source_memory_limit = bytes;
    }

    /// Cap on bytes held across all sources before the oldest flows are
    /// reaped. Takes effect on the next call.
    pub fn set_total_memory_limit(&self, bytes: usize) {
        self.state().total_memory_limit = bytes;
    }

    /// Reassembly timeout for flows created from now on; flows already
    /// enrolled keep their original expiration.
    pub fn set_timeout(&self, seconds: u8) {
        self.state().timeout_secs = seconds;
    }

    pub fn stats(&self) -> ReassemblyStats {
        let state = self.state();
        ReassemblyStats {
            sources: state.sources.len(),
            flows: state.flows.len(),
            used_bytes: state.total_used_mem,
        }
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EngineState {
    fn process_fragment(
        &mut self,
        frag: &Ipv6Fragment<'_>,
        end: u32,
        patch_at: usize,
        now: u32,
    ) -> Option<Vec<u8>> {
        let src_key = match self.table.lookup(&self.sources, &frag.src) {
            Some(key) => key,
            None => {
                let key = self.table.insert(&mut self.sources, frag.src);
                self.total_used_mem += size_of::<Source>();
                key
            }
        };

        // Per-source budget: evict this source's head flow until it fits.
        let mut evicted = false;
        while self.sources[src_key].used_mem > self.per_source_memory_limit {
            let Some(victim) = self.sources[src_key].flows else {
                break;
            };
            debug!("source {} over budget, evicting flow id={:#x}", frag.src, self.flows[victim].id);
            self.delete_flow(victim);
            evicted = true;
        }
        if evicted && self.sources[src_key].flows.is_none() {
            self.delete_source(src_key);
            return None;
        }

        // Timer sweep doubling as the global-budget valve: the head of the
        // list is always the flow expiring soonest.
        while let Some(head) = self.timers.front() {
            let expired = self.flows[head].expires_at < now;
            if !expired && self.total_used_mem < self.total_memory_limit {
                break;
            }
            let owner = self.flows[head].source;
            trace!("sweeping flow id={:#x} (expired: {expired})", self.flows[head].id);
            self.delete_flow(head);
            if self.sources[owner].flows.is_none() {
                self.delete_source(owner);
                if owner == src_key {
                    return None;
                }
            }
        }

        let flow_key = self.find_or_create_flow(src_key, frag.id, frag.dst, now);

        // Malformed: the fragment starts beyond the declared end.
        let declared = self.flows[flow_key].declared_len;
        if declared != 0 && u32::from(frag.offset) > declared {
            debug!("fragment offset {} beyond declared length {declared}", frag.offset);
            return None;
        }

        // The unfragmentable part is identical across a datagram's
        // fragments; store whichever copy arrives first, with its
        // next-header field rewritten since the Fragment header is elided.
        if self.flows[flow_key].unfragmentable.is_none() {
            let mut prefix = frag.unfragmentable.to_vec();
            prefix[patch_at] = frag.next_header;
            self.charge(src_key, prefix.len());
            self.flows[flow_key].unfragmentable = Some(prefix);
        }

        if !frag.more_fragments {
            // A second MF=0 fragment is useless at best.
            if self.flows[flow_key].declared_len != 0 {
                debug!("duplicate final fragment for id={:#x}", frag.id);
                return None;
            }
            self.flows[flow_key].declared_len = end;
        }

        let policy = self.overlap_policy;
        let delta = match self.flows[flow_key]
            .fragments
            .insert(frag.fragmentable, u32::from(frag.offset), policy)
        {
            Ok(delta) => delta,
            Err(e) => {
                debug!("dropping flow id={:#x}: {e}", frag.id);
                self.delete_flow(flow_key);
                self.remove_source_if_empty(src_key);
                return None;
            }
        };
        self.charge(src_key, delta.bytes_inserted);
        self.credit(src_key, delta.bytes_removed);

        let declared = self.flows[flow_key].declared_len;
        if declared != 0 && self.flows[flow_key].fragments.is_contiguous(declared) {
            let built = self.flows[flow_key].assemble(declared);
            self.delete_flow(flow_key);
            self.remove_source_if_empty(src_key);
            return match built {
                Ok(datagram) => {
                    trace!("flow id={:#x} complete, {} bytes", frag.id, datagram.len());
                    Some(datagram)
                }
                Err(e) => {
                    debug!("discarding flow id={:#x}: {e}", frag.id);
                    None
                }
            };
        }
        None
    }

    /// Linear scan of the source's flow chain on `(id, dst)`; on miss the
    /// new flow is prepended and enrolled at the timer tail.
    fn find_or_create_flow(
        &mut self,
        src_key: SourceKey,
        id: u32,
        dst: Ipv6Addr,
        now: u32,
    ) -> FlowKey {
        let mut cur = self.sources[src_key].flows;
        while let Some(key) = cur {
            let flow = &self.flows[key];
            if flow.id == id && flow.dst == dst {
                return key;
            }
            cur = flow.next;
        }

        let expires_at = now + u32::from(self.timeout_secs);
        let head = self.sources[src_key].flows;
        let key = self.flows.insert(Flow::new(id, dst, src_key, expires_at));
        self.flows[key].next = head;
        if let Some(h) = head {
            self.flows[h].prev = Some(key);
        }
        self.sources[src_key].flows = Some(key);
        self.timers.push_back(&mut self.flows, key);
        self.charge(src_key, size_of::<Flow>());
        key
    }

    /// Tear down one flow: timer, fragment buffers, prefix, chain unlink.
    /// Never touches the owning source; source cleanup is decided by the
    /// call sites.
    fn delete_flow(&mut self, key: FlowKey) {
        self.timers.unlink(&mut self.flows, key);
        let Some(flow) = self.flows.remove(key) else {
            return;
        };
        let freed = flow.accounted_bytes();
        match flow.prev {
            Some(p) => self.flows[p].next = flow.next,
            None => self.sources[flow.source].flows = flow.next,
        }
        if let Some(n) = flow.next {
            self.flows[n].prev = flow.prev;
        }
        self.sources[flow.source].used_mem -= freed;
        self.total_used_mem -= freed;
    }

    /// Remove a source that no longer owns flows.
    fn delete_source(&mut self, key: SourceKey) {
        self.table.unlink(&mut self.sources, key);
        if self.sources.remove(key).is_some() {
            self.total_used_mem -= size_of::<Source>();
        }
    }

    fn remove_source_if_empty(&mut self, key: SourceKey) {
        if self.sources[key].flows.is_none() {
            self.delete_source(key);
        }
    }

    fn charge(&mut self, src: SourceKey, bytes: usize) {
        self.sources[src].used_mem += bytes;
        self.total_used_mem += bytes;
    }

    fn credit(&mut self, src: SourceKey, bytes: usize) {
        self.sources[src].used_mem -= bytes;
        self.total_used_mem -= bytes;
    }
}
