// Per-datagram reassembly context.

use std::mem::size_of;
use std::net::Ipv6Addr;

use slotmap::new_key_type;

use crate::error::DefragError;
use crate::fraglist::FragmentList;
use crate::packet::{self, IPV6_HLEN, MAX_DATAGRAM_SIZE};

use super::source::SourceKey;

new_key_type! {
    pub(crate) struct FlowKey;
}

/// One in-progress datagram, keyed by `(id, dst)` within its source.
///
/// Sits on two lists at once: its source's flow chain (`prev`/`next`) and
/// the engine-wide timer list (`timer_prev`/`timer_next`).
#[derive(Debug)]
pub(crate) struct Flow {
    pub(crate) id: u32,
    pub(crate) dst: Ipv6Addr,
    pub(crate) fragments: FragmentList,
    /// Copy of the unfragmentable header prefix from the first fragment
    /// stored for this flow, with its next-header field already rewritten.
    pub(crate) unfragmentable: Option<Vec<u8>>,
    /// Total fragmentable length; 0 until the MF=0 fragment arrives.
    pub(crate) declared_len: u32,
    pub(crate) expires_at: u32,
    pub(crate) source: SourceKey,
    pub(crate) prev: Option<FlowKey>,
    pub(crate) next: Option<FlowKey>,
    pub(crate) timer_prev: Option<FlowKey>,
    pub(crate) timer_next: Option<FlowKey>,
}

impl Flow {
    pub(crate) fn new(id: u32, dst: Ipv6Addr, source: SourceKey, expires_at: u32) -> Self {
        Self {
            id,
            dst,
            fragments: FragmentList::new(),
            unfragmentable: None,
            declared_len: 0,
            expires_at,
            source,
            prev: None,
            next: None,
            timer_prev: None,
            timer_next: None,
        }
    }

    /// Bytes this flow contributes to its source's memory accounting.
    pub(crate) fn accounted_bytes(&self) -> usize {
        size_of::<Flow>()
            + self.unfragmentable.as_ref().map_or(0, Vec::len)
            + self.fragments.byte_count()
    }

    /// Build the complete datagram: stored prefix, compacted payload, and
    /// the payload-length field patched to the final size.
    pub(crate) fn assemble(&self, declared_len: u32) -> Result<Vec<u8>, DefragError> {
        let prefix = self.unfragmentable.as_deref().unwrap_or_default();
        let total = prefix.len() + declared_len as usize;
        if total > MAX_DATAGRAM_SIZE {
            return Err(DefragError::OversizedDatagram { len: total });
        }
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(prefix);
        let count = self.fragments.compact(&mut out, declared_len)?;
        packet::write_payload_len(&mut out, (count + prefix.len() - IPV6_HLEN) as u16);
        Ok(out)
    }
}
