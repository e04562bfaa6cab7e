// IPv6 wire-format helpers for the reassembly engine.
//
// The engine itself consumes pre-split fragments (unfragmentable prefix +
// fragmentable payload); `parse_fragment` performs that split for callers
// holding a raw IPv6 packet. Link-layer framing is out of scope here — the
// capture path hands us the packet starting at the fixed IPv6 header.

use std::net::Ipv6Addr;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Fixed IPv6 header length.
pub const IPV6_HLEN: usize = 40;
pub const IPV6_PAYLOAD_LEN_OFFSET: usize = 4;
pub const IPV6_NEXT_HDR_OFFSET: usize = 6;
const IPV6_SRC_OFFSET: usize = 8;
const IPV6_DST_OFFSET: usize = 24;

// IPv6 extension header protocol numbers
const EXT_HOP_BY_HOP: u8 = 0;
const EXT_ROUTING: u8 = 43;
const EXT_FRAGMENT: u8 = 44;
const EXT_DEST_OPTIONS: u8 = 60;

/// Fragment extension header length (always 8 bytes).
pub const FRAGMENT_HLEN: usize = 8;

/// Largest datagram a 16-bit payload-length field can describe.
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// IPv6 minimum link MTU (RFC 8200 §5). On-wire fragments below this size
/// are likely forged.
pub const MINIMUM_MTU: usize = 1280;

// ---------------------------------------------------------------------------
// Fragment input record
// ---------------------------------------------------------------------------

/// One IPv6 fragment as handed to the reassembly engine.
///
/// `offset` is the byte offset of the first fragmentable byte within the
/// original datagram's fragmentable part (already scaled from the wire's
/// 8-octet units). `unfragmentable` is the fixed header plus any extension
/// headers preceding the Fragment header; `fragmentable` is the payload
/// following it.
#[derive(Debug, Clone, Copy)]
pub struct Ipv6Fragment<'a> {
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    pub id: u32,
    pub offset: u16,
    pub more_fragments: bool,
    /// The header type following the Fragment header; written back into the
    /// stored prefix since the Fragment header is elided on reassembly.
    pub next_header: u8,
    pub unfragmentable: &'a [u8],
    pub fragmentable: &'a [u8],
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Split a raw IPv6 packet at its Fragment extension header.
///
/// Walks the extension chain (Hop-by-Hop, Routing, Destination Options)
/// until the Fragment header. Returns `None` if the packet is not version 6,
/// is truncated at any point, or carries no Fragment header before the
/// upper-layer protocol.
pub fn parse_fragment(data: &[u8]) -> Option<Ipv6Fragment<'_>> {
    if data.len() < IPV6_HLEN {
        return None;
    }
    if data[0] >> 4 != 6 {
        return None;
    }

    let src_bytes: [u8; 16] = data[IPV6_SRC_OFFSET..IPV6_SRC_OFFSET + 16].try_into().ok()?;
    let dst_bytes: [u8; 16] = data[IPV6_DST_OFFSET..IPV6_DST_OFFSET + 16].try_into().ok()?;

    let mut next_hdr = data[IPV6_NEXT_HDR_OFFSET];
    let mut offset = IPV6_HLEN;
    loop {
        match next_hdr {
            EXT_FRAGMENT => {
                if offset + FRAGMENT_HLEN > data.len() {
                    return None;
                }
                let fh = &data[offset..offset + FRAGMENT_HLEN];
                // Byte 0: next header; bytes 2-3: offset (13 bits, 8-octet
                // units) + 2 reserved bits + M flag; bytes 4-7: identification.
                let frag_field = u16::from_be_bytes([fh[2], fh[3]]);
                return Some(Ipv6Fragment {
                    src: Ipv6Addr::from(src_bytes),
                    dst: Ipv6Addr::from(dst_bytes),
                    id: u32::from_be_bytes([fh[4], fh[5], fh[6], fh[7]]),
                    offset: frag_field & 0xFFF8,
                    more_fragments: frag_field & 0x0001 != 0,
                    next_header: fh[0],
                    unfragmentable: &data[..offset],
                    fragmentable: &data[offset + FRAGMENT_HLEN..],
                });
            }
            EXT_HOP_BY_HOP | EXT_ROUTING | EXT_DEST_OPTIONS => {
                // Need at least 2 bytes: next_hdr + hdr_ext_len
                if offset + 2 > data.len() {
                    return None;
                }
                let total_len = (data[offset + 1] as usize + 1) * 8;
                if offset + total_len > data.len() {
                    return None;
                }
                next_hdr = data[offset];
                offset += total_len;
            }
            _ => return None,
        }
    }
}

/// Locate the next-header byte of an unfragmentable prefix that referenced
/// the (elided) Fragment header.
///
/// For a bare 40-byte fixed header that is byte 6; when the prefix carries
/// extension headers it is byte 0 of the last one. Returns `None` when the
/// prefix is shorter than the fixed header or its extension chain does not
/// end exactly at the prefix boundary.
pub fn next_header_patch_offset(unfragmentable: &[u8]) -> Option<usize> {
    if unfragmentable.len() < IPV6_HLEN {
        return None;
    }
    let mut field = IPV6_NEXT_HDR_OFFSET;
    let mut next_hdr = unfragmentable[field];
    let mut offset = IPV6_HLEN;
    while offset < unfragmentable.len() {
        match next_hdr {
            EXT_HOP_BY_HOP | EXT_ROUTING | EXT_DEST_OPTIONS => {
                if offset + 2 > unfragmentable.len() {
                    return None;
                }
                let total_len = (unfragmentable[offset + 1] as usize + 1) * 8;
                field = offset;
                next_hdr = unfragmentable[offset];
                offset += total_len;
            }
            _ => return None,
        }
    }
    if offset == unfragmentable.len() {
        Some(field)
    } else {
        None
    }
}

/// Rewrite the payload-length field (bytes 4-5, network byte order) of a
/// packet starting at the fixed IPv6 header.
pub fn write_payload_len(packet: &mut [u8], payload_len: u16) {
    packet[IPV6_PAYLOAD_LEN_OFFSET..IPV6_PAYLOAD_LEN_OFFSET + 2]
        .copy_from_slice(&payload_len.to_be_bytes());
}
