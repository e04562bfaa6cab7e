// Per-source-address context and the bucketed source table.

use std::mem::size_of;
use std::net::Ipv6Addr;

use slotmap::{new_key_type, SlotMap};

use super::flow::FlowKey;

new_key_type! {
    pub(crate) struct SourceKey;
}

/// Owner of every in-progress flow originating from one source address.
#[derive(Debug)]
pub(crate) struct Source {
    pub(crate) addr: Ipv6Addr,
    /// Bucket index, cached for O(1) unlink.
    pub(crate) row: usize,
    /// Head of this source's flow chain; new flows are prepended.
    pub(crate) flows: Option<FlowKey>,
    /// Bytes of reassembly state currently attributed to this source.
    pub(crate) used_mem: usize,
    pub(crate) prev: Option<SourceKey>,
    pub(crate) next: Option<SourceKey>,
}

/// Fixed-size hash table over source addresses, chained per bucket.
#[derive(Debug)]
pub(crate) struct SourceTable {
    buckets: Vec<Option<SourceKey>>,
}

impl SourceTable {
    pub(crate) fn new(buckets: usize) -> Self {
        Self {
            buckets: vec![None; buckets],
        }
    }

    /// Shift-add-XOR accumulator over the 16 address bytes, reduced modulo
    /// the bucket count.
    pub(crate) fn hash(&self, addr: &Ipv6Addr) -> usize {
        let mut h: u16 = 0;
        for b in addr.octets() {
            h ^= (h << 5).wrapping_add(h >> 2).wrapping_add(u16::from(b));
        }
        h as usize % self.buckets.len()
    }

    pub(crate) fn lookup(
        &self,
        sources: &SlotMap<SourceKey, Source>,
        addr: &Ipv6Addr,
    ) -> Option<SourceKey> {
        let mut cur = self.buckets[self.hash(addr)];
        while let Some(key) = cur {
            let source = &sources[key];
            if source.addr == *addr {
                return Some(key);
            }
            cur = source.next;
        }
        None
    }

    /// Allocate a record for `addr` and insert it at the head of its bucket
    /// chain. The new record starts out owning no flows and accounting only
    /// for itself.
    pub(crate) fn insert(
        &mut self,
        sources: &mut SlotMap<SourceKey, Source>,
        addr: Ipv6Addr,
    ) -> SourceKey {
        let row = self.hash(&addr);
        let head = self.buckets[row];
        let key = sources.insert(Source {
            addr,
            row,
            flows: None,
            used_mem: size_of::<Source>(),
            prev: None,
            next: head,
        });
        if let Some(h) = head {
            sources[h].prev = Some(key);
        }
        self.buckets[row] = Some(key);
        key
    }

    pub(crate) fn unlink(&mut self, sources: &mut SlotMap<SourceKey, Source>, key: SourceKey) {
        let (row, prev, next) = {
            let source = &sources[key];
            (source.row, source.prev, source.next)
        };
        match prev {
            Some(p) => sources[p].next = next,
            None => self.buckets[row] = next,
        }
        if let Some(n) = next {
            sources[n].prev = prev;
        }
    }

    #[cfg(test)]
    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    #[cfg(test)]
    pub(crate) fn chain_len(&self, sources: &SlotMap<SourceKey, Source>, row: usize) -> usize {
        let mut n = 0;
        let mut cur = self.buckets[row];
        while let Some(key) = cur {
            n += 1;
            cur = sources[key].next;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u16) -> Ipv6Addr {
        Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, last)
    }

    #[test]
    fn hash_is_deterministic_and_in_range() {
        let table = SourceTable::new(7);
        for i in 0..64 {
            let a = addr(i);
            let h = table.hash(&a);
            assert!(h < 7);
            assert_eq!(h, table.hash(&a));
        }
    }

    #[test]
    fn single_bucket_chain_ops() {
        // One bucket forces every source onto the same chain.
        let mut table = SourceTable::new(1);
        let mut sources = SlotMap::with_key();

        let a = table.insert(&mut sources, addr(1));
        let b = table.insert(&mut sources, addr(2));
        let c = table.insert(&mut sources, addr(3));
        assert_eq!(table.chain_len(&sources, 0), 3);

        // Head insertion: most recent first.
        assert_eq!(table.lookup(&sources, &addr(1)), Some(a));
        assert_eq!(table.lookup(&sources, &addr(2)), Some(b));
        assert_eq!(table.lookup(&sources, &addr(3)), Some(c));
        assert_eq!(table.lookup(&sources, &addr(4)), None);

        // Unlink the middle record, then the head, then the tail.
        table.unlink(&mut sources, b);
        sources.remove(b);
        assert_eq!(table.chain_len(&sources, 0), 2);
        assert_eq!(table.lookup(&sources, &addr(2)), None);

        table.unlink(&mut sources, c);
        sources.remove(c);
        assert_eq!(table.lookup(&sources, &addr(1)), Some(a));

        table.unlink(&mut sources, a);
        sources.remove(a);
        assert_eq!(table.chain_len(&sources, 0), 0);
    }

    #[test]
    fn new_source_accounts_for_itself() {
        let mut table = SourceTable::new(4);
        let mut sources = SlotMap::with_key();
        let key = table.insert(&mut sources, addr(9));
        assert_eq!(sources[key].used_mem, size_of::<Source>());
        assert!(sources[key].flows.is_none());
        assert_eq!(sources[key].row, table.hash(&addr(9)));
    }
}
