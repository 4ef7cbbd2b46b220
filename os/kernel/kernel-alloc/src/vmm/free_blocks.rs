//! # Free-Block List
//!
//! Address-ordered singly linked list of unreserved virtual ranges, stored in
//! an index arena. Vacated slots are recycled through a side list, so a long
//! map/unmap history does not grow the arena.
//!
//! Insertion merges with the immediate predecessor and successor when they
//! touch, except across the higher-half boundary: user and kernel ranges stay
//! separate blocks even when they abut.

use alloc::vec::Vec;
use kernel_info::memory::{HIGHER_HALF_BASE, PAGE_SIZE};
use kernel_memory_addresses::VirtualAddress;

/// One free run of pages.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FreeBlock {
    pub start: VirtualAddress,
    pub pages: u32,
}

impl FreeBlock {
    #[inline]
    #[must_use]
    pub const fn new(start: VirtualAddress, pages: u32) -> Self {
        Self { start, pages }
    }

    /// First address past the block.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.start.as_u32() as u64 + self.pages as u64 * PAGE_SIZE as u64
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, va: VirtualAddress) -> bool {
        va.as_u32() >= self.start.as_u32() && (va.as_u32() as u64) < self.end()
    }
}

#[derive(Debug, Clone)]
struct Node {
    block: FreeBlock,
    next: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct FreeBlockList {
    nodes: Vec<Node>,
    vacant: Vec<usize>,
    head: Option<usize>,
    len: usize,
}

/// Blocks may merge at `boundary` unless it is the higher-half split.
#[inline]
const fn may_merge_at(boundary: u64) -> bool {
    boundary != HIGHER_HALF_BASE as u64
}

#[allow(clippy::cast_possible_truncation)]
const fn pages_between(start: u64, end: u64) -> u32 {
    ((end - start) / PAGE_SIZE as u64) as u32
}

#[allow(clippy::cast_possible_truncation)]
const fn va(addr: u64) -> VirtualAddress {
    VirtualAddress::new(addr as u32)
}

impl FreeBlockList {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            nodes: Vec::new(),
            vacant: Vec::new(),
            head: None,
            len: 0,
        }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Blocks in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = FreeBlock> + '_ {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            let node = &self.nodes[cursor?];
            cursor = node.next;
            Some(node.block)
        })
    }

    /// Total number of free pages.
    #[must_use]
    pub fn total_pages(&self) -> u64 {
        self.iter().map(|b| u64::from(b.pages)).sum()
    }

    /// The block containing `va`, if any.
    #[must_use]
    pub fn find(&self, va: VirtualAddress) -> Option<FreeBlock> {
        self.iter()
            .take_while(|b| b.start <= va)
            .find(|b| b.contains(va))
    }

    /// Return `[start, start + pages)` to the list, merging with neighbours.
    ///
    /// ### Debug assertions
    /// - Asserts the range neither overlaps a free block nor straddles the
    ///   higher-half boundary.
    pub fn insert(&mut self, start: VirtualAddress, pages: u32) {
        if pages == 0 {
            return;
        }
        let block = FreeBlock::new(start, pages);
        let begin = u64::from(start.as_u32());
        let end = block.end();
        debug_assert!(
            end <= u64::from(HIGHER_HALF_BASE) || begin >= u64::from(HIGHER_HALF_BASE),
            "free block {start}+{pages} straddles the higher-half boundary"
        );

        let mut prev = None;
        let mut next = self.head;
        while let Some(i) = next {
            if self.nodes[i].block.start >= start {
                break;
            }
            prev = Some(i);
            next = self.nodes[i].next;
        }

        debug_assert!(
            prev.is_none_or(|p| self.nodes[p].block.end() <= begin),
            "free block {start}+{pages} overlaps its predecessor"
        );
        debug_assert!(
            next.is_none_or(|n| u64::from(self.nodes[n].block.start.as_u32()) >= end),
            "free block {start}+{pages} overlaps its successor"
        );

        let merge_prev = prev.filter(|&p| self.nodes[p].block.end() == begin && may_merge_at(begin));
        let merge_next = next.filter(|&n| {
            u64::from(self.nodes[n].block.start.as_u32()) == end && may_merge_at(end)
        });

        match (merge_prev, merge_next) {
            (Some(p), Some(n)) => {
                let absorbed = self.nodes[n].block.pages;
                self.nodes[p].block.pages += pages + absorbed;
                self.nodes[p].next = self.nodes[n].next;
                self.release(n);
            }
            (Some(p), None) => self.nodes[p].block.pages += pages,
            (None, Some(n)) => {
                let node = &mut self.nodes[n].block;
                node.start = start;
                node.pages += pages;
            }
            (None, None) => {
                let i = self.acquire(Node { block, next });
                match prev {
                    Some(p) => self.nodes[p].next = Some(i),
                    None => self.head = Some(i),
                }
            }
        }
    }

    /// Carve `pages` from the first block lying inside `[lo, hi)`.
    ///
    /// The block is shrunk from its start; an exactly fitting block is
    /// unlinked.
    pub fn take_first_fit(&mut self, pages: u32, lo: u32, hi: u32) -> Option<VirtualAddress> {
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(i) = cursor {
            let block = self.nodes[i].block;
            let inside = block.start.as_u32() >= lo && block.end() <= u64::from(hi);
            if inside && block.pages >= pages {
                self.shrink_front(prev, i, pages);
                return Some(block.start);
            }
            prev = Some(i);
            cursor = self.nodes[i].next;
        }
        None
    }

    /// Carve exactly `[start, start + pages)` out of the block containing it.
    ///
    /// Returns `false` (and changes nothing) if no single free block covers
    /// the whole range.
    pub fn take_exact(&mut self, start: VirtualAddress, pages: u32) -> bool {
        let begin = u64::from(start.as_u32());
        let end = begin + u64::from(pages) * u64::from(PAGE_SIZE);

        let mut prev = None;
        let mut cursor = self.head;
        while let Some(i) = cursor {
            let block = self.nodes[i].block;
            if block.start > start {
                return false;
            }
            if block.contains(start) {
                if end > block.end() {
                    return false;
                }
                if block.start == start {
                    self.shrink_front(prev, i, pages);
                } else {
                    let tail = pages_between(end, block.end());
                    self.nodes[i].block.pages = pages_between(block.start.as_u32().into(), begin);
                    if tail > 0 {
                        let next = self.nodes[i].next;
                        let j = self.acquire(Node {
                            block: FreeBlock::new(va(end), tail),
                            next,
                        });
                        self.nodes[i].next = Some(j);
                    }
                }
                return true;
            }
            prev = Some(i);
            cursor = self.nodes[i].next;
        }
        false
    }

    /// Take `pages` off the front of node `i`, unlinking it when emptied.
    fn shrink_front(&mut self, prev: Option<usize>, i: usize, pages: u32) {
        let block = &mut self.nodes[i].block;
        if block.pages == pages {
            let next = self.nodes[i].next;
            match prev {
                Some(p) => self.nodes[p].next = next,
                None => self.head = next,
            }
            self.release(i);
        } else {
            block.start = va(u64::from(block.start.as_u32()) + u64::from(pages) * u64::from(PAGE_SIZE));
            block.pages -= pages;
        }
    }

    fn acquire(&mut self, node: Node) -> usize {
        self.len += 1;
        if let Some(i) = self.vacant.pop() {
            self.nodes[i] = node;
            i
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }

    fn release(&mut self, i: usize) {
        self.len -= 1;
        self.nodes[i].next = None;
        self.vacant.push(i);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: u32 = PAGE_SIZE;

    fn blocks(list: &FreeBlockList) -> Vec<(u32, u32)> {
        list.iter().map(|b| (b.start.as_u32(), b.pages)).collect()
    }

    #[test]
    fn inserts_stay_ordered() {
        let mut l = FreeBlockList::new();
        l.insert(VirtualAddress::new(0x10 * P), 1);
        l.insert(VirtualAddress::new(0x2 * P), 1);
        l.insert(VirtualAddress::new(0x8 * P), 1);
        assert_eq!(blocks(&l), [(0x2 * P, 1), (0x8 * P, 1), (0x10 * P, 1)]);
    }

    #[test]
    fn merges_with_both_neighbours() {
        let mut l = FreeBlockList::new();
        l.insert(VirtualAddress::new(0x1000), 2);
        l.insert(VirtualAddress::new(0x5000), 2);
        l.insert(VirtualAddress::new(0x3000), 2);
        assert_eq!(blocks(&l), [(0x1000, 6)]);
        assert_eq!(l.len(), 1);
    }

    #[test]
    fn merges_with_one_side_only() {
        let mut l = FreeBlockList::new();
        l.insert(VirtualAddress::new(0x1000), 1);
        l.insert(VirtualAddress::new(0x2000), 1);
        l.insert(VirtualAddress::new(0x8000), 1);
        l.insert(VirtualAddress::new(0x7000), 1);
        assert_eq!(blocks(&l), [(0x1000, 2), (0x7000, 2)]);
    }

    #[test]
    fn never_merges_across_the_higher_half() {
        let mut l = FreeBlockList::new();
        l.insert(VirtualAddress::new(HIGHER_HALF_BASE - 2 * P), 2);
        l.insert(VirtualAddress::new(HIGHER_HALF_BASE), 2);
        assert_eq!(l.len(), 2);
    }

    #[test]
    fn first_fit_respects_bounds_and_shrinks_in_place() {
        let mut l = FreeBlockList::new();
        l.insert(VirtualAddress::new(0x1000), 4);
        l.insert(VirtualAddress::new(HIGHER_HALF_BASE), 16);
        let got = l.take_first_fit(8, HIGHER_HALF_BASE, 0xFFC0_0000).unwrap();
        assert_eq!(got.as_u32(), HIGHER_HALF_BASE);
        assert_eq!(blocks(&l), [(0x1000, 4), (HIGHER_HALF_BASE + 8 * P, 8)]);
        assert!(l.take_first_fit(5, 0x1000, HIGHER_HALF_BASE).is_none());
    }

    #[test]
    fn exact_fit_unlinks_the_block() {
        let mut l = FreeBlockList::new();
        l.insert(VirtualAddress::new(0x1000), 4);
        assert_eq!(l.take_first_fit(4, 0, HIGHER_HALF_BASE), Some(VirtualAddress::new(0x1000)));
        assert!(l.is_empty());
    }

    #[test]
    fn take_exact_splits_into_prefix_and_suffix() {
        let mut l = FreeBlockList::new();
        l.insert(VirtualAddress::new(0x1000), 10);
        assert!(l.take_exact(VirtualAddress::new(0x4000), 3));
        assert_eq!(blocks(&l), [(0x1000, 3), (0x7000, 4)]);
    }

    #[test]
    fn take_exact_at_block_start_needs_one_update() {
        let mut l = FreeBlockList::new();
        l.insert(VirtualAddress::new(0x1000), 10);
        assert!(l.take_exact(VirtualAddress::new(0x1000), 3));
        assert_eq!(blocks(&l), [(0x4000, 7)]);
        assert_eq!(l.len(), 1);
    }

    #[test]
    fn take_exact_refuses_partially_free_ranges() {
        let mut l = FreeBlockList::new();
        l.insert(VirtualAddress::new(0x1000), 2);
        l.insert(VirtualAddress::new(0x4000), 2);
        assert!(!l.take_exact(VirtualAddress::new(0x2000), 2));
        assert!(!l.take_exact(VirtualAddress::new(0x3000), 1));
        assert_eq!(blocks(&l), [(0x1000, 2), (0x4000, 2)]);
    }

    #[test]
    fn vacated_slots_are_reused() {
        let mut l = FreeBlockList::new();
        for _ in 0..100 {
            l.insert(VirtualAddress::new(0x1000), 1);
            l.insert(VirtualAddress::new(0x3000), 1);
            assert!(l.take_exact(VirtualAddress::new(0x1000), 1));
            assert!(l.take_exact(VirtualAddress::new(0x3000), 1));
        }
        assert!(l.nodes.len() <= 2);
    }

    #[test]
    fn find_locates_containing_block() {
        let mut l = FreeBlockList::new();
        l.insert(VirtualAddress::new(0x1000), 2);
        assert!(l.find(VirtualAddress::new(0x2FFF)).is_some());
        assert!(l.find(VirtualAddress::new(0x3000)).is_none());
    }
}
