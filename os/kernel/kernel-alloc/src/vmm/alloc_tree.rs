//! # Allocation Tree
//!
//! Unbalanced binary search tree of [`Allocation`] records keyed by
//! `virtual_start`, stored in an index arena with parent links.
//!
//! Records never overlap, so a lookup for any address inside a record can
//! descend by comparing against `[start, end)` directly.
//!
//! Removal splices the node out by lifting its left subtree into its place and
//! hanging the right subtree off the rightmost node of that left subtree.

use crate::vmm::Allocation;
use alloc::vec::Vec;
use core::cmp::Ordering;
use kernel_memory_addresses::VirtualAddress;

#[derive(Debug, Clone)]
struct TreeNode {
    record: Allocation,
    left: Option<usize>,
    right: Option<usize>,
    parent: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct AllocationTree {
    nodes: Vec<TreeNode>,
    vacant: Vec<usize>,
    root: Option<usize>,
    len: usize,
}

impl AllocationTree {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            nodes: Vec::new(),
            vacant: Vec::new(),
            root: None,
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

    /// Link `record` as a new leaf.
    ///
    /// Returns `false` and leaves the tree unchanged if a record with the
    /// same start already exists.
    #[must_use]
    pub fn insert(&mut self, record: Allocation) -> bool {
        let mut parent = None;
        let mut cursor = self.root;
        let mut went_left = false;
        while let Some(i) = cursor {
            parent = Some(i);
            match record.virtual_start.cmp(&self.nodes[i].record.virtual_start) {
                Ordering::Less => {
                    went_left = true;
                    cursor = self.nodes[i].left;
                }
                Ordering::Greater => {
                    went_left = false;
                    cursor = self.nodes[i].right;
                }
                Ordering::Equal => return false,
            }
        }

        let node = self.acquire(TreeNode {
            record,
            left: None,
            right: None,
            parent,
        });
        match parent {
            None => self.root = Some(node),
            Some(p) if went_left => self.nodes[p].left = Some(node),
            Some(p) => self.nodes[p].right = Some(node),
        }
        true
    }

    /// The record whose range contains `va`.
    #[must_use]
    pub fn find(&self, va: VirtualAddress) -> Option<&Allocation> {
        self.find_node(va).map(|i| &self.nodes[i].record)
    }

    /// Change the page count of the record starting at `start`.
    ///
    /// Returns `false` if there is no such record.
    pub fn set_pages(&mut self, start: VirtualAddress, pages: u32) -> bool {
        match self.find_node(start) {
            Some(i) if self.nodes[i].record.virtual_start == start => {
                self.nodes[i].record.pages = pages;
                true
            }
            _ => false,
        }
    }

    /// Unlink and return the record starting exactly at `start`.
    pub fn remove(&mut self, start: VirtualAddress) -> Option<Allocation> {
        let i = self.find_node(start)?;
        if self.nodes[i].record.virtual_start != start {
            return None;
        }

        let TreeNode {
            record,
            left,
            right,
            parent,
        } = self.nodes[i].clone();

        let replacement = match (left, right) {
            (None, r) => r,
            (Some(l), None) => Some(l),
            (Some(l), Some(r)) => {
                let mut tail = l;
                while let Some(next) = self.nodes[tail].right {
                    tail = next;
                }
                self.nodes[tail].right = Some(r);
                self.nodes[r].parent = Some(tail);
                Some(l)
            }
        };

        if let Some(child) = replacement {
            self.nodes[child].parent = parent;
        }
        match parent {
            None => self.root = replacement,
            Some(p) if self.nodes[p].left == Some(i) => self.nodes[p].left = replacement,
            Some(p) => self.nodes[p].right = replacement,
        }

        self.release(i);
        Some(record)
    }

    /// Records in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = &Allocation> + '_ {
        let mut cursor = self.root.map(|r| self.leftmost(r));
        core::iter::from_fn(move || {
            let i = cursor?;
            cursor = self.successor(i);
            Some(&self.nodes[i].record)
        })
    }

    /// Verify parent links agree with child links.
    pub(crate) fn links_consistent(&self) -> bool {
        let mut stack = Vec::new();
        if let Some(r) = self.root {
            if self.nodes[r].parent.is_some() {
                return false;
            }
            stack.push(r);
        }
        let mut seen = 0;
        while let Some(i) = stack.pop() {
            seen += 1;
            for child in [self.nodes[i].left, self.nodes[i].right].into_iter().flatten() {
                if self.nodes[child].parent != Some(i) {
                    return false;
                }
                stack.push(child);
            }
        }
        seen == self.len
    }

    fn find_node(&self, va: VirtualAddress) -> Option<usize> {
        let mut cursor = self.root;
        while let Some(i) = cursor {
            let record = &self.nodes[i].record;
            if va < record.virtual_start {
                cursor = self.nodes[i].left;
            } else if u64::from(va.as_u32()) < record.end() {
                return Some(i);
            } else {
                cursor = self.nodes[i].right;
            }
        }
        None
    }

    fn leftmost(&self, mut i: usize) -> usize {
        while let Some(l) = self.nodes[i].left {
            i = l;
        }
        i
    }

    fn successor(&self, i: usize) -> Option<usize> {
        if let Some(r) = self.nodes[i].right {
            return Some(self.leftmost(r));
        }
        let mut child = i;
        let mut parent = self.nodes[i].parent;
        while let Some(p) = parent {
            if self.nodes[p].left == Some(child) {
                return Some(p);
            }
            child = p;
            parent = self.nodes[p].parent;
        }
        None
    }

    fn acquire(&mut self, node: TreeNode) -> usize {
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
        let node = &mut self.nodes[i];
        node.left = None;
        node.right = None;
        node.parent = None;
        self.vacant.push(i);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_vmem::PageEntryBits;

    /// Longest root-to-leaf path; `0` for an empty tree.
    fn depth(t: &AllocationTree) -> usize {
        let mut deepest = 0;
        let mut stack: Vec<(usize, usize)> = t.root.map(|r| (r, 1)).into_iter().collect();
        while let Some((i, d)) = stack.pop() {
            deepest = deepest.max(d);
            for child in [t.nodes[i].left, t.nodes[i].right].into_iter().flatten() {
                stack.push((child, d + 1));
            }
        }
        deepest
    }

    fn rec(start: u32, pages: u32) -> Allocation {
        Allocation {
            virtual_start: VirtualAddress::new(start),
            physical_start: None,
            pages,
            flags: PageEntryBits::new_kernel_rw(),
        }
    }

    fn starts(t: &AllocationTree) -> Vec<u32> {
        t.iter().map(|r| r.virtual_start.as_u32()).collect()
    }

    fn sample() -> AllocationTree {
        let mut t = AllocationTree::new();
        for s in [0x50, 0x30, 0x70, 0x20, 0x40, 0x60, 0x80, 0x35, 0x45] {
            assert!(t.insert(rec(s * 0x1000, 1)));
        }
        t
    }

    #[test]
    fn iterates_in_order() {
        let t = sample();
        assert_eq!(
            starts(&t),
            [0x20, 0x30, 0x35, 0x40, 0x45, 0x50, 0x60, 0x70, 0x80].map(|s| s * 0x1000)
        );
        assert!(t.links_consistent());
    }

    #[test]
    fn find_hits_any_address_inside_a_record() {
        let mut t = AllocationTree::new();
        assert!(t.insert(rec(0x10_000, 4)));
        assert!(t.insert(rec(0x20_000, 2)));
        assert_eq!(
            t.find(VirtualAddress::new(0x13_FFF)).map(|r| r.pages),
            Some(4)
        );
        assert!(t.find(VirtualAddress::new(0x14_000)).is_none());
        assert_eq!(
            t.find(VirtualAddress::new(0x21_000)).map(|r| r.pages),
            Some(2)
        );
        assert!(t.find(VirtualAddress::new(0x0F_FFF)).is_none());
    }

    #[test]
    fn remove_leaf() {
        let mut t = sample();
        assert!(t.remove(VirtualAddress::new(0x20_000)).is_some());
        assert_eq!(t.len(), 8);
        assert!(!starts(&t).contains(&0x20_000));
        assert!(t.links_consistent());
    }

    #[test]
    fn remove_node_with_two_children_splices_predecessor() {
        let mut t = sample();
        assert!(t.remove(VirtualAddress::new(0x30_000)).is_some());
        assert_eq!(
            starts(&t),
            [0x20, 0x35, 0x40, 0x45, 0x50, 0x60, 0x70, 0x80].map(|s| s * 0x1000)
        );
        assert!(t.links_consistent());
    }

    #[test]
    fn remove_root_repeatedly() {
        let mut t = sample();
        let mut expected = starts(&t);
        while let Some(root) = t.root {
            let start = t.nodes[root].record.virtual_start;
            assert_eq!(t.remove(start).map(|r| r.virtual_start), Some(start));
            expected.retain(|s| *s != start.as_u32());
            assert_eq!(starts(&t), expected);
            assert!(t.links_consistent());
        }
        assert!(t.is_empty());
    }

    #[test]
    fn remove_needs_exact_start() {
        let mut t = AllocationTree::new();
        assert!(t.insert(rec(0x10_000, 4)));
        assert!(t.remove(VirtualAddress::new(0x11_000)).is_none());
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn set_pages_shrinks_in_place() {
        let mut t = AllocationTree::new();
        assert!(t.insert(rec(0x10_000, 4)));
        assert!(t.set_pages(VirtualAddress::new(0x10_000), 2));
        assert!(t.find(VirtualAddress::new(0x12_000)).is_none());
        assert!(!t.set_pages(VirtualAddress::new(0x11_000), 1));
    }

    #[test]
    fn clone_is_independent() {
        let t = sample();
        let mut c = t.clone();
        assert!(c.remove(VirtualAddress::new(0x50_000)).is_some());
        assert_eq!(t.len(), 9);
        assert!(t.find(VirtualAddress::new(0x50_000)).is_some());
        assert!(c.find(VirtualAddress::new(0x50_000)).is_none());
    }

    #[test]
    fn ascending_inserts_degenerate_into_a_list() {
        let mut t = AllocationTree::new();
        for s in 1..=16 {
            assert!(t.insert(rec(s * 0x1000, 1)));
        }
        assert_eq!(depth(&t), 16);
    }

    #[test]
    fn duplicate_start_is_refused() {
        let mut t = sample();
        let mut dup = rec(0x40_000, 8);
        dup.physical_start = Some(kernel_memory_addresses::PhysicalAddress::new(0x9000));
        assert!(!t.insert(dup));
        assert_eq!(t.len(), 9);
        let kept = t.find(VirtualAddress::new(0x40_000)).unwrap();
        assert_eq!((kept.pages, kept.physical_start), (1, None));
        assert!(t.links_consistent());
    }
}
