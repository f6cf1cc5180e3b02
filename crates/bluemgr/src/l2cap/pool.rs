//! Source channel identifier pool
//!
//! LE credit based channels draw their local (source) CID from the dynamic
//! range 0x0040-0x007F. A CID is owned by at most one channel, across all
//! connections, until it is released.

/// First dynamically allocated CID
pub const SCID_FIRST: u16 = 0x0040;
/// Last dynamically allocated CID
pub const SCID_LAST: u16 = 0x007F;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScidPool {
    // Bit n set means SCID_FIRST + n is taken
    used: u64,
}

impl ScidPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lowest free CID
    pub fn alloc(&mut self) -> Option<u16> {
        let free = !self.used;
        if free == 0 {
            return None;
        }
        let bit = free.trailing_zeros();
        self.used |= 1 << bit;
        Some(SCID_FIRST + bit as u16)
    }

    /// Return a CID to the pool; CIDs outside the range are ignored
    pub fn free(&mut self, cid: u16) {
        if let Some(bit) = Self::bit(cid) {
            self.used &= !(1 << bit);
        }
    }

    pub fn is_allocated(&self, cid: u16) -> bool {
        Self::bit(cid).is_some_and(|bit| self.used & (1 << bit) != 0)
    }

    pub fn in_use(&self) -> usize {
        self.used.count_ones() as usize
    }

    pub fn clear(&mut self) {
        self.used = 0;
    }

    fn bit(cid: u16) -> Option<u32> {
        if (SCID_FIRST..=SCID_LAST).contains(&cid) {
            Some((cid - SCID_FIRST) as u32)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_lowest_free() {
        let mut pool = ScidPool::new();
        assert_eq!(pool.alloc(), Some(0x40));
        assert_eq!(pool.alloc(), Some(0x41));
        assert_eq!(pool.alloc(), Some(0x42));

        pool.free(0x41);
        assert!(!pool.is_allocated(0x41));
        assert_eq!(pool.alloc(), Some(0x41));
        assert_eq!(pool.in_use(), 3);
    }

    #[test]
    fn test_exhaustion_and_range() {
        let mut pool = ScidPool::new();
        let cids: Vec<u16> = std::iter::from_fn(|| pool.alloc()).collect();
        assert_eq!(cids.len(), 64);
        assert_eq!(cids.first(), Some(&SCID_FIRST));
        assert_eq!(cids.last(), Some(&SCID_LAST));
        assert_eq!(pool.alloc(), None);

        // Out of range CIDs are not ours to free
        pool.free(0x0004);
        pool.free(0x0080);
        assert_eq!(pool.alloc(), None);

        pool.free(0x0055);
        assert_eq!(pool.alloc(), Some(0x0055));
    }
}
