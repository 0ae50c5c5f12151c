//! Bit array over caller-provided storage.
//!
//! Storage is anything that exposes a byte slice, so the same type serves a
//! stack array in tests and an allocator-owned [`PageBox`](crate::PageBox)
//! in the kernel.  Bit `i` lives in byte `i / 8`, at position `i % 8`.

pub struct Bitmap<S> {
    storage: S,
}

impl<S: AsRef<[u8]> + AsMut<[u8]>> Bitmap<S> {
    /// Wrap `storage`, clearing every bit.
    pub fn new(mut storage: S) -> Self {
        storage.as_mut().fill(0);
        Self { storage }
    }

    /// Number of addressable bits.
    #[inline]
    pub fn len(&self) -> usize {
        self.storage.as_ref().len() * 8
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.storage.as_ref().is_empty()
    }

    /// Panics if `index` is out of range.
    #[inline]
    pub fn test(&self, index: usize) -> bool {
        assert!(index < self.len(), "bitmap index {} out of range", index);
        self.storage.as_ref()[index / 8] & (1 << (index % 8)) != 0
    }

    /// Panics if `index` is out of range.
    #[inline]
    pub fn set(&mut self, index: usize, value: bool) {
        assert!(index < self.len(), "bitmap index {} out of range", index);
        let byte = &mut self.storage.as_mut()[index / 8];
        if value {
            *byte |= 1 << (index % 8);
        } else {
            *byte &= !(1 << (index % 8));
        }
    }

    /// First clear bit at or after `start`.
    pub fn find_clear_from(&self, start: usize) -> Option<usize> {
        let bytes = self.storage.as_ref();
        let mut index = start;
        while index < self.len() {
            // Skip whole bytes that are full.
            if index % 8 == 0 && bytes[index / 8] == 0xff {
                index += 8;
                continue;
            }
            if bytes[index / 8] & (1 << (index % 8)) == 0 {
                return Some(index);
            }
            index += 1;
        }
        None
    }

    /// Number of set bits.
    pub fn count_set(&self) -> usize {
        self.storage
            .as_ref()
            .iter()
            .map(|b| b.count_ones() as usize)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::Bitmap;

    #[test]
    fn set_test_and_scan() {
        let mut map = Bitmap::new([0xAAu8; 4]);
        assert_eq!(map.len(), 32);
        assert_eq!(map.count_set(), 0);

        map.set(0, true);
        map.set(9, true);
        assert!(map.test(0));
        assert!(map.test(9));
        assert!(!map.test(8));
        assert_eq!(map.find_clear_from(0), Some(1));

        for i in 8..16 {
            map.set(i, true);
        }
        assert_eq!(map.find_clear_from(8), Some(16));

        map.set(9, false);
        assert_eq!(map.find_clear_from(8), Some(9));
        assert_eq!(map.count_set(), 8);
    }

    #[test]
    fn scan_reports_exhaustion() {
        let mut map = Bitmap::new([0u8; 1]);
        for i in 0..8 {
            map.set(i, true);
        }
        assert_eq!(map.find_clear_from(0), None);
        assert_eq!(map.find_clear_from(100), None);
    }
}
