//! Main-image address mapping
//!
//! Results are keyed by offsets relative to the analyzed module's load
//! address, so they line up across runs regardless of ASLR.

use serde::{Deserialize, Serialize};

/// Address range of the analyzed (main) module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainImage {
    pub name: String,
    pub low: u64,
    /// Inclusive upper bound
    pub high: u64,
}

impl MainImage {
    pub fn new(name: impl Into<String>, low: u64, high: u64) -> Self {
        Self {
            name: name.into(),
            low,
            high,
        }
    }

    pub fn contains(&self, addr: u64) -> bool {
        (self.low..=self.high).contains(&addr)
    }

    /// Module-relative offset of `addr`, if it lies inside the image
    pub fn offset_of(&self, addr: u64) -> Option<u64> {
        self.contains(addr).then(|| addr - self.low)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_of() {
        let image = MainImage::new("/bin/target", 0x5555_0000, 0x5555_ffff);
        assert_eq!(image.offset_of(0x5555_0000), Some(0));
        assert_eq!(image.offset_of(0x5555_1234), Some(0x1234));
        assert_eq!(image.offset_of(0x5555_ffff), Some(0xffff));
        assert_eq!(image.offset_of(0x5556_0000), None);
        assert_eq!(image.offset_of(0x1000), None);
    }
}
