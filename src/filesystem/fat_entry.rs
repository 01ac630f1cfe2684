//! Values stored in the File Allocation Table.

/// Value written to terminate a chain.
pub const EOC: u32 = 0x0FFF_FFFF;
/// Smallest value interpreted as an end-of-chain marker.
pub const EOC_MIN: u32 = 0x0FFF_FFF8;
/// Marker of a cluster flagged as unusable.
pub const BAD_CLUSTER: u32 = 0x0FFF_FFF7;
/// Only the low 28 bits of an entry are meaningful.
pub const ENTRY_MASK: u32 = 0x0FFF_FFFF;

/// Decoded FAT entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FatEntry {
    /// The cluster isn't allocated.
    Free,
    /// Value 1, never handed out.
    Reserved,
    /// The chain continues with the given cluster.
    Next(u32),
    /// The cluster is flagged as bad.
    Bad,
    /// Last cluster of its chain.
    EndOfChain,
}

impl FatEntry {
    /// Raw value written to the table for this entry.
    pub fn raw(self) -> u32 {
        match self {
            FatEntry::Free => 0,
            FatEntry::Reserved => 1,
            FatEntry::Next(cluster) => cluster,
            FatEntry::Bad => BAD_CLUSTER,
            FatEntry::EndOfChain => EOC,
        }
    }

    /// Whether the cluster is held by a chain.
    pub fn is_allocated(self) -> bool {
        !matches!(self, FatEntry::Free | FatEntry::Bad)
    }
}

impl From<u32> for FatEntry {
    fn from(value: u32) -> Self {
        match value & ENTRY_MASK {
            0 => FatEntry::Free,
            1 => FatEntry::Reserved,
            BAD_CLUSTER => FatEntry::Bad,
            EOC_MIN..=ENTRY_MASK => FatEntry::EndOfChain,
            next => FatEntry::Next(next),
        }
    }
}
