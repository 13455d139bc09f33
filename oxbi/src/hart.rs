// SPDX-License-Identifier: MPL-2.0

//! Hart identifiers, hart masks, and the per-hart local state table.

use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::{dcache::CacheOpSlot, ipi::SignalSet};

/// The maximum number of harts the runtime is built for.
///
/// All per-hart tables are statically sized to this bound; the platform's
/// enabled-hart mask selects the subset that actually exists.
pub const MAX_HARTS: usize = 8;

const _: () = assert!(MAX_HARTS <= usize::BITS as usize, "# harts > usize bits");

/// The ID of a hart in the system.
///
/// If converting from an integer, the integer must be less than `MAX_HARTS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HartId(u32);

impl HartId {
    /// Returns the hart ID of the bootstrapping hart.
    pub const fn bsp() -> Self {
        HartId(0)
    }

    /// Converts the hart ID to an `usize`.
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Creates a hart ID without a range check.
    ///
    /// # Safety
    ///
    /// The caller must ensure `raw < MAX_HARTS`.
    pub(crate) const unsafe fn new_unchecked(raw: u32) -> Self {
        HartId(raw)
    }
}

impl TryFrom<usize> for HartId {
    type Error = &'static str;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        if value < MAX_HARTS {
            Ok(HartId(value as u32))
        } else {
            Err("The given hart ID is out of range")
        }
    }
}

/// A subset of the harts in the system.
///
/// The mask fits one machine word (checked against `MAX_HARTS` at compile
/// time) and is always intersected with the platform's enabled-hart mask
/// before signals are delivered through it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HartMask(usize);

impl HartMask {
    /// Creates a mask with no harts in it.
    pub const fn empty() -> Self {
        HartMask(0)
    }

    /// Creates a mask from raw bits, discarding bits beyond `MAX_HARTS`.
    pub const fn from_bits(bits: usize) -> Self {
        HartMask(bits & ((1 << MAX_HARTS) - 1))
    }

    /// Creates a mask containing the first `count` harts.
    pub const fn first(count: usize) -> Self {
        if count >= MAX_HARTS {
            HartMask((1 << MAX_HARTS) - 1)
        } else {
            HartMask((1 << count) - 1)
        }
    }

    /// Returns the raw bit representation.
    pub const fn bits(self) -> usize {
        self.0
    }

    /// Adds a hart to the mask.
    pub fn add(&mut self, hart: HartId) {
        self.0 |= 1 << hart.as_usize();
    }

    /// Removes a hart from the mask.
    pub fn remove(&mut self, hart: HartId) {
        self.0 &= !(1 << hart.as_usize());
    }

    /// Returns true if the mask contains the given hart.
    pub const fn contains(self, hart: HartId) -> bool {
        self.0 & (1 << hart.as_usize()) != 0
    }

    /// Returns the number of harts in the mask.
    pub const fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Returns true if the mask is empty.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns the intersection with another mask.
    pub const fn intersection(self, other: HartMask) -> HartMask {
        HartMask(self.0 & other.0)
    }

    /// Iterates over the harts in the mask, in ascending order.
    pub fn iter(self) -> impl Iterator<Item = HartId> {
        (0..MAX_HARTS).filter_map(move |raw| {
            if self.0 & (1 << raw) != 0 {
                // SAFETY: `raw` is bounded by `MAX_HARTS` above.
                Some(unsafe { HartId::new_unchecked(raw as u32) })
            } else {
                None
            }
        })
    }
}

impl From<HartId> for HartMask {
    fn from(hart: HartId) -> Self {
        HartMask(1 << hart.as_usize())
    }
}

/// The cross-hart half of a hart's local state: its pending-signal bitmask.
///
/// Any hart may post into the mailbox with an atomic OR; only the owning hart
/// takes from it. This split is the only write path other harts have into a
/// hart's local state.
pub struct SignalMailbox(AtomicUsize);

impl SignalMailbox {
    const fn new() -> Self {
        SignalMailbox(AtomicUsize::new(0))
    }

    /// Posts signal kinds into the mailbox.
    pub fn post(&self, kinds: SignalSet) {
        self.0.fetch_or(kinds.bits(), Ordering::Release);
    }

    /// Atomically takes and clears the pending kinds. Owner only.
    pub fn take(&self) -> SignalSet {
        SignalSet::from_bits_truncate(self.0.swap(0, Ordering::Acquire))
    }

    /// Reads the pending kinds without clearing them.
    pub fn peek(&self) -> SignalSet {
        SignalSet::from_bits_truncate(self.0.load(Ordering::Acquire))
    }
}

/// One hart's local state.
///
/// Owned exclusively by that hart except for the mailbox (see
/// [`SignalMailbox`]) and the cache-op payload slot, which the issuing hart
/// writes under the blocking protocol's serialization guarantee.
pub struct HartLocal {
    mailbox: SignalMailbox,
    timecmp: AtomicU64,
    last_claim: AtomicU32,
    dcache: CacheOpSlot,
}

impl HartLocal {
    const fn new() -> Self {
        Self {
            mailbox: SignalMailbox::new(),
            timecmp: AtomicU64::new(0),
            last_claim: AtomicU32::new(0),
            dcache: CacheOpSlot::new(),
        }
    }

    /// Returns the pending-signal mailbox.
    pub fn mailbox(&self) -> &SignalMailbox {
        &self.mailbox
    }

    /// Returns the cache-op payload slot assigned to this hart.
    pub fn dcache_slot(&self) -> &CacheOpSlot {
        &self.dcache
    }

    /// Returns the last armed timer-compare value.
    pub fn timecmp(&self) -> u64 {
        self.timecmp.load(Ordering::Relaxed)
    }

    pub(crate) fn set_timecmp(&self, when: u64) {
        self.timecmp.store(when, Ordering::Relaxed);
    }

    /// Returns the interrupt-controller claim scratch: the last source id
    /// this hart claimed.
    pub fn last_claim(&self) -> u32 {
        self.last_claim.load(Ordering::Relaxed)
    }

    pub(crate) fn note_claim(&self, source: u32) {
        self.last_claim.store(source, Ordering::Relaxed);
    }
}

/// The fixed-capacity table of per-hart state, owned by the coordinator.
pub(crate) struct HartTable {
    slots: [HartLocal; MAX_HARTS],
}

impl HartTable {
    pub(crate) const fn new() -> Self {
        const SLOT: HartLocal = HartLocal::new();
        Self {
            slots: [SLOT; MAX_HARTS],
        }
    }

    pub(crate) fn slot(&self, hart: HartId) -> &HartLocal {
        &self.slots[hart.as_usize()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipi::SignalSet;

    #[test]
    fn mask_iter_is_ascending() {
        let mask = HartMask::from_bits(0b1011);
        let harts: Vec<usize> = mask.iter().map(HartId::as_usize).collect();
        assert_eq!(harts, vec![0, 1, 3]);
    }

    #[test]
    fn mask_discards_out_of_range_bits() {
        let mask = HartMask::from_bits(usize::MAX);
        assert_eq!(mask.count(), MAX_HARTS);
    }

    #[test]
    fn mask_intersection_and_membership() {
        let a = HartMask::from_bits(0b0110);
        let b = HartMask::from_bits(0b0011);
        let both = a.intersection(b);
        assert!(both.contains(HartId::try_from(1).unwrap()));
        assert_eq!(both.count(), 1);
        assert!(HartId::try_from(MAX_HARTS).is_err());
    }

    #[test]
    fn mailbox_take_clears_posted_kinds() {
        let mailbox = SignalMailbox::new();
        mailbox.post(SignalSet::FENCE_I);
        mailbox.post(SignalSet::SFENCE_VMA);
        assert_eq!(mailbox.peek(), SignalSet::FENCE_I | SignalSet::SFENCE_VMA);
        assert_eq!(mailbox.take(), SignalSet::FENCE_I | SignalSet::SFENCE_VMA);
        assert!(mailbox.take().is_empty());
    }
}
