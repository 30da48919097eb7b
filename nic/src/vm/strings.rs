//! String slot pools.
//!
//! Two disjoint pools back every byte string the interpreter touches:
//!
//! - the *named* pool holds string constants, global and local string
//!   scalars, and string array elements. Slots are bump-allocated: a
//!   `used` counter advances on acquisition and retreats on release, so
//!   slot lifetime follows function-frame nesting. Storage is never
//!   freed, only reused.
//! - the *temp* pool holds transient values from concatenation, intrinsic
//!   returns and format conversions. Each slot carries an `active` flag;
//!   acquisition sets it, any consumer clears it, and acquisition reuses
//!   the first inactive slot before growing the pool.
//!
//! Slot storage keeps `capacity >= length + 1` and grows with a fixed
//! granularity so repeated concatenation settles quickly.

/// Slack added whenever slot storage must grow.
pub const ALLOC_GRANULARITY: usize = 64;

/// Growth step for the slot tables themselves.
const POOL_GRANULARITY: usize = 20;

#[derive(Debug, Default)]
struct SlotStorage {
    bytes: Vec<u8>,
}

impl SlotStorage {
    /// Make room for `needed` content bytes plus the slack byte.
    fn ensure_capacity(&mut self, needed: usize) {
        if self.bytes.capacity() < needed + 1 {
            let grow = needed + ALLOC_GRANULARITY - self.bytes.len();
            self.bytes.reserve_exact(grow);
        }
    }

    fn set(&mut self, content: &[u8]) {
        self.bytes.clear();
        self.ensure_capacity(content.len());
        self.bytes.extend_from_slice(content);
    }

    fn append(&mut self, content: &[u8]) {
        self.ensure_capacity(self.bytes.len() + content.len());
        self.bytes.extend_from_slice(content);
    }
}

/// The named pool. Indices handed out by [`NamedPool::new_slot`] stay
/// valid until the matching [`NamedPool::release`].
#[derive(Debug, Default)]
pub struct NamedPool {
    slots: Vec<SlotStorage>,
    used: usize,
    high_water: usize,
}

impl NamedPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the next slot, initialized to `content`. Reuses retired
    /// storage when available.
    pub fn new_slot(&mut self, content: &[u8]) -> usize {
        if self.used == self.slots.len() {
            if self.slots.len() == self.slots.capacity() {
                self.slots.reserve(POOL_GRANULARITY);
            }
            self.slots.push(SlotStorage::default());
        }
        let index = self.used;
        self.slots[index].set(content);
        self.used += 1;
        self.high_water = self.high_water.max(self.used);
        index
    }

    /// Retire the `n` most recently acquired slots. Storage is kept for
    /// reuse; only the `used` counter moves.
    pub fn release(&mut self, n: usize) {
        debug_assert!(n <= self.used, "released more named slots than acquired");
        self.used = self.used.saturating_sub(n);
    }

    pub fn bytes(&self, slot: usize) -> &[u8] {
        &self.slots[slot].bytes
    }

    pub fn set(&mut self, slot: usize, content: &[u8]) {
        self.slots[slot].set(content);
    }

    pub fn append(&mut self, slot: usize, content: &[u8]) {
        self.slots[slot].append(content);
    }

    /// Move a temp slot's storage into a named slot without copying the
    /// bytes, leaving the temp slot empty. The caller deactivates the
    /// temp slot.
    pub fn swap_from_temp(&mut self, slot: usize, temps: &mut TempPool, temp_slot: usize) {
        std::mem::swap(
            &mut self.slots[slot].bytes,
            &mut temps.slots[temp_slot].storage.bytes,
        );
        temps.slots[temp_slot].storage.bytes.clear();
    }

    pub fn in_bounds(&self, slot: usize) -> bool {
        slot < self.used
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn allocated(&self) -> usize {
        self.slots.len()
    }

    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Storage capacity of one slot, for growth diagnostics.
    pub fn slot_capacity(&self, slot: usize) -> usize {
        self.slots[slot].bytes.capacity()
    }
}

#[derive(Debug, Default)]
struct TempSlot {
    storage: SlotStorage,
    active: bool,
}

/// The temp pool. Slots are recycled by the `active` flag rather than by
/// position, so the pool size converges on the peak number of live
/// temporaries in any one statement.
#[derive(Debug, Default)]
pub struct TempPool {
    slots: Vec<TempSlot>,
}

impl TempPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a temp slot initialized to `content`: first inactive slot
    /// if any, otherwise a fresh one. The slot comes back active.
    pub fn new_slot(&mut self, content: &[u8]) -> usize {
        let index = match self.slots.iter().position(|slot| !slot.active) {
            Some(index) => index,
            None => {
                self.slots.push(TempSlot::default());
                self.slots.len() - 1
            }
        };
        let slot = &mut self.slots[index];
        slot.storage.set(content);
        slot.active = true;
        index
    }

    /// Clear a slot's active flag. Returns false when the flag was not
    /// set, which indicates an accounting bug in the caller.
    pub fn deactivate(&mut self, slot: usize) -> bool {
        let was_active = self.slots[slot].active;
        self.slots[slot].active = false;
        was_active
    }

    pub fn is_active(&self, slot: usize) -> bool {
        self.slots[slot].active
    }

    pub fn bytes(&self, slot: usize) -> &[u8] {
        &self.slots[slot].storage.bytes
    }

    pub fn append(&mut self, slot: usize, content: &[u8]) {
        self.slots[slot].storage.append(content);
    }

    /// True when no temp slot is live. Holds between statements.
    pub fn all_inactive(&self) -> bool {
        self.slots.iter().all(|slot| !slot.active)
    }

    pub fn allocated(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_capacity(&self, slot: usize) -> usize {
        self.slots[slot].storage.bytes.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_slot_contents() {
        let mut pool = NamedPool::new();
        let a = pool.new_slot(b"alpha");
        let b = pool.new_slot(b"");
        assert_eq!(pool.bytes(a), b"alpha");
        assert_eq!(pool.bytes(b), b"");
        assert_eq!(pool.used(), 2);
    }

    #[test]
    fn test_named_release_reuses_storage() {
        let mut pool = NamedPool::new();
        let a = pool.new_slot(b"first");
        pool.release(1);
        assert_eq!(pool.used(), 0);
        assert_eq!(pool.allocated(), 1);
        let b = pool.new_slot(b"second");
        assert_eq!(a, b);
        assert_eq!(pool.bytes(b), b"second");
        assert_eq!(pool.allocated(), 1);
        assert_eq!(pool.high_water(), 1);
    }

    #[test]
    fn test_capacity_invariant_after_growth() {
        let mut pool = NamedPool::new();
        let slot = pool.new_slot(b"");
        for _ in 0..50 {
            pool.append(slot, b"0123456789");
        }
        assert_eq!(pool.bytes(slot).len(), 500);
        assert!(pool.slot_capacity(slot) >= 501);
    }

    #[test]
    fn test_temp_first_fit_reuse() {
        let mut pool = TempPool::new();
        let a = pool.new_slot(b"a");
        let b = pool.new_slot(b"b");
        assert_ne!(a, b);
        assert!(pool.deactivate(a));
        let c = pool.new_slot(b"c");
        assert_eq!(c, a);
        assert_eq!(pool.bytes(c), b"c");
        assert_eq!(pool.allocated(), 2);
        assert!(pool.is_active(b));
    }

    #[test]
    fn test_temp_double_deactivate_reported() {
        let mut pool = TempPool::new();
        let a = pool.new_slot(b"x");
        assert!(pool.deactivate(a));
        assert!(!pool.deactivate(a));
        assert!(pool.all_inactive());
    }

    #[test]
    fn test_active_slot_not_reused() {
        let mut pool = TempPool::new();
        let a = pool.new_slot(b"keep");
        let b = pool.new_slot(b"other");
        pool.deactivate(b);
        let c = pool.new_slot(b"new");
        assert_ne!(c, a);
        assert_eq!(pool.bytes(a), b"keep");
    }

    #[test]
    fn test_swap_from_temp_moves_storage() {
        let mut named = NamedPool::new();
        let mut temps = TempPool::new();
        let dst = named.new_slot(b"old");
        let src = temps.new_slot(b"moved");
        named.swap_from_temp(dst, &mut temps, src);
        temps.deactivate(src);
        assert_eq!(named.bytes(dst), b"moved");
        assert_eq!(temps.bytes(src), b"");
    }
}
