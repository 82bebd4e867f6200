use std::collections::HashMap;

use nova_jdwp::ThreadId;

const SLOT_BITS: u32 = 20;
const SLOT_MASK: u32 = (1 << SLOT_BITS) - 1;
const GENERATION_MASK: u32 = 0x7ff;

/// Opaque frame id handed to the client.
///
/// Encodes a slot index and the slot's generation so a recycled slot never
/// resolves an id issued before it was released. Always a positive `i32`:
/// many DAP clients parse frame ids as 32-bit integers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameHandle(u32);

impl FrameHandle {
    fn new(slot: usize, generation: u32) -> Self {
        Self(((generation & GENERATION_MASK) << SLOT_BITS) | (slot as u32 + 1))
    }

    fn slot(self) -> Option<usize> {
        (self.0 & SLOT_MASK).checked_sub(1).map(|slot| slot as usize)
    }

    fn generation(self) -> u32 {
        self.0 >> SLOT_BITS
    }

    pub fn from_id(id: i64) -> Option<Self> {
        if id <= 0 || id > i64::from(i32::MAX) {
            return None;
        }
        Some(Self(id as u32))
    }

    pub fn as_id(self) -> i64 {
        i64::from(self.0)
    }
}

impl std::fmt::Display for FrameHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a frame handle stands for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameRef {
    pub thread: ThreadId,
    pub index: usize,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    frame: Option<FrameRef>,
}

/// Session-scoped arena of frame handles.
#[derive(Debug)]
pub struct FrameHandlePool {
    slots: Vec<Slot>,
    free: Vec<usize>,
    by_frame: HashMap<FrameRef, FrameHandle>,
    slot_limit: usize,
}

impl Default for FrameHandlePool {
    fn default() -> Self {
        Self::with_slot_limit(SLOT_MASK as usize)
    }
}

impl FrameHandlePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool that never holds more than `limit` live handles at once.
    pub fn with_slot_limit(limit: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_frame: HashMap::new(),
            slot_limit: limit.min(SLOT_MASK as usize),
        }
    }

    /// Handle for `frame`, reusing the live one if the frame already has one.
    ///
    /// `None` once every slot is live; releasing handles makes room again.
    pub fn alloc(&mut self, frame: FrameRef) -> Option<FrameHandle> {
        if let Some(handle) = self.by_frame.get(&frame).copied() {
            return Some(handle);
        }

        let slot = match self.free.pop() {
            Some(slot) => slot,
            None if self.slots.len() < self.slot_limit => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
            None => return None,
        };
        let entry = &mut self.slots[slot];
        entry.frame = Some(frame);
        let handle = FrameHandle::new(slot, entry.generation);
        self.by_frame.insert(frame, handle);
        Some(handle)
    }

    pub fn get(&self, handle: FrameHandle) -> Option<FrameRef> {
        let slot = self.slots.get(handle.slot()?)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.frame
    }

    pub fn release(&mut self, handle: FrameHandle) -> Option<FrameRef> {
        let frame = self.get(handle)?;
        let idx = handle.slot()?;
        let slot = &mut self.slots[idx];
        slot.frame = None;
        slot.generation = (slot.generation + 1) & GENERATION_MASK;
        self.free.push(idx);
        self.by_frame.remove(&frame);
        Some(frame)
    }

    /// Release every handle of `thread`; returns how many were live.
    pub fn release_thread(&mut self, thread: ThreadId) -> usize {
        let handles: Vec<_> = self
            .by_frame
            .iter()
            .filter(|(frame, _)| frame.thread == thread)
            .map(|(_, handle)| *handle)
            .collect();
        for handle in &handles {
            self.release(*handle);
        }
        handles.len()
    }

    pub fn clear(&mut self) {
        let handles: Vec<_> = self.by_frame.values().copied().collect();
        for handle in handles {
            self.release(handle);
        }
    }

    pub fn len(&self) -> usize {
        self.by_frame.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_frame.is_empty()
    }
}
