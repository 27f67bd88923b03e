/*!
 * Active-Function List
 *
 * Arena of one entry per function slot, threaded into an index-linked
 * doubly-linked list. Rotation to the tail, unlink and membership checks are O(1).
 * Entries outside the list keep their accounting state (the fairness PF entry lives
 * there permanently).
 */

use crate::core::limits::MAX_FUNCTION_SLOTS;
use crate::core::types::{is_valid_fn, FunctionId};
use crate::monitoring::histogram::{Histogram, HistogramSnapshot};
use serde::{Deserialize, Serialize};

const SLOTS: usize = MAX_FUNCTION_SLOTS as usize;

/// How a list member takes part in scheduling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListEntry {
    /// A function that owns its slice
    Real(FunctionId),
    /// A fairness slot whose function is not admitted; its turn goes to the PF
    FairnessPlaceholder(FunctionId),
}

impl ListEntry {
    #[inline]
    pub fn function(&self) -> FunctionId {
        match *self {
            ListEntry::Real(f) | ListEntry::FairnessPlaceholder(f) => f,
        }
    }

    #[inline]
    pub fn is_placeholder(&self) -> bool {
        matches!(self, ListEntry::FairnessPlaceholder(_))
    }
}

/// Per-function scheduling and accounting state
pub struct ActiveEntry {
    /// Slot is owned by this world switch
    pub assigned: bool,
    pub placeholder: bool,
    /// Configured slice (µs)
    pub time_slice: u32,
    /// Slice granted on the last pick
    pub last_time_slice: u32,
    /// Outstanding debt; negative after a skip overshoots
    pub beyond: i64,
    /// Residency start, 0 when not recording
    pub start_ts: u64,
    pub total_time: u64,
    pub init_time: u64,
    pub skip_cnt: u32,
    /// Forgive the next overrun once
    pub skip_next_punish: bool,
    run_length: Histogram,
}

impl ActiveEntry {
    fn new(hist_start: u64, hist_interval: u64) -> Self {
        Self {
            assigned: false,
            placeholder: false,
            time_slice: 0,
            last_time_slice: 0,
            beyond: 0,
            start_ts: 0,
            total_time: 0,
            init_time: 0,
            skip_cnt: 0,
            skip_next_punish: false,
            run_length: Histogram::new(hist_start, hist_interval),
        }
    }

    /// Reset accounting for a fresh assignment
    pub fn reset(&mut self, time_slice: u32, placeholder: bool, now: u64) {
        self.assigned = true;
        self.placeholder = placeholder;
        self.time_slice = time_slice;
        self.last_time_slice = 0;
        self.beyond = 0;
        self.start_ts = 0;
        self.total_time = 0;
        self.init_time = now;
        self.skip_cnt = 0;
        self.skip_next_punish = false;
    }

    #[inline]
    pub fn is_recording(&self) -> bool {
        self.start_ts != 0
    }

    pub fn run_length(&self) -> &Histogram {
        &self.run_length
    }

    /// Serializable view of the entry
    pub fn snapshot(&self, function: FunctionId) -> EntrySnapshot {
        EntrySnapshot {
            function,
            placeholder: self.placeholder,
            time_slice: self.time_slice,
            last_time_slice: self.last_time_slice,
            beyond: self.beyond,
            total_time: self.total_time,
            skip_cnt: self.skip_cnt,
            run_length: self.run_length.snapshot(),
        }
    }
}

/// Copy of one entry for monitoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub function: FunctionId,
    pub placeholder: bool,
    pub time_slice: u32,
    pub last_time_slice: u32,
    pub beyond: i64,
    pub total_time: u64,
    pub skip_cnt: u32,
    pub run_length: HistogramSnapshot,
}

#[derive(Debug, Clone, Copy, Default)]
struct Link {
    prev: Option<FunctionId>,
    next: Option<FunctionId>,
    linked: bool,
}

/// Ordered list of the functions competing for one world switch
pub struct ActiveList {
    entries: [ActiveEntry; SLOTS],
    links: [Link; SLOTS],
    head: Option<FunctionId>,
    tail: Option<FunctionId>,
    len: usize,
}

impl ActiveList {
    pub fn new(hist_start: u64, hist_interval: u64) -> Self {
        Self {
            entries: std::array::from_fn(|_| ActiveEntry::new(hist_start, hist_interval)),
            links: [Link::default(); SLOTS],
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn head(&self) -> Option<FunctionId> {
        self.head
    }

    #[inline]
    pub fn tail(&self) -> Option<FunctionId> {
        self.tail
    }

    #[inline]
    pub fn contains(&self, f: FunctionId) -> bool {
        is_valid_fn(f) && self.links[f as usize].linked
    }

    pub fn next(&self, f: FunctionId) -> Option<FunctionId> {
        if !self.contains(f) {
            return None;
        }
        self.links[f as usize].next
    }

    #[inline]
    pub fn is_last(&self, f: FunctionId) -> bool {
        self.tail == Some(f)
    }

    /// Entry for a slot; out-of-range ids resolve to `None`
    pub fn entry(&self, f: FunctionId) -> Option<&ActiveEntry> {
        self.entries.get(f as usize)
    }

    pub fn entry_mut(&mut self, f: FunctionId) -> Option<&mut ActiveEntry> {
        self.entries.get_mut(f as usize)
    }

    /// Kind of a list member
    pub fn kind(&self, f: FunctionId) -> Option<ListEntry> {
        if !self.contains(f) {
            return None;
        }
        Some(if self.entries[f as usize].placeholder {
            ListEntry::FairnessPlaceholder(f)
        } else {
            ListEntry::Real(f)
        })
    }

    /// Members in scheduling order
    pub fn iter(&self) -> ListIter<'_> {
        ListIter {
            list: self,
            cursor: self.head,
        }
    }

    pub fn functions(&self) -> Vec<FunctionId> {
        self.iter().map(|e| e.function()).collect()
    }

    /// No member owns a real slice
    pub fn is_empty_ignoring_placeholders(&self) -> bool {
        self.iter().all(|e| e.is_placeholder())
    }

    /// Append at the tail; a member already linked is moved there instead
    pub fn push_back(&mut self, f: FunctionId) {
        if !is_valid_fn(f) {
            return;
        }
        if self.contains(f) {
            self.unlink(f);
        }
        let i = f as usize;
        self.links[i] = Link {
            prev: self.tail,
            next: None,
            linked: true,
        };
        match self.tail {
            Some(t) => self.links[t as usize].next = Some(f),
            None => self.head = Some(f),
        }
        self.tail = Some(f);
        self.len += 1;
    }

    /// Unlink a member; returns whether it was linked
    pub fn remove(&mut self, f: FunctionId) -> bool {
        if !self.contains(f) {
            return false;
        }
        self.unlink(f);
        true
    }

    /// Rotate a member to the tail
    pub fn move_to_tail(&mut self, f: FunctionId) {
        if self.contains(f) && self.tail != Some(f) {
            self.unlink(f);
            self.push_back(f);
        }
    }

    /// Unlink every member and release every slot
    pub fn clear(&mut self) {
        while let Some(h) = self.head {
            self.unlink(h);
        }
        for e in self.entries.iter_mut() {
            e.assigned = false;
        }
    }

    fn unlink(&mut self, f: FunctionId) {
        let i = f as usize;
        let Link { prev, next, .. } = self.links[i];
        match prev {
            Some(p) => self.links[p as usize].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.links[n as usize].prev = prev,
            None => self.tail = prev,
        }
        self.links[i] = Link::default();
        self.len -= 1;
    }
}

/// Iterator over [`ActiveList`] members, head first
pub struct ListIter<'a> {
    list: &'a ActiveList,
    cursor: Option<FunctionId>,
}

impl<'a> Iterator for ListIter<'a> {
    type Item = ListEntry;

    fn next(&mut self) -> Option<ListEntry> {
        let f = self.cursor?;
        self.cursor = self.list.links[f as usize].next;
        self.list.kind(f)
    }
}
