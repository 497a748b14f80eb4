use std::collections::VecDeque;

use crate::canvas::LayerStack;
use crate::log_info;

pub const DEFAULT_MAX_HISTORY: usize = 20;

// ============================================================================
// HISTORY ENTRY – one full deep copy of the layer stack
// ============================================================================

pub struct HistoryEntry {
    pub description: String,
    pub layers: LayerStack,
    /// Canvas bounds at the time of the snapshot, when the caller tracks them.
    pub canvas: Option<(u32, u32)>,
}

impl HistoryEntry {
    fn memory_size(&self) -> usize {
        self.layers.memory_bytes()
    }
}

// ============================================================================
// HISTORY MANAGER – bounded linear undo/redo over full-stack snapshots
// ============================================================================

/// Linear snapshot history. `index` is `None` while empty and otherwise
/// always points at a live entry. Pushing after an undo discards the redo
/// tail; pushing past capacity evicts the oldest entry.
pub struct HistoryManager {
    entries: VecDeque<HistoryEntry>,
    index: Option<usize>,
    max_history_size: usize,
    /// Running pixel-byte total across all entries.
    total_memory: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl HistoryManager {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            index: None,
            max_history_size: max_history_size.max(1),
            total_memory: 0,
        }
    }

    /// Deep-copy `stack` as the new current entry.
    pub fn push(&mut self, stack: &LayerStack, description: impl Into<String>) {
        self.push_entry(stack, None, description.into());
    }

    /// Like `push`, also recording the canvas bounds so undoing a crop or
    /// resize restores them.
    pub fn push_sized(&mut self, stack: &LayerStack, canvas: (u32, u32), description: impl Into<String>) {
        self.push_entry(stack, Some(canvas), description.into());
    }

    fn push_entry(&mut self, stack: &LayerStack, canvas: Option<(u32, u32)>, description: String) {
        // Drop everything after the current index (no redo branches)
        let keep = self.index.map_or(0, |i| i + 1);
        while self.entries.len() > keep {
            if let Some(removed) = self.entries.pop_back() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
            }
        }

        let entry = HistoryEntry {
            description,
            layers: stack.clone(),
            canvas,
        };
        self.total_memory += entry.memory_size();
        self.entries.push_back(entry);

        self.prune();
        self.index = Some(self.entries.len() - 1);
    }

    /// Step back one entry. `None` at the oldest entry or when empty.
    pub fn undo(&mut self) -> Option<LayerStack> {
        let i = self.index?;
        if i == 0 {
            return None;
        }
        self.index = Some(i - 1);
        self.entries.get(i - 1).map(|e| e.layers.clone())
    }

    /// Step forward one entry. `None` at the newest entry or when empty.
    pub fn redo(&mut self) -> Option<LayerStack> {
        let i = self.index?;
        if i + 1 >= self.entries.len() {
            return None;
        }
        self.index = Some(i + 1);
        self.entries.get(i + 1).map(|e| e.layers.clone())
    }

    /// Clear and seed with a single entry.
    pub fn reset(&mut self, stack: &LayerStack, canvas: (u32, u32), description: impl Into<String>) {
        self.clear();
        self.push_sized(stack, canvas, description);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index = None;
        self.total_memory = 0;
    }

    fn prune(&mut self) {
        while self.entries.len() > self.max_history_size {
            if let Some(removed) = self.entries.pop_front() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                log_info!("History: evicted oldest entry '{}'", removed.description);
            }
        }
    }

    pub fn can_undo(&self) -> bool {
        matches!(self.index, Some(i) if i > 0)
    }

    pub fn can_redo(&self) -> bool {
        matches!(self.index, Some(i) if i + 1 < self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn capacity(&self) -> usize {
        self.max_history_size
    }

    /// Change capacity. Shrinking drops redo entries first, then the oldest
    /// undo entries; the current entry always survives.
    pub fn set_capacity(&mut self, max_history_size: usize) {
        self.max_history_size = max_history_size.max(1);
        let Some(current) = self.index else {
            return;
        };
        while self.entries.len() > self.max_history_size && self.entries.len() > current + 1 {
            if let Some(removed) = self.entries.pop_back() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
            }
        }
        let before = self.entries.len();
        self.prune();
        self.index = Some(current - (before - self.entries.len()));
    }

    /// Canvas bounds recorded with the current entry.
    pub fn current_canvas(&self) -> Option<(u32, u32)> {
        self.index.and_then(|i| self.entries.get(i)).and_then(|e| e.canvas)
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.index.and_then(|i| self.entries.get(i)).map(|e| e.description.as_str())
    }

    /// All descriptions, oldest first.
    pub fn descriptions(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.description.clone()).collect()
    }

    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }
}
