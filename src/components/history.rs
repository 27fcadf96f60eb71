use std::collections::{HashMap, VecDeque};

use crate::canvas::{CanvasState, Coord, Layer, Pixel};

// ============================================================================
// PIXEL DELTA: exact before/after values for the coordinates an edit touched
// ============================================================================

/// Per-coordinate snapshot of one layer edit. `None` means the coordinate was
/// (or becomes) empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PixelDelta {
    pub layer_index: usize,
    pub description: String,
    pub before: HashMap<Coord, Option<Pixel>>,
    pub after: HashMap<Coord, Option<Pixel>>,
}

impl PixelDelta {
    pub fn new(layer_index: usize, description: impl Into<String>) -> Self {
        Self {
            layer_index,
            description: description.into(),
            before: HashMap::new(),
            after: HashMap::new(),
        }
    }

    /// Note a change at `coord`. The first recorded `before` is kept, so a
    /// coordinate written twice still undoes to its original value.
    pub fn record(&mut self, coord: Coord, before: Option<Pixel>, after: Option<Pixel>) {
        self.before.entry(coord).or_insert(before);
        self.after.insert(coord, after);
    }

    pub fn len(&self) -> usize {
        self.after.len()
    }

    pub fn is_empty(&self) -> bool {
        self.after.is_empty()
    }

    /// True when replaying the delta would not change any pixel.
    pub fn is_noop(&self) -> bool {
        self.after
            .iter()
            .all(|(coord, after)| self.before.get(coord) == Some(after))
    }

    fn apply(&self, canvas: &mut CanvasState, values: &HashMap<Coord, Option<Pixel>>) {
        let Some(layer) = canvas.layers.get_mut(self.layer_index) else {
            log_warn!(
                "History: pixel delta targets missing layer {} ({} layers)",
                self.layer_index,
                canvas.layers.len()
            );
            return;
        };
        for (&(x, y), &value) in values {
            layer.pixels.set(x, y, value);
        }
        for &(x, y) in values.keys() {
            canvas.cache.mark_dirty(x, y);
        }
    }

    fn memory_size(&self) -> usize {
        let entry = std::mem::size_of::<Coord>() + std::mem::size_of::<Option<Pixel>>() + 8;
        (self.before.len() + self.after.len()) * entry + self.description.len()
    }
}

// ============================================================================
// ACTIONS
// ============================================================================

/// One reversible edit. Layer payloads are owned copies taken when the
/// action was recorded.
#[derive(Clone, Debug)]
pub enum Action {
    PixelDelta(PixelDelta),
    AddLayer {
        index: usize,
        layer: Layer,
        prev_active: usize,
    },
    DuplicateLayer {
        source_index: usize,
        index: usize,
        layer: Layer,
        prev_active: usize,
    },
    DeleteLayer {
        index: usize,
        layer: Layer,
        prev_active: usize,
        new_active: usize,
    },
    MoveLayer {
        from: usize,
        to: usize,
        active_before: usize,
        active_after: usize,
    },
    RenameLayer {
        index: usize,
        old_name: String,
        new_name: String,
    },
    /// `upper` sat at `upper_index` and `lower` right below it; `merged`
    /// replaced both at `upper_index - 1`.
    MergeLayer {
        upper_index: usize,
        upper: Layer,
        lower: Layer,
        merged: Layer,
        prev_active: usize,
    },
    SetOpacity {
        index: usize,
        old: u8,
        new: u8,
    },
    SetVisibility {
        index: usize,
        old: bool,
        new: bool,
    },
}

fn clamp_active(canvas: &mut CanvasState, index: usize) {
    canvas.active_layer_index = index.min(canvas.layers.len().saturating_sub(1));
}

impl Action {
    pub fn description(&self) -> String {
        match self {
            Action::PixelDelta(delta) => delta.description.clone(),
            Action::AddLayer { .. } => "Add Layer".into(),
            Action::DuplicateLayer { .. } => "Duplicate Layer".into(),
            Action::DeleteLayer { .. } => "Delete Layer".into(),
            Action::MoveLayer { .. } => "Move Layer".into(),
            Action::RenameLayer { new_name, .. } => format!("Rename Layer to \"{}\"", new_name),
            Action::MergeLayer { .. } => "Merge Down".into(),
            Action::SetOpacity { .. } => "Layer Opacity".into(),
            Action::SetVisibility { new, .. } => {
                if *new { "Show Layer".into() } else { "Hide Layer".into() }
            }
        }
    }

    /// Whether this action changes the layer list (as opposed to pixels or
    /// per-layer properties).
    pub fn is_structural(&self) -> bool {
        !matches!(
            self,
            Action::PixelDelta(_) | Action::SetOpacity { .. } | Action::SetVisibility { .. }
        )
    }

    pub fn is_noop(&self) -> bool {
        match self {
            Action::PixelDelta(delta) => delta.is_noop(),
            Action::MoveLayer { from, to, .. } => from == to,
            Action::RenameLayer { old_name, new_name, .. } => old_name == new_name,
            Action::SetOpacity { old, new, .. } => old == new,
            Action::SetVisibility { old, new, .. } => old == new,
            _ => false,
        }
    }

    pub fn memory_size(&self) -> usize {
        let base = std::mem::size_of::<Self>();
        base + match self {
            Action::PixelDelta(delta) => delta.memory_size(),
            Action::AddLayer { layer, .. }
            | Action::DuplicateLayer { layer, .. }
            | Action::DeleteLayer { layer, .. } => layer.memory_size(),
            Action::MergeLayer { upper, lower, merged, .. } => {
                upper.memory_size() + lower.memory_size() + merged.memory_size()
            }
            Action::RenameLayer { old_name, new_name, .. } => old_name.len() + new_name.len(),
            _ => 0,
        }
    }

    /// Put the canvas back the way it was before this action.
    pub fn undo(&self, canvas: &mut CanvasState) {
        match self {
            Action::PixelDelta(delta) => {
                delta.apply(canvas, &delta.before);
                return;
            }
            Action::AddLayer { index, prev_active, .. }
            | Action::DuplicateLayer { index, prev_active, .. } => {
                if *index < canvas.layers.len() && canvas.layers.len() > 1 {
                    canvas.layers.remove(*index);
                }
                clamp_active(canvas, *prev_active);
            }
            Action::DeleteLayer { index, layer, prev_active, .. } => {
                let at = (*index).min(canvas.layers.len());
                canvas.layers.insert(at, layer.clone());
                clamp_active(canvas, *prev_active);
            }
            Action::MoveLayer { from, to, active_before, .. } => {
                if *to < canvas.layers.len() {
                    let layer = canvas.layers.remove(*to);
                    let at = (*from).min(canvas.layers.len());
                    canvas.layers.insert(at, layer);
                }
                clamp_active(canvas, *active_before);
            }
            Action::RenameLayer { index, old_name, .. } => {
                if let Some(layer) = canvas.layers.get_mut(*index) {
                    layer.name = old_name.clone();
                }
            }
            Action::MergeLayer { upper_index, upper, lower, prev_active, .. } => {
                let lower_index = upper_index.saturating_sub(1);
                if lower_index < canvas.layers.len() {
                    canvas.layers.remove(lower_index);
                }
                let at = lower_index.min(canvas.layers.len());
                canvas.layers.insert(at, lower.clone());
                canvas.layers.insert(at + 1, upper.clone());
                clamp_active(canvas, *prev_active);
            }
            Action::SetOpacity { index, old, .. } => {
                if let Some(layer) = canvas.layers.get_mut(*index) {
                    layer.opacity = *old;
                }
            }
            Action::SetVisibility { index, old, .. } => {
                if let Some(layer) = canvas.layers.get_mut(*index) {
                    layer.visible = *old;
                }
            }
        }
        canvas.mark_full();
    }

    /// Re-apply this action after an undo.
    pub fn redo(&self, canvas: &mut CanvasState) {
        match self {
            Action::PixelDelta(delta) => {
                delta.apply(canvas, &delta.after);
                return;
            }
            Action::AddLayer { index, layer, .. } | Action::DuplicateLayer { index, layer, .. } => {
                let at = (*index).min(canvas.layers.len());
                canvas.layers.insert(at, layer.clone());
                clamp_active(canvas, at);
            }
            Action::DeleteLayer { index, new_active, .. } => {
                if *index < canvas.layers.len() && canvas.layers.len() > 1 {
                    canvas.layers.remove(*index);
                }
                clamp_active(canvas, *new_active);
            }
            Action::MoveLayer { from, to, active_after, .. } => {
                if *from < canvas.layers.len() {
                    let layer = canvas.layers.remove(*from);
                    let at = (*to).min(canvas.layers.len());
                    canvas.layers.insert(at, layer);
                }
                clamp_active(canvas, *active_after);
            }
            Action::RenameLayer { index, new_name, .. } => {
                if let Some(layer) = canvas.layers.get_mut(*index) {
                    layer.name = new_name.clone();
                }
            }
            Action::MergeLayer { upper_index, merged, .. } => {
                let lower_index = upper_index.saturating_sub(1);
                if *upper_index < canvas.layers.len() {
                    canvas.layers.remove(*upper_index);
                    canvas.layers.remove(lower_index);
                }
                let at = lower_index.min(canvas.layers.len());
                canvas.layers.insert(at, merged.clone());
                clamp_active(canvas, at);
            }
            Action::SetOpacity { index, new, .. } => {
                if let Some(layer) = canvas.layers.get_mut(*index) {
                    layer.opacity = *new;
                }
            }
            Action::SetVisibility { index, new, .. } => {
                if let Some(layer) = canvas.layers.get_mut(*index) {
                    layer.visible = *new;
                }
            }
        }
        canvas.mark_full();
    }
}

// ============================================================================
// HISTORY MANAGER - Manages undo/redo stacks with memory limits
// ============================================================================

/// Linear undo/redo history with a step cap and an approximate memory cap.
pub struct HistoryManager {
    undo_stack: VecDeque<Action>,
    redo_stack: VecDeque<Action>,
    max_history_size: usize,
    max_memory_bytes: Option<usize>,
    /// Running memory total across both stacks.
    total_memory: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(50)
    }
}

impl HistoryManager {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_history_size: max_history_size.max(1),
            max_memory_bytes: Some(64 * 1024 * 1024),
            total_memory: 0,
        }
    }

    pub fn with_memory_limit(mut self, max_bytes: Option<usize>) -> Self {
        self.max_memory_bytes = max_bytes;
        self
    }

    /// Record an already-applied action. No-op actions are dropped and
    /// `false` is returned; otherwise the redo stack is cleared.
    pub fn push(&mut self, action: Action) -> bool {
        if action.is_noop() {
            return false;
        }
        for old in self.redo_stack.drain(..) {
            self.total_memory = self.total_memory.saturating_sub(old.memory_size());
        }
        self.total_memory += action.memory_size();
        self.undo_stack.push_back(action);
        self.prune();
        true
    }

    pub fn undo(&mut self, canvas: &mut CanvasState) -> Option<String> {
        let action = self.undo_stack.pop_back()?;
        let description = action.description();
        action.undo(canvas);
        self.redo_stack.push_back(action);
        Some(description)
    }

    pub fn redo(&mut self, canvas: &mut CanvasState) -> Option<String> {
        let action = self.redo_stack.pop_back()?;
        let description = action.description();
        action.redo(canvas);
        self.undo_stack.push_back(action);
        Some(description)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.back().map(Action::description)
    }

    pub fn redo_description(&self) -> Option<String> {
        self.redo_stack.back().map(Action::description)
    }

    /// Undo descriptions, most recent first.
    pub fn undo_history(&self) -> Vec<String> {
        self.undo_stack.iter().rev().map(Action::description).collect()
    }

    pub fn last_action(&self) -> Option<&Action> {
        self.undo_stack.back()
    }

    /// The action `redo` would re-apply.
    pub fn next_redo(&self) -> Option<&Action> {
        self.redo_stack.back()
    }

    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    fn prune(&mut self) {
        let mut dropped = 0usize;
        while self.undo_stack.len() > self.max_history_size {
            if let Some(removed) = self.undo_stack.pop_front() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                dropped += 1;
            }
        }

        if let Some(max_bytes) = self.max_memory_bytes {
            while self.total_memory > max_bytes && self.undo_stack.len() > 1 {
                if let Some(removed) = self.undo_stack.pop_front() {
                    self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                    dropped += 1;
                }
            }
        }

        if dropped > 0 {
            log_info!("History: pruned {} oldest step(s), {} bytes held", dropped, self.total_memory);
        }
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.total_memory = 0;
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }
}
