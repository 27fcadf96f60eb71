// ============================================================================
// CANVAS-LEVEL OPERATIONS: layer stack edits, merge down, resize
// ============================================================================
//
// Each function applies its change to `state` and records the matching
// `Action`. They return whether anything happened; refused requests (bad
// index, deleting the last layer, merging the bottom layer) leave both the
// canvas and the history untouched.

use crate::canvas::{apply_paint, effective_alpha, CanvasState, Layer, Pixel, MAX_CANVAS_DIM};
use crate::components::history::{Action, HistoryManager};
use crate::components::tools::EditError;

fn next_layer_name(state: &CanvasState) -> String {
    format!("Layer {}", state.layers.len() + 1)
}

/// Add a transparent layer above the active one and make it active.
pub fn add_layer(state: &mut CanvasState, history: &mut HistoryManager) -> usize {
    let index = (state.active_layer_index + 1).min(state.layers.len());
    let layer = Layer::new(next_layer_name(state), state.width, state.height);
    let prev_active = state.active_layer_index;

    state.layers.insert(index, layer.clone());
    state.active_layer_index = index;
    history.push(Action::AddLayer { index, layer, prev_active });
    state.mark_full();
    index
}

/// Delete the layer at `index`. The last remaining layer is never removed.
pub fn delete_layer(state: &mut CanvasState, history: &mut HistoryManager, index: usize) -> bool {
    if state.layers.len() <= 1 || index >= state.layers.len() {
        return false;
    }
    let prev_active = state.active_layer_index;
    let layer = state.layers.remove(index);

    let new_active = if prev_active > index || prev_active >= state.layers.len() {
        prev_active.saturating_sub(1)
    } else {
        prev_active
    };
    state.active_layer_index = new_active;

    history.push(Action::DeleteLayer {
        index,
        layer,
        prev_active,
        new_active,
    });
    state.mark_full();
    true
}

/// Copy the layer at `index` directly above itself and make the copy active.
pub fn duplicate_layer(state: &mut CanvasState, history: &mut HistoryManager, index: usize) -> Option<usize> {
    let src = state.layers.get(index)?;
    let mut layer = src.clone();
    layer.name = format!("{} Copy", src.name);

    let new_index = index + 1;
    let prev_active = state.active_layer_index;
    state.layers.insert(new_index, layer.clone());
    state.active_layer_index = new_index;

    history.push(Action::DuplicateLayer {
        source_index: index,
        index: new_index,
        layer,
        prev_active,
    });
    state.mark_full();
    Some(new_index)
}

/// Move a layer to a new position in the stack. The active selection follows
/// the layer it pointed at.
pub fn move_layer(state: &mut CanvasState, history: &mut HistoryManager, from: usize, to: usize) -> bool {
    let len = state.layers.len();
    if from >= len || to >= len || from == to {
        return false;
    }
    let active_before = state.active_layer_index;
    let layer = state.layers.remove(from);
    state.layers.insert(to, layer);

    let active_after = if active_before == from {
        to
    } else if from < active_before && active_before <= to {
        active_before - 1
    } else if to <= active_before && active_before < from {
        active_before + 1
    } else {
        active_before
    };
    state.active_layer_index = active_after;

    history.push(Action::MoveLayer {
        from,
        to,
        active_before,
        active_after,
    });
    state.mark_full();
    true
}

pub fn rename_layer(state: &mut CanvasState, history: &mut HistoryManager, index: usize, name: &str) -> bool {
    let Some(layer) = state.layers.get_mut(index) else {
        return false;
    };
    let name = name.trim();
    if name.is_empty() || layer.name == name {
        return false;
    }
    let old_name = std::mem::replace(&mut layer.name, name.to_string());
    history.push(Action::RenameLayer {
        index,
        old_name,
        new_name: name.to_string(),
    })
}

pub fn set_layer_opacity(state: &mut CanvasState, history: &mut HistoryManager, index: usize, opacity: u8) -> bool {
    let Some(layer) = state.layers.get_mut(index) else {
        return false;
    };
    let old = std::mem::replace(&mut layer.opacity, opacity);
    if old == opacity {
        return false;
    }
    history.push(Action::SetOpacity { index, old, new: opacity });
    state.mark_full();
    true
}

pub fn set_layer_visibility(state: &mut CanvasState, history: &mut HistoryManager, index: usize, visible: bool) -> bool {
    let Some(layer) = state.layers.get_mut(index) else {
        return false;
    };
    let old = std::mem::replace(&mut layer.visible, visible);
    if old == visible {
        return false;
    }
    history.push(Action::SetVisibility { index, old, new: visible });
    state.mark_full();
    true
}

// ============================================================================
// MERGE DOWN
// ============================================================================

/// Flatten `upper` onto `lower` into a single layer at full opacity.
///
/// Lower pixels start premultiplied by the lower opacity. Each upper pixel
/// enters with alpha `alpha × upper.opacity / 255`; it blends with an
/// existing lower pixel only when `blending` is on and that alpha is
/// partial, otherwise it overwrites. A hidden upper layer contributes
/// nothing.
pub fn merge_layers(lower: &Layer, upper: &Layer, blending: bool) -> Layer {
    let mut merged = Layer::new(lower.name.clone(), lower.pixels.width(), lower.pixels.height());
    merged.visible = lower.visible;

    for ((x, y), p) in lower.pixels.iter() {
        let alpha = effective_alpha(p.alpha, lower.opacity);
        merged.pixels.put(x, y, Pixel::new(p.color, alpha));
    }

    if !upper.visible {
        return merged;
    }

    for ((x, y), p) in upper.pixels.iter() {
        let alpha = effective_alpha(p.alpha, upper.opacity);
        if alpha == 0 {
            continue;
        }
        let existing = merged.pixels.get(x, y);
        let value = apply_paint(Pixel::new(p.color, alpha), existing, blending);
        merged.pixels.set(x, y, value);
    }
    merged
}

/// Merge the layer at `upper_index` into the one below it.
pub fn merge_down(state: &mut CanvasState, history: &mut HistoryManager, upper_index: usize) -> bool {
    if upper_index == 0 || upper_index >= state.layers.len() {
        return false;
    }
    let prev_active = state.active_layer_index;
    let upper = state.layers.remove(upper_index);
    let lower_index = upper_index - 1;
    let merged = merge_layers(&state.layers[lower_index], &upper, state.color_blending);
    let lower = std::mem::replace(&mut state.layers[lower_index], merged.clone());
    state.active_layer_index = lower_index;

    history.push(Action::MergeLayer {
        upper_index,
        upper,
        lower,
        merged,
        prev_active,
    });
    state.mark_full();
    true
}

// ============================================================================
// RESIZE
// ============================================================================

/// What a resize would throw away.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ResizeImpact {
    pub dropped_pixels: usize,
    /// Every stored pixel of every layer would be lost.
    pub orphans_all_content: bool,
}

pub fn validate_dimensions(width: u32, height: u32) -> Result<(), EditError> {
    if (1..=MAX_CANVAS_DIM).contains(&width) && (1..=MAX_CANVAS_DIM).contains(&height) {
        Ok(())
    } else {
        Err(EditError::InvalidSize { width, height })
    }
}

/// Report the cost of resizing without changing anything.
pub fn plan_resize(state: &CanvasState, width: u32, height: u32) -> ResizeImpact {
    let total: usize = state.layers.iter().map(|l| l.pixels.len()).sum();
    let dropped_pixels: usize = state
        .layers
        .iter()
        .map(|l| l.pixels.count_outside(width, height))
        .sum();
    ResizeImpact {
        dropped_pixels,
        orphans_all_content: total > 0 && dropped_pixels == total,
    }
}

/// Change the canvas size. Out-of-bounds pixels are dropped from every layer
/// and the history is cleared; this cannot be undone.
pub fn resize_canvas(
    state: &mut CanvasState,
    history: &mut HistoryManager,
    width: u32,
    height: u32,
) -> Result<ResizeImpact, EditError> {
    validate_dimensions(width, height)?;
    let impact = plan_resize(state, width, height);
    for layer in &mut state.layers {
        layer.pixels.crop(width, height);
    }
    state.width = width;
    state.height = height;
    history.clear();
    state.cache.invalidate();
    log_info!(
        "Canvas resized to {}x{} ({} pixel(s) dropped, history cleared)",
        width,
        height,
        impact.dropped_pixels
    );
    Ok(impact)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Pixel = Pixel::rgba(255, 0, 0, 255);
    const BLUE: Pixel = Pixel::rgba(0, 0, 255, 255);

    fn names(state: &CanvasState) -> Vec<&str> {
        state.layers.iter().map(|l| l.name.as_str()).collect()
    }

    #[test]
    fn add_inserts_above_active() {
        let mut state = CanvasState::new(2, 2);
        let mut history = HistoryManager::default();
        assert_eq!(add_layer(&mut state, &mut history), 1);
        state.active_layer_index = 0;
        assert_eq!(add_layer(&mut state, &mut history), 1);
        assert_eq!(names(&state), ["Layer 1", "Layer 3", "Layer 2"]);
        history.undo(&mut state);
        assert_eq!(names(&state), ["Layer 1", "Layer 2"]);
        assert_eq!(state.active_layer_index, 0);
    }

    #[test]
    fn last_layer_cannot_be_deleted() {
        let mut state = CanvasState::new(2, 2);
        let mut history = HistoryManager::default();
        assert!(!delete_layer(&mut state, &mut history, 0));
        assert!(!history.can_undo());
        assert_eq!(state.layers.len(), 1);
    }

    #[test]
    fn delete_keeps_selection_on_same_layer() {
        let mut state = CanvasState::new(2, 2);
        let mut history = HistoryManager::default();
        add_layer(&mut state, &mut history);
        add_layer(&mut state, &mut history);
        assert_eq!(state.active_layer_index, 2);
        assert!(delete_layer(&mut state, &mut history, 0));
        assert_eq!(state.active_layer_index, 1);
        assert_eq!(state.layers[1].name, "Layer 3");
        history.undo(&mut state);
        assert_eq!(names(&state), ["Layer 1", "Layer 2", "Layer 3"]);
        assert_eq!(state.active_layer_index, 2);
    }

    #[test]
    fn delete_top_active_layer_moves_selection_down() {
        let mut state = CanvasState::new(2, 2);
        let mut history = HistoryManager::default();
        add_layer(&mut state, &mut history);
        assert!(delete_layer(&mut state, &mut history, 1));
        assert_eq!(state.active_layer_index, 0);
    }

    #[test]
    fn duplicate_copies_pixels_and_properties() {
        let mut state = CanvasState::new(2, 2);
        let mut history = HistoryManager::default();
        state.layers[0].pixels.put(1, 1, RED);
        state.layers[0].opacity = 90;
        assert_eq!(duplicate_layer(&mut state, &mut history, 0), Some(1));
        assert_eq!(state.layers[1].name, "Layer 1 Copy");
        assert_eq!(state.layers[1].pixels, state.layers[0].pixels);
        assert_eq!(state.layers[1].opacity, 90);
        history.undo(&mut state);
        assert_eq!(state.layers.len(), 1);
    }

    #[test]
    fn move_tracks_active_layer() {
        let mut state = CanvasState::new(2, 2);
        let mut history = HistoryManager::default();
        add_layer(&mut state, &mut history);
        add_layer(&mut state, &mut history);
        state.active_layer_index = 1;
        assert!(move_layer(&mut state, &mut history, 0, 2));
        assert_eq!(names(&state), ["Layer 2", "Layer 3", "Layer 1"]);
        assert_eq!(state.active_layer_index, 0);
        assert!(!move_layer(&mut state, &mut history, 1, 1));
        history.undo(&mut state);
        assert_eq!(names(&state), ["Layer 1", "Layer 2", "Layer 3"]);
        assert_eq!(state.active_layer_index, 1);
    }

    #[test]
    fn rename_ignores_blank_and_unchanged() {
        let mut state = CanvasState::new(2, 2);
        let mut history = HistoryManager::default();
        assert!(!rename_layer(&mut state, &mut history, 0, "   "));
        assert!(!rename_layer(&mut state, &mut history, 0, "Layer 1"));
        assert!(rename_layer(&mut state, &mut history, 0, " Ink "));
        assert_eq!(state.layers[0].name, "Ink");
    }

    #[test]
    fn opaque_merge_overwrites() {
        let mut state = CanvasState::new(2, 2);
        let mut history = HistoryManager::default();
        state.layers[0].pixels.put(0, 0, BLUE);
        add_layer(&mut state, &mut history);
        state.layers[1].pixels.put(0, 0, RED);
        let before: Vec<Layer> = state.layers.clone();

        assert!(merge_down(&mut state, &mut history, 1));
        assert_eq!(state.layers.len(), 1);
        assert_eq!(state.active_layer_index, 0);
        assert_eq!(state.layers[0].pixels.len(), 1);
        assert_eq!(state.layers[0].pixels.get(0, 0), Some(RED));

        history.undo(&mut state);
        assert_eq!(state.layers, before);
        assert_eq!(state.active_layer_index, 1);
    }

    #[test]
    fn merge_applies_opacity_and_blend() {
        let mut lower = Layer::new("lower", 2, 1);
        lower.pixels.put(0, 0, Pixel::rgba(0, 0, 255, 255));
        lower.pixels.put(1, 0, Pixel::rgba(0, 0, 255, 255));
        lower.opacity = 128;
        let mut upper = Layer::new("upper", 2, 1);
        upper.pixels.put(0, 0, Pixel::rgba(255, 0, 0, 255));
        upper.opacity = 128;

        let merged = merge_layers(&lower, &upper, true);
        assert_eq!(merged.opacity, 255);
        assert_eq!(merged.pixels.get(1, 0), Some(Pixel::rgba(0, 0, 255, 128)));
        assert_eq!(merged.pixels.get(0, 0), Some(Pixel::rgba(170, 0, 85, 192)));

        let merged = merge_layers(&lower, &upper, false);
        assert_eq!(merged.pixels.get(0, 0), Some(Pixel::rgba(255, 0, 0, 128)));
    }

    #[test]
    fn merge_drops_pixels_faded_to_nothing() {
        let mut lower = Layer::new("lower", 1, 1);
        lower.pixels.put(0, 0, Pixel::rgba(1, 2, 3, 1));
        lower.opacity = 100;
        let merged = merge_layers(&lower, &Layer::new("upper", 1, 1), false);
        assert!(merged.pixels.is_empty());
    }

    #[test]
    fn hidden_upper_is_discarded_by_merge() {
        let lower = Layer::new("lower", 1, 1);
        let mut upper = Layer::new("upper", 1, 1);
        upper.pixels.put(0, 0, RED);
        upper.visible = false;
        assert!(merge_layers(&lower, &upper, false).pixels.is_empty());
    }

    #[test]
    fn merge_bottom_layer_is_refused() {
        let mut state = CanvasState::new(2, 2);
        let mut history = HistoryManager::default();
        assert!(!merge_down(&mut state, &mut history, 0));
    }

    #[test]
    fn resize_crops_and_clears_history() {
        let mut state = CanvasState::new(4, 4);
        let mut history = HistoryManager::default();
        state.layers[0].pixels.put(3, 3, RED);
        state.layers[0].pixels.put(0, 0, RED);
        add_layer(&mut state, &mut history);
        assert!(history.can_undo());

        let plan = plan_resize(&state, 2, 2);
        assert_eq!(plan, ResizeImpact { dropped_pixels: 1, orphans_all_content: false });

        let impact = resize_canvas(&mut state, &mut history, 2, 2).unwrap();
        assert_eq!(impact.dropped_pixels, 1);
        assert!(!history.can_undo());
        assert_eq!(state.layers[0].pixels.len(), 1);
        assert_eq!(state.layers[1].pixels.width(), 2);
    }

    #[test]
    fn resize_reports_total_loss_and_validates() {
        let mut state = CanvasState::new(4, 4);
        let mut history = HistoryManager::default();
        state.layers[0].pixels.put(3, 3, RED);
        assert!(plan_resize(&state, 2, 2).orphans_all_content);
        assert_eq!(
            resize_canvas(&mut state, &mut history, 0, 5),
            Err(EditError::InvalidSize { width: 0, height: 5 })
        );
        assert!(resize_canvas(&mut state, &mut history, MAX_CANVAS_DIM + 1, 5).is_err());
        assert_eq!(state.width, 4);
    }
}
