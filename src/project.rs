use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use image::{Rgb, RgbaImage};
use uuid::Uuid;

use crate::canvas::{Background, CanvasState, Coord, Invalidation, Pixel};
use crate::components::history::{Action, HistoryManager};
use crate::components::tools::{
    ensure_editable, flood_fill, paint_pixels, pick_color, EditError, FreehandStroke, ShapeDrag, ToolKind,
    ToolOptions,
};
use crate::io::{self, LoadError, SaveError};
use crate::ops::canvas_ops::{self, ResizeImpact};
use crate::preview::PreviewRenderer;
use crate::scheduler::{Scheduler, TimerKind};
use crate::settings::EngineSettings;

static UNTITLED_COUNTER: AtomicUsize = AtomicUsize::new(1);

/// Engine to host messages, drained with [`Document::take_notifications`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    /// The composited frame changed in this region.
    RegionInvalidated(Invalidation),
    HistoryChanged { can_undo: bool, can_redo: bool },
    /// Layers were added, removed, reordered or had their properties changed,
    /// or the active layer moved.
    LayerListChanged,
    /// Preview chunks (by chunk key) were re-rendered or dropped. A key
    /// with no chunk left in [`Document::preview`] must be cleared.
    PreviewUpdated(Vec<Coord>),
}

/// Canvas size before and after opening or importing an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenReport {
    pub previous_size: (u32, u32),
    pub new_size: (u32, u32),
}

impl OpenReport {
    pub fn resized(&self) -> bool {
        self.previous_size != self.new_size
    }
}

#[derive(Clone, Debug)]
enum StrokeKind {
    Freehand(FreehandStroke),
    Shape(ShapeDrag),
}

/// A gesture between press and release. Options are frozen at press time.
#[derive(Clone, Debug)]
struct ActiveStroke {
    layer_index: usize,
    options: ToolOptions,
    kind: StrokeKind,
}

/// Single open document.
pub struct Document {
    pub id: Uuid,
    pub canvas: CanvasState,
    pub history: HistoryManager,
    pub preview: PreviewRenderer,
    scheduler: Scheduler,
    /// `None` for unsaved/untitled files.
    pub path: Option<PathBuf>,
    pub name: String,
    pub is_dirty: bool,
    /// Flatten exports onto this color instead of keeping transparency.
    pub save_background: Option<Rgb<u8>>,
    stroke: Option<ActiveStroke>,
    notifications: Vec<Notification>,
    preview_interval: Duration,
    redraw_debounce: Duration,
}

fn file_display_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn decode_canvas(path: &Path) -> Result<CanvasState, LoadError> {
    if io::is_project_path(path) {
        return io::load_project(path);
    }
    let imported = io::import_image(path)?;
    Ok(CanvasState::with_layers(imported.width, imported.height, vec![imported.layer], 0))
}

impl Document {
    fn with_canvas(mut canvas: CanvasState, name: String, path: Option<PathBuf>, settings: &EngineSettings) -> Self {
        canvas.background = settings.background();
        canvas.render_alpha = settings.render_pixel_alpha;
        canvas.color_blending = settings.color_blending;
        Self {
            id: Uuid::new_v4(),
            canvas,
            history: HistoryManager::new(settings.max_undo_steps)
                .with_memory_limit(settings.history_memory_limit()),
            preview: PreviewRenderer::default(),
            scheduler: Scheduler::new(),
            path,
            name,
            is_dirty: false,
            save_background: settings.export_background(),
            stroke: None,
            notifications: Vec::new(),
            preview_interval: settings.preview_interval(),
            redraw_debounce: settings.redraw_debounce(),
        }
    }

    /// Blank document with one empty "Layer 1".
    pub fn new_document(width: u32, height: u32, settings: &EngineSettings) -> Result<Self, EditError> {
        canvas_ops::validate_dimensions(width, height)?;
        let name = format!("Untitled-{}", UNTITLED_COUNTER.fetch_add(1, Ordering::Relaxed));
        log_info!("New document {} ({}x{})", name, width, height);
        Ok(Self::with_canvas(CanvasState::new(width, height), name, None, settings))
    }

    /// Load a `.pxc` project or a raster image as a fresh document. The size
    /// report is relative to the default canvas size in `settings`.
    pub fn open(path: &Path, settings: &EngineSettings) -> Result<(Self, OpenReport), LoadError> {
        let canvas = match decode_canvas(path) {
            Ok(c) => c,
            Err(e) => {
                log_err!("Failed to open {}: {}", path.display(), e);
                return Err(e);
            }
        };
        let report = OpenReport {
            previous_size: (settings.default_width, settings.default_height),
            new_size: (canvas.width, canvas.height),
        };
        log_info!(
            "Opened {} ({}x{}, {} layer(s))",
            path.display(),
            canvas.width,
            canvas.height,
            canvas.layers.len()
        );
        let doc = Self::with_canvas(canvas, file_display_name(path), Some(path.to_path_buf()), settings);
        Ok((doc, report))
    }

    /// Replace this document's content with a decoded file, keeping its
    /// identity, name and view options. History is cleared.
    pub fn import_image(&mut self, path: &Path) -> Result<OpenReport, LoadError> {
        let mut canvas = decode_canvas(path)?;
        let report = OpenReport {
            previous_size: (self.canvas.width, self.canvas.height),
            new_size: (canvas.width, canvas.height),
        };

        self.discard_transient_state();
        canvas.background = self.canvas.background;
        canvas.render_alpha = self.canvas.render_alpha;
        canvas.color_blending = self.canvas.color_blending;
        self.canvas = canvas;
        self.history.clear();
        self.is_dirty = true;

        if report.resized() {
            log_info!(
                "Canvas resized from {}x{} to {}x{} by import",
                report.previous_size.0,
                report.previous_size.1,
                report.new_size.0,
                report.new_size.1
            );
        }
        self.notify_history();
        self.notifications.push(Notification::LayerListChanged);
        self.flush_redraw();
        Ok(report)
    }

    pub fn save_project(&mut self, path: &Path) -> Result<(), SaveError> {
        io::save_project(&self.canvas, path)?;
        self.path = Some(path.to_path_buf());
        self.name = file_display_name(path);
        self.is_dirty = false;
        Ok(())
    }

    pub fn export_png(&self, path: &Path) -> Result<(), SaveError> {
        io::export_png(&self.canvas, path, self.save_background)
    }

    /// Get the display title (name with dirty indicator)
    pub fn display_title(&self) -> String {
        if self.is_dirty {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    // ========================================================================
    // INTERACTION
    // ========================================================================

    pub fn has_active_stroke(&self) -> bool {
        self.stroke.is_some()
    }

    /// Begin a gesture. Fill applies immediately; pencil, eraser and shape
    /// strokes preview until [`Document::release`]. Presses outside the canvas
    /// are ignored.
    pub fn press(&mut self, x: i32, y: i32, options: &ToolOptions, now: Instant) -> Result<(), EditError> {
        if self.stroke.is_some() {
            log_warn!("Press while a stroke is active, discarding the old stroke");
            self.cancel_stroke();
        }
        if !self.canvas.in_bounds(x, y) {
            return Ok(());
        }
        let layer_index = self.canvas.active_layer_index;
        if let Err(e) = ensure_editable(&self.canvas, layer_index) {
            log_warn!("Press refused: {}", e);
            return Err(e);
        }
        let (w, h) = (self.canvas.width, self.canvas.height);

        let kind = match options.tool {
            ToolKind::Fill => {
                let delta = flood_fill(&mut self.canvas, layer_index, x as u32, y as u32, options.paint_value());
                self.commit(Action::PixelDelta(delta), now);
                return Ok(());
            }
            ToolKind::Pencil | ToolKind::Eraser => {
                let mut stroke = FreehandStroke::new();
                self.preview.replace(stroke.move_to(x, y, options.brush_size, w, h));
                StrokeKind::Freehand(stroke)
            }
            ToolKind::Shape => {
                let drag = ShapeDrag::new((x, y));
                self.preview.replace(drag.pixels(options, w, h));
                StrokeKind::Shape(drag)
            }
        };

        self.stroke = Some(ActiveStroke {
            layer_index,
            options: options.clone(),
            kind,
        });
        self.scheduler.schedule(TimerKind::PreviewFrame, now, Duration::ZERO);
        Ok(())
    }

    pub fn drag(&mut self, x: i32, y: i32, now: Instant) {
        if self.extend_stroke(x, y) {
            self.scheduler
                .schedule_if_idle(TimerKind::PreviewFrame, now, self.preview_interval);
        }
    }

    fn extend_stroke(&mut self, x: i32, y: i32) -> bool {
        let Some(stroke) = self.stroke.as_mut() else {
            return false;
        };
        let (w, h) = (self.canvas.width, self.canvas.height);
        match &mut stroke.kind {
            StrokeKind::Freehand(freehand) => {
                self.preview
                    .queue(freehand.move_to(x, y, stroke.options.brush_size, w, h));
            }
            StrokeKind::Shape(drag) => {
                drag.end = (x, y);
                self.preview.replace(drag.pixels(&stroke.options, w, h));
            }
        }
        true
    }

    /// Finish the gesture at `(x, y)` and commit it as one action. Returns
    /// whether a history entry was recorded.
    pub fn release(&mut self, x: i32, y: i32, now: Instant) -> bool {
        self.extend_stroke(x, y);
        let Some(stroke) = self.stroke.take() else {
            return false;
        };
        self.preview.discard();
        self.scheduler.cancel(TimerKind::PreviewFrame);

        let (w, h) = (self.canvas.width, self.canvas.height);
        let coords = match stroke.kind {
            StrokeKind::Freehand(freehand) => freehand.into_pixels(),
            StrokeKind::Shape(drag) => drag.pixels(&stroke.options, w, h),
        };
        let delta = paint_pixels(
            &mut self.canvas,
            stroke.layer_index,
            coords,
            stroke.options.paint_value(),
            stroke.options.description(),
        );
        self.commit(Action::PixelDelta(delta), now)
    }

    /// Abandon the current gesture without touching any layer.
    pub fn cancel_stroke(&mut self) {
        if self.stroke.take().is_some() {
            self.preview.discard();
            self.scheduler.cancel(TimerKind::PreviewFrame);
        }
    }

    // ========================================================================
    // TIMERS AND RENDERING
    // ========================================================================

    /// Earliest time [`Document::tick`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Run every timer due at `now`. Returns whether any ran.
    pub fn tick(&mut self, now: Instant) -> bool {
        let due = self.scheduler.take_due(now);
        for kind in &due {
            match kind {
                TimerKind::PreviewFrame => self.render_preview_frame(now),
                TimerKind::Redraw => self.flush_redraw(),
            }
        }
        !due.is_empty()
    }

    fn render_preview_frame(&mut self, now: Instant) {
        let Some(stroke) = &self.stroke else { return };
        let paint = stroke.options.preview_paint();
        let keys = self.preview.render_pending(&self.canvas, paint);
        if !keys.is_empty() {
            self.notifications.push(Notification::PreviewUpdated(keys));
        }
        self.scheduler
            .schedule(TimerKind::PreviewFrame, now, self.preview_interval);
    }

    /// Debounce a recomposite; a newer request replaces a pending one.
    pub fn request_redraw(&mut self, now: Instant) {
        self.scheduler.schedule(TimerKind::Redraw, now, self.redraw_debounce);
    }

    fn flush_redraw(&mut self) {
        self.scheduler.cancel(TimerKind::Redraw);
        let (invalidation, _) = self.canvas.render();
        if let Some(inv) = invalidation {
            self.notifications.push(Notification::RegionInvalidated(inv));
        }
    }

    /// Bring the composite up to date now and return it.
    pub fn render(&mut self) -> &RgbaImage {
        self.scheduler.cancel(TimerKind::Redraw);
        let (invalidation, frame) = self.canvas.render();
        if let Some(inv) = invalidation {
            self.notifications.push(Notification::RegionInvalidated(inv));
        }
        frame
    }

    // ========================================================================
    // HISTORY
    // ========================================================================

    fn notify_history(&mut self) {
        self.notifications.push(Notification::HistoryChanged {
            can_undo: self.history.can_undo(),
            can_redo: self.history.can_redo(),
        });
    }

    /// Record an applied action. No-ops leave history and notifications alone.
    fn commit(&mut self, action: Action, now: Instant) -> bool {
        let layer_change = !matches!(action, Action::PixelDelta(_));
        if !self.history.push(action) {
            return false;
        }
        self.is_dirty = true;
        self.notify_history();
        if layer_change {
            self.notifications.push(Notification::LayerListChanged);
        }
        self.request_redraw(now);
        true
    }

    pub fn undo(&mut self, now: Instant) -> Option<String> {
        self.cancel_stroke();
        let description = self.history.undo(&mut self.canvas)?;
        let layer_change = self
            .history
            .next_redo()
            .is_some_and(|a| !matches!(a, Action::PixelDelta(_)));
        self.after_history_step(layer_change, now);
        log_info!("Undo: {}", description);
        Some(description)
    }

    pub fn redo(&mut self, now: Instant) -> Option<String> {
        self.cancel_stroke();
        let description = self.history.redo(&mut self.canvas)?;
        let layer_change = self
            .history
            .last_action()
            .is_some_and(|a| !matches!(a, Action::PixelDelta(_)));
        self.after_history_step(layer_change, now);
        log_info!("Redo: {}", description);
        Some(description)
    }

    fn after_history_step(&mut self, layer_change: bool, now: Instant) {
        self.is_dirty = true;
        self.notify_history();
        if layer_change {
            self.notifications.push(Notification::LayerListChanged);
        }
        self.request_redraw(now);
    }

    // ========================================================================
    // LAYERS
    // ========================================================================

    /// Common tail of every layer-stack edit that went through.
    fn layers_changed(&mut self, changed: bool, now: Instant) -> bool {
        if changed {
            self.is_dirty = true;
            self.notify_history();
            self.notifications.push(Notification::LayerListChanged);
            self.request_redraw(now);
        }
        changed
    }

    pub fn add_layer(&mut self, now: Instant) -> usize {
        self.cancel_stroke();
        let index = canvas_ops::add_layer(&mut self.canvas, &mut self.history);
        self.layers_changed(true, now);
        index
    }

    pub fn delete_layer(&mut self, index: usize, now: Instant) -> bool {
        self.cancel_stroke();
        let changed = canvas_ops::delete_layer(&mut self.canvas, &mut self.history, index);
        self.layers_changed(changed, now)
    }

    pub fn duplicate_layer(&mut self, index: usize, now: Instant) -> Option<usize> {
        self.cancel_stroke();
        let new_index = canvas_ops::duplicate_layer(&mut self.canvas, &mut self.history, index);
        self.layers_changed(new_index.is_some(), now);
        new_index
    }

    pub fn move_layer(&mut self, from: usize, to: usize, now: Instant) -> bool {
        self.cancel_stroke();
        let changed = canvas_ops::move_layer(&mut self.canvas, &mut self.history, from, to);
        self.layers_changed(changed, now)
    }

    pub fn move_layer_up(&mut self, index: usize, now: Instant) -> bool {
        index + 1 < self.canvas.layers.len() && self.move_layer(index, index + 1, now)
    }

    pub fn move_layer_down(&mut self, index: usize, now: Instant) -> bool {
        index > 0 && self.move_layer(index, index - 1, now)
    }

    pub fn rename_layer(&mut self, index: usize, name: &str, now: Instant) -> bool {
        let changed = canvas_ops::rename_layer(&mut self.canvas, &mut self.history, index, name);
        self.layers_changed(changed, now)
    }

    /// Merge the layer at `upper_index` into the one below it.
    pub fn merge_down(&mut self, upper_index: usize, now: Instant) -> bool {
        self.cancel_stroke();
        let changed = canvas_ops::merge_down(&mut self.canvas, &mut self.history, upper_index);
        self.layers_changed(changed, now)
    }

    pub fn set_layer_opacity(&mut self, index: usize, opacity: u8, now: Instant) -> bool {
        let changed = canvas_ops::set_layer_opacity(&mut self.canvas, &mut self.history, index, opacity);
        self.layers_changed(changed, now)
    }

    pub fn set_layer_visibility(&mut self, index: usize, visible: bool, now: Instant) -> bool {
        self.cancel_stroke();
        let changed = canvas_ops::set_layer_visibility(&mut self.canvas, &mut self.history, index, visible);
        self.layers_changed(changed, now)
    }

    /// Change the layer strokes go to. Not recorded in history.
    pub fn select_layer(&mut self, index: usize) -> bool {
        if index >= self.canvas.layers.len() || index == self.canvas.active_layer_index {
            return false;
        }
        self.cancel_stroke();
        self.canvas.active_layer_index = index;
        self.notifications.push(Notification::LayerListChanged);
        true
    }

    pub fn pick_color(&self, x: i32, y: i32) -> Option<Pixel> {
        if !self.canvas.in_bounds(x, y) {
            return None;
        }
        pick_color(&self.canvas, x as u32, y as u32)
    }

    // ========================================================================
    // CANVAS SIZE AND VIEW OPTIONS
    // ========================================================================

    pub fn plan_resize(&self, width: u32, height: u32) -> ResizeImpact {
        canvas_ops::plan_resize(&self.canvas, width, height)
    }

    /// Resize the canvas. Pixels outside the new bounds are lost and the
    /// history is cleared.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<ResizeImpact, EditError> {
        self.cancel_stroke();
        let impact = canvas_ops::resize_canvas(&mut self.canvas, &mut self.history, width, height)?;
        self.preview.discard();
        self.is_dirty = true;
        self.notify_history();
        self.notifications.push(Notification::LayerListChanged);
        self.flush_redraw();
        Ok(impact)
    }

    pub fn set_background(&mut self, background: Background, now: Instant) {
        if self.canvas.background != background {
            self.canvas.background = background;
            self.canvas.mark_full();
            self.request_redraw(now);
        }
    }

    pub fn set_render_alpha(&mut self, render_alpha: bool, now: Instant) {
        if self.canvas.render_alpha != render_alpha {
            self.canvas.render_alpha = render_alpha;
            self.canvas.mark_full();
            self.request_redraw(now);
        }
    }

    /// Takes effect from the next press.
    pub fn set_color_blending(&mut self, enabled: bool) {
        self.canvas.color_blending = enabled;
    }

    pub fn set_save_background(&mut self, background: Option<Rgb<u8>>) {
        self.save_background = background;
    }

    fn discard_transient_state(&mut self) {
        self.cancel_stroke();
        self.preview.discard();
        self.scheduler.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::shapes::ShapeKind;

    const RED: Rgb<u8> = Rgb([255, 0, 0]);
    const MS: Duration = Duration::from_millis(1);

    fn doc(w: u32, h: u32) -> Document {
        Document::new_document(w, h, &EngineSettings::default()).unwrap()
    }

    fn pencil(color: Rgb<u8>) -> ToolOptions {
        ToolOptions {
            color,
            ..ToolOptions::default()
        }
    }

    #[test]
    fn pencil_click_then_undo() {
        let mut d = doc(4, 4);
        let t0 = Instant::now();
        d.press(1, 1, &pencil(RED), t0).unwrap();
        assert!(d.canvas.layers[0].pixels.is_empty());
        assert!(d.release(1, 1, t0));
        assert_eq!(d.canvas.layers[0].pixels.get(1, 1), Some(Pixel::new(RED, 255)));
        assert_eq!(d.canvas.layers[0].pixels.len(), 1);
        assert_eq!(d.display_title(), format!("{}*", d.name));

        assert_eq!(d.undo(Instant::now()).as_deref(), Some("Pencil"));
        assert!(d.canvas.layers[0].pixels.is_empty());
    }

    #[test]
    fn press_outside_canvas_is_ignored() {
        let mut d = doc(4, 4);
        d.press(-1, 2, &pencil(RED), Instant::now()).unwrap();
        assert!(!d.has_active_stroke());
        assert!(!d.release(-1, 2, Instant::now()));
        assert!(!d.history.can_undo());
    }

    #[test]
    fn hidden_layer_refuses_strokes() {
        let mut d = doc(4, 4);
        d.set_layer_visibility(0, false, Instant::now());
        let err = d.press(0, 0, &pencil(RED), Instant::now()).unwrap_err();
        assert_eq!(err, EditError::LayerNotEditable { index: 0 });
    }

    #[test]
    fn stroke_previews_before_commit() {
        let mut d = doc(8, 8);
        let t0 = Instant::now();
        d.press(0, 0, &pencil(RED), t0).unwrap();
        d.drag(3, 0, t0 + MS);
        assert!(d.tick(t0 + 20 * MS));

        let notes = d.take_notifications();
        assert!(notes
            .iter()
            .any(|n| matches!(n, Notification::PreviewUpdated(keys) if keys == &vec![(0, 0)])));
        assert_eq!(d.preview.pixel_at(2, 0), Some(image::Rgba([255, 0, 0, 255])));
        assert!(d.canvas.layers[0].pixels.is_empty());

        d.release(3, 0, t0 + 30 * MS);
        assert!(d.preview.is_idle());
        assert_eq!(d.canvas.layers[0].pixels.len(), 4);
    }

    #[test]
    fn shape_release_commits_rasterized_outline() {
        let mut d = doc(6, 6);
        let opts = ToolOptions {
            tool: ToolKind::Shape,
            shape: ShapeKind::Rectangle,
            color: RED,
            ..ToolOptions::default()
        };
        let t0 = Instant::now();
        d.press(1, 1, &opts, t0).unwrap();
        d.drag(2, 2, t0);
        assert!(d.release(3, 3, t0));
        // 3x3 outline around an untouched center.
        assert_eq!(d.canvas.layers[0].pixels.len(), 8);
        assert_eq!(d.canvas.layers[0].pixels.get(2, 2), None);
        assert_eq!(d.history.undo_description().as_deref(), Some("Rectangle"));
    }

    #[test]
    fn cancel_leaves_layers_untouched() {
        let mut d = doc(4, 4);
        let t0 = Instant::now();
        d.press(0, 0, &pencil(RED), t0).unwrap();
        d.drag(3, 3, t0);
        d.cancel_stroke();
        assert!(!d.release(3, 3, t0));
        assert!(d.canvas.layers[0].pixels.is_empty());
        assert!(d.preview.is_idle());
    }

    #[test]
    fn redraw_is_debounced_until_tick() {
        let mut d = doc(4, 4);
        d.render();
        d.take_notifications();

        let t0 = Instant::now();
        d.press(2, 2, &pencil(RED), t0).unwrap();
        d.release(2, 2, t0);
        let deadline = d.next_deadline().unwrap();
        assert!(!d.tick(deadline - MS));
        assert!(d.tick(deadline));
        let notes = d.take_notifications();
        assert!(notes.contains(&Notification::RegionInvalidated(Invalidation::Region(
            crate::canvas::DirtyRect::point(2, 2)
        ))));
        assert_eq!(d.render().get_pixel(2, 2).0, [255, 0, 0, 255]);
    }

    #[test]
    fn noop_fill_records_nothing() {
        let mut d = doc(3, 3);
        let fill = ToolOptions {
            tool: ToolKind::Fill,
            color: RED,
            ..ToolOptions::default()
        };
        let t0 = Instant::now();
        d.press(0, 0, &fill, t0).unwrap();
        assert_eq!(d.history.undo_count(), 1);
        d.take_notifications();
        d.press(1, 1, &fill, t0).unwrap();
        assert_eq!(d.history.undo_count(), 1);
        assert!(d.take_notifications().is_empty());
    }

    #[test]
    fn layer_ops_notify_and_undo() {
        let mut d = doc(2, 2);
        assert_eq!(d.add_layer(Instant::now()), 1);
        let notes = d.take_notifications();
        assert!(notes.contains(&Notification::LayerListChanged));
        assert!(notes.contains(&Notification::HistoryChanged { can_undo: true, can_redo: false }));

        assert!(d.move_layer_down(1, Instant::now()));
        assert!(!d.move_layer_down(0, Instant::now()));
        // The active selection followed the moved layer down.
        assert_eq!(d.canvas.active_layer_index, 0);
        assert!(d.select_layer(1));
        assert!(!d.select_layer(1));
        assert!(!d.select_layer(7));

        d.undo(Instant::now());
        d.undo(Instant::now());
        assert_eq!(d.canvas.layers.len(), 1);
        assert!(d.take_notifications().contains(&Notification::HistoryChanged {
            can_undo: false,
            can_redo: true
        }));
    }

    #[test]
    fn resize_clears_history_and_reports_loss() {
        let mut d = doc(4, 4);
        let t0 = Instant::now();
        d.press(3, 3, &pencil(RED), t0).unwrap();
        d.release(3, 3, t0);
        assert_eq!(d.plan_resize(2, 2).dropped_pixels, 1);
        assert!(d.resize(0, 2).is_err());

        let impact = d.resize(2, 2).unwrap();
        assert!(impact.orphans_all_content);
        assert!(!d.history.can_undo());
        let notes = d.take_notifications();
        assert!(notes.contains(&Notification::RegionInvalidated(Invalidation::Full)));
        assert!(notes.contains(&Notification::LayerListChanged));
    }

    #[test]
    fn discrete_edits_debounce_on_host_clock() {
        let mut d = doc(4, 4);
        let host = Instant::now() + Duration::from_secs(3600);
        d.press(1, 1, &pencil(RED), host).unwrap();
        d.release(1, 1, host);
        d.tick(host + 30 * MS);

        d.undo(host + 100 * MS);
        assert_eq!(d.next_deadline(), Some(host + 130 * MS));
        d.tick(host + 130 * MS);

        d.add_layer(host + 200 * MS);
        assert_eq!(d.next_deadline(), Some(host + 230 * MS));
        d.tick(host + 230 * MS);

        d.set_background(Background::Solid(Rgb([0, 0, 0])), host + 300 * MS);
        assert_eq!(d.next_deadline(), Some(host + 330 * MS));
        assert!(!d.tick(host + 329 * MS));
        assert!(d.tick(host + 330 * MS));
        assert!(d
            .take_notifications()
            .contains(&Notification::RegionInvalidated(Invalidation::Full)));
    }

    #[test]
    fn shrinking_shape_reports_dropped_chunks() {
        let mut d = doc(64, 64);
        let rect = ToolOptions {
            tool: ToolKind::Shape,
            shape: ShapeKind::Rectangle,
            fill_shape: true,
            color: RED,
            ..ToolOptions::default()
        };
        let t0 = Instant::now();
        d.press(0, 0, &rect, t0).unwrap();
        d.drag(40, 40, t0);
        d.tick(t0);
        d.take_notifications();

        d.drag(5, 5, t0 + MS);
        d.tick(t0 + 10 * MS);
        let notes = d.take_notifications();
        assert!(notes.contains(&Notification::PreviewUpdated(vec![(0, 0), (1, 0), (0, 1), (1, 1)])));
        assert!(d.preview.chunk((1, 1)).is_none());
        assert!(d.preview.chunk((0, 0)).is_some());
    }

    #[test]
    fn extreme_shape_drag_is_clipped() {
        let mut d = doc(8, 8);
        let ellipse = ToolOptions {
            tool: ToolKind::Shape,
            shape: ShapeKind::Ellipse,
            fill_shape: true,
            color: RED,
            ..ToolOptions::default()
        };
        let t0 = Instant::now();
        d.press(2, 2, &ellipse, t0).unwrap();
        d.drag(i32::MIN, 2, t0);
        d.drag(i32::MAX, i32::MIN, t0);
        d.drag(6002, 6002, t0);
        assert!(d.release(6002, 6002, t0));
        assert_eq!(d.canvas.layers[0].pixels.len(), 64);
    }

    #[test]
    fn eyedropper_reads_topmost_visible() {
        let mut d = doc(2, 2);
        let t0 = Instant::now();
        d.press(0, 0, &pencil(RED), t0).unwrap();
        d.release(0, 0, t0);
        assert_eq!(d.pick_color(0, 0), Some(Pixel::new(RED, 255)));
        assert_eq!(d.pick_color(1, 1), None);
        assert_eq!(d.pick_color(5, 0), None);
    }
}
