use std::time::Instant;

use image::{Rgb, Rgba, RgbaImage};
use pixelcanvas::canvas::Pixel;
use pixelcanvas::components::tools::{ToolKind, ToolOptions};
use pixelcanvas::io::LoadError;
use pixelcanvas::settings::EngineSettings;
use pixelcanvas::Document;

fn paint(doc: &mut Document, x: i32, y: i32, color: Rgb<u8>, alpha: u8) {
    let opts = ToolOptions {
        tool: ToolKind::Pencil,
        color,
        alpha,
        ..ToolOptions::default()
    };
    let now = Instant::now();
    doc.press(x, y, &opts, now).unwrap();
    doc.release(x, y, now);
}

#[test]
fn png_export_then_open_keeps_pixels() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sprite.png");
    let settings = EngineSettings::default();

    let mut doc = Document::new_document(5, 3, &settings).unwrap();
    paint(&mut doc, 0, 0, Rgb([255, 0, 0]), 255);
    paint(&mut doc, 4, 2, Rgb([0, 0, 255]), 100);
    doc.export_png(&path).unwrap();

    let (opened, report) = Document::open(&path, &settings).unwrap();
    assert_eq!(report.new_size, (5, 3));
    assert!(report.resized());
    assert_eq!(opened.name, "sprite.png");
    assert!(!opened.is_dirty);
    assert!(!opened.history.can_undo());

    let layer = &opened.canvas.layers[0];
    assert_eq!(layer.name, "sprite");
    assert_eq!(layer.pixels.len(), 2);
    assert_eq!(layer.pixels.get(4, 2), Some(Pixel::rgba(0, 0, 255, 100)));
}

#[test]
fn export_flattens_onto_background_when_asked() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flat.png");
    let mut doc = Document::new_document(2, 1, &EngineSettings::default()).unwrap();
    paint(&mut doc, 0, 0, Rgb([0, 0, 0]), 255);
    doc.set_save_background(Some(Rgb([255, 255, 255])));
    doc.export_png(&path).unwrap();

    let img = image::open(&path).unwrap().to_rgba8();
    assert_eq!(*img.get_pixel(0, 0), Rgba([0, 0, 0, 255]));
    assert_eq!(*img.get_pixel(1, 0), Rgba([255, 255, 255, 255]));
}

#[test]
fn project_round_trip_keeps_layers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scene.pxc");
    let settings = EngineSettings::default();

    let mut doc = Document::new_document(4, 4, &settings).unwrap();
    paint(&mut doc, 1, 1, Rgb([10, 20, 30]), 40);
    doc.add_layer(Instant::now());
    paint(&mut doc, 2, 2, Rgb([200, 100, 0]), 255);
    doc.set_layer_opacity(1, 77, Instant::now());
    doc.set_layer_visibility(0, false, Instant::now());
    doc.save_project(&path).unwrap();
    assert!(!doc.is_dirty);
    assert_eq!(doc.display_title(), "scene.pxc");

    let (opened, _) = Document::open(&path, &settings).unwrap();
    assert_eq!(opened.canvas.layers.len(), 2);
    assert_eq!(opened.canvas.active_layer_index, 1);
    assert!(!opened.canvas.layers[0].visible);
    assert_eq!(opened.canvas.layers[1].opacity, 77);
    assert_eq!(opened.canvas.layers[0].pixels.get(1, 1), Some(Pixel::rgba(10, 20, 30, 40)));
    assert_eq!(opened.canvas.layers[1].pixels.get(2, 2), Some(Pixel::rgba(200, 100, 0, 255)));
}

#[test]
fn failed_import_leaves_document_alone() {
    let dir = tempfile::tempdir().unwrap();
    let bad = dir.path().join("broken.png");
    std::fs::write(&bad, b"definitely not a png").unwrap();

    let mut doc = Document::new_document(3, 3, &EngineSettings::default()).unwrap();
    paint(&mut doc, 1, 1, Rgb([1, 2, 3]), 255);
    assert!(matches!(doc.import_image(&bad), Err(LoadError::Decode(_))));
    assert!(matches!(
        doc.import_image(&dir.path().join("missing.png")),
        Err(LoadError::Io(_))
    ));
    assert_eq!(doc.canvas.layers[0].pixels.len(), 1);
    assert!(doc.history.can_undo());
}

#[test]
fn import_replaces_content_and_reports_resize() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tile.png");
    let mut img = RgbaImage::new(6, 2);
    img.put_pixel(5, 1, Rgba([9, 9, 9, 255]));
    img.save(&path).unwrap();

    let mut doc = Document::new_document(3, 3, &EngineSettings::default()).unwrap();
    let id = doc.id;
    paint(&mut doc, 0, 0, Rgb([1, 2, 3]), 255);
    let report = doc.import_image(&path).unwrap();

    assert_eq!(report.previous_size, (3, 3));
    assert_eq!(report.new_size, (6, 2));
    assert_eq!(doc.id, id);
    assert!(!doc.history.can_undo());
    assert_eq!(doc.canvas.layers.len(), 1);
    assert_eq!(doc.canvas.layers[0].pixels.get(5, 1), Some(Pixel::rgba(9, 9, 9, 255)));
    assert_eq!(doc.render().dimensions(), (6, 2));
}
