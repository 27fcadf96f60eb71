// ============================================================================
// PixelCanvas CLI: headless editing through a line-based op script
// ============================================================================
//
// Usage examples:
//   PixelCanvas --width 16 --height 16 --op "color #FF0000" --op "fill 0,0" -o red.png
//   PixelCanvas -i sprite.png -s outline.ops -o sprite_out.png
//   PixelCanvas -i art.pxc --op "layer hide" -o flat.png --background #000000 --save-background
//
// Each op runs through the same Document entry points an interactive host
// uses, so strokes, fills and layer edits land in history exactly as they
// would from the pointer.

use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use image::Rgb;

use crate::canvas::parse_hex_color;
use crate::components::tools::{ToolKind, ToolOptions};
use crate::io::is_project_path;
use crate::ops::shapes::ShapeKind;
use crate::project::Document;
use crate::settings::EngineSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// PixelCanvas headless pixel editor.
#[derive(Parser, Debug)]
#[command(
    name = "PixelCanvas",
    about = "Headless layered pixel-art editor",
    long_about = "Create or open a canvas, replay drawing operations on it and write\n\
                  the result as a PNG/BMP/TGA image or a .pxc layered project.\n\n\
                  Example:\n  \
                  PixelCanvas --width 8 --height 8 --op \"color #00FF00\" --op \"fill 0,0\" -o green.png"
)]
pub struct CliArgs {
    /// Image or .pxc project to start from. A blank canvas is created when omitted.
    #[arg(short, long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Width of a new canvas (1-2048).
    #[arg(long, value_name = "PX", conflicts_with = "input")]
    pub width: Option<u32>,

    /// Height of a new canvas (1-2048).
    #[arg(long, value_name = "PX", conflicts_with = "input")]
    pub height: Option<u32>,

    /// Op script file, one operation per line. `#` starts a comment.
    #[arg(short, long, value_name = "SCRIPT")]
    pub script: Option<PathBuf>,

    /// A single operation, run after the script. May be repeated.
    #[arg(long = "op", value_name = "OP")]
    pub ops: Vec<String>,

    /// Output file. `.pxc` keeps the layers; anything else is flattened.
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Background color (#RRGGBB) for flattened output.
    #[arg(long, value_name = "COLOR")]
    pub background: Option<String>,

    /// Flatten onto the background color instead of keeping transparency.
    #[arg(long)]
    pub save_background: bool,

    /// Blend partially transparent paint with what is already there.
    #[arg(long)]
    pub blend: bool,

    /// Print each op as it runs and mirror the log to stderr.
    #[arg(short, long)]
    pub verbose: bool,

    /// Write the session log here instead of the default location.
    #[arg(long, value_name = "FILE")]
    pub log: Option<PathBuf>,
}

// ============================================================================
// Op script
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayerOp {
    Add,
    Delete,
    Duplicate,
    Up,
    Down,
    Merge,
    Select(usize),
    Rename(String),
    Opacity(u8),
    Hide,
    Show,
}

/// One line of an op script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptOp {
    Color(Rgb<u8>),
    Alpha(u8),
    Brush(u32),
    Blend(bool),
    Pencil(Vec<(i32, i32)>),
    Erase(Vec<(i32, i32)>),
    Line((i32, i32), (i32, i32)),
    Rect { from: (i32, i32), to: (i32, i32), filled: bool },
    Ellipse { center: (i32, i32), to: (i32, i32), filled: bool },
    Fill(i32, i32),
    Layer(LayerOp),
    Undo,
    Redo,
    Resize(u32, u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    /// 1-based line number.
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ScriptError {}

fn parse_point(token: &str) -> Result<(i32, i32), String> {
    let (x, y) = token
        .split_once(',')
        .ok_or_else(|| format!("expected x,y but got '{}'", token))?;
    let x = x.trim().parse().map_err(|_| format!("bad x coordinate in '{}'", token))?;
    let y = y.trim().parse().map_err(|_| format!("bad y coordinate in '{}'", token))?;
    Ok((x, y))
}

fn parse_number<T: std::str::FromStr>(token: Option<&str>, what: &str) -> Result<T, String> {
    let token = token.ok_or_else(|| format!("missing {}", what))?;
    token.parse().map_err(|_| format!("bad {} '{}'", what, token))
}

fn parse_points(tokens: &[&str]) -> Result<Vec<(i32, i32)>, String> {
    if tokens.is_empty() {
        return Err("expected at least one x,y point".into());
    }
    tokens.iter().map(|t| parse_point(t)).collect()
}

fn parse_two_points(tokens: &[&str]) -> Result<((i32, i32), (i32, i32), bool), String> {
    let filled = match tokens.get(2) {
        None => false,
        Some(&"fill") => true,
        Some(other) => return Err(format!("unexpected '{}'", other)),
    };
    match tokens {
        [a, b, ..] if tokens.len() <= 3 => Ok((parse_point(a)?, parse_point(b)?, filled)),
        _ => Err("expected two x,y points".into()),
    }
}

fn parse_layer_op(line: &str, tokens: &[&str]) -> Result<LayerOp, String> {
    let sub = tokens.first().ok_or("missing layer operation")?;
    Ok(match *sub {
        "add" => LayerOp::Add,
        "delete" => LayerOp::Delete,
        "duplicate" => LayerOp::Duplicate,
        "up" => LayerOp::Up,
        "down" => LayerOp::Down,
        "merge" => LayerOp::Merge,
        "hide" => LayerOp::Hide,
        "show" => LayerOp::Show,
        "select" => LayerOp::Select(parse_number(tokens.get(1).copied(), "layer index")?),
        "opacity" => LayerOp::Opacity(parse_number(tokens.get(1).copied(), "opacity")?),
        "rename" => {
            // Everything after "rename" is the name, spaces included.
            let name = line
                .trim_start()
                .strip_prefix("layer")
                .map(str::trim_start)
                .and_then(|rest| rest.strip_prefix("rename"))
                .map(str::trim)
                .unwrap_or_default();
            if name.is_empty() {
                return Err("missing layer name".into());
            }
            LayerOp::Rename(name.to_string())
        }
        other => return Err(format!("unknown layer operation '{}'", other)),
    })
}

/// A `#` opening the line, or followed by whitespace, starts a comment.
/// `#RRGGBB` colors are left alone.
fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    let bytes = line.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'#' && bytes.get(i + 1).is_none_or(|c| c.is_ascii_whitespace()) {
            return &line[..i];
        }
    }
    line
}

/// Parse one script line. Blank lines and comments yield `None`.
pub fn parse_op(line: &str) -> Result<Option<ScriptOp>, String> {
    let content = strip_comment(line);
    let tokens: Vec<&str> = content.split_whitespace().collect();
    let Some((&cmd, args)) = tokens.split_first() else {
        return Ok(None);
    };

    let op = match cmd {
        "color" => {
            let hex = args.first().ok_or("missing color")?;
            ScriptOp::Color(parse_hex_color(hex).ok_or_else(|| format!("bad color '{}'", hex))?)
        }
        "alpha" => ScriptOp::Alpha(parse_number(args.first().copied(), "alpha")?),
        "brush" => {
            let size: u32 = parse_number(args.first().copied(), "brush size")?;
            if size == 0 {
                return Err("brush size must be at least 1".into());
            }
            ScriptOp::Brush(size)
        }
        "blend" => match args.first().copied() {
            Some("on") => ScriptOp::Blend(true),
            Some("off") => ScriptOp::Blend(false),
            _ => return Err("expected 'blend on' or 'blend off'".into()),
        },
        "pencil" => ScriptOp::Pencil(parse_points(args)?),
        "erase" => ScriptOp::Erase(parse_points(args)?),
        "line" => match args {
            [a, b] => ScriptOp::Line(parse_point(a)?, parse_point(b)?),
            _ => return Err("expected two x,y points".into()),
        },
        "rect" => {
            let (from, to, filled) = parse_two_points(args)?;
            ScriptOp::Rect { from, to, filled }
        }
        "ellipse" => {
            let (center, to, filled) = parse_two_points(args)?;
            ScriptOp::Ellipse { center, to, filled }
        }
        "fill" => match args {
            [p] => {
                let (x, y) = parse_point(p)?;
                ScriptOp::Fill(x, y)
            }
            _ => return Err("expected one x,y point".into()),
        },
        "layer" => ScriptOp::Layer(parse_layer_op(content, args)?),
        "undo" => ScriptOp::Undo,
        "redo" => ScriptOp::Redo,
        "resize" => ScriptOp::Resize(
            parse_number(args.first().copied(), "width")?,
            parse_number(args.get(1).copied(), "height")?,
        ),
        other => return Err(format!("unknown operation '{}'", other)),
    };
    Ok(Some(op))
}

pub fn parse_script(source: &str) -> Result<Vec<ScriptOp>, ScriptError> {
    let mut ops = Vec::new();
    for (i, line) in source.lines().enumerate() {
        match parse_op(line) {
            Ok(Some(op)) => ops.push(op),
            Ok(None) => {}
            Err(message) => return Err(ScriptError { line: i + 1, message }),
        }
    }
    Ok(ops)
}

// ============================================================================
// Replaying ops on a document
// ============================================================================

/// Tool state carried between ops, like the toolbar of an interactive host.
pub struct ScriptRunner {
    pub options: ToolOptions,
    clock: Instant,
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptRunner {
    pub fn new() -> Self {
        Self {
            options: ToolOptions::default(),
            clock: Instant::now(),
        }
    }

    fn with_tool(&self, tool: ToolKind) -> ToolOptions {
        ToolOptions {
            tool,
            ..self.options.clone()
        }
    }

    fn gesture(&mut self, doc: &mut Document, points: &[(i32, i32)], options: &ToolOptions) -> Result<(), String> {
        let Some((&(x0, y0), rest)) = points.split_first() else {
            return Ok(());
        };
        let now = self.clock;
        doc.press(x0, y0, options, now).map_err(|e| e.to_string())?;
        let (lx, ly) = rest.last().copied().unwrap_or((x0, y0));
        for &(x, y) in rest.iter().take(rest.len().saturating_sub(1)) {
            doc.drag(x, y, now);
        }
        doc.release(lx, ly, now);
        Ok(())
    }

    fn shape(&mut self, doc: &mut Document, shape: ShapeKind, from: (i32, i32), to: (i32, i32), filled: bool) -> Result<(), String> {
        let options = ToolOptions {
            shape,
            fill_shape: filled,
            ..self.with_tool(ToolKind::Shape)
        };
        self.gesture(doc, &[from, to], &options)
    }

    fn layer(&mut self, doc: &mut Document, op: &LayerOp) -> Result<(), String> {
        let active = doc.canvas.active_layer_index;
        let now = self.clock;
        let done = match op {
            LayerOp::Add => {
                doc.add_layer(now);
                true
            }
            LayerOp::Delete => doc.delete_layer(active, now),
            LayerOp::Duplicate => doc.duplicate_layer(active, now).is_some(),
            LayerOp::Up => doc.move_layer_up(active, now),
            LayerOp::Down => doc.move_layer_down(active, now),
            LayerOp::Merge => doc.merge_down(active, now),
            LayerOp::Select(index) => *index < doc.canvas.layers.len() && {
                doc.select_layer(*index);
                true
            },
            LayerOp::Rename(name) => {
                doc.rename_layer(active, name, now);
                true
            }
            LayerOp::Opacity(value) => {
                doc.set_layer_opacity(active, *value, now);
                true
            }
            LayerOp::Hide => {
                doc.set_layer_visibility(active, false, now);
                true
            }
            LayerOp::Show => {
                doc.set_layer_visibility(active, true, now);
                true
            }
        };
        if done {
            Ok(())
        } else {
            Err(format!("layer operation {:?} refused on layer {}", op, active))
        }
    }

    /// Apply one op to `doc`.
    pub fn apply(&mut self, doc: &mut Document, op: &ScriptOp) -> Result<(), String> {
        match op {
            ScriptOp::Color(c) => self.options.color = *c,
            ScriptOp::Alpha(a) => self.options.alpha = *a,
            ScriptOp::Brush(size) => self.options.brush_size = *size,
            ScriptOp::Blend(on) => doc.set_color_blending(*on),
            ScriptOp::Pencil(points) => {
                let options = self.with_tool(ToolKind::Pencil);
                self.gesture(doc, points, &options)?;
            }
            ScriptOp::Erase(points) => {
                let options = self.with_tool(ToolKind::Eraser);
                self.gesture(doc, points, &options)?;
            }
            ScriptOp::Line(from, to) => self.shape(doc, ShapeKind::Line, *from, *to, false)?,
            ScriptOp::Rect { from, to, filled } => self.shape(doc, ShapeKind::Rectangle, *from, *to, *filled)?,
            ScriptOp::Ellipse { center, to, filled } => {
                self.shape(doc, ShapeKind::Ellipse, *center, *to, *filled)?
            }
            ScriptOp::Fill(x, y) => {
                let options = self.with_tool(ToolKind::Fill);
                self.gesture(doc, &[(*x, *y)], &options)?;
            }
            ScriptOp::Layer(op) => self.layer(doc, op)?,
            ScriptOp::Undo => {
                if doc.undo(self.clock).is_none() {
                    log_warn!("undo: nothing to undo");
                }
            }
            ScriptOp::Redo => {
                if doc.redo(self.clock).is_none() {
                    log_warn!("redo: nothing to redo");
                }
            }
            ScriptOp::Resize(w, h) => {
                let impact = doc.resize(*w, *h).map_err(|e| e.to_string())?;
                if impact.orphans_all_content {
                    log_warn!("resize to {}x{} dropped every pixel", w, h);
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the CLI and return an OS exit code.
/// `0` = output written, `1` = any failure.
pub fn run(args: CliArgs) -> ExitCode {
    match run_inner(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log_err!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_inner(args: &CliArgs) -> Result<(), String> {
    let start = Instant::now();
    let mut settings = EngineSettings::load();
    if args.blend {
        settings.color_blending = true;
    }
    if let Some(hex) = &args.background {
        settings.background_color =
            parse_hex_color(hex).ok_or_else(|| format!("bad background color '{}'", hex))?;
    }
    settings.save_background = args.save_background;

    // Parse everything up front so a typo fails before any work is done.
    let mut ops = Vec::new();
    if let Some(path) = &args.script {
        let source = std::fs::read_to_string(path)
            .map_err(|e| format!("could not read script '{}': {}", path.display(), e))?;
        ops = parse_script(&source).map_err(|e| format!("{}: {}", path.display(), e))?;
    }
    for (i, line) in args.ops.iter().enumerate() {
        if let Some(op) = parse_op(line).map_err(|e| format!("--op #{}: {}", i + 1, e))? {
            ops.push(op);
        }
    }

    let mut doc = match &args.input {
        Some(path) => {
            let (doc, report) = Document::open(path, &settings).map_err(|e| format!("load failed: {}", e))?;
            if args.verbose {
                println!("Opened {} ({}x{})", path.display(), report.new_size.0, report.new_size.1);
            }
            doc
        }
        None => {
            let width = args.width.unwrap_or(settings.default_width);
            let height = args.height.unwrap_or(settings.default_height);
            Document::new_document(width, height, &settings).map_err(|e| e.to_string())?
        }
    };

    let mut runner = ScriptRunner::new();
    for (i, op) in ops.iter().enumerate() {
        if args.verbose {
            println!("[{}/{}] {:?}", i + 1, ops.len(), op);
        }
        runner
            .apply(&mut doc, op)
            .map_err(|e| format!("op {} ({:?}): {}", i + 1, op, e))?;
    }

    if is_project_path(&args.output) {
        doc.save_project(&args.output)
    } else {
        doc.export_png(&args.output)
    }
    .map_err(|e| format!("save failed: {}", e))?;

    if args.verbose {
        println!(
            "  → {} ({:.0}ms)",
            args.output.display(),
            start.elapsed().as_secs_f64() * 1000.0
        );
    }
    Ok(())
}
