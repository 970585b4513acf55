//! Status rendering: a text summary plus an 800x500 PNG.
//!
//! Rendering is a pure function of a [`RegistrySnapshot`]. The image is drawn
//! pixel by pixel into an [`RgbImage`]; it carries colour only, the numbers
//! live in the caption text.

use std::fmt::Write as _;
use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};
use laundry_proto::{Artifact, MachineClass};
use thiserror::Error;

use crate::registry::{MachineRecord, RegistrySnapshot};

pub const WIDTH: u32 = 800;
pub const HEIGHT: u32 = 500;

const BACKGROUND: Rgb<u8> = Rgb([40, 44, 52]);
const FOREGROUND: Rgb<u8> = Rgb([220, 223, 228]);

const GRID_X: u32 = 200;
const BOX_W: u32 = 100;
const BOX_H: u32 = 80;
const GAP: u32 = 15;
const COLUMNS: u32 = 5;
const RADIUS: u32 = 10;
/// Top edge of each class section.
const SECTION_TOPS: [(MachineClass, u32); 2] =
    [(MachineClass::Washer, 40), (MachineClass::Dryer, 260)];
/// Vertical room for a section's grid; two full-size rows.
const SECTION_H: u32 = 2 * BOX_H + GAP;
const ICON_X: u32 = 50;
const ICON_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to encode status image: {0}")]
    Encode(#[from] image::ImageError),
}

/// Colour band of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Free,
    NearDue,
    Overdue,
}

impl Tier {
    pub fn from_minutes(minutes: u32) -> Self {
        match minutes {
            0 => Tier::Free,
            1..=10 => Tier::NearDue,
            _ => Tier::Overdue,
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Tier::Free => "🟩",
            Tier::NearDue => "🟧",
            Tier::Overdue => "🟥",
        }
    }

    pub fn color(self) -> Rgb<u8> {
        match self {
            Tier::Free => Rgb([46, 204, 113]),
            Tier::NearDue => Rgb([241, 196, 15]),
            Tier::Overdue => Rgb([231, 76, 60]),
        }
    }
}

/// Turns a snapshot into something deliverable.
pub trait Render: Send + Sync {
    fn render(&self, snapshot: &RegistrySnapshot) -> Result<Artifact, RenderError>;
}

/// The stock renderer.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusRenderer;

impl Render for StatusRenderer {
    fn render(&self, snapshot: &RegistrySnapshot) -> Result<Artifact, RenderError> {
        Ok(Artifact {
            text: status_text(snapshot),
            image: status_image(snapshot)?,
        })
    }
}

/// One line per machine, e.g. `Washer 03: 🟧 (7 min remaining)`.
pub fn status_line(record: &MachineRecord) -> String {
    let tier = Tier::from_minutes(record.remaining_minutes);
    let label = record.class.label();
    match tier {
        Tier::Free => format!("{label} {:02}: {}", record.slot, tier.emoji()),
        _ => format!(
            "{label} {:02}: {} ({} min remaining)",
            record.slot,
            tier.emoji(),
            record.remaining_minutes
        ),
    }
}

/// Full caption: every slot grouped by class, then the snapshot time.
pub fn status_text(snapshot: &RegistrySnapshot) -> String {
    let mut out = String::new();
    for class in MachineClass::ALL {
        let _ = writeln!(out, "{}", class.plural_label());
        for record in snapshot.class(class) {
            let _ = writeln!(out, "{}", status_line(record));
        }
        out.push('\n');
    }
    let _ = write!(out, "updated {} UTC", snapshot.taken_at().format("%H:%M"));
    out
}

/// PNG bytes of the status board.
pub fn status_image(snapshot: &RegistrySnapshot) -> Result<Vec<u8>, RenderError> {
    let mut canvas = RgbImage::from_pixel(WIDTH, HEIGHT, BACKGROUND);
    for (class, top) in SECTION_TOPS {
        let slots = u32::try_from(snapshot.class(class).count()).unwrap_or(u32::MAX);
        let grid = SlotGrid::new(top, slots);
        draw_section(&mut canvas, class, &grid, snapshot.class(class));
    }

    let mut bytes = Cursor::new(Vec::new());
    canvas.write_to(&mut bytes, ImageFormat::Png)?;
    Ok(bytes.into_inner())
}

/// Box placement for one class section.
///
/// Up to two rows use full-size boxes. Larger banks shrink the rows so every
/// slot still fits inside [`SECTION_H`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotGrid {
    top: u32,
    row_pitch: u32,
    box_h: u32,
}

impl SlotGrid {
    pub fn new(top: u32, slots: u32) -> Self {
        let rows = slots.div_ceil(COLUMNS).max(1);
        let row_pitch = ((SECTION_H + GAP) / rows).min(BOX_H + GAP);
        let gap = GAP.min(row_pitch / 5);
        Self {
            top,
            row_pitch,
            box_h: (row_pitch - gap).max(1),
        }
    }

    /// Top-left corner of the box at `index` (0-based).
    pub fn origin(&self, index: u32) -> (u32, u32) {
        let row = index / COLUMNS;
        let col = index % COLUMNS;
        (GRID_X + col * (BOX_W + GAP), self.top + row * self.row_pitch)
    }

    pub fn box_size(&self) -> (u32, u32) {
        (BOX_W, self.box_h)
    }

    fn radius(&self) -> u32 {
        RADIUS.min(self.box_h / 2)
    }
}

fn draw_section<'a>(
    canvas: &mut RgbImage,
    class: MachineClass,
    grid: &SlotGrid,
    records: impl Iterator<Item = &'a MachineRecord>,
) {
    draw_icon(canvas, class, ICON_X, grid.top + 20);
    let (w, h) = grid.box_size();
    for (index, record) in (0u32..).zip(records) {
        let (x, y) = grid.origin(index);
        let color = Tier::from_minutes(record.remaining_minutes).color();
        fill_rounded(canvas, x, y, w, h, grid.radius(), color);
    }
}

fn draw_icon(canvas: &mut RgbImage, class: MachineClass, x: u32, y: u32) {
    fill_rounded(canvas, x, y, ICON_SIZE, ICON_SIZE, 12, FOREGROUND);
    // Washer: round door. Dryer: square lint panel.
    let inset = 25;
    let inner = ICON_SIZE - 2 * inset;
    let radius = match class {
        MachineClass::Washer => inner / 2,
        MachineClass::Dryer => 6,
    };
    fill_rounded(
        canvas,
        x + inset,
        y + inset,
        inner,
        inner,
        radius,
        BACKGROUND,
    );
}

/// Fills a rectangle with rounded corners, clipped to the canvas.
fn fill_rounded(
    canvas: &mut RgbImage,
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    radius: u32,
    color: Rgb<u8>,
) {
    let (cw, ch) = canvas.dimensions();
    let r = i64::from(radius);
    let (left, top) = (i64::from(x), i64::from(y));
    let (right, bottom) = (left + i64::from(w) - 1, top + i64::from(h) - 1);

    for py in y..(y + h).min(ch) {
        for px in x..(x + w).min(cw) {
            let (fx, fy) = (i64::from(px), i64::from(py));
            let cx = fx.clamp(left + r, (right - r).max(left + r));
            let cy = fy.clamp(top + r, (bottom - r).max(top + r));
            let (dx, dy) = (fx - cx, fy - cy);
            if dx * dx + dy * dy <= r * r {
                canvas.put_pixel(px, py, color);
            }
        }
    }
}
