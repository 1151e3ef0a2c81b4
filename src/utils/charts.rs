//! Chart and image rendering for training logs
//!
//! The confusion matrix is drawn as a standalone SVG heat-map for the run's
//! log directory. The same colour ramp also produces square RGB rasters
//! (row-major, interleaved) for the TensorBoard image summaries, alongside a
//! tiled view of the first convolution's kernels.

/// Chart styling constants
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 40.0;
const MARGIN_LEFT: f64 = 80.0;
const COLOR_TEXT: &str = "#2c3e50";

/// Heat-map cell size in pixels
const CELL_SIZE: f64 = 60.0;

/// Blues colour ramp end points
const HEAT_LOW: (f64, f64, f64) = (247.0, 251.0, 255.0);
const HEAT_HIGH: (f64, f64, f64) = (8.0, 48.0, 107.0);

/// Text colour for a heat-map cell: white on dark cells, black otherwise
pub fn cell_text_color(value: f64, max_value: f64) -> &'static str {
    if value > max_value / 2.0 {
        "white"
    } else {
        "black"
    }
}

/// Render a confusion-matrix heat-map to an SVG string
///
/// `values` is square (row = true label, column = predicted label). Cell
/// annotations are integers, or two decimals when `normalized`.
pub fn render_heatmap(title: &str, values: &[Vec<f64>], labels: &[String], normalized: bool) -> String {
    let n = values.len();
    let label_margin = 20.0
        + labels
            .iter()
            .map(|l| l.chars().count())
            .max()
            .unwrap_or(1) as f64
            * 7.0;
    let grid = n as f64 * CELL_SIZE;
    let left = MARGIN_LEFT.max(label_margin + 30.0);
    let top = MARGIN_TOP;
    let width = left + grid + MARGIN_RIGHT;
    let height = top + grid + label_margin + 50.0;

    let max_value = values
        .iter()
        .flatten()
        .copied()
        .fold(0.0f64, f64::max);

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {} {}" width="{}" height="{}">"#,
        width, height, width, height
    ));
    svg.push_str(&format!(
        r#"<rect width="{}" height="{}" fill="white"/>"#,
        width, height
    ));
    svg.push_str(&format!(
        r#"<text x="{}" y="35" text-anchor="middle" font-family="Arial, sans-serif" font-size="18" font-weight="bold" fill="{}">{}</text>"#,
        left + grid / 2.0, COLOR_TEXT, escape_xml(title)
    ));

    for (row, row_values) in values.iter().enumerate() {
        for (col, &value) in row_values.iter().enumerate() {
            let x = left + col as f64 * CELL_SIZE;
            let y = top + row as f64 * CELL_SIZE;
            let text = if normalized {
                format!("{:.2}", value)
            } else {
                format!("{}", value.round() as i64)
            };

            svg.push_str(&format!(
                r#"<rect x="{}" y="{}" width="{}" height="{}" fill="{}" stroke="white" stroke-width="1"/>"#,
                x, y, CELL_SIZE, CELL_SIZE, heat_color(value, max_value)
            ));
            svg.push_str(&format!(
                r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="13" fill="{}">{}</text>"#,
                x + CELL_SIZE / 2.0, y + CELL_SIZE / 2.0 + 5.0, cell_text_color(value, max_value), text
            ));
        }
    }

    // Tick labels: rows on the left, columns rotated below the grid
    for (i, label) in labels.iter().enumerate().take(n) {
        let center = i as f64 * CELL_SIZE + CELL_SIZE / 2.0;
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
            left - 8.0, top + center + 4.0, COLOR_TEXT, escape_xml(label)
        ));
        let lx = left + center;
        let ly = top + grid + 14.0;
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="12" fill="{}" transform="rotate(-45 {} {})">{}</text>"#,
            lx, ly, COLOR_TEXT, lx, ly, escape_xml(label)
        ));
    }

    svg.push_str(&format!(
        r#"<text x="20" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}" transform="rotate(-90 20 {})">True label</text>"#,
        top + grid / 2.0, COLOR_TEXT, top + grid / 2.0
    ));
    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}">Predicted label</text>"#,
        left + grid / 2.0, height - 15.0, COLOR_TEXT
    ));

    svg.push_str("</svg>");
    svg
}

fn heat_rgb(value: f64, max_value: f64) -> [u8; 3] {
    let t = if max_value > 0.0 { (value / max_value).clamp(0.0, 1.0) } else { 0.0 };
    let mix = |lo: f64, hi: f64| (lo + (hi - lo) * t).round() as u8;
    [
        mix(HEAT_LOW.0, HEAT_HIGH.0),
        mix(HEAT_LOW.1, HEAT_HIGH.1),
        mix(HEAT_LOW.2, HEAT_HIGH.2),
    ]
}

fn heat_color(value: f64, max_value: f64) -> String {
    let [r, g, b] = heat_rgb(value, max_value);
    format!("#{:02x}{:02x}{:02x}", r, g, b)
}

/// Square RGB image, pixels interleaved row by row
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub side: usize,
    pub pixels: Vec<u8>,
}

impl Raster {
    fn new(side: usize, fill: [u8; 3]) -> Self {
        Self {
            side,
            pixels: fill.repeat(side * side),
        }
    }

    fn fill_square(&mut self, x: usize, y: usize, size: usize, color: [u8; 3]) {
        for row in y..(y + size).min(self.side) {
            for col in x..(x + size).min(self.side) {
                let at = (row * self.side + col) * 3;
                self.pixels[at..at + 3].copy_from_slice(&color);
            }
        }
    }

    /// TensorBoard `[channels, height, width]` dims of the raster
    pub fn dims(&self) -> [usize; 3] {
        [3, self.side, self.side]
    }
}

/// Confusion-matrix heat-map as a raster, `cell_px` pixels per cell
pub fn heatmap_raster(values: &[Vec<f64>], cell_px: usize) -> Raster {
    let n = values.len();
    let max_value = values.iter().flatten().copied().fold(0.0f64, f64::max);
    let mut raster = Raster::new((n * cell_px).max(1), [255, 255, 255]);
    for (row, row_values) in values.iter().enumerate() {
        for (col, &value) in row_values.iter().enumerate().take(n) {
            raster.fill_square(col * cell_px, row * cell_px, cell_px, heat_rgb(value, max_value));
        }
    }
    raster
}

/// Tile conv kernels `[out, in, k, k]` into a square grid with 1px gaps
///
/// Each kernel becomes one RGB tile from its first three input channels
/// (single-channel kernels are shown in grey). Values are min-max scaled
/// over the whole layer.
pub fn kernel_grid_raster(values: &[f32], dims: [usize; 4], scale: usize) -> Raster {
    let [filters, in_channels, kh, kw] = dims;
    let k = kh.max(kw).max(1);
    let scale = scale.max(1);
    let columns = (filters as f64).sqrt().ceil().max(1.0) as usize;
    let tile = k * scale + 1;
    let mut raster = Raster::new(columns * tile + 1, [0, 0, 0]);

    let (lo, hi) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = if hi > lo { hi - lo } else { 1.0 };
    let level = |v: f32| (((v - lo) / range).clamp(0.0, 1.0) * 255.0).round() as u8;

    for filter in 0..filters {
        let origin_x = (filter % columns) * tile + 1;
        let origin_y = (filter / columns) * tile + 1;
        for y in 0..kh {
            for x in 0..kw {
                let channel = |c: usize| {
                    let c = c.min(in_channels.saturating_sub(1));
                    values
                        .get(((filter * in_channels + c) * kh + y) * kw + x)
                        .copied()
                        .map(level)
                        .unwrap_or(0)
                };
                let color = [channel(0), channel(1), channel(2)];
                raster.fill_square(origin_x + x * scale, origin_y + y * scale, scale, color);
            }
        }
    }
    raster
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
