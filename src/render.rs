// render.rs

use crate::cluster::Dendrogram;
use crate::error::{HeatmapError, HeatmapResult};
use crate::loader::ExpressionTable;
use crate::palette::{ColorScale, LegendEntry, Rgb};
use log::{debug, info};
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use plotters::style::{FontDesc, FontFamily, FontStyle, FontTransform};

const MAX_SIDE_PX: u32 = 20_000;

/// Rendered RGB image held in memory until export.
#[derive(Debug, Clone)]
pub struct Figure {
    pub width: u32,
    pub height: u32,
    /// Row-major RGB8 pixels.
    pub pixels: Vec<u8>,
}

#[cfg(test)]
impl Figure {
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y as usize) * (self.width as usize) + x as usize) * 3;
        Some(Rgb::new(self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]))
    }
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub width_px: u32,
    pub height_px: u32,
    pub dpi: f64,
    /// When false no text is drawn at all.
    pub show_labels: bool,
    pub row_axis_label: String,
    pub column_title: String,
    pub scale_label: String,
    pub legend_title: String,
}

impl RenderOptions {
    pub fn from_inches(width_in: f64, height_in: f64, dpi: f64) -> HeatmapResult<Self> {
        if !(dpi.is_finite() && dpi > 0.0) {
            return Err(HeatmapError::render(format!("DPI must be positive, got {}", dpi)));
        }
        let to_px = |inches: f64, what: &str| -> HeatmapResult<u32> {
            let px = (inches * dpi).round();
            if !(px.is_finite() && px >= 64.0 && px <= MAX_SIDE_PX as f64) {
                return Err(HeatmapError::render(format!(
                    "Figure {} of {} in at {} dpi gives {} px (allowed 64..={})",
                    what, inches, dpi, px, MAX_SIDE_PX
                )));
            }
            Ok(px as u32)
        };
        Ok(Self {
            width_px: to_px(width_in, "width")?,
            height_px: to_px(height_in, "height")?,
            dpi,
            show_labels: true,
            row_axis_label: "Genes".to_string(),
            column_title: "Genotypes".to_string(),
            scale_label: "log2 FPKM".to_string(),
            legend_title: "TF_Family".to_string(),
        })
    }

    fn pt(&self, points: f64) -> f64 {
        points * self.dpi / 72.0
    }
}

/// Everything the renderer draws, already clustered and annotated.
pub struct ClustermapInput<'a> {
    pub table: &'a ExpressionTable,
    pub row_colors: &'a [Rgb],
    pub row_tree: &'a Dendrogram,
    pub col_tree: &'a Dendrogram,
    pub scale: &'a ColorScale,
    pub legend: &'a [LegendEntry],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl Rect {
    pub fn width(&self) -> i32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> i32 {
        self.y1 - self.y0
    }

    fn center(&self) -> (i32, i32) {
        ((self.x0 + self.x1) / 2, (self.y0 + self.y1) / 2)
    }
}

/// Figure regions in pixels, proportioned after a 12 × 18 in clustermap.
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub axis_label: Rect,
    pub row_tree: Rect,
    pub row_colors: Rect,
    pub heatmap: Rect,
    pub col_tree: Rect,
    pub title: Rect,
    pub colorbar: Rect,
    pub legend: Rect,
}

impl Layout {
    pub fn compute(width: u32, height: u32) -> HeatmapResult<Self> {
        let w = width as f64;
        let h = height as f64;
        let px = |v: f64| v.round() as i32;

        let margin = 0.02 * w;
        let gap = 0.005 * w;
        let axis_label_w = 0.04 * w;
        let row_tree_w = 0.12 * w;
        let row_colors_w = 0.03 * w;
        let gene_labels_w = 0.10 * w;
        let side_panel_w = 0.20 * w;

        let title_h = 0.03 * h;
        let col_tree_h = 0.08 * h;
        let sample_labels_h = 0.07 * h;

        let axis_x0 = margin;
        let tree_x0 = axis_x0 + axis_label_w;
        let colors_x0 = tree_x0 + row_tree_w + gap;
        let heat_x0 = colors_x0 + row_colors_w + gap;
        let heat_x1 = w - margin - side_panel_w - gene_labels_w;

        let title_y0 = margin;
        let col_tree_y0 = title_y0 + title_h;
        let heat_y0 = col_tree_y0 + col_tree_h + gap;
        let heat_y1 = h - margin - sample_labels_h;

        if heat_x1 - heat_x0 < 1.0 || heat_y1 - heat_y0 < 1.0 {
            return Err(HeatmapError::render(format!(
                "Figure of {}x{} px leaves no room for the heatmap",
                width, height
            )));
        }

        let heat_h = heat_y1 - heat_y0;
        let side_x0 = heat_x1 + gene_labels_w + gap;
        let colorbar_y0 = heat_y0 + 0.35 * heat_h;
        let colorbar_y1 = colorbar_y0 + 0.25 * heat_h;

        Ok(Self {
            axis_label: Rect { x0: px(axis_x0), y0: px(heat_y0), x1: px(tree_x0), y1: px(heat_y1) },
            row_tree: Rect { x0: px(tree_x0), y0: px(heat_y0), x1: px(tree_x0 + row_tree_w), y1: px(heat_y1) },
            row_colors: Rect { x0: px(colors_x0), y0: px(heat_y0), x1: px(colors_x0 + row_colors_w), y1: px(heat_y1) },
            heatmap: Rect { x0: px(heat_x0), y0: px(heat_y0), x1: px(heat_x1), y1: px(heat_y1) },
            col_tree: Rect { x0: px(heat_x0), y0: px(col_tree_y0), x1: px(heat_x1), y1: px(col_tree_y0 + col_tree_h) },
            title: Rect { x0: px(heat_x0), y0: px(title_y0), x1: px(heat_x1), y1: px(col_tree_y0) },
            colorbar: Rect { x0: px(side_x0), y0: px(colorbar_y0), x1: px(side_x0 + 0.025 * w), y1: px(colorbar_y1) },
            legend: Rect { x0: px(side_x0), y0: px(heat_y0), x1: px(w - margin), y1: px(colorbar_y0 - 2.0 * gap) },
        })
    }
}

/// Row geometry of the legend box, shared by swatches and their labels.
#[derive(Debug, Clone, Copy)]
struct LegendGeometry {
    frame: Rect,
    font_px: f64,
    row_step: i32,
    swatch: i32,
    pad: i32,
}

impl LegendGeometry {
    fn new(frame: Rect, options: &RenderOptions) -> Self {
        let font_px = options.pt(8.0);
        Self {
            frame,
            font_px,
            row_step: (font_px * 1.6).round().max(2.0) as i32,
            swatch: (font_px * 1.1).round().max(1.0) as i32,
            pad: (font_px * 0.6).round() as i32,
        }
    }

    fn entries_y0(&self) -> i32 {
        self.frame.y0 + self.pad + self.row_step + self.pad
    }

    fn title_anchor(&self) -> (i32, i32) {
        (self.frame.x0 + self.pad, self.frame.y0 + self.pad)
    }

    fn swatch(&self, i: usize) -> [(i32, i32); 2] {
        let x = self.frame.x0 + self.pad;
        let y = self.entries_y0() + self.row_step * i as i32;
        [(x, y), (x + self.swatch, y + self.swatch)]
    }

    /// Left-center anchor of entry `i`, beside its swatch.
    fn label_anchor(&self, i: usize) -> (i32, i32) {
        let [(_, y0), (x1, _)] = self.swatch(i);
        (x1 + self.pad, y0 + self.swatch / 2)
    }

    /// Lower edge of the box for `n` entries, kept inside the frame.
    fn bottom(&self, n: usize) -> i32 {
        let entries_y0 = self.entries_y0();
        (entries_y0 + self.row_step * n as i32 + self.pad).min(self.frame.y1.max(entries_y0))
    }
}

fn backend_err<E: std::fmt::Debug>(e: E) -> HeatmapError {
    HeatmapError::render(format!("Drawing failed: {:?}", e))
}

fn font<'a>(size_px: f64) -> FontDesc<'a> {
    FontDesc::new(FontFamily::SansSerif, size_px.max(1.0), FontStyle::Normal)
}

/// Draws heatmap, dendrograms, row color strip, labels, colorbar and legend
/// into an in-memory RGB buffer.
pub fn render_clustermap(input: &ClustermapInput<'_>, options: &RenderOptions) -> HeatmapResult<Figure> {
    let n_rows = input.table.n_genes();
    let n_cols = input.table.n_samples();
    if n_rows == 0 || n_cols == 0 {
        return Err(HeatmapError::render(format!("Nothing to draw: matrix is {}x{}", n_rows, n_cols)));
    }
    if input.row_colors.len() != n_rows || input.row_tree.len() != n_rows || input.col_tree.len() != n_cols {
        return Err(HeatmapError::render(format!(
            "Annotation sizes disagree with the {}x{} matrix (row colors {}, row leaves {}, column leaves {})",
            n_rows,
            n_cols,
            input.row_colors.len(),
            input.row_tree.len(),
            input.col_tree.len()
        )));
    }

    let (width, height) = (options.width_px, options.height_px);
    let layout = Layout::compute(width, height)?;
    debug!("Figure layout: {:?}", layout);
    info!("Rendering {}x{} heatmap on a {}x{} px canvas...", n_rows, n_cols, width, height);

    let mut pixels = vec![255u8; width as usize * height as usize * 3];
    {
        let root = BitMapBackend::with_buffer(&mut pixels, (width, height)).into_drawing_area();
        root.fill(&WHITE).map_err(backend_err)?;

        let heat = layout.heatmap;
        let cell_w = heat.width() as f64 / n_cols as f64;
        let cell_h = heat.height() as f64 / n_rows as f64;
        let col_x = |slot: f64| heat.x0 + (slot * cell_w).round() as i32;
        let row_y = |slot: f64| heat.y0 + (slot * cell_h).round() as i32;

        // Heatmap cells in leaf order, first leaf at top-left.
        for (r_slot, &row) in input.row_tree.order.iter().enumerate() {
            let (y0, y1) = (row_y(r_slot as f64), row_y(r_slot as f64 + 1.0));
            for (c_slot, &col) in input.col_tree.order.iter().enumerate() {
                let color: RGBColor = input.scale.color_for(input.table.values[[row, col]]).into();
                root.draw(&Rectangle::new(
                    [(col_x(c_slot as f64), y0), (col_x(c_slot as f64 + 1.0), y1)],
                    color.filled(),
                ))
                .map_err(backend_err)?;
            }

            let strip: RGBColor = input.row_colors[row].into();
            root.draw(&Rectangle::new(
                [(layout.row_colors.x0, y0), (layout.row_colors.x1, y1)],
                strip.filled(),
            ))
            .map_err(backend_err)?;
        }

        let line = BLACK.stroke_width((options.pt(0.8).round() as u32).max(1));

        // Row dendrogram grows leftwards from the strip.
        let tree = layout.row_tree;
        let row_scale = if input.row_tree.max_height > 0.0 {
            tree.width() as f64 / input.row_tree.max_height
        } else {
            0.0
        };
        let tree_x = |h: f64| tree.x1 - (h * row_scale).round() as i32;
        for link in &input.row_tree.links {
            root.draw(&PathElement::new(
                vec![
                    (tree_x(link.left_height), row_y(link.left_pos)),
                    (tree_x(link.height), row_y(link.left_pos)),
                    (tree_x(link.height), row_y(link.right_pos)),
                    (tree_x(link.right_height), row_y(link.right_pos)),
                ],
                line,
            ))
            .map_err(backend_err)?;
        }

        // Column dendrogram grows upwards from the heatmap.
        let tree = layout.col_tree;
        let col_scale = if input.col_tree.max_height > 0.0 {
            tree.height() as f64 / input.col_tree.max_height
        } else {
            0.0
        };
        let tree_y = |h: f64| tree.y1 - (h * col_scale).round() as i32;
        for link in &input.col_tree.links {
            root.draw(&PathElement::new(
                vec![
                    (col_x(link.left_pos), tree_y(link.left_height)),
                    (col_x(link.left_pos), tree_y(link.height)),
                    (col_x(link.right_pos), tree_y(link.height)),
                    (col_x(link.right_pos), tree_y(link.right_height)),
                ],
                line,
            ))
            .map_err(backend_err)?;
        }

        // Colorbar, vmax at the top.
        let bar = layout.colorbar;
        let bar_h = bar.height().max(1);
        for dy in 0..bar_h {
            let frac = dy as f64 / bar_h as f64;
            let value = input.scale.vmax() - frac * (input.scale.vmax() - input.scale.vmin());
            let color: RGBColor = input.scale.color_for(value).into();
            root.draw(&Rectangle::new(
                [(bar.x0, bar.y0 + dy), (bar.x1, bar.y0 + dy + 1)],
                color.filled(),
            ))
            .map_err(backend_err)?;
        }
        root.draw(&Rectangle::new([(bar.x0, bar.y0), (bar.x1, bar.y1)], BLACK.stroke_width(1)))
            .map_err(backend_err)?;

        // Legend swatches, with text when labels are enabled.
        let legend = LegendGeometry::new(layout.legend, options);
        if !input.legend.is_empty() {
            root.draw(&Rectangle::new(
                [(legend.frame.x0, legend.frame.y0), (legend.frame.x1, legend.bottom(input.legend.len()))],
                RGBColor(160, 160, 160).stroke_width(1),
            ))
            .map_err(backend_err)?;
        }
        for (i, entry) in input.legend.iter().enumerate() {
            let color: RGBColor = entry.color.into();
            root.draw(&Rectangle::new(legend.swatch(i), color.filled()))
                .map_err(backend_err)?;
        }

        if options.show_labels {
            draw_labels(&root, input, options, &layout, &legend, cell_w, cell_h)?;
        }

        root.present().map_err(backend_err)?;
    }

    Ok(Figure { width, height, pixels })
}

fn draw_labels<DB: DrawingBackend>(
    root: &DrawingArea<DB, plotters::coord::Shift>,
    input: &ClustermapInput<'_>,
    options: &RenderOptions,
    layout: &Layout,
    legend: &LegendGeometry,
    cell_w: f64,
    cell_h: f64,
) -> HeatmapResult<()> {
    let heat = layout.heatmap;
    let text_pad = options.pt(3.0).round() as i32;

    let gene_style = font(options.pt(6.5))
        .color(&BLACK)
        .pos(Pos::new(HPos::Left, VPos::Center));
    for (slot, &row) in input.row_tree.order.iter().enumerate() {
        let y = heat.y0 + ((slot as f64 + 0.5) * cell_h).round() as i32;
        root.draw(&Text::new(input.table.genes[row].clone(), (heat.x1 + text_pad, y), gene_style.clone()))
            .map_err(backend_err)?;
    }

    let sample_style = font(options.pt(10.0))
        .transform(FontTransform::Rotate90)
        .color(&BLACK);
    for (slot, &col) in input.col_tree.order.iter().enumerate() {
        let x = heat.x0 + ((slot as f64 + 0.5) * cell_w).round() as i32;
        root.draw(&Text::new(input.table.samples[col].clone(), (x, heat.y1 + text_pad), sample_style.clone()))
            .map_err(backend_err)?;
    }

    let (axis_x, axis_y) = layout.axis_label.center();
    root.draw(&Text::new(
        options.row_axis_label.clone(),
        (axis_x, axis_y),
        font(options.pt(13.0))
            .transform(FontTransform::Rotate270)
            .color(&BLACK)
            .pos(Pos::new(HPos::Center, VPos::Center)),
    ))
    .map_err(backend_err)?;

    let (title_x, _) = layout.title.center();
    root.draw(&Text::new(
        options.column_title.clone(),
        (title_x, layout.title.y1 - text_pad),
        font(options.pt(13.0))
            .color(&BLACK)
            .pos(Pos::new(HPos::Center, VPos::Bottom)),
    ))
    .map_err(backend_err)?;

    let bar = layout.colorbar;
    let tick_style = font(options.pt(8.0))
        .color(&BLACK)
        .pos(Pos::new(HPos::Left, VPos::Center));
    let (vmin, vmax) = (input.scale.vmin(), input.scale.vmax());
    for (value, y) in [
        (vmax, bar.y0),
        (0.5 * (vmin + vmax), (bar.y0 + bar.y1) / 2),
        (vmin, bar.y1),
    ] {
        root.draw(&PathElement::new(vec![(bar.x1, y), (bar.x1 + text_pad, y)], BLACK.stroke_width(1)))
            .map_err(backend_err)?;
        root.draw(&Text::new(format_tick(value), (bar.x1 + 2 * text_pad, y), tick_style.clone()))
            .map_err(backend_err)?;
    }
    root.draw(&Text::new(
        options.scale_label.clone(),
        (bar.x1 + (options.pt(30.0).round() as i32), (bar.y0 + bar.y1) / 2),
        font(options.pt(9.0))
            .transform(FontTransform::Rotate90)
            .color(&BLACK)
            .pos(Pos::new(HPos::Center, VPos::Center)),
    ))
    .map_err(backend_err)?;

    if !input.legend.is_empty() {
        root.draw(&Text::new(
            options.legend_title.clone(),
            legend.title_anchor(),
            font(options.pt(9.0)).color(&BLACK),
        ))
        .map_err(backend_err)?;
        let entry_style = font(legend.font_px)
            .color(&BLACK)
            .pos(Pos::new(HPos::Left, VPos::Center));
        for (i, entry) in input.legend.iter().enumerate() {
            root.draw(&Text::new(entry.label.clone(), legend.label_anchor(i), entry_style.clone()))
                .map_err(backend_err)?;
        }
    }
    Ok(())
}

fn format_tick(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}
