// export.rs

use crate::cluster::Dendrogram;
use crate::error::{HeatmapError, HeatmapResult};
use crate::loader::ExpressionTable;
use crate::palette::{LegendEntry, Rgb};
use crate::render::Figure;
use image::{ImageBuffer, ImageError, ImageFormat};
use log::info;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

fn ensure_parent_dir(path: &Path) -> HeatmapResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| HeatmapError::io(parent, e))?;
            info!("Created output directory: {}", parent.display());
        }
    }
    Ok(())
}

/// Writes `figure` as a raster image; the format follows the file extension
/// and defaults to PNG.
pub fn write_figure(figure: &Figure, path: &Path) -> HeatmapResult<()> {
    ensure_parent_dir(path)?;
    let format = match path.extension() {
        None => ImageFormat::Png,
        Some(_) => ImageFormat::from_path(path).map_err(|e| {
            HeatmapError::io_other(path, format!("unsupported image format: {}", e))
        })?,
    };

    let buffer = ImageBuffer::<image::Rgb<u8>, &[u8]>::from_raw(figure.width, figure.height, figure.pixels.as_slice())
        .ok_or_else(|| {
            HeatmapError::render(format!(
                "Pixel buffer of {} bytes does not match {}x{}",
                figure.pixels.len(),
                figure.width,
                figure.height
            ))
        })?;

    buffer.save_with_format(path, format).map_err(|e| match e {
        ImageError::IoError(io_err) => HeatmapError::io(path, io_err),
        other => HeatmapError::io_other(path, other.to_string()),
    })?;
    info!(
        "Wrote {}x{} {:?} image to {}",
        figure.width,
        figure.height,
        format,
        path.display()
    );
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct RowRecord {
    pub gene: String,
    pub family: Option<String>,
    pub cluster: Option<String>,
    pub color: String,
}

#[derive(Debug, Serialize)]
pub struct LegendRecord {
    pub family: String,
    pub color: String,
}

/// Final display order of both axes plus the legend.
#[derive(Debug, Serialize)]
pub struct OrderReport {
    pub rows: Vec<RowRecord>,
    pub columns: Vec<String>,
    pub legend: Vec<LegendRecord>,
}

impl OrderReport {
    pub fn new(
        table: &ExpressionTable,
        row_colors: &[Rgb],
        row_tree: &Dendrogram,
        col_tree: &Dendrogram,
        legend: &[LegendEntry],
    ) -> Self {
        let rows = row_tree
            .order
            .iter()
            .map(|&i| RowRecord {
                gene: table.genes[i].clone(),
                family: table.metadata[i].family.clone(),
                cluster: table.metadata[i].cluster.clone(),
                color: row_colors[i].to_hex(),
            })
            .collect();
        let columns = col_tree.order.iter().map(|&j| table.samples[j].clone()).collect();
        let legend = legend
            .iter()
            .map(|e| LegendRecord {
                family: e.label.clone(),
                color: e.color.to_hex(),
            })
            .collect();
        Self { rows, columns, legend }
    }
}

pub fn write_order_report(path: &Path, report: &OrderReport) -> HeatmapResult<()> {
    ensure_parent_dir(path)?;
    let file = File::create(path).map_err(|e| HeatmapError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report)
        .map_err(|e| HeatmapError::io_other(path, e.to_string()))?;
    writeln!(writer).map_err(|e| HeatmapError::io(path, e))?;
    writer.flush().map_err(|e| HeatmapError::io(path, e))?;
    info!("Wrote cluster order report to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::GeneMetadata;
    use ndarray::array;

    fn tiny_figure() -> Figure {
        let mut pixels = vec![255u8; 4 * 3 * 3];
        pixels[0] = 0x21;
        pixels[1] = 0x66;
        pixels[2] = 0xAC;
        Figure {
            width: 4,
            height: 3,
            pixels,
        }
    }

    #[test]
    fn writes_png_and_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("heatmap.png");
        write_figure(&tiny_figure(), &path).unwrap();

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (4, 3));
        assert_eq!(img.get_pixel(0, 0).0, [0x21, 0x66, 0xAC]);
        assert_eq!(img.get_pixel(3, 2).0, [255, 255, 255]);
    }

    #[test]
    fn extensionless_path_is_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heatmap");
        write_figure(&tiny_figure(), &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn unwritable_path_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        // A regular file cannot be used as a directory.
        let err = write_figure(&tiny_figure(), &blocker.join("out.png")).unwrap_err();
        assert!(matches!(err, HeatmapError::Io { .. }));
    }

    #[test]
    fn short_buffer_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let figure = Figure {
            width: 10,
            height: 10,
            pixels: vec![0; 3],
        };
        let path = dir.path().join("x.png");
        let err = write_figure(&figure, &path).unwrap_err();
        assert!(matches!(err, HeatmapError::Render(ref m) if m.contains("3 bytes")));
        assert!(!path.exists());
    }

    #[test]
    fn order_report_follows_leaf_order() {
        let table = ExpressionTable {
            genes: vec!["g0".into(), "g1".into()],
            samples: vec!["WT".into(), "MUT".into()],
            values: array![[1.0, 2.0], [3.0, 4.0]],
            metadata: vec![
                GeneMetadata { family: Some("AAA".into()), cluster: Some("1".into()) },
                GeneMetadata { family: None, cluster: None },
            ],
        };
        let rows = Dendrogram { order: vec![1, 0], links: vec![], max_height: 0.0 };
        let cols = Dendrogram { order: vec![1, 0], links: vec![], max_height: 0.0 };
        let colors = [Rgb::new(0x90, 0xEE, 0x90), Rgb::new(0xA9, 0xA9, 0xA9)];
        let legend = [LegendEntry { label: "AAA".into(), color: colors[0] }];
        let report = OrderReport::new(&table, &colors, &rows, &cols, &legend);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("order.json");
        write_order_report(&path, &report).unwrap();
        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

        assert_eq!(json["rows"][0]["gene"], "g1");
        assert_eq!(json["rows"][0]["family"], serde_json::Value::Null);
        assert_eq!(json["rows"][1]["cluster"], "1");
        assert_eq!(json["rows"][1]["color"], "#90EE90");
        assert_eq!(json["columns"], serde_json::json!(["MUT", "WT"]));
        assert_eq!(json["legend"][0]["family"], "AAA");
    }
}
