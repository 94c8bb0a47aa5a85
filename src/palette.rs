// palette.rs

use crate::error::{HeatmapError, HeatmapResult};
use crate::loader::GeneMetadata;
use plotters::style::RGBColor;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl From<Rgb> for RGBColor {
    fn from(c: Rgb) -> Self {
        RGBColor(c.r, c.g, c.b)
    }
}

/// Parses `#RRGGBB` (the leading `#` is optional).
pub fn parse_hex_color(s: &str) -> HeatmapResult<Rgb> {
    let hex = s.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(HeatmapError::data_format(format!(
            "Invalid color '{}': expected #RRGGBB",
            s
        )));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16)
            .map_err(|e| HeatmapError::data_format(format!("Invalid color '{}': {}", s, e)))
    };
    Ok(Rgb::new(channel(0)?, channel(2)?, channel(4)?))
}

const DEFAULT_FALLBACK: &str = "#A9A9A9";

const BUILTIN_FAMILIES: [(&str, &str); 9] = [
    ("-", "#A9A9A9"),
    ("Aa_trans", "#FF69B4"),
    ("AAA", "#90EE90"),
    ("NB-ARC", "#FFD700"),
    ("Pkinase_Tyr", "#FF8C00"),
    ("Transposase_21", "#9370DB"),
    ("ubiquitin", "#4169E1"),
    ("UDPGT", "#00CED1"),
    ("UvrD-helicase", "#2E8B57"),
];

/// How legend membership is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LegendMode {
    /// Palette keys that occur literally among the gene labels.
    #[default]
    Palette,
    /// Palette keys as above, then every unmapped label drawn in the fallback color.
    Observed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LegendEntry {
    pub label: String,
    pub color: Rgb,
}

#[derive(Debug, Deserialize)]
struct PaletteFile {
    fallback: Option<String>,
    families: Vec<PaletteFileEntry>,
}

#[derive(Debug, Deserialize)]
struct PaletteFileEntry {
    name: String,
    color: String,
}

/// Ordered TF-family → color table with a fallback for unknown labels.
#[derive(Debug, Clone)]
pub struct FamilyPalette {
    entries: Vec<(String, Rgb)>,
    fallback: Rgb,
}

impl FamilyPalette {
    pub fn new(entries: Vec<(String, Rgb)>, fallback: Rgb) -> HeatmapResult<Self> {
        let mut names = HashSet::new();
        for (name, _) in &entries {
            if !names.insert(name.as_str()) {
                return Err(HeatmapError::data_format(format!(
                    "Palette lists family '{}' more than once",
                    name
                )));
            }
        }
        Ok(Self { entries, fallback })
    }

    pub fn builtin() -> Self {
        let entries = BUILTIN_FAMILIES
            .iter()
            .filter_map(|(name, hex)| parse_hex_color(hex).ok().map(|c| (name.to_string(), c)))
            .collect();
        let fallback = parse_hex_color(DEFAULT_FALLBACK).unwrap_or(Rgb::new(0xA9, 0xA9, 0xA9));
        Self { entries, fallback }
    }

    pub fn from_json_file(path: &Path) -> HeatmapResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| HeatmapError::io(path, e))?;
        let parsed: PaletteFile = serde_json::from_str(&text).map_err(|e| {
            HeatmapError::data_format(format!("Invalid palette file {}: {}", path.display(), e))
        })?;
        let fallback = parse_hex_color(parsed.fallback.as_deref().unwrap_or(DEFAULT_FALLBACK))?;
        let entries = parsed
            .families
            .into_iter()
            .map(|e| parse_hex_color(&e.color).map(|c| (e.name, c)))
            .collect::<HeatmapResult<Vec<_>>>()?;
        Self::new(entries, fallback)
    }

    pub fn fallback(&self) -> Rgb {
        self.fallback
    }

    pub fn entries(&self) -> &[(String, Rgb)] {
        &self.entries
    }

    fn lookup(&self, label: &str) -> Option<Rgb> {
        self.entries.iter().find(|(name, _)| name == label).map(|(_, c)| *c)
    }

    pub fn color_for(&self, label: Option<&str>) -> Rgb {
        label.and_then(|l| self.lookup(l)).unwrap_or(self.fallback)
    }

    /// One color per gene, in row order.
    pub fn annotate(&self, metadata: &[GeneMetadata]) -> Vec<Rgb> {
        metadata
            .iter()
            .map(|m| self.color_for(m.family.as_deref()))
            .collect()
    }

    pub fn legend(&self, metadata: &[GeneMetadata], mode: LegendMode) -> Vec<LegendEntry> {
        let present: HashSet<&str> = metadata.iter().filter_map(|m| m.family.as_deref()).collect();

        let mut legend: Vec<LegendEntry> = self
            .entries
            .iter()
            .filter(|(name, _)| present.contains(name.as_str()))
            .map(|(name, color)| LegendEntry {
                label: name.clone(),
                color: *color,
            })
            .collect();

        if mode == LegendMode::Observed {
            let mut listed: HashSet<&str> = HashSet::new();
            for label in metadata.iter().filter_map(|m| m.family.as_deref()) {
                if self.lookup(label).is_none() && listed.insert(label) {
                    legend.push(LegendEntry {
                        label: label.to_string(),
                        color: self.fallback,
                    });
                }
            }
        }
        legend
    }
}

/// Diverging color scale with evenly spaced stops over `[vmin, vmax]`.
#[derive(Debug, Clone)]
pub struct ColorScale {
    stops: Vec<Rgb>,
    vmin: f64,
    vmax: f64,
}

pub const DEFAULT_SCALE: [&str; 6] = ["#2166AC", "#92C5DE", "#FFFFFF", "#F4A582", "#D6604D", "#B2182B"];

impl ColorScale {
    pub fn new(stops: Vec<Rgb>, vmin: f64, vmax: f64) -> HeatmapResult<Self> {
        if stops.len() < 2 {
            return Err(HeatmapError::data_format(format!(
                "Color scale needs at least 2 colors, got {}",
                stops.len()
            )));
        }
        if !vmin.is_finite() || !vmax.is_finite() || vmin >= vmax {
            return Err(HeatmapError::data_format(format!(
                "Color scale bounds must satisfy vmin < vmax, got [{}, {}]",
                vmin, vmax
            )));
        }
        Ok(Self { stops, vmin, vmax })
    }

    pub fn from_hex(colors: &[String], vmin: f64, vmax: f64) -> HeatmapResult<Self> {
        let stops = colors
            .iter()
            .map(|c| parse_hex_color(c))
            .collect::<HeatmapResult<Vec<_>>>()?;
        Self::new(stops, vmin, vmax)
    }

    pub fn vmin(&self) -> f64 {
        self.vmin
    }

    pub fn vmax(&self) -> f64 {
        self.vmax
    }

    pub fn color_for(&self, value: f64) -> Rgb {
        let t = ((value - self.vmin) / (self.vmax - self.vmin)).clamp(0.0, 1.0);
        let segments = (self.stops.len() - 1) as f64;
        let scaled = t * segments;
        let lo = (scaled.floor() as usize).min(self.stops.len() - 2);
        let frac = scaled - lo as f64;
        let (a, b) = (self.stops[lo], self.stops[lo + 1]);
        let mix = |x: u8, y: u8| (x as f64 + (y as f64 - x as f64) * frac).round() as u8;
        Rgb::new(mix(a.r, b.r), mix(a.g, b.g), mix(a.b, b.b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(family: Option<&str>) -> GeneMetadata {
        GeneMetadata {
            family: family.map(str::to_string),
            cluster: None,
        }
    }

    #[test]
    fn parses_hex_colors() {
        assert_eq!(parse_hex_color("#FF8C00").unwrap(), Rgb::new(255, 140, 0));
        assert_eq!(parse_hex_color("2e8b57").unwrap(), Rgb::new(0x2E, 0x8B, 0x57));
        assert!(parse_hex_color("#FFF").is_err());
        assert!(parse_hex_color("#GG0000").is_err());
        assert_eq!(Rgb::new(0x21, 0x66, 0xAC).to_hex(), "#2166AC");
    }

    #[test]
    fn builtin_palette_is_complete() {
        let palette = FamilyPalette::builtin();
        assert_eq!(palette.entries().len(), 9);
        assert_eq!(palette.fallback(), Rgb::new(0xA9, 0xA9, 0xA9));
        assert_eq!(palette.color_for(Some("UDPGT")), Rgb::new(0x00, 0xCE, 0xD1));
    }

    #[test]
    fn unmapped_and_missing_labels_fall_back() {
        let palette = FamilyPalette::builtin();
        let genes = vec![meta(Some("AAA")), meta(Some("Mystery")), meta(None)];
        let colors = palette.annotate(&genes);
        assert_eq!(colors.len(), 3);
        assert_eq!(colors[0], Rgb::new(0x90, 0xEE, 0x90));
        assert_eq!(colors[1], palette.fallback());
        assert_eq!(colors[2], palette.fallback());
    }

    #[test]
    fn legend_lists_present_palette_keys_once_in_table_order() {
        let palette = FamilyPalette::builtin();
        let genes = vec![
            meta(Some("UDPGT")),
            meta(Some("AAA")),
            meta(Some("Mystery")),
            meta(Some("UDPGT")),
            meta(None),
        ];
        let legend = palette.legend(&genes, LegendMode::Palette);
        let labels: Vec<&str> = legend.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["AAA", "UDPGT"]);
    }

    #[test]
    fn observed_legend_appends_unmapped_labels() {
        let palette = FamilyPalette::builtin();
        let genes = vec![
            meta(Some("Zeta")),
            meta(Some("AAA")),
            meta(Some("Mystery")),
            meta(Some("Zeta")),
        ];
        let legend = palette.legend(&genes, LegendMode::Observed);
        let labels: Vec<&str> = legend.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["AAA", "Zeta", "Mystery"]);
        assert_eq!(legend[1].color, palette.fallback());
    }

    #[test]
    fn palette_loads_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("palette.json");
        std::fs::write(
            &path,
            r##"{"fallback": "#000000", "families": [{"name": "bZIP", "color": "#FF0000"}, {"name": "MYB", "color": "#00FF00"}]}"##,
        )
        .unwrap();
        let palette = FamilyPalette::from_json_file(&path).unwrap();
        assert_eq!(palette.entries()[0].0, "bZIP");
        assert_eq!(palette.color_for(Some("MYB")), Rgb::new(0, 255, 0));
        assert_eq!(palette.color_for(Some("AAA")), Rgb::new(0, 0, 0));
    }

    #[test]
    fn palette_rejects_duplicate_names() {
        let red = Rgb::new(255, 0, 0);
        assert!(FamilyPalette::new(vec![("A".into(), red), ("A".into(), red)], red).is_err());
    }

    #[test]
    fn color_scale_interpolates_and_clips() {
        let colors: Vec<String> = DEFAULT_SCALE.iter().map(|s| s.to_string()).collect();
        let scale = ColorScale::from_hex(&colors, -5.0, 5.0).unwrap();
        assert_eq!(scale.color_for(-5.0), Rgb::new(0x21, 0x66, 0xAC));
        assert_eq!(scale.color_for(5.0), Rgb::new(0xB2, 0x18, 0x2B));
        assert_eq!(scale.color_for(-1.0), Rgb::new(0xFF, 0xFF, 0xFF));
        assert_eq!(scale.color_for(-100.0), scale.color_for(-5.0));
        assert_eq!(scale.color_for(42.0), scale.color_for(5.0));

        let two = ColorScale::new(vec![Rgb::new(0, 0, 0), Rgb::new(200, 100, 50)], 0.0, 1.0).unwrap();
        assert_eq!(two.color_for(0.5), Rgb::new(100, 50, 25));
    }

    #[test]
    fn color_scale_rejects_bad_configuration() {
        let black = Rgb::new(0, 0, 0);
        assert!(ColorScale::new(vec![black], -1.0, 1.0).is_err());
        assert!(ColorScale::new(vec![black, black], 1.0, 1.0).is_err());
        assert!(ColorScale::new(vec![black, black], f64::NAN, 1.0).is_err());
    }
}
