// main.rs

// --- External Crate Imports ---
use anyhow::{Context, Error, Result};
use clap::Parser;
use log::{debug, info};
use std::time::Instant;

mod cluster;
mod error;
mod export;
mod loader;
mod palette;
mod render;

use cluster::{cluster_axis, ClusterDirection, Dendrogram, DistanceMetric};
use loader::ColumnSpec;
use palette::{ColorScale, FamilyPalette};
use render::{ClustermapInput, RenderOptions};

// --- Main Function ---
fn main() -> Result<(), Error> {
    let total_time_start = Instant::now();
    let cli_args = cli::CliArgs::parse();

    // Initialize logger
    let log_level = cli_args
        .log_level
        .parse::<log::LevelFilter>()
        .unwrap_or_else(|_| {
            eprintln!(
                "Warning: Invalid log level '{}' provided. Defaulting to Info.",
                cli_args.log_level
            );
            log::LevelFilter::Info
        });
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_micros()
        .init();

    info!("Starting expression_heatmap with args: {:?}", cli_args);

    // --- 1. Configuration: palette, color scale, figure size ---
    let family_palette = match &cli_args.palette {
        Some(path) => FamilyPalette::from_json_file(path)
            .with_context(|| format!("Failed to load palette from {}", path.display()))?,
        None => FamilyPalette::builtin(),
    };
    debug!(
        "Palette has {} families (fallback {}).",
        family_palette.entries().len(),
        family_palette.fallback().to_hex()
    );
    let color_scale = ColorScale::from_hex(&cli_args.scale_colors, cli_args.vmin, cli_args.vmax)?;
    let mut render_options =
        RenderOptions::from_inches(cli_args.width_in, cli_args.height_in, cli_args.dpi)?;
    render_options.show_labels = !cli_args.no_labels;

    // --- 2. Load ---
    info!(
        "Loading expression data from {} (sheet '{}')...",
        cli_args.input.display(),
        cli_args.sheet
    );
    let columns = ColumnSpec {
        gene: cli_args.gene_col.clone(),
        family: cli_args.family_col.clone(),
        cluster: cli_args.cluster_col.clone(),
    };
    let table = loader::load_expression_table(
        &cli_args.input,
        &cli_args.sheet,
        &columns,
        cli_args.on_duplicate.into(),
    )
    .with_context(|| format!("Failed to load {}", cli_args.input.display()))?;
    info!(
        "Expression matrix: {} genes x {} samples.",
        table.n_genes(),
        table.n_samples()
    );

    // --- 3. Annotate ---
    let row_colors = family_palette.annotate(&table.metadata);
    let legend = family_palette.legend(&table.metadata, cli_args.legend.into());
    info!(
        "Legend lists {} TF families: {:?}",
        legend.len(),
        legend.iter().map(|e| e.label.as_str()).collect::<Vec<_>>()
    );

    // --- 4. Cluster & Render ---
    let row_tree = if cli_args.no_row_cluster {
        Dendrogram::identity(table.n_genes())
    } else {
        info!("Clustering {} genes ({:?} linkage, Euclidean)...", table.n_genes(), cli_args.method);
        cluster_axis(&table.values, ClusterDirection::Rows, DistanceMetric::Euclidean, cli_args.method.into())?
    };
    let col_tree = if cli_args.no_col_cluster {
        Dendrogram::identity(table.n_samples())
    } else {
        info!("Clustering {} samples ({:?} linkage, Euclidean)...", table.n_samples(), cli_args.method);
        cluster_axis(&table.values, ClusterDirection::Columns, DistanceMetric::Euclidean, cli_args.method.into())?
    };

    let figure = render::render_clustermap(
        &ClustermapInput {
            table: &table,
            row_colors: &row_colors,
            row_tree: &row_tree,
            col_tree: &col_tree,
            scale: &color_scale,
            legend: &legend,
        },
        &render_options,
    )?;

    // --- 5. Export ---
    export::write_figure(&figure, &cli_args.output)
        .with_context(|| format!("Failed to write heatmap to {}", cli_args.output.display()))?;
    if let Some(report_path) = &cli_args.order_json {
        let report = export::OrderReport::new(&table, &row_colors, &row_tree, &col_tree, &legend);
        export::write_order_report(report_path, &report)?;
    }

    println!("Heatmap saved → {}", cli_args.output.display());
    println!("  Genes: {}  |  Samples: {}", table.n_genes(), table.n_samples());

    info!(
        "expression_heatmap finished successfully in {:.2?}.",
        total_time_start.elapsed()
    );
    Ok(())
}

// --- Module Implementations ---

mod cli {
    use crate::cluster::LinkageMethod;
    use crate::loader::DuplicatePolicy;
    use crate::palette::{LegendMode, DEFAULT_SCALE};
    use clap::{Parser, ValueEnum};
    use std::path::PathBuf;

    #[derive(Parser, Debug)]
    #[command(author, version, about = "Clustered gene-expression heatmap annotated by TF family.", long_about = None, propagate_version = true)]
    pub(crate) struct CliArgs {
        #[arg(short, long, default_value = "gene_expression_input_data.xlsx")]
        pub(crate) input: PathBuf,

        #[arg(short, long, default_value = "Expression Data")]
        pub(crate) sheet: String,

        #[arg(short, long = "out", default_value = "gene_expression_heatmap.png")]
        pub(crate) output: PathBuf,

        #[arg(long, default_value_t = 180.0)]
        pub(crate) dpi: f64,

        #[arg(long, default_value_t = 12.0)]
        pub(crate) width_in: f64,

        #[arg(long, default_value_t = 18.0)]
        pub(crate) height_in: f64,

        #[arg(long, default_value = "Gene_ID")]
        pub(crate) gene_col: String,

        #[arg(long, default_value = "TF_Family")]
        pub(crate) family_col: String,

        #[arg(long, default_value = "Cluster")]
        pub(crate) cluster_col: String,

        /// JSON palette: {"fallback": "#RRGGBB", "families": [{"name": .., "color": ..}]}
        #[arg(long)]
        pub(crate) palette: Option<PathBuf>,

        #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_SCALE.map(String::from))]
        pub(crate) scale_colors: Vec<String>,

        #[arg(long, default_value_t = -5.0, allow_hyphen_values = true)]
        pub(crate) vmin: f64,

        #[arg(long, default_value_t = 5.0, allow_hyphen_values = true)]
        pub(crate) vmax: f64,

        #[arg(long, value_enum, default_value_t = Linkage::Average)]
        pub(crate) method: Linkage,

        #[arg(long)]
        pub(crate) no_row_cluster: bool,

        #[arg(long)]
        pub(crate) no_col_cluster: bool,

        #[arg(long, value_enum, default_value_t = OnDuplicate::Reject)]
        pub(crate) on_duplicate: OnDuplicate,

        #[arg(long, value_enum, default_value_t = Legend::Palette)]
        pub(crate) legend: Legend,

        /// Skip all text (gene/sample labels, titles, legend text).
        #[arg(long)]
        pub(crate) no_labels: bool,

        /// Also write row/column order and legend as JSON.
        #[arg(long)]
        pub(crate) order_json: Option<PathBuf>,

        #[arg(long, default_value = "Info")]
        pub(crate) log_level: String,
    }

    #[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) enum Linkage {
        Single,
        Complete,
        Average,
        Weighted,
        Ward,
        Centroid,
        Median,
    }

    impl From<Linkage> for LinkageMethod {
        fn from(l: Linkage) -> Self {
            match l {
                Linkage::Single => LinkageMethod::Single,
                Linkage::Complete => LinkageMethod::Complete,
                Linkage::Average => LinkageMethod::Average,
                Linkage::Weighted => LinkageMethod::Weighted,
                Linkage::Ward => LinkageMethod::Ward,
                Linkage::Centroid => LinkageMethod::Centroid,
                Linkage::Median => LinkageMethod::Median,
            }
        }
    }

    #[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) enum OnDuplicate {
        Reject,
        KeepFirst,
    }

    impl From<OnDuplicate> for DuplicatePolicy {
        fn from(d: OnDuplicate) -> Self {
            match d {
                OnDuplicate::Reject => DuplicatePolicy::Reject,
                OnDuplicate::KeepFirst => DuplicatePolicy::KeepFirst,
            }
        }
    }

    #[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) enum Legend {
        Palette,
        Observed,
    }

    impl From<Legend> for LegendMode {
        fn from(l: Legend) -> Self {
            match l {
                Legend::Palette => LegendMode::Palette,
                Legend::Observed => LegendMode::Observed,
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use clap::CommandFactory;

        #[test]
        fn cli_definition_is_valid() {
            CliArgs::command().debug_assert();
        }

        #[test]
        fn defaults_match_reference_figure() {
            let args = CliArgs::try_parse_from(["expression_heatmap"]).unwrap();
            assert_eq!(args.sheet, "Expression Data");
            assert_eq!(args.output, PathBuf::from("gene_expression_heatmap.png"));
            assert_eq!(args.dpi, 180.0);
            assert_eq!((args.vmin, args.vmax), (-5.0, 5.0));
            assert_eq!(args.scale_colors.len(), 6);
            assert_eq!(args.method, Linkage::Average);
            assert_eq!(args.on_duplicate, OnDuplicate::Reject);
            assert_eq!(args.legend, Legend::Palette);
        }

        #[test]
        fn parses_overrides() {
            let args = CliArgs::try_parse_from([
                "expression_heatmap",
                "-i",
                "expr.csv",
                "--vmin",
                "-2.5",
                "--scale-colors",
                "#000000,#FFFFFF",
                "--method",
                "complete",
                "--on-duplicate",
                "keep-first",
                "--legend",
                "observed",
                "--no-labels",
            ])
            .unwrap();
            assert_eq!(args.input, PathBuf::from("expr.csv"));
            assert_eq!(args.vmin, -2.5);
            assert_eq!(args.scale_colors, vec!["#000000", "#FFFFFF"]);
            assert_eq!(args.method, Linkage::Complete);
            assert_eq!(DuplicatePolicy::from(args.on_duplicate), DuplicatePolicy::KeepFirst);
            assert_eq!(LegendMode::from(args.legend), LegendMode::Observed);
            assert!(args.no_labels);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{build_table, DuplicatePolicy, RawCell, RawSheet};
    use crate::palette::{LegendMode, DEFAULT_SCALE};

    fn text(s: &str) -> RawCell {
        RawCell::Text(s.to_string())
    }

    #[test]
    fn three_genes_two_samples_end_to_end() {
        let raw = RawSheet {
            headers: ["Gene_ID", "TF_Family", "Cluster", "WT", "MUT"].iter().map(|s| s.to_string()).collect(),
            rows: vec![
                vec![text("g1"), text("AAA"), text("1"), RawCell::Number(1.0), RawCell::Number(2.0)],
                vec![text("g2"), text("NotInTable"), text("1"), RawCell::Number(-1.0), RawCell::Number(0.0)],
                vec![text("g3"), text("UDPGT"), text("2"), RawCell::Number(4.0), RawCell::Number(4.5)],
            ],
        };
        let table = build_table(&raw, &ColumnSpec::default(), DuplicatePolicy::Reject).unwrap();
        assert_eq!(table.values.dim(), (3, 2));

        let palette = FamilyPalette::builtin();
        let colors = palette.annotate(&table.metadata);
        assert_eq!(colors[1], palette.fallback());
        let legend = palette.legend(&table.metadata, LegendMode::Palette);
        assert!(legend.iter().all(|e| e.label != "NotInTable"));
        assert_eq!(legend.len(), 2);

        let row_tree =
            cluster_axis(&table.values, ClusterDirection::Rows, DistanceMetric::Euclidean, cluster::LinkageMethod::Average)
                .unwrap();
        let col_tree =
            cluster_axis(&table.values, ClusterDirection::Columns, DistanceMetric::Euclidean, cluster::LinkageMethod::Average)
                .unwrap();

        let scale_colors: Vec<String> = DEFAULT_SCALE.iter().map(|s| s.to_string()).collect();
        let scale = ColorScale::from_hex(&scale_colors, -5.0, 5.0).unwrap();
        let mut options = RenderOptions::from_inches(4.0, 6.0, 40.0).unwrap();
        options.show_labels = false;
        let figure = render::render_clustermap(
            &ClustermapInput {
                table: &table,
                row_colors: &colors,
                row_tree: &row_tree,
                col_tree: &col_tree,
                scale: &scale,
                legend: &legend,
            },
            &options,
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("heatmap.png");
        export::write_figure(&figure, &out).unwrap();
        assert!(out.is_file());
    }
}
