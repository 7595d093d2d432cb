use anyhow::{Context, Result};
use clap::Parser;
use feederline::config::{EngineConfig, Preset};
use feederline::geojson_io::{gzip_sidecar, read_feature_collection, write_feature_collection};
use feederline::reduce::ReducePolicy;
use feederline::screen::{
    FeederIndex, InclusionZone, ScreenConfig, Verdict, read_sites, screen_sites, write_report,
};
use log::info;
use std::path::PathBuf;
use std::time::Instant;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Merge, reduce and screen a raw feeder layer into a compact one
    Consolidate {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// RON engine configuration. Takes priority over --preset
        #[arg(long, env = "JUNIPER_CONFIG")]
        config: Option<PathBuf>,
        /// Built-in configuration. Valid options: load, generation
        #[arg(long)]
        preset: Option<String>,
        /// Valid options: preserve-all, main-trunk-only, length-aware-hybrid
        #[arg(long)]
        policy: Option<String>,
        #[arg(long)]
        tolerance: Option<f64>,
        #[arg(long)]
        coordinate_precision: Option<u32>,
        #[arg(long, env = "JUNIPER_THREADS")]
        threads: Option<usize>,
        /// Also write <output>.gz
        #[arg(long)]
        gzip: bool,
    },
    /// Check pre-geocoded sites against the nearest feeder's capacity
    Screen {
        #[arg(long)]
        feeders: PathBuf,
        /// CSV with label,latitude,longitude columns
        #[arg(long)]
        sites: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Service area polygons; sites outside are not eligible
        #[arg(long)]
        inclusion: Option<PathBuf>,
        #[arg(long, default_value_t = 90.0)]
        threshold: f64,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match args.cmd {
        Command::Consolidate {
            input,
            output,
            config,
            preset,
            policy,
            tolerance,
            coordinate_precision,
            threads,
            gzip,
        } => {
            let mut engine = match (&config, &preset) {
                (Some(path), preset) => {
                    if let Some(name) = preset {
                        println!("--config given, ignoring --preset {}", name);
                    }
                    EngineConfig::load(path)
                        .with_context(|| format!("loading config {}", path.display()))?
                }
                (None, Some(name)) => {
                    let preset = name.parse::<Preset>().map_err(|e| anyhow::anyhow!(e))?;
                    EngineConfig::preset(preset)
                }
                (None, None) => EngineConfig::default(),
            };

            if let Some(policy) = policy {
                engine.policy = policy
                    .parse::<ReducePolicy>()
                    .map_err(|e| anyhow::anyhow!(e))?;
            }
            if let Some(tolerance) = tolerance {
                engine.tolerance = tolerance;
            }
            if let Some(precision) = coordinate_precision {
                engine.coordinate_precision = precision;
            }
            if threads.is_some() {
                engine.max_threads = threads;
            }
            engine.validate()?;

            println!(
                "Consolidating {} (policy {}, tolerance {})",
                input.display(),
                engine.policy,
                engine.tolerance
            );
            let start = Instant::now();

            let collection = read_feature_collection(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            println!("Loaded {} features", collection.features.len());

            let report = feederline::run(&collection.features, &engine)?;

            let bytes = write_feature_collection(&output, &report.features, &engine.id_field)
                .with_context(|| format!("writing {}", output.display()))?;

            let vertices: usize = report.features.iter().map(|f| f.vertex_count()).sum();
            println!(
                "Wrote {} networks ({} vertices, {:.1} KB) to {}",
                report.features.len(),
                vertices,
                bytes as f64 / 1024.0,
                output.display()
            );
            println!(
                "Skipped: {} rows without {}, {} empty networks, {} oversized networks",
                report.rows_rejected,
                engine.id_field,
                report.networks_dropped_empty,
                report.networks_skipped
            );

            if gzip {
                let summary = gzip_sidecar(&output)?;
                println!(
                    "Gzipped {} ({:.1} KB -> {:.1} KB, {:.1}%)",
                    summary.path.display(),
                    summary.original_bytes as f64 / 1024.0,
                    summary.compressed_bytes as f64 / 1024.0,
                    summary.ratio_percent()
                );
            }

            info!("Consolidation took {:?}", start.elapsed());
        }
        Command::Screen {
            feeders,
            sites,
            output,
            inclusion,
            threshold,
        } => {
            let config = ScreenConfig {
                threshold_pct: threshold,
                ..ScreenConfig::default()
            };

            let feeder_layer = read_feature_collection(&feeders)
                .with_context(|| format!("reading {}", feeders.display()))?;
            let index = FeederIndex::from_features(&feeder_layer.features, &config);
            println!("Loaded {} feeders", index.feeders.len());

            let zone = match &inclusion {
                Some(path) => {
                    let layer = read_feature_collection(path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    let zone = InclusionZone::from_features(&layer.features);
                    println!("Loaded {} inclusion polygons", zone.0.0.len());
                    Some(zone)
                }
                None => None,
            };

            let sites = read_sites(&sites).with_context(|| format!("reading {}", sites.display()))?;
            println!(
                "Screening {} sites (threshold < {}%)",
                sites.len(),
                config.threshold_pct
            );

            let rows = screen_sites(&sites, &index, zone.as_ref(), &config);
            for row in &rows {
                println!(
                    "  {} -> overall {:?} | battery {:?} | heat pump {:?}",
                    row.label,
                    row.overall_eligible,
                    row.battery_incentive_eligible,
                    row.heat_pump_incentive_eligible
                );
            }

            write_report(&output, &rows)
                .with_context(|| format!("writing {}", output.display()))?;
            let eligible = rows
                .iter()
                .filter(|r| r.overall_eligible == Verdict::Yes)
                .count();
            println!(
                "Report saved to {} ({} of {} sites in service area)",
                output.display(),
                eligible,
                rows.len()
            );
        }
    }

    Ok(())
}
