//! Xenon recompiler CLI
//!
//! Loads a PowerPC PE base image, runs the recompiler and writes the IR
//! module, the metadata file and the debug map into an output directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use xenon_recomp::config::RecompilerConfig;
use xenon_recomp::format::{debug_map, OutputFormat};
use xenon_recomp::metadata::ImageMetadata;
use xenon_recomp::parser::GoblinParser;
use xenon_recomp::{BinaryParser, Recompiler};

/// Static recompiler from big-endian PowerPC executables to a portable IR.
#[derive(Parser, Debug)]
#[command(name = "xenon-recomp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// PE base image to recompile
    image: PathBuf,

    /// Output directory
    #[arg(short, long, default_value = "out")]
    output: PathBuf,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Debug map format
    #[arg(long, default_value_t = OutputFormat::Text)]
    debug_map_format: OutputFormat,

    /// Emit functions on a single thread
    #[arg(long)]
    sequential: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn write_output(dir: &Path, name: &str, contents: &str) -> Result<()> {
    let path = dir.join(name);
    fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))?;
    info!("wrote {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = match &args.config {
        Some(path) => RecompilerConfig::from_file(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => RecompilerConfig::default(),
    };
    if args.sequential {
        config.parallel_emission = false;
    }

    let data = fs::read(&args.image).with_context(|| format!("reading {}", args.image.display()))?;
    let parser = GoblinParser::new();
    let image = parser.parse(&data).with_context(|| format!("{} could not load {}", parser, args.image.display()))?;
    info!(
        "loaded {} sections at 0x{:08x}, entry 0x{:08x}, {} imports",
        image.sections.len(),
        image.base,
        image.entry_point,
        image.imports.len()
    );

    let recompiler = Recompiler::new(config);
    let output = recompiler.run(&image).context("recompilation failed")?;

    fs::create_dir_all(&args.output).with_context(|| format!("creating {}", args.output.display()))?;
    write_output(&args.output, "module.ir", &output.module.to_string())?;

    let metadata_path = args.output.join("metadata.bin");
    ImageMetadata::from_image(&image)
        .save(&metadata_path)
        .with_context(|| format!("writing {}", metadata_path.display()))?;
    info!("wrote {}", metadata_path.display());

    if recompiler.config().emit_debug_map {
        let records = debug_map(&output.store, &output.functions);
        let rendered = args.debug_map_format.get_formatter().format(&records)?;
        write_output(&args.output, &format!("debug_map.{}", args.debug_map_format.extension()), &rendered)?;
    }

    output.report.log_summary();
    if !output.report.is_clean() {
        warn!("output is partial: {} diagnostics", output.report.summary().total());
    }
    Ok(())
}
