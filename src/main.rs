use clap::{Parser, Subcommand};
use sitepress::config::{self, ModuleFormat, PipelineConfig};
use sitepress::convert::FormatConverter;
use sitepress::{output, pipeline};
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "sitepress")]
#[command(about = "Asset ingestion pipeline for a CMS-driven static site")]
#[command(long_about = "\
Asset ingestion pipeline for a CMS-driven static site

Reads CMS content exported as JSON, finds every media reference in it,
downloads each asset once, converts images to WebP and publishes a manifest
the site templates use to resolve references to local files.

Output layout:

  public/assets/
  ├── <key>.webp                 # Generic assets, converted once, reused
  ├── <key>.mp4                  # Video and SVG are kept as-is
  ├── .asset-index.json          # Which locator each file came from
  └── banner/
      └── <key>.jpg              # Banner assets, verbatim, refreshed every run
  src/generated/
  ├── asset-mapping.json         # Every asset by public path, with counts
  └── asset-urls.js              # Alias table: \"a.jpg\", key, path → URL

Any object key containing \"banner\" marks its subtree as Banner content.
Sibling \"desktop\"/\"mobile\" fields form a group: a mobile asset that cannot
be downloaded is served with the desktop one.

Run 'sitepress gen-config' to generate a documented sitepress.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Project directory containing sitepress.toml; relative paths resolve against it
    #[arg(long, default_value = ".", global = true)]
    project: PathBuf,

    /// Override output.asset_root
    #[arg(long, global = true)]
    asset_root: Option<PathBuf>,

    /// Override output.manifest_root
    #[arg(long, global = true)]
    manifest_root: Option<PathBuf>,

    /// Override output.module_format
    #[arg(long, global = true, value_parser = parse_module_format)]
    format: Option<ModuleFormat>,

    /// Override cms.base_url
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Bearer token for the CMS
    #[arg(long, env = "SITEPRESS_CMS_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Increase log detail (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Full pipeline: extract → fetch/convert/store → fallbacks → manifest
    Run {
        /// CMS JSON files or directories of them
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Move Banner assets stranded in the Generic directory (no network)
    Reclassify {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Rebuild the manifest from the asset directories
    Manifest,
    /// Print the references found in CMS content (no network, no writes)
    Extract {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Print a stock sitepress.toml with all options documented
    GenConfig,
}

fn parse_module_format(s: &str) -> Result<ModuleFormat, String> {
    match s {
        "js" => Ok(ModuleFormat::Js),
        "ts" => Ok(ModuleFormat::Ts),
        "json" => Ok(ModuleFormat::Json),
        other => Err(format!("unknown module format {other:?} (js, ts, json)")),
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{}", line);
    }
}

/// Resolve `path` against the project directory unless it is absolute.
fn in_project(project: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project.join(path)
    }
}

/// File config with CLI overrides applied on top.
fn resolve_config(cli: &Cli) -> Result<PipelineConfig, config::ConfigError> {
    let mut config = config::load_config(&cli.project)?;
    if let Some(root) = &cli.asset_root {
        config.output.asset_root = root.clone();
    }
    if let Some(root) = &cli.manifest_root {
        config.output.manifest_root = root.clone();
    }
    if let Some(format) = cli.format {
        config.output.module_format = format;
    }
    if let Some(base) = &cli.base_url {
        config.cms.base_url = Some(base.clone());
    }
    if let Some(token) = &cli.token {
        config.cms.token = Some(token.clone());
    }
    config.output.asset_root = in_project(&cli.project, &config.output.asset_root);
    config.output.manifest_root = in_project(&cli.project, &config.output.manifest_root);
    config.validate()?;
    Ok(config)
}

fn read_documents(inputs: &[PathBuf]) -> Result<Vec<serde_json::Value>, pipeline::PipelineError> {
    let files = pipeline::collect_inputs(inputs)?;
    tracing::info!("reading {} input files", files.len());
    pipeline::load_documents(&files)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Command::Run { inputs } => {
            let config = resolve_config(&cli)?;
            let documents = read_documents(inputs)?;
            let references = pipeline::extract_references(&documents, &config);

            let fetcher = pipeline::http_fetcher(&config);
            let converter = FormatConverter::from_config(&config.images);
            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    print_lines(output::format_pipeline_event(&event));
                }
            });
            let result = pipeline::run(&references, &config, &fetcher, &converter, Some(tx));
            if printer.join().is_err() {
                tracing::warn!("progress printer panicked");
            }
            let report = result?;

            if let Some((manifest, written)) = &report.manifest {
                print_lines(output::format_manifest_report(manifest, written));
            }
            if let Some(e) = &report.manifest_error {
                println!("Manifest not written: {}", e);
            }
            print_lines(output::format_summary(&report.summary));
        }
        Command::Reclassify { inputs } => {
            let config = resolve_config(&cli)?;
            let documents = read_documents(inputs)?;
            let references = pipeline::extract_references(&documents, &config);
            let outcomes = pipeline::reclassify(&references, &config)?;
            print_lines(output::format_reclassify(&outcomes));
        }
        Command::Manifest => {
            let config = resolve_config(&cli)?;
            let (manifest, written) = pipeline::build_manifest(&config, None)?;
            print_lines(output::format_manifest_report(&manifest, &written));
        }
        Command::Extract { inputs } => {
            let config = resolve_config(&cli)?;
            let documents = read_documents(inputs)?;
            let references = pipeline::extract_references(&documents, &config);
            print_lines(output::format_references(&references));
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}
