use clap::{Parser, Subcommand};
use derivo::config;
use derivo::imaging::{Action, Filter};
use derivo::output;
use derivo::process::{ImageResource, Processor};
use rayon::prelude::*;
use std::error::Error;
use std::path::{Component, Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Image plus one or more transformation specs.
#[derive(clap::Args)]
struct DeriveArgs {
    /// Source image
    image: PathBuf,

    /// Transformation specs, e.g. "300x200", "x200 r90", "200x100 bottomLeft q80"
    #[arg(required = true)]
    specs: Vec<String>,
}

#[derive(Parser)]
#[command(name = "derivo")]
#[command(about = "Derive resized, fitted, filled and filtered images with a build-once cache")]
#[command(long_about = "\
Derive resized, fitted, filled and filtered images with a build-once cache

Every derived image gets a deterministic, content-addressed name and is
persisted under the cache directory. Asking for the same derivation again
serves it from the cache instead of rebuilding it.

Spec strings are whitespace-separated tokens in any order:

  300x200        target size; either side may be omitted (x200, 200x)
  q80            JPEG quality 1-100
  r90            rotation, a multiple of 90, applied before resizing
  lanczos        resampling filter: nearestneighbor, box, linear,
                 catmullrom, gaussian, lanczos
  bottomLeft     fill anchor: center, topleft, top, topright, left, right,
                 bottomleft, bottom, bottomright, smart

Filters for the filter command:

  grayscale  invert  blur=2.5  brightness=20  contrast=-10  hue=45
  unsharpen=1.0,2

Run 'derivo gen-config' to generate a documented derivo.toml.")]
#[command(version)]
struct Cli {
    /// Directory containing derivo.toml
    #[arg(long, default_value = ".", global = true)]
    config: PathBuf,

    /// Persisted cache directory (overrides cache_dir from derivo.toml)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Directory that published paths are relative to (default: the image's directory)
    #[arg(long, global = true)]
    source_root: Option<PathBuf>,

    /// Log cache activity and build timings to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resize to the given dimensions
    Resize(DeriveArgs),
    /// Scale down to fit inside the given box, keeping the aspect ratio
    Fit(DeriveArgs),
    /// Cover the given box, then crop at the anchor
    Fill(DeriveArgs),
    /// Apply a filter chain, in the order given
    Filter {
        /// Source image
        image: PathBuf,

        #[arg(required = true)]
        filters: Vec<Filter>,
    },
    /// Print the embedded IPTC metadata of an image
    Metadata {
        /// Source image
        image: PathBuf,
    },
    /// List the persisted derived images
    CacheList,
    /// Print a stock derivo.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn Error>> {
    let Cli {
        config: config_dir,
        cache_dir,
        source_root,
        verbose,
        command,
    } = Cli::parse();
    init_tracing(verbose);

    if let Command::GenConfig = command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let mut imaging_config = config::load_config(&config_dir)?;
    if let Some(dir) = cache_dir {
        imaging_config.cache_dir = dir;
    }
    let processor = Processor::new(imaging_config);
    let source_root = source_root.as_deref();

    match command {
        Command::Resize(args) => derive(&processor, source_root, Action::Resize, &args)?,
        Command::Fit(args) => derive(&processor, source_root, Action::Fit, &args)?,
        Command::Fill(args) => derive(&processor, source_root, Action::Fill, &args)?,
        Command::Filter { image, filters } => {
            let img = open(&processor, source_root, &image)?;
            output::print_source(&img);
            let label = filters
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            let result = img.filter(filters);
            output::print_derivation(&label, &result);
            result?;
        }
        Command::Metadata { image } => {
            let img = open(&processor, source_root, &image)?;
            output::print_source(&img);
            let metadata = img.metadata()?;
            output::print_metadata(metadata.as_deref());
        }
        Command::CacheList => {
            let artifacts = processor.persisted_artifacts()?;
            output::print_artifacts(processor.cache_dir(), &artifacts);
        }
        Command::GenConfig => {}
    }

    Ok(())
}

/// Run every spec against one source in parallel. All specs share the
/// processor, so duplicates are built once.
fn derive(
    processor: &Processor,
    source_root: Option<&Path>,
    action: Action,
    args: &DeriveArgs,
) -> Result<(), Box<dyn Error>> {
    let img = open(processor, source_root, &args.image)?;
    output::print_source(&img);

    let results: Vec<_> = args
        .specs
        .par_iter()
        .map(|spec| img.transform(action, spec))
        .collect();

    for (spec, result) in args.specs.iter().zip(&results) {
        output::print_derivation(spec, result);
    }
    println!("Cache: {}", processor.cache_stats());

    let failed = results.iter().filter(|r| r.is_err()).count();
    if failed > 0 {
        return Err(format!("{failed} of {} derivations failed", results.len()).into());
    }
    Ok(())
}

fn open(
    processor: &Processor,
    source_root: Option<&Path>,
    image: &Path,
) -> Result<ImageResource, Box<dyn Error>> {
    Ok(processor.open(image, &published_path(image, source_root))?)
}

/// `/`-joined path of `image` below `source_root`, or just its file name.
fn published_path(image: &Path, source_root: Option<&Path>) -> String {
    let relative = source_root
        .and_then(|root| image.strip_prefix(root).ok())
        .or_else(|| image.file_name().map(Path::new))
        .unwrap_or(image);
    let parts: Vec<&str> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();
    format!("/{}", parts.join("/"))
}

/// Default level `warn`; `--verbose` raises derivo's own events to `debug`.
/// `RUST_LOG` overrides both.
fn init_tracing(verbose: bool) {
    let default = if verbose { "warn,derivo=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
