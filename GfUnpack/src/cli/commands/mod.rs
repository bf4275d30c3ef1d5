use clap::Subcommand;
use std::path::PathBuf;

pub mod extract;
pub mod lookup;
pub mod sync;

#[derive(Subcommand)]
pub enum Commands {
    /// Bring the asset index in line with a bundle directory
    Sync {
        /// Directory of `.ab` bundles
        #[arg(short, long)]
        bundles: PathBuf,

        /// Index database file
        #[arg(short, long, default_value = "image.db")]
        index: PathBuf,
    },

    /// Extract and merge the images listed in a descriptor file
    Extract {
        /// Directory of `.ab` bundles
        #[arg(short, long)]
        bundles: PathBuf,

        /// Output directory for merged images and images.json
        #[arg(short, long)]
        output: PathBuf,

        /// JSON array of required image descriptors
        #[arg(short, long)]
        descriptors: PathBuf,

        /// TOML config file (flags below override it)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Index database file (default: image.db beside the output directory)
        #[arg(long)]
        index: Option<PathBuf>,

        /// Number of merge workers
        #[arg(short = 'j', long)]
        workers: Option<usize>,

        /// Re-merge outputs that already exist
        #[arg(long)]
        force: bool,

        /// Quantize outputs with pngquant
        #[arg(long)]
        quantize: bool,

        /// Also key results by owner and image name
        #[arg(long)]
        name_keys: bool,

        /// Alpha override table replacing the bundled one
        #[arg(long)]
        overrides: Option<PathBuf>,

        /// Suppress progress bar
        #[arg(short, long)]
        quiet: bool,
    },

    /// Look up indexed images by path id or name
    Lookup {
        /// Directory of `.ab` bundles
        #[arg(short, long)]
        bundles: PathBuf,

        /// Index database file
        #[arg(short, long, default_value = "image.db")]
        index: PathBuf,

        /// Path ids to look up
        #[arg(long = "path-id", conflicts_with = "name")]
        path_ids: Vec<i64>,

        /// Object name to look up
        #[arg(long)]
        name: Option<String>,

        /// Look up Sprites instead of Texture2Ds
        #[arg(long)]
        sprite: bool,
    },
}

impl Commands {
    pub fn execute(&self) -> anyhow::Result<()> {
        match self {
            Commands::Sync { bundles, index } => sync::execute(bundles, index),
            Commands::Extract {
                bundles,
                output,
                descriptors,
                config,
                index,
                workers,
                force,
                quantize,
                name_keys,
                overrides,
                quiet,
            } => extract::execute(
                bundles,
                output,
                descriptors,
                config.as_deref(),
                &extract::ExtractCliOptions {
                    index: index.clone(),
                    workers: *workers,
                    force: *force,
                    quantize: *quantize,
                    name_keys: *name_keys,
                    overrides: overrides.clone(),
                },
                !*quiet,
            ),
            Commands::Lookup {
                bundles,
                index,
                path_ids,
                name,
                sprite,
            } => lookup::execute(bundles, index, path_ids, name.as_deref(), *sprite),
        }
    }
}
