use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Run the full pipeline (hash, identify, decrypt) over one or more images.
    #[command(alias = "p")]
    Process {
        /// Image files to process.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Path to the title database JSON file.
        #[arg(long, default_value = "game_keys.json")]
        db: PathBuf,

        /// Number of worker threads for decryption. [0 = auto-detect based on CPU cores]
        #[arg(long, default_value_t = 0)]
        threads: usize,
    },

    /// Decrypt a single image with an explicit key or a database lookup.
    #[command(alias = "d")]
    Decrypt {
        /// The image file to decrypt. Output lands next to it with a `.dec` suffix.
        #[arg(required = true)]
        input: PathBuf,

        /// Title key as 32 hex characters, optional 0x prefix.
        #[arg(long, conflicts_with = "db")]
        key: Option<String>,

        /// Hash the image and look its key up in this title database instead.
        #[arg(long)]
        db: Option<PathBuf>,

        /// Number of worker threads for decryption. [0 = auto-detect based on CPU cores]
        #[arg(long, default_value_t = 0)]
        threads: usize,
    },

    /// Print the SHA-1 digest of a file.
    #[command(alias = "h")]
    Hash {
        /// The file to hash.
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Print the plain/encrypted region table of an image without decrypting it.
    #[command(alias = "i")]
    Info {
        /// The image whose header to inspect.
        #[arg(required = true)]
        image: PathBuf,
    },
}

/// Parse the command line.
pub fn run() -> Result<Commands, clap::Error> {
    Ok(Args::try_parse()?.command)
}
