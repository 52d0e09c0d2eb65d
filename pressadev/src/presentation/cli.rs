use clap::{Parser, Subcommand};
use pressa_core::CodecId;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "pressadev CLI (alpha)", long_about = None)]
pub struct Cli {
    /// Managed store root (overrides the config file)
    #[arg(long, env = "PRESSA_STORE", global = true)]
    pub store: Option<PathBuf>,

    /// TOML engine configuration
    #[arg(long, env = "PRESSA_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Copy files into managed storage
    Save {
        paths: Vec<PathBuf>,
        /// recurse into directories
        #[arg(long)]
        recursive: bool,
    },

    /// Compress a record (the most recently saved one by default)
    Compress {
        file_id: Option<String>,
        /// compress every uncompressed record
        #[arg(long, conflicts_with = "file_id")]
        all: bool,
        /// force a codec instead of the sniffer's recommendation
        #[arg(long)]
        codec: Option<CodecId>,
        #[arg(long, allow_hyphen_values = true)]
        level: Option<i32>,
    },

    /// Restore a record's original bytes in managed storage
    Decompress { file_id: String },

    /// Classify a record's content
    Analyze { file_id: String },

    /// Classify a file on disk without saving it
    Sniff { path: PathBuf },

    /// List records
    Ls {
        /// show sizes, codec and format
        #[arg(long)]
        long: bool,
    },

    /// Delete a record and its artifact
    Rm { file_id: String },

    /// Stream a record's original content to stdout
    Cat { file_id: String },

    /// Store totals
    Stats,

    /// Available codecs
    Codecs,

    /// Encode a file into a standalone frame
    Encode {
        input: PathBuf,
        out: PathBuf,
        #[arg(long, default_value = "zstd")]
        codec: CodecId,
        #[arg(long, default_value_t = 3, allow_hyphen_values = true)]
        level: i32,
        #[arg(long)]
        block_size: Option<usize>,
    },

    /// Decode a standalone frame back into a file
    Decode { input: PathBuf, out: PathBuf },
}
