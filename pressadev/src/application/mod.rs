pub mod handlers;

use crate::presentation::cli::{Cli, Commands};
use clap::Parser;
use pressa_core::{Engine, EngineConfig, EngineResult};

pub fn run() -> EngineResult<()> {
    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref(), cli.store)?;

    // frame tools work on plain files and never touch the store
    match cli.command {
        Commands::Sniff { path } => return handlers::handle_sniff(&path, config.sniff_len),
        Commands::Encode {
            input,
            out,
            codec,
            level,
            block_size,
        } => {
            let block_size = block_size.unwrap_or(config.block_size);
            return handlers::handle_encode(&input, &out, codec, level, block_size);
        }
        Commands::Decode { input, out } => return handlers::handle_decode(&input, &out),
        _ => {}
    }

    let engine = Engine::open(config)?;
    match cli.command {
        Commands::Save { paths, recursive } => handlers::handle_save(&engine, &paths, recursive),
        Commands::Compress {
            file_id,
            all,
            codec,
            level,
        } => {
            if all {
                handlers::handle_compress_all(&engine)
            } else {
                handlers::handle_compress(&engine, file_id.as_deref(), codec, level)
            }
        }
        Commands::Decompress { file_id } => handlers::handle_decompress(&engine, &file_id),
        Commands::Analyze { file_id } => handlers::handle_analyze(&engine, &file_id),
        Commands::Ls { long } => handlers::handle_ls(&engine, long),
        Commands::Rm { file_id } => handlers::handle_rm(&engine, &file_id),
        Commands::Cat { file_id } => handlers::handle_cat(&engine, &file_id),
        Commands::Stats => handlers::handle_stats(&engine),
        Commands::Codecs => handlers::handle_codecs(&engine),
        Commands::Sniff { .. } | Commands::Encode { .. } | Commands::Decode { .. } => Ok(()),
    }
}
