use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use log::{debug, info, warn};
use rayon::prelude::*;
use walkdir::WalkDir;

use luajd::{decompile_file, listing_buffer};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// LuaJIT bytecode decompiler.
#[derive(Parser)]
#[command(name = "luajd", about = "Decompile LuaJIT 2.0/2.1 bytecode dumps")]
struct Cli {
    /// Input dump file or directory of dumps.
    input: PathBuf,

    /// Output file or directory; directories mirror the input tree.
    output: PathBuf,

    /// Print a pseudo-assembly listing instead of decompiling.
    #[arg(long)]
    listing: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = if cli.input.is_dir() {
        process_folder(&cli.input, &cli.output, cli.listing)
    } else {
        process_one(&cli.input, &cli.output, cli.listing)
            .map_err(|e| {
                eprintln!("{}: {e}", cli.input.display());
            })
            .map(|()| 0usize)
    };

    match result {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(()) => ExitCode::FAILURE,
    }
}

fn process_one(path_in: &Path, path_out: &Path, listing: bool) -> Result<(), String> {
    if listing {
        let data = std::fs::read(path_in).map_err(|e| e.to_string())?;
        let text = listing_buffer(&data).map_err(|e| e.to_string())?;
        std::fs::write(path_out, text).map_err(|e| e.to_string())
    } else {
        decompile_file(path_in, path_out).map_err(|e| e.to_string())
    }
}

/// Walk the input tree and decompile every file, one file per worker.
/// Failures are logged and counted; the batch always runs to the end.
fn process_folder(in_dir: &Path, out_dir: &Path, listing: bool) -> Result<usize, ()> {
    let start = Instant::now();

    let mut jobs: Vec<(PathBuf, PathBuf)> = Vec::new();
    for entry in WalkDir::new(in_dir) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("walk error: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(in_dir)
            .expect("walked path is under the input root");
        let extension = if listing { "asm" } else { "lua" };
        let path_out = out_dir.join(relative).with_extension(extension);
        jobs.push((entry.path().to_path_buf(), path_out));
    }

    let failures: Vec<(PathBuf, String)> = jobs
        .par_iter()
        .filter_map(|(path_in, path_out)| {
            if let Some(parent) = path_out.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    return Some((path_in.clone(), e.to_string()));
                }
            }
            match process_one(path_in, path_out, listing) {
                Ok(()) => {
                    debug!("SUCCESS {}", path_in.display());
                    None
                }
                Err(e) => Some((path_in.clone(), e)),
            }
        })
        .collect();

    for (path, error) in &failures {
        info!("FAILED {}: {error}", path.display());
    }
    info!(
        "decompile folder {} -> {}: success {}, fail {} in {:.3}s",
        in_dir.display(),
        out_dir.display(),
        jobs.len() - failures.len(),
        failures.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(failures.len())
}
