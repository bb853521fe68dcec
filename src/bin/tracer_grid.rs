//! Tokenized grid driver: every tape byte carries its provenance, token
//! snapshots are written on the visualization cadence, and mutation
//! mints exactly one fresh lineage token per program per epoch at most.

use std::env;
use std::fs;
use std::path::Path;
use std::process;
use std::time::Instant;

use lineage_soup::config::Config;
use lineage_soup::driver::{stream, stream_rng, TracerDriver};
use lineage_soup::grid::{Grid, TokenProgram};
use lineage_soup::snapshot::{token_snapshot_path, write_token_snapshot};

const PAIRING_RADIUS: usize = 2;

fn print_help() {
    println!("BFF grid simulation with token lineage tracking");
    println!();
    println!("USAGE:");
    println!("    tracer-grid [--config <FILE>]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <FILE>   Load settings from a YAML config file");
    println!("                          (default: configs/grid_config.yaml)");
    println!("    --help                Show this help");
}

fn parse_args() -> String {
    let argv: Vec<String> = env::args().collect();
    let mut config_path = "configs/grid_config.yaml".to_string();

    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i >= argv.len() {
                    eprintln!("--config requires a path");
                    process::exit(1);
                }
                config_path = argv[i].clone();
            }
            "--help" => {
                print_help();
                process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_help();
                process::exit(1);
            }
        }
        i += 1;
    }
    config_path
}

fn main() {
    let config_path = parse_args();
    let config = match Config::from_yaml(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config '{}': {}", config_path, e);
            process::exit(1);
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("Config validation error: {}", e);
        process::exit(1);
    }
    if !config.use_grid {
        eprintln!("tracer-grid needs use_grid with grid_width and grid_height");
        process::exit(1);
    }

    let mut grid: Grid<TokenProgram> =
        Grid::new(config.grid_width, config.grid_height, config.program_size);
    grid.init_random(&mut stream_rng(config.random_seed, stream::GRID_INIT));

    let mut driver = TracerDriver::new(
        grid,
        config.mutation_rate,
        PAIRING_RADIUS,
        config.read_head_position,
        config.program_size + config.write_head_position,
        config.random_seed,
    );

    println!("Starting grid simulation with token tracking:");
    println!(
        "  Grid size: {}x{} ({} programs)",
        config.grid_width,
        config.grid_height,
        config.grid_width * config.grid_height
    );
    println!("  Program size: {}", config.program_size);
    println!("  Mutation rate: {}", config.mutation_rate);
    println!("  Epochs: {}", config.epochs);
    println!("  Token snapshots will be saved to data/tokens/");
    println!();

    let tokens_dir = Path::new("data/tokens");
    if let Err(e) = fs::create_dir_all(tokens_dir) {
        eprintln!("Could not create {}: {}", tokens_dir.display(), e);
        process::exit(1);
    }

    println!("Saving initial token snapshot (epoch 0)...");
    if let Err(e) = write_token_snapshot(&driver.grid, &token_snapshot_path(tokens_dir, 0), 0) {
        eprintln!("Could not write initial snapshot: {}", e);
        process::exit(1);
    }

    let start = Instant::now();

    for _ in 0..config.epochs {
        let (stats, _partners) = driver.step();
        let epoch = stats.epoch;

        if epoch % 10 == 0 || epoch == config.epochs {
            println!(
                "Epoch {:4}/{} - Elapsed: {}s",
                epoch,
                config.epochs,
                start.elapsed().as_secs()
            );
        }

        if epoch % config.eval_interval == 0 {
            println!(
                "\tHigher Order Entropy={:.3},\tAvg Iters={:.3},\tFinished Ratio={:.3}",
                stats.hoe, stats.avg_iterations, stats.finished_ratio
            );
        }

        if epoch % config.visualization_interval == 0 {
            let path = token_snapshot_path(tokens_dir, epoch);
            println!("  Saving token snapshot: {}", path.display());
            if let Err(e) = write_token_snapshot(&driver.grid, &path, epoch) {
                eprintln!("Could not write token snapshot: {}", e);
            }
        }
    }

    // final snapshot, whatever the cadence
    println!("\nSaving final token snapshot...");
    let final_path = token_snapshot_path(tokens_dir, driver.epoch());
    if let Err(e) = write_token_snapshot(&driver.grid, &final_path, driver.epoch()) {
        eprintln!("Could not write final snapshot: {}", e);
    }

    println!("\nSimulation complete!");
    println!("Total time: {}s", start.elapsed().as_secs());
    println!("Token data saved to {}", tokens_dir.display());
}
