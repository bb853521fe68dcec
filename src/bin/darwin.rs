//! Darwin experiment: two grids evolve behind a barrier, then the
//! barrier comes down and the populations mix on a doubled grid. Live
//! frames tag which phase they belong to so a viewer can show both grids
//! side by side until the merge.

use std::env;
use std::process;

use serde_json::json;

use lineage_soup::config::{Config, DarwinConfig};
use lineage_soup::driver::{split_mix_64, stream, stream_rng, GridDriver, PauseGate};
use lineage_soup::grid::{Grid, Program};
use lineage_soup::live::{LiveServer, DEFAULT_PORT};

const PAIRING_RADIUS: usize = 2;

fn print_help() {
    println!("Darwin barrier-removal experiment");
    println!();
    println!("USAGE:");
    println!("    darwin [--config <FILE>]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <FILE>   Darwin experiment config file");
    println!("                          (default: configs/darwin_config.yaml)");
    println!("    --help                Show this help");
}

fn parse_args() -> String {
    let argv: Vec<String> = env::args().collect();
    let mut config_path = "configs/darwin_config.yaml".to_string();

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

fn load_phase_config(path: &str) -> Config {
    match Config::from_yaml(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config '{}': {}", path, e);
            process::exit(1);
        }
    }
}

fn make_driver(darwin: &DarwinConfig, phase: &Config, width: usize, seed: u64) -> GridDriver {
    let mut grid: Grid<Program> = Grid::new(width, darwin.grid_height, darwin.program_size);
    grid.init_random(&mut stream_rng(seed, stream::GRID_INIT));
    GridDriver::new(
        grid,
        phase.mutation_rate,
        PAIRING_RADIUS,
        phase.read_head_position,
        darwin.program_size + phase.write_head_position,
        seed,
    )
}

fn main() {
    let config_path = parse_args();
    let darwin = match DarwinConfig::from_yaml(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading Darwin config '{}': {}", config_path, e);
            process::exit(1);
        }
    };

    if darwin.eval_interval == 0 {
        eprintln!("eval_interval must be at least 1");
        process::exit(1);
    }

    let left_config = load_phase_config(&darwin.left_config);
    let right_config = load_phase_config(&darwin.right_config);
    let merged_config = load_phase_config(&darwin.merged_config);

    // each population gets its own derived seed so the two halves do not
    // mirror each other
    let left_seed = split_mix_64(darwin.random_seed ^ 1);
    let right_seed = split_mix_64(darwin.random_seed ^ 2);
    let merged_seed = split_mix_64(darwin.random_seed ^ 3);

    let mut left = make_driver(&darwin, &left_config, darwin.grid_width, left_seed);
    let mut right = make_driver(&darwin, &right_config, darwin.grid_width, right_seed);

    println!("=== DARWIN EXPERIMENT ===");
    println!(
        "Phase 1: Independent evolution (epochs 0-{})",
        darwin.barrier_removal_epoch
    );
    println!(
        "  Left grid: {}x{} ({} programs)",
        darwin.grid_width,
        darwin.grid_height,
        darwin.grid_width * darwin.grid_height
    );
    println!(
        "  Right grid: {}x{} ({} programs)",
        darwin.grid_width,
        darwin.grid_height,
        darwin.grid_width * darwin.grid_height
    );
    println!(
        "\nPhase 2: Merged evolution (epochs {}-{})",
        darwin.barrier_removal_epoch, darwin.final_epoch
    );
    println!(
        "  Merged grid: {}x{} ({} programs)",
        2 * darwin.grid_width,
        darwin.grid_height,
        2 * darwin.grid_width * darwin.grid_height
    );
    println!();

    let gate = PauseGate::new();
    let live = match LiveServer::start(DEFAULT_PORT, gate.flag()) {
        Ok(server) => Some(server),
        Err(e) => {
            eprintln!("WebSocket server unavailable: {}", e);
            None
        }
    };

    println!("--- PHASE 1: BARRIER IN PLACE ---");

    for epoch in 0..darwin.barrier_removal_epoch {
        gate.wait_while_paused();

        let (left_stats, _) = left.step();
        let (right_stats, _) = right.step();

        if let Some(ref server) = live {
            if server.has_clients() {
                let frame = json!({
                    "epoch": epoch,
                    "phase": 1,
                    "barrier_active": true,
                    "barrier_removal_epoch": darwin.barrier_removal_epoch,
                    "grid_width": darwin.grid_width,
                    "grid_height": darwin.grid_height,
                    "left": {
                        "entropy": left_stats.hoe,
                        "avg_iters": left_stats.avg_iterations,
                        "finished_ratio": left_stats.finished_ratio,
                        "grid": left.grid.color_rows(),
                    },
                    "right": {
                        "entropy": right_stats.hoe,
                        "avg_iters": right_stats.avg_iterations,
                        "finished_ratio": right_stats.finished_ratio,
                        "grid": right.grid.color_rows(),
                    },
                });
                server.broadcast(&frame.to_string());
            }
        }

        if epoch % darwin.eval_interval == 0 {
            println!("Epoch: {}", epoch);
            println!(
                "  LEFT:  HOE={:.3}, Avg Iters={:.3}, Finished={:.3}",
                left_stats.hoe, left_stats.avg_iterations, left_stats.finished_ratio
            );
            println!(
                "  RIGHT: HOE={:.3}, Avg Iters={:.3}, Finished={:.3}",
                right_stats.hoe, right_stats.avg_iterations, right_stats.finished_ratio
            );
        }
    }

    println!(
        "\n--- BARRIER REMOVED AT EPOCH {} ---\n",
        darwin.barrier_removal_epoch
    );

    // concatenate the halves side by side into a doubled grid
    let mut merged_grid: Grid<Program> = Grid::new(
        2 * darwin.grid_width,
        darwin.grid_height,
        darwin.program_size,
    );
    for y in 0..darwin.grid_height {
        for x in 0..darwin.grid_width {
            merged_grid.set(x, y, left.grid.get(x, y).clone());
            merged_grid.set(x + darwin.grid_width, y, right.grid.get(x, y).clone());
        }
    }

    let mut merged = GridDriver::new(
        merged_grid,
        merged_config.mutation_rate,
        PAIRING_RADIUS,
        merged_config.read_head_position,
        darwin.program_size + merged_config.write_head_position,
        merged_seed,
    );

    println!("--- PHASE 2: POPULATIONS MIXING ---");

    for epoch in darwin.barrier_removal_epoch..darwin.final_epoch {
        gate.wait_while_paused();

        let (stats, _) = merged.step();

        if let Some(ref server) = live {
            if server.has_clients() {
                let frame = json!({
                    "epoch": epoch,
                    "phase": 2,
                    "barrier_active": false,
                    "barrier_removal_epoch": darwin.barrier_removal_epoch,
                    "merged": merged.grid.frame_json(
                        epoch,
                        stats.hoe,
                        stats.avg_iterations,
                        stats.finished_ratio,
                    ),
                });
                server.broadcast(&frame.to_string());
            }
        }

        if epoch % darwin.eval_interval == 0 {
            println!("Epoch: {}", epoch);
            println!(
                "  MERGED: HOE={:.3}, Avg Iters={:.3}, Finished={:.3}",
                stats.hoe, stats.avg_iterations, stats.finished_ratio
            );
        }
    }

    println!("\n=== DARWIN EXPERIMENT COMPLETE ===");
}
