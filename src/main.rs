//! Grid driver: evolve a 2-D population of plain byte programs, writing
//! pairing snapshots every epoch and visualization frames on the
//! configured cadence. A WebSocket channel pushes live frames and accepts
//! pause / play.

use std::env;
use std::fs;
use std::path::Path;
use std::process;

use lineage_soup::config::Config;
use lineage_soup::driver::{stream, stream_rng, GridDriver, PauseGate};
use lineage_soup::grid::{Grid, Program};
use lineage_soup::live::{LiveServer, DEFAULT_PORT};
use lineage_soup::snapshot::{pairing_snapshot_path, write_pairing_snapshot};

/// Spatial pairing radius used by the grid drivers
const PAIRING_RADIUS: usize = 2;

fn print_help() {
    println!("BFF grid simulation with pairing snapshots");
    println!();
    println!("USAGE:");
    println!("    lineage-soup [--config <FILE>]");
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

fn load_config(path: &str) -> Config {
    let config = match Config::from_yaml(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config '{}': {}", path, e);
            process::exit(1);
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("Config validation error: {}", e);
        process::exit(1);
    }
    config
}

fn main() {
    let config_path = parse_args();
    let config = load_config(&config_path);

    if !config.use_grid {
        eprintln!("This driver needs use_grid with grid_width and grid_height; see the soup binary for the well-mixed mode");
        process::exit(1);
    }

    let mut grid: Grid<Program> =
        Grid::new(config.grid_width, config.grid_height, config.program_size);
    grid.init_random(&mut stream_rng(config.random_seed, stream::GRID_INIT));

    let mut driver = GridDriver::new(
        grid,
        config.mutation_rate,
        PAIRING_RADIUS,
        config.read_head_position,
        config.program_size + config.write_head_position,
        config.random_seed,
    );

    println!("Starting grid simulation:");
    println!(
        "  Grid size: {}x{} ({} programs)",
        config.grid_width,
        config.grid_height,
        config.grid_width * config.grid_height
    );
    println!("  Program size: {}", config.program_size);
    println!("  Mutation rate: {}", config.mutation_rate);
    println!("  Epochs: {}", config.epochs);
    println!("  Visualization interval: {}", config.visualization_interval);
    println!();

    let pairings_dir = Path::new("data/pairings");
    let vis_dir = Path::new("data/visualizations");
    for dir in [pairings_dir, vis_dir] {
        if let Err(e) = fs::create_dir_all(dir) {
            eprintln!("Could not create {}: {}", dir.display(), e);
            process::exit(1);
        }
    }

    // live push is best-effort; a dead port just disables it
    let gate = PauseGate::new();
    let live = match LiveServer::start(DEFAULT_PORT, gate.flag()) {
        Ok(server) => Some(server),
        Err(e) => {
            eprintln!("WebSocket server unavailable: {}", e);
            None
        }
    };

    if let Err(e) = driver.grid.save_html(vis_dir.join("grid_epoch_0000.html")) {
        eprintln!("Could not save initial visualization: {}", e);
    }

    for _ in 0..config.epochs {
        gate.wait_while_paused();

        let (stats, partners) = driver.step();
        let epoch = stats.epoch;

        let snapshot_path = pairing_snapshot_path(pairings_dir, epoch);
        if let Err(e) = write_pairing_snapshot(&driver.grid, &partners, &snapshot_path, epoch) {
            eprintln!("Could not write pairing snapshot: {}", e);
        }

        if epoch % config.eval_interval == 0 {
            println!("Epoch: {}", epoch);
            println!(
                "\tHigher Order Entropy={:.3},\tAvg Iters={:.3},\tAvg Skips={:.3},\tFinished Ratio={:.3},\tTerminated Ratio={:.3}",
                stats.hoe,
                stats.avg_iterations,
                stats.avg_skipped,
                stats.finished_ratio,
                stats.terminated_ratio
            );
        }

        if epoch % config.visualization_interval == 0 {
            let html = vis_dir.join(format!("grid_epoch_{:04}.html", epoch));
            let ppm = vis_dir.join(format!("grid_epoch_{:04}.ppm", epoch));
            if let Err(e) = driver.grid.save_html(&html).and_then(|_| driver.grid.save_ppm(&ppm)) {
                eprintln!("Could not save visualization: {}", e);
            } else {
                println!("\tSaved visualization: {}", html.display());
            }
        }

        if let Some(ref server) = live {
            if server.has_clients() {
                let frame = driver.grid.frame_json(
                    epoch,
                    stats.hoe,
                    stats.avg_iterations,
                    stats.finished_ratio,
                );
                server.broadcast(&frame.to_string());
            }
        }
    }

    let final_html = vis_dir.join(format!("grid_epoch_{:04}.html", driver.epoch()));
    if let Err(e) = driver.grid.save_html(&final_html) {
        eprintln!("Could not save final visualization: {}", e);
    } else {
        println!("\nSaved final visualization: {}", final_html.display());
    }
    println!("\nSimulation complete!");
}
