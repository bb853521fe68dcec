//! Well-mixed soup driver: no grid, random permutation pairing each
//! epoch, per-byte Bernoulli mutation. Prints population metrics on the
//! eval cadence and dumps the first few programs once entropy runs high.

use std::env;
use std::process;

use lineage_soup::config::Config;
use lineage_soup::driver::{stream, stream_rng, SoupDriver};
use lineage_soup::grid::Program;
use lineage_soup::machine::is_instruction;
use rand::Rng;

fn print_help() {
    println!("BFF well-mixed soup simulation");
    println!();
    println!("USAGE:");
    println!("    soup [--config <FILE>]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <FILE>   Load settings from a YAML config file");
    println!("                          (default: configs/small_config.yaml)");
    println!("    --help                Show this help");
}

fn parse_args() -> String {
    let argv: Vec<String> = env::args().collect();
    let mut config_path = "configs/small_config.yaml".to_string();

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

/// Print a program with instruction bytes highlighted and everything
/// unprintable blanked
fn print_program(program: &[u8]) {
    for &b in program {
        let c = if b.is_ascii_graphic() || b == b' ' {
            b as char
        } else {
            ' '
        };
        if is_instruction(b) {
            print!("\x1b[37;1m{}\x1b[0m", c);
        } else {
            print!("{}", c);
        }
    }
    println!();
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

    let mut init_rng = stream_rng(config.random_seed, stream::GRID_INIT);
    let soup: Vec<Program> = (0..config.soup_size)
        .map(|_| (0..config.program_size).map(|_| init_rng.gen::<u8>()).collect())
        .collect();

    let mut driver = SoupDriver::new(
        soup,
        config.mutation_rate,
        config.read_head_position,
        config.program_size + config.write_head_position,
        config.random_seed,
    );

    println!("Starting simulation:");
    println!("  Soup size: {}", config.soup_size);
    println!("  Program size: {}", config.program_size);
    println!("  Mutation rate: {}", config.mutation_rate);
    println!("  Epochs: {}", config.epochs);
    println!();

    for _ in 0..config.epochs {
        let stats = driver.step();

        if stats.epoch % config.eval_interval == 0 {
            println!("Epoch: {}", stats.epoch);
            println!(
                "\tHigher Order Entropy={:.3},\tAvg Iters={:.3},\tAvg Skips={:.3},\tFinished Ratio={:.3},\tTerminated Ratio={:.3}",
                stats.hoe,
                stats.avg_iterations,
                stats.avg_skipped,
                stats.finished_ratio,
                stats.terminated_ratio
            );

            if stats.hoe > 1.0 {
                println!("The first {} programs:", config.num_print_programs);
                for program in driver.soup.iter().take(config.num_print_programs) {
                    print_program(program);
                }
            }
        }
    }
}
