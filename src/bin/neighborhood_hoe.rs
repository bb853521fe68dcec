//! Recompute per-cell neighborhood higher-order entropy over every token
//! snapshot in a directory.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::process;

use lineage_soup::hoe::{analyze_directory, write_results, DEFAULT_RADIUS};

fn print_help() {
    println!("Neighborhood HOE analysis over token snapshots");
    println!();
    println!("USAGE:");
    println!("    neighborhood-hoe [radius] [tokens_dir]");
    println!();
    println!("DEFAULTS:");
    println!("    radius      {}", DEFAULT_RADIUS);
    println!("    tokens_dir  data/tokens");
}

fn main() {
    let argv: Vec<String> = env::args().collect();

    if argv.iter().any(|a| a == "--help") {
        print_help();
        process::exit(0);
    }

    let radius = if argv.len() > 1 {
        match argv[1].parse::<usize>() {
            Ok(r) if r > 0 => r,
            _ => {
                eprintln!("Invalid radius: {}", argv[1]);
                process::exit(1);
            }
        }
    } else {
        DEFAULT_RADIUS
    };
    let tokens_dir = if argv.len() > 2 {
        PathBuf::from(&argv[2])
    } else {
        PathBuf::from("data/tokens")
    };

    println!("Neighborhood HOE Analysis");
    println!("Von Neumann radius: {}", radius);
    println!("Tokens directory: {}", tokens_dir.display());
    println!();

    let results = match analyze_directory(&tokens_dir, radius) {
        Ok(results) => results,
        Err(e) => {
            eprintln!("Analysis failed: {}", e);
            process::exit(1);
        }
    };

    let output_path = tokens_dir.join("neighborhood_hoe_analysis.csv");
    if let Err(e) = write_results(&results, &output_path) {
        eprintln!("Could not write results: {}", e);
        process::exit(1);
    }
    println!("Saved results to {}", output_path.display());

    // per-epoch summary
    println!("\n=== Summary Statistics by Epoch ===");
    let mut by_epoch: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
    for r in &results {
        by_epoch.entry(r.epoch).or_default().push(r.hoe);
    }
    for (epoch, values) in by_epoch {
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        println!("\nEpoch {}:", epoch);
        println!("  Count: {}", values.len());
        println!("  Mean:  {:.6}", mean);
        println!("  Min:   {:.6}", min);
        println!("  Max:   {:.6}", max);
    }
}
