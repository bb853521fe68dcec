//! Forward-pass lineage analysis over persisted snapshots.
//!
//! Given a known replicator at (x, y) in a start epoch, chase its
//! descendants to the end epoch, write every verified sighting to CSV,
//! and derive the lineage graph over unique programs.

use std::collections::BTreeMap;
use std::env;
use std::process;

use lineage_soup::analyzer::{
    build_lineage_graph, find_replicators, write_results_csv, ForwardPassConfig,
    ReplicatorLocation, SnapshotKind, DEFAULT_THETA,
};

fn print_help() {
    println!("Forward-pass replicator lineage analysis");
    println!();
    println!("USAGE:");
    println!("    forward-pass <snapshots_dir> <start_epoch> <grid_x> <grid_y> <last_epoch> <grid_width> <grid_height> [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --tokens          Read token snapshots instead of pairing snapshots");
    println!("    --theta <T>       Similarity threshold in (0, 1] (default: 0.9)");
    println!("    --help            Show this help");
    println!();
    println!("EXAMPLE:");
    println!("    forward-pass data/pairings 16324 14 27 16327 64 64");
}

fn main() {
    let argv: Vec<String> = env::args().collect();

    if argv.iter().any(|a| a == "--help") {
        print_help();
        process::exit(0);
    }

    let mut positional = Vec::new();
    let mut kind = SnapshotKind::Pairing;
    let mut theta = DEFAULT_THETA;

    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--tokens" => kind = SnapshotKind::Token,
            "--theta" => {
                i += 1;
                if i >= argv.len() {
                    eprintln!("--theta requires a value");
                    process::exit(1);
                }
                theta = match argv[i].parse::<f64>() {
                    Ok(t) if t > 0.0 && t <= 1.0 => t,
                    _ => {
                        eprintln!("Invalid theta: {}", argv[i]);
                        process::exit(1);
                    }
                };
            }
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    if positional.len() != 7 {
        print_help();
        process::exit(1);
    }

    let parse = |s: &str| -> usize {
        s.parse().unwrap_or_else(|_| {
            eprintln!("Invalid number: {}", s);
            process::exit(1);
        })
    };

    let config = ForwardPassConfig {
        snapshots_dir: positional[0].clone().into(),
        kind,
        start_epoch: parse(&positional[1]),
        start_x: parse(&positional[2]),
        start_y: parse(&positional[3]),
        end_epoch: parse(&positional[4]),
        grid_width: parse(&positional[5]),
        grid_height: parse(&positional[6]),
        theta,
    };

    println!("Forward Pass Analysis");
    println!("Snapshots: {} ({:?})", config.snapshots_dir.display(), config.kind);
    println!("Start epoch: {}", config.start_epoch);
    println!("Start position: ({}, {})", config.start_x, config.start_y);
    println!("Last epoch: {}", config.end_epoch);
    println!("Grid size: {}x{}", config.grid_width, config.grid_height);
    println!("Similarity threshold: {}", config.theta);
    println!();

    let replicators = match find_replicators(&config) {
        Ok(replicators) => replicators,
        Err(e) => {
            eprintln!("Forward pass failed: {}", e);
            process::exit(1);
        }
    };

    println!("\n=== Summary ===");
    let mut total = 0usize;
    let mut first_appearance: BTreeMap<Vec<u8>, ReplicatorLocation> = BTreeMap::new();
    for (epoch, locations) in &replicators {
        println!("Epoch {}: {} replicators", epoch, locations.len());
        total += locations.len();
        for location in locations {
            first_appearance
                .entry(location.program.clone())
                .or_insert_with(|| location.clone());
        }
    }

    println!("\nTotal replicators found: {}", total);
    println!("Unique replicator programs: {}", first_appearance.len());
    println!("\nUnique replicator programs:");
    for (number, (program, first)) in first_appearance.iter().enumerate() {
        let text: String = program.iter().map(|&b| b as char).collect();
        println!("  [{}] {}", number + 1, text);
        println!(
            "      First appeared at epoch {}, position ({}, {})",
            first.epoch, first.x, first.y
        );
    }

    let results_path = config.snapshots_dir.join("forward_pass_results.csv");
    match write_results_csv(&replicators, &results_path) {
        Ok(()) => println!("\nResults saved to: {}", results_path.display()),
        Err(e) => eprintln!("Could not write results: {}", e),
    }

    let graph = build_lineage_graph(&replicators);
    let vertices_path = config.snapshots_dir.join("lineage_vertices.csv");
    let edges_path = config.snapshots_dir.join("lineage_edges.csv");
    match graph.write_csv(&vertices_path, &edges_path) {
        Ok(()) => println!(
            "Lineage graph saved to: {} / {}",
            vertices_path.display(),
            edges_path.display()
        ),
        Err(e) => eprintln!("Could not write lineage graph: {}", e),
    }
}
