//! Neighborhood higher-order-entropy analysis.
//!
//! For every cell of a persisted token snapshot, concatenate the cell's
//! program with all programs in its Von Neumann neighborhood and score
//! the bytes with higher-order entropy. Pockets of replicators light up
//! because their neighborhoods compress far better than random soup.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::grid::von_neumann_neighbors;
use crate::metrics::higher_order_entropy;
use crate::snapshot::{read_token_snapshot, TokenSnapshot};

/// Default Von Neumann radius for neighborhood scoring
pub const DEFAULT_RADIUS: usize = 10;

/// HOE score for one cell's neighborhood
#[derive(Clone, Debug)]
pub struct HoeResult {
    pub epoch: usize,
    pub grid_x: usize,
    pub grid_y: usize,
    pub hoe: f64,
    pub neighborhood_size: usize,
    pub total_bytes: usize,
}

/// Score every cell of one snapshot. Cells are processed in parallel and
/// results come back sorted row-major.
pub fn analyze_snapshot(snapshot: &TokenSnapshot, radius: usize) -> Vec<HoeResult> {
    let width = snapshot.width;
    let height = snapshot.height;

    let mut results: Vec<HoeResult> = (0..width * height)
        .into_par_iter()
        .map(|idx| {
            let x = idx % width;
            let y = idx / width;

            let neighbors = von_neumann_neighbors(x, y, width, height, radius);
            let mut bytes = Vec::new();
            if let Some(program) = snapshot.program(x, y) {
                bytes.extend_from_slice(program);
            }
            for &(nx, ny) in &neighbors {
                if let Some(program) = snapshot.program(nx, ny) {
                    bytes.extend_from_slice(program);
                }
            }

            HoeResult {
                epoch: snapshot.epoch,
                grid_x: x,
                grid_y: y,
                hoe: higher_order_entropy(&bytes),
                neighborhood_size: neighbors.len() + 1,
                total_bytes: bytes.len(),
            }
        })
        .collect();

    results.sort_by(|a, b| {
        (a.epoch, a.grid_y, a.grid_x).cmp(&(b.epoch, b.grid_y, b.grid_x))
    });
    results
}

/// All `tokens_epoch_*.csv` files in a directory, sorted by name
pub fn find_token_snapshots(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension().is_some_and(|ext| ext == "csv")
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("tokens_epoch_"))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Analyze every token snapshot in a directory, printing per-epoch
/// summary statistics along the way
pub fn analyze_directory(dir: &Path, radius: usize) -> std::io::Result<Vec<HoeResult>> {
    let files = find_token_snapshots(dir)?;
    if files.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no token CSV files found in {}", dir.display()),
        ));
    }

    let mut all_results = Vec::new();
    for file in &files {
        println!("Reading {}...", file.display());
        let snapshot = read_token_snapshot(file)?;
        println!(
            "  Grid size: {}x{}, Epoch: {}",
            snapshot.width, snapshot.height, snapshot.epoch
        );

        let results = analyze_snapshot(&snapshot, radius);
        if !results.is_empty() {
            let min = results.iter().map(|r| r.hoe).fold(f64::INFINITY, f64::min);
            let max = results.iter().map(|r| r.hoe).fold(f64::NEG_INFINITY, f64::max);
            let mean = results.iter().map(|r| r.hoe).sum::<f64>() / results.len() as f64;
            println!("  HOE range: [{:.4}, {:.4}], mean: {:.4}", min, max, mean);
        }
        all_results.extend(results);
    }

    Ok(all_results)
}

/// Write `epoch,grid_x,grid_y,hoe,neighborhood_size,total_bytes` rows
pub fn write_results(results: &[HoeResult], path: &Path) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);

    writeln!(w, "epoch,grid_x,grid_y,hoe,neighborhood_size,total_bytes")?;
    for r in results {
        writeln!(
            w,
            "{},{},{},{:.10},{},{}",
            r.epoch, r.grid_x, r.grid_y, r.hoe, r.neighborhood_size, r.total_bytes
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Grid, TokenProgram};
    use crate::snapshot::{token_snapshot_path, write_token_snapshot};
    use crate::tracer::init_tokens;
    use rand::Rng;
    use rand::{rngs::StdRng, SeedableRng};

    fn snapshot_from(
        name: &str,
        programs: Vec<Vec<u8>>,
        width: usize,
        height: usize,
    ) -> TokenSnapshot {
        let mut grid: Grid<TokenProgram> = Grid::new(width, height, programs[0].len());
        for (idx, program) in programs.iter().enumerate() {
            grid.set(idx % width, idx / width, init_tokens(program, 0));
        }
        let dir = std::env::temp_dir().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        let path = token_snapshot_path(&dir, 3);
        write_token_snapshot(&grid, &path, 3).unwrap();
        let snapshot = read_token_snapshot(&path).unwrap();
        let _ = std::fs::remove_dir_all(dir);
        snapshot
    }

    #[test]
    fn every_cell_gets_a_score_in_row_major_order() {
        let programs = vec![vec![b'a'; 32]; 12];
        let snapshot = snapshot_from("lineage_soup_hoe_rows", programs, 4, 3);
        let results = analyze_snapshot(&snapshot, 2);

        assert_eq!(results.len(), 12);
        assert_eq!((results[0].grid_x, results[0].grid_y), (0, 0));
        assert_eq!((results[1].grid_x, results[1].grid_y), (1, 0));
        assert_eq!((results[11].grid_x, results[11].grid_y), (3, 2));
        // corner cell: itself + 5 neighbors at r = 2, 32 bytes each
        assert_eq!(results[0].neighborhood_size, 6);
        assert_eq!(results[0].total_bytes, 6 * 32);
    }

    #[test]
    fn replicator_pocket_scores_above_random_soup() {
        let mut rng = StdRng::seed_from_u64(8);
        let copies: Vec<Vec<u8>> = vec![b"[[{.>]-]".repeat(8); 25];
        let noise: Vec<Vec<u8>> = (0..25)
            .map(|_| (0..64).map(|_| rng.gen::<u8>()).collect())
            .collect();

        let pocket = analyze_snapshot(&snapshot_from("lineage_soup_hoe_pocket", copies, 5, 5), 2);
        let soup = analyze_snapshot(&snapshot_from("lineage_soup_hoe_soup", noise, 5, 5), 2);

        let pocket_mean: f64 = pocket.iter().map(|r| r.hoe).sum::<f64>() / 25.0;
        let soup_mean: f64 = soup.iter().map(|r| r.hoe).sum::<f64>() / 25.0;
        assert!(pocket_mean > soup_mean);
    }

    #[test]
    fn directory_scan_finds_only_token_csvs() {
        let dir = std::env::temp_dir().join("lineage_soup_hoe_scan");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("tokens_epoch_0002.csv"), "").unwrap();
        std::fs::write(dir.join("tokens_epoch_0001.csv"), "").unwrap();
        std::fs::write(dir.join("pairings_epoch_0001.csv"), "").unwrap();
        std::fs::write(dir.join("notes.txt"), "").unwrap();

        let files = find_token_snapshots(&dir).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["tokens_epoch_0001.csv", "tokens_epoch_0002.csv"]);

        let _ = std::fs::remove_dir_all(dir);
    }
}
