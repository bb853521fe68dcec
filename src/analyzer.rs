//! Forward-pass lineage analysis.
//!
//! Starting from a known replicator at one grid position, chase its
//! descendants forward through persisted snapshots: at each epoch the
//! frontier expands into a 13-cell neighborhood, candidates are kept when
//! they stay above a similarity threshold, and each distinct candidate
//! program is verified once on the byte-machine through a shared
//! memoization cache.
//!
//! Pairing snapshots are the preferred input because their partner
//! pointers say exactly which cells exchanged tape halves; token
//! snapshots work as a fallback with the plain neighborhood.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rayon::prelude::*;

use crate::grid::{clean_program, Program};
use crate::machine::{self, ZERO};
use crate::snapshot::{
    pairing_snapshot_path, read_pairing_snapshot, read_token_snapshot, token_snapshot_path,
};

/// Similarity threshold used when none is configured
pub const DEFAULT_THETA: f64 = 0.9;

/// Iteration ceiling for the self-replication test
pub const REPLICATOR_MAX_ITER: usize = 1024;

/// Positional similarity of two equal-length programs; length mismatch
/// scores zero. Symmetric, and 1.0 for a program against itself.
pub fn similarity(a: &[u8], b: &[u8]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let matches = a.iter().zip(b).filter(|(x, y)| x == y).count();
    matches as f64 / a.len() as f64
}

/// Self-replication test: run the cleaned program against a '0'-filled
/// partner and accept iff the resulting tape's halves are byte-identical.
pub fn is_replicator(program: &[u8]) -> bool {
    if program.is_empty() {
        return false;
    }

    let cleaned = clean_program(program);
    let len = cleaned.len();
    let mut tape = cleaned;
    tape.extend(std::iter::repeat(ZERO).take(len));

    let result = machine::execute(tape, 0, len, 0, REPLICATOR_MAX_ITER);
    let (first, second) = result.tape.split_at(len);
    first == second
}

/// A verified replicator sighting; one lineage node
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReplicatorLocation {
    pub epoch: usize,
    pub x: usize,
    pub y: usize,
    pub program: Program,
}

/// The 13-cell expanded neighborhood: the cell itself, the four
/// 4-neighbors, the four distance-2 axis cells, and the four diagonals.
/// Wider than the pairing rule so lineage that crossed a diagonal during
/// pair-mediated transfer is not lost.
pub fn expanded_neighbors(x: i64, y: i64) -> [(i64, i64); 13] {
    [
        (x, y),
        (x - 1, y),
        (x + 1, y),
        (x, y - 1),
        (x, y + 1),
        (x - 2, y),
        (x + 2, y),
        (x, y - 2),
        (x, y + 2),
        (x - 1, y - 1),
        (x + 1, y + 1),
        (x + 1, y - 1),
        (x - 1, y + 1),
    ]
}

/// Thread-safe memoization of the replication test, keyed by program
/// bytes so a program repeated across cells and epochs is checked once.
#[derive(Default)]
pub struct ReplicatorCache {
    inner: Mutex<HashMap<Program, bool>>,
}

impl ReplicatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, program: &[u8]) -> Option<bool> {
        self.inner.lock().unwrap().get(program).copied()
    }

    pub fn insert(&self, program: Program, verdict: bool) {
        self.inner.lock().unwrap().insert(program, verdict);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which snapshot format feeds the forward pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotKind {
    /// Per-cell rows with pair-partner pointers (preferred)
    Pairing,
    /// Per-token rows without pairing information
    Token,
}

/// One cell as the forward pass sees it
struct CellData {
    program: Program,
    /// Pair partner, (-1, -1) for mutation-only; None for token snapshots
    partner: Option<(i64, i64)>,
}

type EpochCells = HashMap<(usize, usize), CellData>;

fn load_epoch(dir: &Path, kind: SnapshotKind, epoch: usize) -> std::io::Result<EpochCells> {
    match kind {
        SnapshotKind::Pairing => {
            let snapshot = read_pairing_snapshot(&pairing_snapshot_path(dir, epoch))?;
            Ok(snapshot
                .cells
                .into_iter()
                .map(|(pos, cell)| {
                    (
                        pos,
                        CellData {
                            program: cell.program,
                            partner: Some(cell.partner),
                        },
                    )
                })
                .collect())
        }
        SnapshotKind::Token => {
            let snapshot = read_token_snapshot(&token_snapshot_path(dir, epoch))?;
            Ok(snapshot
                .programs
                .into_iter()
                .map(|(pos, program)| {
                    (
                        pos,
                        CellData {
                            program: clean_program(&program),
                            partner: None,
                        },
                    )
                })
                .collect())
        }
    }
}

/// Forward pass parameters
#[derive(Clone, Debug)]
pub struct ForwardPassConfig {
    pub snapshots_dir: PathBuf,
    pub kind: SnapshotKind,
    pub start_epoch: usize,
    pub start_x: usize,
    pub start_y: usize,
    pub end_epoch: usize,
    pub grid_width: usize,
    pub grid_height: usize,
    pub theta: f64,
}

/// Replicator locations per epoch
pub type ReplicatorsByEpoch = BTreeMap<usize, BTreeSet<ReplicatorLocation>>;

/// Chase a replicator's descendants from `start_epoch` to `end_epoch`.
///
/// A missing or unreadable snapshot mid-pass logs the error and stops,
/// returning everything collected so far. The seed program is verified
/// first; a non-replicating seed is kept (with a warning) so the pass can
/// still map where its variants went.
pub fn find_replicators(config: &ForwardPassConfig) -> std::io::Result<ReplicatorsByEpoch> {
    let cache = ReplicatorCache::new();
    let mut replicators: ReplicatorsByEpoch = BTreeMap::new();

    let start_cells = load_epoch(&config.snapshots_dir, config.kind, config.start_epoch)?;
    let seed = start_cells
        .get(&(config.start_x, config.start_y))
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!(
                    "no program at ({}, {}) in epoch {}",
                    config.start_x, config.start_y, config.start_epoch
                ),
            )
        })?;

    let seed_program = seed.program.clone();
    let seed_ok = is_replicator(&seed_program);
    if !seed_ok {
        eprintln!("Warning: seed program is not a self-replicator");
    }
    cache.insert(seed_program.clone(), seed_ok);

    replicators
        .entry(config.start_epoch)
        .or_default()
        .insert(ReplicatorLocation {
            epoch: config.start_epoch,
            x: config.start_x,
            y: config.start_y,
            program: seed_program,
        });

    for epoch in config.start_epoch..config.end_epoch {
        let frontier = match replicators.get(&epoch) {
            Some(set) if !set.is_empty() => set.clone(),
            _ => {
                println!("Epoch {}: no replicators to propagate", epoch);
                continue;
            }
        };

        let next_cells = match load_epoch(&config.snapshots_dir, config.kind, epoch + 1) {
            Ok(cells) => cells,
            Err(e) => {
                eprintln!("Error reading snapshot for epoch {}: {}", epoch + 1, e);
                break;
            }
        };

        let candidates = collect_candidates(config, &frontier, &next_cells, epoch + 1);
        println!(
            "Epoch {} -> {}: {} frontier, {} candidates",
            epoch,
            epoch + 1,
            frontier.len(),
            candidates.len()
        );

        // verify each distinct program once, in parallel
        let unknown: BTreeSet<Program> = candidates
            .iter()
            .map(|c| c.program.clone())
            .filter(|p| cache.get(p).is_none())
            .collect();
        let verdicts: Vec<(Program, bool)> = unknown
            .into_par_iter()
            .map(|program| {
                let verdict = is_replicator(&program);
                (program, verdict)
            })
            .collect();
        for (program, verdict) in verdicts {
            cache.insert(program, verdict);
        }

        let verified = replicators.entry(epoch + 1).or_default();
        for candidate in candidates {
            if cache.get(&candidate.program) == Some(true) {
                verified.insert(candidate);
            }
        }
        println!(
            "  {} replicators at epoch {}, cache holds {} programs",
            replicators[&(epoch + 1)].len(),
            epoch + 1,
            cache.len()
        );
    }

    Ok(replicators)
}

/// Gather similarity-filtered candidate locations for one epoch step
fn collect_candidates(
    config: &ForwardPassConfig,
    frontier: &BTreeSet<ReplicatorLocation>,
    next_cells: &EpochCells,
    next_epoch: usize,
) -> BTreeSet<ReplicatorLocation> {
    let mut candidates = BTreeSet::new();

    for replicator in frontier {
        let rx = replicator.x as i64;
        let ry = replicator.y as i64;

        for (nx, ny) in expanded_neighbors(rx, ry) {
            if nx < 0
                || nx >= config.grid_width as i64
                || ny < 0
                || ny >= config.grid_height as i64
            {
                continue;
            }
            let pos = (nx as usize, ny as usize);
            let Some(cell) = next_cells.get(&pos) else {
                continue;
            };

            match cell.partner {
                // token snapshots carry no pairing data; take the
                // neighborhood at face value
                None => {
                    if similarity(&replicator.program, &cell.program) >= config.theta {
                        candidates.insert(ReplicatorLocation {
                            epoch: next_epoch,
                            x: pos.0,
                            y: pos.1,
                            program: cell.program.clone(),
                        });
                    }
                }
                Some(partner) => {
                    // the neighbor descended from a pair with the
                    // replicator's cell: both ends of that pair are
                    // candidates
                    if partner == (rx, ry) {
                        if similarity(&replicator.program, &cell.program) >= config.theta {
                            candidates.insert(ReplicatorLocation {
                                epoch: next_epoch,
                                x: pos.0,
                                y: pos.1,
                                program: cell.program.clone(),
                            });
                        }
                        if let Some(own) = next_cells.get(&(replicator.x, replicator.y)) {
                            if similarity(&replicator.program, &own.program) >= config.theta {
                                candidates.insert(ReplicatorLocation {
                                    epoch: next_epoch,
                                    x: replicator.x,
                                    y: replicator.y,
                                    program: own.program.clone(),
                                });
                            }
                        }
                    }

                    // mutation-only cell: it descended from itself
                    if partner == (-1, -1) && pos == (replicator.x, replicator.y) {
                        if similarity(&replicator.program, &cell.program) >= config.theta {
                            candidates.insert(ReplicatorLocation {
                                epoch: next_epoch,
                                x: pos.0,
                                y: pos.1,
                                program: cell.program.clone(),
                            });
                        }
                    }
                }
            }
        }
    }

    candidates
}

/// Write every verified sighting as `epoch,grid_x,grid_y,program`
pub fn write_results_csv(
    replicators: &ReplicatorsByEpoch,
    path: &Path,
) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);

    writeln!(w, "epoch,grid_x,grid_y,program")?;
    for locations in replicators.values() {
        for location in locations {
            let text: String = location.program.iter().map(|&b| b as char).collect();
            writeln!(
                w,
                "{},{},{},\"{}\"",
                location.epoch, location.x, location.y, text
            )?;
        }
    }
    Ok(())
}

/// Lineage graph over unique programs. Labels alternate around zero in
/// first-appearance order: 0, 1, -1, 2, -2, ...
#[derive(Debug, Default)]
pub struct LineageGraph {
    /// label -> program, in assignment order
    pub vertices: Vec<(i64, Program)>,
    /// (parent epoch, parent label, child label)
    pub edges: BTreeSet<(usize, i64, i64)>,
}

fn alternating_label(index: usize) -> i64 {
    if index == 0 {
        0
    } else if index % 2 == 1 {
        (index as i64 + 1) / 2
    } else {
        -(index as i64 / 2)
    }
}

/// Derive the lineage graph from the forward-pass result: a vertex per
/// unique program, an edge whenever a program at epoch e has a verified
/// sighting at e+1 inside its expanded neighborhood.
pub fn build_lineage_graph(replicators: &ReplicatorsByEpoch) -> LineageGraph {
    let mut graph = LineageGraph::default();
    let mut labels: HashMap<Program, i64> = HashMap::new();

    for locations in replicators.values() {
        for location in locations {
            if !labels.contains_key(&location.program) {
                let label = alternating_label(labels.len());
                labels.insert(location.program.clone(), label);
                graph.vertices.push((label, location.program.clone()));
            }
        }
    }

    for (&epoch, parents) in replicators {
        let Some(children) = replicators.get(&(epoch + 1)) else {
            continue;
        };
        for parent in parents {
            let neighborhood = expanded_neighbors(parent.x as i64, parent.y as i64);
            for child in children {
                if neighborhood.contains(&(child.x as i64, child.y as i64)) {
                    graph.edges.insert((
                        epoch,
                        labels[&parent.program],
                        labels[&child.program],
                    ));
                }
            }
        }
    }

    graph
}

impl LineageGraph {
    /// Write `label,program` and `epoch,parent_label,child_label` CSVs
    pub fn write_csv(&self, vertices_path: &Path, edges_path: &Path) -> std::io::Result<()> {
        let mut w = BufWriter::new(File::create(vertices_path)?);
        writeln!(w, "label,program")?;
        for (label, program) in &self.vertices {
            let text: String = program.iter().map(|&b| b as char).collect();
            writeln!(w, "{},\"{}\"", label, text)?;
        }

        let mut w = BufWriter::new(File::create(edges_path)?);
        writeln!(w, "epoch,parent_label,child_label")?;
        for (epoch, parent, child) in &self.edges {
            writeln!(w, "{},{},{}", epoch, parent, child)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Grid, TokenProgram};
    use crate::snapshot::{write_pairing_snapshot, write_token_snapshot};
    use crate::tracer::init_tokens;

    const L: usize = 16;

    /// A hand-built copier: a loop that walks head0 across the program
    /// while head1 writes the mirror position in the '0'-filled half.
    fn copier() -> Program {
        let mut p = b"[.>}]".to_vec();
        p.resize(L, b'0');
        p
    }

    fn junk() -> Program {
        vec![b'+'; L]
    }

    #[test]
    fn similarity_is_symmetric_and_reflexive() {
        let a = copier();
        let b = junk();
        assert_eq!(similarity(&a, &a), 1.0);
        assert_eq!(similarity(&a, &b), similarity(&b, &a));
        assert_eq!(similarity(&a, &b[..4]), 0.0);
    }

    #[test]
    fn single_byte_difference_scores_just_below_one() {
        let a = copier();
        let mut b = a.clone();
        b[L - 1] = b'x';
        let expected = (L - 1) as f64 / L as f64;
        assert!((similarity(&a, &b) - expected).abs() < 1e-12);
    }

    #[test]
    fn copier_passes_the_replication_test() {
        assert!(is_replicator(&copier()));
    }

    #[test]
    fn inert_and_arithmetic_programs_fail_the_test() {
        assert!(!is_replicator(&junk()));
        assert!(!is_replicator(&vec![b'q'; L]));
        assert!(!is_replicator(&[]));
    }

    #[test]
    fn expanded_neighborhood_has_thirteen_cells() {
        let cells = expanded_neighbors(5, 5);
        assert_eq!(cells.len(), 13);
        let unique: BTreeSet<_> = cells.iter().collect();
        assert_eq!(unique.len(), 13);
        assert!(cells.contains(&(5, 5)));
        assert!(cells.contains(&(4, 4)));
        assert!(cells.contains(&(7, 5)));
        assert!(!cells.contains(&(7, 7)));
    }

    #[test]
    fn cache_deduplicates_by_program_bytes() {
        let cache = ReplicatorCache::new();
        assert!(cache.get(b"abc").is_none());
        cache.insert(b"abc".to_vec(), true);
        cache.insert(b"abc".to_vec(), true);
        assert_eq!(cache.get(b"abc"), Some(true));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn alternating_labels_spiral_around_zero() {
        let labels: Vec<i64> = (0..7).map(alternating_label).collect();
        assert_eq!(labels, vec![0, 1, -1, 2, -2, 3, -3]);
    }

    fn write_pairing_epoch(
        dir: &Path,
        epoch: usize,
        cells: &[((usize, usize), Program, (i64, i64))],
    ) {
        let mut grid: Grid<Program> = Grid::new(8, 8, L);
        let mut partners = vec![(-1i64, -1i64); 64];
        // default everything to junk singles, then overlay the cells
        for idx in 0..64 {
            let (x, y) = (idx % 8, idx / 8);
            grid.set(x, y, junk());
        }
        for ((x, y), program, partner) in cells {
            grid.set(*x, *y, program.clone());
            partners[*y * 8 + *x] = *partner;
        }
        write_pairing_snapshot(&grid, &partners, &pairing_snapshot_path(dir, epoch), epoch)
            .unwrap();
    }

    #[test]
    fn forward_pass_follows_pairing_partners() {
        let dir = std::env::temp_dir().join("lineage_soup_fp_pairing");
        std::fs::create_dir_all(&dir).unwrap();

        let r = copier();
        // epoch 100: the seed sits alone at (3, 3)
        write_pairing_epoch(&dir, 100, &[((3, 3), r.clone(), (-1, -1))]);
        // epoch 101: (3, 3) paired with (4, 3); the copy landed on both
        write_pairing_epoch(
            &dir,
            101,
            &[((3, 3), r.clone(), (4, 3)), ((4, 3), r.clone(), (3, 3))],
        );
        // epoch 102: both sit unpaired
        write_pairing_epoch(
            &dir,
            102,
            &[((3, 3), r.clone(), (-1, -1)), ((4, 3), r.clone(), (-1, -1))],
        );

        let config = ForwardPassConfig {
            snapshots_dir: dir.clone(),
            kind: SnapshotKind::Pairing,
            start_epoch: 100,
            start_x: 3,
            start_y: 3,
            end_epoch: 102,
            grid_width: 8,
            grid_height: 8,
            theta: DEFAULT_THETA,
        };
        let replicators = find_replicators(&config).unwrap();

        assert_eq!(replicators[&100].len(), 1);
        assert_eq!(replicators[&101].len(), 2);
        assert_eq!(replicators[&102].len(), 2);
        for locations in replicators.values() {
            for location in locations {
                assert!(is_replicator(&location.program));
                assert!(similarity(&location.program, &clean_program(&r)) >= 0.9);
            }
        }

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn forward_pass_stops_at_missing_snapshot() {
        let dir = std::env::temp_dir().join("lineage_soup_fp_missing");
        std::fs::create_dir_all(&dir).unwrap();

        write_pairing_epoch(&dir, 10, &[((1, 1), copier(), (-1, -1))]);
        // epoch 11 intentionally absent

        let config = ForwardPassConfig {
            snapshots_dir: dir.clone(),
            kind: SnapshotKind::Pairing,
            start_epoch: 10,
            start_x: 1,
            start_y: 1,
            end_epoch: 20,
            grid_width: 8,
            grid_height: 8,
            theta: DEFAULT_THETA,
        };
        let replicators = find_replicators(&config).unwrap();
        // the seed epoch survives; the pass broke out cleanly
        assert_eq!(replicators.len(), 1);
        assert_eq!(replicators[&10].len(), 1);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn forward_pass_over_token_snapshots_uses_plain_neighborhood() {
        let dir = std::env::temp_dir().join("lineage_soup_fp_tokens");
        std::fs::create_dir_all(&dir).unwrap();

        let r = copier();
        for (epoch, positions) in [(5usize, vec![(2usize, 2usize)]), (6, vec![(2, 2), (2, 3)])] {
            let mut grid: Grid<TokenProgram> = Grid::new(6, 6, L);
            for y in 0..6 {
                for x in 0..6 {
                    let program = if positions.contains(&(x, y)) { r.clone() } else { junk() };
                    grid.set(x, y, init_tokens(&program, epoch as u64));
                }
            }
            write_token_snapshot(&grid, &token_snapshot_path(&dir, epoch), epoch).unwrap();
        }

        let config = ForwardPassConfig {
            snapshots_dir: dir.clone(),
            kind: SnapshotKind::Token,
            start_epoch: 5,
            start_x: 2,
            start_y: 2,
            end_epoch: 6,
            grid_width: 6,
            grid_height: 6,
            theta: DEFAULT_THETA,
        };
        let replicators = find_replicators(&config).unwrap();
        assert_eq!(replicators[&6].len(), 2);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn graph_links_consecutive_epoch_sightings() {
        let mut replicators: ReplicatorsByEpoch = BTreeMap::new();
        let r = clean_program(&copier());
        for (epoch, x, y) in [(100, 3, 3), (101, 3, 3), (101, 4, 3)] {
            replicators.entry(epoch).or_default().insert(ReplicatorLocation {
                epoch,
                x,
                y,
                program: r.clone(),
            });
        }

        let graph = build_lineage_graph(&replicators);
        assert_eq!(graph.vertices.len(), 1);
        assert_eq!(graph.vertices[0].0, 0);
        // (3,3)->(3,3) and (3,3)->(4,3) collapse onto one labeled edge
        assert_eq!(graph.edges.len(), 1);
        assert!(graph.edges.contains(&(100, 0, 0)));
    }
}
