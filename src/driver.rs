//! Epoch drivers.
//!
//! One epoch: snapshot the population into a working soup, ask the grid
//! for a pairing, run every proper pair on the byte-machine in parallel,
//! then serially split each result tape back into two programs, mutate,
//! and write back. Mutation-only cells skip execution and just mutate.
//!
//! All RNG draws (pairing, mutation) happen on the control thread in
//! record-visit order; workers are pure. With a fixed master seed two
//! runs produce byte-identical populations regardless of thread count.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::prelude::*;
use rayon::prelude::*;

use crate::grid::{Grid, PairRecord, Program, TokenProgram};
use crate::machine::{self, ExecState};
use crate::metrics::higher_order_entropy;
use crate::tracer::{self, Token};

/// SplitMix64 mixer used to derive independent RNG stream seeds from the
/// master seed
#[inline]
pub fn split_mix_64(seed: u64) -> u64 {
    let mut z = seed.wrapping_add(0x9e3779b97f4a7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

/// Logically separate RNG streams, one per concern
pub mod stream {
    pub const GRID_INIT: u64 = 0x6772_6964;
    pub const PAIRING: u64 = 0x7061_6972;
    pub const MUTATION: u64 = 0x6d75_7461;
}

/// Derive the RNG for one stream from the master seed
pub fn stream_rng(master_seed: u64, stream: u64) -> StdRng {
    StdRng::seed_from_u64(split_mix_64(master_seed ^ split_mix_64(stream)))
}

/// With probability `rate`, replace exactly one uniformly chosen byte
/// with a uniformly random byte. At most one new lineage marker per
/// program per epoch.
pub fn mutate_single<R: Rng>(program: &mut [u8], rate: f64, rng: &mut R) {
    if rate == 0.0 || program.is_empty() {
        return;
    }
    if rng.gen::<f64>() < rate {
        let pos = rng.gen_range(0..program.len());
        program[pos] = rng.gen::<u8>();
    }
}

/// Token variant of [`mutate_single`]: the replacement is a fresh token
/// tagged with the given epoch and the mutation site.
pub fn mutate_single_token<R: Rng>(
    program: &mut [Token],
    rate: f64,
    epoch: u64,
    rng: &mut R,
) {
    if rate == 0.0 || program.is_empty() {
        return;
    }
    if rng.gen::<f64>() < rate {
        let pos = rng.gen_range(0..program.len());
        program[pos] = Token::new(epoch, pos as u16, rng.gen::<u8>());
    }
}

/// Per-byte Bernoulli sweep: every byte independently mutates with
/// probability `rate`. Used by the well-mixed soup driver only; the
/// tokenized driver must never use this policy because it would retag
/// lineage across whole programs every epoch.
pub fn mutate_sweep<R: Rng>(program: &mut [u8], rate: f64, rng: &mut R) {
    if rate == 0.0 {
        return;
    }
    for byte in program.iter_mut() {
        if rng.gen::<f64>() < rate {
            *byte = rng.gen::<u8>();
        }
    }
}

/// Per-epoch aggregates, computed over proper pairs only
#[derive(Clone, Copy, Debug, Default)]
pub struct EpochStats {
    pub epoch: usize,
    pub avg_iterations: f64,
    pub avg_skipped: f64,
    pub finished_ratio: f64,
    pub terminated_ratio: f64,
    pub hoe: f64,
}

fn accumulate_stats(
    epoch: usize,
    outcomes: &[(usize, usize, ExecState)],
    flattened: &[u8],
) -> EpochStats {
    let pairs = outcomes.len();
    let mut stats = EpochStats {
        epoch,
        hoe: higher_order_entropy(flattened),
        ..EpochStats::default()
    };
    if pairs == 0 {
        return stats;
    }

    for &(iterations, skipped, state) in outcomes {
        stats.avg_iterations += iterations as f64;
        stats.avg_skipped += skipped as f64;
        match state {
            ExecState::Finished => stats.finished_ratio += 1.0,
            ExecState::Terminated => stats.terminated_ratio += 1.0,
            _ => {}
        }
    }
    stats.avg_iterations /= pairs as f64;
    stats.avg_skipped /= pairs as f64;
    stats.finished_ratio /= pairs as f64;
    stats.terminated_ratio /= pairs as f64;
    stats
}

/// Pause flag shared between a driver and its live-push server. The
/// driver blocks between epochs while the flag is set; in-flight pair
/// executions are never cancelled.
#[derive(Clone, Default)]
pub struct PauseGate {
    paused: Arc<AtomicBool>,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.paused)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Sleep in short slices until the flag clears
    pub fn wait_while_paused(&self) {
        while self.is_paused() {
            thread::sleep(Duration::from_millis(100));
        }
    }
}

/// Epoch driver over a grid of plain byte programs
pub struct GridDriver {
    pub grid: Grid<Program>,
    epoch: usize,
    mutation_rate: f64,
    radius: usize,
    head0: usize,
    head1: usize,
    max_iter: usize,
    pairing_rng: StdRng,
    mutation_rng: StdRng,
}

impl GridDriver {
    /// Build a driver over an initialized grid. `head0`/`head1` are the
    /// initial head positions on the concatenated tape; the usual layout
    /// is head0 at the start of A and head1 at the start of B.
    pub fn new(
        grid: Grid<Program>,
        mutation_rate: f64,
        radius: usize,
        head0: usize,
        head1: usize,
        master_seed: u64,
    ) -> Self {
        Self {
            grid,
            epoch: 0,
            mutation_rate,
            radius,
            head0,
            head1,
            max_iter: machine::MAX_ITER,
            pairing_rng: stream_rng(master_seed, stream::PAIRING),
            mutation_rng: stream_rng(master_seed, stream::MUTATION),
        }
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Advance the population by one epoch. Returns the epoch stats and
    /// the per-cell pair partners for the pairing snapshot.
    pub fn step(&mut self) -> (EpochStats, Vec<(i64, i64)>) {
        let width = self.grid.width();
        let mut soup: Vec<Program> = self.grid.cells().to_vec();
        let records = self.grid.spatial_pairing(&mut self.pairing_rng, self.radius);

        let pairs: Vec<(usize, usize)> = records
            .iter()
            .filter_map(|r| match *r {
                PairRecord::Pair(a, b) => Some((a, b)),
                PairRecord::Single(_) => None,
            })
            .collect();

        // all executions read the pre-epoch soup; writes happen after the join
        let results: Vec<machine::MachineResult> = pairs
            .par_iter()
            .map(|&(a, b)| {
                let mut tape =
                    Vec::with_capacity(soup[a].len() + soup[b].len());
                tape.extend_from_slice(&soup[a]);
                tape.extend_from_slice(&soup[b]);
                machine::execute(tape, self.head0, self.head1, 0, self.max_iter)
            })
            .collect();

        let mut partners = vec![(-1i64, -1i64); self.grid.total_programs()];
        let mut outcomes = Vec::with_capacity(pairs.len());
        let size = self.grid.program_size();
        let mut pair_idx = 0;

        for record in &records {
            match *record {
                PairRecord::Pair(a, b) => {
                    let result = &results[pair_idx];
                    pair_idx += 1;

                    let mut program_a = result.tape[..size].to_vec();
                    let mut program_b = result.tape[size..].to_vec();
                    mutate_single(&mut program_a, self.mutation_rate, &mut self.mutation_rng);
                    mutate_single(&mut program_b, self.mutation_rate, &mut self.mutation_rng);
                    soup[a] = program_a;
                    soup[b] = program_b;

                    partners[a] = ((b % width) as i64, (b / width) as i64);
                    partners[b] = ((a % width) as i64, (a / width) as i64);
                    outcomes.push((result.iterations, result.skipped, result.state));
                }
                PairRecord::Single(c) => {
                    mutate_single(&mut soup[c], self.mutation_rate, &mut self.mutation_rng);
                }
            }
        }

        self.grid.set_cells(soup);
        self.epoch += 1;

        let stats = accumulate_stats(self.epoch, &outcomes, &self.grid.flatten());
        (stats, partners)
    }
}

/// Epoch driver over a grid of token programs. Identical protocol, but
/// executions run on the tokenized machine and every mutation mints a
/// fresh lineage token.
pub struct TracerDriver {
    pub grid: Grid<TokenProgram>,
    epoch: usize,
    mutation_rate: f64,
    radius: usize,
    head0: usize,
    head1: usize,
    max_iter: usize,
    pairing_rng: StdRng,
    mutation_rng: StdRng,
}

impl TracerDriver {
    pub fn new(
        grid: Grid<TokenProgram>,
        mutation_rate: f64,
        radius: usize,
        head0: usize,
        head1: usize,
        master_seed: u64,
    ) -> Self {
        Self {
            grid,
            epoch: 0,
            mutation_rate,
            radius,
            head0,
            head1,
            max_iter: machine::MAX_ITER,
            pairing_rng: stream_rng(master_seed, stream::PAIRING),
            mutation_rng: stream_rng(master_seed, stream::MUTATION),
        }
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn step(&mut self) -> (EpochStats, Vec<(i64, i64)>) {
        let width = self.grid.width();
        let mut soup: Vec<TokenProgram> = self.grid.cells().to_vec();
        let records = self.grid.spatial_pairing(&mut self.pairing_rng, self.radius);

        let pairs: Vec<(usize, usize)> = records
            .iter()
            .filter_map(|r| match *r {
                PairRecord::Pair(a, b) => Some((a, b)),
                PairRecord::Single(_) => None,
            })
            .collect();

        let results: Vec<tracer::TracerResult> = pairs
            .par_iter()
            .map(|&(a, b)| {
                let mut tape =
                    Vec::with_capacity(soup[a].len() + soup[b].len());
                tape.extend_from_slice(&soup[a]);
                tape.extend_from_slice(&soup[b]);
                tracer::execute_tokens(tape, self.head0, self.head1, 0, self.max_iter)
            })
            .collect();

        let mut partners = vec![(-1i64, -1i64); self.grid.total_programs()];
        let mut outcomes = Vec::with_capacity(pairs.len());
        let size = self.grid.program_size();
        // mutations introduced now belong to the epoch being produced
        let born_epoch = (self.epoch + 1) as u64;
        let mut pair_idx = 0;

        for record in &records {
            match *record {
                PairRecord::Pair(a, b) => {
                    let result = &results[pair_idx];
                    pair_idx += 1;

                    let mut program_a = result.tape[..size].to_vec();
                    let mut program_b = result.tape[size..].to_vec();
                    mutate_single_token(
                        &mut program_a,
                        self.mutation_rate,
                        born_epoch,
                        &mut self.mutation_rng,
                    );
                    mutate_single_token(
                        &mut program_b,
                        self.mutation_rate,
                        born_epoch,
                        &mut self.mutation_rng,
                    );
                    soup[a] = program_a;
                    soup[b] = program_b;

                    partners[a] = ((b % width) as i64, (b / width) as i64);
                    partners[b] = ((a % width) as i64, (a / width) as i64);
                    outcomes.push((result.iterations, result.skipped, result.state));
                }
                PairRecord::Single(c) => {
                    mutate_single_token(
                        &mut soup[c],
                        self.mutation_rate,
                        born_epoch,
                        &mut self.mutation_rng,
                    );
                }
            }
        }

        self.grid.set_cells(soup);
        self.epoch += 1;

        let flattened = self.grid.to_byte_grid().flatten();
        let stats = accumulate_stats(self.epoch, &outcomes, &flattened);
        (stats, partners)
    }
}

/// Driver for the well-mixed (non-grid) soup: pairing is a random
/// permutation over the whole population and mutation is the per-byte
/// Bernoulli sweep.
pub struct SoupDriver {
    pub soup: Vec<Program>,
    epoch: usize,
    mutation_rate: f64,
    head0: usize,
    head1: usize,
    max_iter: usize,
    pairing_rng: StdRng,
    mutation_rng: StdRng,
}

impl SoupDriver {
    pub fn new(
        soup: Vec<Program>,
        mutation_rate: f64,
        head0: usize,
        head1: usize,
        master_seed: u64,
    ) -> Self {
        Self {
            soup,
            epoch: 0,
            mutation_rate,
            head0,
            head1,
            max_iter: machine::MAX_ITER,
            pairing_rng: stream_rng(master_seed, stream::PAIRING),
            mutation_rng: stream_rng(master_seed, stream::MUTATION),
        }
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn step(&mut self) -> EpochStats {
        let mut order: Vec<usize> = (0..self.soup.len()).collect();
        order.shuffle(&mut self.pairing_rng);

        let pairs: Vec<(usize, usize)> = order.chunks_exact(2).map(|c| (c[0], c[1])).collect();

        let results: Vec<machine::MachineResult> = pairs
            .par_iter()
            .map(|&(a, b)| {
                let mut tape =
                    Vec::with_capacity(self.soup[a].len() + self.soup[b].len());
                tape.extend_from_slice(&self.soup[a]);
                tape.extend_from_slice(&self.soup[b]);
                machine::execute(tape, self.head0, self.head1, 0, self.max_iter)
            })
            .collect();

        let size = self.soup.first().map_or(0, |p| p.len());
        let mut outcomes = Vec::with_capacity(pairs.len());

        for (&(a, b), result) in pairs.iter().zip(&results) {
            let mut program_a = result.tape[..size].to_vec();
            let mut program_b = result.tape[size..].to_vec();
            mutate_sweep(&mut program_a, self.mutation_rate, &mut self.mutation_rng);
            mutate_sweep(&mut program_b, self.mutation_rate, &mut self.mutation_rng);
            self.soup[a] = program_a;
            self.soup[b] = program_b;
            outcomes.push((result.iterations, result.skipped, result.state));
        }

        // an odd straggler still mutates
        if let Some(&c) = order.last() {
            if order.len() % 2 == 1 {
                mutate_sweep(&mut self.soup[c], self.mutation_rate, &mut self.mutation_rng);
            }
        }

        self.epoch += 1;

        let flattened: Vec<u8> = self.soup.iter().flatten().copied().collect();
        accumulate_stats(self.epoch, &outcomes, &flattened)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn seeded_grid(seed: u64, w: usize, h: usize, size: usize) -> Grid<Program> {
        let mut grid: Grid<Program> = Grid::new(w, h, size);
        grid.init_random(&mut stream_rng(seed, stream::GRID_INIT));
        grid
    }

    #[test]
    fn fixed_seed_runs_are_byte_identical() {
        let mut d1 = GridDriver::new(seeded_grid(42, 10, 10, 32), 0.001, 2, 0, 32, 42);
        let mut d2 = GridDriver::new(seeded_grid(42, 10, 10, 32), 0.001, 2, 0, 32, 42);

        for _ in 0..5 {
            let (s1, p1) = d1.step();
            let (s2, p2) = d2.step();
            assert_eq!(p1, p2);
            assert_eq!(s1.finished_ratio, s2.finished_ratio);
        }
        assert_eq!(d1.grid.cells(), d2.grid.cells());
        // spot-check the first three programs byte for byte
        for i in 0..3 {
            assert_eq!(d1.grid.cells()[i], d2.grid.cells()[i]);
        }
    }

    #[test]
    fn population_size_is_stable_across_epochs() {
        let mut driver = GridDriver::new(seeded_grid(1, 6, 5, 16), 0.01, 2, 0, 16, 1);
        for _ in 0..3 {
            driver.step();
            assert_eq!(driver.grid.total_programs(), 30);
            assert!(driver.grid.cells().iter().all(|p| p.len() == 16));
        }
    }

    #[test]
    fn partners_are_symmetric_and_complete() {
        let mut driver = GridDriver::new(seeded_grid(3, 4, 4, 8), 0.0, 2, 0, 8, 3);
        let (_, partners) = driver.step();
        assert_eq!(partners.len(), 16);
        for (idx, &(px, py)) in partners.iter().enumerate() {
            if px >= 0 {
                let partner_idx = py as usize * 4 + px as usize;
                let back = partners[partner_idx];
                assert_eq!(back, ((idx % 4) as i64, (idx / 4) as i64));
            }
        }
    }

    #[test]
    fn zero_mutation_keeps_token_lineage_at_epoch_zero() {
        let mut grid: Grid<TokenProgram> = Grid::new(4, 4, 16);
        grid.init_random(&mut stream_rng(5, stream::GRID_INIT));
        let mut driver = TracerDriver::new(grid, 0.0, 2, 0, 16, 5);

        for _ in 0..3 {
            driver.step();
        }
        for program in driver.grid.cells() {
            for token in program {
                assert_eq!(token.epoch(), 0);
            }
        }
    }

    #[test]
    fn tracer_and_plain_drivers_agree_byte_for_byte() {
        // same master seed drives identical pairing and mutation draw
        // sequences as long as mutation never fires
        let seed = 11;
        let plain = seeded_grid(seed, 5, 5, 16);
        let mut tokens: Grid<TokenProgram> = Grid::new(5, 5, 16);
        tokens.init_random(&mut stream_rng(seed, stream::GRID_INIT));

        let mut d1 = GridDriver::new(plain, 0.0, 2, 0, 16, seed);
        let mut d2 = TracerDriver::new(tokens, 0.0, 2, 0, 16, seed);

        for _ in 0..4 {
            d1.step();
            d2.step();
        }
        assert_eq!(d2.grid.to_byte_grid().cells(), d1.grid.cells());
    }

    #[test]
    fn mutate_single_changes_at_most_one_byte() {
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..200 {
            let original = vec![7u8; 64];
            let mut mutated = original.clone();
            mutate_single(&mut mutated, 1.0, &mut rng);
            let diffs = original
                .iter()
                .zip(&mutated)
                .filter(|(a, b)| a != b)
                .count();
            assert!(diffs <= 1);
        }
    }

    #[test]
    fn soup_driver_preserves_population() {
        let mut rng = stream_rng(2, stream::GRID_INIT);
        let soup: Vec<Program> = (0..10)
            .map(|_| (0..16).map(|_| rng.gen::<u8>()).collect())
            .collect();
        let mut driver = SoupDriver::new(soup, 0.01, 0, 16, 2);
        let stats = driver.step();
        assert_eq!(driver.soup.len(), 10);
        assert!(driver.soup.iter().all(|p| p.len() == 16));
        assert!(stats.avg_iterations > 0.0);
        assert!(stats.finished_ratio >= 0.0 && stats.finished_ratio <= 1.0);
    }

    #[test]
    fn pause_gate_releases_when_cleared() {
        let gate = PauseGate::new();
        assert!(!gate.is_paused());
        gate.flag().store(true, Ordering::Relaxed);
        assert!(gate.is_paused());

        let flag = gate.flag();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            flag.store(false, Ordering::Relaxed);
        });
        gate.wait_while_paused();
        handle.join().unwrap();
        assert!(!gate.is_paused());
    }
}
