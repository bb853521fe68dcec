//! 2-D population grid and spatial pairing.
//!
//! The grid is a row-major array of fixed-length programs; cell (x, y)
//! lives at flat index `y * width + x`. Pairing draws a disjoint matching
//! over Von Neumann neighborhoods each epoch: cells with no free neighbor
//! become mutation-only singles.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use rand::prelude::*;
use serde_json::json;

use crate::machine::is_instruction;
use crate::tracer::{self, Token};

/// A plain byte program
pub type Program = Vec<u8>;

/// A provenance-tagged program
pub type TokenProgram = Vec<Token>;

/// One record of a per-epoch pairing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairRecord {
    /// A proper pair of distinct cells; the first component is the cell
    /// that initiated the pairing
    Pair(usize, usize),
    /// A cell with no free neighbor; it only mutates this epoch
    Single(usize),
}

/// Von Neumann neighborhood of radius `r`: all in-bounds cells with
/// Manhattan distance in `[1, r]`. The cell itself is excluded.
pub fn von_neumann_neighbors(
    x: usize,
    y: usize,
    width: usize,
    height: usize,
    radius: usize,
) -> Vec<(usize, usize)> {
    let r = radius as i64;
    let mut neighbors = Vec::new();
    for dy in -r..=r {
        for dx in -r..=r {
            let dist = dx.abs() + dy.abs();
            if dist == 0 || dist > r {
                continue;
            }
            let nx = x as i64 + dx;
            let ny = y as i64 + dy;
            if nx >= 0 && nx < width as i64 && ny >= 0 && ny < height as i64 {
                neighbors.push((nx as usize, ny as usize));
            }
        }
    }
    neighbors
}

/// Row-major grid of programs (byte programs or token programs)
#[derive(Clone, Debug)]
pub struct Grid<T> {
    width: usize,
    height: usize,
    program_size: usize,
    cells: Vec<T>,
}

impl<T: Clone + Default> Grid<T> {
    pub fn new(width: usize, height: usize, program_size: usize) -> Self {
        Self {
            width,
            height,
            program_size,
            cells: vec![T::default(); width * height],
        }
    }
}

impl<T> Grid<T> {
    #[inline]
    pub fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn program_size(&self) -> usize {
        self.program_size
    }

    pub fn total_programs(&self) -> usize {
        self.width * self.height
    }

    pub fn get(&self, x: usize, y: usize) -> &T {
        &self.cells[self.index(x, y)]
    }

    pub fn set(&mut self, x: usize, y: usize, program: T) {
        let idx = self.index(x, y);
        self.cells[idx] = program;
    }

    /// All cells in row-major order
    pub fn cells(&self) -> &[T] {
        &self.cells
    }

    /// Replace the whole population. Panics if the size changes.
    pub fn set_cells(&mut self, cells: Vec<T>) {
        assert_eq!(cells.len(), self.cells.len());
        self.cells = cells;
    }

    /// Neighbor flat indices within radius `r` of the cell at `idx`
    pub fn neighbors_of(&self, idx: usize, radius: usize) -> Vec<usize> {
        let x = idx % self.width;
        let y = idx / self.width;
        von_neumann_neighbors(x, y, self.width, self.height, radius)
            .into_iter()
            .map(|(nx, ny)| ny * self.width + nx)
            .collect()
    }

    /// Build a disjoint pairing over the grid for one epoch.
    ///
    /// Cells are visited in a random permutation. Each unvisited cell
    /// picks a uniformly random untaken neighbor within `radius`; if none
    /// is free it is emitted as a mutation-only single. Every cell appears
    /// in exactly one record, and a proper pair keeps its initiating cell
    /// first.
    pub fn spatial_pairing<R: Rng>(&self, rng: &mut R, radius: usize) -> Vec<PairRecord> {
        let n = self.total_programs();
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(rng);

        let mut taken = vec![false; n];
        let mut records = Vec::with_capacity(n);

        for &c in &order {
            if taken[c] {
                continue;
            }
            let free: Vec<usize> = self
                .neighbors_of(c, radius)
                .into_iter()
                .filter(|&nb| !taken[nb])
                .collect();

            if free.is_empty() {
                taken[c] = true;
                records.push(PairRecord::Single(c));
            } else {
                let chosen = free[rng.gen_range(0..free.len())];
                taken[c] = true;
                taken[chosen] = true;
                records.push(PairRecord::Pair(c, chosen));
            }
        }

        records
    }
}

impl Grid<Program> {
    /// Fill every cell with uniformly random bytes
    pub fn init_random<R: Rng>(&mut self, rng: &mut R) {
        let size = self.program_size;
        for cell in &mut self.cells {
            *cell = (0..size).map(|_| rng.gen::<u8>()).collect();
        }
    }
}

impl Grid<TokenProgram> {
    /// Fill every cell with random epoch-0 tokens whose origin position
    /// is their index in the program
    pub fn init_random<R: Rng>(&mut self, rng: &mut R) {
        let size = self.program_size;
        for cell in &mut self.cells {
            let bytes: Vec<u8> = (0..size).map(|_| rng.gen::<u8>()).collect();
            *cell = tracer::init_tokens(&bytes, 0);
        }
    }

    /// Byte values of the program at (x, y)
    pub fn program_bytes(&self, x: usize, y: usize) -> Program {
        tracer::tokens_to_bytes(self.get(x, y))
    }

    /// Project the whole grid to its byte values (for rendering and
    /// entropy metrics)
    pub fn to_byte_grid(&self) -> Grid<Program> {
        Grid {
            width: self.width,
            height: self.height,
            program_size: self.program_size,
            cells: self.cells.iter().map(|p| tracer::tokens_to_bytes(p)).collect(),
        }
    }
}

/// A rendered cell color
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Map a program to a color by its instruction composition.
///
/// Loop ops pull toward green, arithmetic/copy ops toward magenta, head
/// movement toward light purple. A program with no instructions at all
/// renders red.
pub fn program_to_color(program: &[u8]) -> Rgb {
    if program.is_empty() {
        return Rgb { r: 0, g: 0, b: 0 };
    }

    let mut loop_ops = 0usize;
    let mut arith_ops = 0usize;
    let mut head_ops = 0usize;

    for &byte in program {
        match byte {
            b'[' | b']' => loop_ops += 1,
            b'+' | b'-' | b'.' | b',' => arith_ops += 1,
            b'<' | b'>' | b'{' | b'}' => head_ops += 1,
            _ => {}
        }
    }

    let total = loop_ops + arith_ops + head_ops;
    if total == 0 {
        return Rgb { r: 255, g: 0, b: 0 };
    }

    let loop_ratio = loop_ops as f32 / total as f32;
    let arith_ratio = arith_ops as f32 / total as f32;
    let head_ratio = head_ops as f32 / total as f32;

    Rgb {
        r: (arith_ratio * 200.0 + head_ratio * 200.0) as u8,
        g: (loop_ratio * 192.0 + head_ratio * 128.0) as u8,
        b: (arith_ratio * 200.0 + head_ratio * 220.0) as u8,
    }
}

impl Grid<Program> {
    /// Save the grid as a P3 PPM image, one pixel per cell
    pub fn save_ppm<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);

        writeln!(w, "P3")?;
        writeln!(w, "{} {}", self.width, self.height)?;
        writeln!(w, "255")?;

        for y in 0..self.height {
            for x in 0..self.width {
                let c = program_to_color(self.get(x, y));
                write!(w, "{} {} {} ", c.r, c.g, c.b)?;
            }
            writeln!(w)?;
        }
        Ok(())
    }

    /// Save a single-file HTML page with the grid colors inlined as a
    /// JSON array and a canvas draw loop
    pub fn save_html<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);

        let scale = (800 / self.width.max(self.height).max(1)).max(1);
        let canvas_w = self.width * scale;
        let canvas_h = self.height * scale;

        writeln!(
            w,
            r#"<!DOCTYPE html>
<html>
<head>
    <title>BFF Grid Visualization</title>
    <style>
        body {{ margin: 0; padding: 20px; background: #1a1a1a; color: #fff; font-family: monospace; }}
        canvas {{ border: 1px solid #444; image-rendering: pixelated; }}
        .info {{ margin-bottom: 10px; }}
    </style>
</head>
<body>
    <div class="info">
        <h2>BFF Grid Visualization</h2>
        <p>Grid Size: {}x{} ({} programs)</p>
        <p>Program Size: {} bytes</p>
    </div>
    <canvas id="canvas" width="{}" height="{}"></canvas>
    <script>
        const canvas = document.getElementById('canvas');
        const ctx = canvas.getContext('2d');
        const width = {};
        const height = {};
        const scale = {};
        const gridData = {};
        for (let y = 0; y < height; y++) {{
            for (let x = 0; x < width; x++) {{
                const [r, g, b] = gridData[y][x];
                ctx.fillStyle = `rgb(${{r}},${{g}},${{b}})`;
                ctx.fillRect(x * scale, y * scale, scale, scale);
            }}
        }}
    </script>
</body>
</html>"#,
            self.width,
            self.height,
            self.total_programs(),
            self.program_size,
            canvas_w,
            canvas_h,
            self.width,
            self.height,
            scale,
            self.color_rows(),
        )?;
        Ok(())
    }

    /// Grid colors as a JSON array of rows of [r, g, b] triples
    pub fn color_rows(&self) -> serde_json::Value {
        let rows: Vec<serde_json::Value> = (0..self.height)
            .map(|y| {
                let row: Vec<serde_json::Value> = (0..self.width)
                    .map(|x| {
                        let c = program_to_color(self.get(x, y));
                        json!([c.r, c.g, c.b])
                    })
                    .collect();
                serde_json::Value::Array(row)
            })
            .collect();
        serde_json::Value::Array(rows)
    }

    /// Live-push frame body for one epoch
    pub fn frame_json(
        &self,
        epoch: usize,
        entropy: f64,
        avg_iters: f64,
        finished_ratio: f64,
    ) -> serde_json::Value {
        json!({
            "epoch": epoch,
            "width": self.width,
            "height": self.height,
            "entropy": entropy,
            "avg_iters": avg_iters,
            "finished_ratio": finished_ratio,
            "grid": self.color_rows(),
        })
    }

    /// All program bytes flattened in row-major order
    pub fn flatten(&self) -> Vec<u8> {
        let mut flat = Vec::with_capacity(self.total_programs() * self.program_size);
        for cell in &self.cells {
            flat.extend_from_slice(cell);
        }
        flat
    }
}

/// Replace every non-instruction byte with a space. Snapshots and the
/// replicator test both operate on cleaned programs.
pub fn clean_program(program: &[u8]) -> Vec<u8> {
    program
        .iter()
        .map(|&b| if is_instruction(b) { b } else { b' ' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn neighborhood_respects_manhattan_radius() {
        // interior cell, r = 2: 4 at distance 1, 8 at distance 2
        let n = von_neumann_neighbors(5, 5, 11, 11, 2);
        assert_eq!(n.len(), 12);
        assert!(!n.contains(&(5, 5)));
        assert!(n.contains(&(5, 3)));
        assert!(n.contains(&(4, 4)));
        assert!(!n.contains(&(3, 3)));
    }

    #[test]
    fn neighborhood_clips_at_borders() {
        let n = von_neumann_neighbors(0, 0, 4, 4, 2);
        // (1,0) (2,0) (0,1) (0,2) (1,1)
        assert_eq!(n.len(), 5);
    }

    #[test]
    fn pairing_covers_every_cell_exactly_once() {
        let grid: Grid<Program> = Grid::new(4, 4, 8);
        let mut rng = StdRng::seed_from_u64(1);
        let records = grid.spatial_pairing(&mut rng, 2);

        let mut seen = vec![0usize; 16];
        for record in &records {
            match *record {
                PairRecord::Pair(a, b) => {
                    assert_ne!(a, b);
                    seen[a] += 1;
                    seen[b] += 1;
                }
                PairRecord::Single(c) => seen[c] += 1,
            }
        }
        assert!(seen.iter().all(|&count| count == 1));
    }

    #[test]
    fn single_cell_grid_yields_one_single() {
        let grid: Grid<Program> = Grid::new(1, 1, 8);
        let mut rng = StdRng::seed_from_u64(0);
        let records = grid.spatial_pairing(&mut rng, 2);
        assert_eq!(records, vec![PairRecord::Single(0)]);
    }

    #[test]
    fn pairing_is_deterministic_under_a_fixed_seed() {
        let grid: Grid<Program> = Grid::new(6, 6, 8);
        let a = grid.spatial_pairing(&mut StdRng::seed_from_u64(99), 2);
        let b = grid.spatial_pairing(&mut StdRng::seed_from_u64(99), 2);
        assert_eq!(a, b);
    }

    #[test]
    fn random_init_is_reproducible() {
        let mut g1: Grid<Program> = Grid::new(3, 3, 16);
        let mut g2: Grid<Program> = Grid::new(3, 3, 16);
        g1.init_random(&mut StdRng::seed_from_u64(42));
        g2.init_random(&mut StdRng::seed_from_u64(42));
        assert_eq!(g1.cells(), g2.cells());
    }

    #[test]
    fn token_grid_projects_back_to_bytes() {
        let mut grid: Grid<TokenProgram> = Grid::new(2, 2, 8);
        grid.init_random(&mut StdRng::seed_from_u64(7));
        let bytes = grid.to_byte_grid();
        for y in 0..2 {
            for x in 0..2 {
                assert_eq!(&grid.program_bytes(x, y), bytes.get(x, y));
            }
        }
    }

    #[test]
    fn inert_program_renders_red() {
        let c = program_to_color(&[b'a'; 16]);
        assert_eq!(c, Rgb { r: 255, g: 0, b: 0 });
    }

    #[test]
    fn pure_loop_program_renders_green() {
        let c = program_to_color(b"[][][]");
        assert_eq!(c, Rgb { r: 0, g: 192, b: 0 });
    }

    #[test]
    fn clean_program_blanks_non_instructions() {
        assert_eq!(clean_program(b"a[b]0."), b" [ ] .".to_vec());
    }
}
