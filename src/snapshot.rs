//! Snapshot persistence.
//!
//! Two per-epoch formats exist side by side:
//!
//! - *Token snapshots* keep one row per token and preserve per-byte
//!   provenance, but carry no pair-partner pointers.
//! - *Pairing snapshots* keep one row per cell with the cell's pair
//!   partner for that epoch (or `-1,-1` for a mutation-only cell), but
//!   lose token identity.
//!
//! Programs land in pairing snapshots with non-instruction bytes blanked
//! to spaces; readers blank again on load so both directions are safe.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::grid::{clean_program, Grid, Program, TokenProgram};

/// `dir/tokens_epoch_NNNN.csv`
pub fn token_snapshot_path(dir: &Path, epoch: usize) -> PathBuf {
    dir.join(format!("tokens_epoch_{:04}.csv", epoch))
}

/// `dir/pairings_epoch_NNNN.csv`
pub fn pairing_snapshot_path(dir: &Path, epoch: usize) -> PathBuf {
    dir.join(format!("pairings_epoch_{:04}.csv", epoch))
}

/// Split one CSV line into fields, honoring double quotes so quoted
/// programs may contain commas. Quotes themselves are stripped.
pub fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;

    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut field));
            }
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

/// Write every token of the grid, one row per token
pub fn write_token_snapshot(
    grid: &Grid<TokenProgram>,
    path: &Path,
    epoch: usize,
) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);

    writeln!(
        w,
        "epoch_snapshot,grid_x,grid_y,pos_in_program,token_epoch,token_orig_pos,char,char_ascii"
    )?;

    for y in 0..grid.height() {
        for x in 0..grid.width() {
            for (i, token) in grid.get(x, y).iter().enumerate() {
                let b = token.byte();
                let printable = if (32..=126).contains(&b) {
                    format!("\"{}\"", b as char)
                } else {
                    "\"\"".to_string()
                };
                writeln!(
                    w,
                    "{},{},{},{},{},{},{},{}",
                    epoch,
                    x,
                    y,
                    i,
                    token.epoch(),
                    token.position(),
                    b,
                    printable
                )?;
            }
        }
    }
    Ok(())
}

/// A token snapshot read back as byte programs per cell
#[derive(Debug, Clone)]
pub struct TokenSnapshot {
    pub epoch: usize,
    pub width: usize,
    pub height: usize,
    pub programs: HashMap<(usize, usize), Program>,
}

impl TokenSnapshot {
    pub fn program(&self, x: usize, y: usize) -> Option<&Program> {
        self.programs.get(&(x, y))
    }
}

/// Read a token snapshot, reassembling each cell's program from its
/// per-token rows. Grid dimensions are inferred from the coordinates.
pub fn read_token_snapshot(path: &Path) -> std::io::Result<TokenSnapshot> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut snapshot = TokenSnapshot {
        epoch: 0,
        width: 0,
        height: 0,
        programs: HashMap::new(),
    };
    let mut saw_epoch = false;

    for line in reader.lines().skip(1) {
        let line = line?;
        let fields = split_csv_line(&line);
        if fields.len() < 7 {
            continue;
        }

        let (Ok(epoch), Ok(x), Ok(y), Ok(pos), Ok(byte)) = (
            fields[0].parse::<usize>(),
            fields[1].parse::<usize>(),
            fields[2].parse::<usize>(),
            fields[3].parse::<usize>(),
            fields[6].parse::<u8>(),
        ) else {
            continue;
        };

        if !saw_epoch {
            snapshot.epoch = epoch;
            saw_epoch = true;
        }
        snapshot.width = snapshot.width.max(x + 1);
        snapshot.height = snapshot.height.max(y + 1);

        let program = snapshot.programs.entry((x, y)).or_default();
        if program.len() <= pos {
            program.resize(pos + 1, 0);
        }
        program[pos] = byte;
    }

    Ok(snapshot)
}

/// One cell of a pairing snapshot
#[derive(Debug, Clone)]
pub struct PairingCell {
    /// Cleaned program bytes (non-instructions as spaces)
    pub program: Program,
    /// Pair partner coordinates, or (-1, -1) for a mutation-only cell
    pub partner: (i64, i64),
}

/// A pairing snapshot read back as cells keyed by coordinates
#[derive(Debug, Clone)]
pub struct PairingSnapshot {
    pub epoch: usize,
    pub cells: HashMap<(usize, usize), PairingCell>,
}

impl PairingSnapshot {
    pub fn cell(&self, x: usize, y: usize) -> Option<&PairingCell> {
        self.cells.get(&(x, y))
    }
}

/// Write one row per cell: cleaned program plus the cell's pair partner
/// for this epoch. `partners` holds, per flat index, the partner's
/// coordinates or (-1, -1) for mutation-only cells.
pub fn write_pairing_snapshot(
    grid: &Grid<Program>,
    partners: &[(i64, i64)],
    path: &Path,
    epoch: usize,
) -> std::io::Result<()> {
    assert_eq!(partners.len(), grid.total_programs());

    let file = File::create(path)?;
    let mut w = BufWriter::new(file);

    writeln!(w, "epoch,position_x,position_y,program,combined_x,combined_y")?;

    for y in 0..grid.height() {
        for x in 0..grid.width() {
            let cleaned = clean_program(grid.get(x, y));
            let text: String = cleaned.iter().map(|&b| b as char).collect();
            let (px, py) = partners[grid.index(x, y)];
            writeln!(w, "{},{},{},\"{}\",{},{}", epoch, x, y, text, px, py)?;
        }
    }
    Ok(())
}

/// Read a pairing snapshot. Programs are cleaned on read, so snapshots
/// produced elsewhere with raw bytes load the same way.
pub fn read_pairing_snapshot(path: &Path) -> std::io::Result<PairingSnapshot> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut snapshot = PairingSnapshot {
        epoch: 0,
        cells: HashMap::new(),
    };
    let mut saw_epoch = false;

    for line in reader.lines().skip(1) {
        let line = line?;
        let fields = split_csv_line(&line);
        if fields.len() < 6 {
            continue;
        }

        let (Ok(epoch), Ok(x), Ok(y), Ok(px), Ok(py)) = (
            fields[0].parse::<usize>(),
            fields[1].parse::<usize>(),
            fields[2].parse::<usize>(),
            fields[4].parse::<i64>(),
            fields[5].parse::<i64>(),
        ) else {
            continue;
        };

        if !saw_epoch {
            snapshot.epoch = epoch;
            saw_epoch = true;
        }

        let program = clean_program(fields[3].as_bytes());
        snapshot
            .cells
            .insert((x, y), PairingCell { program, partner: (px, py) });
    }

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::Token;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn csv_split_honors_quotes() {
        let fields = split_csv_line("3,1,2,\",.[]{} <>\",-1,-1");
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[3], ",.[]{} <>");
        assert_eq!(fields[4], "-1");
    }

    #[test]
    fn token_snapshot_round_trips() {
        let mut grid: Grid<TokenProgram> = Grid::new(3, 2, 8);
        grid.init_random(&mut StdRng::seed_from_u64(5));
        // stamp one recognizable token
        let mut program = grid.get(1, 1).clone();
        program[2] = Token::new(12, 7, b'[');
        grid.set(1, 1, program);

        let path = std::env::temp_dir().join("lineage_soup_tokens_test.csv");
        write_token_snapshot(&grid, &path, 17).unwrap();

        let snapshot = read_token_snapshot(&path).unwrap();
        assert_eq!(snapshot.epoch, 17);
        assert_eq!(snapshot.width, 3);
        assert_eq!(snapshot.height, 2);
        for y in 0..2 {
            for x in 0..3 {
                assert_eq!(snapshot.program(x, y).unwrap(), &grid.program_bytes(x, y));
            }
        }

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn pairing_snapshot_round_trips() {
        let mut grid: Grid<Program> = Grid::new(2, 2, 8);
        grid.set(0, 0, b"[.,]<>{}".to_vec());
        grid.set(1, 0, b"ab[]cd+-".to_vec());
        grid.set(0, 1, vec![0u8; 8]);
        grid.set(1, 1, b"........".to_vec());

        let partners = vec![(1, 0), (0, 0), (-1, -1), (-1, -1)];
        let path = std::env::temp_dir().join("lineage_soup_pairings_test.csv");
        write_pairing_snapshot(&grid, &partners, &path, 9).unwrap();

        let snapshot = read_pairing_snapshot(&path).unwrap();
        assert_eq!(snapshot.epoch, 9);
        assert_eq!(snapshot.cells.len(), 4);

        let cell = snapshot.cell(0, 0).unwrap();
        assert_eq!(cell.program, b"[.,]<>{}".to_vec());
        assert_eq!(cell.partner, (1, 0));

        // non-instructions came back as spaces
        let cell = snapshot.cell(1, 0).unwrap();
        assert_eq!(cell.program, b"  []  +-".to_vec());
        assert_eq!(cell.partner, (0, 0));

        let cell = snapshot.cell(0, 1).unwrap();
        assert_eq!(cell.program, vec![b' '; 8]);
        assert_eq!(cell.partner, (-1, -1));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn snapshot_paths_are_zero_padded() {
        let dir = Path::new("data/tokens");
        assert_eq!(
            token_snapshot_path(dir, 42),
            Path::new("data/tokens/tokens_epoch_0042.csv")
        );
        assert_eq!(
            pairing_snapshot_path(Path::new("data/pairings"), 16324),
            Path::new("data/pairings/pairings_epoch_16324.csv")
        );
    }
}
