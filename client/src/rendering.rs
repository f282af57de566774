//! Text rendering of world snapshots.

use shared::{Cell, Color, Identity, WorldSnapshot};
use std::fmt::Write;

const EMPTY: char = '.';
const SNACK: char = '*';
const OWN_HEAD: char = '@';
const OWN_BODY: char = 'o';
const OTHER_HEAD: char = 'X';
const OTHER_BODY: char = 'x';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Glyph {
    Empty,
    Snack,
    Snake { head: bool, own: bool, color: Color },
}

impl Glyph {
    fn symbol(self) -> char {
        match self {
            Glyph::Empty => EMPTY,
            Glyph::Snack => SNACK,
            Glyph::Snake { head: true, own: true, .. } => OWN_HEAD,
            Glyph::Snake { head: false, own: true, .. } => OWN_BODY,
            Glyph::Snake { head: true, own: false, .. } => OTHER_HEAD,
            Glyph::Snake { head: false, own: false, .. } => OTHER_BODY,
        }
    }
}

pub struct Renderer {
    /// Wrap snake cells in 24-bit ANSI color escapes.
    ansi: bool,
}

impl Renderer {
    pub fn new(ansi: bool) -> Self {
        Self { ansi }
    }

    /// Draws the grid with a status line. `me` marks the local player's
    /// snake with distinct glyphs.
    pub fn render(&self, snapshot: &WorldSnapshot, me: Option<&Identity>) -> String {
        let rows = snapshot.rows as usize;
        let mut grid = vec![Glyph::Empty; rows * rows];
        let index = |cell: &Cell| -> Option<usize> {
            let (row, col) = (cell.row as usize, cell.col as usize);
            (row < rows && col < rows).then_some(row * rows + col)
        };

        for snack in &snapshot.snacks {
            if let Some(i) = index(snack) {
                grid[i] = Glyph::Snack;
            }
        }
        for snake in &snapshot.snakes {
            let own = me == Some(&snake.identity);
            // Tail first so the head wins when a snake overlaps itself.
            for (position, cell) in snake.body.iter().enumerate().rev() {
                if let Some(i) = index(cell) {
                    grid[i] = Glyph::Snake {
                        head: position == 0,
                        own,
                        color: snake.color,
                    };
                }
            }
        }

        let mut out = String::with_capacity(rows * (rows + 1) * 2 + 64);
        let length = me
            .and_then(|id| snapshot.snake(id))
            .map(|snake| snake.body.len());
        let _ = write!(
            out,
            "tick {} | players {} | snacks {}",
            snapshot.tick,
            snapshot.snakes.len(),
            snapshot.snacks.len()
        );
        if let Some(length) = length {
            let _ = write!(out, " | length {}", length);
        }
        out.push('\n');

        for row in grid.chunks(rows.max(1)) {
            for glyph in row {
                self.push_glyph(&mut out, *glyph);
            }
            out.push('\n');
        }
        out
    }

    fn push_glyph(&self, out: &mut String, glyph: Glyph) {
        match glyph {
            Glyph::Snake { color, .. } if self.ansi => {
                let _ = write!(
                    out,
                    "\x1b[38;2;{};{};{}m{}\x1b[0m",
                    color.r,
                    color.g,
                    color.b,
                    glyph.symbol()
                );
            }
            _ => out.push(glyph.symbol()),
        }
    }
}
