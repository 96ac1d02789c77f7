//! In-memory [`SheetStore`] used by tests.
//!
//! Reads mimic the Sheets API: trailing blank cells in a row and trailing
//! blank rows in a range are omitted.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use super::{parse_a1_range, CellValue, Dimension, SheetStore};

type Grid = Vec<Vec<CellValue>>;

#[derive(Debug, Clone, PartialEq)]
pub struct WriteCall {
    pub spreadsheet_id: String,
    pub range: String,
    pub rows: Grid,
}

#[derive(Default)]
struct State {
    grids: HashMap<(String, String), Grid>,
    writes: Vec<WriteCall>,
    reads: usize,
    failing: HashSet<String>,
}

#[derive(Clone, Default)]
pub struct MemorySheetStore {
    state: Arc<Mutex<State>>,
}

impl MemorySheetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents of a sheet, anchored at A1.
    pub fn seed(&self, spreadsheet_id: &str, sheet_name: &str, rows: Grid) {
        let mut state = self.lock();
        state
            .grids
            .insert((spreadsheet_id.to_string(), sheet_name.to_string()), rows);
    }

    /// Every call against `spreadsheet_id` fails until [`Self::recover`].
    pub fn fail_spreadsheet(&self, spreadsheet_id: &str) {
        self.lock().failing.insert(spreadsheet_id.to_string());
    }

    pub fn recover(&self, spreadsheet_id: &str) {
        self.lock().failing.remove(spreadsheet_id);
    }

    /// Snapshot of a sheet's grid (absent sheets are empty).
    pub fn grid(&self, spreadsheet_id: &str, sheet_name: &str) -> Grid {
        self.lock()
            .grids
            .get(&(spreadsheet_id.to_string(), sheet_name.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Display text of a 1-based row; an absent row reads as empty.
    pub fn row_text(&self, spreadsheet_id: &str, sheet_name: &str, row: u32) -> Vec<String> {
        self.grid(spreadsheet_id, sheet_name)
            .get(row.saturating_sub(1) as usize)
            .map(|cells| cells.iter().map(CellValue::as_text).collect())
            .unwrap_or_default()
    }

    pub fn writes(&self) -> Vec<WriteCall> {
        self.lock().writes.clone()
    }

    pub fn read_count(&self) -> usize {
        self.lock().reads
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // a poisoned lock only means a test panicked mid-call; the data is still usable
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SheetStore for MemorySheetStore {
    async fn read_range(&self, spreadsheet_id: &str, range: &str) -> Result<Grid> {
        let a1 = parse_a1_range(range)?;
        let mut state = self.lock();
        state.reads += 1;
        if state.failing.contains(spreadsheet_id) {
            return Err(anyhow!("spreadsheet {} is unavailable", spreadsheet_id));
        }
        let Some(grid) = state
            .grids
            .get(&(spreadsheet_id.to_string(), a1.sheet_name.clone()))
        else {
            return Ok(Vec::new());
        };

        let first = a1.start_row as usize - 1;
        let last = a1
            .end_row
            .map(|r| r as usize)
            .unwrap_or(grid.len())
            .min(grid.len());
        let mut out: Grid = Vec::new();
        for row in grid.iter().take(last).skip(first) {
            let mut cells: Vec<CellValue> = (a1.start_col..=a1.end_col)
                .map(|c| row.get(c).cloned().unwrap_or_default())
                .collect();
            while cells.last().is_some_and(CellValue::is_blank) {
                cells.pop();
            }
            out.push(cells);
        }
        while out.last().is_some_and(|r| r.is_empty()) {
            out.pop();
        }
        Ok(out)
    }

    async fn write_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: Grid,
        dimension: Dimension,
    ) -> Result<()> {
        let a1 = parse_a1_range(range)?;
        let mut state = self.lock();
        if state.failing.contains(spreadsheet_id) {
            return Err(anyhow!("spreadsheet {} is unavailable", spreadsheet_id));
        }
        state.writes.push(WriteCall {
            spreadsheet_id: spreadsheet_id.to_string(),
            range: range.to_string(),
            rows: rows.clone(),
        });

        let grid = state
            .grids
            .entry((spreadsheet_id.to_string(), a1.sheet_name))
            .or_default();
        for (i, line) in rows.into_iter().enumerate() {
            for (j, cell) in line.into_iter().enumerate() {
                let (r, c) = match dimension {
                    Dimension::Rows => (a1.start_row as usize - 1 + i, a1.start_col + j),
                    Dimension::Columns => (a1.start_row as usize - 1 + j, a1.start_col + i),
                };
                if grid.len() <= r {
                    grid.resize(r + 1, Vec::new());
                }
                if grid[r].len() <= c {
                    grid[r].resize(c + 1, CellValue::Empty);
                }
                grid[r][c] = cell;
            }
        }
        Ok(())
    }
}
