//! First-free-row discovery below a sheet header.
use tracing::{debug, instrument};

use crate::config::MAX_SCAN_ROWS;
use crate::error::SyncError;
use crate::reconcile::{SheetLayout, METADATA_COLUMNS};
use crate::sheets::{CellValue, SheetStore, SheetTarget};

/// Number of leading cells inspected to decide whether a row is free.
pub const LEADING_CELLS: usize = 3;

/// True when the row's leading cells are all blank.
pub fn is_free_row(row: &[CellValue]) -> bool {
    row.iter().take(LEADING_CELLS).all(CellValue::is_blank)
}

pub struct RowLocator<'a> {
    store: &'a dyn SheetStore,
    layout: SheetLayout,
}

impl<'a> RowLocator<'a> {
    pub fn new(store: &'a dyn SheetStore, layout: SheetLayout) -> Self {
        Self { store, layout }
    }

    /// Absolute 1-based row where the next submission should be written.
    ///
    /// Scans windows of `data_scan_rows` rows starting at `first_data_row`;
    /// the first row whose leading cells are blank wins. A sheet with holes
    /// (a blank row above populated ones) gets the hole reused.
    #[instrument(skip_all, fields(target = %target, first_data_row = first_data_row))]
    pub async fn next_free_row(
        &self,
        target: &SheetTarget,
        first_data_row: u32,
    ) -> Result<u32, SyncError> {
        let window = self.layout.data_scan_rows.clamp(1, MAX_SCAN_ROWS);
        let mut start = first_data_row;
        loop {
            let Some(end) = start.checked_add(window - 1) else {
                return Err(SyncError::RowsExhausted {
                    target: target.clone(),
                });
            };
            let range = target.range(0, start, METADATA_COLUMNS - 1, end);
            let rows = self
                .store
                .read_range(&target.spreadsheet_id, &range)
                .await
                .map_err(|e| SyncError::store("read data rows", target, e))?;

            if let Some(offset) = rows.iter().position(|row| is_free_row(row)) {
                let row = start + offset as u32;
                debug!(row, "located free row");
                return Ok(row);
            }
            if (rows.len() as u32) < window {
                let row = start + rows.len() as u32;
                debug!(row, "located free row after data");
                return Ok(row);
            }
            start = end.checked_add(1).ok_or_else(|| SyncError::RowsExhausted {
                target: target.clone(),
            })?;
        }
    }
}
