//! Post-write side effects. Failures here never roll back the primary write.
use std::collections::HashMap;

use tracing::{debug, info, instrument};

use crate::catalog::FormDefinition;
use crate::error::SyncError;
use crate::model::{Submission, SubmissionDataItem};
use crate::schedule::WorkingHours;
use crate::sheets::{CellValue, Dimension, SheetStore, SheetTarget};

pub const MEMORY_ID_LABEL: &str = "recent_submission_id";

/// First row of the counting sheet that holds codes (row 1 is the header).
pub const COUNTING_FIRST_ROW: u32 = 2;

/// Overwrite the form's memory sheet with the latest submission: labels on
/// row 1, answers on row 2, both in form question order.
#[instrument(skip_all, fields(id = submission.id))]
pub async fn write_memory(
    store: &dyn SheetStore,
    target: &SheetTarget,
    def: &FormDefinition,
    submission: &Submission,
    answers: &[SubmissionDataItem],
) -> Result<(), SyncError> {
    let by_question: HashMap<&str, &str> = answers
        .iter()
        .map(|a| (a.question_id.as_str(), a.answer.as_str()))
        .collect();

    let mut labels = vec![CellValue::text(MEMORY_ID_LABEL)];
    let mut values = vec![CellValue::Number(submission.id as f64)];
    for q in &def.questions {
        labels.push(CellValue::text(q.label.clone()));
        values.push(CellValue::text(
            by_question.get(q.question_id.as_str()).copied().unwrap_or_default(),
        ));
    }

    let range = target.range(0, 1, labels.len() - 1, 2);
    store
        .write_range(&target.spreadsheet_id, &range, vec![labels, values], Dimension::Rows)
        .await
        .map_err(|e| SyncError::store("write memory sheet", target, e))?;
    info!(target = %target, "memory sheet updated");
    Ok(())
}

/// Append `[code, created at, device name, form name]` to the counting sheet
/// unless the code is already listed. Returns the row written, if any.
#[instrument(skip_all, fields(id = submission.id, code = %code))]
pub async fn count_code(
    store: &dyn SheetStore,
    target: &SheetTarget,
    def: &FormDefinition,
    submission: &Submission,
    code: &str,
    scan_rows: u32,
    hours: &WorkingHours,
) -> Result<Option<u32>, SyncError> {
    let code = code.trim();
    if code.is_empty() {
        return Ok(None);
    }
    let last = COUNTING_FIRST_ROW.saturating_add(scan_rows.max(1) - 1);
    let range = target.range(0, COUNTING_FIRST_ROW, 0, last);
    let rows = store
        .read_range(&target.spreadsheet_id, &range)
        .await
        .map_err(|e| SyncError::store("read counting sheet", target, e))?;

    let first_cell = |row: &Vec<CellValue>| row.first().map(|c| c.as_text().trim().to_string());
    if rows.iter().any(|row| first_cell(row).as_deref() == Some(code)) {
        debug!("code already counted");
        return Ok(None);
    }
    let offset = rows
        .iter()
        .position(|row| first_cell(row).map_or(true, |t| t.is_empty()))
        .unwrap_or(rows.len());
    let row = COUNTING_FIRST_ROW + offset as u32;

    let cells = vec![
        CellValue::text(code),
        CellValue::text(hours.format_local(submission.created_at)),
        CellValue::text(submission.device.name.clone()),
        CellValue::text(def.form.name.clone()),
    ];
    let range = target.range(0, row, cells.len() - 1, row);
    store
        .write_range(&target.spreadsheet_id, &range, vec![cells], Dimension::Rows)
        .await
        .map_err(|e| SyncError::store("write counting sheet", target, e))?;
    info!(row, "code counted");
    Ok(Some(row))
}
