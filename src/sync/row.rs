//! Cell layout of one submission row.
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::catalog::FormDefinition;
use crate::model::{Submission, SubmissionDataItem};
use crate::reconcile::{ReconciledHeader, METADATA_COLUMNS};
use crate::schedule::WorkingHours;
use crate::sheets::CellValue;

/// Metadata cells followed by the question area. Trailing blank cells are
/// dropped so a reused row keeps whatever sits right of the last answer.
pub fn build_row(
    submission: &Submission,
    def: &FormDefinition,
    header: &ReconciledHeader,
    answers: &[SubmissionDataItem],
    written_at: DateTime<Utc>,
    hours: &WorkingHours,
) -> Vec<CellValue> {
    let device = &submission.device;
    let mut cells = vec![
        CellValue::text(hours.format_local(submission.opened_at)),
        CellValue::text(hours.format_local(submission.created_at)),
        CellValue::text(hours.format_local(written_at)),
        CellValue::text(device.id.clone()),
        CellValue::text(device.name.clone()),
        CellValue::text(device.note.clone()),
        CellValue::text(device.info[0].clone()),
        CellValue::text(device.info[1].clone()),
        CellValue::text(device.info[2].clone()),
        CellValue::text(def.form.note.clone()),
        CellValue::text(def.form.name.clone()),
        CellValue::text(def.display_url(&submission.spreadsheet_id)),
    ];
    debug_assert_eq!(cells.len(), METADATA_COLUMNS);

    let mut area = vec![CellValue::Empty; header.width()];
    for item in answers {
        let column = header
            .column_of(&item.question_id)
            .or_else(|| header.column_by_key(&item.question_label));
        match column {
            Some(col) => area[col] = CellValue::text(item.answer.clone()),
            None => warn!(
                id = submission.id,
                question_id = %item.question_id,
                label = %item.question_label,
                "answer matches no column; dropped"
            ),
        }
    }
    while matches!(area.last(), Some(c) if c.is_blank()) {
        area.pop();
    }
    cells.extend(area);
    cells
}
