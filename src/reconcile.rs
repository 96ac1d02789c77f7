//! Column reconciliation between a form's questions and a live sheet header.
//!
//! The header starts at row 1. The first [`METADATA_COLUMNS`] columns hold
//! submission metadata; question columns follow. Existing columns are never
//! reordered, rewritten or removed: new questions are appended on the right.
use std::collections::{HashMap, HashSet};

use tracing::{debug, info, instrument};

use crate::error::SyncError;
use crate::model::{FormQuestionItem, QuestionPair};
use crate::sheets::{CellValue, Dimension, SheetStore, SheetTarget};

pub const HEADER_ROW: u32 = 1;

pub const METADATA_LABELS: [&str; 12] = [
    "Opened at",
    "Created at",
    "Written at",
    "Device ID",
    "Device name",
    "Device note",
    "Device info 1",
    "Device info 2",
    "Device info 3",
    "Form note",
    "Form name",
    "Spreadsheet URL",
];

pub const METADATA_COLUMNS: usize = METADATA_LABELS.len();

/// Header layout of an output sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderSchema {
    /// Row 1 holds labels that double as matching keys.
    SingleLabelRow,
    /// Row 1 holds labels, row 2 holds stable matching keys.
    LabelAndKeyRow,
}

impl HeaderSchema {
    pub fn header_rows(&self) -> u32 {
        match self {
            HeaderSchema::SingleLabelRow => 1,
            HeaderSchema::LabelAndKeyRow => 2,
        }
    }

    pub fn first_data_row(&self) -> u32 {
        HEADER_ROW + self.header_rows()
    }
}

/// Sheet geometry shared by the reconciler and the row locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetLayout {
    /// Last column (0-based) the header may occupy.
    pub max_column: usize,
    /// Rows scanned below the header when looking for a free row.
    pub data_scan_rows: u32,
}

/// Header after reconciliation. Column positions are relative to the first
/// question column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledHeader {
    pub columns: Vec<QuestionPair>,
    pub appended: usize,
    assignments: HashMap<String, usize>,
}

impl ReconciledHeader {
    /// Position of a question's column.
    pub fn column_of(&self, question_id: &str) -> Option<usize> {
        self.assignments.get(question_id).copied()
    }

    /// Position of the first column whose key, or failing that label, equals `key`.
    pub fn column_by_key(&self, key: &str) -> Option<usize> {
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        self.columns
            .iter()
            .position(|c| c.bottom == key)
            .or_else(|| self.columns.iter().position(|c| c.top == key))
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }
}

/// Key used when a question's natural key is already taken by another column.
fn fallback_key(question: &FormQuestionItem) -> String {
    format!("{}#{}", question.label.trim(), question.question_id)
}

pub struct ColumnReconciler<'a> {
    store: &'a dyn SheetStore,
    layout: SheetLayout,
}

impl<'a> ColumnReconciler<'a> {
    pub fn new(store: &'a dyn SheetStore, layout: SheetLayout) -> Self {
        Self { store, layout }
    }

    /// Read the header of `target`, append columns for questions it does not
    /// represent yet, and return the resulting column map. The header is only
    /// written when at least one column was appended.
    #[instrument(skip_all, fields(target = %target, ?schema))]
    pub async fn reconcile(
        &self,
        target: &SheetTarget,
        schema: HeaderSchema,
        questions: &[FormQuestionItem],
    ) -> Result<ReconciledHeader, SyncError> {
        let last_header_row = HEADER_ROW + schema.header_rows() - 1;
        let range = target.range(0, HEADER_ROW, self.layout.max_column, last_header_row);
        let rows = self
            .store
            .read_range(&target.spreadsheet_id, &range)
            .await
            .map_err(|e| SyncError::store("read header", target, e))?;

        let (metadata_present, existing) = split_header(&rows, schema);
        let header = plan_columns(existing, schema, questions);
        debug!(
            existing = header.width() - header.appended,
            appended = header.appended,
            "header reconciled"
        );
        if header.appended == 0 {
            return Ok(header);
        }

        let limit = self.layout.max_column + 1;
        let needed = METADATA_COLUMNS + header.width();
        if needed > limit {
            return Err(SyncError::HeaderFull {
                target: target.clone(),
                needed,
                limit,
            });
        }

        // Only the appended columns are written, plus the metadata labels on a
        // sheet that has none yet; existing cells stay untouched.
        let first_new = header.width() - header.appended;
        let start_col = if metadata_present {
            METADATA_COLUMNS + first_new
        } else {
            0
        };
        let mut label_row: Vec<CellValue> = Vec::new();
        let mut key_row: Vec<CellValue> = Vec::new();
        if !metadata_present {
            label_row.extend(METADATA_LABELS.iter().map(|l| CellValue::text(*l)));
            key_row.extend(METADATA_LABELS.iter().map(|l| CellValue::text(*l)));
            for pair in &header.columns[..first_new] {
                label_row.push(CellValue::text(pair.top.clone()));
                key_row.push(CellValue::text(pair.bottom.clone()));
            }
        }
        for pair in &header.columns[first_new..] {
            label_row.push(CellValue::text(pair.top.clone()));
            key_row.push(CellValue::text(pair.bottom.clone()));
        }

        let end_col = start_col + label_row.len() - 1;
        let rows = match schema {
            HeaderSchema::SingleLabelRow => vec![label_row],
            HeaderSchema::LabelAndKeyRow => vec![label_row, key_row],
        };
        let write_range = target.range(start_col, HEADER_ROW, end_col, last_header_row);
        self.store
            .write_range(&target.spreadsheet_id, &write_range, rows, Dimension::Rows)
            .await
            .map_err(|e| SyncError::store("write header", target, e))?;
        info!(
            appended = header.appended,
            range = %write_range,
            "appended question columns"
        );
        Ok(header)
    }
}

/// Split raw header rows into "metadata labels present" and the existing
/// question pairs. Gaps stay as blank pairs so positions are preserved.
fn split_header(rows: &[Vec<CellValue>], schema: HeaderSchema) -> (bool, Vec<QuestionPair>) {
    let empty: Vec<CellValue> = Vec::new();
    let labels = rows.first().unwrap_or(&empty);
    let keys = match schema {
        HeaderSchema::SingleLabelRow => labels,
        HeaderSchema::LabelAndKeyRow => rows.get(1).unwrap_or(&empty),
    };

    let metadata_present = (0..METADATA_COLUMNS).any(|i| !cell_text(labels, i).is_empty());
    let width = labels.len().max(keys.len());
    let existing = (METADATA_COLUMNS..width.max(METADATA_COLUMNS))
        .map(|i| QuestionPair::new(cell_text(labels, i), cell_text(keys, i)))
        .collect();
    (metadata_present, existing)
}

fn cell_text(row: &[CellValue], i: usize) -> String {
    row.get(i)
        .map(|c| c.as_text().trim().to_string())
        .unwrap_or_default()
}

/// Match questions against existing columns and append the rest.
///
/// Matching runs in two passes so a unique-id match always wins over
/// another question's label match on the same column.
fn plan_columns(
    existing: Vec<QuestionPair>,
    schema: HeaderSchema,
    questions: &[FormQuestionItem],
) -> ReconciledHeader {
    let mut by_key: HashMap<String, usize> = HashMap::new();
    for (i, pair) in existing.iter().enumerate() {
        if !pair.bottom.is_empty() {
            by_key.entry(pair.bottom.clone()).or_insert(i);
        }
    }

    let mut assignments: HashMap<String, usize> = HashMap::new();
    let mut used: HashSet<usize> = HashSet::new();

    for q in questions {
        let Some(uid) = q.unique_id.as_deref().map(str::trim).filter(|u| !u.is_empty()) else {
            continue;
        };
        if let Some(&col) = by_key.get(uid) {
            if used.insert(col) {
                assignments.insert(q.question_id.clone(), col);
            }
        }
    }

    for q in questions {
        if assignments.contains_key(&q.question_id) {
            continue;
        }
        let candidates = [q.label.trim().to_string(), fallback_key(q)];
        for key in candidates {
            if let Some(&col) = by_key.get(&key) {
                if used.insert(col) {
                    assignments.insert(q.question_id.clone(), col);
                    break;
                }
            }
        }
    }

    let mut columns = existing;
    let mut appended = 0;
    for q in questions {
        if assignments.contains_key(&q.question_id) {
            continue;
        }
        let natural = match schema {
            HeaderSchema::SingleLabelRow => q.label.trim().to_string(),
            HeaderSchema::LabelAndKeyRow => q.matching_key().trim().to_string(),
        };
        let key = if natural.is_empty() || by_key.contains_key(&natural) {
            fallback_key(q)
        } else {
            natural
        };
        let top = match schema {
            HeaderSchema::SingleLabelRow => key.clone(),
            HeaderSchema::LabelAndKeyRow => q.label.trim().to_string(),
        };
        let col = columns.len();
        by_key.insert(key.clone(), col);
        columns.push(QuestionPair::new(top, key));
        assignments.insert(q.question_id.clone(), col);
        appended += 1;
    }

    ReconciledHeader {
        columns,
        appended,
        assignments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheets::memory::MemorySheetStore;

    const LAYOUT: SheetLayout = SheetLayout {
        max_column: 701,
        data_scan_rows: 100,
    };

    fn q(id: &str, label: &str, uid: Option<&str>) -> FormQuestionItem {
        FormQuestionItem {
            question_id: id.into(),
            label: label.into(),
            question_type: "text".into(),
            unique_id: uid.map(str::to_string),
        }
    }

    fn header_rows(pairs: &[(&str, &str)]) -> Vec<Vec<CellValue>> {
        let mut labels: Vec<CellValue> = METADATA_LABELS.iter().map(|l| CellValue::text(*l)).collect();
        let mut keys = labels.clone();
        for (top, bottom) in pairs {
            labels.push(CellValue::text(*top));
            keys.push(CellValue::text(*bottom));
        }
        vec![labels, keys]
    }

    fn tops(header: &ReconciledHeader) -> Vec<&str> {
        header.columns.iter().map(|c| c.top.as_str()).collect()
    }

    #[tokio::test]
    async fn unique_id_match_keeps_relabelled_column() {
        let store = MemorySheetStore::new();
        store.seed("s1", "Form", header_rows(&[("Name", "Name"), ("AgeOld", "age_v2")]));
        let target = SheetTarget::new("s1", "Form");
        let questions = vec![
            q("q1", "Name", None),
            q("q2", "Age", Some("age_v2")),
            q("q3", "Notes", None),
        ];

        let header = ColumnReconciler::new(&store, LAYOUT)
            .reconcile(&target, HeaderSchema::LabelAndKeyRow, &questions)
            .await
            .unwrap();

        assert_eq!(header.appended, 1);
        assert_eq!(tops(&header), vec!["Name", "AgeOld", "Notes"]);
        assert_eq!(header.column_of("q2"), Some(1));
        assert_eq!(header.column_of("q3"), Some(2));

        let writes = store.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].range, "'Form'!O1:O2");
        assert_eq!(store.row_text("s1", "Form", 1)[14], "Notes");
        assert_eq!(store.row_text("s1", "Form", 2)[14], "Notes");
    }

    #[tokio::test]
    async fn second_pass_is_a_pure_read() {
        let store = MemorySheetStore::new();
        let target = SheetTarget::new("s1", "Form");
        let questions = vec![q("q1", "Name", None), q("q2", "Age", Some("age_v2"))];
        let reconciler = ColumnReconciler::new(&store, LAYOUT);

        let first = reconciler
            .reconcile(&target, HeaderSchema::LabelAndKeyRow, &questions)
            .await
            .unwrap();
        assert_eq!(first.appended, 2);
        // an empty sheet gets the metadata labels as well
        assert_eq!(store.writes()[0].range, "'Form'!A1:N2");
        assert_eq!(store.row_text("s1", "Form", 2)[13], "age_v2");

        let second = reconciler
            .reconcile(&target, HeaderSchema::LabelAndKeyRow, &questions)
            .await
            .unwrap();
        assert_eq!(second.appended, 0);
        assert_eq!(second.columns, first.columns);
        assert_eq!(store.writes().len(), 1);
    }

    #[tokio::test]
    async fn unique_id_wins_over_another_questions_label() {
        // column keyed "score" is claimed by q2's unique id even though q1's label is "score"
        let store = MemorySheetStore::new();
        store.seed("s1", "Form", header_rows(&[("Score", "score")]));
        let target = SheetTarget::new("s1", "Form");
        let questions = vec![q("q1", "score", None), q("q2", "Points", Some("score"))];

        let header = ColumnReconciler::new(&store, LAYOUT)
            .reconcile(&target, HeaderSchema::LabelAndKeyRow, &questions)
            .await
            .unwrap();
        assert_eq!(header.column_of("q2"), Some(0));
        assert_eq!(header.column_of("q1"), Some(1));
        assert_eq!(header.columns[1], QuestionPair::new("score", "score#q1"));
    }

    #[tokio::test]
    async fn duplicate_labels_stay_stable_across_passes() {
        let store = MemorySheetStore::new();
        let target = SheetTarget::new("s1", "Form");
        let questions = vec![q("q1", "Comment", None), q("q2", "Comment", None)];
        let reconciler = ColumnReconciler::new(&store, LAYOUT);

        let first = reconciler
            .reconcile(&target, HeaderSchema::LabelAndKeyRow, &questions)
            .await
            .unwrap();
        let keys: Vec<_> = first.columns.iter().map(|c| c.bottom.as_str()).collect();
        assert_eq!(keys, vec!["Comment", "Comment#q2"]);

        let second = reconciler
            .reconcile(&target, HeaderSchema::LabelAndKeyRow, &questions)
            .await
            .unwrap();
        assert_eq!(second.appended, 0);
        assert_eq!(second.column_of("q2"), Some(1));
    }

    #[tokio::test]
    async fn gaps_and_manual_columns_are_preserved() {
        let store = MemorySheetStore::new();
        store.seed(
            "s1",
            "Form",
            header_rows(&[("Name", "Name"), ("", ""), ("Teacher remarks", "")]),
        );
        let target = SheetTarget::new("s1", "Form");
        let header = ColumnReconciler::new(&store, LAYOUT)
            .reconcile(&target, HeaderSchema::LabelAndKeyRow, &[q("q1", "Name", None), q("q9", "Class", None)])
            .await
            .unwrap();
        assert_eq!(tops(&header), vec!["Name", "", "Teacher remarks", "Class"]);
        assert_eq!(header.column_of("q9"), Some(3));
        assert_eq!(store.writes()[0].range, "'Form'!P1:P2");
    }

    #[tokio::test]
    async fn single_label_row_matches_on_labels() {
        let store = MemorySheetStore::new();
        let mut labels: Vec<CellValue> = METADATA_LABELS.iter().map(|l| CellValue::text(*l)).collect();
        labels.push(CellValue::text("Parent name"));
        labels.push(CellValue::text("reg_phone"));
        store.seed("s1", "Sign up", vec![labels]);
        let target = SheetTarget::new("s1", "Sign up");
        let questions = vec![
            q("q1", "Parent name", None),
            q("q2", "Phone", Some("reg_phone")),
            q("q3", "Email", Some("reg_email")),
        ];

        let header = ColumnReconciler::new(&store, LAYOUT)
            .reconcile(&target, HeaderSchema::SingleLabelRow, &questions)
            .await
            .unwrap();
        assert_eq!(header.column_of("q2"), Some(1));
        assert_eq!(header.columns[2], QuestionPair::new("Email", "Email"));

        let writes = store.writes();
        assert_eq!(writes[0].range, "'Sign up'!O1:O1");
        assert_eq!(writes[0].rows.len(), 1);
        assert_eq!(HeaderSchema::SingleLabelRow.first_data_row(), 2);
    }

    #[tokio::test]
    async fn numeric_header_cells_are_matched_as_text() {
        let store = MemorySheetStore::new();
        let mut rows = header_rows(&[]);
        rows[0].push(CellValue::Number(2024.0));
        rows[1].push(CellValue::Number(2024.0));
        store.seed("s1", "Form", rows);
        let header = ColumnReconciler::new(&store, LAYOUT)
            .reconcile(&SheetTarget::new("s1", "Form"), HeaderSchema::LabelAndKeyRow, &[q("q1", "2024", None)])
            .await
            .unwrap();
        assert_eq!(header.appended, 0);
        assert_eq!(header.column_of("q1"), Some(0));
    }

    #[tokio::test]
    async fn read_failure_aborts_without_writing() {
        let store = MemorySheetStore::new();
        store.fail_spreadsheet("gone");
        let err = ColumnReconciler::new(&store, LAYOUT)
            .reconcile(&SheetTarget::new("gone", "Form"), HeaderSchema::LabelAndKeyRow, &[q("q1", "Name", None)])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Store { op: "read header", .. }));
        assert!(err.to_string().contains("gone/Form"));
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn header_beyond_max_column_is_rejected() {
        let store = MemorySheetStore::new();
        let narrow = SheetLayout {
            max_column: 12,
            data_scan_rows: 10,
        };
        let err = ColumnReconciler::new(&store, narrow)
            .reconcile(
                &SheetTarget::new("s1", "Form"),
                HeaderSchema::LabelAndKeyRow,
                &[q("q1", "A", None), q("q2", "B", None)],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::HeaderFull { needed: 14, limit: 13, .. }));
        assert!(store.writes().is_empty());
    }

    #[test]
    fn column_by_key_prefers_keys_then_labels() {
        let header = plan_columns(
            vec![QuestionPair::new("Age", "age_v2"), QuestionPair::new("Name", "Name")],
            HeaderSchema::LabelAndKeyRow,
            &[],
        );
        assert_eq!(header.column_by_key("age_v2"), Some(0));
        assert_eq!(header.column_by_key("Age"), Some(0));
        assert_eq!(header.column_by_key("Name"), Some(1));
        assert_eq!(header.column_by_key(" "), None);
    }
}
