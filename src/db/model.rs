//! Database entity and input models used by repositories.
//!
//! Keep these structs focused on the data written or returned by queries.
//! Business logic should live in higher layers.

use chrono::{DateTime, Utc};

use crate::model::{DeviceInfo, SubmissionDataItem, SubmissionType};
use crate::sheets::SheetTarget;

/// Form metadata row used by the catalog and the sync strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormRecord {
    pub id: i64,
    pub name: String,
    pub note: String,
    pub spreadsheet_url: String,
    pub remember_recent: bool,
    pub memory_target: Option<SheetTarget>,
    pub counting_target: Option<SheetTarget>,
}

/// Form creation input.
#[derive(Debug, Clone, Default)]
pub struct NewForm {
    pub name: String,
    pub note: String,
    pub spreadsheet_url: String,
    pub remember_recent: bool,
    pub memory_target: Option<(String, String)>,
    pub counting_target: Option<(String, String)>,
}

/// Submission creation input, as captured from a device.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub form_id: i64,
    pub spreadsheet_id: String,
    pub sheet_name: String,
    pub device: DeviceInfo,
    pub submission_type: SubmissionType,
    pub opened_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub answers: Vec<SubmissionDataItem>,
    pub priority: bool,
}
