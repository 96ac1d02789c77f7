use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sync status of a submission as stored in the `submissions.status` column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SubmissionStatus {
    Pending,
    InProgress,
    Succeeded,
    Attempted,
    Failed,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::InProgress => "in_progress",
            SubmissionStatus::Succeeded => "succeeded",
            SubmissionStatus::Attempted => "attempted",
            SubmissionStatus::Failed => "failed",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SubmissionStatus::Pending),
            "in_progress" => Some(SubmissionStatus::InProgress),
            "succeeded" => Some(SubmissionStatus::Succeeded),
            "attempted" => Some(SubmissionStatus::Attempted),
            "failed" => Some(SubmissionStatus::Failed),
            _ => None,
        }
    }
}

/// How a submission was captured on the device. Unknown wire values are kept
/// as `Other` so dispatch can reject them explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionType {
    Values,
    QrCode,
    Teacher,
    SignUpRegistration,
    SignUpWriteToMemoryForm,
    Other(String),
}

impl SubmissionType {
    pub fn as_str(&self) -> &str {
        match self {
            SubmissionType::Values => "values",
            SubmissionType::QrCode => "qr_code",
            SubmissionType::Teacher => "teacher",
            SubmissionType::SignUpRegistration => "sign_up_registration",
            SubmissionType::SignUpWriteToMemoryForm => "sign_up_write_to_memory_form",
            SubmissionType::Other(raw) => raw.as_str(),
        }
    }

    pub fn parse_type(s: &str) -> Self {
        match s {
            "values" => SubmissionType::Values,
            "qr_code" => SubmissionType::QrCode,
            "teacher" => SubmissionType::Teacher,
            "sign_up_registration" => SubmissionType::SignUpRegistration,
            "sign_up_write_to_memory_form" => SubmissionType::SignUpWriteToMemoryForm,
            other => SubmissionType::Other(other.to_string()),
        }
    }
}

/// Free-text device information captured alongside a submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub note: String,
    pub info: [String; 3],
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub id: i64,
    pub form_id: i64,
    pub spreadsheet_id: String,
    pub sheet_name: String,
    pub device: DeviceInfo,
    pub submission_type: SubmissionType,
    pub opened_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Raw JSON array of [`SubmissionDataItem`].
    pub answers: String,
    pub status: SubmissionStatus,
    pub priority: bool,
    pub attempt: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Set once the answer mails went out; retries skip them.
    pub mailed_at: Option<DateTime<Utc>>,
}

impl Submission {
    pub fn parse_answers(&self) -> Result<Vec<SubmissionDataItem>, serde_json::Error> {
        serde_json::from_str(&self.answers)
    }
}

/// One answer inside a submission payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionDataItem {
    pub question_id: String,
    #[serde(default)]
    pub question_label: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageMeta>,
}

/// Messaging metadata attached to an answer (e.g. "email this to the
/// homeroom teacher").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMeta {
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub message_box: String,
    #[serde(default)]
    pub question_type: Option<String>,
}

impl MessageMeta {
    pub fn is_deliverable(&self) -> bool {
        self.emails.iter().any(|e| !e.trim().is_empty()) && !self.message_box.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormQuestionItem {
    pub question_id: String,
    pub label: String,
    pub question_type: String,
    pub unique_id: Option<String>,
}

impl FormQuestionItem {
    /// Key written to the header's matching row for this question.
    pub fn matching_key(&self) -> &str {
        match self.unique_id.as_deref() {
            Some(uid) if !uid.trim().is_empty() => uid,
            _ => &self.label,
        }
    }
}

/// Two-row header cell: human label on top, stable matching key below.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestionPair {
    pub top: String,
    pub bottom: String,
}

impl QuestionPair {
    pub fn new(top: impl Into<String>, bottom: impl Into<String>) -> Self {
        Self {
            top: top.into(),
            bottom: bottom.into(),
        }
    }
}

/// Result of one orchestrator pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing eligible for sync.
    Idle,
    /// Another pass is already running in this process.
    Busy,
    Succeeded(i64),
    Attempted(i64),
    PermanentlyUnsupported(i64),
    /// The lease expired and another worker took the submission over; the
    /// outcome of this pass was discarded.
    ClaimLost(i64),
}
