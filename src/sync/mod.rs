//! Sync orchestrator: claims one submission per pass and projects it onto
//! its spreadsheet.
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::alert::{self, Alerter};
use crate::catalog::{self, FormDefinition};
use crate::config::{CodeCounting, Config};
use crate::db::{self, Pool};
use crate::error::SyncError;
use crate::locator::RowLocator;
use crate::mailer::Mailer;
use crate::model::{Submission, SubmissionDataItem, SubmissionType, SyncOutcome};
use crate::reconcile::{ColumnReconciler, HeaderSchema, SheetLayout};
use crate::schedule::{Selection, WorkingHours};
use crate::sheets::{column_index, Dimension, SheetStore, SheetTarget};

pub mod effects;
pub mod row;

/// How a submission type is projected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Label row plus key row; mirrors to the memory sheet.
    Answers,
    /// Single label row, no mirror.
    SignUp,
    /// Single label row; mirrors to the memory sheet.
    SignUpWithMemory,
}

impl Strategy {
    /// `None` for wire values this engine does not know how to project.
    pub fn for_type(submission_type: &SubmissionType) -> Option<Self> {
        match submission_type {
            SubmissionType::Values | SubmissionType::QrCode | SubmissionType::Teacher => {
                Some(Strategy::Answers)
            }
            SubmissionType::SignUpRegistration => Some(Strategy::SignUp),
            SubmissionType::SignUpWriteToMemoryForm => Some(Strategy::SignUpWithMemory),
            SubmissionType::Other(_) => None,
        }
    }

    pub fn schema(&self) -> HeaderSchema {
        match self {
            Strategy::Answers => HeaderSchema::LabelAndKeyRow,
            Strategy::SignUp | Strategy::SignUpWithMemory => HeaderSchema::SingleLabelRow,
        }
    }

    pub fn mirrors(&self) -> bool {
        !matches!(self, Strategy::SignUp)
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub layout: SheetLayout,
    pub hours: WorkingHours,
    pub lease_secs: i64,
    pub max_backoff_secs: i64,
    pub counting: CodeCounting,
}

impl SyncSettings {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let max_column = column_index(&cfg.sheets.max_column)
            .ok_or_else(|| anyhow!("invalid sheets.max_column {:?}", cfg.sheets.max_column))?;
        Ok(Self {
            layout: SheetLayout {
                max_column,
                data_scan_rows: cfg.sheets.data_scan_rows,
            },
            hours: WorkingHours::from_config(&cfg.schedule),
            lease_secs: cfg.app.claim_lease_seconds as i64,
            max_backoff_secs: cfg.app.max_backoff_seconds as i64,
            counting: cfg.code_counting.clone(),
        })
    }
}

/// Result of the primary write, handed to the side effects.
struct Written {
    def: FormDefinition,
    answers: Vec<SubmissionDataItem>,
    target: SheetTarget,
    row: u32,
}

pub struct Orchestrator {
    pool: Pool,
    store: Arc<dyn SheetStore>,
    alerter: Arc<dyn Alerter>,
    mailer: Arc<dyn Mailer>,
    settings: SyncSettings,
    worker_id: String,
    running: Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        pool: Pool,
        store: Arc<dyn SheetStore>,
        alerter: Arc<dyn Alerter>,
        mailer: Arc<dyn Mailer>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            pool,
            store,
            alerter,
            mailer,
            settings,
            worker_id: uuid::Uuid::new_v4().to_string(),
            running: Mutex::new(()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run one pass now, honoring working hours.
    pub async fn execute(&self) -> Result<SyncOutcome> {
        self.execute_at(Utc::now()).await
    }

    pub async fn execute_at(&self, now: DateTime<Utc>) -> Result<SyncOutcome> {
        self.execute_with(self.settings.hours.selection(now), now)
            .await
    }

    /// Run one pass with an explicit selection rule. Only database errors
    /// are returned as `Err`; everything else is recorded on the submission.
    #[instrument(skip_all, fields(worker_id = %self.worker_id, ?selection))]
    pub async fn execute_with(
        &self,
        selection: Selection,
        now: DateTime<Utc>,
    ) -> Result<SyncOutcome> {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("sync pass already running; skipped");
            self.notify("Sync skipped: previous pass is still running").await;
            return Ok(SyncOutcome::Busy);
        };

        let Some(submission) = db::claim_next_pending(
            &self.pool,
            selection,
            &self.worker_id,
            now,
            self.settings.lease_secs,
        )
        .await?
        else {
            return Ok(SyncOutcome::Idle);
        };
        info!(
            id = submission.id,
            form_id = submission.form_id,
            attempt = submission.attempt,
            "claimed submission"
        );

        let Some(strategy) = Strategy::for_type(&submission.submission_type) else {
            if !db::mark_failed(&self.pool, submission.id, &self.worker_id).await? {
                return Ok(self.claim_lost(&submission, "failure").await);
            }
            warn!(
                id = submission.id,
                submission_type = submission.submission_type.as_str(),
                "unsupported submission type; marked failed"
            );
            self.notify(&format!(
                "Sync failed permanently: submission {} has unsupported type {:?}",
                submission.id,
                submission.submission_type.as_str()
            ))
            .await;
            return Ok(SyncOutcome::PermanentlyUnsupported(submission.id));
        };

        match self.project(&submission, strategy, now).await {
            Ok(written) => {
                if !db::mark_succeeded(&self.pool, submission.id, &self.worker_id, now).await? {
                    return Ok(self.claim_lost(&submission, "success").await);
                }
                info!(
                    id = submission.id,
                    spreadsheet_id = %written.target.spreadsheet_id,
                    row = written.row,
                    "submission synced"
                );
                self.notify(&format!(
                    "Sync succeeded: {} (row {})",
                    describe(&submission, Some(&written.def)),
                    written.row
                ))
                .await;
                self.side_effects(&submission, strategy, &written).await;
                Ok(SyncOutcome::Succeeded(submission.id))
            }
            Err(err) if !err.is_retriable() => {
                error!(err = %err, id = submission.id, "database error during sync");
                Err(anyhow::Error::new(err))
            }
            Err(err) => {
                let Some(next_retry_at) = db::mark_attempted(
                    &self.pool,
                    submission.id,
                    &self.worker_id,
                    submission.attempt,
                    now,
                    self.settings.max_backoff_secs,
                )
                .await?
                else {
                    return Ok(self.claim_lost(&submission, "failure").await);
                };
                warn!(
                    id = submission.id,
                    err = %err,
                    %next_retry_at,
                    "sync attempt failed; backoff"
                );
                self.notify(&format!(
                    "Sync failed: submission {}: {}",
                    submission.id, err
                ))
                .await;
                Ok(SyncOutcome::Attempted(submission.id))
            }
        }
    }

    /// The lease ran out and another worker now owns the submission; its
    /// record wins.
    async fn claim_lost(&self, submission: &Submission, outcome: &str) -> SyncOutcome {
        warn!(id = submission.id, outcome, "claim lost; outcome not recorded");
        self.notify(&format!(
            "Sync claim lost: submission {} ({} not recorded)",
            submission.id, outcome
        ))
        .await;
        SyncOutcome::ClaimLost(submission.id)
    }

    /// Reconcile the header, send answer mails once, find a row and write it.
    async fn project(
        &self,
        submission: &Submission,
        strategy: Strategy,
        now: DateTime<Utc>,
    ) -> Result<Written, SyncError> {
        let def = catalog::load_form(&self.pool, submission.form_id)
            .await
            .map_err(SyncError::Repository)?
            .ok_or(SyncError::FormMissing(submission.form_id))?;
        let answers = submission.parse_answers()?;
        self.notify(&format!("Sync started: {}", describe(submission, Some(&def))))
            .await;

        let target = SheetTarget::new(
            submission.spreadsheet_id.clone(),
            submission.sheet_name.clone(),
        );
        let schema = strategy.schema();
        let store = self.store.as_ref();
        let header = ColumnReconciler::new(store, self.settings.layout)
            .reconcile(&target, schema, &def.questions)
            .await?;

        if submission.mailed_at.is_none() {
            self.send_messages(submission, &def, &answers).await;
            db::mark_mailed(&self.pool, submission.id, &self.worker_id, now)
                .await
                .map_err(SyncError::Repository)?;
        }

        let row = RowLocator::new(store, self.settings.layout)
            .next_free_row(&target, schema.first_data_row())
            .await?;
        let cells = row::build_row(
            submission,
            &def,
            &header,
            &answers,
            now,
            &self.settings.hours,
        );
        let range = target.range(0, row, cells.len() - 1, row);
        store
            .write_range(&target.spreadsheet_id, &range, vec![cells], Dimension::Rows)
            .await
            .map_err(|e| SyncError::store("write row", &target, e))?;

        Ok(Written {
            def,
            answers,
            target,
            row,
        })
    }

    async fn send_messages(
        &self,
        submission: &Submission,
        def: &FormDefinition,
        answers: &[SubmissionDataItem],
    ) {
        for item in answers {
            let Some(meta) = item.message.as_ref().filter(|m| m.is_deliverable()) else {
                continue;
            };
            let recipients: Vec<String> = meta
                .emails
                .iter()
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect();
            // the form's current label wins over the one captured on the device
            let label = def
                .question(&item.question_id)
                .map_or(item.question_label.as_str(), |q| q.label.as_str());
            let subject = format!("{}: {}", def.form.name, label);
            if let Err(err) = self
                .mailer
                .send(&recipients, &subject, &meta.message_box)
                .await
            {
                warn!(?err, id = submission.id, question_id = %item.question_id, "answer mail failed");
                self.notify(&format!(
                    "Mail failed for submission {} question {}: {:#}",
                    submission.id, item.question_id, err
                ))
                .await;
            }
        }
    }

    async fn side_effects(&self, submission: &Submission, strategy: Strategy, written: &Written) {
        let store = self.store.as_ref();
        let form = &written.def.form;

        if strategy.mirrors() && form.remember_recent {
            if let Some(target) = &form.memory_target {
                if let Err(err) =
                    effects::write_memory(store, target, &written.def, submission, &written.answers)
                        .await
                {
                    warn!(err = %err, id = submission.id, "memory sheet update failed");
                    self.notify(&format!(
                        "Memory sheet update failed for submission {}: {}",
                        submission.id, err
                    ))
                    .await;
                }
            }
        }

        let Some(target) = &form.counting_target else {
            return;
        };
        let Some(question) = written
            .def
            .counting_question(&self.settings.counting.question_type)
        else {
            return;
        };
        let Some(code) = written
            .answers
            .iter()
            .find(|a| a.question_id == question.question_id)
        else {
            return;
        };
        if let Err(err) = effects::count_code(
            store,
            target,
            &written.def,
            submission,
            &code.answer,
            self.settings.counting.scan_rows,
            &self.settings.hours,
        )
        .await
        {
            warn!(err = %err, id = submission.id, "code counting failed");
            self.notify(&format!(
                "Code counting failed for submission {}: {}",
                submission.id, err
            ))
            .await;
        }
    }

    async fn notify(&self, message: &str) {
        alert::best_effort(self.alerter.as_ref(), message).await;
    }
}

/// One-line identity of a submission for alerts.
pub fn describe(submission: &Submission, def: Option<&FormDefinition>) -> String {
    let mut out = format!("submission {}", submission.id);
    if let Some(def) = def {
        out.push_str(&format!(" | form {}", def.form.name));
        if !def.form.note.trim().is_empty() {
            out.push_str(&format!(" ({})", def.form.note.trim()));
        }
    }
    if !submission.device.name.trim().is_empty() {
        out.push_str(&format!(" | device {}", submission.device.name.trim()));
    }
    let url = match def {
        Some(def) => def.display_url(&submission.spreadsheet_id),
        None => crate::sheets::spreadsheet_url(&submission.spreadsheet_id),
    };
    out.push_str(&format!(" | {}", url));
    out
}
