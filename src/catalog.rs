//! Form catalog: a form's metadata together with its ordered questions.
//!
//! Questions are reloaded on every sync pass because forms are edited while
//! submissions are queued.
use anyhow::Result;
use tracing::instrument;

use crate::db::{self, FormRecord, Pool};
use crate::model::FormQuestionItem;
use crate::sheets::spreadsheet_url;

#[derive(Debug, Clone)]
pub struct FormDefinition {
    pub form: FormRecord,
    pub questions: Vec<FormQuestionItem>,
}

impl FormDefinition {
    pub fn question(&self, question_id: &str) -> Option<&FormQuestionItem> {
        self.questions.iter().find(|q| q.question_id == question_id)
    }

    /// The question whose answers feed the code-counting sheet, if any.
    pub fn counting_question(&self, question_type: &str) -> Option<&FormQuestionItem> {
        self.questions
            .iter()
            .find(|q| q.question_type == question_type)
    }

    /// URL shown in the metadata columns; falls back to the target sheet's URL
    /// when the form was saved without one.
    pub fn display_url(&self, spreadsheet_id: &str) -> String {
        if self.form.spreadsheet_url.trim().is_empty() {
            spreadsheet_url(spreadsheet_id)
        } else {
            self.form.spreadsheet_url.clone()
        }
    }
}

/// Load a form with its questions; `None` when the form does not exist.
#[instrument(skip(pool))]
pub async fn load_form(pool: &Pool, form_id: i64) -> Result<Option<FormDefinition>> {
    let Some(form) = db::fetch_form(pool, form_id).await? else {
        return Ok(None);
    };
    let questions = db::fetch_questions(pool, form_id).await?;
    Ok(Some(FormDefinition { form, questions }))
}
