use super::model::{FormRecord, NewForm, NewSubmission};
use crate::model::{
    DeviceInfo, FormQuestionItem, Submission, SubmissionStatus, SubmissionType,
};
use crate::schedule::Selection;
use crate::sheets::SheetTarget;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use sqlx::SqlitePool;
use tracing::instrument;

pub type Pool = SqlitePool;

const SUBMISSION_COLUMNS: &str = "id, form_id, spreadsheet_id, sheet_name, device_id, device_name, \
     device_note, device_info_1, device_info_2, device_info_3, submission_type, opened_at, \
     created_at, answers, status, priority, attempt, next_retry_at, mailed_at";

/// Rows a worker may pick up: never-tried or retriable submissions whose
/// backoff has expired, plus claims whose lease ran out.
const ELIGIBLE: &str = "((status IN ('pending', 'attempted') \
       AND (next_retry_at IS NULL OR datetime(next_retry_at) <= datetime(?))) \
     OR (status = 'in_progress' AND (claimed_at IS NULL OR datetime(claimed_at) <= datetime(?))))";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    // sqlx needs mode=rwc to create a missing database file
    let mut rebuilt = format!("sqlite://{}", expanded_path);
    match query_part {
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn insert_form(pool: &Pool, form: &NewForm) -> Result<i64> {
    let (memory_id, memory_sheet) = split_target(form.memory_target.as_ref());
    let (counting_id, counting_sheet) = split_target(form.counting_target.as_ref());
    let rec = sqlx::query(
        "INSERT INTO forms (name, note, spreadsheet_url, remember_recent, memory_spreadsheet_id, \
         memory_sheet_name, counting_spreadsheet_id, counting_sheet_name) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(&form.name)
    .bind(&form.note)
    .bind(&form.spreadsheet_url)
    .bind(form.remember_recent)
    .bind(memory_id)
    .bind(memory_sheet)
    .bind(counting_id)
    .bind(counting_sheet)
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

fn split_target(target: Option<&(String, String)>) -> (Option<&str>, Option<&str>) {
    match target {
        Some((id, sheet)) => (Some(id.as_str()), Some(sheet.as_str())),
        None => (None, None),
    }
}

/// Append a question to a form at the given position.
#[instrument(skip_all)]
pub async fn insert_question(
    pool: &Pool,
    form_id: i64,
    position: i64,
    question: &FormQuestionItem,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO form_questions (form_id, question_id, position, label, question_type, unique_id) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(form_id)
    .bind(&question.question_id)
    .bind(position)
    .bind(&question.label)
    .bind(&question.question_type)
    .bind(question.unique_id.as_deref())
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

pub async fn fetch_form(pool: &Pool, form_id: i64) -> Result<Option<FormRecord>> {
    let row = sqlx::query(
        "SELECT id, name, note, spreadsheet_url, remember_recent, memory_spreadsheet_id, \
         memory_sheet_name, counting_spreadsheet_id, counting_sheet_name FROM forms WHERE id = ?",
    )
    .bind(form_id)
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };

    let target = |id_col: &str, sheet_col: &str| -> Option<SheetTarget> {
        let id = row.try_get::<Option<String>, _>(id_col).ok().flatten()?;
        let sheet = row.try_get::<Option<String>, _>(sheet_col).ok().flatten()?;
        if id.trim().is_empty() || sheet.trim().is_empty() {
            return None;
        }
        Some(SheetTarget::new(id, sheet))
    };

    Ok(Some(FormRecord {
        id: row.get("id"),
        name: row.get("name"),
        note: row.get("note"),
        spreadsheet_url: row.get("spreadsheet_url"),
        remember_recent: row.get("remember_recent"),
        memory_target: target("memory_spreadsheet_id", "memory_sheet_name"),
        counting_target: target("counting_spreadsheet_id", "counting_sheet_name"),
    }))
}

/// Questions of a form in form-definition order.
pub async fn fetch_questions(pool: &Pool, form_id: i64) -> Result<Vec<FormQuestionItem>> {
    let rows = sqlx::query(
        "SELECT question_id, label, question_type, unique_id FROM form_questions \
         WHERE form_id = ? ORDER BY position ASC, id ASC",
    )
    .bind(form_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| FormQuestionItem {
            question_id: row.get("question_id"),
            label: row.get("label"),
            question_type: row.get("question_type"),
            unique_id: row
                .try_get::<Option<String>, _>("unique_id")
                .ok()
                .flatten()
                .filter(|s| !s.trim().is_empty()),
        })
        .collect())
}

#[instrument(skip_all)]
pub async fn insert_submission(pool: &Pool, submission: &NewSubmission) -> Result<i64> {
    let answers =
        serde_json::to_string(&submission.answers).context("failed to encode answers")?;
    let rec = sqlx::query(
        "INSERT INTO submissions (form_id, spreadsheet_id, sheet_name, device_id, device_name, \
         device_note, device_info_1, device_info_2, device_info_3, submission_type, opened_at, \
         created_at, answers, status, priority) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(submission.form_id)
    .bind(&submission.spreadsheet_id)
    .bind(&submission.sheet_name)
    .bind(&submission.device.id)
    .bind(&submission.device.name)
    .bind(&submission.device.note)
    .bind(&submission.device.info[0])
    .bind(&submission.device.info[1])
    .bind(&submission.device.info[2])
    .bind(submission.submission_type.as_str())
    .bind(submission.opened_at)
    .bind(submission.created_at)
    .bind(answers)
    .bind(SubmissionStatus::Pending.as_str())
    .bind(submission.priority)
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

fn submission_from_row(row: &SqliteRow) -> Result<Submission> {
    let id: i64 = row.get("id");
    let status_str: String = row.get("status");
    let status = SubmissionStatus::parse_status(&status_str)
        .ok_or_else(|| anyhow!("submission {} has unknown status {}", id, status_str))?;
    let type_str: String = row.get("submission_type");
    Ok(Submission {
        id,
        form_id: row.get("form_id"),
        spreadsheet_id: row.get("spreadsheet_id"),
        sheet_name: row.get("sheet_name"),
        device: DeviceInfo {
            id: row.get("device_id"),
            name: row.get("device_name"),
            note: row.get("device_note"),
            info: [
                row.get("device_info_1"),
                row.get("device_info_2"),
                row.get("device_info_3"),
            ],
        },
        submission_type: SubmissionType::parse_type(&type_str),
        opened_at: row
            .try_get("opened_at")
            .with_context(|| format!("submission {} has invalid opened_at", id))?,
        created_at: row
            .try_get("created_at")
            .with_context(|| format!("submission {} has invalid created_at", id))?,
        answers: row.get("answers"),
        status,
        priority: row.get("priority"),
        attempt: row.get("attempt"),
        next_retry_at: row
            .try_get::<Option<DateTime<Utc>>, _>("next_retry_at")
            .ok()
            .flatten(),
        mailed_at: row
            .try_get::<Option<DateTime<Utc>>, _>("mailed_at")
            .ok()
            .flatten(),
    })
}

pub async fn fetch_submission(pool: &Pool, id: i64) -> Result<Option<Submission>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM submissions WHERE id = ?",
        SUBMISSION_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(submission_from_row).transpose()
}

fn stale_cutoff(now: DateTime<Utc>, lease_secs: i64) -> DateTime<Utc> {
    now - Duration::seconds(lease_secs.max(0))
}

async fn find_first(
    pool: &Pool,
    prioritized: bool,
    now: DateTime<Utc>,
    lease_secs: i64,
) -> Result<Option<Submission>> {
    let sql = format!(
        "SELECT {} FROM submissions WHERE {}{} ORDER BY datetime(created_at) ASC, id ASC LIMIT 1",
        SUBMISSION_COLUMNS,
        ELIGIBLE,
        if prioritized { " AND priority = 1" } else { "" }
    );
    let row = sqlx::query(&sql)
        .bind(now)
        .bind(stale_cutoff(now, lease_secs))
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(submission_from_row).transpose()
}

/// Oldest eligible submission irrespective of priority.
#[instrument(skip_all)]
pub async fn find_first_pending(
    pool: &Pool,
    now: DateTime<Utc>,
    lease_secs: i64,
) -> Result<Option<Submission>> {
    find_first(pool, false, now, lease_secs).await
}

/// Oldest eligible submission flagged priority.
#[instrument(skip_all)]
pub async fn find_first_pending_prioritized(
    pool: &Pool,
    now: DateTime<Utc>,
    lease_secs: i64,
) -> Result<Option<Submission>> {
    find_first(pool, true, now, lease_secs).await
}

/// Atomically select the next eligible submission and flip it to
/// `in_progress` under `worker_id`. Two workers never receive the same row.
#[instrument(skip_all, fields(worker_id = %worker_id, ?selection))]
pub async fn claim_next_pending(
    pool: &Pool,
    selection: Selection,
    worker_id: &str,
    now: DateTime<Utc>,
    lease_secs: i64,
) -> Result<Option<Submission>> {
    let sql = format!(
        "UPDATE submissions SET status = 'in_progress', claimed_by = ?, claimed_at = ? \
         WHERE id = (SELECT id FROM submissions WHERE {}{} \
                     ORDER BY datetime(created_at) ASC, id ASC LIMIT 1) \
         RETURNING {}",
        ELIGIBLE,
        match selection {
            Selection::PriorityOnly => " AND priority = 1",
            Selection::Fifo => "",
        },
        SUBMISSION_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(worker_id)
        .bind(now)
        .bind(now)
        .bind(stale_cutoff(now, lease_secs))
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(submission_from_row).transpose()
}

/// Claim guard shared by every status transition: only the worker holding
/// the claim may record an outcome.
const HELD_CLAIM: &str = "id = ? AND status = 'in_progress' AND claimed_by = ?";

/// Terminal success. Returns false when `worker_id` no longer holds the
/// claim, so a submission is never marked succeeded twice.
#[instrument(skip_all, fields(id = id, worker_id = %worker_id))]
pub async fn mark_succeeded(
    pool: &Pool,
    id: i64,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(&format!(
        "UPDATE submissions SET status = 'succeeded', synced_at = ?, next_retry_at = NULL, \
         claimed_by = NULL, claimed_at = NULL WHERE {}",
        HELD_CLAIM
    ))
    .bind(now)
    .bind(id)
    .bind(worker_id)
    .execute(pool)
    .await
    .context("failed to mark submission succeeded")?;
    Ok(res.rows_affected() == 1)
}

/// Record that the answer mails of a claimed submission went out, so a
/// retry after a failed write does not send them again.
#[instrument(skip_all, fields(id = id, worker_id = %worker_id))]
pub async fn mark_mailed(
    pool: &Pool,
    id: i64,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(&format!(
        "UPDATE submissions SET mailed_at = ? WHERE {}",
        HELD_CLAIM
    ))
    .bind(now)
    .bind(id)
    .bind(worker_id)
    .execute(pool)
    .await
    .context("failed to record mail delivery")?;
    Ok(res.rows_affected() == 1)
}

/// Backoff delay after `attempt` previous failures: 5s * 2^attempt, capped.
pub fn backoff_delay(attempt: i32, max_cap_secs: i64) -> Duration {
    let secs = 5_i64 * (1_i64 << attempt.clamp(0, 10));
    let cap = if max_cap_secs <= 0 { secs } else { max_cap_secs };
    Duration::seconds(secs.min(cap))
}

/// Soft failure: bump the retry counter and push `next_retry_at` out.
/// Returns the next retry time, or None when the claim was lost.
#[instrument(skip_all, fields(id = id, worker_id = %worker_id))]
pub async fn mark_attempted(
    pool: &Pool,
    id: i64,
    worker_id: &str,
    attempt: i32,
    now: DateTime<Utc>,
    max_cap_secs: i64,
) -> Result<Option<DateTime<Utc>>> {
    let next_retry_at = now + backoff_delay(attempt, max_cap_secs);
    let res = sqlx::query(&format!(
        "UPDATE submissions SET status = 'attempted', attempt = ?, next_retry_at = ?, \
         claimed_by = NULL, claimed_at = NULL WHERE {}",
        HELD_CLAIM
    ))
    .bind(attempt + 1)
    .bind(next_retry_at)
    .bind(id)
    .bind(worker_id)
    .execute(pool)
    .await
    .context("failed to mark submission attempted")?;
    Ok((res.rows_affected() == 1).then_some(next_retry_at))
}

/// Terminal failure; the submission is never selected again. Returns false
/// when the claim was lost.
#[instrument(skip_all, fields(id = id, worker_id = %worker_id))]
pub async fn mark_failed(pool: &Pool, id: i64, worker_id: &str) -> Result<bool> {
    let res = sqlx::query(&format!(
        "UPDATE submissions SET status = 'failed', next_retry_at = NULL, \
         claimed_by = NULL, claimed_at = NULL WHERE {}",
        HELD_CLAIM
    ))
    .bind(id)
    .bind(worker_id)
    .execute(pool)
    .await
    .context("failed to mark submission failed")?;
    Ok(res.rows_affected() == 1)
}

pub async fn count_by_status(pool: &Pool, status: SubmissionStatus) -> Result<i64> {
    let cnt: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM submissions WHERE status = ?")
        .bind(status.as_str())
        .fetch_one(pool)
        .await?;
    Ok(cnt)
}

/// Number of submissions a FIFO pass could pick up right now.
pub async fn count_eligible(pool: &Pool, now: DateTime<Utc>, lease_secs: i64) -> Result<i64> {
    let cnt: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM submissions WHERE {}",
        ELIGIBLE
    ))
    .bind(now)
    .bind(stale_cutoff(now, lease_secs))
    .fetch_one(pool)
    .await?;
    Ok(cnt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SubmissionDataItem;
    use chrono::TimeZone;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, h, m, 0).unwrap()
    }

    async fn seed_form(pool: &Pool) -> i64 {
        insert_form(
            pool,
            &NewForm {
                name: "Attendance".into(),
                note: "Grade 5".into(),
                spreadsheet_url: "https://docs.google.com/spreadsheets/d/s1/edit".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    async fn submit(pool: &Pool, form_id: i64, created_at: DateTime<Utc>, priority: bool) -> i64 {
        insert_submission(
            pool,
            &NewSubmission {
                form_id,
                spreadsheet_id: "s1".into(),
                sheet_name: "Responses".into(),
                device: DeviceInfo {
                    name: "tablet-1".into(),
                    ..Default::default()
                },
                submission_type: SubmissionType::Values,
                opened_at: created_at,
                created_at,
                answers: vec![SubmissionDataItem {
                    question_id: "q1".into(),
                    answer: "yes".into(),
                    ..Default::default()
                }],
                priority,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn form_and_questions_round_trip() {
        let pool = setup_pool().await;
        let form_id = insert_form(
            &pool,
            &NewForm {
                name: "Sign up".into(),
                remember_recent: true,
                memory_target: Some(("mem".into(), "Recent".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        for (pos, (qid, label, uid)) in [("q2", "Age", Some("age_v2")), ("q1", "Name", None)]
            .into_iter()
            .enumerate()
        {
            let q = FormQuestionItem {
                question_id: qid.into(),
                label: label.into(),
                question_type: "text".into(),
                unique_id: uid.map(str::to_string),
            };
            insert_question(&pool, form_id, pos as i64, &q).await.unwrap();
        }

        let form = fetch_form(&pool, form_id).await.unwrap().unwrap();
        assert!(form.remember_recent);
        assert_eq!(form.memory_target, Some(SheetTarget::new("mem", "Recent")));
        assert_eq!(form.counting_target, None);

        let questions = fetch_questions(&pool, form_id).await.unwrap();
        let ids: Vec<_> = questions.iter().map(|q| q.question_id.as_str()).collect();
        assert_eq!(ids, vec!["q2", "q1"]);
        assert_eq!(questions[0].unique_id.as_deref(), Some("age_v2"));
        assert!(fetch_form(&pool, 999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_first_orders_by_creation_and_filters_priority() {
        let pool = setup_pool().await;
        let form_id = seed_form(&pool).await;
        let older = submit(&pool, form_id, at(1, 0), false).await;
        let newer_priority = submit(&pool, form_id, at(1, 10), true).await;

        let now = at(2, 0);
        let first = find_first_pending(&pool, now, 900).await.unwrap().unwrap();
        assert_eq!(first.id, older);
        assert_eq!(first.status, SubmissionStatus::Pending);
        assert_eq!(first.device.name, "tablet-1");
        assert_eq!(first.created_at, at(1, 0));

        let prio = find_first_pending_prioritized(&pool, now, 900)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(prio.id, newer_priority);
        assert!(prio.priority);
    }

    #[tokio::test]
    async fn claim_is_exclusive_until_lease_expires() {
        let pool = setup_pool().await;
        let form_id = seed_form(&pool).await;
        let id = submit(&pool, form_id, at(1, 0), false).await;

        let claimed = claim_next_pending(&pool, Selection::Fifo, "w1", at(2, 0), 900)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.status, SubmissionStatus::InProgress);

        let second = claim_next_pending(&pool, Selection::Fifo, "w2", at(2, 1), 900)
            .await
            .unwrap();
        assert!(second.is_none());

        // the first worker vanished; after the lease the row is claimable again
        let reclaimed = claim_next_pending(&pool, Selection::Fifo, "w2", at(2, 16), 900)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reclaimed.id, id);
    }

    #[tokio::test]
    async fn priority_claim_ignores_plain_submissions() {
        let pool = setup_pool().await;
        let form_id = seed_form(&pool).await;
        submit(&pool, form_id, at(1, 0), false).await;
        let claimed = claim_next_pending(&pool, Selection::PriorityOnly, "w1", at(2, 0), 900)
            .await
            .unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn attempted_waits_for_backoff() {
        let pool = setup_pool().await;
        let form_id = seed_form(&pool).await;
        let id = submit(&pool, form_id, at(1, 0), false).await;
        claim_next_pending(&pool, Selection::Fifo, "w1", at(2, 0), 900)
            .await
            .unwrap()
            .unwrap();

        let next = mark_attempted(&pool, id, "w1", 0, at(2, 0), 3600).await.unwrap();
        assert_eq!(next, Some(at(2, 0) + Duration::seconds(5)));
        let row = fetch_submission(&pool, id).await.unwrap().unwrap();
        assert_eq!(row.status, SubmissionStatus::Attempted);
        assert_eq!(row.attempt, 1);

        assert!(find_first_pending(&pool, at(2, 0), 900)
            .await
            .unwrap()
            .is_none());
        assert_eq!(count_eligible(&pool, at(2, 0), 900).await.unwrap(), 0);
        let retry = find_first_pending(&pool, at(2, 1), 900).await.unwrap().unwrap();
        assert_eq!(retry.id, id);
    }

    #[tokio::test]
    async fn succeeded_is_recorded_once_and_final() {
        let pool = setup_pool().await;
        let form_id = seed_form(&pool).await;
        let id = submit(&pool, form_id, at(1, 0), false).await;
        claim_next_pending(&pool, Selection::Fifo, "w1", at(2, 0), 900)
            .await
            .unwrap()
            .unwrap();

        assert!(!mark_succeeded(&pool, id, "w2", at(2, 0)).await.unwrap());
        assert!(mark_succeeded(&pool, id, "w1", at(2, 0)).await.unwrap());
        assert!(!mark_succeeded(&pool, id, "w1", at(2, 1)).await.unwrap());
        assert_eq!(
            count_by_status(&pool, SubmissionStatus::Succeeded).await.unwrap(),
            1
        );
        assert!(find_first_pending(&pool, at(9, 0), 900)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn failed_is_never_selected() {
        let pool = setup_pool().await;
        let form_id = seed_form(&pool).await;
        let id = submit(&pool, form_id, at(1, 0), true).await;
        // unclaimed rows cannot be failed
        assert!(!mark_failed(&pool, id, "w1").await.unwrap());
        claim_next_pending(&pool, Selection::Fifo, "w1", at(2, 0), 900)
            .await
            .unwrap()
            .unwrap();
        assert!(mark_failed(&pool, id, "w1").await.unwrap());
        assert!(find_first_pending(&pool, at(9, 0), 900)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            count_by_status(&pool, SubmissionStatus::Failed).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn stale_worker_cannot_overwrite_a_reclaimed_result() {
        let pool = setup_pool().await;
        let form_id = seed_form(&pool).await;
        let id = submit(&pool, form_id, at(1, 0), false).await;
        claim_next_pending(&pool, Selection::Fifo, "w1", at(2, 0), 900)
            .await
            .unwrap()
            .unwrap();

        // w1 stalls past the lease; w2 takes over and finishes
        let reclaimed = claim_next_pending(&pool, Selection::Fifo, "w2", at(2, 16), 900)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reclaimed.id, id);
        assert!(mark_succeeded(&pool, id, "w2", at(2, 17)).await.unwrap());

        assert_eq!(
            mark_attempted(&pool, id, "w1", 0, at(2, 18), 3600).await.unwrap(),
            None
        );
        assert!(!mark_failed(&pool, id, "w1").await.unwrap());
        assert!(!mark_succeeded(&pool, id, "w1", at(2, 18)).await.unwrap());

        let row = fetch_submission(&pool, id).await.unwrap().unwrap();
        assert_eq!(row.status, SubmissionStatus::Succeeded);
        assert_eq!(row.attempt, 0);
        assert!(claim_next_pending(&pool, Selection::Fifo, "w3", at(9, 0), 900)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn stale_worker_failure_leaves_the_new_claim_alone() {
        let pool = setup_pool().await;
        let form_id = seed_form(&pool).await;
        let id = submit(&pool, form_id, at(1, 0), false).await;
        claim_next_pending(&pool, Selection::Fifo, "w1", at(2, 0), 900)
            .await
            .unwrap()
            .unwrap();
        claim_next_pending(&pool, Selection::Fifo, "w2", at(2, 16), 900)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            mark_attempted(&pool, id, "w1", 0, at(2, 17), 3600).await.unwrap(),
            None
        );
        let row = fetch_submission(&pool, id).await.unwrap().unwrap();
        assert_eq!(row.status, SubmissionStatus::InProgress);
        assert!(mark_succeeded(&pool, id, "w2", at(2, 18)).await.unwrap());
    }

    #[tokio::test]
    async fn mail_delivery_survives_a_retry() {
        let pool = setup_pool().await;
        let form_id = seed_form(&pool).await;
        let id = submit(&pool, form_id, at(1, 0), false).await;
        let claimed = claim_next_pending(&pool, Selection::Fifo, "w1", at(2, 0), 900)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.mailed_at, None);

        assert!(!mark_mailed(&pool, id, "w2", at(2, 0)).await.unwrap());
        assert!(mark_mailed(&pool, id, "w1", at(2, 0)).await.unwrap());
        mark_attempted(&pool, id, "w1", 0, at(2, 0), 3600).await.unwrap();

        let retry = claim_next_pending(&pool, Selection::Fifo, "w1", at(2, 1), 900)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retry.mailed_at, Some(at(2, 0)));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(0, 3600), Duration::seconds(5));
        assert_eq!(backoff_delay(3, 3600), Duration::seconds(40));
        assert_eq!(backoff_delay(20, 3600), Duration::seconds(3600));
        assert_eq!(backoff_delay(2, 0), Duration::seconds(20));
    }

    #[test]
    fn prepare_sqlite_url_keeps_memory_urls() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("postgres://localhost/db"),
            "postgres://localhost/db"
        );
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/nested/app.db", dir.path().display());
        let prepared = prepare_sqlite_url(&url);
        assert!(prepared.ends_with("/nested/app.db?mode=rwc"));
        assert!(dir.path().join("nested").exists());
    }
}
