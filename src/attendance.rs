use chrono::NaiveDate;
use log::info;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::{Build, Rocket, State};
use serde::{Deserialize, Serialize};
use sqlx::{query_as, FromRow, SqliteConnection, SqlitePool};
use crate::auth::StudioApiToken;
use crate::changes::StudioChange;
use crate::db::DbPool;
use crate::ledger::{cancel_occurrence, commit, record_attendance};
use crate::people::PersonIds;
use crate::sessions::{RecurringSession, SessionId};
use crate::store::StudioStore;
use crate::studiotime::parse_date;
use crate::util::{anyhow_to_custom_error, bad_request, sqlx_to_anyhow};
use crate::StudioState;

/// `(session, calendar date)` identifying one occurrence.
pub type OccurrenceKey = (SessionId, NaiveDate);

#[derive(Serialize, Deserialize, FromRow, PartialEq, Clone, Debug)]
pub struct AttendanceRecord {
    pub session_id: SessionId,
    pub date: NaiveDate,
    pub present_ids: PersonIds,
    pub absent_ids: PersonIds,
    pub justified_absence_ids: PersonIds,
    pub cancelled: bool,
    /// People granted the recovery credit of this occurrence, kept after redemption.
    #[serde(default)]
    pub credited_ids: PersonIds,
}

impl AttendanceRecord {
    pub fn new(session_id: SessionId, date: NaiveDate) -> Self {
        Self {
            session_id,
            date,
            present_ids: Default::default(),
            absent_ids: Default::default(),
            justified_absence_ids: Default::default(),
            cancelled: false,
            credited_ids: Default::default(),
        }
    }
    pub fn key(&self) -> OccurrenceKey {
        (self.session_id, self.date)
    }
}

/// Attendance as submitted for one occurrence.
#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct AttendanceSheet {
    #[serde(default)]
    pub present_ids: PersonIds,
    #[serde(default)]
    pub absent_ids: PersonIds,
    #[serde(default)]
    pub justified_absence_ids: PersonIds,
}

pub async fn load_attendance(pool: &SqlitePool) -> anyhow::Result<Vec<AttendanceRecord>> {
    let records = query_as::<_, AttendanceRecord>("SELECT session_id, date, present_ids, absent_ids, justified_absence_ids, cancelled, credited_ids
                FROM attendance ORDER BY date, session_id")
        .fetch_all(pool).await.map_err(sqlx_to_anyhow)?;
    Ok(records)
}

/// Inserts or overwrites the single record of the occurrence.
pub async fn upsert_attendance(conn: &mut SqliteConnection, record: &AttendanceRecord) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO attendance (session_id, date, present_ids, absent_ids, justified_absence_ids, cancelled, credited_ids)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (session_id, date) DO UPDATE SET
                    present_ids=excluded.present_ids,
                    absent_ids=excluded.absent_ids,
                    justified_absence_ids=excluded.justified_absence_ids,
                    cancelled=excluded.cancelled,
                    credited_ids=excluded.credited_ids")
        .bind(record.session_id)
        .bind(record.date)
        .bind(&record.present_ids)
        .bind(&record.absent_ids)
        .bind(&record.justified_absence_ids)
        .bind(record.cancelled)
        .bind(&record.credited_ids)
        .execute(conn).await?;
    Ok(())
}

fn occurrence_session<'a>(session: Option<&'a RecurringSession>, session_id: SessionId, date: NaiveDate) -> Result<&'a RecurringSession, Custom<String>> {
    let Some(session) = session else {
        return Err(Custom(Status::NotFound, format!("Session id={session_id} not found")));
    };
    if !session.day_of_week.matches(date) {
        return Err(bad_request(format!("Session id={session_id} runs on {}, {date} is not an occurrence", session.day_of_week)));
    }
    Ok(session)
}

#[get("/api/sessions/<session_id>/attendance/<date>")]
async fn get_attendance(session_id: SessionId, date: &str, db: &State<DbPool>) -> Result<Json<AttendanceRecord>, Custom<String>> {
    let date = parse_date(date).map_err(bad_request)?;
    let studio = db.0.load_snapshot().await.map_err(anyhow_to_custom_error)?;
    studio.attendance_record(session_id, date)
        .cloned()
        .map(Json)
        .ok_or_else(|| Custom(Status::NotFound, format!("No attendance recorded for session id={session_id} on {date}")))
}

#[post("/api/sessions/<session_id>/attendance/<date>", data = "<sheet>")]
async fn post_attendance(_api_token: StudioApiToken, session_id: SessionId, date: &str, sheet: Json<AttendanceSheet>, state: &State<StudioState>, db: &State<DbPool>) -> Result<Json<AttendanceRecord>, Custom<String>> {
    let date = parse_date(date).map_err(bad_request)?;
    let mut studio = db.0.load_snapshot().await.map_err(anyhow_to_custom_error)?;
    let session = occurrence_session(studio.session(session_id), session_id, date)?;
    let update = record_attendance(&studio, session, date, &sheet).map_err(|e| anyhow_to_custom_error(e.into()))?;
    commit(&db.0, &mut studio, update).await.map_err(anyhow_to_custom_error)?;
    info!("Attendance recorded, session id: {session_id}, date: {date}");
    state.broadcast_change(StudioChange::AttendanceRecorded { session_id, date });
    studio.attendance_record(session_id, date)
        .cloned()
        .map(Json)
        .ok_or_else(|| Custom(Status::InternalServerError, String::from("Attendance record lost after commit")))
}

#[post("/api/sessions/<session_id>/cancel/<date>?<grant_credits>")]
async fn post_cancel_occurrence(_api_token: StudioApiToken, session_id: SessionId, date: &str, grant_credits: Option<bool>, state: &State<StudioState>, db: &State<DbPool>) -> Result<Json<AttendanceRecord>, Custom<String>> {
    let date = parse_date(date).map_err(bad_request)?;
    let grant_credits = grant_credits.unwrap_or(false);
    let mut studio = db.0.load_snapshot().await.map_err(anyhow_to_custom_error)?;
    let session = occurrence_session(studio.session(session_id), session_id, date)?;
    let update = cancel_occurrence(&studio, session, date, grant_credits);
    let credited = update.credited_people();
    commit(&db.0, &mut studio, update).await.map_err(anyhow_to_custom_error)?;
    info!("Occurrence cancelled, session id: {session_id}, date: {date}, credits granted: {}", credited.len());
    state.broadcast_change(StudioChange::OccurrenceCancelled { session_id, date, credited });
    studio.attendance_record(session_id, date)
        .cloned()
        .map(Json)
        .ok_or_else(|| Custom(Status::InternalServerError, String::from("Attendance record lost after commit")))
}

pub fn extend(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/", routes![
        get_attendance,
        post_attendance,
        post_cancel_occurrence,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::studiotime::parse_date;

    #[rocket::async_test]
    async fn test_upsert_keeps_one_record_per_occurrence() {
        let pool = test_pool().await;
        let date = parse_date("2025-03-03").unwrap();
        let mut record = AttendanceRecord::new(7, date);
        record.present_ids.insert(1);
        {
            let mut conn = pool.acquire().await.unwrap();
            upsert_attendance(&mut conn, &record).await.unwrap();
            record.present_ids.remove(1);
            record.absent_ids.insert(1);
            upsert_attendance(&mut conn, &record).await.unwrap();
        }
        let records = load_attendance(&pool).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0], record);
    }
}
