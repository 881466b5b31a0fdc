use anyhow::anyhow;
use itertools::Itertools;
use log::info;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::{Build, Rocket, State};
use serde::{Deserialize, Serialize};
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{query_as, FromRow, Sqlite, SqlitePool};
use studiod_proc_macros::ChangedFields;
use crate::auth::StudioApiToken;
use crate::catalog::{ActivityId, InstructorId, SpaceId};
use crate::db::DbPool;
use crate::ledger::{occurrences, Occurrence};
use crate::people::{load_person, PersonId, PersonIds};
use crate::store::StudioStore;
use crate::studiotime::{parse_date, DayOfWeek, SessionTime};
use crate::util::{anyhow_to_custom_error, bad_request, sqlx_to_anyhow, sqlx_to_custom_error, sqlx_to_not_found};

pub type SessionId = i64;

/// Weekly time slot with its enrolled roster.
#[derive(Serialize, Deserialize, FromRow, PartialEq, Clone, Debug)]
pub struct RecurringSession {
    pub id: SessionId,
    pub activity_id: ActivityId,
    pub instructor_id: InstructorId,
    pub space_id: SpaceId,
    pub day_of_week: DayOfWeek,
    pub time: SessionTime,
    pub person_ids: PersonIds,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NewSession {
    pub activity_id: ActivityId,
    pub instructor_id: InstructorId,
    pub space_id: SpaceId,
    pub day_of_week: DayOfWeek,
    pub time: SessionTime,
    #[serde(default)]
    pub person_ids: PersonIds,
}

#[derive(Serialize, Deserialize, ChangedFields, Default, Clone, Debug)]
pub struct SessionUpdate {
    #[serde(default)]
    pub activity_id: Option<ActivityId>,
    #[serde(default)]
    pub instructor_id: Option<InstructorId>,
    #[serde(default)]
    pub space_id: Option<SpaceId>,
    #[serde(default)]
    pub day_of_week: Option<DayOfWeek>,
    #[serde(default)]
    pub time: Option<SessionTime>,
}

pub async fn load_sessions(pool: &SqlitePool) -> anyhow::Result<Vec<RecurringSession>> {
    let sessions = query_as::<_, RecurringSession>("SELECT * FROM sessions ORDER BY id")
        .fetch_all(pool).await.map_err(sqlx_to_anyhow)?;
    Ok(sessions)
}

pub async fn load_session(pool: &SqlitePool, session_id: SessionId) -> Result<RecurringSession, sqlx::Error> {
    query_as::<_, RecurringSession>("SELECT * FROM sessions WHERE id=?")
        .bind(session_id)
        .fetch_one(pool).await
}

pub async fn insert_session(pool: &SqlitePool, session: &NewSession) -> anyhow::Result<SessionId> {
    let id: (i64, ) = query_as("INSERT INTO sessions (activity_id, instructor_id, space_id, day_of_week, time, person_ids)
                VALUES (?, ?, ?, ?, ?, ?) RETURNING id")
        .bind(session.activity_id)
        .bind(session.instructor_id)
        .bind(session.space_id)
        .bind(session.day_of_week)
        .bind(session.time)
        .bind(&session.person_ids)
        .fetch_one(pool)
        .await.map_err(sqlx_to_anyhow)?;
    info!("Session created, id: {}, {} {}", id.0, session.day_of_week, session.time);
    Ok(id.0)
}

pub async fn update_session(pool: &SqlitePool, session_id: SessionId, update: &SessionUpdate) -> anyhow::Result<()> {
    if update.is_noop() {
        return Ok(())
    }
    let changed_fields = update.changed_fields();
    let placeholders = changed_fields.iter().map(|&fld_name| format!("{fld_name}=?")).join(",");
    let qs = format!("UPDATE sessions SET {placeholders} WHERE id=?");
    let mut q = sqlx::query(&qs);
    fn bind_field<'a>(q: Query<'a, Sqlite, SqliteArguments<'a>>, field_name: &str, update: &'a SessionUpdate) -> anyhow::Result<Query<'a, Sqlite, SqliteArguments<'a>>> {
        let q = match field_name {
            "activity_id" => q.bind(update.activity_id),
            "instructor_id" => q.bind(update.instructor_id),
            "space_id" => q.bind(update.space_id),
            "day_of_week" => q.bind(update.day_of_week),
            "time" => q.bind(update.time),
            _ => return Err(anyhow!("Dont know how to bind field {field_name}")),
        };
        Ok(q)
    }
    for field_name in &changed_fields {
        q = bind_field(q, field_name, update)?;
    }
    let res = q.bind(session_id).execute(pool).await?;
    if res.rows_affected() == 0 {
        return Err(sqlx::Error::RowNotFound.into())
    }
    info!("Session id: {session_id} updated, fields: {}", changed_fields.join(", "));
    Ok(())
}

pub async fn save_roster(pool: &SqlitePool, session_id: SessionId, person_ids: &PersonIds) -> anyhow::Result<()> {
    sqlx::query("UPDATE sessions SET person_ids=? WHERE id=?")
        .bind(person_ids)
        .bind(session_id)
        .execute(pool).await.map_err(sqlx_to_anyhow)?;
    Ok(())
}

/// Deletes the slot and its attendance history.
pub async fn delete_session(pool: &SqlitePool, session_id: SessionId) -> anyhow::Result<()> {
    let mut txn = pool.begin().await?;
    let res = sqlx::query("DELETE FROM sessions WHERE id=?")
        .bind(session_id)
        .execute(&mut *txn).await?;
    if res.rows_affected() == 0 {
        return Err(sqlx::Error::RowNotFound.into())
    }
    sqlx::query("DELETE FROM attendance WHERE session_id=?")
        .bind(session_id)
        .execute(&mut *txn).await?;
    txn.commit().await?;
    info!("Session id: {session_id} deleted");
    Ok(())
}

#[get("/api/sessions")]
async fn get_sessions(db: &State<DbPool>) -> Result<Json<Vec<RecurringSession>>, Custom<String>> {
    let sessions = load_sessions(&db.0).await.map_err(anyhow_to_custom_error)?;
    Ok(Json(sessions))
}

#[get("/api/sessions/<session_id>")]
async fn get_session(session_id: SessionId, db: &State<DbPool>) -> Result<Json<RecurringSession>, Custom<String>> {
    let session = load_session(&db.0, session_id).await.map_err(sqlx_to_custom_error)?;
    Ok(Json(session))
}

#[post("/api/sessions", data = "<session>")]
async fn post_session(_api_token: StudioApiToken, session: Json<NewSession>, db: &State<DbPool>) -> Result<Json<RecurringSession>, Custom<String>> {
    let session_id = insert_session(&db.0, &session).await.map_err(anyhow_to_custom_error)?;
    let session = load_session(&db.0, session_id).await.map_err(sqlx_to_custom_error)?;
    Ok(Json(session))
}

#[patch("/api/sessions/<session_id>", data = "<update>")]
async fn patch_session(_api_token: StudioApiToken, session_id: SessionId, update: Json<SessionUpdate>, db: &State<DbPool>) -> Result<Json<RecurringSession>, Custom<String>> {
    update_session(&db.0, session_id, &update).await.map_err(anyhow_to_custom_error)?;
    let session = load_session(&db.0, session_id).await.map_err(sqlx_to_custom_error)?;
    Ok(Json(session))
}

#[delete("/api/sessions/<session_id>")]
async fn delete_session_route(_api_token: StudioApiToken, session_id: SessionId, db: &State<DbPool>) -> Result<(), Custom<String>> {
    delete_session(&db.0, session_id).await.map_err(anyhow_to_custom_error)
}

#[post("/api/sessions/<session_id>/people/<person_id>")]
async fn post_enrol(_api_token: StudioApiToken, session_id: SessionId, person_id: PersonId, db: &State<DbPool>) -> Result<Json<RecurringSession>, Custom<String>> {
    let mut session = load_session(&db.0, session_id).await.map_err(sqlx_to_custom_error)?;
    load_person(&db.0, person_id).await
        .map_err(|err| sqlx_to_not_found(err, format_args!("Person id={person_id}")))?;
    if session.person_ids.insert(person_id) {
        save_roster(&db.0, session_id, &session.person_ids).await.map_err(anyhow_to_custom_error)?;
        info!("Person id: {person_id} enrolled in session id: {session_id}");
    }
    Ok(Json(session))
}

#[delete("/api/sessions/<session_id>/people/<person_id>")]
async fn delete_enrol(_api_token: StudioApiToken, session_id: SessionId, person_id: PersonId, db: &State<DbPool>) -> Result<Json<RecurringSession>, Custom<String>> {
    let mut session = load_session(&db.0, session_id).await.map_err(sqlx_to_custom_error)?;
    if session.person_ids.remove(person_id) {
        save_roster(&db.0, session_id, &session.person_ids).await.map_err(anyhow_to_custom_error)?;
        info!("Person id: {person_id} left session id: {session_id}");
    }
    Ok(Json(session))
}

#[get("/api/schedule?<from>&<to>")]
async fn get_schedule(from: &str, to: &str, db: &State<DbPool>) -> Result<Json<Vec<Occurrence>>, Custom<String>> {
    let from = parse_date(from).map_err(bad_request)?;
    let to = parse_date(to).map_err(bad_request)?;
    if to < from {
        return Err(bad_request(format!("Empty date range {from} - {to}")));
    }
    let studio = db.0.load_snapshot().await.map_err(anyhow_to_custom_error)?;
    Ok(Json(occurrences(&studio, from, to)))
}

pub fn extend(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/", routes![
        get_sessions,
        get_session,
        post_session,
        patch_session,
        delete_session_route,
        post_enrol,
        delete_enrol,
        get_schedule,
    ])
}
