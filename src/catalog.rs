use log::info;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::{Build, Rocket, State};
use serde::{Deserialize, Serialize};
use sqlx::{query_as, FromRow, SqlitePool};
use crate::auth::StudioApiToken;
use crate::db::DbPool;
use crate::util::{anyhow_to_custom_error, sqlx_to_anyhow};

pub type ActivityId = i64;
pub type InstructorId = i64;
pub type SpaceId = i64;

#[derive(Serialize, Deserialize, FromRow, PartialEq, Clone, Debug)]
pub struct Activity {
    pub id: ActivityId,
    pub name: String,
}

/// Specialist leading sessions.
#[derive(Serialize, Deserialize, FromRow, PartialEq, Clone, Debug)]
pub struct Instructor {
    pub id: InstructorId,
    pub name: String,
    pub specialty: String,
}

#[derive(Serialize, Deserialize, FromRow, PartialEq, Clone, Debug)]
pub struct Space {
    pub id: SpaceId,
    pub name: String,
    pub capacity: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NewActivity {
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NewInstructor {
    pub name: String,
    #[serde(default)]
    pub specialty: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NewSpace {
    pub name: String,
    #[serde(default)]
    pub capacity: i64,
}

pub async fn load_activities(pool: &SqlitePool) -> anyhow::Result<Vec<Activity>> {
    query_as::<_, Activity>("SELECT * FROM activities ORDER BY name")
        .fetch_all(pool).await.map_err(sqlx_to_anyhow)
}
pub async fn load_instructors(pool: &SqlitePool) -> anyhow::Result<Vec<Instructor>> {
    query_as::<_, Instructor>("SELECT * FROM instructors ORDER BY name")
        .fetch_all(pool).await.map_err(sqlx_to_anyhow)
}
pub async fn load_spaces(pool: &SqlitePool) -> anyhow::Result<Vec<Space>> {
    query_as::<_, Space>("SELECT * FROM spaces ORDER BY name")
        .fetch_all(pool).await.map_err(sqlx_to_anyhow)
}

pub async fn insert_activity(pool: &SqlitePool, activity: &NewActivity) -> anyhow::Result<Activity> {
    let rec = query_as::<_, Activity>("INSERT INTO activities (name) VALUES (?) RETURNING *")
        .bind(&activity.name)
        .fetch_one(pool).await.map_err(sqlx_to_anyhow)?;
    info!("Activity created, id: {}, name: {}", rec.id, rec.name);
    Ok(rec)
}
pub async fn insert_instructor(pool: &SqlitePool, instructor: &NewInstructor) -> anyhow::Result<Instructor> {
    let rec = query_as::<_, Instructor>("INSERT INTO instructors (name, specialty) VALUES (?, ?) RETURNING *")
        .bind(&instructor.name)
        .bind(&instructor.specialty)
        .fetch_one(pool).await.map_err(sqlx_to_anyhow)?;
    info!("Instructor created, id: {}, name: {}", rec.id, rec.name);
    Ok(rec)
}
pub async fn insert_space(pool: &SqlitePool, space: &NewSpace) -> anyhow::Result<Space> {
    let rec = query_as::<_, Space>("INSERT INTO spaces (name, capacity) VALUES (?, ?) RETURNING *")
        .bind(&space.name)
        .bind(space.capacity)
        .fetch_one(pool).await.map_err(sqlx_to_anyhow)?;
    info!("Space created, id: {}, name: {}", rec.id, rec.name);
    Ok(rec)
}

#[get("/api/activities")]
async fn get_activities(db: &State<DbPool>) -> Result<Json<Vec<Activity>>, Custom<String>> {
    load_activities(&db.0).await.map(Json).map_err(anyhow_to_custom_error)
}
#[post("/api/activities", data = "<activity>")]
async fn post_activity(_api_token: StudioApiToken, activity: Json<NewActivity>, db: &State<DbPool>) -> Result<Json<Activity>, Custom<String>> {
    insert_activity(&db.0, &activity).await.map(Json).map_err(anyhow_to_custom_error)
}
#[get("/api/instructors")]
async fn get_instructors(db: &State<DbPool>) -> Result<Json<Vec<Instructor>>, Custom<String>> {
    load_instructors(&db.0).await.map(Json).map_err(anyhow_to_custom_error)
}
#[post("/api/instructors", data = "<instructor>")]
async fn post_instructor(_api_token: StudioApiToken, instructor: Json<NewInstructor>, db: &State<DbPool>) -> Result<Json<Instructor>, Custom<String>> {
    insert_instructor(&db.0, &instructor).await.map(Json).map_err(anyhow_to_custom_error)
}
#[get("/api/spaces")]
async fn get_spaces(db: &State<DbPool>) -> Result<Json<Vec<Space>>, Custom<String>> {
    load_spaces(&db.0).await.map(Json).map_err(anyhow_to_custom_error)
}
#[post("/api/spaces", data = "<space>")]
async fn post_space(_api_token: StudioApiToken, space: Json<NewSpace>, db: &State<DbPool>) -> Result<Json<Space>, Custom<String>> {
    insert_space(&db.0, &space).await.map(Json).map_err(anyhow_to_custom_error)
}

pub fn extend(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/", routes![
        get_activities,
        post_activity,
        get_instructors,
        post_instructor,
        get_spaces,
        post_space,
    ])
}
