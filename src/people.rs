use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use anyhow::anyhow;
use chrono::NaiveDate;
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
use crate::changes::StudioChange;
use crate::churn::detect_churn_risk;
use crate::db::DbPool;
use crate::ledger::{commit, redeem_credit};
use crate::sessions::{RecurringSession, SessionId};
use crate::store::StudioStore;
use crate::util::{anyhow_to_custom_error, sqlx_to_anyhow, sqlx_to_custom_error};
use crate::{impl_sqlx_json_text_type_encode_decode, impl_sqlx_text_type_encode_decode, AppConfig, StudioState};

pub type PersonId = i64;

/// Set of person ids, stored as a JSON array.
#[derive(Serialize, Deserialize, PartialEq, Eq, Default, Clone, Debug)]
#[serde(transparent)]
pub struct PersonIds(pub BTreeSet<PersonId>);
impl_sqlx_json_text_type_encode_decode!(PersonIds);

impl PersonIds {
    pub fn contains(&self, person_id: PersonId) -> bool {
        self.0.contains(&person_id)
    }
    pub fn insert(&mut self, person_id: PersonId) -> bool {
        self.0.insert(person_id)
    }
    pub fn remove(&mut self, person_id: PersonId) -> bool {
        self.0.remove(&person_id)
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn iter(&self) -> impl Iterator<Item = PersonId> + '_ {
        self.0.iter().copied()
    }
}
impl FromIterator<PersonId> for PersonIds {
    fn from_iter<T: IntoIterator<Item = PersonId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Make-up class owed for one cancelled occurrence.
#[derive(Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Debug)]
pub struct RecoveryCredit {
    pub session_id: SessionId,
    pub date: NaiveDate,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Default, Clone, Debug)]
#[serde(transparent)]
pub struct RecoveryCredits(pub BTreeSet<RecoveryCredit>);
impl_sqlx_json_text_type_encode_decode!(RecoveryCredits);

impl RecoveryCredits {
    pub fn contains(&self, credit: &RecoveryCredit) -> bool {
        self.0.contains(credit)
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Default, Clone, Copy, Debug)]
#[serde(rename_all = "lowercase")]
pub enum MembershipType {
    #[default]
    Monthly,
    Daily,
}
impl_sqlx_text_type_encode_decode!(MembershipType);

impl Display for MembershipType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MembershipType::Monthly => f.write_str("monthly"),
            MembershipType::Daily => f.write_str("daily"),
        }
    }
}
impl FromStr for MembershipType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(Self::Monthly),
            "daily" => Ok(Self::Daily),
            _ => Err(anyhow!("Unknown membership type: {s}")),
        }
    }
}

#[derive(Serialize, Deserialize, FromRow, PartialEq, Clone, Debug)]
pub struct Person {
    pub id: PersonId,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub membership_type: MembershipType,
    pub last_payment_date: Option<NaiveDate>,
    pub recovery_credits: RecoveryCredits,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NewPerson {
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub membership_type: MembershipType,
    #[serde(default)]
    pub last_payment_date: Option<NaiveDate>,
}

#[derive(Serialize, Deserialize, ChangedFields, Default, Clone, Debug)]
pub struct PersonUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub membership_type: Option<MembershipType>,
    #[serde(default)]
    pub last_payment_date: Option<NaiveDate>,
}

pub async fn load_people(pool: &SqlitePool) -> anyhow::Result<Vec<Person>> {
    let people = query_as::<_, Person>("SELECT * FROM people ORDER BY name, id")
        .fetch_all(pool).await.map_err(sqlx_to_anyhow)?;
    Ok(people)
}

pub async fn load_person(pool: &SqlitePool, person_id: PersonId) -> Result<Person, sqlx::Error> {
    query_as::<_, Person>("SELECT * FROM people WHERE id=?")
        .bind(person_id)
        .fetch_one(pool).await
}

pub async fn insert_person(pool: &SqlitePool, person: &NewPerson) -> anyhow::Result<PersonId> {
    let id: (i64, ) = query_as("INSERT INTO people (name, phone, email, membership_type, last_payment_date, recovery_credits)
                VALUES (?, ?, ?, ?, ?, ?) RETURNING id")
        .bind(&person.name)
        .bind(&person.phone)
        .bind(&person.email)
        .bind(person.membership_type)
        .bind(person.last_payment_date)
        .bind(RecoveryCredits::default())
        .fetch_one(pool)
        .await.map_err(sqlx_to_anyhow)?;
    info!("Person created, id: {}, name: {}", id.0, person.name);
    Ok(id.0)
}

pub async fn update_person(pool: &SqlitePool, person_id: PersonId, update: &PersonUpdate) -> anyhow::Result<()> {
    if update.is_noop() {
        return Ok(())
    }
    let changed_fields = update.changed_fields();
    let placeholders = changed_fields.iter().map(|&fld_name| format!("{fld_name}=?")).join(",");
    let qs = format!("UPDATE people SET {placeholders} WHERE id=?");
    let mut q = sqlx::query(&qs);
    fn bind_field<'a>(q: Query<'a, Sqlite, SqliteArguments<'a>>, field_name: &str, update: &'a PersonUpdate) -> anyhow::Result<Query<'a, Sqlite, SqliteArguments<'a>>> {
        let q = match field_name {
            "name" => q.bind(update.name.as_ref()),
            "phone" => q.bind(update.phone.as_ref()),
            "email" => q.bind(update.email.as_ref()),
            "membership_type" => q.bind(update.membership_type),
            "last_payment_date" => q.bind(update.last_payment_date),
            _ => return Err(anyhow!("Dont know how to bind field {field_name}")),
        };
        Ok(q)
    }
    for field_name in &changed_fields {
        q = bind_field(q, field_name, update)?;
    }
    let res = q.bind(person_id).execute(pool).await?;
    if res.rows_affected() == 0 {
        return Err(sqlx::Error::RowNotFound.into())
    }
    info!("Person id: {person_id} updated, fields: {}", changed_fields.join(", "));
    Ok(())
}

/// Removes the person together with every roster reference to them.
pub async fn delete_person(pool: &SqlitePool, person_id: PersonId) -> anyhow::Result<()> {
    let mut txn = pool.begin().await?;
    let res = sqlx::query("DELETE FROM people WHERE id=?")
        .bind(person_id)
        .execute(&mut *txn).await?;
    if res.rows_affected() == 0 {
        return Err(sqlx::Error::RowNotFound.into())
    }
    let sessions = query_as::<_, RecurringSession>("SELECT * FROM sessions")
        .fetch_all(&mut *txn).await?;
    for mut session in sessions {
        if session.person_ids.remove(person_id) {
            sqlx::query("UPDATE sessions SET person_ids=? WHERE id=?")
                .bind(&session.person_ids)
                .bind(session.id)
                .execute(&mut *txn).await?;
        }
    }
    txn.commit().await?;
    info!("Person id: {person_id} deleted");
    Ok(())
}

#[get("/api/people")]
async fn get_people(db: &State<DbPool>) -> Result<Json<Vec<Person>>, Custom<String>> {
    let people = load_people(&db.0).await.map_err(anyhow_to_custom_error)?;
    Ok(Json(people))
}

#[get("/api/people/<person_id>", rank = 2)]
async fn get_person(person_id: PersonId, db: &State<DbPool>) -> Result<Json<Person>, Custom<String>> {
    let person = load_person(&db.0, person_id).await.map_err(sqlx_to_custom_error)?;
    Ok(Json(person))
}

#[post("/api/people", data = "<person>")]
async fn post_person(_api_token: StudioApiToken, person: Json<NewPerson>, db: &State<DbPool>) -> Result<Json<Person>, Custom<String>> {
    let person_id = insert_person(&db.0, &person).await.map_err(anyhow_to_custom_error)?;
    let person = load_person(&db.0, person_id).await.map_err(sqlx_to_custom_error)?;
    Ok(Json(person))
}

#[patch("/api/people/<person_id>", data = "<update>")]
async fn patch_person(_api_token: StudioApiToken, person_id: PersonId, update: Json<PersonUpdate>, db: &State<DbPool>) -> Result<Json<Person>, Custom<String>> {
    update_person(&db.0, person_id, &update).await.map_err(anyhow_to_custom_error)?;
    let person = load_person(&db.0, person_id).await.map_err(sqlx_to_custom_error)?;
    Ok(Json(person))
}

#[delete("/api/people/<person_id>")]
async fn delete_person_route(_api_token: StudioApiToken, person_id: PersonId, db: &State<DbPool>) -> Result<(), Custom<String>> {
    delete_person(&db.0, person_id).await.map_err(anyhow_to_custom_error)
}

#[get("/api/people/churn-risk")]
async fn get_churn_risk(cfg: &State<AppConfig>, db: &State<DbPool>) -> Result<Json<Vec<Person>>, Custom<String>> {
    let studio = db.0.load_snapshot().await.map_err(anyhow_to_custom_error)?;
    let at_risk = detect_churn_risk(&studio.people, studio.attendance.values(), &studio.sessions, &cfg.churn);
    Ok(Json(at_risk))
}

#[post("/api/people/<person_id>/credits/redeem", data = "<credit>")]
async fn post_redeem_credit(_api_token: StudioApiToken, person_id: PersonId, credit: Json<RecoveryCredit>, state: &State<StudioState>, db: &State<DbPool>) -> Result<Json<Person>, Custom<String>> {
    let credit = credit.into_inner();
    let mut studio = db.0.load_snapshot().await.map_err(anyhow_to_custom_error)?;
    let update = redeem_credit(&studio, person_id, &credit).map_err(|e| anyhow_to_custom_error(e.into()))?;
    commit(&db.0, &mut studio, update).await.map_err(anyhow_to_custom_error)?;
    state.broadcast_change(StudioChange::CreditRedeemed {
        person_id,
        session_id: credit.session_id,
        date: credit.date,
    });
    let person = studio.person(person_id).cloned()
        .ok_or_else(|| sqlx_to_custom_error(sqlx::Error::RowNotFound))?;
    Ok(Json(person))
}

pub fn extend(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/", routes![
        get_people,
        get_person,
        post_person,
        patch_person,
        delete_person_route,
        get_churn_risk,
        post_redeem_credit,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::sessions::{insert_session, load_sessions, NewSession};
    use crate::studiotime::{DayOfWeek, SessionTime};

    fn new_person(name: &str) -> NewPerson {
        NewPerson {
            name: name.to_string(),
            phone: "600 000 000".to_string(),
            email: String::new(),
            membership_type: MembershipType::Monthly,
            last_payment_date: None,
        }
    }

    #[test]
    fn test_person_update_changed_fields() {
        let update = PersonUpdate {
            phone: Some("777".to_string()),
            membership_type: Some(MembershipType::Daily),
            ..Default::default()
        };
        assert_eq!(update.changed_fields(), vec!["phone", "membership_type"]);
        assert!(!update.is_noop());
        assert!(PersonUpdate::default().is_noop());
    }

    #[rocket::async_test]
    async fn test_update_person() {
        let pool = test_pool().await;
        let id = insert_person(&pool, &new_person("Ana")).await.unwrap();
        let update = PersonUpdate {
            name: Some("Ana Maria".to_string()),
            membership_type: Some(MembershipType::Daily),
            ..Default::default()
        };
        update_person(&pool, id, &update).await.unwrap();
        let person = load_person(&pool, id).await.unwrap();
        assert_eq!(person.name, "Ana Maria");
        assert_eq!(person.phone, "600 000 000");
        assert_eq!(person.membership_type, MembershipType::Daily);

        let err = update_person(&pool, id + 100, &update).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<sqlx::Error>(), Some(sqlx::Error::RowNotFound)));
    }

    #[rocket::async_test]
    async fn test_delete_person_leaves_rosters() {
        let pool = test_pool().await;
        let ana = insert_person(&pool, &new_person("Ana")).await.unwrap();
        let bruno = insert_person(&pool, &new_person("Bruno")).await.unwrap();
        let session = NewSession {
            activity_id: 1,
            instructor_id: 1,
            space_id: 1,
            day_of_week: DayOfWeek::Monday,
            time: SessionTime::from_hm(9, 0).unwrap(),
            person_ids: [ana, bruno].into_iter().collect(),
        };
        insert_session(&pool, &session).await.unwrap();

        delete_person(&pool, ana).await.unwrap();

        let sessions = load_sessions(&pool).await.unwrap();
        assert_eq!(sessions[0].person_ids, [bruno].into_iter().collect::<PersonIds>());
        assert!(load_person(&pool, ana).await.is_err());
    }
}
