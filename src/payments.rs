use chrono::NaiveDate;
use log::{debug, info};
use rocket::http::ContentType;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::{Build, Rocket, State};
use serde::{Deserialize, Serialize};
use sqlx::{query_as, FromRow, SqlitePool};
use crate::auth::StudioApiToken;
use crate::billing::{overdue_people, payment_reminders, payment_status, PaymentReminder, PaymentStatus};
use crate::changes::StudioChange;
use crate::db::DbPool;
use crate::people::{load_people, load_person, Person, PersonId};
use crate::studiotime::today;
use crate::util::{anyhow_to_custom_error, bad_request, sqlx_to_anyhow, sqlx_to_custom_error, sqlx_to_not_found};
use crate::{AppConfig, StudioState};

pub type PaymentId = i64;

#[derive(Serialize, Deserialize, FromRow, PartialEq, Clone, Debug)]
pub struct Payment {
    pub id: PaymentId,
    pub person_id: PersonId,
    pub amount_cents: i64,
    pub paid_on: NaiveDate,
    pub note: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NewPayment {
    pub person_id: PersonId,
    pub amount_cents: i64,
    #[serde(default)]
    pub paid_on: Option<NaiveDate>,
    #[serde(default)]
    pub note: String,
}

#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct PaymentStatusInfo {
    pub person_id: PersonId,
    pub status: PaymentStatus,
    pub due_date: Option<NaiveDate>,
}

pub async fn load_payments(pool: &SqlitePool) -> anyhow::Result<Vec<Payment>> {
    let payments = query_as::<_, Payment>("SELECT * FROM payments ORDER BY paid_on, id")
        .fetch_all(pool).await.map_err(sqlx_to_anyhow)?;
    Ok(payments)
}

/// Stores the payment and moves the person's last payment date forward.
pub async fn insert_payment(pool: &SqlitePool, payment: &NewPayment, paid_on: NaiveDate) -> anyhow::Result<PaymentId> {
    if payment.amount_cents <= 0 {
        anyhow::bail!("Payment amount must be positive, got {}", payment.amount_cents);
    }
    let mut txn = pool.begin().await?;
    let id: (i64, ) = query_as("INSERT INTO payments (person_id, amount_cents, paid_on, note) VALUES (?, ?, ?, ?) RETURNING id")
        .bind(payment.person_id)
        .bind(payment.amount_cents)
        .bind(paid_on)
        .bind(&payment.note)
        .fetch_one(&mut *txn).await?;
    let res = sqlx::query("UPDATE people SET last_payment_date=? WHERE id=? AND (last_payment_date IS NULL OR last_payment_date<?)")
        .bind(paid_on)
        .bind(payment.person_id)
        .bind(paid_on)
        .execute(&mut *txn).await?;
    if res.rows_affected() == 0 {
        debug!("Payment id: {} is older than last payment of person id: {}", id.0, payment.person_id);
    }
    txn.commit().await?;
    info!("Payment recorded, id: {}, person id: {}, amount: {}", id.0, payment.person_id, payment.amount_cents);
    Ok(id.0)
}

fn reminders_csv(reminders: &[PaymentReminder]) -> anyhow::Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    for reminder in reminders {
        writer.serialize(reminder)?;
    }
    let data = writer.into_inner().map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(String::from_utf8(data)?)
}

#[get("/api/payments?<person_id>")]
async fn get_payments(person_id: Option<PersonId>, db: &State<DbPool>) -> Result<Json<Vec<Payment>>, Custom<String>> {
    let mut payments = load_payments(&db.0).await.map_err(anyhow_to_custom_error)?;
    if let Some(person_id) = person_id {
        payments.retain(|p| p.person_id == person_id);
    }
    Ok(Json(payments))
}

#[post("/api/payments", data = "<payment>")]
async fn post_payment(_api_token: StudioApiToken, payment: Json<NewPayment>, state: &State<StudioState>, db: &State<DbPool>) -> Result<Json<Payment>, Custom<String>> {
    load_person(&db.0, payment.person_id).await
        .map_err(|err| sqlx_to_not_found(err, format_args!("Person id={}", payment.person_id)))?;
    if payment.amount_cents <= 0 {
        return Err(bad_request(format!("Payment amount must be positive, got {}", payment.amount_cents)));
    }
    let paid_on = payment.paid_on.unwrap_or_else(today);
    let payment_id = insert_payment(&db.0, &payment, paid_on).await.map_err(anyhow_to_custom_error)?;
    let payment = query_as::<_, Payment>("SELECT * FROM payments WHERE id=?")
        .bind(payment_id)
        .fetch_one(&db.0).await.map_err(sqlx_to_custom_error)?;
    state.broadcast_change(StudioChange::PaymentRecorded {
        person_id: payment.person_id,
        payment_id,
        paid_on,
    });
    Ok(Json(payment))
}

#[get("/api/payments/status/<person_id>")]
async fn get_payment_status(person_id: PersonId, cfg: &State<AppConfig>, db: &State<DbPool>) -> Result<Json<PaymentStatusInfo>, Custom<String>> {
    let person = load_person(&db.0, person_id).await.map_err(sqlx_to_custom_error)?;
    Ok(Json(PaymentStatusInfo {
        person_id,
        status: payment_status(&person, today(), &cfg.payments),
        due_date: crate::billing::due_date(&person, &cfg.payments),
    }))
}

#[get("/api/payments/reminders?<window_days>")]
async fn get_reminders(window_days: Option<i64>, cfg: &State<AppConfig>, db: &State<DbPool>) -> Result<Json<Vec<PaymentReminder>>, Custom<String>> {
    let people = load_people(&db.0).await.map_err(anyhow_to_custom_error)?;
    let window_days = window_days.unwrap_or(cfg.reminder_window_days);
    Ok(Json(payment_reminders(&people, today(), window_days, &cfg.payments)))
}

#[get("/api/payments/reminders.csv?<window_days>")]
async fn get_reminders_csv(window_days: Option<i64>, cfg: &State<AppConfig>, db: &State<DbPool>) -> Result<(ContentType, String), Custom<String>> {
    let people = load_people(&db.0).await.map_err(anyhow_to_custom_error)?;
    let window_days = window_days.unwrap_or(cfg.reminder_window_days);
    let reminders = payment_reminders(&people, today(), window_days, &cfg.payments);
    let csv = reminders_csv(&reminders).map_err(anyhow_to_custom_error)?;
    Ok((ContentType::CSV, csv))
}

#[get("/api/payments/overdue")]
async fn get_overdue(cfg: &State<AppConfig>, db: &State<DbPool>) -> Result<Json<Vec<Person>>, Custom<String>> {
    let people = load_people(&db.0).await.map_err(anyhow_to_custom_error)?;
    Ok(Json(overdue_people(&people, today(), &cfg.payments)))
}

pub fn extend(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/", routes![
        get_payments,
        post_payment,
        get_payment_status,
        get_reminders,
        get_reminders_csv,
        get_overdue,
    ])
}
