use std::time::Duration;
use anyhow::{anyhow, Context};
use itertools::Itertools;
use log::{debug, info};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::{Build, Rocket, State};
use serde::{Deserialize, Serialize};
use crate::billing::{due_date, PaymentPolicy};
use crate::catalog::ActivityId;
use crate::db::DbPool;
use crate::people::{MembershipType, PersonId};
use crate::store::StudioStore;
use crate::studio::StudioSnapshot;
use crate::studiotime::{DayOfWeek, SessionTime};
use crate::util::anyhow_to_custom_error;
use crate::AppConfig;

const SLOT_DAYS: [DayOfWeek; 6] = [
    DayOfWeek::Monday,
    DayOfWeek::Tuesday,
    DayOfWeek::Wednesday,
    DayOfWeek::Thursday,
    DayOfWeek::Friday,
    DayOfWeek::Saturday,
];
const FIRST_SLOT_HOUR: u32 = 8;
const LAST_SLOT_HOUR: u32 = 20;
const SUGGESTION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SuggestionRequest {
    ScheduleSlot { activity_id: ActivityId },
    Retention { person_id: PersonId },
    PaymentReminder { person_id: PersonId },
}

#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct SuggestedSlot {
    pub day_of_week: DayOfWeek,
    pub time: SessionTime,
}

#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct Suggestion {
    pub title: String,
    pub message: String,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<SuggestedSlot>,
}

/// Source of scheduling and messaging suggestions.
#[rocket::async_trait]
pub trait SuggestionProvider: Send + Sync {
    async fn suggest(&self, request: &SuggestionRequest, studio: &StudioSnapshot) -> anyhow::Result<Suggestion>;
}

pub type SharedSuggestionProvider = Box<dyn SuggestionProvider>;

/// Answers from studio data alone.
#[derive(Default)]
pub struct RuleBasedSuggestionProvider {
    pub payments: PaymentPolicy,
}

impl RuleBasedSuggestionProvider {
    fn free_slot(studio: &StudioSnapshot) -> Option<SuggestedSlot> {
        let day = SLOT_DAYS.iter()
            .min_by_key(|day| studio.sessions.iter().filter(|s| s.day_of_week == **day).count())?;
        (FIRST_SLOT_HOUR..=LAST_SLOT_HOUR)
            .filter_map(|hour| SessionTime::from_hm(hour, 0))
            .find(|time| !studio.sessions.iter().any(|s| s.day_of_week == *day && s.time == *time))
            .map(|time| SuggestedSlot { day_of_week: *day, time })
    }
}

#[rocket::async_trait]
impl SuggestionProvider for RuleBasedSuggestionProvider {
    async fn suggest(&self, request: &SuggestionRequest, studio: &StudioSnapshot) -> anyhow::Result<Suggestion> {
        let suggestion = match request {
            SuggestionRequest::ScheduleSlot { activity_id } => {
                let slot = Self::free_slot(studio).ok_or_else(|| anyhow!("No free slot left in the week"))?;
                Suggestion {
                    title: format!("New {} session", studio.activity_name(*activity_id)),
                    message: format!("{} at {} is the least busy slot of the week.", slot.day_of_week, slot.time),
                    slot: Some(slot),
                }
            }
            SuggestionRequest::Retention { person_id } => {
                let name = studio.person_name(*person_id);
                let classes = studio.enrolled_sessions(*person_id)
                    .map(|s| studio.activity_name(s.activity_id))
                    .unique()
                    .join(", ");
                let message = if classes.is_empty() {
                    format!("Hi {name}, we miss you at the studio! Would you like to book a class this week?")
                } else {
                    format!("Hi {name}, we miss you at {classes}! Your spot is waiting, see you this week?")
                };
                Suggestion { title: format!("Reach out to {name}"), message, slot: None }
            }
            SuggestionRequest::PaymentReminder { person_id } => {
                let name = studio.person_name(*person_id);
                let message = match studio.person(*person_id) {
                    Some(person) if person.membership_type == MembershipType::Daily => {
                        format!("Hi {name}, daily passes are paid at the desk on the day of the class.")
                    }
                    Some(person) => match due_date(person, &self.payments) {
                        Some(due) => format!("Hi {name}, your membership payment is due on {due}."),
                        None => format!("Hi {name}, we have no payment on record for your membership yet."),
                    },
                    None => format!("Hi {name}, please get in touch about your membership payment."),
                };
                Suggestion { title: format!("Payment reminder for {name}"), message, slot: None }
            }
        };
        Ok(suggestion)
    }
}

#[derive(Serialize, Debug)]
struct SuggestionQuery<'a> {
    request: &'a SuggestionRequest,
    person_name: Option<&'a str>,
    activity_name: Option<&'a str>,
}

/// Delegates to a remote suggestion service speaking JSON.
pub struct HttpSuggestionProvider {
    client: reqwest::Client,
    url: String,
}

impl HttpSuggestionProvider {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(SUGGESTION_TIMEOUT)
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { client, url: url.to_string() })
    }
}

#[rocket::async_trait]
impl SuggestionProvider for HttpSuggestionProvider {
    async fn suggest(&self, request: &SuggestionRequest, studio: &StudioSnapshot) -> anyhow::Result<Suggestion> {
        let query = SuggestionQuery {
            request,
            person_name: match request {
                SuggestionRequest::Retention { person_id } | SuggestionRequest::PaymentReminder { person_id } => Some(studio.person_name(*person_id)),
                SuggestionRequest::ScheduleSlot { .. } => None,
            },
            activity_name: match request {
                SuggestionRequest::ScheduleSlot { activity_id } => Some(studio.activity_name(*activity_id)),
                _ => None,
            },
        };
        debug!("Suggestion query to {}: {:?}", self.url, query);
        let suggestion = self.client.post(&self.url)
            .json(&query)
            .send()
            .await
            .context("failed to complete suggestion request")?
            .error_for_status()
            .context("suggestion service failed")?
            .json::<Suggestion>()
            .await
            .context("failed to deserialize suggestion")?;
        Ok(suggestion)
    }
}

pub fn provider_from_config(cfg: &AppConfig) -> anyhow::Result<SharedSuggestionProvider> {
    match &cfg.suggestion_url {
        Some(url) => {
            info!("Using suggestion service: {url}");
            Ok(Box::new(HttpSuggestionProvider::new(url)?))
        }
        None => {
            info!("Using rule based suggestions");
            Ok(Box::new(RuleBasedSuggestionProvider { payments: cfg.payments.clone() }))
        }
    }
}

#[post("/api/suggestions", data = "<request>")]
async fn post_suggestion(request: Json<SuggestionRequest>, provider: &State<SharedSuggestionProvider>, db: &State<DbPool>) -> Result<Json<Suggestion>, Custom<String>> {
    let studio = db.0.load_snapshot().await.map_err(anyhow_to_custom_error)?;
    let suggestion = provider.suggest(&request, &studio).await.map_err(anyhow_to_custom_error)?;
    Ok(Json(suggestion))
}

pub fn extend(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/", routes![
        post_suggestion,
    ])
}
