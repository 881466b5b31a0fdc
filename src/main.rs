#[macro_use] extern crate rocket;

use std::fmt::Display;
use log::{error, warn};
use rocket::figment::Figment;
use serde::de::DeserializeOwned;
use rocket::tokio::sync::broadcast;
use rocket::{Build, Rocket};
use crate::auth::generate_random_string;
use crate::billing::{PaymentPolicy, DEFAULT_PAYMENT_PERIOD_DAYS};
use crate::changes::{changes_channel, StudioChange};
use crate::churn::{ChurnPolicy, DEFAULT_CHURN_THRESHOLD, DEFAULT_CHURN_WINDOW};
use crate::db::DbPoolFairing;
use crate::suggestion::{RuleBasedSuggestionProvider, SharedSuggestionProvider};

mod db;
mod auth;
mod util;
mod studiotime;
mod people;
mod sessions;
mod attendance;
mod billing;
mod payments;
mod catalog;
mod studio;
mod store;
mod ledger;
mod churn;
mod changes;
mod suggestion;
mod seed;

pub const DEFAULT_REMINDER_WINDOW_DAYS: i64 = 7;
pub const DEFAULT_DEMO_DATA: &str = "tests/data/demo-studio.yaml";

pub struct AppConfig {
    api_token: String,
    reminder_window_days: i64,
    churn: ChurnPolicy,
    payments: PaymentPolicy,
    suggestion_url: Option<String>,
    demo_data: String,
}
/// Reads a numeric setting, falling back to `default` when it is missing or below `min`.
fn extract_at_least<T>(figment: &Figment, key: &str, min: T, default: T) -> T
where
    T: DeserializeOwned + PartialOrd + Display + Copy,
{
    match figment.extract_inner::<T>(key) {
        Ok(value) if value < min => {
            warn!("{key} = {value} is below {min}, using default {default}");
            default
        }
        Ok(value) => value,
        Err(_) => default,
    }
}

impl AppConfig {
    fn from_figment(figment: &Figment) -> Self {
        let api_token = figment.extract_inner::<String>("api_token").unwrap_or_else(|_| {
            let token = generate_random_string(12);
            warn!("api_token is not configured, using generated token: {token}");
            token
        });
        Self {
            api_token,
            reminder_window_days: extract_at_least(figment, "reminder_window_days", 0, DEFAULT_REMINDER_WINDOW_DAYS),
            churn: ChurnPolicy {
                window: extract_at_least(figment, "churn_window", 1, DEFAULT_CHURN_WINDOW),
                threshold: extract_at_least(figment, "churn_threshold", 1, DEFAULT_CHURN_THRESHOLD),
            },
            payments: PaymentPolicy {
                period_days: extract_at_least(figment, "payment_period_days", 1, DEFAULT_PAYMENT_PERIOD_DAYS),
            },
            suggestion_url: figment.extract_inner::<String>("suggestion_url").ok(),
            demo_data: figment.extract_inner("demo_data").unwrap_or_else(|_| DEFAULT_DEMO_DATA.to_string()),
        }
    }
}

pub struct StudioState {
    changes_sender: broadcast::Sender<StudioChange>,
}
impl StudioState {
    fn new() -> Self {
        Self {
            changes_sender: changes_channel(),
        }
    }
}

fn studio_rocket(rocket: Rocket<Build>) -> Rocket<Build> {
    let cfg = AppConfig::from_figment(rocket.figment());
    let provider = suggestion::provider_from_config(&cfg).unwrap_or_else(|err| {
        error!("Suggestion service unavailable, using rule based suggestions: {err}");
        Box::new(RuleBasedSuggestionProvider { payments: cfg.payments.clone() }) as SharedSuggestionProvider
    });

    let rocket = rocket.attach(DbPoolFairing());
    let rocket = catalog::extend(rocket);
    let rocket = people::extend(rocket);
    let rocket = sessions::extend(rocket);
    let rocket = attendance::extend(rocket);
    let rocket = payments::extend(rocket);
    let rocket = changes::extend(rocket);
    let rocket = suggestion::extend(rocket);
    let rocket = seed::extend(rocket);

    rocket
        .manage(cfg)
        .manage(provider)
        .manage(StudioState::new())
}

#[launch]
fn rocket() -> _ {
    studio_rocket(rocket::build())
}
