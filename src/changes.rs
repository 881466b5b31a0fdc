use chrono::NaiveDate;
use log::{debug, error};
use rocket::response::stream::{Event, EventStream};
use rocket::tokio::sync::broadcast;
use rocket::{Build, Rocket, State};
use serde::{Deserialize, Serialize};
use crate::payments::PaymentId;
use crate::people::PersonId;
use crate::sessions::SessionId;
use crate::StudioState;

/// Committed ledger change announced to change-feed subscribers.
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
#[serde(tag = "type")]
pub enum StudioChange {
    OccurrenceCancelled {
        session_id: SessionId,
        date: NaiveDate,
        credited: Vec<PersonId>,
    },
    AttendanceRecorded {
        session_id: SessionId,
        date: NaiveDate,
    },
    CreditRedeemed {
        person_id: PersonId,
        session_id: SessionId,
        date: NaiveDate,
    },
    PaymentRecorded {
        person_id: PersonId,
        payment_id: PaymentId,
        paid_on: NaiveDate,
    },
}

pub fn changes_channel() -> broadcast::Sender<StudioChange> {
    let (sender, _receiver) = broadcast::channel(64);
    sender
}

impl StudioState {
    pub fn broadcast_change(&self, change: StudioChange) {
        // no subscriber is not an error
        if let Err(e) = self.changes_sender.send(change) {
            debug!("Change not delivered, no listeners: {:?}", e.0);
        }
    }
}

#[get("/api/changes/sse")]
fn changes_sse(state: &State<StudioState>) -> EventStream![] {
    let mut chng_receiver = state.changes_sender.subscribe();
    EventStream! {
        loop {
            let change = match chng_receiver.recv().await {
                Ok(chng) => chng,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    error!("Change feed subscriber lagged, {n} changes skipped");
                    continue;
                }
                Err(e) => {
                    error!("Read change record error: {e}");
                    break;
                }
            };
            match serde_json::to_string(&change) {
                Ok(json) => {
                    yield Event::data(json);
                }
                Err(e) => {
                    error!("Serde error: {e}");
                    break;
                }
            }
        }
    }
}

pub fn extend(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/", routes![
        changes_sse,
    ])
}
