use std::collections::HashMap;
use std::fs;
use anyhow::{anyhow, Context};
use chrono::TimeDelta;
use log::info;
use rocket::response::status::Custom;
use rocket::response::Redirect;
use rocket::{Build, Rocket, State};
use serde::Deserialize;
use sqlx::SqlitePool;
use crate::catalog::{insert_activity, insert_instructor, insert_space, NewActivity, NewInstructor, NewSpace};
use crate::db::DbPool;
use crate::people::{insert_person, MembershipType, NewPerson, PersonIds};
use crate::sessions::{insert_session, NewSession};
use crate::studiotime::{today, DayOfWeek, SessionTime};
use crate::util::anyhow_to_custom_error;
use crate::AppConfig;

#[derive(Deserialize, Debug)]
struct DemoPerson {
    name: String,
    #[serde(default)]
    phone: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    membership_type: MembershipType,
    /// Last payment relative to the seeding day.
    #[serde(default)]
    paid_days_ago: Option<i64>,
}

#[derive(Deserialize, Debug)]
struct DemoSession {
    activity: String,
    instructor: String,
    space: String,
    day_of_week: DayOfWeek,
    time: SessionTime,
    #[serde(default)]
    people: Vec<String>,
}

/// Demo studio, sessions reference the catalog and people by name.
#[derive(Deserialize, Debug)]
pub struct DemoStudio {
    activities: Vec<NewActivity>,
    instructors: Vec<NewInstructor>,
    spaces: Vec<NewSpace>,
    people: Vec<DemoPerson>,
    sessions: Vec<DemoSession>,
}

pub fn load_demo_studio(file: &str) -> anyhow::Result<DemoStudio> {
    info!("Loading demo studio from file: {file}");
    let content = fs::read_to_string(file).with_context(|| format!("Cannot read demo studio file {file}"))?;
    Ok(serde_yaml::from_str(&content)?)
}

fn lookup(ids: &HashMap<String, i64>, kind: &str, name: &str) -> anyhow::Result<i64> {
    ids.get(name).copied().ok_or_else(|| anyhow!("Demo session references unknown {kind}: {name}"))
}

pub async fn seed_demo_studio(pool: &SqlitePool, demo: &DemoStudio) -> anyhow::Result<()> {
    let mut activity_ids = HashMap::new();
    for activity in &demo.activities {
        activity_ids.insert(activity.name.clone(), insert_activity(pool, activity).await?.id);
    }
    let mut instructor_ids = HashMap::new();
    for instructor in &demo.instructors {
        instructor_ids.insert(instructor.name.clone(), insert_instructor(pool, instructor).await?.id);
    }
    let mut space_ids = HashMap::new();
    for space in &demo.spaces {
        space_ids.insert(space.name.clone(), insert_space(pool, space).await?.id);
    }
    let mut person_ids = HashMap::new();
    for person in &demo.people {
        let last_payment_date = match person.paid_days_ago {
            Some(days) => {
                let paid_on = TimeDelta::try_days(days)
                    .and_then(|delta| today().checked_sub_signed(delta))
                    .ok_or_else(|| anyhow!("Demo person {} has paid_days_ago out of range: {days}", person.name))?;
                Some(paid_on)
            }
            None => None,
        };
        let new_person = NewPerson {
            name: person.name.clone(),
            phone: person.phone.clone(),
            email: person.email.clone(),
            membership_type: person.membership_type,
            last_payment_date,
        };
        person_ids.insert(person.name.clone(), insert_person(pool, &new_person).await?);
    }
    for session in &demo.sessions {
        let new_session = NewSession {
            activity_id: lookup(&activity_ids, "activity", &session.activity)?,
            instructor_id: lookup(&instructor_ids, "instructor", &session.instructor)?,
            space_id: lookup(&space_ids, "space", &session.space)?,
            day_of_week: session.day_of_week,
            time: session.time,
            person_ids: session.people.iter()
                .map(|name| lookup(&person_ids, "person", name))
                .collect::<anyhow::Result<PersonIds>>()?,
        };
        insert_session(pool, &new_session).await?;
    }
    info!("Demo studio created, {} people, {} sessions", demo.people.len(), demo.sessions.len());
    Ok(())
}

#[get("/studio/create-demo")]
async fn get_create_demo(cfg: &State<AppConfig>, db: &State<DbPool>) -> Result<Redirect, Custom<String>> {
    let demo = load_demo_studio(&cfg.demo_data).map_err(anyhow_to_custom_error)?;
    seed_demo_studio(&db.0, &demo).await.map_err(anyhow_to_custom_error)?;
    Ok(Redirect::to("/api/sessions"))
}

pub fn extend(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/", routes![
        get_create_demo,
    ])
}
