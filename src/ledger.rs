//! Recurring session attendance ledger.
//!
//! Every occurrence (session + calendar date) goes `Scheduled` ->
//! `AttendanceRecorded` or `Cancelled`. The operations here are pure: they
//! read a [`StudioSnapshot`] and produce a [`LedgerUpdate`], which [`commit`]
//! saves through a [`StudioStore`] before applying it to the snapshot.

use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::attendance::{AttendanceRecord, AttendanceSheet};
use crate::people::{PersonId, RecoveryCredit, RecoveryCredits};
use crate::sessions::{RecurringSession, SessionId};
use crate::store::StudioStore;
use crate::studio::StudioSnapshot;
use crate::studiotime::{dates_on, DayOfWeek, SessionTime};

#[derive(Error, Debug, PartialEq)]
pub enum LedgerError {
    #[error("Session id={0} not found")]
    SessionNotFound(SessionId),
    #[error("Person id={0} not found")]
    PersonNotFound(PersonId),
    #[error("Person id={person_id} is not enrolled in session id={session_id}")]
    NotEnrolled { session_id: SessionId, person_id: PersonId },
    #[error("Person id={0} is listed in more than one attendance set")]
    OverlappingAttendance(PersonId),
    #[error("Occurrence of session id={session_id} on {date} is cancelled")]
    OccurrenceCancelled { session_id: SessionId, date: NaiveDate },
    #[error("Person id={person_id} holds no recovery credit for session id={session_id} on {date}")]
    CreditNotFound { person_id: PersonId, session_id: SessionId, date: NaiveDate },
}

/// One recovery credit added to or taken from a person.
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum CreditChange {
    Granted { person_id: PersonId, credit: RecoveryCredit },
    Redeemed { person_id: PersonId, credit: RecoveryCredit },
}
impl CreditChange {
    pub fn person_id(&self) -> PersonId {
        match self {
            CreditChange::Granted { person_id, .. } | CreditChange::Redeemed { person_id, .. } => *person_id,
        }
    }
    /// Applies the change to a credit set, `false` when a redeemed credit is not held.
    pub fn apply_to(&self, credits: &mut RecoveryCredits) -> bool {
        match self {
            CreditChange::Granted { credit, .. } => {
                credits.0.insert(*credit);
                true
            }
            CreditChange::Redeemed { credit, .. } => credits.0.remove(credit),
        }
    }
}

/// Records to persist for one ledger operation.
#[derive(Default, PartialEq, Clone, Debug)]
pub struct LedgerUpdate {
    pub attendance: Option<AttendanceRecord>,
    pub credits: Vec<CreditChange>,
}
impl LedgerUpdate {
    pub fn credited_people(&self) -> Vec<PersonId> {
        self.credits.iter()
            .filter(|change| matches!(change, CreditChange::Granted { .. }))
            .map(CreditChange::person_id)
            .collect()
    }
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceState {
    Scheduled,
    AttendanceRecorded,
    Cancelled,
}
impl OccurrenceState {
    pub fn of(record: Option<&AttendanceRecord>) -> Self {
        match record {
            None => OccurrenceState::Scheduled,
            Some(rec) if rec.cancelled => OccurrenceState::Cancelled,
            Some(_) => OccurrenceState::AttendanceRecorded,
        }
    }
}

#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct Occurrence {
    pub session_id: SessionId,
    pub date: NaiveDate,
    pub day_of_week: DayOfWeek,
    pub time: SessionTime,
    pub activity: String,
    pub instructor: String,
    pub space: String,
    pub enrolled: usize,
    pub state: OccurrenceState,
}

/// Cancels the occurrence of `session` on `date`.
///
/// The caller guarantees `date` falls on the session's day of week.
/// Any attendance recorded for the date is cleared. With `grant_credits`
/// every enrolled person never credited for this occurrence gets it, so
/// repeating the call grants nothing new, even after a redemption.
pub fn cancel_occurrence(studio: &StudioSnapshot, session: &RecurringSession, date: NaiveDate, grant_credits: bool) -> LedgerUpdate {
    let mut record = AttendanceRecord::new(session.id, date);
    record.cancelled = true;
    if let Some(prev) = studio.attendance_record(session.id, date) {
        record.credited_ids = prev.credited_ids.clone();
    }
    let mut credits = vec![];
    if grant_credits {
        let credit = RecoveryCredit { session_id: session.id, date };
        for person_id in session.person_ids.iter() {
            let Some(person) = studio.person(person_id) else {
                debug!("Enrolled person id: {person_id} not found, no credit granted");
                continue
            };
            if record.credited_ids.contains(person_id) || person.recovery_credits.contains(&credit) {
                continue
            }
            record.credited_ids.insert(person_id);
            credits.push(CreditChange::Granted { person_id, credit });
        }
    }
    LedgerUpdate { attendance: Some(record), credits }
}

/// Records (or corrects) attendance of a not cancelled occurrence.
pub fn record_attendance(studio: &StudioSnapshot, session: &RecurringSession, date: NaiveDate, sheet: &AttendanceSheet) -> Result<LedgerUpdate, LedgerError> {
    if studio.attendance_record(session.id, date).is_some_and(|rec| rec.cancelled) {
        return Err(LedgerError::OccurrenceCancelled { session_id: session.id, date })
    }
    let sets = [&sheet.present_ids, &sheet.absent_ids, &sheet.justified_absence_ids];
    for (ix, set) in sets.iter().enumerate() {
        for person_id in set.iter() {
            if !session.person_ids.contains(person_id) {
                return Err(LedgerError::NotEnrolled { session_id: session.id, person_id })
            }
            if sets[ix + 1..].iter().any(|other| other.contains(person_id)) {
                return Err(LedgerError::OverlappingAttendance(person_id))
            }
        }
    }
    let record = AttendanceRecord {
        session_id: session.id,
        date,
        present_ids: sheet.present_ids.clone(),
        absent_ids: sheet.absent_ids.clone(),
        justified_absence_ids: sheet.justified_absence_ids.clone(),
        cancelled: false,
        credited_ids: Default::default(),
    };
    Ok(LedgerUpdate { attendance: Some(record), credits: vec![] })
}

/// Uses up one recovery credit held by the person.
pub fn redeem_credit(studio: &StudioSnapshot, person_id: PersonId, credit: &RecoveryCredit) -> Result<LedgerUpdate, LedgerError> {
    let person = studio.person(person_id).ok_or(LedgerError::PersonNotFound(person_id))?;
    if !person.recovery_credits.contains(credit) {
        return Err(LedgerError::CreditNotFound { person_id, session_id: credit.session_id, date: credit.date })
    }
    Ok(LedgerUpdate { attendance: None, credits: vec![CreditChange::Redeemed { person_id, credit: *credit }] })
}

/// Every occurrence in `from ..= to`, ordered by date and time.
pub fn occurrences(studio: &StudioSnapshot, from: NaiveDate, to: NaiveDate) -> Vec<Occurrence> {
    let mut ret = studio.sessions.iter()
        .flat_map(|session| {
            dates_on(session.day_of_week, from, to).into_iter().map(move |date| Occurrence {
                session_id: session.id,
                date,
                day_of_week: session.day_of_week,
                time: session.time,
                activity: studio.activity_name(session.activity_id).to_string(),
                instructor: studio.instructor_name(session.instructor_id).to_string(),
                space: studio.space_name(session.space_id).to_string(),
                enrolled: session.person_ids.len(),
                state: OccurrenceState::of(studio.attendance_record(session.id, date)),
            })
        })
        .collect::<Vec<_>>();
    ret.sort_by_key(|occ| (occ.date, occ.time, occ.session_id));
    ret
}

/// Saves `update` and, once the store accepted it, applies it to `studio`.
pub async fn commit<S: StudioStore + ?Sized>(store: &S, studio: &mut StudioSnapshot, update: LedgerUpdate) -> anyhow::Result<()> {
    store.save_ledger_update(&update).await?;
    studio.apply(update);
    Ok(())
}
