use std::collections::BTreeMap;
use chrono::NaiveDate;
use crate::attendance::{AttendanceRecord, OccurrenceKey};
use crate::catalog::{Activity, ActivityId, Instructor, InstructorId, Space, SpaceId};
use crate::ledger::LedgerUpdate;
use crate::payments::Payment;
use crate::people::{Person, PersonId};
use crate::sessions::{RecurringSession, SessionId};

pub const UNKNOWN_NAME: &str = "Unknown";

/// Studio data loaded wholesale from the store.
///
/// Ledger operations read it and return a [`LedgerUpdate`], which is
/// applied here only after the store accepted it.
#[derive(Default, Clone, Debug)]
pub struct StudioSnapshot {
    pub sessions: Vec<RecurringSession>,
    pub people: Vec<Person>,
    pub attendance: BTreeMap<OccurrenceKey, AttendanceRecord>,
    pub payments: Vec<Payment>,
    pub activities: Vec<Activity>,
    pub instructors: Vec<Instructor>,
    pub spaces: Vec<Space>,
}

impl StudioSnapshot {
    pub fn with_attendance(mut self, records: impl IntoIterator<Item = AttendanceRecord>) -> Self {
        for rec in records {
            self.attendance.insert(rec.key(), rec);
        }
        self
    }
    pub fn session(&self, session_id: SessionId) -> Option<&RecurringSession> {
        self.sessions.iter().find(|s| s.id == session_id)
    }
    pub fn person(&self, person_id: PersonId) -> Option<&Person> {
        self.people.iter().find(|p| p.id == person_id)
    }
    pub fn attendance_record(&self, session_id: SessionId, date: NaiveDate) -> Option<&AttendanceRecord> {
        self.attendance.get(&(session_id, date))
    }
    pub fn person_name(&self, person_id: PersonId) -> &str {
        self.person(person_id).map(|p| p.name.as_str()).unwrap_or(UNKNOWN_NAME)
    }
    pub fn activity_name(&self, activity_id: ActivityId) -> &str {
        self.activities.iter().find(|a| a.id == activity_id).map(|a| a.name.as_str()).unwrap_or(UNKNOWN_NAME)
    }
    pub fn instructor_name(&self, instructor_id: InstructorId) -> &str {
        self.instructors.iter().find(|i| i.id == instructor_id).map(|i| i.name.as_str()).unwrap_or(UNKNOWN_NAME)
    }
    pub fn space_name(&self, space_id: SpaceId) -> &str {
        self.spaces.iter().find(|s| s.id == space_id).map(|s| s.name.as_str()).unwrap_or(UNKNOWN_NAME)
    }
    pub fn enrolled_sessions(&self, person_id: PersonId) -> impl Iterator<Item = &RecurringSession> {
        self.sessions.iter().filter(move |s| s.person_ids.contains(person_id))
    }

    pub fn apply(&mut self, update: LedgerUpdate) {
        if let Some(rec) = update.attendance {
            self.attendance.insert(rec.key(), rec);
        }
        for change in &update.credits {
            if let Some(p) = self.people.iter_mut().find(|p| p.id == change.person_id()) {
                change.apply_to(&mut p.recovery_credits);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::studiotime::parse_date;

    #[test]
    fn test_missing_references_resolve_to_unknown() {
        let studio = StudioSnapshot::default();
        assert_eq!(studio.person_name(1), UNKNOWN_NAME);
        assert_eq!(studio.activity_name(1), UNKNOWN_NAME);
        assert_eq!(studio.instructor_name(1), UNKNOWN_NAME);
        assert_eq!(studio.space_name(1), UNKNOWN_NAME);
        assert!(studio.session(1).is_none());
    }

    #[test]
    fn test_one_record_per_occurrence() {
        let date = parse_date("2025-03-03").unwrap();
        let mut first = AttendanceRecord::new(1, date);
        first.present_ids.insert(5);
        let mut second = AttendanceRecord::new(1, date);
        second.absent_ids.insert(5);
        let studio = StudioSnapshot::default().with_attendance([first, second.clone()]);
        assert_eq!(studio.attendance.len(), 1);
        assert_eq!(studio.attendance_record(1, date), Some(&second));
    }
}
