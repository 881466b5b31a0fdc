use std::collections::BTreeSet;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use crate::attendance::AttendanceRecord;
use crate::people::Person;
use crate::sessions::{RecurringSession, SessionId};

pub const DEFAULT_CHURN_WINDOW: usize = 5;
pub const DEFAULT_CHURN_THRESHOLD: usize = 3;

#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct ChurnPolicy {
    /// Most recent records inspected per person.
    pub window: usize,
    /// Consecutive absences flagging a person.
    pub threshold: usize,
}
impl Default for ChurnPolicy {
    fn default() -> Self {
        Self {
            window: DEFAULT_CHURN_WINDOW,
            threshold: DEFAULT_CHURN_THRESHOLD,
        }
    }
}

/// People with `policy.threshold` or more consecutive absences in their most
/// recent attendance, in input order. Cancelled occurrences are ignored and
/// people enrolled in no session are never evaluated.
pub fn detect_churn_risk<'a>(
    people: &[Person],
    attendance: impl IntoIterator<Item = &'a AttendanceRecord>,
    sessions: &[RecurringSession],
    policy: &ChurnPolicy,
) -> Vec<Person> {
    let attendance = attendance.into_iter()
        .filter(|rec| !rec.cancelled)
        .sorted_by(|a, b| b.date.cmp(&a.date))
        .collect::<Vec<_>>();
    people.iter()
        .filter(|person| {
            let enrolled = sessions.iter()
                .filter(|s| s.person_ids.contains(person.id))
                .map(|s| s.id)
                .collect::<BTreeSet<SessionId>>();
            if enrolled.is_empty() {
                return false
            }
            consecutive_absences(person, &attendance, &enrolled, policy.window) >= policy.threshold
        })
        .cloned()
        .collect()
}

fn consecutive_absences(person: &Person, attendance_newest_first: &[&AttendanceRecord], enrolled: &BTreeSet<SessionId>, window: usize) -> usize {
    let mut absences = 0;
    for rec in attendance_newest_first.iter()
        .filter(|rec| enrolled.contains(&rec.session_id))
        .take(window) {
        if rec.absent_ids.contains(person.id) {
            absences += 1;
        } else if rec.present_ids.contains(person.id) || rec.justified_absence_ids.contains(person.id) {
            break
        }
    }
    absences
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeDelta};
    use crate::people::{MembershipType, PersonId, PersonIds};
    use crate::studiotime::{parse_date, DayOfWeek, SessionTime};
    use super::*;

    #[derive(Clone, Copy)]
    enum Mark {
        Present,
        Absent,
        Justified,
        Cancelled,
    }

    fn person(id: PersonId) -> Person {
        Person {
            id,
            name: format!("Person {id}"),
            phone: String::new(),
            email: String::new(),
            membership_type: MembershipType::Monthly,
            last_payment_date: None,
            recovery_credits: Default::default(),
        }
    }

    fn session(id: SessionId, person_ids: &[PersonId]) -> RecurringSession {
        RecurringSession {
            id,
            activity_id: 1,
            instructor_id: 1,
            space_id: 1,
            day_of_week: DayOfWeek::Monday,
            time: SessionTime::from_hm(9, 0).unwrap(),
            person_ids: person_ids.iter().copied().collect(),
        }
    }

    /// Weekly records for `person_id`, `marks` given most recent first.
    fn history(session_id: SessionId, person_id: PersonId, marks: &[Mark]) -> Vec<AttendanceRecord> {
        let newest = parse_date("2025-03-31").unwrap();
        marks.iter().enumerate().map(|(n, mark)| {
            let date: NaiveDate = newest - TimeDelta::weeks(n as i64);
            let mut rec = AttendanceRecord::new(session_id, date);
            let one = [person_id].into_iter().collect::<PersonIds>();
            match mark {
                Mark::Present => rec.present_ids = one,
                Mark::Absent => rec.absent_ids = one,
                Mark::Justified => rec.justified_absence_ids = one,
                Mark::Cancelled => rec.cancelled = true,
            }
            rec
        }).collect()
    }

    fn at_risk(marks: &[Mark]) -> bool {
        let people = vec![person(1)];
        let sessions = vec![session(10, &[1])];
        // shuffled on purpose, detection must sort by date itself
        let mut attendance = history(10, 1, marks);
        attendance.reverse();
        !detect_churn_risk(&people, &attendance, &sessions, &ChurnPolicy::default()).is_empty()
    }

    use Mark::*;

    #[test]
    fn test_three_recent_absences_flag_person() {
        assert!(at_risk(&[Absent, Absent, Absent, Present]));
    }

    #[test]
    fn test_presence_breaks_the_streak() {
        assert!(!at_risk(&[Absent, Absent, Present, Absent]));
        assert!(!at_risk(&[Absent, Justified, Absent, Absent]));
    }

    #[test]
    fn test_cancelled_occurrences_do_not_count() {
        assert!(!at_risk(&[Cancelled, Cancelled, Absent, Absent]));
        assert!(at_risk(&[Absent, Cancelled, Absent, Absent]));
    }

    #[test]
    fn test_only_most_recent_window_is_inspected() {
        let people = vec![person(1)];
        let sessions = vec![session(10, &[1])];
        let mut attendance = history(10, 1, &[Absent, Absent, Absent, Absent, Absent, Absent]);
        // records 3 to 5 do not mention the person, they neither count nor stop the walk
        for rec in &mut attendance[2..5] {
            rec.absent_ids = PersonIds::default();
        }
        assert!(detect_churn_risk(&people, &attendance, &sessions, &ChurnPolicy::default()).is_empty());
        let wider = ChurnPolicy { window: 6, threshold: 3 };
        assert_eq!(detect_churn_risk(&people, &attendance, &sessions, &wider).len(), 1);
    }

    #[test]
    fn test_not_enrolled_person_is_never_flagged() {
        let people = vec![person(1), person(2)];
        // person 2 has absences recorded but is no longer enrolled
        let sessions = vec![session(10, &[1])];
        let attendance = history(10, 2, &[Absent, Absent, Absent]);
        let risk = detect_churn_risk(&people, &attendance, &sessions, &ChurnPolicy::default());
        assert!(risk.is_empty());
    }

    #[test]
    fn test_output_keeps_input_order() {
        let people = vec![person(3), person(1), person(2)];
        let sessions = vec![session(10, &[1]), session(20, &[2]), session(30, &[3])];
        let mut attendance = history(10, 1, &[Absent, Absent, Absent]);
        attendance.extend(history(20, 2, &[Absent, Absent, Absent, Absent, Absent]));
        attendance.extend(history(30, 3, &[Absent, Absent, Absent]));
        let risk = detect_churn_risk(&people, &attendance, &sessions, &ChurnPolicy::default());
        assert_eq!(risk.iter().map(|p| p.id).collect::<Vec<_>>(), vec![3, 1, 2]);
    }

    #[test]
    fn test_custom_policy() {
        let people = vec![person(1)];
        let sessions = vec![session(10, &[1])];
        let attendance = history(10, 1, &[Absent, Absent, Present]);
        let policy = ChurnPolicy { window: 5, threshold: 2 };
        assert_eq!(detect_churn_risk(&people, &attendance, &sessions, &policy).len(), 1);
    }
}
