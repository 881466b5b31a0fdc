use std::fmt::{Display, Formatter};
use chrono::{NaiveDate, TimeDelta};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use crate::people::{MembershipType, Person, PersonId};
use crate::studiotime::days_between;

pub const DEFAULT_PAYMENT_PERIOD_DAYS: i64 = 30;

#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct PaymentPolicy {
    pub period_days: i64,
}
impl Default for PaymentPolicy {
    fn default() -> Self {
        Self { period_days: DEFAULT_PAYMENT_PERIOD_DAYS }
    }
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Current,
    Overdue,
}
impl Display for PaymentStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Current => f.write_str("current"),
            PaymentStatus::Overdue => f.write_str("overdue"),
        }
    }
}

/// Date the next payment is due, `None` for daily members and people who never paid.
pub fn due_date(person: &Person, policy: &PaymentPolicy) -> Option<NaiveDate> {
    if person.membership_type == MembershipType::Daily {
        return None
    }
    person.last_payment_date?.checked_add_signed(TimeDelta::days(policy.period_days))
}

pub fn payment_status(person: &Person, today: NaiveDate, policy: &PaymentPolicy) -> PaymentStatus {
    if person.membership_type == MembershipType::Daily {
        return PaymentStatus::Current
    }
    match due_date(person, policy) {
        Some(due) if due < today => PaymentStatus::Overdue,
        Some(_) => PaymentStatus::Current,
        None => PaymentStatus::Overdue,
    }
}

#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct PaymentReminder {
    pub person_id: PersonId,
    pub name: String,
    pub phone: String,
    pub due_date: NaiveDate,
    pub days_until_due: i64,
}

/// People whose due date falls within `today ..= today + window_days`, soonest first.
pub fn payment_reminders(people: &[Person], today: NaiveDate, window_days: i64, policy: &PaymentPolicy) -> Vec<PaymentReminder> {
    people.iter()
        .filter_map(|person| {
            let due = due_date(person, policy)?;
            let days_until_due = days_between(today, due);
            (0..=window_days).contains(&days_until_due).then(|| PaymentReminder {
                person_id: person.id,
                name: person.name.clone(),
                phone: person.phone.clone(),
                due_date: due,
                days_until_due,
            })
        })
        .sorted_by(|a, b| a.due_date.cmp(&b.due_date).then_with(|| a.name.cmp(&b.name)))
        .collect()
}

pub fn overdue_people(people: &[Person], today: NaiveDate, policy: &PaymentPolicy) -> Vec<Person> {
    people.iter()
        .filter(|person| payment_status(person, today, policy) == PaymentStatus::Overdue)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::studiotime::parse_date;

    fn person(id: PersonId, name: &str, membership_type: MembershipType, last_payment_date: Option<NaiveDate>) -> Person {
        Person {
            id,
            name: name.to_string(),
            phone: String::new(),
            email: String::new(),
            membership_type,
            last_payment_date,
            recovery_credits: Default::default(),
        }
    }

    fn days_ago(today: NaiveDate, days: i64) -> Option<NaiveDate> {
        today.checked_sub_signed(TimeDelta::days(days))
    }

    #[test]
    fn test_daily_member_is_always_current() {
        let today = parse_date("2025-06-15").unwrap();
        let policy = PaymentPolicy::default();
        for last in [None, days_ago(today, 1), days_ago(today, 400)] {
            let p = person(1, "Bruno", MembershipType::Daily, last);
            assert_eq!(payment_status(&p, today, &policy), PaymentStatus::Current);
        }
    }

    #[test]
    fn test_monthly_member_threshold() {
        let today = parse_date("2025-06-15").unwrap();
        let policy = PaymentPolicy::default();
        let at_30 = person(1, "Ana", MembershipType::Monthly, days_ago(today, 30));
        let at_31 = person(2, "Carla", MembershipType::Monthly, days_ago(today, 31));
        let never = person(3, "Diego", MembershipType::Monthly, None);
        assert_eq!(payment_status(&at_30, today, &policy), PaymentStatus::Current);
        assert_eq!(payment_status(&at_31, today, &policy), PaymentStatus::Overdue);
        assert_eq!(payment_status(&never, today, &policy), PaymentStatus::Overdue);
        let overdue = overdue_people(&[at_30, at_31, never], today, &policy);
        assert_eq!(overdue.iter().map(|p| p.id).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_payment_reminders_window() {
        let today = parse_date("2025-06-15").unwrap();
        let policy = PaymentPolicy::default();
        let people = vec![
            // due in 8 days, outside the window
            person(1, "Ana", MembershipType::Monthly, days_ago(today, 22)),
            // due in 7 days, on the window edge
            person(2, "Bruno", MembershipType::Monthly, days_ago(today, 23)),
            // due today
            person(3, "Carla", MembershipType::Monthly, days_ago(today, 30)),
            // overdue
            person(4, "Diego", MembershipType::Monthly, days_ago(today, 35)),
            person(5, "Eva", MembershipType::Daily, days_ago(today, 30)),
        ];
        let reminders = payment_reminders(&people, today, 7, &policy);
        assert_eq!(reminders.iter().map(|r| (r.person_id, r.days_until_due)).collect::<Vec<_>>(), vec![(3, 0), (2, 7)]);
        assert_eq!(reminders[1].due_date, parse_date("2025-06-22").unwrap());
    }

    #[test]
    fn test_custom_period() {
        let today = parse_date("2025-06-15").unwrap();
        let policy = PaymentPolicy { period_days: 7 };
        let p = person(1, "Ana", MembershipType::Monthly, days_ago(today, 8));
        assert_eq!(payment_status(&p, today, &policy), PaymentStatus::Overdue);
    }
}
