use log::debug;
use sqlx::{query_as, SqlitePool};
use crate::attendance::{load_attendance, upsert_attendance};
use crate::catalog::{load_activities, load_instructors, load_spaces};
use crate::ledger::{CreditChange, LedgerError, LedgerUpdate};
use crate::payments::load_payments;
use crate::people::{load_people, RecoveryCredits};
use crate::sessions::load_sessions;
use crate::studio::StudioSnapshot;

/// Persistence boundary of the ledger.
#[rocket::async_trait]
pub trait StudioStore: Send + Sync {
    async fn load_snapshot(&self) -> anyhow::Result<StudioSnapshot>;
    /// Saves the whole update or nothing.
    async fn save_ledger_update(&self, update: &LedgerUpdate) -> anyhow::Result<()>;
}

#[rocket::async_trait]
impl StudioStore for SqlitePool {
    async fn load_snapshot(&self) -> anyhow::Result<StudioSnapshot> {
        let snapshot = StudioSnapshot {
            sessions: load_sessions(self).await?,
            people: load_people(self).await?,
            payments: load_payments(self).await?,
            activities: load_activities(self).await?,
            instructors: load_instructors(self).await?,
            spaces: load_spaces(self).await?,
            ..Default::default()
        }.with_attendance(load_attendance(self).await?);
        Ok(snapshot)
    }

    async fn save_ledger_update(&self, update: &LedgerUpdate) -> anyhow::Result<()> {
        let mut txn = self.begin().await?;
        if let Some(rec) = &update.attendance {
            upsert_attendance(&mut *txn, rec).await?;
        }
        // credits are merged into the stored set, not copied from the snapshot
        for change in &update.credits {
            let person_id = change.person_id();
            let (mut credits, ): (RecoveryCredits, ) = query_as("SELECT recovery_credits FROM people WHERE id=?")
                .bind(person_id)
                .fetch_one(&mut *txn).await?;
            if !change.apply_to(&mut credits) {
                if let CreditChange::Redeemed { credit, .. } = change {
                    return Err(LedgerError::CreditNotFound { person_id, session_id: credit.session_id, date: credit.date }.into())
                }
            }
            sqlx::query("UPDATE people SET recovery_credits=? WHERE id=?")
                .bind(&credits)
                .bind(person_id)
                .execute(&mut *txn).await?;
        }
        txn.commit().await?;
        debug!("Ledger update saved, attendance: {}, credit changes: {}", update.attendance.is_some(), update.credits.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::AttendanceRecord;
    use crate::db::test_pool;
    use crate::ledger::cancel_occurrence;
    use crate::people::{insert_person, load_person, MembershipType, NewPerson, RecoveryCredit};
    use crate::sessions::{insert_session, NewSession};
    use crate::studiotime::{parse_date, DayOfWeek, SessionTime};

    async fn studio_with_two_sessions(pool: &SqlitePool) -> i64 {
        let person_id = insert_person(pool, &NewPerson {
            name: "Ana".to_string(),
            phone: String::new(),
            email: String::new(),
            membership_type: MembershipType::Monthly,
            last_payment_date: None,
        }).await.unwrap();
        for (day_of_week, hour) in [(DayOfWeek::Monday, 9), (DayOfWeek::Wednesday, 18)] {
            insert_session(pool, &NewSession {
                activity_id: 1,
                instructor_id: 1,
                space_id: 1,
                day_of_week,
                time: SessionTime::from_hm(hour, 0).unwrap(),
                person_ids: [person_id].into_iter().collect(),
            }).await.unwrap();
        }
        person_id
    }

    #[rocket::async_test]
    async fn test_concurrent_cancels_keep_both_credits() {
        let pool = test_pool().await;
        let person_id = studio_with_two_sessions(&pool).await;
        // both updates are computed from the same snapshot
        let studio = pool.load_snapshot().await.unwrap();
        let monday = parse_date("2025-03-03").unwrap();
        let wednesday = parse_date("2025-03-05").unwrap();
        let first = cancel_occurrence(&studio, studio.session(1).unwrap(), monday, true);
        let second = cancel_occurrence(&studio, studio.session(2).unwrap(), wednesday, true);
        pool.save_ledger_update(&first).await.unwrap();
        pool.save_ledger_update(&second).await.unwrap();

        let person = load_person(&pool, person_id).await.unwrap();
        assert_eq!(person.recovery_credits.len(), 2);
        assert!(person.recovery_credits.contains(&RecoveryCredit { session_id: 1, date: monday }));
        assert!(person.recovery_credits.contains(&RecoveryCredit { session_id: 2, date: wednesday }));
    }

    #[rocket::async_test]
    async fn test_redeeming_missing_credit_saves_nothing() {
        let pool = test_pool().await;
        let person_id = studio_with_two_sessions(&pool).await;
        let monday = parse_date("2025-03-03").unwrap();
        let update = LedgerUpdate {
            attendance: Some(AttendanceRecord::new(1, monday)),
            credits: vec![CreditChange::Redeemed { person_id, credit: RecoveryCredit { session_id: 1, date: monday } }],
        };
        let err = pool.save_ledger_update(&update).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<LedgerError>(), Some(LedgerError::CreditNotFound { .. })));
        assert!(load_attendance(&pool).await.unwrap().is_empty());
    }
}
