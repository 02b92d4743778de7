//! Scenario: the scheduler lease admits a single live holder.
//!
//! # Invariants under test
//!
//! 1. First acquire wins; a second owner is refused while the lease lives.
//! 2. The holder renews without losing the lease.
//! 3. An expired lease is taken over by the next caller in one statement.
//! 4. Release only works for the current owner and frees the lease
//!    immediately.
//!
//! Skipped when PFD_DATABASE_URL is unset.

use chrono::{Duration, TimeZone, Utc};
use pfd_db::alerts::{acquire_scheduler_lease, get_scheduler_lease, release_scheduler_lease};
use pfd_testkit::{db_guard, reset_tables, try_db_pool};

const LEASE: &str = "preflight_alerts_scheduler:alerts";

#[tokio::test]
async fn lease_has_at_most_one_live_owner() {
    let _guard = db_guard().await;
    let Some(pool) = try_db_pool().await else {
        return;
    };
    reset_tables(&pool).await;

    let t0 = Utc.with_ymd_and_hms(2026, 2, 22, 12, 0, 0).unwrap();

    assert!(acquire_scheduler_lease(&pool, LEASE, "owner-a", 60, t0).await.unwrap());
    assert!(
        !acquire_scheduler_lease(&pool, LEASE, "owner-b", 60, t0 + Duration::seconds(1))
            .await
            .unwrap(),
        "second owner must be refused while the lease lives"
    );

    // The holder renews and extends expiry.
    assert!(
        acquire_scheduler_lease(&pool, LEASE, "owner-a", 60, t0 + Duration::seconds(30))
            .await
            .unwrap()
    );
    let lease = get_scheduler_lease(&pool, LEASE).await.unwrap().unwrap();
    assert_eq!(lease.owner_id, "owner-a");
    assert_eq!(lease.expires_at, t0 + Duration::seconds(90));

    // After expiry, the next caller takes over.
    assert!(
        acquire_scheduler_lease(&pool, LEASE, "owner-b", 60, t0 + Duration::seconds(91))
            .await
            .unwrap()
    );
    let lease = get_scheduler_lease(&pool, LEASE).await.unwrap().unwrap();
    assert_eq!(lease.owner_id, "owner-b");
}

#[tokio::test]
async fn release_frees_the_lease_for_its_owner_only() {
    let _guard = db_guard().await;
    let Some(pool) = try_db_pool().await else {
        return;
    };
    reset_tables(&pool).await;

    let t0 = Utc.with_ymd_and_hms(2026, 2, 22, 12, 0, 0).unwrap();
    assert!(acquire_scheduler_lease(&pool, LEASE, "owner-a", 120, t0).await.unwrap());

    // A stranger cannot release someone else's lease.
    assert!(!release_scheduler_lease(&pool, LEASE, "owner-b", t0 + Duration::seconds(1))
        .await
        .unwrap());
    assert!(!acquire_scheduler_lease(&pool, LEASE, "owner-b", 60, t0 + Duration::seconds(2))
        .await
        .unwrap());

    // The owner releases; the very next caller acquires.
    assert!(release_scheduler_lease(&pool, LEASE, "owner-a", t0 + Duration::seconds(3))
        .await
        .unwrap());
    assert!(acquire_scheduler_lease(&pool, LEASE, "owner-b", 60, t0 + Duration::seconds(4))
        .await
        .unwrap());
}

#[tokio::test]
async fn distinct_lease_names_are_independent() {
    let _guard = db_guard().await;
    let Some(pool) = try_db_pool().await else {
        return;
    };
    reset_tables(&pool).await;

    let t0 = Utc.with_ymd_and_hms(2026, 2, 22, 12, 0, 0).unwrap();
    assert!(acquire_scheduler_lease(&pool, "base:alerts", "owner-a", 60, t0).await.unwrap());
    assert!(
        acquire_scheduler_lease(&pool, "base:notifications", "owner-b", 60, t0)
            .await
            .unwrap(),
        "the notifications lease is arbitrated separately"
    );
}
