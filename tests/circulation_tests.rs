//! Circulation integration tests
//!
//! These run against a live Postgres database (DATABASE_URL) and are ignored
//! by default. Run with: cargo test -- --ignored

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::sync::Arc;

use biblion_circulation::{
    clock::FixedClock,
    config::CirculationPolicy,
    error::AppError,
    models::{copy::CopyStatus, loan::CreateLoan, reservation::ReservationStatus},
    repository::Repository,
    services::{notifier::NullNotifier, Services},
};

async fn connect() -> Pool<Postgres> {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must point at a test database");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("Failed to connect to database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

fn services_at(repository: Repository, now: DateTime<Utc>) -> Services {
    services_with_policy(repository, now, CirculationPolicy::default())
}

fn services_with_policy(
    repository: Repository,
    now: DateTime<Utc>,
    policy: CirculationPolicy,
) -> Services {
    Services::new(repository, policy, Arc::new(NullNotifier), Arc::new(FixedClock(now)))
}

async fn create_book(pool: &Pool<Postgres>, title: &str) -> i32 {
    sqlx::query_scalar("INSERT INTO books (title) VALUES ($1) RETURNING id")
        .bind(title)
        .fetch_one(pool)
        .await
        .expect("Failed to create book")
}

async fn create_user(pool: &Pool<Postgres>, staff: bool) -> i32 {
    sqlx::query_scalar("INSERT INTO users (staff, email) VALUES ($1, $2) RETURNING id")
        .bind(staff)
        .bind("reader@example.org")
        .fetch_one(pool)
        .await
        .expect("Failed to create user")
}

async fn create_copy(pool: &Pool<Postgres>, book_id: i32, suffix: i32) -> i32 {
    let copy_id: i32 = sqlx::query_scalar(
        "INSERT INTO copies (book_id, inventory_code) VALUES ($1, $2) RETURNING id",
    )
    .bind(book_id)
    .bind(format!("B{}-C{}", book_id, suffix))
    .fetch_one(pool)
    .await
    .expect("Failed to create copy");

    sqlx::query(
        r#"
        UPDATE books SET
            available_copies = (SELECT COUNT(*) FROM copies WHERE book_id = $1 AND status = 0),
            total_copies = (SELECT COUNT(*) FROM copies WHERE book_id = $1 AND status <> 3)
        WHERE id = $1
        "#,
    )
    .bind(book_id)
    .execute(pool)
    .await
    .expect("Failed to seed counters");

    copy_id
}

fn borrow(user_id: i32, book_id: i32) -> CreateLoan {
    CreateLoan {
        user_id,
        book_id,
        reservation_id: None,
        copy_id: None,
        preferred_access_types: Vec::new(),
    }
}

async fn copy_status(pool: &Pool<Postgres>, copy_id: i32) -> i16 {
    sqlx::query_scalar("SELECT status FROM copies WHERE id = $1")
        .bind(copy_id)
        .fetch_one(pool)
        .await
        .expect("Failed to read copy status")
}

async fn available_counter(pool: &Pool<Postgres>, book_id: i32) -> i32 {
    sqlx::query_scalar("SELECT available_copies FROM books WHERE id = $1")
        .bind(book_id)
        .fetch_one(pool)
        .await
        .expect("Failed to read counter")
}

// Scenario A: return releases the copy and promotes the next hold in the
// same request; the freed copy is never visible as AVAILABLE.
#[tokio::test]
#[ignore]
async fn return_promotes_waiting_reservation() {
    let pool = connect().await;
    let repository = Repository::new(pool.clone());
    let now = Utc::now();
    let services = services_at(repository.clone(), now);

    let book_id = create_book(&pool, "Scenario A").await;
    let copy_id = create_copy(&pool, book_id, 1).await;
    let reader1 = create_user(&pool, false).await;
    let reader2 = create_user(&pool, false).await;

    let loan = services.loans.create_loan(&borrow(reader1, book_id)).await.unwrap();
    assert_eq!(loan.copy_id, copy_id);
    assert_eq!(copy_status(&pool, copy_id).await, CopyStatus::Loaned as i16);
    assert_eq!(available_counter(&pool, book_id).await, 0);

    let reservation = services.reservations.enqueue(reader2, book_id).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Active);

    services.loans.return_loan(loan.id, reader1).await.unwrap();

    let promoted = repository.reservations.get_by_id(reservation.id).await.unwrap();
    assert_eq!(promoted.status, ReservationStatus::Ready);
    assert_eq!(promoted.copy_id, Some(copy_id));
    assert!(promoted.expires_at.is_some());

    // copy is held for the reservation, not available
    assert_eq!(copy_status(&pool, copy_id).await, CopyStatus::Reserved as i16);
    assert_eq!(available_counter(&pool, book_id).await, 0);

    // the freed copy went to the hold, not the shelf: a borrow arriving
    // after the return cannot slip past the queue
    let reader3 = create_user(&pool, false).await;
    let bypass = services.loans.create_loan(&borrow(reader3, book_id)).await;
    assert!(matches!(bypass.unwrap_err(), AppError::NoCopyAvailable(_)));
}

// Scenario B: an uncollected READY hold expires and the copy cascades to the
// next waiter; running the sweep again is a no-op.
#[tokio::test]
#[ignore]
async fn expiry_cascades_to_next_reservation_and_is_idempotent() {
    let pool = connect().await;
    let repository = Repository::new(pool.clone());
    let now = Utc::now();
    let services = services_at(repository.clone(), now);

    let book_id = create_book(&pool, "Scenario B").await;
    let copy_id = create_copy(&pool, book_id, 1).await;
    let borrower = create_user(&pool, false).await;
    let first = create_user(&pool, false).await;
    let second = create_user(&pool, false).await;

    let loan = services.loans.create_loan(&borrow(borrower, book_id)).await.unwrap();
    let r1 = services.reservations.enqueue(first, book_id).await.unwrap();
    let r2 = services.reservations.enqueue(second, book_id).await.unwrap();

    // return promotes the first reservation
    services.loans.return_loan(loan.id, borrower).await.unwrap();
    assert_eq!(
        repository.reservations.get_by_id(r1.id).await.unwrap().status,
        ReservationStatus::Ready
    );

    // move past the pickup window and sweep
    let later = now + Duration::hours(72);
    let late_services = services_at(repository.clone(), later);
    let summary = late_services.reservations.expire_sweep(false).await.unwrap();
    assert_eq!(summary.expired, 1);
    assert_eq!(summary.promoted, 1);

    let expired = repository.reservations.get_by_id(r1.id).await.unwrap();
    assert_eq!(expired.status, ReservationStatus::Expired);
    assert_eq!(expired.copy_id, None);

    let promoted = repository.reservations.get_by_id(r2.id).await.unwrap();
    assert_eq!(promoted.status, ReservationStatus::Ready);
    assert_eq!(promoted.copy_id, Some(copy_id));

    // second pass finds nothing to do
    let again = late_services.reservations.expire_sweep(false).await.unwrap();
    assert_eq!(again.expired, 0);
    assert_eq!(again.promoted, 0);
}

// Scenario C: assessment creates the fine once, then updates the same row as
// lateness grows; re-running with the same clock changes nothing.
#[tokio::test]
#[ignore]
async fn overdue_assessment_is_idempotent_and_updates_in_place() {
    let pool = connect().await;
    let repository = Repository::new(pool.clone());
    let now = Utc::now();
    let services = services_at(repository.clone(), now);

    let book_id = create_book(&pool, "Scenario C").await;
    create_copy(&pool, book_id, 1).await;
    let reader = create_user(&pool, false).await;

    let loan = services.loans.create_loan(&borrow(reader, book_id)).await.unwrap();
    // push the due date 10 days into the past
    sqlx::query("UPDATE loans SET due_at = $2 WHERE id = $1")
        .bind(loan.id)
        .bind(now - Duration::days(10))
        .execute(&pool)
        .await
        .unwrap();

    let assess = services_at(repository.clone(), now);
    let first = assess.fines.assess_overdue(false).await.unwrap();
    assert_eq!(first.created, 1);

    let fine = repository
        .fines
        .find_active_overdue_for_loan(loan.id)
        .await
        .unwrap()
        .expect("fine should exist");
    assert_eq!(fine.amount, Decimal::new(1500, 2)); // 10 * 1.50

    // same day, same clock: nothing changes, no second row
    let rerun = assess.fines.assess_overdue(false).await.unwrap();
    assert_eq!(rerun.created, 0);
    assert_eq!(rerun.updated, 0);

    // next day: the same fine grows to 16.50
    let tomorrow = services_at(repository.clone(), now + Duration::days(1));
    let next = tomorrow.fines.assess_overdue(false).await.unwrap();
    assert_eq!(next.created, 0);
    assert_eq!(next.updated, 1);

    let updated = repository
        .fines
        .find_active_overdue_for_loan(loan.id)
        .await
        .unwrap()
        .expect("fine should still exist");
    assert_eq!(updated.id, fine.id);
    assert_eq!(updated.amount, Decimal::new(1650, 2));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fines WHERE loan_id = $1")
        .bind(loan.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

// Scenario D: delinquency blocks once with a reason citing the fines; a
// re-run neither re-blocks nor rewrites the reason.
#[tokio::test]
#[ignore]
async fn delinquency_blocks_once_and_keeps_the_reason() {
    let pool = connect().await;
    let repository = Repository::new(pool.clone());
    let now = Utc::now();
    let services = services_at(repository.clone(), now);

    let book_id = create_book(&pool, "Scenario D").await;
    create_copy(&pool, book_id, 1).await;
    let reader = create_user(&pool, false).await;

    let loan = services.loans.create_loan(&borrow(reader, book_id)).await.unwrap();
    sqlx::query(
        "INSERT INTO fines (loan_id, kind, amount, currency, reason, created_at) VALUES ($1, 0, 60.00, 'PLN', 'Overdue loan', $2)",
    )
    .bind(loan.id)
    .bind(now)
    .execute(&pool)
    .await
    .unwrap();

    let summary = services.delinquency.enforce(false).await.unwrap();
    assert_eq!(summary.blocked, 1);

    let standing = repository.users.standing(reader).await.unwrap();
    assert!(standing.blocked);
    let reason = standing.blocked_reason.clone().unwrap();
    assert!(reason.contains("60.00 PLN"), "reason was: {}", reason);

    // one-way gate: the second run changes nothing
    let rerun = services.delinquency.enforce(false).await.unwrap();
    assert_eq!(rerun.blocked, 0);
    let after = repository.users.standing(reader).await.unwrap();
    assert_eq!(after.blocked_reason.unwrap(), reason);
    assert_eq!(after.blocked_at, standing.blocked_at);
}

// Two concurrent borrows against the last copy: exactly one wins.
#[tokio::test]
#[ignore]
async fn concurrent_claims_never_double_loan_a_copy() {
    let pool = connect().await;
    let repository = Repository::new(pool.clone());
    let now = Utc::now();
    let services = services_at(repository.clone(), now);

    let book_id = create_book(&pool, "Last copy race").await;
    let copy_id = create_copy(&pool, book_id, 1).await;
    let reader1 = create_user(&pool, false).await;
    let reader2 = create_user(&pool, false).await;

    let req1 = borrow(reader1, book_id);
    let req2 = borrow(reader2, book_id);
    let (a, b) = tokio::join!(
        services.loans.create_loan(&req1),
        services.loans.create_loan(&req2),
    );

    let outcomes = [a, b];
    let winners = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one claim must succeed");
    let loser = outcomes.iter().find(|r| r.is_err()).unwrap();
    assert!(matches!(loser.as_ref().unwrap_err(), AppError::NoCopyAvailable(_)));

    let open_loans: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM loans WHERE copy_id = $1 AND returned_at IS NULL",
    )
    .bind(copy_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(open_loans, 1);
    assert_eq!(available_counter(&pool, book_id).await, 0);
}

// Counters are recomputed from copy rows after every transition and never
// drift across a borrow / reserve / expire / return cycle.
#[tokio::test]
#[ignore]
async fn counters_always_match_recount() {
    let pool = connect().await;
    let repository = Repository::new(pool.clone());
    let now = Utc::now();
    let services = services_at(repository.clone(), now);

    let book_id = create_book(&pool, "Counter drift").await;
    create_copy(&pool, book_id, 1).await;
    create_copy(&pool, book_id, 2).await;
    let reader1 = create_user(&pool, false).await;
    let reader2 = create_user(&pool, false).await;
    let reader3 = create_user(&pool, false).await;

    let check = |pool: Pool<Postgres>, book_id: i32| async move {
        let cached: i32 = sqlx::query_scalar("SELECT available_copies FROM books WHERE id = $1")
            .bind(book_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        let actual: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM copies WHERE book_id = $1 AND status = 0")
                .bind(book_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(cached as i64, actual);
    };

    let l1 = services.loans.create_loan(&borrow(reader1, book_id)).await.unwrap();
    check(pool.clone(), book_id).await;

    let l2 = services.loans.create_loan(&borrow(reader2, book_id)).await.unwrap();
    check(pool.clone(), book_id).await;

    services.reservations.enqueue(reader3, book_id).await.unwrap();
    services.loans.return_loan(l1.id, reader1).await.unwrap();
    check(pool.clone(), book_id).await;

    let later = services_at(repository.clone(), now + Duration::hours(72));
    later.reservations.expire_sweep(false).await.unwrap();
    check(pool.clone(), book_id).await;

    services.loans.return_loan(l2.id, reader2).await.unwrap();
    check(pool.clone(), book_id).await;
}

// FIFO fairness: READY is granted in reserved_at order, skipping cancelled
// holds.
#[tokio::test]
#[ignore]
async fn promotion_follows_queue_order() {
    let pool = connect().await;
    let repository = Repository::new(pool.clone());
    let base = Utc::now();

    let book_id = create_book(&pool, "FIFO").await;
    create_copy(&pool, book_id, 1).await;
    let borrower = create_user(&pool, false).await;
    let readers = [
        create_user(&pool, false).await,
        create_user(&pool, false).await,
        create_user(&pool, false).await,
    ];

    let services = services_at(repository.clone(), base);
    let loan = services.loans.create_loan(&borrow(borrower, book_id)).await.unwrap();

    // enqueue at strictly increasing times
    let mut reservations = Vec::new();
    for (i, reader) in readers.iter().enumerate() {
        let at = services_at(repository.clone(), base + Duration::minutes(i as i64));
        reservations.push(at.reservations.enqueue(*reader, book_id).await.unwrap());
    }

    // the middle reader gives up
    services
        .reservations
        .cancel(reservations[1].id, readers[1])
        .await
        .unwrap();

    services.loans.return_loan(loan.id, borrower).await.unwrap();

    let first = repository.reservations.get_by_id(reservations[0].id).await.unwrap();
    assert_eq!(first.status, ReservationStatus::Ready);

    let skipped = repository.reservations.get_by_id(reservations[1].id).await.unwrap();
    assert_eq!(skipped.status, ReservationStatus::Cancelled);

    let waiting = repository.reservations.get_by_id(reservations[2].id).await.unwrap();
    assert_eq!(waiting.status, ReservationStatus::Active);
}

// A READY reservation is consumed by its pickup loan; a foreign reservation
// is refused.
#[tokio::test]
#[ignore]
async fn ready_reservation_pickup_and_ownership() {
    let pool = connect().await;
    let repository = Repository::new(pool.clone());
    let now = Utc::now();
    let services = services_at(repository.clone(), now);

    let book_id = create_book(&pool, "Pickup").await;
    let copy_id = create_copy(&pool, book_id, 1).await;
    let borrower = create_user(&pool, false).await;
    let holder = create_user(&pool, false).await;
    let stranger = create_user(&pool, false).await;

    let loan = services.loans.create_loan(&borrow(borrower, book_id)).await.unwrap();
    let reservation = services.reservations.enqueue(holder, book_id).await.unwrap();
    services.loans.return_loan(loan.id, borrower).await.unwrap();

    // a stranger cannot consume the hold
    let mut theft = borrow(stranger, book_id);
    theft.reservation_id = Some(reservation.id);
    let refused = services.loans.create_loan(&theft).await;
    assert!(matches!(refused.unwrap_err(), AppError::ReservationNotUsable(_)));

    // the holder picks it up
    let mut pickup = borrow(holder, book_id);
    pickup.reservation_id = Some(reservation.id);
    let pickup_loan = services.loans.create_loan(&pickup).await.unwrap();
    assert_eq!(pickup_loan.copy_id, copy_id);

    let fulfilled = repository.reservations.get_by_id(reservation.id).await.unwrap();
    assert_eq!(fulfilled.status, ReservationStatus::Fulfilled);
    assert_eq!(copy_status(&pool, copy_id).await, CopyStatus::Loaned as i16);
}

// Extension is denied while another reader waits, and anchored to the due
// date when granted.
#[tokio::test]
#[ignore]
async fn extension_rules() {
    let pool = connect().await;
    let repository = Repository::new(pool.clone());
    let now = Utc::now();
    let services = services_at(repository.clone(), now);

    let book_id = create_book(&pool, "Extension").await;
    create_copy(&pool, book_id, 1).await;
    let reader = create_user(&pool, false).await;
    let waiter = create_user(&pool, false).await;

    let loan = services.loans.create_loan(&borrow(reader, book_id)).await.unwrap();

    services.reservations.enqueue(waiter, book_id).await.unwrap();
    let denied = services.loans.extend_loan(loan.id, reader).await;
    assert!(matches!(denied.unwrap_err(), AppError::ExtensionDenied(_)));

    // waiter gives up; extension now goes through, measured from due_at
    let queue = repository.reservations.active_queue(book_id).await.unwrap();
    services.reservations.cancel(queue[0].id, waiter).await.unwrap();

    let extended = services.loans.extend_loan(loan.id, reader).await.unwrap();
    assert_eq!(extended.due_at, loan.due_at + Duration::days(21));
    assert_eq!(extended.renewals, 1);

    // renewal cap (default 1) is enforced
    let capped = services.loans.extend_loan(loan.id, reader).await;
    assert!(matches!(capped.unwrap_err(), AppError::ExtensionDenied(_)));
}

// Returning twice reports AlreadyReturned; a stranger cannot return at all,
// staff can.
#[tokio::test]
#[ignore]
async fn return_ownership_and_terminal_state() {
    let pool = connect().await;
    let repository = Repository::new(pool.clone());
    let now = Utc::now();
    let services = services_at(repository.clone(), now);

    let book_id = create_book(&pool, "Return rules").await;
    create_copy(&pool, book_id, 1).await;
    create_copy(&pool, book_id, 2).await;
    let reader = create_user(&pool, false).await;
    let stranger = create_user(&pool, false).await;
    let librarian = create_user(&pool, true).await;

    let loan = services.loans.create_loan(&borrow(reader, book_id)).await.unwrap();
    let refused = services.loans.return_loan(loan.id, stranger).await;
    assert!(matches!(refused.unwrap_err(), AppError::Forbidden(_)));

    // staff may return on the reader's behalf
    let returned = services.loans.return_loan(loan.id, librarian).await.unwrap();
    assert!(returned.returned_at.is_some());

    let again = services.loans.return_loan(loan.id, reader).await;
    assert!(matches!(again.unwrap_err(), AppError::AlreadyReturned));
}

// A book with free copies is borrowed rather than reserved; a reader holds
// one live reservation per book and at most the configured total.
#[tokio::test]
#[ignore]
async fn enqueue_guards() {
    let pool = connect().await;
    let repository = Repository::new(pool.clone());
    let now = Utc::now();

    let mut policy = CirculationPolicy::default();
    policy.reservation_limit = 1;
    let services = services_with_policy(repository.clone(), now, policy);

    let book1 = create_book(&pool, "Guards 1").await;
    create_copy(&pool, book1, 1).await;
    let book2 = create_book(&pool, "Guards 2").await;
    create_copy(&pool, book2, 1).await;
    let reader = create_user(&pool, false).await;
    let borrower = create_user(&pool, false).await;

    let refused = services.reservations.enqueue(reader, book1).await;
    match refused.unwrap_err() {
        AppError::BusinessRule(msg) => assert!(msg.contains("borrow instead"), "msg was: {}", msg),
        other => panic!("unexpected error: {}", other),
    }

    services.loans.create_loan(&borrow(borrower, book1)).await.unwrap();
    services.loans.create_loan(&borrow(borrower, book2)).await.unwrap();

    services.reservations.enqueue(reader, book1).await.unwrap();

    let duplicate = services.reservations.enqueue(reader, book1).await;
    match duplicate.unwrap_err() {
        AppError::BusinessRule(msg) => {
            assert!(msg.contains("already reserved"), "msg was: {}", msg)
        }
        other => panic!("unexpected error: {}", other),
    }

    // the cap counts live holds across all books
    let capped = services.reservations.enqueue(reader, book2).await;
    match capped.unwrap_err() {
        AppError::BusinessRule(msg) => {
            assert!(msg.contains("Maximum reservations"), "msg was: {}", msg)
        }
        other => panic!("unexpected error: {}", other),
    }
}

// Blocked accounts and the loan cap stop borrowing up front.
#[tokio::test]
#[ignore]
async fn borrow_gates() {
    let pool = connect().await;
    let repository = Repository::new(pool.clone());
    let now = Utc::now();

    let mut policy = CirculationPolicy::default();
    policy.loan_limit = 1;
    let services = services_with_policy(repository.clone(), now, policy);

    let book_id = create_book(&pool, "Gates").await;
    create_copy(&pool, book_id, 1).await;
    create_copy(&pool, book_id, 2).await;
    let reader = create_user(&pool, false).await;
    let blocked = create_user(&pool, false).await;
    repository.users.block(blocked, "manual", now).await.unwrap();

    let refused = services.loans.create_loan(&borrow(blocked, book_id)).await;
    assert!(matches!(refused.unwrap_err(), AppError::UserBlocked(_)));

    services.loans.create_loan(&borrow(reader, book_id)).await.unwrap();
    let over_limit = services.loans.create_loan(&borrow(reader, book_id)).await;
    assert!(matches!(
        over_limit.unwrap_err(),
        AppError::LoanLimitExceeded { current: 1, limit: 1 }
    ));
}
