use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use sqlx::FromRow;

use super::{
    EventRepository, RepositoryError, RepositoryResult, ReservationConflict,
    ReservationRepository, UserRepository,
};
use crate::models::{
    Event, EventCancellation, EventId, NewReservation, PageRequest, Reservation,
    ReservationFilter, ReservationId, ReservationScope, ReservationSort, Role, SeatLayout, User,
    UserId,
};

const EVENT_COLUMNS: &str = "id, organizer_id, title, description, location, starts_at, ends_at, \
     nb_places, age_min, age_max, price, image, layout_type, layout_rows, layout_cols, \
     cancelled, cancellation_reason, cancelled_at, created_at";

const RESERVATION_COLUMNS: &str = "id, created_at, status, participant_id, event_id, seat_label, \
     stripe_checkout_session_id, amount_paid, scanned_at";

const USER_COLUMNS: &str = "id, first_name, last_name, email, phone, birth_date, roles";

const SEARCH_COLUMNS: &str = "r.id, r.created_at, r.status, r.participant_id, r.event_id, \
     r.seat_label, r.stripe_checkout_session_id, r.amount_paid, r.scanned_at";

// $1 participant, $2 organizer, $3 LIKE pattern, $4 status, $5..$6 booking window.
const SEARCH_FROM: &str = "FROM reservations r \
     JOIN events e ON e.id = r.event_id \
     JOIN users p ON p.id = r.participant_id \
     WHERE ($1::BIGINT IS NULL OR r.participant_id = $1) \
       AND ($2::BIGINT IS NULL OR e.organizer_id = $2) \
       AND ($3::TEXT IS NULL OR LOWER(e.title) LIKE $3 OR LOWER(e.location) LIKE $3 \
            OR LOWER(p.last_name) LIKE $3 OR LOWER(p.first_name) LIKE $3 \
            OR LOWER(p.email) LIKE $3) \
       AND ($4::TEXT IS NULL OR r.status = $4) \
       AND ($5::TIMESTAMPTZ IS NULL OR r.created_at >= $5) \
       AND ($6::TIMESTAMPTZ IS NULL OR r.created_at <= $6)";

const PAIR_CONSTRAINT: &str = "reservations_event_participant_key";
const SEAT_CONSTRAINT: &str = "reservations_event_seat_key";
const SESSION_CONSTRAINT: &str = "reservations_checkout_session_key";

#[derive(Debug, FromRow)]
struct EventRow {
    id: i64,
    organizer_id: i64,
    title: String,
    description: String,
    location: String,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    nb_places: i32,
    age_min: Option<i32>,
    age_max: Option<i32>,
    price: Option<Decimal>,
    image: Option<String>,
    layout_type: Option<String>,
    layout_rows: Option<i32>,
    layout_cols: Option<i32>,
    cancelled: bool,
    cancellation_reason: Option<String>,
    cancelled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        let layout = match (row.layout_type, row.layout_rows, row.layout_cols) {
            (Some(kind), Some(rows), Some(cols)) if !kind.is_empty() => {
                Some(SeatLayout { kind, rows, cols })
            }
            _ => None,
        };
        let cancellation = row.cancelled.then(|| EventCancellation {
            reason: row.cancellation_reason.unwrap_or_default(),
            cancelled_at: row.cancelled_at.unwrap_or(row.created_at),
        });

        Event {
            id: row.id,
            organizer_id: row.organizer_id,
            title: row.title,
            description: row.description,
            location: row.location,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            nb_places: row.nb_places,
            age_min: row.age_min,
            age_max: row.age_max,
            price: row.price,
            image: row.image,
            layout,
            cancellation,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ReservationRow {
    id: i64,
    created_at: DateTime<Utc>,
    status: String,
    participant_id: i64,
    event_id: i64,
    seat_label: Option<String>,
    stripe_checkout_session_id: Option<String>,
    amount_paid: Option<i64>,
    scanned_at: Option<DateTime<Utc>>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = RepositoryError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(RepositoryError::Corrupt)?;
        Ok(Reservation {
            id: row.id,
            created_at: row.created_at,
            status,
            participant_id: row.participant_id,
            event_id: row.event_id,
            seat_label: row.seat_label,
            checkout_session_id: row.stripe_checkout_session_id,
            amount_paid: row.amount_paid,
            scanned_at: row.scanned_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    first_name: String,
    last_name: String,
    email: String,
    phone: Option<String>,
    birth_date: Option<NaiveDate>,
    roles: Vec<String>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        let roles = row
            .roles
            .iter()
            .filter_map(|raw| match raw.parse::<Role>() {
                Ok(role) => Some(role),
                Err(e) => {
                    tracing::warn!(user_id = row.id, error = %e, "Ignoring unknown role");
                    None
                }
            })
            .collect();

        User {
            id: row.id,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            phone: row.phone,
            birth_date: row.birth_date,
            roles,
        }
    }
}

fn to_reservations(rows: Vec<ReservationRow>) -> RepositoryResult<Vec<Reservation>> {
    rows.into_iter().map(Reservation::try_from).collect()
}

fn to_reservation(row: Option<ReservationRow>) -> RepositoryResult<Option<Reservation>> {
    row.map(Reservation::try_from).transpose()
}

/// Lowercased substring pattern with LIKE wildcards escaped.
fn like_pattern(search: &str) -> String {
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for c in search.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn order_by(sort: ReservationSort) -> &'static str {
    match sort {
        ReservationSort::DateDesc => "r.created_at DESC, r.id DESC",
        ReservationSort::DateAsc => "r.created_at ASC, r.id DESC",
        ReservationSort::EventDateDesc => "e.starts_at DESC, r.id DESC",
        ReservationSort::EventDateAsc => "e.starts_at ASC, r.id DESC",
    }
}

/// Turns unique-constraint violations into the conflict they stand for.
fn map_insert_error(err: sqlx::Error, seat_label: Option<&str>) -> RepositoryError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            match db_err.constraint() {
                Some(PAIR_CONSTRAINT) => return ReservationConflict::AlreadyReserved.into(),
                Some(SEAT_CONSTRAINT) => {
                    return ReservationConflict::SeatTaken(seat_label.unwrap_or_default().to_string())
                        .into()
                }
                Some(SESSION_CONSTRAINT) => return ReservationConflict::SessionAlreadyUsed.into(),
                _ => {}
            }
        }
    }
    RepositoryError::Database(err)
}

/// Postgres-backed store. Uniqueness is carried by table constraints and
/// capacity by locking the event row for the duration of an insert.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRepository for PgStore {
    async fn find_event(&self, id: EventId) -> RepositoryResult<Option<Event>> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Event::from))
    }

    async fn cancel_event(
        &self,
        id: EventId,
        cancellation: EventCancellation,
    ) -> RepositoryResult<Option<Event>> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "UPDATE events \
             SET cancelled = TRUE, cancellation_reason = $2, cancelled_at = $3 \
             WHERE id = $1 AND cancelled = FALSE \
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(id)
        .bind(&cancellation.reason)
        .bind(cancellation.cancelled_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Event::from))
    }

    async fn delete_event(&self, id: EventId) -> RepositoryResult<bool> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<i64> =
            sqlx::query_scalar("SELECT id FROM events WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Ok(false);
        }

        let reservations: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM reservations WHERE event_id = $1")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        if reservations > 0 {
            return Err(ReservationConflict::EventHasReservations.into());
        }

        sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(true)
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn find_user(&self, id: UserId) -> RepositoryResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }
}

#[async_trait]
impl ReservationRepository for PgStore {
    async fn find(&self, id: ReservationId) -> RepositoryResult<Option<Reservation>> {
        let row = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        to_reservation(row)
    }

    async fn find_by_session(&self, session_id: &str) -> RepositoryResult<Option<Reservation>> {
        let row = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE stripe_checkout_session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        to_reservation(row)
    }

    async fn find_for_participant(
        &self,
        event_id: EventId,
        participant_id: UserId,
    ) -> RepositoryResult<Option<Reservation>> {
        let row = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE event_id = $1 AND participant_id = $2"
        ))
        .bind(event_id)
        .bind(participant_id)
        .fetch_optional(&self.pool)
        .await?;

        to_reservation(row)
    }

    async fn find_by_seat(
        &self,
        event_id: EventId,
        seat_label: &str,
    ) -> RepositoryResult<Option<Reservation>> {
        let row = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE event_id = $1 AND seat_label = $2"
        ))
        .bind(event_id)
        .bind(seat_label)
        .fetch_optional(&self.pool)
        .await?;

        to_reservation(row)
    }

    async fn count_for_event(&self, event_id: EventId) -> RepositoryResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM reservations WHERE event_id = $1")
                .bind(event_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    async fn list_for_event(&self, event_id: EventId) -> RepositoryResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE event_id = $1 ORDER BY id"
        ))
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        to_reservations(rows)
    }

    async fn search(
        &self,
        filter: &ReservationFilter,
        page: PageRequest,
    ) -> RepositoryResult<(Vec<Reservation>, i64)> {
        let (participant_id, organizer_id) = match filter.scope {
            ReservationScope::Participant(id) => (Some(id), None),
            ReservationScope::EventsOf(id) => (None, Some(id)),
            ReservationScope::All => (None, None),
        };
        let pattern = filter.search.as_deref().map(like_pattern);
        let status = filter.status.map(|status| status.as_str());

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {SEARCH_FROM}"))
            .bind(participant_id)
            .bind(organizer_id)
            .bind(&pattern)
            .bind(status)
            .bind(filter.booked_from)
            .bind(filter.booked_until)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {SEARCH_COLUMNS} {SEARCH_FROM} ORDER BY {} LIMIT $7 OFFSET $8",
            order_by(filter.sort)
        ))
        .bind(participant_id)
        .bind(organizer_id)
        .bind(&pattern)
        .bind(status)
        .bind(filter.booked_from)
        .bind(filter.booked_until)
        .bind(i64::from(page.per_page))
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok((to_reservations(rows)?, total))
    }

    async fn insert(&self, reservation: NewReservation) -> RepositoryResult<Reservation> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent bookings of the same event so the
        // recount below cannot be raced.
        let capacity: Option<i32> =
            sqlx::query_scalar("SELECT nb_places FROM events WHERE id = $1 FOR UPDATE")
                .bind(reservation.event_id)
                .fetch_optional(&mut *tx)
                .await?;
        let capacity = capacity.ok_or(ReservationConflict::EventNotFound(reservation.event_id))?;

        let taken: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM reservations WHERE event_id = $1")
                .bind(reservation.event_id)
                .fetch_one(&mut *tx)
                .await?;
        if taken >= i64::from(capacity) {
            return Err(ReservationConflict::EventFull.into());
        }

        let row = sqlx::query_as::<_, ReservationRow>(&format!(
            "INSERT INTO reservations \
             (event_id, participant_id, seat_label, status, created_at, \
              stripe_checkout_session_id, amount_paid) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {RESERVATION_COLUMNS}"
        ))
        .bind(reservation.event_id)
        .bind(reservation.participant_id)
        .bind(&reservation.seat_label)
        .bind(reservation.status.as_str())
        .bind(reservation.created_at)
        .bind(&reservation.checkout_session_id)
        .bind(reservation.amount_paid)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_insert_error(e, reservation.seat_label.as_deref()))?;

        tx.commit().await?;

        Reservation::try_from(row)
    }

    async fn confirm_pending(
        &self,
        id: ReservationId,
        session_id: &str,
        amount_paid: i64,
    ) -> RepositoryResult<Option<Reservation>> {
        let row = sqlx::query_as::<_, ReservationRow>(&format!(
            "UPDATE reservations \
             SET status = 'CONFIRMED', stripe_checkout_session_id = $2, amount_paid = $3 \
             WHERE id = $1 AND status = 'PENDING' AND stripe_checkout_session_id IS NULL \
             RETURNING {RESERVATION_COLUMNS}"
        ))
        .bind(id)
        .bind(session_id)
        .bind(amount_paid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, None))?;

        to_reservation(row)
    }

    async fn delete(&self, id: ReservationId) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM reservations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_if_pending(&self, id: ReservationId) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM reservations WHERE id = $1 AND status = 'PENDING'")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_scanned(
        &self,
        id: ReservationId,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Option<Reservation>> {
        let row = sqlx::query_as::<_, ReservationRow>(&format!(
            "UPDATE reservations SET scanned_at = $2 \
             WHERE id = $1 AND scanned_at IS NULL \
             RETURNING {RESERVATION_COLUMNS}"
        ))
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        to_reservation(row)
    }
}
