use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

use super::{
    EventRepository, RepositoryResult, ReservationConflict, ReservationRepository, UserRepository,
};
use crate::models::{
    Event, EventCancellation, EventId, NewReservation, PageRequest, Reservation, ReservationFilter,
    ReservationId, ReservationScope, ReservationSort, ReservationStatus, User, UserId,
};

#[derive(Default)]
struct Arena {
    next_user_id: UserId,
    next_event_id: EventId,
    next_reservation_id: ReservationId,
    users: HashMap<UserId, User>,
    events: HashMap<EventId, Event>,
    reservations: HashMap<ReservationId, Reservation>,
    reservations_by_event: HashMap<EventId, BTreeSet<ReservationId>>,
}

impl Arena {
    fn of_event(&self, event_id: EventId) -> impl Iterator<Item = &Reservation> {
        self.reservations_by_event
            .get(&event_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.reservations.get(id))
    }

    fn remove_reservation(&mut self, id: ReservationId) -> Option<Reservation> {
        let removed = self.reservations.remove(&id)?;
        if let Some(ids) = self.reservations_by_event.get_mut(&removed.event_id) {
            ids.remove(&id);
        }
        Some(removed)
    }
}

/// Arena-backed store: entities keyed by id, relations in side indexes.
/// Every write runs under one lock, which gives the same atomicity the
/// Postgres constraints and row locks provide.
#[derive(Default)]
pub struct InMemoryStore {
    arena: RwLock<Arena>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a user under a fresh id and returns it.
    pub async fn insert_user(&self, mut user: User) -> User {
        let mut arena = self.arena.write().await;
        arena.next_user_id += 1;
        user.id = arena.next_user_id;
        arena.users.insert(user.id, user.clone());
        user
    }

    /// Stores an event under a fresh id, deriving capacity from its layout.
    pub async fn insert_event(&self, event: Event) -> Event {
        let mut event = event.normalized();
        let mut arena = self.arena.write().await;
        arena.next_event_id += 1;
        event.id = arena.next_event_id;
        arena.events.insert(event.id, event.clone());
        arena.reservations_by_event.entry(event.id).or_default();
        event
    }
}

#[async_trait]
impl EventRepository for InMemoryStore {
    async fn find_event(&self, id: EventId) -> RepositoryResult<Option<Event>> {
        Ok(self.arena.read().await.events.get(&id).cloned())
    }

    async fn cancel_event(
        &self,
        id: EventId,
        cancellation: EventCancellation,
    ) -> RepositoryResult<Option<Event>> {
        let mut arena = self.arena.write().await;
        match arena.events.get_mut(&id) {
            Some(event) if event.cancellation.is_none() => {
                event.cancellation = Some(cancellation);
                Ok(Some(event.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_event(&self, id: EventId) -> RepositoryResult<bool> {
        let mut arena = self.arena.write().await;
        if !arena.events.contains_key(&id) {
            return Ok(false);
        }
        if arena.of_event(id).next().is_some() {
            return Err(ReservationConflict::EventHasReservations.into());
        }
        arena.events.remove(&id);
        arena.reservations_by_event.remove(&id);
        Ok(true)
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn find_user(&self, id: UserId) -> RepositoryResult<Option<User>> {
        Ok(self.arena.read().await.users.get(&id).cloned())
    }
}

#[async_trait]
impl ReservationRepository for InMemoryStore {
    async fn find(&self, id: ReservationId) -> RepositoryResult<Option<Reservation>> {
        Ok(self.arena.read().await.reservations.get(&id).cloned())
    }

    async fn find_by_session(&self, session_id: &str) -> RepositoryResult<Option<Reservation>> {
        let arena = self.arena.read().await;
        Ok(arena
            .reservations
            .values()
            .find(|r| r.checkout_session_id.as_deref() == Some(session_id))
            .cloned())
    }

    async fn find_for_participant(
        &self,
        event_id: EventId,
        participant_id: UserId,
    ) -> RepositoryResult<Option<Reservation>> {
        let arena = self.arena.read().await;
        let found = arena
            .of_event(event_id)
            .find(|r| r.participant_id == participant_id)
            .cloned();
        Ok(found)
    }

    async fn find_by_seat(
        &self,
        event_id: EventId,
        seat_label: &str,
    ) -> RepositoryResult<Option<Reservation>> {
        let arena = self.arena.read().await;
        let found = arena
            .of_event(event_id)
            .find(|r| r.seat_label.as_deref() == Some(seat_label))
            .cloned();
        Ok(found)
    }

    async fn count_for_event(&self, event_id: EventId) -> RepositoryResult<i64> {
        Ok(self.arena.read().await.of_event(event_id).count() as i64)
    }

    async fn list_for_event(&self, event_id: EventId) -> RepositoryResult<Vec<Reservation>> {
        Ok(self.arena.read().await.of_event(event_id).cloned().collect())
    }

    async fn search(
        &self,
        filter: &ReservationFilter,
        page: PageRequest,
    ) -> RepositoryResult<(Vec<Reservation>, i64)> {
        let arena = self.arena.read().await;
        let needle = filter.search.as_deref().map(str::to_lowercase);

        let mut matching: Vec<(&Reservation, DateTime<Utc>)> = arena
            .reservations
            .values()
            .filter_map(|r| {
                let event = arena.events.get(&r.event_id)?;
                let in_scope = match filter.scope {
                    ReservationScope::Participant(id) => r.participant_id == id,
                    ReservationScope::EventsOf(id) => event.organizer_id == id,
                    ReservationScope::All => true,
                };
                if !in_scope || filter.status.is_some_and(|status| r.status != status) {
                    return None;
                }
                if filter.booked_from.is_some_and(|from| r.created_at < from)
                    || filter.booked_until.is_some_and(|until| r.created_at > until)
                {
                    return None;
                }
                if let Some(needle) = needle.as_deref() {
                    let participant = arena.users.get(&r.participant_id);
                    let found = [
                        Some(event.title.as_str()),
                        Some(event.location.as_str()),
                        participant.map(|p| p.last_name.as_str()),
                        participant.map(|p| p.first_name.as_str()),
                        participant.map(|p| p.email.as_str()),
                    ]
                    .into_iter()
                    .flatten()
                    .any(|text| text.to_lowercase().contains(needle));
                    if !found {
                        return None;
                    }
                }
                Some((r, event.starts_at))
            })
            .collect();

        matching.sort_by(|(a, a_starts), (b, b_starts)| {
            let primary = match filter.sort {
                ReservationSort::DateDesc => b.created_at.cmp(&a.created_at),
                ReservationSort::DateAsc => a.created_at.cmp(&b.created_at),
                ReservationSort::EventDateDesc => b_starts.cmp(a_starts),
                ReservationSort::EventDateAsc => a_starts.cmp(b_starts),
            };
            primary.then(b.id.cmp(&a.id))
        });

        let total = matching.len() as i64;
        let items: Vec<Reservation> = matching
            .into_iter()
            .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
            .take(page.per_page as usize)
            .map(|(r, _)| r.clone())
            .collect();
        Ok((items, total))
    }

    async fn insert(&self, new: NewReservation) -> RepositoryResult<Reservation> {
        let mut arena = self.arena.write().await;

        let capacity = arena
            .events
            .get(&new.event_id)
            .map(|event| i64::from(event.nb_places))
            .ok_or(ReservationConflict::EventNotFound(new.event_id))?;

        if arena
            .of_event(new.event_id)
            .any(|r| r.participant_id == new.participant_id)
        {
            return Err(ReservationConflict::AlreadyReserved.into());
        }
        if let Some(seat) = new.seat_label.as_deref() {
            if arena
                .of_event(new.event_id)
                .any(|r| r.seat_label.as_deref() == Some(seat))
            {
                return Err(ReservationConflict::SeatTaken(seat.to_string()).into());
            }
        }
        if let Some(session) = new.checkout_session_id.as_deref() {
            if arena
                .reservations
                .values()
                .any(|r| r.checkout_session_id.as_deref() == Some(session))
            {
                return Err(ReservationConflict::SessionAlreadyUsed.into());
            }
        }
        if arena.of_event(new.event_id).count() as i64 >= capacity {
            return Err(ReservationConflict::EventFull.into());
        }

        arena.next_reservation_id += 1;
        let reservation = Reservation {
            id: arena.next_reservation_id,
            created_at: new.created_at,
            status: new.status,
            participant_id: new.participant_id,
            event_id: new.event_id,
            seat_label: new.seat_label,
            checkout_session_id: new.checkout_session_id,
            amount_paid: new.amount_paid,
            scanned_at: None,
        };
        arena
            .reservations_by_event
            .entry(reservation.event_id)
            .or_default()
            .insert(reservation.id);
        arena.reservations.insert(reservation.id, reservation.clone());

        Ok(reservation)
    }

    async fn confirm_pending(
        &self,
        id: ReservationId,
        session_id: &str,
        amount_paid: i64,
    ) -> RepositoryResult<Option<Reservation>> {
        let mut arena = self.arena.write().await;
        let confirmable = arena
            .reservations
            .get(&id)
            .is_some_and(|r| r.is_pending() && r.checkout_session_id.is_none());
        if !confirmable {
            return Ok(None);
        }
        if arena
            .reservations
            .values()
            .any(|r| r.id != id && r.checkout_session_id.as_deref() == Some(session_id))
        {
            return Err(ReservationConflict::SessionAlreadyUsed.into());
        }
        match arena.reservations.get_mut(&id) {
            Some(r) if r.is_pending() && r.checkout_session_id.is_none() => {
                r.status = ReservationStatus::Confirmed;
                r.checkout_session_id = Some(session_id.to_string());
                r.amount_paid = Some(amount_paid);
                Ok(Some(r.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete(&self, id: ReservationId) -> RepositoryResult<bool> {
        Ok(self.arena.write().await.remove_reservation(id).is_some())
    }

    async fn delete_if_pending(&self, id: ReservationId) -> RepositoryResult<bool> {
        let mut arena = self.arena.write().await;
        let pending = arena.reservations.get(&id).is_some_and(|r| r.is_pending());
        if !pending {
            return Ok(false);
        }
        Ok(arena.remove_reservation(id).is_some())
    }

    async fn mark_scanned(
        &self,
        id: ReservationId,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Option<Reservation>> {
        let mut arena = self.arena.write().await;
        match arena.reservations.get_mut(&id) {
            Some(r) if r.scanned_at.is_none() => {
                r.scanned_at = Some(at);
                Ok(Some(r.clone()))
            }
            _ => Ok(None),
        }
    }
}
