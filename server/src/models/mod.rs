pub mod event;
pub mod reservation;
pub mod user;

pub use event::{Event, EventCancellation, EventId, SeatLayout};
pub use reservation::{
    NewReservation, PageRequest, Reservation, ReservationDetails, ReservationFilter,
    ReservationId, ReservationScope, ReservationSort, ReservationStatus,
};
pub use user::{Role, User, UserId};
