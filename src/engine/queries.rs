use ulid::Ulid;

use crate::model::*;

use super::occupancy::utc_date;
use super::{Engine, EngineError};

/// Read-model view of a booking. Expiry is derived, day-granular: a
/// pending booking is expired once its end date is on or before today.
pub(super) fn booking_info(b: &Booking, now: Ms) -> BookingInfo {
    let expired =
        b.status == BookingStatus::PendingPayment && utc_date(b.span.end) <= utc_date(now);
    BookingInfo {
        id: b.id,
        space_id: b.space_id,
        user_id: b.user_id,
        start: b.span.start,
        end: b.span.end,
        amount: b.amount,
        status: b.status,
        expired,
        created_at: b.created_at,
        updated_at: b.updated_at,
    }
}

impl Engine {
    pub async fn get_booking(&self, id: Ulid) -> Result<BookingInfo, EngineError> {
        let space_id = self
            .booking_to_space
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::BookingNotFound(id))?;
        let cal = self
            .calendars
            .get(&space_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::BookingNotFound(id))?;
        let guard = cal.read().await;
        let now = self.now();
        guard
            .booking(id)
            .map(|b| booking_info(b, now))
            .ok_or(EngineError::BookingNotFound(id))
    }

    /// All bookings for one space, canceled history included, in
    /// calendar order. A space with no bookings yields an empty list.
    pub async fn list_bookings(&self, space_id: Ulid) -> Vec<BookingInfo> {
        let Some(cal) = self.calendars.get(&space_id).map(|e| e.value().clone()) else {
            return Vec::new();
        };
        let guard = cal.read().await;
        let now = self.now();
        guard
            .bookings
            .iter()
            .map(|b| booking_info(b, now))
            .collect()
    }

    /// A user's bookings, in creation order.
    pub async fn list_user_bookings(&self, user_id: Ulid) -> Vec<BookingInfo> {
        let ids: Vec<Ulid> = self
            .user_bookings
            .get(&user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let now = self.now();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(space_id) = self.booking_to_space.get(&id).map(|e| *e.value()) else {
                continue;
            };
            let Some(cal) = self.calendars.get(&space_id).map(|e| e.value().clone()) else {
                continue;
            };
            let guard = cal.read().await;
            if let Some(b) = guard.booking(id) {
                out.push(booking_info(b, now));
            }
        }
        out
    }

    /// Payment attached to a booking. Visibility follows the booking:
    /// its owner or an admin.
    pub async fn get_payment(
        &self,
        actor: Actor,
        booking_id: Ulid,
    ) -> Result<PaymentInfo, EngineError> {
        let booking = self.get_booking(booking_id).await?;
        if !actor.may_act_on(booking.user_id) {
            return Err(EngineError::Forbidden);
        }
        self.payments
            .get(&booking_id)
            .map(|p| PaymentInfo::from_payment(p.value()))
            .ok_or(EngineError::PaymentNotFound(booking_id))
    }
}
