use rust_decimal::Decimal;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validated_span};
use super::queries::booking_info;
use super::{Engine, EngineError};

/// Charge for a span: hourly rate times duration. Multiply before the
/// division so sub-hour spans keep their precision.
pub(crate) fn booking_amount(hourly_rate: Decimal, span: &Span) -> Decimal {
    hourly_rate * Decimal::from(span.duration_ms()) / Decimal::from(MS_PER_HOUR)
}

impl Engine {
    /// Book `space_id` for `[start, end)` on behalf of `actor`. The window
    /// must lie wholly in the future and be free of active bookings.
    pub async fn create_booking(
        &self,
        actor: Actor,
        space_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<BookingInfo, EngineError> {
        let span = validated_span(start, end)?;
        let now = self.now();
        if span.start <= now {
            return Err(EngineError::Temporal("booking must start in the future"));
        }

        let space = self
            .directory
            .find(space_id)
            .await
            .ok_or(EngineError::SpaceNotFound(space_id))?;
        if !space.active {
            return Err(EngineError::Validation("space is not open for booking"));
        }

        let cal = self.calendar_or_default(space_id);
        let mut guard = cal.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_SPACE {
            return Err(EngineError::LimitExceeded("too many bookings for space"));
        }
        check_no_conflict(&guard, &span, None)?;

        let id = Ulid::new();
        let amount = booking_amount(space.hourly_rate, &span);
        let event = Event::BookingCreated {
            id,
            space_id,
            user_id: actor.user_id,
            span,
            amount,
            at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let b = guard.booking(id).ok_or(EngineError::BookingNotFound(id))?;
        Ok(booking_info(b, now))
    }

    /// Cancel a booking that has not started yet. Owners and admins only.
    /// Paid bookings stay put; refund flows live outside the engine.
    pub async fn cancel_booking(
        &self,
        actor: Actor,
        id: Ulid,
    ) -> Result<BookingInfo, EngineError> {
        let (space_id, mut guard) = self.resolve_booking_write(id).await?;
        let now = self.now();

        let (owner, status, starts_at) = {
            let b = guard.booking(id).ok_or(EngineError::BookingNotFound(id))?;
            (b.user_id, b.status, b.span.start)
        };
        if !actor.may_act_on(owner) {
            return Err(EngineError::Forbidden);
        }
        match status {
            BookingStatus::Canceled => {
                return Err(EngineError::State("booking is already canceled"));
            }
            BookingStatus::Paid => {
                return Err(EngineError::State("paid booking cannot be canceled"));
            }
            BookingStatus::PendingPayment | BookingStatus::Confirmed => {}
        }
        if starts_at <= now {
            return Err(EngineError::Temporal("booking has already started"));
        }

        let event = Event::BookingCanceled { id, space_id, at: now };
        self.persist_and_apply(&mut guard, &event).await?;
        let b = guard.booking(id).ok_or(EngineError::BookingNotFound(id))?;
        Ok(booking_info(b, now))
    }

    /// Move a booking to a new window in the same space. Status and amount
    /// are untouched; only the span and updated_at change.
    pub async fn reschedule_booking(
        &self,
        actor: Actor,
        id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<BookingInfo, EngineError> {
        let span = validated_span(start, end)?;
        let (space_id, mut guard) = self.resolve_booking_write(id).await?;
        let now = self.now();

        let (owner, status) = {
            let b = guard.booking(id).ok_or(EngineError::BookingNotFound(id))?;
            (b.user_id, b.status)
        };
        if !actor.may_act_on(owner) {
            return Err(EngineError::Forbidden);
        }
        if status == BookingStatus::Canceled {
            return Err(EngineError::State("canceled booking cannot be rescheduled"));
        }
        if span.start <= now {
            return Err(EngineError::Temporal("booking must start in the future"));
        }
        check_no_conflict(&guard, &span, Some(id))?;

        let event = Event::BookingRescheduled { id, space_id, span, at: now };
        self.persist_and_apply(&mut guard, &event).await?;
        let b = guard.booking(id).ok_or(EngineError::BookingNotFound(id))?;
        Ok(booking_info(b, now))
    }

    /// Administrative confirmation of a pending booking.
    pub async fn confirm_booking(
        &self,
        actor: Actor,
        id: Ulid,
    ) -> Result<BookingInfo, EngineError> {
        if !actor.is_admin() {
            return Err(EngineError::Forbidden);
        }
        let (space_id, mut guard) = self.resolve_booking_write(id).await?;
        let now = self.now();

        let status = guard
            .booking(id)
            .ok_or(EngineError::BookingNotFound(id))?
            .status;
        match status {
            BookingStatus::PendingPayment => {}
            BookingStatus::Confirmed => {
                return Err(EngineError::State("booking is already confirmed"));
            }
            BookingStatus::Paid => {
                return Err(EngineError::State("paid booking is already confirmed"));
            }
            BookingStatus::Canceled => {
                return Err(EngineError::State("canceled booking cannot be confirmed"));
            }
        }

        let event = Event::BookingConfirmed { id, space_id, at: now };
        self.persist_and_apply(&mut guard, &event).await?;
        let b = guard.booking(id).ok_or(EngineError::BookingNotFound(id))?;
        Ok(booking_info(b, now))
    }
}
