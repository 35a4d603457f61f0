use chrono::{Months, TimeZone, Utc};
use serde::Deserialize;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::occupancy::utc_date;
use super::{Engine, EngineError};

/// Card fields as submitted. The number and cvv never leave this struct:
/// validation reduces them to a masked tail and a brand, and only those
/// are stored or journaled.
#[derive(Debug, Clone, Deserialize)]
pub struct CardInput {
    pub card_number: String,
    pub card_holder: String,
    /// MM/YY
    pub expiry: String,
    pub cvv: String,
}

/// Strip the separators people type into card numbers. Any other
/// non-digit makes the number invalid.
fn card_digits(raw: &str) -> Option<String> {
    let mut digits = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' => {}
            _ => return None,
        }
    }
    Some(digits)
}

/// Brand from the leading digits: 4 is Visa, 51-55 and 22-27 are
/// Mastercard, 34 and 37 are Amex. Everything else books as Other.
fn card_brand(digits: &str) -> CardBrand {
    let two: u32 = digits.get(..2).and_then(|p| p.parse().ok()).unwrap_or(0);
    if digits.starts_with('4') {
        CardBrand::Visa
    } else if (51..=55).contains(&two) || (22..=27).contains(&two) {
        CardBrand::Mastercard
    } else if two == 34 || two == 37 {
        CardBrand::Amex
    } else {
        CardBrand::Other
    }
}

/// Split a strict MM/YY field into month and a four-digit year. Only the
/// shape is checked here; month range is the caller's concern.
fn parse_expiry(expiry: &str) -> Option<(u32, i32)> {
    let (mm, yy) = expiry.split_once('/')?;
    if mm.len() != 2 || yy.len() != 2 {
        return None;
    }
    let month: u32 = mm.parse().ok()?;
    let year: i32 = yy.parse::<i32>().ok()? + 2000;
    Some((month, year))
}

/// First instant after the card's last valid month. The card is good
/// through the whole named month.
fn expiry_cutoff_ms(month: u32, year: i32) -> Option<Ms> {
    let first_of_month = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()?;
    let cutoff = first_of_month.checked_add_months(Months::new(1))?;
    Some(cutoff.timestamp_millis())
}

/// Validate the card and reduce it to the two fields we may keep. Each
/// failure carries its own message; clients show them verbatim.
fn validate_card(card: &CardInput, now: Ms) -> Result<(String, CardBrand), EngineError> {
    let digits = card_digits(&card.card_number)
        .ok_or(EngineError::Validation("card number must be digits"))?;
    if !(13..=19).contains(&digits.len()) {
        return Err(EngineError::Validation("invalid card number length"));
    }

    let (month, year) =
        parse_expiry(&card.expiry).ok_or(EngineError::Validation("invalid expiry date"))?;
    if !(1..=12).contains(&month) {
        return Err(EngineError::Validation("invalid expiry month"));
    }
    let cutoff =
        expiry_cutoff_ms(month, year).ok_or(EngineError::Validation("invalid expiry date"))?;
    if now >= cutoff {
        return Err(EngineError::Validation("card expired"));
    }

    if !(3..=4).contains(&card.cvv.len()) || !card.cvv.chars().all(|c| c.is_ascii_digit()) {
        return Err(EngineError::Validation("invalid cvv"));
    }

    let holder = card.card_holder.trim();
    if holder.is_empty() || holder.len() > MAX_CARD_HOLDER_LEN {
        return Err(EngineError::Validation("card holder name invalid"));
    }

    let last4 = digits[digits.len() - 4..].to_string();
    Ok((last4, card_brand(&digits)))
}

impl Engine {
    /// Charge a booking. On success the payment record and the Paid flip
    /// land as a single journal record, so neither can exist alone.
    pub async fn pay_booking(
        &self,
        actor: Actor,
        booking_id: Ulid,
        card: &CardInput,
    ) -> Result<PaymentInfo, EngineError> {
        let (space_id, mut guard) = self.resolve_booking_write(booking_id).await?;
        let now = self.now();

        let (owner, status, ends_at, amount) = {
            let b = guard
                .booking(booking_id)
                .ok_or(EngineError::BookingNotFound(booking_id))?;
            (b.user_id, b.status, b.span.end, b.amount)
        };
        if !actor.may_act_on(owner) {
            return Err(EngineError::Forbidden);
        }
        if status == BookingStatus::Canceled {
            return Err(EngineError::State("booking is canceled"));
        }
        if status == BookingStatus::Paid || self.payments.contains_key(&booking_id) {
            return Err(EngineError::DuplicatePayment(booking_id));
        }
        // An unpaid booking whose end date is behind us can no longer be
        // charged; expiry is day-granular, like the front desk works.
        if status == BookingStatus::PendingPayment && utc_date(ends_at) <= utc_date(now) {
            return Err(EngineError::Temporal("booking has expired"));
        }

        let (last4, brand) = validate_card(card, now)?;

        let payment_id = Ulid::new();
        let event = Event::BookingPaid {
            payment_id,
            booking_id,
            space_id,
            user_id: actor.user_id,
            amount,
            last4: last4.clone(),
            brand,
            at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        Ok(PaymentInfo {
            id: payment_id,
            booking_id,
            amount,
            last4,
            brand,
            created_at: now,
        })
    }
}
