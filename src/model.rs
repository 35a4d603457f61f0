use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub const MS_PER_HOUR: Ms = 3_600_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Intersection of two spans, if non-empty.
    pub fn clip(&self, other: &Span) -> Option<Span> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(Span { start, end })
    }
}

/// Lifecycle status of a booking. Expiry is never stored; it is derived
/// from `PendingPayment` plus the booking's end date at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    PendingPayment,
    Confirmed,
    Paid,
    Canceled,
}

impl BookingStatus {
    /// Active bookings occupy their time window; canceled ones do not.
    pub fn is_active(self) -> bool {
        !matches!(self, BookingStatus::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::PendingPayment => "pending_payment",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Paid => "paid",
            BookingStatus::Canceled => "canceled",
        }
    }
}

/// A reservation of one space for a half-open time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub space_id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    /// Hourly rate × duration, fixed at creation time.
    pub amount: Decimal,
    pub status: BookingStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// Card authorization record. Only the masked tail and brand survive
/// validation; the full number and cvv are never stored or journaled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub user_id: Ulid,
    pub amount: Decimal,
    pub last4: String,
    pub brand: CardBrand,
    pub created_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardBrand {
    Visa,
    Mastercard,
    Amex,
    Other,
}

impl CardBrand {
    pub fn as_str(self) -> &'static str {
        match self {
            CardBrand::Visa => "visa",
            CardBrand::Mastercard => "mastercard",
            CardBrand::Amex => "amex",
            CardBrand::Other => "other",
        }
    }
}

/// One rating per (user, space); resubmission replaces the whole record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub id: Ulid,
    pub user_id: Ulid,
    pub space_id: Ulid,
    pub score: u8,
    pub comment: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// Authenticated caller, supplied by the connection layer. The engine
/// never checks credentials, only ownership and role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Ulid,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Admin,
}

impl Actor {
    pub fn client(user_id: Ulid) -> Self {
        Self { user_id, role: Role::Client }
    }

    pub fn admin(user_id: Ulid) -> Self {
        Self { user_id, role: Role::Admin }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Owners act on their own bookings; admins act on anything.
    pub fn may_act_on(&self, owner: Ulid) -> bool {
        self.is_admin() || self.user_id == owner
    }
}

/// Per-space ledger of bookings, sorted by `span.start`. Canceled
/// bookings stay in the ledger as history; only active ones block time.
#[derive(Debug, Clone)]
pub struct SpaceCalendar {
    pub space_id: Ulid,
    pub bookings: Vec<Booking>,
}

impl SpaceCalendar {
    pub fn new(space_id: Ulid) -> Self {
        Self { space_id, bookings: Vec::new() }
    }

    /// Insert keeping sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    /// Remove by id. Only reschedule uses this, to re-insert at the new slot.
    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        if let Some(pos) = self.bookings.iter().position(|b| b.id == id) {
            Some(self.bookings.remove(pos))
        } else {
            None
        }
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Return only bookings whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated {
        id: Ulid,
        space_id: Ulid,
        user_id: Ulid,
        span: Span,
        amount: Decimal,
        at: Ms,
    },
    BookingCanceled {
        id: Ulid,
        space_id: Ulid,
        at: Ms,
    },
    BookingRescheduled {
        id: Ulid,
        space_id: Ulid,
        span: Span,
        at: Ms,
    },
    BookingConfirmed {
        id: Ulid,
        space_id: Ulid,
        at: Ms,
    },
    /// Payment insert and the Paid flip travel as one record, so a crash
    /// can never surface one without the other.
    BookingPaid {
        payment_id: Ulid,
        booking_id: Ulid,
        space_id: Ulid,
        user_id: Ulid,
        amount: Decimal,
        last4: String,
        brand: CardBrand,
        at: Ms,
    },
    SpaceRated {
        id: Ulid,
        space_id: Ulid,
        user_id: Ulid,
        score: u8,
        comment: Option<String>,
        created_at: Ms,
        updated_at: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingInfo {
    pub id: Ulid,
    pub space_id: Ulid,
    pub user_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub amount: Decimal,
    pub status: BookingStatus,
    /// True for a pending-payment booking whose end date has passed.
    pub expired: bool,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentInfo {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub amount: Decimal,
    pub last4: String,
    pub brand: CardBrand,
    pub created_at: Ms,
}

impl PaymentInfo {
    pub fn from_payment(p: &Payment) -> Self {
        Self {
            id: p.id,
            booking_id: p.booking_id,
            amount: p.amount,
            last4: p.last4.clone(),
            brand: p.brand,
            created_at: p.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RatingInfo {
    pub id: Ulid,
    pub space_id: Ulid,
    pub user_id: Ulid,
    pub score: u8,
    pub comment: Option<String>,
    pub updated_at: Ms,
}

impl RatingInfo {
    pub fn from_rating(r: &Rating) -> Self {
        Self {
            id: r.id,
            space_id: r.space_id,
            user_id: r.user_id,
            score: r.score,
            comment: r.comment.clone(),
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OccupancyReport {
    pub total_spaces: usize,
    pub total_bookings: usize,
    pub reserved_hours: f64,
    pub workdays: u32,
    pub occupancy_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpaceUsage {
    pub space_id: Ulid,
    pub name: String,
    pub bookings: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingSummary {
    pub space_id: Ulid,
    pub avg: f64,
    pub count: usize,
}
