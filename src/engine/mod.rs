mod bookings;
mod conflict;
mod error;
mod occupancy;
mod payment;
mod queries;
mod ratings;

pub use error::EngineError;
pub use payment::CardInput;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::clock::Clock;
use crate::directory::SpaceDirectory;
use crate::model::*;
use crate::wal::Journal;

pub type SharedCalendar = Arc<RwLock<SpaceCalendar>>;

// ── Group-commit journal channel ─────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Snapshot {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    RecordsSinceSnapshot {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the journal and batches appends for group
/// commit: block until one Append arrives, drain whatever else is already
/// queued, then pay for a single fsync across the whole batch.
async fn wal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_control(&mut journal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];

        // Drain the batch window. A control command ends the window and
        // waits until the batch is on disk.
        let mut pending_control = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    pending_control = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut journal, &mut batch);

        if let Some(cmd) = pending_control {
            handle_control(&mut journal, cmd);
        }
    }
}

fn commit_batch(
    journal: &mut Journal,
    batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>,
) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    let result = flush_batch(journal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(
    journal: &mut Journal,
    batch: &[(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut buffer_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = journal.buffer(event) {
            buffer_err = Some(e);
            break;
        }
    }
    // Commit even when staging failed, so the staged prefix cannot leak
    // into the next batch after every sender here was answered with Err.
    let commit_err = journal.commit().err();
    if let Some(e) = buffer_err {
        return Err(e);
    }
    if let Some(e) = commit_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(
    batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>,
    result: &io::Result<()>,
) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_control(journal: &mut Journal, cmd: WalCommand) {
    match cmd {
        WalCommand::Snapshot { events, response } => {
            let result = Journal::write_snapshot(journal.path(), &events)
                .and_then(|()| journal.install_snapshot());
            let _ = response.send(result);
        }
        WalCommand::RecordsSinceSnapshot { response } => {
            let _ = response.send(journal.records_since_snapshot());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    /// Per-space booking ledgers. Every mutation for a space runs under
    /// that space's write lock, including rating upserts.
    pub(super) calendars: DashMap<Ulid, SharedCalendar>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: booking id → space id.
    pub(super) booking_to_space: DashMap<Ulid, Ulid>,
    /// Booking ids per user, in creation order.
    pub(super) user_bookings: DashMap<Ulid, Vec<Ulid>>,
    /// Payments keyed by booking id. At most one per booking, ever.
    pub(super) payments: DashMap<Ulid, Payment>,
    /// Ratings keyed by (user, space); an upsert replaces the whole record.
    pub(super) ratings: DashMap<(Ulid, Ulid), Rating>,
    pub(super) directory: Arc<dyn SpaceDirectory>,
    pub(super) clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        directory: Arc<dyn SpaceDirectory>,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let (journal, events) = Journal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(journal, wal_rx));

        let engine = Self {
            calendars: DashMap::new(),
            wal_tx,
            booking_to_space: DashMap::new(),
            user_bookings: DashMap::new(),
            payments: DashMap::new(),
            ratings: DashMap::new(),
            directory,
            clock,
        };

        // Replay. We are the sole owner of these Arcs, so try_write always
        // succeeds. Never block here: new() may run inside a runtime.
        for event in &events {
            let cal = engine.calendar_or_default(event_space_id(event));
            let mut guard = cal.try_write().expect("replay: uncontended write");
            engine.apply_event(&mut guard, event);
        }

        Ok(engine)
    }

    pub(super) fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Fetch a space's calendar, creating an empty one on first touch.
    pub(super) fn calendar_or_default(&self, space_id: Ulid) -> SharedCalendar {
        self.calendars
            .entry(space_id)
            .or_insert_with(|| Arc::new(RwLock::new(SpaceCalendar::new(space_id))))
            .clone()
    }

    /// Look up a booking's space and take that calendar's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<SpaceCalendar>), EngineError> {
        let space_id = self
            .booking_to_space
            .get(&booking_id)
            .map(|e| *e.value())
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let cal = self
            .calendars
            .get(&space_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let guard = cal.write_owned().await;
        Ok((space_id, guard))
    }

    /// Write the event to the journal via the group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Journal append, then in-memory apply. The caller holds the calendar
    /// write lock across both, so readers never see unjournaled state.
    pub(super) async fn persist_and_apply(
        &self,
        cal: &mut SpaceCalendar,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_event(cal, event);
        Ok(())
    }

    /// Apply an event to a calendar and the engine's side indexes.
    /// No locking here: the caller holds the calendar lock (or owns it
    /// outright during replay).
    fn apply_event(&self, cal: &mut SpaceCalendar, event: &Event) {
        match event {
            Event::BookingCreated {
                id,
                space_id,
                user_id,
                span,
                amount,
                at,
            } => {
                cal.insert_booking(Booking {
                    id: *id,
                    space_id: *space_id,
                    user_id: *user_id,
                    span: *span,
                    amount: *amount,
                    status: BookingStatus::PendingPayment,
                    created_at: *at,
                    updated_at: *at,
                });
                self.booking_to_space.insert(*id, *space_id);
                self.user_bookings.entry(*user_id).or_default().push(*id);
            }
            Event::BookingCanceled { id, at, .. } => {
                if let Some(b) = cal.booking_mut(*id) {
                    b.status = BookingStatus::Canceled;
                    b.updated_at = *at;
                }
            }
            Event::BookingRescheduled { id, span, at, .. } => {
                // Remove and re-insert so the ledger stays sorted by start.
                if let Some(mut b) = cal.remove_booking(*id) {
                    b.span = *span;
                    b.updated_at = *at;
                    cal.insert_booking(b);
                }
            }
            Event::BookingConfirmed { id, at, .. } => {
                if let Some(b) = cal.booking_mut(*id) {
                    b.status = BookingStatus::Confirmed;
                    b.updated_at = *at;
                }
            }
            Event::BookingPaid {
                payment_id,
                booking_id,
                user_id,
                amount,
                last4,
                brand,
                at,
                ..
            } => {
                if let Some(b) = cal.booking_mut(*booking_id) {
                    b.status = BookingStatus::Paid;
                    b.updated_at = *at;
                }
                self.payments.insert(
                    *booking_id,
                    Payment {
                        id: *payment_id,
                        booking_id: *booking_id,
                        user_id: *user_id,
                        amount: *amount,
                        last4: last4.clone(),
                        brand: *brand,
                        created_at: *at,
                    },
                );
            }
            Event::SpaceRated {
                id,
                space_id,
                user_id,
                score,
                comment,
                created_at,
                updated_at,
            } => {
                self.ratings.insert(
                    (*user_id, *space_id),
                    Rating {
                        id: *id,
                        user_id: *user_id,
                        space_id: *space_id,
                        score: *score,
                        comment: comment.clone(),
                        created_at: *created_at,
                        updated_at: *updated_at,
                    },
                );
            }
        }
    }

    /// Rewrite the journal down to the minimal events that recreate the
    /// current state: one create per booking, a status event where needed,
    /// and the live rating records.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Snapshot the calendar Arcs first; holding a map iterator across
        // an await point would block writers on the same shard.
        let calendars: Vec<SharedCalendar> =
            self.calendars.iter().map(|e| e.value().clone()).collect();

        let mut events = Vec::new();
        for cal in calendars {
            let guard = cal.read().await;
            for booking in &guard.bookings {
                self.snapshot_booking(booking, &mut events);
            }
        }
        for entry in self.ratings.iter() {
            let r = entry.value();
            events.push(Event::SpaceRated {
                id: r.id,
                space_id: r.space_id,
                user_id: r.user_id,
                score: r.score,
                comment: r.comment.clone(),
                created_at: r.created_at,
                updated_at: r.updated_at,
            });
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Snapshot {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Emit the shortest event sequence that replays into `booking` as-is.
    fn snapshot_booking(&self, booking: &Booking, events: &mut Vec<Event>) {
        events.push(Event::BookingCreated {
            id: booking.id,
            space_id: booking.space_id,
            user_id: booking.user_id,
            span: booking.span,
            amount: booking.amount,
            at: booking.created_at,
        });
        let touched_at = match booking.status {
            BookingStatus::PendingPayment => booking.created_at,
            BookingStatus::Confirmed => {
                events.push(Event::BookingConfirmed {
                    id: booking.id,
                    space_id: booking.space_id,
                    at: booking.updated_at,
                });
                booking.updated_at
            }
            BookingStatus::Canceled => {
                events.push(Event::BookingCanceled {
                    id: booking.id,
                    space_id: booking.space_id,
                    at: booking.updated_at,
                });
                booking.updated_at
            }
            BookingStatus::Paid => match self.payments.get(&booking.id) {
                Some(p) => {
                    events.push(Event::BookingPaid {
                        payment_id: p.id,
                        booking_id: booking.id,
                        space_id: booking.space_id,
                        user_id: p.user_id,
                        amount: p.amount,
                        last4: p.last4.clone(),
                        brand: p.brand,
                        at: p.created_at,
                    });
                    p.created_at
                }
                None => booking.created_at,
            },
        };
        // A reschedule may postdate the status flip; replay the final span
        // once more so updated_at lands where it was.
        if booking.updated_at != touched_at {
            events.push(Event::BookingRescheduled {
                id: booking.id,
                space_id: booking.space_id,
                span: booking.span,
                at: booking.updated_at,
            });
        }
    }

    pub async fn wal_records_since_snapshot(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::RecordsSinceSnapshot { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Every event names the space whose calendar it belongs to.
fn event_space_id(event: &Event) -> Ulid {
    match event {
        Event::BookingCreated { space_id, .. }
        | Event::BookingCanceled { space_id, .. }
        | Event::BookingRescheduled { space_id, .. }
        | Event::BookingConfirmed { space_id, .. }
        | Event::BookingPaid { space_id, .. }
        | Event::SpaceRated { space_id, .. } => *space_id,
    }
}
