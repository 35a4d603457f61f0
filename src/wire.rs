use std::io;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use ulid::Ulid;

use crate::auth::Verifier;
use crate::engine::{CardInput, Engine, EngineError};
use crate::model::{Actor, Ms, Role};
use crate::observability;

/// Upper bound on a single request line. Card payloads are small; anything
/// longer is a client bug or abuse.
const MAX_LINE_LEN: usize = 64 * 1024;

/// One request line from an authenticated client.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreateBooking { space_id: Ulid, start: Ms, end: Ms },
    CancelBooking { booking_id: Ulid },
    RescheduleBooking { booking_id: Ulid, start: Ms, end: Ms },
    ConfirmBooking { booking_id: Ulid },
    PayBooking { booking_id: Ulid, card: CardInput },
    GetBooking { booking_id: Ulid },
    GetPayment { booking_id: Ulid },
    ListBookings { space_id: Ulid },
    MyBookings,
    OccupancyReport {
        #[serde(default = "default_window_days")]
        window_days: i64,
    },
    TopSpaces {
        #[serde(default = "default_window_days")]
        window_days: i64,
        #[serde(default = "default_ranking_limit")]
        limit: usize,
    },
    RateSpace { space_id: Ulid, score: u8, comment: Option<String> },
    SpaceRatings { space_id: Ulid },
    RatingsSummary,
}

fn default_window_days() -> i64 {
    crate::limits::DEFAULT_REPORT_WINDOW_DAYS
}

fn default_ranking_limit() -> usize {
    crate::limits::DEFAULT_TOP_SPACES
}

/// First line of every connection: identity plus the shared secret.
#[derive(Debug, Deserialize)]
struct Hello {
    user_id: Ulid,
    role: Option<Role>,
    password: String,
}

/// Drive one client connection: optional TLS, handshake, then one JSON
/// request per line until the peer hangs up.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    verifier: Arc<Verifier>,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    match tls {
        Some(acceptor) => {
            let stream = acceptor.accept(socket).await?;
            serve(stream, engine, verifier).await
        }
        None => serve(socket, engine, verifier).await,
    }
}

async fn serve<S>(stream: S, engine: Arc<Engine>, verifier: Arc<Verifier>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    let Some(line) = framed.next().await else {
        return Ok(());
    };
    let line = line.map_err(codec_err)?;
    let hello: Hello = match serde_json::from_str(&line) {
        Ok(h) => h,
        Err(e) => {
            send(&mut framed, error_body(400, &format!("bad handshake: {e}"))).await?;
            return Ok(());
        }
    };
    let role = hello.role.unwrap_or(Role::Client);
    if !verifier.verify(role, &hello.password) {
        metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
        send(&mut framed, error_body(403, "authentication failed")).await?;
        return Ok(());
    }
    let actor = Actor {
        user_id: hello.user_id,
        role,
    };
    send(
        &mut framed,
        json!({"status": "ok", "data": {"server": "reservd"}}),
    )
    .await?;

    while let Some(line) = framed.next().await {
        let line = line.map_err(codec_err)?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(req) => {
                let label = observability::request_label(&req);
                let started = Instant::now();
                let result = dispatch(&engine, actor, req).await;
                metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => label)
                    .record(started.elapsed().as_secs_f64());
                let status = if result.is_ok() { "ok" } else { "error" };
                metrics::counter!(
                    observability::REQUESTS_TOTAL,
                    "op" => label,
                    "status" => status
                )
                .increment(1);
                match result {
                    Ok(data) => json!({"status": "ok", "data": data}),
                    Err(e) => error_body(e.status_code(), &e.to_string()),
                }
            }
            Err(e) => error_body(400, &format!("bad request: {e}")),
        };
        send(&mut framed, response).await?;
    }
    Ok(())
}

async fn dispatch(engine: &Engine, actor: Actor, req: Request) -> Result<Value, EngineError> {
    match req {
        Request::CreateBooking {
            space_id,
            start,
            end,
        } => engine
            .create_booking(actor, space_id, start, end)
            .await
            .map(to_value),
        Request::CancelBooking { booking_id } => {
            engine.cancel_booking(actor, booking_id).await.map(to_value)
        }
        Request::RescheduleBooking {
            booking_id,
            start,
            end,
        } => engine
            .reschedule_booking(actor, booking_id, start, end)
            .await
            .map(to_value),
        Request::ConfirmBooking { booking_id } => engine
            .confirm_booking(actor, booking_id)
            .await
            .map(to_value),
        Request::PayBooking { booking_id, card } => engine
            .pay_booking(actor, booking_id, &card)
            .await
            .map(to_value),
        Request::GetBooking { booking_id } => engine.get_booking(booking_id).await.map(to_value),
        Request::GetPayment { booking_id } => {
            engine.get_payment(actor, booking_id).await.map(to_value)
        }
        Request::ListBookings { space_id } => Ok(to_value(engine.list_bookings(space_id).await)),
        Request::MyBookings => Ok(to_value(engine.list_user_bookings(actor.user_id).await)),
        Request::OccupancyReport { window_days } => {
            engine.occupancy_report(window_days).await.map(to_value)
        }
        Request::TopSpaces { window_days, limit } => {
            engine.top_spaces(window_days, limit).await.map(to_value)
        }
        Request::RateSpace {
            space_id,
            score,
            comment,
        } => engine
            .rate_space(actor, space_id, score, comment)
            .await
            .map(to_value),
        Request::SpaceRatings { space_id } => Ok(to_value(engine.space_ratings(space_id))),
        Request::RatingsSummary => Ok(to_value(engine.ratings_summary())),
    }
}

async fn send<S>(framed: &mut Framed<S, LinesCodec>, body: Value) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framed.send(body.to_string()).await.map_err(codec_err)
}

fn error_body(code: u16, message: &str) -> Value {
    json!({"status": "error", "code": code, "error": message})
}

fn to_value<T: serde::Serialize>(v: T) -> Value {
    serde_json::to_value(v).unwrap_or(Value::Null)
}

fn codec_err(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        LinesCodecError::MaxLineLengthExceeded => {
            io::Error::new(io::ErrorKind::InvalidData, "request line too long")
        }
    }
}
