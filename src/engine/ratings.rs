use std::collections::HashMap;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Rate a space 1-5. Only users with booking history there may rate,
    /// whatever those bookings' statuses. Resubmitting replaces the score
    /// and comment while keeping the rating's identity and creation time.
    pub async fn rate_space(
        &self,
        actor: Actor,
        space_id: Ulid,
        score: u8,
        comment: Option<String>,
    ) -> Result<RatingInfo, EngineError> {
        if !(1..=5).contains(&score) {
            return Err(EngineError::Validation("score must be between 1 and 5"));
        }
        if let Some(ref c) = comment
            && c.len() > MAX_COMMENT_LEN
        {
            return Err(EngineError::LimitExceeded("comment too long"));
        }

        let booked = self.user_bookings.get(&actor.user_id).is_some_and(|ids| {
            ids.iter()
                .any(|id| self.booking_to_space.get(id).map(|e| *e.value()) == Some(space_id))
        });
        if !booked {
            return Err(EngineError::Forbidden);
        }

        let now = self.now();
        let cal = self.calendar_or_default(space_id);
        let mut guard = cal.write().await;

        // An upsert keeps the original id and created_at.
        let (id, created_at) = match self.ratings.get(&(actor.user_id, space_id)) {
            Some(prev) => (prev.id, prev.created_at),
            None => (Ulid::new(), now),
        };

        let info = RatingInfo {
            id,
            space_id,
            user_id: actor.user_id,
            score,
            comment: comment.clone(),
            updated_at: now,
        };
        let event = Event::SpaceRated {
            id,
            space_id,
            user_id: actor.user_id,
            score,
            comment,
            created_at,
            updated_at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(info)
    }

    /// Average score and rating count per space, sorted by space id.
    pub fn ratings_summary(&self) -> Vec<RatingSummary> {
        let mut acc: HashMap<Ulid, (u64, usize)> = HashMap::new();
        for entry in self.ratings.iter() {
            let r = entry.value();
            let slot = acc.entry(r.space_id).or_insert((0, 0));
            slot.0 += r.score as u64;
            slot.1 += 1;
        }
        let mut out: Vec<RatingSummary> = acc
            .into_iter()
            .map(|(space_id, (sum, count))| RatingSummary {
                space_id,
                avg: sum as f64 / count as f64,
                count,
            })
            .collect();
        out.sort_by_key(|s| s.space_id);
        out
    }

    /// All ratings for one space, most recently updated first.
    pub fn space_ratings(&self, space_id: Ulid) -> Vec<RatingInfo> {
        let mut out: Vec<RatingInfo> = self
            .ratings
            .iter()
            .filter(|e| e.value().space_id == space_id)
            .map(|e| RatingInfo::from_rating(e.value()))
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        out
    }
}
