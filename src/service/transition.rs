use tracing::info;
use ulid::Ulid;

use crate::error::HoldError;
use crate::model::*;
use crate::observability::{HOLD_TRANSITIONS_TOTAL, HOLDS_EXPIRED_TOTAL};

use super::{HoldService, parse_ulid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Confirm,
    Cancel,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Confirm => "confirm",
            Transition::Cancel => "cancel",
        }
    }

    fn target(&self) -> HoldStatus {
        match self {
            Transition::Confirm => HoldStatus::Confirmed,
            Transition::Cancel => HoldStatus::Cancelled,
        }
    }
}

/// What a confirm/cancel does to a hold in a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPlan {
    Apply(HoldStatus),
    Unchanged,
    /// Lazily discovered expiry: persist `EXPIRED`, then report it.
    ExpireThenFail,
    FailExpired,
    FailStatusConflict,
}

pub fn plan_transition(action: Transition, hold: &Hold, now: Ms) -> TransitionPlan {
    use HoldStatus::*;
    match (hold.status, action) {
        (HoldCreated, _) if hold.expires_at <= now => TransitionPlan::ExpireThenFail,
        (HoldCreated, action) => TransitionPlan::Apply(action.target()),
        (Confirmed, Transition::Confirm) => TransitionPlan::Unchanged,
        (Confirmed, Transition::Cancel) => TransitionPlan::Apply(Cancelled),
        (Cancelled, Transition::Confirm) => TransitionPlan::FailStatusConflict,
        (Cancelled, Transition::Cancel) => TransitionPlan::Unchanged,
        (Expired, _) => TransitionPlan::FailExpired,
    }
}

impl HoldService {
    pub async fn confirm_hold(&self, hold_id: &str) -> Result<HoldResponse, HoldError> {
        self.transition(hold_id, Transition::Confirm).await
    }

    pub async fn cancel_hold(&self, hold_id: &str) -> Result<HoldResponse, HoldError> {
        self.transition(hold_id, Transition::Cancel).await
    }

    async fn transition(&self, hold_id: &str, action: Transition) -> Result<HoldResponse, HoldError> {
        let result = match parse_ulid("holdId", hold_id) {
            Ok(id) => self.transition_locked(id, action).await,
            Err(e) => Err(e),
        };
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.code(),
        };
        metrics::counter!(HOLD_TRANSITIONS_TOTAL, "action" => action.as_str(), "outcome" => outcome)
            .increment(1);
        result
    }

    async fn transition_locked(&self, id: Ulid, action: Transition) -> Result<HoldResponse, HoldError> {
        let mut txn = self.engine.begin();
        let hold = txn.lock_hold(id).await?;
        let now = self.clock.now();

        match plan_transition(action, &hold, now) {
            TransitionPlan::Apply(status) => {
                let updated = txn.set_status(&hold, status, now);
                txn.commit().await?;
                info!(hold_id = %id, from = %hold.status, to = %status, "hold transitioned");
                Ok(HoldResponse::from_hold(&updated))
            }
            TransitionPlan::Unchanged => Ok(HoldResponse::from_hold(&hold)),
            TransitionPlan::ExpireThenFail => {
                txn.set_status(&hold, HoldStatus::Expired, now);
                txn.commit().await?;
                metrics::counter!(HOLDS_EXPIRED_TOTAL, "source" => "lazy").increment(1);
                info!(hold_id = %id, action = action.as_str(), "hold found expired on transition");
                Err(HoldError::HoldExpired(id))
            }
            TransitionPlan::FailExpired => Err(HoldError::HoldExpired(id)),
            TransitionPlan::FailStatusConflict => Err(HoldError::HoldStatusConflict {
                id,
                status: hold.status,
            }),
        }
    }
}
