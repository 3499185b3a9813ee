//! The chat request state machine.
//!
//! ```text
//! pending ──approve(admin)──▶ admin_approved ──accept(target)──▶ user_accepted
//!    │                              │
//!    └──────reject(admin | target | expiry)──────▶ rejected
//! ```
//!
//! `user_accepted` and `rejected` are terminal, and nothing reaches
//! `user_accepted` without passing through `admin_approved`.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    AdminApproved,
    UserAccepted,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        use RequestStatus::*;
        match self {
            Pending => "pending",
            AdminApproved => "admin_approved",
            UserAccepted => "user_accepted",
            Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::UserAccepted | RequestStatus::Rejected)
    }

    /// Where `transition` by `actor` leads from here.
    pub fn next(self, transition: Transition, actor: Actor) -> Result<RequestStatus, TransitionError> {
        if !transition.permits(actor) {
            return Err(TransitionError::NotPermitted { transition, actor });
        }
        if !transition.sources().contains(&self) {
            return Err(TransitionError::InvalidState { from: self, transition });
        }
        Ok(transition.target())
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use RequestStatus::*;
        match s {
            "pending" => Ok(Pending),
            "admin_approved" => Ok(AdminApproved),
            "user_accepted" => Ok(UserAccepted),
            "rejected" => Ok(Rejected),
            other => Err(anyhow::anyhow!("unknown request status {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Admin,
    Target,
    Requester,
    /// The pending-request sweeper.
    #[serde(rename = "expired")]
    Expiry,
}

impl Actor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Actor::Admin => "admin",
            Actor::Target => "target",
            Actor::Requester => "requester",
            Actor::Expiry => "expired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Approve,
    Accept,
    Reject,
}

impl Transition {
    pub fn sources(&self) -> &'static [RequestStatus] {
        use RequestStatus::*;
        match self {
            Transition::Approve => &[Pending],
            Transition::Accept => &[AdminApproved],
            Transition::Reject => &[Pending, AdminApproved],
        }
    }

    pub fn target(&self) -> RequestStatus {
        match self {
            Transition::Approve => RequestStatus::AdminApproved,
            Transition::Accept => RequestStatus::UserAccepted,
            Transition::Reject => RequestStatus::Rejected,
        }
    }

    fn permits(&self, actor: Actor) -> bool {
        match self {
            Transition::Approve => actor == Actor::Admin,
            Transition::Accept => actor == Actor::Target,
            Transition::Reject => matches!(actor, Actor::Admin | Actor::Target | Actor::Expiry),
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Transition::Approve => "approve",
            Transition::Accept => "accept",
            Transition::Reject => "reject",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("{} may not {transition} a chat request", .actor.as_str())]
    NotPermitted { transition: Transition, actor: Actor },

    #[error("cannot {transition} a chat request that is {from}")]
    InvalidState { from: RequestStatus, transition: Transition },
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        AppError::Forbidden(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RequestStatus::*;

    const ALL: [RequestStatus; 4] = [Pending, AdminApproved, UserAccepted, Rejected];
    const ACTORS: [Actor; 4] = [Actor::Admin, Actor::Target, Actor::Requester, Actor::Expiry];
    const TRANSITIONS: [Transition; 3] = [Transition::Approve, Transition::Accept, Transition::Reject];

    #[test]
    fn happy_path() {
        let approved = Pending.next(Transition::Approve, Actor::Admin).unwrap();
        assert_eq!(approved, AdminApproved);
        assert_eq!(approved.next(Transition::Accept, Actor::Target).unwrap(), UserAccepted);
    }

    #[test]
    fn terminal_states_never_move() {
        for from in [UserAccepted, Rejected] {
            for transition in TRANSITIONS {
                for actor in ACTORS {
                    assert!(from.next(transition, actor).is_err(), "{from} -{transition}-> by {actor:?}");
                }
            }
        }
    }

    #[test]
    fn accept_requires_admin_approval() {
        let reachable: Vec<_> = ALL
            .into_iter()
            .filter(|from| from.next(Transition::Accept, Actor::Target).is_ok())
            .collect();
        assert_eq!(reachable, vec![AdminApproved]);

        assert_eq!(
            Pending.next(Transition::Accept, Actor::Target),
            Err(TransitionError::InvalidState { from: Pending, transition: Transition::Accept }),
        );
    }

    #[test]
    fn only_admin_approves_and_only_target_accepts() {
        for actor in [Actor::Target, Actor::Requester, Actor::Expiry] {
            assert!(matches!(
                Pending.next(Transition::Approve, actor),
                Err(TransitionError::NotPermitted { .. }),
            ));
        }
        for actor in [Actor::Admin, Actor::Requester, Actor::Expiry] {
            assert!(AdminApproved.next(Transition::Accept, actor).is_err());
        }
    }

    #[test]
    fn reject_from_any_open_state() {
        for from in [Pending, AdminApproved] {
            for actor in [Actor::Admin, Actor::Target, Actor::Expiry] {
                assert_eq!(from.next(Transition::Reject, actor).unwrap(), Rejected);
            }
            assert!(from.next(Transition::Reject, Actor::Requester).is_err());
        }
    }

    #[test]
    fn status_text_round_trips() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<RequestStatus>().unwrap(), status);
        }
        assert!("approved".parse::<RequestStatus>().is_err());
    }
}
