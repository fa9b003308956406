//! The donation state machine.
//!
//! Guards run in two phases. [`authorize`] looks only at the caller's role and
//! runs before the record is read, so a caller without the right role is
//! rejected regardless of the donation's state. [`plan`] then checks the
//! freshly read record and produces the guarded write for the store.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use foodlink_db::models::{PickupStamps, StatusWrite};
use foodlink_types::events::LifecycleKind;
use foodlink_types::models::{Donation, DonationStatus, Principal, Role};
use foodlink_types::{FoodlinkError, Result};

/// A requested status change.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Accept {
        estimated_pickup_time: Option<DateTime<Utc>>,
    },
    ConfirmPickup,
    Verify,
    Expire,
    Override(DonationStatus),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Accept { .. } => "accept",
            Self::ConfirmPickup => "confirm-pickup",
            Self::Verify => "verify",
            Self::Expire => "expire",
            Self::Override(_) => "override",
        }
    }
}

/// Who is driving a transition.
#[derive(Debug, Clone)]
pub enum Actor {
    User(Principal),
    /// The deadline clock. Only ever expires donations.
    System,
}

impl Actor {
    pub fn id(&self) -> Option<Uuid> {
        match self {
            Self::User(p) => Some(p.user_id),
            Self::System => None,
        }
    }

    fn role(&self) -> Option<Role> {
        match self {
            Self::User(p) => Some(p.role),
            Self::System => None,
        }
    }
}

/// A validated transition, ready to be committed with compare-and-set.
#[derive(Debug, Clone)]
pub struct Transition {
    pub kind: LifecycleKind,
    pub from: DonationStatus,
    pub to: DonationStatus,
    pub assign_receiver: Option<Uuid>,
    pub stamps: PickupStamps,
}

impl Transition {
    /// The store write. Guards on the status and receiver that were observed
    /// when the plan was made, so a concurrent commit turns this into a no-op.
    pub fn to_write(&self, observed: &Donation, actor_id: Option<Uuid>, at: DateTime<Utc>) -> StatusWrite {
        StatusWrite {
            donation_id: observed.id,
            expected_status: self.from,
            expected_receiver: observed.receiver_id,
            require_unassigned: observed.receiver_id.is_none(),
            new_status: self.to,
            assign_receiver: self.assign_receiver,
            stamps: self.stamps.clone(),
            actor_id,
            at,
        }
    }
}

/// Role-only checks. Never looks at the donation.
pub fn authorize(actor: &Actor, action: &Action) -> Result<()> {
    match (action, actor) {
        (Action::Expire, Actor::System) => Ok(()),
        (_, Actor::System) => Err(FoodlinkError::Unauthorized(format!(
            "the system clock cannot {}",
            action.name()
        ))),
        (Action::Accept { .. }, Actor::User(p)) => match p.role {
            Role::Receiver if p.verified => Ok(()),
            Role::Receiver => Err(FoodlinkError::Unauthorized(
                "receiver account is not verified yet".into(),
            )),
            _ => Err(FoodlinkError::Unauthorized(
                "only receivers can accept donations".into(),
            )),
        },
        (Action::ConfirmPickup, Actor::User(p)) => require_role(p, Role::Receiver, action),
        (Action::Verify | Action::Override(_) | Action::Expire, Actor::User(p)) => {
            require_role(p, Role::Admin, action)
        }
    }
}

fn require_role(principal: &Principal, role: Role, action: &Action) -> Result<()> {
    if principal.role == role {
        Ok(())
    } else {
        Err(FoodlinkError::Unauthorized(format!(
            "{} requires the {} role",
            action.name(),
            role
        )))
    }
}

/// Stateful checks against the current record.
pub fn plan(donation: &Donation, actor: &Actor, action: &Action, now: DateTime<Utc>) -> Result<Transition> {
    let from = donation.status;
    let invalid = || FoodlinkError::invalid_transition(from, action.name());

    let transition = |kind, to, stamps| Transition {
        kind,
        from,
        to,
        assign_receiver: None,
        stamps,
    };

    match action {
        Action::Accept {
            estimated_pickup_time,
        } => {
            if from != DonationStatus::Pending || donation.receiver_id.is_some() {
                return Err(invalid());
            }
            Ok(Transition {
                assign_receiver: actor.id(),
                ..transition(
                    LifecycleKind::Accepted,
                    DonationStatus::Accepted,
                    PickupStamps {
                        accepted_at: Some(now),
                        estimated_pickup_time: *estimated_pickup_time,
                        ..Default::default()
                    },
                )
            })
        }

        Action::ConfirmPickup => {
            if from != DonationStatus::Accepted {
                return Err(invalid());
            }
            if donation.receiver_id != actor.id() {
                return Err(FoodlinkError::Unauthorized(
                    "only the assigned receiver can confirm pickup".into(),
                ));
            }
            Ok(transition(
                LifecycleKind::Picked,
                DonationStatus::Picked,
                PickupStamps {
                    picked_at: Some(now),
                    actual_pickup_time: Some(now),
                    ..Default::default()
                },
            ))
        }

        Action::Verify => {
            if from != DonationStatus::Picked {
                return Err(invalid());
            }
            Ok(transition(
                LifecycleKind::Verified,
                DonationStatus::Verified,
                PickupStamps {
                    verified_at: Some(now),
                    ..Default::default()
                },
            ))
        }

        Action::Expire => {
            if !matches!(from, DonationStatus::Pending | DonationStatus::Accepted) {
                return Err(invalid());
            }
            if actor.role().is_none() && now <= donation.pickup_deadline {
                return Err(invalid());
            }
            Ok(transition(
                LifecycleKind::Expired,
                DonationStatus::Expired,
                PickupStamps::default(),
            ))
        }

        Action::Override(target) => {
            let target = *target;
            if from.is_terminal() || target == from || target == DonationStatus::Pending {
                return Err(invalid());
            }
            // Accepted and later states need someone holding the donation.
            if target != DonationStatus::Expired && donation.receiver_id.is_none() {
                return Err(invalid());
            }
            let stamps = match target {
                DonationStatus::Accepted => PickupStamps {
                    accepted_at: Some(now),
                    ..Default::default()
                },
                DonationStatus::Picked => PickupStamps {
                    picked_at: Some(now),
                    actual_pickup_time: Some(now),
                    ..Default::default()
                },
                DonationStatus::Verified => PickupStamps {
                    verified_at: Some(now),
                    ..Default::default()
                },
                _ => PickupStamps::default(),
            };
            Ok(transition(LifecycleKind::StatusOverride, target, stamps))
        }
    }
}

/// Whether `from -> to` is an edge of the regular state machine (overrides
/// excluded).
pub fn can_transition(from: DonationStatus, to: DonationStatus) -> bool {
    use DonationStatus::*;
    matches!(
        (from, to),
        (Pending, Accepted) | (Accepted, Picked) | (Picked, Verified) | (Pending | Accepted, Expired)
    )
}

/// Donor metadata edit guard.
pub fn check_field_edit(donation: &Donation, principal: &Principal) -> Result<()> {
    if principal.role != Role::Donor || donation.donor_id != principal.user_id {
        return Err(FoodlinkError::Unauthorized(
            "only the donor can edit this donation".into(),
        ));
    }
    if !matches!(
        donation.status,
        DonationStatus::Pending | DonationStatus::Accepted
    ) {
        return Err(FoodlinkError::invalid_transition(donation.status, "edit"));
    }
    Ok(())
}

/// May this principal subscribe to the donation's channel?
pub fn may_watch(donation: &Donation, principal: &Principal) -> bool {
    principal.role == Role::Admin
        || donation.donor_id == principal.user_id
        || donation.receiver_id == Some(principal.user_id)
}

/// May this principal read the record? Receivers can also look at anything
/// still up for grabs.
pub fn may_view(donation: &Donation, principal: &Principal) -> bool {
    may_watch(donation, principal)
        || (principal.role == Role::Receiver && donation.status == DonationStatus::Pending)
}
