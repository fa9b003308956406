//! Notification fan-out. Each committed change becomes exactly one
//! [`ServerEvent`] addressed to a fixed set of audiences.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use foodlink_types::events::{Audience, DonationNotice, LifecycleKind, ServerEvent};
use foodlink_types::models::{Donation, DonationFields, DonationStatus, Feedback, GeoPoint, Role};

use crate::directory::ChannelDirectory;

/// A committed donation change, carrying the record as it is after the commit.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub kind: LifecycleKind,
    pub donation: Donation,
    pub previous_status: Option<DonationStatus>,
    pub actor_id: Option<Uuid>,
    pub changes: Option<DonationFields>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum Notification {
    Lifecycle(LifecycleEvent),
    ReceiverVerified {
        receiver_id: Uuid,
        at: DateTime<Utc>,
    },
    FeedbackReceived(Feedback),
    LocationShared {
        donation_id: Uuid,
        user_id: Uuid,
        location: GeoPoint,
        at: DateTime<Utc>,
    },
}

/// An event together with the audiences it is addressed to.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedEvent {
    pub audiences: Vec<Audience>,
    pub event: ServerEvent,
}

/// Audiences for a donation change.
pub fn lifecycle_audiences(kind: LifecycleKind, donation: &Donation) -> Vec<Audience> {
    let donor = Audience::User(donation.donor_id);
    let post = Audience::Post(donation.id);
    let receiver = donation.receiver_id.map(Audience::User);
    let admins = Audience::Role(Role::Admin);

    let mut audiences = match kind {
        LifecycleKind::Created => vec![Audience::Role(Role::Receiver), admins],
        LifecycleKind::Accepted | LifecycleKind::Picked => vec![donor, post, admins],
        LifecycleKind::Verified => vec![donor],
        LifecycleKind::FieldsUpdated => vec![post],
        LifecycleKind::Expired => vec![post, admins],
        LifecycleKind::StatusOverride => vec![donor],
    };

    match kind {
        LifecycleKind::Verified | LifecycleKind::StatusOverride => {
            audiences.extend(receiver);
            audiences.push(post);
        }
        LifecycleKind::FieldsUpdated => audiences.extend(receiver),
        _ => {}
    }
    audiences
}

pub fn route(notification: &Notification) -> RoutedEvent {
    match notification {
        Notification::Lifecycle(event) => {
            let d = &event.donation;
            RoutedEvent {
                audiences: lifecycle_audiences(event.kind, d),
                event: ServerEvent::Donation(DonationNotice {
                    kind: event.kind,
                    donation_id: d.id,
                    status: d.status,
                    previous_status: event.previous_status,
                    donor_id: d.donor_id,
                    donor_name: d.donor_name.clone(),
                    receiver_id: d.receiver_id,
                    receiver_name: d.receiver_name.clone(),
                    actor_id: event.actor_id,
                    changes: event.changes.clone(),
                    summary: Some(d.summary()),
                    estimated_pickup_time: d.pickup.estimated_pickup_time,
                    timestamp: event.at,
                }),
            }
        }

        Notification::ReceiverVerified { receiver_id, at } => RoutedEvent {
            audiences: vec![Audience::User(*receiver_id)],
            event: ServerEvent::ReceiverVerified {
                user_id: *receiver_id,
                timestamp: *at,
            },
        },

        Notification::FeedbackReceived(feedback) => RoutedEvent {
            audiences: vec![Audience::User(feedback.donor_id)],
            event: ServerEvent::FeedbackReceived {
                donation_id: feedback.donation_id,
                rating: feedback.rating,
                comment: feedback.comment.clone(),
                timestamp: feedback.created_at,
            },
        },

        Notification::LocationShared {
            donation_id,
            user_id,
            location,
            at,
        } => RoutedEvent {
            audiences: vec![Audience::Post(*donation_id)],
            event: ServerEvent::LocationUpdate {
                donation_id: *donation_id,
                user_id: *user_id,
                location: *location,
                timestamp: *at,
            },
        },
    }
}

/// Hands routed events to the channel directory. Delivery failures to
/// individual connections are not reported back.
#[derive(Clone)]
pub struct NotificationRouter {
    directory: Arc<dyn ChannelDirectory>,
}

impl NotificationRouter {
    pub fn new(directory: Arc<dyn ChannelDirectory>) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &Arc<dyn ChannelDirectory> {
        &self.directory
    }

    pub async fn publish(&self, notification: Notification) -> usize {
        let routed = route(&notification);
        let delivered = self.directory.deliver(&routed.audiences, &routed.event).await;
        debug!(
            "Routed event to [{}]: {} connection(s)",
            routed
                .audiences
                .iter()
                .map(|a| a.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            delivered
        );
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::donation;
    use std::collections::HashSet;

    fn set(audiences: Vec<Audience>) -> HashSet<Audience> {
        audiences.into_iter().collect()
    }

    #[test]
    fn audiences_per_transition() {
        let receiver = Uuid::new_v4();
        let d = donation(DonationStatus::Accepted, Some(receiver));
        let donor = Audience::User(d.donor_id);
        let post = Audience::Post(d.id);
        let admins = Audience::Role(Role::Admin);
        let recv = Audience::User(receiver);

        let cases = [
            (
                LifecycleKind::Created,
                vec![Audience::Role(Role::Receiver), admins],
            ),
            (LifecycleKind::Accepted, vec![donor, post, admins]),
            (LifecycleKind::Picked, vec![donor, post, admins]),
            (LifecycleKind::Verified, vec![donor, recv, post]),
            (LifecycleKind::FieldsUpdated, vec![post, recv]),
            (LifecycleKind::Expired, vec![post, admins]),
            (LifecycleKind::StatusOverride, vec![donor, recv, post]),
        ];
        for (kind, expected) in cases {
            let got = lifecycle_audiences(kind, &d);
            assert_eq!(got.len(), expected.len(), "{:?}", kind);
            assert_eq!(set(got), set(expected), "{:?}", kind);
        }
    }

    #[test]
    fn unassigned_donation_skips_receiver_channel() {
        let d = donation(DonationStatus::Pending, None);
        assert_eq!(
            lifecycle_audiences(LifecycleKind::FieldsUpdated, &d),
            vec![Audience::Post(d.id)]
        );
        assert_eq!(
            lifecycle_audiences(LifecycleKind::StatusOverride, &d),
            vec![Audience::User(d.donor_id), Audience::Post(d.id)]
        );
    }

    #[test]
    fn receiver_verification_is_private() {
        let id = Uuid::new_v4();
        let routed = route(&Notification::ReceiverVerified {
            receiver_id: id,
            at: Utc::now(),
        });
        assert_eq!(routed.audiences, vec![Audience::User(id)]);
    }

    #[test]
    fn lifecycle_notice_carries_record_fields() {
        let d = donation(DonationStatus::Accepted, Some(Uuid::new_v4()));
        let at = Utc::now();
        let routed = route(&Notification::Lifecycle(LifecycleEvent {
            kind: LifecycleKind::Accepted,
            donation: d.clone(),
            previous_status: Some(DonationStatus::Pending),
            actor_id: d.receiver_id,
            changes: None,
            at,
        }));
        match routed.event {
            ServerEvent::Donation(notice) => {
                assert_eq!(notice.donation_id, d.id);
                assert_eq!(notice.status, DonationStatus::Accepted);
                assert_eq!(notice.previous_status, Some(DonationStatus::Pending));
                assert_eq!(notice.receiver_id, d.receiver_id);
                assert_eq!(notice.timestamp, at);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
