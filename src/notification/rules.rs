//! Notification rule table
//!
//! Maps (entity type, event action) to the notification kinds the event
//! fans out into. Built once at startup; events with no entry produce no
//! notifications.

use std::collections::HashMap;

use crate::event::{actions, Event, EventEntity};
use crate::notification::NotificationKind;

/// Static mapping from (entity type, action) to notification kinds
#[derive(Debug, Clone)]
pub struct NotificationRuleTable {
    map: HashMap<(EventEntity, &'static str), Vec<NotificationKind>>,
}

impl NotificationRuleTable {
    /// The standard lending rule set.
    pub fn standard() -> Self {
        use EventEntity::{Loan, Offer};
        use NotificationKind::*;

        let mut map: HashMap<(EventEntity, &'static str), Vec<NotificationKind>> = HashMap::new();
        map.insert((Offer, actions::OFFER_CREATED), vec![OfferReceivedToRequester]);
        map.insert((Offer, actions::OFFER_ACCEPTED), vec![OfferAcceptedToLender]);
        map.insert((Offer, actions::OFFER_REJECTED), vec![OfferRejectedToLender]);
        map.insert(
            (Offer, actions::OFFER_WITHDRAWN),
            vec![OfferWithdrawnToRequester],
        );
        map.insert(
            (Loan, actions::LOAN_RESERVED),
            vec![LoanReservedToBorrower, LoanReservedToLender],
        );
        map.insert((Loan, actions::LOAN_STARTED), vec![LoanStartedToBorrower]);
        map.insert(
            (Loan, actions::LOAN_RETURN_REQUESTED),
            vec![LoanReturnRequestedToLender],
        );
        map.insert(
            (Loan, actions::LOAN_RETURNED),
            vec![LoanReturnConfirmedToBorrower, LoanReturnConfirmedToLender],
        );
        map.insert(
            (Loan, actions::LOAN_RETURN_CANCELED),
            vec![LoanReturnCanceledToLender],
        );

        Self { map }
    }

    /// Notification kinds for one event; empty when the event is not
    /// notification-worthy.
    pub fn kinds_for<'a>(&'a self, event: &Event) -> &'a [NotificationKind] {
        self.map
            .iter()
            .find(|((entity, action), _)| {
                *entity == event.entity_type && *action == event.action.as_str()
            })
            .map(|(_, kinds)| kinds.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn event(entity_type: EventEntity, action: &str) -> Event {
        Event {
            id: Uuid::new_v4(),
            community_id: Uuid::new_v4(),
            actor_user_id: Uuid::new_v4(),
            entity_type,
            entity_id: Uuid::new_v4(),
            action: action.to_string(),
            payload: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_loan_reserved_notifies_both_parties() {
        let rules = NotificationRuleTable::standard();
        let kinds = rules.kinds_for(&event(EventEntity::Loan, actions::LOAN_RESERVED));
        assert!(kinds.contains(&NotificationKind::LoanReservedToBorrower));
        assert!(kinds.contains(&NotificationKind::LoanReservedToLender));
        assert_eq!(kinds.len(), 2);
    }

    #[test]
    fn test_unmapped_actions_produce_nothing() {
        let rules = NotificationRuleTable::standard();
        assert!(rules
            .kinds_for(&event(EventEntity::Item, actions::ITEM_RESERVED))
            .is_empty());
        assert!(rules
            .kinds_for(&event(EventEntity::Request, actions::REQUEST_CLOSED))
            .is_empty());
        assert!(rules.kinds_for(&event(EventEntity::Loan, "SomethingElse")).is_empty());
    }

    #[test]
    fn test_offer_rules_split_by_recipient() {
        let rules = NotificationRuleTable::standard();
        assert_eq!(
            rules.kinds_for(&event(EventEntity::Offer, actions::OFFER_CREATED)),
            &[NotificationKind::OfferReceivedToRequester]
        );
        assert_eq!(
            rules.kinds_for(&event(EventEntity::Offer, actions::OFFER_ACCEPTED)),
            &[NotificationKind::OfferAcceptedToLender]
        );
        assert_eq!(
            rules.kinds_for(&event(EventEntity::Offer, actions::OFFER_WITHDRAWN)),
            &[NotificationKind::OfferWithdrawnToRequester]
        );
    }
}
