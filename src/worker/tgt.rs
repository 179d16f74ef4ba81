use time::{Duration, OffsetDateTime};

use crate::ccache::CredentialCache;

/// A TGT whose renewable lifetime ends within this window is renewed.
pub const RENEWAL_WINDOW: Duration = Duration::minutes(15);

/// Freshness of the TGT found in the credential cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TgtStatus {
    /// The cache holds no TGT.
    Missing,
    Expired { end_time: OffsetDateTime },
    /// The renewable lifetime ends within [`RENEWAL_WINDOW`].
    RenewalDue { renew_till: OffsetDateTime },
    /// Not renewable and ending within [`RENEWAL_WINDOW`].
    ExpiringSoon { end_time: OffsetDateTime },
    Valid {
        end_time: OffsetDateTime,
        renew_till: Option<OffsetDateTime>,
    },
}

/// What has to be done to keep a usable TGT in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketAction {
    Authenticate,
    Renew,
    None,
}

impl TgtStatus {
    pub fn action(self) -> TicketAction {
        match self {
            TgtStatus::Missing | TgtStatus::Expired { .. } | TgtStatus::ExpiringSoon { .. } => {
                TicketAction::Authenticate
            }
            TgtStatus::RenewalDue { .. } => TicketAction::Renew,
            TgtStatus::Valid { .. } => TicketAction::None,
        }
    }
}

/// Classifies the TGT of `tickets` at `now`.
///
/// A ticket without the renewable flag can never be renewed, so its end time takes the place of
/// the renew-till time and it is replaced through a new authentication instead.
pub fn evaluate_tgt(tickets: &CredentialCache, now: OffsetDateTime) -> TgtStatus {
    let Some(tgt) = tickets.tgt() else {
        return TgtStatus::Missing;
    };

    if tgt.end_time < now {
        return TgtStatus::Expired { end_time: tgt.end_time };
    }

    let deadline = now + RENEWAL_WINDOW;
    match tgt.renew_till.filter(|_| tgt.is_renewable()) {
        Some(renew_till) if deadline > renew_till => TgtStatus::RenewalDue { renew_till },
        Some(renew_till) => TgtStatus::Valid {
            end_time: tgt.end_time,
            renew_till: Some(renew_till),
        },
        None if deadline > tgt.end_time => TgtStatus::ExpiringSoon { end_time: tgt.end_time },
        None => TgtStatus::Valid {
            end_time: tgt.end_time,
            renew_till: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::ccache::CachedTicket;
    use crate::flags::TicketFlags;
    use crate::principal::PrincipalName;
    use crate::Secret;

    const NOW: OffsetDateTime = datetime!(2024-03-01 12:00 UTC);

    fn cache(end_time: OffsetDateTime, renew_till: Option<OffsetDateTime>, flags: TicketFlags) -> CredentialCache {
        CredentialCache {
            default_principal: Some(PrincipalName::user("svc", "EXAMPLE.COM")),
            tickets: vec![CachedTicket {
                client: PrincipalName::user("svc", "EXAMPLE.COM"),
                server: PrincipalName::tgt("EXAMPLE.COM"),
                key_type: 18,
                key: Secret::new(vec![0; 32]),
                auth_time: NOW - Duration::hours(1),
                start_time: NOW - Duration::hours(1),
                end_time,
                renew_till,
                flags,
                ticket: vec![0x61, 0x00],
            }],
        }
    }

    fn renewable(end_time: OffsetDateTime, renew_till: OffsetDateTime) -> CredentialCache {
        cache(
            end_time,
            Some(renew_till),
            TicketFlags::RENEWABLE | TicketFlags::INITIAL | TicketFlags::PRE_AUTHENT,
        )
    }

    #[test]
    fn empty_cache_authenticates() {
        let status = evaluate_tgt(&CredentialCache::default(), NOW);

        assert_eq!(status, TgtStatus::Missing);
        assert_eq!(status.action(), TicketAction::Authenticate);
    }

    #[test]
    fn expired_tgt_authenticates_regardless_of_renew_till() {
        let status = evaluate_tgt(
            &renewable(NOW - Duration::minutes(1), NOW + Duration::days(6)),
            NOW,
        );

        assert_eq!(status.action(), TicketAction::Authenticate);
    }

    #[test]
    fn renew_till_within_window_renews() {
        let status = evaluate_tgt(
            &renewable(NOW + Duration::hours(8), NOW + Duration::minutes(14)),
            NOW,
        );

        assert_eq!(status.action(), TicketAction::Renew);
    }

    #[test]
    fn renew_till_beyond_window_does_nothing() {
        let status = evaluate_tgt(
            &renewable(NOW + Duration::hours(8), NOW + Duration::minutes(16)),
            NOW,
        );

        assert_eq!(status.action(), TicketAction::None);
    }

    #[test]
    fn unrenewable_tgt_is_replaced_before_it_ends() {
        let flags = TicketFlags::INITIAL;

        assert_eq!(
            evaluate_tgt(&cache(NOW + Duration::minutes(10), None, flags), NOW).action(),
            TicketAction::Authenticate
        );
        assert_eq!(
            evaluate_tgt(&cache(NOW + Duration::hours(10), None, flags), NOW).action(),
            TicketAction::None
        );
        // renew-till without the renewable flag is ignored
        assert_eq!(
            evaluate_tgt(&cache(NOW + Duration::minutes(10), Some(NOW + Duration::days(7)), flags), NOW).action(),
            TicketAction::Authenticate
        );
    }

    #[test]
    fn service_tickets_are_not_tgts() {
        let mut tickets = renewable(NOW + Duration::hours(8), NOW + Duration::days(7));
        tickets.tickets[0].server = PrincipalName::service("HTTP/app.example.com", "EXAMPLE.COM");

        assert_eq!(evaluate_tgt(&tickets, NOW), TgtStatus::Missing);
    }
}
