//! Classification of remote failures into the next step of a zone operation.

use crate::error::RemoteError;
use outline_types::EntityId;
use std::time::Duration;

/// What a zone operation does after a remote call failed.
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneOutcome {
    /// Wait and repeat the call. `unbounded` retries ignore the attempt cap.
    Retry {
        after: Option<Duration>,
        unbounded: bool,
    },
    ZoneNotFound,
    UserDeletedZone,
    ChangeTokenExpired,
    LimitExceeded,
    /// Settle the listed records one by one.
    PerRecord(Vec<(EntityId, RemoteError)>),
    /// Give up on this operation.
    Failure(RemoteError),
}

impl ZoneOutcome {
    /// Maps a whole-call error to the next step.
    ///
    /// Zone-level errors hidden inside a partial failure take precedence
    /// over the per-record errors.
    #[must_use]
    pub fn refine(error: RemoteError) -> Self {
        match error {
            RemoteError::NetworkUnavailable => Self::Retry {
                after: None,
                unbounded: true,
            },
            RemoteError::RateLimited { retry_after }
            | RemoteError::ServiceUnavailable { retry_after }
            | RemoteError::ZoneBusy { retry_after } => Self::Retry {
                after: retry_after,
                unbounded: false,
            },
            RemoteError::ZoneNotFound => Self::ZoneNotFound,
            RemoteError::UserDeletedZone => Self::UserDeletedZone,
            RemoteError::ChangeTokenExpired => Self::ChangeTokenExpired,
            RemoteError::LimitExceeded => Self::LimitExceeded,
            RemoteError::PartialFailure(items) => {
                let zone_error = |wanted: &RemoteError| items.iter().any(|(_, e)| e == wanted);
                if zone_error(&RemoteError::UserDeletedZone) {
                    Self::UserDeletedZone
                } else if zone_error(&RemoteError::ZoneNotFound) {
                    Self::ZoneNotFound
                } else if zone_error(&RemoteError::ChangeTokenExpired) {
                    Self::ChangeTokenExpired
                } else {
                    Self::PerRecord(items)
                }
            }
            RemoteError::ServerRecordChanged(record) => {
                let id = record.id.clone();
                Self::PerRecord(vec![(id, RemoteError::ServerRecordChanged(record))])
            }
            other => Self::Failure(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(n: &str) -> EntityId {
        EntityId::Row(1, "doc".into(), n.into())
    }

    #[test]
    fn transient_errors_retry_with_hint() {
        let hint = Some(Duration::from_secs(3));
        assert_eq!(
            ZoneOutcome::refine(RemoteError::ZoneBusy { retry_after: hint }),
            ZoneOutcome::Retry {
                after: hint,
                unbounded: false
            }
        );
        assert_eq!(
            ZoneOutcome::refine(RemoteError::NetworkUnavailable),
            ZoneOutcome::Retry {
                after: None,
                unbounded: true
            }
        );
    }

    #[test]
    fn zone_errors_inside_partial_failure_win() {
        let outcome = ZoneOutcome::refine(RemoteError::PartialFailure(vec![
            (row("a"), RemoteError::BatchRequestFailed),
            (row("b"), RemoteError::UserDeletedZone),
        ]));
        assert_eq!(outcome, ZoneOutcome::UserDeletedZone);

        let outcome = ZoneOutcome::refine(RemoteError::PartialFailure(vec![(
            row("a"),
            RemoteError::ZoneNotFound,
        )]));
        assert_eq!(outcome, ZoneOutcome::ZoneNotFound);
    }

    #[test]
    fn record_errors_are_settled_per_record() {
        let items = vec![
            (row("a"), RemoteError::BatchRequestFailed),
            (row("b"), RemoteError::UnknownItem),
        ];
        assert_eq!(
            ZoneOutcome::refine(RemoteError::PartialFailure(items.clone())),
            ZoneOutcome::PerRecord(items)
        );
    }

    #[test]
    fn unknown_errors_fail() {
        assert_eq!(
            ZoneOutcome::refine(RemoteError::Other("quota".into())),
            ZoneOutcome::Failure(RemoteError::Other("quota".into()))
        );
    }
}
