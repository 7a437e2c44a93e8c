use crate::models::{ComplaintStatus, ServiceRequestStatus};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("cannot move from {from} to {to}")]
    NotAllowed { from: String, to: String },
    #[error("status is already {0}")]
    Unchanged(String),
    #[error("a resolution is required to resolve a complaint")]
    MissingResolution,
    #[error("a scheduled time is required to schedule a service request")]
    MissingSchedule,
}

/// A status enum with a fixed set of legal next states.
pub trait Lifecycle: Copy + PartialEq + std::fmt::Display + 'static {
    fn next_states(&self) -> &'static [Self];

    fn is_terminal(&self) -> bool {
        self.next_states().is_empty()
    }

    fn check_transition(&self, to: Self) -> Result<(), TransitionError> {
        if *self == to {
            return Err(TransitionError::Unchanged(to.to_string()));
        }
        if self.next_states().contains(&to) {
            Ok(())
        } else {
            Err(TransitionError::NotAllowed {
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }
}

impl Lifecycle for ComplaintStatus {
    fn next_states(&self) -> &'static [Self] {
        use ComplaintStatus::*;
        match self {
            New => &[UnderReview, Rejected],
            UnderReview => &[InProgress, AwaitingCustomer, Rejected],
            InProgress => &[AwaitingCustomer, Resolved],
            AwaitingCustomer => &[InProgress, Resolved, Closed],
            Resolved => &[Closed, InProgress],
            Closed | Rejected => &[],
        }
    }
}

impl Lifecycle for ServiceRequestStatus {
    fn next_states(&self) -> &'static [Self] {
        use ServiceRequestStatus::*;
        match self {
            Pending => &[Scheduled, Cancelled],
            Scheduled => &[InProgress, Cancelled],
            InProgress => &[Completed, Cancelled],
            Completed | Cancelled => &[],
        }
    }
}

/// Timestamp columns touched by a complaint transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComplaintStamps {
    pub set_resolved_at: bool,
    pub clear_resolved_at: bool,
    pub set_closed_at: bool,
}

/// Checks a complaint transition and returns the stamps to apply.
///
/// `resolution` is the resolution text the complaint will carry after the
/// change, whether it comes from the request or was already stored.
pub fn plan_complaint_transition(
    from: ComplaintStatus,
    to: ComplaintStatus,
    resolution: Option<&str>,
) -> Result<ComplaintStamps, TransitionError> {
    from.check_transition(to)?;

    if to == ComplaintStatus::Resolved
        && resolution.map(str::trim).filter(|text| !text.is_empty()).is_none()
    {
        return Err(TransitionError::MissingResolution);
    }

    Ok(ComplaintStamps {
        set_resolved_at: to == ComplaintStatus::Resolved,
        clear_resolved_at: from == ComplaintStatus::Resolved && to == ComplaintStatus::InProgress,
        set_closed_at: to == ComplaintStatus::Closed,
    })
}

/// Checks a service request transition. Returns whether `completed_at` should be stamped.
pub fn plan_service_request_transition(
    from: ServiceRequestStatus,
    to: ServiceRequestStatus,
    has_schedule: bool,
) -> Result<bool, TransitionError> {
    from.check_transition(to)?;

    if to == ServiceRequestStatus::Scheduled && !has_schedule {
        return Err(TransitionError::MissingSchedule);
    }

    Ok(to == ServiceRequestStatus::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ComplaintStatus as C;
    use ServiceRequestStatus as S;

    #[test]
    fn complaint_happy_path_is_allowed() {
        let path = [C::New, C::UnderReview, C::InProgress, C::Resolved, C::Closed];
        for pair in path.windows(2) {
            assert!(pair[0].check_transition(pair[1]).is_ok(), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn every_transition_matches_the_table() {
        let allowed = [
            (C::New, C::UnderReview),
            (C::New, C::Rejected),
            (C::UnderReview, C::InProgress),
            (C::UnderReview, C::AwaitingCustomer),
            (C::UnderReview, C::Rejected),
            (C::InProgress, C::AwaitingCustomer),
            (C::InProgress, C::Resolved),
            (C::AwaitingCustomer, C::InProgress),
            (C::AwaitingCustomer, C::Resolved),
            (C::AwaitingCustomer, C::Closed),
            (C::Resolved, C::Closed),
            (C::Resolved, C::InProgress),
        ];
        for from in C::ALL {
            for to in C::ALL {
                let expected = allowed.contains(&(*from, *to));
                assert_eq!(from.check_transition(*to).is_ok(), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn every_service_request_transition_matches_the_table() {
        let allowed = [
            (S::Pending, S::Scheduled),
            (S::Pending, S::Cancelled),
            (S::Scheduled, S::InProgress),
            (S::Scheduled, S::Cancelled),
            (S::InProgress, S::Completed),
            (S::InProgress, S::Cancelled),
        ];
        for from in S::ALL {
            for to in S::ALL {
                let expected = allowed.contains(&(*from, *to));
                assert_eq!(
                    plan_service_request_transition(*from, *to, true).is_ok(),
                    expected,
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exit() {
        assert!(C::Closed.is_terminal());
        assert!(C::Rejected.is_terminal());
        assert!(!C::Resolved.is_terminal());
        assert!(S::Completed.is_terminal());
        assert!(S::Cancelled.is_terminal());
    }

    #[test]
    fn same_state_is_reported_as_unchanged() {
        assert_eq!(
            C::InProgress.check_transition(C::InProgress),
            Err(TransitionError::Unchanged("in_progress".to_string()))
        );
    }

    #[test]
    fn resolving_requires_resolution_text() {
        assert_eq!(
            plan_complaint_transition(C::InProgress, C::Resolved, Some("   ")),
            Err(TransitionError::MissingResolution)
        );
        let stamps = plan_complaint_transition(C::InProgress, C::Resolved, Some("Replaced meter"))
            .unwrap();
        assert!(stamps.set_resolved_at);
        assert!(!stamps.set_closed_at);
    }

    #[test]
    fn reopening_clears_resolution_stamp() {
        let stamps = plan_complaint_transition(C::Resolved, C::InProgress, None).unwrap();
        assert!(stamps.clear_resolved_at);
        let stamps = plan_complaint_transition(C::Resolved, C::Closed, Some("done")).unwrap();
        assert!(stamps.set_closed_at);
        assert!(!stamps.clear_resolved_at);
    }

    #[test]
    fn scheduling_requires_a_time() {
        assert_eq!(
            plan_service_request_transition(S::Pending, S::Scheduled, false),
            Err(TransitionError::MissingSchedule)
        );
        assert_eq!(plan_service_request_transition(S::Pending, S::Scheduled, true), Ok(false));
        assert_eq!(plan_service_request_transition(S::InProgress, S::Completed, true), Ok(true));
        assert!(plan_service_request_transition(S::Pending, S::Completed, true).is_err());
    }
}
