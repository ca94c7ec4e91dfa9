use fhir::TaskStatus;

/// Whether a caller holding the given Task roles may move a Task from `from` to `to`.
///
/// Only `in-progress` and `on-hold` may be swapped in both directions; every pair not listed
/// below is illegal for everyone.
pub fn is_valid_transition(
    from: TaskStatus,
    to: TaskStatus,
    is_owner: bool,
    is_requester: bool,
) -> bool {
    use TaskStatus::*;

    let owner_or_requester = is_owner || is_requester;
    match (from, to) {
        (Requested, Received | Accepted | Rejected) => is_owner,
        (Requested, Cancelled) => owner_or_requester,
        (Received, Accepted | Rejected) => is_owner,
        (Received, Cancelled) => owner_or_requester,
        (Accepted, InProgress) => is_owner,
        (Accepted, Cancelled) => owner_or_requester,
        (InProgress, OnHold) | (OnHold, InProgress) => owner_or_requester,
        (InProgress, Completed | Failed) => is_owner,
        (Ready, Completed | Failed) => is_owner,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    const ALL: [TaskStatus; 12] = [
        Draft, Requested, Received, Accepted, Rejected, Ready, Cancelled, InProgress, OnHold,
        Failed, Completed, EnteredInError,
    ];

    /// (from, to, owner may, requester may)
    const TABLE: &[(TaskStatus, TaskStatus, bool, bool)] = &[
        (Requested, Received, true, false),
        (Requested, Accepted, true, false),
        (Requested, Rejected, true, false),
        (Requested, Cancelled, true, true),
        (Received, Accepted, true, false),
        (Received, Rejected, true, false),
        (Received, Cancelled, true, true),
        (Accepted, InProgress, true, false),
        (Accepted, Cancelled, true, true),
        (InProgress, OnHold, true, true),
        (OnHold, InProgress, true, true),
        (InProgress, Completed, true, false),
        (InProgress, Failed, true, false),
        (Ready, Completed, true, false),
        (Ready, Failed, true, false),
    ];

    #[test]
    fn test_every_pair_matches_the_table_for_every_role() {
        for from in ALL {
            for to in ALL {
                let listed = TABLE.iter().find(|(f, t, _, _)| *f == from && *t == to);
                let (owner, requester) = listed.map_or((false, false), |(_, _, o, r)| (*o, *r));

                assert_eq!(is_valid_transition(from, to, true, false), owner, "{from}->{to} owner");
                assert_eq!(
                    is_valid_transition(from, to, false, true),
                    requester,
                    "{from}->{to} requester"
                );
                assert_eq!(
                    is_valid_transition(from, to, true, true),
                    owner || requester,
                    "{from}->{to} both"
                );
                assert!(!is_valid_transition(from, to, false, false), "{from}->{to} stranger");
            }
        }
    }

    #[test]
    fn test_reverse_of_one_way_pairs_is_illegal() {
        for (from, to, _, _) in TABLE {
            if matches!((from, to), (InProgress, OnHold) | (OnHold, InProgress)) {
                continue;
            }
            assert!(!is_valid_transition(*to, *from, true, true), "{to}->{from}");
        }
    }

    #[test]
    fn test_terminal_states_never_leave() {
        for from in ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!is_valid_transition(from, to, true, true));
            }
        }
    }
}
