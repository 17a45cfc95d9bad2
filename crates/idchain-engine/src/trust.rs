//! Trust computations over graph snapshots.
//!
//! Pure functions: callers load the relevant edges and pass them in, so
//! every node derives the same answer from the same graph.

use std::collections::{HashMap, HashSet};

use idchain_core::{ConnectionLevel, GroupId, IdentityId};

use crate::config::RecoveryConfig;

/// One entry of an identity's outbound connection history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub to: IdentityId,
    pub level: ConnectionLevel,
    pub timestamp: i64,
}

/// Whether an identity whose inbound connectors are `connectors` may join
/// a group with `members`: at least half of the members connected to it.
pub fn is_eligible(connectors: &[IdentityId], members: &[IdentityId]) -> bool {
    let connectors: HashSet<&IdentityId> = connectors.iter().collect();
    let count = members.iter().filter(|m| connectors.contains(m)).count();
    count * 2 >= members.len()
}

/// Outsiders that at least half of a group's members know.
///
/// `outbound` holds each member's current outbound connections. Reported
/// connections do not count.
pub fn eligible_neighbors(
    members: &[IdentityId],
    outbound: &[(IdentityId, Vec<(IdentityId, ConnectionLevel)>)],
) -> Vec<IdentityId> {
    let member_set: HashSet<&IdentityId> = members.iter().collect();
    let mut counts: HashMap<&IdentityId, usize> = HashMap::new();
    let mut order: Vec<&IdentityId> = Vec::new();

    for (_, connections) in outbound {
        for (neighbor, level) in connections {
            if !level.is_known() || member_set.contains(neighbor) {
                continue;
            }
            let count = counts.entry(neighbor).or_insert(0);
            if *count == 0 {
                order.push(neighbor);
            }
            *count += 1;
        }
    }

    order
        .into_iter()
        .filter(|n| counts[n] * 2 >= members.len())
        .cloned()
        .collect()
}

/// Groups to index as eligible for an identity.
///
/// Each candidate is `(group, members connected to the identity, group size)`.
/// Groups the identity already belongs to are excluded by the caller.
pub fn eligible_groups(candidates: &[(GroupId, usize, usize)]) -> Vec<GroupId> {
    candidates
        .iter()
        .filter(|(_, connected, size)| connected * 2 >= *size)
        .map(|(group, _, _)| group.clone())
        .collect()
}

/// The identities allowed to co-sign a key reset at time `now`.
///
/// A recovery connection qualifies once it is older than the activation
/// delay, or immediately if it was set during the bootstrap window that
/// opens with the first recovery connection ever made. A recovery
/// connection that was later downgraded keeps qualifying until the
/// revocation grace has elapsed since the downgrade.
pub fn recovery_connections(
    history: &[HistoryEntry],
    now: i64,
    policy: &RecoveryConfig,
) -> Vec<IdentityId> {
    let mut sorted: Vec<&HistoryEntry> = history.iter().collect();
    sorted.sort_by_key(|entry| entry.timestamp);

    let activation_border = now - policy.activation_delay_ms;
    let revocation_border = now - policy.revocation_grace_ms;
    let mut bootstrap_border: Option<i64> = None;
    let mut result: Vec<IdentityId> = Vec::new();

    for (i, entry) in sorted.iter().enumerate() {
        if entry.level != ConnectionLevel::Recovery || result.contains(&entry.to) {
            continue;
        }
        let bootstrap =
            *bootstrap_border.get_or_insert(entry.timestamp + policy.bootstrap_window_ms);

        let pair: Vec<usize> = (0..sorted.len())
            .filter(|&j| sorted[j].to == entry.to)
            .collect();
        let Some(&last) = pair.last() else {
            continue;
        };

        if sorted[last].level == ConnectionLevel::Recovery {
            if entry.timestamp < activation_border || entry.timestamp < bootstrap {
                result.push(entry.to.clone());
            }
        } else {
            let next = pair
                .iter()
                .position(|&j| j == i)
                .and_then(|pos| pair.get(pos + 1));
            if let Some(&next) = next {
                if sorted[next].timestamp > revocation_border {
                    result.push(entry.to.clone());
                }
            }
        }
    }

    result
}
