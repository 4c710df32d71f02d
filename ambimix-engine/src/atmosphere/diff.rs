//! Atmosphere diffing
//!
//! Compares a target atmosphere against the live channel set. The result
//! drives a crossfade and doubles as a preview of what loading the
//! atmosphere would change. Computing a diff has no side effects.

use std::collections::{HashMap, HashSet};

use ambimix_common::{AtmosphereDefinition, ChannelId, Membership};
use serde::{Deserialize, Serialize};

use crate::audio::SourceResolver;

/// Volume differences at or below this are not reported
pub const VOLUME_EPSILON: f32 = 0.01;

/// A channel currently in the mix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiveChannel {
    pub channel_id: ChannelId,
    pub volume: f32,
}

/// A live channel absent from the target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RemovedChannel {
    pub channel_id: ChannelId,
    /// Volume it is fading out from
    pub volume: f32,
}

/// A channel kept in the mix at a different volume
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeChange {
    pub channel_id: ChannelId,
    pub from: f32,
    pub to: f32,
}

/// What loading a target atmosphere changes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AtmosphereDiff {
    /// Target memberships not live yet, in target order
    pub added: Vec<Membership>,
    /// Live channels the target does not contain
    pub removed: Vec<RemovedChannel>,
    /// Live target channels whose volume moves, in target order
    pub volume_changed: Vec<VolumeChange>,
    /// Target channels whose source cannot be resolved
    pub missing: Vec<ChannelId>,
}

impl AtmosphereDiff {
    /// Whether applying the diff would change nothing audible
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.volume_changed.is_empty()
    }

    /// Channels that will run a fade
    pub fn participant_count(&self) -> usize {
        self.added.len() + self.removed.len() + self.volume_changed.len()
    }

    pub fn added_ids(&self) -> Vec<ChannelId> {
        self.added.iter().map(|m| m.channel_id).collect()
    }

    pub fn removed_ids(&self) -> Vec<ChannelId> {
        self.removed.iter().map(|r| r.channel_id).collect()
    }
}

/// Diff `target` against `live` with the default volume epsilon
pub fn compute_diff(
    target: &AtmosphereDefinition,
    live: &[LiveChannel],
    resolver: &dyn SourceResolver,
) -> AtmosphereDiff {
    compute_diff_with_epsilon(target, live, resolver, VOLUME_EPSILON)
}

/// Diff `target` against `live`
///
/// Live target channels are compared by volume only, so a live channel
/// whose source has since vanished keeps playing. A membership that is
/// not live and cannot be resolved is reported as missing, never added.
pub fn compute_diff_with_epsilon(
    target: &AtmosphereDefinition,
    live: &[LiveChannel],
    resolver: &dyn SourceResolver,
    epsilon: f32,
) -> AtmosphereDiff {
    let live_volumes: HashMap<ChannelId, f32> =
        live.iter().map(|c| (c.channel_id, c.volume)).collect();
    let mut diff = AtmosphereDiff::default();
    let mut seen = HashSet::new();

    for membership in &target.memberships {
        if !seen.insert(membership.channel_id) {
            continue;
        }

        match live_volumes.get(&membership.channel_id) {
            Some(&current) => {
                if (current - membership.volume).abs() > epsilon {
                    diff.volume_changed.push(VolumeChange {
                        channel_id: membership.channel_id,
                        from: current,
                        to: membership.volume,
                    });
                }
            }
            None if !resolver.is_resolvable(membership.channel_id) => {
                diff.missing.push(membership.channel_id);
            }
            None => diff.added.push(membership.clone()),
        }
    }

    diff.removed = live
        .iter()
        .filter(|c| !target.contains(c.channel_id))
        .map(|c| RemovedChannel {
            channel_id: c.channel_id,
            volume: c.volume,
        })
        .collect();

    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SourceHandle;
    use crate::library::LibraryCatalog;

    fn library(ids: &[ChannelId]) -> LibraryCatalog {
        let library = LibraryCatalog::new();
        for &id in ids {
            library.insert(SourceHandle::new(id, format!("{id}.ogg")));
        }
        library
    }

    fn live(pairs: &[(ChannelId, f32)]) -> Vec<LiveChannel> {
        pairs
            .iter()
            .map(|&(channel_id, volume)| LiveChannel { channel_id, volume })
            .collect()
    }

    fn target(pairs: &[(ChannelId, f32)]) -> AtmosphereDefinition {
        pairs
            .iter()
            .fold(AtmosphereDefinition::new("target"), |def, &(id, v)| {
                def.with_membership(Membership::new(id, v))
            })
    }

    #[test]
    fn test_added_and_removed() {
        let diff = compute_diff(
            &target(&[(1, 0.5), (3, 0.6)]),
            &live(&[(1, 0.5), (2, 0.3)]),
            &library(&[1, 2, 3]),
        );
        assert_eq!(diff.added_ids(), vec![3]);
        assert_eq!(diff.removed_ids(), vec![2]);
        assert_eq!(diff.removed[0].volume, 0.3);
        assert!(diff.volume_changed.is_empty());
        assert!(diff.missing.is_empty());
    }

    #[test]
    fn test_volume_threshold() {
        let lib = library(&[1]);
        let unchanged = compute_diff(&target(&[(1, 0.505)]), &live(&[(1, 0.50)]), &lib);
        assert!(unchanged.is_empty());

        let changed = compute_diff(&target(&[(1, 0.52)]), &live(&[(1, 0.50)]), &lib);
        assert_eq!(
            changed.volume_changed,
            vec![VolumeChange { channel_id: 1, from: 0.50, to: 0.52 }]
        );
    }

    #[test]
    fn test_missing_is_not_added() {
        let diff = compute_diff(&target(&[(1, 0.5), (7, 0.5)]), &[], &library(&[1]));
        assert_eq!(diff.added_ids(), vec![1]);
        assert_eq!(diff.missing, vec![7]);
    }

    #[test]
    fn test_output_follows_target_order() {
        let diff = compute_diff(
            &target(&[(5, 0.2), (3, 0.4), (4, 0.9), (1, 0.1)]),
            &live(&[(4, 0.1), (1, 0.8)]),
            &library(&[1, 3, 4, 5]),
        );
        assert_eq!(diff.added_ids(), vec![5, 3]);
        let changed: Vec<_> = diff.volume_changed.iter().map(|c| c.channel_id).collect();
        assert_eq!(changed, vec![4, 1]);
    }

    #[test]
    fn test_live_unresolvable_channel_is_kept() {
        let diff = compute_diff(&target(&[(2, 0.3)]), &live(&[(2, 0.3)]), &library(&[]));
        assert!(diff.is_empty());
        assert!(diff.missing.is_empty());
    }

    #[test]
    fn test_empty_target_removes_everything() {
        let diff = compute_diff(&target(&[]), &live(&[(1, 0.5), (2, 0.3)]), &library(&[1, 2]));
        assert_eq!(diff.removed_ids(), vec![1, 2]);
        assert_eq!(diff.participant_count(), 2);
    }
}
