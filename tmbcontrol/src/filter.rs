//! Change detection for probe snapshots.
//!
//! A probe produces snapshots far more often than anything downstream cares
//! about: every `timeupdate` event fires several times per second while a
//! track plays. The filter only lets a snapshot through when something other
//! than the playback position moved.

use crate::model::MediaSnapshot;
use crate::probe::document::MediaEventKind;

/// Why a snapshot was produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// Playback-affecting event on a tracked element.
    Event(MediaEventKind),
    /// Periodic refresh while playing.
    Heartbeat,
    /// A media element was discovered; always emitted.
    NewElement,
    /// Delayed refresh after the page finished loading.
    Initial,
}

/// Per-probe deduplication state.
#[derive(Debug, Default)]
pub struct ChangeFilter {
    last_emitted: Option<MediaSnapshot>,
}

impl ChangeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides whether `snapshot` goes downstream.
    ///
    /// Returns the snapshot to emit and records it as the new baseline, or
    /// `None` when it only differs from the baseline by position.
    pub fn offer(&mut self, snapshot: MediaSnapshot, trigger: Trigger) -> Option<MediaSnapshot> {
        let emit = match (&self.last_emitted, trigger) {
            (_, Trigger::NewElement) => true,
            (None, _) => true,
            (Some(last), _) => !last.same_state_as(&snapshot),
        };

        if emit {
            self.last_emitted = Some(snapshot.clone());
            Some(snapshot)
        } else {
            None
        }
    }

    pub fn last_emitted(&self) -> Option<&MediaSnapshot> {
        self.last_emitted.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(playing: bool, position: f64) -> MediaSnapshot {
        MediaSnapshot {
            playing,
            title: "X".into(),
            artist: "Y".into(),
            album: String::new(),
            duration: 200.0,
            position,
            volume: 1.0,
            muted: false,
        }
    }

    #[test]
    fn test_position_only_changes_forward_first_snapshot_only() {
        let mut filter = ChangeFilter::new();
        let tick = Trigger::Event(MediaEventKind::TimeUpdate);

        let forwarded: Vec<_> = [0.5, 1.0, 7.0, 42.0, 3.0]
            .into_iter()
            .filter_map(|p| filter.offer(snapshot(true, p), tick))
            .collect();

        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].position, 0.5);
    }

    #[test]
    fn test_play_state_change_forwards_even_with_same_position() {
        let mut filter = ChangeFilter::new();
        let a = filter.offer(snapshot(true, 1.0), Trigger::Event(MediaEventKind::Play));
        let b = filter.offer(snapshot(true, 5.0), Trigger::Heartbeat);
        let c = filter.offer(snapshot(false, 5.0), Trigger::Event(MediaEventKind::Pause));

        assert!(a.is_some());
        assert!(b.is_none());
        assert_eq!(c.map(|s| s.playing), Some(false));
        // the baseline now carries the paused state
        assert!(!filter.last_emitted().unwrap().playing);
    }

    #[test]
    fn test_any_non_position_field_counts() {
        let base = snapshot(true, 1.0);
        let variants = [
            MediaSnapshot { title: "Other".into(), ..base.clone() },
            MediaSnapshot { artist: "Other".into(), ..base.clone() },
            MediaSnapshot { album: "Other".into(), ..base.clone() },
            MediaSnapshot { duration: 10.0, ..base.clone() },
            MediaSnapshot { volume: 0.3, ..base.clone() },
            MediaSnapshot { muted: true, ..base.clone() },
        ];

        for variant in variants {
            let mut filter = ChangeFilter::new();
            filter.offer(base.clone(), Trigger::Heartbeat);
            assert!(
                filter.offer(variant.clone(), Trigger::Heartbeat).is_some(),
                "{variant:?} should be forwarded"
            );
        }
    }

    #[test]
    fn test_new_element_always_emitted() {
        let mut filter = ChangeFilter::new();
        filter.offer(snapshot(true, 1.0), Trigger::Heartbeat);
        let again = filter.offer(snapshot(true, 1.0), Trigger::NewElement);
        assert!(again.is_some());
    }
}
