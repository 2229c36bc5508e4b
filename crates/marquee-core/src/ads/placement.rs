//! Mid-roll placement planning
//!
//! Turns configured ad spots into scheduled [`AdBreak`]s. With smart
//! placement enabled, mid-roll times are filtered so no break lands too
//! close to the start, the end, or the previous surviving break; with it
//! disabled the configured list plays verbatim, sorted ascending.

use crate::config::{AdSpot, SmartPlacement};
use crate::types::{AdBreak, AdBreakKind};
use std::cmp::Ordering;
use uuid::Uuid;

/// Materialize a configured spot into a scheduled break
///
/// Spots without an explicit id get a fresh UUID, so each source load
/// produces distinct ids and the played-id set never blocks a later load.
pub fn materialize(spot: &AdSpot, kind: AdBreakKind) -> AdBreak {
    AdBreak {
        id: spot
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        kind,
        trigger_time: spot.time,
        url: spot.url.clone(),
        skippable: spot.skippable,
        skip_after: spot.skip_after.max(0.0),
        sponsored_url: spot.sponsored_url.clone(),
    }
}

/// Build the mid-roll queue for one source load
///
/// Spots without a trigger time are dropped. A mid-roll survives smart
/// placement iff its trigger is at least `min_gap_between_ads` from the
/// start, at most `duration - avoid_near_end`, and at least
/// `min_gap_between_ads` after the previous surviving break. Videos
/// shorter than `min_video_duration` get no mid-rolls at all.
pub fn plan_mid_rolls(
    spots: &[AdSpot],
    duration: f64,
    placement: Option<&SmartPlacement>,
) -> Vec<AdBreak> {
    let mut breaks: Vec<AdBreak> = spots
        .iter()
        .filter(|spot| spot.time.is_some())
        .map(|spot| materialize(spot, AdBreakKind::MidRoll))
        .collect();
    breaks.sort_by(|a, b| {
        a.trigger_time
            .partial_cmp(&b.trigger_time)
            .unwrap_or(Ordering::Equal)
    });

    let Some(placement) = placement.filter(|p| p.enabled) else {
        return breaks;
    };
    if duration < placement.min_video_duration {
        return Vec::new();
    }

    let latest = duration - placement.avoid_near_end;
    let mut surviving = Vec::with_capacity(breaks.len());
    let mut previous: Option<f64> = None;
    for brk in breaks {
        let Some(trigger) = brk.trigger_time else {
            continue;
        };
        if trigger < placement.min_gap_between_ads || trigger > latest {
            continue;
        }
        if previous.map_or(false, |p| trigger - p < placement.min_gap_between_ads) {
            continue;
        }
        previous = Some(trigger);
        surviving.push(brk);
    }
    surviving
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spots(times: &[f64]) -> Vec<AdSpot> {
        times
            .iter()
            .enumerate()
            .map(|(i, &t)| {
                AdSpot::new(format!("https://ads.example.com/mid-{i}.mp4"))
                    .at(t)
                    .with_id(format!("mid-{i}"))
            })
            .collect()
    }

    fn placement() -> SmartPlacement {
        SmartPlacement {
            enabled: true,
            min_video_duration: 60.0,
            min_gap_between_ads: 30.0,
            avoid_near_end: 10.0,
        }
    }

    #[test]
    fn smart_placement_filters_start_end_and_gap_violations() {
        let plan = plan_mid_rolls(&spots(&[5.0, 40.0, 70.0, 95.0]), 100.0, Some(&placement()));
        let times: Vec<f64> = plan.iter().filter_map(|b| b.trigger_time).collect();
        // 5 is too close to the start, 95 is inside the end keep-out zone,
        // and 70 - 40 = 30 satisfies the gap exactly.
        assert_eq!(times, vec![40.0, 70.0]);
    }

    #[test]
    fn short_videos_get_no_mid_rolls() {
        let plan = plan_mid_rolls(&spots(&[15.0, 30.0]), 45.0, Some(&placement()));
        assert!(plan.is_empty());
    }

    #[test]
    fn disabled_placement_plays_configured_times_sorted() {
        let mut config = placement();
        config.enabled = false;
        let plan = plan_mid_rolls(&spots(&[70.0, 5.0, 95.0]), 100.0, Some(&config));
        let times: Vec<f64> = plan.iter().filter_map(|b| b.trigger_time).collect();
        assert_eq!(times, vec![5.0, 70.0, 95.0]);
    }

    #[test]
    fn absent_placement_behaves_like_disabled() {
        let plan = plan_mid_rolls(&spots(&[95.0, 5.0]), 100.0, None);
        let times: Vec<f64> = plan.iter().filter_map(|b| b.trigger_time).collect();
        assert_eq!(times, vec![5.0, 95.0]);
    }

    #[test]
    fn spots_without_trigger_times_are_dropped() {
        let mut list = spots(&[40.0]);
        list.push(AdSpot::new("https://ads.example.com/untimed.mp4"));
        let plan = plan_mid_rolls(&list, 100.0, None);
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn materialize_generates_ids_when_missing() {
        let spot = AdSpot::new("https://ads.example.com/pre.mp4");
        let a = materialize(&spot, AdBreakKind::PreRoll);
        let b = materialize(&spot, AdBreakKind::PreRoll);
        assert!(!a.id.is_empty());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn materialize_keeps_explicit_ids_and_clamps_skip_threshold() {
        let mut spot = AdSpot::new("https://ads.example.com/pre.mp4").with_id("pre-1");
        spot.skip_after = -3.0;
        let brk = materialize(&spot, AdBreakKind::PreRoll);
        assert_eq!(brk.id, "pre-1");
        assert_eq!(brk.skip_after, 0.0);
    }
}
