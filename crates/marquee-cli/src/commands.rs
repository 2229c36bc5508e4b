//! CLI command implementations

use crate::output;
use anyhow::Context;
use marquee_core::config::{AdHooks, TrackingHooks};
use marquee_core::sim::{SimEngineFactory, SimMediaElement};
use marquee_core::tracking::MemoryWatchTimeStore;
use marquee_core::{ads, resolve_stream_type, AdPhase, PlayerConfig, PlayerSession, StreamHint};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn load_config(path: &Path) -> anyhow::Result<PlayerConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: PlayerConfig =
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Resolve the stream type of a source
pub fn resolve(source: &str, hint: Option<&str>, format: &str) -> anyhow::Result<()> {
    let hint = match hint {
        Some(raw) => Some(
            raw.parse::<StreamHint>()
                .map_err(|e| anyhow::anyhow!(e))?,
        ),
        None => None,
    };
    let stream_type = resolve_stream_type(hint, source);

    #[derive(Serialize)]
    struct Resolved<'a> {
        source: &'a str,
        stream_type: String,
    }

    if output::is_json(format) {
        println!(
            "{}",
            output::json(&Resolved {
                source,
                stream_type: stream_type.to_string(),
            })
        );
    } else {
        output::heading("Source Resolution");
        output::field("source", source);
        output::field("stream type", stream_type);
    }
    Ok(())
}

/// Validate a config file and print a summary
pub fn inspect(path: &Path, format: &str) -> anyhow::Result<()> {
    let config = load_config(path)?;

    if output::is_json(format) {
        println!("{}", output::json(&config));
        return Ok(());
    }

    output::ok(format!("{} is valid", path.display()));
    output::heading("\nPlayer Config");
    output::field("src", &config.src);
    output::field(
        "stream type",
        resolve_stream_type(config.stream_type_hint, &config.src),
    );
    output::field("autoplay", config.autoplay);
    output::field("start muted", config.start_muted);
    output::field("initial volume", config.initial_volume);

    if let Some(ads) = &config.ads {
        output::heading("\nAd Breaks");
        output::field("pre-roll", ads.pre_roll.is_some());
        output::field("mid-rolls configured", ads.mid_rolls.len());
        output::field("post-roll", ads.post_roll.is_some());
        output::field("smart placement", ads.smart_placement.is_some());
        output::field("load timeout", format!("{}ms", ads.load_timeout_ms));
    }
    if let Some(episodes) = &config.episodes {
        output::heading("\nEpisodes");
        output::field("count", episodes.list.len());
        output::field("current", episodes.current_index);
    }
    if let Some(intro) = &config.intro {
        output::heading("\nIntro");
        output::field("window", format!("{}s..{}s", intro.start, intro.end));
    }
    output::heading("\nEngine Recovery");
    output::field("max restarts", config.engine.max_restart_attempts);
    output::field(
        "backoff",
        format!(
            "{}ms doubling to {}ms",
            config.engine.restart_backoff_ms, config.engine.restart_backoff_cap_ms
        ),
    );
    Ok(())
}

/// Plan mid-roll placement against a content duration
pub fn plan(path: &Path, duration: f64, format: &str) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let Some(ads_config) = &config.ads else {
        output::warn("config has no ads section, nothing to plan");
        return Ok(());
    };

    let breaks = ads::plan_mid_rolls(
        &ads_config.mid_rolls,
        duration,
        ads_config.smart_placement.as_ref(),
    );

    if output::is_json(format) {
        println!("{}", output::json(&breaks));
        return Ok(());
    }

    output::heading("Mid-Roll Plan");
    output::field("content duration", format!("{duration}s"));
    output::field("configured", ads_config.mid_rolls.len());
    output::field("surviving", breaks.len());
    for brk in &breaks {
        let at = brk.trigger_time.unwrap_or_default();
        let skip = if brk.skippable {
            format!("skippable after {}s", brk.skip_after)
        } else {
            "not skippable".to_string()
        };
        output::event(at, format!("{} ({skip})", brk.id));
    }
    Ok(())
}

/// Run a simulated playback session from a config
pub async fn run(path: &Path, duration: f64, strict_autoplay: bool) -> anyhow::Result<()> {
    let mut config = load_config(path)?;
    if let Some(ads_config) = config.ads.as_mut() {
        ads_config.hooks = AdHooks::default()
            .with_on_ad_start(|brk| output::event(0.0, format!("ad break {} started", brk.id)))
            .with_on_ad_end(|brk| output::event(0.0, format!("ad break {} finished", brk.id)))
            .with_on_ad_skip(|brk| output::event(0.0, format!("ad break {} skipped", brk.id)))
            .with_on_ad_error(|brk, reason| {
                output::warn(format!("ad break {} failed: {reason}", brk.id))
            });
    }
    config.tracking.hooks = TrackingHooks::default()
        .with_on_viewed(|| output::event(0.0, "view counted"))
        .with_on_watch_time_updated(|seconds| {
            output::event(0.0, format!("watch time reported: {seconds:.0}s"))
        });

    let main = Arc::new(SimMediaElement::with_duration(duration));
    let ad = Arc::new(SimMediaElement::with_duration(15.0));
    if strict_autoplay {
        main.reject_unmuted_play(true);
        ad.reject_unmuted_play(true);
    }
    let factory = Arc::new(SimEngineFactory::new());
    let session = PlayerSession::new(
        config,
        main.clone(),
        ad.clone(),
        factory,
        Box::new(MemoryWatchTimeStore::new()),
    )?;

    output::heading("Session");
    output::field("id", session.id());
    session.load().await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut last_phase = AdPhase::Idle;
    let mut was_playing = false;
    let mut steps = 0u64;
    // Each loop iteration is one simulated second on whichever surface
    // currently has the clock.
    loop {
        steps += 1;
        if steps > (duration as u64 + 300) {
            output::warn("simulation did not settle, stopping");
            break;
        }
        let snap = session.snapshot().await;

        if snap.ads.phase != last_phase {
            output::event(
                snap.playback.current_time,
                format!("ad phase {last_phase} -> {}", snap.ads.phase),
            );
            last_phase = snap.ads.phase;
        }
        if snap.playback.is_playing != was_playing {
            let verb = if snap.playback.is_playing {
                "content playing"
            } else {
                "content paused"
            };
            output::event(snap.playback.current_time, verb);
            was_playing = snap.playback.is_playing;
        }
        if let Some(error) = &snap.error {
            output::warn(format!("playback error: {}", error.message));
            break;
        }
        if snap.ads.phase == AdPhase::Ended {
            break;
        }

        if snap.ads.waiting_for_gesture {
            // Stand in for the viewer tapping the play overlay.
            output::event(snap.playback.current_time, "simulating viewer gesture");
            session.confirm_ad_playback().await;
            tokio::time::sleep(Duration::from_millis(25)).await;
            continue;
        }
        if snap.ads.load_error {
            output::warn("ad failed to load, retrying");
            session.retry_ad_load().await;
            tokio::time::sleep(Duration::from_millis(25)).await;
            continue;
        }

        if snap.ads.active_break.is_some() {
            ad.advance(1.0);
        } else if snap.playback.current_time >= duration {
            // Content finished and no post-roll is owed.
            break;
        } else {
            main.advance(1.0);
        }

        // The mid-roll poll runs on a real 1-second interval; give it a
        // chance to claim a due break before the clock moves on.
        let due = snap
            .ads
            .pending_mid_rolls
            .first()
            .and_then(|b| b.trigger_time)
            .map_or(false, |t| t <= snap.playback.current_time + 1.0);
        let wait = if due { 1100 } else { 25 };
        tokio::time::sleep(Duration::from_millis(wait)).await;
    }

    let snap = session.snapshot().await;
    output::heading("\nFinal State");
    output::field("position", format!("{:.0}s", snap.playback.current_time));
    output::field("ad phase", snap.ads.phase);
    output::field(
        "breaks played",
        snap.ads.played_break_ids.len(),
    );
    session.unload().await;
    Ok(())
}
