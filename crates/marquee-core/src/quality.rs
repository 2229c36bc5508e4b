//! Quality control facade
//!
//! Stateless translation from a [`QualitySelection`] to protocol-specific
//! engine calls. HLS pins by ladder index through current level, next
//! level, and the autolevel cap together; DASH disables auto switching
//! and selects a representation by id. Failures degrade to a no-op with a
//! diagnostic, never to a playback interruption.

use crate::engine::Attachment;
use crate::types::QualitySelection;
use tracing::{debug, warn};

/// Apply a selection to whatever is attached
///
/// Returns false when the attachment cannot express the selection: no
/// engine, an unknown level or id, or an id-based selection against an
/// index-addressed HLS ladder. Index-based selections against DASH are
/// resolved positionally through the representation list.
pub fn apply_selection(attachment: &Attachment, selection: &QualitySelection) -> bool {
    match attachment {
        Attachment::Hls(engine) => match selection {
            QualitySelection::Auto => {
                engine.set_current_level(-1);
                engine.set_next_level(-1);
                engine.set_autolevel_cap(-1);
                true
            }
            QualitySelection::Level(index) => {
                if *index >= engine.levels().len() {
                    warn!(index, "hls level out of range, leaving selection alone");
                    return false;
                }
                let level = *index as i32;
                engine.set_current_level(level);
                engine.set_next_level(level);
                engine.set_autolevel_cap(level);
                true
            }
            QualitySelection::Representation(id) => {
                warn!(id = %id, "representation ids do not address an hls ladder");
                false
            }
        },
        Attachment::Dash(engine) => match selection {
            QualitySelection::Auto => {
                engine.set_auto_switch(true);
                true
            }
            QualitySelection::Level(index) => {
                let reps = engine.representations();
                match reps.get(*index).and_then(|r| r.id.clone()) {
                    Some(id) => {
                        engine.set_auto_switch(false);
                        if engine.select_representation(&id) {
                            true
                        } else {
                            warn!(id = %id, "dash engine rejected representation");
                            false
                        }
                    }
                    None => {
                        warn!(index, "no dash representation at that position");
                        false
                    }
                }
            }
            QualitySelection::Representation(id) => {
                engine.set_auto_switch(false);
                if engine.select_representation(id) {
                    true
                } else {
                    warn!(id = %id, "dash engine rejected representation");
                    false
                }
            }
        },
        Attachment::Native | Attachment::Direct => {
            debug!("no engine attached, quality selection is a no-op");
            false
        }
    }
}

/// Re-apply a persisted selection after a manifest (re)load
///
/// Returns the selection actually in force afterwards: the persisted one
/// when the new ladder can express it, otherwise Auto with any stale pin
/// or cap cleared.
pub fn reapply_after_manifest(
    attachment: &Attachment,
    persisted: &QualitySelection,
) -> QualitySelection {
    if persisted.is_auto() {
        apply_selection(attachment, &QualitySelection::Auto);
        return QualitySelection::Auto;
    }
    if apply_selection(attachment, persisted) {
        persisted.clone()
    } else {
        debug!(selection = %persisted, "persisted quality no longer applies, resetting to auto");
        apply_selection(attachment, &QualitySelection::Auto);
        QualitySelection::Auto
    }
}
