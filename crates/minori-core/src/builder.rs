//! State Builder: one poll's playback facts + the directory's config
//! record, combined into a viewing state.

use minori_pattern::EpisodeMatch;

use crate::config::ConfigRecord;
use crate::source::PlayerVars;
use crate::state::{Episode, ViewingState};

/// Pure per-call combination. A file that does not match the configured
/// pattern, or a config with no usable pattern yet, yields a release state
/// so a stale presence clears instead of lingering.
pub fn build_state(vars: &PlayerVars, config: &ConfigRecord, origin: &str) -> ViewingState {
    let Some(pattern) = &config.pattern else {
        return ViewingState::release(origin);
    };
    let Some(matched) = pattern.apply(&vars.file) else {
        return ViewingState::release(origin);
    };

    let (episode, episode_title) = match matched {
        EpisodeMatch::Movie => (Episode::Movie, None),
        EpisodeMatch::Numbered { episode, title } => (Episode::Numbered(episode), title),
    };

    ViewingState {
        title: config.title.clone(),
        episode: Some(episode),
        episode_title,
        position: Some(vars.position_ms),
        duration: Some(vars.duration_ms),
        phase: Some(vars.phase),
        url: config.url.clone(),
        url_text: (!config.url_text.is_empty()).then(|| config.url_text.clone()),
        image_url: config.image_url.clone(),
        rewatching: Some(config.rewatching),
        origin: Some(origin.to_string()),
        application_id: Some(config.application_id),
    }
}
