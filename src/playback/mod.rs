//! Audio playback seam. Decoding and output are left to implementors; the
//! crate ships a stand-in that only tracks state and logs.

use log::debug;

use crate::{
    catalog::Catalog,
    models::{Item, Participant},
};

pub const MIN_ZOOM: f32 = 1.0;
pub const MAX_ZOOM: f32 = 20.0;
const ZOOM_STEP: f32 = 1.5;

pub trait Playback: Send {
    /// Loads the clip at `url`, stopping whatever was playing and resetting zoom.
    fn load(&mut self, url: &str);
    /// Toggles between playing and paused.
    fn play(&mut self);
    fn stop(&mut self);
    fn set_rate(&mut self, rate: f32);
    fn zoom_in(&mut self) -> f32;
    fn zoom_out(&mut self) -> f32;
    fn is_playing(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingPlayback {
    url: Option<String>,
    playing: bool,
    rate: f32,
    zoom: f32,
}

impl Default for LoggingPlayback {
    fn default() -> Self {
        Self {
            url: None,
            playing: false,
            rate: 1.0,
            zoom: MIN_ZOOM,
        }
    }
}

impl LoggingPlayback {
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }
}

impl Playback for LoggingPlayback {
    fn load(&mut self, url: &str) {
        debug!("Loading audio {url}");
        self.url = Some(url.to_string());
        self.playing = false;
        self.zoom = MIN_ZOOM;
    }

    fn play(&mut self) {
        if self.url.is_none() {
            return;
        }
        self.playing = !self.playing;
        debug!("Playback {}", if self.playing { "started" } else { "paused" });
    }

    fn stop(&mut self) {
        self.playing = false;
    }

    fn set_rate(&mut self, rate: f32) {
        debug!("Playback rate {rate}");
        self.rate = rate;
    }

    fn zoom_in(&mut self) -> f32 {
        self.zoom = (self.zoom * ZOOM_STEP).min(MAX_ZOOM);
        self.zoom
    }

    fn zoom_out(&mut self) -> f32 {
        self.zoom = (self.zoom / ZOOM_STEP).max(MIN_ZOOM);
        self.zoom
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

/// Feeds the player on navigation, skipping the reload when consecutive
/// items share a recording (same participant, same slide).
pub struct ItemLoader<P: Playback> {
    player: P,
    loaded: Option<String>,
}

impl<P: Playback> ItemLoader<P> {
    pub fn new(player: P) -> Self {
        Self {
            player,
            loaded: None,
        }
    }

    /// Returns true when a new clip was loaded.
    pub fn show(&mut self, catalog: &Catalog, participant: &Participant, item: &Item) -> bool {
        let key = format!("{}:{}", participant.key, item.slide);
        if self.loaded.as_deref() == Some(key.as_str()) {
            return false;
        }
        self.player.load(&catalog.audio_url(participant, item.slide));
        self.loaded = Some(key);
        true
    }

    /// Forgets the loaded clip so the next `show` reloads.
    pub fn reset(&mut self) {
        self.player.stop();
        self.loaded = None;
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut P {
        &mut self.player
    }
}
