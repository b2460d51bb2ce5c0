//! Bookkeeping for inbound media bound to playback

use crate::peer::TrackKind;

/// Change to the set of bound playback sinks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkChange {
    Bound { kind: TrackKind, track_id: String },
    Removed { kind: TrackKind, track_id: String },
}

/// At most one audio and one displayed video sink
///
/// A new video track is staged and only replaces the displayed one once it
/// actually plays, so a reconnect never leaves a blank screen.
#[derive(Debug, Default)]
pub struct MediaSinks {
    audio: Option<String>,
    video: Option<String>,
    staged_video: Option<String>,
}

impl MediaSinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an audio track, replacing any previous audio sink
    pub fn bind_audio(&mut self, track_id: &str) -> Vec<SinkChange> {
        let mut changes = Vec::new();
        if let Some(previous) = self.audio.replace(track_id.to_string()) {
            changes.push(SinkChange::Removed {
                kind: TrackKind::Audio,
                track_id: previous,
            });
        }
        changes.push(SinkChange::Bound {
            kind: TrackKind::Audio,
            track_id: track_id.to_string(),
        });
        changes
    }

    pub fn stage_video(&mut self, track_id: &str) {
        self.staged_video = Some(track_id.to_string());
    }

    /// Promote the staged video track once it plays
    pub fn promote_video(&mut self, track_id: &str) -> Vec<SinkChange> {
        if self.staged_video.as_deref() == Some(track_id) {
            self.staged_video = None;
        }
        let mut changes = Vec::new();
        match self.video.replace(track_id.to_string()) {
            Some(previous) if previous == track_id => return changes,
            Some(previous) => changes.push(SinkChange::Removed {
                kind: TrackKind::Video,
                track_id: previous,
            }),
            None => {}
        }
        changes.push(SinkChange::Bound {
            kind: TrackKind::Video,
            track_id: track_id.to_string(),
        });
        changes
    }

    pub fn audio(&self) -> Option<&str> {
        self.audio.as_deref()
    }

    pub fn video(&self) -> Option<&str> {
        self.video.as_deref()
    }

    pub fn clear(&mut self) -> Vec<SinkChange> {
        self.staged_video = None;
        let mut changes = Vec::new();
        if let Some(track_id) = self.audio.take() {
            changes.push(SinkChange::Removed {
                kind: TrackKind::Audio,
                track_id,
            });
        }
        if let Some(track_id) = self.video.take() {
            changes.push(SinkChange::Removed {
                kind: TrackKind::Video,
                track_id,
            });
        }
        changes
    }
}
