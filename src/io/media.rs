//! Narration media - URL resolution, loading and the playback handle
//!
//! `MediaBackend` turns a point into a playing `MediaHandle`. The HTTP backend
//! probes the narration URL and then plays through a headless clock, which is
//! what a runner without an audio device can offer. The offline backend fails
//! every load so the controller falls back to simulated playback.

use crate::domain::error::MediaError;
use crate::domain::types::{Point, Route};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A loaded narration track. All positions are in seconds.
pub trait MediaHandle: Send {
    fn play(&mut self);
    fn pause(&mut self);
    fn seek(&mut self, seconds: f64);
    fn current_time(&self) -> f64;
    /// Media-reported duration, `None` until known
    fn duration(&self) -> Option<f64>;
    fn is_ended(&self) -> bool;
}

#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Where the narration for `point` lives
    fn resolve_audio_url(&self, route: &Route, point: &Point) -> String;

    /// Load `url` and start playing. `nominal_secs` is the catalog's length hint.
    async fn load_and_play(&self, url: &str, nominal_secs: f64) -> Result<Box<dyn MediaHandle>, MediaError>;
}

/// Join base URL, route folder and point file. Absolute file URLs are used as is.
pub fn resolve_audio_url(base_url: &str, route: &Route, point: &Point) -> String {
    let file = point.audio_file.as_str();
    if file.starts_with("http://") || file.starts_with("https://") {
        return file.to_string();
    }

    let mut url = String::with_capacity(base_url.len() + route.audio_folder.len() + file.len() + 2);
    for part in [base_url, route.audio_folder.as_str(), file] {
        let part = part.trim_matches('/');
        if part.is_empty() {
            continue;
        }
        if !url.is_empty() {
            url.push('/');
        }
        url.push_str(part);
    }
    url
}

/// Headless playback clock. Advances in real (tokio) time while playing.
#[derive(Debug)]
pub struct ClockHandle {
    /// Position accumulated before the current play span
    offset: f64,
    playing_since: Option<Instant>,
    length: f64,
    reported_duration: Option<f64>,
}

impl ClockHandle {
    /// `reported_duration` is what the handle exposes as `duration()`;
    /// `length` is when the clock stops.
    pub fn new(length: f64, reported_duration: Option<f64>) -> Self {
        Self {
            offset: 0.0,
            playing_since: None,
            length: length.max(0.0),
            reported_duration,
        }
    }
}

impl MediaHandle for ClockHandle {
    fn play(&mut self) {
        if self.playing_since.is_none() && !self.is_ended() {
            self.playing_since = Some(Instant::now());
        }
    }

    fn pause(&mut self) {
        self.offset = self.current_time();
        self.playing_since = None;
    }

    fn seek(&mut self, seconds: f64) {
        self.offset = seconds.clamp(0.0, self.length);
        if self.playing_since.is_some() {
            self.playing_since = Some(Instant::now());
        }
    }

    fn current_time(&self) -> f64 {
        let running = self.playing_since.map_or(0.0, |since| since.elapsed().as_secs_f64());
        (self.offset + running).min(self.length)
    }

    fn duration(&self) -> Option<f64> {
        self.reported_duration
    }

    fn is_ended(&self) -> bool {
        self.current_time() >= self.length
    }
}

/// Probes narration over HTTP, then plays it on a `ClockHandle`
pub struct HttpMediaBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMediaBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url: base_url.into() })
    }
}

#[async_trait]
impl MediaBackend for HttpMediaBackend {
    fn resolve_audio_url(&self, route: &Route, point: &Point) -> String {
        resolve_audio_url(&self.base_url, route, point)
    }

    async fn load_and_play(&self, url: &str, nominal_secs: f64) -> Result<Box<dyn MediaHandle>, MediaError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| MediaError::Unavailable(e.to_string()))?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => return Err(MediaError::NotFound(url.to_string())),
            s => return Err(MediaError::Unavailable(format!("{url}: HTTP {s}"))),
        }

        debug!(url = %url, nominal_secs = %nominal_secs, "media_probe_ok");

        let mut handle = ClockHandle::new(nominal_secs, None);
        handle.play();
        Ok(Box::new(handle))
    }
}

/// Backend for runs without a media server. Every load fails, which puts the
/// controller on its simulated playback path.
pub struct OfflineMediaBackend;

#[async_trait]
impl MediaBackend for OfflineMediaBackend {
    fn resolve_audio_url(&self, route: &Route, point: &Point) -> String {
        resolve_audio_url("", route, point)
    }

    async fn load_and_play(&self, url: &str, _nominal_secs: f64) -> Result<Box<dyn MediaHandle>, MediaError> {
        Err(MediaError::Unavailable(format!("offline: {url}")))
    }
}
