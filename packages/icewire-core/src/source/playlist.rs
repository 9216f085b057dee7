//! Local playlist source with drift-corrected pacing.
//!
//! Every tick pushes one fixed-size chunk and then sleeps until the instant
//! at which the total bytes sent so far should have been played at the
//! nominal bitrate. Deadlines derive from the start instant, never from the
//! previous tick, so timer jitter does not accumulate.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{next_source_id, Source, SourceKind};
use crate::state::MountConfig;
use crate::stream::{Mount, StreamMetadata};

/// Lists playable files in `dir`, sorted by file name.
///
/// Extensions are matched case-insensitively. An unreadable directory yields
/// an empty list.
pub fn list_tracks(dir: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("[Playlist] Cannot read {}: {}", dir.display(), e);
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        })
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    files
}

/// Track title shown to listeners: the file name without its extension.
fn track_title(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

struct Playback {
    files: Vec<PathBuf>,
    index: Option<usize>,
    track: Bytes,
    offset: usize,
    bytes_sent: u64,
    started_at: Instant,
}

impl Playback {
    fn deadline(&self, bytes_per_sec: f64) -> Instant {
        self.started_at + Duration::from_secs_f64(self.bytes_sent as f64 / bytes_per_sec)
    }
}

struct PlaylistShared {
    mount: Weak<Mount>,
    mount_path: String,
    dir: PathBuf,
    extensions: Vec<String>,
    chunk_size: usize,
    bytes_per_sec: f64,
    playback: Mutex<Option<Playback>>,
}

impl PlaylistShared {
    /// Loads the next readable track, wrapping around, and installs it.
    ///
    /// Files are read without holding the playback lock. Gives up after
    /// every file failed to load once in a row.
    async fn advance(&self, mount: &Mount) -> bool {
        let (files, mut index) = match self.playback.lock().as_ref() {
            Some(playback) => (playback.files.clone(), playback.index),
            None => return false,
        };
        let count = files.len();
        for _ in 0..count {
            let next = index.map_or(0, |i| (i + 1) % count);
            index = Some(next);
            let path = &files[next];
            match tokio::fs::read(path).await {
                Ok(data) if !data.is_empty() => {
                    {
                        let mut guard = self.playback.lock();
                        let Some(playback) = guard.as_mut() else {
                            return false;
                        };
                        playback.index = Some(next);
                        playback.track = Bytes::from(data);
                        playback.offset = 0;
                    }
                    let title = track_title(path);
                    log::info!("[Playlist] {} now playing: {}", self.mount_path, title);
                    mount.update_metadata(StreamMetadata::titled(title));
                    return true;
                }
                Ok(_) => log::warn!("[Playlist] Skipping empty file {}", path.display()),
                Err(e) => log::warn!("[Playlist] Cannot read {}: {}", path.display(), e),
            }
        }
        false
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.playback
            .lock()
            .as_ref()
            .map(|p| p.deadline(self.bytes_per_sec))
    }

    /// Pushes one chunk, loading the next track first when needed.
    ///
    /// The push happens under the playback lock and only while `cancel` is
    /// still live, so nothing reaches the mount once `pause` has returned.
    async fn tick(&self, cancel: &CancellationToken) -> bool {
        let Some(mount) = self.mount.upgrade() else {
            return false;
        };
        let needs_track = match self.playback.lock().as_ref() {
            Some(playback) => playback.offset >= playback.track.len(),
            None => return false,
        };
        if needs_track && !self.advance(&mount).await {
            log::error!(
                "[Playlist] {} has no playable files left in {}",
                self.mount_path,
                self.dir.display()
            );
            return false;
        }

        let mut guard = self.playback.lock();
        let Some(playback) = guard.as_mut() else {
            return false;
        };
        if cancel.is_cancelled() {
            return false;
        }
        let end = (playback.offset + self.chunk_size).min(playback.track.len());
        let chunk = playback.track.slice(playback.offset..end);
        playback.offset = end;
        playback.bytes_sent += chunk.len() as u64;
        mount.push_audio(chunk);
        true
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let Some(deadline) = self.next_deadline() else {
                break;
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }
            let pushed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                pushed = self.tick(&cancel) => pushed,
            };
            if !pushed {
                if cancel.is_cancelled() {
                    return;
                }
                break;
            }
        }
        log::debug!("[Playlist] {} tick loop finished", self.mount_path);
    }
}

struct Control {
    task: Option<CancellationToken>,
    paused: bool,
    stopped: bool,
}

/// Plays the audio files of a directory in a loop.
pub struct PlaylistSource {
    id: u64,
    shared: Arc<PlaylistShared>,
    control: Mutex<Control>,
}

impl PlaylistSource {
    /// Creates a playlist for `mount` from its configuration.
    pub fn new(
        mount: &Arc<Mount>,
        config: &MountConfig,
        chunk_size: usize,
        extensions: Vec<String>,
    ) -> Arc<Self> {
        let bitrate = config.bitrate.max(1);
        Arc::new(Self {
            id: next_source_id(),
            shared: Arc::new(PlaylistShared {
                mount: Arc::downgrade(mount),
                mount_path: mount.path().to_string(),
                dir: config.music_dir.clone(),
                extensions,
                chunk_size: chunk_size.max(1),
                bytes_per_sec: f64::from(bitrate) * 1000.0 / 8.0,
                playback: Mutex::new(None),
            }),
            control: Mutex::new(Control {
                task: None,
                paused: false,
                stopped: false,
            }),
        })
    }

    /// Total audio bytes pushed since start.
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.shared
            .playback
            .lock()
            .as_ref()
            .map_or(0, |p| p.bytes_sent)
    }

    fn spawn(&self, control: &mut Control) {
        let cancel = CancellationToken::new();
        control.task = Some(cancel.clone());
        tokio::spawn(self.shared.clone().run(cancel));
    }
}

impl Source for PlaylistSource {
    fn id(&self) -> u64 {
        self.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Playlist
    }

    fn start(&self) {
        let mut control = self.control.lock();
        if control.stopped || control.task.is_some() || self.shared.playback.lock().is_some() {
            return;
        }
        let files = list_tracks(&self.shared.dir, &self.shared.extensions);
        if files.is_empty() {
            log::error!(
                "[Playlist] No playable files in {}",
                self.shared.dir.display()
            );
            return;
        }
        log::info!(
            "[Playlist] {} starting with {} tracks from {}",
            self.shared.mount_path,
            files.len(),
            self.shared.dir.display()
        );
        *self.shared.playback.lock() = Some(Playback {
            files,
            index: None,
            track: Bytes::new(),
            offset: 0,
            bytes_sent: 0,
            started_at: Instant::now(),
        });
        self.spawn(&mut control);
    }

    fn stop(&self) {
        let mut control = self.control.lock();
        if control.stopped {
            return;
        }
        control.stopped = true;
        if let Some(task) = control.task.take() {
            task.cancel();
        }
        log::info!("[Playlist] {} stopped", self.shared.mount_path);
    }

    fn supports_pause(&self) -> bool {
        true
    }

    fn pause(&self) {
        let mut control = self.control.lock();
        if control.stopped || control.paused {
            return;
        }
        if let Some(task) = control.task.take() {
            task.cancel();
            control.paused = true;
            // Waits out a push already in flight on the tick task.
            drop(self.shared.playback.lock());
            log::info!("[Playlist] {} paused", self.shared.mount_path);
        }
    }

    fn resume(&self) {
        let mut control = self.control.lock();
        if control.stopped {
            return;
        }
        if !control.paused {
            return;
        }
        control.paused = false;
        // started_at and bytes_sent are kept, so pacing stays anchored to
        // the original start.
        let title = {
            let guard = self.shared.playback.lock();
            let Some(playback) = guard.as_ref() else {
                return;
            };
            playback
                .index
                .map(|i| track_title(&playback.files[i]))
        };
        if let (Some(title), Some(mount)) = (title, self.shared.mount.upgrade()) {
            mount.update_metadata(StreamMetadata::titled(title));
        }
        log::info!("[Playlist] {} resumed", self.shared.mount_path);
        self.spawn(&mut control);
    }

    fn describe(&self) -> String {
        self.shared.dir.display().to_string()
    }
}

impl Drop for PlaylistSource {
    fn drop(&mut self) {
        if let Some(task) = self.control.get_mut().task.take() {
            task.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MountEvent;
    use crate::state::StreamingConfig;

    fn write_track(dir: &Path, name: &str, len: usize) {
        std::fs::write(dir.join(name), vec![0xAB; len]).unwrap();
    }

    fn setup(dir: &Path) -> (Arc<Mount>, Arc<PlaylistSource>) {
        let streaming = StreamingConfig {
            event_channel_capacity: 1024,
            ..StreamingConfig::default()
        };
        let config = MountConfig::playlist("/radio", dir);
        let mount = Mount::new(config.clone(), &streaming);
        let playlist = PlaylistSource::new(&mount, &config, 4096, vec!["mp3".into()]);
        mount.set_source(playlist.clone());
        (mount, playlist)
    }

    fn titles(events: &mut tokio::sync::broadcast::Receiver<MountEvent>) -> Vec<String> {
        let mut titles = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let MountEvent::MetadataUpdated { title: Some(t), .. } = event {
                titles.push(t);
            }
        }
        titles
    }

    #[test]
    fn lists_matching_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write_track(dir.path(), "b.mp3", 1);
        write_track(dir.path(), "a.MP3", 1);
        write_track(dir.path(), "notes.txt", 1);
        let files = list_tracks(dir.path(), &["mp3".to_string()]);
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.MP3", "b.mp3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn paces_bytes_to_bitrate_and_cycles_tracks() {
        let dir = tempfile::tempdir().unwrap();
        write_track(dir.path(), "a.mp3", 40_000);
        write_track(dir.path(), "b.mp3", 24_000);
        let (mount, playlist) = setup(dir.path());
        let mut events = mount.subscribe_events();

        playlist.start();
        tokio::time::sleep(Duration::from_secs(10)).await;

        // 128 kbps = 16000 bytes per second
        let sent = playlist.bytes_sent() as i64;
        assert!((sent - 160_000).abs() <= 4096, "sent {sent}");
        assert_eq!(mount.stats().bytes_in as i64, sent);
        assert_eq!(titles(&mut events), vec!["a", "b", "a", "b", "a"]);
        playlist.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn pause_holds_output_and_resume_republishes_title() {
        let dir = tempfile::tempdir().unwrap();
        write_track(dir.path(), "only.mp3", 100_000);
        let (mount, playlist) = setup(dir.path());

        playlist.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        playlist.pause();
        let at_pause = playlist.bytes_sent();
        let bytes_in = mount.stats().bytes_in;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(playlist.bytes_sent(), at_pause);
        assert_eq!(mount.stats().bytes_in, bytes_in);

        mount.update_metadata(StreamMetadata::titled("someone else"));
        playlist.resume();
        assert_eq!(mount.metadata().title.as_deref(), Some("only"));
        playlist.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn resume_keeps_schedule_anchored_to_start() {
        let dir = tempfile::tempdir().unwrap();
        write_track(dir.path(), "only.mp3", 200_000);
        let (_mount, playlist) = setup(dir.path());

        playlist.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        playlist.pause();
        tokio::time::sleep(Duration::from_secs(5)).await;
        playlist.resume();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // 6.1 s since start at 16000 bytes per second
        let sent = playlist.bytes_sent() as i64;
        assert!((sent - 97_600).abs() <= 4096, "sent {sent}");
        playlist.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn quick_pause_resume_pause_leaves_nothing_ticking() {
        let dir = tempfile::tempdir().unwrap();
        write_track(dir.path(), "only.mp3", 100_000);
        let (mount, playlist) = setup(dir.path());

        playlist.start();
        tokio::time::sleep(Duration::from_millis(500)).await;
        playlist.pause();
        playlist.resume();
        playlist.pause();
        let bytes_in = mount.stats().bytes_in;

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(mount.stats().bytes_in, bytes_in);
        playlist.stop();
    }

    #[tokio::test]
    async fn empty_directory_does_not_start() {
        let dir = tempfile::tempdir().unwrap();
        let (mount, playlist) = setup(dir.path());
        playlist.start();
        tokio::task::yield_now().await;
        assert_eq!(playlist.bytes_sent(), 0);
        assert_eq!(mount.stats().bytes_in, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        write_track(dir.path(), "a.mp3", 50_000);
        let (_mount, playlist) = setup(dir.path());
        playlist.start();
        tokio::time::sleep(Duration::from_millis(500)).await;
        playlist.stop();
        playlist.stop();
        let sent = playlist.bytes_sent();
        playlist.resume();
        playlist.start();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(playlist.bytes_sent(), sent);
    }
}
