//! Media library: file listing, upload validation, and the background
//! optimizer that normalizes uploads to the platform encoding profile.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tokio::sync::watch;

use crate::state::AppState;

pub const ALLOWED_EXTENSIONS: [&str; 3] = ["mp4", "mkv", "mov"];

const OPTIMIZE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Marker artifacts the optimizer leaves next to media files.
const ARTIFACT_MARKERS: [&str; 3] = [".temp.", ".original.", ".optimized."];

pub struct MediaLibrary {
    path: PathBuf,
    /// Files currently being normalized, for `/api/media/status` and to
    /// keep the sweep from double-processing.
    optimizing: Mutex<HashSet<String>>,
}

#[derive(Debug, Serialize)]
pub struct MediaFileInfo {
    pub filename: String,
    pub size: u64,
    pub is_optimizing: bool,
    /// 0–100, estimated from the temp file growing toward the original.
    pub progress: f64,
}

impl MediaLibrary {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            optimizing: Mutex::new(HashSet::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.path
    }

    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.path.join(filename)
    }

    /// Playable media files, excluding optimizer artifacts.
    pub fn list(&self) -> std::io::Result<Vec<String>> {
        std::fs::create_dir_all(&self.path)?;
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type()?.is_file() && is_media_file(&name) && !is_artifact(&name) {
                files.push(name);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Per-file detail including optimization progress.
    pub fn status(&self) -> std::io::Result<Vec<MediaFileInfo>> {
        let optimizing = self.optimizing.lock().expect("media lock poisoned");
        let mut result = Vec::new();
        for name in self.list()? {
            let size = std::fs::metadata(self.file_path(&name)).map(|m| m.len()).unwrap_or(0);
            let is_optimizing = optimizing.contains(&name);
            let progress = if is_optimizing {
                let temp = self.file_path(&temp_name(&name));
                let temp_size = std::fs::metadata(temp).map(|m| m.len()).unwrap_or(0);
                // Output lands near 80% of the original; clamp below 100
                // until the swap happens.
                let target = size as f64 * 0.8;
                if target > 0.0 {
                    (temp_size as f64 / target * 100.0).min(99.0)
                } else {
                    0.0
                }
            } else {
                0.0
            };
            result.push(MediaFileInfo {
                filename: name,
                size,
                is_optimizing,
                progress,
            });
        }
        Ok(result)
    }

    pub fn is_optimizing(&self, filename: &str) -> bool {
        self.optimizing
            .lock()
            .expect("media lock poisoned")
            .contains(filename)
    }

    fn begin_optimizing(&self, filename: &str) -> bool {
        self.optimizing
            .lock()
            .expect("media lock poisoned")
            .insert(filename.to_string())
    }

    fn end_optimizing(&self, filename: &str) {
        self.optimizing
            .lock()
            .expect("media lock poisoned")
            .remove(filename);
    }
}

/// Filenames arriving over the API must be bare names with an allowed
/// video extension.
pub fn validate_filename(filename: &str) -> Result<(), &'static str> {
    if filename.is_empty() {
        return Err("filename required");
    }
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        return Err("invalid filename");
    }
    if !is_media_file(filename) {
        return Err("only mp4, mkv, mov allowed");
    }
    Ok(())
}

fn is_media_file(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    ALLOWED_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(&format!(".{ext}")))
}

fn is_artifact(name: &str) -> bool {
    ARTIFACT_MARKERS.iter().any(|m| name.contains(m))
}

fn temp_name(filename: &str) -> String {
    let base = filename.rsplit_once('.').map(|(b, _)| b).unwrap_or(filename);
    format!("{base}.optimized.temp.mp4")
}

fn marker_path(dir: &Path, filename: &str) -> PathBuf {
    dir.join(format!("{filename}.optimized"))
}

// ── Optimizer sweep ─────────────────────────────────────────────────

/// Run the optimizer sweep until shutdown.
pub async fn run_optimizer(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(OPTIMIZE_SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => sweep(&state).await,
            _ = shutdown.changed() => return,
        }
    }
}

async fn sweep(state: &AppState) {
    let media = state.media();
    let files = match media.list() {
        Ok(files) => files,
        Err(e) => {
            tracing::warn!(error = %e, "media sweep failed to read directory");
            return;
        }
    };

    for name in files {
        let path = media.file_path(&name);
        let marker = marker_path(media.dir(), &name);

        // Skip files already normalized, unless re-uploaded since.
        if let (Ok(marker_meta), Ok(file_meta)) =
            (std::fs::metadata(&marker), std::fs::metadata(&path))
        {
            match (file_meta.modified(), marker_meta.modified()) {
                (Ok(file_mtime), Ok(marker_mtime)) if file_mtime < marker_mtime => continue,
                _ => {
                    tracing::info!(file = %name, "file newer than optimization marker, reprocessing");
                }
            }
        }

        if !media.begin_optimizing(&name) {
            continue;
        }
        optimize_file(state, &name).await;
        media.end_optimizing(&name);
    }
}

/// Normalize one file to the platform profile (H.264 high, yuv420p,
/// 30 fps, 2 s GOP, 4000k/128k, faststart) via a temp file swap.
async fn optimize_file(state: &AppState, name: &str) {
    let media = state.media();
    let src = media.file_path(name);
    let temp = media.file_path(&temp_name(name));
    state
        .logs()
        .info("media", format!("optimizing {name}"));

    let status = Command::new("ffmpeg")
        .arg("-hide_banner")
        .args(["-loglevel", "error", "-y"])
        .arg("-i")
        .arg(&src)
        .args(["-vf", "scale=-2:'min(1080,ih)'"])
        .args(["-c:v", "libx264"])
        .args(["-preset", "fast"])
        .args(["-profile:v", "high"])
        .args(["-level", "4.2"])
        .args(["-pix_fmt", "yuv420p"])
        .args(["-r", "30"])
        .args(["-g", "60"])
        .args(["-keyint_min", "60"])
        .args(["-sc_threshold", "0"])
        .args(["-force_key_frames", "expr:gte(t,n_forced*2)"])
        .args(["-b:v", "4000k"])
        .args(["-minrate", "4000k"])
        .args(["-maxrate", "4000k"])
        .args(["-bufsize", "8000k"])
        .args(["-c:a", "aac"])
        .args(["-b:a", "128k"])
        .args(["-ar", "44100"])
        .args(["-movflags", "+faststart"])
        .arg(&temp)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .status()
        .await;

    match status {
        Ok(status) if status.success() => {
            let swap = std::fs::remove_file(&src)
                .and_then(|_| std::fs::rename(&temp, &src))
                .and_then(|_| std::fs::File::create(marker_path(media.dir(), name)).map(|_| ()));
            match swap {
                Ok(()) => state
                    .logs()
                    .info("media", format!("optimized {name}")),
                Err(e) => state
                    .logs()
                    .error("media", format!("failed to swap optimized {name}: {e}")),
            }
        }
        Ok(_) | Err(_) => {
            state
                .logs()
                .warn("media", format!("optimization failed for {name}, keeping original"));
            let _ = std::fs::remove_file(&temp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── Filename Validation ────────────────────────────────────────

    #[test]
    fn accepts_plain_media_filenames() {
        assert!(validate_filename("intro.mp4").is_ok());
        assert!(validate_filename("Show Reel.MKV").is_ok());
        assert!(validate_filename("b-roll.mov").is_ok());
    }

    #[test]
    fn rejects_traversal_and_separators() {
        assert!(validate_filename("../etc/passwd").is_err());
        assert!(validate_filename("a/b.mp4").is_err());
        assert!(validate_filename("a\\b.mp4").is_err());
        assert!(validate_filename("..mp4").is_err());
        assert!(validate_filename("").is_err());
    }

    #[test]
    fn rejects_non_video_extensions() {
        assert!(validate_filename("notes.txt").is_err());
        assert!(validate_filename("archive.mp4.zip").is_err());
    }

    // ─── Artifact Handling ──────────────────────────────────────────

    #[test]
    fn artifacts_are_excluded_from_listing() {
        assert!(is_artifact("show.optimized.temp.mp4"));
        assert!(is_artifact("show.original.mp4"));
        assert!(!is_artifact("show.mp4"));
    }

    #[test]
    fn temp_name_replaces_extension() {
        assert_eq!(temp_name("show.mp4"), "show.optimized.temp.mp4");
        assert_eq!(temp_name("a.b.mkv"), "a.b.optimized.temp.mp4");
    }

    #[test]
    fn listing_skips_artifacts_and_non_media() {
        let dir = std::env::temp_dir().join(format!("onair-media-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["a.mp4", "b.mkv", "b.mkv.optimized", "b.optimized.temp.mp4", "c.txt"] {
            std::fs::write(dir.join(name), b"x").unwrap();
        }

        let lib = MediaLibrary::new(dir.clone());
        assert_eq!(lib.list().unwrap(), vec!["a.mp4", "b.mkv"]);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
