//! Detector adapter (spec §4.5): a uniform interface over four corruption
//! detection methods. Argv is built from a static per-(method, mode)
//! template; user-supplied extra arguments are appended as discrete argv
//! elements, never interpolated into a shell string (command injection is a
//! correctness bug here, not a hardening nicety).

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    Ffprobe,
    MediaInfo,
    HandBrake,
    ZeroByte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    Quick,
    Thorough,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub method: DetectionMethod,
    pub mode: DetectionMode,
    pub custom_args: Vec<String>,
    pub timeout: Duration,
}

impl DetectorConfig {
    pub fn new(method: DetectionMethod, mode: DetectionMode) -> Self {
        Self {
            method,
            mode,
            custom_args: Vec::new(),
            timeout: default_timeout(method, mode),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DetectionOutcome {
    Healthy,
    Corrupt { corruption_type: String, details: String },
    Inaccessible { reason: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorErrorKind {
    Timeout,
    NotInstalled,
    ExecFailed,
    NonMedia,
}

#[derive(Debug, thiserror::Error)]
#[error("detector error ({kind:?}): {message}")]
pub struct DetectorError {
    pub kind: DetectorErrorKind,
    pub message: String,
}

impl DetectorError {
    pub fn new(kind: DetectorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// `not_installed` for the configured method is fatal to the scan
    /// (spec §4.4 failure model); every other kind just fails the file.
    pub fn is_fatal_to_scan(&self) -> bool {
        matches!(self.kind, DetectorErrorKind::NotInstalled)
    }
}

pub type DetectorResult = Result<DetectionOutcome, DetectorError>;

/// Uniform capability over one detection method (spec §9 "dynamic dispatch
/// over detectors" design note: a tagged variant plus a capability
/// interface, registered in a static table).
#[async_trait::async_trait]
pub trait Detector: Send + Sync {
    async fn check(&self, path: &Path, config: &DetectorConfig) -> DetectorResult;

    /// Builds the argv that would be executed, for the UI's preview. Must
    /// not execute anything.
    fn command_preview(&self, config: &DetectorConfig) -> String;

    fn timeout_description(&self, config: &DetectorConfig) -> String {
        format!("{}s", config.timeout.as_secs())
    }
}

fn default_timeout(method: DetectionMethod, mode: DetectionMode) -> Duration {
    match (method, mode) {
        (DetectionMethod::ZeroByte, _) => Duration::from_secs(2),
        (_, DetectionMode::Quick) => Duration::from_secs(15),
        (_, DetectionMode::Thorough) => Duration::from_secs(300),
    }
}

/// Canonical argv template for (method, mode), before appending
/// `custom_args` and the target path.
fn argv_template(method: DetectionMethod, mode: DetectionMode) -> Vec<&'static str> {
    match (method, mode) {
        (DetectionMethod::Ffprobe, DetectionMode::Quick) => {
            vec!["-v", "error", "-show_entries", "format=duration"]
        }
        (DetectionMethod::Ffprobe, DetectionMode::Thorough) => {
            vec!["-v", "error", "-f", "null", "-"]
        }
        (DetectionMethod::MediaInfo, DetectionMode::Quick) => vec!["--Output=JSON"],
        (DetectionMethod::MediaInfo, DetectionMode::Thorough) => {
            vec!["--Output=JSON", "--Full"]
        }
        (DetectionMethod::HandBrake, DetectionMode::Quick) => {
            vec!["--scan", "--main-feature"]
        }
        (DetectionMethod::HandBrake, DetectionMode::Thorough) => {
            vec!["--scan", "--main-feature", "--previews", "1:0"]
        }
        (DetectionMethod::ZeroByte, _) => vec![],
    }
}

fn binary_name(method: DetectionMethod) -> &'static str {
    match method {
        DetectionMethod::Ffprobe => "ffprobe",
        DetectionMethod::MediaInfo => "mediainfo",
        DetectionMethod::HandBrake => "HandBrakeCLI",
        DetectionMethod::ZeroByte => "",
    }
}

fn build_argv(config: &DetectorConfig, path: &Path) -> Vec<String> {
    let mut argv: Vec<String> = argv_template(config.method, config.mode)
        .into_iter()
        .map(str::to_string)
        .collect();
    argv.extend(config.custom_args.iter().cloned());
    argv.push(path.to_string_lossy().into_owned());
    argv
}

fn command_preview_for(method: DetectionMethod, config: &DetectorConfig, path: &Path) -> String {
    if method == DetectionMethod::ZeroByte {
        return "stat --format=%s <path>".to_string();
    }
    let argv = build_argv(config, path);
    format!("{} {}", binary_name(method), argv.join(" "))
}

/// Runs an external detector subprocess with a bounded timeout. Shared by
/// the ffprobe/mediainfo/handbrake adapters; zero-byte needs no subprocess.
async fn run_subprocess(
    method: DetectionMethod,
    config: &DetectorConfig,
    path: &Path,
) -> DetectorResult {
    let argv = build_argv(config, path);
    let binary = binary_name(method);

    let mut command = Command::new(binary);
    command
        .args(&argv)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let spawn_result = command.spawn();
    let mut child = match spawn_result {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DetectorError::new(
                DetectorErrorKind::NotInstalled,
                format!("{binary} is not installed: {e}"),
            ))
        }
        Err(e) => {
            return Err(DetectorError::new(
                DetectorErrorKind::ExecFailed,
                format!("failed to spawn {binary}: {e}"),
            ))
        }
    };

    let wait = async {
        let status = child.wait().await;
        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr).await;
        }
        (status, stderr)
    };

    match timeout(config.timeout, wait).await {
        Err(_) => {
            let _ = child.start_kill();
            Err(DetectorError::new(
                DetectorErrorKind::Timeout,
                format!("{binary} timed out after {:?}", config.timeout),
            ))
        }
        Ok((Ok(status), stderr)) => {
            if status.success() {
                Ok(DetectionOutcome::Healthy)
            } else {
                Ok(DetectionOutcome::Corrupt {
                    corruption_type: format!("{binary}_exit_{}", status.code().unwrap_or(-1)),
                    details: stderr,
                })
            }
        }
        Ok((Err(e), _)) => Err(DetectorError::new(
            DetectorErrorKind::ExecFailed,
            format!("failed waiting on {binary}: {e}"),
        )),
    }
}

pub struct FfprobeDetector;
pub struct MediaInfoDetector;
pub struct HandBrakeDetector;
pub struct ZeroByteDetector;

#[async_trait::async_trait]
impl Detector for FfprobeDetector {
    async fn check(&self, path: &Path, config: &DetectorConfig) -> DetectorResult {
        run_subprocess(DetectionMethod::Ffprobe, config, path).await
    }

    fn command_preview(&self, config: &DetectorConfig) -> String {
        command_preview_for(DetectionMethod::Ffprobe, config, Path::new("<path>"))
    }
}

#[async_trait::async_trait]
impl Detector for MediaInfoDetector {
    async fn check(&self, path: &Path, config: &DetectorConfig) -> DetectorResult {
        run_subprocess(DetectionMethod::MediaInfo, config, path).await
    }

    fn command_preview(&self, config: &DetectorConfig) -> String {
        command_preview_for(DetectionMethod::MediaInfo, config, Path::new("<path>"))
    }
}

#[async_trait::async_trait]
impl Detector for HandBrakeDetector {
    async fn check(&self, path: &Path, config: &DetectorConfig) -> DetectorResult {
        run_subprocess(DetectionMethod::HandBrake, config, path).await
    }

    fn command_preview(&self, config: &DetectorConfig) -> String {
        command_preview_for(DetectionMethod::HandBrake, config, Path::new("<path>"))
    }
}

#[async_trait::async_trait]
impl Detector for ZeroByteDetector {
    async fn check(&self, path: &Path, _config: &DetectorConfig) -> DetectorResult {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(DetectionOutcome::Inaccessible {
                    reason: "file not found".to_string(),
                })
            }
            Err(e) => {
                return Ok(DetectionOutcome::Inaccessible {
                    reason: e.to_string(),
                })
            }
        };

        if metadata.len() == 0 {
            Ok(DetectionOutcome::Corrupt {
                corruption_type: "zero_byte".to_string(),
                details: "file size is 0 bytes".to_string(),
            })
        } else {
            Ok(DetectionOutcome::Healthy)
        }
    }

    fn command_preview(&self, _config: &DetectorConfig) -> String {
        "stat --format=%s <path>".to_string()
    }
}

/// Static registry of the four detectors, keyed by method (spec §9 design
/// note: "registration is a static table").
pub fn detector_for(method: DetectionMethod) -> Box<dyn Detector> {
    match method {
        DetectionMethod::Ffprobe => Box::new(FfprobeDetector),
        DetectionMethod::MediaInfo => Box::new(MediaInfoDetector),
        DetectionMethod::HandBrake => Box::new(HandBrakeDetector),
        DetectionMethod::ZeroByte => Box::new(ZeroByteDetector),
    }
}

pub use crate::scanner::walk::{is_media_file, MEDIA_EXTENSIONS};

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn zero_byte_detector_flags_empty_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.mkv");
        tokio::fs::write(&path, b"").await.unwrap();

        let detector = ZeroByteDetector;
        let config = DetectorConfig::new(DetectionMethod::ZeroByte, DetectionMode::Quick);
        let outcome = detector.check(&path, &config).await.unwrap();
        assert!(matches!(outcome, DetectionOutcome::Corrupt { .. }));
    }

    #[tokio::test]
    async fn zero_byte_detector_passes_nonempty_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ok.mkv");
        tokio::fs::write(&path, b"some bytes").await.unwrap();

        let detector = ZeroByteDetector;
        let config = DetectorConfig::new(DetectionMethod::ZeroByte, DetectionMode::Quick);
        let outcome = detector.check(&path, &config).await.unwrap();
        assert_eq!(outcome, DetectionOutcome::Healthy);
    }

    #[tokio::test]
    async fn zero_byte_detector_reports_missing_file_as_inaccessible() {
        let detector = ZeroByteDetector;
        let config = DetectorConfig::new(DetectionMethod::ZeroByte, DetectionMode::Quick);
        let outcome = detector
            .check(Path::new("/nonexistent/path.mkv"), &config)
            .await
            .unwrap();
        assert!(matches!(outcome, DetectionOutcome::Inaccessible { .. }));
    }

    #[test]
    fn command_preview_never_shell_interpolates_custom_args() {
        let mut config = DetectorConfig::new(DetectionMethod::Ffprobe, DetectionMode::Quick);
        config.custom_args = vec!["; rm -rf /".to_string()];
        let preview = command_preview_for(DetectionMethod::Ffprobe, &config, Path::new("/f.mkv"));
        // The hostile argument appears as one argv element among others, never
        // concatenated into something a shell would re-parse.
        assert!(preview.contains("; rm -rf /"));
        assert!(preview.starts_with("ffprobe "));
    }

    #[test]
    fn is_media_file_is_case_insensitive_on_extension() {
        assert!(is_media_file(Path::new("/a/b.MKV")));
        assert!(is_media_file(Path::new("/a/b.mp4")));
        assert!(!is_media_file(Path::new("/a/b.jpg")));
        assert!(!is_media_file(Path::new("/a/b")));
    }
}
