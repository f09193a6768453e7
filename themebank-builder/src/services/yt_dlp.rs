//! `yt-dlp` subprocess adapter
//!
//! Implements [`SearchProvider`] and [`MediaFetcher`] by spawning the
//! `yt-dlp` binary. Search uses flat-playlist JSON lines, probing uses a
//! single JSON document, and downloads extract audio to WAV.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use themebank_common::{Error, Result};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::media_source::{
    AudioQuality, DownloadStrategy, FetchRequest, MediaFetcher, SearchHit, SearchProvider,
    SourceInfo,
};
use crate::config::FetchConfig;
use crate::ledger::normalize::canonical_watch_url;

/// `yt-dlp` backed search and download
pub struct YtDlp {
    config: FetchConfig,
    aria2c_available: OnceCell<bool>,
}

impl YtDlp {
    pub fn new(config: FetchConfig) -> Self {
        Self {
            config,
            aria2c_available: OnceCell::new(),
        }
    }

    /// True if the configured `yt-dlp` binary runs
    pub async fn is_installed(&self) -> bool {
        binary_runs(&self.config.tool_path, "--version").await
    }

    async fn aria2c_enabled(&self) -> bool {
        if !self.config.aria2c {
            return false;
        }
        *self
            .aria2c_available
            .get_or_init(|| async {
                let available = binary_runs("aria2c", "--version").await;
                if !available {
                    info!("aria2c not found, full downloads use the built-in downloader");
                }
                available
            })
            .await
    }

    async fn run(&self, args: &[String]) -> Result<String> {
        debug!(tool = %self.config.tool_path, ?args, "Running download tool");

        let mut command = Command::new(&self.config.tool_path);
        command.args(args).kill_on_drop(true);

        let timeout = Duration::from_secs(self.config.process_timeout_seconds);
        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| {
                Error::External(format!(
                    "{} timed out after {}s",
                    self.config.tool_path, self.config.process_timeout_seconds
                ))
            })?
            .map_err(|e| Error::External(format!("Failed to run {}: {}", self.config.tool_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::External(format!(
                "{} exited with {}: {}",
                self.config.tool_path,
                output.status,
                last_line(&stderr)
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn format_selector(&self, quality: AudioQuality) -> String {
        match quality {
            AudioQuality::Best => self.config.format.clone(),
            AudioQuality::Worst => "worstaudio/worst".to_string(),
        }
    }
}

#[async_trait]
impl SearchProvider for YtDlp {
    async fn search(&self, term: &str, count: usize) -> Result<Vec<SearchHit>> {
        let args = vec![
            "--flat-playlist".to_string(),
            "--dump-json".to_string(),
            "--no-warnings".to_string(),
            format!("ytsearch{}:{}", count, term),
        ];
        let stdout = self.run(&args).await?;
        Ok(parse_search_lines(&stdout))
    }
}

#[async_trait]
impl MediaFetcher for YtDlp {
    async fn probe(&self, url: &str) -> Result<SourceInfo> {
        let args = vec![
            "--dump-single-json".to_string(),
            "--skip-download".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            url.to_string(),
        ];
        let stdout = self.run(&args).await?;
        let json: Value = serde_json::from_str(&stdout)?;
        Ok(parse_source_info(&json))
    }

    async fn fetch(&self, url: &str, request: &FetchRequest) -> Result<PathBuf> {
        std::fs::create_dir_all(&request.output_dir)?;
        let template = request
            .output_dir
            .join(format!("{}.%(ext)s", request.file_stem));

        let mut args = vec![
            "-f".to_string(),
            self.format_selector(request.quality),
            "-x".to_string(),
            "--audio-format".to_string(),
            "wav".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--quiet".to_string(),
            "--retries".to_string(),
            request.retries.to_string(),
            "--fragment-retries".to_string(),
            request.retries.to_string(),
            "--socket-timeout".to_string(),
            self.config.socket_timeout_seconds.to_string(),
            "-o".to_string(),
            template.display().to_string(),
        ];

        match request.strategy {
            DownloadStrategy::FullFast => {
                if self.aria2c_enabled().await {
                    args.push("--downloader".to_string());
                    args.push("aria2c".to_string());
                    args.push("--downloader-args".to_string());
                    args.push(format!(
                        "aria2c:-x{} -s{} -k{}",
                        self.config.aria2c_connections,
                        self.config.aria2c_connections,
                        self.config.aria2c_min_split_size
                    ));
                }
            }
            DownloadStrategy::RangedPrecise {
                start_seconds,
                end_seconds,
            } => {
                args.push("--download-sections".to_string());
                args.push(format!("*{:.0}-{:.0}", start_seconds, end_seconds));
                args.push("--force-keyframes-at-cuts".to_string());
            }
        }

        args.push(url.to_string());
        self.run(&args).await?;

        find_output(&request.output_dir, &request.file_stem).ok_or_else(|| {
            Error::External(format!(
                "Download reported success but no file named {}.* was written",
                request.file_stem
            ))
        })
    }
}

async fn binary_runs(program: &str, arg: &str) -> bool {
    Command::new(program)
        .arg(arg)
        .kill_on_drop(true)
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
        .trim()
}

/// Parse flat-playlist JSON lines into hits. Malformed lines are skipped.
pub(crate) fn parse_search_lines(stdout: &str) -> Vec<SearchHit> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<Value>(line) {
            Ok(json) => Some(json),
            Err(e) => {
                warn!(error = %e, "Skipping unparsable search result line");
                None
            }
        })
        .filter_map(|json| {
            let id = json.get("id").and_then(Value::as_str)?.to_string();
            let url = json
                .get("webpage_url")
                .or_else(|| json.get("url"))
                .and_then(Value::as_str)
                .filter(|u| u.starts_with("http"))
                .map(str::to_string)
                .unwrap_or_else(|| canonical_watch_url(&id));
            let title = json.get("title").and_then(Value::as_str).map(str::to_string);
            Some(SearchHit { id, url, title })
        })
        .collect()
}

pub(crate) fn parse_source_info(json: &Value) -> SourceInfo {
    let string_list = |key: &str| -> Vec<String> {
        json.get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };
    let text = |key: &str| json.get(key).and_then(Value::as_str).map(str::to_string);

    let is_live = json.get("is_live").and_then(Value::as_bool).unwrap_or(false)
        || json.get("live_status").and_then(Value::as_str) == Some("is_live");

    SourceInfo {
        duration_seconds: json.get("duration").and_then(Value::as_f64),
        title: text("title"),
        is_live,
        uploader: text("uploader"),
        upload_date: text("upload_date"),
        view_count: json.get("view_count").and_then(Value::as_u64),
        like_count: json.get("like_count").and_then(Value::as_u64),
        tags: string_list("tags"),
        categories: string_list("categories"),
    }
}

/// `<dir>/<stem>.wav`, or any `<stem>.*` the tool left behind
fn find_output(dir: &Path, stem: &str) -> Option<PathBuf> {
    let wav = dir.join(format!("{}.wav", stem));
    if wav.exists() {
        return Some(wav);
    }

    let prefix = format!("{}.", stem);
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .find(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix) && !n.ends_with(".part"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_search_lines() {
        let stdout = concat!(
            r#"{"id": "abc123", "url": "https://www.youtube.com/watch?v=abc123", "title": "Rain"}"#,
            "\n",
            "not json\n",
            r#"{"id": "def456", "url": "def456"}"#,
            "\n",
            r#"{"title": "no id"}"#,
            "\n"
        );

        let hits = parse_search_lines(stdout);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title.as_deref(), Some("Rain"));
        assert_eq!(hits[1].url, "https://www.youtube.com/watch?v=def456");
        assert_eq!(hits[1].title, None);
    }

    #[test]
    fn test_parse_source_info() {
        let json = serde_json::json!({
            "duration": 312.5,
            "title": "Thunder",
            "live_status": "not_live",
            "uploader": "someone",
            "view_count": 1200,
            "tags": ["storm", 3, "rain"],
        });
        let info = parse_source_info(&json);
        assert_eq!(info.duration_seconds, Some(312.5));
        assert!(!info.is_live);
        assert_eq!(info.tags, vec!["storm".to_string(), "rain".to_string()]);
        assert!(info.categories.is_empty());

        let live = parse_source_info(&serde_json::json!({"live_status": "is_live"}));
        assert!(live.is_live);
        assert_eq!(live.duration_seconds, None);
    }

    #[test]
    fn test_find_output_prefers_wav() {
        let temp_dir = TempDir::new().unwrap();
        assert!(find_output(temp_dir.path(), "clip").is_none());

        std::fs::write(temp_dir.path().join("clip.webm.part"), b"x").unwrap();
        assert!(find_output(temp_dir.path(), "clip").is_none());

        std::fs::write(temp_dir.path().join("clip.m4a"), b"x").unwrap();
        assert_eq!(
            find_output(temp_dir.path(), "clip"),
            Some(temp_dir.path().join("clip.m4a"))
        );

        std::fs::write(temp_dir.path().join("clip.wav"), b"x").unwrap();
        assert_eq!(
            find_output(temp_dir.path(), "clip"),
            Some(temp_dir.path().join("clip.wav"))
        );
    }

    #[test]
    fn test_last_line() {
        assert_eq!(last_line("first\nERROR: boom\n\n"), "ERROR: boom");
        assert_eq!(last_line(""), "");
    }
}
