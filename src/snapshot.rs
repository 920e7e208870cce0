//! Page snapshot capture.
//!
//! Boost pages are rendered client-side, so capture goes through a
//! headless browser rather than plain HTTP. The contract is small:
//! given a URL, write `<timestamp>_<slug>.html` plus a `.meta.json`
//! sidecar recording the source URL and capture time into the snapshot
//! directory. The sidecar is what lets a later `run --file=` invocation
//! recover the provenance URL without a `--url` override.

use anyhow::{Context, Result};
use chrono::Utc;
use headless_chrome::{Browser, LaunchOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task;
use tracing::{info, warn};

const NAV_ATTEMPTS: u32 = 3;
const NAV_BASE_DELAY_MS: u64 = 800;
/// Let late XHR-driven rows land before reading the DOM.
const SETTLE_SECS: u64 = 2;
const SLUG_MAX_LEN: usize = 60;

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub url: String,
    pub ts: String,
}

#[derive(Debug)]
pub struct SnapshotPaths {
    pub html: PathBuf,
    pub meta: PathBuf,
}

/// Capture a page and write the snapshot pair. Navigation is retried
/// with exponential backoff; capture failure after the final attempt is
/// an error.
pub async fn capture(url: &str, out_dir: &Path) -> Result<SnapshotPaths> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create snapshot dir {}", out_dir.display()))?;

    let now = Utc::now();
    let stem = format!("{}_{}", now.format("%Y%m%d-%H%M%S"), url_slug(url));
    let html_path = out_dir.join(format!("{stem}.html"));
    let meta_path = out_dir.join(format!("{stem}.meta.json"));

    let html = fetch_rendered_html(url.to_string()).await?;

    std::fs::write(&html_path, &html)
        .with_context(|| format!("failed to write snapshot {}", html_path.display()))?;
    let meta = SnapshotMeta { url: url.to_string(), ts: now.to_rfc3339() };
    std::fs::write(&meta_path, serde_json::to_string_pretty(&meta)?)
        .with_context(|| format!("failed to write sidecar {}", meta_path.display()))?;

    info!(url, html = %html_path.display(), bytes = html.len(), "snapshot captured");
    Ok(SnapshotPaths { html: html_path, meta: meta_path })
}

/// The `.meta.json` URL for a snapshot file, if the sidecar exists and
/// parses. Absence is non-fatal; provenance just comes back empty.
pub fn sidecar_url(html_file: &Path) -> String {
    let meta_path = sidecar_path(html_file);
    match std::fs::read_to_string(&meta_path) {
        Ok(raw) => match serde_json::from_str::<SnapshotMeta>(&raw) {
            Ok(meta) => meta.url,
            Err(e) => {
                warn!(path = %meta_path.display(), error = %e, "unreadable snapshot sidecar");
                String::new()
            }
        },
        Err(_) => String::new(),
    }
}

/// Sidecar next to a snapshot: the trailing `.html` (any case) swapped
/// for `.meta.json`. Only the final suffix is replaced, so stems with
/// dots in them keep their full name.
fn sidecar_path(html_file: &Path) -> PathBuf {
    let name = html_file.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let stem = match name.len().checked_sub(".html".len()) {
        Some(cut) => match name.get(cut..) {
            Some(tail) if tail.eq_ignore_ascii_case(".html") => &name[..cut],
            _ => name,
        },
        None => name,
    };
    html_file.with_file_name(format!("{stem}.meta.json"))
}

fn url_slug(url: &str) -> String {
    let stripped = url.strip_prefix("https://").or_else(|| url.strip_prefix("http://")).unwrap_or(url);
    let mut slug = String::new();
    let mut last_sep = false;
    for c in stripped.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_sep = false;
        } else if !last_sep {
            slug.push('_');
            last_sep = true;
        }
        if slug.len() >= SLUG_MAX_LEN {
            break;
        }
    }
    slug.trim_matches('_').to_string()
}

/// Render the page in headless Chrome on a blocking thread, retrying
/// navigation with exponential backoff.
async fn fetch_rendered_html(url: String) -> Result<String> {
    task::spawn_blocking(move || -> Result<String> {
        let options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .build()
            .context("Failed to build Chrome launch options")?;
        let browser = Browser::new(options).context("Failed to launch Chrome")?;
        let tab = browser.new_tab().context("Failed to create browser tab")?;

        let mut last_err = None;
        for attempt in 0..NAV_ATTEMPTS {
            if attempt > 0 {
                let delay = NAV_BASE_DELAY_MS * 2u64.pow(attempt - 1);
                warn!(url = %url, attempt, delay_ms = delay, "retrying navigation");
                std::thread::sleep(Duration::from_millis(delay));
            }
            match tab
                .navigate_to(&url)
                .and_then(|t| t.wait_for_element("body").map(|_| t))
            {
                Ok(_) => {
                    std::thread::sleep(Duration::from_secs(SETTLE_SECS));
                    return tab.get_content().context("Failed to read HTML from browser tab");
                }
                Err(e) => last_err = Some(e),
            }
        }
        match last_err {
            Some(e) => Err(e.context(format!("navigation failed for {url}"))),
            None => Err(anyhow::anyhow!("navigation failed for {url}")),
        }
    })
    .await
    .context("snapshot task panicked")?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_slug_is_filename_safe() {
        let slug = url_slug("https://sports.example.com/betting/en-gb/football#boosts?a=1");
        assert!(slug.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        assert!(slug.starts_with("sports_example_com"));
        assert!(slug.len() <= SLUG_MAX_LEN);
    }

    #[test]
    fn test_sidecar_round_trip() {
        let dir = std::env::temp_dir().join("edgescan_snapshot_test");
        std::fs::create_dir_all(&dir).unwrap();
        let html = dir.join("20260829-120000_example.html");
        let meta = sidecar_path(&html);
        std::fs::write(&html, "<html></html>").unwrap();
        std::fs::write(
            &meta,
            r#"{"url":"https://example.test/boosts","ts":"2026-08-29T12:00:00Z"}"#,
        )
        .unwrap();

        assert_eq!(sidecar_url(&html), "https://example.test/boosts");

        std::fs::remove_file(&html).ok();
        std::fs::remove_file(&meta).ok();
    }

    #[test]
    fn test_sidecar_path_keeps_dotted_stems() {
        assert_eq!(
            sidecar_path(Path::new("/snaps/page.v2.html")),
            PathBuf::from("/snaps/page.v2.meta.json")
        );
        assert_eq!(
            sidecar_path(Path::new("/snaps/PAGE.HTML")),
            PathBuf::from("/snaps/PAGE.meta.json")
        );
        // No .html suffix: the sidecar name is just appended.
        assert_eq!(sidecar_path(Path::new("/snaps/raw")), PathBuf::from("/snaps/raw.meta.json"));
    }

    #[test]
    fn test_missing_sidecar_is_empty_url() {
        assert_eq!(sidecar_url(Path::new("/nonexistent/snap.html")), "");
    }
}
