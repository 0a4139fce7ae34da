//! Chromium process discovery and launch.

use anyhow::{Result, anyhow, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info};

const DEVTOOLS_PREFIX: &str = "DevTools listening on ";
const CHROME_ENV_VARS: [&str; 2] = ["AUTHFLOW_CHROME", "CHROME_PATH"];
const CHROME_NAMES: [&str; 5] = [
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
];

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub executable: Option<PathBuf>,
    pub headless: bool,
    pub extra_args: Vec<String>,
    pub startup_timeout: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
            extra_args: Vec::new(),
            startup_timeout: Duration::from_secs(30),
        }
    }
}

/// A running Chromium child process. Dropping it kills the browser.
pub struct ChromiumProcess {
    child: Child,
    ws_url: String,
    _profile_dir: tempfile::TempDir,
}

impl ChromiumProcess {
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.child.kill().await.ok();
        Ok(())
    }
}

pub async fn launch(options: &LaunchOptions) -> Result<ChromiumProcess> {
    let executable = match &options.executable {
        Some(path) => path.clone(),
        None => find_chromium().ok_or_else(|| {
            anyhow!("Chromium executable not found. Set AUTHFLOW_CHROME or browser.executable")
        })?,
    };

    let profile_dir = tempfile::Builder::new()
        .prefix("authflow-chromium-")
        .tempdir()?;

    let args = build_launch_args(options, profile_dir.path());
    info!(executable = %executable.display(), headless = options.headless, "Launching Chromium");

    let mut child = Command::new(&executable)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| anyhow!("Failed to start {}: {}", executable.display(), e))?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("Chromium stderr not captured"))?;
    let mut lines = BufReader::new(stderr).lines();

    let ws_url = tokio::time::timeout(options.startup_timeout, read_devtools_url(&mut lines))
        .await
        .map_err(|_| {
            anyhow!(
                "Chromium did not report a DevTools endpoint within {} seconds",
                options.startup_timeout.as_secs()
            )
        })??;

    // Keep draining stderr so the child never blocks on a full pipe.
    tokio::spawn(async move {
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "chromium", "{}", line);
        }
    });

    debug!(ws_url = %ws_url, "Chromium DevTools endpoint ready");
    Ok(ChromiumProcess {
        child,
        ws_url,
        _profile_dir: profile_dir,
    })
}

async fn read_devtools_url<R>(lines: &mut tokio::io::Lines<R>) -> Result<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    while let Some(line) = lines.next_line().await? {
        if let Some(url) = parse_devtools_line(&line) {
            return Ok(url);
        }
    }
    bail!("Chromium exited before exposing a DevTools endpoint")
}

fn build_launch_args(options: &LaunchOptions, profile_dir: &Path) -> Vec<String> {
    let mut args = vec![
        "--remote-debugging-port=0".to_string(),
        format!("--user-data-dir={}", profile_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-popup-blocking".to_string(),
        // Keep cross-origin frames in-process so frame scans reach them.
        "--disable-site-isolation-trials".to_string(),
        "--disable-features=IsolateOrigins,site-per-process".to_string(),
        "--window-size=1280,900".to_string(),
    ];
    if options.headless {
        args.push("--headless=new".to_string());
    }
    args.extend(options.extra_args.iter().cloned());
    args.push("about:blank".to_string());
    args
}

pub(crate) fn parse_devtools_line(line: &str) -> Option<String> {
    let rest = line.trim().strip_prefix(DEVTOOLS_PREFIX)?;
    let url = rest.trim();
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Some(url.to_string())
    } else {
        None
    }
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// Resolve the browser WebSocket endpoint of an already running Chromium.
///
/// Accepts either a `ws://` URL (returned unchanged) or an HTTP debugging
/// address such as `http://127.0.0.1:9222`.
pub async fn resolve_ws_url(endpoint: &str) -> Result<String> {
    let endpoint = endpoint.trim();
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        return Ok(endpoint.to_string());
    }

    let version_url = format!("{}/json/version", endpoint.trim_end_matches('/'));
    let info: VersionInfo = reqwest::Client::new()
        .get(&version_url)
        .timeout(Duration::from_secs(10))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(info.web_socket_debugger_url)
}

/// Locate a Chromium-family executable from env overrides, well-known
/// install paths and `PATH`.
pub fn find_chromium() -> Option<PathBuf> {
    for var in CHROME_ENV_VARS {
        if let Ok(path) = std::env::var(var) {
            let parsed = PathBuf::from(path);
            if parsed.is_file() {
                return Some(parsed);
            }
        }
    }

    let mut candidates = vec![
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
        PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        PathBuf::from("C:/Program Files/Google/Chrome/Application/chrome.exe"),
        PathBuf::from("C:/Program Files (x86)/Google/Chrome/Application/chrome.exe"),
    ];

    if let Some(path_var) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path_var) {
            for name in CHROME_NAMES {
                candidates.push(dir.join(name));
            }
        }
    }

    candidates.into_iter().find(|path| path.is_file())
}
