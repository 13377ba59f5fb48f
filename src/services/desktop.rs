//! Application, browser and mixer control through platform commands

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::AppControl;
use crate::classifier::{SearchEngine, SystemOp};

/// Sites opened by name
const WEBSITES: &[(&str, &str)] = &[
    ("youtube", "https://www.youtube.com"),
    ("google", "https://www.google.com"),
    ("gmail", "https://mail.google.com"),
    ("github", "https://github.com"),
    ("twitter", "https://twitter.com"),
    ("facebook", "https://www.facebook.com"),
    ("instagram", "https://www.instagram.com"),
    ("reddit", "https://www.reddit.com"),
    ("linkedin", "https://www.linkedin.com"),
    ("stackoverflow", "https://stackoverflow.com"),
];

/// Spoken application names mapped to (macOS app, Linux executable)
const APPS: &[(&str, &str, &str)] = &[
    ("notepad", "TextEdit", "gedit"),
    ("calculator", "Calculator", "gnome-calculator"),
    ("chrome", "Google Chrome", "google-chrome"),
    ("firefox", "Firefox", "firefox"),
    ("edge", "Microsoft Edge", "microsoft-edge"),
    ("vscode", "Visual Studio Code", "code"),
    ("spotify", "Spotify", "spotify"),
    ("discord", "Discord", "discord"),
];

/// What an `open` request resolves to
#[derive(Debug, PartialEq, Eq)]
enum Target {
    Url(String),
    App(String),
}

pub struct DesktopControl {
    screenshots_dir: PathBuf,
}

impl DesktopControl {
    pub fn new(screenshots_dir: PathBuf) -> Self {
        Self { screenshots_dir }
    }

    async fn open_url(&self, url: &str) -> std::io::Result<()> {
        let opener = if cfg!(target_os = "macos") { "open" } else { "xdg-open" };
        spawn_detached(opener, &[url])
    }

    async fn open_app(&self, app: &str) -> std::io::Result<()> {
        if cfg!(target_os = "macos") {
            run(&["open", "-a", app]).await
        } else {
            spawn_detached(app, &[])
        }
    }

    async fn volume(&self, op: SystemOp) -> std::io::Result<()> {
        if cfg!(target_os = "macos") {
            let script = match op {
                SystemOp::VolumeUp => "set volume output volume ((output volume of (get volume settings)) + 10)",
                SystemOp::VolumeDown => "set volume output volume ((output volume of (get volume settings)) - 10)",
                SystemOp::Mute => "set volume with output muted",
                SystemOp::Unmute => "set volume without output muted",
                SystemOp::Screenshot => return Err(std::io::Error::other("not a mixer operation")),
            };
            run(&["osascript", "-e", script]).await
        } else {
            let level = match op {
                SystemOp::VolumeUp => "10%+",
                SystemOp::VolumeDown => "10%-",
                SystemOp::Mute => "mute",
                SystemOp::Unmute => "unmute",
                SystemOp::Screenshot => return Err(std::io::Error::other("not a mixer operation")),
            };
            run(&["amixer", "-D", "pulse", "sset", "Master", level]).await
        }
    }

    async fn screenshot(&self) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.screenshots_dir).await?;
        let path = self.screenshots_dir.join(format!(
            "screenshot_{}.png",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        ));
        let target = path.to_string_lossy().into_owned();

        if cfg!(target_os = "macos") {
            run(&["screencapture", "-x", &target]).await?;
            return Ok(path);
        }

        let candidates: [&[&str]; 3] = [
            &["gnome-screenshot", "-f", &target],
            &["grim", &target],
            &["scrot", &target],
        ];
        let mut last_error = None;
        for args in candidates {
            match run(args).await {
                Ok(()) => return Ok(path),
                Err(e) => {
                    debug!(tool = args[0], error = %e, "screenshot tool unavailable");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| std::io::Error::other("no screenshot tool found")))
    }
}

/// `pkill` flag and pattern for a close request. Known executables match
/// anywhere in the command line; anything else must match a process name
/// exactly so a short word cannot take down unrelated processes.
fn close_pattern(name: &str) -> (&'static str, String) {
    match linux_executable(name) {
        Some(executable) => ("-f", executable.to_string()),
        None => ("-x", name.trim().to_lowercase()),
    }
}

#[async_trait]
impl AppControl for DesktopControl {
    async fn open_target(&self, name: &str) -> String {
        let result = match resolve_target(name) {
            Target::Url(url) => self.open_url(&url).await,
            Target::App(app) => self.open_app(&app).await,
        };

        match result {
            Ok(()) => format!("Opening {name}..."),
            Err(e) => {
                warn!(name, error = %e, "failed to open target");
                format!("Could not open {name}")
            }
        }
    }

    async fn close_target(&self, name: &str) -> String {
        let (flag, process) = close_pattern(name);
        match run(&["pkill", flag, &process]).await {
            Ok(()) => format!("Closed {name}"),
            Err(e) => {
                warn!(name, error = %e, "failed to close target");
                format!("Could not close {name}")
            }
        }
    }

    async fn play_media(&self, query: &str) -> String {
        let url = format!(
            "https://www.youtube.com/results?search_query={}+song",
            urlencoding::encode(query)
        );
        match self.open_url(&url).await {
            Ok(()) => format!("Playing: {query}"),
            Err(e) => format!("Error playing music: {e}"),
        }
    }

    async fn web_search(&self, engine: SearchEngine, query: &str) -> String {
        match self.open_url(&search_url(engine, query)).await {
            Ok(()) => format!("Searching {engine} for: {query}"),
            Err(e) => format!("Error performing {engine} search: {e}"),
        }
    }

    async fn system(&self, op: SystemOp) -> String {
        if op == SystemOp::Screenshot {
            return match self.screenshot().await {
                Ok(path) => format!("Screenshot saved to {}", path.display()),
                Err(e) => format!("Error taking screenshot: {e}"),
            };
        }

        match self.volume(op).await {
            Ok(()) => match op {
                SystemOp::VolumeUp => "Volume increased".to_string(),
                SystemOp::VolumeDown => "Volume decreased".to_string(),
                SystemOp::Mute => "System muted".to_string(),
                _ => "System unmuted".to_string(),
            },
            Err(e) => format!("Error adjusting volume: {e}"),
        }
    }
}

fn resolve_target(name: &str) -> Target {
    let lower = name.trim().to_lowercase();

    if lower.starts_with("http") {
        return Target::Url(name.trim().to_string());
    }
    if let Some((_, url)) = WEBSITES.iter().find(|(site, _)| *site == lower) {
        return Target::Url((*url).to_string());
    }
    if let Some(&(_, mac, linux)) = APPS.iter().find(|(alias, _, _)| *alias == lower) {
        let app = if cfg!(target_os = "macos") { mac } else { linux };
        return Target::App(app.to_string());
    }
    if lower.ends_with(".com") || lower.ends_with(".org") {
        return Target::Url(format!("https://{lower}"));
    }

    Target::App(lower)
}

fn linux_executable(name: &str) -> Option<&'static str> {
    let lower = name.trim().to_lowercase();
    APPS.iter().find(|(alias, _, _)| *alias == lower).map(|&(_, _, exe)| exe)
}

fn search_url(engine: SearchEngine, query: &str) -> String {
    let query = urlencoding::encode(query);
    match engine {
        SearchEngine::Google => format!("https://www.google.com/search?q={query}"),
        SearchEngine::YouTube => format!("https://www.youtube.com/results?search_query={query}"),
    }
}

/// Run a command to completion, treating a non-zero exit as an error
async fn run(args: &[&str]) -> std::io::Result<()> {
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| std::io::Error::other("empty command"))?;

    let status = Command::new(program)
        .args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!("{program} exited with {status}")))
    }
}

/// Launch a program without waiting for it
fn spawn_detached(program: &str, args: &[&str]) -> std::io::Result<()> {
    std::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| ())
}
