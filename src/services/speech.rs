//! Speech output through the platform's text-to-speech command

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{ServiceError, Speaker};

/// Speaks by running a TTS command and waiting for it to exit
pub struct CommandSpeaker {
    /// Words per minute
    rate: u32,
}

impl CommandSpeaker {
    pub fn new(rate: u32) -> Self {
        Self { rate }
    }

    fn engines(&self, text: &str) -> Vec<Vec<String>> {
        let rate = self.rate.to_string();
        if cfg!(target_os = "macos") {
            return vec![vec!["say".into(), "-r".into(), rate, text.into()]];
        }

        vec![
            vec!["espeak-ng".into(), "-s".into(), rate.clone(), text.into()],
            vec!["espeak".into(), "-s".into(), rate, text.into()],
            vec!["spd-say".into(), "-w".into(), text.into()],
        ]
    }
}

#[async_trait]
impl Speaker for CommandSpeaker {
    async fn speak(&self, text: &str) -> Result<(), ServiceError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        info!(text, "speaking");

        for engine in self.engines(text) {
            let (program, args) = match engine.split_first() {
                Some(split) => split,
                None => continue,
            };

            let status = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;

            match status {
                Ok(status) if status.success() => return Ok(()),
                Ok(status) => {
                    return Err(ServiceError::Io(std::io::Error::other(format!(
                        "{program} exited with {status}"
                    ))))
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(program, "speech engine not installed");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ServiceError::NotConfigured("speech engine"))
    }
}
