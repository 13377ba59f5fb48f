//! Hugging Face text-to-image inference

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use super::{http_client, ImageGenerator, ServiceError};

const API_URL: &str =
    "https://api-inference.huggingface.co/models/stabilityai/stable-diffusion-xl-base-1.0";

pub struct HuggingFaceImages {
    client: reqwest::Client,
    api_key: String,
    output_dir: PathBuf,
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    options: InferenceOptions,
}

#[derive(Serialize)]
struct InferenceOptions {
    wait_for_model: bool,
}

impl HuggingFaceImages {
    pub fn new(api_key: Option<String>, output_dir: PathBuf, timeout: Duration) -> Result<Self, ServiceError> {
        let api_key = api_key
            .filter(|k| !k.is_empty())
            .ok_or(ServiceError::NotConfigured("HuggingFace API key"))?;

        Ok(Self {
            client: http_client(timeout)?,
            api_key,
            output_dir,
        })
    }
}

#[async_trait]
impl ImageGenerator for HuggingFaceImages {
    async fn generate(&self, prompt: &str) -> Result<PathBuf, ServiceError> {
        info!(prompt, "generating image");

        let response = self
            .client
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&InferenceRequest {
                inputs: prompt,
                options: InferenceOptions { wait_for_model: true },
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(status.as_u16(), &body));
        }

        let bytes = response.bytes().await?;

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.output_dir.join(image_file_name(chrono::Local::now()));
        tokio::fs::write(&path, &bytes).await?;

        Ok(path)
    }
}

fn image_file_name(now: chrono::DateTime<chrono::Local>) -> String {
    format!("generated_{}.png", now.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_image_file_name() {
        let at = chrono::Local.with_ymd_and_hms(2024, 8, 5, 23, 1, 9).unwrap();
        assert_eq!(image_file_name(at), "generated_20240805_230109.png");
    }

    #[test]
    fn test_missing_key_is_not_configured() {
        let result = HuggingFaceImages::new(None, PathBuf::from("/tmp"), Duration::from_secs(5));
        assert!(matches!(result, Err(ServiceError::NotConfigured(_))));
    }
}
