// src/handlers/image.rs
//! `display_image`: fetch a picture over HTTP and paint it on the panel.

use async_trait::async_trait;
use image::DynamicImage;
use rumqttc::QoS;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ImageProcessingConfig, PreviewConfig};
use crate::display::SharedDisplay;
use crate::error::{DisplayError, HandlerError};
use crate::handlers::CommandHandler;
use crate::util::image::{auto_crop_borders, encode_preview};
use crate::util::io::messenger::Publish;
use crate::{log_debug, log_info, log_warn};

pub const DISPLAY_IMAGE: &str = "display_image";

fn default_resize() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayImageRequest {
    pub url: String,
    #[serde(default = "default_resize")]
    pub resize: bool,
    #[serde(default)]
    pub clear_first: bool,
}

impl DisplayImageRequest {
    pub fn from_data(data: &Map<String, Value>) -> Result<Self, HandlerError> {
        let request: DisplayImageRequest = serde_json::from_value(Value::Object(data.clone()))
            .map_err(|e| HandlerError::InvalidData(e.to_string()))?;
        if request.url.trim().is_empty() {
            return Err(HandlerError::InvalidData("Missing 'url' in message data".to_string()));
        }
        Ok(request)
    }
}

#[derive(Debug)]
pub struct ImageHandler {
    display: SharedDisplay,
    http: reqwest::Client,
    processing: ImageProcessingConfig,
    preview: PreviewConfig,
    publisher: Option<Arc<dyn Publish>>,
}

impl ImageHandler {
    pub fn new(
        display: SharedDisplay,
        processing: ImageProcessingConfig,
        preview: PreviewConfig,
        publisher: Option<Arc<dyn Publish>>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(processing.fetch_timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                log_warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self { display, http, processing, preview, publisher }
    }

    /// Replace the HTTP client built from the fetch timeout.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, HandlerError> {
        log_info!("Downloading image from {}", url);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| HandlerError::Fetch(e.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| HandlerError::Fetch(e.to_string()))?;
        log_debug!("Downloaded {} bytes", bytes.len());
        Ok(bytes.to_vec())
    }

    /// Clear the panel on a blocking thread.
    async fn clear_display(&self) -> Result<(), HandlerError> {
        let display = self.display.clone();
        tokio::task::spawn_blocking(move || {
            let mut display = display
                .lock()
                .map_err(|_| DisplayError::Device("display lock poisoned".to_string()))?;
            display.clear()
        })
        .await
        .map_err(|e| DisplayError::Device(format!("clear task failed: {}", e)))??;
        Ok(())
    }

    /// Decode, crop, resize, and paint on a blocking thread. Returns what was painted.
    async fn render(&self, bytes: Vec<u8>, resize: bool) -> Result<DynamicImage, HandlerError> {
        let display = self.display.clone();
        let crop = self.processing.auto_crop_borders;
        tokio::task::spawn_blocking(move || -> Result<DynamicImage, HandlerError> {
            let mut image = image::load_from_memory(&bytes).map_err(|e| HandlerError::Decode(e.to_string()))?;
            log_info!("Decoded image {}x{}", image.width(), image.height());

            if crop {
                image = auto_crop_borders(&image);
            }

            let mut display = display
                .lock()
                .map_err(|_| DisplayError::Device("display lock poisoned".to_string()))?;
            if resize {
                image = display.resize_image(&image, true);
            }
            display.display_image(&image)?;
            Ok(image)
        })
        .await
        .map_err(|e| DisplayError::Device(format!("render task failed: {}", e)))?
    }

    /// Best effort: a failed preview never fails the command.
    async fn publish_preview(&self, image: &DynamicImage) {
        if !self.preview.enabled {
            return;
        }
        let Some(publisher) = &self.publisher else {
            log_debug!("Preview enabled but no publisher attached");
            return;
        };

        let preview = image.clone();
        let (width, quality) = (self.preview.width, self.preview.quality);
        let encoded = match tokio::task::spawn_blocking(move || encode_preview(&preview, width, quality)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                log_warn!("Failed to encode preview: {}", e);
                return;
            }
            Err(e) => {
                log_warn!("Preview task failed: {}", e);
                return;
            }
        };

        let size = encoded.len();
        match publisher
            .publish_binary(&self.preview.topic, encoded, QoS::AtLeastOnce, true)
            .await
        {
            Ok(()) => log_info!("Published {} byte preview to {}", size, self.preview.topic),
            Err(e) => log_warn!("Failed to publish preview: {}", e),
        }
    }
}

#[async_trait]
impl CommandHandler for ImageHandler {
    fn name(&self) -> &str {
        "ImageHandler"
    }

    fn supported_actions(&self) -> &[&'static str] {
        &[DISPLAY_IMAGE]
    }

    async fn handle(&self, action: &str, data: &Map<String, Value>) -> Result<(), HandlerError> {
        if action != DISPLAY_IMAGE {
            return Err(HandlerError::InvalidData(format!("Unsupported action: {}", action)));
        }
        let request = DisplayImageRequest::from_data(data)?;

        if request.clear_first {
            log_info!("Clearing display before update");
            self.clear_display().await?;
        }

        let bytes = self.fetch(&request.url).await?;
        let painted = self.render(bytes, request.resize).await?;
        log_info!("Image displayed successfully");

        self.publish_preview(&painted).await;
        Ok(())
    }
}
