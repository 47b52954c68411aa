// src/display/mock.rs
use image::DynamicImage;
use std::any::Any;

use crate::display::Display;
use crate::error::DisplayError;
use crate::{log_debug, log_info};

/// Logs operations instead of driving hardware (`--dry-run`).
#[derive(Debug)]
pub struct MockDisplay {
    model: String,
    width: u32,
    height: u32,
    initialized: bool,
    pub frames_shown: usize,
    pub clears: usize,
    pub last_frame_size: Option<(u32, u32)>,
}

impl MockDisplay {
    pub fn new(model: &str, width: u32, height: u32) -> Self {
        log_info!("MockDisplay initialized (model={}, {}x{})", model, width, height);
        Self {
            model: model.to_string(),
            width,
            height,
            initialized: false,
            frames_shown: 0,
            clears: 0,
            last_frame_size: None,
        }
    }

    fn ensure_initialized(&self) -> Result<(), DisplayError> {
        if self.initialized {
            Ok(())
        } else {
            Err(DisplayError::NotInitialized)
        }
    }
}

impl Display for MockDisplay {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn init(&mut self) -> Result<(), DisplayError> {
        log_info!("[DRY RUN] Initializing {} display", self.model);
        self.initialized = true;
        Ok(())
    }

    fn display_image(&mut self, image: &DynamicImage) -> Result<(), DisplayError> {
        self.ensure_initialized()?;
        log_info!(
            "[DRY RUN] Displaying image: {:?}, size={}x{}",
            image.color(),
            image.width(),
            image.height()
        );
        if (image.width(), image.height()) != (self.width, self.height) {
            log_debug!(
                "[DRY RUN] Would resize image from {}x{} to {}x{}",
                image.width(),
                image.height(),
                self.width,
                self.height
            );
        }
        self.frames_shown += 1;
        self.last_frame_size = Some((image.width(), image.height()));
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DisplayError> {
        self.ensure_initialized()?;
        log_info!("[DRY RUN] Clearing display");
        self.clears += 1;
        Ok(())
    }

    fn sleep(&mut self) -> Result<(), DisplayError> {
        self.ensure_initialized()?;
        log_info!("[DRY RUN] Putting display to sleep");
        self.initialized = false;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
