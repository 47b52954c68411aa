// src/display/file.rs
use image::{DynamicImage, Rgb, RgbImage};
use std::any::Any;
use std::path::PathBuf;

use crate::display::Display;
use crate::error::DisplayError;
use crate::log_info;

/// Paints each frame to a PNG on disk, for hosts without a panel attached.
#[derive(Debug)]
pub struct FileDisplay {
    output_path: PathBuf,
    width: u32,
    height: u32,
    initialized: bool,
}

impl FileDisplay {
    pub fn new(output_path: PathBuf, width: u32, height: u32) -> Self {
        Self {
            output_path,
            width,
            height,
            initialized: false,
        }
    }

    pub fn output_path(&self) -> &PathBuf {
        &self.output_path
    }

    fn write_frame(&self, image: &DynamicImage) -> Result<(), DisplayError> {
        if !self.initialized {
            return Err(DisplayError::NotInitialized);
        }
        image
            .save(&self.output_path)
            .map_err(|e| DisplayError::Device(format!("cannot write {}: {}", self.output_path.display(), e)))
    }
}

impl Display for FileDisplay {
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
        if let Some(parent) = self.output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| DisplayError::Device(format!("cannot create {}: {}", parent.display(), e)))?;
        }
        log_info!("File display writing frames to {}", self.output_path.display());
        self.initialized = true;
        Ok(())
    }

    fn display_image(&mut self, image: &DynamicImage) -> Result<(), DisplayError> {
        self.write_frame(image)
    }

    fn clear(&mut self) -> Result<(), DisplayError> {
        let blank = RgbImage::from_pixel(self.width, self.height, Rgb([255, 255, 255]));
        self.write_frame(&DynamicImage::ImageRgb8(blank))
    }

    fn sleep(&mut self) -> Result<(), DisplayError> {
        self.initialized = false;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
