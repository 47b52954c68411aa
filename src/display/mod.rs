// src/display/mod.rs
//! Rendering collaborators. The orchestrator and the image handler only see [`Display`].

pub mod file;
pub mod mock;

use image::DynamicImage;
use std::any::Any;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use crate::config::{DisplayBackend, DisplayConfig};
use crate::error::DisplayError;
use crate::util::image::cover_resize;

pub use file::FileDisplay;
pub use mock::MockDisplay;

/// Output device contract. Every call may fail with a device error.
pub trait Display: Send + Debug {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn is_initialized(&self) -> bool;

    fn init(&mut self) -> Result<(), DisplayError>;
    fn display_image(&mut self, image: &DynamicImage) -> Result<(), DisplayError>;
    fn clear(&mut self) -> Result<(), DisplayError>;
    /// Low-power state. A later `init` wakes the device.
    fn sleep(&mut self) -> Result<(), DisplayError>;

    /// Cover the panel (crop overflow) or stretch to it.
    fn resize_image(&self, image: &DynamicImage, maintain_aspect: bool) -> DynamicImage {
        cover_resize(image, self.width(), self.height(), maintain_aspect)
    }

    fn as_any(&self) -> &dyn Any;
}

/// The device is shared by the image handler and the orchestrator's shutdown path.
pub type SharedDisplay = Arc<Mutex<Box<dyn Display>>>;

pub fn shared(display: Box<dyn Display>) -> SharedDisplay {
    Arc::new(Mutex::new(display))
}

/// Build the configured backend. `dry_run` always selects the mock.
pub fn from_config(config: &DisplayConfig, dry_run: bool) -> Box<dyn Display> {
    match (dry_run, config.backend) {
        (true, _) | (false, DisplayBackend::Mock) => {
            Box::new(MockDisplay::new(&config.model, config.width, config.height))
        }
        (false, DisplayBackend::File) => Box::new(FileDisplay::new(
            config.output_path.clone(),
            config.width,
            config.height,
        )),
    }
}
