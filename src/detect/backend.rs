use anyhow::Result;

use crate::detect::result::Detection;

/// Detector backend trait.
///
/// A backend maps one RGB24 frame to the objects it contains. It is called
/// once per frame, strictly in order, and may block for as long as inference
/// takes; timeouts are the backend's own business.
///
/// Backends must treat the pixel slice as read-only and must not keep it
/// beyond the `detect` call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame. Boxes are in frame pixel coordinates.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: DetectorBackend + ?Sized> DetectorBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>> {
        (**self).detect(pixels, width, height)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
