use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage};

use super::{CameraBackend, CameraDevice, CameraError, Frame};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraState {
    Uninitialized,
    Ready,
    Errored(String),
}

impl CameraState {
    pub fn is_ready(&self) -> bool {
        matches!(self, CameraState::Ready)
    }
}

/// Owns the live device handle for as long as the camera is `Ready`.
///
/// The handle is released on `stop()`, on device failure, before a fresh
/// `start()` and when the session is dropped.
pub struct CameraSession {
    backend: Box<dyn CameraBackend>,
    device: Option<Box<dyn CameraDevice>>,
    state: CameraState,
    jpeg_quality: u8,
}

impl CameraSession {
    pub fn new(backend: Box<dyn CameraBackend>, jpeg_quality: u8) -> Self {
        Self {
            backend,
            device: None,
            state: CameraState::Uninitialized,
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    pub fn state(&self) -> &CameraState {
        &self.state
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_available()
    }

    pub fn start(&mut self) -> &CameraState {
        if self.state.is_ready() {
            return &self.state;
        }

        // A stale handle from an earlier run must go before reopening.
        self.release();

        match self.backend.open() {
            Ok(device) => {
                tracing::info!("Camera ready: {}", self.backend.describe());
                self.device = Some(device);
                self.state = CameraState::Ready;
            }
            Err(e) => {
                let reason = open_failure_reason(&e);
                tracing::warn!("Camera unavailable: {}", e);
                self.state = CameraState::Errored(reason);
            }
        }
        &self.state
    }

    /// Grabs the current frame and encodes it as JPEG.
    pub fn snapshot(&mut self) -> Result<Frame, CameraError> {
        if !self.state.is_ready() {
            return Err(CameraError::NotReady);
        }
        let device = self.device.as_mut().ok_or(CameraError::NotReady)?;

        let image = match device.grab() {
            Ok(image) => image,
            Err(CameraError::DeviceLost(reason)) => {
                self.fail(reason.clone());
                return Err(CameraError::DeviceLost(reason));
            }
            Err(e) => return Err(e),
        };

        encode_jpeg(&image, self.jpeg_quality)
    }

    /// Records a device error reported outside of a snapshot (e.g. revoked
    /// permission). The session stays errored until `start()` succeeds.
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!("Camera error: {}", reason);
        self.release();
        self.state = CameraState::Errored(reason);
    }

    pub fn stop(&mut self) {
        if self.release() {
            tracing::info!("Camera released");
        }
        if self.state.is_ready() {
            self.state = CameraState::Uninitialized;
        }
    }

    fn release(&mut self) -> bool {
        self.device.take().is_some()
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_failure_reason(error: &CameraError) -> String {
    match error {
        CameraError::OpenFailed(detail) => {
            format!("Could not access camera. Please check permissions. ({})", detail)
        }
        other => other.to_string(),
    }
}

pub(crate) fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Frame, CameraError> {
    let rgb = image.to_rgb8();
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
        .map_err(|e| CameraError::Encode(e.to_string()))?;
    Ok(Frame::jpeg(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Default)]
    struct Tally {
        opens: usize,
        open_handles: usize,
    }

    struct ScriptedBackend {
        tally: Rc<RefCell<Tally>>,
        open_results: RefCell<VecDeque<Result<(), CameraError>>>,
        grabs: Rc<RefCell<VecDeque<Result<(), CameraError>>>>,
    }

    struct ScriptedDevice {
        tally: Rc<RefCell<Tally>>,
        grabs: Rc<RefCell<VecDeque<Result<(), CameraError>>>>,
    }

    impl CameraBackend for ScriptedBackend {
        fn open(&self) -> Result<Box<dyn CameraDevice>, CameraError> {
            self.tally.borrow_mut().opens += 1;
            self.open_results.borrow_mut().pop_front().unwrap_or(Ok(()))?;
            self.tally.borrow_mut().open_handles += 1;
            Ok(Box::new(ScriptedDevice {
                tally: Rc::clone(&self.tally),
                grabs: Rc::clone(&self.grabs),
            }))
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    impl CameraDevice for ScriptedDevice {
        fn grab(&mut self) -> Result<DynamicImage, CameraError> {
            self.grabs.borrow_mut().pop_front().unwrap_or(Ok(()))?;
            Ok(DynamicImage::ImageRgb8(ImageBuffer::from_pixel(
                8,
                6,
                Rgb([120, 80, 40]),
            )))
        }
    }

    impl Drop for ScriptedDevice {
        fn drop(&mut self) {
            self.tally.borrow_mut().open_handles -= 1;
        }
    }

    fn session(
        open_results: Vec<Result<(), CameraError>>,
        grabs: Vec<Result<(), CameraError>>,
    ) -> (CameraSession, Rc<RefCell<Tally>>) {
        let tally = Rc::new(RefCell::new(Tally::default()));
        let backend = ScriptedBackend {
            tally: Rc::clone(&tally),
            open_results: RefCell::new(open_results.into()),
            grabs: Rc::new(RefCell::new(grabs.into())),
        };
        (CameraSession::new(Box::new(backend), 90), tally)
    }

    #[test]
    fn start_then_snapshot_yields_jpeg() {
        let (mut camera, tally) = session(vec![], vec![]);
        assert_eq!(camera.state(), &CameraState::Uninitialized);

        assert!(camera.start().is_ready());
        let frame = camera.snapshot().unwrap();
        assert_eq!(&frame.bytes()[..2], &[0xFF, 0xD8]);
        let decoded = frame.decode().unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 6));
        assert_eq!(tally.borrow().open_handles, 1);
    }

    #[test]
    fn start_is_noop_when_ready() {
        let (mut camera, tally) = session(vec![], vec![]);
        camera.start();
        camera.start();
        assert_eq!(tally.borrow().opens, 1);
        assert_eq!(tally.borrow().open_handles, 1);
    }

    #[test]
    fn snapshot_requires_ready() {
        let (mut camera, _) = session(vec![Err(CameraError::OpenFailed("denied".into()))], vec![]);
        assert_eq!(camera.snapshot(), Err(CameraError::NotReady));

        camera.start();
        assert!(matches!(camera.state(), CameraState::Errored(reason) if reason.contains("denied")));
        assert_eq!(camera.snapshot(), Err(CameraError::NotReady));
    }

    #[test]
    fn errored_until_restarted() {
        let (mut camera, tally) = session(vec![Err(CameraError::OpenFailed("busy".into()))], vec![]);
        camera.start();
        assert!(!camera.state().is_ready());

        assert!(camera.start().is_ready());
        assert_eq!(tally.borrow().opens, 2);
    }

    #[test]
    fn device_loss_releases_handle() {
        let (mut camera, tally) = session(vec![], vec![Err(CameraError::DeviceLost("unplugged".into()))]);
        camera.start();

        let err = camera.snapshot().unwrap_err();
        assert_eq!(err, CameraError::DeviceLost("unplugged".into()));
        assert_eq!(camera.state(), &CameraState::Errored("unplugged".into()));
        assert_eq!(tally.borrow().open_handles, 0);
    }

    #[test]
    fn transient_grab_failure_keeps_session_ready() {
        let (mut camera, _) = session(vec![], vec![Err(CameraError::CaptureFailed("timeout".into()))]);
        camera.start();

        assert!(matches!(camera.snapshot(), Err(CameraError::CaptureFailed(_))));
        assert!(camera.state().is_ready());
        assert!(camera.snapshot().is_ok());
    }

    #[test]
    fn stop_is_idempotent_and_releases() {
        let (mut camera, tally) = session(vec![], vec![]);
        camera.start();
        camera.stop();
        assert_eq!(camera.state(), &CameraState::Uninitialized);
        assert_eq!(tally.borrow().open_handles, 0);

        camera.stop();
        assert_eq!(camera.state(), &CameraState::Uninitialized);
        assert_eq!(tally.borrow().open_handles, 0);
    }

    #[test]
    fn drop_releases_device() {
        let (mut camera, tally) = session(vec![], vec![]);
        camera.start();
        drop(camera);
        assert_eq!(tally.borrow().open_handles, 0);
    }

    #[test]
    fn reported_failure_is_terminal_until_start() {
        let (mut camera, tally) = session(vec![], vec![]);
        camera.start();
        camera.fail("permission revoked");

        assert_eq!(camera.state(), &CameraState::Errored("permission revoked".into()));
        assert_eq!(tally.borrow().open_handles, 0);
        assert_eq!(camera.snapshot(), Err(CameraError::NotReady));

        camera.stop();
        assert!(matches!(camera.state(), CameraState::Errored(_)));

        assert!(camera.start().is_ready());
    }
}
