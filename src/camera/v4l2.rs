use image::{DynamicImage, ImageBuffer, Luma, Rgb};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::{CameraBackend, CameraDevice, CameraError};
use crate::common::CameraConfig;

const STREAM_BUFFERS: u32 = 4;
const ENODEV: i32 = 19;

#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
    pub formats: Vec<String>,
}

/// Opens `/dev/video{index}` through V4L2.
#[derive(Debug, Clone)]
pub struct V4l2Backend {
    config: CameraConfig,
}

impl V4l2Backend {
    pub fn new(config: CameraConfig) -> Self {
        Self { config }
    }

    fn device_path(&self) -> String {
        format!("/dev/video{}", self.config.device_index)
    }

    /// List all video capture devices with the pixel formats they offer.
    pub fn list_cameras() -> io::Result<Vec<CameraInfo>> {
        let mut cameras = Vec::new();

        for entry in fs::read_dir("/dev")? {
            let entry = entry?;
            let filename = entry.file_name();
            let Some(index) = filename
                .to_str()
                .and_then(|name| name.strip_prefix("video"))
                .and_then(|index| index.parse::<u32>().ok())
            else {
                continue;
            };

            let Ok(device) = Device::new(index as usize) else {
                continue;
            };
            let Ok(caps) = device.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }

            let formats = device
                .enum_formats()
                .unwrap_or_default()
                .iter()
                .map(|fmt| fmt.fourcc.str().unwrap_or("UNKNOWN").to_string())
                .collect();

            cameras.push(CameraInfo {
                index,
                name: caps.card.clone(),
                formats,
            });
        }

        cameras.sort_by_key(|c| c.index);
        Ok(cameras)
    }
}

impl CameraBackend for V4l2Backend {
    fn open(&self) -> Result<Box<dyn CameraDevice>, CameraError> {
        let index = self.config.device_index;
        tracing::debug!("Opening camera device {}...", index);

        let device = Device::new(index as usize)
            .map_err(|e| CameraError::OpenFailed(format!("/dev/video{}: {}", index, e)))?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::OpenFailed(format!("Failed to query capabilities: {}", e)))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            tracing::warn!("Device {} may not support standard video capture", index);
        }

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::OpenFailed(format!("Failed to get format: {}", e)))?;
        fmt.width = self.config.width;
        fmt.height = self.config.height;
        // Grayscale sensors keep their native format, everything else gets MJPG
        if fmt.fourcc.repr != *b"GREY" {
            fmt.fourcc = FourCC::new(b"MJPG");
        }

        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("Could not set exact format: {}. Using device defaults.", e);
        }

        let format = device
            .format()
            .map_err(|e| CameraError::OpenFailed(format!("Failed to get final format: {}", e)))?;
        tracing::info!(
            "Camera {} ({}) streaming {}x{} {}",
            index,
            caps.card,
            format.width,
            format.height,
            format.fourcc.str().unwrap_or("UNKNOWN")
        );

        Ok(Box::new(V4l2Device {
            device,
            format,
            warmup_frames: self.config.warmup_frames,
            warmup_delay: Duration::from_millis(self.config.warmup_delay_ms),
        }))
    }

    fn describe(&self) -> String {
        self.device_path()
    }

    fn is_available(&self) -> bool {
        Path::new(&self.device_path()).exists()
    }
}

struct V4l2Device {
    device: Device,
    format: v4l::Format,
    warmup_frames: u32,
    warmup_delay: Duration,
}

impl CameraDevice for V4l2Device {
    fn grab(&mut self) -> Result<DynamicImage, CameraError> {
        let mut stream =
            v4l::io::mmap::Stream::with_buffers(&mut self.device, Type::VideoCapture, STREAM_BUFFERS)
                .map_err(classify_io_error)?;

        // Auto exposure settles over the first few frames
        for _ in 0..self.warmup_frames {
            stream.next().map_err(classify_io_error)?;
            std::thread::sleep(self.warmup_delay);
        }

        let (buf, _meta) = stream.next().map_err(classify_io_error)?;
        decode_buffer(buf, self.format.fourcc, self.format.width, self.format.height)
    }
}

fn classify_io_error(e: io::Error) -> CameraError {
    if e.kind() == io::ErrorKind::NotFound || e.raw_os_error() == Some(ENODEV) {
        CameraError::DeviceLost(e.to_string())
    } else {
        CameraError::CaptureFailed(e.to_string())
    }
}

fn decode_buffer(data: &[u8], fourcc: FourCC, width: u32, height: u32) -> Result<DynamicImage, CameraError> {
    match &fourcc.repr {
        b"MJPG" => image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
            .map_err(|e| CameraError::CaptureFailed(format!("Corrupt MJPG frame: {}", e))),
        b"GREY" => {
            let pixels = data.get(..(width * height) as usize).ok_or_else(short_buffer)?;
            ImageBuffer::<Luma<u8>, _>::from_raw(width, height, pixels.to_vec())
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(short_buffer)
        }
        b"YUYV" => yuyv_to_rgb(data, width, height),
        other => Err(CameraError::CaptureFailed(format!(
            "Unsupported pixel format {}",
            String::from_utf8_lossy(other)
        ))),
    }
}

fn short_buffer() -> CameraError {
    CameraError::CaptureFailed("Frame buffer shorter than format size".into())
}

fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<DynamicImage, CameraError> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        return Err(short_buffer());
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0] as f32, chunk[1] as f32 - 128.0, chunk[2] as f32, chunk[3] as f32 - 128.0);
        for y in [y0, y1] {
            rgb.push((y + 1.402 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).clamp(0.0, 255.0) as u8);
        }
    }

    ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, rgb)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(short_buffer)
}
