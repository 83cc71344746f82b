//! Local capture device seams for the peer-connection transport.
//!
//! The session never talks to hardware directly; it acquires and releases
//! devices through [`MediaDeviceFactory`] so tests and embedders can supply
//! their own capturers.

use crate::error::Result;
use crate::transport::CameraMode;

/// A held microphone device.
pub trait MicDevice: Send + Sync {
    /// Mute or unmute the device without releasing it.
    fn set_muted(&mut self, _muted: bool) {}

    /// Release the device.
    fn close(&mut self) {}
}

/// A held camera device.
pub trait CameraDevice: Send + Sync {
    /// Switch between front and back capture without releasing the device;
    /// the published track identity is unchanged.
    fn set_mode(&mut self, mode: CameraMode) -> Result<()>;

    /// Release the device.
    fn close(&mut self) {}
}

/// Opens local capture devices on demand.
pub trait MediaDeviceFactory: Send + Sync {
    /// Acquire the microphone.
    fn open_mic(&self) -> Result<Box<dyn MicDevice>>;

    /// Acquire the camera in the given mode.
    fn open_camera(&self, mode: CameraMode) -> Result<Box<dyn CameraDevice>>;
}

/// Factory producing inert devices, for headless or data-channel-only use.
#[derive(Debug, Clone, Default)]
pub struct NullDeviceFactory;

struct NullMic;

impl MicDevice for NullMic {}

struct NullCamera;

impl CameraDevice for NullCamera {
    fn set_mode(&mut self, _mode: CameraMode) -> Result<()> {
        Ok(())
    }
}

impl MediaDeviceFactory for NullDeviceFactory {
    fn open_mic(&self) -> Result<Box<dyn MicDevice>> {
        Ok(Box::new(NullMic))
    }

    fn open_camera(&self, _mode: CameraMode) -> Result<Box<dyn CameraDevice>> {
        Ok(Box::new(NullCamera))
    }
}
