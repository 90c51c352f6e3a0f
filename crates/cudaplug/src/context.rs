use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::PluginResult;
use crate::memory::DeviceBuffer;

/// Identity of the accelerator an operation is created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Device {
    ordinal: u32,
}

impl Device {
    /// Device at `ordinal`. No validation happens here; see
    /// [`crate::PluginConfig::device`].
    pub fn new(ordinal: u32) -> Self {
        Self { ordinal }
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }
}

/// Everything an operation factory gets besides the node and tensor ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CreationContext {
    device: Device,
    optimize: bool,
}

impl CreationContext {
    /// Context for factories targeting `device`.
    pub fn new(device: Device, optimize: bool) -> Self {
        Self { device, optimize }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Whether factories may spend extra creation time or workbuffer memory to pick a faster
    /// algorithm.
    pub fn optimize(&self) -> bool {
        self.optimize
    }
}

/// In-order execution stream on the reference device.
///
/// Kernels run synchronously on the calling thread; the stream keeps a launch count so callers
/// can observe how many kernels an execution issued.
#[derive(Debug, Default)]
pub struct Stream {
    device: Device,
    launches: AtomicU64,
}

impl Stream {
    /// Fresh stream on `device` with a zero launch count.
    pub fn new(device: Device) -> Self {
        Self {
            device,
            launches: AtomicU64::new(0),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Allocates `bytes` zeroed bytes on the stream's device.
    pub fn alloc_zeroed(&self, bytes: usize) -> DeviceBuffer {
        DeviceBuffer::zeroed(bytes)
    }

    /// Host-to-device copy of raw bytes.
    pub fn upload(&self, bytes: &[u8]) -> DeviceBuffer {
        DeviceBuffer::from_bytes(bytes.to_vec())
    }

    /// Host-to-device copy of f32 values.
    pub fn upload_f32(&self, values: &[f32]) -> DeviceBuffer {
        DeviceBuffer::from_f32(values)
    }

    /// Device-to-host copy.
    pub fn download(&self, buffer: &DeviceBuffer) -> Vec<u8> {
        buffer.as_bytes().to_vec()
    }

    /// Runs `kernel` on the stream and counts it as one launch, whether or not it fails.
    pub fn launch<F>(&self, label: &str, kernel: F) -> PluginResult<()>
    where
        F: FnOnce() -> PluginResult<()>,
    {
        let launch = self.launches.fetch_add(1, Ordering::Relaxed);
        log::trace!(
            "device {}: launch #{launch} `{label}`",
            self.device.ordinal()
        );
        kernel()
    }

    /// Kernels launched on this stream so far.
    pub fn launch_count(&self) -> u64 {
        self.launches.load(Ordering::Relaxed)
    }
}

/// Per-thread execution state handed to [`crate::Operation::execute`].
#[derive(Debug, Default)]
pub struct ThreadContext {
    device: Device,
    stream: Stream,
}

impl ThreadContext {
    /// Context owning a new stream on `device`.
    pub fn new(device: Device) -> Self {
        Self {
            device,
            stream: Stream::new(device),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }
}
