use std::fmt;

use half::f16;

use crate::error::{PluginError, PluginResult};
use crate::tensor::DType;

/// Linear allocation on the reference device.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct DeviceBuffer {
    bytes: Vec<u8>,
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

impl DeviceBuffer {
    /// Allocates `len` zero bytes.
    pub fn zeroed(len: usize) -> Self {
        Self {
            bytes: vec![0; len],
        }
    }

    /// Wraps raw bytes without copying.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Stores `values` as little-endian f32.
    pub fn from_f32(values: &[f32]) -> Self {
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for &value in values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        Self { bytes }
    }

    /// Stores `values` rounded to little-endian IEEE half precision.
    pub fn from_f16(values: &[f32]) -> Self {
        let mut bytes = Vec::with_capacity(values.len() * 2);
        for &value in values {
            bytes.extend_from_slice(&f16::from_f32(value).to_bits().to_le_bytes());
        }
        Self { bytes }
    }

    /// Stores `values` in the layout of `dtype`. Only float element types are accepted.
    pub fn from_values(dtype: DType, values: &[f32]) -> PluginResult<Self> {
        match dtype {
            DType::F32 => Ok(Self::from_f32(values)),
            DType::F16 => Ok(Self::from_f16(values)),
            other => Err(not_float(other)),
        }
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decodes the buffer as f32 values. Fails unless the length is a multiple of 4.
    pub fn read_f32(&self) -> PluginResult<Vec<f32>> {
        self.check_whole(4, "f32")?;
        Ok(self
            .bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }

    /// Decodes the buffer as half precision values widened to f32.
    pub fn read_f16(&self) -> PluginResult<Vec<f32>> {
        self.check_whole(2, "f16")?;
        Ok(self
            .bytes
            .chunks_exact(2)
            .map(|chunk| f16::from_bits(u16::from_le_bytes([chunk[0], chunk[1]])).to_f32())
            .collect())
    }

    /// Decodes the buffer as `dtype` elements widened to f32.
    pub fn read_values(&self, dtype: DType) -> PluginResult<Vec<f32>> {
        match dtype {
            DType::F32 => self.read_f32(),
            DType::F16 => self.read_f16(),
            other => Err(not_float(other)),
        }
    }

    /// Overwrites the buffer with `values`; the byte length must match exactly.
    pub fn write_f32(&mut self, values: &[f32]) -> PluginResult<()> {
        self.check_write(values.len(), 4, "f32")?;
        for (chunk, value) in self.bytes.chunks_exact_mut(4).zip(values) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        Ok(())
    }

    /// Overwrites the buffer with `values` rounded to half precision.
    pub fn write_f16(&mut self, values: &[f32]) -> PluginResult<()> {
        self.check_write(values.len(), 2, "f16")?;
        for (chunk, &value) in self.bytes.chunks_exact_mut(2).zip(values) {
            chunk.copy_from_slice(&f16::from_f32(value).to_bits().to_le_bytes());
        }
        Ok(())
    }

    /// Overwrites the buffer with `values` stored as `dtype`.
    pub fn write_values(&mut self, dtype: DType, values: &[f32]) -> PluginResult<()> {
        match dtype {
            DType::F32 => self.write_f32(values),
            DType::F16 => self.write_f16(values),
            other => Err(not_float(other)),
        }
    }

    /// Device-to-device copy between buffers of equal size.
    pub fn copy_from(&mut self, source: &DeviceBuffer) -> PluginResult<()> {
        if source.len() != self.len() {
            return Err(PluginError::execution(format!(
                "device copy size mismatch: source={} bytes, destination={} bytes",
                source.len(),
                self.len()
            )));
        }
        self.bytes.copy_from_slice(&source.bytes);
        Ok(())
    }

    fn check_whole(&self, width: usize, label: &str) -> PluginResult<()> {
        if !self.bytes.len().is_multiple_of(width) {
            return Err(PluginError::execution(format!(
                "buffer of {} bytes is not a whole number of {label} values",
                self.bytes.len()
            )));
        }
        Ok(())
    }

    fn check_write(&self, count: usize, width: usize, label: &str) -> PluginResult<()> {
        if count * width != self.bytes.len() {
            return Err(PluginError::execution(format!(
                "writing {count} {label} values into a buffer of {} bytes",
                self.bytes.len()
            )));
        }
        Ok(())
    }
}

fn not_float(dtype: DType) -> PluginError {
    PluginError::execution(format!("{dtype:?} buffers do not hold float values"))
}

/// Scratch memory an operation asks for, in bytes per buffer.
///
/// Immutable buffers are initialized once and shared by every execution; mutable buffers are
/// scratch space valid for the duration of a single execute call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkbufferRequest {
    pub immutable_sizes: Vec<usize>,
    pub mutable_sizes: Vec<usize>,
}

impl WorkbufferRequest {
    /// True when the operation needs no workbuffers at all.
    pub fn is_empty(&self) -> bool {
        self.immutable_sizes.is_empty() && self.mutable_sizes.is_empty()
    }

    /// Bytes across both kinds of workbuffer.
    pub fn total_bytes(&self) -> usize {
        self.immutable_sizes.iter().sum::<usize>() + self.mutable_sizes.iter().sum::<usize>()
    }
}

/// Workbuffers allocated for one execution, in the order of the [`WorkbufferRequest`].
#[derive(Debug)]
pub struct Workbuffers<'a> {
    pub immutable: &'a [DeviceBuffer],
    pub mutable: &'a mut [DeviceBuffer],
}

impl<'a> Workbuffers<'a> {
    pub fn new(immutable: &'a [DeviceBuffer], mutable: &'a mut [DeviceBuffer]) -> Self {
        Self { immutable, mutable }
    }

    /// Empty set, for operations that requested nothing.
    pub fn none() -> Workbuffers<'static> {
        Workbuffers {
            immutable: &[],
            mutable: &mut [],
        }
    }

    /// Immutable workbuffer `index`, or [`PluginError::Execution`] when it was not provided.
    pub fn immutable(&self, index: usize) -> PluginResult<&DeviceBuffer> {
        self.immutable.get(index).ok_or_else(|| {
            PluginError::execution(format!(
                "immutable workbuffer {index} missing ({} provided)",
                self.immutable.len()
            ))
        })
    }

    /// Mutable workbuffer `index`, or [`PluginError::Execution`] when it was not provided.
    pub fn mutable(&mut self, index: usize) -> PluginResult<&mut DeviceBuffer> {
        let provided = self.mutable.len();
        self.mutable.get_mut(index).ok_or_else(|| {
            PluginError::execution(format!(
                "mutable workbuffer {index} missing ({provided} provided)"
            ))
        })
    }
}
