//! Serializable snapshot of a compiled graph's runtime state.
//!
//! The on-disk format is a little-endian binary blob: magic header, version,
//! device placement, the compile options the graph was built with (as a JSON
//! blob), the shape key the graph was specialized for, and the named buffer
//! payloads. The only contract is round-trip fidelity plus explicit device
//! retargeting on load.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::str::FromStr;

use crate::backend::Device;
use crate::cache::ShapeKey;
use crate::config::GraphOptions;
use crate::error::{DeployError, DeployResult};
use crate::tensor::{DType, Shape, Tensor};

const MAGIC: &[u8; 8] = b"DFRSGRPH";
const VERSION: u32 = 1;

/// One named buffer inside a runtime state snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEntry {
    pub name: String,
    pub tensor: Tensor,
}

/// Opaque snapshot of a compiled graph's buffers, weights, and compile-time
/// decisions, addressable by a file path.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeState {
    device: Device,
    options: Option<GraphOptions>,
    shape_key: Option<ShapeKey>,
    entries: Vec<StateEntry>,
}

impl RuntimeState {
    pub fn new(device: Device) -> Self {
        RuntimeState {
            device,
            options: None,
            shape_key: None,
            entries: Vec::new(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Rewrites buffer placement; used by backend device retargeting.
    pub fn set_device(&mut self, device: Device) {
        self.device = device;
    }

    pub fn options(&self) -> Option<&GraphOptions> {
        self.options.as_ref()
    }

    pub fn set_options(&mut self, options: GraphOptions) {
        self.options = Some(options);
    }

    pub fn shape_key(&self) -> Option<&ShapeKey> {
        self.shape_key.as_ref()
    }

    pub fn set_shape_key(&mut self, key: ShapeKey) {
        self.shape_key = Some(key);
    }

    pub fn entries(&self) -> &[StateEntry] {
        &self.entries
    }

    pub fn push_entry(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.entries.push(StateEntry {
            name: name.into(),
            tensor,
        });
    }

    /// Writes the snapshot to `path`; an unwritable path surfaces as `Io`.
    pub fn save(&self, path: impl AsRef<Path>) -> DeployResult<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;

        let device = self.device.to_string();
        write_bytes(&mut writer, device.as_bytes())?;

        match &self.options {
            Some(options) => {
                writer.write_all(&[1])?;
                let blob = serde_json::to_vec(options)
                    .map_err(|err| DeployError::Config(format!("options not serializable: {err}")))?;
                write_bytes(&mut writer, &blob)?;
            }
            None => writer.write_all(&[0])?,
        }

        match &self.shape_key {
            Some(key) => {
                writer.write_all(&[1])?;
                writer.write_all(&(key.dims().len() as u32).to_le_bytes())?;
                for dims in key.dims() {
                    write_dims(&mut writer, dims)?;
                }
            }
            None => writer.write_all(&[0])?,
        }

        writer.write_all(&(self.entries.len() as u32).to_le_bytes())?;
        for entry in &self.entries {
            write_bytes(&mut writer, entry.name.as_bytes())?;
            write_dims(&mut writer, entry.tensor.shape().dims())?;
            writer.write_all(&entry.tensor.dtype().tag().to_le_bytes())?;
            let payload = entry.tensor.to_le_bytes();
            writer.write_all(&(payload.len() as u64).to_le_bytes())?;
            writer.write_all(&payload)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Reads a snapshot back; a missing, truncated, or malformed file
    /// surfaces as `Load`.
    pub fn load(path: impl AsRef<Path>) -> DeployResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| {
            DeployError::Load(format!("cannot open '{}': {err}", path.display()))
        })?;
        let mut reader = BufReader::new(file);
        Self::read(&mut reader)
            .map_err(|err| DeployError::Load(format!("'{}': {err}", path.display())))
    }

    fn read(reader: &mut impl Read) -> Result<Self, String> {
        let mut magic = [0u8; 8];
        read_exact(reader, &mut magic)?;
        if &magic != MAGIC {
            return Err("invalid runtime state magic header".to_string());
        }
        let version = read_u32(reader)?;
        if version != VERSION {
            return Err(format!("unsupported runtime state version {version}"));
        }

        let device_name = read_string(reader)?;
        let device = Device::from_str(&device_name).map_err(|err| err.to_string())?;

        let options = match read_u8(reader)? {
            0 => None,
            1 => {
                let blob = read_byte_vec(reader)?;
                let options: GraphOptions = serde_json::from_slice(&blob)
                    .map_err(|err| format!("malformed graph options: {err}"))?;
                Some(options)
            }
            other => return Err(format!("invalid options marker {other}")),
        };

        let shape_key = match read_u8(reader)? {
            0 => None,
            1 => {
                let count = read_u32(reader)? as usize;
                let mut dims = Vec::with_capacity(count);
                for _ in 0..count {
                    dims.push(read_dims(reader)?);
                }
                Some(ShapeKey::from_dims(dims))
            }
            other => return Err(format!("invalid shape key marker {other}")),
        };

        let entry_count = read_u32(reader)? as usize;
        let mut entries = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            let name = read_string(reader)?;
            let dims = read_dims(reader)?;
            if dims.is_empty() {
                return Err(format!("entry '{name}' has an empty shape"));
            }
            let tag = read_u32(reader)?;
            let dtype = DType::from_tag(tag)
                .ok_or_else(|| format!("unknown dtype tag {tag} for entry '{name}'"))?;
            let payload_len = read_u64(reader)? as usize;
            let mut payload = vec![0u8; payload_len];
            read_exact(reader, &mut payload)?;
            let tensor = Tensor::from_le_bytes(Shape::new(dims), dtype, &payload)
                .map_err(|err| format!("entry '{name}': {err}"))?;
            entries.push(StateEntry { name, tensor });
        }

        Ok(RuntimeState {
            device,
            options,
            shape_key,
            entries,
        })
    }
}

fn write_bytes(writer: &mut impl Write, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
    writer.write_all(bytes)
}

fn write_dims(writer: &mut impl Write, dims: &[usize]) -> std::io::Result<()> {
    writer.write_all(&(dims.len() as u32).to_le_bytes())?;
    for &dim in dims {
        writer.write_all(&(dim as u64).to_le_bytes())?;
    }
    Ok(())
}

fn read_exact(reader: &mut impl Read, buf: &mut [u8]) -> Result<(), String> {
    reader
        .read_exact(buf)
        .map_err(|err| format!("truncated runtime state: {err}"))
}

fn read_u8(reader: &mut impl Read) -> Result<u8, String> {
    let mut buf = [0u8; 1];
    read_exact(reader, &mut buf)?;
    Ok(buf[0])
}

fn read_u32(reader: &mut impl Read) -> Result<u32, String> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(reader: &mut impl Read) -> Result<u64, String> {
    let mut buf = [0u8; 8];
    read_exact(reader, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_byte_vec(reader: &mut impl Read) -> Result<Vec<u8>, String> {
    let len = read_u32(reader)? as usize;
    let mut buf = vec![0u8; len];
    read_exact(reader, &mut buf)?;
    Ok(buf)
}

fn read_string(reader: &mut impl Read) -> Result<String, String> {
    let bytes = read_byte_vec(reader)?;
    String::from_utf8(bytes).map_err(|err| format!("invalid utf-8 string: {err}"))
}

fn read_dims(reader: &mut impl Read) -> Result<Vec<usize>, String> {
    let rank = read_u32(reader)? as usize;
    let mut dims = Vec::with_capacity(rank);
    for _ in 0..rank {
        let dim = read_u64(reader)?;
        dims.push(
            usize::try_from(dim).map_err(|_| format!("dimension {dim} overflows usize"))?,
        );
    }
    Ok(dims)
}
