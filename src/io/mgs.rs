//! The `.mgs` binary container for packed Gaussian sets.
//!
//! Layout (little-endian, no padding):
//! ```text
//! File header:
//!   - Magic: u32 = ('s'<<24)|('p'<<16)|('l'<<8)|'g'  (bytes "glps" on disk)
//!   - Version: u32, MAKE_VERSION(0, 0, 1)
//! Metadata:
//!   - duration: f32
//! Set header:
//!   - count: u32 (must be positive)
//!   - dynamic: u8
//!   - sh degree: u32 (<= 3)
//!   - color min / color max / sh min / sh max: 4 × f32
//! Payload, in order:
//!   - means: count × 4 × f32
//!   - covariances: count × 6 × f32
//!   - opacities: count × u8
//!   - colors: count × 3 × u16
//!   - shs: count × ((degree+1)² − 1) × 3 × u8   (omitted at degree 0)
//!   - velocities: count × 4 × f32               (omitted when static)
//! ```
//!
//! The decoder accepts either a file or an in-memory buffer through the
//! `ReadSource` capability; only the error kind differs (`FileRead` for a
//! failing file, `InvalidInput` for a short buffer). The encoder writes
//! through a named temporary file in the destination directory, so a failed
//! encode never leaves a partial `.mgs` behind.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::warn;

use crate::core::{PackedGaussians, MAX_SH_DEGREE};
use crate::error::{Error, Result};

const MAGIC_WORD: u32 =
    (b's' as u32) << 24 | (b'p' as u32) << 16 | (b'l' as u32) << 8 | (b'g' as u32);

const fn make_version(major: u32, minor: u32, patch: u32) -> u32 {
    (major << 22) | (minor << 12) | patch
}

const FORMAT_VERSION: u32 = make_version(0, 0, 1);

/// Scene-level metadata attached to every container.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SceneMetadata {
    /// Playback duration of a dynamic scene, in seconds. Zero for static
    /// scenes; a negative value decodes with a warning.
    pub duration: f32,
}

impl Default for SceneMetadata {
    fn default() -> Self {
        Self { duration: 0.0 }
    }
}

/// A source of raw bytes the decoder can drain.
///
/// Two implementations exist: files (read failures surface as `FileRead`)
/// and in-memory buffers (a short read is `InvalidInput`). No inheritance
/// hierarchy, just the one capability.
trait ReadSource {
    fn read_exact_into(&mut self, buf: &mut [u8]) -> Result<()>;
}

struct FileSource(BufReader<File>);

impl ReadSource for FileSource {
    fn read_exact_into(&mut self, buf: &mut [u8]) -> Result<()> {
        self.0.read_exact(buf).map_err(Error::FileRead)
    }
}

struct BufferSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl ReadSource for BufferSource<'_> {
    fn read_exact_into(&mut self, buf: &mut [u8]) -> Result<()> {
        let end = self.pos + buf.len();
        if end > self.data.len() {
            return Err(Error::InvalidInput(
                "attempted to read past the end of the buffer".into(),
            ));
        }

        buf.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(())
    }
}

/// Decode a `.mgs` container from a file on disk.
pub fn decode_file<P: AsRef<Path>>(path: P) -> Result<(PackedGaussians, SceneMetadata)> {
    let file = File::open(path).map_err(Error::FileOpen)?;
    decode_from(&mut FileSource(BufReader::new(file)))
}

/// Decode a `.mgs` container from an in-memory buffer.
pub fn decode_bytes(data: &[u8]) -> Result<(PackedGaussians, SceneMetadata)> {
    decode_from(&mut BufferSource { data, pos: 0 })
}

fn decode_from<R: ReadSource>(reader: &mut R) -> Result<(PackedGaussians, SceneMetadata)> {
    let magic = read_u32(reader)?;
    let version = read_u32(reader)?;
    let metadata = SceneMetadata {
        duration: read_f32(reader)?,
    };

    if magic != MAGIC_WORD {
        return Err(Error::InvalidInput("mismatched magic word".into()));
    }
    if version != FORMAT_VERSION {
        return Err(Error::InvalidInput(format!(
            "mismatched format version {:#010x}",
            version
        )));
    }
    if metadata.duration < 0.0 {
        warn!(duration = metadata.duration, "negative duration in metadata");
    }

    let count = read_u32(reader)?;
    let dynamic = read_u8(reader)? != 0;
    let sh_degree = read_u32(reader)?;

    let color_min = read_f32(reader)?;
    let color_max = read_f32(reader)?;
    let sh_min = read_f32(reader)?;
    let sh_max = read_f32(reader)?;

    if count == 0 {
        return Err(Error::InvalidInput("file contains 0 gaussians".into()));
    }
    if sh_degree > MAX_SH_DEGREE {
        return Err(Error::InvalidInput(format!(
            "out of bounds sh degree {}",
            sh_degree
        )));
    }
    if color_min > color_max {
        return Err(Error::InvalidInput(
            "invalid color normalization range".into(),
        ));
    }
    if sh_degree > 0 && sh_min > sh_max {
        return Err(Error::InvalidInput("invalid sh normalization range".into()));
    }

    // A failing read below drops the set and all of its arrays with it.
    let mut gaussians = PackedGaussians::allocate(count, sh_degree, dynamic)?;
    gaussians.color_min = color_min;
    gaussians.color_max = color_max;
    gaussians.sh_min = sh_min;
    gaussians.sh_max = sh_max;

    read_f32s(reader, &mut gaussians.means)?;
    read_f32s(reader, &mut gaussians.covariances)?;
    reader.read_exact_into(&mut gaussians.opacities)?;
    read_u16s(reader, &mut gaussians.colors)?;

    if sh_degree > 0 {
        reader.read_exact_into(&mut gaussians.shs)?;
    }
    if let Some(velocities) = gaussians.velocities.as_mut() {
        read_f32s(reader, velocities)?;
    }

    Ok((gaussians, metadata))
}

/// Encode a packed set and its metadata into a `.mgs` file.
pub fn encode<P: AsRef<Path>>(
    gaussians: &PackedGaussians,
    metadata: SceneMetadata,
    path: P,
) -> Result<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let tmp = NamedTempFile::new_in(dir).map_err(Error::FileOpen)?;
    let mut writer = BufWriter::new(tmp);

    write_u32(&mut writer, MAGIC_WORD)?;
    write_u32(&mut writer, FORMAT_VERSION)?;
    write_f32(&mut writer, metadata.duration)?;

    write_u32(&mut writer, gaussians.count())?;
    writer
        .write_u8(gaussians.is_dynamic() as u8)
        .map_err(Error::FileWrite)?;
    write_u32(&mut writer, gaussians.sh_degree())?;

    let (color_min, color_max) = gaussians.color_range();
    let (sh_min, sh_max) = gaussians.sh_range();
    write_f32(&mut writer, color_min)?;
    write_f32(&mut writer, color_max)?;
    write_f32(&mut writer, sh_min)?;
    write_f32(&mut writer, sh_max)?;

    write_f32s(&mut writer, gaussians.means())?;
    write_f32s(&mut writer, gaussians.covariances())?;
    writer
        .write_all(gaussians.opacities())
        .map_err(Error::FileWrite)?;
    write_u16s(&mut writer, gaussians.colors())?;

    if gaussians.sh_degree() > 0 {
        writer.write_all(gaussians.shs()).map_err(Error::FileWrite)?;
    }
    if let Some(velocities) = gaussians.velocities() {
        write_f32s(&mut writer, velocities)?;
    }

    let tmp = writer
        .into_inner()
        .map_err(|e| Error::FileWrite(e.into_error()))?;
    tmp.persist(path).map_err(|e| Error::FileClose(e.error))?;

    Ok(())
}

fn read_u8<R: ReadSource>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact_into(&mut buf)?;
    Ok(buf[0])
}

fn read_u32<R: ReadSource>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact_into(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_f32<R: ReadSource>(reader: &mut R) -> Result<f32> {
    let mut buf = [0u8; 4];
    reader.read_exact_into(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

fn read_f32s<R: ReadSource>(reader: &mut R, out: &mut [f32]) -> Result<()> {
    let mut buf = crate::core::try_zeroed::<u8>(out.len() * 4)?;
    reader.read_exact_into(&mut buf)?;
    LittleEndian::read_f32_into(&buf, out);
    Ok(())
}

fn read_u16s<R: ReadSource>(reader: &mut R, out: &mut [u16]) -> Result<()> {
    let mut buf = crate::core::try_zeroed::<u8>(out.len() * 2)?;
    reader.read_exact_into(&mut buf)?;
    LittleEndian::read_u16_into(&buf, out);
    Ok(())
}

fn write_u32<W: Write>(writer: &mut W, v: u32) -> Result<()> {
    writer.write_u32::<LittleEndian>(v).map_err(Error::FileWrite)
}

fn write_f32<W: Write>(writer: &mut W, v: f32) -> Result<()> {
    writer.write_f32::<LittleEndian>(v).map_err(Error::FileWrite)
}

fn write_f32s<W: Write>(writer: &mut W, vals: &[f32]) -> Result<()> {
    let mut buf = vec![0u8; vals.len() * 4];
    LittleEndian::write_f32_into(vals, &mut buf);
    writer.write_all(&buf).map_err(Error::FileWrite)
}

fn write_u16s<W: Write>(writer: &mut W, vals: &[u16]) -> Result<()> {
    let mut buf = vec![0u8; vals.len() * 2];
    LittleEndian::write_u16_into(vals, &mut buf);
    writer.write_all(&buf).map_err(Error::FileWrite)
}
