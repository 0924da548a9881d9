//! Binary `.ply` ingestion for Gaussian Splatting point clouds.
//!
//! The 3DGS training ecosystem stores Gaussians as binary little-endian PLY
//! vertices with `float` properties: positions (`x y z`), log-space scales
//! (`scale_0..2`), a scalar-first quaternion (`rot_0..3`), a logit-space
//! opacity, the DC color (`f_dc_0..2`) and optional higher-order coefficients
//! (`f_rest_*`, grouped per channel). Loading undoes the training-space
//! transforms: scales are exponentiated, opacities pass through a sigmoid,
//! quaternions are normalized.
//!
//! PLY carries no velocity fields, so the loaded cloud is always static.

use byteorder::{ByteOrder, LittleEndian};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::core::{sigmoid, GaussianCloud, MAX_SH_DEGREE};
use crate::error::{Error, Result};

/// One parsed `property float <name>` line: its byte offset within a vertex
/// row.
struct PlyProp {
    offset: usize,
}

struct PlyHeader {
    vertex_count: usize,
    row_stride: usize,
    data_start: usize,
    properties: HashMap<String, PlyProp>,
}

/// Load a Gaussian cloud from a `.ply` file on disk.
pub fn load_ply<P: AsRef<Path>>(path: P) -> Result<GaussianCloud> {
    let mut file = File::open(path).map_err(Error::FileOpen)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data).map_err(Error::FileRead)?;

    load_ply_bytes(&data)
}

/// Load a Gaussian cloud from an in-memory `.ply` buffer.
pub fn load_ply_bytes(data: &[u8]) -> Result<GaussianCloud> {
    let header = parse_header(data)?;

    if header.vertex_count == 0 {
        return Ok(GaussianCloud::from_parts(
            0,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            None,
        ));
    }

    let prop = |name: &str| header.properties.get(name);
    let require = |name: &str| {
        header.properties.get(name).ok_or_else(|| {
            Error::InvalidInput(format!("ply file is missing property '{}'", name))
        })
    };

    let px = require("x")?;
    let py = require("y")?;
    let pz = require("z")?;

    let scale_props = [prop("scale_0"), prop("scale_1"), prop("scale_2")];
    let has_scale = scale_props.iter().all(Option::is_some);

    let rot_props = [prop("rot_0"), prop("rot_1"), prop("rot_2"), prop("rot_3")];
    let has_rotation = rot_props.iter().all(Option::is_some);

    let color_props = [prop("f_dc_0"), prop("f_dc_1"), prop("f_dc_2")];
    let has_color = color_props.iter().all(Option::is_some);

    let opacity_prop = prop("opacity");

    // Contiguous f_rest_* triplets determine the SH degree; anything past
    // degree 3 is dropped.
    let mut rest = Vec::new();
    loop {
        let base = rest.len() * 3;
        let names = [
            format!("f_rest_{}", base),
            format!("f_rest_{}", base + 1),
            format!("f_rest_{}", base + 2),
        ];

        match (prop(&names[0]), prop(&names[1]), prop(&names[2])) {
            (Some(r), Some(g), Some(b)) => rest.push([r, g, b]),
            _ => break,
        }
    }

    // The DC slot is always stored (defaulted when the file has no f_dc), so
    // it always counts toward the basis size.
    let total_coeffs = rest.len() + 1;
    let mut sh_degree = 0u32;
    while (((sh_degree + 1) * (sh_degree + 1)) as usize) < total_coeffs {
        sh_degree += 1;
    }
    if ((sh_degree + 1) * (sh_degree + 1)) as usize != total_coeffs {
        return Err(Error::InvalidInput(format!(
            "{} spherical harmonic coefficients do not form a complete degree",
            total_coeffs
        )));
    }
    if sh_degree > MAX_SH_DEGREE {
        sh_degree = MAX_SH_DEGREE;
        let kept = ((sh_degree + 1) * (sh_degree + 1)) as usize - 1;
        rest.truncate(kept);
    }

    let n = header.vertex_count;
    let coeffs = ((sh_degree + 1) * (sh_degree + 1)) as usize;

    let mut means = Vec::with_capacity(n);
    let mut scales = Vec::with_capacity(n);
    let mut rotations = Vec::with_capacity(n);
    let mut opacities = Vec::with_capacity(n);
    let mut shs = Vec::with_capacity(n * coeffs * 3);

    let rows = &data[header.data_start..];
    for i in 0..n {
        let row = &rows[i * header.row_stride..(i + 1) * header.row_stride];
        let read = |p: &PlyProp| LittleEndian::read_f32(&row[p.offset..p.offset + 4]);

        means.push(Vector3::new(read(px), read(py), read(pz)));

        scales.push(if has_scale {
            Vector3::new(
                read(scale_props[0].unwrap()).exp(),
                read(scale_props[1].unwrap()).exp(),
                read(scale_props[2].unwrap()).exp(),
            )
        } else {
            Vector3::new(0.01, 0.01, 0.01)
        });

        rotations.push(if has_rotation {
            // rot_0 is the scalar part on disk.
            let q = Quaternion::new(
                read(rot_props[0].unwrap()),
                read(rot_props[1].unwrap()),
                read(rot_props[2].unwrap()),
                read(rot_props[3].unwrap()),
            );
            if q.norm() > 1e-8 {
                UnitQuaternion::from_quaternion(q)
            } else {
                UnitQuaternion::identity()
            }
        } else {
            UnitQuaternion::identity()
        });

        opacities.push(match opacity_prop {
            Some(p) => sigmoid(read(p)),
            None => 1.0,
        });

        if has_color {
            for p in &color_props {
                shs.push(read(p.unwrap()));
            }
        } else {
            shs.extend_from_slice(&[1.0, 1.0, 1.0]);
        }
        for triplet in &rest {
            for &p in triplet.iter() {
                shs.push(read(p));
            }
        }
    }

    Ok(GaussianCloud::from_parts(
        sh_degree, means, scales, rotations, opacities, shs, None,
    ))
}

fn parse_header(data: &[u8]) -> Result<PlyHeader> {
    const HEADER_END: &[u8] = b"end_header\n";

    if data.is_empty() {
        return Err(Error::InvalidInput("ply buffer is empty".into()));
    }

    let header_end = find(data, HEADER_END)
        .ok_or_else(|| Error::InvalidInput("ply header has no end_header".into()))?;
    let header = std::str::from_utf8(&data[..header_end])
        .map_err(|_| Error::InvalidInput("ply header is not valid utf-8".into()))?;

    let mut lines = header.lines();
    if lines.next().map(str::trim) != Some("ply") {
        return Err(Error::InvalidInput("missing 'ply' header line".into()));
    }

    let mut vertex_count = 0usize;
    let mut row_stride = 0usize;
    let mut properties = HashMap::new();
    let mut format_seen = false;

    for line in lines {
        let mut fields = line.split_whitespace();

        match fields.next() {
            Some("format") => {
                if fields.next() != Some("binary_little_endian") {
                    return Err(Error::InvalidInput(
                        "only binary_little_endian ply files are supported".into(),
                    ));
                }
                format_seen = true;
            }
            Some("element") => {
                if fields.next() == Some("vertex") {
                    vertex_count = fields
                        .next()
                        .and_then(|v| v.parse().ok())
                        .ok_or_else(|| {
                            Error::InvalidInput("malformed 'element vertex' line".into())
                        })?;
                }
            }
            Some("property") => {
                let ty = fields.next().unwrap_or("");
                if ty != "float" {
                    return Err(Error::InvalidInput(format!(
                        "unsupported ply property type '{}'",
                        ty
                    )));
                }
                let name = fields
                    .next()
                    .ok_or_else(|| Error::InvalidInput("unnamed ply property".into()))?;

                let prop = PlyProp { offset: row_stride };
                row_stride += 4;

                if properties.insert(name.to_owned(), prop).is_some() {
                    return Err(Error::InvalidInput(format!(
                        "duplicate ply property '{}'",
                        name
                    )));
                }
            }
            _ => {}
        }
    }

    if !format_seen {
        return Err(Error::InvalidInput("ply header has no format line".into()));
    }

    let data_start = header_end + HEADER_END.len();
    let need = vertex_count
        .checked_mul(row_stride)
        .ok_or_else(|| Error::InvalidInput("ply vertex data size overflows".into()))?;
    if data.len() - data_start < need {
        return Err(Error::InvalidInput(
            "ply buffer is too small for the declared vertex data".into(),
        ));
    }

    Ok(PlyHeader {
        vertex_count,
        row_stride,
        data_start,
        properties,
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
