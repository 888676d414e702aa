//! Plain PLY codec: ASCII header, little-endian float32 structure-of-arrays
//! payload. Higher-order SH live on disk channel-major (`f_rest_0..`), in
//! the IR coefficient-major interleaved RGB; both directions transpose
//! here at the boundary.

use foldhash::{HashMap, HashMapExt};

use crate::common::degree_for_dim;
use crate::error::ConvError;
use crate::structures::{GaussianCloudIR, ReadOptions, ReadOutcome, WriteOptions};
use crate::validate::validate;

pub(crate) const FORMAT_LINE: &[u8] = b"format binary_little_endian 1.0";

/// Cursor over the ASCII header region of a PLY buffer. Lines are trimmed
/// of surrounding whitespace; blank and `comment` lines are skipped.
pub(crate) struct HeaderCursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> HeaderCursor<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        HeaderCursor { data, offset: 0 }
    }

    /// Byte offset of the first payload byte once `end_header` has been
    /// consumed.
    pub(crate) fn payload_offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn next_line(&mut self) -> Option<&'a [u8]> {
        while self.offset < self.data.len() {
            let start = self.offset;
            let line = match memchr::memchr(b'\n', &self.data[start..]) {
                Some(pos) => {
                    self.offset = start + pos + 1;
                    &self.data[start..start + pos]
                }
                None => {
                    self.offset = self.data.len();
                    &self.data[start..]
                }
            };
            let trimmed = line.trim_ascii();
            if trimmed.is_empty() || trimmed.starts_with(b"comment") {
                continue;
            }
            return Some(trimmed);
        }
        None
    }
}

pub(crate) fn parse_count(line: &[u8], prefix: &[u8]) -> Option<i64> {
    let rest = line.strip_prefix(prefix)?;
    std::str::from_utf8(rest).ok()?.trim().parse().ok()
}

fn err(msg: impl Into<String>) -> ConvError {
    ConvError::Ply(msg.into())
}

pub fn read(data: &[u8], options: &ReadOptions) -> Result<ReadOutcome, ConvError> {
    if data.is_empty() {
        return Err(err("read failed: empty input"));
    }

    let mut cursor = HeaderCursor::new(data);

    if cursor.next_line().map_or(true, |l| l != b"ply") {
        return Err(err("read failed: not ply"));
    }
    if cursor.next_line() != Some(FORMAT_LINE) {
        return Err(err("read failed: unsupported format"));
    }

    let vertex_line = cursor
        .next_line()
        .ok_or_else(|| err("read failed: missing vertex count"))?;
    let num_points = parse_count(vertex_line, b"element vertex ")
        .ok_or_else(|| err("read failed: missing vertex count"))?;
    if num_points < 0 {
        return Err(err("read failed: invalid vertex count"));
    }

    let mut field_names: Vec<&[u8]> = Vec::new();
    loop {
        let line = cursor
            .next_line()
            .ok_or_else(|| err("read failed: EOF in header"))?;
        if line == b"end_header" {
            break;
        }
        let name = line
            .strip_prefix(b"property float ")
            .ok_or_else(|| err("read failed: unsupported property type"))?;
        field_names.push(name);
    }

    if num_points == 0 {
        let cloud = GaussianCloudIR {
            meta: crate::structures::GaussMetadata {
                source_format: "ply".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        return Ok(ReadOutcome::clean(cloud));
    }
    let num_points = num_points as usize;

    let mut fields: HashMap<&str, usize> = HashMap::with_capacity(field_names.len());
    for (i, &name) in field_names.iter().enumerate() {
        let name = std::str::from_utf8(name)
            .map_err(|e| err(format!("read failed: invalid field name: {}", e)))?;
        fields.insert(name, i);
    }

    let idx = |name: &str| -> Result<usize, ConvError> {
        fields
            .get(name)
            .copied()
            .ok_or_else(|| err(format!("read failed: missing required field {}", name)))
    };

    let pos_idx = [idx("x")?, idx("y")?, idx("z")?];
    let scale_idx = [idx("scale_0")?, idx("scale_1")?, idx("scale_2")?];
    let rot_idx = [idx("rot_0")?, idx("rot_1")?, idx("rot_2")?, idx("rot_3")?];
    let alpha_idx = idx("opacity")?;
    let color_idx = [idx("f_dc_0")?, idx("f_dc_1")?, idx("f_dc_2")?];

    let mut sh_idx = Vec::new();
    loop {
        let name = format!("f_rest_{}", sh_idx.len());
        match fields.get(name.as_str()) {
            Some(&found) => sh_idx.push(found),
            None => break,
        }
    }
    let sh_dim = sh_idx.len() / 3;

    let stride = field_names.len();

    // Unrecognized float properties (normals and the like) are preserved
    // as extras; no codec consumes them.
    let mut used = vec![false; stride];
    for &i in pos_idx
        .iter()
        .chain(scale_idx.iter())
        .chain(rot_idx.iter())
        .chain(color_idx.iter())
        .chain(sh_idx.iter())
    {
        used[i] = true;
    }
    used[alpha_idx] = true;
    let mut extra_fields: Vec<(String, usize)> = fields
        .iter()
        .filter(|&(_, &i)| !used[i])
        .map(|(&name, &i)| (name.to_string(), i))
        .collect();
    extra_fields.sort_by_key(|&(_, i)| i);
    let payload = &data[cursor.payload_offset()..];
    let expected_bytes = num_points
        .checked_mul(stride)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| err("read failed: vertex count overflow"))?;
    if payload.len() < expected_bytes {
        return Err(err(format!(
            "read failed: insufficient data, need {} bytes, have {}",
            expected_bytes,
            payload.len()
        )));
    }

    let mut values = vec![0.0_f32; num_points * stride];
    for (dst, src) in values.iter_mut().zip(payload.chunks_exact(4)) {
        *dst = f32::from_le_bytes([src[0], src[1], src[2], src[3]]);
    }

    let mut ir = GaussianCloudIR {
        num_points: num_points as i32,
        positions: Vec::with_capacity(num_points * 3),
        scales: Vec::with_capacity(num_points * 3),
        rotations: Vec::with_capacity(num_points * 4),
        alphas: Vec::with_capacity(num_points),
        colors: Vec::with_capacity(num_points * 3),
        sh: Vec::with_capacity(num_points * sh_dim * 3),
        ..Default::default()
    };
    ir.meta.sh_degree = degree_for_dim(sh_dim);
    ir.meta.source_format = "ply".to_string();

    let mut extra_cols: Vec<Vec<f32>> =
        vec![Vec::with_capacity(num_points); extra_fields.len()];

    for row in values.chunks_exact(stride) {
        for &i in &pos_idx {
            ir.positions.push(row[i]);
        }
        for &i in &scale_idx {
            ir.scales.push(row[i]);
        }
        for &i in &rot_idx {
            ir.rotations.push(row[i]);
        }
        ir.alphas.push(row[alpha_idx]);
        for &i in &color_idx {
            ir.colors.push(row[i]);
        }
        // Transpose channel-major f_rest_* to interleaved RGB per coefficient.
        for j in 0..sh_dim {
            ir.sh.push(row[sh_idx[j]]);
            ir.sh.push(row[sh_idx[j + sh_dim]]);
            ir.sh.push(row[sh_idx[j + 2 * sh_dim]]);
        }
        for (col, &(_, i)) in extra_cols.iter_mut().zip(extra_fields.iter()) {
            col.push(row[i]);
        }
    }

    for ((name, _), col) in extra_fields.into_iter().zip(extra_cols) {
        ir.extras.insert(name, col);
    }

    let warning = validate(&ir, options.strict);
    if options.strict {
        if let Some(msg) = warning {
            return Err(ConvError::Validate(msg));
        }
        return Ok(ReadOutcome::clean(ir));
    }
    Ok(ReadOutcome { cloud: ir, warning })
}

pub fn write(ir: &GaussianCloudIR, options: &WriteOptions) -> Result<Vec<u8>, ConvError> {
    // Length mismatches are always fatal on write; strict additionally
    // scans for non-finite values.
    if let Some(msg) = validate(ir, options.strict) {
        return Err(ConvError::Validate(msg));
    }

    let n = ir.num_points.max(0) as usize;
    let sh_dim = if n > 0 { ir.sh.len() / n / 3 } else { 0 };

    let mut out = Vec::new();
    out.extend_from_slice(b"ply\n");
    out.extend_from_slice(FORMAT_LINE);
    out.push(b'\n');
    out.extend_from_slice(format!("element vertex {}\n", n).as_bytes());
    out.extend_from_slice(b"property float x\nproperty float y\nproperty float z\n");
    out.extend_from_slice(
        b"property float scale_0\nproperty float scale_1\nproperty float scale_2\n",
    );
    out.extend_from_slice(
        b"property float rot_0\nproperty float rot_1\nproperty float rot_2\nproperty float rot_3\n",
    );
    out.extend_from_slice(b"property float opacity\n");
    out.extend_from_slice(b"property float f_dc_0\nproperty float f_dc_1\nproperty float f_dc_2\n");
    for i in 0..sh_dim * 3 {
        out.extend_from_slice(format!("property float f_rest_{}\n", i).as_bytes());
    }
    out.extend_from_slice(b"end_header\n");

    let stride = 14 + sh_dim * 3;
    out.reserve(n * stride * 4);

    let mut row: Vec<f32> = Vec::with_capacity(stride);
    for i in 0..n {
        row.clear();
        row.extend_from_slice(&ir.positions[i * 3..i * 3 + 3]);
        row.extend_from_slice(&ir.scales[i * 3..i * 3 + 3]);
        row.extend_from_slice(&ir.rotations[i * 4..i * 4 + 4]);
        row.push(ir.alphas[i]);
        row.extend_from_slice(&ir.colors[i * 3..i * 3 + 3]);
        // f_rest_* are channel-major on disk: all R coefficients, then G,
        // then B.
        for channel in 0..3 {
            for j in 0..sh_dim {
                row.push(ir.sh[(i * sh_dim + j) * 3 + channel]);
            }
        }
        out.extend_from_slice(bytemuck::cast_slice(&row));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_point_cloud() -> GaussianCloudIR {
        GaussianCloudIR {
            num_points: 1,
            positions: vec![1.0, 2.0, 3.0],
            scales: vec![0.0, 0.0, 0.0],
            rotations: vec![1.0, 0.0, 0.0, 0.0],
            alphas: vec![0.0],
            colors: vec![0.0, 0.0, 0.0],
            ..Default::default()
        }
    }

    fn empty_header() -> Vec<u8> {
        b"ply\n\
format binary_little_endian 1.0\n\
element vertex 0\n\
property float x\n\
property float y\n\
property float z\n\
property float scale_0\n\
property float scale_1\n\
property float scale_2\n\
property float rot_0\n\
property float rot_1\n\
property float rot_2\n\
property float rot_3\n\
property float opacity\n\
property float f_dc_0\n\
property float f_dc_1\n\
property float f_dc_2\n\
end_header\n"
            .to_vec()
    }

    #[test]
    fn empty_vertex_count_yields_empty_cloud() {
        let outcome = read(&empty_header(), &ReadOptions::default()).unwrap();
        assert_eq!(outcome.cloud.num_points, 0);
        assert!(outcome.cloud.positions.is_empty());
        assert_eq!(outcome.cloud.meta.sh_degree, 0);
        assert!(outcome.warning.is_none());
    }

    #[test]
    fn rejects_wrong_magic_and_format() {
        assert!(read(b"plyx\nrest", &ReadOptions::default()).is_err());
        assert!(read(
            b"ply\nformat binary_big_endian 1.0\nelement vertex 0\nend_header\n",
            &ReadOptions::default()
        )
        .is_err());
    }

    #[test]
    fn rejects_non_float_properties() {
        let data = b"ply\nformat binary_little_endian 1.0\nelement vertex 1\nproperty uchar x\nend_header\n";
        assert!(matches!(
            read(data, &ReadOptions::default()),
            Err(ConvError::Ply(_))
        ));
    }

    #[test]
    fn rejects_truncated_payload() {
        let mut data = write(&single_point_cloud(), &WriteOptions::default()).unwrap();
        data.truncate(data.len() - 1);
        assert!(read(&data, &ReadOptions::default()).is_err());
    }

    #[test]
    fn comments_are_skipped_anywhere() {
        let mut header = empty_header();
        // Right after the "ply\n" magic line.
        header.splice(4..4, b"comment generated\n".iter().copied());
        let outcome = read(&header, &ReadOptions::default()).unwrap();
        assert_eq!(outcome.cloud.num_points, 0);
    }

    #[test]
    fn single_point_round_trip_is_exact() {
        let ir = single_point_cloud();
        let bytes = write(&ir, &WriteOptions::default()).unwrap();
        let back = read(&bytes, &ReadOptions::default()).unwrap().cloud;
        assert_eq!(back.num_points, 1);
        assert_eq!(back.positions, ir.positions);
        assert_eq!(back.scales, ir.scales);
        assert_eq!(back.rotations, ir.rotations);
        assert_eq!(back.alphas, ir.alphas);
        assert_eq!(back.colors, ir.colors);
    }

    #[test]
    fn sh_round_trip_transposes_channel_major() {
        let mut ir = single_point_cloud();
        ir.meta.sh_degree = 1;
        // Interleaved RGB per coefficient: [c0r, c0g, c0b, c1r, ...]
        ir.sh = (0..9).map(|v| v as f32 / 10.0).collect();
        let bytes = write(&ir, &WriteOptions::default()).unwrap();

        let back = read(&bytes, &ReadOptions::default()).unwrap().cloud;
        assert_eq!(back.meta.sh_degree, 1);
        assert_eq!(back.sh, ir.sh);

        // On disk the first three f_rest values are the three R coefficients.
        let header_end = bytes.windows(11).position(|w| w == b"end_header\n").unwrap() + 11;
        let payload = &bytes[header_end..];
        let f_rest_0 = f32::from_le_bytes(payload[14 * 4..14 * 4 + 4].try_into().unwrap());
        let f_rest_1 = f32::from_le_bytes(payload[15 * 4..15 * 4 + 4].try_into().unwrap());
        assert_eq!(f_rest_0, ir.sh[0]);
        assert_eq!(f_rest_1, ir.sh[3]);
    }

    #[test]
    fn unknown_float_properties_land_in_extras() {
        let mut header = String::from("ply\nformat binary_little_endian 1.0\nelement vertex 2\n");
        for name in [
            "x", "y", "z", "nx", "ny", "nz", "scale_0", "scale_1", "scale_2", "rot_0", "rot_1",
            "rot_2", "rot_3", "opacity", "f_dc_0", "f_dc_1", "f_dc_2",
        ] {
            header.push_str(&format!("property float {}\n", name));
        }
        header.push_str("end_header\n");

        let mut data = header.into_bytes();
        for point in 0..2 {
            for field in 0..17 {
                let v = (point * 100 + field) as f32;
                data.extend_from_slice(&v.to_le_bytes());
            }
        }

        let ir = read(&data, &ReadOptions::default()).unwrap().cloud;
        assert_eq!(ir.num_points, 2);
        assert_eq!(ir.extras.len(), 3);
        assert_eq!(ir.extras["nx"], vec![3.0, 103.0]);
        assert_eq!(ir.extras["nz"], vec![5.0, 105.0]);

        // The writer does not emit extras; a round trip drops them.
        let bytes = write(&ir, &WriteOptions::default()).unwrap();
        let back = read(&bytes, &ReadOptions::default()).unwrap().cloud;
        assert!(back.extras.is_empty());
        assert_eq!(back.positions, ir.positions);
    }

    #[test]
    fn strict_rejects_non_finite_values() {
        let mut ir = single_point_cloud();
        ir.positions[0] = f32::NAN;
        let bytes = write(&ir, &WriteOptions::default()).unwrap();
        assert!(read(&bytes, &ReadOptions { strict: true }).is_err());
        let relaxed = read(&bytes, &ReadOptions::default()).unwrap();
        assert!(relaxed.warning.is_some());
    }
}
