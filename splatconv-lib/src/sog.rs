//! SOG codec: a STORED-mode ZIP of lossless WebP textures plus a JSON
//! metadata entry. Positions ride a log transform quantized to 16 bits
//! split across two textures; scales and DC colors go through 256-entry
//! k-means codebooks; quaternions use a smallest-three byte encoding with
//! the dropped-component index tagged in the alpha channel.

use serde::{Deserialize, Serialize};

use crate::common::sigmoid;
use crate::error::ConvError;
use crate::structures::{
    GaussianCloudIR, Handedness, ReadOptions, ReadOutcome, UpAxis, WriteOptions,
};
use crate::validate::validate;
use crate::webp;
use crate::zip::{ZipArchive, ZipWriter};

pub(crate) const CODEBOOK_SIZE: usize = 256;
const KMEANS_ITERATIONS: usize = 10;

fn err(msg: impl Into<String>) -> ConvError {
    ConvError::Sog(msg.into())
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MeansMeta {
    #[serde(default)]
    mins: Vec<f32>,
    #[serde(default)]
    maxs: Vec<f32>,
    #[serde(default)]
    files: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FilesMeta {
    #[serde(default)]
    files: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CodebookMeta {
    #[serde(default)]
    codebook: Vec<f32>,
    #[serde(default)]
    files: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ShnMeta {
    #[serde(default)]
    count: u32,
    #[serde(default)]
    bands: u32,
    #[serde(default)]
    codebook: Vec<f32>,
    #[serde(default)]
    files: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SogMeta {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    count: u32,
    #[serde(default)]
    antialias: bool,
    #[serde(default)]
    means: MeansMeta,
    #[serde(default)]
    quats: FilesMeta,
    #[serde(default)]
    scales: CodebookMeta,
    #[serde(default)]
    sh0: CodebookMeta,
    #[serde(default, rename = "shN", skip_serializing_if = "Option::is_none")]
    sh_n: Option<ShnMeta>,
}

#[inline]
fn log_transform(v: f32) -> f32 {
    if v < 0.0 {
        -(v.abs() + 1.0).ln()
    } else {
        (v + 1.0).ln()
    }
}

#[inline]
fn inv_log_transform(v: f32) -> f32 {
    let e = v.abs().exp_m1();
    if v < 0.0 {
        -e
    } else {
        e
    }
}

#[inline]
fn sigmoid_inv(y: f32) -> f32 {
    let e = y.clamp(1e-6, 1.0 - 1e-6);
    (e / (1.0 - e)).ln()
}

/// 1-D k-means with linear initialization between the data extremes.
/// Returns the codebook and fills `indices` with each value's center.
fn generate_codebook(data: &[f32], centers: usize, indices: &mut Vec<u8>) -> Vec<f32> {
    if data.is_empty() {
        indices.clear();
        return vec![0.0; centers];
    }

    let mut min_v = data[0];
    let mut max_v = data[0];
    for &v in data {
        min_v = min_v.min(v);
        max_v = max_v.max(v);
    }
    let range = max_v - min_v;
    let denom = if centers > 1 { centers - 1 } else { 1 } as f32;
    let mut centroids: Vec<f32> = (0..centers)
        .map(|i| min_v + (i as f32 / denom) * range)
        .collect();

    indices.clear();
    indices.resize(data.len(), 0);
    let mut sums = vec![0.0_f32; centers];
    let mut counts = vec![0_usize; centers];

    for _ in 0..KMEANS_ITERATIONS {
        sums.fill(0.0);
        counts.fill(0);

        for (i, &v) in data.iter().enumerate() {
            let mut best = 0;
            let mut best_d = f32::INFINITY;
            for (k, &c) in centroids.iter().enumerate() {
                let d = (v - c).abs();
                if d < best_d {
                    best_d = d;
                    best = k;
                }
            }
            indices[i] = best as u8;
            sums[best] += v;
            counts[best] += 1;
        }

        for k in 0..centers {
            if counts[k] > 0 {
                centroids[k] = sums[k] / counts[k] as f32;
            }
        }
    }

    centroids
}

/// Smallest-three byte encoding with the dropped-component index stored
/// as `252 + index` in the alpha channel.
fn encode_quaternion(q: [f32; 4], out: &mut [u8]) {
    let mut q = q;
    let mut max_idx = 0;
    for i in 1..4 {
        if q[i].abs() > q[max_idx].abs() {
            max_idx = i;
        }
    }
    if q[max_idx] < 0.0 {
        for v in q.iter_mut() {
            *v = -*v;
        }
    }

    let inv_sqrt2 = std::f32::consts::FRAC_1_SQRT_2;
    let mut count = 0;
    for (i, &v) in q.iter().enumerate() {
        if i == max_idx {
            continue;
        }
        let val = ((v / inv_sqrt2 + 1.0) * 0.5).clamp(0.0, 1.0);
        out[count] = (val * 255.0).round() as u8;
        count += 1;
    }
    out[3] = (252 + max_idx) as u8;
}

fn texture_dims(count: usize) -> (u32, u32) {
    let width = (count as f64).sqrt().ceil() as u32;
    let height = (count as u32).div_ceil(width.max(1));
    (width.max(1), height.max(1))
}

struct TexturePlan {
    width: u32,
    height: u32,
}

impl TexturePlan {
    fn encode(&self, rgba: &[u8]) -> Result<Vec<u8>, ConvError> {
        webp::encode_lossless(rgba, self.width, self.height).map_err(err)
    }

    fn blank(&self) -> Vec<u8> {
        vec![0_u8; self.width as usize * self.height as usize * 4]
    }
}

pub fn write(ir: &GaussianCloudIR, options: &WriteOptions) -> Result<Vec<u8>, ConvError> {
    if let Some(msg) = validate(ir, options.strict) {
        return Err(ConvError::Validate(msg));
    }

    let count = ir.num_points as usize;
    if count == 0 {
        return Err(err("write failed: no points to write"));
    }

    let (width, height) = texture_dims(count);
    let plan = TexturePlan { width, height };

    let mut zip = ZipWriter::new();
    let mut meta = SogMeta {
        version: 2,
        count: count as u32,
        antialias: ir.meta.antialiased,
        ..Default::default()
    };

    // Positions: log-transformed, per-axis normalized to u16, split into
    // low and high byte planes.
    let mut log_pos = vec![0.0_f32; count * 3];
    let mut mins = [f32::INFINITY; 3];
    let mut maxs = [f32::NEG_INFINITY; 3];
    for i in 0..count {
        for d in 0..3 {
            let v = log_transform(ir.positions[i * 3 + d]);
            log_pos[i * 3 + d] = v;
            mins[d] = mins[d].min(v);
            maxs[d] = maxs[d].max(v);
        }
    }
    meta.means.mins = mins.to_vec();
    meta.means.maxs = maxs.to_vec();
    meta.means.files = vec!["means_l.webp".to_string(), "means_u.webp".to_string()];

    let mut means_l = plan.blank();
    let mut means_u = plan.blank();
    for i in 0..count {
        for d in 0..3 {
            let range = maxs[d] - mins[d];
            let n = if range > 1e-8 {
                (log_pos[i * 3 + d] - mins[d]) / range
            } else {
                0.0
            };
            let q = (n * 65535.0).clamp(0.0, 65535.0) as u16;
            means_l[i * 4 + d] = (q & 0xFF) as u8;
            means_u[i * 4 + d] = (q >> 8) as u8;
        }
        means_l[i * 4 + 3] = 255;
        means_u[i * 4 + 3] = 255;
    }
    zip.add_file("means_l.webp", &plan.encode(&means_l)?);
    zip.add_file("means_u.webp", &plan.encode(&means_u)?);

    // Quaternions.
    let mut quats_rgba = plan.blank();
    for i in 0..count {
        let q = [
            ir.rotations[i * 4],
            ir.rotations[i * 4 + 1],
            ir.rotations[i * 4 + 2],
            ir.rotations[i * 4 + 3],
        ];
        encode_quaternion(q, &mut quats_rgba[i * 4..i * 4 + 4]);
    }
    meta.quats.files = vec!["quats.webp".to_string()];
    zip.add_file("quats.webp", &plan.encode(&quats_rgba)?);

    // Scales: one shared 1-D codebook over all 3N values.
    let mut scale_indices = Vec::new();
    meta.scales.codebook = generate_codebook(&ir.scales, CODEBOOK_SIZE, &mut scale_indices);
    meta.scales.files = vec!["scales.webp".to_string()];
    let mut scales_rgba = plan.blank();
    for i in 0..count {
        for d in 0..3 {
            scales_rgba[i * 4 + d] = scale_indices[i * 3 + d];
        }
        scales_rgba[i * 4 + 3] = 255;
    }
    zip.add_file("scales.webp", &plan.encode(&scales_rgba)?);

    // DC colors share the same codebook scheme; opacity rides the alpha
    // channel in sigmoid space.
    let mut sh0_indices = Vec::new();
    meta.sh0.codebook = generate_codebook(&ir.colors, CODEBOOK_SIZE, &mut sh0_indices);
    meta.sh0.files = vec!["sh0.webp".to_string()];
    let mut sh0_rgba = plan.blank();
    for i in 0..count {
        for d in 0..3 {
            sh0_rgba[i * 4 + d] = sh0_indices[i * 3 + d];
        }
        sh0_rgba[i * 4 + 3] = (sigmoid(ir.alphas[i]) * 255.0).clamp(0.0, 255.0) as u8;
    }
    zip.add_file("sh0.webp", &plan.encode(&sh0_rgba)?);

    let meta_bytes = serde_json::to_vec_pretty(&meta)
        .map_err(|e| err(format!("meta.json serialization failed: {}", e)))?;
    zip.add_file("meta.json", &meta_bytes);

    Ok(zip.finalize())
}

fn decode_texture(
    archive: &ZipArchive,
    name: &str,
    min_pixels: usize,
) -> Result<webp::Texture, ConvError> {
    let bytes = archive.extract(name).map_err(err)?;
    let texture = webp::decode(&bytes).map_err(err)?;
    if texture.pixel_count() < min_pixels {
        return Err(err(format!(
            "{}: texture holds {} pixels, need {}",
            name,
            texture.pixel_count(),
            min_pixels
        )));
    }
    Ok(texture)
}

fn codebook_lookup(codebook: &[f32], index: u8, what: &str) -> Result<f32, ConvError> {
    codebook
        .get(index as usize)
        .copied()
        .ok_or_else(|| err(format!("{}: codebook index {} out of range", what, index)))
}

pub fn read(data: &[u8], options: &ReadOptions) -> Result<ReadOutcome, ConvError> {
    let archive = ZipArchive::open(data).map_err(err)?;

    let meta_bytes = archive
        .extract("meta.json")
        .map_err(|_| err("meta.json not found in archive"))?;
    let meta: SogMeta = serde_json::from_slice(&meta_bytes)
        .map_err(|e| err(format!("meta.json parse failed: {}", e)))?;

    if meta.version < 2 {
        return Err(err(format!("unsupported version {}", meta.version)));
    }

    let count = meta.count as usize;
    let mut ir = GaussianCloudIR {
        num_points: meta.count as i32,
        ..Default::default()
    };
    ir.meta.source_format = "sog".to_string();
    ir.meta.antialiased = meta.antialias;
    ir.meta.handedness = Handedness::Right;
    ir.meta.up = UpAxis::Y;
    ir.meta.color = crate::structures::ColorSpace::Linear;

    // Positions.
    if meta.means.files.len() >= 2 {
        if meta.means.mins.len() < 3 || meta.means.maxs.len() < 3 {
            return Err(err("means: mins/maxs must hold three axes"));
        }
        let means_l = decode_texture(&archive, &meta.means.files[0], count)?;
        let means_u = decode_texture(&archive, &meta.means.files[1], count)?;
        ir.positions.resize(count * 3, 0.0);
        for i in 0..count {
            for d in 0..3 {
                let lo = means_l.rgba[i * 4 + d] as u16;
                let hi = means_u.rgba[i * 4 + d] as u16;
                let q = lo | (hi << 8);
                let v = meta.means.mins[d]
                    + (q as f32 / 65535.0) * (meta.means.maxs[d] - meta.means.mins[d]);
                ir.positions[i * 3 + d] = inv_log_transform(v);
            }
        }
    }

    // Quaternions.
    if !meta.quats.files.is_empty() {
        let quats = decode_texture(&archive, &meta.quats.files[0], count)?;
        ir.rotations.resize(count * 4, 0.0);
        let sqrt2 = std::f32::consts::SQRT_2;
        for i in 0..count {
            let px = quats.rgba[i * 4];
            let py = quats.rgba[i * 4 + 1];
            let pz = quats.rgba[i * 4 + 2];
            let tag = quats.rgba[i * 4 + 3];

            let out = &mut ir.rotations[i * 4..i * 4 + 4];
            if tag < 252 {
                out.copy_from_slice(&[1.0, 0.0, 0.0, 0.0]);
                continue;
            }

            let a = (px as f32 / 255.0 - 0.5) * sqrt2;
            let b = (py as f32 / 255.0 - 0.5) * sqrt2;
            let c = (pz as f32 / 255.0 - 0.5) * sqrt2;
            let d = (1.0 - (a * a + b * b + c * c)).max(0.0).sqrt();

            let (w, x, y, z) = match tag - 252 {
                0 => (d, a, b, c),
                1 => (a, d, b, c),
                2 => (a, b, d, c),
                _ => (a, b, c, d),
            };
            out.copy_from_slice(&[w, x, y, z]);
        }
    }

    // Scales.
    if !meta.scales.files.is_empty() && !meta.scales.codebook.is_empty() {
        let scales = decode_texture(&archive, &meta.scales.files[0], count)?;
        ir.scales.resize(count * 3, 0.0);
        for i in 0..count {
            for d in 0..3 {
                ir.scales[i * 3 + d] =
                    codebook_lookup(&meta.scales.codebook, scales.rgba[i * 4 + d], "scales")?;
            }
        }
    }

    // DC colors and opacity.
    if !meta.sh0.files.is_empty() && !meta.sh0.codebook.is_empty() {
        let sh0 = decode_texture(&archive, &meta.sh0.files[0], count)?;
        ir.colors.resize(count * 3, 0.0);
        ir.alphas.resize(count, 0.0);
        for i in 0..count {
            for d in 0..3 {
                ir.colors[i * 3 + d] =
                    codebook_lookup(&meta.sh0.codebook, sh0.rgba[i * 4 + d], "sh0")?;
            }
            ir.alphas[i] = sigmoid_inv(sh0.rgba[i * 4 + 3] as f32 / 255.0);
        }
    }

    // Optional higher-order SH palette.
    if let Some(shn) = &meta.sh_n {
        if shn.bands > 0 && shn.files.len() >= 2 && !shn.codebook.is_empty() {
            let centroids = decode_texture(&archive, &shn.files[0], 0)?;
            let labels = decode_texture(&archive, &shn.files[1], count)?;

            let sh_coeffs = match shn.bands.min(3) {
                1 => 3_usize,
                2 => 8,
                _ => 15,
            };
            ir.sh.resize(count * sh_coeffs * 3, 0.0);
            ir.meta.sh_degree = shn.bands.min(3) as i32;

            for i in 0..count {
                let palette_idx =
                    labels.rgba[i * 4] as usize | ((labels.rgba[i * 4 + 1] as usize) << 8);
                if palette_idx >= shn.count as usize {
                    continue;
                }

                for j in 0..sh_coeffs {
                    let cx = (palette_idx % 64) * sh_coeffs + j;
                    let cy = palette_idx / 64;
                    let off = (cy * centroids.width as usize + cx) * 4;
                    if off + 3 >= centroids.rgba.len() {
                        return Err(err("shN: centroid lookup out of texture bounds"));
                    }
                    for c in 0..3 {
                        ir.sh[i * sh_coeffs * 3 + j * 3 + c] =
                            codebook_lookup(&shn.codebook, centroids.rgba[off + c], "shN")?;
                    }
                }
            }
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codebook_is_exact_for_constant_data() {
        let mut indices = Vec::new();
        let codebook = generate_codebook(&[2.5; 32], CODEBOOK_SIZE, &mut indices);
        assert_eq!(codebook.len(), CODEBOOK_SIZE);
        assert_eq!(indices.len(), 32);
        for &i in &indices {
            assert_eq!(codebook[i as usize], 2.5);
        }
    }

    #[test]
    fn codebook_reconstruction_error_is_bounded() {
        let data: Vec<f32> = (0..1000).map(|v| (v as f32 / 999.0) * 4.0 - 2.0).collect();
        let mut indices = Vec::new();
        let codebook = generate_codebook(&data, CODEBOOK_SIZE, &mut indices);
        // Linear data over a 4-unit range against 256 centers.
        for (v, &i) in data.iter().zip(indices.iter()) {
            assert!((v - codebook[i as usize]).abs() < 0.05);
        }
    }

    fn zero_cloud() -> GaussianCloudIR {
        GaussianCloudIR {
            num_points: 1,
            positions: vec![0.0; 3],
            scales: vec![0.0; 3],
            rotations: vec![1.0, 0.0, 0.0, 0.0],
            alphas: vec![0.0],
            colors: vec![0.0; 3],
            ..Default::default()
        }
    }

    #[test]
    fn round_trip_at_zero() {
        let bytes = write(&zero_cloud(), &WriteOptions::default()).unwrap();
        let outcome = read(&bytes, &ReadOptions::default()).unwrap();
        assert!(outcome.warning.is_none(), "{:?}", outcome.warning);
        let ir = outcome.cloud;

        assert_eq!(ir.num_points, 1);
        for &p in &ir.positions {
            assert!(p.abs() < 1e-4);
        }
        // Identity comes back on the byte grid: w dominant, xyz near zero.
        assert!((ir.rotations[0] - 1.0).abs() < 1e-4);
        for d in 1..4 {
            assert!(ir.rotations[d].abs() < 0.005);
        }
        for &s in &ir.scales {
            assert!(s.abs() < 1e-4);
        }
        assert!(ir.alphas[0].abs() < 0.02);
        assert_eq!(ir.meta.handedness, Handedness::Right);
    }

    #[test]
    fn w_dominant_quaternion_tags_252() {
        let bytes = write(&zero_cloud(), &WriteOptions::default()).unwrap();
        let archive = ZipArchive::open(&bytes).unwrap();
        let quats = webp::decode(&archive.extract("quats.webp").unwrap()).unwrap();
        assert_eq!(quats.rgba[3], 252);
    }

    #[test]
    fn round_trip_multi_point() {
        let n = 7;
        let mut ir = GaussianCloudIR {
            num_points: n as i32,
            positions: (0..n * 3).map(|v| v as f32 - 10.0).collect(),
            scales: (0..n * 3).map(|v| -3.0 + v as f32 * 0.2).collect(),
            rotations: Vec::new(),
            alphas: (0..n).map(|v| v as f32 * 0.3 - 1.0).collect(),
            colors: (0..n * 3).map(|v| (v as f32 * 0.07) - 0.5).collect(),
            ..Default::default()
        };
        for i in 0..n {
            let t = i as f32 * 0.4;
            let q = [t.cos(), t.sin() * 0.6, t.sin() * 0.8, 0.0];
            let norm = (q.iter().map(|v| v * v).sum::<f32>()).sqrt();
            ir.rotations.extend(q.iter().map(|v| v / norm));
        }

        let bytes = write(&ir, &WriteOptions::default()).unwrap();
        let back = read(&bytes, &ReadOptions::default()).unwrap().cloud;

        assert_eq!(back.num_points, ir.num_points);
        for (a, b) in ir.positions.iter().zip(back.positions.iter()) {
            // 16-bit grid over the log-transformed range.
            assert!((a - b).abs() < 0.01, "{} vs {}", a, b);
        }
        for (a, b) in ir.scales.iter().zip(back.scales.iter()) {
            assert!((a - b).abs() < 0.05);
        }
        for (a, b) in ir.colors.iter().zip(back.colors.iter()) {
            assert!((a - b).abs() < 0.05);
        }
        for (a, b) in ir.alphas.iter().zip(back.alphas.iter()) {
            assert!((a - b).abs() < 0.05);
        }
        for (qa, qb) in ir.rotations.chunks_exact(4).zip(back.rotations.chunks_exact(4)) {
            // Compare up to sign.
            let dot: f32 = qa.iter().zip(qb.iter()).map(|(x, y)| x * y).sum();
            assert!(dot.abs() > 0.999, "{:?} vs {:?}", qa, qb);
        }
    }

    #[test]
    fn rejects_old_versions() {
        let bytes = write(&zero_cloud(), &WriteOptions::default()).unwrap();
        let archive = ZipArchive::open(&bytes).unwrap();
        let meta_text = String::from_utf8(archive.extract("meta.json").unwrap()).unwrap();
        let old = meta_text.replace("\"version\": 2", "\"version\": 1");

        let mut zip = ZipWriter::new();
        for name in [
            "means_l.webp",
            "means_u.webp",
            "quats.webp",
            "scales.webp",
            "sh0.webp",
        ] {
            zip.add_file(name, &archive.extract(name).unwrap());
        }
        zip.add_file("meta.json", old.as_bytes());
        assert!(matches!(
            read(&zip.finalize(), &ReadOptions::default()),
            Err(ConvError::Sog(_))
        ));
    }

    #[test]
    fn missing_meta_is_an_error() {
        let mut zip = ZipWriter::new();
        zip.add_file("other.bin", b"xx");
        assert!(read(&zip.finalize(), &ReadOptions::default()).is_err());
    }

    #[test]
    fn shn_palette_decodes_and_sets_degree() {
        // Assemble a minimal archive by hand: one point, bands=1, one
        // palette prototype of three coefficient pixels.
        let base = write(&zero_cloud(), &WriteOptions::default()).unwrap();
        let archive = ZipArchive::open(&base).unwrap();

        let mut codebook = vec![0.0_f32; CODEBOOK_SIZE];
        codebook[7] = 0.5;
        codebook[9] = -0.25;

        // Centroid run: 3 pixels, RGB hold codebook indices.
        let mut centroid_rgba = vec![0_u8; 3 * 4];
        for j in 0..3 {
            centroid_rgba[j * 4] = 7; // R
            centroid_rgba[j * 4 + 1] = 9; // G
            centroid_rgba[j * 4 + 2] = 7; // B
            centroid_rgba[j * 4 + 3] = 255;
        }
        let centroids = webp::encode_lossless(&centroid_rgba, 3, 1).unwrap();
        let labels = webp::encode_lossless(&[0, 0, 0, 255], 1, 1).unwrap();

        let meta_text = String::from_utf8(archive.extract("meta.json").unwrap()).unwrap();
        let mut meta: SogMeta = serde_json::from_str(&meta_text).unwrap();
        meta.sh_n = Some(ShnMeta {
            count: 1,
            bands: 1,
            codebook,
            files: vec!["shN_centroids.webp".to_string(), "shN_labels.webp".to_string()],
        });

        let mut zip = ZipWriter::new();
        for name in [
            "means_l.webp",
            "means_u.webp",
            "quats.webp",
            "scales.webp",
            "sh0.webp",
        ] {
            zip.add_file(name, &archive.extract(name).unwrap());
        }
        zip.add_file("shN_centroids.webp", &centroids);
        zip.add_file("shN_labels.webp", &labels);
        zip.add_file("meta.json", &serde_json::to_vec_pretty(&meta).unwrap());

        let outcome = read(&zip.finalize(), &ReadOptions::default()).unwrap();
        assert!(outcome.warning.is_none(), "{:?}", outcome.warning);
        let ir = outcome.cloud;
        assert_eq!(ir.meta.sh_degree, 1);
        assert_eq!(ir.sh.len(), 9);
        for j in 0..3 {
            assert_eq!(ir.sh[j * 3], 0.5);
            assert_eq!(ir.sh[j * 3 + 1], -0.25);
            assert_eq!(ir.sh[j * 3 + 2], 0.5);
        }
    }
}
