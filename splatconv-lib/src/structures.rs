use foldhash::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Handedness {
    #[default]
    Unknown,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpAxis {
    #[default]
    Unknown,
    Y,
    Z,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LengthUnit {
    #[default]
    Unknown,
    Meter,
    Centimeter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSpace {
    #[default]
    Unknown,
    Linear,
    Srgb,
}

impl Handedness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Handedness::Left => "Left",
            Handedness::Right => "Right",
            Handedness::Unknown => "Unknown",
        }
    }
}

impl UpAxis {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpAxis::Y => "Y",
            UpAxis::Z => "Z",
            UpAxis::Unknown => "Unknown",
        }
    }
}

impl LengthUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            LengthUnit::Meter => "Meter",
            LengthUnit::Centimeter => "Centimeter",
            LengthUnit::Unknown => "Unknown",
        }
    }
}

impl ColorSpace {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorSpace::Linear => "Linear",
            ColorSpace::Srgb => "sRGB",
            ColorSpace::Unknown => "Unknown",
        }
    }
}

/// Source-level metadata carried alongside the point arrays.
#[derive(Debug, Clone, Default)]
pub struct GaussMetadata {
    pub handedness: Handedness,
    pub up: UpAxis,
    pub unit: LengthUnit,
    pub color: ColorSpace,
    pub sh_degree: i32,
    pub antialiased: bool,
    pub source_format: String,
}

/// In-memory intermediate representation shared by every codec.
///
/// Structure-of-arrays layout:
/// - `positions`: `[x0, y0, z0, x1, y1, z1, ...]`, 3 * N
/// - `scales`: log-space per-axis std-dev, 3 * N
/// - `rotations`: unit quaternions stored `[w, x, y, z]` per point, 4 * N
/// - `alphas`: pre-sigmoid opacity (logit), N
/// - `colors`: SH degree-0 (DC) coefficients, RGB interleaved, 3 * N
/// - `sh`: higher-order SH, RGB interleaved per coefficient with
///   coefficients ordered by ascending band, `sh_coeffs_per_point` * N
///
/// Formats that store a different quaternion order or a channel-major SH
/// layout translate at their own boundary; the IR layout never varies.
#[derive(Debug, Default, Clone)]
pub struct GaussianCloudIR {
    pub num_points: i32,
    pub positions: Vec<f32>,
    pub scales: Vec<f32>,
    pub rotations: Vec<f32>,
    pub alphas: Vec<f32>,
    pub colors: Vec<f32>,
    pub sh: Vec<f32>,
    pub extras: HashMap<String, Vec<f32>>,
    pub meta: GaussMetadata,
}

/// Total higher-order SH floats per point for a given degree.
#[inline]
pub fn sh_coeffs_per_point(degree: i32) -> usize {
    if degree <= 0 {
        return 0;
    }
    let per_channel = (degree + 1) * (degree + 1) - 1;
    per_channel as usize * 3
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    pub strict: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    pub strict: bool,
}

/// A decoded cloud plus any non-strict validation finding.
#[derive(Debug)]
pub struct ReadOutcome {
    pub cloud: GaussianCloudIR,
    pub warning: Option<String>,
}

impl ReadOutcome {
    pub fn clean(cloud: GaussianCloudIR) -> Self {
        ReadOutcome {
            cloud,
            warning: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sh_coeffs_follow_band_formula() {
        assert_eq!(sh_coeffs_per_point(0), 0);
        assert_eq!(sh_coeffs_per_point(-1), 0);
        assert_eq!(sh_coeffs_per_point(1), 9);
        assert_eq!(sh_coeffs_per_point(2), 24);
        assert_eq!(sh_coeffs_per_point(3), 45);
    }
}
