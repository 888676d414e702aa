//! Header-only classifier for the `ply` extension: decides between the
//! plain and the chunk-compressed layout without touching the payload,
//! then hands the buffer to the matching codec.

use crate::error::ConvError;
use crate::ply::{HeaderCursor, FORMAT_LINE};
use crate::structures::{ReadOptions, ReadOutcome};
use crate::{ply, ply_compressed};

const CHUNK_SIZE: i64 = 256;

const CHUNK_PROPERTIES: [&str; 18] = [
    "min_x",
    "min_y",
    "min_z",
    "max_x",
    "max_y",
    "max_z",
    "min_scale_x",
    "min_scale_y",
    "min_scale_z",
    "max_scale_x",
    "max_scale_y",
    "max_scale_z",
    "min_r",
    "min_g",
    "min_b",
    "max_r",
    "max_g",
    "max_b",
];

const VERTEX_PROPERTIES: [&str; 4] = [
    "packed_position",
    "packed_rotation",
    "packed_scale",
    "packed_color",
];

struct ElementInfo<'a> {
    name: &'a str,
    count: i64,
    // (type, name) pairs in declaration order.
    properties: Vec<(&'a str, &'a str)>,
}

fn parse_elements(data: &[u8]) -> Option<Vec<ElementInfo<'_>>> {
    let mut cursor = HeaderCursor::new(data);

    if cursor.next_line()? != b"ply" {
        return None;
    }
    if cursor.next_line()? != FORMAT_LINE {
        return None;
    }

    let mut elements: Vec<ElementInfo> = Vec::new();
    loop {
        let line = cursor.next_line()?;
        if line == b"end_header" {
            break;
        }
        let line = std::str::from_utf8(line).ok()?;
        if let Some(rest) = line.strip_prefix("element ") {
            let (name, count) = rest.split_once(' ')?;
            elements.push(ElementInfo {
                name,
                count: count.trim().parse().ok()?,
                properties: Vec::new(),
            });
        } else if let Some(rest) = line.strip_prefix("property ") {
            let current = elements.last_mut()?;
            let (ty, name) = rest.split_once(' ')?;
            current.properties.push((ty, name));
        }
    }
    Some(elements)
}

fn has_exact_properties(element: &ElementInfo, ty: &str, expected: &[&str]) -> bool {
    if element.properties.len() != expected.len() {
        return false;
    }
    expected
        .iter()
        .all(|want| element.properties.iter().any(|&(t, n)| t == ty && n == *want))
}

/// True iff the header matches the compressed layout: a `chunk` element
/// with the 18 min/max floats, a `vertex` element with the 4 packed uints,
/// a chunk count of `ceil(vertices / 256)`, and optionally a well-formed
/// `sh` element of 9/24/45 uchar `f_rest_*` rows.
pub(crate) fn is_compressed_ply(data: &[u8]) -> bool {
    let Some(elements) = parse_elements(data) else {
        return false;
    };

    if elements.len() != 2 && elements.len() != 3 {
        return false;
    }

    let Some(chunk) = elements.iter().find(|e| e.name == "chunk") else {
        return false;
    };
    if !has_exact_properties(chunk, "float", &CHUNK_PROPERTIES) {
        return false;
    }

    let Some(vertex) = elements.iter().find(|e| e.name == "vertex") else {
        return false;
    };
    if !has_exact_properties(vertex, "uint", &VERTEX_PROPERTIES) {
        return false;
    }

    if vertex.count < 0 || chunk.count != (vertex.count + CHUNK_SIZE - 1) / CHUNK_SIZE {
        return false;
    }

    if elements.len() == 3 {
        let Some(sh) = elements.iter().find(|e| e.name == "sh") else {
            return false;
        };
        if !matches!(sh.properties.len(), 9 | 24 | 45) {
            return false;
        }
        let mut seen = vec![false; sh.properties.len()];
        for &(ty, name) in &sh.properties {
            if ty != "uchar" {
                return false;
            }
            let Some(i) = name
                .strip_prefix("f_rest_")
                .and_then(|s| s.parse::<usize>().ok())
            else {
                return false;
            };
            if i >= seen.len() || seen[i] {
                return false;
            }
            seen[i] = true;
        }
        if sh.count != vertex.count {
            return false;
        }
    }

    true
}

pub fn read(data: &[u8], options: &ReadOptions) -> Result<ReadOutcome, ConvError> {
    if is_compressed_ply(data) {
        ply_compressed::read(data, options)
    } else {
        ply::read(data, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compressed_header(vertices: i64, chunks: i64, sh_props: Option<usize>) -> Vec<u8> {
        let mut h = String::from("ply\nformat binary_little_endian 1.0\n");
        h.push_str(&format!("element chunk {}\n", chunks));
        for name in CHUNK_PROPERTIES {
            h.push_str(&format!("property float {}\n", name));
        }
        h.push_str(&format!("element vertex {}\n", vertices));
        for name in VERTEX_PROPERTIES {
            h.push_str(&format!("property uint {}\n", name));
        }
        if let Some(props) = sh_props {
            h.push_str(&format!("element sh {}\n", vertices));
            for i in 0..props {
                h.push_str(&format!("property uchar f_rest_{}\n", i));
            }
        }
        h.push_str("end_header\n");
        h.into_bytes()
    }

    #[test]
    fn detects_compressed_header() {
        assert!(is_compressed_ply(&compressed_header(256, 1, None)));
        assert!(is_compressed_ply(&compressed_header(257, 2, None)));
        assert!(is_compressed_ply(&compressed_header(100, 1, Some(9))));
        assert!(is_compressed_ply(&compressed_header(100, 1, Some(45))));
    }

    #[test]
    fn rejects_wrong_chunk_count() {
        assert!(!is_compressed_ply(&compressed_header(257, 1, None)));
        assert!(!is_compressed_ply(&compressed_header(100, 2, None)));
    }

    #[test]
    fn rejects_bad_sh_element() {
        // Invalid coefficient count.
        assert!(!is_compressed_ply(&compressed_header(100, 1, Some(10))));
        // Duplicate property name.
        let mut h = String::from_utf8(compressed_header(100, 1, Some(9))).unwrap();
        h = h.replace("property uchar f_rest_8\n", "property uchar f_rest_0\n");
        assert!(!is_compressed_ply(h.as_bytes()));
    }

    #[test]
    fn plain_header_is_not_compressed() {
        let plain = b"ply\nformat binary_little_endian 1.0\nelement vertex 1\nproperty float x\nend_header\n";
        assert!(!is_compressed_ply(plain));
    }

    #[test]
    fn chunk_property_order_does_not_matter() {
        let h = String::from_utf8(compressed_header(256, 1, None)).unwrap();
        let swapped = h
            .replace("property float min_x\n", "property float SWAP\n")
            .replace("property float max_b\n", "property float min_x\n")
            .replace("property float SWAP\n", "property float max_b\n");
        assert!(is_compressed_ply(swapped.as_bytes()));
    }
}
