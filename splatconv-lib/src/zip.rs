//! Minimal ZIP support for the SOG container: a STORED-only writer and a
//! reader that accepts STORED and raw-DEFLATE entries. The end-of-central-
//! directory record is located by scanning backward for its signature.

use miniz_oxide::inflate::decompress_to_vec;

const LOCAL_FILE_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_DIR_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x0605_4b50;

struct WrittenEntry {
    name: String,
    offset: u32,
    size: u32,
    crc: u32,
}

/// Accumulates STORED entries and finalizes with a central directory.
pub(crate) struct ZipWriter {
    buffer: Vec<u8>,
    entries: Vec<WrittenEntry>,
}

impl ZipWriter {
    pub(crate) fn new() -> Self {
        ZipWriter {
            buffer: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub(crate) fn add_file(&mut self, name: &str, data: &[u8]) {
        let crc = crc32fast::hash(data);
        let offset = self.buffer.len() as u32;
        let size = data.len() as u32;

        self.buffer.extend_from_slice(&LOCAL_FILE_HEADER_SIG.to_le_bytes());
        self.buffer.extend_from_slice(&20_u16.to_le_bytes()); // version needed
        self.buffer.extend_from_slice(&0_u16.to_le_bytes()); // flags
        self.buffer.extend_from_slice(&0_u16.to_le_bytes()); // method: stored
        self.buffer.extend_from_slice(&0_u16.to_le_bytes()); // mod time
        self.buffer.extend_from_slice(&0_u16.to_le_bytes()); // mod date
        self.buffer.extend_from_slice(&crc.to_le_bytes());
        self.buffer.extend_from_slice(&size.to_le_bytes()); // compressed
        self.buffer.extend_from_slice(&size.to_le_bytes()); // uncompressed
        self.buffer
            .extend_from_slice(&(name.len() as u16).to_le_bytes());
        self.buffer.extend_from_slice(&0_u16.to_le_bytes()); // extra len
        self.buffer.extend_from_slice(name.as_bytes());
        self.buffer.extend_from_slice(data);

        self.entries.push(WrittenEntry {
            name: name.to_string(),
            offset,
            size,
            crc,
        });
    }

    pub(crate) fn finalize(mut self) -> Vec<u8> {
        let cd_offset = self.buffer.len() as u32;
        for e in &self.entries {
            self.buffer.extend_from_slice(&CENTRAL_DIR_HEADER_SIG.to_le_bytes());
            self.buffer.extend_from_slice(&20_u16.to_le_bytes()); // version made by
            self.buffer.extend_from_slice(&20_u16.to_le_bytes()); // version needed
            self.buffer.extend_from_slice(&0_u16.to_le_bytes()); // flags
            self.buffer.extend_from_slice(&0_u16.to_le_bytes()); // method
            self.buffer.extend_from_slice(&0_u16.to_le_bytes()); // mod time
            self.buffer.extend_from_slice(&0_u16.to_le_bytes()); // mod date
            self.buffer.extend_from_slice(&e.crc.to_le_bytes());
            self.buffer.extend_from_slice(&e.size.to_le_bytes());
            self.buffer.extend_from_slice(&e.size.to_le_bytes());
            self.buffer
                .extend_from_slice(&(e.name.len() as u16).to_le_bytes());
            self.buffer.extend_from_slice(&0_u16.to_le_bytes()); // extra len
            self.buffer.extend_from_slice(&0_u16.to_le_bytes()); // comment len
            self.buffer.extend_from_slice(&0_u16.to_le_bytes()); // disk start
            self.buffer.extend_from_slice(&0_u16.to_le_bytes()); // internal attrs
            self.buffer.extend_from_slice(&0_u32.to_le_bytes()); // external attrs
            self.buffer.extend_from_slice(&e.offset.to_le_bytes());
            self.buffer.extend_from_slice(e.name.as_bytes());
        }
        let cd_size = self.buffer.len() as u32 - cd_offset;

        self.buffer.extend_from_slice(&END_OF_CENTRAL_DIR_SIG.to_le_bytes());
        self.buffer.extend_from_slice(&0_u16.to_le_bytes()); // disk number
        self.buffer.extend_from_slice(&0_u16.to_le_bytes()); // cd start disk
        self.buffer
            .extend_from_slice(&(self.entries.len() as u16).to_le_bytes());
        self.buffer
            .extend_from_slice(&(self.entries.len() as u16).to_le_bytes());
        self.buffer.extend_from_slice(&cd_size.to_le_bytes());
        self.buffer.extend_from_slice(&cd_offset.to_le_bytes());
        self.buffer.extend_from_slice(&0_u16.to_le_bytes()); // comment len

        self.buffer
    }
}

struct ArchiveEntry {
    name_range: std::ops::Range<usize>,
    compressed_size: u32,
    uncompressed_size: u32,
    local_header_offset: u32,
    compression: u16,
}

/// Read-only view over a ZIP buffer, indexed by the central directory.
pub(crate) struct ZipArchive<'a> {
    data: &'a [u8],
    entries: Vec<ArchiveEntry>,
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

impl<'a> ZipArchive<'a> {
    pub(crate) fn open(data: &'a [u8]) -> Result<Self, String> {
        if data.len() < 22 {
            return Err("buffer too small for a zip archive".to_string());
        }

        let mut eocd = data.len() - 22;
        loop {
            if read_u32(data, eocd) == END_OF_CENTRAL_DIR_SIG {
                break;
            }
            if eocd == 0 {
                return Err("central directory not found".to_string());
            }
            eocd -= 1;
        }

        let num_entries = read_u16(data, eocd + 10) as usize;
        let cd_offset = read_u32(data, eocd + 16) as usize;

        let mut entries = Vec::with_capacity(num_entries);
        let mut pos = cd_offset;
        for _ in 0..num_entries {
            if pos + 46 > data.len() || read_u32(data, pos) != CENTRAL_DIR_HEADER_SIG {
                break;
            }
            let compression = read_u16(data, pos + 10);
            let compressed_size = read_u32(data, pos + 20);
            let uncompressed_size = read_u32(data, pos + 24);
            let name_len = read_u16(data, pos + 28) as usize;
            let extra_len = read_u16(data, pos + 30) as usize;
            let comment_len = read_u16(data, pos + 32) as usize;
            let local_header_offset = read_u32(data, pos + 42);

            if pos + 46 + name_len > data.len() {
                break;
            }
            entries.push(ArchiveEntry {
                name_range: pos + 46..pos + 46 + name_len,
                compressed_size,
                uncompressed_size,
                local_header_offset,
                compression,
            });
            pos += 46 + name_len + extra_len + comment_len;
        }

        if entries.is_empty() {
            return Err("no entries in central directory".to_string());
        }
        Ok(ZipArchive { data, entries })
    }

    pub(crate) fn extract(&self, name: &str) -> Result<Vec<u8>, String> {
        let entry = self
            .entries
            .iter()
            .find(|e| &self.data[e.name_range.clone()] == name.as_bytes())
            .ok_or_else(|| format!("{} not found in archive", name))?;

        let pos = entry.local_header_offset as usize;
        if pos + 30 > self.data.len() || read_u32(self.data, pos) != LOCAL_FILE_HEADER_SIG {
            return Err(format!("{}: bad local file header", name));
        }
        let name_len = read_u16(self.data, pos + 26) as usize;
        let extra_len = read_u16(self.data, pos + 28) as usize;
        let data_offset = pos + 30 + name_len + extra_len;
        let compressed_len = entry.compressed_size as usize;
        if data_offset + compressed_len > self.data.len() {
            return Err(format!("{}: entry data out of bounds", name));
        }
        let payload = &self.data[data_offset..data_offset + compressed_len];

        match entry.compression {
            0 => Ok(payload.to_vec()),
            8 => {
                let inflated = decompress_to_vec(payload)
                    .map_err(|e| format!("{}: inflate error: {:?}", name, e))?;
                if inflated.len() != entry.uncompressed_size as usize {
                    return Err(format!("{}: inflated size mismatch", name));
                }
                Ok(inflated)
            }
            other => Err(format!("{}: unsupported compression method {}", name, other)),
        }
    }
}
