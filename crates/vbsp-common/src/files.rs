// files.rs: layered virtual filesystem
//
// Game content is spread across loose directories and pack archives mounted
// in priority order. All lookups go through canonicalized paths: lowercase,
// forward slashes, "./" stripped, ".." resolved, default extension appended.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use flate2::read::DeflateDecoder;
use log::{info, warn};
use thiserror::Error;

/// Zip local-file-header signature ("PK\x03\x04").
const ZPAKHEADER: u32 = 0x504B0304;
/// Zip central-directory signature ("PK\x01\x02"), marks the end of entries.
const ZPAKDIRHEADER: u32 = 0x504B0102;

const COMPRESSION_STORE: u16 = 0;
const COMPRESSION_DEFLATE: u16 = 8;

/// General-purpose flag bit 3: sizes live in a trailing data descriptor,
/// which this sequential reader cannot handle.
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

const MAX_FILES_IN_PACK: usize = 65536;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not a packfile")]
    BadPackHeader(String),
    #[error("{path} entry {entry} uses unsupported compression {method}")]
    UnsupportedCompression {
        path: String,
        entry: String,
        method: u16,
    },
    #[error("{0} has too many files")]
    TooManyFiles(String),
}

// ============================================================
// Pack archives
// ============================================================

/// A file entry within a pack archive.
#[derive(Debug, Clone)]
pub struct PackEntry {
    pub name: String,
    pub data_offset: u64,
    pub compressed_len: u64,
    pub uncompressed_len: u64,
    pub method: u16,
}

/// A mounted pack archive: the parsed directory plus an index for
/// case-insensitive O(1) lookup.
#[derive(Debug)]
pub struct Pack {
    pub filename: String,
    pub entries: Vec<PackEntry>,
    entry_index: HashMap<String, usize>,
}

impl Pack {
    fn new(filename: String, entries: Vec<PackEntry>) -> Self {
        let entry_index = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.to_lowercase(), i))
            .collect();
        Self {
            filename,
            entries,
            entry_index,
        }
    }

    /// Parse a zip-style pack: sequential local file headers terminated by
    /// the central directory. Store and deflate entries are supported.
    pub fn load(packfile: &str) -> Result<Pack, FsError> {
        let io = |source| FsError::Io {
            path: packfile.to_string(),
            source,
        };
        let mut f = File::open(packfile).map_err(io)?;

        let mut entries: Vec<PackEntry> = Vec::new();
        loop {
            if entries.len() > MAX_FILES_IN_PACK {
                return Err(FsError::TooManyFiles(packfile.to_string()));
            }

            let mut hdr = [0u8; 30];
            if f.read_exact(&mut hdr).is_err() {
                break;
            }

            let ident = u32::from_be_bytes([hdr[0], hdr[1], hdr[2], hdr[3]]);
            if ident == ZPAKDIRHEADER {
                break;
            }
            if ident != ZPAKHEADER {
                if entries.is_empty() {
                    return Err(FsError::BadPackHeader(packfile.to_string()));
                }
                break;
            }

            let flags = u16::from_le_bytes([hdr[6], hdr[7]]);
            let method = u16::from_le_bytes([hdr[8], hdr[9]]);
            let compressed_len = u32::from_le_bytes([hdr[18], hdr[19], hdr[20], hdr[21]]) as u64;
            let uncompressed_len = u32::from_le_bytes([hdr[22], hdr[23], hdr[24], hdr[25]]) as u64;
            let filename_length = u16::from_le_bytes([hdr[26], hdr[27]]) as usize;
            let extra_field_length = u16::from_le_bytes([hdr[28], hdr[29]]) as usize;

            let mut name_bytes = vec![0u8; filename_length];
            f.read_exact(&mut name_bytes).map_err(io)?;
            let name = String::from_utf8_lossy(&name_bytes).to_string();

            if flags & FLAG_DATA_DESCRIPTOR != 0
                || (method != COMPRESSION_STORE && method != COMPRESSION_DEFLATE)
            {
                return Err(FsError::UnsupportedCompression {
                    path: packfile.to_string(),
                    entry: name,
                    method,
                });
            }

            let data_offset = f.stream_position().map_err(io)? + extra_field_length as u64;

            // Directory entries carry no data.
            if !name.ends_with('/') {
                entries.push(PackEntry {
                    name,
                    data_offset,
                    compressed_len,
                    uncompressed_len,
                    method,
                });
            }

            f.seek(SeekFrom::Start(data_offset + compressed_len))
                .map_err(io)?;
        }

        info!("Added {} ({} files)", packfile, entries.len());
        Ok(Pack::new(packfile.to_string(), entries))
    }

    /// Find an entry by canonical path (case-insensitive).
    pub fn find_entry(&self, name: &str) -> Option<&PackEntry> {
        self.entry_index
            .get(&name.to_lowercase())
            .map(|&i| &self.entries[i])
    }

    fn read_entry(&self, entry: &PackEntry) -> Option<Vec<u8>> {
        let mut f = match File::open(&self.filename) {
            Ok(f) => f,
            Err(e) => {
                warn!("{}: {}", self.filename, e);
                return None;
            }
        };
        if f.seek(SeekFrom::Start(entry.data_offset)).is_err() {
            return None;
        }

        let mut raw = vec![0u8; entry.compressed_len as usize];
        if f.read_exact(&mut raw).is_err() {
            warn!("{}: short read for {}", self.filename, entry.name);
            return None;
        }

        if entry.method == COMPRESSION_STORE {
            return Some(raw);
        }

        let mut out = Vec::with_capacity(entry.uncompressed_len as usize);
        match DeflateDecoder::new(&raw[..]).read_to_end(&mut out) {
            Ok(_) => Some(out),
            Err(e) => {
                warn!("{}: failed to inflate {}: {}", self.filename, entry.name, e);
                None
            }
        }
    }
}

// ============================================================
// Layered filesystem
// ============================================================

enum Mount {
    Directory(PathBuf),
    Pack(Pack),
}

/// Layered search across mounted directories and pack archives. Mounts
/// registered earlier take priority.
#[derive(Default)]
pub struct FileSystem {
    mounts: Vec<Mount>,
}

impl FileSystem {
    pub fn new() -> Self {
        Self { mounts: Vec::new() }
    }

    pub fn mount_directory(&mut self, dir: impl Into<PathBuf>) {
        self.mounts.push(Mount::Directory(dir.into()));
    }

    pub fn mount_pack(&mut self, packfile: &str) -> Result<(), FsError> {
        let pack = Pack::load(packfile)?;
        self.mounts.push(Mount::Pack(pack));
        Ok(())
    }

    /// Canonicalize a content path: lowercase, forward slashes, "./"
    /// stripped, ".." segments resolved, `ext` appended if missing.
    pub fn resolve_path(&self, path: &str, ext: &str) -> String {
        let mut path = path.to_lowercase().replace('\\', "/").replace("./", "");
        if !path.ends_with(ext) {
            path = format!("{path}{ext}");
        }

        if path.contains("../") {
            let mut parts: Vec<&str> = path.split('/').collect();
            while let Some(idx) = parts.iter().position(|&p| p == "..") {
                // ".." consumes the segment before it; a leading ".." just drops.
                let start = idx.saturating_sub(1);
                parts.drain(start..=idx);
            }
            path = parts.join("/");
        }

        path
    }

    /// Try `path` under each search directory in order, returning the first
    /// resolved path that exists in any mount.
    pub fn search_path(&self, search_dirs: &[&str], path: &str, ext: &str) -> Option<String> {
        for dir in search_dirs {
            let mut dir = dir.replace('\\', "/").replace("//", "/");
            if dir.ends_with('/') {
                dir.pop();
            }

            let final_path = self.resolve_path(&format!("{dir}/{path}"), ext);
            if self.has_entry(&final_path) {
                return Some(final_path);
            }
        }
        None
    }

    pub fn has_entry(&self, resolved_path: &str) -> bool {
        self.mounts.iter().any(|m| match m {
            Mount::Directory(dir) => dir.join(Path::new(resolved_path)).is_file(),
            Mount::Pack(pack) => pack.find_entry(resolved_path).is_some(),
        })
    }

    /// Fetch the contents of a canonical path from the highest-priority
    /// mount that has it. `None` means not found in any mount.
    pub fn fetch(&self, resolved_path: &str) -> Option<Vec<u8>> {
        for mount in &self.mounts {
            match mount {
                Mount::Directory(dir) => {
                    let full = dir.join(Path::new(resolved_path));
                    if full.is_file() {
                        match fs::read(&full) {
                            Ok(data) => return Some(data),
                            Err(e) => {
                                warn!("{}: {}", full.display(), e);
                                return None;
                            }
                        }
                    }
                }
                Mount::Pack(pack) => {
                    if let Some(entry) = pack.find_entry(resolved_path) {
                        return pack.read_entry(entry);
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn write_local_entry(buf: &mut Vec<u8>, name: &str, data: &[u8], deflate: bool) {
        let (payload, method) = if deflate {
            let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
            enc.write_all(data).unwrap();
            (enc.finish().unwrap(), COMPRESSION_DEFLATE)
        } else {
            (data.to_vec(), COMPRESSION_STORE)
        };

        buf.extend_from_slice(&ZPAKHEADER.to_be_bytes());
        buf.extend_from_slice(&20u16.to_le_bytes()); // version
        buf.extend_from_slice(&0u16.to_le_bytes()); // flags
        buf.extend_from_slice(&method.to_le_bytes());
        buf.extend_from_slice(&[0u8; 8]); // mtime/mdate/crc
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // extra
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(&payload);
    }

    fn write_pack(path: &Path, entries: &[(&str, &[u8], bool)]) {
        let mut buf = Vec::new();
        for (name, data, deflate) in entries {
            write_local_entry(&mut buf, name, data, *deflate);
        }
        buf.extend_from_slice(&ZPAKDIRHEADER.to_be_bytes());
        fs::write(path, buf).unwrap();
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = std::env::temp_dir().join(format!("vbsp-fs-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_resolve_path_normalization() {
        let fs = FileSystem::new();
        assert_eq!(
            fs.resolve_path("Materials\\Brick\\WALL01", ".vmt"),
            "materials/brick/wall01.vmt"
        );
        assert_eq!(fs.resolve_path("./skybox/sky_day01", ".vmt"), "skybox/sky_day01.vmt");
        assert_eq!(
            fs.resolve_path("materials/models/../brick/wall01.vmt", ".vmt"),
            "materials/brick/wall01.vmt"
        );
    }

    #[test]
    fn test_pack_store_and_deflate_entries() {
        let dir = temp_dir("pack");
        let pak = dir.join("content.pak");
        write_pack(
            &pak,
            &[
                ("materials/a.vmt", b"stored contents", false),
                ("materials/b.vmt", b"deflated contents deflated contents", true),
            ],
        );

        let pack = Pack::load(pak.to_str().unwrap()).unwrap();
        assert_eq!(pack.entries.len(), 2);

        let a = pack.find_entry("materials/a.vmt").unwrap();
        assert_eq!(pack.read_entry(a).unwrap(), b"stored contents");

        let b = pack.find_entry("MATERIALS/B.VMT").unwrap();
        assert_eq!(
            pack.read_entry(b).unwrap(),
            b"deflated contents deflated contents"
        );
    }

    #[test]
    fn test_pack_rejects_garbage() {
        let dir = temp_dir("garbage");
        let bad = dir.join("bad.pak");
        fs::write(&bad, b"this is not a pack archive, not even close....").unwrap();
        assert!(matches!(
            Pack::load(bad.to_str().unwrap()),
            Err(FsError::BadPackHeader(_))
        ));
    }

    #[test]
    fn test_mount_priority_first_wins() {
        let dir = temp_dir("prio");
        let pak1 = dir.join("high.pak");
        let pak2 = dir.join("low.pak");
        write_pack(&pak1, &[("maps/test.bsp", b"high", false)]);
        write_pack(&pak2, &[("maps/test.bsp", b"low", false), ("maps/only.bsp", b"only", false)]);

        let mut fs = FileSystem::new();
        fs.mount_pack(pak1.to_str().unwrap()).unwrap();
        fs.mount_pack(pak2.to_str().unwrap()).unwrap();

        assert_eq!(fs.fetch("maps/test.bsp").unwrap(), b"high");
        assert_eq!(fs.fetch("maps/only.bsp").unwrap(), b"only");
        assert!(fs.fetch("maps/missing.bsp").is_none());
    }

    #[test]
    fn test_directory_mount_and_search_path() {
        let dir = temp_dir("dirmount");
        fs::create_dir_all(dir.join("materials/brick")).unwrap();
        fs::write(dir.join("materials/brick/wall01.vmt"), b"from disk").unwrap();

        let mut vfs = FileSystem::new();
        vfs.mount_directory(&dir);

        assert!(vfs.has_entry("materials/brick/wall01.vmt"));
        let found = vfs.search_path(&["materials/", "materials/brick"], "wall01", ".vmt");
        assert_eq!(found.as_deref(), Some("materials/brick/wall01.vmt"));
        assert_eq!(vfs.fetch("materials/brick/wall01.vmt").unwrap(), b"from disk");
    }
}
