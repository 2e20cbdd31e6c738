//! Database metadata and the `inf` file.
//!
//! The file holds `key`/`value` token pairs terminated by an empty key,
//! followed by the element-name, attribute-name and namespace blobs.

use crate::header::VERSION;
use crate::names::Names;
use crate::ns::Namespaces;
use crate::num::{NumReader, write_token};
use crate::table::record::MAX_NAME_ID;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Name of the metadata file within a database directory
pub const META_FILE: &str = "inf";

/// Counters and flags describing a database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaData {
    /// Database name
    pub name: String,

    /// Number of table records
    pub size: u32,

    /// Number of document nodes
    pub ndocs: u32,

    /// Deepest element nesting seen; never shrinks
    pub height: u32,

    /// Last assigned node id, or `None` before the first node
    pub last_id: Option<u32>,

    /// Whether the text value index is maintained
    pub text_index: bool,

    /// Whether the attribute value index is maintained
    pub attr_index: bool,

    /// Whether the full-text index is maintained
    pub ft_index: bool,

    /// Whether long texts are compressed
    pub compress: bool,

    /// Document encoding
    pub encoding: String,

    /// The table only holds the empty document left by deleting everything
    pub placeholder: bool,

    /// Unsaved changes exist
    pub dirty: bool,
}

impl MetaData {
    /// Metadata of an empty database.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            size: 0,
            ndocs: 0,
            height: 0,
            last_id: None,
            text_index: false,
            attr_index: false,
            ft_index: false,
            compress: false,
            encoding: "UTF-8".to_string(),
            placeholder: false,
            dirty: false,
        }
    }

    /// Returns the next unused node id.
    pub fn next_id(&self) -> u32 {
        self.last_id.map_or(0, |id| id + 1)
    }

    fn pairs(&self) -> Vec<(&'static str, String)> {
        let flag = |b: bool| String::from(if b { "1" } else { "0" });
        vec![
            ("STORAGE", VERSION.to_string()),
            ("NAME", self.name.clone()),
            ("SIZE", self.size.to_string()),
            ("NDOCS", self.ndocs.to_string()),
            ("HEIGHT", self.height.to_string()),
            ("LASTID", self.last_id.map_or_else(|| "-1".to_string(), |id| id.to_string())),
            ("TEXTINDEX", flag(self.text_index)),
            ("ATTRINDEX", flag(self.attr_index)),
            ("FTINDEX", flag(self.ft_index)),
            ("COMPRESS", flag(self.compress)),
            ("ENCODING", self.encoding.clone()),
            ("PLACEHOLDER", flag(self.placeholder)),
        ]
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let number = || value.parse::<u32>().with_context(|| format!("Bad {key} value '{value}'"));
        match key {
            "STORAGE" => {
                if value != VERSION.to_string() {
                    anyhow::bail!(
                        "Database format {} is incompatible with this build (expected {})",
                        value,
                        VERSION
                    );
                }
            }
            "NAME" => self.name = value.to_string(),
            "SIZE" => self.size = number()?,
            "NDOCS" => self.ndocs = number()?,
            "HEIGHT" => self.height = number()?,
            "LASTID" => self.last_id = if value == "-1" { None } else { Some(number()?) },
            "TEXTINDEX" => self.text_index = value == "1",
            "ATTRINDEX" => self.attr_index = value == "1",
            "FTINDEX" => self.ft_index = value == "1",
            "COMPRESS" => self.compress = value == "1",
            "ENCODING" => self.encoding = value.to_string(),
            "PLACEHOLDER" => self.placeholder = value == "1",
            other => log::warn!("ignoring unknown metadata key {other}"),
        }
        Ok(())
    }

    /// Writes metadata and dictionaries to `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write(&self, dir: &Path, elems: &Names, attrs: &Names, ns: &Namespaces) -> Result<()> {
        let mut out = Vec::new();
        for (key, value) in self.pairs() {
            write_token(&mut out, key.as_bytes());
            write_token(&mut out, value.as_bytes());
        }
        write_token(&mut out, b"");
        elems.write(&mut out);
        attrs.write(&mut out);
        ns.write(&mut out);

        let path = dir.join(META_FILE);
        fs::write(&path, out).with_context(|| format!("Failed to write metadata: {}", path.display()))
    }

    /// Reads metadata and dictionaries from `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or truncated, or if it was
    /// written by an incompatible format version.
    pub fn read(dir: &Path) -> Result<(Self, Names, Names, Namespaces)> {
        let path = dir.join(META_FILE);
        let bytes = fs::read(&path).with_context(|| format!("Failed to read metadata: {}", path.display()))?;
        let mut reader = NumReader::new(&bytes);
        let mut meta = Self::new("");
        let mut versioned = false;
        loop {
            let key = reader.token()?;
            if key.is_empty() {
                break;
            }
            let key = String::from_utf8_lossy(key).into_owned();
            let value = String::from_utf8_lossy(reader.token()?).into_owned();
            versioned |= key == "STORAGE";
            meta.apply(&key, &value)?;
        }
        if !versioned {
            anyhow::bail!("{} is not a valid metadata file", path.display());
        }

        let elems = Names::read(&mut reader, MAX_NAME_ID)?;
        let attrs = Names::read(&mut reader, MAX_NAME_ID)?;
        let ns = Namespaces::read(&mut reader)?;
        Ok((meta, elems, attrs, ns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_next_id() {
        let mut meta = MetaData::new("db");
        assert_eq!(meta.next_id(), 0);
        meta.last_id = Some(41);
        assert_eq!(meta.next_id(), 42);
    }

    #[test]
    fn test_metadata_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut meta = MetaData::new("library");
        meta.size = 12;
        meta.ndocs = 2;
        meta.height = 4;
        meta.last_id = Some(11);
        meta.attr_index = true;
        meta.compress = true;
        meta.placeholder = true;

        let mut elems = Names::new(MAX_NAME_ID);
        elems.index(b"book").unwrap();
        let attrs = Names::new(MAX_NAME_ID);
        let mut ns = Namespaces::new();
        ns.uri_id(b"urn:x").unwrap();

        meta.write(dir.path(), &elems, &attrs, &ns).unwrap();
        let (read, read_elems, read_attrs, read_ns) = MetaData::read(dir.path()).unwrap();
        assert_eq!(read, meta);
        assert_eq!(read_elems, elems);
        assert_eq!(read_attrs, attrs);
        assert_eq!(read_ns, ns);
    }

    #[test]
    fn test_future_format_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut out = Vec::new();
        write_token(&mut out, b"STORAGE");
        write_token(&mut out, (VERSION + 1).to_string().as_bytes());
        write_token(&mut out, b"");
        fs::write(dir.path().join(META_FILE), out).unwrap();

        let err = MetaData::read(dir.path()).unwrap_err();
        assert!(err.to_string().contains("incompatible"));
    }
}
