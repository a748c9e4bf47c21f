//! Binary shader archive
//!
//! A single file bundling per-pipeline shader payloads for backends that
//! load shaders at runtime instead of compiling the generated header in.
//! Layout: an 8-byte magic, a format-version byte, then a bincode-encoded
//! map keyed by pipeline name. The map is ordered so the same archive
//! contents always serialize to identical bytes.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::bail_archive;
use crate::error::Result;
use log::debug;

const MAGIC: &[u8; 8] = b"shadecar";
const FORMAT_VERSION: u8 = 1;

/// One pipeline's shaders for a specific backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ShaderPayload {
    Glsl { vertex: String, fragment: String },
    Spirv { vertex: Vec<u32>, fragment: Vec<u32> },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    payloads: BTreeMap<String, ShaderPayload>,
}

impl Archive {
    pub fn new() -> Self {
        Archive::default()
    }

    pub fn insert(&mut self, pipeline: &str, payload: ShaderPayload) {
        self.payloads.insert(pipeline.to_string(), payload);
    }

    pub fn get(&self, pipeline: &str) -> Option<&ShaderPayload> {
        self.payloads.get(pipeline)
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &str> {
        self.payloads.keys().map(String::as_str)
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        debug!("archive: writing {} payload(s)", self.payloads.len());
        writer.write_all(MAGIC)?;
        writer.write_all(&[FORMAT_VERSION])?;
        bincode::serialize_into(writer, &self.payloads)?;
        Ok(())
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            bail_archive!("bad magic {:?}, not a shader archive", magic);
        }
        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != FORMAT_VERSION {
            bail_archive!(
                "unsupported archive version {} (expected {})",
                version[0],
                FORMAT_VERSION
            );
        }
        let payloads = bincode::deserialize_from(reader)?;
        Ok(Archive { payloads })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_archive() -> Archive {
        let mut archive = Archive::new();
        archive.insert(
            "tri",
            ShaderPayload::Glsl {
                vertex: "#version 450\nvoid main() {}\n".to_string(),
                fragment: "#version 450\nvoid main() {}\n".to_string(),
            },
        );
        archive.insert(
            "quads",
            ShaderPayload::Spirv {
                vertex: vec![0x0723_0203],
                fragment: vec![0x0723_0203, 1, 2, 3],
            },
        );
        archive
    }

    #[test]
    fn test_write_then_read() {
        let archive = sample_archive();
        let mut bytes = Vec::new();
        archive.write_to(&mut bytes).unwrap();
        assert_eq!(&bytes[..8], b"shadecar");
        assert_eq!(bytes[8], 1);
        let read = Archive::read_from(bytes.as_slice()).unwrap();
        assert_eq!(read, archive);
        assert_eq!(read.pipelines().collect::<Vec<_>>(), ["quads", "tri"]);
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let archive = sample_archive();
        let mut first = Vec::new();
        let mut second = Vec::new();
        archive.write_to(&mut first).unwrap();
        archive.write_to(&mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let err = Archive::read_from(&b"notashdr\x01"[..]).unwrap_err();
        assert!(matches!(
            err,
            crate::error::CompilerError::ArchiveFormatError(_)
        ));
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let mut bytes = Vec::new();
        sample_archive().write_to(&mut bytes).unwrap();
        bytes[8] = 99;
        let err = Archive::read_from(bytes.as_slice()).unwrap_err();
        assert!(matches!(
            err,
            crate::error::CompilerError::ArchiveFormatError(_)
        ));
    }

    #[test]
    fn test_truncated_archive_is_an_error() {
        let mut bytes = Vec::new();
        sample_archive().write_to(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 4);
        assert!(Archive::read_from(bytes.as_slice()).is_err());
    }
}
