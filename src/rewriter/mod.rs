//! Extracts a downloaded module tarball, rewrites nested remote module
//! source addresses to point at this mirror, and re-archives
//! deterministically so that repeated rewrites are byte-identical.

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use tar::Archive;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("archive entry escapes the extraction root: {0}")]
    PathTraversal(String),

    #[error("failed to read archive: {0}")]
    Archive(String),

    #[error("failed to parse configuration file {0}: {1}")]
    HclParse(String, String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RewriteError>;

/// Deterministic archive timestamp: 1980-01-01, the earliest date the ZIP
/// format can represent, matching the convention used elsewhere in this
/// codebase for reproducible archives.
fn canonical_timestamp() -> zip::DateTime {
    zip::DateTime::from_date_and_time(1980, 1, 1, 0, 0, 0).expect("valid date")
}

fn is_safe_entry(path: &std::path::Path) -> bool {
    use std::path::Component;
    !path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
}

/// Extract a gzipped tarball into an in-memory map of relative path to
/// file bytes, rejecting any entry that would escape the root.
pub fn extract_tar_gz(bytes: &[u8]) -> Result<BTreeMap<String, Vec<u8>>> {
    let decoder = GzDecoder::new(Cursor::new(bytes));
    let mut archive = Archive::new(decoder);
    let mut files = BTreeMap::new();

    for entry in archive.entries().map_err(|e| RewriteError::Archive(e.to_string()))? {
        let mut entry = entry.map_err(|e| RewriteError::Archive(e.to_string()))?;
        let path = entry.path().map_err(|e| RewriteError::Archive(e.to_string()))?.into_owned();

        if !is_safe_entry(&path) {
            return Err(RewriteError::PathTraversal(path.display().to_string()));
        }
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;
        files.insert(path.to_string_lossy().to_string(), content);
    }

    Ok(files)
}

/// Rewrite every nested `module "..." { source = "..." }` block's source
/// attribute found in a `.tf` file's contents:
/// - relative sources (`./`, `../`) are left untouched;
/// - sources already prefixed with `mirror_host` are left untouched;
/// - everything else becomes `{mirror_host}/{original_source}`.
pub fn rewrite_module_sources(contents: &str, mirror_host: &str) -> Result<String> {
    let body: hcl::Body = hcl::from_str(contents).map_err(|e| RewriteError::HclParse("<module>".into(), e.to_string()))?;

    let mut rewritten = String::new();
    let mut cursor = 0usize;

    for block in body.blocks().filter(|b| b.identifier() == "module") {
        let Some(source_attr) = block.body.attributes().find(|a| a.key() == "source") else {
            continue;
        };
        let Some(source) = source_attr.expr().as_str() else {
            continue;
        };

        if source.starts_with("./") || source.starts_with("../") || source.starts_with(mirror_host) {
            continue;
        }

        let needle = format!("\"{source}\"");
        if let Some(pos) = contents[cursor..].find(&needle) {
            let abs_pos = cursor + pos;
            rewritten.push_str(&contents[cursor..abs_pos]);
            rewritten.push_str(&format!("\"{mirror_host}/{source}\""));
            cursor = abs_pos + needle.len();
        }
    }

    rewritten.push_str(&contents[cursor..]);
    Ok(rewritten)
}

/// Rewrite every `.tf` file in `files`, re-archive deterministically
/// (sorted entries, fixed timestamps, fixed compression), and return the
/// new archive bytes with their hex digest.
pub fn rewrite_and_repack(files: &BTreeMap<String, Vec<u8>>, mirror_host: &str) -> Result<(Vec<u8>, String)> {
    let mut rewritten: BTreeMap<String, Vec<u8>> = BTreeMap::new();

    for (path, content) in files {
        if path.ends_with(".tf") {
            let text = String::from_utf8_lossy(content);
            let new_text = rewrite_module_sources(&text, mirror_host)?;
            rewritten.insert(path.clone(), new_text.into_bytes());
        } else {
            rewritten.insert(path.clone(), content.clone());
        }
    }

    let mut archive_bytes = Vec::new();
    {
        let mut zip = ZipWriter::new(Cursor::new(&mut archive_bytes));
        let options = SimpleFileOptions::default()
            .last_modified_time(canonical_timestamp())
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(0o644);

        for (path, content) in &rewritten {
            zip.start_file(path, options)?;
            zip.write_all(content)?;
        }
        zip.finish()?;
    }

    let digest = hex::encode(Sha256::digest(&archive_bytes));
    Ok((archive_bytes, digest))
}

/// Full pipeline: extract, rewrite nested module sources, repack
/// deterministically. `ModuleRewriter` is a fixed point on already
/// rewritten inputs because rewriting is idempotent on sources that
/// already carry the mirror host prefix.
pub struct ModuleRewriter {
    mirror_host: String,
}

impl ModuleRewriter {
    pub fn new(mirror_host: impl Into<String>) -> Self {
        Self { mirror_host: mirror_host.into() }
    }

    pub fn rewrite(&self, tar_gz_bytes: &[u8]) -> Result<(Vec<u8>, String)> {
        let files = extract_tar_gz(tar_gz_bytes)?;
        rewrite_and_repack(&files, &self.mirror_host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn make_tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
        let mut tar_bytes = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut tar_bytes);
            for (name, content) in files {
                let mut header = tar::Header::new_gnu();
                header.set_size(content.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append_data(&mut header, name, content.as_bytes()).unwrap();
            }
            builder.finish().unwrap();
        }
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&tar_bytes).unwrap();
        gz.finish().unwrap()
    }

    #[test]
    fn test_rewrites_remote_source_preserving_local() {
        let tf = r#"
module "x" {
  source = "other/bar/aws"
}

module "y" {
  source = "./local"
}
"#;
        let rewritten = rewrite_module_sources(tf, "mirror.local").unwrap();
        assert!(rewritten.contains("source = \"mirror.local/other/bar/aws\""));
        assert!(rewritten.contains("source = \"./local\""));
    }

    #[test]
    fn test_already_prefixed_source_untouched() {
        let tf = r#"
module "x" {
  source = "mirror.local/other/bar/aws"
}
"#;
        let rewritten = rewrite_module_sources(tf, "mirror.local").unwrap();
        assert_eq!(rewritten.matches("mirror.local/other/bar/aws").count(), 1);
    }

    #[test]
    fn test_path_traversal_entries_rejected() {
        let archive = make_tar_gz(&[("../escape.tf", "x")]);
        let err = extract_tar_gz(&archive).unwrap_err();
        assert!(matches!(err, RewriteError::PathTraversal(_)));
    }

    #[test]
    fn test_rewrite_is_deterministic() {
        let archive = make_tar_gz(&[("main.tf", "module \"x\" {\n  source = \"other/bar/aws\"\n}\n")]);
        let rewriter = ModuleRewriter::new("mirror.local");
        let (bytes1, digest1) = rewriter.rewrite(&archive).unwrap();
        let (bytes2, digest2) = rewriter.rewrite(&archive).unwrap();
        assert_eq!(bytes1, bytes2);
        assert_eq!(digest1, digest2);
    }

    #[test]
    fn test_rewrite_is_fixed_point_on_already_rewritten_input() {
        let files: BTreeMap<String, Vec<u8>> = [(
            "main.tf".to_string(),
            b"module \"x\" {\n  source = \"mirror.local/other/bar/aws\"\n}\n".to_vec(),
        )]
        .into_iter()
        .collect();

        let (first, _) = rewrite_and_repack(&files, "mirror.local").unwrap();
        let refiles = extract_tar_gz_from_zip(&first);
        let (second, _) = rewrite_and_repack(&refiles, "mirror.local").unwrap();
        assert_eq!(first, second);
    }

    /// Test helper: read a zip archive back into the same map shape
    /// `rewrite_and_repack` consumes, so the fixed-point test can feed a
    /// rewritten archive back through the pipeline.
    fn extract_tar_gz_from_zip(bytes: &[u8]) -> BTreeMap<String, Vec<u8>> {
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut out = BTreeMap::new();
        for i in 0..zip.len() {
            let mut file = zip.by_index(i).unwrap();
            let mut content = Vec::new();
            file.read_to_end(&mut content).unwrap();
            out.insert(file.name().to_string(), content);
        }
        out
    }
}
