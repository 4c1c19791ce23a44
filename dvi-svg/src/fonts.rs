//! Locating font metrics by name.
//!
//! The machines never read TFM bytes themselves; they ask a [`FontProvider`] for a parsed
//! table when a font is defined. [`FontDataHelper`] is the provider used by the driver. It
//! holds raw `.tfm` files in memory (usually extracted from a `.tar.gz` bundle) and parses
//! each one on first use. Fonts it has no file for can come from the metrics of the
//! standard TeX fonts built into `dvi2html`.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};

use dvi2html::tfm;
use flate2::read::GzDecoder;
use log::{debug, info};
use tar::Archive;

use crate::error::TfmError;
use crate::tfm::{FIX_WORD_UNIT, TfmChar, TfmMetrics};

/// Source of font metric tables, keyed by TeX font name (e.g. `cmr10`).
pub trait FontProvider {
    fn load_font(&self, name: &str) -> Result<Arc<TfmMetrics>, TfmError>;
}

/// Already parsed tables, mostly useful for tests and for embedding a handful of fonts.
impl FontProvider for HashMap<String, Arc<TfmMetrics>> {
    fn load_font(&self, name: &str) -> Result<Arc<TfmMetrics>, TfmError> {
        self.get(name)
            .cloned()
            .ok_or_else(|| TfmError::NotFound(name.to_string()))
    }
}

/// An in-memory collection of `.tfm` files with a cache of the parsed tables.
///
/// Parsed tables are shared, so one helper can serve any number of conversions.
#[derive(Debug, Default)]
pub struct FontDataHelper {
    /// Raw TFM bytes keyed by font name without the `.tfm` extension.
    files: HashMap<String, Vec<u8>>,
    parsed: Mutex<HashMap<String, Arc<TfmMetrics>>>,
    builtin: Option<tfm::FontDataHelper>,
}

impl FontDataHelper {
    /// Create a helper from raw `.tfm` files keyed by file name. Entries that do not end in
    /// `.tfm` are ignored and directories are stripped from the names.
    pub fn new(files: HashMap<String, Vec<u8>>) -> Self {
        let files = files
            .into_iter()
            .filter_map(|(path, data)| {
                let file_name = path.rsplit('/').next().unwrap_or(&path);
                let name = file_name.strip_suffix(".tfm")?;
                Some((name.to_string(), data))
            })
            .collect();
        Self {
            files,
            parsed: Mutex::new(HashMap::new()),
            builtin: None,
        }
    }

    /// Only the built-in metrics of the standard TeX fonts.
    pub fn builtin() -> Result<Self, TfmError> {
        Self::default().with_builtin()
    }

    /// Fall back to the built-in metrics for fonts without a `.tfm` file.
    pub fn with_builtin(mut self) -> Result<Self, TfmError> {
        let builtin = tfm::FontDataHelper::init().map_err(|e| TfmError::Builtin(e.to_string()))?;
        debug!("{} built-in font metric tables", builtin.get_data().len());
        self.builtin = Some(builtin);
        Ok(self)
    }

    /// Load every `.tfm` file contained in a gzip compressed tar archive.
    pub fn from_tar_gz(bytes: &[u8]) -> Result<Self, TfmError> {
        let files = extract_tar_gz_to_memory(bytes)?;
        let helper = Self::new(files);
        info!("loaded {} font metric files from bundle", helper.len());
        Ok(helper)
    }

    /// Load every `.tfm` file found directly inside `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self, TfmError> {
        let mut files = HashMap::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "tfm") {
                let file_name = path.file_name().unwrap_or_default().to_string_lossy();
                files.insert(file_name.into_owned(), std::fs::read(&path)?);
            }
        }
        let helper = Self::new(files);
        info!(
            "loaded {} font metric files from {}",
            helper.len(),
            dir.display()
        );
        Ok(helper)
    }

    /// Number of font files available.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FontProvider for FontDataHelper {
    fn load_font(&self, name: &str) -> Result<Arc<TfmMetrics>, TfmError> {
        let mut parsed = self.parsed.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(metrics) = parsed.get(name) {
            return Ok(Arc::clone(metrics));
        }
        let metrics = match self.files.get(name) {
            Some(data) => Arc::new(TfmMetrics::parse(name, data)?),
            None => {
                let data = self
                    .builtin
                    .as_ref()
                    .and_then(|builtin| builtin.get(name.to_string()))
                    .ok_or_else(|| TfmError::NotFound(name.to_string()))?;
                Arc::new(builtin_metrics(name, data))
            }
        };
        debug!(
            "parsed metrics for {name}: {} characters",
            metrics.characters.len()
        );
        parsed.insert(name.to_string(), Arc::clone(&metrics));
        Ok(metrics)
    }
}

/// Widths, heights and depths from `dvi2html`'s tables, which keep them as `fix_word`s like
/// a TFM file does.
fn builtin_metrics(name: &str, data: &tfm::FontData) -> TfmMetrics {
    let mut metrics = TfmMetrics::new(name, data.design_size as f64 / FIX_WORD_UNIT);
    for (&code, ch) in &data.characters {
        metrics.insert_char(TfmChar::new(
            code,
            ch.width as i32,
            ch.height as i32,
            ch.depth as i32,
        ));
    }
    metrics
}

fn extract_tar_gz_to_memory(bytes: &[u8]) -> Result<HashMap<String, Vec<u8>>, TfmError> {
    // Create a GzDecoder to decompress the .tar.gz file
    let gz_decoder = GzDecoder::new(bytes);

    // Create a tar archive from the decompressed data
    let mut archive = Archive::new(gz_decoder);

    let mut extracted_files = HashMap::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let mut file_data = Vec::new();
        entry.read_to_end(&mut file_data)?;
        let file_name = entry.path()?.to_string_lossy().into_owned();
        // Trim off a leading "./"
        let file_name = file_name.trim_start_matches("./");
        if file_name.is_empty() {
            continue;
        }
        extracted_files.insert(file_name.to_string(), file_data);
    }

    Ok(extracted_files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tfm::tests::synthetic_tfm;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    fn bundle(files: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, &data[..]).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn loads_fonts_from_bundle() {
        let bytes = bundle(&[
            ("fonts/cmr10.tfm", synthetic_tfm(0, 127, 1 << 19, 1 << 19, 0)),
            ("README", b"not a font".to_vec()),
        ]);
        let helper = FontDataHelper::from_tar_gz(&bytes).unwrap();
        assert_eq!(helper.len(), 1);

        let first = helper.load_font("cmr10").unwrap();
        let second = helper.load_font("cmr10").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.characters.len(), 128);
    }

    #[test]
    fn builtin_metrics_cover_computer_modern() {
        let helper = FontDataHelper::builtin().unwrap();
        assert!(helper.is_empty());
        let cmr10 = helper.load_font("cmr10").unwrap();
        assert!((cmr10.design_size_pt() - 10.0).abs() < 1e-6);
        let a = cmr10.get_char(b'a' as u32).unwrap();
        assert!(a.width > 0 && a.height > 0);
        assert!(helper.load_font("nosuchfont").is_err());
    }

    #[test]
    fn bundle_files_take_precedence_over_builtin() {
        let bytes = bundle(&[("cmr10.tfm", synthetic_tfm(0, 127, 1 << 19, 1 << 19, 0))]);
        let helper = FontDataHelper::from_tar_gz(&bytes)
            .unwrap()
            .with_builtin()
            .unwrap();
        let cmr10 = helper.load_font("cmr10").unwrap();
        assert_eq!(cmr10.get_char(b'a' as u32).unwrap().width, 1 << 19);
        assert!(helper.load_font("cmbx10").is_ok());
    }

    #[test]
    fn missing_font_is_reported() {
        let helper = FontDataHelper::default();
        assert!(matches!(
            helper.load_font("cmbx12"),
            Err(TfmError::NotFound(name)) if name == "cmbx12"
        ));
    }
}
