use crate::constants::{
    ACCESS_CHECK_MARKER, DEFAULT_DOCUMENT_EXTENSION, DEFAULT_OUTPUT_PREFIX, PART_FILE_EXTENSION,
};

/// Key conventions shared by every reconciliation pass: where Textract
/// writes output and which keys count as documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    output_prefix: String,
    document_extension: String,
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_PREFIX, DEFAULT_DOCUMENT_EXTENSION)
    }
}

impl OutputLayout {
    pub fn new(output_prefix: impl Into<String>, document_extension: impl Into<String>) -> Self {
        let output_prefix = output_prefix.into().trim_matches('/').to_string();
        debug_assert!(!output_prefix.is_empty());
        Self {
            output_prefix,
            document_extension: document_extension.into(),
        }
    }

    /// Prefix passed to Textract as `OutputConfig.S3Prefix`.
    pub fn output_prefix(&self) -> &str {
        &self.output_prefix
    }

    pub fn document_extension(&self) -> &str {
        &self.document_extension
    }

    pub fn is_document(&self, key: &str) -> bool {
        key.ends_with(&self.document_extension)
    }

    /// Listing prefix holding every part of one job.
    pub fn job_prefix(&self, job_id: &str) -> String {
        format!("{}/{}/", self.output_prefix, job_id)
    }

    /// Job identifier owning an output key, if the key is a real output part.
    pub fn job_id_of<'a>(&self, key: &'a str) -> Option<&'a str> {
        if is_access_check(key) {
            return None;
        }
        let rest = key
            .strip_prefix(self.output_prefix.as_str())?
            .strip_prefix('/')?;
        let (job_id, _) = rest.split_once('/')?;
        if job_id.is_empty() {
            None
        } else {
            Some(job_id)
        }
    }

    /// Flat local filename for a downloaded output part.
    ///
    /// `textract-output/<job>/1` becomes `<job>-1.json`.
    pub fn part_filename(&self, key: &str) -> String {
        let relative = key
            .strip_prefix(self.output_prefix.as_str())
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(key);
        format!("{}{}", relative.replace('/', "-"), PART_FILE_EXTENSION)
    }
}

pub fn is_access_check(key: &str) -> bool {
    key.contains(ACCESS_CHECK_MARKER)
}
