//! Cross-cutting application constants.

/// Suffix appended to a document key to form its job marker key.
pub const MARKER_SUFFIX: &str = ".s3-ocr.json";

/// Default key prefix Textract writes job output under.
pub const DEFAULT_OUTPUT_PREFIX: &str = "textract-output";

/// Default extension identifying documents eligible for OCR.
pub const DEFAULT_DOCUMENT_EXTENSION: &str = ".pdf";

/// Key segment Textract uses for its bucket write-permission check objects.
pub const ACCESS_CHECK_MARKER: &str = ".s3_access_check";

/// Extension given to downloaded output parts.
pub const PART_FILE_EXTENSION: &str = ".json";

/// Default number of rate-limit retries for a single submission.
pub const DEFAULT_SUBMIT_RETRIES: u32 = 3;
