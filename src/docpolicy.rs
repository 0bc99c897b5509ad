use std::path::Path;

/// Upload policy for questionnaire evidence: document and image formats
/// only, capped at 25 MB per file. Both the declared MIME type and the file
/// extension must pass.
pub const MAX_UPLOAD_BYTES: i64 = 25 * 1024 * 1024;

const ALLOWED_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "csv", "png", "jpg", "jpeg", "gif",
];

const ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "text/plain",
    "text/csv",
    "image/png",
    "image/jpeg",
    "image/gif",
];

/// Validates one file of an upload batch. Returns the rejection reason so
/// the caller can build a per-file error map; the whole batch is aborted on
/// the first map entry.
pub fn validate_file(filename: &str, content_type: Option<&str>, size: i64) -> Result<(), String> {
    if size == 0 {
        return Err("file is empty".to_string());
    }
    if size > MAX_UPLOAD_BYTES {
        return Err(format!(
            "file exceeds the {} MB limit",
            MAX_UPLOAD_BYTES / (1024 * 1024)
        ));
    }

    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());
    match extension {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => {}
        Some(ext) => return Err(format!("file extension .{ext} is not allowed")),
        None => return Err("file has no extension".to_string()),
    }

    let mime = match content_type {
        Some(explicit) => explicit.to_lowercase(),
        None => mime_guess::from_path(filename)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string(),
    };
    if !ALLOWED_MIME_TYPES.contains(&mime.as_str()) {
        return Err(format!("content type {mime} is not allowed"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_regular_pdf() {
        assert!(validate_file("report.pdf", Some("application/pdf"), 1024).is_ok());
    }

    #[test]
    fn rejects_oversized_file() {
        let thirty_mb = 30 * 1024 * 1024;
        let err = validate_file("big.pdf", Some("application/pdf"), thirty_mb).unwrap_err();
        assert!(err.contains("25 MB"), "{err}");
    }

    #[test]
    fn rejects_executable_despite_document_mime() {
        let err = validate_file("payload.exe", Some("application/pdf"), 512).unwrap_err();
        assert!(err.contains(".exe"), "{err}");
    }

    #[test]
    fn rejects_disallowed_mime_with_allowed_extension() {
        let err = validate_file("notes.txt", Some("application/x-msdownload"), 512).unwrap_err();
        assert!(err.contains("application/x-msdownload"), "{err}");
    }

    #[test]
    fn rejects_empty_and_extensionless_files() {
        assert!(validate_file("a.pdf", Some("application/pdf"), 0).is_err());
        assert!(validate_file("README", Some("text/plain"), 10).is_err());
    }

    #[test]
    fn guesses_mime_when_not_declared() {
        assert!(validate_file("scan.png", None, 2048).is_ok());
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        assert!(validate_file("REPORT.PDF", Some("application/pdf"), 1024).is_ok());
    }
}
