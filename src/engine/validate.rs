use crate::engine::QueryError;
use crate::model::{QueryConfig, MAX_IMAGE_BYTES, MAX_QUESTION_CHARS};
use std::path::Path;

/// Everything needed to build the multipart request once the inputs pass.
#[derive(Debug, Clone)]
pub(crate) struct RequestPlan {
    pub question: String,
    pub file_name: String,
    pub mime: String,
}

pub(crate) const MISSING_INPUTS_MSG: &str = "Please provide both an image and a question.";
pub(crate) const NOT_AN_IMAGE_MSG: &str = "Please select an image file";
pub(crate) const IMAGE_TOO_LARGE_MSG: &str = "Image size should be less than 10MB";

/// Validate both inputs and produce the request plan. Runs before any stage
/// event or network call; a failure here must leave no side effects.
pub(crate) fn check_request(cfg: &QueryConfig) -> Result<RequestPlan, QueryError> {
    let question = check_question(&cfg.question)?;
    let (file_name, mime, _size) = check_image(&cfg.image_path)?;
    Ok(RequestPlan {
        question,
        file_name,
        mime,
    })
}

pub(crate) fn check_question(question: &str) -> Result<String, QueryError> {
    if question.trim().is_empty() {
        return Err(QueryError::Validation(MISSING_INPUTS_MSG.to_string()));
    }
    if question.chars().count() > MAX_QUESTION_CHARS {
        return Err(QueryError::Validation(format!(
            "Question is too long (limit {MAX_QUESTION_CHARS} characters)"
        )));
    }
    Ok(question.to_string())
}

/// Check the image path and return (file name, MIME type, size in bytes).
pub(crate) fn check_image(path: &Path) -> Result<(String, String, u64), QueryError> {
    if path.as_os_str().is_empty() {
        return Err(QueryError::Validation(MISSING_INPUTS_MSG.to_string()));
    }
    let meta = std::fs::metadata(path).map_err(|_| {
        QueryError::Validation(format!("Image file not found: {}", path.display()))
    })?;
    if !meta.is_file() {
        return Err(QueryError::Validation(format!(
            "Not a regular file: {}",
            path.display()
        )));
    }

    let mime = mime_guess::from_path(path).first();
    let mime = match mime {
        Some(m) if m.type_() == mime_guess::mime::IMAGE => m.essence_str().to_string(),
        _ => return Err(QueryError::Validation(NOT_AN_IMAGE_MSG.to_string())),
    };

    if meta.len() > MAX_IMAGE_BYTES {
        return Err(QueryError::Validation(IMAGE_TOO_LARGE_MSG.to_string()));
    }

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image")
        .to_string();
    Ok((file_name, mime, meta.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_file(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("avqa-validate-{}-{name}", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn blank_question_is_rejected() {
        let err = check_question("   \n ").unwrap_err();
        assert_eq!(err.to_string(), MISSING_INPUTS_MSG);
    }

    #[test]
    fn question_over_cap_is_rejected() {
        let long = "x".repeat(MAX_QUESTION_CHARS + 1);
        assert!(check_question(&long).is_err());
        let at_cap = "x".repeat(MAX_QUESTION_CHARS);
        assert_eq!(check_question(&at_cap).unwrap(), at_cap);
    }

    #[test]
    fn missing_image_path_is_rejected() {
        let err = check_image(Path::new("")).unwrap_err();
        assert_eq!(err.to_string(), MISSING_INPUTS_MSG);
        assert!(check_image(Path::new("/no/such/file.png")).is_err());
    }

    #[test]
    fn non_image_extension_is_rejected() {
        let path = temp_file("notes.txt", b"hello");
        let err = check_image(&path).unwrap_err();
        assert_eq!(err.to_string(), NOT_AN_IMAGE_MSG);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn oversized_image_is_rejected() {
        let big = vec![0u8; (MAX_IMAGE_BYTES + 1) as usize];
        let path = temp_file("big.png", &big);
        let err = check_image(&path).unwrap_err();
        assert_eq!(err.to_string(), IMAGE_TOO_LARGE_MSG);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn valid_image_produces_plan_fields() {
        let path = temp_file("photo.jpg", b"\xff\xd8\xff\xe0fake");
        let (name, mime, size) = check_image(&path).unwrap();
        assert!(name.ends_with("photo.jpg"));
        assert_eq!(mime, "image/jpeg");
        assert_eq!(size, 8);
        std::fs::remove_file(path).ok();
    }
}
