//! Request validation. Runs before any database access.

use odk_db::{NewUpload, SubmitOrder};

use crate::api_types::{CreateUploadRequest, SubmitRequest};
use crate::error::{ApiError, FieldErrors};

const MAX_TEXT_LEN: usize = 500;
const MAX_NOTES_LEN: usize = 5000;

fn required(fields: &mut FieldErrors, name: &str, value: &str) {
    if value.trim().is_empty() {
        fields.insert(name.to_string(), "is required".to_string());
    } else if value.len() > MAX_TEXT_LEN {
        fields.insert(name.to_string(), format!("must be at most {MAX_TEXT_LEN} characters"));
    }
}

fn optional(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn is_valid_postal_code(s: &str) -> bool {
    s.len() == 5 && s.bytes().all(|b| b.is_ascii_digit())
}

pub fn is_plausible_email(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !s.contains(char::is_whitespace),
        None => false,
    }
}

/// Check a submission and normalise it into the persisted shape.
pub fn validate_submission(req: &SubmitRequest) -> Result<SubmitOrder, ApiError> {
    let mut fields = FieldErrors::new();

    required(&mut fields, "contactName", &req.contact_name);
    required(&mut fields, "street", &req.street);
    required(&mut fields, "city", &req.city);

    let email = req.email.trim();
    if !is_plausible_email(email) {
        fields.insert("email".to_string(), "must be a valid email address".to_string());
    }

    let postal_code = req.postal_code.trim();
    if !is_valid_postal_code(postal_code) {
        fields.insert("postalCode".to_string(), "must be exactly 5 digits".to_string());
    }

    if req.notes.as_deref().map_or(0, str::len) > MAX_NOTES_LEN {
        fields.insert("notes".to_string(), format!("must be at most {MAX_NOTES_LEN} characters"));
    }

    if !fields.is_empty() {
        return Err(ApiError::Validation { fields });
    }

    Ok(SubmitOrder {
        contact_name: req.contact_name.trim().to_string(),
        email: email.to_string(),
        phone: optional(&req.phone),
        street: req.street.trim().to_string(),
        postal_code: postal_code.to_string(),
        city: req.city.trim().to_string(),
        property_type: optional(&req.property_type),
        notes: optional(&req.notes),
    })
}

pub fn validate_upload(req: &CreateUploadRequest) -> Result<NewUpload, ApiError> {
    let mut fields = FieldErrors::new();
    required(&mut fields, "area", &req.area);
    required(&mut fields, "filePath", &req.file_path);
    required(&mut fields, "mimeType", &req.mime_type);
    if req.file_size < 0 {
        fields.insert("fileSize".to_string(), "must not be negative".to_string());
    }
    if !fields.is_empty() {
        return Err(ApiError::Validation { fields });
    }

    Ok(NewUpload {
        order_id: req.order_id,
        area: req.area.trim().to_string(),
        file_path: req.file_path.trim().to_string(),
        mime_type: req.mime_type.trim().to_string(),
        file_size: req.file_size,
    })
}
