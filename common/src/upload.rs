use std::collections::HashMap;

use actix_multipart::Multipart;
use futures::TryStreamExt;

use crate::error::{AppError, Res};

/// Largest accepted single file part.
pub const MAX_FILE_BYTES: usize = 25 * 1024 * 1024;

/// A file part received from a multipart form, held in memory until stored.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Text fields and file parts of a multipart form, grouped by field name.
#[derive(Debug, Default)]
pub struct FormData {
    fields: HashMap<String, String>,
    files: HashMap<String, Vec<Upload>>,
}

impl FormData {
    pub async fn read(mut payload: Multipart) -> Res<Self> {
        let mut form = FormData::default();

        while let Some(mut field) = payload
            .try_next()
            .await
            .map_err(|e| AppError::Validation(format!("Malformed multipart body: {}", e)))?
        {
            let (name, filename) = match field.content_disposition() {
                Some(cd) => (
                    cd.get_name().unwrap_or_default().to_string(),
                    cd.get_filename().map(str::to_string),
                ),
                None => continue,
            };

            let mut bytes = Vec::new();
            while let Some(chunk) = field
                .try_next()
                .await
                .map_err(|e| AppError::Validation(format!("Malformed multipart body: {}", e)))?
            {
                if bytes.len() + chunk.len() > MAX_FILE_BYTES {
                    return Err(AppError::Validation(format!(
                        "Field {} exceeds {} bytes",
                        name, MAX_FILE_BYTES
                    )));
                }
                bytes.extend_from_slice(&chunk);
            }

            match filename {
                // empty file inputs are still sent by browsers
                Some(filename) if filename.is_empty() && bytes.is_empty() => {}
                Some(filename) => form
                    .files
                    .entry(name)
                    .or_default()
                    .push(Upload { filename, bytes }),
                None => {
                    let value = String::from_utf8(bytes).map_err(|_| {
                        AppError::Validation(format!("Field {} is not valid UTF-8", name))
                    })?;
                    form.fields.insert(name, value);
                }
            }
        }

        Ok(form)
    }

    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.fields.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_file(mut self, name: &str, upload: Upload) -> Self {
        self.files.entry(name.to_string()).or_default().push(upload);
        self
    }

    /// Trimmed text value, `None` when absent or blank.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn required(&self, name: &str) -> Res<&str> {
        self.text(name)
            .ok_or_else(|| AppError::Validation(format!("{} is required", name)))
    }

    pub fn take_files(&mut self, name: &str) -> Vec<Upload> {
        self.files.remove(name).unwrap_or_default()
    }
}
