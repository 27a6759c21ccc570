//! Upload request assembly and response parsing.

use std::path::{Path, PathBuf};

use crate::error::{ApiError, Result};
use crate::http::HttpResponse;
use crate::multipart::{Form, FormFile};
use crate::rpc::Auth;

/// Field name that routes an upload to the thumbnail endpoint.
pub const THUMBNAIL_FIELD: &str = "thumb_image";

pub const UPLOAD_FILE_PATH: &str = "/upload/upload_file";
pub const PUBLISH_THUMBNAIL_PATH: &str = "/upload/publish_thumbnail";

/// A file to attach to an entity. Built per call and consumed by `Shotgun::upload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub entity_type: String,
    pub entity_id: i64,
    pub path: PathBuf,
    /// Target field; `None` uploads an unlinked attachment.
    pub field_name: Option<String>,
    /// Defaults to the file name. Ignored for thumbnails.
    pub display_name: Option<String>,
    /// Comma-separated tags. Ignored for thumbnails.
    pub tag_list: Option<String>,
}

impl UploadRequest {
    pub fn new(entity_type: impl Into<String>, entity_id: i64, path: impl AsRef<Path>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id,
            path: path.as_ref().to_path_buf(),
            field_name: None,
            display_name: None,
            tag_list: None,
        }
    }

    pub fn thumbnail(entity_type: impl Into<String>, entity_id: i64, path: impl AsRef<Path>) -> Self {
        Self::new(entity_type, entity_id, path).field_name(THUMBNAIL_FIELD)
    }

    pub fn field_name(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = Some(field_name.into());
        self
    }

    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn tag_list(mut self, tag_list: impl Into<String>) -> Self {
        self.tag_list = Some(tag_list.into());
        self
    }

    pub fn is_thumbnail(&self) -> bool {
        self.field_name.as_deref() == Some(THUMBNAIL_FIELD)
    }

    pub fn endpoint_path(&self) -> &'static str {
        if self.is_thumbnail() {
            PUBLISH_THUMBNAIL_PATH
        } else {
            UPLOAD_FILE_PATH
        }
    }

    /// Fail unless the path points at an existing regular file.
    pub fn check_path(&self) -> Result<()> {
        if self.path.is_file() {
            Ok(())
        } else {
            Err(ApiError::Validation(format!(
                "Path must be a valid file: {}",
                self.path.display()
            )))
        }
    }

    /// Build the form, opening the file.
    pub fn to_form(&self, auth: &Auth) -> Result<Form> {
        let file = FormFile::open(&self.path)?;
        let form = Form::new()
            .text("entity_type", self.entity_type.as_str())
            .text("entity_id", self.entity_id.to_string())
            .text("script_name", auth.script_name.as_str())
            .text("script_key", auth.script_key.as_str());
        if self.is_thumbnail() {
            return Ok(form.file(THUMBNAIL_FIELD, file));
        }
        let mut form = form;
        if let Some(field_name) = &self.field_name {
            form = form.text("field_name", field_name.as_str());
        }
        let display_name = self.display_name.clone().unwrap_or_else(|| file.filename());
        form = form.text("display_name", display_name);
        if let Some(tag_list) = &self.tag_list {
            form = form.text("tag_list", tag_list.as_str());
        }
        Ok(form.file("file", file))
    }
}

/// Render the scalar form fields for error messages, hiding the script key.
pub fn describe_params(form: &Form) -> String {
    form.text_fields()
        .map(|(k, v)| {
            if k == "script_key" {
                format!("{k}=***")
            } else {
                format!("{k}={v}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Interpret the upload endpoint's answer: `1` or `1:<id>` on success.
///
/// A success without an id yields `0`.
pub fn parse_response(path: &Path, url: &str, params: &str, response: &HttpResponse) -> Result<i64> {
    let body = response.text();
    if response.status == 500 {
        return Err(ApiError::Transport {
            url: url.to_string(),
            message: format!("Server encountered an internal error.\n({params})\n{body}"),
        });
    }
    if !response.is_success() {
        return Err(ApiError::Transport {
            url: url.to_string(),
            message: format!(
                "Unanticipated error occurred uploading {}: HTTP {}",
                path.display(),
                response.status
            ),
        });
    }
    if !body.starts_with('1') {
        return Err(ApiError::UploadFailed {
            path: path.display().to_string(),
            url: url.to_string(),
            response: body,
        });
    }
    match body.split(':').nth(1) {
        None => Ok(0),
        Some(rest) => {
            let id = rest.lines().next().unwrap_or("").trim();
            id.parse()
                .map_err(|_| ApiError::Protocol(format!("upload returned a non-numeric id: {body}")))
        }
    }
}
