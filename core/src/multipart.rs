//! Form body encoding for the upload endpoints.
//!
//! # Design
//! Without any file field the body is a plain url-encoded form. As soon as
//! one file is present the whole form becomes `multipart/form-data`, built
//! byte by byte into a `Vec<u8>` so binary file content is embedded as-is.
//! Scalar parts come first, then file parts, each group in input order.
//! Every line ends in CRLF.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use url::form_urlencoded;
use uuid::Uuid;

use crate::error::Result;
use crate::http::HttpRequest;

pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// An open file to be sent as a form part.
///
/// The handle is rewound and read in place when the form is encoded.
#[derive(Debug)]
pub struct FormFile {
    path: PathBuf,
    file: File,
}

impl FormFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self { path, file })
    }

    pub fn from_file(path: impl Into<PathBuf>, file: File) -> Self {
        Self {
            path: path.into(),
            file,
        }
    }

    /// Last path segment, as announced in the part header.
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn content_type(&self) -> String {
        mime_guess::from_path(self.filename())
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }
}

#[derive(Debug)]
pub enum FormValue {
    Text(String),
    File(FormFile),
}

/// Ordered form fields. Repeated names are kept.
#[derive(Debug, Default)]
pub struct Form {
    fields: Vec<(String, FormValue)>,
}

impl Form {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), FormValue::Text(value.into())));
        self
    }

    pub fn file(mut self, name: impl Into<String>, file: FormFile) -> Self {
        self.fields.push((name.into(), FormValue::File(file)));
        self
    }

    pub fn has_files(&self) -> bool {
        self.fields.iter().any(|(_, v)| matches!(v, FormValue::File(_)))
    }

    /// Scalar fields only, in order. File fields are skipped.
    pub fn text_fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().filter_map(|(k, v)| match v {
            FormValue::Text(t) => Some((k.as_str(), t.as_str())),
            FormValue::File(_) => None,
        })
    }

    /// Encode the form, consuming (reading) every file handle.
    pub fn encode(&mut self) -> Result<EncodedForm> {
        if !self.has_files() {
            let body = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.text_fields())
                .finish();
            return Ok(EncodedForm {
                content_type: None,
                body: body.into_bytes(),
            });
        }
        let boundary = new_boundary();
        let body = encode_multipart(&boundary, &mut self.fields)?;
        Ok(EncodedForm {
            content_type: Some(format!("multipart/form-data; boundary={boundary}")),
            body,
        })
    }

    /// Encode into `request`, replacing its body and content type.
    ///
    /// A url-encoded form only sets the content type when the request has
    /// none yet. No other header is touched.
    pub fn apply(&mut self, request: &mut HttpRequest) -> Result<()> {
        let encoded = self.encode()?;
        match encoded.content_type {
            Some(content_type) => request.set_header("Content-Type", content_type),
            None => {
                if request.header("Content-Type").is_none() {
                    request.set_header("Content-Type", FORM_URLENCODED);
                }
            }
        }
        request.body = Some(encoded.body);
        Ok(())
    }
}

/// Result of encoding a form. `content_type` is `None` for url-encoded bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedForm {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

fn new_boundary() -> String {
    format!("----------{}", Uuid::new_v4().simple())
}

fn encode_multipart(boundary: &str, fields: &mut [(String, FormValue)]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for (key, value) in fields.iter() {
        if let FormValue::Text(text) = value {
            buf.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            buf.extend_from_slice(format!("Content-Disposition: form-data; name=\"{key}\"").as_bytes());
            buf.extend_from_slice(b"\r\n\r\n");
            buf.extend_from_slice(text.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
    }
    for (key, value) in fields.iter_mut() {
        if let FormValue::File(form_file) = value {
            let filename = form_file.filename();
            let content_type = form_file.content_type();
            let size = form_file.file.metadata()?.len();
            buf.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            buf.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{key}\"; filename=\"{filename}\"\r\n").as_bytes(),
            );
            buf.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
            buf.extend_from_slice(format!("Content-Length: {size}\r\n").as_bytes());
            buf.extend_from_slice(b"\r\n");
            form_file.file.seek(SeekFrom::Start(0))?;
            form_file.file.read_to_end(&mut buf)?;
            buf.extend_from_slice(b"\r\n");
        }
    }
    buf.extend_from_slice(format!("--{boundary}--\r\n\r\n").as_bytes());
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str, content: &[u8]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::File::create(&path).unwrap().write_all(content).unwrap();
        (dir, path)
    }

    fn boundary_of(content_type: &str) -> &str {
        content_type.strip_prefix("multipart/form-data; boundary=").unwrap()
    }

    fn count(haystack: &[u8], needle: &[u8]) -> usize {
        haystack.windows(needle.len()).filter(|w| *w == needle).count()
    }

    #[test]
    fn text_only_form_is_url_encoded_in_order() {
        let mut form = Form::new()
            .text("entity_type", "Asset")
            .text("tag", "a b")
            .text("tag", "c&d");
        let encoded = form.encode().unwrap();
        assert_eq!(encoded.content_type, None);
        assert_eq!(encoded.body, b"entity_type=Asset&tag=a+b&tag=c%26d".to_vec());
    }

    #[test]
    fn one_scalar_and_one_file_make_two_parts() {
        let content = b"\x89PNG\r\n\x1a\n\x00\xffbinary";
        let (_dir, path) = temp_file("frame.png", content);
        let mut form = Form::new()
            .text("entity_id", "42")
            .file("file", FormFile::open(&path).unwrap());
        let encoded = form.encode().unwrap();
        let content_type = encoded.content_type.clone().unwrap();
        let boundary = boundary_of(&content_type);
        let body = &encoded.body;

        let delimiter = format!("--{boundary}\r\n");
        assert_eq!(count(body, delimiter.as_bytes()), 2);
        assert!(body.ends_with(format!("--{boundary}--\r\n\r\n").as_bytes()));

        let expected_file_part = [
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"frame.png\"\r\n\
                 Content-Type: image/png\r\nContent-Length: {}\r\n\r\n",
                content.len()
            )
            .into_bytes(),
            content.to_vec(),
            b"\r\n".to_vec(),
        ]
        .concat();
        assert_eq!(count(body, &expected_file_part), 1);

        let expected_text_part =
            format!("--{boundary}\r\nContent-Disposition: form-data; name=\"entity_id\"\r\n\r\n42\r\n");
        assert!(body.starts_with(expected_text_part.as_bytes()));
    }

    #[test]
    fn scalars_precede_files_regardless_of_input_order() {
        let (_dir, path) = temp_file("notes.txt", b"hello");
        let mut form = Form::new()
            .file("file", FormFile::open(&path).unwrap())
            .text("display_name", "Notes");
        let encoded = form.encode().unwrap();
        let body = String::from_utf8(encoded.body).unwrap();
        let text_at = body.find("name=\"display_name\"").unwrap();
        let file_at = body.find("name=\"file\"").unwrap();
        assert!(text_at < file_at);
        assert!(body.contains("Content-Type: text/plain\r\n"));
    }

    #[test]
    fn unknown_extension_falls_back_to_octet_stream() {
        let (_dir, path) = temp_file("capture.zz9", b"x");
        let form_file = FormFile::open(&path).unwrap();
        assert_eq!(form_file.content_type(), "application/octet-stream");
        assert_eq!(form_file.filename(), "capture.zz9");
    }

    #[test]
    fn file_is_read_from_the_start() {
        let (_dir, path) = temp_file("clip.mov", b"0123456789");
        let mut file = File::open(&path).unwrap();
        file.seek(SeekFrom::Start(6)).unwrap();
        let mut form = Form::new().file("file", FormFile::from_file(&path, file));
        let body = form.encode().unwrap().body;
        assert_eq!(count(&body, b"\r\n\r\n0123456789\r\n"), 1);
    }

    #[test]
    fn apply_sets_multipart_content_type_and_keeps_other_headers() {
        let (_dir, path) = temp_file("a.jpg", b"jpeg");
        let mut req = HttpRequest::post("http://localhost/upload/upload_file");
        req.headers.push(("User-Agent".into(), "test".into()));
        req.headers.push(("Content-Type".into(), FORM_URLENCODED.into()));
        Form::new()
            .file("thumb_image", FormFile::open(&path).unwrap())
            .apply(&mut req)
            .unwrap();
        assert!(req.header("content-type").unwrap().starts_with("multipart/form-data; boundary="));
        assert_eq!(req.header("user-agent"), Some("test"));
        assert_eq!(req.headers.len(), 2);
    }

    #[test]
    fn apply_url_encoded_keeps_existing_content_type() {
        let mut req = HttpRequest::post("http://localhost/upload/upload_file");
        Form::new().text("a", "1").apply(&mut req).unwrap();
        assert_eq!(req.header("Content-Type"), Some(FORM_URLENCODED));

        let mut req = HttpRequest::post("http://localhost/upload/upload_file");
        req.set_header("Content-Type", "text/plain");
        Form::new().text("a", "1").apply(&mut req).unwrap();
        assert_eq!(req.header("Content-Type"), Some("text/plain"));
        assert_eq!(req.body.as_deref(), Some(&b"a=1"[..]));
    }

    #[test]
    fn boundaries_differ_between_encodings() {
        assert_ne!(new_boundary(), new_boundary());
    }
}
