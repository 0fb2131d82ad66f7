//! Multipart form bodies for upload operations.
//!
//! A [`MultipartForm`] is a pure description: named parts with optional file
//! names and content types. The wire encoding (RFC 2046 `multipart/form-data`)
//! is produced once, at send time, by [`MultipartForm::encode`].

use bytes::{Bytes, BytesMut};
use uuid::Uuid;

/// One part of a multipart body.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// An ordered collection of parts with a fixed, unique boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct MultipartForm {
    boundary: String,
    parts: Vec<Part>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self {
            boundary: format!("requestbox-{}", Uuid::new_v4().simple()),
            parts: Vec::new(),
        }
    }

    /// Appends a UTF-8 text field.
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(Part {
            name: name.into(),
            filename: None,
            content_type: None,
            data: Bytes::from(value.into().into_bytes()),
        });
        self
    }

    /// Appends a binary field with a file name, defaulting the content type to
    /// `application/octet-stream`.
    pub fn bytes(
        mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        self.parts.push(Part {
            name: name.into(),
            filename: Some(filename.into()),
            content_type: Some(mime::APPLICATION_OCTET_STREAM.to_string()),
            data: data.into(),
        });
        self
    }

    /// Appends a fully specified part.
    pub fn part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Value for the request's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("{}; boundary={}", mime::MULTIPART_FORM_DATA, self.boundary)
    }

    /// Encodes the form into its wire representation.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        for part in &self.parts {
            buf.extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());

            let mut disposition =
                format!("Content-Disposition: form-data; name=\"{}\"", part.name);
            if let Some(filename) = &part.filename {
                disposition.push_str(&format!("; filename=\"{}\"", filename));
            }
            buf.extend_from_slice(disposition.as_bytes());
            buf.extend_from_slice(b"\r\n");

            if let Some(content_type) = &part.content_type {
                buf.extend_from_slice(format!("Content-Type: {}\r\n", content_type).as_bytes());
            }

            buf.extend_from_slice(b"\r\n");
            buf.extend_from_slice(&part.data);
            buf.extend_from_slice(b"\r\n");
        }

        buf.extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        buf.freeze()
    }
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}
