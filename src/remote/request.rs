use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::fmt;

/// Per-request knobs shared by every verb.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub params: Vec<(String, String)>,
    /// JSON body. For uploads, scalar fields of an object become text parts.
    pub data: Option<Value>,
    pub headers: Vec<(String, String)>,
    pub requires_auth: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            params: Vec::new(),
            data: None,
            headers: Vec::new(),
            requires_auth: true,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    pub fn json(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Skip the bearer token.
    pub fn public(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    pub(crate) fn apply_meta(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if !self.params.is_empty() {
            req = req.query(&self.params);
        }
        for (name, value) in &self.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        req
    }

    pub(crate) fn apply(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let req = self.apply_meta(req);
        match &self.data {
            Some(data) => req.json(data),
            None => req,
        }
    }
}

#[derive(Clone)]
pub struct UploadFile {
    pub field: String,
    pub file_name: String,
    pub mime: Option<String>,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadFile")
            .field("field", &self.field)
            .field("file_name", &self.file_name)
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A multipart form, kept as plain data until send time.
#[derive(Debug, Clone, Default)]
pub struct UploadForm {
    fields: Vec<(String, String)>,
    files: Vec<UploadFile>,
}

impl UploadForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn file(
        mut self,
        field: impl Into<String>,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        self.files.push(UploadFile {
            field: field.into(),
            file_name: file_name.into(),
            mime: None,
            bytes,
        });
        self
    }

    pub fn file_with_mime(
        mut self,
        field: impl Into<String>,
        file_name: impl Into<String>,
        mime: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        self.files.push(UploadFile {
            field: field.into(),
            file_name: file_name.into(),
            mime: Some(mime.into()),
            bytes,
        });
        self
    }

    /// Fold the scalar fields of a JSON object into text parts.
    pub(crate) fn with_data(mut self, data: Option<&Value>) -> Self {
        let Some(Value::Object(map)) = data else {
            return self;
        };
        for (name, value) in map {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Bool(_) | Value::Number(_) => value.to_string(),
                Value::Null | Value::Array(_) | Value::Object(_) => continue,
            };
            self.fields.push((name.clone(), text));
        }
        self
    }

    pub(crate) fn into_multipart(self) -> reqwest::Result<Form> {
        let mut form = Form::new();
        for (name, value) in self.fields {
            form = form.text(name, value);
        }
        for file in self.files {
            let mut part = Part::bytes(file.bytes).file_name(file.file_name);
            if let Some(mime) = file.mime {
                part = part.mime_str(&mime)?;
            }
            form = form.part(file.field, part);
        }
        Ok(form)
    }
}
