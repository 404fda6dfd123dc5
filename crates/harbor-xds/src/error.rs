use std::fmt;

use thiserror::Error;

pub type XdsResult<T> = Result<T, XdsError>;

#[derive(Debug, Error)]
pub enum XdsError {
    #[error("field {0} is required")]
    Required(String),

    #[error("invalid {field} '{value}'; supported values: {supported}")]
    Unsupported {
        field: String,
        value: String,
        supported: String,
    },

    #[error("invalid {field}: {reason}")]
    Argument { field: String, reason: String },

    #[error("unknown extension {0:?}")]
    UnknownExtension(String),

    #[error("failed to get HTTP connection manager")]
    MissingHttpConnectionManager,

    #[error("failed to insert {filter:?} filter: failed to find insert location {location} for {target:?}")]
    InsertLocation {
        filter: String,
        location: String,
        target: String,
    },

    #[error("typed config {got:?} is not a {expected}")]
    TypeMismatch { expected: String, got: String },

    #[error("failed to patch {kind} {name:?}: {reason}")]
    Patch {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("{0}")]
    Validation(String),

    #[error("config dump: {0}")]
    ConfigDump(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    List(ErrorList),
}

/// Every error collected while validating or patching, in order.
#[derive(Debug, Default)]
pub struct ErrorList(pub Vec<XdsError>);

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: XdsError) {
        match err {
            XdsError::List(inner) => self.0.extend(inner.0),
            other => self.0.push(other),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &XdsError> {
        self.0.iter()
    }

    /// `Ok` if nothing was collected, the lone error if there is one, a
    /// [`XdsError::List`] otherwise.
    pub fn into_result(mut self) -> XdsResult<()> {
        match self.0.len() {
            0 => Ok(()),
            1 => Err(self.0.remove(0)),
            _ => Err(XdsError::List(self)),
        }
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.0.len())?;
        for err in &self.0 {
            write!(f, "\n\t* {err}")?;
        }
        Ok(())
    }
}

impl From<XdsError> for ErrorList {
    fn from(err: XdsError) -> Self {
        let mut list = ErrorList::new();
        list.push(err);
        list
    }
}

impl IntoIterator for ErrorList {
    type Item = XdsError;
    type IntoIter = std::vec::IntoIter<XdsError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
