//! Error types and result definitions for enrichment jobs.
//!
//! Provides an error system with classification and captured diagnostic metadata for
//! enrichment operations. The [`EnrichError`] type supports single errors, errors with
//! additional detail, and multiple aggregated errors for worker failure scenarios.

use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for enrichment operations using [`EnrichError`] as the error type.
pub type EnrichResult<T> = Result<T, EnrichError>;

/// Detailed payload stored for single [`EnrichError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
}

/// Main error type for enrichment operations.
///
/// [`EnrichError`] can represent a single error, an error with additional detail, or
/// multiple aggregated errors. The design allows rich error information while keeping
/// creation ergonomic via the [`crate::enrich_error!`] and [`crate::bail!`] macros.
#[derive(Debug, Clone)]
pub struct EnrichError {
    repr: ErrorRepr,
}

/// Internal representation of error data.
#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Single error payload holding rich metadata.
    Single(ErrorPayload),
    /// Multiple aggregated errors.
    ///
    /// This variant is mainly useful to capture multiple worker failures.
    Many {
        errors: Vec<EnrichError>,
        location: &'static Location<'static>,
    },
}

/// Specific categories of errors that can occur during an enrichment job.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Invalid configuration, including a malformed update payload.
    ConfigError,
    /// The selection query could not be executed or the target namespace/kind is missing.
    SelectionFailed,
    /// The store could not be reached at all.
    StoreConnectionFailed,
    /// A bulk dispatch call failed at the transport level.
    DispatchFailed,
    /// Wire data could not be serialized or deserialized.
    SerializationError,
    /// An operation was attempted in a state that does not permit it.
    InvalidState,
    /// A worker task panicked.
    WorkerPanic,
    /// Uncategorized failure.
    Unknown,
}

impl EnrichError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the detailed error information if available.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Attaches an originating [`error::Error`] to this error and returns the modified instance.
    ///
    /// Has no effect on aggregated errors because aggregates forward the first contained
    /// error as their source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    /// Creates an [`EnrichError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        EnrichError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
            }),
        }
    }
}

impl PartialEq for EnrichError {
    fn eq(&self, other: &EnrichError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (
                ErrorRepr::Many {
                    errors: errors_a, ..
                },
                ErrorRepr::Many {
                    errors: errors_b, ..
                },
            ) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for EnrichError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write!(f, "\n  Detail: {detail}")?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = format!("{error}");
                    for (i, line) in rendered.lines().enumerate() {
                        if i == 0 {
                            write!(f, "\n  {}. {}", index + 1, line)?;
                        } else {
                            write!(f, "\n     {line}")?;
                        }
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for EnrichError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source as &(dyn error::Error + 'static)),
            // For aggregated errors, we forward the first contained error as the source.
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Creates an [`EnrichError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for EnrichError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> EnrichError {
        EnrichError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates an [`EnrichError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for EnrichError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> EnrichError {
        EnrichError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Creates an [`EnrichError`] from a vector of errors for aggregation.
///
/// If the vector contains exactly one error, returns that error directly without wrapping
/// it in the aggregated variant.
impl<E> From<Vec<E>> for EnrichError
where
    E: Into<EnrichError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> EnrichError {
        let location = Location::caller();

        let mut errors: Vec<EnrichError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1 {
            return errors.pop().expect("just checked length is 1");
        }

        EnrichError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

/// Converts [`serde_json::Error`] to [`EnrichError`] with [`ErrorKind::SerializationError`].
impl From<serde_json::Error> for EnrichError {
    #[track_caller]
    fn from(err: serde_json::Error) -> EnrichError {
        let detail = err.to_string();
        let source = Arc::new(err);
        EnrichError::from_components(
            ErrorKind::SerializationError,
            Cow::Borrowed("JSON conversion failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`reqwest::Error`] to [`EnrichError`].
///
/// Connection-level failures map to [`ErrorKind::StoreConnectionFailed`], everything else
/// to [`ErrorKind::DispatchFailed`] since the request reached the transport layer.
impl From<reqwest::Error> for EnrichError {
    #[track_caller]
    fn from(err: reqwest::Error) -> EnrichError {
        let kind = if err.is_connect() || err.is_timeout() {
            ErrorKind::StoreConnectionFailed
        } else {
            ErrorKind::DispatchFailed
        };

        let detail = err.to_string();
        let source = Arc::new(err);
        EnrichError::from_components(
            kind,
            Cow::Borrowed("HTTP request to the store failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich_error;

    #[test]
    fn single_error_exposes_kind_and_detail() {
        let err = enrich_error!(
            ErrorKind::SelectionFailed,
            "Search failed",
            "index not found"
        );

        assert_eq!(err.kind(), ErrorKind::SelectionFailed);
        assert_eq!(err.detail(), Some("index not found"));
    }

    #[test]
    fn aggregated_errors_flatten_kinds() {
        let errors = vec![
            enrich_error!(ErrorKind::DispatchFailed, "Dispatch failed"),
            enrich_error!(ErrorKind::WorkerPanic, "Worker panicked"),
        ];
        let err: EnrichError = errors.into();

        assert_eq!(err.kind(), ErrorKind::DispatchFailed);
        assert_eq!(
            err.kinds(),
            vec![ErrorKind::DispatchFailed, ErrorKind::WorkerPanic]
        );
    }

    #[test]
    fn single_element_vec_is_unwrapped() {
        let errors = vec![enrich_error!(ErrorKind::ConfigError, "Bad config")];
        let err: EnrichError = errors.into();

        assert_eq!(err.kinds(), vec![ErrorKind::ConfigError]);
    }
}
