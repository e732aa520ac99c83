//! Request and response payload validation.
//!
//! A [`Validator`] is either a plain predicate over a JSON value or a [`Schema`]
//! that reports structured [`Issue`]s. Validation is synchronous only.

use crate::{ErrorKind, RequestError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A single problem reported by a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// What is wrong.
    pub message: String,
    /// Path to the offending value, outermost key first. Empty for the root.
    #[serde(default)]
    pub path: Vec<String>,
}

impl Issue {
    /// Creates an issue at the root of the value.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Vec::new(),
        }
    }

    /// Creates an issue at the given path.
    pub fn at(path: impl IntoIterator<Item = impl Into<String>>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: path.into_iter().map(Into::into).collect(),
        }
    }
}

/// A schema that validates a value and explains why it was rejected.
///
/// # Examples
///
/// ```
/// use adapterkit::validate::{Issue, Schema};
/// use serde_json::Value;
///
/// struct NonEmptyArray;
///
/// impl Schema for NonEmptyArray {
///     fn validate(&self, value: &Value) -> Result<(), Vec<Issue>> {
///         match value.as_array() {
///             Some(items) if !items.is_empty() => Ok(()),
///             _ => Err(vec![Issue::new("expected a non-empty array")]),
///         }
///     }
/// }
/// ```
pub trait Schema: Send + Sync {
    /// Validates `value`, returning the issues found when it is rejected.
    fn validate(&self, value: &Value) -> std::result::Result<(), Vec<Issue>>;

    /// Whether this schema needs asynchronous validation.
    ///
    /// Asynchronous schemas are not supported; using one fails the request.
    fn is_async(&self) -> bool {
        false
    }
}

/// Validates request bodies or response payloads.
#[derive(Clone)]
pub enum Validator {
    /// A boolean predicate.
    Predicate(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
    /// A schema reporting structured issues.
    Schema(Arc<dyn Schema>),
}

impl Validator {
    /// Builds a validator from a predicate.
    ///
    /// # Examples
    ///
    /// ```
    /// use adapterkit::Validator;
    ///
    /// let is_list = Validator::predicate(|value| value.is_array());
    /// assert!(is_list.validate(&serde_json::json!(["a"])).is_ok());
    /// ```
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Validator::Predicate(Arc::new(f))
    }

    /// Builds a validator from a schema.
    pub fn schema(schema: impl Schema + 'static) -> Self {
        Validator::Schema(Arc::new(schema))
    }

    /// Builds a schema that accepts any value deserializable into `T`.
    ///
    /// # Examples
    ///
    /// ```
    /// use adapterkit::Validator;
    /// use serde::Deserialize;
    /// use serde_json::json;
    ///
    /// #[derive(Deserialize)]
    /// struct Foo {
    ///     #[allow(dead_code)]
    ///     foo: String,
    /// }
    ///
    /// let validator = Validator::deserializes::<Foo>();
    /// assert!(validator.validate(&json!({ "foo": "foo" })).is_ok());
    /// assert!(validator.validate(&json!({})).is_err());
    /// ```
    pub fn deserializes<T>() -> Self
    where
        T: DeserializeOwned + 'static,
    {
        Validator::schema(DeserializeSchema::<T>(PhantomData))
    }

    /// Runs the validator.
    ///
    /// A rejecting predicate yields an empty issue list.
    pub fn validate(&self, value: &Value) -> std::result::Result<(), Vec<Issue>> {
        match self {
            Validator::Predicate(f) => {
                if f(value) {
                    Ok(())
                } else {
                    Err(Vec::new())
                }
            }
            Validator::Schema(schema) => schema.validate(value),
        }
    }

    /// Runs the validator, producing a `Validation` error with `reason` on rejection.
    pub(crate) fn check(&self, value: &Value, reason: &str) -> Result<()> {
        if let Validator::Schema(schema) = self {
            if schema.is_async() {
                return Err(RequestError::configuration(
                    "Asynchronous validation is not supported.",
                ));
            }
        }

        self.validate(value).map_err(|issues| {
            let error = RequestError::new(ErrorKind::Validation, reason);
            if issues.is_empty() {
                error
            } else {
                error.with_issues(issues)
            }
        })
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validator::Predicate(_) => f.write_str("Validator::Predicate"),
            Validator::Schema(_) => f.write_str("Validator::Schema"),
        }
    }
}

struct DeserializeSchema<T>(PhantomData<fn() -> T>);

impl<T> Schema for DeserializeSchema<T>
where
    T: DeserializeOwned,
{
    fn validate(&self, value: &Value) -> std::result::Result<(), Vec<Issue>> {
        T::deserialize(value)
            .map(|_| ())
            .map_err(|e| vec![Issue::new(e.to_string())])
    }
}
