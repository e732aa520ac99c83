//! Declarative endpoints.
//!
//! An [`Endpoint`] binds a URL template, a search-parameter contract and
//! per-method validators to an [`Adapter`]. Each call checks the contract locally
//! and then delegates to [`Adapter::request`].

use crate::adapter::Adapter;
use crate::config::{AdapterOptions, RequestConfig};
use crate::response::ResponseEnvelope;
use crate::template::UrlTemplate;
use crate::url_builder::build_url;
use crate::validate::Validator;
use crate::{ErrorKind, RequestError, Result};
use http::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Declaration of an endpoint.
///
/// Search parameter names are required unless they start with `?`.
///
/// # Examples
///
/// ```no_run
/// use adapterkit::{Adapter, EndpointConfig, RequestConfig, Validator};
/// use http::Method;
///
/// # async fn example() -> Result<(), adapterkit::RequestError> {
/// let adapter = Adapter::builder().base_url("https://shop.example.com")?.build()?;
///
/// let products = adapter.endpoint(
///     EndpointConfig::new("/api/product/{id}")
///         .search_params(["lang", "?currency"])
///         .validate(Method::GET, Validator::predicate(|v| v.is_object()))
///         .accepts([Method::GET]),
/// )?;
///
/// let config = RequestConfig::new().with_search_param("lang", "en");
/// let product = products.get(([("id", "42")], config)).await?;
/// println!("{}", product.data);
///
/// let link = products.url([("id", "42")])?;
/// assert_eq!(link.as_str(), "https://shop.example.com/api/product/42");
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct EndpointConfig {
    /// URL template, e.g. `/api/product/{id}`.
    pub url: String,
    /// Declared search parameters, `?`-prefixed when optional.
    pub search_params: Vec<String>,
    /// Response validators per method.
    pub validate: HashMap<Method, Validator>,
    /// Request body validators per method.
    pub validate_request: HashMap<Method, Validator>,
    /// Allowed methods. `None` allows every method.
    pub accepts: Option<Vec<Method>>,
    /// Options for a child adapter dedicated to this endpoint.
    pub options: Option<AdapterOptions>,
}

impl EndpointConfig {
    /// Declares an endpoint at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Declares the search-parameter contract.
    pub fn search_params<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.search_params = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the response validator for `method`.
    pub fn validate(mut self, method: Method, validator: Validator) -> Self {
        self.validate.insert(method, validator);
        self
    }

    /// Sets the request body validator for `method`.
    pub fn validate_request(mut self, method: Method, validator: Validator) -> Self {
        self.validate_request.insert(method, validator);
        self
    }

    /// Restricts the endpoint to `methods`.
    pub fn accepts(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.accepts = Some(methods.into_iter().collect());
        self
    }

    /// Binds the endpoint to `adapter.extend(options)` instead of the adapter itself.
    pub fn options(mut self, options: AdapterOptions) -> Self {
        self.options = Some(options);
        self
    }
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("url", &self.url)
            .field("search_params", &self.search_params)
            .field("validate", &self.validate.keys().collect::<Vec<_>>())
            .field("validate_request", &self.validate_request.keys().collect::<Vec<_>>())
            .field("accepts", &self.accepts)
            .field("options", &self.options)
            .finish()
    }
}

/// Arguments of an endpoint call: URL template parameters and a call config.
///
/// Converts from `()`, a [`RequestConfig`], a parameter map or array, or a
/// `(params, config)` pair.
#[derive(Debug, Clone, Default)]
pub struct EndpointArgs {
    /// Values for the URL template placeholders.
    pub params: Option<HashMap<String, String>>,
    /// The call config.
    pub config: Option<RequestConfig>,
}

impl EndpointArgs {
    /// Empty arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets one URL template parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    /// Sets the call config.
    pub fn config(mut self, config: RequestConfig) -> Self {
        self.config = Some(config);
        self
    }
}

impl From<()> for EndpointArgs {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

impl From<RequestConfig> for EndpointArgs {
    fn from(config: RequestConfig) -> Self {
        Self::new().config(config)
    }
}

impl From<HashMap<String, String>> for EndpointArgs {
    fn from(params: HashMap<String, String>) -> Self {
        Self {
            params: Some(params),
            config: None,
        }
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for EndpointArgs {
    fn from(params: [(K, V); N]) -> Self {
        Self {
            params: Some(params.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
            config: None,
        }
    }
}

impl From<(HashMap<String, String>, RequestConfig)> for EndpointArgs {
    fn from((params, config): (HashMap<String, String>, RequestConfig)) -> Self {
        Self {
            params: Some(params),
            config: Some(config),
        }
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<([(K, V); N], RequestConfig)>
    for EndpointArgs
{
    fn from((params, config): ([(K, V); N], RequestConfig)) -> Self {
        Self {
            config: Some(config),
            ..Self::from(params)
        }
    }
}

#[derive(Debug, Clone)]
struct SearchParamRule {
    name: String,
    required: bool,
}

/// A declared endpoint bound to an adapter.
///
/// Every call is checked in this order: accepted method, URL template,
/// required search parameters, request body. The first violation fails the call
/// without contacting the transport.
#[derive(Clone)]
pub struct Endpoint {
    adapter: Adapter,
    template: UrlTemplate,
    search_params: Vec<SearchParamRule>,
    validate: HashMap<Method, Validator>,
    validate_request: HashMap<Method, Validator>,
    accepts: Option<Vec<Method>>,
}

impl Endpoint {
    /// Compiles `config` into an endpoint bound to `adapter`.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if the URL template is malformed.
    pub fn new(adapter: &Adapter, config: EndpointConfig) -> Result<Self> {
        let template = UrlTemplate::compile(&config.url)?;
        let adapter = match config.options {
            Some(options) => adapter.extend(options),
            None => adapter.clone(),
        };
        let search_params = config
            .search_params
            .iter()
            .map(|name| match name.strip_prefix('?') {
                Some(optional) => SearchParamRule {
                    name: optional.to_string(),
                    required: false,
                },
                None => SearchParamRule {
                    name: name.clone(),
                    required: true,
                },
            })
            .collect();

        Ok(Self {
            adapter,
            template,
            search_params,
            validate: config.validate,
            validate_request: config.validate_request,
            accepts: config.accepts,
        })
    }

    /// The adapter this endpoint delegates to.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// The compiled URL template.
    pub fn template(&self) -> &UrlTemplate {
        &self.template
    }

    /// Sends a GET request.
    pub async fn get(&self, args: impl Into<EndpointArgs>) -> Result<Arc<ResponseEnvelope>> {
        self.call(Method::GET, args.into()).await
    }

    /// Sends an OPTIONS request.
    pub async fn options(&self, args: impl Into<EndpointArgs>) -> Result<Arc<ResponseEnvelope>> {
        self.call(Method::OPTIONS, args.into()).await
    }

    /// Sends a POST request with the call config's body.
    pub async fn post(&self, args: impl Into<EndpointArgs>) -> Result<Arc<ResponseEnvelope>> {
        self.call(Method::POST, args.into()).await
    }

    /// Sends a PUT request with the call config's body.
    pub async fn put(&self, args: impl Into<EndpointArgs>) -> Result<Arc<ResponseEnvelope>> {
        self.call(Method::PUT, args.into()).await
    }

    /// Sends a PATCH request with the call config's body.
    pub async fn patch(&self, args: impl Into<EndpointArgs>) -> Result<Arc<ResponseEnvelope>> {
        self.call(Method::PATCH, args.into()).await
    }

    /// Sends a DELETE request with the call config's body.
    pub async fn delete(&self, args: impl Into<EndpointArgs>) -> Result<Arc<ResponseEnvelope>> {
        self.call(Method::DELETE, args.into()).await
    }

    /// Builds the full URL without sending a request.
    ///
    /// Search parameters from the call config are serialized and the
    /// after-build-url hooks run, but the search-parameter contract is not checked.
    ///
    /// # Errors
    ///
    /// Returns a `Template` error for missing placeholders, or a `Configuration`
    /// error for an invalid URL.
    pub fn url(&self, args: impl Into<EndpointArgs>) -> Result<Url> {
        let args = args.into();
        let path = self.resolve_path(args.params.as_ref())?;
        let config = match &args.config {
            Some(call) => self.adapter.base_config().merge(call),
            None => self.adapter.base_config().clone(),
        };
        build_url(&path, &config, &self.adapter.after_build_url_hooks())
    }

    async fn call(&self, method: Method, args: EndpointArgs) -> Result<Arc<ResponseEnvelope>> {
        match self.prepare(&method, args) {
            Ok((path, config, body)) => self.adapter.request(method, &path, Some(config), body).await,
            Err(error) => Err(self.adapter.handle_error(error).await),
        }
    }

    fn prepare(
        &self,
        method: &Method,
        args: EndpointArgs,
    ) -> Result<(String, RequestConfig, Option<Value>)> {
        let EndpointArgs { params, config } = args;
        let mut config = config.unwrap_or_default();

        if let Some(accepts) = &self.accepts {
            if !accepts.contains(method) {
                return Err(RequestError::new(
                    ErrorKind::NotAccepted,
                    format!("Method {method} is not accepted by this endpoint"),
                )
                .with_context(Some(&config), method, self.template.as_str()));
            }
        }

        let path = self
            .resolve_path(params.as_ref())
            .map_err(|e| e.with_context(Some(&config), method, self.template.as_str()))?;

        self.check_search_params(&config)
            .map_err(|e| e.with_context(Some(&config), method, &path))?;

        let body = if carries_body(method) {
            if let Some(validator) = self.validate_request.get(method) {
                validator
                    .check(config.body.as_ref().unwrap_or(&Value::Null), "Invalid request body")
                    .map_err(|e| e.with_context(Some(&config), method, &path))?;
            }
            config.body.clone()
        } else {
            None
        };

        if let Some(validator) = self.validate.get(method) {
            config.validate = Some(validator.clone());
        }

        Ok((path, config, body))
    }

    fn resolve_path(&self, params: Option<&HashMap<String, String>>) -> Result<String> {
        if self.template.parameters_count() == 0 {
            return match params {
                Some(params) if !params.is_empty() => Err(RequestError::template(format!(
                    "URL template {} takes no parameters",
                    self.template.as_str()
                ))),
                _ => Ok(self.template.as_str().to_string()),
            };
        }
        match params {
            Some(params) => self.template.generate(params),
            None => self.template.generate(&HashMap::new()),
        }
    }

    fn check_search_params(&self, config: &RequestConfig) -> Result<()> {
        let missing = self
            .search_params
            .iter()
            .filter(|rule| rule.required)
            .find(|rule| config.get_search_param(&rule.name).is_none());

        match missing {
            Some(rule) => Err(RequestError::template(format!(
                "Missing a required search param: {}",
                rule.name
            ))),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("template", &self.template.as_str())
            .field("search_params", &self.search_params)
            .field("accepts", &self.accepts)
            .finish_non_exhaustive()
    }
}

/// Methods that send the call config's body.
pub(crate) fn carries_body(method: &Method) -> bool {
    *method == Method::POST
        || *method == Method::PUT
        || *method == Method::PATCH
        || *method == Method::DELETE
}
