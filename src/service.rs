use std::{
    sync::Arc,
    task::{Context, Poll},
};

use futures_util::future::{Either, Ready, ready};
use http::{Request, Response};
use tower::{Layer, Service};

use crate::{Error, InterceptedRequest, ShimConfig, ShimGenerator, ShimResponse};

/// A [`Layer`] answering `.wasm` script requests with a loader shim.
///
/// # Examples
///
/// ```rust
/// # use std::convert::Infallible;
/// # use http::{Request, Response};
/// # use script_wasm::WasmScriptLayer;
/// use tower::{Layer, service_fn};
///
/// let static_files = service_fn(|_req: Request<String>| async {
///     Ok::<_, Infallible>(Response::new(String::from("file contents")))
/// });
/// let service = WasmScriptLayer::default().layer(static_files);
/// ```
#[derive(Debug, Clone, Default)]
pub struct WasmScriptLayer {
    generator: Arc<ShimGenerator>,
}

impl WasmScriptLayer {
    pub fn new(generator: ShimGenerator) -> Self {
        WasmScriptLayer {
            generator: Arc::new(generator),
        }
    }

    pub fn from_config(config: &ShimConfig) -> Result<Self, Error> {
        ShimGenerator::new(config).map(WasmScriptLayer::new)
    }
}

impl<S> Layer<S> for WasmScriptLayer {
    type Service = WasmScriptService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        WasmScriptService {
            inner,
            generator: Arc::clone(&self.generator),
        }
    }
}

/// Wraps a service, short-circuiting requests for `.wasm` files loaded
/// through `<script>` tags.
///
/// Requests are classified using the `Sec-Fetch-Dest` header. Everything else,
/// including the shim's own `fetch()` of the module (destination `empty`),
/// goes to the inner service untouched.
#[derive(Debug, Clone)]
pub struct WasmScriptService<S> {
    inner: S,
    generator: Arc<ShimGenerator>,
}

impl<S> WasmScriptService<S> {
    pub fn new(inner: S, generator: ShimGenerator) -> Self {
        WasmScriptLayer::new(generator).layer(inner)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn shim_for<B>(&self, request: &Request<B>) -> Option<ShimResponse> {
        match InterceptedRequest::from_http(request) {
            Ok(intercepted) => self.generator.fetch_wasm_script(&intercepted),
            Err(e) => {
                tracing::trace!(
                    error = &e as &dyn std::error::Error,
                    uri = %request.uri(),
                    "Unable to classify the request, passing it through"
                );
                None
            }
        }
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for WasmScriptService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    ResBody: From<String>,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = Either<Ready<Result<Response<ResBody>, S::Error>>, S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        match self.shim_for(&request) {
            Some(shim) => Either::Left(ready(Ok(shim.into_http()))),
            None => Either::Right(self.inner.call(request)),
        }
    }
}
