use bytes::Bytes;
use url::Url;

use crate::{
    ImportSpec,
    loader::{LoadError, Loaded},
};

/// The optional WebAssembly primitives a host may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// `WebAssembly.instantiateStreaming()`
    pub instantiate_streaming: bool,
    /// `WebAssembly.compileStreaming()`
    pub compile_streaming: bool,
}

impl Capabilities {
    /// Every streaming primitive is available.
    pub const fn all() -> Self {
        Capabilities {
            instantiate_streaming: true,
            compile_streaming: true,
        }
    }

    /// Only buffered compilation is available.
    pub const fn none() -> Self {
        Capabilities {
            instantiate_streaming: false,
            compile_streaming: false,
        }
    }
}

/// The environment a module gets loaded into.
///
/// This plays the part of the browser globals the generated shim relies on
/// (`fetch()` and the `WebAssembly` namespace), passed in explicitly so the
/// strategy selection can run against any engine or a test double.
///
/// Streaming primitives are optional. Their default implementations fail
/// with [`LoadError::MissingCapability`], and they are only ever called when
/// [`WasmHost::capabilities()`] advertises them.
#[async_trait::async_trait]
pub trait WasmHost: Send + Sync {
    /// An in-flight network response.
    type Response: Send;
    type Module: Send + Sync;
    type Instance: Send;
    type Imports: Send + Sync;

    /// Which optional primitives are currently available.
    fn capabilities(&self) -> Capabilities;

    /// Start fetching `url` without waiting for it to complete.
    fn fetch(&self, url: &Url) -> Self::Response;

    /// Turn a parsed import object into something modules can be
    /// instantiated against.
    fn resolve_imports(&self, spec: &ImportSpec) -> Result<Self::Imports, LoadError>;

    /// Wait for the whole response body.
    async fn array_buffer(&self, response: Self::Response) -> Result<Bytes, LoadError>;

    /// Compile a module from a complete buffer.
    async fn compile(&self, bytes: Bytes) -> Result<Self::Module, LoadError>;

    async fn instantiate(
        &self,
        module: &Self::Module,
        imports: &Self::Imports,
    ) -> Result<Self::Instance, LoadError>;

    /// Compile a module while its bytes are still being downloaded.
    async fn compile_streaming(&self, response: Self::Response) -> Result<Self::Module, LoadError> {
        let _ = response;
        Err(LoadError::MissingCapability("compileStreaming"))
    }

    /// Compile and instantiate a module while its bytes are still being
    /// downloaded.
    async fn instantiate_streaming(
        &self,
        response: Self::Response,
        imports: &Self::Imports,
    ) -> Result<Loaded<Self::Module, Self::Instance>, LoadError> {
        let _ = (response, imports);
        Err(LoadError::MissingCapability("instantiateStreaming"))
    }
}
