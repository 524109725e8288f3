//! The loading protocol performed by the generated shim, driven from Rust.
//!
//! The shim served to browsers fetches a module, reads the import object
//! from its `<script>` tag and then picks the fastest compilation path the
//! engine supports. [`Loader`] runs exactly the same protocol against an
//! explicit [`WasmHost`], which makes the strategy selection observable and
//! lets native hosts (see [`WasmerHost`]) serve the same role as the browser.
//!
//! [`WasmerHost`]: crate::loader::sys::WasmerHost

mod host;
#[cfg(feature = "sys")]
pub mod sys;

use std::fmt;

use indexmap::IndexMap;
use url::Url;

pub use self::host::{Capabilities, WasmHost};
use crate::{ImportSpec, ImportSpecError, ShimConfig};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A compiled module together with an instance of that same module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loaded<M, I> {
    pub module: M,
    pub instance: I,
}

/// How a module gets compiled and instantiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// `WebAssembly.instantiateStreaming(response, imports)`
    InstantiateStreaming,
    /// `WebAssembly.compileStreaming(response)`, then
    /// `WebAssembly.instantiate(module, imports)`
    CompileStreaming,
    /// `response.arrayBuffer()`, `WebAssembly.compile(buffer)`, then
    /// `WebAssembly.instantiate(module, imports)`
    Buffered,
}

impl Strategy {
    /// Pick the fastest strategy the host supports.
    pub fn select(capabilities: Capabilities) -> Self {
        if capabilities.instantiate_streaming {
            Strategy::InstantiateStreaming
        } else if capabilities.compile_streaming {
            Strategy::CompileStreaming
        } else {
            Strategy::Buffered
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::InstantiateStreaming => f.write_str("instantiate-streaming"),
            Strategy::CompileStreaming => f.write_str("compile-streaming"),
            Strategy::Buffered => f.write_str("buffered"),
        }
    }
}

/// The `<script>` element that triggered a load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptElement {
    dataset: IndexMap<String, String>,
}

impl ScriptElement {
    pub fn new() -> Self {
        ScriptElement::default()
    }

    /// Set a `data-*` attribute, using its dataset key (`data-import` is
    /// `import`).
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.dataset.insert(key.into(), value.into());
        self
    }

    pub fn data(&self, key: &str) -> Option<&str> {
        self.dataset.get(key).map(String::as_str)
    }
}

/// Errors that can occur while loading a module.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LoadError {
    #[error("Unable to fetch \"{url}\"")]
    Fetch {
        url: String,
        #[source]
        error: BoxError,
    },
    #[error("Unable to read the import object")]
    ImportSpec(#[from] ImportSpecError),
    #[error("The import object references \"{path}\" but global references are disabled")]
    ReferencesDisabled { path: String },
    #[error("Unable to resolve \"{path}\"")]
    UnresolvedReference { path: String },
    #[error("The import namespace \"{namespace}\" must be an object, found {kind}")]
    InvalidNamespace {
        namespace: String,
        kind: &'static str,
    },
    #[error("A value of type {kind} can't be imported as \"{namespace}.{name}\"")]
    UnsupportedImport {
        namespace: String,
        name: String,
        kind: &'static str,
    },
    #[error("The host doesn't provide WebAssembly.{0}()")]
    MissingCapability(&'static str),
    #[error("Unable to compile the WebAssembly module")]
    Compile(#[source] BoxError),
    #[error("Unable to instantiate the WebAssembly module")]
    Instantiate(#[source] BoxError),
}

/// Fetches, compiles and instantiates modules the way the generated shim
/// does.
#[derive(Debug, Clone)]
pub struct Loader<H> {
    host: H,
    config: ShimConfig,
}

impl<H: WasmHost> Loader<H> {
    pub fn new(host: H) -> Self {
        Loader::with_config(host, ShimConfig::default())
    }

    pub fn with_config(host: H, config: ShimConfig) -> Self {
        Loader { host, config }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Load the module at `url` on behalf of `script`.
    ///
    /// The fetch is started before the import object is read, capabilities
    /// are checked on every call, and exactly one [`Strategy`] runs.
    #[tracing::instrument(level = "debug", skip_all, fields(%url))]
    pub async fn load(
        &self,
        url: &Url,
        script: Option<&ScriptElement>,
    ) -> Result<Loaded<H::Module, H::Instance>, LoadError> {
        let response = self.host.fetch(url);

        let code = script
            .and_then(|script| script.data(&self.config.import_attribute))
            .unwrap_or("{}");
        let spec = ImportSpec::parse(code)?;
        if !self.config.allow_global_references {
            if let Some(reference) = spec.references().first() {
                return Err(LoadError::ReferencesDisabled {
                    path: reference.to_string(),
                });
            }
        }
        let imports = self.host.resolve_imports(&spec)?;

        let strategy = Strategy::select(self.host.capabilities());
        tracing::debug!(%strategy, "Loading the module");

        match strategy {
            Strategy::InstantiateStreaming => {
                self.host.instantiate_streaming(response, &imports).await
            }
            Strategy::CompileStreaming => {
                let module = self.host.compile_streaming(response).await?;
                let instance = self.host.instantiate(&module, &imports).await?;
                Ok(Loaded { module, instance })
            }
            Strategy::Buffered => {
                let bytes = self.host.array_buffer(response).await?;
                let module = self.host.compile(bytes).await?;
                let instance = self.host.instantiate(&module, &imports).await?;
                Ok(Loaded { module, instance })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ImportValue;

    /// A host where "compiling" keeps the bytes and "instantiating" records
    /// the resolved import names.
    struct FakeHost {
        capabilities: Capabilities,
        calls: Mutex<Vec<&'static str>>,
    }

    impl FakeHost {
        fn new(capabilities: Capabilities) -> Self {
            FakeHost {
                capabilities,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl WasmHost for FakeHost {
        type Response = Bytes;
        type Module = Bytes;
        type Instance = Vec<String>;
        type Imports = Vec<String>;

        fn capabilities(&self) -> Capabilities {
            self.record("capabilities");
            self.capabilities
        }

        fn fetch(&self, url: &Url) -> Bytes {
            self.record("fetch");
            Bytes::from(url.path().to_string())
        }

        fn resolve_imports(&self, spec: &ImportSpec) -> Result<Vec<String>, LoadError> {
            self.record("resolve_imports");
            let mut names = Vec::new();
            for (namespace, value) in spec.namespaces() {
                if let ImportValue::Object(members) = value {
                    names.extend(members.keys().map(|name| format!("{namespace}.{name}")));
                }
            }
            Ok(names)
        }

        async fn array_buffer(&self, response: Bytes) -> Result<Bytes, LoadError> {
            self.record("array_buffer");
            Ok(response)
        }

        async fn compile(&self, bytes: Bytes) -> Result<Bytes, LoadError> {
            self.record("compile");
            Ok(bytes)
        }

        async fn instantiate(
            &self,
            _module: &Bytes,
            imports: &Vec<String>,
        ) -> Result<Vec<String>, LoadError> {
            self.record("instantiate");
            Ok(imports.clone())
        }

        async fn compile_streaming(&self, response: Bytes) -> Result<Bytes, LoadError> {
            if !self.capabilities.compile_streaming {
                return Err(LoadError::MissingCapability("compileStreaming"));
            }
            self.record("compile_streaming");
            Ok(response)
        }

        async fn instantiate_streaming(
            &self,
            response: Bytes,
            imports: &Vec<String>,
        ) -> Result<Loaded<Bytes, Vec<String>>, LoadError> {
            if !self.capabilities.instantiate_streaming {
                return Err(LoadError::MissingCapability("instantiateStreaming"));
            }
            self.record("instantiate_streaming");
            Ok(Loaded {
                module: response,
                instance: imports.clone(),
            })
        }
    }

    fn url() -> Url {
        Url::parse("http://localhost:8080/bytes.wasm").unwrap()
    }

    #[test]
    fn strategies_are_tried_fastest_first() {
        assert_eq!(
            Strategy::select(Capabilities::all()),
            Strategy::InstantiateStreaming
        );
        assert_eq!(
            Strategy::select(Capabilities {
                instantiate_streaming: true,
                compile_streaming: false,
            }),
            Strategy::InstantiateStreaming
        );
        assert_eq!(
            Strategy::select(Capabilities {
                instantiate_streaming: false,
                compile_streaming: true,
            }),
            Strategy::CompileStreaming
        );
        assert_eq!(Strategy::select(Capabilities::none()), Strategy::Buffered);
    }

    #[tokio::test]
    async fn instantiate_streaming_is_preferred() {
        let loader = Loader::new(FakeHost::new(Capabilities::all()));

        let loaded = loader.load(&url(), None).await.unwrap();

        assert_eq!(loaded.module, Bytes::from_static(b"/bytes.wasm"));
        assert_eq!(
            loader.host().calls(),
            [
                "fetch",
                "resolve_imports",
                "capabilities",
                "instantiate_streaming"
            ]
        );
    }

    #[tokio::test]
    async fn compile_streaming_then_instantiate() {
        let loader = Loader::new(FakeHost::new(Capabilities {
            instantiate_streaming: false,
            compile_streaming: true,
        }));

        loader.load(&url(), None).await.unwrap();

        assert_eq!(
            loader.host().calls(),
            [
                "fetch",
                "resolve_imports",
                "capabilities",
                "compile_streaming",
                "instantiate"
            ]
        );
    }

    #[tokio::test]
    async fn buffered_compilation_as_a_last_resort() {
        let loader = Loader::new(FakeHost::new(Capabilities::none()));

        loader.load(&url(), None).await.unwrap();

        assert_eq!(
            loader.host().calls(),
            [
                "fetch",
                "resolve_imports",
                "capabilities",
                "array_buffer",
                "compile",
                "instantiate"
            ]
        );
    }

    #[tokio::test]
    async fn imports_come_from_the_script_element() {
        let loader = Loader::new(FakeHost::new(Capabilities::none()));
        let script = ScriptElement::new().with_data("import", "{ imports: { log: console.log } }");

        let loaded = loader.load(&url(), Some(&script)).await.unwrap();

        assert_eq!(loaded.instance, ["imports.log"]);
    }

    #[tokio::test]
    async fn the_import_attribute_is_configurable() {
        let config = ShimConfig {
            import_attribute: "wasmImports".to_string(),
            ..Default::default()
        };
        let loader = Loader::with_config(FakeHost::new(Capabilities::none()), config);
        let script = ScriptElement::new()
            .with_data("import", "{ ignored: {} }")
            .with_data("wasmImports", "{ env: { memory: 1 } }");

        let loaded = loader.load(&url(), Some(&script)).await.unwrap();

        assert_eq!(loaded.instance, ["env.memory"]);
    }

    #[tokio::test]
    async fn references_can_be_disabled() {
        let config = ShimConfig {
            allow_global_references: false,
            ..Default::default()
        };
        let loader = Loader::with_config(FakeHost::new(Capabilities::all()), config);
        let script = ScriptElement::new().with_data("import", "{ imports: { log: console.log } }");

        let err = loader.load(&url(), Some(&script)).await.unwrap_err();

        assert!(matches!(err, LoadError::ReferencesDisabled { ref path } if path == "console.log"));
        assert_eq!(loader.host().calls(), ["fetch"]);
    }

    #[tokio::test]
    async fn malformed_import_objects_fail_the_load() {
        let loader = Loader::new(FakeHost::new(Capabilities::all()));
        let script = ScriptElement::new().with_data("import", "{ imports: alert(1) }");

        let err = loader.load(&url(), Some(&script)).await.unwrap_err();

        assert!(matches!(err, LoadError::ImportSpec(_)));
    }
}
