//! A [`WasmHost`] backed by the `wasmer` runtime.

use std::{fmt, sync::Arc};

use bytes::Bytes;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use url::Url;
use wasmer::{
    Engine, Extern, ExternType, Global, GlobalType, Imports, Instance, Module, Mutability, Store,
    Type, Value,
};

use crate::{
    ImportSpec, ImportValue,
    loader::{BoxError, Capabilities, LoadError, Loaded, WasmHost},
};

/// Something that can retrieve the bytes behind a URL.
#[async_trait::async_trait]
pub trait Fetch: Send + Sync + 'static {
    async fn fetch(&self, url: &Url) -> Result<Bytes, BoxError>;
}

/// A [`Fetch`] implementation serving resources from memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryFetch {
    resources: Arc<IndexMap<String, Bytes>>,
}

impl MemoryFetch {
    pub fn new() -> Self {
        MemoryFetch::default()
    }

    /// Serve `bytes` for `url`.
    pub fn with(mut self, url: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Arc::make_mut(&mut self.resources).insert(url.into(), bytes.into());
        self
    }
}

#[async_trait::async_trait]
impl Fetch for MemoryFetch {
    async fn fetch(&self, url: &Url) -> Result<Bytes, BoxError> {
        self.resources
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| BoxError::from(format!("404 Not Found: {url}")))
    }
}

/// An import object waiting for the module it gets linked against.
///
/// References are looked up as soon as the import object is read. Literals
/// only become globals once the module declares which type it expects, and
/// members the module never imports are ignored.
#[derive(Clone, Default)]
pub struct ImportObject {
    namespaces: IndexMap<String, Namespace>,
}

#[derive(Clone)]
enum Namespace {
    Members(IndexMap<String, Member>),
    NotAnObject(&'static str),
}

#[derive(Clone)]
enum Member {
    Extern(Extern),
    Literal(ImportValue),
}

impl fmt::Debug for ImportObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportObject")
            .field("namespaces", &self.namespaces.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A fetch running in the background.
#[derive(Debug)]
pub struct PendingFetch {
    url: Url,
    task: JoinHandle<Result<Bytes, BoxError>>,
}

/// Loads modules into a `wasmer` [`Store`].
///
/// Fetches are spawned onto the current tokio runtime as soon as they are
/// requested and compilation happens on the blocking thread pool, so every
/// method must be called from within a tokio runtime.
///
/// Import objects are resolved against values registered with
/// [`WasmerHost::define()`]: a reference such as `console.log` picks up the
/// extern defined under that exact path. Numbers and booleans imported as
/// immutable `i32`, `f32` or `f64` globals are converted the way
/// `WebAssembly.instantiate()` converts them.
pub struct WasmerHost {
    engine: Engine,
    store: Mutex<Store>,
    fetcher: Arc<dyn Fetch>,
    definitions: Mutex<IndexMap<String, Extern>>,
    capabilities: Capabilities,
}

impl WasmerHost {
    pub fn new(fetcher: impl Fetch) -> Self {
        WasmerHost::with_engine(Engine::default(), fetcher)
    }

    pub fn with_engine(engine: Engine, fetcher: impl Fetch) -> Self {
        let store = Store::new(engine.clone());
        WasmerHost {
            engine,
            store: Mutex::new(store),
            fetcher: Arc::new(fetcher),
            definitions: Mutex::new(IndexMap::new()),
            capabilities: Capabilities::all(),
        }
    }

    /// Override the primitives this host advertises.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Make an extern available to import objects under `path`.
    ///
    /// ```rust,no_run
    /// # use script_wasm::loader::sys::{MemoryFetch, WasmerHost};
    /// use wasmer::Function;
    ///
    /// let host = WasmerHost::new(MemoryFetch::new());
    /// host.define("console.log", |store| {
    ///     Function::new_typed(store, |value: i32| println!("{value}"))
    /// });
    /// ```
    pub fn define<E>(&self, path: impl Into<String>, build: impl FnOnce(&mut Store) -> E)
    where
        E: Into<Extern>,
    {
        let export = self.with_store(|store| build(store).into());
        self.definitions.lock().insert(path.into(), export);
    }

    /// Run `f` with exclusive access to the store, e.g. to call exports of a
    /// loaded instance.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut Store) -> R) -> R {
        let mut store = self.store.lock();
        f(&mut store)
    }

    /// Pick the members of `object` that `module` actually imports.
    fn link(&self, module: &Module, object: &ImportObject) -> Result<Imports, LoadError> {
        let mut imports = Imports::new();

        for import in module.imports() {
            let (namespace, name) = (import.module(), import.name());
            let members = match object.namespaces.get(namespace) {
                Some(Namespace::Members(members)) => members,
                Some(Namespace::NotAnObject(kind)) => {
                    return Err(LoadError::InvalidNamespace {
                        namespace: namespace.to_string(),
                        kind: *kind,
                    });
                }
                // Left for instantiation to report.
                None => continue,
            };

            let export = match members.get(name) {
                Some(Member::Extern(export)) => export.clone(),
                Some(Member::Literal(value)) => {
                    let global = literal_to_value(value, import.ty()).ok_or_else(|| {
                        LoadError::UnsupportedImport {
                            namespace: namespace.to_string(),
                            name: name.to_string(),
                            kind: value.kind(),
                        }
                    })?;
                    self.with_store(|store| Global::new(store, global).into())
                }
                None => continue,
            };
            imports.define(namespace, name, export);
        }

        Ok(imports)
    }
}

impl fmt::Debug for WasmerHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WasmerHost")
            .field("definitions", &self.definitions.lock().keys().collect::<Vec<_>>())
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Convert a literal for an immutable global import of type `ty`.
fn literal_to_value(value: &ImportValue, ty: &ExternType) -> Option<Value> {
    let ExternType::Global(GlobalType {
        ty,
        mutability: Mutability::Const,
        ..
    }) = ty
    else {
        return None;
    };
    let number = match value {
        ImportValue::Number(number) => *number,
        ImportValue::Bool(flag) => f64::from(u8::from(*flag)),
        _ => return None,
    };

    match ty {
        Type::I32 => Some(Value::I32(to_int32(number))),
        Type::F32 => Some(Value::F32(number as f32)),
        Type::F64 => Some(Value::F64(number)),
        // i64 globals need a BigInt
        _ => None,
    }
}

/// JavaScript's `ToInt32`: truncate, then wrap modulo 2^32.
fn to_int32(number: f64) -> i32 {
    if !number.is_finite() {
        return 0;
    }
    number.trunc().rem_euclid(4_294_967_296.0) as u32 as i32
}

#[async_trait::async_trait]
impl WasmHost for WasmerHost {
    type Response = PendingFetch;
    type Module = Module;
    type Instance = Instance;
    type Imports = ImportObject;

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn fetch(&self, url: &Url) -> PendingFetch {
        tracing::debug!(%url, "Fetching");
        let fetcher = Arc::clone(&self.fetcher);
        let task_url = url.clone();
        let task = tokio::spawn(async move { fetcher.fetch(&task_url).await });

        PendingFetch {
            url: url.clone(),
            task,
        }
    }

    fn resolve_imports(&self, spec: &ImportSpec) -> Result<ImportObject, LoadError> {
        let definitions = self.definitions.lock();
        if let Some(reference) = spec
            .references()
            .into_iter()
            .find(|reference| !definitions.contains_key(&reference.to_string()))
        {
            return Err(LoadError::UnresolvedReference {
                path: reference.to_string(),
            });
        }

        let mut object = ImportObject::default();
        for (namespace, value) in spec.namespaces() {
            let ImportValue::Object(members) = value else {
                object
                    .namespaces
                    .insert(namespace.to_string(), Namespace::NotAnObject(value.kind()));
                continue;
            };

            let mut resolved = IndexMap::new();
            for (name, member) in members {
                let member = match member {
                    ImportValue::Reference(reference) => definitions
                        .get(&reference.to_string())
                        .cloned()
                        .map(Member::Extern)
                        .ok_or_else(|| LoadError::UnresolvedReference {
                            path: reference.to_string(),
                        })?,
                    literal => Member::Literal(literal.clone()),
                };
                resolved.insert(name.clone(), member);
            }
            object
                .namespaces
                .insert(namespace.to_string(), Namespace::Members(resolved));
        }

        Ok(object)
    }

    async fn array_buffer(&self, response: PendingFetch) -> Result<Bytes, LoadError> {
        let PendingFetch { url, task } = response;
        let result = match task.await {
            Ok(result) => result,
            Err(join_error) => Err(BoxError::from(join_error)),
        };

        result.map_err(|error| LoadError::Fetch {
            url: url.to_string(),
            error,
        })
    }

    async fn compile(&self, bytes: Bytes) -> Result<Module, LoadError> {
        let engine = self.engine.clone();
        let module = tokio::task::spawn_blocking(move || Module::new(&engine, &bytes))
            .await
            .map_err(|e| LoadError::Compile(Box::new(e)))?
            .map_err(|e| LoadError::Compile(Box::new(e)))?;

        tracing::debug!(name = module.name(), "Compiled the module");
        Ok(module)
    }

    async fn instantiate(
        &self,
        module: &Module,
        imports: &ImportObject,
    ) -> Result<Instance, LoadError> {
        let imports = self.link(module, imports)?;
        self.with_store(|store| Instance::new(store, module, &imports))
            .map_err(|e| LoadError::Instantiate(Box::new(e)))
    }

    /// `wasmer` can't compile while downloading, so this waits for the full
    /// body before compiling.
    async fn compile_streaming(&self, response: PendingFetch) -> Result<Module, LoadError> {
        let bytes = self.array_buffer(response).await?;
        self.compile(bytes).await
    }

    async fn instantiate_streaming(
        &self,
        response: PendingFetch,
        imports: &ImportObject,
    ) -> Result<Loaded<Module, Instance>, LoadError> {
        let module = self.compile_streaming(response).await?;
        let instance = self.instantiate(&module, imports).await?;
        Ok(Loaded { module, instance })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::extra_unused_type_parameters)]
    fn send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<WasmerHost>();
        assert_sync::<WasmerHost>();
    }

    fn global(ty: Type) -> ExternType {
        ExternType::Global(GlobalType::new(ty, Mutability::Const))
    }

    #[test]
    fn literals_take_the_type_of_the_global() {
        let number = |n: f64| ImportValue::Number(n);

        assert_eq!(literal_to_value(&number(42.0), &global(Type::I32)), Some(Value::I32(42)));
        assert_eq!(literal_to_value(&number(-1.9), &global(Type::I32)), Some(Value::I32(-1)));
        assert_eq!(
            literal_to_value(&number(4_294_967_297.0), &global(Type::I32)),
            Some(Value::I32(1))
        );
        assert_eq!(literal_to_value(&number(f64::NAN), &global(Type::I32)), Some(Value::I32(0)));
        assert_eq!(literal_to_value(&number(0.5), &global(Type::F64)), Some(Value::F64(0.5)));
        assert_eq!(literal_to_value(&number(0.5), &global(Type::F32)), Some(Value::F32(0.5)));
        assert_eq!(
            literal_to_value(&ImportValue::Bool(true), &global(Type::I32)),
            Some(Value::I32(1))
        );
    }

    #[test]
    fn some_literals_cannot_be_imported() {
        let mutable = ExternType::Global(GlobalType::new(Type::I32, Mutability::Var));

        assert_eq!(literal_to_value(&ImportValue::Number(1.0), &global(Type::I64)), None);
        assert_eq!(literal_to_value(&ImportValue::Number(1.0), &mutable), None);
        assert_eq!(
            literal_to_value(&ImportValue::String("x".into()), &global(Type::I32)),
            None
        );
    }

    #[tokio::test]
    async fn memory_fetch_serves_known_urls() {
        let fetch = MemoryFetch::new().with("http://h/x.wasm", &b"\0asm"[..]);

        let found = fetch.fetch(&Url::parse("http://h/x.wasm").unwrap()).await;
        let missing = fetch.fetch(&Url::parse("http://h/y.wasm").unwrap()).await;

        assert_eq!(found.unwrap(), Bytes::from_static(b"\0asm"));
        assert!(missing.is_err());
    }
}
