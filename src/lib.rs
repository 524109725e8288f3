//! Load WebAssembly modules with a plain `<script>` tag.
//!
//! ```html
//! <script src="app.wasm" data-import="{ imports: { log: console.log } }"></script>
//! ```
//!
//! Browsers can't execute a `.wasm` file as a script, so requests for one
//! are intercepted and answered with a small JavaScript loader instead. When
//! the browser runs it, the loader fetches the real module, reads the import
//! object from the tag's `data-import` attribute and instantiates the module
//! using the fastest path the engine offers:
//!
//! 1. `WebAssembly.instantiateStreaming()`,
//! 2. `WebAssembly.compileStreaming()` and `WebAssembly.instantiate()`,
//! 3. `WebAssembly.compile()` on the downloaded buffer and
//!    `WebAssembly.instantiate()`.
//!
//! The choice is made by the loader at run time, not when it is generated.
//!
//! The crate is split into:
//!
//! - [`is_wasm_script()`], which decides whether a request is a `.wasm` file
//!   requested as a script,
//! - [`fetch_wasm_script()`] and [`ShimGenerator`], which render the loader,
//! - [`WasmScriptLayer`], a `tower` middleware doing both for HTTP servers,
//! - [`import_spec`], the strict parser for import objects (attribute text is
//!   never evaluated as code),
//! - [`loader`], the same loading protocol run natively against a
//!   [`WasmHost`](loader::WasmHost).

#![deny(trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

mod config;
mod error;
pub mod import_spec;
pub mod loader;
mod request;
mod service;
mod shim;

pub use crate::{
    config::{DEFAULT_CONTENT_TYPE, DEFAULT_IMPORT_ATTRIBUTE, ShimConfig},
    error::Error,
    import_spec::{ImportSpec, ImportSpecError, ImportValue},
    request::{Destination, InterceptedRequest, is_wasm_script},
    service::{WasmScriptLayer, WasmScriptService},
    shim::{ShimGenerator, ShimResponse, fetch_wasm_script, js_string_literal, render_shim},
};
