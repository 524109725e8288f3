use http::HeaderValue;
use serde::{Deserialize, Serialize};

use crate::Error;

/// The `Content-Type` served with generated shims.
pub const DEFAULT_CONTENT_TYPE: &str = "application/javascript";

/// The dataset key read from the `<script>` element, i.e. `data-import`.
pub const DEFAULT_IMPORT_ATTRIBUTE: &str = "import";

/// Settings for the generated loader shim.
///
/// Every field has a default, so an empty document deserializes to
/// [`ShimConfig::default()`].
///
/// ```
/// # use script_wasm::ShimConfig;
/// let config: ShimConfig = serde_json::from_str(r#"{ "allow-global-references": false }"#)?;
/// assert_eq!(config.import_attribute, "import");
/// assert!(!config.allow_global_references);
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ShimConfig {
    /// The `dataset` key holding the import object, in its camelCase form
    /// (`data-wasm-imports` is `wasmImports`).
    pub import_attribute: String,
    /// The media type of the served shim.
    pub content_type: String,
    /// Allow the import object to reference globals such as `console.log`.
    ///
    /// With this disabled the import object may only contain literals.
    pub allow_global_references: bool,
}

impl Default for ShimConfig {
    fn default() -> Self {
        ShimConfig {
            import_attribute: DEFAULT_IMPORT_ATTRIBUTE.to_string(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            allow_global_references: true,
        }
    }
}

impl ShimConfig {
    pub(crate) fn content_type_header(&self) -> Result<HeaderValue, Error> {
        let value = HeaderValue::from_str(&self.content_type).map_err(|e| Error::InvalidConfig {
            field: "content-type",
            reason: e.to_string(),
        })?;

        let essence = self
            .content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if !is_javascript_mime(&essence) {
            return Err(Error::InvalidConfig {
                field: "content-type",
                reason: format!("\"{essence}\" is not a JavaScript media type"),
            });
        }

        Ok(value)
    }

    pub(crate) fn validate_import_attribute(&self) -> Result<(), Error> {
        let key = self.import_attribute.as_str();
        let mut chars = key.chars();
        let valid = match chars.next() {
            Some(first) => {
                first.is_ascii_lowercase() && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            None => false,
        };

        if valid {
            Ok(())
        } else {
            Err(Error::InvalidConfig {
                field: "import-attribute",
                reason: format!("\"{key}\" is not a dataset key"),
            })
        }
    }
}

fn is_javascript_mime(essence: &str) -> bool {
    matches!(
        essence,
        "application/javascript"
            | "application/ecmascript"
            | "application/x-javascript"
            | "application/x-ecmascript"
            | "text/javascript"
            | "text/ecmascript"
            | "text/jscript"
            | "text/livescript"
            | "text/x-javascript"
            | "text/x-ecmascript"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: ShimConfig = serde_json::from_str("{}").unwrap();

        assert_eq!(config, ShimConfig::default());
        assert!(config.content_type_header().is_ok());
        assert!(config.validate_import_attribute().is_ok());
    }

    #[test]
    fn content_type_must_be_javascript() {
        let config = ShimConfig {
            content_type: "text/javascript; charset=utf-8".to_string(),
            ..Default::default()
        };
        assert!(config.content_type_header().is_ok());

        let config = ShimConfig {
            content_type: "application/wasm".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.content_type_header(),
            Err(Error::InvalidConfig {
                field: "content-type",
                ..
            })
        ));
    }

    #[test]
    fn import_attribute_must_be_a_dataset_key() {
        for key in ["import", "wasmImports", "imports_v2"] {
            let config = ShimConfig {
                import_attribute: key.to_string(),
                ..Default::default()
            };
            assert!(config.validate_import_attribute().is_ok(), "{key}");
        }

        for key in ["", "data-import", "Import", "a'b", "x y"] {
            let config = ShimConfig {
                import_attribute: key.to_string(),
                ..Default::default()
            };
            assert!(config.validate_import_attribute().is_err(), "{key}");
        }
    }
}
