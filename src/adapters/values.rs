//! Layered Helm values: parsing, deep merge and checksum

use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// ConfigMap key holding YAML values
pub const VALUES_KEY: &str = "values";

/// Parse one layer of values. Empty documents are an empty mapping.
pub fn parse_layer(source: &str, raw: &str) -> Result<Mapping> {
    match serde_yaml::from_str::<Value>(raw)? {
        Value::Null => Ok(Mapping::new()),
        Value::Mapping(map) => Ok(map),
        _ => Err(Error::ValidationError(format!(
            "values in {} must be a YAML mapping",
            source
        ))),
    }
}

/// Merge `overlay` into `base`. Nested mappings merge key by key, anything
/// else in `overlay` replaces the value in `base`.
pub fn merge(base: &mut Mapping, overlay: Mapping) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Mapping(existing)), Value::Mapping(incoming)) => merge(existing, incoming),
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Merge layers in order; later layers win
pub fn merge_layers(layers: impl IntoIterator<Item = Mapping>) -> Mapping {
    layers.into_iter().fold(Mapping::new(), |mut merged, layer| {
        merge(&mut merged, layer);
        merged
    })
}

/// Render merged values and their SHA-256 hex digest
pub fn render(values: &Mapping) -> Result<(String, String)> {
    let rendered = serde_yaml::to_string(values)?;
    let checksum = format!("{:x}", Sha256::digest(rendered.as_bytes()));
    Ok((rendered, checksum))
}
