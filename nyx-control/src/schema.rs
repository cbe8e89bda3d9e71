use schemars::JsonSchema;
use serde::Serialize;

use crate::{Error, Result};

/// Validate a config value against the JSON Schema derived from its own type.
///
/// Catches structural problems the type system cannot (empty identifiers,
/// empty address lists, out of range parameters) before a server sees the config.
pub fn validate<T: JsonSchema + Serialize>(what: &str, value: &T) -> Result<()> {
    let instance = serde_json::to_value(value)?;
    let schema = serde_json::to_value(schemars::schema_for!(T))?;
    let compiled = jsonschema::JSONSchema::options()
        .with_draft(jsonschema::Draft::Draft7)
        .compile(&schema)
        .map_err(|e| Error::Schema(format!("{what}: cannot compile schema: {e}")))?;
    if let Err(errors) = compiled.validate(&instance) {
        let joined = errors
            .map(|e| format!("{} at '{}'", e, e.instance_path))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(Error::Schema(format!("{what}: {joined}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, JsonSchema)]
    struct Sample {
        #[schemars(length(min = 1))]
        name: String,
        #[schemars(range(min = 1))]
        workers: u32,
    }

    #[test]
    fn accepts_conforming_value() -> Result<()> {
        validate("sample", &Sample { name: "a".into(), workers: 1 })
    }

    #[test]
    fn reports_every_violation() {
        let err = validate("sample", &Sample { name: String::new(), workers: 0 }).unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("schema violation: sample:"), "{msg}");
        assert!(msg.contains("/name"), "{msg}");
        assert!(msg.contains("/workers"), "{msg}");
    }
}
