//! Input and output parameters.

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use weft_types::{DefaultValue, InputParameter, OutputParameter};

use super::types::{decode_optional_binding, decode_output_binding, decode_secondary_files, decode_type_union};
use super::{IdScope, collection_entries, optional_bool, optional_doc, optional_string, string_list};

pub(crate) fn decode_inputs(value: Option<&Value>, scope: &IdScope) -> Result<Vec<InputParameter>> {
    let entries = collection_entries(value, "id", "type")?;
    let mut inputs = Vec::with_capacity(entries.len());
    for (index, (raw_id, definition)) in entries.into_iter().enumerate() {
        let id = scope.normalize(&raw_id.ok_or_else(|| anyhow!("input {index} is missing 'id'"))?);
        let input = (|| -> Result<InputParameter> {
            let param_type = definition
                .get("type")
                .ok_or_else(|| anyhow!("missing required key 'type'"))
                .and_then(decode_type_union)?;
            Ok(InputParameter {
                param_type,
                input_binding: decode_optional_binding(definition.get("inputBinding")).context("while decoding 'inputBinding'")?,
                default: definition
                    .get("default")
                    .filter(|default| !default.is_null())
                    .cloned()
                    .map(DefaultValue::from_value),
                secondary_files: decode_secondary_files(definition.get("secondaryFiles")).context("while decoding 'secondaryFiles'")?,
                format: format_of(definition.get("format"))?,
                label: optional_string(&definition, "label")?,
                doc: optional_doc(&definition)?,
                load_contents: optional_bool(&definition, "loadContents")?.unwrap_or(false),
                streamable: optional_bool(&definition, "streamable")?.unwrap_or(false),
                id: id.clone(),
            })
        })()
        .with_context(|| format!("while decoding input '{id}'"))?;
        inputs.push(input);
    }
    Ok(inputs)
}

pub(crate) fn decode_outputs(value: Option<&Value>, scope: &IdScope) -> Result<Vec<OutputParameter>> {
    let entries = collection_entries(value, "id", "type")?;
    let mut outputs = Vec::with_capacity(entries.len());
    for (index, (raw_id, definition)) in entries.into_iter().enumerate() {
        let id = scope.normalize(&raw_id.ok_or_else(|| anyhow!("output {index} is missing 'id'"))?);
        let output = (|| -> Result<OutputParameter> {
            let param_type = definition
                .get("type")
                .ok_or_else(|| anyhow!("missing required key 'type'"))
                .and_then(decode_type_union)?;
            let output_source = string_list(definition.get("outputSource"))
                .context("while decoding 'outputSource'")?
                .iter()
                .map(|source| scope.normalize(source))
                .collect();
            Ok(OutputParameter {
                param_type,
                output_binding: decode_output_binding(definition.get("outputBinding")).context("while decoding 'outputBinding'")?,
                secondary_files: decode_secondary_files(definition.get("secondaryFiles")).context("while decoding 'secondaryFiles'")?,
                format: format_of(definition.get("format"))?,
                label: optional_string(&definition, "label")?,
                doc: optional_doc(&definition)?,
                output_source,
                streamable: optional_bool(&definition, "streamable")?.unwrap_or(false),
                id: id.clone(),
            })
        })()
        .with_context(|| format!("while decoding output '{id}'"))?;
        outputs.push(output);
    }
    Ok(outputs)
}

/// `format` may be one identifier or a list; only the first is kept.
fn format_of(value: Option<&Value>) -> Result<Option<String>> {
    Ok(string_list(value).context("while decoding 'format'")?.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_keep_their_shape() {
        let inputs = decode_inputs(
            Some(&json!([
                {"id": "reference", "type": "File", "default": {"class": "File", "location": "ref.fa"}},
                {"id": "threads", "type": "int", "default": 4},
                {"id": "tags", "type": "string[]", "default": ["a", "b"]}
            ])),
            &IdScope::default(),
        )
        .expect("decodes");
        assert_eq!(inputs[0].default.as_ref().map(DefaultValue::shape), Some("map"));
        assert_eq!(inputs[1].default.as_ref().map(DefaultValue::shape), Some("scalar"));
        assert_eq!(inputs[2].default.as_ref().map(DefaultValue::shape), Some("list"));
    }

    #[test]
    fn defaults_are_not_checked_against_the_type() {
        let inputs = decode_inputs(Some(&json!({"count": {"type": "int", "default": "not a number"}})), &IdScope::default()).expect("decodes");
        assert_eq!(inputs[0].default.as_ref().map(DefaultValue::to_value), Some(json!("not a number")));
    }

    #[test]
    fn missing_type_names_the_parameter() {
        let error = decode_inputs(Some(&json!([{"id": "reads"}])), &IdScope::default()).expect_err("fails");
        assert!(format!("{error:#}").contains("input 'reads'"));
    }

    #[test]
    fn output_sources_are_normalized() {
        let outputs = decode_outputs(
            Some(&json!([{"id": "#main/result", "type": "File", "outputSource": "#main/step2/out"}])),
            &IdScope::for_root(Some("#main")),
        )
        .expect("decodes");
        assert_eq!(outputs[0].id, "result");
        assert_eq!(outputs[0].output_source, vec!["step2/out".to_string()]);
    }
}
