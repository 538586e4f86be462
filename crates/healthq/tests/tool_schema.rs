use healthq::models::{TOOL_NAME, json_schema, tool_definition};
use serde_json::{Value, json};

#[test]
fn schema_marks_metric_and_aggregation_as_required() {
    let schema = json_schema();
    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .expect("schema must include required list");

    for field in ["metric", "aggregation"] {
        assert!(
            required.iter().any(|value| value.as_str() == Some(field)),
            "{field} should be required"
        );
    }
    assert_eq!(
        required
            .iter()
            .filter(|value| value.as_str() == Some("aggregation"))
            .count(),
        1
    );
}

#[test]
fn limit_is_a_positive_integer() {
    let schema = json_schema();
    let limit = schema
        .pointer("/properties/limit")
        .expect("schema must describe limit");

    assert_eq!(limit.get("minimum"), Some(&json!(1)));
    let types = limit
        .get("type")
        .expect("limit must declare its type");
    assert!(
        types == &json!("integer")
            || types
                .as_array()
                .is_some_and(|types| types.contains(&json!("integer"))),
        "unexpected limit type: {types}"
    );
}

#[test]
fn tool_definition_wraps_parameter_schema() {
    let definition = tool_definition();

    assert_eq!(definition["type"], json!("function"));
    assert_eq!(definition["function"]["name"], json!(TOOL_NAME));
    assert_eq!(definition["function"]["parameters"], json_schema());
}
