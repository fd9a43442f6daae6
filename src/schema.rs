use serde_json::Value;

/// Structural types for engine documents.
#[derive(Debug, Clone)]
pub enum TypeDef {
    Text,
    Number,
    Bool,
    /// Engines disagree on whether ids are strings or integers.
    TextOrNumber,
    Any,
    List(Box<TypeDef>),
    Object(Vec<FieldDef>),
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: &'static str,
    pub ty: TypeDef,
    pub required: bool,
}

impl FieldDef {
    pub fn required(name: &'static str, ty: TypeDef) -> Self {
        Self {
            name,
            ty,
            required: true,
        }
    }

    pub fn optional(name: &'static str, ty: TypeDef) -> Self {
        Self {
            name,
            ty,
            required: false,
        }
    }
}

/// Single schema violation, with a JSON path.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("missing required field at path {path}")]
    MissingField { path: String },
    #[error("type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Check a document against a TypeDef, collecting every violation.
/// Optional fields may be absent or null.
pub fn check(ty: &TypeDef, value: &Value) -> Result<(), Vec<SchemaError>> {
    let mut errors = Vec::new();
    check_inner(ty, value, "$", &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Joins violations into one line for error details.
pub fn describe(errors: &[SchemaError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn check_inner(ty: &TypeDef, value: &Value, path: &str, errors: &mut Vec<SchemaError>) {
    use TypeDef::*;

    let mismatch = |expected: &'static str| SchemaError::TypeMismatch {
        path: path.to_string(),
        expected,
        found: value_type_name(value),
    };

    match ty {
        Any => {}
        Text => {
            if !value.is_string() {
                errors.push(mismatch("string"));
            }
        }
        Number => {
            if !value.is_number() {
                errors.push(mismatch("number"));
            }
        }
        Bool => {
            if !value.is_boolean() {
                errors.push(mismatch("boolean"));
            }
        }
        TextOrNumber => {
            if !(value.is_string() || value.is_number()) {
                errors.push(mismatch("string or number"));
            }
        }
        List(inner) => {
            if let Value::Array(items) = value {
                for (idx, item) in items.iter().enumerate() {
                    let child_path = format!("{path}[{idx}]");
                    check_inner(inner, item, &child_path, errors);
                }
            } else {
                errors.push(mismatch("array"));
            }
        }
        Object(fields) => {
            let Some(obj) = value.as_object() else {
                errors.push(mismatch("object"));
                return;
            };

            for field in fields {
                let field_path = format!("{path}.{}", field.name);
                match obj.get(field.name) {
                    None | Some(Value::Null) if !field.required => {}
                    None => errors.push(SchemaError::MissingField { path: field_path }),
                    Some(v) => check_inner(&field.ty, v, &field_path, errors),
                }
            }

            // Extra fields are ignored so newer engines stay readable.
        }
    }
}

fn value_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::calculation_result_typedef;
    use serde_json::json;

    fn valid_response() -> Value {
        json!({
            "session_id": "20240501_120000",
            "session_name": "Bistro",
            "calculation_timestamp": "20240501_120000",
            "validation_passed": true,
            "staff_costs": 1.0,
            "equipment_costs": 2.0,
            "location_costs": 3.0,
            "operational_costs": 4.0,
            "total_cost": 10.0,
            "cost_breakdowns": [
                {"category": "Staff", "subcategory": "Wages", "amount": 1.0, "formula": "1", "details": {"a": 1}}
            ]
        })
    }

    #[test]
    fn accepts_engine_response() {
        assert!(check(&calculation_result_typedef(), &valid_response()).is_ok());
    }

    #[test]
    fn optional_fields_may_be_null_or_absent() {
        let mut doc = valid_response();
        doc["calculation_timestamp"] = Value::Null;
        doc.as_object_mut().unwrap().remove("cost_breakdowns");
        assert!(check(&calculation_result_typedef(), &doc).is_ok());
    }

    #[test]
    fn reports_every_violation_with_its_path() {
        let mut doc = valid_response();
        doc.as_object_mut().unwrap().remove("total_cost");
        doc["staff_costs"] = json!("lots");
        doc["cost_breakdowns"][0]["amount"] = json!(null);

        let errors = check(&calculation_result_typedef(), &doc).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&SchemaError::TypeMismatch {
            path: "$.staff_costs".into(),
            expected: "number",
            found: "string",
        }));
        assert!(errors.contains(&SchemaError::MissingField {
            path: "$.total_cost".into()
        }));
        assert!(describe(&errors).contains("$.cost_breakdowns[0].amount"));
    }

    #[test]
    fn rejects_non_object_documents() {
        let errors = check(&calculation_result_typedef(), &json!([1, 2])).unwrap_err();
        assert_eq!(
            errors,
            vec![SchemaError::TypeMismatch {
                path: "$".into(),
                expected: "object",
                found: "array",
            }]
        );
    }
}
