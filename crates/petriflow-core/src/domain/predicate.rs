use serde_json::Value;

use super::identifier::TaskId;
use super::specification::{Decomposition, ParamType};
use crate::{CoreError, DataPacket};

/// Evaluates split predicates against net data
pub trait PredicateEvaluator: Send + Sync {
    /// Evaluate `expression` with `data` as the root document
    fn evaluate(&self, expression: &str, data: &DataPacket) -> Result<bool, CoreError>;
}

/// Default predicate evaluator using JMESPath truthiness
#[derive(Debug, Default, Clone, Copy)]
pub struct JmesPathEvaluator;

impl PredicateEvaluator for JmesPathEvaluator {
    fn evaluate(&self, expression: &str, data: &DataPacket) -> Result<bool, CoreError> {
        let compiled = jmespath::compile(expression).map_err(|e| {
            CoreError::PredicateError(format!(
                "Failed to compile JMESPath expression: {}: {}",
                expression, e
            ))
        })?;
        let result = compiled.search(data.as_value()).map_err(|e| {
            CoreError::PredicateError(format!(
                "Failed to evaluate JMESPath expression: {}: {}",
                expression, e
            ))
        })?;
        Ok(result.is_truthy())
    }
}

/// Checks work item output before it reaches the net
pub trait DataValidator: Send + Sync {
    /// Validate `output` for `task` against its decomposition
    fn validate(
        &self,
        task: &TaskId,
        decomposition: &Decomposition,
        output: &DataPacket,
    ) -> Result<(), CoreError>;
}

/// Default validator: required output parameters present with the declared type
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaValidator;

impl DataValidator for SchemaValidator {
    fn validate(
        &self,
        task: &TaskId,
        decomposition: &Decomposition,
        output: &DataPacket,
    ) -> Result<(), CoreError> {
        if decomposition.output_params.is_empty() {
            return Ok(());
        }
        let fields = output.as_object().ok_or_else(|| {
            CoreError::ValidationError(format!("Output of task {} must be an object", task))
        })?;

        for param in &decomposition.output_params {
            match fields.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(CoreError::ValidationError(format!(
                        "Task {} output is missing required parameter {}",
                        task, param.name
                    )));
                }
                Some(value) if !value.is_null() && !type_matches(param.param_type, value) => {
                    return Err(CoreError::ValidationError(format!(
                        "Task {} output parameter {} should be {:?}",
                        task, param.name, param.param_type
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn type_matches(expected: ParamType, value: &Value) -> bool {
    match expected {
        ParamType::Any => true,
        ParamType::String => value.is_string(),
        ParamType::Number => value.is_number(),
        ParamType::Integer => value.is_i64() || value.is_u64(),
        ParamType::Boolean => value.is_boolean(),
        ParamType::Object => value.is_object(),
        ParamType::Array => value.is_array(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identifier::DecompositionId;
    use crate::domain::specification::{DecompositionKind, OutputParam};
    use serde_json::json;

    fn approval() -> Decomposition {
        Decomposition {
            id: DecompositionId::from("approval"),
            kind: DecompositionKind::Manual,
            output_params: vec![
                OutputParam {
                    name: "approved".to_string(),
                    param_type: ParamType::Boolean,
                    required: true,
                },
                OutputParam {
                    name: "comment".to_string(),
                    param_type: ParamType::String,
                    required: false,
                },
            ],
        }
    }

    #[test]
    fn test_jmespath_truthiness() {
        let evaluator = JmesPathEvaluator;
        let data = DataPacket::new(json!({"order": {"total": 120, "rush": false}, "tags": []}));

        assert!(evaluator.evaluate("order.total > `100`", &data).unwrap());
        assert!(!evaluator.evaluate("order.rush", &data).unwrap());
        assert!(!evaluator.evaluate("tags", &data).unwrap());
        assert!(!evaluator.evaluate("missing", &data).unwrap());
    }

    #[test]
    fn test_jmespath_syntax_error() {
        let result = JmesPathEvaluator.evaluate("order.[", &DataPacket::empty());
        assert!(matches!(result, Err(CoreError::PredicateError(_))));
    }

    #[test]
    fn test_schema_accepts_valid_output() {
        let output = DataPacket::new(json!({"approved": true}));
        assert!(SchemaValidator
            .validate(&TaskId::from("approve"), &approval(), &output)
            .is_ok());
    }

    #[test]
    fn test_schema_rejects_missing_required() {
        let output = DataPacket::new(json!({"comment": "later"}));
        let result = SchemaValidator.validate(&TaskId::from("approve"), &approval(), &output);
        assert!(matches!(result, Err(CoreError::ValidationError(_))));
    }

    #[test]
    fn test_schema_rejects_wrong_type() {
        let output = DataPacket::new(json!({"approved": "yes"}));
        let result = SchemaValidator.validate(&TaskId::from("approve"), &approval(), &output);
        assert!(matches!(result, Err(CoreError::ValidationError(_))));
    }

    #[test]
    fn test_schema_rejects_non_object() {
        let result = SchemaValidator.validate(
            &TaskId::from("approve"),
            &approval(),
            &DataPacket::new(json!(42)),
        );
        assert!(matches!(result, Err(CoreError::ValidationError(_))));
    }
}
