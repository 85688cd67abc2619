//! Action registry (spec §4.5): the set of actions a gateway exposes, their
//! parameter schemas, and the trust threshold each requires.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::Array => value.is_array(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParamSchema {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub required: bool,
    pub description: String,
}

/// Context the registry forwards into a handler: who is acting, and at what
/// reputation score.
pub struct AgentContext {
    pub agent_id: Uuid,
    pub external_id: String,
    pub score: u8,
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn call(&self, params: Value, ctx: &AgentContext) -> Result<Value, String>;
}

/// A handler built from a plain closure, for the common case of a
/// synchronous, infallible-to-construct action body.
pub struct FnHandler<F>(pub F)
where
    F: Fn(Value, &AgentContext) -> Result<Value, String> + Send + Sync;

#[async_trait]
impl<F> ActionHandler for FnHandler<F>
where
    F: Fn(Value, &AgentContext) -> Result<Value, String> + Send + Sync,
{
    async fn call(&self, params: Value, ctx: &AgentContext) -> Result<Value, String> {
        (self.0)(params, ctx)
    }
}

pub struct ActionDefinition {
    pub name: String,
    pub description: String,
    pub min_score: u8,
    pub parameters: HashMap<String, ParamSchema>,
    pub handler: Box<dyn ActionHandler>,
}

#[derive(Debug, Serialize)]
pub struct ActionSummary {
    pub name: String,
    pub description: String,
    #[serde(rename = "minScore")]
    pub min_score: u8,
    pub parameters: HashMap<String, ParamSchema>,
}

pub enum ExecuteOutcome {
    Success { data: Value },
    Failure { error: String },
}

#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, ActionDefinition>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: ActionDefinition) {
        self.actions.insert(action.name.clone(), action);
    }

    pub fn get(&self, name: &str) -> Option<&ActionDefinition> {
        self.actions.get(name)
    }

    /// spec §4.5 `list`: public view, handlers stripped.
    pub fn list(&self) -> Vec<ActionSummary> {
        let mut summaries: Vec<ActionSummary> = self
            .actions
            .values()
            .map(|a| ActionSummary {
                name: a.name.clone(),
                description: a.description.clone(),
                min_score: a.min_score,
                parameters: a.parameters.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// spec §4.5 `validate`: ordered violation strings — missing required
    /// fields, type mismatches, unknown parameter names.
    pub fn validate(&self, name: &str, params: &Value) -> Vec<String> {
        let Some(action) = self.actions.get(name) else {
            return vec![format!("unknown action '{name}'")];
        };

        let mut violations = Vec::new();
        let supplied = params.as_object().cloned().unwrap_or_default();

        for (param_name, schema) in &action.parameters {
            match supplied.get(param_name) {
                None if schema.required => {
                    violations.push(format!("missing required parameter '{param_name}'"));
                }
                Some(value) if !schema.param_type.matches(value) => {
                    violations.push(format!(
                        "parameter '{param_name}' must be of type {}",
                        schema.param_type.name()
                    ));
                }
                _ => {}
            }
        }

        for supplied_name in supplied.keys() {
            if !action.parameters.contains_key(supplied_name) {
                violations.push(format!("unknown parameter '{supplied_name}'"));
            }
        }

        violations
    }

    /// spec §4.5 `execute`. `scoreMet` is computed here so the pipeline can
    /// forward it into the behavior tracker regardless of outcome.
    pub async fn execute(
        &self,
        name: &str,
        params: Value,
        ctx: &AgentContext,
    ) -> (ExecuteOutcome, bool) {
        let Some(action) = self.actions.get(name) else {
            return (
                ExecuteOutcome::Failure { error: format!("unknown action '{name}'") },
                false,
            );
        };

        let score_met = ctx.score >= action.min_score;
        if !score_met {
            return (
                ExecuteOutcome::Failure {
                    error: format!(
                        "Insufficient reputation score: {} < {}",
                        ctx.score, action.min_score
                    ),
                },
                false,
            );
        }

        let violations = self.validate(name, &params);
        if !violations.is_empty() {
            return (
                ExecuteOutcome::Failure { error: violations.join("; ") },
                score_met,
            );
        }

        match action.handler.call(params, ctx).await {
            Ok(data) => (ExecuteOutcome::Success { data }, score_met),
            Err(error) => (ExecuteOutcome::Failure { error }, score_met),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry_with_search() -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        let mut parameters = HashMap::new();
        parameters.insert(
            "query".to_string(),
            ParamSchema {
                param_type: ParamType::String,
                required: true,
                description: "search text".into(),
            },
        );
        registry.register(ActionDefinition {
            name: "search".into(),
            description: "search the index".into(),
            min_score: 30,
            parameters,
            handler: Box::new(FnHandler(|params, _ctx| {
                let query = params["query"].as_str().unwrap_or_default();
                Ok(json!([query]))
            })),
        });
        registry
    }

    #[test]
    fn validate_reports_missing_required_field() {
        let registry = registry_with_search();
        let violations = registry.validate("search", &json!({}));
        assert_eq!(violations, vec!["missing required parameter 'query'"]);
    }

    #[test]
    fn validate_reports_unknown_parameter() {
        let registry = registry_with_search();
        let violations = registry.validate("search", &json!({"query": "x", "extra": 1}));
        assert_eq!(violations, vec!["unknown parameter 'extra'"]);
    }

    #[tokio::test]
    async fn execute_denies_below_min_score() {
        let registry = registry_with_search();
        let ctx = AgentContext {
            agent_id: Uuid::new_v4(),
            external_id: "a".into(),
            score: 10,
        };
        let (outcome, score_met) = registry.execute("search", json!({"query": "x"}), &ctx).await;
        assert!(!score_met);
        assert!(matches!(outcome, ExecuteOutcome::Failure { .. }));
    }

    #[tokio::test]
    async fn execute_runs_handler_when_valid() {
        let registry = registry_with_search();
        let ctx = AgentContext {
            agent_id: Uuid::new_v4(),
            external_id: "a".into(),
            score: 50,
        };
        let (outcome, score_met) = registry.execute("search", json!({"query": "x"}), &ctx).await;
        assert!(score_met);
        match outcome {
            ExecuteOutcome::Success { data } => assert_eq!(data, json!(["x"])),
            ExecuteOutcome::Failure { error } => panic!("expected success, got {error}"),
        }
    }
}
