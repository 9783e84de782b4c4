//! Maps completed calls to what the session should do with them.

use std::collections::HashMap;

use serde_json::{json, Value};

use super::ReadyInvocation;
use crate::config::OperationSpec;

/// How one call is carried out.
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    /// Sent to the specialist network; the result arrives later.
    Forward {
        call_id: String,
        anchor: Option<String>,
        operation: String,
        request: String,
    },
    /// Answered locally with `output` (a JSON document).
    Inline {
        call_id: String,
        anchor: Option<String>,
        output: String,
    },
}

/// Configured operations, by name.
#[derive(Debug, Clone, Default)]
pub struct OperationCatalog {
    operations: HashMap<String, OperationSpec>,
}

impl OperationCatalog {
    pub fn new(specs: &[OperationSpec]) -> Self {
        Self {
            operations: specs.iter().map(|s| (s.name.clone(), s.clone())).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    pub fn plan(&self, call: &ReadyInvocation) -> Execution {
        let Some(spec) = self.operations.get(&call.name) else {
            log::warn!("session: call {} names unknown operation {}", call.call_id, call.name);
            return Execution::Inline {
                call_id: call.call_id.clone(),
                anchor: call.anchor.clone(),
                output: json!({ "error": format!("unknown operation: {}", call.name) })
                    .to_string(),
            };
        };

        if !spec.forward_to_specialist {
            return Execution::Inline {
                call_id: call.call_id.clone(),
                anchor: call.anchor.clone(),
                output: json!({ "ok": true }).to_string(),
            };
        }

        let request = match call.arguments.get(&spec.request_field) {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => call.arguments.to_string(),
        };
        Execution::Forward {
            call_id: call.call_id.clone(),
            anchor: call.anchor.clone(),
            operation: spec.name.clone(),
            request,
        }
    }
}
