use std::collections::HashMap;

use serde::Serializer;
use serde_json::{Map, Value};

use crate::util::{DenyReason, VerificationOutcome};

pub const PRINCIPAL_ID: &str = "user";
pub const POLICY_VERSION: &str = "2012-10-17";
pub const INVOKE_ACTION: &str = "execute-api:Invoke";
pub const SIG_CHECK_CONTEXT_KEY: &str = "discord-check-sig";
/// Resource for denials issued before the event's `methodArn` is known.
pub const UNSCOPED_RESOURCE: &str = "*";

/// An API Gateway REQUEST authorizer event.
#[derive(serde::Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizerRequest {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub method_arn: String,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub http_method: Option<String>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(serde::Serialize, Copy, Clone, Debug, Eq, PartialEq)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(serde::Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    pub action: Vec<String>,
    pub effect: Effect,
    pub resource: Vec<String>,
}

#[derive(serde::Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<Statement>,
}

#[derive(serde::Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationDecision {
    pub principal_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_document: Option<PolicyDocument>,
    pub context: Map<String, Value>,
}

impl AuthorizationDecision {
    /// The effect of the first statement, if the decision carries a policy.
    pub fn effect(&self) -> Option<Effect> {
        self.policy_document
            .as_ref()
            .and_then(|doc| doc.statement.first())
            .map(|statement| statement.effect)
    }
}

/// Maps a verification outcome onto the decision handed back to the gateway.
///
/// The context marker only records that the check ran. With an empty
/// `resource` there is nothing to scope a grant to, so no policy is attached.
pub fn build_decision(outcome: &VerificationOutcome, resource: &str) -> AuthorizationDecision {
    let effect = if outcome.is_authorized() {
        Effect::Allow
    } else {
        Effect::Deny
    };
    let policy_document = (!resource.is_empty()).then(|| PolicyDocument {
        version: POLICY_VERSION.to_owned(),
        statement: vec![Statement {
            action: vec![INVOKE_ACTION.to_owned()],
            effect,
            resource: vec![resource.to_owned()],
        }],
    });
    let mut context = Map::new();
    context.insert(SIG_CHECK_CONTEXT_KEY.to_owned(), Value::Bool(true));
    AuthorizationDecision {
        principal_id: PRINCIPAL_ID.to_owned(),
        policy_document,
        context,
    }
}

/// A decision paired with the reason it was denied, if it was.
///
/// Whenever `error` is present the request must be treated as denied,
/// whatever the decision itself says.
#[derive(serde::Serialize, Debug)]
pub struct Authorization {
    #[serde(flatten)]
    pub decision: AuthorizationDecision,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_reason"
    )]
    pub error: Option<DenyReason>,
}

impl Authorization {
    pub fn new(outcome: VerificationOutcome, resource: &str) -> Self {
        let decision = build_decision(&outcome, resource);
        let error = match outcome {
            VerificationOutcome::Authorized => None,
            VerificationOutcome::Denied(reason) => Some(reason),
        };
        Self { decision, error }
    }

    pub fn is_allowed(&self) -> bool {
        self.error.is_none() && self.decision.effect() == Some(Effect::Allow)
    }
}

fn serialize_reason<S: Serializer>(reason: &Option<DenyReason>, s: S) -> Result<S::Ok, S::Error> {
    match reason {
        Some(reason) => s.collect_str(reason),
        None => s.serialize_none(),
    }
}
