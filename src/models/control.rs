//! Request and response types for the daemon's `/control` API.
//!
//! The daemon answers action calls with a handful of loosely related JSON
//! shapes (confirmation without a body, per-node outcome buckets, an accepted
//! job carrying a request id, failure maps). Rather than sniffing for optional
//! keys all over the dispatcher, one parsing function reduces every body to
//! the closed [`ControlResponse`]/[`ControlUpdate`] set and downstream logic
//! matches on that.

use serde_json::Value;
use std::fmt;

/// Daemon control subsystems. Each restricts which actions are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    Power,
    Chassis,
    Sel,
}

impl Subsystem {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Subsystem::Power => "power",
            Subsystem::Chassis => "chassis",
            Subsystem::Sel => "sel",
        }
    }

    /// Actions the daemon accepts for this subsystem.
    #[must_use]
    pub fn legal_actions(self) -> &'static [&'static str] {
        match self {
            Subsystem::Power => &["status", "on", "off", "reset", "cycle"],
            Subsystem::Chassis => &["identify", "noidentify"],
            Subsystem::Sel => &["list", "clear"],
        }
    }

    pub fn validate_action(self, action: &str) -> Result<(), String> {
        if self.legal_actions().contains(&action) {
            Ok(())
        } else {
            Err(format!(
                "'{}' is not a valid {} action (expected one of: {})",
                action,
                self.as_str(),
                self.legal_actions().join(", ")
            ))
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One action to perform against a set of target nodes.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub subsystem: Subsystem,
    pub action: String,
    /// Hostlist expression; a single bare identifier routes to the
    /// synchronous path, anything else to the asynchronous one.
    pub targets: String,
}

impl ActionRequest {
    pub fn new(subsystem: Subsystem, action: &str, targets: &str) -> Result<Self, String> {
        subsystem.validate_action(action)?;
        Ok(Self {
            subsystem,
            action: action.to_string(),
            targets: targets.to_string(),
        })
    }

    /// Whether `targets` is a single bare node identifier.
    ///
    /// The routing decision is grammatical, not count-based: commas,
    /// brackets, and ranges all force the asynchronous path.
    #[must_use]
    pub fn is_single_target(&self) -> bool {
        !self.targets.is_empty()
            && self
                .targets
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    /// JSON body for the asynchronous submit call.
    #[must_use]
    pub fn submit_body(&self) -> Value {
        serde_json::json!({
            "control": {
                self.subsystem.as_str(): {
                    &self.action: { "hostlist": &self.targets }
                }
            }
        })
    }
}

/// Terminal outcome of an action for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Submitted, no terminal answer yet.
    Pending,
    /// Succeeded; message is the action name.
    Ok(String),
    /// Daemon-reported failure with a reason. Overrides any prior outcome.
    Failed(String),
    /// Daemon reported a non-ok bucket (e.g. power "on"/"off" for status
    /// queries); the bucket name is the message.
    Status(String),
}

/// Everything one control body told us: an optional request id plus per-node
/// outcome updates.
#[derive(Debug, Clone, Default)]
pub struct ControlUpdate {
    pub request_id: Option<String>,
    /// node -> failure reason
    pub failed: Vec<(String, String)>,
    /// node -> outcome message (action name for the "ok" bucket)
    pub outcomes: Vec<(String, NodeOutcome)>,
}

impl ControlUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.request_id.is_none() && self.failed.is_empty() && self.outcomes.is_empty()
    }
}

/// Parsed shape of a daemon control response.
#[derive(Debug, Clone)]
pub enum ControlResponse {
    /// HTTP 204: action confirmed, no body.
    Confirmed,
    /// Asynchronous job accepted; poll with the request id. The body may
    /// already carry initial outcome buckets.
    Accepted {
        request_id: String,
        initial: ControlUpdate,
    },
    /// Per-node outcomes with no job to poll.
    Outcomes(ControlUpdate),
    /// Single-node answers put a scalar status under the subsystem key.
    SubsystemStatus(String),
    /// A body we do not know how to handle, surfaced verbatim.
    Unrecognized { status: u16, body: String },
}

/// Reduce a daemon control answer to its [`ControlResponse`] shape.
///
/// This is the only place response shapes are sniffed; everything
/// downstream matches on the returned variant.
#[must_use]
pub fn interpret_response(
    status: u16,
    body: &str,
    subsystem: Subsystem,
    action: &str,
) -> ControlResponse {
    if status == 204 {
        return ControlResponse::Confirmed;
    }

    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return ControlResponse::Unrecognized {
            status,
            body: body.to_string(),
        };
    };

    // scalar status under control.<subsystem>, e.g. {"control": {"power": "on"}}
    if let Some(value) = json.get("control").and_then(|c| c.get(subsystem.as_str())) {
        match value {
            Value::String(s) => return ControlResponse::SubsystemStatus(s.clone()),
            Value::Null => {
                return ControlResponse::SubsystemStatus("no results returned".to_string())
            }
            _ => {}
        }
    }

    let update = parse_control_body(&json, subsystem, action);
    if let Some(request_id) = update.request_id.clone() {
        return ControlResponse::Accepted {
            request_id,
            initial: update,
        };
    }
    if !update.is_empty() {
        return ControlResponse::Outcomes(update);
    }
    ControlResponse::Unrecognized {
        status,
        body: body.to_string(),
    }
}

/// Reduce a control body to a [`ControlUpdate`].
///
/// The request id may appear at the top level, under a control group, or
/// under the subsystem key inside a group; all three spots are checked, the
/// deepest match winning. Within each group a `failed` sub-map assigns
/// node -> reason, and the sub-map under the subsystem key holds
/// category -> node-list buckets where `"ok"` means success,
/// `"request_id"` is not a bucket, and any other key is the outcome message.
#[must_use]
pub fn parse_control_body(body: &Value, subsystem: Subsystem, action: &str) -> ControlUpdate {
    let mut update = ControlUpdate::default();

    let Some(top) = body.as_object() else {
        return update;
    };

    if let Some(id) = scalar_to_string(top.get("request_id")) {
        update.request_id = Some(id);
    }

    for group in top.values() {
        let Some(group) = group.as_object() else {
            continue;
        };

        if let Some(id) = scalar_to_string(group.get("request_id")) {
            update.request_id = Some(id);
        }

        if let Some(failed) = group.get("failed").and_then(Value::as_object) {
            for (node, reason) in failed {
                let reason = scalar_to_string(Some(reason)).unwrap_or_default();
                update.failed.push((node.clone(), reason));
            }
        }

        let Some(buckets) = group.get(subsystem.as_str()).and_then(Value::as_object) else {
            continue;
        };

        if let Some(id) = scalar_to_string(buckets.get("request_id")) {
            update.request_id = Some(id);
        }

        for (bucket, nodes) in buckets {
            if bucket == "request_id" {
                continue;
            }
            for node in bucket_nodes(nodes) {
                let outcome = if bucket == "ok" {
                    NodeOutcome::Ok(action.to_string())
                } else {
                    NodeOutcome::Status(bucket.clone())
                };
                update.outcomes.push((node, outcome));
            }
        }
    }

    update
}

/// Fixed mapping of known daemon error statuses to operator-facing messages.
#[must_use]
pub fn status_message(status: u16) -> Option<&'static str> {
    match status {
        400 => Some("invalid request"),
        401 => Some("action not authorized"),
        404 => Some("node list invalid"),
        503 => Some("service not available"),
        _ => None,
    }
}

/// Node names from a bucket value. Buckets are usually arrays of names but
/// status endpoints have been seen returning node-keyed maps.
fn bucket_nodes(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Value::Object(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

fn scalar_to_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
