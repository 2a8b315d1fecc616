//! Cluster action dispatch.
//!
//! The daemon supports two request shapes for node actions. A single-node
//! request is one synchronous GET. A multi-node request is a POST that the
//! daemon offloads to a background job; the returned request id is polled on
//! a fixed interval until the status endpoint stops answering 200, which is
//! the normal completion signal (404 means the job record already expired).
//! Polling is an explicit bounded loop holding the job id and an outcomes
//! accumulator; outcomes only ever move from pending to a terminal state.

use crate::client::{ClientError, DaemonClient};
use crate::hostlist;
use crate::models::{
    interpret_response, parse_control_body, status_message, ActionRequest, ControlResponse,
    ControlUpdate, NodeOutcome,
};
use std::collections::BTreeMap;
use std::time::Duration;

/// Fixed pause between job status polls.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Upper bound on polls so a wedged daemon job cannot hold the client
/// forever (30 minutes at the default interval).
const MAX_POLLS: u32 = 900;

/// Per-node outcome accumulator, ordered by submission order.
#[derive(Debug, Clone)]
pub struct ActionOutcomes {
    order: Vec<String>,
    map: BTreeMap<String, NodeOutcome>,
}

impl ActionOutcomes {
    #[must_use]
    pub fn new(nodes: Vec<String>) -> Self {
        let map = nodes
            .iter()
            .map(|n| (n.clone(), NodeOutcome::Pending))
            .collect();
        Self { order: nodes, map }
    }

    /// Merge one poll answer. `failed` entries are terminal and override
    /// anything; other buckets update any non-failed node. Nodes absent
    /// from the update keep whatever they had.
    pub fn merge(&mut self, update: ControlUpdate) {
        for (node, reason) in update.failed {
            self.upsert(node, NodeOutcome::Failed(reason), true);
        }
        for (node, outcome) in update.outcomes {
            self.upsert(node, outcome, false);
        }
    }

    fn upsert(&mut self, node: String, outcome: NodeOutcome, overrides_failed: bool) {
        if !self.map.contains_key(&node) {
            // daemon reported a node we did not submit; keep it visible
            self.order.push(node.clone());
        }
        let entry = self.map.entry(node).or_insert(NodeOutcome::Pending);
        if !overrides_failed && matches!(entry, NodeOutcome::Failed(_)) {
            return;
        }
        *entry = outcome;
    }

    /// Outcomes in submission order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &NodeOutcome)> {
        self.order
            .iter()
            .filter_map(|n| self.map.get(n).map(|o| (n.as_str(), o)))
    }

    #[must_use]
    pub fn get(&self, node: &str) -> Option<&NodeOutcome> {
        self.map.get(node)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// What a dispatch produced.
#[derive(Debug, Clone)]
pub enum DispatchResult {
    /// One report line for a single-node action.
    Single(String),
    /// Per-node outcomes of a batched action.
    Batch(ActionOutcomes),
}

/// Action dispatcher. Holds the poll cadence so tests can shrink it.
pub struct Dispatcher<'a> {
    client: &'a DaemonClient,
    poll_interval: Duration,
    max_polls: u32,
}

impl<'a> Dispatcher<'a> {
    #[must_use]
    pub fn new(client: &'a DaemonClient) -> Self {
        Self {
            client,
            poll_interval: POLL_INTERVAL,
            max_polls: MAX_POLLS,
        }
    }

    #[cfg(test)]
    fn with_poll_interval(client: &'a DaemonClient, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
            max_polls: MAX_POLLS,
        }
    }

    /// Run one action request to its terminal state.
    ///
    /// Transport errors (SSL, timeout, redirect loops, refused connections)
    /// are returned as-is for the caller to report fatally; daemon-level
    /// rejections become report lines instead.
    pub async fn dispatch(&self, request: &ActionRequest) -> Result<DispatchResult, ClientError> {
        if request.is_single_target() {
            self.dispatch_single(request).await
        } else {
            self.dispatch_batch(request).await
        }
    }

    async fn dispatch_single(
        &self,
        request: &ActionRequest,
    ) -> Result<DispatchResult, ClientError> {
        let node = &request.targets;
        let path = format!(
            "/control/action/{}/{}/_{}",
            request.subsystem.as_str(),
            node,
            request.action
        );
        let response = self.client.get(&path).await?;

        if let Some(message) = status_message(response.status) {
            return Ok(DispatchResult::Single(format!(
                "{}: failed: {}",
                node, message
            )));
        }

        match interpret_response(
            response.status,
            &response.body,
            request.subsystem,
            &request.action,
        ) {
            ControlResponse::Confirmed => Ok(DispatchResult::Single(format!(
                "{}: {}",
                node, request.action
            ))),
            ControlResponse::SubsystemStatus(status) => {
                Ok(DispatchResult::Single(format!("{}: {}", node, status)))
            }
            ControlResponse::Outcomes(update) | ControlResponse::Accepted { initial: update, .. } => {
                let mut outcomes = ActionOutcomes::new(vec![node.clone()]);
                outcomes.merge(update);
                Ok(DispatchResult::Batch(outcomes))
            }
            ControlResponse::Unrecognized { status, body } => Ok(DispatchResult::Single(
                format!("ERROR :: [{}]: {}", status, body),
            )),
        }
    }

    async fn dispatch_batch(&self, request: &ActionRequest) -> Result<DispatchResult, ClientError> {
        let path = format!(
            "/control/action/{}/_{}",
            request.subsystem.as_str(),
            request.action
        );
        let response = self.client.post(&path, &request.submit_body()).await?;

        if let Some(message) = status_message(response.status) {
            return Ok(DispatchResult::Single(format!(
                "{}: failed: {}",
                request.targets, message
            )));
        }

        // the submitted order is the report order
        let nodes = hostlist::expand(&request.targets).unwrap_or_default();
        let mut outcomes = ActionOutcomes::new(nodes);

        match interpret_response(
            response.status,
            &response.body,
            request.subsystem,
            &request.action,
        ) {
            ControlResponse::Accepted {
                request_id,
                initial,
            } => {
                outcomes.merge(initial);
                self.poll(request, request_id, &mut outcomes).await?;
                Ok(DispatchResult::Batch(outcomes))
            }
            ControlResponse::Outcomes(update) => {
                outcomes.merge(update);
                Ok(DispatchResult::Batch(outcomes))
            }
            ControlResponse::Confirmed => Ok(DispatchResult::Single(format!(
                "{}: {}",
                request.targets, request.action
            ))),
            ControlResponse::SubsystemStatus(status) => Ok(DispatchResult::Single(format!(
                "{}: {}",
                request.targets, status
            ))),
            ControlResponse::Unrecognized { status, body } => {
                Ok(DispatchResult::Single(format!("{} ::: {}", status, body)))
            }
        }
    }

    /// Poll the job until the status endpoint stops answering 200.
    async fn poll(
        &self,
        request: &ActionRequest,
        request_id: String,
        outcomes: &mut ActionOutcomes,
    ) -> Result<(), ClientError> {
        let path = format!("/control/status/{}", request_id);

        for poll in 0..self.max_polls {
            tokio::time::sleep(self.poll_interval).await;

            let response = self.client.get(&path).await?;
            if response.status != 200 {
                // normal termination: the job completed and its record
                // is gone; 404 is not an error here
                tracing::debug!(request_id = %request_id, status = response.status, poll, "job polling finished");
                return Ok(());
            }
            if let Some(body) = response.json() {
                outcomes.merge(parse_control_body(
                    &body,
                    request.subsystem,
                    &request.action,
                ));
            }
        }

        tracing::debug!(request_id = %request_id, "giving up on job after poll limit");
        Ok(())
    }
}

/// Fetch the SEL entries of one node. The daemon separates entries with
/// `;;`; they are returned one per line.
pub async fn sel_list(client: &DaemonClient, node: &str) -> Result<String, ClientError> {
    let response = client
        .get(&format!("/control/action/sel/{}/_list", node))
        .await?;
    if !response.is_success() {
        return Err(ClientError::Status {
            status: response.status,
            body: response.body,
        });
    }
    Ok(response.body.replace(";;", "\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::Subsystem;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> DaemonClient {
        let mut config = Config::default();
        config.api.endpoint = server.uri().strip_prefix("http://").unwrap().to_string();
        config.api.protocol = "http".to_string();
        config.api.username = "admin".to_string();
        config.api.password = "secret".to_string();
        config.api.timeout = 5;
        DaemonClient::new(&config).unwrap()
    }

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "tok"})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_single_node_204_confirms_action() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/control/action/power/cnode01/_on"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let request = ActionRequest::new(Subsystem::Power, "on", "cnode01").unwrap();
        let result = Dispatcher::new(&client).dispatch(&request).await.unwrap();
        match result {
            DispatchResult::Single(line) => assert_eq!(line, "cnode01: on"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_single_node_known_status_maps_through_table() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/control/action/power/cnode01/_on"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let request = ActionRequest::new(Subsystem::Power, "on", "cnode01").unwrap();
        let result = Dispatcher::new(&client).dispatch(&request).await.unwrap();
        match result {
            DispatchResult::Single(line) => {
                assert_eq!(line, "cnode01: failed: service not available");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_single_node_scalar_power_status() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/control/action/power/cnode01/_status"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"control": {"power": "on"}})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let request = ActionRequest::new(Subsystem::Power, "status", "cnode01").unwrap();
        let result = Dispatcher::new(&client).dispatch(&request).await.unwrap();
        match result {
            DispatchResult::Single(line) => assert_eq!(line, "cnode01: on"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_batch_submit_poll_until_404() {
        let server = MockServer::start().await;
        mount_token(&server).await;

        Mock::given(method("POST"))
            .and(path("/control/action/power/_on"))
            .and(body_json(
                json!({"control": {"power": {"on": {"hostlist": "cnode[01-03]"}}}}),
            ))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"control": {"power": {"request_id": "42"}}})),
            )
            .mount(&server)
            .await;

        // three 200 answers with growing ok lists, then 404
        for ok in [
            json!(["cnode01"]),
            json!(["cnode01", "cnode02"]),
            json!(["cnode01", "cnode02", "cnode03"]),
        ] {
            Mock::given(method("GET"))
                .and(path("/control/status/42"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(json!({"control": {"power": {"ok": ok}}})),
                )
                .up_to_n_times(1)
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/control/status/42"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let request = ActionRequest::new(Subsystem::Power, "on", "cnode[01-03]").unwrap();
        let dispatcher = Dispatcher::with_poll_interval(&client, Duration::from_millis(10));
        let result = dispatcher.dispatch(&request).await.unwrap();

        match result {
            DispatchResult::Batch(outcomes) => {
                assert_eq!(outcomes.len(), 3);
                for node in ["cnode01", "cnode02", "cnode03"] {
                    assert_eq!(
                        outcomes.get(node),
                        Some(&NodeOutcome::Ok("on".to_string())),
                        "{}",
                        node
                    );
                }
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_batch_rejection_is_terminal_without_polling() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("POST"))
            .and(path("/control/action/power/_on"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let request = ActionRequest::new(Subsystem::Power, "on", "cnode[01-02]").unwrap();
        let result = Dispatcher::new(&client).dispatch(&request).await.unwrap();
        match result {
            DispatchResult::Single(line) => {
                assert_eq!(line, "cnode[01-02]: failed: invalid request");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sel_list_splits_entries() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/control/action/sel/cnode01/_list"))
            .respond_with(ResponseTemplate::new(200).set_body_string("entry1;;entry2;;entry3"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let listing = sel_list(&client, "cnode01").await.unwrap();
        assert_eq!(listing, "entry1\nentry2\nentry3");
    }

    #[test]
    fn test_merge_is_monotonic() {
        let mut outcomes = ActionOutcomes::new(vec!["a".to_string(), "b".to_string()]);

        let mut first = ControlUpdate::default();
        first
            .outcomes
            .push(("a".to_string(), NodeOutcome::Ok("on".to_string())));
        outcomes.merge(first);

        // a later update lacking node a must not erase its outcome
        let mut second = ControlUpdate::default();
        second
            .outcomes
            .push(("b".to_string(), NodeOutcome::Ok("on".to_string())));
        outcomes.merge(second);

        assert_eq!(outcomes.get("a"), Some(&NodeOutcome::Ok("on".to_string())));
        assert_eq!(outcomes.get("b"), Some(&NodeOutcome::Ok("on".to_string())));
    }

    #[test]
    fn test_merge_failed_overrides_and_sticks() {
        let mut outcomes = ActionOutcomes::new(vec!["a".to_string()]);

        let mut failed = ControlUpdate::default();
        failed.failed.push(("a".to_string(), "BMC timeout".to_string()));
        outcomes.merge(failed);

        // a non-failed update arriving afterwards does not resurrect the node
        let mut late_ok = ControlUpdate::default();
        late_ok
            .outcomes
            .push(("a".to_string(), NodeOutcome::Ok("on".to_string())));
        outcomes.merge(late_ok);

        assert_eq!(
            outcomes.get("a"),
            Some(&NodeOutcome::Failed("BMC timeout".to_string()))
        );
    }

    #[test]
    fn test_unsubmitted_node_is_appended() {
        let mut outcomes = ActionOutcomes::new(vec!["a".to_string()]);
        let mut update = ControlUpdate::default();
        update
            .outcomes
            .push(("surprise".to_string(), NodeOutcome::Status("off".to_string())));
        outcomes.merge(update);

        let order: Vec<&str> = outcomes.iter().map(|(n, _)| n).collect();
        assert_eq!(order, vec!["a", "surprise"]);
    }
}
