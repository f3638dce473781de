//! Shared node bodies for the integration tests: small, deterministic
//! `Node` implementations exercising one behavior each rather than one
//! do-everything fixture.

use async_trait::async_trait;
use latticeflow::node::{Command, Node, NodeContext, NodeError, NodePartial};
use latticeflow::state::StateSnapshot;
use serde_json::json;

/// Increments the `counter` field by one.
pub struct Increment;

#[async_trait]
impl Node for Increment {
    async fn run(&self, snapshot: StateSnapshot, _ctx: NodeContext) -> Result<NodePartial, NodeError> {
        let counter = snapshot.get("counter").and_then(|v| v.as_i64()).unwrap_or(0);
        Ok(NodePartial::new().with_field("counter", json!(counter + 1)))
    }
}

/// Doubles the `counter` field.
pub struct Double;

#[async_trait]
impl Node for Double {
    async fn run(&self, snapshot: StateSnapshot, _ctx: NodeContext) -> Result<NodePartial, NodeError> {
        let counter = snapshot.get("counter").and_then(|v| v.as_i64()).unwrap_or(0);
        Ok(NodePartial::new().with_field("counter", json!(counter * 2)))
    }
}

/// Routes to `"even"` or `"odd"` depending on the parity of `counter`,
/// via an explicit `Command::GoTo` rather than a static edge.
pub struct ParityRouter;

#[async_trait]
impl Node for ParityRouter {
    async fn run(&self, snapshot: StateSnapshot, _ctx: NodeContext) -> Result<NodePartial, NodeError> {
        let counter = snapshot.get("counter").and_then(|v| v.as_i64()).unwrap_or(0);
        let symbol = if counter % 2 == 0 { "even" } else { "odd" };
        Ok(NodePartial::new().with_commands(vec![Command::GoTo(symbol.to_string())]))
    }
}

/// Appends its own id to the `visited` log field, for asserting which
/// nodes actually ran.
pub struct Log {
    pub id: &'static str,
}

#[async_trait]
impl Node for Log {
    async fn run(&self, _snapshot: StateSnapshot, _ctx: NodeContext) -> Result<NodePartial, NodeError> {
        Ok(NodePartial::new().with_field("visited", json!([self.id])))
    }
}

/// Fans out two independent values to `"collect"` via `RouteWithValue`
/// rather than a single `GoTo`, so the target is queued for two separate
/// invocations (spec §4.4 "Fan-out / replay semantics").
pub struct FanOutSplit;

#[async_trait]
impl Node for FanOutSplit {
    async fn run(&self, _snapshot: StateSnapshot, _ctx: NodeContext) -> Result<NodePartial, NodeError> {
        Ok(NodePartial::new().with_route_value("collect", json!(1)).with_route_value("collect", json!(2)))
    }
}

/// Appends whatever fan-out value it was dispatched with into `received`,
/// so a test can assert it ran once per queued value.
pub struct FanInCollect;

#[async_trait]
impl Node for FanInCollect {
    async fn run(&self, _snapshot: StateSnapshot, ctx: NodeContext) -> Result<NodePartial, NodeError> {
        let value = ctx.fan_in.clone().unwrap_or(json!(null));
        Ok(NodePartial::new().with_field("received", json!([value])))
    }
}

/// Sleeps for `delay` before completing, to exercise per-node timeouts and
/// the external hard-cancellation grace period.
pub struct SlowNode {
    pub delay: std::time::Duration,
}

#[async_trait]
impl Node for SlowNode {
    async fn run(&self, _snapshot: StateSnapshot, _ctx: NodeContext) -> Result<NodePartial, NodeError> {
        tokio::time::sleep(self.delay).await;
        Ok(NodePartial::new().with_field("finished", json!(true)))
    }
}

/// Raises a dynamic interrupt carrying `payload` the first time it runs;
/// on resume (when `ctx.resume` is populated) it records the resumed
/// value into `resumed_with` instead.
pub struct AskApproval {
    pub payload: serde_json::Value,
}

#[async_trait]
impl Node for AskApproval {
    async fn run(&self, _snapshot: StateSnapshot, ctx: NodeContext) -> Result<NodePartial, NodeError> {
        match ctx.resume.clone() {
            Some(value) => Ok(NodePartial::new().with_field("resumed_with", value)),
            None => Err(ctx.interrupt(self.payload.clone())),
        }
    }
}
