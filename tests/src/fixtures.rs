//! Process definitions used by the scenarios.
//!
//! Flow node ids double as names, see [`ProcessBuilder`].

use runnel_core::{
    CatchMessageTrigger, ConnectorDefinition, ConnectorEvent, Expression, GatewayKind, Operation, ProcessDefinition,
    ReturnType,
};
use runnel_test_utils::builders::{catch, correlation};
use runnel_test_utils::ProcessBuilder;

/// start -> validate -> ship -> end
pub fn linear() -> ProcessDefinition {
    ProcessBuilder::new("linear", "Linear")
        .start("start")
        .task("validate")
        .task("ship")
        .end("end")
        .sequence(&["start", "validate", "ship", "end"])
        .build()
}

/// Exclusive gateway sending big amounts to `review`, anything else to
/// `autoApprove`
pub fn amount_routing() -> ProcessDefinition {
    ProcessBuilder::new("amount-routing", "AmountRouting")
        .start("start")
        .gateway("route", GatewayKind::Exclusive)
        .end("review")
        .end("autoApprove")
        .flow("start", "route")
        .conditional_flow(
            "route",
            "review",
            "toReview",
            Expression::query("isBig", "amount > `100`", ReturnType::Boolean),
        )
        .default_flow("route", "autoApprove")
        .build()
}

/// Parallel split into `pack` and `invoice`, merged again before the end
pub fn split_and_merge() -> ProcessDefinition {
    ProcessBuilder::new("split-merge", "SplitMerge")
        .start("start")
        .gateway("split", GatewayKind::Parallel)
        .task("pack")
        .task("invoice")
        .gateway("join", GatewayKind::Parallel)
        .end("end")
        .flow("start", "split")
        .flow("split", "pack")
        .flow("split", "invoice")
        .flow("pack", "join")
        .flow("invoice", "join")
        .flow("join", "end")
        .build()
}

/// Gateway whose only condition reads the `approved` variable
pub fn approval_check() -> ProcessDefinition {
    ProcessBuilder::new("approval-check", "ApprovalCheck")
        .start("start")
        .gateway("check", GatewayKind::Exclusive)
        .end("approvedEnd")
        .end("rejectedEnd")
        .flow("start", "check")
        .conditional_flow(
            "check",
            "approvedEnd",
            "toApproved",
            Expression::variable("approvedCheck", "approved", ReturnType::Boolean),
        )
        .default_flow("check", "rejectedEnd")
        .build()
}

/// start -> charge -> end, `charge` running its registered behavior
pub fn single_task(id: &str, name: &str) -> ProcessDefinition {
    ProcessBuilder::new(id, name)
        .start("start")
        .task("charge")
        .end("end")
        .sequence(&["start", "charge", "end"])
        .build()
}

/// Connector named `notifier` of implementation `definition_id`, posting to
/// a constant url and storing its `status` output
pub fn notifier(definition_id: &str, activation_event: ConnectorEvent) -> ConnectorDefinition {
    ConnectorDefinition {
        name: "notifier".to_string(),
        definition_id: definition_id.to_string(),
        activation_event,
        inputs: vec![("url".to_string(), Expression::text("url", "https://example.org/hook"))],
        outputs: vec![Operation {
            target: "status".to_string(),
            expression: Expression::variable("statusOutput", "status", ReturnType::Integer),
        }],
    }
}

/// start -> notify (connector) -> end
pub fn with_connector(connector: ConnectorDefinition) -> ProcessDefinition {
    ProcessBuilder::new("notification", "Notification")
        .start("start")
        .task_with_connector("notify", connector)
        .end("end")
        .sequence(&["start", "notify", "end"])
        .build()
}

/// Catch trigger of `shipped`, correlated on the `order` variable and
/// copying the `carrier` message data
pub fn shipped_trigger() -> CatchMessageTrigger {
    let mut trigger = catch("shipped");
    trigger.correlations.push(correlation("orderId", "order"));
    trigger.operations.push(Operation {
        target: "carrier".to_string(),
        expression: Expression::variable("carrierData", "carrier", ReturnType::String),
    });
    trigger
}

/// start -> awaitShipment (catch `shipped`) -> end
pub fn shipping() -> ProcessDefinition {
    ProcessBuilder::new("shipping", "Shipping")
        .start("start")
        .catch_event("awaitShipment", shipped_trigger())
        .end("end")
        .sequence(&["start", "awaitShipment", "end"])
        .build()
}

/// Started by the `newOrder` message only, copying its `amount` data
pub fn order_intake() -> ProcessDefinition {
    let mut trigger = catch("newOrder");
    trigger.operations.push(Operation {
        target: "amount".to_string(),
        expression: Expression::variable("amountData", "amount", ReturnType::Integer),
    });
    ProcessBuilder::new("order-intake", "OrderIntake")
        .message_start("onOrder", trigger)
        .task("register")
        .end("end")
        .sequence(&["onOrder", "register", "end"])
        .build()
}

/// `review` waits for `approve`; an interrupting `escalate` boundary event
/// routes to `escalated`
pub fn review_with_escalation() -> ProcessDefinition {
    ProcessBuilder::new("review", "Review")
        .start("start")
        .receive_task("review", catch("approve"))
        .boundary_event("review", "escalation", catch("escalate"), true)
        .end("done")
        .end("escalated")
        .sequence(&["start", "review", "done"])
        .flow("escalation", "escalated")
        .build()
}

/// Waits for `payment`; an interrupting event sub-process handles `cancelOrder`
pub fn order_with_cancellation_handler() -> ProcessDefinition {
    let handler = ProcessBuilder::content()
        .message_start("cancelRequested", catch("cancelOrder"))
        .task("refund")
        .end("handled")
        .sequence(&["cancelRequested", "refund", "handled"]);
    ProcessBuilder::new("order", "Order")
        .start("start")
        .receive_task("awaitPayment", catch("payment"))
        .end("end")
        .sequence(&["start", "awaitPayment", "end"])
        .event_sub_process("cancellationHandler", handler, true)
        .build()
}

/// Parallel branches: one waits for `never`, the other reaches a terminate
/// end event
pub fn terminated_early() -> ProcessDefinition {
    ProcessBuilder::new("terminate", "Terminate")
        .start("start")
        .gateway("split", GatewayKind::Parallel)
        .receive_task("wait", catch("never"))
        .task("work")
        .terminate_end("stop")
        .end("end")
        .flow("start", "split")
        .flow("split", "wait")
        .flow("split", "work")
        .flow("work", "stop")
        .flow("wait", "end")
        .build()
}

/// start -> awaitSignal (receive `signal`) -> end
pub fn waiting() -> ProcessDefinition {
    ProcessBuilder::new("waiting", "Waiting")
        .start("start")
        .receive_task("awaitSignal", catch("signal"))
        .end("end")
        .sequence(&["start", "awaitSignal", "end"])
        .build()
}

/// Embedded sub-process running `inner` between `start` and `end`
pub fn with_sub_process() -> ProcessDefinition {
    let content = ProcessBuilder::content()
        .start("innerStart")
        .task("inner")
        .end("innerEnd")
        .sequence(&["innerStart", "inner", "innerEnd"]);
    ProcessBuilder::new("nested", "Nested")
        .start("start")
        .sub_process("sub", content)
        .end("end")
        .sequence(&["start", "sub", "end"])
        .build()
}
