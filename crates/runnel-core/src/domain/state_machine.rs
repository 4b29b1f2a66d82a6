//! Per node-type state tables.
//!
//! Each table is a list of `(from, event, to)` triples built from three
//! families of states: the normal path, the abort path and the cancel path.
//! Node types accepting boundary events get a second table where the
//! initializing and interrupting states also take care of the boundary
//! event registrations.

use crate::domain::flow_node::{FlowNodeInstance, FlowNodeType};
use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// State of a flow node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowNodeState {
    /// Node created, not yet started
    Initializing,
    /// Node created with boundary events to instantiate
    InitializingWithBoundary,
    /// Node suspended until an external trigger (message) arrives
    Waiting,
    /// Node runs its own logic
    Executing,
    /// Sub-process waits for its children to finish
    Completing,
    /// Boundary events are aborted because the activity completed
    AbortingBoundaryOnCompleting,
    /// Node finished normally
    Completed,
    /// Node failed, see its failures
    Failed,
    /// Boundary events of an aborted activity are aborted
    AbortingWithBoundary,
    /// Node is being aborted
    Aborting,
    /// Node was aborted
    Aborted,
    /// Boundary events of a cancelled activity are aborted
    CancellingWithBoundary,
    /// Node is being cancelled
    Cancelling,
    /// Node was cancelled
    Cancelled,
}

impl FlowNodeState {
    /// Every state
    pub const ALL: [FlowNodeState; 14] = [
        FlowNodeState::Initializing,
        FlowNodeState::InitializingWithBoundary,
        FlowNodeState::Waiting,
        FlowNodeState::Executing,
        FlowNodeState::Completing,
        FlowNodeState::AbortingBoundaryOnCompleting,
        FlowNodeState::Completed,
        FlowNodeState::Failed,
        FlowNodeState::AbortingWithBoundary,
        FlowNodeState::Aborting,
        FlowNodeState::Aborted,
        FlowNodeState::CancellingWithBoundary,
        FlowNodeState::Cancelling,
        FlowNodeState::Cancelled,
    ];

    /// Integer state code
    pub fn id(&self) -> u32 {
        match self {
            FlowNodeState::Initializing => 0,
            FlowNodeState::Executing => 1,
            FlowNodeState::Completed => 2,
            FlowNodeState::Failed => 3,
            FlowNodeState::Waiting => 4,
            FlowNodeState::InitializingWithBoundary => 5,
            FlowNodeState::AbortingBoundaryOnCompleting => 6,
            FlowNodeState::Completing => 7,
            FlowNodeState::AbortingWithBoundary => 10,
            FlowNodeState::Aborting => 11,
            FlowNodeState::Aborted => 12,
            FlowNodeState::CancellingWithBoundary => 13,
            FlowNodeState::Cancelling => 14,
            FlowNodeState::Cancelled => 15,
        }
    }

    /// State for an integer code
    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.id() == id)
    }

    /// Terminal states accept no further work
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowNodeState::Completed
                | FlowNodeState::Aborted
                | FlowNodeState::Cancelled
                | FlowNodeState::Failed
        )
    }

    /// States where a node stays until something external resumes it
    pub fn is_stable(&self) -> bool {
        matches!(self, FlowNodeState::Waiting | FlowNodeState::Completing)
    }

    /// States of the abort family
    pub fn is_aborting_family(&self) -> bool {
        matches!(
            self,
            FlowNodeState::AbortingWithBoundary | FlowNodeState::Aborting | FlowNodeState::Aborted
        )
    }

    /// States of the cancel family
    pub fn is_cancelling_family(&self) -> bool {
        matches!(
            self,
            FlowNodeState::CancellingWithBoundary
                | FlowNodeState::Cancelling
                | FlowNodeState::Cancelled
        )
    }
}

impl fmt::Display for FlowNodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.id())
    }
}

/// Event moving a node from one state to the next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionEvent {
    /// The current state's step completed
    Proceed,
    /// An ancestor container was interrupted
    Abort,
    /// The node was explicitly cancelled
    Cancel,
}

/// Interruption requested on a flow node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interruption {
    /// Abort, triggered by an ancestor container
    Abort,
    /// Cancel, triggered explicitly
    Cancel,
}

impl Interruption {
    fn event(&self) -> TransitionEvent {
        match self {
            Interruption::Abort => TransitionEvent::Abort,
            Interruption::Cancel => TransitionEvent::Cancel,
        }
    }
}

/// One entry of a state table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    /// Current state
    pub from: FlowNodeState,
    /// Triggering event
    pub event: TransitionEvent,
    /// Next state
    pub to: FlowNodeState,
}

/// State table of one node type
#[derive(Debug, Clone, PartialEq)]
pub struct FlowNodeStates {
    normal: Vec<FlowNodeState>,
    abort: Vec<FlowNodeState>,
    cancel: Vec<FlowNodeState>,
    transitions: Vec<StateTransition>,
}

impl FlowNodeStates {
    /// Build a table from the three families. Every non-terminal state of the
    /// normal family gets an abort and a cancel entry.
    pub fn new(
        normal: Vec<FlowNodeState>,
        abort: Vec<FlowNodeState>,
        cancel: Vec<FlowNodeState>,
    ) -> Self {
        let mut transitions = Vec::new();
        chain(&mut transitions, &normal);
        chain(&mut transitions, &abort);
        chain(&mut transitions, &cancel);
        for state in normal.iter().filter(|s| !s.is_terminal()) {
            if let Some(first) = abort.first() {
                transitions.push(StateTransition {
                    from: *state,
                    event: TransitionEvent::Abort,
                    to: *first,
                });
            }
            if let Some(first) = cancel.first() {
                transitions.push(StateTransition {
                    from: *state,
                    event: TransitionEvent::Cancel,
                    to: *first,
                });
            }
        }
        Self {
            normal,
            abort,
            cancel,
            transitions,
        }
    }

    /// First state of the normal family
    pub fn initial_state(&self) -> Option<FlowNodeState> {
        self.normal.first().copied()
    }

    /// Next state for an event, if the table allows it
    pub fn transition(&self, from: FlowNodeState, event: TransitionEvent) -> Option<FlowNodeState> {
        self.transitions
            .iter()
            .find(|t| t.from == from && t.event == event)
            .map(|t| t.to)
    }

    /// All triples of the table
    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    /// Whether the state belongs to the normal family
    pub fn is_normal_state(&self, state: FlowNodeState) -> bool {
        self.normal.contains(&state)
    }

    /// States of the abort family
    pub fn abort_states(&self) -> &[FlowNodeState] {
        &self.abort
    }

    /// States of the cancel family
    pub fn cancel_states(&self) -> &[FlowNodeState] {
        &self.cancel
    }
}

fn chain(transitions: &mut Vec<StateTransition>, states: &[FlowNodeState]) {
    for pair in states.windows(2) {
        transitions.push(StateTransition {
            from: pair[0],
            event: TransitionEvent::Proceed,
            to: pair[1],
        });
    }
}

/// State tables of every node type
#[derive(Debug, Clone)]
pub struct StateMachine {
    tables: HashMap<(FlowNodeType, bool), FlowNodeStates>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Build the standard tables
    pub fn new() -> Self {
        use FlowNodeState::*;

        let mut tables = HashMap::new();
        for node_type in FlowNodeType::ALL {
            let normal = match node_type {
                FlowNodeType::ReceiveTask
                | FlowNodeType::IntermediateCatchEvent
                | FlowNodeType::BoundaryEvent => vec![Initializing, Waiting, Executing, Completed],
                FlowNodeType::SubProcess => vec![Initializing, Executing, Completing, Completed],
                _ => vec![Initializing, Executing, Completed],
            };
            tables.insert(
                (node_type, false),
                FlowNodeStates::new(
                    normal.clone(),
                    vec![Aborting, Aborted],
                    vec![Cancelling, Cancelled],
                ),
            );

            if node_type.accepts_boundary_events() {
                let mut with_boundary = normal;
                with_boundary[0] = InitializingWithBoundary;
                with_boundary.insert(with_boundary.len() - 1, AbortingBoundaryOnCompleting);
                tables.insert(
                    (node_type, true),
                    FlowNodeStates::new(
                        with_boundary,
                        vec![AbortingWithBoundary, Aborting, Aborted],
                        vec![CancellingWithBoundary, Cancelling, Cancelled],
                    ),
                );
            }
        }
        Self { tables }
    }

    /// Table for a node type
    pub fn states_for(
        &self,
        node_type: FlowNodeType,
        with_boundary: bool,
    ) -> Result<&FlowNodeStates, CoreError> {
        self.tables
            .get(&(node_type, with_boundary))
            .ok_or_else(|| {
                CoreError::ConsistencyError(format!(
                    "No state table for {} (with boundary: {})",
                    node_type, with_boundary
                ))
            })
    }

    /// First state of a new node
    pub fn initial_state(
        &self,
        node_type: FlowNodeType,
        with_boundary: bool,
    ) -> Result<FlowNodeState, CoreError> {
        self.states_for(node_type, with_boundary)?
            .initial_state()
            .ok_or_else(|| CoreError::ConsistencyError(format!("Empty state table for {}", node_type)))
    }

    /// State reached once the node's current step completed.
    ///
    /// A node flagged for abort or cancel while still in its normal family
    /// leaves it for the interruption family instead of proceeding.
    pub fn next_state(&self, node: &FlowNodeInstance) -> Result<FlowNodeState, CoreError> {
        let table = self.states_for(node.node_type, node.with_boundary)?;
        let current = node.state();
        let event = if table.is_normal_state(current) {
            if node.lifecycle.canceling {
                TransitionEvent::Cancel
            } else if node.lifecycle.aborting {
                TransitionEvent::Abort
            } else {
                TransitionEvent::Proceed
            }
        } else {
            TransitionEvent::Proceed
        };
        table.transition(current, event).ok_or_else(|| {
            CoreError::InvalidStateTransition(format!(
                "{} {} has no {:?} transition from {}",
                node.node_type, node.id, event, current
            ))
        })
    }

    /// First state of the interruption family, for a node in its normal family
    pub fn interruption_state(
        &self,
        node: &FlowNodeInstance,
        interruption: Interruption,
    ) -> Result<FlowNodeState, CoreError> {
        let table = self.states_for(node.node_type, node.with_boundary)?;
        table
            .transition(node.state(), interruption.event())
            .ok_or_else(|| {
                CoreError::InvalidStateTransition(format!(
                    "{} {} cannot be interrupted ({:?}) from {}",
                    node.node_type,
                    node.id,
                    interruption,
                    node.state()
                ))
            })
    }
}
