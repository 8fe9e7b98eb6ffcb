//! Actions returned by the node state machines.
//!
//! State machines never perform I/O. They return a list of actions and the
//! driver (simulation harness or flight software) executes them in order:
//!
//! - `Send`: encode the message and hand it to the link
//! - `Actuate`: forward the command to the [`BeamActuator`]
//!
//! [`BeamActuator`]: crate::activation::BeamActuator

use heliobeam_proto::Message;

use crate::activation::{BeamActuator, BeamCommand};

/// A side effect requested by a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeAction {
    /// Send this message to the peer
    Send(Message),
    /// Issue this command to the local beam actuator
    Actuate(BeamCommand),
}

impl NodeAction {
    /// The message to send, if this is a `Send`.
    #[must_use]
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Send(message) => Some(message),
            Self::Actuate(_) => None,
        }
    }

    /// The actuator command, if this is an `Actuate`.
    #[must_use]
    pub fn as_command(&self) -> Option<BeamCommand> {
        match self {
            Self::Actuate(command) => Some(*command),
            Self::Send(_) => None,
        }
    }
}

/// Apply every `Actuate` action to `actuator` and return the messages to
/// send, preserving order.
pub fn execute(
    actions: Vec<NodeAction>,
    actuator: &mut (impl BeamActuator + ?Sized),
) -> Vec<Message> {
    let mut outbox = Vec::new();
    for action in actions {
        match action {
            NodeAction::Send(message) => outbox.push(message),
            NodeAction::Actuate(command) => command.apply(actuator),
        }
    }
    outbox
}
