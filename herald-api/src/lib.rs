//! herald-api: Capability interface between the herald host and the world
//!
//! The host never talks to the remote environment directly. Everything it
//! and its extensions need (sending chat, looking up the interaction target,
//! driving the pathfinder) goes through the [`Environment`] trait defined here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod testing;

/// A point in the environment's world coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    /// Create a new position
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Return this position shifted by the given deltas
    pub fn offset(self, dx: f64, dy: f64, dz: f64) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// The centre of the block whose corner is at this position
    pub fn block_center(self) -> Self {
        self.offset(0.5, 0.5, 0.5)
    }

    /// Euclidean distance to another position
    pub fn distance_to(&self, other: &Position) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// A block (or other interactable) the agent can act on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionTarget {
    /// Block kind, e.g. `oak_log`
    pub kind: String,
    /// Block position (corner)
    pub position: Position,
}

impl InteractionTarget {
    pub fn new(kind: impl Into<String>, position: Position) -> Self {
        Self {
            kind: kind.into(),
            position,
        }
    }
}

/// A player known to the environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub name: String,
    /// `None` while the player is listed but their entity is out of range
    pub position: Option<Position>,
}

/// Result of looking up the nearest block of a kind
#[derive(Debug, Clone, PartialEq)]
pub enum BlockLookup {
    /// Nearest matching block within range
    Found(InteractionTarget),
    /// The kind exists but no block of it is within range
    NotFound,
    /// The environment does not know this block kind
    UnknownKind,
}

/// Which hand an interaction uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    pub fn as_str(self) -> &'static str {
        match self {
            Hand::Left => "left",
            Hand::Right => "right",
        }
    }
}

impl fmt::Display for Hand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a hand name is neither `left` nor `right`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected 'left' or 'right', got '{0}'")]
pub struct ParseHandError(pub String);

impl FromStr for Hand {
    type Err = ParseHandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "left" => Ok(Hand::Left),
            "right" => Ok(Hand::Right),
            _ => Err(ParseHandError(s.to_string())),
        }
    }
}

/// A navigation goal: get within `range` of `position`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub position: Position,
    pub range: f64,
}

impl Goal {
    pub fn near(position: Position, range: f64) -> Self {
        Self { position, range }
    }
}

/// Lifecycle and chat signals coming from the environment
#[derive(Debug, Clone, PartialEq)]
pub enum EnvironmentEvent {
    /// Authenticated with the remote side, not yet in the world
    Connected,
    /// Fully joined the world/session; fires once per connection
    Joined,
    /// A chat line from an actor
    Chat { actor: String, text: String },
    /// Removed by the remote side
    Kicked { reason: String },
    /// Connection closed
    Disconnected { reason: String },
    /// Non-fatal protocol or client fault
    Fault { message: String },
}

/// Errors reported by environment actions
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EnvironmentError {
    #[error("Environment is disconnected")]
    Disconnected,

    #[error("Action '{action}' rejected: {reason}")]
    Rejected { action: &'static str, reason: String },

    #[error("Action not supported: {0}")]
    Unsupported(&'static str),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Capabilities the host and extensions need from the remote environment
///
/// Queries are answered from state the environment already holds and never
/// block. Actions are asynchronous and complete when the environment reports
/// the outcome.
#[async_trait]
pub trait Environment: Send + Sync {
    /// The agent's own identifier in chat
    fn username(&self) -> String;

    /// Best-effort outbound chat line
    fn send_message(&self, text: &str);

    /// The agent's own position, if spawned
    fn position(&self) -> Option<Position>;

    /// Look up a player by name
    fn player(&self, name: &str) -> Option<PlayerInfo>;

    /// The block under the agent's cursor within `max_distance`
    fn find_interaction_target(&self, max_distance: f64) -> Option<InteractionTarget>;

    /// The nearest block of `kind` within `max_distance`
    fn find_block(&self, kind: &str, max_distance: f64) -> BlockLookup;

    /// Primary (left-hand) interaction, e.g. digging
    async fn perform_primary_interaction(
        &self,
        target: &InteractionTarget,
    ) -> Result<(), EnvironmentError>;

    /// Secondary (right-hand) interaction, e.g. activating
    async fn perform_secondary_interaction(
        &self,
        target: &InteractionTarget,
    ) -> Result<(), EnvironmentError>;

    /// Turn to face a position
    async fn orient_toward(&self, position: Position) -> Result<(), EnvironmentError>;

    /// Hand a goal to the environment's pathfinder
    async fn navigate(&self, goal: Goal) -> Result<(), EnvironmentError>;

    /// Execute one pathfinding step toward a goal
    async fn step_toward(&self, goal: Goal) -> Result<(), EnvironmentError>;

    /// Abandon the current navigation goal
    async fn stop_navigation(&self) -> Result<(), EnvironmentError>;

    /// Play the arm swing animation
    async fn swing_arm(&self, hand: Hand) -> Result<(), EnvironmentError>;
}
