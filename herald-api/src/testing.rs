//! In-memory environment for tests
//!
//! `RecordingEnvironment` answers queries from state set up by the test and
//! records every message and action it is asked to perform.

use crate::{
    BlockLookup, Environment, EnvironmentError, Goal, Hand, InteractionTarget, PlayerInfo,
    Position,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// An action performed through the environment
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedAction {
    Primary(InteractionTarget),
    Secondary(InteractionTarget),
    Orient(Position),
    Navigate(Goal),
    Step(Goal),
    StopNavigation,
    Swing(Hand),
}

#[derive(Debug, Default)]
struct WorldState {
    position: Option<Position>,
    players: HashMap<String, PlayerInfo>,
    cursor: Option<InteractionTarget>,
    blocks: Vec<InteractionTarget>,
    known_kinds: Option<HashSet<String>>,
    fail_actions: bool,
}

/// Environment double that records messages and actions
#[derive(Debug)]
pub struct RecordingEnvironment {
    username: String,
    messages: Mutex<Vec<String>>,
    actions: Mutex<Vec<RecordedAction>>,
    world: Mutex<WorldState>,
}

impl RecordingEnvironment {
    /// Create an environment whose agent is called `username`
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            messages: Mutex::new(Vec::new()),
            actions: Mutex::new(Vec::new()),
            world: Mutex::new(WorldState::default()),
        }
    }

    /// Get all sent messages
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    /// Get all performed actions
    pub fn actions(&self) -> Vec<RecordedAction> {
        self.actions.lock().unwrap().clone()
    }

    /// Count performed actions matching a predicate
    pub fn count_actions(&self, pred: impl Fn(&RecordedAction) -> bool) -> usize {
        self.actions.lock().unwrap().iter().filter(|a| pred(a)).count()
    }

    /// Clear recorded messages and actions
    pub fn clear(&self) {
        self.messages.lock().unwrap().clear();
        self.actions.lock().unwrap().clear();
    }

    pub fn set_position(&self, position: Option<Position>) {
        self.world.lock().unwrap().position = position;
    }

    pub fn set_player(&self, name: &str, position: Option<Position>) {
        self.world.lock().unwrap().players.insert(
            name.to_string(),
            PlayerInfo {
                name: name.to_string(),
                position,
            },
        );
    }

    pub fn remove_player(&self, name: &str) {
        self.world.lock().unwrap().players.remove(name);
    }

    pub fn set_cursor(&self, target: Option<InteractionTarget>) {
        self.world.lock().unwrap().cursor = target;
    }

    pub fn add_block(&self, target: InteractionTarget) {
        self.world.lock().unwrap().blocks.push(target);
    }

    /// Restrict `find_block` to these kinds; others report `UnknownKind`
    pub fn set_known_kinds<I, S>(&self, kinds: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.world.lock().unwrap().known_kinds = Some(kinds.into_iter().map(Into::into).collect());
    }

    /// Make every subsequent action fail with `Rejected`
    pub fn fail_actions(&self, fail: bool) {
        self.world.lock().unwrap().fail_actions = fail;
    }

    fn record(&self, action: RecordedAction, name: &'static str) -> Result<(), EnvironmentError> {
        self.actions.lock().unwrap().push(action);
        if self.world.lock().unwrap().fail_actions {
            return Err(EnvironmentError::Rejected {
                action: name,
                reason: "scripted failure".to_string(),
            });
        }
        Ok(())
    }

    fn within(&self, position: &Position, max_distance: f64) -> bool {
        match self.world.lock().unwrap().position {
            Some(own) => own.distance_to(position) <= max_distance,
            None => true,
        }
    }
}

#[async_trait]
impl Environment for RecordingEnvironment {
    fn username(&self) -> String {
        self.username.clone()
    }

    fn send_message(&self, text: &str) {
        self.messages.lock().unwrap().push(text.to_string());
    }

    fn position(&self) -> Option<Position> {
        self.world.lock().unwrap().position
    }

    fn player(&self, name: &str) -> Option<PlayerInfo> {
        self.world.lock().unwrap().players.get(name).cloned()
    }

    fn find_interaction_target(&self, max_distance: f64) -> Option<InteractionTarget> {
        let cursor = self.world.lock().unwrap().cursor.clone()?;
        self.within(&cursor.position, max_distance).then_some(cursor)
    }

    fn find_block(&self, kind: &str, max_distance: f64) -> BlockLookup {
        let (own, candidates) = {
            let world = self.world.lock().unwrap();
            if let Some(known) = &world.known_kinds {
                if !known.contains(kind) {
                    return BlockLookup::UnknownKind;
                }
            }
            let candidates: Vec<InteractionTarget> = world
                .blocks
                .iter()
                .filter(|b| b.kind == kind)
                .cloned()
                .collect();
            (world.position.unwrap_or_default(), candidates)
        };

        candidates
            .into_iter()
            .filter(|b| own.distance_to(&b.position) <= max_distance)
            .min_by(|a, b| {
                own.distance_to(&a.position)
                    .total_cmp(&own.distance_to(&b.position))
            })
            .map(BlockLookup::Found)
            .unwrap_or(BlockLookup::NotFound)
    }

    async fn perform_primary_interaction(
        &self,
        target: &InteractionTarget,
    ) -> Result<(), EnvironmentError> {
        self.record(RecordedAction::Primary(target.clone()), "dig")
    }

    async fn perform_secondary_interaction(
        &self,
        target: &InteractionTarget,
    ) -> Result<(), EnvironmentError> {
        self.record(RecordedAction::Secondary(target.clone()), "activate")
    }

    async fn orient_toward(&self, position: Position) -> Result<(), EnvironmentError> {
        self.record(RecordedAction::Orient(position), "look")
    }

    async fn navigate(&self, goal: Goal) -> Result<(), EnvironmentError> {
        self.record(RecordedAction::Navigate(goal), "goto")
    }

    async fn step_toward(&self, goal: Goal) -> Result<(), EnvironmentError> {
        self.record(RecordedAction::Step(goal), "step")
    }

    async fn stop_navigation(&self) -> Result<(), EnvironmentError> {
        self.record(RecordedAction::StopNavigation, "stop")
    }

    async fn swing_arm(&self, hand: Hand) -> Result<(), EnvironmentError> {
        self.record(RecordedAction::Swing(hand), "swing")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_block_prefers_nearest() {
        let env = RecordingEnvironment::new("bot");
        env.set_position(Some(Position::new(0.0, 0.0, 0.0)));
        env.add_block(InteractionTarget::new("stone", Position::new(10.0, 0.0, 0.0)));
        env.add_block(InteractionTarget::new("stone", Position::new(2.0, 0.0, 0.0)));

        assert_eq!(
            env.find_block("stone", 128.0),
            BlockLookup::Found(InteractionTarget::new("stone", Position::new(2.0, 0.0, 0.0)))
        );
        assert_eq!(env.find_block("stone", 1.0), BlockLookup::NotFound);
    }

    #[test]
    fn test_unknown_kind() {
        let env = RecordingEnvironment::new("bot");
        env.set_known_kinds(["stone"]);
        assert_eq!(env.find_block("unobtainium", 128.0), BlockLookup::UnknownKind);
    }

    #[tokio::test]
    async fn test_scripted_failure_still_records() {
        let env = RecordingEnvironment::new("bot");
        env.fail_actions(true);
        let result = env.stop_navigation().await;
        assert!(matches!(result, Err(EnvironmentError::Rejected { .. })));
        assert_eq!(env.actions(), vec![RecordedAction::StopNavigation]);
    }
}
