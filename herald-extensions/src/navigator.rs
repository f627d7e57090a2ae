//! Movement: `come`, `follow` and `stop`
//!
//! Path computation belongs to the environment. `come` hands it a single
//! goal; `follow` re-resolves the player on every tick and asks for one step
//! toward them.

use herald_api::{Environment, Goal, Position};
use herald_host::extension::{Extension, ExtensionError};
use herald_host::task::{Tick, TaskSlot};
use herald_host::{CommandCall, CommandDescriptor, CommandError, CommandOutcome, ExtensionContext};
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::parse_coord;

pub const NAME: &str = "navigator";

/// Shortest follow interval accepted from config
pub const MIN_FOLLOW_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NavigatorConfig {
    pub follow_interval_ms: u64,
    /// How close `follow` tries to stay
    pub follow_range: f64,
    /// How close `come` has to get
    pub arrive_range: f64,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            follow_interval_ms: 250,
            follow_range: 3.0,
            arrive_range: 1.0,
        }
    }
}

/// Moves toward players and coordinates
#[derive(Debug, Default)]
pub struct Navigator {
    follow_task: OnceLock<Arc<TaskSlot>>,
}

impl Navigator {
    /// The follow task, once registered
    pub fn follow_task(&self) -> Option<&Arc<TaskSlot>> {
        self.follow_task.get()
    }
}

impl Extension for Navigator {
    fn register(&self, ctx: &ExtensionContext) -> Result<(), ExtensionError> {
        let config: NavigatorConfig = ctx.config().deserialize()?;
        let interval = Duration::from_millis(config.follow_interval_ms);
        if interval < MIN_FOLLOW_INTERVAL {
            return Err(ExtensionError::Config(format!(
                "followIntervalMs must be at least {} ms",
                MIN_FOLLOW_INTERVAL.as_millis()
            )));
        }

        let follow = self
            .follow_task
            .get_or_init(|| Arc::new(TaskSlot::new("follow", MIN_FOLLOW_INTERVAL)))
            .clone();
        let env = ctx.environment().clone();

        ctx.register(
            CommandDescriptor::new("come", {
                let env = env.clone();
                let follow = follow.clone();
                move |call: CommandCall| come(&env, &follow, &call, config.arrive_range)
            })
            .level(1)
            .description("Walk to a target. Usage: come [player] | come <x> <z> | come <x> <y> <z>"),
        )?;

        ctx.register(
            CommandDescriptor::new("follow", {
                let env = env.clone();
                let follow = follow.clone();
                move |call: CommandCall| start_follow(&env, &follow, &call, interval, config.follow_range)
            })
            .level(1)
            .description("Keep following a player. Usage: follow [player]"),
        )?;

        ctx.register(
            CommandDescriptor::new("stop", move |_| {
                follow.stop();
                env.send_message("> Movement stopped.");
                let env = env.clone();
                Ok(CommandOutcome::pending(async move {
                    env.stop_navigation().await?;
                    Ok(())
                }))
            })
            .level(1)
            .description("Stop moving."),
        )?;
        Ok(())
    }
}

fn player_position(env: &dyn Environment, name: &str) -> Option<Position> {
    env.player(name).and_then(|p| p.position)
}

fn come(
    env: &Arc<dyn Environment>,
    follow: &TaskSlot,
    call: &CommandCall,
    range: f64,
) -> Result<CommandOutcome, CommandError> {
    let (target, label) = match call.args.as_slice() {
        [] => match player_position(env.as_ref(), &call.actor) {
            Some(pos) => (pos, call.actor.clone()),
            None => return Ok(CommandOutcome::rejected("Cannot locate you.")),
        },
        [name] => match player_position(env.as_ref(), name) {
            Some(pos) => (pos, format!("player '{}'", name)),
            None => {
                return Ok(CommandOutcome::rejected(format!(
                    "Cannot locate player '{}'.",
                    name
                )))
            }
        },
        [x, z] => {
            let (Some(x), Some(z)) = (parse_coord(x), parse_coord(z)) else {
                return Ok(CommandOutcome::rejected("Invalid coordinates."));
            };
            let Some(own) = env.position() else {
                return Ok(CommandOutcome::rejected("Own position is unknown."));
            };
            (Position::new(x, own.y, z), format!("X:{:.0}, Z:{:.0}", x, z))
        }
        [x, y, z] => {
            let (Some(x), Some(y), Some(z)) = (parse_coord(x), parse_coord(y), parse_coord(z))
            else {
                return Ok(CommandOutcome::rejected("Invalid coordinates."));
            };
            (
                Position::new(x, y, z),
                format!("X:{:.0}, Y:{:.0}, Z:{:.0}", x, y, z),
            )
        }
        _ => return Ok(CommandOutcome::rejected("Invalid number of arguments.")),
    };

    // A new goal replaces following
    follow.stop();
    env.send_message(&format!("> On my way. Target: {}.", label));

    let env = env.clone();
    Ok(CommandOutcome::pending(async move {
        if let Err(e) = env.navigate(Goal::near(target, range)).await {
            tracing::warn!(error = %e, "Navigation failed");
            env.send_message("> Navigation failed.");
        }
        Ok(())
    }))
}

fn start_follow(
    env: &Arc<dyn Environment>,
    follow: &TaskSlot,
    call: &CommandCall,
    interval: Duration,
    range: f64,
) -> Result<CommandOutcome, CommandError> {
    let name = call.arg(0).unwrap_or(&call.actor).to_string();
    if player_position(env.as_ref(), &name).is_none() {
        return Ok(CommandOutcome::rejected(format!(
            "Cannot locate player '{}'.",
            name
        )));
    }

    let tick_env = env.clone();
    let target = name.clone();
    follow
        .start(interval, move || match player_position(tick_env.as_ref(), &target) {
            None => Tick::Idle,
            Some(pos) => {
                let env = tick_env.clone();
                Tick::action(async move { env.step_toward(Goal::near(pos, range)).await })
            }
        })
        .map_err(|e| CommandError::Other(e.into()))?;

    env.send_message(&format!("> Following {}.", name));
    Ok(CommandOutcome::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_api::testing::{RecordedAction, RecordingEnvironment};
    use herald_host::permission::{PermissionSnapshot, PermissionStore, UserRecord};
    use herald_host::{DispatchOutcome, ExtensionConfig, Framework, Services};
    use serde_json::json;

    fn setup(config: serde_json::Value) -> (Arc<RecordingEnvironment>, Framework) {
        let env = Arc::new(RecordingEnvironment::new("herald"));
        env.set_position(Some(Position::new(0.0, 70.0, 0.0)));
        let permissions = PermissionStore::from_snapshot(
            PermissionSnapshot::empty().with_user("bob", UserRecord::with_level(1)),
        );
        let services = Services::new(env.clone(), Arc::new(permissions));
        let ctx = ExtensionContext::new(NAME, ExtensionConfig::from_value(config), services.clone());
        Navigator::default().register(&ctx).unwrap();
        (env, Framework::new(services))
    }

    fn navigations(env: &RecordingEnvironment) -> Vec<Goal> {
        env.actions()
            .into_iter()
            .filter_map(|a| match a {
                RecordedAction::Navigate(goal) => Some(goal),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_come_variants() {
        let (env, framework) = setup(json!({}));
        env.set_player("bob", Some(Position::new(5.0, 64.0, 5.0)));
        env.set_player("carol", Some(Position::new(-3.0, 60.0, 8.0)));

        for line in ["!come", "!come carol", "!come 10 20", "!come 1 2 3"] {
            framework.dispatcher().dispatch("bob", line).finish().await;
        }

        assert_eq!(
            navigations(&env),
            vec![
                Goal::near(Position::new(5.0, 64.0, 5.0), 1.0),
                Goal::near(Position::new(-3.0, 60.0, 8.0), 1.0),
                Goal::near(Position::new(10.0, 70.0, 20.0), 1.0),
                Goal::near(Position::new(1.0, 2.0, 3.0), 1.0),
            ]
        );
        assert_eq!(env.messages()[2], "> On my way. Target: X:10, Z:20.");
    }

    #[test]
    fn test_come_rejections() {
        let (env, framework) = setup(json!({}));
        env.set_player("ghost", None);

        for line in ["!come", "!come ghost", "!come a b", "!come 1 2 3 4"] {
            assert!(matches!(
                framework.dispatcher().dispatch("bob", line),
                DispatchOutcome::Rejected { .. }
            ));
        }
        assert_eq!(
            env.messages(),
            vec![
                "> Cannot locate you.".to_string(),
                "> Cannot locate player 'ghost'.".to_string(),
                "> Invalid coordinates.".to_string(),
                "> Invalid number of arguments.".to_string(),
            ]
        );
        assert!(env.actions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_follow_tracks_player_each_tick() {
        let (env, framework) = setup(json!({ "followIntervalMs": 100 }));
        env.set_player("bob", Some(Position::new(5.0, 64.0, 5.0)));

        framework.dispatcher().dispatch("bob", "!follow");
        tokio::time::sleep(Duration::from_millis(150)).await;
        env.set_player("bob", Some(Position::new(6.0, 64.0, 5.0)));
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Player leaves range: ticks become no-ops
        env.set_player("bob", None);
        tokio::time::sleep(Duration::from_millis(300)).await;

        let steps: Vec<RecordedAction> = env
            .actions()
            .into_iter()
            .filter(|a| matches!(a, RecordedAction::Step(_)))
            .collect();
        assert_eq!(
            steps,
            vec![
                RecordedAction::Step(Goal::near(Position::new(5.0, 64.0, 5.0), 3.0)),
                RecordedAction::Step(Goal::near(Position::new(6.0, 64.0, 5.0), 3.0)),
            ]
        );
        assert_eq!(env.messages(), vec!["> Following bob.".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_and_come_cancel_follow() {
        let (env, framework) = setup(json!({ "followIntervalMs": 100 }));
        env.set_player("bob", Some(Position::new(5.0, 64.0, 5.0)));

        framework.dispatcher().dispatch("bob", "!follow");
        framework.dispatcher().dispatch("bob", "!stop").finish().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(env.actions(), vec![RecordedAction::StopNavigation]);

        env.clear();
        framework.dispatcher().dispatch("bob", "!follow");
        framework.dispatcher().dispatch("bob", "!come 1 2 3").finish().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(
            env.actions(),
            vec![RecordedAction::Navigate(Goal::near(
                Position::new(1.0, 2.0, 3.0),
                1.0
            ))]
        );
    }

    #[test]
    fn test_follow_rejects_unknown_player() {
        let (env, framework) = setup(json!({}));
        let outcome = framework.dispatcher().dispatch("bob", "!follow nobody");
        assert!(matches!(outcome, DispatchOutcome::Rejected { .. }));
        assert_eq!(
            env.messages(),
            vec!["> Cannot locate player 'nobody'.".to_string()]
        );
    }
}
