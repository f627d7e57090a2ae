//! Block interaction: `lookat`, `click` and `loopclick`
//!
//! Config (all optional):
//!
//! ```json
//! { "searchRadius": 128, "reach": 5, "minIntervalMs": 50, "defaultIntervalMs": 500 }
//! ```

use herald_api::{BlockLookup, Environment, Hand, InteractionTarget, Position};
use herald_host::extension::{Extension, ExtensionError};
use herald_host::task::{Tick, TaskError, TaskSlot};
use herald_host::{CommandCall, CommandDescriptor, CommandError, CommandOutcome, ExtensionContext};
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::parse_coord;

pub const NAME: &str = "interactor";

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InteractorConfig {
    /// How far `lookat <block>` searches
    pub search_radius: f64,
    /// How far the cursor reaches for `click` and `loopclick`
    pub reach: f64,
    pub min_interval_ms: u64,
    pub default_interval_ms: u64,
}

impl Default for InteractorConfig {
    fn default() -> Self {
        Self {
            search_radius: 128.0,
            reach: 5.0,
            min_interval_ms: 50,
            default_interval_ms: 500,
        }
    }
}

/// Looks at, clicks and repeatedly clicks blocks
#[derive(Debug, Default)]
pub struct Interactor {
    loop_task: OnceLock<Arc<TaskSlot>>,
}

impl Interactor {
    /// The repeating click task, once registered
    pub fn loop_task(&self) -> Option<&Arc<TaskSlot>> {
        self.loop_task.get()
    }
}

impl Extension for Interactor {
    fn register(&self, ctx: &ExtensionContext) -> Result<(), ExtensionError> {
        let config: InteractorConfig = ctx.config().deserialize()?;
        if config.default_interval_ms < config.min_interval_ms {
            return Err(ExtensionError::Config(format!(
                "defaultIntervalMs ({}) is below minIntervalMs ({})",
                config.default_interval_ms, config.min_interval_ms
            )));
        }

        let env = ctx.environment().clone();
        ctx.register(
            CommandDescriptor::new("lookat", {
                let env = env.clone();
                move |call: CommandCall| look_at(&env, &call, config.search_radius)
            })
            .level(1)
            .description("Face a block or a point. Usage: lookat <block> | lookat <x> <y> <z>"),
        )?;

        ctx.register(
            CommandDescriptor::new("click", {
                let env = env.clone();
                move |call: CommandCall| click(&env, &call, config.reach)
            })
            .level(1)
            .description("Interact once with the block in front. Usage: click <left|right>"),
        )?;

        let slot = self
            .loop_task
            .get_or_init(|| {
                Arc::new(TaskSlot::new(
                    "loopclick",
                    Duration::from_millis(config.min_interval_ms),
                ))
            })
            .clone();
        let prefix = ctx.services().prefix.clone();
        ctx.register(
            CommandDescriptor::new("loopclick", move |call: CommandCall| {
                loop_click(&env, &slot, &call, &config, &prefix)
            })
            .level(2)
            .description("Click repeatedly. Usage: loopclick <left|right> [interval ms] | loopclick stop"),
        )?;
        Ok(())
    }
}

fn look_at(
    env: &Arc<dyn Environment>,
    call: &CommandCall,
    search_radius: f64,
) -> Result<CommandOutcome, CommandError> {
    if call.args.is_empty() {
        return Ok(CommandOutcome::rejected(
            "Missing argument: a block name or coordinates.",
        ));
    }

    let target = if call.args.len() >= 3 && parse_coord(&call.args[0]).is_some() {
        let coords: Option<Vec<f64>> = call.args[..3].iter().map(|a| parse_coord(a)).collect();
        let Some(coords) = coords else {
            return Ok(CommandOutcome::rejected(
                "Invalid coordinates: expected three numbers.",
            ));
        };
        let target = Position::new(coords[0], coords[1], coords[2]);
        env.send_message(&format!("> Turning toward {}.", target));
        target
    } else {
        let kind = call.args.join("_").to_lowercase();
        match env.find_block(&kind, search_radius) {
            BlockLookup::Found(block) => {
                env.send_message(&format!("> Turning toward the nearest {}.", kind));
                block.position.block_center()
            }
            BlockLookup::NotFound => {
                return Ok(CommandOutcome::rejected(format!("No '{}' nearby.", kind)));
            }
            BlockLookup::UnknownKind => {
                return Ok(CommandOutcome::rejected(format!(
                    "Unknown block name '{}'.",
                    kind
                )));
            }
        }
    };

    let env = env.clone();
    Ok(CommandOutcome::pending(async move {
        match env.orient_toward(target).await {
            Ok(()) => env.send_message("> Done: facing the target."),
            Err(e) => {
                tracing::warn!(error = %e, "lookat failed");
                env.send_message("> Failed to turn toward the target.");
            }
        }
        Ok(())
    }))
}

fn click(
    env: &Arc<dyn Environment>,
    call: &CommandCall,
    reach: f64,
) -> Result<CommandOutcome, CommandError> {
    let Some(arg) = call.arg(0) else {
        return Ok(CommandOutcome::rejected("Missing argument: left or right."));
    };
    let Ok(hand) = arg.parse::<Hand>() else {
        return Ok(CommandOutcome::rejected("Hand must be left or right."));
    };
    let Some(target) = env.find_interaction_target(reach) else {
        return Ok(CommandOutcome::rejected("Not facing any block."));
    };

    env.send_message(&format!("> Interacting with {}...", target.kind));
    let env = env.clone();
    Ok(CommandOutcome::pending(async move {
        if let Err(e) = interact(env.as_ref(), hand, &target).await {
            tracing::warn!(error = %e, hand = %hand, "click failed");
            env.send_message("> Interaction with the block failed.");
        }
        Ok(())
    }))
}

fn loop_click(
    env: &Arc<dyn Environment>,
    slot: &TaskSlot,
    call: &CommandCall,
    config: &InteractorConfig,
    prefix: &str,
) -> Result<CommandOutcome, CommandError> {
    let usage = || {
        CommandOutcome::rejected(format!(
            "Usage: {p}loopclick <left|right> [interval ms] | {p}loopclick stop",
            p = prefix
        ))
    };
    let Some(action) = call.arg(0) else {
        return Ok(usage());
    };

    if action.eq_ignore_ascii_case("stop") {
        if slot.stop() {
            env.send_message("> Loop stopped.");
        } else {
            env.send_message("> No loop is running.");
        }
        return Ok(CommandOutcome::Done);
    }

    let Ok(hand) = action.parse::<Hand>() else {
        return Ok(usage());
    };
    let interval_rejected = || {
        CommandOutcome::rejected(format!(
            "Interval must be a number of at least {} ms.",
            config.min_interval_ms
        ))
    };
    let interval_ms = match call.arg(1) {
        None => config.default_interval_ms,
        Some(raw) => match raw.parse::<u64>() {
            Ok(ms) => ms,
            Err(_) => return Ok(interval_rejected()),
        },
    };

    let tick_env = env.clone();
    let reach = config.reach;
    let started = slot.start(Duration::from_millis(interval_ms), move || {
        match tick_env.find_interaction_target(reach) {
            None => Tick::Idle,
            Some(target) => {
                let env = tick_env.clone();
                Tick::action(async move {
                    if hand == Hand::Left {
                        env.swing_arm(Hand::Left).await?;
                    }
                    interact(env.as_ref(), hand, &target).await
                })
            }
        }
    });

    match started {
        Ok(_) => {
            env.send_message(&format!(
                "> Loop started: {} click every {} ms. Use {}loopclick stop to end it.",
                hand, interval_ms, prefix
            ));
            Ok(CommandOutcome::Done)
        }
        Err(TaskError::IntervalTooShort { .. }) => Ok(interval_rejected()),
        Err(e) => Err(CommandError::Other(e.into())),
    }
}

async fn interact(
    env: &dyn Environment,
    hand: Hand,
    target: &InteractionTarget,
) -> Result<(), herald_api::EnvironmentError> {
    match hand {
        Hand::Left => env.perform_primary_interaction(target).await,
        Hand::Right => env.perform_secondary_interaction(target).await,
    }
}
