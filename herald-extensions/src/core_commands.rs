//! `ping` and `help`

use herald_host::extension::{Extension, ExtensionError};
use herald_host::permission::GUEST;
use herald_host::{CommandCall, CommandDescriptor, CommandOutcome, ExtensionContext};

pub const NAME: &str = "core-commands";

pub const PONG: &str = "> Pong.";
pub const NO_COMMANDS: &str = "> No commands available.";
pub const HELP_HEADER: &str = "--- Commands ---";

/// Liveness check and command listing
#[derive(Debug, Default, Clone, Copy)]
pub struct CoreCommands;

impl Extension for CoreCommands {
    fn register(&self, ctx: &ExtensionContext) -> Result<(), ExtensionError> {
        let env = ctx.environment().clone();
        ctx.register(
            CommandDescriptor::new("ping", move |_| {
                env.send_message(PONG);
                Ok(CommandOutcome::Done)
            })
            .level(GUEST)
            .description("Liveness check."),
        )?;

        let services = ctx.services().clone();
        ctx.register(
            CommandDescriptor::new("help", move |call: CommandCall| {
                let level = services.permissions.level(&call.actor);
                let visible = services.commands.visible_to(level);
                let env = &services.environment;

                if visible.is_empty() {
                    env.send_message(NO_COMMANDS);
                    return Ok(CommandOutcome::Done);
                }

                env.send_message(HELP_HEADER);
                for cmd in visible {
                    let about = if cmd.about().is_empty() {
                        "No description."
                    } else {
                        cmd.about()
                    };
                    env.send_message(&format!("{}{}: {}", services.prefix, cmd.name(), about));
                }
                Ok(CommandOutcome::Done)
            })
            .level(GUEST)
            .description("List the commands you can use."),
        )?;
        Ok(())
    }
}
