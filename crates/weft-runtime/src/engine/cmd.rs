//! Engine-scope command handlers.
//!
//! Deliberately a separate trait from
//! [`AppCommandHandler`](crate::app::AppCommandHandler): engine-scope
//! handlers can never create or destroy engines, and keeping the two
//! hierarchies structurally apart makes that authority boundary a
//! compile-time property instead of a runtime check.

use crate::RuntimeError;
use crate::engine::EngineCore;
use tracing::debug;
use weft_msg::{Command, CommandKind, CommandResult};

/// Handles one kind of engine-scope command.
///
/// All engine commands flow through the single
/// `handle(core, command)` entry point, so every handler defensively
/// rejects commands that are not its own kind with an "unexpected command
/// type" failure rather than assuming the dispatch table is right.
pub trait EngineCommandHandler: Send {
    /// Handles `cmd`, returning the result to deliver to the sender.
    fn handle(&self, core: &mut EngineCore, cmd: &Command) -> Result<CommandResult, RuntimeError>;
}

/// Starts and cancels engine timers.
pub struct TimerCmdHandler;

impl EngineCommandHandler for TimerCmdHandler {
    fn handle(&self, core: &mut EngineCore, cmd: &Command) -> Result<CommandResult, RuntimeError> {
        let CommandKind::Timer(timer) = &cmd.kind else {
            return Err(RuntimeError::UnexpectedCommand {
                handler: "TimerCmdHandler",
                got: cmd.kind.name().to_string(),
            });
        };
        if timer.cancel {
            core.cancel_timer(timer.timer_id)?;
        } else {
            core.start_timer(cmd, timer)?;
        }
        Ok(CommandResult::success_for(cmd))
    }
}

/// Acknowledges timer fires addressed at the engine itself.
///
/// Timeout commands normally target the extension that started the
/// timer; one addressed to the engine (no destination extension) is just
/// acknowledged.
pub struct TimeoutCmdHandler;

impl EngineCommandHandler for TimeoutCmdHandler {
    fn handle(&self, core: &mut EngineCore, cmd: &Command) -> Result<CommandResult, RuntimeError> {
        let CommandKind::Timeout(timeout) = &cmd.kind else {
            return Err(RuntimeError::UnexpectedCommand {
                handler: "TimeoutCmdHandler",
                got: cmd.kind.name().to_string(),
            });
        };
        debug!(
            engine = core.name(),
            timer = timeout.timer_id,
            "timer fired with no destination extension"
        );
        Ok(CommandResult::success_for(cmd))
    }
}
