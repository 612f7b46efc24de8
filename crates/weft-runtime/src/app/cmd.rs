//! App-scope command handlers.
//!
//! Structurally distinct from
//! [`EngineCommandHandler`](crate::engine::EngineCommandHandler): only
//! the app has the authority to create and destroy engines, and that
//! boundary is expressed as two unrelated traits rather than one shared
//! base with runtime checks.

use crate::RuntimeError;
use crate::app::App;
use serde_json::json;
use weft_msg::{Command, CommandKind, CommandResult};

/// Handles one kind of app-scope command.
///
/// Like the engine-side trait, every handler defensively rejects command
/// kinds that are not its own, since all app commands flow through one
/// dispatch entry point.
pub trait AppCommandHandler: Send + Sync {
    /// Handles `cmd`, returning the result to deliver to the sender.
    fn handle(&self, app: &mut App, cmd: &Command) -> Result<CommandResult, RuntimeError>;
}

/// Resolves a graph definition and starts an engine for it.
///
/// Resolution precedence: (1) predefined-graph name lookup, (2) the
/// destination location's graph id against predefined graphs, (3) the
/// inline definition payload. "graph definition not found" when none
/// resolves; "already exists" when the resolved graph id is already
/// running — StartGraph is not idempotent.
pub struct StartGraphHandler;

impl AppCommandHandler for StartGraphHandler {
    fn handle(&self, app: &mut App, cmd: &Command) -> Result<CommandResult, RuntimeError> {
        let CommandKind::StartGraph(payload) = &cmd.kind else {
            return Err(RuntimeError::UnexpectedCommand {
                handler: "StartGraphHandler",
                got: cmd.kind.name().to_string(),
            });
        };
        let definition = app.resolve_graph_definition(payload, cmd.header.dests.first())?;
        let graph_id = app.start_engine(definition)?;
        Ok(CommandResult::success_for(cmd).with_property("graph_id", json!(graph_id.as_str())))
    }
}

/// Stops and removes an engine by graph id.
pub struct StopGraphHandler;

impl AppCommandHandler for StopGraphHandler {
    fn handle(&self, app: &mut App, cmd: &Command) -> Result<CommandResult, RuntimeError> {
        let CommandKind::StopGraph(payload) = &cmd.kind else {
            return Err(RuntimeError::UnexpectedCommand {
                handler: "StopGraphHandler",
                got: cmd.kind.name().to_string(),
            });
        };
        app.stop_engine(&payload.graph_id)?;
        Ok(CommandResult::success_for(cmd))
    }
}

/// Closes the app, which stops every registered engine.
pub struct CloseAppHandler;

impl AppCommandHandler for CloseAppHandler {
    fn handle(&self, app: &mut App, cmd: &Command) -> Result<CommandResult, RuntimeError> {
        let CommandKind::CloseApp = &cmd.kind else {
            return Err(RuntimeError::UnexpectedCommand {
                handler: "CloseAppHandler",
                got: cmd.kind.name().to_string(),
            });
        };
        app.app_close();
        Ok(CommandResult::success_for(cmd))
    }
}
