//! The extension trait: what a graph node implements.
//!
//! Extensions are the stateful stages a graph composes (speech, language
//! model, synthesis, ...). The runtime knows nothing about their content;
//! it guarantees them single-threaded execution — every callback runs on
//! the owning engine's runloop — and hands them an [`EngineCore`] to act
//! through: emit messages, send commands, answer in-flight commands.

use crate::engine::EngineCore;
use weft_msg::{AudioFrameMessage, Command, CommandResult, DataMessage, VideoFrameMessage};

/// One graph node. All callbacks run on the owning engine's runloop.
pub trait Extension: Send + 'static {
    /// Called once after registration, before any traffic.
    fn on_start(&mut self, env: &mut EngineCore) {
        let _ = env;
    }

    /// Called when the engine stops.
    fn on_stop(&mut self, env: &mut EngineCore) {
        let _ = env;
    }

    /// Handles a command addressed to this extension.
    ///
    /// The extension must answer — immediately or later — via
    /// [`EngineCore::send_result`]; the runtime does not synthesize a
    /// reply on its behalf. A panicking handler is caught at the runloop
    /// boundary and the command's sink reports a drop to the caller.
    fn on_cmd(&mut self, env: &mut EngineCore, cmd: Command);

    /// Handles a data message. Default: acknowledge nothing, drop.
    fn on_data(&mut self, env: &mut EngineCore, data: DataMessage) {
        let _ = (env, data);
    }

    /// Handles an audio frame. Default: drop.
    fn on_audio_frame(&mut self, env: &mut EngineCore, frame: AudioFrameMessage) {
        let _ = (env, frame);
    }

    /// Handles a video frame. Default: drop.
    fn on_video_frame(&mut self, env: &mut EngineCore, frame: VideoFrameMessage) {
        let _ = (env, frame);
    }
}

/// Minimal extension that answers every command with success.
///
/// Useful as a graph placeholder and in tests.
#[derive(Debug, Default)]
pub struct NoopExtension;

impl Extension for NoopExtension {
    fn on_cmd(&mut self, env: &mut EngineCore, cmd: Command) {
        env.send_result(CommandResult::success_for(&cmd));
    }
}
