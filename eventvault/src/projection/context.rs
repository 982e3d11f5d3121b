use crate::message::Message;
use crate::types::StreamName;

/// Side effect requested by a handler.
#[derive(Debug, Clone)]
pub(crate) enum ContextAction {
    Emit(Message),
    LinkTo(StreamName, Message),
}

/// Passed to every handler invocation.
///
/// Handlers are synchronous; the side effects they request here are carried
/// out by the projector, in order, as soon as the handler returns.
#[derive(Debug, Default)]
pub struct HandlerContext {
    stream_name: Option<String>,
    actions: Vec<ContextAction>,
    stop_requested: bool,
}

impl HandlerContext {
    pub(crate) fn new(stream_name: Option<&str>) -> Self {
        Self {
            stream_name: stream_name.map(str::to_string),
            actions: Vec::new(),
            stop_requested: false,
        }
    }

    /// Stream the current event was read from.
    pub fn stream_name(&self) -> Option<&str> {
        self.stream_name.as_deref()
    }

    /// Append `event` to the projection's own output stream.
    pub fn emit(&mut self, event: Message) {
        self.actions.push(ContextAction::Emit(event));
    }

    /// Append `event` to `stream`, creating the stream if needed.
    pub fn link_to(&mut self, stream: StreamName, event: Message) {
        self.actions.push(ContextAction::LinkTo(stream, event));
    }

    /// Stop the projection once this handler returns.
    pub fn stop(&mut self) {
        self.stop_requested = true;
    }

    /// Whether `stop` was called.
    pub const fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    pub(crate) fn into_parts(self) -> (Vec<ContextAction>, bool) {
        (self.actions, self.stop_requested)
    }
}
