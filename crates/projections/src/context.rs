use event_store::StreamName;

/// Capabilities handed to an event handler for the duration of one call.
pub struct HandlerContext<'a, R> {
    read_model: &'a mut R,
    stream_name: &'a StreamName,
    stop_requested: bool,
}

impl<'a, R> HandlerContext<'a, R> {
    pub(crate) fn new(read_model: &'a mut R, stream_name: &'a StreamName) -> Self {
        Self {
            read_model,
            stream_name,
            stop_requested: false,
        }
    }

    /// Asks the projector to stop after this event.
    pub fn stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn read_model(&self) -> &R {
        self.read_model
    }

    pub fn read_model_mut(&mut self) -> &mut R {
        self.read_model
    }

    /// The stream the current event was read from.
    pub fn stream_name(&self) -> &StreamName {
        self.stream_name
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_requested
    }
}
