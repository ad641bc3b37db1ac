//! The seam through which components hand messages to the transport layer.

use crate::message::Message;

/// Delivers messages to their receivers. Implemented by the host's transport.
pub trait Dispatcher {
    fn dispatch(&mut self, msg: Message);
}

/// Collecting dispatcher, used by hosts that drain messages after a frame and by tests.
impl Dispatcher for Vec<Message> {
    fn dispatch(&mut self, msg: Message) {
        self.push(msg);
    }
}

impl<D: Dispatcher + ?Sized> Dispatcher for &mut D {
    fn dispatch(&mut self, msg: Message) {
        (**self).dispatch(msg);
    }
}
