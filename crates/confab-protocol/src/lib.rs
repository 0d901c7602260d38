pub mod envelope;
pub mod error;

pub use envelope::{ClientFrame, EventName, ServerMessage};
pub use error::CommandError;
