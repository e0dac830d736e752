pub mod commands;
pub mod controller;
pub mod debounce;
pub mod errors;
pub mod events;
pub mod scores;
pub mod state;
pub mod store;
pub mod traversal;

pub use commands::ScoringCommand;
pub use controller::{ControllerPhase, Progress, ResumeSummary, SessionController};
pub use errors::SessionError;
pub use events::{EventReceiver, EventSender, SessionEvent};
pub use scores::ScoreStore;
pub use state::SessionState;
pub use store::{PersistentSession, SessionStorage};
pub use traversal::{Cursor, Grid};
