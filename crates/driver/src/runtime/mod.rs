//! Conversation runtime: the loop that alternates completion-engine calls
//! with tool dispatch until the engine produces a final answer.

pub mod turn;

pub use turn::{ensure_session_alive, run_turn, TurnError, TurnEvent, TurnOptions, TurnOutcome};
