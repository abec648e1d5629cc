// Built-in tasks for demos and tests

pub mod corridor;

pub use corridor::{Corridor, CorridorState};
