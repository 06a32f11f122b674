pub mod action_gate;
pub mod scene;
pub mod traits;
pub mod types;
