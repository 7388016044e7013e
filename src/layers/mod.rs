//! Transforms that sit between the Spy and the base caller: creation/destruction tracking,
//! state tracking, memory watching, command-buffer recording/splitting, and user-layer loading
//! (components D-J).

pub mod command_recorder;
pub mod command_splitter;
pub mod creation_tracker;
pub mod layerer;
pub mod memory_tracker;
pub mod state_tracker;
