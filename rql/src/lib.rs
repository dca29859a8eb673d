pub mod agent;
pub mod environment;
pub mod local;
pub mod log;
pub mod model;
pub mod prelude;
pub mod protocol;
pub mod remote_loop;
pub mod replay_memory;
pub mod session;
pub mod state_buffer;
