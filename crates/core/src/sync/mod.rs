//! View synchronization: fetching, realtime refresh and mutations.

mod controller;
mod debounce;
mod mutation;
mod realtime;
mod state;

pub use controller::*;
pub use debounce::*;
pub use mutation::*;
pub use realtime::*;
pub use state::*;
