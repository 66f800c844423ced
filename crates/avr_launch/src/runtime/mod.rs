//! Runtime components: ordering, the container runtime boundary and the
//! run session

pub mod backend;
pub mod order;
pub mod process;
pub mod session;

pub use backend::*;
pub use order::*;
pub use process::*;
pub use session::*;
