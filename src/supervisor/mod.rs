//! Process supervision: launching rsync, streaming its merged output,
//! detecting errors and reporting progress and completion.

mod buffer;
mod error;
mod flags;
mod handle;
mod policy;
mod runner;
mod sink;
mod state;

pub use buffer::*;
pub use error::*;
pub use flags::*;
pub use handle::*;
pub use policy::*;
pub use runner::*;
pub use sink::*;
pub use state::*;
