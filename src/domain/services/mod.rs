mod assembler;
mod controller;
mod conversations;
mod store;

pub use assembler::*;
pub use controller::*;
pub use conversations::*;
pub use store::*;
