mod fibonacci;
mod interface;
mod prime;

pub use fibonacci::*;
pub use interface::*;
pub use prime::*;
