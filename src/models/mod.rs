pub mod device;
pub mod session;
pub mod token;
pub mod user;

pub use device::*;
pub use session::*;
pub use token::*;
pub use user::*;
