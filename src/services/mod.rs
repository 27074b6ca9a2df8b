pub mod account;
pub mod assertion;
pub mod ceremony;
pub mod session;

pub use account::AccountService;
pub use assertion::AssertionIssuer;
pub use ceremony::CeremonyEngine;
pub use session::SessionManager;
