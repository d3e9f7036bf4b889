pub mod hash;
pub mod ledger;
pub mod validator;

pub use hash::*;
pub use ledger::*;
pub use validator::*;
