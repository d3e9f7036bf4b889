pub mod epoch_change;
pub mod quorum;
pub mod trusted_state;
pub mod waypoint;

pub use epoch_change::*;
pub use quorum::*;
pub use trusted_state::*;
pub use waypoint::*;
