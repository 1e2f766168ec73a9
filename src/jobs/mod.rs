pub mod evergreen;
pub mod rising_decay;
pub mod session_expiry;

pub use evergreen::start_evergreen_recompute;
pub use rising_decay::start_rising_decay;
pub use session_expiry::start_session_expiry_worker;
