pub mod engagement;
pub mod feed;
pub mod follow;
pub mod identity;
pub mod session;

pub use engagement::{negative_engagement, positive_engagement};
pub use feed::get_feed;
pub use follow::toggle_follow;
pub use session::logout;
