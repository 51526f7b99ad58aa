mod store;
mod svr;

pub use store::{Receipt, ReceiveStore};
pub use svr::{build_app, startup};
