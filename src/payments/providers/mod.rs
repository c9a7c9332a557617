pub mod midtrans;
pub mod mock;

pub use midtrans::{MidtransConfig, MidtransGateway};
pub use mock::MockGateway;
