pub mod appointment;
pub mod audit;
pub mod branch;
pub mod enums;
pub mod filters;
pub mod insurance;
pub mod invoice;
pub mod patient;
pub mod payment;
pub mod role;
pub mod treatment;
pub mod user;

pub use appointment::*;
pub use audit::*;
pub use branch::*;
pub use enums::*;
pub use filters::*;
pub use insurance::*;
pub use invoice::*;
pub use patient::*;
pub use payment::*;
pub use role::*;
pub use treatment::*;
pub use user::*;
