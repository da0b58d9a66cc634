pub mod endpoint;
pub mod status;
pub mod subscription;

pub use endpoint::*;
pub use status::*;
pub use subscription::*;
