pub mod alert;
pub mod config;
pub mod errors;
pub mod sample;
pub mod score;
pub mod snapshot;

pub use alert::*;
pub use config::*;
pub use errors::*;
pub use sample::*;
pub use score::*;
pub use snapshot::*;
