pub mod bounds;
pub mod catalog;
pub mod decay;
pub mod mutation;
pub mod rollback;
pub mod scoring;
pub mod state;
pub mod weights;

pub use bounds::enforce;
pub use catalog::*;
pub use decay::*;
pub use mutation::*;
pub use rollback::*;
pub use scoring::*;
pub use state::*;
pub use weights::*;
