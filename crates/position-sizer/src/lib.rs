pub mod recommender;
pub mod trailing_stop;

pub use recommender::*;
pub use trailing_stop::*;
