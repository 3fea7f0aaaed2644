pub mod id_gen;
pub mod posts;

pub use id_gen::{CandidateSource, HashCandidates, PostIdGenerator};
pub use posts::{PostService, PublishPost};
