pub mod models;

pub use models::{
    Attribute, Post, PostField, PostId, PostMedia, PostUpdate, PostView, RefKind, RelationFlag,
    UserId, UserPostRelation,
};
