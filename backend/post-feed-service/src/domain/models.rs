use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type PostId = String;
pub type UserId = String;

pub const MEDIA_TYPE_PICTURE: i32 = 1;
pub const MEDIA_TYPE_VIDEO: i32 = 2;

/// Post document as persisted in the post collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub post_id: PostId,
    pub user_id: UserId,
    #[serde(default)]
    pub forward_post_id: Option<PostId>,
    #[serde(default)]
    pub comment_post_id: Option<PostId>,
    #[serde(default)]
    pub ref_post_id: Option<PostId>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub media_msgs: Vec<PostMedia>,
    #[serde(default)]
    pub at_user_ids: Vec<UserId>,
    pub allow_comment: bool,
    pub allow_forward: bool,
    #[serde(default)]
    pub is_pinned: bool,
    pub create_time: Option<DateTime<Utc>>,
    pub update_time: Option<DateTime<Utc>>,
}

/// Treat `null`, `""` and a missing field identically.
pub fn normalize_ref(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

impl Post {
    pub fn new(post_id: impl Into<PostId>, user_id: impl Into<UserId>) -> Self {
        Self {
            post_id: post_id.into(),
            user_id: user_id.into(),
            forward_post_id: None,
            comment_post_id: None,
            ref_post_id: None,
            content: String::new(),
            media_msgs: Vec::new(),
            at_user_ids: Vec::new(),
            allow_comment: true,
            allow_forward: true,
            is_pinned: false,
            create_time: None,
            update_time: None,
        }
    }

    pub fn forward_target(&self) -> Option<&str> {
        normalize_ref(self.forward_post_id.as_deref())
    }

    pub fn comment_target(&self) -> Option<&str> {
        normalize_ref(self.comment_post_id.as_deref())
    }

    pub fn ref_target(&self) -> Option<&str> {
        normalize_ref(self.ref_post_id.as_deref())
    }

    pub fn is_comment(&self) -> bool {
        self.comment_target().is_some()
    }

    pub fn reference(&self, kind: RefKind) -> Option<&str> {
        match kind {
            RefKind::Forward => self.forward_target(),
            RefKind::Comment => self.comment_target(),
            RefKind::Ref => self.ref_target(),
        }
    }

    /// Fill missing timestamps with `now` and truncate both to milliseconds,
    /// the precision cursor keys carry.
    pub fn stamp(&mut self, now: DateTime<Utc>) {
        let now = truncate_millis(now);
        self.create_time = Some(self.create_time.map(truncate_millis).unwrap_or(now));
        self.update_time = Some(self.update_time.map(truncate_millis).unwrap_or(now));
    }

    pub fn create_millis(&self) -> i64 {
        self.create_time.map(|t| t.timestamp_millis()).unwrap_or(0)
    }
}

pub fn truncate_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

/// The three ways one post can point at another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefKind {
    Forward,
    Comment,
    Ref,
}

impl RefKind {
    pub const ALL: [RefKind; 3] = [RefKind::Forward, RefKind::Comment, RefKind::Ref];
}

/// Embedded media item; either the picture or the video payload is populated
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostMedia {
    pub media_type: i32,
    #[serde(default)]
    pub post_picture: PostPicture,
    #[serde(default)]
    pub post_video: PostVideo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PictureInfo {
    pub uuid: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub size: i64,
    pub width: i32,
    pub height: i32,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostPicture {
    pub source_path: String,
    pub source_picture: PictureInfo,
    pub big_picture: PictureInfo,
    pub snapshot_picture: PictureInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostVideo {
    pub video_path: String,
    pub video_uuid: String,
    pub video_url: String,
    pub video_type: String,
    pub video_size: i64,
    pub duration: i64,
    pub snapshot_path: String,
    pub snapshot_uuid: String,
    pub snapshot_size: i64,
    pub snapshot_url: String,
    pub snapshot_width: i32,
    pub snapshot_height: i32,
    pub snapshot_type: String,
}

/// Public profile snapshot owned by the account subsystem
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Attribute {
    pub user_id: UserId,
    pub account: String,
    pub nickname: String,
    pub face_url: String,
    pub cover_url: String,
    pub public_key: String,
    pub about: String,
    pub address: String,
}

/// Interaction record for one (user, post) pair
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserPostRelation {
    pub user_id: UserId,
    pub post_id: PostId,
    pub is_liked: bool,
    pub is_collected: bool,
    pub is_forwarded: bool,
    pub is_commented: bool,
}

impl UserPostRelation {
    pub fn new(user_id: impl Into<UserId>, post_id: impl Into<PostId>) -> Self {
        Self {
            user_id: user_id.into(),
            post_id: post_id.into(),
            ..Default::default()
        }
    }

    pub fn flag(&self, flag: RelationFlag) -> bool {
        match flag {
            RelationFlag::Liked => self.is_liked,
            RelationFlag::Collected => self.is_collected,
            RelationFlag::Forwarded => self.is_forwarded,
            RelationFlag::Commented => self.is_commented,
        }
    }

    pub fn set_flag(&mut self, flag: RelationFlag, value: bool) {
        match flag {
            RelationFlag::Liked => self.is_liked = value,
            RelationFlag::Collected => self.is_collected = value,
            RelationFlag::Forwarded => self.is_forwarded = value,
            RelationFlag::Commented => self.is_commented = value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationFlag {
    Liked,
    Collected,
    Forwarded,
    Commented,
}

impl RelationFlag {
    pub fn column(self) -> &'static str {
        match self {
            RelationFlag::Liked => "is_liked",
            RelationFlag::Collected => "is_collected",
            RelationFlag::Forwarded => "is_forwarded",
            RelationFlag::Commented => "is_commented",
        }
    }
}

/// One legal mutable post field with its new value
#[derive(Debug, Clone, PartialEq)]
pub enum PostField {
    AllowComment(bool),
    AllowForward(bool),
    Pinned(bool),
}

/// Sparse partial update of a post; `update_time` is always stamped when
/// the update is applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostUpdate {
    fields: Vec<PostField>,
}

impl PostUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: PostField) -> Self {
        // last write wins for the same field
        self.fields
            .retain(|f| std::mem::discriminant(f) != std::mem::discriminant(&field));
        self.fields.push(field);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[PostField] {
        &self.fields
    }

    pub fn apply(&self, post: &mut Post, now: DateTime<Utc>) {
        if self.is_empty() {
            return;
        }
        for field in &self.fields {
            match field {
                PostField::AllowComment(v) => post.allow_comment = *v,
                PostField::AllowForward(v) => post.allow_forward = *v,
                PostField::Pinned(v) => post.is_pinned = *v,
            }
        }
        post.update_time = Some(truncate_millis(now));
    }
}

/// Viewer flags travel as 0/1 on the wire.
mod flag_as_int {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        Ok(u8::deserialize(deserializer)? != 0)
    }
}

/// Denormalized, viewer-relative projection of a post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostView {
    #[serde(flatten)]
    pub post: Post,
    #[serde(with = "flag_as_int")]
    pub is_liked: bool,
    #[serde(with = "flag_as_int")]
    pub is_collected: bool,
    #[serde(with = "flag_as_int")]
    pub is_forwarded: bool,
    pub like_count: i64,
    pub collect_count: i64,
    pub forward_count: i64,
    pub comment_count: i64,
    pub user_info: Option<Attribute>,
    pub at_user_info_list: Vec<Attribute>,
    pub forward_post: Option<Box<PostView>>,
    pub comment_post: Option<Box<PostView>>,
    pub ref_post: Option<Box<PostView>>,
}

impl PostView {
    pub fn post_id(&self) -> &str {
        &self.post.post_id
    }

    pub fn referenced(&self, kind: RefKind) -> Option<&PostView> {
        match kind {
            RefKind::Forward => self.forward_post.as_deref(),
            RefKind::Comment => self.comment_post.as_deref(),
            RefKind::Ref => self.ref_post.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_reference_forms_are_equivalent() {
        let mut post = Post::new("1", "u1");
        assert!(!post.is_comment());

        post.comment_post_id = Some(String::new());
        assert!(!post.is_comment());

        post.comment_post_id = Some("42".into());
        assert!(post.is_comment());

        let missing: Post = serde_json::from_value(serde_json::json!({
            "post_id": "2",
            "user_id": "u1",
            "allow_comment": true,
            "allow_forward": true,
            "create_time": null,
            "update_time": null,
        }))
        .unwrap();
        assert_eq!(missing.comment_target(), None);

        let null: Post = serde_json::from_value(serde_json::json!({
            "post_id": "3",
            "user_id": "u1",
            "comment_post_id": null,
            "allow_comment": true,
            "allow_forward": true,
            "create_time": null,
            "update_time": null,
        }))
        .unwrap();
        assert_eq!(null.comment_target(), None);
    }

    #[test]
    fn test_update_is_sparse_and_stamps_time() {
        let mut post = Post::new("1", "u1");
        post.stamp(Utc::now());
        let before = post.clone();

        PostUpdate::new().apply(&mut post, Utc::now());
        assert_eq!(post, before);

        let later = before.update_time.unwrap() + chrono::Duration::seconds(5);
        PostUpdate::new()
            .set(PostField::AllowComment(true))
            .set(PostField::AllowComment(false))
            .apply(&mut post, later);
        assert!(!post.allow_comment);
        assert!(post.allow_forward);
        assert_eq!(post.update_time, Some(truncate_millis(later)));
    }

    #[test]
    fn test_stamp_truncates_supplied_timestamps() {
        let supplied = DateTime::<Utc>::from_timestamp(100, 500_700_000).unwrap();
        let mut post = Post::new("1", "u1");
        post.create_time = Some(supplied);
        post.stamp(Utc::now());

        assert_eq!(post.create_millis(), 100_500);
        assert_eq!(post.create_time.unwrap().timestamp_subsec_nanos(), 500_000_000);
        assert!(post.update_time.unwrap() >= post.create_time.unwrap());
        assert_eq!(post.update_time, post.update_time.map(truncate_millis));
    }

    #[test]
    fn test_view_flags_serialize_as_zero_or_one() {
        let view = PostView {
            post: Post::new("1", "u1"),
            is_liked: true,
            is_collected: false,
            is_forwarded: true,
            like_count: 1,
            collect_count: 0,
            forward_count: 1,
            comment_count: 0,
            user_info: None,
            at_user_info_list: Vec::new(),
            forward_post: None,
            comment_post: None,
            ref_post: None,
        };

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["is_liked"], 1);
        assert_eq!(json["is_collected"], 0);
        assert_eq!(json["is_forwarded"], 1);
        assert_eq!(json["post_id"], "1");
    }

    #[test]
    fn test_relation_flags_are_independent() {
        let mut rel = UserPostRelation::new("u1", "p1");
        rel.set_flag(RelationFlag::Liked, true);
        assert!(rel.flag(RelationFlag::Liked));
        assert!(!rel.flag(RelationFlag::Collected));
        assert!(!rel.flag(RelationFlag::Forwarded));
        assert!(!rel.flag(RelationFlag::Commented));
    }
}
