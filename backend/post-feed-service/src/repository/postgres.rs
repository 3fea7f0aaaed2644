use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};

use super::{AttributeDirectory, PostFilter, PostRepository, RelationRepository, SortKey, SortOrder};
use crate::domain::models::truncate_millis;
use crate::domain::{
    Attribute, Post, PostField, PostId, PostMedia, PostUpdate, RelationFlag, UserId,
    UserPostRelation,
};
use crate::error::{FeedError, FeedResult};

const POST_COLUMNS: &str = "post_id, user_id, forward_post_id, comment_post_id, ref_post_id, \
     content, media_msgs, at_user_ids, allow_comment, allow_forward, is_pinned, \
     create_time, update_time";

const ATTRIBUTE_COLUMNS: &str =
    "user_id, account, nickname, face_url, cover_url, public_key, about, address";

#[derive(Debug, sqlx::FromRow)]
struct PostRow {
    post_id: String,
    user_id: String,
    forward_post_id: Option<String>,
    comment_post_id: Option<String>,
    ref_post_id: Option<String>,
    content: String,
    media_msgs: Json<Vec<PostMedia>>,
    at_user_ids: Vec<String>,
    allow_comment: bool,
    allow_forward: bool,
    is_pinned: bool,
    create_time: DateTime<Utc>,
    update_time: DateTime<Utc>,
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        Post {
            post_id: row.post_id,
            user_id: row.user_id,
            forward_post_id: row.forward_post_id,
            comment_post_id: row.comment_post_id,
            ref_post_id: row.ref_post_id,
            content: row.content,
            media_msgs: row.media_msgs.0,
            at_user_ids: row.at_user_ids,
            allow_comment: row.allow_comment,
            allow_forward: row.allow_forward,
            is_pinned: row.is_pinned,
            create_time: Some(row.create_time),
            update_time: Some(row.update_time),
        }
    }
}

/// PostgreSQL-backed repositories sharing one pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> FeedResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| FeedError::Unavailable(format!("migration failed: {}", e)))
    }

    fn select_posts() -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new("SELECT ");
        qb.push(POST_COLUMNS).push(" FROM posts WHERE ");
        qb
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &PostFilter) {
    match filter {
        PostFilter::ById(id) => {
            qb.push("post_id = ").push_bind(id.clone());
        }
        PostFilter::ByIds(ids) => {
            qb.push("post_id = ANY(").push_bind(ids.clone()).push(")");
        }
        PostFilter::ByAuthor(user_id) => {
            qb.push("user_id = ").push_bind(user_id.clone());
        }
        PostFilter::ByAuthorsExcludingComments(user_ids) => {
            // NULL and '' both mean "not a comment"
            qb.push("user_id = ANY(")
                .push_bind(user_ids.clone())
                .push(") AND (comment_post_id IS NULL OR comment_post_id = '')");
        }
        PostFilter::ByCommentParent(parent) if parent.is_empty() => {
            qb.push("FALSE");
        }
        PostFilter::ByCommentParent(parent) => {
            qb.push("comment_post_id = ").push_bind(parent.clone());
        }
        PostFilter::All => {
            qb.push("TRUE");
        }
    }
}

fn push_after(
    qb: &mut QueryBuilder<'_, Postgres>,
    order: SortOrder,
    key: &SortKey,
) -> FeedResult<()> {
    let ts = DateTime::<Utc>::from_timestamp_millis(key.create_millis)
        .ok_or_else(|| FeedError::InvalidArgument("cursor timestamp out of range".into()))?;

    qb.push(" AND (");
    if order == SortOrder::PinnedThenCreateTimeDesc {
        qb.push("is_pinned < ")
            .push_bind(key.pinned)
            .push(" OR (is_pinned = ")
            .push_bind(key.pinned)
            .push(" AND (");
    }
    qb.push("create_time < ")
        .push_bind(ts)
        .push(" OR (create_time = ")
        .push_bind(ts)
        .push(" AND post_id COLLATE \"C\" < ")
        .push_bind(key.post_id.clone())
        .push(")");
    if order == SortOrder::PinnedThenCreateTimeDesc {
        qb.push("))");
    }
    qb.push(")");
    Ok(())
}

fn push_order(qb: &mut QueryBuilder<'_, Postgres>, order: SortOrder) {
    match order {
        SortOrder::CreateTimeDesc => {
            qb.push(" ORDER BY create_time DESC, post_id COLLATE \"C\" DESC");
        }
        SortOrder::PinnedThenCreateTimeDesc => {
            qb.push(" ORDER BY is_pinned DESC, create_time DESC, post_id COLLATE \"C\" DESC");
        }
    }
}

/// Timestamps are stored at millisecond precision so that keyset cursors
/// compare exactly against the column.
async fn insert_post(conn: &mut PgConnection, post: &Post) -> FeedResult<()> {
    let create_time = truncate_millis(post.create_time.unwrap_or_else(Utc::now));
    let update_time = post.update_time.map(truncate_millis).unwrap_or(create_time);
    sqlx::query(
        r#"
        INSERT INTO posts (post_id, user_id, forward_post_id, comment_post_id, ref_post_id,
                           content, media_msgs, at_user_ids, allow_comment, allow_forward,
                           is_pinned, create_time, update_time)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(&post.post_id)
    .bind(&post.user_id)
    .bind(&post.forward_post_id)
    .bind(&post.comment_post_id)
    .bind(&post.ref_post_id)
    .bind(&post.content)
    .bind(Json(&post.media_msgs))
    .bind(&post.at_user_ids)
    .bind(post.allow_comment)
    .bind(post.allow_forward)
    .bind(post.is_pinned)
    .bind(create_time)
    .bind(update_time)
    .execute(conn)
    .await?;
    Ok(())
}

fn set_flag_sql(flag: RelationFlag) -> String {
    format!(
        "INSERT INTO user_post_relations (user_id, post_id, {col}) VALUES ($1, $2, $3) \
         ON CONFLICT (user_id, post_id) DO UPDATE SET {col} = EXCLUDED.{col}",
        col = flag.column()
    )
}

#[async_trait]
impl PostRepository for PgStore {
    async fn insert_many(&self, posts: &[Post]) -> FeedResult<()> {
        if posts.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for post in posts {
            insert_post(&mut *tx, post).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_with_relations(
        &self,
        post: &Post,
        marks: &[(PostId, RelationFlag)],
    ) -> FeedResult<()> {
        let mut tx = self.pool.begin().await?;
        insert_post(&mut *tx, post).await?;
        for (target, flag) in marks {
            sqlx::query(&set_flag_sql(*flag))
                .bind(&post.user_id)
                .bind(target)
                .bind(true)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_ids(&self, post_ids: &[PostId]) -> FeedResult<Vec<Post>> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = Self::select_posts();
        push_filter(&mut qb, &PostFilter::ByIds(post_ids.to_vec()));
        let rows: Vec<PostRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Post::from).collect())
    }

    async fn exists(&self, post_id: &str) -> FeedResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM posts WHERE post_id = $1)")
                .bind(post_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn update(
        &self,
        post_id: &str,
        update: &PostUpdate,
        now: DateTime<Utc>,
    ) -> FeedResult<bool> {
        if update.is_empty() {
            return self.exists(post_id).await;
        }

        let now = truncate_millis(now);
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("UPDATE posts SET ");
        {
            let mut set = qb.separated(", ");
            for field in update.fields() {
                match field {
                    PostField::AllowComment(v) => {
                        set.push("allow_comment = ").push_bind_unseparated(*v);
                    }
                    PostField::AllowForward(v) => {
                        set.push("allow_forward = ").push_bind_unseparated(*v);
                    }
                    PostField::Pinned(v) => {
                        set.push("is_pinned = ").push_bind_unseparated(*v);
                    }
                }
            }
            set.push("update_time = ").push_bind_unseparated(now);
        }
        qb.push(" WHERE post_id = ").push_bind(post_id.to_string());

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_many(&self, post_ids: &[PostId]) -> FeedResult<u64> {
        if post_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM posts WHERE post_id = ANY($1)")
            .bind(post_ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn find_window(
        &self,
        filter: &PostFilter,
        order: SortOrder,
        after: Option<&SortKey>,
        limit: i64,
    ) -> FeedResult<Vec<Post>> {
        let mut qb = Self::select_posts();
        qb.push("(");
        push_filter(&mut qb, filter);
        qb.push(")");
        if let Some(key) = after {
            push_after(&mut qb, order, key)?;
        }
        push_order(&mut qb, order);
        qb.push(" LIMIT ").push_bind(limit.max(0));

        let rows: Vec<PostRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Post::from).collect())
    }

    async fn count(&self, filter: &PostFilter) -> FeedResult<i64> {
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM posts WHERE ");
        push_filter(&mut qb, filter);
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn find_skip(
        &self,
        filter: &PostFilter,
        order: SortOrder,
        skip: i64,
        limit: i64,
    ) -> FeedResult<Vec<Post>> {
        let mut qb = Self::select_posts();
        push_filter(&mut qb, filter);
        push_order(&mut qb, order);
        qb.push(" LIMIT ")
            .push_bind(limit.max(0))
            .push(" OFFSET ")
            .push_bind(skip.max(0));

        let rows: Vec<PostRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Post::from).collect())
    }

    async fn find_pinned(&self, user_id: &str) -> FeedResult<Option<Post>> {
        let mut qb = Self::select_posts();
        qb.push("user_id = ")
            .push_bind(user_id.to_string())
            .push(" AND is_pinned LIMIT 1");
        let row: Option<PostRow> = qb.build_query_as().fetch_optional(&self.pool).await?;
        Ok(row.map(Post::from))
    }

    async fn find_by_forward(
        &self,
        user_id: &str,
        forward_post_id: &str,
    ) -> FeedResult<Option<Post>> {
        if forward_post_id.is_empty() {
            return Ok(None);
        }
        let mut qb = Self::select_posts();
        qb.push("user_id = ")
            .push_bind(user_id.to_string())
            .push(" AND forward_post_id = ")
            .push_bind(forward_post_id.to_string())
            .push(" LIMIT 1");
        let row: Option<PostRow> = qb.build_query_as().fetch_optional(&self.pool).await?;
        Ok(row.map(Post::from))
    }

    async fn find_comment_post_ids_by_user(&self, user_id: &str) -> FeedResult<Vec<PostId>> {
        let ids: Vec<PostId> = sqlx::query_scalar(
            r#"
            SELECT post_id
            FROM posts
            WHERE user_id = $1
              AND comment_post_id IS NOT NULL
              AND comment_post_id <> ''
            ORDER BY post_id COLLATE "C"
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

#[async_trait]
impl RelationRepository for PgStore {
    async fn find_by_post_ids(&self, post_ids: &[PostId]) -> FeedResult<Vec<UserPostRelation>> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }
        let relations = sqlx::query_as::<_, UserPostRelation>(
            r#"
            SELECT user_id, post_id, is_liked, is_collected, is_forwarded, is_commented
            FROM user_post_relations
            WHERE post_id = ANY($1)
            "#,
        )
        .bind(post_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(relations)
    }

    async fn get(&self, user_id: &str, post_id: &str) -> FeedResult<Option<UserPostRelation>> {
        let relation = sqlx::query_as::<_, UserPostRelation>(
            r#"
            SELECT user_id, post_id, is_liked, is_collected, is_forwarded, is_commented
            FROM user_post_relations
            WHERE user_id = $1 AND post_id = $2
            "#,
        )
        .bind(user_id)
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(relation)
    }

    async fn toggle(&self, user_id: &str, post_id: &str, flag: RelationFlag) -> FeedResult<bool> {
        let column = flag.column();
        let sql = format!(
            "INSERT INTO user_post_relations (user_id, post_id, {col}) VALUES ($1, $2, TRUE) \
             ON CONFLICT (user_id, post_id) DO UPDATE \
             SET {col} = NOT user_post_relations.{col} \
             RETURNING {col}",
            col = column
        );
        let value: bool = sqlx::query_scalar(&sql)
            .bind(user_id)
            .bind(post_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(value)
    }
}

#[async_trait]
impl AttributeDirectory for PgStore {
    async fn find_by_user_ids(&self, user_ids: &[UserId]) -> FeedResult<Vec<Attribute>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM attributes WHERE user_id = ANY($1)",
            ATTRIBUTE_COLUMNS
        );
        let attributes = sqlx::query_as::<_, Attribute>(&sql)
            .bind(user_ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(attributes)
    }

    async fn find_by_accounts(&self, accounts: &[String]) -> FeedResult<Vec<Attribute>> {
        if accounts.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM attributes WHERE account = ANY($1)",
            ATTRIBUTE_COLUMNS
        );
        let attributes = sqlx::query_as::<_, Attribute>(&sql)
            .bind(accounts)
            .fetch_all(&self.pool)
            .await?;
        Ok(attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(pinned: bool) -> SortKey {
        SortKey {
            pinned,
            create_millis: 100,
            post_id: "p1".into(),
        }
    }

    fn filter_sql(filter: &PostFilter) -> String {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("");
        push_filter(&mut qb, filter);
        qb.sql().to_string()
    }

    #[test]
    fn test_comment_exclusion_covers_null_and_empty() {
        let sql = filter_sql(&PostFilter::ByAuthorsExcludingComments(vec!["u1".into()]));
        assert_eq!(
            sql,
            "user_id = ANY($1) AND (comment_post_id IS NULL OR comment_post_id = '')"
        );
    }

    #[test]
    fn test_empty_comment_parent_matches_nothing() {
        assert_eq!(filter_sql(&PostFilter::ByCommentParent(String::new())), "FALSE");
        assert_eq!(
            filter_sql(&PostFilter::ByCommentParent("p1".into())),
            "comment_post_id = $1"
        );
    }

    #[test]
    fn test_keyset_predicate_ties_on_bytewise_post_id() {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("");
        push_after(&mut qb, SortOrder::CreateTimeDesc, &key(false)).unwrap();
        push_order(&mut qb, SortOrder::CreateTimeDesc);
        assert_eq!(
            qb.sql(),
            " AND (create_time < $1 OR (create_time = $2 AND post_id COLLATE \"C\" < $3)) \
             ORDER BY create_time DESC, post_id COLLATE \"C\" DESC"
        );
    }

    #[test]
    fn test_pinned_keyset_predicate_leads_with_pin() {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("");
        push_after(&mut qb, SortOrder::PinnedThenCreateTimeDesc, &key(true)).unwrap();
        push_order(&mut qb, SortOrder::PinnedThenCreateTimeDesc);
        assert_eq!(
            qb.sql(),
            " AND (is_pinned < $1 OR (is_pinned = $2 AND (create_time < $3 \
             OR (create_time = $4 AND post_id COLLATE \"C\" < $5)))) \
             ORDER BY is_pinned DESC, create_time DESC, post_id COLLATE \"C\" DESC"
        );
    }

    #[test]
    fn test_out_of_range_cursor_time_is_rejected() {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("");
        let bad = SortKey {
            pinned: false,
            create_millis: i64::MAX,
            post_id: "p1".into(),
        };
        let err = push_after(&mut qb, SortOrder::CreateTimeDesc, &bad).unwrap_err();
        assert!(matches!(err, FeedError::InvalidArgument(_)));
    }

    #[test]
    fn test_set_flag_sql_targets_one_column() {
        let sql = set_flag_sql(RelationFlag::Commented);
        assert!(sql.contains("(user_id, post_id, is_commented)"));
        assert!(sql.contains("SET is_commented = EXCLUDED.is_commented"));
        assert!(!sql.contains("is_liked"));
    }
}
