use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder, Transaction};
use time::OffsetDateTime;

use crate::{
    application::repos::{
        BannerListFilter, BannersRepo, BannersWriteRepo, CreateBannerParams, RepoError,
        UpdateBannerParams,
    },
    domain::banners::{
        Banner, BannerId, BannerVersion, FeatureId, HistoryPolicy, TagId, supplied_content,
    },
};

use super::{PostgresRepositories, map_sqlx_error};

const BANNER_COLUMNS: &str = "b.id, b.content, b.created_at, b.updated_at, \
    m.feature_id, m.is_active, \
    ARRAY_AGG(m.tag_id ORDER BY m.tag_id) AS tag_ids";

const BANNER_GROUP_BY: &str = " GROUP BY b.id, m.feature_id, m.is_active";

#[derive(sqlx::FromRow)]
struct BannerRow {
    id: i64,
    content: Value,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    feature_id: i64,
    is_active: bool,
    tag_ids: Vec<i64>,
}

impl From<BannerRow> for Banner {
    fn from(row: BannerRow) -> Self {
        Self {
            id: row.id,
            content: row.content,
            is_active: row.is_active,
            feature_id: row.feature_id,
            tag_ids: row.tag_ids,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BannerVersionRow {
    banner_id: i64,
    content: Value,
    updated_at: OffsetDateTime,
}

impl From<BannerVersionRow> for BannerVersion {
    fn from(row: BannerVersionRow) -> Self {
        Self {
            banner_id: row.banner_id,
            content: row.content,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LockedBannerRow {
    content: Value,
    updated_at: OffsetDateTime,
}

#[derive(sqlx::FromRow)]
struct MappingStateRow {
    feature_id: i64,
    is_active: bool,
}

#[async_trait]
impl BannersRepo for PostgresRepositories {
    async fn get_banner(
        &self,
        tag_id: TagId,
        feature_id: FeatureId,
        only_active: bool,
    ) -> Result<Banner, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT ");
        qb.push(BANNER_COLUMNS);
        qb.push(
            " FROM banners b \
              INNER JOIN banner_mappings m ON m.banner_id = b.id \
              WHERE b.id = (SELECT banner_id FROM banner_mappings WHERE tag_id = ",
        );
        qb.push_bind(tag_id);
        qb.push(" AND feature_id = ");
        qb.push_bind(feature_id);
        if only_active {
            qb.push(" AND is_active");
        }
        qb.push(")");
        qb.push(BANNER_GROUP_BY);

        let row = qb
            .build_query_as::<BannerRow>()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        row.map(Banner::from).ok_or(RepoError::NotFound)
    }

    async fn get_banner_by_id(&self, id: BannerId) -> Result<Banner, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT ");
        qb.push(BANNER_COLUMNS);
        qb.push(
            " FROM banners b \
              INNER JOIN banner_mappings m ON m.banner_id = b.id \
              WHERE b.id = ",
        );
        qb.push_bind(id);
        qb.push(BANNER_GROUP_BY);

        let row = qb
            .build_query_as::<BannerRow>()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        row.map(Banner::from).ok_or(RepoError::NotFound)
    }

    async fn list_banners(&self, filter: BannerListFilter) -> Result<Vec<Banner>, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT ");
        qb.push(BANNER_COLUMNS);
        qb.push(
            " FROM banners b \
              INNER JOIN banner_mappings m ON m.banner_id = b.id \
              WHERE TRUE",
        );

        if let Some(feature_id) = filter.feature_id {
            qb.push(" AND m.feature_id = ");
            qb.push_bind(feature_id);
        }

        // Filter by tag without truncating the aggregated tag list.
        if let Some(tag_id) = filter.tag_id {
            qb.push(" AND b.id IN (SELECT banner_id FROM banner_mappings WHERE tag_id = ");
            qb.push_bind(tag_id);
            qb.push(")");
        }

        qb.push(BANNER_GROUP_BY);
        qb.push(" ORDER BY b.id ASC");

        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ");
            qb.push_bind(limit);
        }

        if let Some(offset) = filter.offset {
            qb.push(" OFFSET ");
            qb.push_bind(offset);
        }

        let rows = qb
            .build_query_as::<BannerRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(Banner::from).collect())
    }

    async fn list_banner_versions(
        &self,
        banner_id: BannerId,
    ) -> Result<Vec<BannerVersion>, RepoError> {
        let rows = sqlx::query_as::<_, BannerVersionRow>(
            r#"
            SELECT banner_id, content, updated_at
            FROM banners_history
            WHERE banner_id = $1
            ORDER BY updated_at DESC
            "#,
        )
        .bind(banner_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(BannerVersion::from).collect())
    }
}

#[async_trait]
impl BannersWriteRepo for PostgresRepositories {
    async fn create_banner(&self, params: CreateBannerParams) -> Result<BannerId, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO banners (content)
            VALUES ($1)
            RETURNING id
            "#,
        )
        .bind(&params.content)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        insert_mappings(
            &mut tx,
            id,
            &params.tag_ids,
            params.feature_id,
            params.is_active,
        )
        .await?;

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(id)
    }

    async fn update_banner(&self, params: UpdateBannerParams) -> Result<(), RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        // Serializes concurrent updates of one banner for the whole transaction.
        let locked = sqlx::query_as::<_, LockedBannerRow>(
            r#"
            SELECT content, updated_at
            FROM banners
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(params.id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepoError::NotFound)?;

        let touches_mappings = params.touches_mappings();

        if let Some(content) = supplied_content(params.content) {
            let updated_at: OffsetDateTime = sqlx::query_scalar(
                r#"
                UPDATE banners
                SET content = $2, updated_at = clock_timestamp()
                WHERE id = $1
                RETURNING updated_at
                "#,
            )
            .bind(params.id)
            .bind(&content)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            let (snapshot, snapshot_at) = match self.history_policy() {
                HistoryPolicy::RecordNew => (content, updated_at),
                HistoryPolicy::RecordPrevious => (locked.content, locked.updated_at),
            };

            // Under record_previous the outgoing content may already have been
            // recorded at this instant while record_new was in force; that row
            // holds the same snapshot.
            sqlx::query(
                r#"
                INSERT INTO banners_history (banner_id, content, updated_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (banner_id, updated_at) DO NOTHING
                "#,
            )
            .bind(params.id)
            .bind(&snapshot)
            .bind(snapshot_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        if touches_mappings {
            if params.tag_ids.is_empty() {
                let result = sqlx::query(
                    r#"
                    UPDATE banner_mappings
                    SET feature_id = COALESCE($2, feature_id),
                        is_active = COALESCE($3, is_active)
                    WHERE banner_id = $1
                    "#,
                )
                .bind(params.id)
                .bind(params.feature_id)
                .bind(params.is_active)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;

                if result.rows_affected() == 0 {
                    return Err(RepoError::NotFound);
                }
            } else {
                let current = sqlx::query_as::<_, MappingStateRow>(
                    r#"
                    SELECT feature_id, is_active
                    FROM banner_mappings
                    WHERE banner_id = $1
                    LIMIT 1
                    "#,
                )
                .bind(params.id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;

                let feature_id = params
                    .feature_id
                    .or(current.as_ref().map(|row| row.feature_id))
                    .ok_or(RepoError::NotFound)?;
                let is_active = params
                    .is_active
                    .or(current.as_ref().map(|row| row.is_active))
                    .ok_or(RepoError::NotFound)?;

                sqlx::query(
                    r#"
                    DELETE FROM banner_mappings
                    WHERE banner_id = $1
                    "#,
                )
                .bind(params.id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;

                insert_mappings(&mut tx, params.id, &params.tag_ids, feature_id, is_active)
                    .await?;
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn delete_banner(&self, id: BannerId) -> Result<(), RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            DELETE FROM banner_mappings
            WHERE banner_id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let result = sqlx::query(
            r#"
            DELETE FROM banners
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn restore_version(
        &self,
        banner_id: BannerId,
        updated_at: OffsetDateTime,
    ) -> Result<(), RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let content: Value = sqlx::query_scalar(
            r#"
            DELETE FROM banners_history
            WHERE banner_id = $1 AND updated_at = $2
            RETURNING content
            "#,
        )
        .bind(banner_id)
        .bind(updated_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepoError::NotFound)?;

        let result = sqlx::query(
            r#"
            UPDATE banners
            SET content = $2, updated_at = clock_timestamp()
            WHERE id = $1
            "#,
        )
        .bind(banner_id)
        .bind(&content)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(())
    }
}

async fn insert_mappings(
    tx: &mut Transaction<'_, Postgres>,
    banner_id: BannerId,
    tag_ids: &[TagId],
    feature_id: FeatureId,
    is_active: bool,
) -> Result<(), RepoError> {
    sqlx::query(
        r#"
        INSERT INTO banner_mappings (banner_id, feature_id, tag_id, is_active)
        SELECT $1, $2, tag_id, $3
        FROM UNNEST($4::bigint[]) AS tag_id
        "#,
    )
    .bind(banner_id)
    .bind(feature_id)
    .bind(is_active)
    .bind(tag_ids)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;

    Ok(())
}
