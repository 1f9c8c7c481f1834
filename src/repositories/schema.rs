use sqlx::PgPool;

/// DDL applied at startup. Statements are idempotent; the unique indexes
/// carry the dedup and idempotency guarantees the services rely on.
const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE EXTENSION IF NOT EXISTS vector",
    r#"
    CREATE TABLE IF NOT EXISTS images (
        id              BIGSERIAL PRIMARY KEY,
        uuid            UUID NOT NULL UNIQUE,
        hash            TEXT NOT NULL,
        original_name   TEXT NOT NULL,
        mime            TEXT NOT NULL,
        bytes           BIGINT NOT NULL,
        width           INTEGER,
        height          INTEGER,
        taken_at        TIMESTAMPTZ,
        latitude        DOUBLE PRECISION,
        longitude       DOUBLE PRECISION,
        location_name   TEXT,
        camera_make     TEXT,
        camera_model    TEXT,
        exposure_time   TEXT,
        f_number        REAL,
        iso             INTEGER,
        focal_length    REAL,
        storage_id      TEXT NOT NULL,
        storage_path    TEXT NOT NULL,
        thumbnail_path  TEXT,
        thumbnail_width INTEGER,
        thumbnail_height INTEGER,
        ai_score        REAL,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
        deleted_at      TIMESTAMPTZ
    )
    "#,
    // Hash uniqueness only applies to live rows; trashed duplicates may linger.
    "CREATE UNIQUE INDEX IF NOT EXISTS images_hash_live_idx ON images (hash) WHERE deleted_at IS NULL",
    "CREATE INDEX IF NOT EXISTS images_taken_at_idx ON images (taken_at) WHERE deleted_at IS NULL",
    "CREATE INDEX IF NOT EXISTS images_storage_idx ON images (storage_id)",
    "CREATE INDEX IF NOT EXISTS images_deleted_at_idx ON images (deleted_at) WHERE deleted_at IS NOT NULL",
    r#"
    CREATE TABLE IF NOT EXISTS tags (
        id    BIGSERIAL PRIMARY KEY,
        name  TEXT NOT NULL UNIQUE,
        color TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS image_tags (
        image_id BIGINT NOT NULL REFERENCES images (id) ON DELETE CASCADE,
        tag_id   BIGINT NOT NULL REFERENCES tags (id) ON DELETE CASCADE,
        PRIMARY KEY (image_id, tag_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS embeddings (
        image_id   BIGINT NOT NULL REFERENCES images (id) ON DELETE CASCADE,
        model_name TEXT NOT NULL,
        vector     vector NOT NULL,
        PRIMARY KEY (image_id, model_name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tag_embeddings (
        tag_id     BIGINT NOT NULL REFERENCES tags (id) ON DELETE CASCADE,
        model_name TEXT NOT NULL,
        vector     vector NOT NULL,
        PRIMARY KEY (tag_id, model_name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS albums (
        id             BIGSERIAL PRIMARY KEY,
        name           TEXT NOT NULL,
        description    TEXT,
        cover_image_id BIGINT REFERENCES images (id) ON DELETE SET NULL,
        is_smart       BOOLEAN NOT NULL DEFAULT FALSE,
        smart_config   JSONB,
        created_at     TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS album_images (
        album_id BIGINT NOT NULL REFERENCES albums (id) ON DELETE CASCADE,
        image_id BIGINT NOT NULL REFERENCES images (id) ON DELETE CASCADE,
        PRIMARY KEY (album_id, image_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ai_queues (
        id            BIGSERIAL PRIMARY KEY,
        queue_key     TEXT NOT NULL UNIQUE,
        task_type     TEXT NOT NULL,
        model_name    TEXT,
        pending_count BIGINT NOT NULL DEFAULT 0,
        failed_count  BIGINT NOT NULL DEFAULT 0,
        status        TEXT NOT NULL DEFAULT 'idle'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ai_task_items (
        id         BIGSERIAL PRIMARY KEY,
        queue_id   BIGINT NOT NULL REFERENCES ai_queues (id) ON DELETE CASCADE,
        item_id    BIGINT NOT NULL,
        item_type  TEXT NOT NULL,
        status     TEXT NOT NULL DEFAULT 'pending',
        error      TEXT,
        attempts   INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (queue_id, item_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS ai_task_items_pending_idx ON ai_task_items (queue_id, id) WHERE status = 'pending'",
    r#"
    CREATE TABLE IF NOT EXISTS migration_tasks (
        id                  BIGSERIAL PRIMARY KEY,
        migration_type      TEXT NOT NULL,
        source_storage_id   TEXT NOT NULL,
        target_storage_id   TEXT NOT NULL,
        filter              JSONB NOT NULL DEFAULT '{}'::jsonb,
        delete_source_after BOOLEAN NOT NULL DEFAULT FALSE,
        status              TEXT NOT NULL DEFAULT 'pending',
        total               BIGINT NOT NULL DEFAULT 0,
        processed           BIGINT NOT NULL DEFAULT 0,
        failed              BIGINT NOT NULL DEFAULT 0,
        created_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
        started_at          TIMESTAMPTZ,
        finished_at         TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS migration_file_records (
        id        BIGSERIAL PRIMARY KEY,
        task_id   BIGINT NOT NULL REFERENCES migration_tasks (id) ON DELETE CASCADE,
        image_id  BIGINT NOT NULL REFERENCES images (id) ON DELETE CASCADE,
        status    TEXT NOT NULL DEFAULT 'pending',
        error_msg TEXT,
        UNIQUE (task_id, image_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS migration_records_pending_idx ON migration_file_records (task_id, id) WHERE status = 'pending'",
    r#"
    CREATE TABLE IF NOT EXISTS shares (
        id            BIGSERIAL PRIMARY KEY,
        code          TEXT NOT NULL UNIQUE,
        password_hash TEXT,
        expire_at     TIMESTAMPTZ,
        is_active     BOOLEAN NOT NULL DEFAULT TRUE,
        view_count    BIGINT NOT NULL DEFAULT 0,
        created_at    TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS share_images (
        share_id BIGINT NOT NULL REFERENCES shares (id) ON DELETE CASCADE,
        image_id BIGINT NOT NULL REFERENCES images (id) ON DELETE CASCADE,
        position INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (share_id, image_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS smart_album_tasks (
        id             UUID PRIMARY KEY,
        model_name     TEXT NOT NULL,
        params         JSONB NOT NULL,
        status         TEXT NOT NULL DEFAULT 'running',
        error          TEXT,
        album_ids      BIGINT[] NOT NULL DEFAULT '{}',
        noise_image_ids BIGINT[] NOT NULL DEFAULT '{}',
        created_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
        finished_at    TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS settings (
        category   TEXT PRIMARY KEY,
        payload    JSONB NOT NULL,
        version    BIGINT NOT NULL DEFAULT 1,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
];

pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA_STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
