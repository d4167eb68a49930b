//! SQLiteによるプロフィールストア

use async_trait::async_trait;
use directories::ProjectDirs;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{ProfileError, ProfileStore, UserProfile};

/// SQLiteプロフィールストア
#[derive(Clone)]
pub struct SqliteProfileStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteProfileStore {
    /// 指定パスのデータベースを開く
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, ProfileError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ProfileError::Path(e.to_string()))?;
        }
        let connection = Connection::open(db_path)?;
        Self::with_connection(connection)
    }

    /// インメモリデータベースを作成（テスト用）
    pub fn new_in_memory() -> Result<Self, ProfileError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    /// 設定のパス、なければXDGデータディレクトリのlivelayer.dbを開く
    pub fn open(path: Option<&Path>) -> Result<Self, ProfileError> {
        match path {
            Some(path) => Self::new(path),
            None => Self::new(default_database_path()?),
        }
    }

    fn with_connection(connection: Connection) -> Result<Self, ProfileError> {
        connection.execute_batch(include_str!("schema.sql"))?;
        tracing::info!("Database schema initialized successfully");
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    fn upsert_blocking(connection: &Connection, profile: &UserProfile) -> Result<(), ProfileError> {
        connection.execute(
            "INSERT INTO user_profiles
             (open_id, uname, fans_medal_wearing_status, fans_medal_level, fans_medal_name, guard_level, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(open_id) DO UPDATE SET
                 uname = excluded.uname,
                 fans_medal_wearing_status = excluded.fans_medal_wearing_status,
                 fans_medal_level = excluded.fans_medal_level,
                 fans_medal_name = excluded.fans_medal_name,
                 guard_level = excluded.guard_level,
                 updated_at = excluded.updated_at",
            params![
                profile.open_id,
                profile.uname,
                profile.fans_medal_wearing_status,
                profile.fans_medal_level,
                profile.fans_medal_name,
                profile.guard_level,
                profile.updated_at,
            ],
        )?;
        Ok(())
    }

    fn get_blocking(
        connection: &Connection,
        open_id: &str,
    ) -> Result<Option<UserProfile>, ProfileError> {
        let profile = connection
            .query_row(
                "SELECT open_id, uname, fans_medal_wearing_status, fans_medal_level,
                        fans_medal_name, guard_level, updated_at
                 FROM user_profiles WHERE open_id = ?1",
                params![open_id],
                |row| {
                    Ok(UserProfile {
                        open_id: row.get(0)?,
                        uname: row.get(1)?,
                        fans_medal_wearing_status: row.get(2)?,
                        fans_medal_level: row.get(3)?,
                        fans_medal_name: row.get(4)?,
                        guard_level: row.get(5)?,
                        updated_at: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(profile)
    }
}

/// XDGデータディレクトリからデータベースパスを取得
pub fn default_database_path() -> Result<PathBuf, ProfileError> {
    let project_dirs = ProjectDirs::from("dev", "sifyfy", "livelayer")
        .ok_or_else(|| ProfileError::Path("Failed to get project directories".to_string()))?;
    Ok(project_dirs.data_dir().join("livelayer.db"))
}

#[async_trait]
impl ProfileStore for SqliteProfileStore {
    async fn upsert(&self, profile: UserProfile) -> Result<(), ProfileError> {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || Self::upsert_blocking(&connection.lock(), &profile))
            .await
            .map_err(|e| ProfileError::Task(e.to_string()))?
    }

    async fn get(&self, open_id: &str) -> Result<Option<UserProfile>, ProfileError> {
        let connection = Arc::clone(&self.connection);
        let open_id = open_id.to_string();
        tokio::task::spawn_blocking(move || Self::get_blocking(&connection.lock(), &open_id))
            .await
            .map_err(|e| ProfileError::Task(e.to_string()))?
    }
}
