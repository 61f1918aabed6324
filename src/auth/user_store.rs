//! Credential Store
//! User accounts with bcrypt password digests, persisted in SQLite.

use crate::auth::{
    models::{Credential, UserRole},
    password::{HashingError, PasswordHasher},
};
use chrono::{DateTime, Utc};
use rusqlite::{
    params,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef},
    Connection, ErrorCode, OptionalExtension, Row,
};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_ADMIN_USERNAME: &str = "admin";
const DEFAULT_ADMIN_PASSWORD: &str = "admin123";
const DEFAULT_ADMIN_EMAIL: &str = "admin@xcloud.local";

const USER_COLUMNS: &str = "id, username, email, password_hash, role, is_active, \
     last_login_at, created_at, updated_at, created_by, updated_by";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user not found")]
    NotFound,
    #[error("username already exists")]
    UsernameTaken,
    #[error("email already exists")]
    EmailTaken,
    #[error("old password is incorrect")]
    WrongPassword,
    #[error(transparent)]
    Hashing(#[from] HashingError),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Partial update applied by administrators. `None` leaves a field as is.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub role: Option<UserRole>,
    pub is_active: Option<bool>,
}

impl ToSql for UserRole {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for UserRole {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// User storage with SQLite backend
pub struct UserStore {
    db_path: String,
    hasher: PasswordHasher,
    // verified against when no account matches, so misses cost a bcrypt round
    decoy_digest: String,
}

impl UserStore {
    /// Open (or create) the database and seed the default admin.
    pub fn new(db_path: &str, hasher: PasswordHasher) -> StoreResult<Self> {
        let store = Self {
            db_path: db_path.to_string(),
            hasher,
            decoy_digest: hasher.hash(&Uuid::new_v4().to_string())?,
        };
        store.init_db()?;
        Ok(store)
    }

    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    fn connect(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    fn init_db(&self) -> StoreResult<()> {
        let conn = self.connect()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'viewer'
                    CHECK (role IN ('admin', 'manager', 'employee', 'viewer')),
                is_active INTEGER NOT NULL DEFAULT 1,
                last_login_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                created_by TEXT,
                updated_by TEXT,
                deleted_at TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_users_deleted_at ON users (deleted_at)",
            [],
        )?;

        self.create_default_admin(&conn)
    }

    /// Seed an admin account when none exists.
    fn create_default_admin(&self, conn: &Connection) -> StoreResult<()> {
        let admins: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE role = ?1 AND deleted_at IS NULL",
            params![UserRole::Admin],
            |row| row.get(0),
        )?;
        if admins > 0 {
            info!("Admin account present, skipping seed");
            return Ok(());
        }

        match self.insert_user(
            conn,
            DEFAULT_ADMIN_USERNAME,
            DEFAULT_ADMIN_EMAIL,
            DEFAULT_ADMIN_PASSWORD,
            UserRole::Admin,
            None,
        ) {
            Ok(_) => {
                info!(
                    username = DEFAULT_ADMIN_USERNAME,
                    "Default admin user created (password: admin123)"
                );
                warn!("CHANGE THE DEFAULT ADMIN PASSWORD IN PRODUCTION");
                Ok(())
            }
            Err(StoreError::UsernameTaken | StoreError::EmailTaken) => {
                warn!("No active admin account and the default admin name is taken");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn credential_from_row(row: &Row<'_>) -> rusqlite::Result<Credential> {
        Ok(Credential {
            id: uuid_column(row, 0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            role: row.get(4)?,
            is_active: row.get(5)?,
            last_login_at: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            created_by: optional_uuid_column(row, 9)?,
            updated_by: optional_uuid_column(row, 10)?,
        })
    }

    fn query_one(
        &self,
        conn: &Connection,
        filter: &str,
        arg: &dyn ToSql,
    ) -> StoreResult<Option<Credential>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {filter}");
        Ok(conn
            .query_row(&sql, params![arg], Self::credential_from_row)
            .optional()?)
    }

    /// Login lookup: active, non-deleted accounts only.
    pub fn find_active_by_username(&self, username: &str) -> StoreResult<Option<Credential>> {
        let conn = self.connect()?;
        self.query_one(
            &conn,
            "username = ?1 AND is_active = 1 AND deleted_at IS NULL",
            &username,
        )
    }

    /// Login check. Unknown, inactive and wrong-password cases all come back
    /// as `None` after the same amount of bcrypt work.
    pub fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> StoreResult<Option<Credential>> {
        let user = self.find_active_by_username(username)?;
        let digest = user
            .as_ref()
            .map_or(self.decoy_digest.as_str(), |u| u.password_hash.as_str());

        let verified = self.hasher.verify(digest, password);
        Ok(user.filter(|_| verified))
    }

    pub fn get_user_by_id(&self, id: &Uuid) -> StoreResult<Option<Credential>> {
        let conn = self.connect()?;
        self.query_one(&conn, "id = ?1 AND deleted_at IS NULL", &id.to_string())
    }

    pub fn record_login(&self, id: &Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.connect()?;
        let rows = conn.execute(
            "UPDATE users SET last_login_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![at, id.to_string()],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn create_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
        role: UserRole,
        created_by: Option<&Uuid>,
    ) -> StoreResult<Credential> {
        let conn = self.connect()?;
        let user = self.insert_user(&conn, username, email, password, role, created_by)?;
        info!(username = %user.username, role = %user.role, "Created user");
        Ok(user)
    }

    fn insert_user(
        &self,
        conn: &Connection,
        username: &str,
        email: &str,
        password: &str,
        role: UserRole,
        created_by: Option<&Uuid>,
    ) -> StoreResult<Credential> {
        ensure_unique(conn, "username", username, None, StoreError::UsernameTaken)?;
        ensure_unique(conn, "email", email, None, StoreError::EmailTaken)?;

        let now = Utc::now();
        let user = Credential {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: self.hasher.hash(password)?,
            role,
            is_active: true,
            last_login_at: None,
            created_at: now,
            updated_at: now,
            created_by: created_by.copied(),
            updated_by: created_by.copied(),
        };

        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, role, is_active,
                                created_at, updated_at, created_by, updated_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                user.id.to_string(),
                user.username,
                user.email,
                user.password_hash,
                user.role,
                user.is_active,
                user.created_at,
                user.updated_at,
                user.created_by.map(|id| id.to_string()),
                user.updated_by.map(|id| id.to_string()),
            ],
        )
        .map_err(unique_violation)?;

        Ok(user)
    }

    pub fn update_user(
        &self,
        id: &Uuid,
        update: &UserUpdate,
        updated_by: &Uuid,
    ) -> StoreResult<Credential> {
        let conn = self.connect()?;
        let mut user = self
            .query_one(&conn, "id = ?1 AND deleted_at IS NULL", &id.to_string())?
            .ok_or(StoreError::NotFound)?;

        if let Some(username) = &update.username {
            ensure_unique(&conn, "username", username, Some(id), StoreError::UsernameTaken)?;
            user.username = username.clone();
        }
        if let Some(email) = &update.email {
            ensure_unique(&conn, "email", email, Some(id), StoreError::EmailTaken)?;
            user.email = email.clone();
        }
        if let Some(role) = update.role {
            user.role = role;
        }
        if let Some(is_active) = update.is_active {
            user.is_active = is_active;
        }
        user.updated_by = Some(*updated_by);
        user.updated_at = Utc::now();

        conn.execute(
            "UPDATE users SET username = ?1, email = ?2, role = ?3, is_active = ?4,
                              updated_at = ?5, updated_by = ?6
             WHERE id = ?7",
            params![
                user.username,
                user.email,
                user.role,
                user.is_active,
                user.updated_at,
                updated_by.to_string(),
                id.to_string(),
            ],
        )
        .map_err(unique_violation)?;

        info!(user_id = %id, updated_by = %updated_by, "Updated user");
        Ok(user)
    }

    /// Soft delete: the row stays but behaves as missing everywhere.
    pub fn delete_user(&self, id: &Uuid, deleted_by: &Uuid) -> StoreResult<()> {
        let conn = self.connect()?;
        let now = Utc::now();
        let rows = conn.execute(
            "UPDATE users SET deleted_at = ?1, updated_at = ?1, updated_by = ?2
             WHERE id = ?3 AND deleted_at IS NULL",
            params![now, deleted_by.to_string(), id.to_string()],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound);
        }

        info!(user_id = %id, deleted_by = %deleted_by, "Deleted user");
        Ok(())
    }

    /// One page of users plus the total count. `page` starts at 1.
    pub fn list_users(&self, page: u32, page_size: u32) -> StoreResult<(Vec<Credential>, u64)> {
        let conn = self.connect()?;

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE deleted_at IS NULL",
            [],
            |row| row.get(0),
        )?;

        let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE deleted_at IS NULL
             ORDER BY created_at, username LIMIT ?1 OFFSET ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let users = stmt
            .query_map(params![i64::from(page_size), offset], Self::credential_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((users, total.max(0) as u64))
    }

    pub fn change_password(
        &self,
        id: &Uuid,
        old_password: &str,
        new_password: &str,
    ) -> StoreResult<()> {
        let conn = self.connect()?;
        let user = self
            .query_one(&conn, "id = ?1 AND deleted_at IS NULL", &id.to_string())?
            .ok_or(StoreError::NotFound)?;

        if !self.hasher.verify(&user.password_hash, old_password) {
            return Err(StoreError::WrongPassword);
        }

        let password_hash = self.hasher.hash(new_password)?;
        conn.execute(
            "UPDATE users SET password_hash = ?1, updated_at = ?2, updated_by = ?3 WHERE id = ?3",
            params![password_hash, Utc::now(), id.to_string()],
        )?;

        info!(user_id = %id, "Password changed");
        Ok(())
    }
}

/// Uniqueness spans soft-deleted rows too, matching the column constraint.
fn ensure_unique(
    conn: &Connection,
    column: &str,
    value: &str,
    exclude: Option<&Uuid>,
    taken: StoreError,
) -> StoreResult<()> {
    let sql = format!("SELECT COUNT(*) FROM users WHERE {column} = ?1 AND id != ?2");
    let exclude = exclude.map(|id| id.to_string()).unwrap_or_default();
    let count: i64 = conn.query_row(&sql, params![value, exclude], |row| row.get(0))?;
    if count > 0 {
        return Err(taken);
    }
    Ok(())
}

/// Concurrent writers can pass `ensure_unique` together; the column
/// constraint decides, and the loser gets the same error as a pre-check miss.
fn unique_violation(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(failure, Some(msg)) = &err {
        if failure.code == ErrorCode::ConstraintViolation {
            if msg.contains("users.username") {
                return StoreError::UsernameTaken;
            }
            if msg.contains("users.email") {
                return StoreError::EmailTaken;
            }
        }
    }
    StoreError::Database(err)
}

fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        Uuid::parse_str(&raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_store() -> (UserStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();
        let store = UserStore::new(db_path, PasswordHasher::new(4)).unwrap();
        (store, temp_file)
    }

    fn admin_id(store: &UserStore) -> Uuid {
        store.find_active_by_username("admin").unwrap().unwrap().id
    }

    #[test]
    fn test_default_admin_created() {
        let (store, _temp) = create_test_store();

        let admin = store.find_active_by_username("admin").unwrap().unwrap();
        assert_eq!(admin.role, UserRole::Admin);
        assert!(admin.is_active);
        assert!(admin.last_login_at.is_none());
        assert!(store.hasher().verify(&admin.password_hash, "admin123"));
    }

    #[test]
    fn test_reopening_does_not_reseed() {
        let (store, temp) = create_test_store();
        let first = admin_id(&store);

        let reopened =
            UserStore::new(temp.path().to_str().unwrap(), PasswordHasher::new(4)).unwrap();
        assert_eq!(admin_id(&reopened), first);
        assert_eq!(reopened.list_users(1, 10).unwrap().1, 1);
    }

    #[test]
    fn test_create_and_retrieve_user() {
        let (store, _temp) = create_test_store();
        let admin = admin_id(&store);

        let user = store
            .create_user(
                "manager1",
                "m1@example.com",
                "password123",
                UserRole::Manager,
                Some(&admin),
            )
            .unwrap();
        assert_eq!(user.created_by, Some(admin));

        let fetched = store.get_user_by_id(&user.id).unwrap().unwrap();
        assert_eq!(fetched.username, "manager1");
        assert_eq!(fetched.email, "m1@example.com");
        assert_eq!(fetched.role, UserRole::Manager);
        assert_eq!(fetched.created_by, Some(admin));
    }

    #[test]
    fn test_duplicate_username_and_email_rejected() {
        let (store, _temp) = create_test_store();
        store
            .create_user("dup", "dup@example.com", "password", UserRole::Viewer, None)
            .unwrap();

        assert!(matches!(
            store.create_user("dup", "other@example.com", "password", UserRole::Viewer, None),
            Err(StoreError::UsernameTaken)
        ));
        assert!(matches!(
            store.create_user("other", "dup@example.com", "password", UserRole::Viewer, None),
            Err(StoreError::EmailTaken)
        ));
    }

    #[test]
    fn test_inactive_users_are_not_found_for_login() {
        let (store, _temp) = create_test_store();
        let admin = admin_id(&store);
        let user = store
            .create_user("sleepy", "s@example.com", "password", UserRole::Employee, None)
            .unwrap();

        let update = UserUpdate {
            is_active: Some(false),
            ..Default::default()
        };
        let updated = store.update_user(&user.id, &update, &admin).unwrap();
        assert!(!updated.is_active);
        assert_eq!(updated.updated_by, Some(admin));

        assert!(store.find_active_by_username("sleepy").unwrap().is_none());
        // still resolvable by id so refresh can report it as inactive
        assert!(!store.get_user_by_id(&user.id).unwrap().unwrap().is_active);
    }

    #[test]
    fn test_update_rejects_taken_username() {
        let (store, _temp) = create_test_store();
        let admin = admin_id(&store);
        let user = store
            .create_user("alice", "a@example.com", "password", UserRole::Viewer, None)
            .unwrap();

        let update = UserUpdate {
            username: Some("admin".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            store.update_user(&user.id, &update, &admin),
            Err(StoreError::UsernameTaken)
        ));

        // renaming to your own name is fine
        let update = UserUpdate {
            username: Some("alice".to_string()),
            role: Some(UserRole::Manager),
            ..Default::default()
        };
        let updated = store.update_user(&user.id, &update, &admin).unwrap();
        assert_eq!(updated.role, UserRole::Manager);
    }

    #[test]
    fn test_record_login() {
        let (store, _temp) = create_test_store();
        let id = admin_id(&store);
        let at = Utc::now();

        store.record_login(&id, at).unwrap();
        let admin = store.get_user_by_id(&id).unwrap().unwrap();
        assert_eq!(admin.last_login_at.map(|t| t.timestamp()), Some(at.timestamp()));

        assert!(matches!(
            store.record_login(&Uuid::new_v4(), at),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_soft_delete() {
        let (store, _temp) = create_test_store();
        let admin = admin_id(&store);
        let user = store
            .create_user("tempuser", "t@example.com", "password", UserRole::Viewer, None)
            .unwrap();

        store.delete_user(&user.id, &admin).unwrap();

        assert!(store.get_user_by_id(&user.id).unwrap().is_none());
        assert!(store.find_active_by_username("tempuser").unwrap().is_none());
        assert!(matches!(
            store.delete_user(&user.id, &admin),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_list_users_paginates() {
        let (store, _temp) = create_test_store();
        for i in 0..4 {
            store
                .create_user(
                    &format!("user{i}"),
                    &format!("user{i}@example.com"),
                    "password",
                    UserRole::Viewer,
                    None,
                )
                .unwrap();
        }

        let (first, total) = store.list_users(1, 2).unwrap();
        assert_eq!(total, 5);
        assert_eq!(first.len(), 2);

        let (last, _) = store.list_users(3, 2).unwrap();
        assert_eq!(last.len(), 1);

        let (beyond, _) = store.list_users(4, 2).unwrap();
        assert!(beyond.is_empty());
    }

    #[test]
    fn test_change_password() {
        let (store, _temp) = create_test_store();
        let id = admin_id(&store);

        assert!(matches!(
            store.change_password(&id, "wrong", "newpass"),
            Err(StoreError::WrongPassword)
        ));

        store.change_password(&id, "admin123", "newpass").unwrap();
        let admin = store.get_user_by_id(&id).unwrap().unwrap();
        assert!(store.hasher().verify(&admin.password_hash, "newpass"));
        assert!(!store.hasher().verify(&admin.password_hash, "admin123"));
    }

    #[test]
    fn test_unknown_role_in_storage_is_rejected() {
        let (store, temp) = create_test_store();
        let id = admin_id(&store);

        // bypass the CHECK constraint to simulate a corrupted row
        let conn = Connection::open(temp.path()).unwrap();
        conn.execute_batch("PRAGMA ignore_check_constraints = ON").unwrap();
        conn.execute(
            "UPDATE users SET role = 'superuser' WHERE id = ?1",
            params![id.to_string()],
        )
        .unwrap();

        assert!(matches!(
            store.get_user_by_id(&id),
            Err(StoreError::Database(_))
        ));
    }

    #[test]
    fn test_authenticate() {
        let (store, _temp) = create_test_store();
        assert!(store.decoy_digest.starts_with("$2b$04$"));

        assert!(store.authenticate("admin", "admin123").unwrap().is_some());
        assert!(store.authenticate("admin", "wrong").unwrap().is_none());
        assert!(store.authenticate("ghost", "admin123").unwrap().is_none());
    }

    #[test]
    fn test_constraint_violation_maps_to_taken() {
        let (_store, temp) = create_test_store();
        let conn = Connection::open(temp.path()).unwrap();
        let now = Utc::now();
        let insert = |username: &str, email: &str| {
            conn.execute(
                "INSERT INTO users (id, username, email, password_hash, role, is_active,
                                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'x', 'viewer', 1, ?4, ?4)",
                params![Uuid::new_v4().to_string(), username, email, now],
            )
        };

        let err = insert("admin", "fresh@example.com").unwrap_err();
        assert!(matches!(unique_violation(err), StoreError::UsernameTaken));

        let err = insert("fresh", "admin@xcloud.local").unwrap_err();
        assert!(matches!(unique_violation(err), StoreError::EmailTaken));
    }

    #[test]
    fn test_concurrent_duplicate_creates_conflict() {
        let (store, _temp) = create_test_store();
        let store = std::sync::Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.create_user(
                        "racer",
                        "racer@example.com",
                        "password",
                        UserRole::Viewer,
                        None,
                    )
                })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            match handle.join().unwrap() {
                Ok(_) => created += 1,
                Err(StoreError::UsernameTaken | StoreError::EmailTaken) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(created, 1);
    }
}
