use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OpenFlags, OptionalExtension};

use super::{DbError, QueryOutput, SqlBackend};

/// SQLite handle for a local database file.
///
/// Opened read-only so the agent can never mutate local data, whatever
/// SQL it decides to run. The mutex exists only to make the handle shareable
/// with the agent task; there is one interaction at a time.
#[derive(Debug)]
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    path: String,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if !path.exists() {
            return Err(DbError::Connection(format!(
                "database file not found: {}",
                path.display()
            )));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.display().to_string(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn
            .lock()
            .map_err(|_| DbError::Connection(format!("connection poisoned: {}", self.path)))
    }
}

#[async_trait::async_trait]
impl SqlBackend for SqliteBackend {
    async fn list_tables(&self) -> Result<Vec<String>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    async fn describe_tables(&self, tables: &[String]) -> Result<String, DbError> {
        let conn = self.lock()?;
        let mut out = String::new();
        for table in tables {
            let ddl: Option<String> = conn
                .query_row(
                    "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .optional()?;
            match ddl {
                Some(sql) => {
                    out.push_str(sql.trim());
                    out.push_str(";\n");
                }
                None => {
                    out.push_str(&format!("-- no such table: {table}\n"));
                }
            }
        }
        Ok(out)
    }

    async fn run_query(&self, sql: &str) -> Result<QueryOutput, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(|e| DbError::Query(e.to_string()))?;

        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let column_count = stmt.column_count();

        let mut rows = stmt.query([]).map_err(|e| DbError::Query(e.to_string()))?;
        let mut collected = Vec::new();

        while let Some(row) = rows.next().map_err(|e| DbError::Query(e.to_string()))? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let value = row
                    .get::<_, rusqlite::types::Value>(i)
                    .map(|v| match v {
                        rusqlite::types::Value::Null => "NULL".to_string(),
                        rusqlite::types::Value::Integer(n) => n.to_string(),
                        rusqlite::types::Value::Real(f) => f.to_string(),
                        rusqlite::types::Value::Text(s) => s,
                        rusqlite::types::Value::Blob(b) => format!("<blob {} bytes>", b.len()),
                    })
                    .unwrap_or_default();
                values.push(value);
            }
            collected.push(values);
        }

        Ok(QueryOutput {
            columns,
            rows: collected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_db(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("music.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE artists (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
             CREATE TABLE albums (id INTEGER PRIMARY KEY, artist_id INTEGER, title TEXT);
             INSERT INTO artists (id, name) VALUES (1, 'Nina Simone'), (2, 'Fela Kuti');
             INSERT INTO albums (id, artist_id, title) VALUES (1, 1, 'Pastel Blues');",
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn lists_tables_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::open(&fixture_db(&dir)).unwrap();
        let tables = backend.list_tables().await.unwrap();
        assert_eq!(tables, vec!["albums", "artists"]);
    }

    #[tokio::test]
    async fn describes_known_and_unknown_tables() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::open(&fixture_db(&dir)).unwrap();
        let schema = backend
            .describe_tables(&["artists".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert!(schema.contains("CREATE TABLE artists"));
        assert!(schema.contains("no such table: missing"));
    }

    #[tokio::test]
    async fn runs_select_queries() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::open(&fixture_db(&dir)).unwrap();
        let output = backend
            .run_query("SELECT name FROM artists ORDER BY id")
            .await
            .unwrap();
        assert_eq!(output.columns, vec!["name"]);
        assert_eq!(output.rows, vec![vec!["Nina Simone"], vec!["Fela Kuti"]]);
    }

    #[tokio::test]
    async fn writes_are_rejected_on_read_only_handle() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::open(&fixture_db(&dir)).unwrap();
        let err = backend
            .run_query("INSERT INTO artists (id, name) VALUES (3, 'Intruder')")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Query(_)));

        // The data is untouched.
        let output = backend
            .run_query("SELECT COUNT(*) FROM artists")
            .await
            .unwrap();
        assert_eq!(output.rows, vec![vec!["2"]]);
    }

    #[tokio::test]
    async fn missing_file_is_a_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SqliteBackend::open(&dir.path().join("absent.db")).unwrap_err();
        assert!(matches!(err, DbError::Connection(_)));
    }
}
