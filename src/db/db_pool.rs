use duckdb::Connection;
use r2d2::ManageConnection;
use std::sync::Mutex;

/// Hands out connections that all share one DuckDB database instance.
///
/// DuckDB allows a single open instance per file, so the manager opens the
/// database once and pools clones of that root connection.
pub struct DuckDBConnectionManager {
    root: Mutex<Connection>,
}

impl DuckDBConnectionManager {
    pub fn new(connection_string: &str) -> Result<Self, duckdb::Error> {
        let root = if connection_string.is_empty() || connection_string == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(connection_string)?
        };
        Ok(Self {
            root: Mutex::new(root),
        })
    }
}

impl ManageConnection for DuckDBConnectionManager {
    type Connection = Connection;
    type Error = duckdb::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let root = self
            .root
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        root.try_clone()
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.execute_batch("SELECT 1")
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pooled_connections_share_one_database() {
        let manager = DuckDBConnectionManager::new(":memory:").unwrap();
        let pool = r2d2::Pool::builder().max_size(2).build(manager).unwrap();

        let first = pool.get().unwrap();
        first.execute_batch("CREATE TABLE shared (v INTEGER); INSERT INTO shared VALUES (7);")
            .unwrap();

        let second = pool.get().unwrap();
        let value: i32 = second
            .query_row("SELECT v FROM shared", [], |row| row.get(0))
            .unwrap();
        assert_eq!(value, 7);
    }
}
