use rusqlite::{params, Connection, OptionalExtension, Result};

use crate::schema;

/// Node ids below this are reserved for the fixed top-level categories.
pub const FIRST_NODE: i64 = 100;

pub fn ensure_schema(conn: &mut Connection, schema: &str) -> Result<bool> {
    trace!("trying to get schema version");

    conn.execute_batch(schema::META_SCHEMA)?;

    let schema_version: Option<u32> = conn
        .query_row(
            "SELECT value FROM Streamium WHERE key = 'schema'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match schema_version {
        Some(version) if version == schema::SCHEMA_VERSION => {
            debug!("schema version {}", version);
            Ok(true)
        }
        Some(version) => {
            error!(
                "schema version mismatch: database has {}, expected {}",
                version,
                schema::SCHEMA_VERSION
            );
            Ok(false)
        }
        None => {
            info!("initializing schema version {}", schema::SCHEMA_VERSION);

            let tx = conn.transaction()?;
            tx.execute_batch(schema)?;
            tx.execute(
                "INSERT INTO Streamium (key, value) VALUES ('schema', ?)",
                params![schema::SCHEMA_VERSION],
            )?;
            tx.execute(
                "INSERT INTO Streamium (key, value) VALUES ('next_node', ?)",
                params![FIRST_NODE],
            )?;
            tx.commit()?;

            Ok(true)
        }
    }
}

/// Monotonic node id counter backed by the `next_node` meta key.
///
/// Ids are handed out in memory and written back with [`NodeIds::save`], so
/// a whole scan costs one write.
#[derive(Debug)]
pub struct NodeIds {
    next: i64,
    issued: i64,
}

impl NodeIds {
    pub fn load(conn: &Connection) -> Result<NodeIds> {
        let next: Option<i64> = conn
            .query_row(
                "SELECT value FROM Streamium WHERE key = 'next_node'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let next = next.unwrap_or(FIRST_NODE).max(FIRST_NODE);

        trace!("next node id {}", next);

        Ok(NodeIds { next, issued: 0 })
    }

    pub fn take(&mut self) -> i64 {
        let id = self.next;
        self.next += 1;
        self.issued += 1;
        id
    }

    pub fn peek(&self) -> i64 {
        self.next
    }

    /// Number of ids handed out since load.
    pub fn issued(&self) -> i64 {
        self.issued
    }

    pub fn save(&self, conn: &Connection) -> Result<()> {
        trace!("save next node id {}", self.next);

        conn.execute(
            "INSERT OR REPLACE INTO Streamium (key, value) VALUES ('next_node', ?)",
            params![self.next],
        )?;
        Ok(())
    }
}
