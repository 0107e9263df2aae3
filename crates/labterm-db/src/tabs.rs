//! Saved tab layout of the main window, restored on next launch.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabRecord {
    /// Session shown in the tab when the layout was saved. A reloaded window
    /// reattaches to it if it is still running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub host: String,
    pub port: u16,
    pub label: String,
    /// `"user"` when the label was typed by the user, `"default"` otherwise.
    #[serde(default = "default_label_source")]
    pub label_source: String,
}

fn default_label_source() -> String {
    "default".to_string()
}

/// Replace the saved layout with `tabs`, in order.
pub fn save_layout(conn: &mut Connection, tabs: &[TabRecord]) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM tabs", [])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO tabs (position, session_id, host, port, label, label_source) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for (position, tab) in tabs.iter().enumerate() {
            stmt.execute(params![
                position as i64,
                tab.id,
                tab.host,
                tab.port,
                tab.label,
                tab.label_source
            ])?;
        }
    }
    tx.commit()
}

pub fn load_layout(conn: &Connection) -> rusqlite::Result<Vec<TabRecord>> {
    let mut stmt =
        conn.prepare(
            "SELECT session_id, host, port, label, label_source FROM tabs ORDER BY position",
        )?;
    let rows = stmt.query_map([], |row| {
        Ok(TabRecord {
            id: row.get(0)?,
            host: row.get(1)?,
            port: row.get(2)?,
            label: row.get(3)?,
            label_source: row.get(4)?,
        })
    })?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::open_in_memory;

    fn tab(host: &str, port: u16, label: &str) -> TabRecord {
        TabRecord {
            id: None,
            host: host.to_string(),
            port,
            label: label.to_string(),
            label_source: default_label_source(),
        }
    }

    #[test]
    fn test_layout_preserves_order() {
        let mut conn = open_in_memory().unwrap();
        let tabs = vec![
            tab("10.0.0.5", 32769, "10.0.0.5:32769"),
            tab("10.0.0.5", 32770, "R2"),
            tab("192.168.1.10", 23, "192.168.1.10"),
        ];
        save_layout(&mut conn, &tabs).unwrap();
        assert_eq!(load_layout(&conn).unwrap(), tabs);
    }

    #[test]
    fn test_save_replaces_previous_layout() {
        let mut conn = open_in_memory().unwrap();
        save_layout(&mut conn, &[tab("a", 23, "a"), tab("b", 23, "b")]).unwrap();
        save_layout(&mut conn, &[tab("c", 2323, "core")]).unwrap();
        assert_eq!(load_layout(&conn).unwrap(), vec![tab("c", 2323, "core")]);

        save_layout(&mut conn, &[]).unwrap();
        assert!(load_layout(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_label_source_defaults_when_missing() {
        let record: TabRecord =
            serde_json::from_str(r#"{"host":"r1","port":23,"label":"r1"}"#).unwrap();
        assert_eq!(record.label_source, "default");
        assert_eq!(record.id, None);
    }

    #[test]
    fn test_layout_keeps_session_ids() {
        let mut conn = open_in_memory().unwrap();
        let mut running = tab("10.0.0.5", 32769, "R1");
        running.id = Some("5f0c7d7e-9a43-4d1b-8f0e-2f1f6c3b8a11".to_string());
        let tabs = vec![running, tab("10.0.0.5", 32770, "10.0.0.5:32770")];

        save_layout(&mut conn, &tabs).unwrap();
        let loaded = load_layout(&conn).unwrap();
        assert_eq!(loaded, tabs);
        assert_eq!(
            serde_json::to_value(&loaded[0]).unwrap()["id"],
            "5f0c7d7e-9a43-4d1b-8f0e-2f1f6c3b8a11"
        );
        assert!(serde_json::to_value(&loaded[1]).unwrap().get("id").is_none());
    }
}
