use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::FIELD_DELIMITER;

/// One transcoded status line, as an ordered list of named columns.
///
/// Serialized by hand rather than through a map type so the JSON object
/// keeps the column order of the field list it was projected with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    fields: Vec<(String, String)>,
}

impl StatusRecord {
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

impl Serialize for StatusRecord {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// One line of the daemon's schedule listing: `id|timestamp|sender|command`.
///
/// The command is the final column and may itself contain pipes, so the
/// split stops after three delimiters. Malformed numeric columns decode
/// as zero rather than dropping the row.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ScheduledTaskRecord {
    pub id: i64,
    pub timestamp: i64,
    pub sender: String,
    pub command: String,
}

impl ScheduledTaskRecord {
    pub fn decode(line: &str) -> Self {
        let mut columns = line.splitn(4, FIELD_DELIMITER);
        let id = columns.next().unwrap_or("").trim().parse().unwrap_or(0);
        let timestamp = columns.next().unwrap_or("").trim().parse().unwrap_or(0);
        let sender = columns.next().unwrap_or("").to_string();
        let command = columns.next().unwrap_or("").to_string();
        Self {
            id,
            timestamp,
            sender,
            command,
        }
    }
}
