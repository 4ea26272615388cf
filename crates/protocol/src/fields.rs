use crate::record::StatusRecord;
use crate::FIELD_DELIMITER;

/// Columns the daemon emits for a board listing when no `fields` filter
/// is sent, in wire order.
const BOARD_FIELDS: &[&str] = &[
    "hostname",
    "testname",
    "color",
    "flags",
    "lastchange",
    "logtime",
    "validtime",
    "acktime",
    "disabletime",
    "sender",
    "cookie",
    "line1",
];

const HOSTINFO_FIELDS: &[&str] = &["hostname", "ip"];

const GHOST_FIELDS: &[&str] = &["hostname", "ip", "lastchange"];

/// Header columns of a single status log. The free-form message text
/// follows on the remaining lines and is carried separately as `msg`.
const LOG_FIELDS: &[&str] = &[
    "hostname",
    "testname",
    "color",
    "flags",
    "lastchange",
    "logtime",
    "validtime",
    "acktime",
    "disabletime",
    "sender",
    "cookie",
    "ackmsg",
    "dismsg",
    "client",
];

/// Ordered list of column names used to turn a delimited reply line into
/// a JSON object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    names: Vec<String>,
}

impl FieldSpec {
    pub fn board_default() -> Self {
        Self::from_static(BOARD_FIELDS)
    }

    pub fn hostinfo_default() -> Self {
        Self::from_static(HOSTINFO_FIELDS)
    }

    pub fn ghost_default() -> Self {
        Self::from_static(GHOST_FIELDS)
    }

    pub fn log_default() -> Self {
        Self::from_static(LOG_FIELDS)
    }

    /// Builds a spec from a comma-separated `fields` filter, keeping the
    /// caller's order. Names pass through untrimmed; the daemon matched
    /// them verbatim when it built the reply, so we label columns the
    /// same way.
    pub fn parse(list: &str) -> Self {
        Self {
            names: list.split(',').map(str::to_string).collect(),
        }
    }

    fn from_static(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|name| name.to_string()).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Projects one reply line onto this spec. Missing trailing columns
    /// become empty strings; surplus columns keep their 1-based position
    /// as `fieldN` so no reply data is silently dropped.
    pub fn project(&self, line: &str) -> StatusRecord {
        let mut columns = line.split(FIELD_DELIMITER);
        let mut fields = Vec::with_capacity(self.names.len());
        for name in &self.names {
            let value = columns.next().unwrap_or("");
            fields.push((name.clone(), value.to_string()));
        }
        for (index, value) in columns.enumerate() {
            let position = self.names.len() + index + 1;
            fields.push((format!("field{position}"), value.to_string()));
        }
        StatusRecord::new(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keeps_requested_order() {
        let spec = FieldSpec::parse("color,hostname,testname");
        assert_eq!(spec.names(), ["color", "hostname", "testname"]);
    }

    #[test]
    fn short_line_fills_missing_columns_with_empty_strings() {
        let spec = FieldSpec::board_default();
        let record = spec.project("web01|conn|red|F|1717000000");
        assert_eq!(record.get("hostname"), Some("web01"));
        assert_eq!(record.get("lastchange"), Some("1717000000"));
        assert_eq!(record.get("logtime"), Some(""));
        assert_eq!(record.get("line1"), Some(""));
        assert_eq!(record.fields().len(), 12);
    }

    #[test]
    fn surplus_columns_are_labelled_by_position() {
        let spec = FieldSpec::hostinfo_default();
        let record = spec.project("web01|10.0.0.5|client|net.example.org");
        assert_eq!(record.get("hostname"), Some("web01"));
        assert_eq!(record.get("ip"), Some("10.0.0.5"));
        assert_eq!(record.get("field3"), Some("client"));
        assert_eq!(record.get("field4"), Some("net.example.org"));
    }

    #[test]
    fn custom_spec_projects_to_exact_json() {
        let spec = FieldSpec::parse("hostname,color");
        let record = spec.project("web01|red");
        let json = serde_json::to_string(&record).expect("serialize");
        assert_eq!(json, r#"{"hostname":"web01","color":"red"}"#);
    }

    #[test]
    fn log_default_ends_with_client_column() {
        let spec = FieldSpec::log_default();
        assert_eq!(spec.names().len(), 14);
        assert_eq!(spec.names().first().map(String::as_str), Some("hostname"));
        assert_eq!(spec.names().last().map(String::as_str), Some("client"));
    }

    #[test]
    fn empty_line_still_yields_all_named_columns() {
        let spec = FieldSpec::ghost_default();
        let record = spec.project("");
        assert_eq!(record.fields().len(), 3);
        assert_eq!(record.get("hostname"), Some(""));
    }
}
