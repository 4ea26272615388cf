use thiserror::Error;

/// A request the daemon understands, one variant per operation.
///
/// `encode` turns a variant into the single line of command text sent on
/// the wire. Parameter validation happens here, before any connection is
/// made; values that survive validation are interpolated verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Board { filters: Vec<(String, String)> },
    Log { hostname: String, testname: String },
    HostInfo { filters: Vec<(String, String)> },
    GhostList,
    Ping,
    ClientLog {
        hostname: String,
        section: Option<String>,
    },
    Query { hostname: String, testname: String },
    Enable { hostname: String, testname: String },
    Disable {
        hostname: String,
        testname: String,
        duration: Option<String>,
        reason: String,
    },
    Notify {
        hostname: String,
        testname: String,
        message: String,
    },
    Drop {
        hostname: String,
        testname: Option<String>,
    },
    RenameHost { source: String, target: String },
    RenameTest {
        hostname: String,
        source: String,
        target: String,
    },
    ScheduleList,
    ScheduleCancel { id: String },
    ScheduleAt { timestamp: String, command: String },
}

/// Rejected before any daemon contact; maps to HTTP 400.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidParameter {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("invalid {name}: {value:?}")]
    Malformed { name: &'static str, value: String },
}

impl Command {
    /// The wire verb, for logging.
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Board { .. } => "xymondboard",
            Command::Log { .. } => "xymondlog",
            Command::HostInfo { .. } => "hostinfo",
            Command::GhostList => "ghostlist",
            Command::Ping => "ping",
            Command::ClientLog { .. } => "clientlog",
            Command::Query { .. } => "query",
            Command::Enable { .. } => "enable",
            Command::Disable { .. } => "disable",
            Command::Notify { .. } => "notify",
            Command::Drop { .. } => "drop",
            Command::RenameHost { .. } | Command::RenameTest { .. } => "rename",
            Command::ScheduleList
            | Command::ScheduleCancel { .. }
            | Command::ScheduleAt { .. } => "schedule",
        }
    }

    /// Builds the command text. Identical input always produces
    /// byte-identical output; the line terminator is the relay's job.
    pub fn encode(&self) -> Result<String, InvalidParameter> {
        match self {
            Command::Board { filters } => Ok(with_filters("xymondboard", filters)),
            Command::Log { hostname, testname } => {
                Ok(format!("xymondlog {}", dotted(hostname, testname)?))
            }
            Command::HostInfo { filters } => Ok(with_filters("hostinfo", filters)),
            Command::GhostList => Ok("ghostlist".to_string()),
            Command::Ping => Ok("ping".to_string()),
            Command::ClientLog { hostname, section } => {
                let mut text = format!("clientlog {}", segment("hostname", hostname)?);
                if let Some(section) = section {
                    text.push_str(" section=");
                    text.push_str(segment("section", section)?);
                }
                Ok(text)
            }
            Command::Query { hostname, testname } => {
                Ok(format!("query {}", dotted(hostname, testname)?))
            }
            Command::Enable { hostname, testname } => {
                Ok(format!("enable {}", dotted(hostname, testname)?))
            }
            Command::Disable {
                hostname,
                testname,
                duration,
                reason,
            } => Ok(format!(
                "disable {} {} {}",
                dotted(hostname, testname)?,
                duration_token(duration.as_deref())?,
                reason.trim(),
            )),
            Command::Notify {
                hostname,
                testname,
                message,
            } => Ok(format!(
                "notify {} {}",
                dotted(hostname, testname)?,
                segment("message", message)?,
            )),
            Command::Drop { hostname, testname } => {
                let hostname = segment("hostname", hostname)?;
                let testname = match testname {
                    Some(testname) => segment("testname", testname)?,
                    None => "",
                };
                Ok(format!("drop {hostname} {testname}"))
            }
            Command::RenameHost { source, target } => Ok(format!(
                "rename {} {}",
                segment("source", source)?,
                segment("target", target)?,
            )),
            Command::RenameTest {
                hostname,
                source,
                target,
            } => Ok(format!(
                "rename {} {} {}",
                segment("hostname", hostname)?,
                segment("source", source)?,
                segment("target", target)?,
            )),
            Command::ScheduleList => Ok("schedule".to_string()),
            Command::ScheduleCancel { id } => {
                Ok(format!("schedule cancel {}", numeric("id", id)?))
            }
            Command::ScheduleAt { timestamp, command } => Ok(format!(
                "schedule {} {}",
                numeric("timestamp", timestamp)?,
                segment("command", command)?,
            )),
        }
    }
}

/// Collapses repeated query keys into one comma-joined value, keeping
/// first-occurrence order. `?color=red&color=blue` and `?color=red,blue`
/// build the same filter.
pub fn fold_query(pairs: impl IntoIterator<Item = (String, String)>) -> Vec<(String, String)> {
    let mut folded: Vec<(String, String)> = Vec::new();
    for (key, value) in pairs {
        match folded.iter().position(|(existing, _)| *existing == key) {
            Some(index) => {
                let joined = &mut folded[index].1;
                joined.push(',');
                joined.push_str(&value);
            }
            None => folded.push((key, value)),
        }
    }
    folded
}

fn segment<'a>(name: &'static str, value: &'a str) -> Result<&'a str, InvalidParameter> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(InvalidParameter::Empty(name));
    }
    Ok(trimmed)
}

fn dotted(hostname: &str, testname: &str) -> Result<String, InvalidParameter> {
    Ok(format!(
        "{}.{}",
        segment("hostname", hostname)?,
        segment("testname", testname)?,
    ))
}

/// Filters are forwarded verbatim as ` key=value` tokens, unknown keys
/// included; the daemon does its own filter parsing.
fn with_filters(verb: &str, filters: &[(String, String)]) -> String {
    let mut text = verb.to_string();
    for (key, value) in filters {
        text.push(' ');
        text.push_str(key);
        text.push('=');
        text.push_str(value);
    }
    text
}

/// Disable durations: the `-1` sentinel (until OK) or a bare integer,
/// optionally suffixed s/m/h/d. Absent means `-1`.
fn duration_token(duration: Option<&str>) -> Result<&str, InvalidParameter> {
    let trimmed = match duration {
        Some(value) => value.trim(),
        None => "",
    };
    if trimmed.is_empty() || trimmed == "-1" {
        return Ok("-1");
    }
    let digits = trimmed
        .strip_suffix(['s', 'm', 'h', 'd'])
        .unwrap_or(trimmed);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(trimmed);
    }
    Err(InvalidParameter::Malformed {
        name: "duration",
        value: trimmed.to_string(),
    })
}

fn numeric<'a>(name: &'static str, value: &'a str) -> Result<&'a str, InvalidParameter> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(InvalidParameter::Empty(name));
    }
    if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(InvalidParameter::Malformed {
            name,
            value: trimmed.to_string(),
        });
    }
    Ok(trimmed)
}
