pub mod command;
pub mod fields;
pub mod record;
pub mod reframe;

pub use command::{fold_query, Command, InvalidParameter};
pub use fields::FieldSpec;
pub use record::{ScheduledTaskRecord, StatusRecord};
pub use reframe::{TranscodeError, TranscodeMode, Transcoder};

/// Field delimiter in the daemon's listing replies (board, hostinfo,
/// ghostlist, schedule): one record per newline-terminated line, columns
/// separated by pipes.
pub const FIELD_DELIMITER: char = '|';

/// Upper bound on a single reply line while reframing.
///
/// The partial-line buffer is the only state carried across chunk
/// boundaries; a line that grows past this without a newline means the
/// stream is not the delimited format we were told to expect, and the
/// response is aborted instead of buffering without bound.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;
