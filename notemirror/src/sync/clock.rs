use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

pub fn now_rfc3339() -> Result<String, time::error::Format> {
    OffsetDateTime::now_utc().format(&Rfc3339)
}

/// Compact, lexically sortable UTC stamp used for quarantine names.
pub fn stamp(at: OffsetDateTime) -> Result<String, time::error::Format> {
    at.format(format_description!(
        "[year][month][day]T[hour][minute][second]Z"
    ))
}
