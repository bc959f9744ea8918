/// Three-way classification of an HTTP status code, shared by every
/// HTTP-based upload backend. Pure function so it is testable without any
/// network I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    Success,
    TransientRetry,
    TerminalFailure,
}

/// Any 5xx, or 429 (rate limited), is expected to resolve on retry. All
/// other non-2xx statuses are terminal and reported immediately.
pub fn classify_status(code: u16) -> StatusOutcome {
    match code {
        200..=299 => StatusOutcome::Success,
        429 | 500..=599 => StatusOutcome::TransientRetry,
        _ => StatusOutcome::TerminalFailure,
    }
}
