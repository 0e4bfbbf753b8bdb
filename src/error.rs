/// Contract violations reported to callers of the hub.
///
/// Runtime failures (stream drops, expired cursors, unreachable metrics) are
/// absorbed by the watches themselves and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown resource kind {0:?}")]
    UnknownKind(String),
}
