use thiserror::Error;

/// Error taxonomy for the convergence pipeline.
///
/// `Conflict` covers lock contention, duplicate active operations, and merge
/// conflicts — all routine outcomes surfaced as 409, never logged as errors.
/// State-machine rejections and lock contention are tagged values at the
/// component level; services translate them into this taxonomy at their
/// boundary.
#[derive(Debug, Error)]
pub enum ConvergeError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ConvergeError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::InvalidInput(_) => 400,
            Self::Forbidden(_) => 403,
            Self::Conflict(_) => 409,
            Self::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── http_status: exhaustive variant coverage ──────────────────

    #[test]
    fn http_status_not_found() {
        assert_eq!(ConvergeError::NotFound("x".into()).http_status(), 404);
    }

    #[test]
    fn http_status_invalid_input() {
        assert_eq!(ConvergeError::InvalidInput("x".into()).http_status(), 400);
    }

    #[test]
    fn http_status_forbidden() {
        assert_eq!(ConvergeError::Forbidden("x".into()).http_status(), 403);
    }

    #[test]
    fn http_status_conflict() {
        assert_eq!(ConvergeError::Conflict("x".into()).http_status(), 409);
    }

    #[test]
    fn http_status_internal() {
        let err = ConvergeError::Internal(anyhow::anyhow!("boom"));
        assert_eq!(err.http_status(), 500);
    }

    // ── Display ──────────────────────────────────────────────────

    #[test]
    fn display_not_found() {
        let e = ConvergeError::NotFound("branch 42".into());
        assert_eq!(e.to_string(), "not found: branch 42");
    }

    #[test]
    fn display_conflict() {
        let e = ConvergeError::Conflict("operation already in progress".into());
        assert_eq!(e.to_string(), "conflict: operation already in progress");
    }

    #[test]
    fn display_forbidden() {
        let e = ConvergeError::Forbidden("self-review".into());
        assert_eq!(e.to_string(), "forbidden: self-review");
    }
}
