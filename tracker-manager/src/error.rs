//! Failure taxonomy of the reconciliation engine.
//!
//! None of these escape the loop; each is logged and, where it belongs to
//! an entity, recorded on the tracker or ticket row.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// No connector registered for the tracker kind. The tracker is skipped.
    #[error("tracker kind '{0}' not implemented")]
    NotImplemented(String),

    /// Reachability or authentication failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Connected, but vendor metadata could not be fetched.
    #[error("metadata retrieval failed: {0}")]
    Metadata(String),

    /// Pushing a pending ticket failed (recorded on the ticket).
    #[error("ticket {ticket_id} create failed: {message}")]
    Create { ticket_id: i64, message: String },

    /// Pulling one ticket's status failed (recorded on the ticket).
    #[error("ticket {ticket_id} refresh failed: {message}")]
    Refresh { ticket_id: i64, message: String },

    /// The batch status pull failed as a whole; no ticket was touched.
    #[error("batch refresh failed: {0}")]
    BatchRefresh(String),

    /// A save or delete failed.
    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl TrackerError {
    /// Renders an `anyhow` chain as a single line.
    pub(crate) fn describe(err: &anyhow::Error) -> String {
        format!("{:#}", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_messages() {
        let e = TrackerError::NotImplemented("servicenow".to_string());
        assert_eq!(e.to_string(), "tracker kind 'servicenow' not implemented");

        let e = TrackerError::Create {
            ticket_id: 4,
            message: "project not found".to_string(),
        };
        assert_eq!(e.to_string(), "ticket 4 create failed: project not found");
    }

    #[test]
    fn test_describe_flattens_context_chain() {
        let err = Err::<(), _>(anyhow::anyhow!("HTTP 401"))
            .context("Jira auth error")
            .unwrap_err();
        assert_eq!(TrackerError::describe(&err), "Jira auth error: HTTP 401");
    }
}
