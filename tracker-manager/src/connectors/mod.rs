// Built-in connector implementations
pub mod jira;
